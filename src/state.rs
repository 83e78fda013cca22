//! The traits implemented by client code: per-state handlers and
//! machine-level hooks.

use crate::context::Context;
use crate::message::Message;

/// Outcome of offering a message to a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// The state consumed the message.
    Handled,
    /// The message bubbles up to the parent state.
    Unhandled,
}

/// A node in the state hierarchy.
///
/// All hooks run on the machine's worker task and receive the machine's
/// [`Context`], through which they may request transitions, defer the
/// current message, or send new ones. Hooks must not block; a blocking hook
/// stalls every machine sharing the worker's runtime thread.
///
/// Every method has a default implementation, so a state only spells out
/// what it cares about:
///
/// ```rust
/// use tokio_hsm::{Context, Message, Response, State};
///
/// struct Idle;
///
/// impl State for Idle {
///     fn process_message(&mut self, msg: &Message, _ctx: &mut Context) -> Response {
///         println!("idle got what={}", msg.what);
///         Response::Handled
///     }
///
///     fn name(&self) -> Option<&str> {
///         Some("Idle")
///     }
/// }
/// ```
pub trait State: Send {
    /// Called when this state becomes active.
    fn enter(&mut self, ctx: &mut Context) {
        let _ = ctx;
    }

    /// Called when this state stops being active.
    ///
    /// An `exit` may retarget an in-flight transition; the controller
    /// re-plans before running the next exit.
    fn exit(&mut self, ctx: &mut Context) {
        let _ = ctx;
    }

    /// Offered each message while this state is the deepest active state
    /// that has not yet handled it. Returning [`Response::Unhandled`] passes
    /// the message to the parent.
    fn process_message(&mut self, msg: &Message, ctx: &mut Context) -> Response {
        let _ = (msg, ctx);
        Response::Unhandled
    }

    /// Display name. `None` renders as `(null)`.
    fn name(&self) -> Option<&str> {
        None
    }
}

/// Machine-level hooks, all optional.
///
/// Install with [`StateMachine::set_hooks`](crate::StateMachine::set_hooks).
/// Like state hooks, these run on the worker task.
pub trait Hooks: Send {
    /// Called when no state in the active chain handled `msg`.
    fn unhandled_message(&mut self, msg: &Message, ctx: &mut Context) {
        tracing::debug!(machine = ctx.name(), what = msg.what, "unhandled message");
    }

    /// Terminal hook for the halt path (`transition_to_halting_state`).
    fn on_halting(&mut self, ctx: &mut Context) {
        let _ = ctx;
    }

    /// Terminal hook for the quit path (`quit` / `quit_now`).
    fn on_quitting(&mut self, ctx: &mut Context) {
        let _ = ctx;
    }
}

/// The default hook set: everything is a no-op.
pub struct DefaultHooks;

impl Hooks for DefaultHooks {}
