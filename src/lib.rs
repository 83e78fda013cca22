//! # tokio-hsm
//!
//! A hierarchical state machine runtime on a Tokio worker task.
//!
//! A machine is a tree of [`State`]s driven by a single-consumer queue of
//! [`Message`]s. Each dispatch offers the message to the active leaf and
//! bubbles it toward the root until some state handles it; handlers can
//! request transitions (driven with least-common-ancestor exit/entry
//! chains), defer the current message until the next state change, or send
//! new messages, immediately or delayed. A bounded log ring keeps the
//! recent dispatch history for diagnostics.
//!
//! All hooks run on one worker task. Machines started on the same
//! current-thread runtime share its thread and interleave
//! dispatch-by-dispatch, never within a dispatch.
//!
//! ## Example
//!
//! ```rust
//! use tokio_hsm::{Context, Message, Response, State, StateMachine};
//!
//! struct Closed;
//! struct Open;
//!
//! impl State for Closed {
//!     fn process_message(&mut self, msg: &Message, ctx: &mut Context) -> Response {
//!         if msg.what == 1 {
//!             ctx.transition_to_halting_state();
//!         }
//!         Response::Handled
//!     }
//!     fn name(&self) -> Option<&str> {
//!         Some("Closed")
//!     }
//! }
//!
//! impl State for Open {
//!     fn name(&self) -> Option<&str> {
//!         Some("Open")
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut sm = StateMachine::new("door");
//! let closed = sm.add_state(Closed, None)?;
//! let _open = sm.add_state(Open, None)?;
//! sm.set_initial_state(closed)?;
//!
//! let (handle, task) = sm.start()?;
//! handle.send(1);
//! task.await?;
//! # Ok(()) }
//! ```

mod context;
mod error;
mod log;
mod machine;
mod message;
mod queue;
mod state;
mod tree;

pub use crate::context::Context;
pub use crate::error::{ConfigError, TaskError};
pub use crate::log::{LogRec, LogTag, DEFAULT_LOG_REC_SIZE};
pub use crate::machine::{MachineHandle, MachineTask, StateMachine};
pub use crate::message::Message;
pub use crate::state::{DefaultHooks, Hooks, Response, State};
pub use crate::tree::StateId;
