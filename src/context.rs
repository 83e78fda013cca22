//! The machine as seen from inside a hook.
//!
//! Every `enter`/`exit`/`process_message` invocation receives a `&mut
//! Context`. It carries the dispatch queue, the deferred queue, and the
//! pending-transition slot, so hooks can send, defer, and transition
//! without reaching back to the handle.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::log::LogRec;
use crate::machine::Shared;
use crate::message::Message;
use crate::queue::DispatchQueue;
use crate::tree::StateId;

/// A requested transition destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    State(StateId),
    /// The halting sentinel: exit everything, run `on_halting`, stop.
    Halt,
}

/// Worker-side machine context handed to every hook.
pub struct Context {
    pub(crate) shared: Arc<Shared>,
    pub(crate) queue: DispatchQueue,
    pub(crate) deferred: VecDeque<Message>,
    pub(crate) pending: Option<Target>,
    pub(crate) current_msg: Option<Message>,
    pub(crate) in_process_message: bool,
    pub(crate) quit_now: bool,
    num_states: usize,
}

impl Context {
    pub(crate) fn new(shared: Arc<Shared>, num_states: usize) -> Self {
        Self {
            shared,
            queue: DispatchQueue::new(),
            deferred: VecDeque::new(),
            pending: None,
            current_msg: None,
            in_process_message: false,
            quit_now: false,
            num_states,
        }
    }

    /// Requests a transition to `target`.
    ///
    /// Legal from any hook. Only the last request made during a single
    /// dispatch takes effect; requesting from an `exit` retargets the
    /// transition already in flight.
    ///
    /// # Panics
    ///
    /// Panics if `target` was not issued by this machine's `add_state`;
    /// that is a programming fault, not a runtime condition.
    pub fn transition_to(&mut self, target: StateId) {
        assert!(
            target.0 < self.num_states,
            "transition target {target} is not registered with this machine",
        );
        self.pending = Some(Target::State(target));
    }

    /// Requests an orderly shutdown: every active state is exited, the
    /// machine's `on_halting` hook runs, and the worker terminates.
    pub fn transition_to_halting_state(&mut self) {
        self.pending = Some(Target::Halt);
    }

    /// Parks the current message; it is replayed from the front of the
    /// queue after the next state change.
    ///
    /// Only legal inside `process_message`. Elsewhere the call is a
    /// programming fault: it is logged and ignored.
    pub fn defer_message(&mut self, msg: &Message) {
        if !self.in_process_message {
            tracing::error!(
                machine = self.name(),
                what = msg.what,
                "defer_message is only legal inside process_message; ignored"
            );
            return;
        }
        self.deferred.push_back(msg.clone());
    }

    /// Enqueues a message for immediate delivery.
    pub fn send(&mut self, msg: impl Into<Message>) {
        self.queue.push_user(msg.into(), Instant::now());
    }

    /// Enqueues a message due `delay` from now.
    pub fn send_delayed(&mut self, msg: impl Into<Message>, delay: Duration) {
        self.queue.push_user(msg.into(), Instant::now() + delay);
    }

    /// Posts the quit marker at the queue tail; messages already due are
    /// still dispatched before the machine shuts down.
    pub fn quit(&mut self) {
        self.queue.push_quit(Instant::now());
    }

    /// Shuts down as soon as the current dispatch completes, discarding
    /// pending messages.
    pub fn quit_now(&mut self) {
        self.quit_now = true;
    }

    /// The message being dispatched, stable for the whole dispatch
    /// including any consequent exit/entry chain. `None` during the
    /// initial entry at `start`.
    pub fn current_message(&self) -> Option<&Message> {
        self.current_msg.as_ref()
    }

    /// The machine's name.
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    /// Whether synthetic enter/exit log records are enabled.
    pub fn is_dbg(&self) -> bool {
        self.shared.is_dbg()
    }

    /// Enables or disables synthetic enter/exit log records.
    pub fn set_dbg(&mut self, dbg: bool) {
        self.shared.set_dbg(dbg);
    }

    /// Resizes the log ring, truncating oldest records if shrinking.
    pub fn set_log_rec_size(&mut self, n: usize) {
        self.shared.set_log_rec_size(n);
    }

    /// Chronological snapshot of the log ring. `on_quitting` typically
    /// takes this copy before the records become unreachable.
    pub fn copy_log_recs(&self) -> Vec<LogRec> {
        self.shared.copy_log_recs()
    }

    /// Total records ever added to the ring.
    pub fn log_rec_count(&self) -> u64 {
        self.shared.log_rec_count()
    }

    pub(crate) fn take_pending(&mut self) -> Option<Target> {
        self.pending.take()
    }

    /// The target to record as a dispatch's destination: the state pending
    /// when routing finished, `None` for no transition or for halting.
    pub(crate) fn pending_dest(&self) -> Option<StateId> {
        match self.pending {
            Some(Target::State(id)) => Some(id),
            _ => None,
        }
    }
}
