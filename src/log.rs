//! Bounded chronological record of recent dispatches and lifecycle events.

use std::collections::VecDeque;
use std::fmt;

use crate::tree::StateId;

/// Default ring capacity, overridable with `set_log_rec_size`.
pub const DEFAULT_LOG_REC_SIZE: usize = 20;

/// What a log record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTag {
    /// A dispatched message, by `what` code.
    Msg(i32),
    /// Synthetic record: a state's `enter` hook ran (dbg mode only).
    Enter,
    /// Synthetic record: a state's `exit` hook ran (dbg mode only).
    Exit,
    /// Synthetic record: `on_quitting` ran (dbg mode only).
    Quitting,
}

/// One entry of the log ring.
#[derive(Debug, Clone)]
pub struct LogRec {
    seq: u64,
    tag: LogTag,
    state: Option<StateId>,
    original_state: Option<StateId>,
    dest_state: Option<StateId>,
    state_name: Option<String>,
}

impl LogRec {
    pub(crate) fn new(
        tag: LogTag,
        state: Option<StateId>,
        original_state: Option<StateId>,
        dest_state: Option<StateId>,
        state_name: Option<String>,
    ) -> Self {
        Self {
            seq: 0,
            tag,
            state,
            original_state,
            dest_state,
            state_name,
        }
    }

    /// Position in the total record stream (not the ring).
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn tag(&self) -> LogTag {
        self.tag
    }

    /// The `what` of the triggering message; `None` for synthetic records.
    pub fn what(&self) -> Option<i32> {
        match self.tag {
            LogTag::Msg(what) => Some(what),
            _ => None,
        }
    }

    /// The state that handled the message (after bubbling), or the subject
    /// of a synthetic enter/exit record. `None` when no state handled it.
    pub fn state(&self) -> Option<StateId> {
        self.state
    }

    /// The active leaf when dispatch began.
    pub fn original_state(&self) -> Option<StateId> {
        self.original_state
    }

    /// The transition target requested during the dispatch, if any.
    pub fn dest_state(&self) -> Option<StateId> {
        self.dest_state
    }
}

impl fmt::Display for LogRec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rec[{}]: ", self.seq)?;
        match self.tag {
            LogTag::Msg(what) => write!(f, "what={what}")?,
            LogTag::Enter => write!(f, "enter")?,
            LogTag::Exit => write!(f, "exit")?,
            LogTag::Quitting => write!(f, "quitting")?,
        }
        match (self.state, self.state_name.as_deref()) {
            (Some(_), Some(name)) => write!(f, " state={name}")?,
            (Some(_), None) => write!(f, " state=(null)")?,
            (None, _) => {}
        }
        if let Some(dest) = self.dest_state {
            write!(f, " dest={dest}")?;
        }
        Ok(())
    }
}

/// Fixed-capacity ring of [`LogRec`]s.
///
/// The ring drops its oldest entry on overflow; `count` keeps growing so the
/// total number of records ever added stays observable.
pub(crate) struct LogRecords {
    recs: VecDeque<LogRec>,
    capacity: usize,
    count: u64,
}

impl LogRecords {
    pub(crate) fn new() -> Self {
        Self {
            recs: VecDeque::new(),
            capacity: DEFAULT_LOG_REC_SIZE,
            count: 0,
        }
    }

    pub(crate) fn add(&mut self, mut rec: LogRec) {
        rec.seq = self.count;
        self.count += 1;
        while self.recs.len() >= self.capacity.max(1) {
            self.recs.pop_front();
        }
        if self.capacity > 0 {
            self.recs.push_back(rec);
        }
    }

    /// Shrinking evicts the oldest entries immediately.
    pub(crate) fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        while self.recs.len() > capacity {
            self.recs.pop_front();
        }
    }

    /// Current number of retained records.
    pub(crate) fn len(&self) -> usize {
        self.recs.len()
    }

    /// Total records ever added.
    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    /// The `i`th retained record, oldest first.
    pub(crate) fn rec(&self, i: usize) -> Option<&LogRec> {
        self.recs.get(i)
    }

    /// Chronological snapshot.
    pub(crate) fn copy(&self) -> Vec<LogRec> {
        self.recs.iter().cloned().collect()
    }
}
