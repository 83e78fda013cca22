//! The machine driver: pre-start configuration, the worker dispatch loop,
//! and the producer-side handle.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::task::Poll;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::context::{Context, Target};
use crate::error::{ConfigError, TaskError};
use crate::log::{LogRec, LogRecords, LogTag};
use crate::message::Message;
use crate::queue::Item;
use crate::state::{DefaultHooks, Hooks, Response, State};
use crate::tree::{StateId, StateTree};

/// State shared between the worker, the handles, and the pre-start object.
pub(crate) struct Shared {
    name: String,
    dbg: AtomicBool,
    log: Mutex<LogRecords>,
    state_names: OnceLock<Vec<Option<String>>>,
}

impl Shared {
    fn new(name: String) -> Self {
        Self {
            name,
            dbg: AtomicBool::new(false),
            log: Mutex::new(LogRecords::new()),
            state_names: OnceLock::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_dbg(&self) -> bool {
        self.dbg.load(Ordering::Relaxed)
    }

    pub(crate) fn set_dbg(&self, dbg: bool) {
        self.dbg.store(dbg, Ordering::Relaxed);
    }

    pub(crate) fn set_log_rec_size(&self, n: usize) {
        self.log.lock().unwrap().set_capacity(n);
    }

    pub(crate) fn add_log_rec(&self, rec: LogRec) {
        self.log.lock().unwrap().add(rec);
    }

    pub(crate) fn log_rec(&self, i: usize) -> Option<LogRec> {
        self.log.lock().unwrap().rec(i).cloned()
    }

    pub(crate) fn log_rec_size(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    pub(crate) fn log_rec_count(&self) -> u64 {
        self.log.lock().unwrap().count()
    }

    pub(crate) fn copy_log_recs(&self) -> Vec<LogRec> {
        self.log.lock().unwrap().copy()
    }

    fn state_name(&self, id: StateId) -> Option<String> {
        self.state_names
            .get()
            .and_then(|names| names.get(id.0))
            .and_then(Clone::clone)
    }
}

/// What producers push through the channel.
enum Op {
    Message { msg: Message, due: Instant },
    Quit,
    QuitNow,
}

/// A hierarchical state machine being configured, before it runs.
///
/// Register states (parents first), pick the initial leaf, then [`start`]
/// it. `start` consumes the machine, so registration after start and
/// double starts are unrepresentable rather than runtime faults.
///
/// [`start`]: StateMachine::start
///
/// # Example
///
/// ```rust,no_run
/// use tokio_hsm::{Message, Response, State, StateMachine};
///
/// struct Idle;
/// impl State for Idle {
///     fn name(&self) -> Option<&str> {
///         Some("Idle")
///     }
/// }
///
/// # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut sm = StateMachine::new("doorbell");
/// let idle = sm.add_state(Idle, None)?;
/// sm.set_initial_state(idle)?;
/// let (handle, task) = sm.start()?;
/// handle.send(1);
/// handle.quit();
/// task.await?;
/// # Ok(()) }
/// ```
pub struct StateMachine {
    tree: StateTree,
    states: Vec<Box<dyn State>>,
    hooks: Box<dyn Hooks>,
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<Op>,
    rx: mpsc::UnboundedReceiver<Op>,
}

impl StateMachine {
    /// Creates an empty machine. Nothing runs until [`start`].
    ///
    /// [`start`]: StateMachine::start
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tree: StateTree::new(),
            states: Vec::new(),
            hooks: Box::new(DefaultHooks),
            shared: Arc::new(Shared::new(name.into())),
            tx,
            rx,
        }
    }

    /// Registers a state under `parent` (`None` for a root). Parents must
    /// be registered before their children.
    pub fn add_state(
        &mut self,
        state: impl State + 'static,
        parent: Option<StateId>,
    ) -> Result<StateId, ConfigError> {
        let id = self.tree.add(parent)?;
        self.states.push(Box::new(state));
        Ok(id)
    }

    /// Designates the state the machine occupies once started.
    pub fn set_initial_state(&mut self, id: StateId) -> Result<(), ConfigError> {
        self.tree.set_initial(id)
    }

    /// Installs machine-level hooks (`unhandled_message`, `on_halting`,
    /// `on_quitting`).
    pub fn set_hooks(&mut self, hooks: impl Hooks + 'static) {
        self.hooks = Box::new(hooks);
    }

    /// Enables synthetic enter/exit/quitting log records.
    pub fn set_dbg(&self, dbg: bool) {
        self.shared.set_dbg(dbg);
    }

    /// Resizes the log ring.
    pub fn set_log_rec_size(&self, n: usize) {
        self.shared.set_log_rec_size(n);
    }

    /// Enqueues a message before the machine runs; it is delivered once the
    /// dispatch loop starts, after the initial entry chain.
    pub fn send(&self, msg: impl Into<Message>) {
        let _ = self.tx.send(Op::Message {
            msg: msg.into(),
            due: Instant::now(),
        });
    }

    /// Like [`send`](StateMachine::send) with a delivery delay.
    pub fn send_delayed(&self, msg: impl Into<Message>, delay: Duration) {
        let _ = self.tx.send(Op::Message {
            msg: msg.into(),
            due: Instant::now() + delay,
        });
    }

    /// Runs the initial entry chain and starts the dispatch loop on the
    /// ambient Tokio runtime.
    pub fn start(self) -> Result<(MachineHandle, MachineTask), ConfigError> {
        let (worker, handle) = self.into_worker()?;
        let join = tokio::spawn(worker.run());
        Ok((handle, MachineTask { join }))
    }

    /// Like [`start`](StateMachine::start), but spawns onto the given
    /// runtime. Machines started on one current-thread runtime share its
    /// worker thread and interleave dispatch-by-dispatch.
    pub fn start_on(
        self,
        runtime: &tokio::runtime::Handle,
    ) -> Result<(MachineHandle, MachineTask), ConfigError> {
        let (worker, handle) = self.into_worker()?;
        let join = runtime.spawn(worker.run());
        Ok((handle, MachineTask { join }))
    }

    fn into_worker(self) -> Result<(Worker, MachineHandle), ConfigError> {
        let initial = self.tree.initial().ok_or(ConfigError::NoInitialState)?;
        debug_assert!(self.tree.contains(initial));

        let names: Vec<Option<String>> = self
            .states
            .iter()
            .map(|s| s.name().map(String::from))
            .collect();
        let _ = self.shared.state_names.set(names);

        let (state_tx, state_rx) = watch::channel(None);
        let num_states = self.tree.len();
        let worker = Worker {
            ctx: Context::new(Arc::clone(&self.shared), num_states),
            tree: self.tree,
            states: self.states.into_iter().map(Some).collect(),
            hooks: self.hooks,
            rx: self.rx,
            current: None,
            lifecycle: Lifecycle::Started,
            producers_gone: false,
            log_synthetic: false,
            state_tx,
        };
        let handle = MachineHandle {
            tx: self.tx,
            shared: self.shared,
            state_rx,
        };
        Ok((worker, handle))
    }
}

impl fmt::Display for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "name={} state=(null)", self.shared.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    /// Initial entry chain in flight; no message pulled yet.
    Started,
    Running,
    /// Quit marker consumed; draining messages already due.
    Quitting,
    /// Terminal, via halt or quit.
    Halted,
}

/// The dispatch loop. Owns the states, the tree, and the context; runs as
/// one task and is the only toucher of all three.
struct Worker {
    ctx: Context,
    tree: StateTree,
    states: Vec<Option<Box<dyn State>>>,
    hooks: Box<dyn Hooks>,
    rx: mpsc::UnboundedReceiver<Op>,
    /// Active leaf; the active set is exactly this state's ancestor chain.
    current: Option<StateId>,
    lifecycle: Lifecycle,
    /// Every sender is gone; only self-sent messages can still arrive.
    producers_gone: bool,
    /// Synthetic dbg records start after the initial entry chain.
    log_synthetic: bool,
    state_tx: watch::Sender<Option<StateId>>,
}

impl Worker {
    async fn run(mut self) {
        tracing::debug!(machine = self.ctx.name(), "starting");
        self.initial_entry();

        while self.lifecycle != Lifecycle::Halted {
            self.drain_ops();
            if self.ctx.quit_now {
                self.finalize_quit();
                break;
            }
            match self.ctx.queue.pop_due(Instant::now()) {
                Some(Item::User(msg)) => self.dispatch(msg),
                Some(Item::Quit) => {
                    if self.lifecycle == Lifecycle::Running {
                        tracing::debug!(machine = self.ctx.name(), "quit requested, draining");
                        self.lifecycle = Lifecycle::Quitting;
                    }
                }
                None => {
                    if self.lifecycle == Lifecycle::Quitting {
                        self.finalize_quit();
                        break;
                    }
                    self.wait_for_work().await;
                }
            }
        }
        tracing::debug!(machine = self.ctx.name(), "terminated");
    }

    /// Blocks until a producer op arrives or the earliest queued message
    /// comes due.
    async fn wait_for_work(&mut self) {
        let next_due = self.ctx.queue.next_due();
        if self.producers_gone {
            match next_due {
                // Delayed self-sends still drive the machine.
                Some(due) => tokio::time::sleep_until(due).await,
                // Nothing queued and nothing can ever arrive; shut down
                // along the quit path.
                None => self.lifecycle = Lifecycle::Quitting,
            }
            return;
        }
        let deadline =
            next_due.unwrap_or_else(|| Instant::now() + Duration::from_secs(3_153_600_000));
        tokio::select! {
            op = self.rx.recv() => match op {
                Some(op) => self.accept(op),
                None => self.producers_gone = true,
            },
            _ = tokio::time::sleep_until(deadline) => {}
        }
    }

    fn drain_ops(&mut self) {
        while let Ok(op) = self.rx.try_recv() {
            self.accept(op);
        }
    }

    fn accept(&mut self, op: Op) {
        match op {
            Op::Message { msg, due } => self.ctx.queue.push_user(msg, due),
            Op::Quit => self.ctx.queue.push_quit(Instant::now()),
            Op::QuitNow => self.ctx.quit_now = true,
        }
    }

    /// Enters from the root of the initial branch down to the initial leaf,
    /// then honors any transition requested from those `enter` hooks.
    fn initial_entry(&mut self) {
        let initial = self.tree.initial().expect("start validated the initial state");
        let chain: Vec<StateId> = self.tree.chain(initial).to_vec();
        for &id in chain.iter().rev() {
            self.invoke_enter(id);
            self.tree.set_active(id, true);
        }
        self.current = Some(initial);
        self.log_synthetic = true;
        self.lifecycle = Lifecycle::Running;
        self.perform_transitions();
        self.publish_state();
    }

    /// One pass of the loop: route the message up the active chain, apply
    /// any requested transition, then append the log record.
    fn dispatch(&mut self, msg: Message) {
        tracing::trace!(machine = self.ctx.name(), what = msg.what, "dispatch");
        self.ctx.current_msg = Some(msg.clone());
        self.ctx.pending = None;
        let origin = self.current;

        let mut handler = None;
        if let Some(leaf) = origin {
            let chain: Vec<StateId> = self.tree.chain(leaf).to_vec();
            for id in chain {
                if self.invoke_process(id, &msg) == Response::Handled {
                    handler = Some(id);
                    break;
                }
            }
        }
        if handler.is_none() {
            self.hooks.unhandled_message(&msg, &mut self.ctx);
        }

        let dest = self.ctx.pending_dest();
        self.perform_transitions();

        let state_name = handler.and_then(|id| self.ctx.shared.state_name(id));
        self.ctx.shared.add_log_rec(LogRec::new(
            LogTag::Msg(msg.what),
            handler,
            origin,
            dest,
            state_name,
        ));
    }

    /// Drives requested transitions to completion.
    ///
    /// Exits run from the active leaf toward the pivot (the first active
    /// ancestor strictly above the target); after every exit the pending
    /// slot is re-checked, so an `exit` hook that retargets the transition
    /// redirects the remaining exits and the entry phase goes to the final
    /// target only. A target requested during an `enter` re-drives the
    /// whole controller. Afterwards, if anything changed, deferred messages
    /// flush back to the front of the queue in arrival order.
    fn perform_transitions(&mut self) {
        let mut changed = false;
        while let Some(mut target) = self.ctx.take_pending() {
            changed = true;
            // Exit phase, re-planned after every exit.
            loop {
                let pivot = match target {
                    Target::Halt => None,
                    Target::State(t) => self.tree.plan_entry(t).1,
                };
                if self.current == pivot {
                    break;
                }
                let Some(leaf) = self.current else { break };
                self.invoke_exit(leaf);
                self.tree.set_active(leaf, false);
                self.current = self.tree.parent(leaf);
                if let Some(retarget) = self.ctx.take_pending() {
                    target = retarget;
                }
            }
            match target {
                Target::Halt => {
                    tracing::debug!(machine = self.ctx.name(), "halting");
                    self.hooks.on_halting(&mut self.ctx);
                    self.lifecycle = Lifecycle::Halted;
                    break;
                }
                Target::State(t) => {
                    let (path, _) = self.tree.plan_entry(t);
                    for &id in path.iter().rev() {
                        self.invoke_enter(id);
                        self.tree.set_active(id, true);
                        self.current = Some(id);
                    }
                }
            }
        }
        if changed {
            self.flush_deferred();
            self.publish_state();
        }
    }

    fn flush_deferred(&mut self) {
        while let Some(msg) = self.ctx.deferred.pop_back() {
            self.ctx.queue.push_front(msg);
        }
    }

    /// The quit path: discard whatever is still queued, exit the active
    /// chain leaf to root, record and run `on_quitting`.
    fn finalize_quit(&mut self) {
        tracing::debug!(machine = self.ctx.name(), "quitting");
        self.ctx.queue.clear();
        self.ctx.deferred.clear();
        while let Some(leaf) = self.current {
            self.invoke_exit(leaf);
            self.tree.set_active(leaf, false);
            self.current = self.tree.parent(leaf);
            // Transitions requested while quitting are meaningless.
            self.ctx.pending = None;
        }
        if self.log_synthetic && self.ctx.is_dbg() {
            self.ctx
                .shared
                .add_log_rec(LogRec::new(LogTag::Quitting, None, None, None, None));
        }
        self.hooks.on_quitting(&mut self.ctx);
        self.lifecycle = Lifecycle::Halted;
        self.publish_state();
    }

    fn invoke_enter(&mut self, id: StateId) {
        let mut state = self.states[id.0].take().expect("state hook reentered");
        state.enter(&mut self.ctx);
        self.states[id.0] = Some(state);
        self.add_synthetic(LogTag::Enter, id);
    }

    fn invoke_exit(&mut self, id: StateId) {
        let mut state = self.states[id.0].take().expect("state hook reentered");
        state.exit(&mut self.ctx);
        self.states[id.0] = Some(state);
        self.add_synthetic(LogTag::Exit, id);
    }

    fn invoke_process(&mut self, id: StateId, msg: &Message) -> Response {
        let mut state = self.states[id.0].take().expect("state hook reentered");
        self.ctx.in_process_message = true;
        let response = state.process_message(msg, &mut self.ctx);
        self.ctx.in_process_message = false;
        self.states[id.0] = Some(state);
        response
    }

    fn add_synthetic(&self, tag: LogTag, id: StateId) {
        if self.log_synthetic && self.ctx.is_dbg() {
            let name = self.ctx.shared.state_name(id);
            self.ctx
                .shared
                .add_log_rec(LogRec::new(tag, Some(id), None, None, name));
        }
    }

    fn publish_state(&self) {
        let _ = self.state_tx.send(self.current);
    }
}

/// Cloneable producer/observer handle to a running machine.
///
/// All sends after the machine has terminated return silently.
#[derive(Clone)]
pub struct MachineHandle {
    tx: mpsc::UnboundedSender<Op>,
    shared: Arc<Shared>,
    state_rx: watch::Receiver<Option<StateId>>,
}

impl MachineHandle {
    /// Enqueues a message for immediate delivery.
    pub fn send(&self, msg: impl Into<Message>) {
        let _ = self.tx.send(Op::Message {
            msg: msg.into(),
            due: Instant::now(),
        });
    }

    /// Enqueues a message due `delay` from now. It is delivered no earlier
    /// than that, and never overtakes an earlier-scheduled due message.
    pub fn send_delayed(&self, msg: impl Into<Message>, delay: Duration) {
        let _ = self.tx.send(Op::Message {
            msg: msg.into(),
            due: Instant::now() + delay,
        });
    }

    /// Graceful shutdown: every message already due is dispatched before
    /// the machine exits its states and runs `on_quitting`.
    pub fn quit(&self) {
        let _ = self.tx.send(Op::Quit);
    }

    /// Immediate shutdown: the in-flight dispatch completes, pending
    /// messages are discarded.
    pub fn quit_now(&self) {
        let _ = self.tx.send(Op::QuitNow);
    }

    /// The active leaf state, `None` before the initial entry finishes and
    /// after termination.
    pub fn current_state(&self) -> Option<StateId> {
        *self.state_rx.borrow()
    }

    /// Waits for the machine to occupy the given state.
    pub async fn wait_for_state(
        &self,
        target: StateId,
    ) -> Result<(), watch::error::RecvError> {
        let mut rx = self.state_rx.clone();
        while *rx.borrow_and_update() != Some(target) {
            rx.changed().await?;
        }
        Ok(())
    }

    /// The `i`th retained log record, oldest first.
    pub fn log_rec(&self, i: usize) -> Option<LogRec> {
        self.shared.log_rec(i)
    }

    /// Number of records currently retained (≤ capacity).
    pub fn log_rec_size(&self) -> usize {
        self.shared.log_rec_size()
    }

    /// Total records ever added.
    pub fn log_rec_count(&self) -> u64 {
        self.shared.log_rec_count()
    }

    /// Chronological deep copy of the retained records.
    pub fn copy_log_recs(&self) -> Vec<LogRec> {
        self.shared.copy_log_recs()
    }

    /// Enables synthetic enter/exit/quitting log records.
    pub fn set_dbg(&self, dbg: bool) {
        self.shared.set_dbg(dbg);
    }

    /// Resizes the log ring, truncating oldest records if shrinking.
    pub fn set_log_rec_size(&self, n: usize) {
        self.shared.set_log_rec_size(n);
    }
}

impl fmt::Display for MachineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "name={} state=", self.shared.name())?;
        match self.current_state() {
            Some(id) => match self.shared.state_name(id) {
                Some(name) => write!(f, "{name}"),
                None => write!(f, "(null)"),
            },
            None => write!(f, "(null)"),
        }
    }
}

/// The machine's background task; awaits the worker's termination.
///
/// Resolves once the machine halts or quits. A panic inside a hook
/// surfaces here as [`TaskError::Join`].
pub struct MachineTask {
    join: tokio::task::JoinHandle<()>,
}

impl Future for MachineTask {
    type Output = Result<(), TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.join)
            .poll(cx)
            .map(|res| res.map_err(TaskError::Join))
    }
}
