//! Lifecycle: quit/quit_now semantics, delayed delivery, and machines
//! sharing one worker thread.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_hsm::{Context, Hooks, LogRec, LogTag, Message, Response, State, StateMachine};

const CMD_1: i32 = 1;
const CMD_2: i32 = 2;
const CMD_3: i32 = 3;
const CMD_4: i32 = 4;

// Scheduler jitter allowance for the timing assertions.
const FUDGE: Duration = Duration::from_millis(20);

/// Snapshots the log ring from inside `on_quitting`, before the worker is
/// gone.
#[derive(Clone, Default)]
struct SnapshotOnQuit {
    recs: Arc<Mutex<Vec<LogRec>>>,
}

impl Hooks for SnapshotOnQuit {
    fn on_quitting(&mut self, ctx: &mut Context) {
        *self.recs.lock().unwrap() = ctx.copy_log_recs();
    }
}

/// Quits (gracefully or not) on CMD_1, consumes everything else.
struct QuitOnFirst {
    graceful: bool,
}

impl State for QuitOnFirst {
    fn process_message(&mut self, msg: &Message, ctx: &mut Context) -> Response {
        if msg.what == CMD_1 {
            if self.graceful {
                ctx.quit();
            } else {
                ctx.quit_now();
            }
        }
        Response::Handled
    }

    fn name(&self) -> Option<&str> {
        Some("QuitOnFirst")
    }
}

#[tokio::test]
async fn quit_drains_messages_already_queued() {
    let hooks = SnapshotOnQuit::default();
    let mut sm = StateMachine::new("smQuitTest");
    sm.set_dbg(true);
    sm.set_hooks(hooks.clone());
    let s1 = sm.add_state(QuitOnFirst { graceful: true }, None).unwrap();
    sm.set_initial_state(s1).unwrap();

    let (handle, task) = sm.start().unwrap();
    // Quit on the first message; all six were queued before the marker and
    // must still be dispatched.
    for what in 1..=6 {
        handle.send(what);
    }
    task.await.unwrap();

    let recs = hooks.recs.lock().unwrap().clone();
    assert_eq!(recs.len(), 8);
    for (i, rec) in recs.iter().take(6).enumerate() {
        assert_eq!(rec.what(), Some(i as i32 + 1));
        assert_eq!(rec.state(), Some(s1));
        assert_eq!(rec.original_state(), Some(s1));
    }
    assert_eq!(recs[6].tag(), LogTag::Exit);
    assert_eq!(recs[6].state(), Some(s1));
    assert_eq!(recs[7].tag(), LogTag::Quitting);

    // The ring outlives the worker through the handle.
    assert_eq!(handle.log_rec_count(), 8);
}

#[tokio::test]
async fn quit_now_drops_the_tail() {
    let hooks = SnapshotOnQuit::default();
    let mut sm = StateMachine::new("smQuitNowTest");
    sm.set_dbg(true);
    sm.set_hooks(hooks.clone());
    let s1 = sm.add_state(QuitOnFirst { graceful: false }, None).unwrap();
    sm.set_initial_state(s1).unwrap();

    let (handle, task) = sm.start().unwrap();
    // Only the first of the six is processed.
    for what in 1..=6 {
        handle.send(what);
    }
    task.await.unwrap();

    let recs = hooks.recs.lock().unwrap().clone();
    assert_eq!(recs.len(), 3);
    assert_eq!(recs[0].what(), Some(CMD_1));
    assert_eq!(recs[0].state(), Some(s1));
    assert_eq!(recs[1].tag(), LogTag::Exit);
    assert_eq!(recs[1].state(), Some(s1));
    assert_eq!(recs[2].tag(), LogTag::Quitting);
}

/// Counts enter/exit pairs.
#[derive(Clone, Default)]
struct Counting {
    enters: Arc<Mutex<u32>>,
    exits: Arc<Mutex<u32>>,
}

impl State for Counting {
    fn enter(&mut self, _ctx: &mut Context) {
        *self.enters.lock().unwrap() += 1;
    }

    fn exit(&mut self, _ctx: &mut Context) {
        *self.exits.lock().unwrap() += 1;
    }

    fn process_message(&mut self, _msg: &Message, _ctx: &mut Context) -> Response {
        Response::Handled
    }

    fn name(&self) -> Option<&str> {
        Some("Counting")
    }
}

#[tokio::test]
async fn quit_now_right_after_start_still_pairs_enter_with_exit() {
    let state = Counting::default();
    let mut sm = StateMachine::new("quitNowAfterStart");
    let s1 = sm.add_state(state.clone(), None).unwrap();
    sm.set_initial_state(s1).unwrap();

    let (handle, task) = sm.start().unwrap();
    handle.quit_now();
    task.await.unwrap();

    assert_eq!(*state.enters.lock().unwrap(), 1);
    assert_eq!(*state.exits.lock().unwrap(), 1);
    assert_eq!(handle.current_state(), None);
}

/// Sends CMD_1 to itself on entry and timestamps arrivals.
struct StampArrivals {
    t1: Arc<Mutex<Option<Instant>>>,
    t2: Arc<Mutex<Option<Instant>>>,
}

impl State for StampArrivals {
    fn enter(&mut self, ctx: &mut Context) {
        ctx.send(CMD_1);
    }

    fn process_message(&mut self, msg: &Message, ctx: &mut Context) -> Response {
        match msg.what {
            CMD_1 => *self.t1.lock().unwrap() = Some(Instant::now()),
            CMD_2 => {
                *self.t2.lock().unwrap() = Some(Instant::now());
                ctx.transition_to_halting_state();
            }
            _ => {}
        }
        Response::Handled
    }

    fn name(&self) -> Option<&str> {
        Some("StampArrivals")
    }
}

#[tokio::test]
async fn delayed_send_arrives_no_earlier_than_its_delay() {
    const DELAY: Duration = Duration::from_millis(250);

    let t1 = Arc::new(Mutex::new(None));
    let t2 = Arc::new(Mutex::new(None));
    let mut sm = StateMachine::new("delayed");
    let s1 = sm
        .add_state(
            StampArrivals {
                t1: Arc::clone(&t1),
                t2: Arc::clone(&t2),
            },
            None,
        )
        .unwrap();
    sm.set_initial_state(s1).unwrap();

    let (handle, task) = sm.start().unwrap();
    handle.send_delayed(CMD_2, DELAY);
    task.await.unwrap();

    // CMD_1 was sent from the initial enter and processed right away, so
    // the arrival spread reflects the delay.
    let t1 = t1.lock().unwrap().expect("CMD_1 arrived");
    let t2 = t2.lock().unwrap().expect("CMD_2 arrived");
    assert!(t2 - t1 >= DELAY - FUDGE, "spread was {:?}", t2 - t1);
}

/// Sends an immediate CMD_2 from `exit`.
struct SendOnExit {
    next: Arc<Mutex<Option<tokio_hsm::StateId>>>,
}

impl State for SendOnExit {
    fn exit(&mut self, ctx: &mut Context) {
        ctx.send(CMD_2);
    }

    fn process_message(&mut self, _msg: &Message, ctx: &mut Context) -> Response {
        let next = self.next.lock().unwrap().unwrap();
        ctx.transition_to(next);
        Response::Handled
    }

    fn name(&self) -> Option<&str> {
        Some("SendOnExit")
    }
}

/// Arms a delayed watchdog CMD_3 from `enter`; halts after seeing both.
struct Watchdog {
    delay: Duration,
    t2: Arc<Mutex<Option<Instant>>>,
    t3: Arc<Mutex<Option<Instant>>>,
}

impl State for Watchdog {
    fn enter(&mut self, ctx: &mut Context) {
        ctx.send_delayed(CMD_3, self.delay);
    }

    fn process_message(&mut self, msg: &Message, ctx: &mut Context) -> Response {
        match msg.what {
            CMD_2 => *self.t2.lock().unwrap() = Some(Instant::now()),
            CMD_3 => *self.t3.lock().unwrap() = Some(Instant::now()),
            _ => {}
        }
        if self.t2.lock().unwrap().is_some() && self.t3.lock().unwrap().is_some() {
            ctx.transition_to_halting_state();
        }
        Response::Handled
    }

    fn name(&self) -> Option<&str> {
        Some("Watchdog")
    }
}

#[tokio::test]
async fn enter_runs_early_enough_to_arm_a_watchdog() {
    const DELAY: Duration = Duration::from_millis(250);

    let next = Arc::new(Mutex::new(None));
    let t2 = Arc::new(Mutex::new(None));
    let t3 = Arc::new(Mutex::new(None));
    let mut sm = StateMachine::new("watchdog");
    let s1 = sm
        .add_state(
            SendOnExit {
                next: Arc::clone(&next),
            },
            None,
        )
        .unwrap();
    let s2 = sm
        .add_state(
            Watchdog {
                delay: DELAY,
                t2: Arc::clone(&t2),
                t3: Arc::clone(&t3),
            },
            None,
        )
        .unwrap();
    *next.lock().unwrap() = Some(s2);
    sm.set_initial_state(s1).unwrap();

    let (handle, task) = sm.start().unwrap();
    handle.send(CMD_1);
    task.await.unwrap();

    // The watchdog armed in s2's enter fires its full delay after the
    // immediate message sent by s1's exit.
    let t2 = t2.lock().unwrap().expect("CMD_2 arrived");
    let t3 = t3.lock().unwrap().expect("CMD_3 arrived");
    assert!(t3 - t2 >= DELAY - FUDGE, "spread was {:?}", t3 - t2);
}

/// Halts on CMD_4, consumes everything else.
struct HaltOnFour;

impl State for HaltOnFour {
    fn process_message(&mut self, msg: &Message, ctx: &mut Context) -> Response {
        if msg.what == CMD_4 {
            ctx.transition_to_halting_state();
        }
        Response::Handled
    }

    fn name(&self) -> Option<&str> {
        Some("HaltOnFour")
    }
}

#[test]
fn machines_share_one_worker_thread() {
    // Ten machines on a single current-thread runtime interleave
    // dispatch-by-dispatch; each still observes its own messages in order.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();

    let mut machines = Vec::new();
    for i in 0..10 {
        let mut sm = StateMachine::new(format!("shared-{i}"));
        let s1 = sm.add_state(HaltOnFour, None).unwrap();
        sm.set_initial_state(s1).unwrap();
        let (handle, task) = sm.start_on(rt.handle()).unwrap();
        machines.push((handle, task, s1));
    }

    for (handle, _, _) in &machines {
        for what in [CMD_1, CMD_2, CMD_3, CMD_4] {
            handle.send(what);
        }
    }

    rt.block_on(async {
        for (handle, task, s1) in machines {
            task.await.unwrap();
            assert_eq!(handle.log_rec_count(), 4);
            for i in 0..handle.log_rec_size() {
                let rec = handle.log_rec(i).unwrap();
                assert_eq!(rec.what(), Some(i as i32 + 1));
                assert_eq!(rec.state(), Some(s1));
                assert_eq!(rec.original_state(), Some(s1));
            }
        }
    });
}
