//! The FSM runtime: one worker thread per transitional state, driven by
//! commands and completing by firing the matching completion transition
//!.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::config::Configuration;

use super::hooks::{HookResult, SatelliteHooks, StopToken};
use super::state::{next_state, State, Transition};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsmError {
    /// `command` has no arc out of `from` in the transition table.
    InvalidTransition { from: State, command: &'static str },
    /// A command transition was requested while a transitional worker
    /// from a previous command is still in flight.
    TransitionInProgress,
}

impl fmt::Display for FsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsmError::InvalidTransition { from, command } => {
                write!(f, "'{command}' is not valid in state {from}")
            }
            FsmError::TransitionInProgress => write!(f, "a transition is already in progress"),
        }
    }
}

impl std::error::Error for FsmError {}

struct Record {
    state: State,
    status: String,
}

/// The run-hook thread plus the token used to ask it to stop.
struct RunHandle {
    stop: StopToken,
    join: JoinHandle<HookResult>,
}

pub struct Fsm {
    hooks: Arc<dyn SatelliteHooks>,
    record: Mutex<Record>,
    /// Signaled whenever `record.state` changes to a steady state, so
    /// `interrupt()` can block the calling thread until one is reached.
    steady: Condvar,
    callbacks: Mutex<Vec<Box<dyn Fn(State) + Send + Sync>>>,
    run: Mutex<Option<RunHandle>>,
    /// Worker for the currently in-flight command transition, if any.
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Fsm {
    pub fn new(hooks: Arc<dyn SatelliteHooks>) -> Arc<Self> {
        Arc::new(Fsm {
            hooks,
            record: Mutex::new(Record { state: State::New, status: String::new() }),
            steady: Condvar::new(),
            callbacks: Mutex::new(Vec::new()),
            run: Mutex::new(None),
            worker: Mutex::new(None),
        })
    }

    pub fn state(&self) -> State {
        self.record.lock().unwrap().state
    }

    pub fn status(&self) -> String {
        self.record.lock().unwrap().status.clone()
    }

    pub fn register_callback(&self, cb: impl Fn(State) + Send + Sync + 'static) {
        self.callbacks.lock().unwrap().push(Box::new(cb));
    }

    pub fn reconfigure_supported(&self) -> bool {
        self.hooks.reconfigure_supported()
    }

    pub fn initialize(self: &Arc<Self>, config: Configuration) -> Result<(), FsmError> {
        self.begin(Transition::Initialize, "initialize")?;
        let fsm = Arc::clone(self);
        self.spawn_worker(move || {
            let result = fsm.hooks.initializing(&config);
            fsm.finish(result, Transition::Initialized, State::New);
        });
        Ok(())
    }

    pub fn launch(self: &Arc<Self>) -> Result<(), FsmError> {
        self.begin(Transition::Launch, "launch")?;
        let fsm = Arc::clone(self);
        self.spawn_worker(move || {
            let result = fsm.hooks.launching();
            fsm.finish(result, Transition::Launched, State::Init);
        });
        Ok(())
    }

    pub fn land(self: &Arc<Self>) -> Result<(), FsmError> {
        self.begin(Transition::Land, "land")?;
        let fsm = Arc::clone(self);
        self.spawn_worker(move || {
            let result = fsm.hooks.landing();
            fsm.finish(result, Transition::Landed, State::Orbit);
        });
        Ok(())
    }

    pub fn reconfigure(self: &Arc<Self>, config: Configuration) -> Result<(), FsmError> {
        self.begin(Transition::Reconfigure, "reconfigure")?;
        let fsm = Arc::clone(self);
        self.spawn_worker(move || {
            let result = fsm.hooks.reconfiguring(&config);
            fsm.finish(result, Transition::Reconfigured, State::Orbit);
        });
        Ok(())
    }

    /// Begins `STARTING`; once `hooks.starting` succeeds, fires `Started`
    /// immediately and launches `hooks.running` on its own long-lived
    /// thread rather than waiting for it to return.
    pub fn start(self: &Arc<Self>, run_identifier: impl Into<String>) -> Result<(), FsmError> {
        self.begin(Transition::Start, "start")?;
        let fsm = Arc::clone(self);
        let run_identifier = run_identifier.into();
        self.spawn_worker(move || {
            let result = fsm.hooks.starting(&run_identifier);
            if let Err(message) = result {
                fsm.fail(message, State::Orbit);
                return;
            }
            fsm.apply(Transition::Started);
            let stop = StopToken::new();
            let run_fsm = Arc::clone(&fsm);
            let run_stop = stop.clone();
            let join = thread::spawn(move || run_fsm.hooks.running(&run_stop));
            *fsm.run.lock().unwrap() = Some(RunHandle { stop, join });
        });
        Ok(())
    }

    /// Signals the run-hook to stop, joins it, runs `hooks.stopping`, and
    /// lands back in `ORBIT`. Errors from either are reported through the
    /// usual `Failure` path.
    pub fn stop(self: &Arc<Self>) -> Result<(), FsmError> {
        self.begin(Transition::Stop, "stop")?;
        let fsm = Arc::clone(self);
        self.spawn_worker(move || {
            let run_result = fsm.join_run();
            if let Err(message) = run_result {
                fsm.fail(message, State::Run);
                return;
            }
            let result = fsm.hooks.stopping();
            fsm.finish(result, Transition::Stopped, State::Run);
        });
        Ok(())
    }

    /// Blocks the calling thread (not the FSM worker pool) until the FSM
    /// reaches a steady state, then, if that state is `ORBIT` or `RUN`,
    /// drives it through `INTERRUPTING` into `SAFE`. A no-op from any
    /// other steady state, matching the "no-op from INIT" testable
    /// property.
    pub fn interrupt(self: &Arc<Self>) -> Result<(), FsmError> {
        let previous = {
            let mut record = self.record.lock().unwrap();
            while !record.state.is_steady() {
                record = self.steady.wait(record).unwrap();
            }
            record.state
        };
        if previous != State::Orbit && previous != State::Run {
            return Ok(());
        }
        if previous == State::Run {
            // join_run tolerates there being no run handle; harmless if the
            // satellite already stopped between the wait above and here.
            let _ = self.join_run_for_interrupt();
        }
        self.begin(Transition::Interrupt, "interrupt")?;
        let fsm = Arc::clone(self);
        self.spawn_worker(move || {
            let result = fsm.hooks.interrupting(previous);
            fsm.finish(result, Transition::Interrupted, previous);
        });
        Ok(())
    }

    fn join_run(&self) -> HookResult {
        let handle = self.run.lock().unwrap().take();
        match handle {
            Some(h) => {
                h.stop.stop();
                h.join.join().unwrap_or_else(|_| Err("running hook panicked".into()))
            }
            None => Ok(()),
        }
    }

    fn join_run_for_interrupt(&self) -> HookResult {
        self.join_run()
    }

    /// Moves into the transitional state for `transition`, firing
    /// callbacks. Returns the error without moving state if there is no
    /// arc for `transition` from the current state, or if another
    /// transition is already in flight.
    fn begin(&self, transition: Transition, command: &'static str) -> Result<(), FsmError> {
        let mut worker = self.worker.lock().unwrap();
        if worker.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return Err(FsmError::TransitionInProgress);
        }
        let new_state = {
            let mut record = self.record.lock().unwrap();
            let dest = next_state(record.state, transition).ok_or(FsmError::InvalidTransition {
                from: record.state,
                command,
            })?;
            record.state = dest;
            record.status.clear();
            dest
        };
        *worker = None;
        drop(worker);
        self.fire_callbacks(new_state);
        Ok(())
    }

    /// Applies a completion transition from within a worker thread. Panics
    /// if there is no arc, which would indicate an internal FSM bug rather
    /// than a bad command.
    fn apply(&self, transition: Transition) -> State {
        let new_state = {
            let mut record = self.record.lock().unwrap();
            let dest = next_state(record.state, transition)
                .unwrap_or_else(|| panic!("no arc for {:?} from {:?}", transition, record.state));
            record.state = dest;
            record.status.clear();
            dest
        };
        if new_state.is_steady() {
            self.steady.notify_all();
        }
        self.fire_callbacks(new_state);
        new_state
    }

    /// Applies `result`'s outcome: completion transition on success, or
    /// `ERROR` with the message as status and `hooks.failure` invoked on
    /// failure.
    fn finish(&self, result: HookResult, on_success: Transition, previous_steady: State) {
        match result {
            Ok(()) => {
                self.apply(on_success);
            }
            Err(message) => self.fail(message, previous_steady),
        }
    }

    fn fail(&self, message: String, previous_steady: State) {
        {
            let mut record = self.record.lock().unwrap();
            let dest = next_state(record.state, Transition::Failure)
                .unwrap_or_else(|| panic!("no failure arc from {:?}", record.state));
            record.state = dest;
            record.status = message;
        }
        self.steady.notify_all();
        self.hooks.failure(previous_steady);
        self.fire_callbacks(State::Error);
    }

    fn spawn_worker(&self, f: impl FnOnce() + Send + 'static) {
        let handle = thread::spawn(f);
        *self.worker.lock().unwrap() = Some(handle);
    }

    fn fire_callbacks(&self, state: State) {
        for cb in self.callbacks.lock().unwrap().iter() {
            cb(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::Dictionary;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    struct Happy;
    impl SatelliteHooks for Happy {
        fn initializing(&self, _config: &Configuration) -> HookResult {
            Ok(())
        }
    }

    fn wait_for(fsm: &Arc<Fsm>, target: State) {
        for _ in 0..200 {
            if fsm.state() == target {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("timed out waiting for {:?}, stuck at {:?}", target, fsm.state());
    }

    #[test]
    fn happy_path_new_to_init() {
        let fsm = Fsm::new(Arc::new(Happy));
        fsm.initialize(Configuration::new(Dictionary::new())).unwrap();
        wait_for(&fsm, State::Init);
    }

    #[test]
    fn command_invalid_in_current_state_is_rejected() {
        let fsm = Fsm::new(Arc::new(Happy));
        fsm.initialize(Configuration::new(Dictionary::new())).unwrap();
        wait_for(&fsm, State::Init);
        fsm.launch().unwrap();
        wait_for(&fsm, State::Orbit);
        fsm.start("run-001").unwrap();
        wait_for(&fsm, State::Run);
        assert_eq!(
            fsm.initialize(Configuration::new(Dictionary::new())),
            Err(FsmError::InvalidTransition { from: State::Run, command: "initialize" })
        );
    }

    struct FailingRun;
    impl SatelliteHooks for FailingRun {
        fn initializing(&self, _config: &Configuration) -> HookResult {
            Ok(())
        }
        fn running(&self, _stop: &StopToken) -> HookResult {
            Err("detector went offline".into())
        }
    }

    #[test]
    fn failing_running_hook_lands_in_error_with_status() {
        let fsm = Fsm::new(Arc::new(FailingRun));
        fsm.initialize(Configuration::new(Dictionary::new())).unwrap();
        wait_for(&fsm, State::Init);
        fsm.launch().unwrap();
        wait_for(&fsm, State::Orbit);
        fsm.start("run-002").unwrap();
        wait_for(&fsm, State::Run);

        // The running hook fails asynchronously; it isn't joined until a
        // stop is requested, so poll for ERROR directly.
        for _ in 0..200 {
            if fsm.state() == State::Error {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(fsm.status(), "detector went offline");
        assert_eq!(fsm.initialize(Configuration::new(Dictionary::new())), Ok(()));
        wait_for(&fsm, State::Initializing);
    }

    struct SlowRun(Arc<AtomicBool>);
    impl SatelliteHooks for SlowRun {
        fn initializing(&self, _config: &Configuration) -> HookResult {
            Ok(())
        }
        fn running(&self, stop: &StopToken) -> HookResult {
            while !stop.is_stopped() {
                thread::sleep(Duration::from_millis(5));
            }
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn interrupt_from_run_reaches_safe() {
        let stopped_cleanly = Arc::new(AtomicBool::new(false));
        let fsm = Fsm::new(Arc::new(SlowRun(Arc::clone(&stopped_cleanly))));
        fsm.initialize(Configuration::new(Dictionary::new())).unwrap();
        wait_for(&fsm, State::Init);
        fsm.launch().unwrap();
        wait_for(&fsm, State::Orbit);
        fsm.start("run-003").unwrap();
        wait_for(&fsm, State::Run);

        let (tx, rx) = mpsc::channel();
        let fsm_for_thread = Arc::clone(&fsm);
        thread::spawn(move || {
            fsm_for_thread.interrupt().unwrap();
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(2)).expect("interrupt should complete");
        wait_for(&fsm, State::Safe);
        assert!(stopped_cleanly.load(Ordering::SeqCst));
    }

    #[test]
    fn interrupt_from_init_is_a_noop() {
        let fsm = Fsm::new(Arc::new(Happy));
        fsm.initialize(Configuration::new(Dictionary::new())).unwrap();
        wait_for(&fsm, State::Init);
        fsm.interrupt().unwrap();
        assert_eq!(fsm.state(), State::Init);
    }
}
