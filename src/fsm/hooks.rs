//! The satellite-supplied lifecycle hooks the FSM worker threads call into
//!, plus the cooperative cancellation token passed to
//! `running`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Configuration;
use crate::dictionary::Dictionary;

use super::state::State;

/// What a hook returns: `Ok(())` on success, `Err(message)` to drive the
/// FSM into `ERROR` with `message` as the status.
pub type HookResult = Result<(), String>;

/// Set by `Fsm::stop()` or `Fsm::interrupt()` and polled by a running
/// `running()` hook; cooperative, not preemptive.
#[derive(Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        StopToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Implemented by the satellite application; each method corresponds to
/// one transitional state's worker. Defaults match the behavior a
/// satellite that doesn't support the corresponding command should have.
pub trait SatelliteHooks: Send + Sync {
    fn initializing(&self, config: &Configuration) -> HookResult;
    fn launching(&self) -> HookResult {
        Ok(())
    }
    fn landing(&self) -> HookResult {
        Ok(())
    }
    /// Applies a partial reconfiguration without a full land/init cycle.
    /// Unsupported by default: rejecting it here sends the satellite to
    /// `ERROR` rather than silently no-opping.
    fn reconfiguring(&self, _config: &Configuration) -> HookResult {
        Err("this satellite does not support reconfigure".into())
    }
    fn starting(&self, run_identifier: &str) -> HookResult {
        let _ = run_identifier;
        Ok(())
    }
    /// Runs for the duration of `RUN`; must poll `stop.is_stopped()` and
    /// return promptly once it's set.
    fn running(&self, stop: &StopToken) -> HookResult {
        while !stop.is_stopped() {
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        Ok(())
    }
    fn stopping(&self) -> HookResult {
        Ok(())
    }
    /// Called on the way into `interrupting`, from whichever steady state
    /// the FSM was in (`ORBIT` or `RUN`). Default is a no-op landing.
    fn interrupting(&self, previous: State) -> HookResult {
        let _ = previous;
        Ok(())
    }
    /// Called when any transitional hook returns `Err`, with the steady
    /// state the satellite was trying to leave. Not allowed to fail.
    fn failure(&self, previous: State) {
        let _ = previous;
    }
    fn reconfigure_supported(&self) -> bool {
        true
    }
}

/// Extra state a satellite may want to surface while in a transitional or
/// steady state, beyond the bare `State`.
pub fn empty_status() -> Dictionary {
    Dictionary::new()
}
