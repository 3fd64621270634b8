//! FSM states and the transitions between them.

use std::fmt;

/// Steady states a satellite can be observed in between commands, plus the
/// transitional states entered while a lifecycle hook is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    New,
    Initializing,
    Init,
    Launching,
    Orbit,
    Landing,
    Reconfiguring,
    Starting,
    Run,
    Stopping,
    Interrupting,
    Safe,
    Error,
}

impl State {
    /// Steady states are the ones a satellite can sit in indefinitely;
    /// transitional states always have a worker in flight.
    pub fn is_steady(self) -> bool {
        matches!(
            self,
            State::New | State::Init | State::Orbit | State::Run | State::Safe | State::Error
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            State::New => "NEW",
            State::Initializing => "initializing",
            State::Init => "INIT",
            State::Launching => "launching",
            State::Orbit => "ORBIT",
            State::Landing => "landing",
            State::Reconfiguring => "reconfiguring",
            State::Starting => "starting",
            State::Run => "RUN",
            State::Stopping => "stopping",
            State::Interrupting => "interrupting",
            State::Safe => "SAFE",
            State::Error => "ERROR",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The command and completion events that drive the FSM.
/// Completion events (`Initialized`, `Launched`, ...) are fired internally
/// by a transitional worker once its hook returns; the rest are issued by
/// CSCP or by `interrupt()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Initialize,
    Initialized,
    Launch,
    Launched,
    Land,
    Landed,
    Reconfigure,
    Reconfigured,
    Start,
    Started,
    Stop,
    Stopped,
    Interrupt,
    Interrupted,
    Failure,
}

impl Transition {
    pub fn name(self) -> &'static str {
        match self {
            Transition::Initialize => "initialize",
            Transition::Initialized => "initialized",
            Transition::Launch => "launch",
            Transition::Launched => "launched",
            Transition::Land => "land",
            Transition::Landed => "landed",
            Transition::Reconfigure => "reconfigure",
            Transition::Reconfigured => "reconfigured",
            Transition::Start => "start",
            Transition::Started => "started",
            Transition::Stop => "stop",
            Transition::Stopped => "stopped",
            Transition::Interrupt => "interrupt",
            Transition::Interrupted => "interrupted",
            Transition::Failure => "failure",
        }
    }
}

/// Looks up the transition table, returning the destination state or
/// `None` if `transition` has no arc from `from`.
pub fn next_state(from: State, transition: Transition) -> Option<State> {
    use State::*;
    use Transition::*;
    match (from, transition) {
        (New, Initialize) => Some(Initializing),
        (Initializing, Initialized) => Some(Init),
        (Init, Initialize) => Some(Initializing),
        (Init, Launch) => Some(Launching),
        (Launching, Launched) => Some(Orbit),
        (Orbit, Land) => Some(Landing),
        (Landing, Landed) => Some(Init),
        (Orbit, Reconfigure) => Some(Reconfiguring),
        (Reconfiguring, Reconfigured) => Some(Orbit),
        (Orbit, Start) => Some(Starting),
        (Starting, Started) => Some(Run),
        (Run, Stop) => Some(Stopping),
        (Stopping, Stopped) => Some(Orbit),
        (Orbit, Interrupt) | (Run, Interrupt) => Some(Interrupting),
        (Interrupting, Interrupted) => Some(Safe),
        (Safe, Initialize) => Some(Initializing),
        (Error, Initialize) => Some(Initializing),
        // A hook failing while its transitional worker is running, or a
        // satellite-raised failure while steady, both land in ERROR.
        (state, Failure) if state != Error => Some(Error),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_sequence_ends_in_init() {
        let mut state = State::New;
        for t in [
            Transition::Initialize,
            Transition::Initialized,
            Transition::Launch,
            Transition::Launched,
            Transition::Start,
            Transition::Started,
            Transition::Stop,
            Transition::Stopped,
            Transition::Land,
            Transition::Landed,
        ] {
            state = next_state(state, t).unwrap_or_else(|| panic!("no transition {:?} from {:?}", t, state));
        }
        assert_eq!(state, State::Init);
    }

    #[test]
    fn error_only_accepts_initialize() {
        assert_eq!(next_state(State::Error, Transition::Initialize), Some(State::Initializing));
        assert_eq!(next_state(State::Error, Transition::Launch), None);
    }

    #[test]
    fn every_steady_state_but_error_has_a_failure_arc() {
        for s in [State::New, State::Init, State::Orbit, State::Run, State::Safe] {
            assert_eq!(next_state(s, Transition::Failure), Some(State::Error));
        }
        assert_eq!(next_state(State::Error, Transition::Failure), None);
    }
}
