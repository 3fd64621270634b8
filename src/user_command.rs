//! User-registered commands: satellite-defined callables CSCP falls back to
//! once a verb matches neither a transition nor a standard command.
//!
//! Grounded in the upstream command registry: a command carries a fixed
//! argument count and an optional set of states it may be called from: a
//! call from any other state is rejected before the function ever runs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::dictionary::List;
use crate::fsm::State;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum UserCommandError {
    UnknownUserCommand,
    /// The command exists but may not be called from the satellite's
    /// current state.
    InvalidUserCommand { state: State },
    /// Wrong number of arguments in the request payload.
    MissingUserCommandArguments { expected: usize, got: usize },
    /// The command function itself failed.
    UserCommandFailed(String),
}

impl fmt::Display for UserCommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserCommandError::UnknownUserCommand => write!(f, "unknown user command"),
            UserCommandError::InvalidUserCommand { state } => {
                write!(f, "this command cannot be called in state {state}")
            }
            UserCommandError::MissingUserCommandArguments { expected, got } => {
                write!(f, "command requires {expected} argument(s), got {got}")
            }
            UserCommandError::UserCommandFailed(reason) => write!(f, "{reason}"),
        }
    }
}

impl std::error::Error for UserCommandError {}

pub type UserCommandResult = Result<Value, UserCommandError>;
type UserCommandFn = dyn Fn(&List) -> UserCommandResult + Send + Sync;

/// One entry in the registry: the callable plus the metadata CSCP's
/// `get_commands` and the dispatcher's state check need.
pub struct UserCommand {
    description: String,
    nargs: usize,
    /// `None` means callable from any state.
    valid_states: Option<Vec<State>>,
    func: Arc<UserCommandFn>,
}

impl UserCommand {
    pub fn new(
        description: impl Into<String>,
        nargs: usize,
        valid_states: Option<Vec<State>>,
        func: impl Fn(&List) -> UserCommandResult + Send + Sync + 'static,
    ) -> Self {
        UserCommand {
            description: description.into(),
            nargs,
            valid_states,
            func: Arc::new(func),
        }
    }

    /// The description text `get_commands` reports, augmented with the
    /// argument count and allowed-state wording the registry's own
    /// `describe_commands` uses for the full text.
    fn full_description(&self) -> String {
        let mut text = self.description.clone();
        text.push_str(&format!("\nThis command requires {} argument(s).", self.nargs));
        match &self.valid_states {
            Some(states) => {
                let names: Vec<&str> = states.iter().map(|s| s.name()).collect();
                text.push_str(&format!(
                    "\nThis command can only be called in the following states: {}.",
                    names.join(", ")
                ));
            }
            None => text.push_str("\nThis command can be called in any state."),
        }
        text
    }

    fn allowed_in(&self, state: State) -> bool {
        match &self.valid_states {
            Some(states) => states.contains(&state),
            None => true,
        }
    }
}

/// The set of commands a satellite exposes beyond the fixed CSCP verbs.
#[derive(Default)]
pub struct UserCommandRegistry {
    commands: HashMap<String, UserCommand>,
}

impl UserCommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, command: UserCommand) {
        self.commands.insert(name.into(), command);
    }

    /// Looks `name` up, checks the calling state, checks arity, then calls
    /// the command function — exactly the order the dispatcher relies on so
    /// an unknown command falls through to CSCP's own `UNKNOWN` reply
    /// instead of being reported as a user-command failure.
    pub fn call(&self, state: State, name: &str, args: &List) -> UserCommandResult {
        let command = self.commands.get(name).ok_or(UserCommandError::UnknownUserCommand)?;
        if !command.allowed_in(state) {
            return Err(UserCommandError::InvalidUserCommand { state });
        }
        if args.len() != command.nargs {
            return Err(UserCommandError::MissingUserCommandArguments {
                expected: command.nargs,
                got: args.len(),
            });
        }
        (command.func)(args)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// `name -> one-line summary` for CSCP's `get_commands` reply, matching
    /// the upstream registry's short form rather than the full multi-line
    /// description `describe_commands` below produces.
    pub fn command_summaries(&self) -> Vec<(String, String)> {
        self.commands
            .iter()
            .map(|(name, cmd)| (name.clone(), cmd.description.clone()))
            .collect()
    }

    /// `name -> full description` (description, argument count, allowed
    /// states), the wording a `help`-style user command would present.
    pub fn describe_commands(&self) -> HashMap<String, String> {
        self.commands
            .iter()
            .map(|(name, cmd)| (name.clone(), cmd.full_description()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_command_is_reported() {
        let registry = UserCommandRegistry::new();
        assert_eq!(
            registry.call(State::Orbit, "bogus", &List::new()),
            Err(UserCommandError::UnknownUserCommand)
        );
    }

    #[test]
    fn wrong_state_is_rejected_before_arity() {
        let mut registry = UserCommandRegistry::new();
        registry.add(
            "reset_daq",
            UserCommand::new("Reset the DAQ", 0, Some(vec![State::Orbit]), |_args| Ok(Value::None)),
        );
        assert_eq!(
            registry.call(State::Run, "reset_daq", &List::new()),
            Err(UserCommandError::InvalidUserCommand { state: State::Run })
        );
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let mut registry = UserCommandRegistry::new();
        registry.add("set_gain", UserCommand::new("Set the gain", 1, None, |_args| Ok(Value::None)));
        assert_eq!(
            registry.call(State::Orbit, "set_gain", &List::new()),
            Err(UserCommandError::MissingUserCommandArguments { expected: 1, got: 0 })
        );
    }

    #[test]
    fn matching_call_invokes_function() {
        let mut registry = UserCommandRegistry::new();
        registry.add(
            "double",
            UserCommand::new("Doubles its argument", 1, None, |args| {
                let n = args.get(0).and_then(Value::as_i64).ok_or(UserCommandError::UserCommandFailed("not an int".into()))?;
                Ok(Value::Int(n * 2))
            }),
        );
        let mut args = List::new();
        args.push(21_i64);
        assert_eq!(registry.call(State::Orbit, "double", &args), Ok(Value::Int(42)));
    }

    #[test]
    fn description_mentions_arity_and_states() {
        let mut registry = UserCommandRegistry::new();
        registry.add(
            "reset_daq",
            UserCommand::new("Reset the DAQ", 0, Some(vec![State::Orbit]), |_args| Ok(Value::None)),
        );
        let described = registry.describe_commands();
        let text = described.get("reset_daq").unwrap();
        assert!(text.contains("requires 0 argument"));
        assert!(text.contains("ORBIT"));
    }
}
