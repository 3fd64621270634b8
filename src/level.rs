//! The severity scale shared by CMDP log topics and the [`crate::sink`]
//! `log::Log` implementation.
//!
//! Ordinals ascend with verbosity exactly as the upstream `Level` enum's
//! `to_underlying` comparisons require (`cxx/tools/console_logger.cpp`):
//! `TRACE` is the most verbose (ordinal 0) and `OFF` the least (ordinal 6,
//! a pure sentinel no record is ever tagged with). "Lower" therefore means
//! "more verbose" throughout this module, not "less severe".
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warning,
    Status,
    Critical,
    /// Sentinel meaning "nothing subscribed"; never carried by a record.
    Off,
}

/// Every level a record can actually be published at, ordered TRACE..CRITICAL.
pub const RECORD_LEVELS: [Level; 6] = [
    Level::Trace,
    Level::Debug,
    Level::Info,
    Level::Warning,
    Level::Status,
    Level::Critical,
];

impl Level {
    pub fn name(self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Status => "STATUS",
            Level::Critical => "CRITICAL",
            Level::Off => "OFF",
        }
    }

    /// The level this process's own records are tagged with when produced
    /// through the standard `log` facade. `Status` has no `log::Level`
    /// counterpart (see `DESIGN.md`) and is only reachable by calling
    /// [`crate::sink::CmdpSink::publish_status`] directly.
    pub fn from_log_level(level: log::Level) -> Level {
        match level {
            log::Level::Error => Level::Critical,
            log::Level::Warn => Level::Warning,
            log::Level::Info => Level::Info,
            log::Level::Debug => Level::Debug,
            log::Level::Trace => Level::Trace,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLevel(pub String);

impl fmt::Display for UnknownLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown log level '{}'", self.0)
    }
}

impl std::error::Error for UnknownLevel {}

impl FromStr for Level {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TRACE" => Ok(Level::Trace),
            "DEBUG" => Ok(Level::Debug),
            "INFO" => Ok(Level::Info),
            "WARNING" => Ok(Level::Warning),
            "STATUS" => Ok(Level::Status),
            "CRITICAL" => Ok(Level::Critical),
            "OFF" => Ok(Level::Off),
            _ => Err(UnknownLevel(s.to_string())),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_is_most_verbose_and_off_is_least() {
        assert!(Level::Trace < Level::Critical);
        assert!(Level::Critical < Level::Off);
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("info".parse::<Level>(), Ok(Level::Info));
        assert_eq!("WARNING".parse::<Level>(), Ok(Level::Warning));
        assert!("bogus".parse::<Level>().is_err());
    }

    #[test]
    fn min_of_two_thresholds_is_the_more_permissive() {
        assert_eq!(Level::Info.min(Level::Off), Level::Info);
        assert_eq!(Level::Critical.min(Level::Status), Level::Status);
    }
}
