//! The CMDP-backed [`log::Log`] implementation: every record reaches
//! stderr and the monitoring distribution publisher through two
//! independent thresholds, combined exactly as the console/CMDP proxy
//! pair in `SinkManager::setCMDPLevel` combines theirs — the logger (and
//! here, the decision to even format a record) is gated on the minimum of
//! the two, while each destination additionally applies its own bound.

use std::sync::Arc;

use log::{Log, Metadata, Record};

use crate::cmdp::{log_topic, CmdpMessage, Publisher};
use crate::level::Level;

/// Installed once via [`CmdpSink::install`] as the global `log` backend.
pub struct CmdpSink {
    console_level: Level,
    publisher: Arc<Publisher>,
}

impl CmdpSink {
    pub fn new(console_level: Level, publisher: Arc<Publisher>) -> Self {
        CmdpSink { console_level, publisher }
    }

    /// Installs `self` as the process-wide logger. May only be called once
    /// per process; a second call returns `log`'s own `SetLoggerError`.
    pub fn install(console_level: Level, publisher: Arc<Publisher>) -> Result<(), log::SetLoggerError> {
        log::set_max_level(log::LevelFilter::Trace);
        log::set_boxed_logger(Box::new(Self::new(console_level, publisher)))
    }

    fn cmdp_level(&self, target: &str) -> Level {
        self.publisher.effective_level_for(target)
    }

    /// Publishes a `STATUS` record directly: `Status` sits between `Info`
    /// and `Critical` in severity but has no `log::Level` counterpart, so
    /// it is never reachable through the `log` facade's own macros.
    pub fn publish_status(&self, target: &str, message: impl Into<String>) {
        if Level::Status < self.cmdp_level(target) {
            return;
        }
        self.publisher.publish(CmdpMessage::new(log_topic(Level::Status, Some(target)), "", message.into()));
    }
}

impl Log for CmdpSink {
    fn enabled(&self, metadata: &Metadata) -> bool {
        let level = Level::from_log_level(metadata.level());
        level >= self.console_level || level >= self.cmdp_level(metadata.target())
    }

    fn log(&self, record: &Record) {
        let level = Level::from_log_level(record.level());
        let target = record.target();
        let cmdp_level = self.cmdp_level(target);
        if level < self.console_level && level < cmdp_level {
            return;
        }
        if level >= self.console_level {
            let prefix = if target.is_empty() { String::new() } else { format!("[{target}] ") };
            eprintln!("{:>8} {prefix}{}", level.name(), record.args());
        }
        if level >= cmdp_level {
            let topic = log_topic(level, (!target.is_empty()).then_some(target));
            self.publisher.publish(CmdpMessage::new(topic, "", record.args().to_string()));
        }
    }

    fn flush(&self) {}
}
