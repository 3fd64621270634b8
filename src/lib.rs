//! Constellation: a small distributed framework for coordinating and
//! monitoring data-acquisition satellites over a local network.
//!
//! A satellite is a process that implements [`fsm::SatelliteHooks`] and
//! hands them to [`satellite::Satellite::launch`]. From there it is
//! discoverable via [`chirp`], commandable via [`cscp`], supervised via
//! [`chp`], optionally pushes data via [`cdtp`], and reports logs and
//! metrics via [`cmdp`]. [`value`], [`dictionary`], and [`codec`] are the
//! shared wire-value model every protocol's payload is built from.

pub mod cdtp;
pub mod chirp;
pub mod chp;
pub mod cmdp;
pub mod codec;
pub mod config;
pub mod cscp;
pub mod dictionary;
pub mod fsm;
pub mod header;
pub mod level;
pub mod net;
pub mod satellite;
pub mod subscriber_pool;
pub mod user_command;
pub mod value;

#[cfg(feature = "logging")]
pub mod sink;

pub use config::{ConfigError, Configuration};
pub use dictionary::Dictionary;
pub use level::Level;
pub use satellite::Satellite;
pub use value::Value;
