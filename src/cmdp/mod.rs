//! The monitoring distribution protocol: log records and metrics published
//! from every satellite, aggregated by subscription level.

pub mod message;
pub mod publisher;
pub mod subscriber;
pub mod subscription;

pub use message::{log_topic, stat_topic, CmdpMessage, PROTOCOL_ID};
pub use publisher::Publisher;
pub use subscriber::Subscriber;
pub use subscription::SubscriptionTable;
