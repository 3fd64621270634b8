//! CHP — the heartbeat protocol and the watchdog that interrupts the FSM
//! on peer silence or a reported failure state.

mod message;
mod sender;
mod watchdog;

pub use message::{HeartbeatMessage, HAS_STATUS, IS_AUTONOMOUS, IS_EXTRASYSTOLE, PROTOCOL_ID};
pub use sender::{Sender, DEFAULT_INTERVAL};
pub use watchdog::{InterruptCallback, Watchdog, DEFAULT_LIVES};
