//! Process-wide messaging context.
//!
//! Corresponds to a single ZeroMQ context with `linger=0` in the original:
//! one shared handle, lazily initialised, that every message socket in the
//! process is conceptually opened against. Our sockets are plain TCP
//! streams with no separate context object to allocate, so this is mostly
//! a home for process-wide transport settings (outbound multicast
//! interface, shutdown linger) rather than a live resource.

use std::net::Ipv4Addr;
use std::sync::OnceLock;

/// Shared, read-only-after-init transport configuration.
#[derive(Debug, Clone)]
pub struct MessagingContext {
    /// Interface CHIRP multicast datagrams are sent from; `None` lets the
    /// OS pick the default route.
    pub outbound_interface: Option<Ipv4Addr>,
    /// Upper bound, in milliseconds, workers wait for in-flight sends to
    /// drain when a socket is torn down (the `linger=0` analogue: 0 means
    /// drop in-flight data immediately).
    pub linger_ms: u64,
}

impl Default for MessagingContext {
    fn default() -> Self {
        MessagingContext {
            outbound_interface: None,
            linger_ms: 0,
        }
    }
}

static CONTEXT: OnceLock<MessagingContext> = OnceLock::new();

impl MessagingContext {
    /// Returns the process-wide context, initialising it with defaults on
    /// first access.
    pub fn global() -> &'static MessagingContext {
        CONTEXT.get_or_init(MessagingContext::default)
    }

    /// Installs a custom context before first use. Returns `Err` with the
    /// rejected context if the global context was already initialised.
    pub fn install(ctx: MessagingContext) -> Result<(), MessagingContext> {
        CONTEXT.set(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_zero_linger() {
        let ctx = MessagingContext::default();
        assert_eq!(ctx.linger_ms, 0);
        assert!(ctx.outbound_interface.is_none());
    }
}
