//! The CHIRP manager: the listener plus the set of services this process
//! has registered and broadcasts on behalf of.

use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use super::listener::Listener;
use super::message::{ChirpMessage, MessageType};
use super::service::ServiceIdentifier;
use super::socket::ChirpSocket;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChirpError {
    /// `registerService` rejects `ANY` as a service identifier.
    InvalidIdentifier,
    /// `registerService` called twice for the same identifier/port without
    /// an intervening `unregisterService`.
    DuplicateRegistration,
    /// `unregisterService` called for a service that was never registered.
    UnknownService,
    Io(String),
}

impl fmt::Display for ChirpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChirpError::InvalidIdentifier => write!(f, "ANY is not a valid identifier to register"),
            ChirpError::DuplicateRegistration => write!(f, "service already registered"),
            ChirpError::UnknownService => write!(f, "no such registered service"),
            ChirpError::Io(msg) => write!(f, "i/o error: {msg}"),
        }
    }
}

impl std::error::Error for ChirpError {}

pub type ChirpResult<T> = Result<T, ChirpError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct LocalService {
    service_id: ServiceIdentifier,
    port: u16,
}

/// Owns the shared multicast socket, the listener thread, and the set of
/// locally-registered services.
pub struct Manager {
    socket: Arc<ChirpSocket>,
    listener: Listener,
    group_name: String,
    host_name: String,
    registered: Mutex<HashSet<LocalService>>,
}

impl Manager {
    pub fn new(group_name: impl Into<String>, host_name: impl Into<String>, interface: Option<Ipv4Addr>) -> std::io::Result<Self> {
        let group_name = group_name.into();
        let host_name = host_name.into();
        let socket = Arc::new(ChirpSocket::bind(interface)?);
        // The listener filters out datagrams we sent ourselves so that our
        // own OFFER broadcasts don't round-trip into our discovered set.
        let listener = Listener::spawn(Arc::clone(&socket), group_name.clone(), Some(host_name.clone()));
        Ok(Manager {
            socket,
            listener,
            group_name,
            host_name,
            registered: Mutex::new(HashSet::new()),
        })
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    /// Broadcasts an OFFER and records the service as locally registered.
    /// Rejects `ANY` and duplicate registration of the same identifier/port.
    pub fn register_service(&self, service_id: ServiceIdentifier, port: u16) -> ChirpResult<()> {
        if service_id == ServiceIdentifier::Any {
            return Err(ChirpError::InvalidIdentifier);
        }
        let entry = LocalService { service_id, port };
        {
            let mut registered = self.registered.lock().unwrap();
            if !registered.insert(entry) {
                return Err(ChirpError::DuplicateRegistration);
            }
        }
        self.broadcast(MessageType::Offer, service_id, port)
    }

    /// Broadcasts a DEPART and forgets the service. Errors if it was not
    /// registered.
    pub fn unregister_service(&self, service_id: ServiceIdentifier, port: u16) -> ChirpResult<()> {
        let entry = LocalService { service_id, port };
        {
            let mut registered = self.registered.lock().unwrap();
            if !registered.remove(&entry) {
                return Err(ChirpError::UnknownService);
            }
        }
        self.broadcast(MessageType::Depart, service_id, port)
    }

    /// Broadcasts DEPART for every registered service and clears the set.
    pub fn unregister_services(&self) -> ChirpResult<()> {
        let entries: Vec<LocalService> = self.registered.lock().unwrap().drain().collect();
        for entry in entries {
            self.broadcast(MessageType::Depart, entry.service_id, entry.port)?;
        }
        Ok(())
    }

    /// The services this manager currently advertises.
    pub fn registered_services(&self) -> Vec<(ServiceIdentifier, u16)> {
        self.registered
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.service_id, e.port))
            .collect()
    }

    /// Broadcasts a REQUEST for `service_id` (or `ANY`).
    pub fn send_request(&self, service_id: ServiceIdentifier) -> ChirpResult<()> {
        self.broadcast(MessageType::Request, service_id, 0)
    }

    /// Drops all discovered services whose host is `host_name`; a later
    /// OFFER may re-introduce them.
    pub fn mark_dead(&self, host_name: &str) {
        self.listener.mark_dead(host_name);
    }

    fn broadcast(&self, msg_type: MessageType, service_id: ServiceIdentifier, port: u16) -> ChirpResult<()> {
        let msg = ChirpMessage {
            group_name: self.group_name.clone(),
            host_name: self.host_name.clone(),
            msg_type,
            service_id,
            port,
        };
        self.socket.send(&msg.encode()).map_err(|e| ChirpError::Io(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_any_is_rejected() {
        let mgr = Manager::new("t-any", "hostA", Some(Ipv4Addr::LOCALHOST)).unwrap();
        assert_eq!(mgr.register_service(ServiceIdentifier::Any, 1000), Err(ChirpError::InvalidIdentifier));
    }

    #[test]
    fn double_registration_is_an_error() {
        let mgr = Manager::new("t-dup", "hostB", Some(Ipv4Addr::LOCALHOST)).unwrap();
        mgr.register_service(ServiceIdentifier::Control, 2000).unwrap();
        assert_eq!(
            mgr.register_service(ServiceIdentifier::Control, 2000),
            Err(ChirpError::DuplicateRegistration)
        );
    }

    #[test]
    fn unregistering_unknown_service_is_an_error() {
        let mgr = Manager::new("t-unk", "hostC", Some(Ipv4Addr::LOCALHOST)).unwrap();
        assert_eq!(
            mgr.unregister_service(ServiceIdentifier::Data, 3000),
            Err(ChirpError::UnknownService)
        );
    }

    #[test]
    fn discovery_and_ping() {
        use std::sync::mpsc;
        use std::time::Duration;

        let a = Manager::new("ping-pong", "satA", Some(Ipv4Addr::LOCALHOST)).unwrap();
        a.register_service(ServiceIdentifier::Control, 41000).unwrap();
        a.listener().register_request_callback(|requested, socket| {
            if requested == ServiceIdentifier::Any || requested == ServiceIdentifier::Control {
                let msg = ChirpMessage {
                    group_name: "ping-pong".into(),
                    host_name: "satA".into(),
                    msg_type: MessageType::Offer,
                    service_id: ServiceIdentifier::Control,
                    port: 41000,
                };
                let _ = socket.send(&msg.encode());
            }
        });

        let b = Manager::new("ping-pong", "satB", Some(Ipv4Addr::LOCALHOST)).unwrap();
        let (tx, rx) = mpsc::channel();
        b.listener().register_discovery_callback(Box::new(move |ev| {
            let _ = tx.send(ev.clone());
        }));
        b.send_request(ServiceIdentifier::Any).unwrap();

        let event = rx.recv_timeout(Duration::from_secs(2)).expect("expected an OFFER");
        assert_eq!(event.service.port, 41000);
        assert_eq!(event.service.service_id, ServiceIdentifier::Control);
    }
}
