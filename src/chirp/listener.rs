//! The CHIRP listener: the single thread that decodes inbound datagrams
//! and dispatches discovery (OFFER/DEPART) and request (REQUEST) callbacks
//!.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::message::{ChirpMessage, MessageType};
use super::service::{ServiceDescriptor, ServiceIdentifier};
use super::socket::ChirpSocket;
use super::BUFFER_SIZE;

/// Poll period for the listener's blocking `recv` call.
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryKind {
    Offer,
    Depart,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredEvent {
    pub kind: DiscoveryKind,
    pub service: ServiceDescriptor,
}

pub type DiscoveryCallback = Box<dyn Fn(&DiscoveredEvent) + Send + Sync>;
/// Invoked for an inbound REQUEST, with the requested identifier and the
/// shared socket so the callback may broadcast an OFFER in reply.
///
/// `Arc`-wrapped (rather than `Box`) so the listener can hand a clone to
/// the per-request worker thread without borrowing from the callback
/// registry for the thread's lifetime.
pub type RequestCallback = Arc<dyn Fn(ServiceIdentifier, Arc<ChirpSocket>) + Send + Sync>;

struct Shared {
    socket: Arc<ChirpSocket>,
    group_name: String,
    /// Datagrams whose host name equals this are dropped (self-filter).
    self_host_name: Option<String>,
    discovered: Mutex<HashSet<ServiceDescriptor>>,
    discovery_callbacks: Mutex<Vec<DiscoveryCallback>>,
    request_callbacks: Mutex<Vec<RequestCallback>>,
}

/// Owns the listener worker thread; dropping it signals stop and joins.
pub struct Listener {
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Listener {
    pub fn spawn(socket: Arc<ChirpSocket>, group_name: impl Into<String>, self_host_name: Option<String>) -> Self {
        let shared = Arc::new(Shared {
            socket,
            group_name: group_name.into(),
            self_host_name,
            discovered: Mutex::new(HashSet::new()),
            discovery_callbacks: Mutex::new(Vec::new()),
            request_callbacks: Mutex::new(Vec::new()),
        });
        let stop = Arc::new(AtomicBool::new(false));
        let worker_shared = Arc::clone(&shared);
        let worker_stop = Arc::clone(&stop);
        let handle = thread::spawn(move || listener_loop(worker_shared, worker_stop));
        Listener {
            shared,
            stop,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn register_discovery_callback(&self, cb: DiscoveryCallback) {
        self.shared.discovery_callbacks.lock().unwrap().push(cb);
    }

    pub fn register_request_callback(
        &self,
        cb: impl Fn(ServiceIdentifier, Arc<ChirpSocket>) + Send + Sync + 'static,
    ) {
        self.shared.request_callbacks.lock().unwrap().push(Arc::new(cb));
    }

    /// Currently discovered services, a snapshot.
    pub fn discovered_services(&self) -> Vec<ServiceDescriptor> {
        self.shared.discovered.lock().unwrap().iter().cloned().collect()
    }

    /// Drops all discovered services whose host matches `host_name`,
    /// firing DEPART callbacks for each.
    pub fn mark_dead(&self, host_name: &str) {
        let removed: Vec<ServiceDescriptor> = {
            let mut discovered = self.shared.discovered.lock().unwrap();
            let (gone, kept): (HashSet<_>, HashSet<_>) =
                discovered.drain().partition(|s| s.host_name == host_name);
            *discovered = kept;
            gone.into_iter().collect()
        };
        for service in removed {
            fire_discovery(&self.shared, DiscoveryKind::Depart, service);
        }
    }

    /// As `mark_dead`, but drops every discovered service regardless of
    /// host.
    pub fn forget_discovered_services(&self) {
        let removed: Vec<ServiceDescriptor> = self.shared.discovered.lock().unwrap().drain().collect();
        for service in removed {
            fire_discovery(&self.shared, DiscoveryKind::Depart, service);
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn listener_loop(shared: Arc<Shared>, stop: Arc<AtomicBool>) {
    let mut buf = [0u8; BUFFER_SIZE];
    while !stop.load(Ordering::Relaxed) {
        let received = match shared.socket.recv(&mut buf, POLL_TIMEOUT) {
            Ok(Some(v)) => v,
            Ok(None) => continue,
            Err(e) => {
                log::warn!("CHIRP listener recv error: {e}");
                continue;
            }
        };
        let (n, addr) = received;
        if let Err(e) = handle_datagram(&shared, &buf[..n], addr) {
            log::warn!("dropping malformed CHIRP datagram from {addr}: {e}");
        }
    }
}

fn handle_datagram(shared: &Arc<Shared>, bytes: &[u8], addr: SocketAddr) -> Result<(), super::message::ChirpDecodeError> {
    let msg = ChirpMessage::decode(bytes)?;
    if msg.group_name != shared.group_name {
        return Ok(());
    }
    if let Some(self_name) = &shared.self_host_name {
        if &msg.host_name == self_name {
            return Ok(());
        }
    }
    match msg.msg_type {
        MessageType::Request => {
            let callbacks = shared.request_callbacks.lock().unwrap().clone();
            for cb in callbacks {
                let socket = Arc::clone(&shared.socket);
                let service_id = msg.service_id;
                // Each request callback runs on its own thread.
                thread::spawn(move || cb(service_id, socket));
            }
            Ok(())
        }
        MessageType::Offer => {
            let ip = match addr {
                SocketAddr::V4(v4) => *v4.ip(),
                SocketAddr::V6(_) => return Ok(()),
            };
            let service = ServiceDescriptor::new(&msg.group_name, &msg.host_name, msg.service_id, msg.port, ip);
            let is_new = shared.discovered.lock().unwrap().insert(service.clone());
            if is_new {
                fire_discovery(shared, DiscoveryKind::Offer, service);
            }
            Ok(())
        }
        MessageType::Depart => {
            let ip = match addr {
                SocketAddr::V4(v4) => *v4.ip(),
                SocketAddr::V6(_) => return Ok(()),
            };
            let service = ServiceDescriptor::new(&msg.group_name, &msg.host_name, msg.service_id, msg.port, ip);
            let removed = shared.discovered.lock().unwrap().remove(&service);
            if removed {
                fire_discovery(shared, DiscoveryKind::Depart, service);
            }
            Ok(())
        }
    }
}

fn fire_discovery(shared: &Arc<Shared>, kind: DiscoveryKind, service: ServiceDescriptor) {
    let event = DiscoveredEvent { kind, service };
    let callbacks = shared.discovery_callbacks.lock().unwrap();
    for cb in callbacks.iter() {
        cb(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::mpsc;

    #[test]
    fn group_mismatch_is_silently_dropped() {
        let socket = Arc::new(ChirpSocket::bind(Some(Ipv4Addr::LOCALHOST)).unwrap());
        let listener = Listener::spawn(Arc::clone(&socket), "group-a", None);
        let (tx, rx) = mpsc::channel::<DiscoveredEvent>();
        listener.register_discovery_callback(Box::new(move |ev| {
            let _ = tx.send(ev.clone());
        }));

        let other = ChirpSocket::bind(Some(Ipv4Addr::LOCALHOST)).unwrap();
        let msg = ChirpMessage {
            group_name: "group-b".into(),
            host_name: "host".into(),
            msg_type: MessageType::Offer,
            service_id: ServiceIdentifier::Control,
            port: 1234,
        };
        other.send(&msg.encode()).unwrap();

        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn duplicate_offer_is_a_noop() {
        let socket = Arc::new(ChirpSocket::bind(Some(Ipv4Addr::LOCALHOST)).unwrap());
        let listener = Listener::spawn(Arc::clone(&socket), "group-dup", None);
        let (tx, rx) = mpsc::channel::<DiscoveredEvent>();
        listener.register_discovery_callback(Box::new(move |ev| {
            let _ = tx.send(ev.clone());
        }));

        let other = ChirpSocket::bind(Some(Ipv4Addr::LOCALHOST)).unwrap();
        let msg = ChirpMessage {
            group_name: "group-dup".into(),
            host_name: "host".into(),
            msg_type: MessageType::Offer,
            service_id: ServiceIdentifier::Control,
            port: 4321,
        };
        other.send(&msg.encode()).unwrap();
        other.send(&msg.encode()).unwrap();

        let first = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        assert_eq!(first.kind, DiscoveryKind::Offer);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
