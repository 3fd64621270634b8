//! The CHP heartbeat broadcaster: a publisher advertised via CHIRP as
//! `HEARTBEAT`, emitting on a fixed interval plus an immediate
//! "extrasystole" on every FSM state change.

use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::chirp::{Manager as ChirpManager, ServiceIdentifier};
use crate::fsm::{Fsm, State};
use crate::net::MultipartStream;

use super::message::{HeartbeatMessage, IS_EXTRASYSTOLE};

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);
const ACCEPT_POLL: Duration = Duration::from_millis(100);
const STOP_CHECK: Duration = Duration::from_millis(50);

struct Shared {
    sender_name: String,
    clients: Mutex<Vec<MultipartStream>>,
    interval: Duration,
}

/// Owns the listening socket, accept thread, and periodic heartbeat
/// thread. Dropping it stops both threads and unregisters the service.
pub struct Sender {
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
    beat_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Sender {
    pub fn spawn(manager: &ChirpManager, fsm: &Arc<Fsm>, sender_name: impl Into<String>, interval: Duration) -> std::io::Result<Self> {
        let sender_name = sender_name.into();
        let listener = TcpListener::bind("0.0.0.0:0")?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        manager
            .register_service(ServiceIdentifier::Heartbeat, port)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::AddrInUse, e.to_string()))?;

        let shared = Arc::new(Shared { sender_name, clients: Mutex::new(Vec::new()), interval });
        let stop = Arc::new(AtomicBool::new(false));

        let accept_stop = Arc::clone(&stop);
        let accept_shared = Arc::clone(&shared);
        let accept_handle = thread::spawn(move || accept_loop(listener, accept_shared, accept_stop));

        let beat_stop = Arc::clone(&stop);
        let beat_shared = Arc::clone(&shared);
        let beat_fsm = Arc::clone(fsm);
        let beat_handle = thread::spawn(move || heartbeat_loop(beat_shared, beat_fsm, beat_stop));

        let callback_shared = Arc::clone(&shared);
        fsm.register_callback(move |state: State| {
            publish(&callback_shared, state, IS_EXTRASYSTOLE);
        });

        Ok(Sender {
            shared,
            stop,
            accept_handle: Mutex::new(Some(accept_handle)),
            beat_handle: Mutex::new(Some(beat_handle)),
        })
    }

    pub fn connected_client_count(&self) -> usize {
        self.shared.clients.lock().unwrap().len()
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                stream.set_nonblocking(false).ok();
                if let Ok(wrapped) = MultipartStream::new(stream) {
                    shared.clients.lock().unwrap().push(wrapped);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(_) => thread::sleep(ACCEPT_POLL),
        }
    }
}

fn heartbeat_loop(shared: Arc<Shared>, fsm: Arc<Fsm>, stop: Arc<AtomicBool>) {
    let mut elapsed = Duration::ZERO;
    while !stop.load(Ordering::Relaxed) {
        thread::sleep(STOP_CHECK);
        elapsed += STOP_CHECK;
        if elapsed >= shared.interval {
            elapsed = Duration::ZERO;
            publish(&shared, fsm.state(), 0);
        }
    }
}

fn publish(shared: &Arc<Shared>, state: State, flags: u8) {
    let msg = HeartbeatMessage::new(shared.sender_name.clone(), state, shared.interval).with_flags(flags);
    let bytes = msg.encode();
    let mut clients = shared.clients.lock().unwrap();
    clients.retain_mut(|client| client.send_multipart(&[bytes.clone()]).is_ok());
}

impl Drop for Sender {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.accept_handle.lock().unwrap().take() {
            let _ = h.join();
        }
        if let Some(h) = self.beat_handle.lock().unwrap().take() {
            let _ = h.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::Dictionary;
    use crate::fsm::SatelliteHooks;
    use crate::config::Configuration;
    use std::net::{Ipv4Addr, TcpStream};

    struct Noop;
    impl SatelliteHooks for Noop {
        fn initializing(&self, _config: &Configuration) -> crate::fsm::HookResult {
            Ok(())
        }
    }

    #[test]
    fn extrasystole_is_sent_on_state_change() {
        let manager = ChirpManager::new("chp-sender-test", "sat1", Some(Ipv4Addr::LOCALHOST)).unwrap();
        let fsm = Fsm::new(Arc::new(Noop));
        let sender = Sender::spawn(&manager, &fsm, "sat1", Duration::from_secs(60)).unwrap();

        let services = manager.registered_services();
        let port = services.iter().find(|(id, _)| *id == ServiceIdentifier::Heartbeat).unwrap().1;
        let client_stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let mut client = MultipartStream::new(client_stream).unwrap();

        // Give the accept thread a moment to register the connection.
        thread::sleep(Duration::from_millis(150));
        fsm.initialize(Configuration::new(Dictionary::new())).unwrap();

        let frames = client.recv_multipart(Duration::from_secs(2)).unwrap().expect("expected an extrasystole");
        let msg = HeartbeatMessage::decode(&frames[0]).unwrap();
        assert!(msg.is_extrasystole());
        assert_eq!(msg.state, State::Initializing);
        drop(sender);
    }
}
