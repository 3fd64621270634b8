//! The CMDP publisher: an XPUB-emulating socket advertised via CHIRP as
//! `MONITORING`, plus the subscription-reading side of the level-aggregation
//! logic.

use std::collections::VecDeque;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::chirp::{Manager as ChirpManager, ServiceIdentifier};
use crate::level::Level;
use crate::net::MultipartStream;

use super::message::CmdpMessage;
use super::subscription::SubscriptionTable;

const SUBSCRIBE: u8 = 0x01;
const CONTROL_POLL: Duration = Duration::from_millis(100);
/// Time to let initial subscriptions land before the sender worker starts
/// draining the pre-sender-name queue.
const STARTUP_PAUSE: Duration = Duration::from_millis(300);

struct ClientConn {
    write: Mutex<MultipartStream>,
    subscribed: Arc<Mutex<Vec<String>>>,
    reader_stop: Arc<AtomicBool>,
    reader_handle: Option<JoinHandle<()>>,
}

struct Shared {
    sender_name: Mutex<Option<String>>,
    clients: Mutex<Vec<ClientConn>>,
    subscriptions: Mutex<SubscriptionTable>,
    queue: Mutex<VecDeque<CmdpMessage>>,
}

/// Owns the listening socket, its accept thread, one subscription-reader
/// thread per client, and the sender worker that drains the publish
/// queue.
pub struct Publisher {
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
    sender_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Publisher {
    pub fn spawn(manager: &ChirpManager) -> std::io::Result<Self> {
        let listener = TcpListener::bind("0.0.0.0:0")?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        manager
            .register_service(ServiceIdentifier::Monitoring, port)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::AddrInUse, e.to_string()))?;

        let shared = Arc::new(Shared {
            sender_name: Mutex::new(None),
            clients: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(SubscriptionTable::new()),
            queue: Mutex::new(VecDeque::new()),
        });
        let stop = Arc::new(AtomicBool::new(false));

        let accept_shared = Arc::clone(&shared);
        let accept_stop = Arc::clone(&stop);
        let accept_handle = thread::spawn(move || accept_loop(listener, accept_shared, accept_stop));

        let sender_shared = Arc::clone(&shared);
        let sender_stop = Arc::clone(&stop);
        let sender_handle = thread::spawn(move || sender_loop(sender_shared, sender_stop));

        Ok(Publisher {
            shared,
            stop,
            accept_handle: Mutex::new(Some(accept_handle)),
            sender_handle: Mutex::new(Some(sender_handle)),
        })
    }

    /// Sets the real sender name once the satellite's identity is known;
    /// queued records are rewritten and released to the sender worker.
    pub fn set_sender_name(&self, name: impl Into<String>) {
        let name = name.into();
        let mut queue = self.shared.queue.lock().unwrap();
        for msg in queue.iter_mut() {
            msg.sender = name.clone();
        }
        *self.shared.sender_name.lock().unwrap() = Some(name);
    }

    /// Queues `msg` for publication, rewriting its sender if the real name
    /// is already known.
    pub fn publish(&self, mut msg: CmdpMessage) {
        if let Some(name) = self.shared.sender_name.lock().unwrap().as_ref() {
            msg.sender = name.clone();
        }
        self.shared.queue.lock().unwrap().push_back(msg);
    }

    pub fn global_minimum(&self) -> Level {
        self.shared.subscriptions.lock().unwrap().global_minimum()
    }

    pub fn effective_level_for(&self, logger_name: &str) -> Level {
        self.shared.subscriptions.lock().unwrap().effective_level_for(logger_name)
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                stream.set_nonblocking(false).ok();
                let write = match MultipartStream::new(stream) {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                let read = match write.try_clone() {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                let subscribed = Arc::new(Mutex::new(Vec::new()));
                let reader_stop = Arc::new(AtomicBool::new(false));
                let reader_shared = Arc::clone(&shared);
                let reader_subscribed = Arc::clone(&subscribed);
                let reader_own_stop = Arc::clone(&reader_stop);
                let handle = thread::spawn(move || {
                    subscription_reader_loop(read, reader_shared, reader_subscribed, reader_own_stop)
                });
                shared.clients.lock().unwrap().push(ClientConn {
                    write: Mutex::new(write),
                    subscribed,
                    reader_stop,
                    reader_handle: Some(handle),
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => thread::sleep(CONTROL_POLL),
            Err(_) => thread::sleep(CONTROL_POLL),
        }
    }
}

fn subscription_reader_loop(
    mut read: MultipartStream,
    shared: Arc<Shared>,
    subscribed: Arc<Mutex<Vec<String>>>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Relaxed) {
        match read.recv_multipart(CONTROL_POLL) {
            Ok(Some(parts)) => {
                if parts.len() != 2 {
                    continue;
                }
                let Some(marker) = parts[0].first().copied() else { continue };
                let Ok(topic) = String::from_utf8(parts[1].clone()) else { continue };
                let mut table = shared.subscriptions.lock().unwrap();
                if marker == SUBSCRIBE {
                    table.subscribe(&topic);
                    subscribed.lock().unwrap().push(topic);
                } else {
                    table.unsubscribe(&topic);
                    subscribed.lock().unwrap().retain(|t| t != &topic);
                }
            }
            Ok(None) => continue,
            Err(_) => return,
        }
    }
}

fn sender_loop(shared: Arc<Shared>, stop: Arc<AtomicBool>) {
    thread::sleep(STARTUP_PAUSE);
    while !stop.load(Ordering::Relaxed) {
        let ready = shared.sender_name.lock().unwrap().is_some();
        let next = if ready { shared.queue.lock().unwrap().pop_front() } else { None };
        match next {
            Some(msg) => deliver(&shared, msg),
            None => thread::sleep(Duration::from_millis(20)),
        }
    }
}

fn deliver(shared: &Arc<Shared>, msg: CmdpMessage) {
    let parts = msg.clone().into_multipart();
    let mut clients = shared.clients.lock().unwrap();
    clients.retain_mut(|client| {
        let subscribed = client.subscribed.lock().unwrap();
        let matches = subscribed.iter().any(|topic| msg.topic.starts_with(topic.as_str()));
        drop(subscribed);
        if !matches {
            return true;
        }
        client.write.lock().unwrap().send_multipart(&parts).is_ok()
    });
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.accept_handle.lock().unwrap().take() {
            let _ = h.join();
        }
        if let Some(h) = self.sender_handle.lock().unwrap().take() {
            let _ = h.join();
        }
        for client in self.shared.clients.lock().unwrap().iter_mut() {
            client.reader_stop.store(true, Ordering::Relaxed);
            if let Some(h) = client.reader_handle.take() {
                let _ = h.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpStream};

    #[test]
    fn subscription_raises_global_minimum() {
        let manager = ChirpManager::new("cmdp-pub-test", "sat1", Some(Ipv4Addr::LOCALHOST)).unwrap();
        let publisher = Publisher::spawn(&manager).unwrap();
        let services = manager.registered_services();
        let port = services.iter().find(|(id, _)| *id == ServiceIdentifier::Monitoring).unwrap().1;

        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let mut client = MultipartStream::new(stream).unwrap();
        client.send_multipart(&[vec![SUBSCRIBE], b"LOG/INFO".to_vec()]).unwrap();

        thread::sleep(Duration::from_millis(200));
        assert_eq!(publisher.global_minimum(), Level::Info);
    }

    #[test]
    fn subscribed_client_receives_matching_message() {
        let manager = ChirpManager::new("cmdp-pub-test2", "sat2", Some(Ipv4Addr::LOCALHOST)).unwrap();
        let publisher = Publisher::spawn(&manager).unwrap();
        publisher.set_sender_name("sat2");
        let services = manager.registered_services();
        let port = services.iter().find(|(id, _)| *id == ServiceIdentifier::Monitoring).unwrap().1;

        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let mut client = MultipartStream::new(stream).unwrap();
        client.send_multipart(&[vec![SUBSCRIBE], b"LOG/INFO".to_vec()]).unwrap();
        thread::sleep(Duration::from_millis(400));

        publisher.publish(CmdpMessage::new("LOG/INFO/FSM", "placeholder", "hello"));
        let parts = client.recv_multipart(Duration::from_secs(2)).unwrap().expect("expected a delivered message");
        let decoded = CmdpMessage::from_multipart(parts).unwrap();
        assert_eq!(decoded.sender, "sat2");
        assert_eq!(decoded.topic, "LOG/INFO/FSM");
    }
}
