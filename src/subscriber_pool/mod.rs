//! The shared machinery behind the CMDP log/metric subscriber and the CHP
//! watchdog: turns CHIRP OFFER/DEPART into a pool of connected
//! sockets with global and per-host topic bookkeeping.
//!
//! Parameterised over the decoded message type `M` via a decode closure
//! rather than a trait, since CMDP and CHP messages share no common
//! interface worth inventing one for.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::chirp::{DiscoveredEvent, DiscoveryKind, Listener as ChirpListener, ServiceDescriptor, ServiceIdentifier};
use crate::net::{self, MultipartStream};

const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Control-frame markers emulating an XPUB socket's subscribe/unsubscribe
/// notifications, carried as ordinary frames over the bidirectional
/// multipart stream.
const SUBSCRIBE: u8 = 0x01;
const UNSUBSCRIBE: u8 = 0x00;

type Decode<M> = dyn Fn(Vec<Vec<u8>>) -> Option<M> + Send + Sync;
type OnMessage<M> = dyn Fn(&str, M) + Send + Sync;

struct PooledSocket {
    write: Mutex<MultipartStream>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Topics {
    global: HashSet<String>,
    extras: HashMap<String, HashSet<String>>,
}

struct Inner<M> {
    service_id: ServiceIdentifier,
    sockets: Mutex<HashMap<String, PooledSocket>>,
    topics: Mutex<Topics>,
    decode: Arc<Decode<M>>,
    on_message: Arc<OnMessage<M>>,
}

/// Owns the set of sockets connected to discovered peers of one CHIRP
/// service, and the topic tables applied to them.
pub struct Pool<M> {
    inner: Arc<Inner<M>>,
}

impl<M: Send + 'static> Pool<M> {
    pub fn new(
        service_id: ServiceIdentifier,
        decode: impl Fn(Vec<Vec<u8>>) -> Option<M> + Send + Sync + 'static,
        on_message: impl Fn(&str, M) + Send + Sync + 'static,
    ) -> Self {
        Pool {
            inner: Arc::new(Inner {
                service_id,
                sockets: Mutex::new(HashMap::new()),
                topics: Mutex::new(Topics::default()),
                decode: Arc::new(decode),
                on_message: Arc::new(on_message),
            }),
        }
    }

    /// Registers this pool's OFFER/DEPART handling on `listener`. Call once
    /// per pool; `listener` must outlive the pool.
    pub fn attach(&self, listener: &ChirpListener) {
        let inner = Arc::clone(&self.inner);
        listener.register_discovery_callback(Box::new(move |event: &DiscoveredEvent| {
            if event.service.service_id != inner.service_id {
                return;
            }
            match event.kind {
                DiscoveryKind::Offer => connect(&inner, &event.service),
                DiscoveryKind::Depart => disconnect(&inner, &event.service.host_name),
            }
        }));
    }

    /// Replaces the global topic set, applying the added/removed symmetric
    /// difference to every connected socket and re-applying any per-host
    /// extras a removed global topic had shadowed.
    pub fn set_subscription_topics(&self, topics: HashSet<String>) {
        let (added, removed, reapply): (Vec<String>, Vec<String>, Vec<(String, Vec<String>)>) = {
            let mut t = self.inner.topics.lock().unwrap();
            let added: Vec<String> = topics.difference(&t.global).cloned().collect();
            let removed: Vec<String> = t.global.difference(&topics).cloned().collect();
            t.global = topics;
            let reapply = removed
                .iter()
                .filter_map(|topic| {
                    let hosts: Vec<String> = t
                        .extras
                        .iter()
                        .filter(|(_, set)| set.contains(topic))
                        .map(|(h, _)| h.clone())
                        .collect();
                    if hosts.is_empty() {
                        None
                    } else {
                        Some((topic.clone(), hosts))
                    }
                })
                .collect::<Vec<(String, Vec<String>)>>();
            // Flatten (topic, hosts) into (host, [topic]) for the caller below.
            let mut by_host: HashMap<String, Vec<String>> = HashMap::new();
            for (topic, hosts) in reapply {
                for host in hosts {
                    by_host.entry(host).or_default().push(topic.clone());
                }
            }
            (added, removed, by_host.into_iter().collect())
        };
        let sockets = self.inner.sockets.lock().unwrap();
        for topic in &added {
            broadcast(&sockets, SUBSCRIBE, topic);
        }
        for topic in &removed {
            broadcast(&sockets, UNSUBSCRIBE, topic);
        }
        for (host, extra_topics) in reapply {
            if let Some(socket) = sockets.get(&host) {
                for topic in extra_topics {
                    send_control(socket, SUBSCRIBE, &topic);
                }
            }
        }
    }

    pub fn subscribe(&self, topic: &str) {
        let is_new = self.inner.topics.lock().unwrap().global.insert(topic.to_string());
        if is_new {
            broadcast(&self.inner.sockets.lock().unwrap(), SUBSCRIBE, topic);
        }
    }

    pub fn unsubscribe(&self, topic: &str) {
        let was_present = self.inner.topics.lock().unwrap().global.remove(topic);
        if was_present {
            broadcast(&self.inner.sockets.lock().unwrap(), UNSUBSCRIBE, topic);
        }
    }

    pub fn set_extra_subscription_topics(&self, host: &str, topics: HashSet<String>) {
        let (added, removed, skip_added): (Vec<String>, Vec<String>, HashSet<String>) = {
            let mut t = self.inner.topics.lock().unwrap();
            let current = t.extras.entry(host.to_string()).or_default();
            let added: Vec<String> = topics.difference(current).cloned().collect();
            let removed: Vec<String> = current.difference(&topics).cloned().collect();
            *current = topics;
            (added, removed, t.global.clone())
        };
        let sockets = self.inner.sockets.lock().unwrap();
        if let Some(socket) = sockets.get(host) {
            for topic in &added {
                if !skip_added.contains(topic) {
                    send_control(socket, SUBSCRIBE, topic);
                }
            }
            for topic in &removed {
                if !skip_added.contains(topic) {
                    send_control(socket, UNSUBSCRIBE, topic);
                }
            }
        }
    }

    pub fn subscribe_extra(&self, host: &str, topic: &str) {
        let (should_send, is_global) = {
            let mut t = self.inner.topics.lock().unwrap();
            let is_global = t.global.contains(topic);
            let is_new = t.extras.entry(host.to_string()).or_default().insert(topic.to_string());
            (is_new && !is_global, is_global)
        };
        let _ = is_global;
        if should_send {
            if let Some(socket) = self.inner.sockets.lock().unwrap().get(host) {
                send_control(socket, SUBSCRIBE, topic);
            }
        }
    }

    pub fn unsubscribe_extra(&self, host: &str, topic: &str) {
        let (should_send, is_global) = {
            let mut t = self.inner.topics.lock().unwrap();
            let is_global = t.global.contains(topic);
            let was_present = t.extras.entry(host.to_string()).or_default().remove(topic);
            (was_present && !is_global, is_global)
        };
        let _ = is_global;
        if should_send {
            if let Some(socket) = self.inner.sockets.lock().unwrap().get(host) {
                send_control(socket, UNSUBSCRIBE, topic);
            }
        }
    }

    /// Drops per-host extras for `hosts`, unsubscribing any topic not also
    /// covered by a global subscription.
    pub fn remove_extra_subscriptions(&self, hosts: &[String]) {
        for host in hosts {
            let to_unsubscribe: Vec<String> = {
                let mut t = self.inner.topics.lock().unwrap();
                let extras = t.extras.remove(host).unwrap_or_default();
                extras.difference(&t.global).cloned().collect()
            };
            if let Some(socket) = self.inner.sockets.lock().unwrap().get(host) {
                for topic in to_unsubscribe {
                    send_control(socket, UNSUBSCRIBE, &topic);
                }
            }
        }
    }

    pub fn connected_hosts(&self) -> Vec<String> {
        self.inner.sockets.lock().unwrap().keys().cloned().collect()
    }
}

fn broadcast(sockets: &HashMap<String, PooledSocket>, marker: u8, topic: &str) {
    for socket in sockets.values() {
        send_control(socket, marker, topic);
    }
}

fn send_control(socket: &PooledSocket, marker: u8, topic: &str) {
    let mut stream = socket.write.lock().unwrap();
    let _ = stream.send_multipart(&[vec![marker], topic.as_bytes().to_vec()]);
}

fn connect<M: Send + 'static>(inner: &Arc<Inner<M>>, service: &ServiceDescriptor) {
    if inner.sockets.lock().unwrap().contains_key(&service.host_name) {
        return;
    }
    let address: Ipv4Addr = service.address;
    let stream = match net::connect(&address.to_string(), service.port) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("subscriber pool: failed to connect to {}: {e}", service.host_name);
            return;
        }
    };
    let write = match MultipartStream::new(stream) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("subscriber pool: failed to wrap connection to {}: {e}", service.host_name);
            return;
        }
    };
    let read = match write.try_clone() {
        Ok(s) => s,
        Err(e) => {
            log::warn!("subscriber pool: failed to clone connection to {}: {e}", service.host_name);
            return;
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    let poller_inner = Arc::clone(inner);
    let poller_stop = Arc::clone(&stop);
    let host_name = service.host_name.clone();
    let handle = thread::spawn(move || poll_loop(poller_inner, read, host_name, poller_stop));

    let socket = PooledSocket { write: Mutex::new(write), stop, handle: Some(handle) };
    inner.sockets.lock().unwrap().insert(service.host_name.clone(), socket);

    // Apply the current global topic set (and any pre-existing extras) to
    // the newly-connected socket.
    let topics = inner.topics.lock().unwrap();
    let sockets = inner.sockets.lock().unwrap();
    if let Some(socket) = sockets.get(&service.host_name) {
        for topic in &topics.global {
            send_control(socket, SUBSCRIBE, topic);
        }
        if let Some(extras) = topics.extras.get(&service.host_name) {
            for topic in extras.difference(&topics.global) {
                send_control(socket, SUBSCRIBE, topic);
            }
        }
    }
}

fn disconnect<M>(inner: &Arc<Inner<M>>, host_name: &str) {
    if let Some(mut socket) = inner.sockets.lock().unwrap().remove(host_name) {
        socket.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = socket.handle.take() {
            let _ = handle.join();
        }
    }
}

fn poll_loop<M>(inner: Arc<Inner<M>>, mut read: MultipartStream, host_name: String, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        match read.recv_multipart(POLL_TIMEOUT) {
            Ok(Some(parts)) => {
                if let Some(message) = (inner.decode)(parts) {
                    (inner.on_message)(&host_name, message);
                }
            }
            Ok(None) => continue,
            Err(e) => {
                log::warn!("subscriber pool: read error from {host_name}: {e}");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr as V4;
    use std::sync::mpsc;

    #[test]
    fn connect_applies_existing_global_topics() {
        use crate::chirp::Manager;

        let producer = Manager::new("pool-test", "producer", Some(V4::LOCALHOST)).unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        producer.register_service(ServiceIdentifier::Monitoring, port).unwrap();
        producer.listener().register_request_callback(move |requested, socket| {
            if requested == ServiceIdentifier::Any || requested == ServiceIdentifier::Monitoring {
                let msg = crate::chirp::ChirpMessage {
                    group_name: "pool-test".into(),
                    host_name: "producer".into(),
                    msg_type: crate::chirp::message::MessageType::Offer,
                    service_id: ServiceIdentifier::Monitoring,
                    port,
                };
                let _ = socket.send(&msg.encode());
            }
        });

        let (tx, rx) = mpsc::channel::<Vec<Vec<u8>>>();
        let accept_handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut server = MultipartStream::new(stream).unwrap();
            loop {
                match server.recv_multipart(Duration::from_secs(2)) {
                    Ok(Some(parts)) => {
                        if tx.send(parts).is_err() {
                            return;
                        }
                    }
                    _ => return,
                }
            }
        });

        let consumer = Manager::new("pool-test", "consumer", Some(V4::LOCALHOST)).unwrap();
        let pool: Pool<()> = Pool::new(ServiceIdentifier::Monitoring, |_parts| None, |_host, _msg| {});
        pool.set_subscription_topics(["LOG/INFO".to_string()].into_iter().collect());
        pool.attach(consumer.listener());
        consumer.send_request(ServiceIdentifier::Monitoring).unwrap();

        let frame = rx.recv_timeout(Duration::from_secs(2)).expect("expected a subscribe control frame");
        assert_eq!(frame[0], vec![SUBSCRIBE]);
        assert_eq!(frame[1], b"LOG/INFO".to_vec());

        drop(pool);
        accept_handle.join().unwrap();
    }
}
