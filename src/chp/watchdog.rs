//! The CHP watchdog: one worker tracking liveness of every discovered
//! `HEARTBEAT` peer, firing an interrupt callback on silence or a reported
//! `ERROR`/`SAFE` state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::chirp::{Listener as ChirpListener, ServiceIdentifier};
use crate::fsm::State;
use crate::subscriber_pool::Pool;
use crate::value::Timestamp;

use super::message::HeartbeatMessage;

pub const DEFAULT_LIVES: u32 = 3;
const CLOCK_SKEW_THRESHOLD: Duration = Duration::from_secs(3);

struct RemoteRecord {
    interval: Duration,
    last_heartbeat: Instant,
    last_state: State,
    last_checked: Instant,
    lives: u32,
}

pub type InterruptCallback = Arc<dyn Fn(&str) + Send + Sync>;

pub struct Watchdog {
    pool: Pool<HeartbeatMessage>,
    records: Arc<Mutex<HashMap<String, RemoteRecord>>>,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Watchdog {
    pub fn spawn(listener: &ChirpListener, default_lives: u32, on_interrupt: InterruptCallback) -> Self {
        let records: Arc<Mutex<HashMap<String, RemoteRecord>>> = Arc::new(Mutex::new(HashMap::new()));

        let update_records = Arc::clone(&records);
        let pool = Pool::new(
            ServiceIdentifier::Heartbeat,
            |parts| parts.first().and_then(|bytes| HeartbeatMessage::decode(bytes).ok()),
            move |host: &str, msg: HeartbeatMessage| {
                check_clock_skew(host, &msg);
                let mut records = update_records.lock().unwrap();
                let now = Instant::now();
                let lives = if msg.state == State::Error || msg.state == State::Safe {
                    records.get(host).map(|r| r.lives).unwrap_or(default_lives)
                } else {
                    default_lives
                };
                records.insert(
                    host.to_string(),
                    RemoteRecord { interval: msg.interval, last_heartbeat: now, last_state: msg.state, last_checked: now, lives },
                );
            },
        );
        pool.attach(listener);

        let stop = Arc::new(AtomicBool::new(false));
        let worker_records = Arc::clone(&records);
        let worker_stop = Arc::clone(&stop);
        let handle = thread::spawn(move || worker_loop(worker_records, worker_stop, on_interrupt));

        Watchdog { pool, records, stop, handle: Mutex::new(Some(handle)) }
    }

    pub fn get_remote_state(&self, host: &str) -> Option<State> {
        self.records.lock().unwrap().get(host).map(|r| r.last_state)
    }

    pub fn connected_hosts(&self) -> Vec<String> {
        self.pool.connected_hosts()
    }
}

fn check_clock_skew(host: &str, msg: &HeartbeatMessage) {
    let now = Timestamp::now();
    let skew_nanos = (now.as_unix_nanos() - msg.time.as_unix_nanos()).abs();
    if skew_nanos > CLOCK_SKEW_THRESHOLD.as_nanos() as i64 {
        log::warn!("CHP clock skew from {host}: {}ms", skew_nanos / 1_000_000);
    }
}

fn worker_loop(records: Arc<Mutex<HashMap<String, RemoteRecord>>>, stop: Arc<AtomicBool>, on_interrupt: InterruptCallback) {
    while !stop.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(100));
        let now = Instant::now();
        let mut fired = Vec::new();
        {
            let mut records = records.lock().unwrap();
            for (host, record) in records.iter_mut() {
                if (record.last_state == State::Error || record.last_state == State::Safe) && record.lives > 0 {
                    record.lives = 0;
                    fired.push(host.clone());
                    continue;
                }
                let missed = now.saturating_duration_since(record.last_heartbeat) > record.interval;
                // Only decrement once per missed interval: a peer stays
                // overdue for many 100ms wakes, but each should cost it at
                // most one life per `interval` of silence.
                let not_yet_checked_this_interval = now.saturating_duration_since(record.last_checked) >= record.interval;
                if missed && record.lives > 0 && not_yet_checked_this_interval {
                    record.lives = record.lives.saturating_sub(1);
                    record.last_checked = now;
                    if record.lives == 0 {
                        fired.push(host.clone());
                    }
                }
            }
        }
        for host in fired {
            on_interrupt(&host);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chirp::Manager;
    use crate::chirp::ServiceIdentifier as Sid;
    use std::net::Ipv4Addr;
    use std::sync::mpsc;

    #[test]
    fn error_state_fires_interrupt_immediately() {
        let consumer = Manager::new("watchdog-test", "consumer", Some(Ipv4Addr::LOCALHOST)).unwrap();
        let (tx, rx) = mpsc::channel::<String>();
        let _watchdog = Watchdog::spawn(consumer.listener(), DEFAULT_LIVES, Arc::new(move |host: &str| {
            let _ = tx.send(host.to_string());
        }));

        // Stand in for a producer: a bare TCP listener advertised as
        // HEARTBEAT that pushes one ERROR-state message.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let producer = Manager::new("watchdog-test", "producer", Some(Ipv4Addr::LOCALHOST)).unwrap();
        producer.register_service(Sid::Heartbeat, port).unwrap();
        producer.listener().register_request_callback(move |requested, socket| {
            if requested == Sid::Any || requested == Sid::Heartbeat {
                let msg = crate::chirp::ChirpMessage {
                    group_name: "watchdog-test".into(),
                    host_name: "producer".into(),
                    msg_type: crate::chirp::message::MessageType::Offer,
                    service_id: Sid::Heartbeat,
                    port,
                };
                let _ = socket.send(&msg.encode());
            }
        });
        consumer.send_request(Sid::Any).unwrap();

        let (stream, _) = listener.accept().unwrap();
        let mut server = crate::net::MultipartStream::new(stream).unwrap();
        let msg = HeartbeatMessage::new("producer", State::Error, Duration::from_millis(200));
        server.send_multipart(&[msg.encode()]).unwrap();

        let host = rx.recv_timeout(Duration::from_secs(2)).expect("expected an interrupt");
        assert_eq!(host, "producer");
    }
}
