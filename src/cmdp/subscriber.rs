//! The CMDP subscriber: a controller-side consumer of `LOG`/`STAT` topics
//! from every discovered `MONITORING` peer.

use std::sync::Arc;

use crate::chirp::{Listener as ChirpListener, ServiceIdentifier};
use crate::level::Level;
use crate::subscriber_pool::Pool;

use super::message::{log_topic, stat_topic, CmdpMessage};

pub type RecordCallback = Arc<dyn Fn(&str, CmdpMessage) + Send + Sync>;

/// Owns one connection per discovered `MONITORING` peer and the topic
/// subscriptions applied to them; every matching record is handed to
/// `on_record` as it arrives.
pub struct Subscriber {
    pool: Pool<CmdpMessage>,
}

impl Subscriber {
    pub fn spawn(listener: &ChirpListener, on_record: RecordCallback) -> Self {
        let pool = Pool::new(
            ServiceIdentifier::Monitoring,
            |parts| CmdpMessage::from_multipart(parts).ok(),
            move |host: &str, msg: CmdpMessage| on_record(host, msg),
        );
        pool.attach(listener);
        Subscriber { pool }
    }

    /// Subscribes to every peer's log records at `level` and above, across
    /// every logger.
    pub fn subscribe_log_level(&self, level: Level) {
        self.pool.subscribe(&log_topic(level, None));
    }

    pub fn unsubscribe_log_level(&self, level: Level) {
        self.pool.unsubscribe(&log_topic(level, None));
    }

    /// Subscribes to one logger's records at `level` and above.
    pub fn subscribe_log_topic(&self, level: Level, logger: &str) {
        self.pool.subscribe(&log_topic(level, Some(logger)));
    }

    pub fn unsubscribe_log_topic(&self, level: Level, logger: &str) {
        self.pool.unsubscribe(&log_topic(level, Some(logger)));
    }

    pub fn subscribe_stat(&self, name: &str) {
        self.pool.subscribe(&stat_topic(name));
    }

    pub fn unsubscribe_stat(&self, name: &str) {
        self.pool.unsubscribe(&stat_topic(name));
    }

    pub fn connected_hosts(&self) -> Vec<String> {
        self.pool.connected_hosts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chirp::{ChirpMessage, Manager};
    use crate::net::MultipartStream;
    use std::net::{Ipv4Addr, TcpListener};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn subscribing_sends_control_frame_and_delivers_matching_record() {
        let consumer = Manager::new("cmdp-sub-test", "consumer", Some(Ipv4Addr::LOCALHOST)).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let producer = Manager::new("cmdp-sub-test", "producer", Some(Ipv4Addr::LOCALHOST)).unwrap();
        producer.register_service(ServiceIdentifier::Monitoring, port).unwrap();
        producer.listener().register_request_callback(move |requested, socket| {
            if requested == ServiceIdentifier::Any || requested == ServiceIdentifier::Monitoring {
                let msg = ChirpMessage {
                    group_name: "cmdp-sub-test".into(),
                    host_name: "producer".into(),
                    msg_type: crate::chirp::message::MessageType::Offer,
                    service_id: ServiceIdentifier::Monitoring,
                    port,
                };
                let _ = socket.send(&msg.encode());
            }
        });

        let (tx, rx) = mpsc::channel::<CmdpMessage>();
        let subscriber = Subscriber::spawn(
            consumer.listener(),
            Arc::new(move |_host, msg| {
                let _ = tx.send(msg);
            }),
        );
        subscriber.subscribe_log_level(Level::Info);
        consumer.send_request(ServiceIdentifier::Monitoring).unwrap();

        let (stream, _addr) = listener.accept().unwrap();
        let mut server = MultipartStream::new(stream).unwrap();
        let control = server.recv_multipart(Duration::from_secs(2)).unwrap().expect("expected subscribe frame");
        assert_eq!(control[0], vec![0x01]);
        assert_eq!(control[1], b"LOG/INFO".to_vec());

        server
            .send_multipart(&CmdpMessage::new("LOG/INFO/FSM", "producer", "hello").into_multipart())
            .unwrap();

        let received = rx.recv_timeout(Duration::from_secs(2)).expect("expected a delivered record");
        assert_eq!(received.topic, "LOG/INFO/FSM");
        assert_eq!(received.payload, crate::value::Value::Text("hello".into()));

        thread::sleep(Duration::from_millis(50));
        assert!(subscriber.connected_hosts().contains(&"producer".to_string()));
    }
}
