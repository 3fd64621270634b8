//! The satellite façade: wires the FSM, CHIRP discovery, and every wire
//! protocol (CSCP, CHP, CDTP, CMDP) into one running satellite process
//!. A satellite that also pushes measurement data opens
//! its own [`crate::cdtp::Sender`] separately; this façade only owns the
//! protocols every satellite runs regardless of data path.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::chirp::Manager as ChirpManager;
use crate::chp::{self, Watchdog};
use crate::cmdp;
use crate::config::Configuration;
use crate::cscp;
use crate::fsm::{Fsm, SatelliteHooks, State};
use crate::user_command::UserCommandRegistry;

#[cfg(feature = "logging")]
use crate::level::Level;
#[cfg(feature = "logging")]
use crate::sink::CmdpSink;

/// A fully wired satellite process: discoverable, commandable, monitored,
/// and driven by its own lifecycle FSM.
pub struct Satellite {
    fsm: Arc<Fsm>,
    chirp: ChirpManager,
    config: Arc<Mutex<Configuration>>,
    run_identifier: Arc<Mutex<String>>,
    shutdown_requested: Arc<AtomicBool>,
    heartbeat: chp::Sender,
    watchdog: Watchdog,
    dispatcher: cscp::Dispatcher,
    cmdp_publisher: Arc<cmdp::Publisher>,
}

impl Satellite {
    /// Starts CHIRP discovery, registers `HEARTBEAT`, `MONITORING`, and
    /// `CONTROL`, and begins serving CSCP commands. `version` should be a
    /// `'static` build version string, not the Constellation protocol
    /// version (which is fixed per-protocol, see each module's
    /// `PROTOCOL_ID`).
    pub fn launch(
        group: impl Into<String>,
        canonical_name: impl Into<String>,
        version: &'static str,
        interface: Option<Ipv4Addr>,
        hooks: Arc<dyn SatelliteHooks>,
        commands: UserCommandRegistry,
    ) -> std::io::Result<Arc<Self>> {
        let canonical_name = canonical_name.into();
        let chirp = ChirpManager::new(group, canonical_name.clone(), interface)?;
        let fsm = Fsm::new(hooks);
        let config = Arc::new(Mutex::new(Configuration::empty()));
        let run_identifier = Arc::new(Mutex::new(String::new()));
        let commands = Arc::new(commands);

        let heartbeat = chp::Sender::spawn(&chirp, &fsm, canonical_name.clone(), chp::DEFAULT_INTERVAL)?;

        let watchdog_fsm = Arc::clone(&fsm);
        let watchdog = Watchdog::spawn(
            chirp.listener(),
            chp::DEFAULT_LIVES,
            Arc::new(move |_host: &str| {
                let _ = watchdog_fsm.interrupt();
            }),
        );

        let cmdp_publisher = Arc::new(cmdp::Publisher::spawn(&chirp)?);
        cmdp_publisher.set_sender_name(canonical_name.clone());

        #[cfg(feature = "logging")]
        {
            let _ = CmdpSink::install(Level::Info, Arc::clone(&cmdp_publisher));
        }

        let shutdown_requested = Arc::new(AtomicBool::new(false));
        let dispatcher_shutdown = Arc::clone(&shutdown_requested);
        let dispatcher = cscp::Dispatcher::spawn(
            &chirp,
            Arc::clone(&fsm),
            canonical_name,
            version,
            Arc::clone(&commands),
            Arc::clone(&config),
            Arc::clone(&run_identifier),
            Arc::new(move || dispatcher_shutdown.store(true, Ordering::Relaxed)),
        )?;

        Ok(Arc::new(Satellite {
            fsm,
            chirp,
            config,
            run_identifier,
            shutdown_requested,
            heartbeat,
            watchdog,
            dispatcher,
            cmdp_publisher,
        }))
    }

    pub fn state(&self) -> State {
        self.fsm.state()
    }

    pub fn config(&self) -> Configuration {
        self.config.lock().unwrap().clone()
    }

    pub fn run_identifier(&self) -> String {
        self.run_identifier.lock().unwrap().clone()
    }

    /// Set once a `shutdown` CSCP command has been accepted; a process's
    /// own main loop should poll this and exit once true.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Relaxed)
    }

    pub fn connected_controller_count(&self) -> usize {
        self.heartbeat.connected_client_count()
    }

    pub fn connected_monitoring_hosts(&self) -> Vec<String> {
        self.watchdog.connected_hosts()
    }

    pub fn fsm(&self) -> &Arc<Fsm> {
        &self.fsm
    }

    pub fn chirp(&self) -> &ChirpManager {
        &self.chirp
    }

    pub fn cmdp_publisher(&self) -> &Arc<cmdp::Publisher> {
        &self.cmdp_publisher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cscp::{CscpHeader, CscpMessage, MessageType};
    use crate::net::MultipartStream;
    use crate::chirp::ServiceIdentifier;
    use std::net::TcpStream;
    use std::time::Duration;

    struct Noop;
    impl SatelliteHooks for Noop {
        fn initializing(&self, _config: &Configuration) -> crate::fsm::HookResult {
            Ok(())
        }
    }

    #[test]
    fn launched_satellite_answers_get_name_over_cscp() {
        let satellite = Satellite::launch(
            "satellite-test",
            "sat1",
            "0.0.0-test",
            Some(Ipv4Addr::LOCALHOST),
            Arc::new(Noop),
            UserCommandRegistry::new(),
        )
        .unwrap();

        let services = satellite.chirp().registered_services();
        let port = services.iter().find(|(id, _)| *id == ServiceIdentifier::Control).unwrap().1;
        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let mut conn = MultipartStream::new(stream).unwrap();

        let req = CscpMessage::new(CscpHeader::new("ctrl", MessageType::Request, "get_name"));
        conn.send_multipart(&req.into_multipart()).unwrap();
        let reply_parts = conn.recv_multipart(Duration::from_secs(2)).unwrap().expect("expected a reply");
        let reply = CscpMessage::from_multipart(reply_parts).unwrap();
        assert_eq!(reply.header.msg_type, MessageType::Success);
        assert_eq!(reply.header.verb, "sat1");
        assert_eq!(satellite.state(), State::New);
        assert!(!satellite.shutdown_requested());
    }
}
