//! The CSCP command receiver: one worker thread per connected controller,
//! each running the same dispatch order (transition verbs, then standard
//! verbs, then user commands, then `UNKNOWN`) on every REQUEST it reads.

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::chirp::{Manager as ChirpManager, ServiceIdentifier};
use crate::codec;
use crate::config::Configuration;
use crate::dictionary::Dictionary;
use crate::fsm::{Fsm, FsmError, State};
use crate::net::MultipartStream;
use crate::user_command::{UserCommandError, UserCommandRegistry};

use super::message::{CscpHeader, CscpMessage, MessageType};

const ACCEPT_POLL: Duration = Duration::from_millis(100);
const RECV_POLL: Duration = Duration::from_millis(100);

/// States a satellite may be shut down from, per the explicit enumeration
/// in the spec: `NEW`, `INIT`, `SAFE`. Every other state, including
/// `ORBIT` and `ERROR`, replies `INVALID`.
fn shutdown_allowed(state: State) -> bool {
    matches!(state, State::New | State::Init | State::Safe)
}

struct Context {
    canonical_name: String,
    version: &'static str,
    fsm: Arc<Fsm>,
    commands: Arc<UserCommandRegistry>,
    config: Arc<Mutex<Configuration>>,
    run_identifier: Arc<Mutex<String>>,
    shutdown: Arc<dyn Fn() + Send + Sync>,
}

impl Context {
    fn reply(&self, msg_type: MessageType, verb: impl Into<String>, payload: Vec<u8>) -> CscpMessage {
        CscpMessage::new(CscpHeader::new(self.canonical_name.clone(), msg_type, verb)).with_payload(payload)
    }
}

/// Owns the listening socket, its accept thread, and one connection thread
/// per connected controller. Dropping it stops every thread and
/// unregisters the `CONTROL` service.
pub struct Dispatcher {
    stop: Arc<AtomicBool>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
    connection_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        manager: &ChirpManager,
        fsm: Arc<Fsm>,
        canonical_name: impl Into<String>,
        version: &'static str,
        commands: Arc<UserCommandRegistry>,
        config: Arc<Mutex<Configuration>>,
        run_identifier: Arc<Mutex<String>>,
        shutdown: Arc<dyn Fn() + Send + Sync>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind("0.0.0.0:0")?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        manager
            .register_service(ServiceIdentifier::Control, port)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::AddrInUse, e.to_string()))?;

        let ctx = Arc::new(Context {
            canonical_name: canonical_name.into(),
            version,
            fsm,
            commands,
            config,
            run_identifier,
            shutdown,
        });
        let stop = Arc::new(AtomicBool::new(false));
        let connection_handles = Arc::new(Mutex::new(Vec::new()));

        let accept_stop = Arc::clone(&stop);
        let accept_ctx = Arc::clone(&ctx);
        let accept_connections = Arc::clone(&connection_handles);
        let accept_handle = thread::spawn(move || accept_loop(listener, accept_ctx, accept_stop, accept_connections));

        Ok(Dispatcher {
            stop,
            accept_handle: Mutex::new(Some(accept_handle)),
            connection_handles,
        })
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.accept_handle.lock().unwrap().take() {
            let _ = h.join();
        }
        for h in self.connection_handles.lock().unwrap().drain(..) {
            let _ = h.join();
        }
    }
}

fn accept_loop(listener: TcpListener, ctx: Arc<Context>, stop: Arc<AtomicBool>, handles: Arc<Mutex<Vec<JoinHandle<()>>>>) {
    while !stop.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                stream.set_nonblocking(false).ok();
                let conn_ctx = Arc::clone(&ctx);
                let conn_stop = Arc::clone(&stop);
                let handle = thread::spawn(move || connection_loop(stream, conn_ctx, conn_stop));
                handles.lock().unwrap().push(handle);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(_) => thread::sleep(ACCEPT_POLL),
        }
    }
}

fn connection_loop(stream: TcpStream, ctx: Arc<Context>, stop: Arc<AtomicBool>) {
    let mut conn = match MultipartStream::new(stream) {
        Ok(c) => c,
        Err(_) => return,
    };
    while !stop.load(Ordering::Relaxed) {
        match conn.recv_multipart(RECV_POLL) {
            Ok(Some(parts)) => {
                let reply = match CscpMessage::from_multipart(parts) {
                    Ok(message) => handle_message(&ctx, message),
                    Err(e) => ctx.reply(MessageType::Error, format!("malformed CSCP message: {e}"), Vec::new()),
                };
                if conn.send_multipart(&reply.into_multipart()).is_err() {
                    return;
                }
            }
            Ok(None) => continue,
            Err(_) => return,
        }
    }
}

fn handle_message(ctx: &Context, message: CscpMessage) -> CscpMessage {
    if message.header.msg_type != MessageType::Request {
        log::warn!("received CSCP message via control socket that is not REQUEST type - ignoring");
        return ctx.reply(MessageType::Error, "can only handle CSCP messages with REQUEST type", Vec::new());
    }

    let command = message.header.verb.to_ascii_lowercase();
    log::debug!("received CSCP command \"{command}\" from {}", message.header.sender);

    if let Some(reply) = handle_transition(ctx, &command, &message) {
        return reply;
    }
    if let Some(reply) = handle_standard(ctx, &command) {
        return reply;
    }
    if let Some(reply) = handle_user_command(ctx, &command, &message) {
        return reply;
    }

    log::warn!("received unknown CSCP command \"{command}\"");
    ctx.reply(MessageType::Unknown, format!("command \"{command}\" is not known"), Vec::new())
}

fn handle_transition(ctx: &Context, command: &str, message: &CscpMessage) -> Option<CscpMessage> {
    let result: Result<(), FsmError> = match command {
        "initialize" => {
            let dict = match message.decode_dictionary_payload() {
                Ok(d) => d,
                Err(e) => return Some(ctx.reply(MessageType::Incomplete, format!("could not decode configuration payload: {e}"), Vec::new())),
            };
            let config = Configuration::new(dict);
            *ctx.config.lock().unwrap() = config.clone();
            ctx.fsm.initialize(config)
        }
        "launch" => ctx.fsm.launch(),
        "land" => ctx.fsm.land(),
        "reconfigure" => {
            let dict = match message.decode_dictionary_payload() {
                Ok(d) => d,
                Err(e) => return Some(ctx.reply(MessageType::Incomplete, format!("could not decode configuration payload: {e}"), Vec::new())),
            };
            ctx.fsm.reconfigure(Configuration::new(dict))
        }
        "start" => {
            if !message.has_payload() {
                return Some(ctx.reply(MessageType::Incomplete, "start requires a run identifier payload", Vec::new()));
            }
            let run_identifier = match codec::decode_value(&message.payload) {
                Ok(v) => v.to_string(),
                Err(e) => return Some(ctx.reply(MessageType::Incomplete, format!("could not decode run identifier: {e}"), Vec::new())),
            };
            *ctx.run_identifier.lock().unwrap() = run_identifier.clone();
            ctx.fsm.start(run_identifier)
        }
        "stop" => ctx.fsm.stop(),
        _ => return None,
    };
    Some(match result {
        Ok(()) => ctx.reply(MessageType::Success, format!("transitioning to {}", ctx.fsm.state()), Vec::new()),
        Err(FsmError::InvalidTransition { from, command }) => {
            ctx.reply(MessageType::Invalid, format!("'{command}' is not valid in state {from}"), Vec::new())
        }
        Err(FsmError::TransitionInProgress) => {
            ctx.reply(MessageType::Invalid, "a transition is already in progress", Vec::new())
        }
    })
}

fn handle_standard(ctx: &Context, command: &str) -> Option<CscpMessage> {
    match command {
        "get_name" => Some(ctx.reply(MessageType::Success, ctx.canonical_name.clone(), Vec::new())),
        "get_version" => Some(ctx.reply(MessageType::Success, ctx.version.to_string(), Vec::new())),
        "get_commands" => {
            let mut dict = Dictionary::new();
            dict.insert("initialize", "Initialize satellite (payload: config as a flat dictionary)");
            dict.insert("launch", "Launch satellite");
            dict.insert("land", "Land satellite");
            if ctx.fsm.reconfigure_supported() {
                dict.insert("reconfigure", "Reconfigure satellite (payload: partial config as a flat dictionary)");
            }
            dict.insert("start", "Start new run (payload: run identifier)");
            dict.insert("stop", "Stop run");
            dict.insert("shutdown", "Shutdown satellite");
            dict.insert("get_name", "Get canonical name of satellite");
            dict.insert("get_version", "Get Constellation version of satellite");
            dict.insert("get_commands", "Get commands supported by satellite (returned in payload)");
            dict.insert("get_state", "Get state of satellite");
            dict.insert("get_status", "Get status of satellite");
            dict.insert("get_config", "Get config of satellite (returned in payload as a flat dictionary)");
            dict.insert("get_run_id", "Get run identifier of the current or most recent run");
            for (name, description) in ctx.commands.command_summaries() {
                dict.insert(name, description);
            }
            Some(ctx.reply(MessageType::Success, "commands attached in payload", codec::encode_dictionary(&dict)))
        }
        "get_state" => Some(ctx.reply(MessageType::Success, ctx.fsm.state().to_string(), Vec::new())),
        "get_status" => Some(ctx.reply(MessageType::Success, ctx.fsm.status(), Vec::new())),
        "get_config" => {
            let dict = ctx.config.lock().unwrap().get_used();
            Some(ctx.reply(MessageType::Success, "configuration attached in payload", codec::encode_dictionary(&dict)))
        }
        "get_run_id" => Some(ctx.reply(MessageType::Success, ctx.run_identifier.lock().unwrap().clone(), Vec::new())),
        "shutdown" => {
            let state = ctx.fsm.state();
            if shutdown_allowed(state) {
                (ctx.shutdown)();
                Some(ctx.reply(MessageType::Success, "shutting down satellite", Vec::new()))
            } else {
                Some(ctx.reply(MessageType::Invalid, format!("satellite cannot be shut down from current state {state}"), Vec::new()))
            }
        }
        _ => None,
    }
}

fn handle_user_command(ctx: &Context, command: &str, message: &CscpMessage) -> Option<CscpMessage> {
    if !ctx.commands.contains(command) {
        return None;
    }
    let args = match message.decode_list_payload() {
        Ok(args) => args,
        Err(e) => return Some(ctx.reply(MessageType::Incomplete, format!("could not convert command payload to argument list: {e}"), Vec::new())),
    };
    Some(match ctx.commands.call(ctx.fsm.state(), command, &args) {
        Ok(value) => {
            let payload = if value.is_none() { Vec::new() } else { codec::encode_value(&value) };
            ctx.reply(MessageType::Success, String::new(), payload)
        }
        Err(UserCommandError::UnknownUserCommand) => {
            ctx.reply(MessageType::Unknown, format!("command \"{command}\" is not known"), Vec::new())
        }
        Err(e @ UserCommandError::InvalidUserCommand { .. }) => ctx.reply(MessageType::Invalid, e.to_string(), Vec::new()),
        Err(e) => ctx.reply(MessageType::Incomplete, e.to_string(), Vec::new()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chirp::Manager as ChirpManager;
    use crate::config::Configuration;
    use crate::dictionary::Dictionary;
    use crate::fsm::{Fsm, HookResult, SatelliteHooks};
    use crate::user_command::{UserCommand, UserCommandRegistry};
    use crate::value::Value;
    use std::net::Ipv4Addr;

    struct Noop;
    impl SatelliteHooks for Noop {
        fn initializing(&self, _config: &Configuration) -> HookResult {
            Ok(())
        }
    }

    fn spawn_dispatcher(group: &str) -> (ChirpManager, Dispatcher, u16) {
        let manager = ChirpManager::new(group, "sat1", Some(Ipv4Addr::LOCALHOST)).unwrap();
        let fsm = Fsm::new(Arc::new(Noop));
        let mut registry = UserCommandRegistry::new();
        registry.add(
            "ping",
            UserCommand::new("Replies pong", 0, None, |_args| Ok(Value::Text("pong".into()))),
        );
        let dispatcher = Dispatcher::spawn(
            &manager,
            fsm,
            "sat1",
            "0.0.0-test",
            Arc::new(registry),
            Arc::new(Mutex::new(Configuration::empty())),
            Arc::new(Mutex::new(String::new())),
            Arc::new(|| {}),
        )
        .unwrap();
        let services = manager.registered_services();
        let port = services.iter().find(|(id, _)| *id == ServiceIdentifier::Control).unwrap().1;
        (manager, dispatcher, port)
    }

    fn request(conn: &mut MultipartStream, verb: &str, payload: Vec<u8>) -> CscpMessage {
        let req = CscpMessage::new(CscpHeader::new("ctrl", MessageType::Request, verb)).with_payload(payload);
        conn.send_multipart(&req.into_multipart()).unwrap();
        let parts = conn.recv_multipart(Duration::from_secs(2)).unwrap().expect("expected a reply");
        CscpMessage::from_multipart(parts).unwrap()
    }

    #[test]
    fn get_name_replies_with_canonical_name() {
        let (_manager, _dispatcher, port) = spawn_dispatcher("cscp-name");
        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let mut conn = MultipartStream::new(stream).unwrap();
        let reply = request(&mut conn, "get_name", Vec::new());
        assert_eq!(reply.header.msg_type, MessageType::Success);
        assert_eq!(reply.header.verb, "sat1");
    }

    #[test]
    fn transition_invalid_from_current_state_is_reported() {
        let (_manager, _dispatcher, port) = spawn_dispatcher("cscp-invalid");
        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let mut conn = MultipartStream::new(stream).unwrap();
        let reply = request(&mut conn, "launch", Vec::new());
        assert_eq!(reply.header.msg_type, MessageType::Invalid);
    }

    #[test]
    fn user_command_is_dispatched() {
        let (_manager, _dispatcher, port) = spawn_dispatcher("cscp-user");
        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let mut conn = MultipartStream::new(stream).unwrap();
        let reply = request(&mut conn, "ping", Vec::new());
        assert_eq!(reply.header.msg_type, MessageType::Success);
        let value = codec::decode_value(&reply.payload).unwrap();
        assert_eq!(value, Value::Text("pong".into()));
    }

    #[test]
    fn unknown_command_replies_unknown() {
        let (_manager, _dispatcher, port) = spawn_dispatcher("cscp-unknown");
        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let mut conn = MultipartStream::new(stream).unwrap();
        let reply = request(&mut conn, "does_not_exist", Vec::new());
        assert_eq!(reply.header.msg_type, MessageType::Unknown);
    }
}
