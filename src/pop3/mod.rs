//! POP3 server (RFC 1939 + RFC 1734 AUTH + RFC 2449 CAPA).

mod command;
mod session;

pub use command::{Pop3Command, Pop3Parser};
pub use session::{Clock, Pop3Session, Pop3State, SystemClock};

use crate::client::Client;
use crate::error::MailResult;
use crate::sasl::AuthenticatorRegistry;
use crate::server::{join_with_timeout, CommandRegistry, SessionHistory, StopSignal};
use crate::store::MailboxStore;
use crate::tls::{ServerSocketFactory, Stream};
use log::{debug, info, warn};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

pub struct Pop3Server {
    store: Arc<MailboxStore>,
    registry: CommandRegistry<Pop3Parser>,
    auth_registry: AuthenticatorRegistry,
    auth_types: RwLock<Vec<String>>,
    port: AtomicU16,
    use_ssl: AtomicBool,
    ssl_protocol: RwLock<String>,
    bound_port: RwLock<Option<u16>>,
    hostname: String,
    history: SessionHistory<Pop3Session>,
    stop: StopSignal,
    worker: Mutex<Option<JoinHandle<()>>>,
    clock: RwLock<Arc<dyn Clock>>,
}

impl Pop3Server {
    pub fn new(store: Arc<MailboxStore>) -> Arc<Self> {
        let registry = CommandRegistry::new();
        registry.add("CAPA", command::parse_capa);
        registry.add("USER", command::parse_user);
        registry.add("PASS", command::parse_pass);
        registry.add("APOP", command::parse_apop);
        registry.add("AUTH", command::parse_auth);
        registry.add("STAT", command::parse_stat);
        registry.add("LIST", command::parse_list);
        registry.add("UIDL", command::parse_uidl);
        registry.add("RETR", command::parse_retr);
        registry.add("DELE", command::parse_dele);
        registry.add("TOP", command::parse_top);
        registry.add("NOOP", command::parse_noop);
        registry.add("RSET", command::parse_rset);
        registry.add("QUIT", command::parse_quit);

        Arc::new(Self {
            store,
            registry,
            auth_registry: AuthenticatorRegistry::standard(),
            auth_types: RwLock::new(vec!["PLAIN".to_string(), "LOGIN".to_string()]),
            port: AtomicU16::new(0),
            use_ssl: AtomicBool::new(false),
            ssl_protocol: RwLock::new(String::new()),
            bound_port: RwLock::new(None),
            hostname: "localhost".to_string(),
            history: SessionHistory::new(),
            stop: StopSignal::new(),
            worker: Mutex::new(None),
            clock: RwLock::new(Arc::new(SystemClock)),
        })
    }

    pub fn store(&self) -> &MailboxStore {
        &self.store
    }

    /// Overrides the APOP banner timestamp's time source, e.g. to pin it for
    /// a deterministic test assertion instead of the wall clock.
    pub fn set_clock(&self, clock: Arc<dyn Clock>) {
        *self.clock.write().unwrap() = clock;
    }

    pub fn auth_registry(&self) -> &AuthenticatorRegistry {
        &self.auth_registry
    }

    pub fn set_port(&self, port: u16) {
        self.port.store(port, Ordering::SeqCst);
    }

    pub fn set_use_ssl(&self, use_ssl: bool) {
        self.use_ssl.store(use_ssl, Ordering::SeqCst);
    }

    /// Restricts a TLS listener to the named protocol (e.g. `"TLSv1.3"`);
    /// unrecognized names leave rustls's default version set in place.
    pub fn set_ssl_protocol(&self, protocol: &str) {
        *self.ssl_protocol.write().unwrap() = protocol.to_string();
    }

    pub fn set_auth_types(&self, types: &[&str]) {
        *self.auth_types.write().unwrap() = types.iter().map(|s| s.to_string()).collect();
    }

    pub fn set_command_enabled(&self, verb: &str, enabled: bool) {
        self.registry.set_enabled(verb, enabled);
    }

    pub fn add_command(&self, verb: &str, parser: Pop3Parser) {
        self.registry.add(verb, parser);
    }

    pub fn mechanism_enabled(&self, name: &str) -> bool {
        self.auth_types
            .read()
            .unwrap()
            .iter()
            .any(|m| m.eq_ignore_ascii_case(name))
    }

    pub fn enabled_mechanism_names(&self) -> Vec<String> {
        self.auth_types.read().unwrap().clone()
    }

    pub fn port(&self) -> Option<u16> {
        *self.bound_port.read().unwrap()
    }

    pub fn active_session(&self) -> Option<Pop3Session> {
        self.history.active()
    }

    pub fn sessions(&self) -> Vec<Pop3Session> {
        self.history.sessions()
    }

    /// Captured `C:`/`S:` transcript of the active connection, or the most
    /// recently finished one once the connection has ended.
    pub fn log(&self) -> String {
        match self.history.active() {
            Some(s) => s.core.log,
            None => self.history.sessions().last().map(|s| s.core.log.clone()).unwrap_or_default(),
        }
    }

    /// Username bound by USER/PASS, APOP, or AUTH on the active connection,
    /// or the most recently finished one once the connection has ended.
    pub fn authenticated_username(&self) -> Option<String> {
        match self.history.active() {
            Some(s) => s.username,
            None => self.history.sessions().last().and_then(|s| s.username.clone()),
        }
    }

    /// Binds the listener and launches the single worker thread.
    pub fn start(self: &Arc<Self>) -> MailResult<()> {
        let factory = if self.use_ssl.load(Ordering::SeqCst) {
            ServerSocketFactory::tls(&self.ssl_protocol.read().unwrap())?
        } else {
            ServerSocketFactory::plain()
        };
        let listener = factory.bind(self.port.load(Ordering::SeqCst))?;
        let bound = listener.local_addr()?.port();
        *self.bound_port.write().unwrap() = Some(bound);
        info!("pop3 server listening on 127.0.0.1:{bound}");

        let server = Arc::clone(self);
        let handle = std::thread::spawn(move || server.run(listener, factory));
        *self.worker.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Signals the worker to stop and closes the listener to unblock a
    /// pending `accept`, then joins the worker thread with a 5-second bound
    /// so a worker stuck on a client read can't hang the caller forever.
    pub fn stop(&self) {
        self.stop.signal();
        if let Some(port) = self.port() {
            let _ = std::net::TcpStream::connect(("127.0.0.1", port));
            info!("pop3 server stopping on 127.0.0.1:{port}");
        } else {
            info!("pop3 server stopping");
        }
        if let Some(handle) = self.worker.lock().unwrap().take() {
            join_with_timeout(handle, "pop3");
        }
    }

    fn run(self: Arc<Self>, listener: TcpListener, factory: ServerSocketFactory) {
        for incoming in listener.incoming() {
            if self.stop.is_set() {
                break;
            }
            let tcp = match incoming {
                Ok(tcp) => tcp,
                Err(e) => {
                    warn!("pop3 accept failed: {e}");
                    continue;
                }
            };
            let peer = tcp
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            debug!("pop3 connection accepted from {peer}");
            let stream = match factory.wrap(tcp) {
                Ok(s) => s,
                Err(e) => {
                    warn!("pop3 TLS setup failed: {e}");
                    continue;
                }
            };
            self.handle_connection(stream, peer);
        }
    }

    fn handle_connection(&self, stream: Stream, peer: String) {
        let clock = Arc::clone(&*self.clock.read().unwrap());
        let timestamp = session::generate_timestamp(&self.hostname, clock.as_ref());
        let mut session = Pop3Session::new(peer, timestamp.clone());
        let mut client = Client::new(stream);

        self.history.set_active(session.clone());
        if client.write_line(&format!("+OK POP3 server ready {timestamp}")).is_err() {
            self.history.finish_active();
            return;
        }
        if let Some((protocol, cipher)) = client.tls_info() {
            session.core.tls_protocol = Some(protocol);
            session.core.tls_cipher_suite = Some(cipher);
        }

        loop {
            let line = match client.read_line() {
                Ok(Some(l)) => l,
                Ok(None) => break,
                Err(e) => {
                    warn!("pop3 read error: {e}");
                    break;
                }
            };
            if self.dispatch(&line, &mut session, &mut client).is_err() {
                break;
            }
            session.core.log = client.log().to_string();
            self.history.update_active(session.clone());
            if session.core.closed {
                break;
            }
        }
        session.close();
        session.core.log = client.log().to_string();
        self.history.update_active(session);
        self.history.finish_active();
    }

    /// Parses and executes one line. A parse/state/auth/not-found error is
    /// written back as `-ERR <message>`; an I/O error propagates (and ends
    /// the connection).
    fn dispatch(&self, line: &str, session: &mut Pop3Session, client: &mut Client<Stream>) -> MailResult<()> {
        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let verb = verb.to_ascii_uppercase();
        if verb.is_empty() {
            return client.write_line("-ERR unknown command");
        }
        match self.registry.lookup(&verb) {
            None => client.write_line("-ERR unknown command"),
            Some((false, _)) => client.write_line("-ERR command disabled"),
            Some((true, parser)) => match parser(rest) {
                Ok(command) => {
                    session.record(command.clone());
                    match command.execute(self, session, client) {
                        Ok(()) => Ok(()),
                        Err(crate::error::MailError::Io(e)) => Err(crate::error::MailError::Io(e)),
                        Err(e) => client.write_line(&format!("-ERR {e}")),
                    }
                }
                Err(e) => client.write_line(&format!("-ERR {e}")),
            },
        }
    }
}
