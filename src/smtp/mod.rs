//! SMTP server (RFC 5321 + RFC 4954 SASL).

mod command;
mod session;

pub use command::{SmtpCommand, SmtpParser};
pub use session::SmtpSession;

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

pub struct SmtpServer {
    store: Arc<MailboxStore>,
    registry: CommandRegistry<SmtpParser>,
    auth_registry: AuthenticatorRegistry,
    auth_types: RwLock<Vec<String>>,
    authentication_required: AtomicBool,
    port: AtomicU16,
    use_ssl: AtomicBool,
    ssl_protocol: RwLock<String>,
    bound_port: RwLock<Option<u16>>,
    hostname: String,
    history: SessionHistory<SmtpSession>,
    stop: StopSignal,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SmtpServer {
    pub fn new(store: Arc<MailboxStore>) -> Arc<Self> {
        let registry = CommandRegistry::new();
        registry.add("HELO", command::parse_helo);
        registry.add("EHLO", command::parse_ehlo);
        registry.add("MAIL", command::parse_mail_from);
        registry.add("RCPT", command::parse_rcpt_to);
        registry.add("DATA", command::parse_data);
        registry.add("RSET", command::parse_rset);
        registry.add("NOOP", command::parse_noop);
        registry.add("VRFY", command::parse_vrfy);
        registry.add("QUIT", command::parse_quit);
        registry.add("STARTTLS", command::parse_starttls);
        registry.add("AUTH", command::parse_auth);

        Arc::new(Self {
            store,
            registry,
            auth_registry: AuthenticatorRegistry::standard(),
            auth_types: RwLock::new(vec!["PLAIN".to_string(), "LOGIN".to_string()]),
            authentication_required: AtomicBool::new(false),
            port: AtomicU16::new(0),
            use_ssl: AtomicBool::new(false),
            ssl_protocol: RwLock::new(String::new()),
            bound_port: RwLock::new(None),
            hostname: "localhost".to_string(),
            history: SessionHistory::new(),
            stop: StopSignal::new(),
            worker: Mutex::new(None),
        })
    }

    pub fn store(&self) -> &MailboxStore {
        &self.store
    }

    pub fn auth_registry(&self) -> &AuthenticatorRegistry {
        &self.auth_registry
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
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

    pub fn set_authentication_required(&self, required: bool) {
        self.authentication_required.store(required, Ordering::SeqCst);
    }

    pub fn authentication_required(&self) -> bool {
        self.authentication_required.load(Ordering::SeqCst)
    }

    pub fn set_auth_types(&self, types: &[&str]) {
        *self.auth_types.write().unwrap() = types.iter().map(|s| s.to_string()).collect();
    }

    pub fn set_command_enabled(&self, verb: &str, enabled: bool) {
        self.registry.set_enabled(verb, enabled);
    }

    pub fn add_command(&self, verb: &str, parser: SmtpParser) {
        self.registry.add(verb, parser);
    }

    pub fn mechanism_enabled(&self, name: &str) -> bool {
        self.auth_types
            .read()
            .unwrap()
            .iter()
            .any(|m| m.eq_ignore_ascii_case(name))
    }

    /// EHLO extension lines: STARTTLS (if the server is reachable over
    /// plaintext and TLS is configured) followed by `AUTH <mechanisms>` if
    /// any are enabled. Derived from enabled commands + configured auth
    /// types, per the design.
    pub fn extensions(&self) -> Vec<String> {
        let mut extensions = Vec::new();
        if self.registry.enabled_verbs().iter().any(|v| v == "STARTTLS") {
            extensions.push("STARTTLS".to_string());
        }
        let mechs = self.auth_types.read().unwrap();
        if !mechs.is_empty() {
            extensions.push(format!("AUTH {}", mechs.join(" ")));
        }
        extensions
    }

    pub fn port(&self) -> Option<u16> {
        *self.bound_port.read().unwrap()
    }

    pub fn active_session(&self) -> Option<SmtpSession> {
        self.history.active()
    }

    pub fn sessions(&self) -> Vec<SmtpSession> {
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

    /// Username bound by a successful AUTH on the active connection, or the
    /// most recently finished one once the connection has ended.
    pub fn authenticated_username(&self) -> Option<String> {
        match self.history.active() {
            Some(s) => s.auth_username,
            None => self.history.sessions().last().and_then(|s| s.auth_username.clone()),
        }
    }

    /// The last message accepted by a DATA transaction on the active
    /// connection, or the most recently finished one once it has ended.
    pub fn message(&self) -> Option<Vec<u8>> {
        match self.history.active() {
            Some(s) => s.last_message,
            None => self.history.sessions().last().and_then(|s| s.last_message.clone()),
        }
    }

    pub fn start(self: &Arc<Self>) -> MailResult<()> {
        let factory = if self.use_ssl.load(Ordering::SeqCst) {
            ServerSocketFactory::tls(&self.ssl_protocol.read().unwrap())?
        } else {
            ServerSocketFactory::plain()
        };
        let listener = factory.bind(self.port.load(Ordering::SeqCst))?;
        let bound = listener.local_addr()?.port();
        *self.bound_port.write().unwrap() = Some(bound);
        info!("smtp server listening on 127.0.0.1:{bound}");

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
            info!("smtp server stopping on 127.0.0.1:{port}");
        } else {
            info!("smtp server stopping");
        }
        if let Some(handle) = self.worker.lock().unwrap().take() {
            join_with_timeout(handle, "smtp");
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
                    warn!("smtp accept failed: {e}");
                    continue;
                }
            };
            let peer = tcp
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            debug!("smtp connection accepted from {peer}");
            let stream = match factory.wrap(tcp) {
                Ok(s) => s,
                Err(e) => {
                    warn!("smtp TLS setup failed: {e}");
                    continue;
                }
            };
            self.handle_connection(stream, peer);
        }
    }

    fn handle_connection(&self, stream: Stream, peer: String) {
        let mut session = SmtpSession::new(peer);
        let mut client = Client::new(stream);

        self.history.set_active(session.clone());
        if client.write_line(&format!("220 {} Service ready", self.hostname)).is_err() {
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
                    warn!("smtp read error: {e}");
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

    fn dispatch(&self, line: &str, session: &mut SmtpSession, client: &mut Client<Stream>) -> MailResult<()> {
        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let verb = verb.to_ascii_uppercase();
        if verb.is_empty() {
            return client.write_line("500 5.5.2 Syntax error, command unrecognized");
        }
        match self.registry.lookup(&verb) {
            None => client.write_line("500 5.5.2 Syntax error, command unrecognized"),
            Some((false, _)) => client.write_line("502 5.5.1 Command not implemented"),
            Some((true, parser)) => match parser(rest) {
                Ok(command) => {
                    session.record(command.clone());
                    match command.execute(self, session, client) {
                        Ok(()) => Ok(()),
                        Err(crate::error::MailError::Io(e)) => Err(crate::error::MailError::Io(e)),
                        Err(e) => client.write_line(&format!("501 5.5.4 {e}")),
                    }
                }
                Err(e) => client.write_line(&format!("501 5.5.4 {e}")),
            },
        }
    }
}
