//! SMTP session state: the envelope under construction and whether the
//! connection has authenticated. There is no AUTHORIZATION/TRANSACTION
//! enum like POP3's; SMTP's state lives in which envelope fields are set
//! (RFC 5321 §3.3 treats MAIL/RCPT/DATA as an implicit mini state machine).

use super::command::SmtpCommand;
use crate::session::SessionCore;

#[derive(Clone)]
pub struct SmtpSession {
    pub core: SessionCore,
    pub greeted_host: Option<String>,
    pub authenticated: bool,
    pub auth_username: Option<String>,
    pub sender: Option<String>,
    pub recipients: Vec<String>,
    pub last_message: Option<Vec<u8>>,
    pub history: Vec<SmtpCommand>,
}

impl SmtpSession {
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            core: SessionCore::new(peer),
            greeted_host: None,
            authenticated: false,
            auth_username: None,
            sender: None,
            recipients: Vec::new(),
            last_message: None,
            history: Vec::new(),
        }
    }

    /// Whether the session still needs to authenticate before MAIL/RCPT/DATA
    /// are accepted. A plain read of session state, always callable (the
    /// resolved design decision: no separate "is auth configured" handshake
    /// needed before the first command runs).
    pub fn authentication_required(&self, server_requires_auth: bool) -> bool {
        server_requires_auth && !self.authenticated
    }

    pub fn in_transaction(&self) -> bool {
        self.sender.is_some()
    }

    /// Clears the envelope (MAIL/RCPT/DATA state) without dropping the
    /// greeting or auth state, matching RSET (RFC 5321 §4.1.1.5).
    pub fn end_transaction(&mut self) {
        self.sender = None;
        self.recipients.clear();
    }

    pub fn record(&mut self, command: SmtpCommand) {
        self.history.push(command);
    }

    pub fn close(&mut self) {
        self.core.close();
    }
}
