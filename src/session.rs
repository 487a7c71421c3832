//! Fields common to both protocol sessions: peer metadata, the closed flag,
//! and the session log. `Pop3Session`/`SmtpSession` embed this rather than
//! inheriting from it: POP3 and SMTP are instantiations of a shared shape,
//! not subclasses of one base type.

#[derive(Debug, Clone)]
pub struct SessionCore {
    pub peer: String,
    pub closed: bool,
    pub log: String,
    /// Negotiated TLS protocol version name, e.g. `"TLSv1_3"`. `None` for a
    /// plaintext connection, or a TLS one before the handshake completes.
    pub tls_protocol: Option<String>,
    /// Negotiated cipher suite name. `None` under the same conditions.
    pub tls_cipher_suite: Option<String>,
}

impl SessionCore {
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            closed: false,
            log: String::new(),
            tls_protocol: None,
            tls_cipher_suite: None,
        }
    }

    pub fn close(&mut self) {
        self.closed = true;
    }
}
