//! Pluggable SASL authentication: PLAIN, LOGIN, CRAM-MD5, DIGEST-MD5, XOAUTH2.
//!
//! Each `Authenticator` is a stateless strategy keyed by mechanism name. Given
//! the initial-response parameters (the remainder of `AUTH <mech>` after the
//! mechanism name), a channel back to the client, and the mailbox store, it
//! drives whatever challenge/response exchange the mechanism requires and
//! returns `Credentials` on success or `None` on a mechanism-level failure
//! (malformed base64, wrong line shape, bad digest). I/O failures propagate
//! as `MailError::Io` instead, since those terminate the connection rather
//! than just the AUTH attempt.

mod cram_md5;
mod digest_md5;
mod login;
mod mechanism;
mod plain;
mod xoauth2;

pub use mechanism::SaslMechanism;

use crate::error::MailResult;
use crate::store::MailboxStore;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
}

/// What an `Authenticator` needs from the transport: send a base64
/// continuation, read back a base64 response line. The protocol layer
/// decides how a continuation/response line is framed on the wire (SMTP
/// `334 <data>`, POP3 `+ <data>`); this trait only deals in raw bytes.
pub trait AuthChannel {
    fn write_continuation(&mut self, data_b64: &str) -> MailResult<()>;
    /// Returns `None` on EOF.
    fn read_response_line(&mut self) -> MailResult<Option<String>>;
}

pub trait Authenticator: Send + Sync {
    fn authenticate(
        &self,
        initial: Option<&str>,
        channel: &mut dyn AuthChannel,
        store: &MailboxStore,
    ) -> MailResult<Option<Credentials>>;
}

pub fn b64_decode(s: &str) -> Option<Vec<u8>> {
    STANDARD.decode(s.trim()).ok()
}

pub fn b64_encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Reads one more line from the channel, decoding it as base64. A bare `*`
/// line is SASL's "client cancelled" signal (RFC 4954 §4); treated as a
/// mechanism-level failure, not an I/O error.
fn read_b64_line(channel: &mut dyn AuthChannel) -> MailResult<Option<Vec<u8>>> {
    match channel.read_response_line()? {
        None => Ok(None),
        Some(line) if line.trim() == "*" => Ok(None),
        Some(line) => Ok(b64_decode(&line)),
    }
}

/// Registry of known mechanisms. A server additionally holds an *ordered*
/// list of enabled mechanism names: "supported" means the name is in that
/// list AND registered here.
pub struct AuthenticatorRegistry {
    mechanisms: HashMap<&'static str, Box<dyn Authenticator>>,
}

impl AuthenticatorRegistry {
    /// All five supported mechanisms, registered by default.
    pub fn standard() -> Self {
        let mut mechanisms: HashMap<&'static str, Box<dyn Authenticator>> = HashMap::new();
        mechanisms.insert(SaslMechanism::Plain.name(), Box::new(plain::PlainAuthenticator));
        mechanisms.insert(SaslMechanism::Login.name(), Box::new(login::LoginAuthenticator));
        mechanisms.insert(SaslMechanism::CramMd5.name(), Box::new(cram_md5::CramMd5Authenticator));
        mechanisms.insert(SaslMechanism::DigestMd5.name(), Box::new(digest_md5::DigestMd5Authenticator));
        mechanisms.insert(SaslMechanism::XOAuth2.name(), Box::new(xoauth2::XOAuth2Authenticator));
        Self { mechanisms }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Authenticator> {
        self.mechanisms
            .get(name.to_ascii_uppercase().as_str())
            .map(|b| b.as_ref())
    }
}

impl Default for AuthenticatorRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
