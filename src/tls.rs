//! Socket factory: supplies a loopback listener, plain or implicit-TLS.
//!
//! Any factory yielding a plain-or-TLS listener satisfies the contract, but
//! a self-contained test-double server needs a concrete one to actually
//! offer `use_ssl = true`. TLS is implicit only: no STARTTLS upgrade path.

use crate::error::{MailError, MailResult};
use rcgen::{generate_simple_self_signed, CertifiedKey};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ServerConfig, ServerConnection, StreamOwned};
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

/// A connected socket, plain or TLS-wrapped. Both variants implement
/// `Read + Write` so `Client<Stream>` doesn't need to know which one it has.
pub enum Stream {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ServerConnection, TcpStream>>),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(s) => s.read(buf),
            Stream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(s) => s.write(buf),
            Stream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(s) => s.flush(),
            Stream::Tls(s) => s.flush(),
        }
    }
}

impl Stream {
    /// Negotiated `(protocol version, cipher suite)` names, once the TLS
    /// handshake has completed (rustls completes it lazily on first I/O).
    /// `None` for a plain connection or before the handshake finishes.
    pub fn tls_info(&self) -> Option<(String, String)> {
        let Stream::Tls(s) = self else { return None };
        let protocol = s.conn.protocol_version()?;
        let suite = s.conn.negotiated_cipher_suite()?;
        Some((format!("{protocol:?}"), format!("{:?}", suite.suite())))
    }
}

/// Maps `setSSLProtocol`'s protocol name to the rustls versions allowed for a
/// handshake; unrecognized names fall back to both TLS 1.2 and 1.3 (rustls's
/// own default) rather than failing configuration.
fn protocol_versions(name: &str) -> &'static [&'static rustls::SupportedProtocolVersion] {
    match name.trim().to_ascii_uppercase().replace(['.', '_'], "").as_str() {
        "TLSV12" | "TLS12" => &[&rustls::version::TLS12],
        "TLSV13" | "TLS13" => &[&rustls::version::TLS13],
        _ => rustls::DEFAULT_VERSIONS,
    }
}

/// Binds a loopback listener and wraps accepted sockets per configuration.
/// Holds a generated self-signed certificate for `localhost` when TLS is
/// enabled; the certificate is regenerated each time `tls()` is called,
/// there is no process-local keystore.
pub struct ServerSocketFactory {
    tls_config: Option<Arc<ServerConfig>>,
}

impl ServerSocketFactory {
    pub fn plain() -> Self {
        Self { tls_config: None }
    }

    /// Builds a factory that wraps every accepted connection in TLS using a
    /// freshly generated self-signed certificate for `localhost`, restricted
    /// to `protocol` (e.g. `"TLSv1.3"`) if it names a version rustls knows;
    /// otherwise both TLS 1.2 and 1.3 are enabled.
    pub fn tls(protocol: &str) -> MailResult<Self> {
        let CertifiedKey { cert, key_pair } = generate_simple_self_signed(vec!["localhost".to_string()])
            .map_err(|e| MailError::Config(format!("certificate generation failed: {e}")))?;
        let cert_der: CertificateDer<'static> = cert.der().clone();
        let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
        let config = ServerConfig::builder_with_protocol_versions(protocol_versions(protocol))
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der)
            .map_err(|e| MailError::Config(format!("invalid certificate/key: {e}")))?;
        Ok(Self {
            tls_config: Some(Arc::new(config)),
        })
    }

    pub fn is_tls(&self) -> bool {
        self.tls_config.is_some()
    }

    /// Binds loopback on the given port (0 = ephemeral, OS-assigned).
    pub fn bind(&self, port: u16) -> MailResult<TcpListener> {
        Ok(TcpListener::bind(("127.0.0.1", port))?)
    }

    /// Wraps an accepted TCP connection. TLS handshakes lazily on first
    /// read/write via `rustls::StreamOwned`.
    pub fn wrap(&self, tcp: TcpStream) -> MailResult<Stream> {
        match &self.tls_config {
            None => Ok(Stream::Plain(tcp)),
            Some(cfg) => {
                let conn = ServerConnection::new(Arc::clone(cfg))
                    .map_err(|e| MailError::Config(format!("TLS session setup failed: {e}")))?;
                Ok(Stream::Tls(Box::new(StreamOwned::new(conn, tcp))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_versions_recognizes_common_spellings() {
        assert_eq!(protocol_versions("TLSv1.2").len(), 1);
        assert_eq!(protocol_versions("TLSv1.3").len(), 1);
        assert_eq!(protocol_versions("tlsv13").len(), 1);
    }

    #[test]
    fn protocol_versions_falls_back_to_default_for_unknown_name() {
        assert_eq!(protocol_versions("SSLv3"), rustls::DEFAULT_VERSIONS);
        assert_eq!(protocol_versions(""), rustls::DEFAULT_VERSIONS);
    }

    #[test]
    fn plain_stream_reports_no_tls_info() {
        let (a, _b) = TcpListener::bind(("127.0.0.1", 0))
            .and_then(|l| {
                let addr = l.local_addr()?;
                let client = TcpStream::connect(addr)?;
                let (server, _) = l.accept()?;
                Ok((server, client))
            })
            .unwrap();
        let stream = Stream::Plain(a);
        assert!(stream.tls_info().is_none());
    }
}
