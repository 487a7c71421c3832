//! Embeddable test-double mail server: SMTP and POP3 protocol engines
//! sharing an in-memory [`MailboxStore`], pluggable SASL authentication, and
//! per-protocol session state machines. Built for test harnesses that need a
//! real socket to point a mail client at, not a production MTA.
//!
//! ```no_run
//! use mailtrap_core::{MailboxStore, Pop3Server, SmtpServer};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MailboxStore::new());
//! store.add_mailbox("alice", "pw", "alice@localhost");
//!
//! let smtp = SmtpServer::new(Arc::clone(&store));
//! smtp.start().unwrap();
//!
//! let pop3 = Pop3Server::new(store);
//! pop3.start().unwrap();
//! ```

pub mod client;
pub mod dot_stuff;
pub mod error;
pub mod pop3;
pub mod sasl;
pub mod server;
pub mod session;
pub mod smtp;
pub mod store;
pub mod tls;

pub use error::{MailError, MailResult};
pub use pop3::{Clock, Pop3Command, Pop3Server, Pop3Session, Pop3State, SystemClock};
pub use sasl::{AuthChannel, Authenticator, AuthenticatorRegistry, Credentials, SaslMechanism};
pub use smtp::{SmtpCommand, SmtpServer, SmtpSession};
pub use store::{Mailbox, MailboxStore, Message};
