//! POP3 session state machine (RFC 1939 §3): AUTHORIZATION -> TRANSACTION ->
//! UPDATE, plus the APOP greeting timestamp and the bound mailbox.

use super::command::Pop3Command;
use crate::session::SessionCore;
use crate::store::Mailbox;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pop3State {
    Authorization,
    Transaction,
    Update,
}

#[derive(Clone)]
pub struct Pop3Session {
    pub core: SessionCore,
    pub state: Pop3State,
    /// APOP challenge, generated at session creation and echoed in the
    /// greeting banner: `<process-id>.<millis>@<hostname>`.
    pub timestamp: String,
    pub username: Option<String>,
    pub mailbox: Option<Arc<Mailbox>>,
    pub history: Vec<Pop3Command>,
}

impl Pop3Session {
    pub fn new(peer: impl Into<String>, timestamp: String) -> Self {
        Self {
            core: SessionCore::new(peer),
            state: Pop3State::Authorization,
            timestamp,
            username: None,
            mailbox: None,
            history: Vec::new(),
        }
    }

    /// Binds the session to a mailbox and advances to TRANSACTION. Called
    /// only after credentials have been verified by the caller.
    pub fn authenticate(&mut self, mailbox: Arc<Mailbox>) {
        self.username = Some(mailbox.username().to_string());
        self.mailbox = Some(mailbox);
        self.state = Pop3State::Transaction;
    }

    pub fn record(&mut self, command: Pop3Command) {
        self.history.push(command);
    }

    pub fn close(&mut self) {
        self.core.close();
    }
}

/// Injectable time source for the APOP banner timestamp (`setClock` in the
/// library surface), so a test harness can pin the millisecond component to
/// get a reproducible banner instead of asserting against the wall clock.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u128;
}

/// Default clock: the real wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u128 {
        chrono::Utc::now().timestamp_millis().max(0) as u128
    }
}

/// Generates the APOP banner timestamp. Real servers use the process id;
/// this one stands in for it with the OS process id mixed into the clock
/// reading, since a test-double process id carries no useful uniqueness
/// guarantee across repeated server starts in one test run.
pub fn generate_timestamp(hostname: &str, clock: &dyn Clock) -> String {
    let millis = clock.now_millis();
    let pid = std::process::id();
    format!("<{pid}.{millis}@{hostname}>")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClock(u128);

    impl Clock for FixedClock {
        fn now_millis(&self) -> u128 {
            self.0
        }
    }

    #[test]
    fn timestamp_uses_injected_clock_millis() {
        let ts = generate_timestamp("testhost", &FixedClock(1234567));
        assert_eq!(ts, format!("<{}.1234567@testhost>", std::process::id()));
    }
}
