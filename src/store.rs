//! In-memory mailbox store: MailboxStore -> Mailbox -> Message.
//!
//! Owned by the test harness and shared with the server's worker thread via
//! `Arc`, so every mutable piece is behind a `Mutex`. Reads hand back
//! snapshots (`Vec<Message>` clones) rather than references into the guarded
//! list, so a caller iterating a snapshot never observes a concurrent DELE.

use md5::{Digest, Md5};
use std::sync::{Arc, Mutex};

/// A single stored message: immutable content plus a mutable `deleted` flag.
///
/// `deleted` is sound as a plain flag (rather than per-session tracking)
/// only because at most one connection is active per server at a time (see
/// the concurrency model); a future multi-connection server would need to
/// move deletion marks into per-session state instead.
#[derive(Debug, Clone)]
pub struct Message {
    content: Vec<u8>,
    pub deleted: bool,
}

impl Message {
    pub fn new(content: Vec<u8>) -> Self {
        Self {
            content,
            deleted: false,
        }
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }

    /// Lowercase hex MD5 of the content; stable and unique per distinct content.
    pub fn uid(&self) -> String {
        let digest = Md5::digest(&self.content);
        hex_lower(&digest)
    }

    /// First `n` CRLF-separated lines, rejoined by CRLF, no trailing CRLF.
    /// If `n` is at least the line count, returns the full content.
    pub fn top(&self, n: usize) -> Vec<u8> {
        let lines: Vec<&[u8]> = split_crlf_lines(&self.content);
        if n >= lines.len() {
            return self.content.clone();
        }
        lines[..n].join(&b"\r\n"[..])
    }
}

fn split_crlf_lines(content: &[u8]) -> Vec<&[u8]> {
    if content.is_empty() {
        return Vec::new();
    }
    content.split(|&b| b == b'\n').map(strip_trailing_cr).collect()
}

fn strip_trailing_cr(line: &[u8]) -> &[u8] {
    if let Some((&b'\r', rest)) = line.split_last() {
        rest
    } else {
        line
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{:02x}", b).unwrap();
    }
    s
}

/// One user's inbox: credentials plus an ordered message list.
pub struct Mailbox {
    username: String,
    secret: String,
    email: String,
    messages: Mutex<Vec<Message>>,
}

impl Mailbox {
    pub fn new(username: impl Into<String>, secret: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
            email: email.into(),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn add_message(&self, content: Vec<u8>) {
        self.messages.lock().unwrap().push(Message::new(content));
    }

    /// Snapshot of the current message list (1-based POP3 numbering is the
    /// caller's responsibility: index 0 of this vec is message 1).
    pub fn get_messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    /// Drops messages flagged `deleted`, in place.
    pub fn remove_deleted_messages(&self) {
        self.messages.lock().unwrap().retain(|m| !m.deleted);
    }

    /// Marks message at 1-based `n` deleted. Returns false if out of range
    /// or already deleted.
    pub fn mark_deleted(&self, n: usize) -> bool {
        let mut guard = self.messages.lock().unwrap();
        match n.checked_sub(1).and_then(|i| guard.get_mut(i)) {
            Some(m) if !m.deleted => {
                m.deleted = true;
                true
            }
            _ => false,
        }
    }

    /// Clears every `deleted` flag on this mailbox (POP3 RSET).
    pub fn clear_deleted_flags(&self) {
        for m in self.messages.lock().unwrap().iter_mut() {
            m.deleted = false;
        }
    }
}

/// Maps username (or email) to a unique `Mailbox`. Shared between the
/// server's worker thread and the test harness thread.
#[derive(Default)]
pub struct MailboxStore {
    mailboxes: Mutex<Vec<Arc<Mailbox>>>,
}

impl MailboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new mailbox. Last write wins; no duplicate-username check.
    pub fn add_mailbox(&self, username: impl Into<String>, secret: impl Into<String>, email: impl Into<String>) {
        self.mailboxes
            .lock()
            .unwrap()
            .push(Arc::new(Mailbox::new(username, secret, email)));
    }

    /// Linear lookup by exact match on username or email. Returns a cheap
    /// `Arc` clone so a session can bind to the mailbox across commands
    /// without holding the store's lock.
    pub fn find_mailbox(&self, username_or_email: &str) -> Option<Arc<Mailbox>> {
        let guard = self.mailboxes.lock().unwrap();
        guard
            .iter()
            .find(|m| m.username() == username_or_email || m.email() == username_or_email)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_is_stable_md5_hex() {
        let m = Message::new(b"hello".to_vec());
        let expected = format!("{:x}", Md5::digest(b"hello"));
        assert_eq!(m.uid(), expected);
        assert_eq!(m.uid(), m.uid());
    }

    #[test]
    fn top_returns_first_n_lines_without_trailing_crlf() {
        let m = Message::new(b"L1\r\nL2\r\nL3".to_vec());
        assert_eq!(m.top(2), b"L1\r\nL2".to_vec());
        assert_eq!(m.top(10), b"L1\r\nL2\r\nL3".to_vec());
    }

    #[test]
    fn remove_deleted_messages_filters_in_place() {
        let mb = Mailbox::new("alice", "pw", "alice@localhost");
        mb.add_message(b"A".to_vec());
        mb.add_message(b"B".to_vec());
        assert!(mb.mark_deleted(1));
        mb.remove_deleted_messages();
        let remaining = mb.get_messages();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].content(), b"B");
    }

    #[test]
    fn clear_deleted_flags_restores_rset_semantics() {
        let mb = Mailbox::new("alice", "pw", "alice@localhost");
        mb.add_message(b"A".to_vec());
        mb.mark_deleted(1);
        mb.clear_deleted_flags();
        assert!(!mb.get_messages()[0].deleted);
    }

    #[test]
    fn find_mailbox_resolves_by_username_or_email() {
        let store = MailboxStore::new();
        store.add_mailbox("alice", "pw", "alice@localhost");
        assert!(store.find_mailbox("alice").is_some());
        assert!(store.find_mailbox("alice@localhost").is_some());
        assert!(store.find_mailbox("bob").is_none());
    }
}
