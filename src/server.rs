//! Pieces shared by `Pop3Server` and `SmtpServer`: the enable/disable
//! command registry and the session-history tracker. POP3 and SMTP
//! instantiate these generically rather than inheriting from one base
//! server type (see the design note on "two parallel protocol stacks").

use log::warn;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

/// Verb (uppercased) -> (enabled, parser). Commands can be added/removed at
/// runtime; a disabled verb is rejected before parsing ever runs.
pub struct CommandRegistry<P: Clone> {
    entries: Mutex<HashMap<String, (bool, P)>>,
}

impl<P: Clone> CommandRegistry<P> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn add(&self, verb: &str, parser: P) {
        self.entries
            .lock()
            .unwrap()
            .insert(verb.to_ascii_uppercase(), (true, parser));
    }

    pub fn remove(&self, verb: &str) {
        self.entries.lock().unwrap().remove(&verb.to_ascii_uppercase());
    }

    pub fn set_enabled(&self, verb: &str, enabled: bool) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(&verb.to_ascii_uppercase()) {
            entry.0 = enabled;
        }
    }

    /// `None` if unregistered. `Some((false, _))` if registered but disabled
    /// (the dispatch loop must reject these without invoking the parser).
    pub fn lookup(&self, verb: &str) -> Option<(bool, P)> {
        self.entries.lock().unwrap().get(&verb.to_ascii_uppercase()).cloned()
    }

    pub fn enabled_verbs(&self) -> Vec<String> {
        let guard = self.entries.lock().unwrap();
        let mut verbs: Vec<String> = guard.iter().filter(|(_, (enabled, _))| *enabled).map(|(v, _)| v.clone()).collect();
        verbs.sort();
        verbs
    }
}

impl<P: Clone> Default for CommandRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the in-progress session plus the append-only history of finished
/// sessions, for post-test assertion by the harness.
pub struct SessionHistory<S: Clone> {
    active: RwLock<Option<S>>,
    finished: Mutex<Vec<S>>,
}

impl<S: Clone> SessionHistory<S> {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(None),
            finished: Mutex::new(Vec::new()),
        }
    }

    pub fn set_active(&self, session: S) {
        *self.active.write().unwrap() = Some(session);
    }

    pub fn update_active(&self, session: S) {
        *self.active.write().unwrap() = Some(session);
    }

    pub fn active(&self) -> Option<S> {
        self.active.read().unwrap().clone()
    }

    /// Moves the active session into history and clears the active slot.
    pub fn finish_active(&self) {
        if let Some(session) = self.active.write().unwrap().take() {
            self.finished.lock().unwrap().push(session);
        }
    }

    pub fn sessions(&self) -> Vec<S> {
        self.finished.lock().unwrap().clone()
    }
}

impl<S: Clone> Default for SessionHistory<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative stop signal for the single worker thread: `stop()` sets the
/// flag and the factory-level listener close is what actually unblocks a
/// pending `accept`.
#[derive(Clone, Default)]
pub struct StopSignal(std::sync::Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self(std::sync::Arc::new(AtomicBool::new(false)))
    }

    pub fn signal(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Joins a worker thread with a 5-second bound, so `stop()` can never hang
/// the caller on a worker stuck in a blocking read. The join itself still
/// runs to completion on a detached thread; this only bounds how long the
/// caller waits for it.
pub fn join_with_timeout(handle: JoinHandle<()>, label: &str) {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = handle.join();
        let _ = tx.send(());
    });
    if rx.recv_timeout(Duration::from_secs(5)).is_err() {
        warn!("{label} worker did not shut down within 5s");
    }
}
