//! In-memory conversation store.
//!
//! Sessions live in a sharded [`DashMap`]; each session carries its own
//! transcript lock and an orchestration gate, so traffic on one session never
//! waits on another.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::domain::ids::SessionId;
use crate::domain::turn::{Transcript, Turn};

/// Per-session state.
struct SessionEntry {
    turns: Mutex<Transcript>,
    gate: Arc<tokio::sync::Mutex<()>>,
    last_access: Mutex<Instant>,
}

impl Default for SessionEntry {
    fn default() -> Self {
        Self {
            turns: Mutex::new(Vec::new()),
            gate: Arc::new(tokio::sync::Mutex::new(())),
            last_access: Mutex::new(Instant::now()),
        }
    }
}

impl SessionEntry {
    fn touch(&self) {
        *self
            .last_access
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_access
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    fn snapshot(&self) -> Transcript {
        self.touch();
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push_all(&self, turns: impl IntoIterator<Item = Turn>) {
        self.touch();
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(turns);
    }

    fn is_busy(&self) -> bool {
        self.gate.try_lock().is_err()
    }
}

/// Exclusive right to run one exchange on a session.
///
/// Released on drop.
pub struct SessionGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Concurrency-safe mapping from session id to transcript.
#[derive(Default)]
pub struct ConversationStore {
    sessions: DashMap<SessionId, Arc<SessionEntry>>,
}

impl ConversationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transcript for `id`, or an empty one if the session is unknown.
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Transcript {
        let entry = self.sessions.get(id).map(|entry| Arc::clone(entry.value()));
        entry.map(|entry| entry.snapshot()).unwrap_or_default()
    }

    /// Append one turn, creating the session if absent.
    pub fn append_turn(&self, id: &SessionId, turn: Turn) {
        self.append_turns(id, [turn]);
    }

    /// Append several turns as one atomic step.
    pub fn append_turns(&self, id: &SessionId, turns: impl IntoIterator<Item = Turn>) {
        // The shard guard is held while pushing so eviction cannot orphan the entry.
        if let Some(entry) = self.sessions.get(id) {
            entry.push_all(turns);
            return;
        }
        self.sessions.entry(id.clone()).or_default().push_all(turns);
    }

    /// Wait for exclusive use of a session for a full exchange.
    pub async fn lock_session(&self, id: &SessionId) -> SessionGuard {
        let gate = {
            let entry = self.sessions.entry(id.clone()).or_default();
            entry.touch();
            Arc::clone(&entry.gate)
        };
        SessionGuard {
            _guard: gate.lock_owned().await,
        }
    }

    /// Remove sessions idle for at least `ttl`. Sessions mid-exchange are kept.
    ///
    /// Returns the number of evicted sessions.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, entry| entry.is_busy() || entry.idle_for() < ttl);
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            debug!(evicted, "Evicted idle sessions");
        }
        evicted
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid() -> SessionId {
        SessionId::generate()
    }

    #[test]
    fn test_unknown_session_is_empty() {
        let store = ConversationStore::new();
        assert!(store.get(&sid()).is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_append_preserves_order() {
        let store = ConversationStore::new();
        let id = sid();
        store.append_turn(&id, Turn::user("one"));
        store.append_turn(&id, Turn::assistant("two"));
        store.append_turns(&id, [Turn::user("three"), Turn::assistant("four")]);

        let contents: Vec<String> = store.get(&id).into_iter().map(|t| t.content).collect();
        assert_eq!(contents, ["one", "two", "three", "four"]);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let store = ConversationStore::new();
        let a = sid();
        let b = sid();
        store.append_turn(&a, Turn::user("for a"));
        store.append_turn(&b, Turn::user("for b"));
        store.append_turn(&b, Turn::assistant("reply b"));

        assert_eq!(store.get(&a), vec![Turn::user("for a")]);
        assert_eq!(store.get(&b).len(), 2);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_lose_nothing() {
        let store = Arc::new(ConversationStore::new());
        let id = sid();
        let mut handles = Vec::new();
        for task in 0..8 {
            let store = Arc::clone(&store);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                for n in 0..100 {
                    store.append_turn(&id, Turn::user(format!("{task}:{n}")));
                }
            }));
        }
        for handle in handles {
            assert!(handle.await.is_ok());
        }

        let transcript = store.get(&id);
        assert_eq!(transcript.len(), 800);
        // Each writer's own turns keep their relative order.
        for task in 0..8 {
            let prefix = format!("{task}:");
            let seq: Vec<usize> = transcript
                .iter()
                .filter_map(|t| t.content.strip_prefix(&prefix))
                .filter_map(|n| n.parse().ok())
                .collect();
            assert_eq!(seq, (0..100).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_evict_idle_skips_busy_sessions() {
        let store = ConversationStore::new();
        let idle = sid();
        let busy = sid();
        store.append_turn(&idle, Turn::user("old"));
        store.append_turn(&busy, Turn::user("working"));

        let guard = store.lock_session(&busy).await;
        assert_eq!(store.evict_idle(Duration::ZERO), 1);
        assert!(store.get(&idle).is_empty());
        assert_eq!(store.get(&busy).len(), 1);

        drop(guard);
        assert_eq!(store.evict_idle(Duration::ZERO), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_evict_keeps_recent_sessions() {
        let store = ConversationStore::new();
        store.append_turn(&sid(), Turn::user("fresh"));
        assert_eq!(store.evict_idle(Duration::from_secs(3600)), 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_session_gate_serializes() {
        let store = Arc::new(ConversationStore::new());
        let id = sid();
        let first = store.lock_session(&id).await;

        let contender = {
            let store = Arc::clone(&store);
            let id = id.clone();
            tokio::spawn(async move {
                let _guard = store.lock_session(&id).await;
                store.append_turn(&id, Turn::user("second"));
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.append_turn(&id, Turn::user("first"));
        drop(first);
        assert!(contender.await.is_ok());

        let contents: Vec<String> = store.get(&id).into_iter().map(|t| t.content).collect();
        assert_eq!(contents, ["first", "second"]);
    }
}
