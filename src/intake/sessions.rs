//! Intake session cache
//!
//! Keyed by session id. Entries idle for longer than the TTL are dropped on
//! the next access, and inserting past capacity evicts the least recently
//! used entry, so abandoned wizards do not accumulate. An entry whose handle
//! is still held by a running turn is never dropped.

use super::machine::IntakeSession;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Configuration for session eviction
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Idle time after which a session is forgotten
    pub ttl: Duration,
    /// Maximum number of live sessions
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60),
            max_sessions: 1024,
        }
    }
}

struct Entry {
    session: Arc<Mutex<IntakeSession>>,
    last_seen: Instant,
}

impl Entry {
    /// A handle is out, so a turn may be in flight
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.session) > 1
    }
}

pub struct SessionCache {
    entries: Mutex<HashMap<String, Entry>>,
    config: SessionConfig,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config: SessionConfig {
                max_sessions: config.max_sessions.max(1),
                ..config
            },
        }
    }

    /// Handle to the session's state, created idle if unknown or expired.
    /// Lock the handle for the whole turn to serialise that session.
    pub async fn session(&self, session_id: &str) -> Arc<Mutex<IntakeSession>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        self.purge(&mut entries, now);

        if let Some(entry) = entries.get_mut(session_id) {
            entry.last_seen = now;
            return entry.session.clone();
        }

        while entries.len() >= self.config.max_sessions {
            let oldest = entries
                .iter()
                .filter(|(_, e)| !e.in_use())
                .min_by_key(|(_, e)| e.last_seen)
                .map(|(id, _)| id.clone());
            let Some(oldest) = oldest else {
                warn!(live = entries.len(), "Every intake session is busy, exceeding capacity");
                break;
            };
            entries.remove(&oldest);
            warn!(session_id = %oldest, "Intake session evicted, cache at capacity");
        }

        let session = Arc::new(Mutex::new(IntakeSession::new()));
        entries.insert(
            session_id.to_string(),
            Entry {
                session: session.clone(),
                last_seen: now,
            },
        );
        session
    }

    fn purge(&self, entries: &mut HashMap<String, Entry>, now: Instant) -> usize {
        let before = entries.len();
        entries.retain(|_, e| e.in_use() || now.duration_since(e.last_seen) <= self.config.ttl);
        let purged = before - entries.len();
        if purged > 0 {
            debug!(purged, "Expired intake sessions dropped");
        }
        purged
    }

    /// Drop expired sessions now; returns how many were removed
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().await;
        self.purge(&mut entries, Instant::now())
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.entries.lock().await.contains_key(session_id)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}
