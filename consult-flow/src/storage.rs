use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{error::Result, session::Session};

/// Sessions are retained this long after their last write.
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60 * 24);

/// Trait for storing and retrieving consultation sessions.
///
/// Writes replace the whole value; there are no partial-field updates.
/// Implementations must tolerate concurrent `get`/`put` on the same key with
/// at least last-write-wins semantics.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put(&self, session: Session) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Session>>;
    async fn exists(&self, id: &str) -> Result<bool>;
}

/// In-memory implementation of [`SessionStore`] with per-entry expiry.
pub struct InMemorySessionStore {
    sessions: Arc<DashMap<String, (Session, Instant)>>,
    ttl: Duration,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_SESSION_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            ttl,
        }
    }

    fn is_expired(&self, written_at: Instant) -> bool {
        written_at.elapsed() >= self.ttl
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put(&self, session: Session) -> Result<()> {
        self.sessions
            .insert(session.id.clone(), (session, Instant::now()));
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Session>> {
        if let Some(entry) = self.sessions.get(id) {
            let (session, written_at) = entry.value();
            if !self.is_expired(*written_at) {
                return Ok(Some(session.clone()));
            }
        }
        // Drop the expired entry outside the read guard.
        self.sessions
            .remove_if(id, |_, (_, written_at)| self.is_expired(*written_at));
        Ok(None)
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.get(id).await?.is_some())
    }
}
