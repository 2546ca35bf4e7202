use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use tracing::debug;
use ulid::Ulid;

use crate::model::*;
use crate::observability;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKey {
    /// The guest's reservation in progress.
    Draft,
    /// The reservation just committed, shown once on the summary page.
    Summary,
    /// Admin calendar snapshot for one room.
    Calendar(RoomId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionValue {
    Draft(ReservationDraft),
    Summary(ReservationSummary),
    Calendar(CalendarSnapshot),
}

/// Per-session key/value storage the engine reads drafts and snapshots from.
pub trait TransientStore: Send + Sync {
    fn get(&self, key: &SessionKey) -> Option<SessionValue>;

    /// Replaces any previous value under `key`.
    fn put(&self, key: SessionKey, value: SessionValue);

    fn remove(&self, key: &SessionKey) -> Option<SessionValue>;
}

pub struct Session {
    token: String,
    values: DashMap<SessionKey, SessionValue>,
    expires_at: AtomicI64,
}

impl Session {
    pub fn new(token: String, expires_at: Ms) -> Self {
        Self {
            token,
            values: DashMap::new(),
            expires_at: AtomicI64::new(expires_at),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> Ms {
        self.expires_at.load(Ordering::Relaxed)
    }

    pub fn is_expired(&self, now: Ms) -> bool {
        self.expires_at() <= now
    }

    fn touch(&self, expires_at: Ms) {
        self.expires_at.fetch_max(expires_at, Ordering::Relaxed);
    }
}

impl TransientStore for Session {
    fn get(&self, key: &SessionKey) -> Option<SessionValue> {
        self.values.get(key).map(|v| v.value().clone())
    }

    fn put(&self, key: SessionKey, value: SessionValue) {
        self.values.insert(key, value);
    }

    fn remove(&self, key: &SessionKey) -> Option<SessionValue> {
        self.values.remove(key).map(|(_, v)| v)
    }
}

/// Live sessions keyed by token. Each access pushes the session's expiry out
/// by the configured lifetime.
pub struct SessionManager {
    sessions: DashMap<String, Arc<Session>>,
    lifetime_ms: Ms,
}

impl SessionManager {
    pub fn new(lifetime: std::time::Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            lifetime_ms: lifetime.as_millis() as Ms,
        }
    }

    /// The live session for `token`, or a fresh one when the token is
    /// missing, unknown, or expired.
    pub fn load(&self, token: Option<&str>) -> Arc<Session> {
        let now = now_ms();
        let expires_at = now + self.lifetime_ms;
        if let Some(token) = token
            && let Some(entry) = self.sessions.get(token)
            && !entry.is_expired(now)
        {
            entry.touch(expires_at);
            return entry.value().clone();
        }

        let session = Arc::new(Session::new(Ulid::new().to_string(), expires_at));
        self.sessions
            .insert(session.token().to_string(), session.clone());
        metrics::gauge!(observability::SESSIONS_ACTIVE).set(self.sessions.len() as f64);
        session
    }

    /// Drop every session expired at `now`. Returns how many were removed.
    pub fn sweep_expired(&self, now: Ms) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired(now));
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            debug!(removed, "expired sessions swept");
            metrics::counter!(observability::SESSIONS_EXPIRED_TOTAL).increment(removed as u64);
        }
        metrics::gauge!(observability::SESSIONS_ACTIVE).set(self.sessions.len() as f64);
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
