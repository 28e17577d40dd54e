//! Session directory — maps session ids minted at identify time to the
//! identity that owns them.
//!
//! Sessions are created by the TCP engine, looked up by the UDP engine when
//! an endpoint binds, and removed when the owning TCP connection goes away.
//! Each session also carries an expiry that is pushed forward by activity on
//! the owning connection; expired sessions are invisible to `get` and are
//! purged on the reaper interval.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use velium_core::SessionId;

/// One established identity.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    /// Name supplied at identify time. Not unique.
    pub display_name: String,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl Session {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// The session directory — shared by both transport engines.
///
/// DashMap keeps each operation inside one shard lock, so `get` on the UDP
/// receive path never waits on more than a single short insert or remove.
#[derive(Debug, Clone)]
pub struct SessionDirectory {
    sessions: Arc<DashMap<SessionId, Session>>,
    ttl: Duration,
}

impl SessionDirectory {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Mint a fresh id, register it under `display_name`, and return it.
    ///
    /// The vacant-entry check and insert happen under the same shard lock,
    /// so two concurrent creates can never hand out the same id.
    pub fn create(&self, display_name: &str) -> SessionId {
        loop {
            let id = SessionId::random();
            if let Entry::Vacant(slot) = self.sessions.entry(id) {
                let now = Instant::now();
                slot.insert(Session {
                    id,
                    display_name: display_name.to_string(),
                    created_at: now,
                    expires_at: now + self.ttl,
                });
                return id;
            }
        }
    }

    /// Look up a live session. Expired sessions are treated as absent.
    pub fn get(&self, id: &SessionId) -> Option<Session> {
        let session = self.sessions.get(id)?;
        if session.is_expired(Instant::now()) {
            return None;
        }
        Some(session.value().clone())
    }

    /// Remove a session. Removing an absent id is a no-op.
    pub fn remove(&self, id: &SessionId) -> Option<Session> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Number of live sessions. Agrees with `get`: expired ones are not counted.
    pub fn count(&self) -> usize {
        let now = Instant::now();
        self.sessions.iter().filter(|s| !s.is_expired(now)).count()
    }

    /// Push the expiry of a live session forward by one TTL.
    pub fn touch(&self, id: &SessionId) -> bool {
        match self.sessions.get_mut(id) {
            Some(mut session) => {
                session.expires_at = Instant::now() + self.ttl;
                true
            }
            None => false,
        }
    }

    /// Drop every expired session. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired(now));
        before.saturating_sub(self.sessions.len())
    }

    /// Point-in-time copy of every session, for status reporting.
    pub fn snapshot(&self) -> Vec<Session> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }
}
