//! In-memory usage ledger for connected peers.
//!
//! Sessions are keyed by the peer's base64 public key. Nothing here is
//! persisted; after a restart the sessions job re-learns peers from the
//! tunnel backend and evicts any it has no record of.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Usage-accounting record for one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Base64 public key of the peer.
    pub identity: String,
    /// Ledger subscription the usage is billed to.
    pub subscription_id: u64,
    /// Ledger address of the paying account.
    pub address: String,
    pub connected_at: Instant,
    /// Cumulative bytes sent by the peer, as last folded in.
    pub upload: u64,
    /// Cumulative bytes received by the peer, as last folded in.
    pub download: u64,
    /// Connected time accounted so far.
    pub duration: Duration,
}

impl Session {
    /// Fresh session with zero counters.
    pub fn new(
        identity: impl Into<String>,
        subscription_id: u64,
        address: impl Into<String>,
        connected_at: Instant,
    ) -> Self {
        Self {
            identity: identity.into(),
            subscription_id,
            address: address.into(),
            connected_at,
            upload: 0,
            download: 0,
            duration: Duration::ZERO,
        }
    }
}

/// Concurrency-safe session map shared by the jobs and the connect path.
///
/// Every operation is atomic per identity; a `set` is visible to any
/// subsequent `get` from another task.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` when there is no prior record for `identity`.
    pub fn get(&self, identity: &str) -> Option<Session> {
        self.sessions.get(identity).map(|entry| entry.value().clone())
    }

    pub fn set(&self, session: Session) {
        self.sessions.insert(session.identity.clone(), session);
    }

    pub fn delete(&self, identity: &str) -> Option<Session> {
        self.sessions.remove(identity).map(|(_, session)| session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
