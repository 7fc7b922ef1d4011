//! Outstanding authentication requests.

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry as MapEntry, DashMap};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::AppError;
use crate::protocol::circuits::CircuitId;
use crate::protocol::query::Query;

/// What a session asked the wallet to prove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    pub session_id: String,
    pub circuit_id: CircuitId,
    pub query: Query,
}

impl AuthRequest {
    pub fn new(circuit_id: CircuitId, query: Query) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            circuit_id,
            query,
        }
    }
}

/// An issued request together with its expiry.
#[derive(Debug, Clone)]
pub struct Issued {
    pub request: Arc<AuthRequest>,
    pub expires_at: DateTime<Utc>,
}

struct Entry {
    request: Arc<AuthRequest>,
    deadline: Instant,
    expires_at: DateTime<Utc>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.deadline
    }

    fn issued(&self) -> Issued {
        Issued {
            request: Arc::clone(&self.request),
            expires_at: self.expires_at,
        }
    }
}

/// Bounded, time-expiring map from session id to request.
///
/// Each session id lives in one shard of the map, so mutations of the same
/// session are serialised while reads of other sessions proceed. Issuance
/// is serialised as a whole so the capacity bound holds under contention;
/// removals only shrink the map and need no such lock.
pub struct RequestRegistry {
    entries: DashMap<String, Entry>,
    issuing: Mutex<()>,
    ttl: Duration,
    capacity: usize,
}

impl RequestRegistry {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            issuing: Mutex::new(()),
            ttl,
            capacity,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, circuit_id: CircuitId, query: Query) -> Result<Issued, AppError> {
        let _issuing = self.issuing.lock().unwrap_or_else(PoisonError::into_inner);

        if self.entries.len() >= self.capacity && self.evict_expired() == 0 {
            tracing::warn!(capacity = self.capacity, "Request registry full");
            return Err(AppError::RegistryFull);
        }

        let entry = Entry {
            request: Arc::new(AuthRequest::new(circuit_id, query)),
            deadline: Instant::now() + self.ttl,
            expires_at: Utc::now() + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero()),
        };
        let issued = entry.issued();
        match self.entries.entry(issued.request.session_id.clone()) {
            MapEntry::Occupied(_) => Err(AppError::Internal("session id collision".to_string())),
            MapEntry::Vacant(slot) => {
                slot.insert(entry);
                Ok(issued)
            }
        }
    }

    /// The live request for `session_id` together with its expiry.
    pub fn lookup(&self, session_id: &str) -> Option<Issued> {
        let now = Instant::now();
        self.entries
            .get(session_id)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.issued())
    }

    /// Every live request, soonest expiry first.
    pub fn pending(&self) -> Vec<Issued> {
        let now = Instant::now();
        let mut pending: Vec<Issued> = self
            .entries
            .iter()
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.issued())
            .collect();
        pending.sort_by_key(|issued| issued.expires_at);
        pending
    }

    /// The live request for `session_id`. Expired entries are dropped.
    pub fn get(&self, session_id: &str) -> Option<Arc<AuthRequest>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(session_id) {
            if entry.is_live(now) {
                return Some(Arc::clone(&entry.request));
            }
        }
        self.entries.remove_if(session_id, |_, entry| !entry.is_live(now));
        None
    }

    /// Removes the request, returning it if it was still live.
    pub fn consume(&self, session_id: &str) -> Option<Arc<AuthRequest>> {
        let now = Instant::now();
        self.entries
            .remove(session_id)
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(_, entry)| entry.request)
    }

    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Periodically drops expired requests.
    pub fn spawn_reaper(self: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let evicted = self.evict_expired();
                if evicted > 0 {
                    tracing::debug!(evicted, remaining = self.len(), "Evicted expired auth requests");
                }
            }
        })
    }
}
