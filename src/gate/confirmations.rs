//! Pending-confirmation store for MEDIUM-risk tool calls.
//!
//! Entries are single-use tickets: created when a `tools/call` is
//! intercepted, removed on approve-and-dispatch, explicit reject, or
//! lazily when an access finds them older than the TTL. There is no
//! background sweeper.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use crate::error::GatewayError;

/// One intercepted call awaiting a human decision.
#[derive(Debug, Clone)]
pub struct PendingConfirmation {
    pub server_id: String,
    pub method: String,
    pub params: Value,
    pub created_at: DateTime<Utc>,
}

/// Map of confirmation id to pending ticket, with lazy TTL expiry.
#[derive(Debug)]
pub struct ConfirmationStore {
    entries: DashMap<String, PendingConfirmation>,
    ttl: chrono::Duration,
}

impl ConfirmationStore {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(10)),
        }
    }

    /// Insert a new ticket, returning its id and expiry instant.
    pub fn create(
        &self,
        server_id: &str,
        method: &str,
        params: Value,
    ) -> (String, DateTime<Utc>) {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        self.entries.insert(
            id.clone(),
            PendingConfirmation {
                server_id: server_id.to_string(),
                method: method.to_string(),
                params,
                created_at,
            },
        );
        tracing::info!(
            confirmation_id = %id,
            server_id,
            method,
            "confirmation created"
        );
        (id, created_at + self.ttl)
    }

    /// Look up a ticket, enforcing expiry on access.
    ///
    /// # Errors
    ///
    /// [`GatewayError::ConfirmationNotFound`] for unknown ids;
    /// [`GatewayError::ConfirmationExpired`] for overdue tickets, which
    /// are removed as a side effect.
    pub fn get_valid(&self, id: &str) -> Result<PendingConfirmation, GatewayError> {
        let entry = self
            .entries
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| GatewayError::ConfirmationNotFound {
                confirmation_id: id.to_string(),
            })?;

        if Utc::now() - entry.created_at > self.ttl {
            self.entries.remove(id);
            tracing::warn!(confirmation_id = %id, "confirmation expired");
            return Err(GatewayError::ConfirmationExpired {
                confirmation_id: id.to_string(),
            });
        }

        Ok(entry)
    }

    /// Remove a ticket. Tickets are single-use; callers remove on both
    /// the approve-dispatch and reject paths.
    pub fn remove(&self, id: &str) -> Option<PendingConfirmation> {
        self.entries.remove(id).map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&self, id: &str, entry: PendingConfirmation) {
        self.entries.insert(id.to_string(), entry);
    }
}
