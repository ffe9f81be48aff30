//! Registry of running backend servers.
//!
//! One record per server id, inserted only after a successful spawn and
//! removed on exit or explicit shutdown. The initialization state is
//! the only mutable field; it is flipped by the handshake and read on
//! every dispatch.

use std::sync::{Arc, Mutex as StdMutex};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::backend::BackendHandle;
use crate::config::schema::ServerConfig;
use crate::error::GatewayError;
use crate::gate::RiskLevel;

/// Initialization state of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    /// Spawned; handshake in progress. Only handshake traffic allowed.
    Starting,
    /// Handshake complete; accepting dispatches.
    Initialized,
    /// Handshake deadline elapsed without a qualifying reply.
    Timeout,
    /// Handshake failed for a non-timeout reason.
    Error,
}

impl std::fmt::Display for InitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InitState::Starting => "starting",
            InitState::Initialized => "initialized",
            InitState::Timeout => "timeout",
            InitState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Runtime record for one registered server.
#[derive(Debug)]
pub struct ServerRecord {
    /// Process handle; exclusively owned by this record.
    pub handle: BackendHandle,
    /// Pid of the spawned process (the `docker` client for HIGH risk).
    pub pid: u32,
    /// Effective config, after any HIGH-risk container rewrite.
    pub config: ServerConfig,
    /// The pre-rewrite command, kept for reporting.
    pub original_command: Option<String>,
    /// Risk level copied from the admitted config.
    pub risk_level: Option<RiskLevel>,
    init_state: StdMutex<InitState>,
}

impl ServerRecord {
    pub fn new(
        handle: BackendHandle,
        config: ServerConfig,
        original_command: Option<String>,
        risk_level: Option<RiskLevel>,
    ) -> Self {
        let pid = handle.pid();
        Self {
            handle,
            pid,
            config,
            original_command,
            risk_level,
            init_state: StdMutex::new(InitState::Starting),
        }
    }

    pub fn init_state(&self) -> InitState {
        self.init_state
            .lock()
            .map(|s| *s)
            .unwrap_or(InitState::Error)
    }

    pub(crate) fn set_init_state(&self, state: InitState) {
        if let Ok(mut guard) = self.init_state.lock() {
            *guard = state;
        }
    }
}

/// Shared map of server id to record.
#[derive(Debug, Default)]
pub struct ServerRegistry {
    servers: DashMap<String, Arc<ServerRecord>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record under `id`. An insertion race on the same id is
    /// rejected with a conflict.
    pub fn insert(&self, id: &str, record: Arc<ServerRecord>) -> Result<(), GatewayError> {
        match self.servers.entry(id.to_string()) {
            Entry::Occupied(_) => Err(GatewayError::Conflict {
                server_id: id.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.servers.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ServerRecord>> {
        self.servers.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &str) -> Option<Arc<ServerRecord>> {
        self.servers.remove(id).map(|(_, record)| record)
    }

    /// Snapshot of all records, sorted by id for stable listings.
    pub fn list(&self) -> Vec<(String, Arc<ServerRecord>)> {
        let mut entries: Vec<_> = self
            .servers
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Snapshot of registered ids.
    pub fn ids(&self) -> Vec<String> {
        self.servers.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
