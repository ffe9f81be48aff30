//! Gateway facade: the only surface the REST layer sees.
//!
//! Composes the registry, the risk gate, the confirmation store, and
//! the per-backend dispatch into five operations: list, start, stop,
//! call, confirm, plus the concurrent shutdown fan-out used at
//! process exit. No REST types appear here.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;

use crate::backend::{BackendHandle, dispatch, handshake};
use crate::config::schema::ServerConfig;
use crate::error::GatewayError;
use crate::gate::confirmations::ConfirmationStore;
use crate::gate::{self, RiskLevel};
use crate::registry::{InitState, ServerRecord, ServerRegistry};

/// Deadlines and windows for the supervision engine. Defaults match
/// production behavior; tests tighten them.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Window for the full initialization handshake.
    pub handshake_timeout: Duration,
    /// Deadline for one dispatched request.
    pub request_timeout: Duration,
    /// Pause before the first handshake frame, letting the child open
    /// its stdio reader. Counts against the handshake window.
    pub settle_delay: Duration,
    /// Lifetime of a pending confirmation.
    pub confirmation_ttl: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_secs(1),
            confirmation_ttl: Duration::from_secs(600),
        }
    }
}

/// One row of the server listing.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub id: String,
    pub connected: bool,
    pub pid: u32,
    pub initialization_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running_in_docker: Option<bool>,
}

/// Result of resolving a confirmation.
#[derive(Debug)]
pub enum ConfirmOutcome {
    /// Approved: the parked call was dispatched and this is its result.
    Executed(Value),
    /// Rejected: the ticket was discarded without dispatching.
    Rejected { confirmation_id: String },
}

/// The multiplexing gateway.
pub struct Gateway {
    registry: Arc<ServerRegistry>,
    confirmations: ConfirmationStore,
    tuning: GatewayConfig,
}

impl Gateway {
    pub fn new(tuning: GatewayConfig) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(ServerRegistry::new()),
            confirmations: ConfirmationStore::new(tuning.confirmation_ttl),
            tuning,
        })
    }

    pub fn with_defaults() -> Arc<Self> {
        Self::new(GatewayConfig::default())
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Spawn and initialize a backend under `id`.
    ///
    /// HIGH-risk configs are rewritten to their `docker run` form before
    /// spawning; the original command is retained on the record. The
    /// record becomes visible in the registry as soon as the spawn
    /// succeeds, but traffic is refused until the handshake completes.
    ///
    /// # Errors
    ///
    /// `Conflict` for duplicate ids (nothing is spawned), `SpawnFailed`
    /// when the process cannot start (nothing is recorded), and the
    /// handshake's own errors, after which the record remains visible
    /// in its failed state.
    pub async fn start_server(&self, id: &str, config: ServerConfig) -> Result<(), GatewayError> {
        if self.registry.contains(id) {
            return Err(GatewayError::Conflict {
                server_id: id.to_string(),
            });
        }

        let (spawn_config, original_command) = if config.risk_level == Some(RiskLevel::High) {
            let rewritten =
                gate::containerized_config(&config).ok_or_else(|| GatewayError::ConfigInvalid {
                    reason: "riskLevel 3 requires docker.image".to_string(),
                })?;
            tracing::info!(
                server_id = id,
                image = rewritten.docker.as_ref().map(|d| d.image.as_str()),
                "high-risk server: rewriting command for container execution"
            );
            (rewritten, Some(config.command.clone()))
        } else {
            (config, None)
        };

        let handle = BackendHandle::spawn(id, &spawn_config)?;
        let risk_level = spawn_config.risk_level;
        let record = Arc::new(ServerRecord::new(
            handle,
            spawn_config,
            original_command,
            risk_level,
        ));

        if let Err(e) = self.registry.insert(id, record.clone()) {
            // Lost an insertion race after spawning; reap the child.
            record.handle.kill();
            return Err(e);
        }
        self.watch_exit(id.to_string(), record.clone());

        match handshake::initialize(
            &record.handle,
            id,
            self.tuning.settle_delay,
            self.tuning.handshake_timeout,
        )
        .await
        {
            Ok(()) => {
                record.set_init_state(InitState::Initialized);
                Ok(())
            }
            Err(e) => {
                let state = match e {
                    GatewayError::HandshakeTimeout { .. } => InitState::Timeout,
                    _ => InitState::Error,
                };
                record.set_init_state(state);
                Err(e)
            }
        }
    }

    /// Remove the record from the registry when the backend exits for
    /// any reason, failing nothing that stop_server hasn't already
    /// handled (removal is idempotent).
    fn watch_exit(&self, id: String, record: Arc<ServerRecord>) {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            record.handle.wait_exit().await;
            if registry.remove(&id).is_some() {
                tracing::warn!(server_id = %id, "backend exited; server record removed");
            }
        });
    }

    /// Kill a backend and wait for it to be reaped.
    pub async fn stop_server(&self, id: &str) -> Result<(), GatewayError> {
        let record = self
            .registry
            .remove(id)
            .ok_or_else(|| GatewayError::ServerNotFound {
                server_id: id.to_string(),
            })?;
        record.handle.kill();
        record.handle.wait_exit().await;
        tracing::info!(server_id = id, "server stopped");
        Ok(())
    }

    /// Stop every registered backend concurrently. Per-server failures
    /// are logged and do not block the rest.
    pub async fn shutdown_all(&self) {
        let ids = self.registry.ids();
        if ids.is_empty() {
            return;
        }
        tracing::info!(count = ids.len(), "shutting down all backends");

        let stops = ids.into_iter().map(|id| async move {
            let result = self.stop_server(&id).await;
            (id, result)
        });
        for (id, result) in join_all(stops).await {
            if let Err(e) = result {
                tracing::warn!(server_id = %id, error = %e, "shutdown of backend failed");
            }
        }
    }

    // ── Dispatch ─────────────────────────────────────────────────────────

    /// Dispatch a JSON-RPC call through the risk gate.
    pub async fn call(
        &self,
        server_id: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, GatewayError> {
        self.call_gated(server_id, method, params, false).await
    }

    async fn call_gated(
        &self,
        server_id: &str,
        method: &str,
        params: Value,
        pre_approved: bool,
    ) -> Result<Value, GatewayError> {
        let record = self
            .registry
            .get(server_id)
            .ok_or_else(|| GatewayError::ServerNotFound {
                server_id: server_id.to_string(),
            })?;

        match record.init_state() {
            InitState::Initialized => {}
            state => {
                return Err(GatewayError::NotReady {
                    server_id: server_id.to_string(),
                    state,
                });
            }
        }

        if !pre_approved
            && record.risk_level == Some(RiskLevel::Medium)
            && method == "tools/call"
        {
            let (confirmation_id, expires_at) =
                self.confirmations.create(server_id, method, params.clone());
            tracing::info!(
                server_id,
                confirmation_id = %confirmation_id,
                tool = params.get("name").and_then(|n| n.as_str()),
                "medium-risk tool call parked for confirmation"
            );
            return Ok(gate::confirmation_receipt(
                &confirmation_id,
                server_id,
                method,
                &params,
                expires_at,
            ));
        }

        let result = dispatch::dispatch(
            &record.handle,
            server_id,
            method,
            params,
            self.tuning.request_timeout,
        )
        .await?;

        if record.risk_level == Some(RiskLevel::High) {
            return Ok(gate::annotate_high_risk(result, record.config.docker.as_ref()));
        }
        Ok(result)
    }

    /// Resolve a pending confirmation.
    ///
    /// Approval dispatches the parked call with the gate's interception
    /// skipped; the ticket stays in the store during the dispatch and is
    /// removed on completion either way. Rejection just discards it.
    pub async fn confirm(
        &self,
        confirmation_id: &str,
        approve: bool,
    ) -> Result<ConfirmOutcome, GatewayError> {
        let ticket = self.confirmations.get_valid(confirmation_id)?;

        if !approve {
            self.confirmations.remove(confirmation_id);
            tracing::info!(
                confirmation_id,
                server_id = %ticket.server_id,
                "confirmation rejected"
            );
            return Ok(ConfirmOutcome::Rejected {
                confirmation_id: confirmation_id.to_string(),
            });
        }

        let result = self
            .call_gated(&ticket.server_id, &ticket.method, ticket.params.clone(), true)
            .await;
        self.confirmations.remove(confirmation_id);
        tracing::info!(
            confirmation_id,
            server_id = %ticket.server_id,
            approved = true,
            dispatched = result.is_ok(),
            "confirmation resolved"
        );
        result.map(ConfirmOutcome::Executed)
    }

    // ── Introspection ────────────────────────────────────────────────────

    pub fn list_servers(&self) -> Vec<ServerStatus> {
        self.registry
            .list()
            .into_iter()
            .map(|(id, record)| status_of(&id, &record))
            .collect()
    }

    pub fn server_count(&self) -> usize {
        self.registry.len()
    }

    /// In-flight request count for one backend, if registered.
    pub fn pending_requests(&self, server_id: &str) -> Option<usize> {
        self.registry
            .get(server_id)
            .map(|record| record.handle.waiters().len())
    }

    pub fn pending_confirmations(&self) -> usize {
        self.confirmations.len()
    }
}

fn status_of(id: &str, record: &ServerRecord) -> ServerStatus {
    let state = record.init_state();
    ServerStatus {
        id: id.to_string(),
        connected: state == InitState::Initialized && !record.handle.is_exited(),
        pid: record.pid,
        initialization_state: state.to_string(),
        risk_level: record.risk_level.map(|r| r.as_int()),
        risk_description: record.risk_level.map(|r| r.description().to_string()),
        running_in_docker: record
            .risk_level
            .map(|r| matches!(r, RiskLevel::High)),
    }
}
