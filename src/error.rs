//! Error types for the gateway core.
//!
//! One taxonomy covers admission, dispatch, and confirmation failures.
//! Every variant names the entity it concerns so callers can surface a
//! useful message without string matching. The HTTP status mapping
//! lives in the REST module, not here.

use crate::registry::InitState;

/// Errors surfaced by the gateway facade and its components.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Server configuration rejected at admission (bad risk level or
    /// risk/docker combination).
    #[error("invalid server config: {reason}")]
    ConfigInvalid {
        /// Human-readable description of the rejected combination.
        reason: String,
    },

    /// The backend process could not be spawned. No record is kept.
    #[error("failed to spawn backend '{server_id}': {reason}")]
    SpawnFailed { server_id: String, reason: String },

    /// Dispatch refused because the backend has not completed (or has
    /// failed) its initialization handshake.
    #[error("server '{server_id}' is not ready (initialization state: {state})")]
    NotReady { server_id: String, state: InitState },

    /// No server registered under this id.
    #[error("unknown server '{server_id}'")]
    ServerNotFound { server_id: String },

    /// No pending confirmation under this id.
    #[error("unknown confirmation '{confirmation_id}'")]
    ConfirmationNotFound { confirmation_id: String },

    /// A server with this id is already registered.
    #[error("server '{server_id}' is already registered")]
    Conflict { server_id: String },

    /// The backend answered with a JSON-RPC error object.
    #[error("backend '{server_id}' returned an error: {message}")]
    Remote { server_id: String, message: String },

    /// The initialization handshake did not complete within its window.
    #[error("initialization handshake with '{server_id}' timed out")]
    HandshakeTimeout { server_id: String },

    /// A dispatched request got no response within its deadline. The
    /// waiter is unregistered before this is returned.
    #[error("request '{method}' to '{server_id}' timed out")]
    RequestTimeout { server_id: String, method: String },

    /// The backend process exited while requests were in flight.
    #[error("backend '{server_id}' exited")]
    BackendExited { server_id: String },

    /// The confirmation outlived its ten-minute window and was removed.
    #[error("confirmation '{confirmation_id}' has expired")]
    ConfirmationExpired { confirmation_id: String },

    /// Writing to the backend's stdin failed.
    #[error("failed to write to backend '{server_id}': {source}")]
    BackendWrite {
        server_id: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading or parsing the configuration file failed.
    #[error("failed to load config file '{path}': {reason}")]
    ConfigFile { path: String, reason: String },
}
