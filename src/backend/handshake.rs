//! MCP initialization handshake.
//!
//! Before any traffic, each backend must answer an `initialize` request
//! (sent with the literal id `1`) with a result carrying
//! `protocolVersion`, after which the gateway emits the
//! `notifications/initialized` notification. The whole exchange runs
//! under one deadline; nothing else may be written to the child while
//! it is in progress.
//!
//! The handshake waiter is registered with the reader before the
//! request is written, so backends that emit their reply pre-emptively
//! (before even reading the request) are handled the same as compliant
//! ones.

use std::time::Duration;

use serde_json::json;
use tokio::sync::oneshot;

use crate::backend::BackendHandle;
use crate::backend::codec;
use crate::error::GatewayError;
use crate::jsonrpc::JsonRpcId;

/// Protocol revision offered in the `initialize` request.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// The handshake correlation id is always the literal integer 1.
pub const HANDSHAKE_ID: i64 = 1;

/// Run the initialization handshake against a freshly spawned backend.
///
/// `settle_delay` gives the child time to open its stdio reader before
/// the first frame is written; it counts against `handshake_timeout`.
///
/// # Errors
///
/// [`GatewayError::HandshakeTimeout`] if no qualifying reply arrives in
/// time (the handshake waiter is detached first), or the underlying
/// write/exit error.
pub(crate) async fn initialize(
    handle: &BackendHandle,
    server_id: &str,
    settle_delay: Duration,
    handshake_timeout: Duration,
) -> Result<(), GatewayError> {
    match tokio::time::timeout(handshake_timeout, run(handle, server_id, settle_delay)).await {
        Ok(result) => result,
        Err(_) => {
            handle.waiters().remove(&JsonRpcId::Number(HANDSHAKE_ID));
            tracing::warn!(server_id, "initialization handshake timed out");
            Err(GatewayError::HandshakeTimeout {
                server_id: server_id.to_string(),
            })
        }
    }
}

async fn run(
    handle: &BackendHandle,
    server_id: &str,
    settle_delay: Duration,
) -> Result<(), GatewayError> {
    let id = JsonRpcId::Number(HANDSHAKE_ID);

    let (tx, rx) = oneshot::channel();
    handle.waiters().register(id.clone(), tx);

    tokio::time::sleep(settle_delay).await;

    let params = json!({
        "protocolVersion": PROTOCOL_VERSION,
        "clientInfo": {
            "name": "mcpgate",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "capabilities": {},
    });
    handle
        .write_line(&codec::request_line(&id, "initialize", &params))
        .await?;

    let mut rx = rx;
    loop {
        match rx.await {
            Ok(Ok(result)) => {
                if result.get("protocolVersion").is_some() {
                    tracing::info!(
                        server_id,
                        protocol_version = result["protocolVersion"].as_str(),
                        "backend initialized"
                    );
                    handle
                        .write_line(&codec::notification_line(
                            "notifications/initialized",
                            &json!({}),
                        ))
                        .await?;
                    return Ok(());
                }
                // An id-1 reply without protocolVersion is not the
                // handshake answer; keep scanning until the deadline.
                tracing::debug!(server_id, "ignoring id-1 reply without protocolVersion");
                let (tx, next_rx) = oneshot::channel();
                handle.waiters().register(id.clone(), tx);
                rx = next_rx;
            }
            Ok(Err(GatewayError::Remote { message, .. })) => {
                tracing::debug!(server_id, %message, "ignoring id-1 error reply during handshake");
                let (tx, next_rx) = oneshot::channel();
                handle.waiters().register(id.clone(), tx);
                rx = next_rx;
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(GatewayError::BackendExited {
                    server_id: server_id.to_string(),
                });
            }
        }
    }
}
