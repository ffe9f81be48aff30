//! Request/response correlation for one backend.
//!
//! Every in-flight request is a single-use slot keyed by its JSON-RPC
//! id. The backend's reader task completes slots as responses arrive;
//! responses may come back in any order. A slot is always removed from
//! the table before its caller is signalled, which makes delivery
//! at-most-once, and a response whose id matches no slot is dropped.

use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::backend::BackendHandle;
use crate::backend::codec;
use crate::error::GatewayError;
use crate::jsonrpc::JsonRpcId;

pub(crate) type ResponseSender = oneshot::Sender<Result<Value, GatewayError>>;

/// In-flight waiters for one backend, keyed by correlation id.
#[derive(Debug, Default)]
pub struct WaiterTable {
    slots: DashMap<JsonRpcId, ResponseSender>,
}

impl WaiterTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of in-flight requests.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn register(&self, id: JsonRpcId, tx: ResponseSender) {
        self.slots.insert(id, tx);
    }

    /// Remove a slot without completing it. Returns whether it was
    /// still registered.
    pub(crate) fn remove(&self, id: &JsonRpcId) -> bool {
        self.slots.remove(id).is_some()
    }

    /// Complete the slot registered under `id`, if any. The slot is
    /// removed before the caller is signalled.
    pub(crate) fn complete(&self, id: &JsonRpcId, outcome: Result<Value, GatewayError>) -> bool {
        match self.slots.remove(id) {
            Some((_, tx)) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Fail every in-flight waiter. Used when the backend exits.
    pub(crate) fn fail_all(&self, mut err: impl FnMut() -> GatewayError) {
        let ids: Vec<JsonRpcId> = self.slots.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, tx)) = self.slots.remove(&id) {
                let _ = tx.send(Err(err()));
            }
        }
    }
}

/// Send one JSON-RPC request to a backend and await its response.
///
/// Mints a fresh UUID correlation id, registers the waiter before the
/// frame is written (so a fast reply cannot race registration), then
/// awaits completion with a deadline. On timeout the waiter is removed
/// first; if removal fails the response arrived concurrently and is
/// delivered to the caller instead of a timeout error.
pub(crate) async fn dispatch(
    handle: &BackendHandle,
    server_id: &str,
    method: &str,
    params: Value,
    timeout: Duration,
) -> Result<Value, GatewayError> {
    let id = JsonRpcId::String(Uuid::new_v4().to_string());
    let (tx, mut rx) = oneshot::channel();
    handle.waiters().register(id.clone(), tx);

    let line = codec::request_line(&id, method, &params);
    if let Err(e) = handle.write_line(&line).await {
        handle.waiters().remove(&id);
        return Err(e);
    }
    tracing::debug!(server_id, method, correlation_id = %id, "request dispatched");

    tokio::select! {
        outcome = &mut rx => match outcome {
            Ok(result) => result,
            // Sender dropped without completing: the table was torn down.
            Err(_) => Err(GatewayError::BackendExited {
                server_id: server_id.to_string(),
            }),
        },
        _ = tokio::time::sleep(timeout) => {
            if handle.waiters().remove(&id) {
                tracing::warn!(server_id, method, correlation_id = %id, "request timed out");
                Err(GatewayError::RequestTimeout {
                    server_id: server_id.to_string(),
                    method: method.to_string(),
                })
            } else {
                // The reader completed the slot as the deadline fired;
                // the send happens immediately after removal, so this
                // resolves without further waiting.
                match rx.await {
                    Ok(result) => result,
                    Err(_) => Err(GatewayError::BackendExited {
                        server_id: server_id.to_string(),
                    }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_removes_slot() {
        let table = WaiterTable::new();
        let (tx, mut rx) = oneshot::channel();
        let id = JsonRpcId::String("a".into());
        table.register(id.clone(), tx);
        assert_eq!(table.len(), 1);

        assert!(table.complete(&id, Ok(Value::Null)));
        assert!(table.is_empty());
        assert!(rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn test_complete_unknown_id_is_noop() {
        let table = WaiterTable::new();
        assert!(!table.complete(&JsonRpcId::Number(42), Ok(Value::Null)));
    }

    #[test]
    fn test_fail_all_drains_table() {
        let table = WaiterTable::new();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        table.register(JsonRpcId::Number(1), tx1);
        table.register(JsonRpcId::Number(2), tx2);

        table.fail_all(|| GatewayError::BackendExited {
            server_id: "s".into(),
        });

        assert!(table.is_empty());
        assert!(rx1.try_recv().unwrap().is_err());
        assert!(rx2.try_recv().unwrap().is_err());
    }
}
