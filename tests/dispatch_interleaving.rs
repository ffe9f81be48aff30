//! Concurrency test: many callers share one backend pipe and every
//! response is routed back to its own caller by correlation id, even
//! when the backend replies out of order.

mod helpers;

use serde_json::json;
use tokio::task::JoinSet;

use mcpgate::gateway::Gateway;

use helpers::{fast_tuning, mock_config};

#[tokio::test(flavor = "multi_thread")]
async fn test_interleaved_dispatches_route_by_id() {
    let gateway = Gateway::new(fast_tuning());
    // Randomized per-request reply delay forces out-of-order responses.
    let config = mock_config(&[("MOCK_BACKEND_JITTER_MS", "100")]);
    gateway.start_server("echo", config).await.unwrap();

    let mut tasks = JoinSet::new();
    for marker in 0..100u32 {
        let gateway = gateway.clone();
        tasks.spawn(async move {
            let result = gateway
                .call("echo", "tools/list", json!({"marker": marker}))
                .await;
            (marker, result)
        });
    }

    let mut completed = 0;
    while let Some(joined) = tasks.join_next().await {
        let (marker, result) = joined.unwrap();
        let result = result.unwrap_or_else(|e| panic!("call {marker} failed: {e}"));
        // Each caller gets the echo of its own params, nobody else's.
        assert_eq!(result["method"], "tools/list");
        assert_eq!(result["params"]["marker"], marker);
        completed += 1;
    }
    assert_eq!(completed, 100);

    // All waiters resolved and unregistered.
    assert_eq!(gateway.pending_requests("echo"), Some(0));
}
