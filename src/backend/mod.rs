//! Backend process handles: spawn, framed writes, demultiplexed reads.
//!
//! Each spawned backend owns three tasks: a stdout reader that feeds
//! the line decoder and routes parsed objects into the waiter table, a
//! stderr reader that logs the child's diagnostics, and an exit watcher
//! that reaps the process and fails any in-flight waiters. Writes to
//! stdin are serialized through a mutex so concurrent dispatches can
//! never interleave bytes of distinct frames.

pub mod codec;
pub mod dispatch;
pub mod handshake;

use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{Mutex, oneshot, watch};

use crate::config::schema::ServerConfig;
use crate::error::GatewayError;
use crate::jsonrpc::{self, MessageKind};

use codec::LineDecoder;
use dispatch::WaiterTable;

/// Read chunk size for the stdout reader task.
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Handle to one spawned backend process.
pub struct BackendHandle {
    server_id: String,
    pid: u32,
    stdin: Mutex<tokio::process::ChildStdin>,
    waiters: Arc<WaiterTable>,
    kill_tx: StdMutex<Option<oneshot::Sender<()>>>,
    exited: watch::Receiver<bool>,
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandle")
            .field("server_id", &self.server_id)
            .field("pid", &self.pid)
            .field("in_flight", &self.waiters.len())
            .field("exited", &self.is_exited())
            .finish()
    }
}

impl BackendHandle {
    /// Spawn a backend process with piped stdio and start its reader,
    /// stderr, and exit-watcher tasks.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::SpawnFailed`] if the process cannot be
    /// started or its pipes cannot be captured. Nothing is retained on
    /// failure.
    pub fn spawn(server_id: &str, config: &ServerConfig) -> Result<Self, GatewayError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| GatewayError::SpawnFailed {
            server_id: server_id.to_string(),
            reason: e.to_string(),
        })?;

        let pid = child.id().ok_or_else(|| GatewayError::SpawnFailed {
            server_id: server_id.to_string(),
            reason: "process exited before a pid could be read".to_string(),
        })?;

        let stdin = take_pipe(child.stdin.take(), server_id, "stdin")?;
        let stdout = take_pipe(child.stdout.take(), server_id, "stdout")?;
        let stderr = take_pipe(child.stderr.take(), server_id, "stderr")?;

        let waiters = Arc::new(WaiterTable::new());
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(false);

        tokio::spawn(read_loop(
            server_id.to_string(),
            stdout,
            waiters.clone(),
        ));
        tokio::spawn(stderr_loop(server_id.to_string(), stderr));
        tokio::spawn(exit_watch(
            server_id.to_string(),
            child,
            kill_rx,
            exit_tx,
            waiters.clone(),
        ));

        tracing::info!(server_id, pid, command = %config.command, "backend process spawned");

        Ok(Self {
            server_id: server_id.to_string(),
            pid,
            stdin: Mutex::new(stdin),
            waiters,
            kill_tx: StdMutex::new(Some(kill_tx)),
            exited: exit_rx,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// In-flight waiters for this backend.
    pub fn waiters(&self) -> &Arc<WaiterTable> {
        &self.waiters
    }

    /// Whether the exit watcher has observed the process exit.
    pub fn is_exited(&self) -> bool {
        *self.exited.borrow()
    }

    /// Write one framed message to the backend's stdin and flush.
    ///
    /// The stdin lock is held for the whole write so two concurrent
    /// frames can never interleave.
    pub async fn write_line(&self, line: &str) -> Result<(), GatewayError> {
        let mut stdin = self.stdin.lock().await;
        let io_err = |source| GatewayError::BackendWrite {
            server_id: self.server_id.clone(),
            source,
        };
        stdin.write_all(line.as_bytes()).await.map_err(io_err)?;
        stdin.flush().await.map_err(io_err)
    }

    /// Ask the exit watcher to kill the process. Idempotent.
    pub fn kill(&self) {
        if let Ok(mut guard) = self.kill_tx.lock() {
            if let Some(tx) = guard.take() {
                let _ = tx.send(());
            }
        }
    }

    /// Wait until the exit watcher reports the process gone.
    pub async fn wait_exit(&self) {
        let mut rx = self.exited.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

fn take_pipe<T>(pipe: Option<T>, server_id: &str, name: &str) -> Result<T, GatewayError> {
    pipe.ok_or_else(|| GatewayError::SpawnFailed {
        server_id: server_id.to_string(),
        reason: format!("failed to capture backend {name}"),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-Backend Tasks
// ─────────────────────────────────────────────────────────────────────────────

/// Stdout reader: one task per backend owns the stream, feeds the line
/// decoder, and routes every parsed object by correlation id.
async fn read_loop(server_id: String, stdout: ChildStdout, waiters: Arc<WaiterTable>) {
    let mut stdout = stdout;
    let mut decoder = LineDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];

    loop {
        match stdout.read(&mut chunk).await {
            Ok(0) => {
                tracing::debug!(server_id, "backend stdout EOF");
                break;
            }
            Ok(n) => {
                for value in decoder.feed(&chunk[..n]) {
                    route_message(&server_id, value, &waiters);
                }
            }
            Err(e) => {
                tracing::warn!(server_id, error = %e, "backend stdout read failed");
                break;
            }
        }
    }
}

/// Complete the waiter matching a parsed inbound object, if any.
///
/// Non-responses (backend-initiated requests, notifications,
/// unclassifiable objects) and responses whose id matches no registered
/// waiter are dropped; the drop has no side effects beyond a debug log.
fn route_message(server_id: &str, value: serde_json::Value, waiters: &WaiterTable) {
    let id = match jsonrpc::classify(&value) {
        Ok(MessageKind::Response { id }) => id,
        Ok(MessageKind::Request { method, .. }) => {
            tracing::debug!(server_id, %method, "dropping backend-initiated request");
            return;
        }
        Ok(MessageKind::Notification { method }) => {
            tracing::debug!(server_id, %method, "ignoring backend notification");
            return;
        }
        Err(e) => {
            tracing::debug!(server_id, error = %e, "dropping unclassifiable inbound message");
            return;
        }
    };

    let outcome = match value.get("error") {
        Some(err) => {
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            Err(GatewayError::Remote {
                server_id: server_id.to_string(),
                message,
            })
        }
        None => Ok(value
            .get("result")
            .cloned()
            .unwrap_or(serde_json::Value::Null)),
    };

    if !waiters.complete(&id, outcome) {
        tracing::debug!(server_id, correlation_id = %id, "dropping response with no registered waiter");
    }
}

/// Stderr reader: backend diagnostics are logged line by line under the
/// server id.
async fn stderr_loop(server_id: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::warn!(server_id, "backend stderr: {line}");
    }
}

/// Exit watcher: reaps the child (on kill request or natural exit),
/// then fails every in-flight waiter and flips the exit flag.
async fn exit_watch(
    server_id: String,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<bool>,
    waiters: Arc<WaiterTable>,
) {
    let status = tokio::select! {
        _ = kill_rx => {
            if let Err(e) = child.start_kill() {
                tracing::warn!(server_id, error = %e, "kill signal failed");
            }
            child.wait().await
        }
        status = child.wait() => status,
    };

    match status {
        Ok(status) => {
            tracing::info!(server_id, code = status.code(), "backend process exited");
        }
        Err(e) => {
            tracing::warn!(server_id, error = %e, "failed to reap backend process");
        }
    }

    waiters.fail_all(|| GatewayError::BackendExited {
        server_id: server_id.clone(),
    });
    let _ = exit_tx.send(true);
}
