//! Multiplexing gateway for stdio MCP server processes.
//!
//! Spawns line-delimited JSON-RPC subprocesses, completes their
//! initialization handshake, correlates out-of-order responses to
//! concurrent callers by request id, and interposes a three-tier risk
//! gate (direct / confirm / containerized) in front of dispatch.

pub mod backend;
pub mod config;
pub mod error;
pub mod gate;
pub mod gateway;
pub mod http;
pub mod jsonrpc;
pub mod registry;
