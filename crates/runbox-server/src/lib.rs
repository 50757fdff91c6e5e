//! # runbox-server
//!
//! Axum HTTP + `WebSocket` session layer.
//!
//! - `WebSocket` sessions: frame classification, per-session command queue,
//!   protocol-violation closes
//! - Connection registry shared by all sessions
//! - Keepalive scheduler pinging every live connection
//! - `/health` and `/metrics` endpoints
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::ServerError;
pub use server::RunboxServer;
