//! `WebSocket` connection management, keepalive, and command dispatch.

pub mod connection;
pub mod handler;
pub mod keepalive;
pub mod registry;
pub mod session;
