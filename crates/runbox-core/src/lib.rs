//! # runbox-core
//!
//! Shared vocabulary for the runbox session layer.
//!
//! - **Commands**: the [`Command`] wire union and its JSON codec
//! - **Diagnostics**: [`Annotation`] records extracted from failed builds
//! - **Branded IDs**: [`ConnectionId`] for live client connections

#![deny(unsafe_code)]

pub mod annotation;
pub mod command;
pub mod ids;

pub use annotation::{Annotation, Location, Severity};
pub use command::{Command, DecodeError, RunRequest, ToolchainId, decode, decode_text, encode};
pub use ids::ConnectionId;
