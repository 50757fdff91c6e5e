//! Wire command union and its JSON codec.
//!
//! Commands travel as externally tagged JSON objects inside `WebSocket` text
//! frames:
//!
//! ```json
//! {"run": ["print(1+1)", "stable"]}
//! {"output": ["2\n", []]}
//! ```
//!
//! Each frame is decoded independently; there is no streaming or partial
//! decode.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::annotation::Annotation;

/// Identifier selecting which compiler/runtime environment runs the source.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolchainId(String);

impl ToolchainId {
    /// Create from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ToolchainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ToolchainId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Commands exchanged between client and server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Client → server: build and run `source` with `toolchain`.
    Run(String, ToolchainId),
    /// Server → client: program output (or build log) plus diagnostics.
    Output(String, Vec<Annotation>),
}

impl Command {
    /// Build an `Output` response.
    #[must_use]
    pub fn output(text: impl Into<String>, annotations: Vec<Annotation>) -> Self {
        Self::Output(text.into(), annotations)
    }

    /// Short tag used in logs and metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Run(..) => "run",
            Self::Output(..) => "output",
        }
    }

    /// Extract the run request, if this is a `Run` command.
    #[must_use]
    pub fn into_run_request(self) -> Option<RunRequest> {
        match self {
            Self::Run(source_code, toolchain) => Some(RunRequest {
                source_code,
                toolchain,
            }),
            Self::Output(..) => None,
        }
    }
}

/// A decoded `Run` command, detached from the wire union.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunRequest {
    /// Submitted source text.
    pub source_code: String,
    /// Target toolchain.
    pub toolchain: ToolchainId,
}

/// Why a frame payload could not be decoded as a [`Command`].
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not valid UTF-8.
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    /// The payload is text but does not match the command schema.
    #[error("malformed command: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Decode a raw payload.
pub fn decode(payload: &[u8]) -> Result<Command, DecodeError> {
    let text = std::str::from_utf8(payload)?;
    decode_text(text)
}

/// Decode a payload that is already known to be UTF-8.
pub fn decode_text(text: &str) -> Result<Command, DecodeError> {
    Ok(serde_json::from_str(text)?)
}

/// Encode a command as JSON text.
///
/// Serializing these types cannot fail in practice. If it ever does, the
/// failure is logged and an empty string is returned; callers never send
/// an empty frame.
pub fn encode(command: &Command) -> String {
    serde_json::to_string(command).unwrap_or_else(|e| {
        error!(kind = command.kind(), error = %e, "failed to serialize command");
        String::new()
    })
}
