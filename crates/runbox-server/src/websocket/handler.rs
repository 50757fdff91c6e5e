//! Inbound frame classification.
//!
//! Maps each `WebSocket` message to the action the session loop should
//! take. Pure: no I/O, no connection state.

use axum::extract::ws::{Message, close_code};
use runbox_core::{DecodeError, RunRequest, decode_text};
use thiserror::Error;

/// A frame that terminates the session.
#[derive(Debug, Error)]
pub enum ProtocolViolation {
    /// Binary frames are never valid input.
    #[error("binary frame received ({len} bytes)")]
    BinaryFrame {
        /// Payload length.
        len: usize,
    },
    /// Text frame that is not a valid command.
    #[error("undecodable command: {0}")]
    Undecodable(#[source] DecodeError),
    /// A `run` arrived while the session's command queue was full.
    #[error("more than {capacity} commands pending")]
    QueueOverflow {
        /// Configured queue capacity.
        capacity: usize,
    },
}

impl ProtocolViolation {
    /// Close status sent to the client.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::BinaryFrame { .. } => close_code::UNSUPPORTED,
            Self::Undecodable(_) => close_code::PROTOCOL,
            Self::QueueOverflow { .. } => close_code::POLICY,
        }
    }

    /// Close reason sent to the client.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::BinaryFrame { .. } => "binary frames are not accepted",
            Self::Undecodable(_) => "malformed command",
            Self::QueueOverflow { .. } => "too many pending commands",
        }
    }

    /// Metrics label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::BinaryFrame { .. } => "binary_frame",
            Self::Undecodable(_) => "undecodable",
            Self::QueueOverflow { .. } => "queue_overflow",
        }
    }
}

/// What the session loop does with one inbound frame.
#[derive(Debug)]
pub enum FrameAction {
    /// Queue a `run` command for execution.
    Dispatch(RunRequest),
    /// Nothing to do. Carries a short description for debug logs.
    Ignore(&'static str),
    /// Client answered a keepalive ping.
    Pong,
    /// Close the session with the violation's status code.
    Reject(ProtocolViolation),
    /// Client sent a close frame, with its status code if any.
    PeerClosed(Option<u16>),
}

/// Classify an inbound frame.
///
/// Commands other than `run` decode successfully but are ignored, so newer
/// clients can send message kinds this server does not know yet without
/// being disconnected. Pings are answered by the transport itself.
pub fn classify_frame(message: &Message) -> FrameAction {
    match message {
        Message::Text(text) => match decode_text(text.as_str()) {
            Ok(command) => {
                let kind = command.kind();
                command
                    .into_run_request()
                    .map_or(FrameAction::Ignore(kind), FrameAction::Dispatch)
            }
            Err(e) => FrameAction::Reject(ProtocolViolation::Undecodable(e)),
        },
        Message::Binary(data) => {
            FrameAction::Reject(ProtocolViolation::BinaryFrame { len: data.len() })
        }
        Message::Ping(_) => FrameAction::Ignore("ping"),
        Message::Pong(_) => FrameAction::Pong,
        Message::Close(frame) => FrameAction::PeerClosed(frame.as_ref().map(|f| f.code)),
    }
}
