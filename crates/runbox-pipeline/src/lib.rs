//! # runbox-pipeline
//!
//! Bridge between a `run` command and the external build/run machinery.
//!
//! - [`BuildPipeline`]: compiles and executes submitted source, reporting a
//!   [`BuildOutcome`]
//! - [`DiagnosticParser`]: extracts [`Annotation`](runbox_core::Annotation)s
//!   from failed-build output
//! - [`RunService`]: turns a [`RunRequest`](runbox_core::RunRequest) into the
//!   `output` command sent back to the client
//!
//! Default collaborators ([`ProcessPipeline`], [`LineDiagnosticParser`]) are
//! provided for the binary; tests and embedders can plug in their own.

#![deny(unsafe_code)]

pub mod diagnostics;
pub mod outcome;
pub mod process;
pub mod service;

pub use diagnostics::{DiagnosticParser, LineDiagnosticParser, ParseError};
pub use outcome::{BuildOutcome, BuildPipeline};
pub use process::ProcessPipeline;
pub use service::RunService;
