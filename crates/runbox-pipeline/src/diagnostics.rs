//! Diagnostic extraction from raw compiler output.

use std::sync::LazyLock;

use regex::Regex;
use runbox_core::{Annotation, Severity};
use thiserror::Error;

/// Why no diagnostics could be extracted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The compiler produced no output at all.
    #[error("compiler output is empty")]
    Empty,
    /// Output was present but contained no recognisable diagnostic.
    #[error("no diagnostics found in {lines} line(s) of compiler output")]
    NoDiagnostics {
        /// Number of lines scanned.
        lines: usize,
    },
}

/// Extracts structured diagnostics from raw compiler output.
#[cfg_attr(test, mockall::automock)]
pub trait DiagnosticParser: Send + Sync {
    /// Parse `raw` into annotations, in the order they appear.
    fn parse(&self, raw: &str) -> Result<Vec<Annotation>, ParseError>;
}

static DIAGNOSTIC_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<path>[^:]+):(?P<line>\d+):(?P<column>\d+):\s+(?P<severity>fatal error|error|warning|note|remark):\s+(?P<message>.+)$",
    )
    .expect("valid diagnostic regex")
});

/// Parser for the `path:line:column: severity: message` format emitted by
/// swiftc, clang, gcc and rustc's short mode.
///
/// Lines that do not match (source excerpts, caret markers, summaries) are
/// skipped.
#[derive(Clone, Copy, Debug, Default)]
pub struct LineDiagnosticParser;

impl LineDiagnosticParser {
    /// Create a parser.
    pub fn new() -> Self {
        Self
    }

    fn parse_line(line: &str) -> Option<Annotation> {
        let caps = DIAGNOSTIC_LINE.captures(line.trim_end())?;
        let severity = Severity::from_label(&caps["severity"])?;
        let line_no = caps["line"].parse().ok()?;
        let column = caps["column"].parse().ok()?;
        Some(Annotation::new(
            severity,
            line_no,
            column,
            caps["message"].trim(),
        ))
    }
}

impl DiagnosticParser for LineDiagnosticParser {
    fn parse(&self, raw: &str) -> Result<Vec<Annotation>, ParseError> {
        if raw.trim().is_empty() {
            return Err(ParseError::Empty);
        }
        let annotations: Vec<Annotation> = raw.lines().filter_map(Self::parse_line).collect();
        if annotations.is_empty() {
            return Err(ParseError::NoDiagnostics {
                lines: raw.lines().count(),
            });
        }
        Ok(annotations)
    }
}
