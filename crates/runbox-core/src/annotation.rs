//! Structured diagnostics extracted from failed-build output.
//!
//! On the wire an annotation is a flat object:
//!
//! ```json
//! {"severity":"error","line":3,"column":7,"message":"cannot find 'x' in scope"}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Diagnostic severity as reported by the compiler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The build cannot succeed.
    Error,
    /// Suspicious but non-fatal.
    Warning,
    /// Supplementary information attached to another diagnostic.
    Note,
    /// Informational remark (optimisation reports and similar).
    Remark,
}

impl Severity {
    /// Parse a compiler severity word (case-insensitive).
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "error" | "fatal error" => Some(Self::Error),
            "warning" => Some(Self::Warning),
            "note" => Some(Self::Note),
            "remark" => Some(Self::Remark),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Note => write!(f, "note"),
            Self::Remark => write!(f, "remark"),
        }
    }
}

/// 1-based source position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Line number.
    pub line: u32,
    /// Column number.
    pub column: u32,
}

/// One diagnostic attached to a failed build.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Severity of the diagnostic.
    pub severity: Severity,
    /// Where in the submitted source it points.
    #[serde(flatten)]
    pub location: Location,
    /// Human-readable message.
    pub message: String,
}

impl Annotation {
    /// Build an annotation from its parts.
    #[must_use]
    pub fn new(severity: Severity, line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            severity,
            location: Location { line, column },
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_flat() {
        let a = Annotation::new(Severity::Error, 3, 7, "boom");
        let value = serde_json::to_value(&a).unwrap();
        assert_eq!(
            value,
            json!({"severity": "error", "line": 3, "column": 7, "message": "boom"})
        );
    }

    #[test]
    fn deserializes_flat() {
        let a: Annotation = serde_json::from_value(
            json!({"severity": "warning", "line": 1, "column": 2, "message": "unused"}),
        )
        .unwrap();
        assert_eq!(a.severity, Severity::Warning);
        assert_eq!(a.location, Location { line: 1, column: 2 });
        assert_eq!(a.message, "unused");
    }

    #[test]
    fn unknown_severity_rejected() {
        let result = serde_json::from_value::<Annotation>(
            json!({"severity": "catastrophe", "line": 1, "column": 1, "message": "x"}),
        );
        assert!(result.is_err());
    }

    #[test]
    fn severity_from_label() {
        assert_eq!(Severity::from_label("error"), Some(Severity::Error));
        assert_eq!(Severity::from_label("fatal error"), Some(Severity::Error));
        assert_eq!(Severity::from_label("Warning"), Some(Severity::Warning));
        assert_eq!(Severity::from_label("note"), Some(Severity::Note));
        assert_eq!(Severity::from_label("remark"), Some(Severity::Remark));
        assert_eq!(Severity::from_label("info"), None);
    }

    #[test]
    fn severity_display_matches_wire() {
        for sev in [Severity::Error, Severity::Warning, Severity::Note, Severity::Remark] {
            let wire = serde_json::to_value(sev).unwrap();
            assert_eq!(wire, json!(sev.to_string()));
        }
    }
}
