//! Build/run pipeline settings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Settings for the process-backed build/run pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    /// Per-step timeout (build and run each), in milliseconds.
    pub timeout_ms: u64,
    /// Known toolchains keyed by the identifier clients send.
    pub toolchains: BTreeMap<String, ToolchainSettings>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let mut toolchains = BTreeMap::new();
        let _ = toolchains.insert(
            "stable".to_string(),
            ToolchainSettings {
                source_file: "main.swift".to_string(),
                build: vec![
                    "swiftc".to_string(),
                    "-o".to_string(),
                    "main".to_string(),
                    "main.swift".to_string(),
                ],
                run: vec!["./main".to_string()],
            },
        );
        Self {
            timeout_ms: 30_000,
            toolchains,
        }
    }
}

/// How to build and run one toolchain.
///
/// Commands run with the per-invocation scratch directory as their working
/// directory; `source_file` is written there first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolchainSettings {
    /// File name the submitted source is written to.
    pub source_file: String,
    /// Build command argv.
    pub build: Vec<String>,
    /// Run command argv.
    pub run: Vec<String>,
}
