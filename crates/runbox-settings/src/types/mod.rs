//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` on the JSON side and
//! `#[serde(default)]` so a partial settings file only overrides what it
//! names.

mod pipeline;
mod server;

pub use pipeline::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9090 },
///   "logging": { "level": "debug" },
///   "pipeline": { "timeoutMs": 20000 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunboxSettings {
    /// Network and session settings.
    pub server: ServerSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
    /// Build/run pipeline settings.
    pub pipeline: PipelineSettings,
}

impl RunboxSettings {
    /// Reject combinations that would leave the server unable to serve.
    pub fn validate(&self) -> Result<()> {
        if self.server.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections must be at least 1".into(),
            ));
        }
        if self.server.keepalive_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.keepaliveIntervalMs must be positive".into(),
            ));
        }
        for (name, toolchain) in &self.pipeline.toolchains {
            if toolchain.build.is_empty() || toolchain.run.is_empty() {
                return Err(SettingsError::InvalidValue(format!(
                    "toolchain '{name}' needs both build and run commands"
                )));
            }
            if toolchain.source_file.is_empty() {
                return Err(SettingsError::InvalidValue(format!(
                    "toolchain '{name}' has an empty sourceFile"
                )));
            }
        }
        Ok(())
    }
}
