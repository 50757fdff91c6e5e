//! Build/run outcomes and the pipeline seam.

use async_trait::async_trait;
use runbox_core::ToolchainId;

/// Result of one build-then-run invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildOutcome {
    /// The program built and ran; carries captured stdout.
    Success(String),
    /// The build failed; carries raw compiler output.
    BuildFailure(String),
    /// Anything else went wrong; carries a description.
    OtherError(String),
}

impl BuildOutcome {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::BuildFailure(_) => "build_failure",
            Self::OtherError(_) => "other_error",
        }
    }
}

/// Compiles and executes submitted source.
///
/// Implementations must be independent per call: no shared build cache or
/// working directory between concurrent invocations.
#[async_trait]
pub trait BuildPipeline: Send + Sync {
    /// Build `source` with `toolchain` and run the result.
    async fn build_and_run(&self, source: &str, toolchain: &ToolchainId) -> BuildOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_labels() {
        assert_eq!(BuildOutcome::Success(String::new()).kind(), "success");
        assert_eq!(BuildOutcome::BuildFailure(String::new()).kind(), "build_failure");
        assert_eq!(BuildOutcome::OtherError(String::new()).kind(), "other_error");
    }
}
