mod sandboxed;
mod toolchain;

pub use sandboxed::{SandboxLimits, SandboxedEvaluation};
pub use toolchain::{StageLimits, ToolchainPipeline};

use std::sync::Arc;

use async_trait::async_trait;

use super::profile::{LanguageProfile, ProfileKind};
use super::runner::ProcessRunner;
use super::workspace::Workspace;
use super::{EngineError, ExecutionOutcome};

/// Pipeline that turns one submission into an [`ExecutionOutcome`]
///
/// Implementations never clean up after themselves: the caller owns the workspace and
/// releases it on every path. Anything the submitted code does wrong is an outcome, an
/// `Err` means the engine itself could not do its job.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Whether the strategy needs a directory on disk
    fn needs_workspace(&self) -> bool;

    async fn execute(
        &self,
        code: &str,
        workspace: &Workspace,
    ) -> Result<ExecutionOutcome, EngineError>;
}

/// Picks the pipeline for one row of the language table
pub fn for_profile(
    profile: &LanguageProfile,
    runner: &ProcessRunner,
    stages: StageLimits,
    sandbox: SandboxLimits,
) -> Arc<dyn Strategy> {
    match profile.kind {
        ProfileKind::Sandboxed => Arc::new(SandboxedEvaluation::new(sandbox)),
        ProfileKind::Toolchain => Arc::new(ToolchainPipeline::new(
            profile.clone(),
            runner.clone(),
            stages,
        )),
    }
}
