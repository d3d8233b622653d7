use std::time::Duration;

use async_trait::async_trait;

use super::Strategy;
use crate::engine::profile::{LanguageProfile, apply_template};
use crate::engine::runner::{ProcessOutput, ProcessRunner, Termination};
use crate::engine::workspace::Workspace;
use crate::engine::{EngineError, ExecutionOutcome, Stage};

/// Limits shared by every external toolchain stage
#[derive(Debug, Clone, Copy)]
pub struct StageLimits {
    pub compile_timeout: Duration,
    pub run_timeout: Duration,
    pub max_output: usize,
}

/// Write source, optionally compile, then run, all inside the workspace
pub struct ToolchainPipeline {
    profile: LanguageProfile,
    runner: ProcessRunner,
    limits: StageLimits,
}

impl ToolchainPipeline {
    pub fn new(profile: LanguageProfile, runner: ProcessRunner, limits: StageLimits) -> Self {
        Self {
            profile,
            runner,
            limits,
        }
    }

    /// Runs the compile stage, returning an outcome only when the pipeline must stop
    async fn compile(
        &self,
        template: &[String],
        source_file: &str,
        workspace: &Workspace,
    ) -> Result<Option<ExecutionOutcome>, EngineError> {
        let command = apply_template(template, source_file);
        log::debug!("Compiling {source_file} in {}", workspace.name());

        let output = self
            .runner
            .run(
                &command,
                workspace.path()?,
                self.limits.compile_timeout,
                self.limits.max_output,
            )
            .await?;

        let outcome = match output.termination {
            Termination::Exited(0) => None,
            Termination::TimedOut => Some(ExecutionOutcome::TimedOut {
                stage: Stage::Compile,
                limit: self.limits.compile_timeout,
            }),
            Termination::OutputTooLarge => Some(ExecutionOutcome::OutputTooLarge {
                limit: self.limits.max_output,
            }),
            Termination::Exited(_) | Termination::Signaled(_) => {
                Some(ExecutionOutcome::CompileFailure {
                    diagnostics: diagnostics_of(output),
                })
            }
        };

        Ok(outcome)
    }

    async fn run(
        &self,
        source_file: &str,
        workspace: &Workspace,
    ) -> Result<ExecutionOutcome, EngineError> {
        let command = apply_template(&self.profile.run, source_file);
        log::debug!("Running {source_file} in {}", workspace.name());

        let output = self
            .runner
            .run(
                &command,
                workspace.path()?,
                self.limits.run_timeout,
                self.limits.max_output,
            )
            .await?;

        let outcome = match output.termination {
            Termination::Exited(0) => ExecutionOutcome::Success {
                result: output.stdout,
                console: output.stderr,
            },
            Termination::TimedOut => ExecutionOutcome::TimedOut {
                stage: Stage::Run,
                limit: self.limits.run_timeout,
            },
            Termination::OutputTooLarge => ExecutionOutcome::OutputTooLarge {
                limit: self.limits.max_output,
            },
            status @ (Termination::Exited(_) | Termination::Signaled(_)) => {
                ExecutionOutcome::RuntimeFailure {
                    stdout: output.stdout,
                    stderr: output.stderr,
                    status: Some(status),
                }
            }
        };

        Ok(outcome)
    }
}

#[async_trait]
impl Strategy for ToolchainPipeline {
    fn needs_workspace(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        code: &str,
        workspace: &Workspace,
    ) -> Result<ExecutionOutcome, EngineError> {
        let source_file = self.profile.source.resolve(code);
        tokio::fs::write(workspace.path()?.join(&source_file), code).await?;

        if let Some(template) = &self.profile.compile
            && let Some(stopped) = self.compile(template, &source_file, workspace).await?
        {
            log::debug!("{} compile stage stopped the pipeline", self.profile.name);
            return Ok(stopped);
        }

        self.run(&source_file, workspace).await
    }
}

/// Compilers report on stderr, a few only on stdout
fn diagnostics_of(output: ProcessOutput) -> String {
    if output.stderr.is_empty() {
        output.stdout
    } else {
        output.stderr
    }
}
