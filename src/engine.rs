mod error;
pub mod probe;
pub mod profile;
pub mod runner;
pub mod strategy;
pub mod workspace;

pub use error::EngineError;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::config::EngineConfig;
use probe::CapabilityProber;
use profile::{LanguageProfile, LanguageTable};
use runner::{ProcessRunner, Termination};
use strategy::{SandboxLimits, StageLimits, Strategy};
use workspace::{Workspace, WorkspaceManager, WorkspaceStats};

/// Appended when `consoleOutput` is cut to the diagnostic cap
const TRUNCATION_MARKER: &str = "\n... (output truncated)";

/// Submission as received from the caller, before validation
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ExecutionRequest {
    pub code: Option<String>,
    pub language: Option<String>,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            language: Some(language.into()),
        }
    }
}

/// Public result contract; both fields are always present
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub result: String,
    pub console_output: String,
}

/// Pipeline stage an outcome refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Compile,
    Run,
    Evaluate,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Compile => "Compilation",
            Self::Run => "Execution",
            Self::Evaluate => "Evaluation",
        };
        f.write_str(name)
    }
}

/// What running the submission produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success {
        result: String,
        console: String,
    },
    CompileFailure {
        diagnostics: String,
    },
    RuntimeFailure {
        stdout: String,
        stderr: String,
        /// Exit status of the run stage, `None` for in-process evaluation
        status: Option<Termination>,
    },
    TimedOut {
        stage: Stage,
        limit: Duration,
    },
    OutputTooLarge {
        limit: usize,
    },
}

impl ExecutionOutcome {
    /// Maps every outcome to the public contract, capping the echoed diagnostics
    pub fn into_result(self, max_diagnostic: usize) -> ExecutionResult {
        let (result, console_output) = match self {
            Self::Success { result, console } => (result, console),
            Self::CompileFailure { diagnostics } => (String::new(), diagnostics),
            Self::RuntimeFailure {
                stdout,
                stderr,
                status,
            } => {
                let console = match (stderr.is_empty(), status) {
                    (false, _) => stderr,
                    (true, Some(Termination::Exited(code))) => {
                        format!("Process exited with status {code}")
                    }
                    (true, Some(Termination::Signaled(signal))) => {
                        format!("Process terminated by signal {signal}")
                    }
                    (true, _) => "Execution failed".to_string(),
                };
                (stdout, console)
            }
            Self::TimedOut { stage, limit } => (
                String::new(),
                format!("{stage} timed out after {} ms", limit.as_millis()),
            ),
            Self::OutputTooLarge { limit } => (
                String::new(),
                format!("Output exceeded the limit of {limit} bytes"),
            ),
        };

        ExecutionResult {
            result,
            console_output: truncate(console_output, max_diagnostic),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::CompileFailure { .. } => "compile failure",
            Self::RuntimeFailure { .. } => "runtime failure",
            Self::TimedOut { .. } => "timeout",
            Self::OutputTooLarge { .. } => "output too large",
        }
    }
}

fn truncate(mut text: String, max: usize) -> String {
    if text.len() <= max {
        return text;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str(TRUNCATION_MARKER);
    text
}

/// Availability of one configured language
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct LanguageStatus {
    pub name: String,
    pub aliases: Vec<String>,
    pub sandboxed: bool,
    pub available: bool,
}

/// Validates requests, gates them on toolchain availability and dispatches them
pub struct Engine {
    table: LanguageTable,
    strategies: HashMap<String, Arc<dyn Strategy>>,
    prober: CapabilityProber,
    workspaces: WorkspaceManager,
    permits: Semaphore,
    max_diagnostic: usize,
}

impl Engine {
    pub fn new(config: &EngineConfig, table: LanguageTable) -> Self {
        let runner = ProcessRunner::new(config.max_file_size.0);
        let stages = StageLimits {
            compile_timeout: config.compile_time_limit.into(),
            run_timeout: config.run_time_limit.into(),
            max_output: config.max_output.as_usize(),
        };
        let sandbox = SandboxLimits {
            time_limit: config.sandbox_time_limit.into(),
            heap_limit: config.sandbox_heap_limit.as_usize(),
        };

        let strategies = table
            .iter()
            .map(|profile| {
                let strategy = strategy::for_profile(profile, &runner, stages, sandbox);
                (profile.name.clone(), strategy)
            })
            .collect();

        Self {
            strategies,
            prober: CapabilityProber::new(
                runner,
                config.probe_time_limit.into(),
                config.probe_cache_ttl.into(),
            ),
            workspaces: WorkspaceManager::new(config.workspace_root()),
            permits: Semaphore::new(config.max_concurrency()),
            max_diagnostic: config.max_diagnostic.as_usize(),
            table,
        }
    }

    /// Runs one submission end to end
    ///
    /// Compile errors, crashes, timeouts and runaway output come back as `Ok` with the
    /// diagnostic in `console_output`. Only malformed requests, missing toolchains and
    /// infrastructure faults are errors.
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, EngineError> {
        let (code, profile) = self.validate(request)?;

        if !self.prober.is_supported(profile).await {
            return Err(EngineError::ToolchainUnavailable(profile.name.clone()));
        }

        let strategy = self.strategies.get(&profile.name).ok_or_else(|| {
            EngineError::Infrastructure(format!("no strategy for {}", profile.name))
        })?;

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| EngineError::Infrastructure(e.to_string()))?;

        log::info!(
            "Executing {} submission ({} bytes)",
            profile.name,
            code.len()
        );

        let workspace = if strategy.needs_workspace() {
            self.workspaces.acquire().await?
        } else {
            Workspace::in_memory()
        };
        let outcome = strategy.execute(code, &workspace).await;
        workspace.close().await;

        let outcome = outcome.inspect_err(|e| {
            log::error!("Execution of {} submission failed: {e}", profile.name);
        })?;
        log::info!("{} submission finished: {}", profile.name, outcome.label());

        Ok(outcome.into_result(self.max_diagnostic))
    }

    fn validate<'a>(
        &'a self,
        request: &'a ExecutionRequest,
    ) -> Result<(&'a str, &'a LanguageProfile), EngineError> {
        let code = request
            .code
            .as_deref()
            .filter(|code| !code.trim().is_empty())
            .ok_or_else(|| EngineError::Invalid("code must be a non-empty string".to_string()))?;

        let language = request
            .language
            .as_deref()
            .map(str::trim)
            .filter(|language| !language.is_empty())
            .ok_or_else(|| EngineError::Invalid("language is required".to_string()))?;

        let profile = self
            .table
            .lookup(language)
            .ok_or_else(|| EngineError::Invalid(format!("unknown language '{language}'")))?;

        Ok((code, profile))
    }

    /// Every configured language with its current availability
    pub async fn languages(&self) -> Vec<LanguageStatus> {
        let mut statuses = Vec::new();
        for profile in self.table.iter() {
            statuses.push(LanguageStatus {
                name: profile.name.clone(),
                aliases: profile.aliases.clone(),
                sandboxed: profile.is_sandboxed(),
                available: self.prober.is_supported(profile).await,
            });
        }
        statuses
    }

    pub fn workspace_stats(&self) -> WorkspaceStats {
        self.workspaces.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_failure_maps_to_console() {
        let result = ExecutionOutcome::CompileFailure {
            diagnostics: "main.c:1: error".to_string(),
        }
        .into_result(1024);
        assert_eq!(result.result, "");
        assert_eq!(result.console_output, "main.c:1: error");
    }

    #[test]
    fn test_runtime_failure_without_stderr_reports_status() {
        let result = ExecutionOutcome::RuntimeFailure {
            stdout: "partial".to_string(),
            stderr: String::new(),
            status: Some(Termination::Exited(3)),
        }
        .into_result(1024);
        assert_eq!(result.result, "partial");
        assert_eq!(result.console_output, "Process exited with status 3");

        let result = ExecutionOutcome::RuntimeFailure {
            stdout: String::new(),
            stderr: String::new(),
            status: Some(Termination::Signaled(9)),
        }
        .into_result(1024);
        assert_eq!(result.console_output, "Process terminated by signal 9");
    }

    #[test]
    fn test_timeout_and_output_cap_messages() {
        let result = ExecutionOutcome::TimedOut {
            stage: Stage::Compile,
            limit: Duration::from_secs(10),
        }
        .into_result(1024);
        assert_eq!(result.result, "");
        assert_eq!(result.console_output, "Compilation timed out after 10000 ms");

        let result = ExecutionOutcome::OutputTooLarge { limit: 4096 }.into_result(1024);
        assert_eq!(result.console_output, "Output exceeded the limit of 4096 bytes");
    }

    #[test]
    fn test_diagnostics_are_truncated_on_char_boundary() {
        let result = ExecutionOutcome::CompileFailure {
            diagnostics: "é".repeat(10),
        }
        .into_result(5);
        assert_eq!(result.console_output, format!("éé{TRUNCATION_MARKER}"));
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let json = serde_json::to_value(ExecutionResult {
            result: "1".to_string(),
            console_output: String::new(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "result": "1", "consoleOutput": "" }));
    }
}
