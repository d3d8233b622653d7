use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use deno_core::{JsRuntime, RuntimeOptions, v8};
use tokio::sync::oneshot;

use super::Strategy;
use crate::engine::workspace::Workspace;
use crate::engine::{EngineError, ExecutionOutcome, Stage};

/// Installs a buffer-backed console and hides the host bridge.
///
/// The completion value is the function that reads the buffer back, so the host keeps
/// access to it even if the submission overwrites globals.
const CONSOLE_PRELUDE: &str = r#"
(() => {
  const lines = [];
  const record = (...args) => {
    lines.push(args.map((arg) => String(arg)).join(" "));
  };
  const console = Object.freeze({
    log: record,
    info: record,
    warn: record,
    error: record,
    debug: record,
    trace: record,
  });
  Object.defineProperty(globalThis, "console", {
    value: console,
    writable: true,
    enumerable: false,
    configurable: true,
  });
  delete globalThis.Deno;
  return () => lines.join("\n");
})();
"#;

#[derive(Debug, Clone, Copy)]
pub struct SandboxLimits {
    pub time_limit: Duration,
    pub heap_limit: usize,
}

/// Evaluates JavaScript in a fresh embedded V8 isolate per submission
///
/// The isolate gets no extensions, so the submission can reach neither the filesystem,
/// the network nor child processes.
pub struct SandboxedEvaluation {
    limits: SandboxLimits,
}

#[derive(Debug, Default)]
struct Flags {
    timed_out: AtomicBool,
    heap_exhausted: AtomicBool,
}

#[derive(Debug)]
enum Evaluation {
    Completed { value: String, logs: String },
    Threw { error: String, logs: String },
}

/// Terminates the isolate if the owning request goes away before the evaluation ends
struct TerminateOnDrop(Option<v8::IsolateHandle>);

impl TerminateOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for TerminateOnDrop {
    fn drop(&mut self) {
        if let Some(isolate) = self.0.take() {
            isolate.terminate_execution();
        }
    }
}

impl SandboxedEvaluation {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }
}

#[async_trait]
impl Strategy for SandboxedEvaluation {
    fn needs_workspace(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        code: &str,
        _workspace: &Workspace,
    ) -> Result<ExecutionOutcome, EngineError> {
        let flags = Arc::new(Flags::default());
        let (handle_tx, handle_rx) = oneshot::channel();

        let code = code.to_string();
        let heap_limit = self.limits.heap_limit;
        let task_flags = flags.clone();
        let mut task =
            tokio::task::spawn_blocking(move || evaluate(code, heap_limit, task_flags, handle_tx));

        let Ok(isolate) = handle_rx.await else {
            task.await??;
            return Err(EngineError::Infrastructure(
                "sandbox isolate did not start".to_string(),
            ));
        };
        let guard = TerminateOnDrop(Some(isolate.clone()));

        let evaluation = match tokio::time::timeout(self.limits.time_limit, &mut task).await {
            Ok(joined) => joined??,
            Err(_) => {
                flags.timed_out.store(true, Ordering::SeqCst);
                isolate.terminate_execution();
                log::warn!(
                    "Sandboxed evaluation terminated after {:?}",
                    self.limits.time_limit
                );
                task.await??
            }
        };
        guard.disarm();

        if flags.timed_out.load(Ordering::SeqCst) {
            return Ok(ExecutionOutcome::TimedOut {
                stage: Stage::Evaluate,
                limit: self.limits.time_limit,
            });
        }

        let outcome = match evaluation {
            Evaluation::Completed { value, logs } => ExecutionOutcome::Success {
                result: value,
                console: logs,
            },
            Evaluation::Threw { error, logs } => {
                let error = if flags.heap_exhausted.load(Ordering::SeqCst) {
                    format!("Memory limit of {heap_limit} bytes exceeded")
                } else {
                    error
                };
                ExecutionOutcome::RuntimeFailure {
                    stdout: String::new(),
                    stderr: join_lines(&logs, &error),
                    status: None,
                }
            }
        };

        Ok(outcome)
    }
}

/// Runs on a blocking thread; the isolate lives and dies on that thread
fn evaluate(
    code: String,
    heap_limit: usize,
    flags: Arc<Flags>,
    handle_tx: oneshot::Sender<v8::IsolateHandle>,
) -> Result<Evaluation, EngineError> {
    let initial = (heap_limit / 10).min(10 << 20);
    let mut runtime = JsRuntime::new(RuntimeOptions {
        create_params: Some(v8::CreateParams::default().heap_limits(initial, heap_limit)),
        ..Default::default()
    });

    let isolate = runtime.v8_isolate().thread_safe_handle();
    let heap_isolate = isolate.clone();
    runtime.add_near_heap_limit_callback(move |current, _initial| {
        flags.heap_exhausted.store(true, Ordering::SeqCst);
        heap_isolate.terminate_execution();
        // Room for the termination to unwind instead of aborting the process
        current * 2
    });

    if handle_tx.send(isolate).is_err() {
        return Err(EngineError::Infrastructure(
            "sandbox request was abandoned".to_string(),
        ));
    }

    let drain = runtime
        .execute_script("<console>", CONSOLE_PRELUDE)
        .map_err(|e| EngineError::Infrastructure(format!("sandbox prelude failed: {e}")))?;
    let submitted = runtime.execute_script("<submission>", code);

    let scope = &mut runtime.handle_scope();
    let logs = read_logs(scope, &drain);
    let evaluation = match submitted {
        Ok(value) => {
            let value = v8::Local::new(scope, value);
            let value = if value.is_undefined() {
                String::new()
            } else {
                value.to_rust_string_lossy(scope)
            };
            Evaluation::Completed { value, logs }
        }
        Err(e) => Evaluation::Threw {
            error: e.to_string(),
            logs,
        },
    };

    Ok(evaluation)
}

fn read_logs(scope: &mut v8::HandleScope, drain: &v8::Global<v8::Value>) -> String {
    let drain = v8::Local::new(scope, drain);
    let Ok(drain) = v8::Local::<v8::Function>::try_from(drain) else {
        return String::new();
    };
    let receiver = v8::undefined(scope).into();
    drain
        .call(scope, receiver, &[])
        .map(|logs| logs.to_rust_string_lossy(scope).trim().to_string())
        .unwrap_or_default()
}

fn join_lines(first: &str, second: &str) -> String {
    match (first.is_empty(), second.is_empty()) {
        (true, _) => second.to_string(),
        (_, true) => first.to_string(),
        _ => format!("{first}\n{second}"),
    }
}
