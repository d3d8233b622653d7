use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::EngineError;

/// How long pipe readers may keep draining after the process group is gone
const READER_GRACE: Duration = Duration::from_millis(500);
const READ_CHUNK: usize = 8192;

/// How a child process came to an end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
    TimedOut,
    OutputTooLarge,
}

/// Captured result of one child process
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Trimmed standard output, empty when the output cap was hit
    pub stdout: String,
    /// Trimmed standard error, empty when the output cap was hit
    pub stderr: String,
    pub termination: Termination,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.termination == Termination::Exited(0)
    }
}

enum Waited {
    Exited(ExitStatus),
    TimedOut,
    OutputTooLarge,
}

/// Resource limits applied in the child between fork and exec
#[derive(Debug, Clone, Copy)]
struct ChildLimits {
    cpu_seconds: u64,
    file_size: u64,
}

impl ChildLimits {
    /// Puts the child in its own process group and lowers its rlimits
    fn apply(self) -> io::Result<()> {
        // SAFETY: setpgid is async-signal-safe and only affects the calling process
        if unsafe { libc::setpgid(0, 0) } != 0 {
            return Err(io::Error::last_os_error());
        }

        let limits = [
            (libc::RLIMIT_CORE, 0),
            (libc::RLIMIT_CPU, self.cpu_seconds),
            (libc::RLIMIT_FSIZE, self.file_size),
        ];
        for (resource, value) in limits {
            let mut current = libc::rlimit {
                rlim_cur: 0,
                rlim_max: 0,
            };
            // SAFETY: getrlimit/setrlimit are async-signal-safe and only touch `current`
            unsafe {
                if libc::getrlimit(resource, &mut current) != 0 {
                    return Err(io::Error::last_os_error());
                }
                let value = (value as libc::rlim_t).min(current.rlim_max);
                let lowered = libc::rlimit {
                    rlim_cur: value,
                    rlim_max: value,
                };
                if libc::setrlimit(resource, &lowered) != 0 {
                    return Err(io::Error::last_os_error());
                }
            }
        }

        Ok(())
    }
}

/// Spawns single external processes under a deadline and an output cap
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    max_file_size: u64,
}

impl ProcessRunner {
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    /// Runs `command` inside `working_dir`
    ///
    /// The process is killed together with its whole process group when `timeout` elapses
    /// or when stdout and stderr together exceed `max_output` bytes. Only a failure to
    /// spawn at all is an error; every other ending is described by [`Termination`].
    pub async fn run(
        &self,
        command: &[String],
        working_dir: &Path,
        timeout: Duration,
        max_output: usize,
    ) -> Result<ProcessOutput, EngineError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| EngineError::Infrastructure("empty command".to_string()))?;
        let program = resolve_program(program, working_dir);

        let limits = ChildLimits {
            cpu_seconds: cpu_budget(timeout),
            file_size: self.max_file_size,
        };
        let mut cmd = Command::new(&program);
        cmd.args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // SAFETY: the hook only calls async-signal-safe libc functions
        unsafe {
            cmd.pre_exec(move || limits.apply());
        }

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            EngineError::Infrastructure(format!("failed to spawn {}: {e}", program.display()))
        })?;
        let group = child.id();
        log::debug!("Spawned {} as process group {group:?}", program.display());

        let total = Arc::new(AtomicUsize::new(0));
        let overflow = CancellationToken::new();
        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(drain(
                stdout,
                stdout_buf.clone(),
                total.clone(),
                max_output,
                overflow.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(drain(
                stderr,
                stderr_buf.clone(),
                total.clone(),
                max_output,
                overflow.clone(),
            )));
        }

        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status?),
            _ = tokio::time::sleep(timeout) => Waited::TimedOut,
            _ = overflow.cancelled() => Waited::OutputTooLarge,
        };

        // Also takes down anything the program left running in its group
        kill_group(group);
        if !matches!(waited, Waited::Exited(_)) {
            let _ = child.kill().await;
        }

        let aborts: Vec<_> = readers.iter().map(|r| r.abort_handle()).collect();
        let joined = async {
            for reader in readers {
                let _ = reader.await;
            }
        };
        if tokio::time::timeout(READER_GRACE, joined).await.is_err() {
            log::warn!(
                "Output pipes of {} stayed open after the process ended",
                program.display()
            );
            aborts.iter().for_each(|a| a.abort());
        }

        let termination = if overflow.is_cancelled() {
            Termination::OutputTooLarge
        } else {
            match waited {
                Waited::Exited(status) => termination_of(status),
                Waited::TimedOut => Termination::TimedOut,
                Waited::OutputTooLarge => Termination::OutputTooLarge,
            }
        };
        let elapsed = start.elapsed();

        match termination {
            Termination::TimedOut => {
                log::warn!("{} killed after {elapsed:?}: timed out", program.display())
            }
            Termination::OutputTooLarge => log::warn!(
                "{} killed after {elapsed:?}: output exceeded {max_output} bytes",
                program.display()
            ),
            other => log::debug!("{} finished after {elapsed:?}: {other:?}", program.display()),
        }

        // Partial output of a runaway process is discarded
        let (stdout, stderr) = if termination == Termination::OutputTooLarge {
            (String::new(), String::new())
        } else {
            (normalize(&stdout_buf.lock()), normalize(&stderr_buf.lock()))
        };

        Ok(ProcessOutput {
            stdout,
            stderr,
            termination,
            elapsed,
        })
    }
}

/// CPU seconds a child may burn: the wall-clock budget rounded up, plus one
fn cpu_budget(timeout: Duration) -> u64 {
    let whole = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    whole + 1
}

/// `./artifact` is resolved against the workspace rather than the server's directory
fn resolve_program(program: &str, working_dir: &Path) -> PathBuf {
    match program.strip_prefix("./") {
        Some(local) => working_dir.join(local),
        None => PathBuf::from(program),
    }
}

async fn drain<R: AsyncRead + Unpin>(
    mut reader: R,
    sink: Arc<Mutex<Vec<u8>>>,
    total: Arc<AtomicUsize>,
    cap: usize,
    overflow: CancellationToken,
) {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let seen = total.fetch_add(n, Ordering::Relaxed) + n;
        if seen > cap {
            overflow.cancel();
            break;
        }
        sink.lock().extend_from_slice(&buf[..n]);
    }
}

fn kill_group(group: Option<u32>) {
    let Some(pgid) = group.and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    // SAFETY: killpg only sends a signal; a group that no longer exists yields ESRCH
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

fn termination_of(status: ExitStatus) -> Termination {
    match (status.code(), status.signal()) {
        (Some(code), _) => Termination::Exited(code),
        (None, Some(signal)) => Termination::Signaled(signal),
        (None, None) => Termination::Exited(-1),
    }
}

fn normalize(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end().to_string()
}
