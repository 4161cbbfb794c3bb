//! Candidate programs: external executables and in-process callables.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use lemoneval_core::traits::{Program, RunFailure};

/// An external executable reading stdin and writing stdout.
#[derive(Debug, Clone)]
pub struct Executable {
    path: PathBuf,
    args: Vec<String>,
}

impl Executable {
    /// Wrap an executable file. Fails if the path does not exist, is not a
    /// file, or (on Unix) has no execute bit.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let metadata = std::fs::metadata(&path)
            .with_context(|| format!("program not found: {}", path.display()))?;
        anyhow::ensure!(metadata.is_file(), "program is not a file: {}", path.display());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            anyhow::ensure!(
                metadata.permissions().mode() & 0o111 != 0,
                "program is not executable: {}",
                path.display()
            );
        }

        Ok(Self {
            path,
            args: Vec::new(),
        })
    }

    /// Extra command-line arguments passed on every run.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Program for Executable {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn run(
        &self,
        input: &Path,
        output: &Path,
        time_limit: Duration,
    ) -> Result<(), RunFailure> {
        let stdin = std::fs::File::open(input)
            .map_err(|e| RunFailure::Crashed(format!("failed to open input: {e}")))?;
        let stdout = std::fs::File::create(output)
            .map_err(|e| RunFailure::Crashed(format!("failed to open output: {e}")))?;

        let mut cmd = Command::new(&self.path);
        cmd.args(&self.args)
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = output.parent() {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| RunFailure::Crashed(format!("failed to start {}: {e}", self.describe())))?;

        match tokio::time::timeout(time_limit, child.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(RunFailure::Exit(status.to_string())),
            Ok(Err(e)) => Err(RunFailure::Crashed(e.to_string())),
            Err(_) => {
                tracing::warn!("{} timed out after {:?}, killing", self.describe(), time_limit);
                if let Err(e) = child.kill().await {
                    tracing::warn!("failed to kill {}: {e}", self.describe());
                }
                Err(RunFailure::Timeout(time_limit))
            }
        }
    }
}

/// How long a timed-out callable gets to notice cancellation and return.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Cancellation signal handed to an in-process program.
///
/// Set once the time limit passes. Long-running callables should poll
/// [`CancelFlag::is_cancelled`] and return early.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
}

type ProgramFn = dyn Fn(&Path, &Path, &CancelFlag) -> Result<bool> + Send + Sync;

/// An in-process program: a callable taking the input and output paths.
///
/// `Ok(true)` is a normal exit. `Ok(false)` and `Err` count as runtime
/// failures. The callable runs on the blocking thread pool. On timeout its
/// [`CancelFlag`] is set and `run` waits up to the grace period for it to
/// return, so the sandbox is not removed under a live callable. A callable
/// that ignores the flag past the grace period is abandoned.
#[derive(Clone)]
pub struct FnProgram {
    name: String,
    func: Arc<ProgramFn>,
    grace_period: Duration,
}

impl FnProgram {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&Path, &Path) -> Result<bool> + Send + Sync + 'static,
    ) -> Self {
        Self::cancellable(name, move |input, output, _| func(input, output))
    }

    /// A callable that observes cancellation through its third argument.
    pub fn cancellable(
        name: impl Into<String>,
        func: impl Fn(&Path, &Path, &CancelFlag) -> Result<bool> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}

impl std::fmt::Debug for FnProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnProgram")
            .field("name", &self.name)
            .field("grace_period", &self.grace_period)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Program for FnProgram {
    fn describe(&self) -> String {
        format!("fn:{}", self.name)
    }

    async fn run(
        &self,
        input: &Path,
        output: &Path,
        time_limit: Duration,
    ) -> Result<(), RunFailure> {
        let func = Arc::clone(&self.func);
        let flag = CancelFlag::default();
        let task_flag = flag.clone();
        let input = input.to_path_buf();
        let output = output.to_path_buf();
        let mut task = tokio::task::spawn_blocking(move || {
            func(input.as_path(), output.as_path(), &task_flag)
        });

        match tokio::time::timeout(time_limit, &mut task).await {
            Ok(Ok(Ok(true))) => Ok(()),
            Ok(Ok(Ok(false))) => Err(RunFailure::Rejected),
            Ok(Ok(Err(e))) => Err(RunFailure::Crashed(format!("{e:#}"))),
            Ok(Err(join)) => Err(RunFailure::Crashed(format!("program panicked: {join}"))),
            Err(_) => {
                tracing::warn!("{} timed out after {:?}, cancelling", self.describe(), time_limit);
                flag.cancel();
                if tokio::time::timeout(self.grace_period, &mut task).await.is_err() {
                    tracing::warn!(
                        "{} still running {:?} after cancellation, abandoning it",
                        self.describe(),
                        self.grace_period
                    );
                }
                Err(RunFailure::Timeout(time_limit))
            }
        }
    }
}
