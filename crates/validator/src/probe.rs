//! Readiness probes and the executor that runs them.
//!
//! A probe is an external command whose exit status says whether a component
//! is ready. The executor runs it once, or keeps retrying it at a fixed
//! interval until it succeeds. The retry loop has no attempt limit: the pod
//! running this binary is expected to be bounded by its own startup timeout,
//! and the only way out of the loop besides success is cancellation.

use std::fmt;
use std::future::Future;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use error_stack::Report;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::error::ValidatorError;

/// An external command used as a readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    program: String,
    args: Vec<String>,
    /// Discard the command's output instead of streaming it.
    quiet: bool,
}

impl Probe {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            quiet: false,
        }
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// `bash -c <script>`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("bash", ["-c".to_string(), script.into()])
    }

    /// Succeeds once `path` exists. Output is discarded, a missing flag file
    /// is the expected state while waiting.
    pub fn file_exists(path: impl fmt::Display) -> Self {
        Self::shell(format!("stat {path}")).quiet()
    }

    /// Succeeds once a kernel module shows up in `lsmod`.
    pub fn module_loaded(module: &str) -> Self {
        Self::shell(format!("lsmod | grep {module}"))
    }

    /// Run `command` with `root` as the filesystem root.
    pub fn chroot(root: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new("chroot", [root.into(), command.into()])
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Executes probe commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Returns whether the command exited successfully. `Err` means the
    /// command could not be started at all.
    async fn run(&self, probe: &Probe, silent: bool) -> io::Result<bool>;
}

/// Spawns real processes, streaming their output to ours unless silent.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, probe: &Probe, silent: bool) -> io::Result<bool> {
        let (stdout, stderr) = if silent {
            (Stdio::null(), Stdio::null())
        } else {
            (Stdio::inherit(), Stdio::inherit())
        };

        let status = Command::new(probe.program())
            .args(probe.args())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .status()
            .await?;
        Ok(status.success())
    }
}

/// Runs probes once or until they succeed.
#[derive(Clone)]
pub struct ProbeExecutor {
    runner: Arc<dyn CommandRunner>,
    interval: Duration,
    cancel: CancellationToken,
}

impl ProbeExecutor {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            runner,
            interval,
            cancel,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `probe`. With `retry`, keep running it every interval until it
    /// succeeds or the executor is cancelled.
    pub async fn run(&self, probe: &Probe, retry: bool) -> Result<(), Report<ValidatorError>> {
        if !retry {
            return match self.attempt(probe).await {
                true => Ok(()),
                false => Err(Report::new(ValidatorError::ProbeFailed {
                    probe: probe.to_string(),
                })),
            };
        }

        loop {
            info!(probe = %probe, "running probe");
            if self.attempt(probe).await {
                return Ok(());
            }
            info!(
                "probe failed, retrying after {} seconds",
                self.interval.as_secs()
            );
            self.pause().await?;
        }
    }

    /// Poll an in-process readiness check the same way [`Self::run`] polls a
    /// command. Returns the last observed readiness; errors from `check` are
    /// fatal and end the loop.
    pub async fn poll<F, Fut>(&self, retry: bool, mut check: F) -> Result<bool, Report<ValidatorError>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, Report<ValidatorError>>>,
    {
        loop {
            let ready = check().await?;
            if ready || !retry {
                return Ok(ready);
            }
            self.pause().await?;
        }
    }

    /// Sleep for one interval unless cancelled first.
    pub async fn pause(&self) -> Result<(), Report<ValidatorError>> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Report::new(ValidatorError::Cancelled)),
            _ = tokio::time::sleep(self.interval) => Ok(()),
        }
    }

    async fn attempt(&self, probe: &Probe) -> bool {
        match self.runner.run(probe, probe.is_quiet()).await {
            Ok(success) => success,
            Err(e) => {
                warn!(probe = %probe, "unable to start probe: {e}");
                false
            }
        }
    }
}
