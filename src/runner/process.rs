//! Child process management for pipeline stages.
//!
//! Each stage runs in its own process group. A monitor task owns the child
//! and reports its exit status on a single-slot channel; the caller races
//! that channel against the stage budget. On expiry the whole group is
//! killed, so helpers spawned by the external tool do not outlive the job.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::stage::{StageError, StageExecution};

/// How long to wait for the monitor to observe a killed group's leader.
const REAP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Executes stages, enforcing an optional time budget.
///
/// The production implementation is [`ProcessRunner`]; tests substitute
/// recording runners to check pipeline shape without external binaries.
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Runs the stage to completion. `None` means no time limit.
    async fn run(&self, stage: &StageExecution, timeout: Option<Duration>)
        -> Result<(), StageError>;
}

/// Handle on the process group created for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGroup {
    pgid: i32,
}

impl ProcessGroup {
    pub fn id(&self) -> i32 {
        self.pgid
    }

    /// Sends SIGKILL to every process in the group.
    #[cfg(unix)]
    pub fn kill(&self) -> io::Result<()> {
        // SAFETY: killpg has no memory-safety preconditions.
        let rc = unsafe { libc::killpg(self.pgid as libc::pid_t, libc::SIGKILL) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(unix))]
    pub fn kill(&self) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process groups are only supported on unix",
        ))
    }
}

/// A spawned stage whose exit has not been observed yet.
pub struct RunningStage {
    program: String,
    group: ProcessGroup,
    done: oneshot::Receiver<io::Result<ExitStatus>>,
}

impl RunningStage {
    pub fn group(&self) -> ProcessGroup {
        self.group
    }

    /// Waits for the stage to finish, killing its group if `timeout` elapses.
    pub async fn wait(mut self, timeout: Option<Duration>) -> Result<(), StageError> {
        let exit = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut self.done).await {
                Ok(exit) => exit,
                Err(_) => {
                    warn!(
                        program = %self.program,
                        pgid = self.group.id(),
                        timeout_secs = limit.as_secs(),
                        "Stage exceeded its time budget, killing process group"
                    );
                    self.terminate_and_reap().await;
                    return Err(StageError::Timeout {
                        program: self.program,
                        timeout: limit,
                    });
                }
            },
            None => (&mut self.done).await,
        };

        match exit {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(StageError::NonZeroExit {
                program: self.program,
                status: status.to_string(),
            }),
            Ok(Err(source)) => Err(StageError::Wait {
                program: self.program,
                source,
            }),
            Err(_) => Err(StageError::MonitorLost {
                program: self.program,
            }),
        }
    }

    /// Kills the process group and waits for the monitor to reap the leader.
    ///
    /// Failures are logged rather than returned: the job is already being
    /// reported as timed out.
    pub async fn terminate_and_reap(&mut self) {
        if let Err(e) = self.group.kill() {
            error!(program = %self.program, pgid = self.group.id(), error = %e, "Failed to kill process group");
        }

        match tokio::time::timeout(REAP_GRACE_PERIOD, &mut self.done).await {
            Ok(_) => debug!(program = %self.program, "Killed stage reaped"),
            Err(_) => warn!(
                program = %self.program,
                grace_secs = REAP_GRACE_PERIOD.as_secs(),
                "Killed stage was not reaped within the grace period"
            ),
        }
    }
}

/// Spawns stages as child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    /// Forward child stdout/stderr to ours instead of discarding them.
    verbose: bool,
}

impl ProcessRunner {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Spawns the stage and returns immediately.
    ///
    /// The child gets the worker's environment plus `TTY=0` (keeps progress
    /// bars out of logs) plus the stage's own overrides, and leads a new
    /// process group.
    pub fn spawn(&self, stage: &StageExecution) -> Result<RunningStage, StageError> {
        let program = stage.program.display().to_string();

        let mut cmd = Command::new(&stage.program);
        cmd.args(&stage.args)
            .env_clear()
            .envs(std::env::vars_os())
            .env("TTY", "0")
            .envs(stage.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null());

        if self.verbose {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| StageError::Spawn {
            program: program.clone(),
            source,
        })?;

        let pid = child.id().ok_or_else(|| StageError::MonitorLost {
            program: program.clone(),
        })?;

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            // The receiver may be gone if the caller gave up; nothing to do then.
            let _ = tx.send(child.wait().await);
        });

        debug!(program = %program, pid = pid, "Spawned stage");

        Ok(RunningStage {
            program,
            group: ProcessGroup { pgid: pid as i32 },
            done: rx,
        })
    }
}

#[async_trait]
impl StageRunner for ProcessRunner {
    async fn run(
        &self,
        stage: &StageExecution,
        timeout: Option<Duration>,
    ) -> Result<(), StageError> {
        info!(stage = %stage.name, "Running stage");
        debug!(stage = %stage.name, command = %stage.command_line());

        self.spawn(stage)?.wait(timeout).await
    }
}
