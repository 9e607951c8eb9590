//! Stage execution descriptors and stage-level errors.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// What the pipeline does when a stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionPolicy {
    /// Abort the remaining stages of the job.
    #[default]
    Abort,
    /// Log the failure and continue with the next stage.
    Continue,
}

/// One fully rendered external program invocation.
///
/// Built by the dispatcher for a single job and consumed once.
#[derive(Debug, Clone, PartialEq)]
pub struct StageExecution {
    /// Short name used in logs (e.g. "createdb", "search:pdb100").
    pub name: String,
    /// Executable path.
    pub program: PathBuf,
    /// Ordered argument list.
    pub args: Vec<String>,
    /// Environment overrides applied on top of the inherited environment.
    pub env: Vec<(String, String)>,
    /// Behaviour on failure.
    pub policy: CompletionPolicy,
}

impl StageExecution {
    /// Creates a stage with no arguments and the `Abort` policy.
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            policy: CompletionPolicy::Abort,
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets the completion policy.
    pub fn with_policy(mut self, policy: CompletionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the command line for logging.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Errors produced while running one stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}")]
    NonZeroExit { program: String, status: String },

    #[error("Failed to wait for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Monitor for '{program}' stopped before reporting an exit status")]
    MonitorLost { program: String },

    #[error("'{program}' timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
}

impl StageError {
    /// Returns true when the stage exceeded its time budget.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StageError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_builder() {
        let stage = StageExecution::new("createdb", "/usr/bin/mmseqs")
            .arg("createdb")
            .args(["in.fasta", "qdb"])
            .with_env("MMSEQS_CALL_DEPTH", "1")
            .with_policy(CompletionPolicy::Continue);

        assert_eq!(stage.args, vec!["createdb", "in.fasta", "qdb"]);
        assert_eq!(stage.env, vec![("MMSEQS_CALL_DEPTH".to_string(), "1".to_string())]);
        assert_eq!(stage.policy, CompletionPolicy::Continue);
        assert_eq!(stage.command_line(), "/usr/bin/mmseqs createdb in.fasta qdb");
    }

    #[test]
    fn test_default_policy_aborts() {
        let stage = StageExecution::new("x", "true");
        assert_eq!(stage.policy, CompletionPolicy::Abort);
    }

    #[test]
    fn test_stage_error_display() {
        let err = StageError::Timeout {
            program: "mmseqs".to_string(),
            timeout: Duration::from_secs(3600),
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("3600"));

        let err = StageError::NonZeroExit {
            program: "mmseqs".to_string(),
            status: "exit status: 1".to_string(),
        };
        assert!(!err.is_timeout());
        assert!(err.to_string().contains("exit status: 1"));
    }
}
