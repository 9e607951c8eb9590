//! Worker configuration.
//!
//! Configuration is read from a YAML (or JSON) file, then selected values
//! are overridden from the environment and the result is validated.
//!
//! ```yaml
//! paths:
//!   databases: /srv/msa/databases
//!   results: /srv/msa/results
//!   mmseqs: /opt/mmseqs/bin/mmseqs
//!   foldseek: /opt/foldseek/bin/foldseek
//!   colabfold:
//!     uniref: /srv/colabfold/uniref30_2302_db
//!     pdb: /srv/colabfold/pdb100_230517
//!     environmental: /srv/colabfold/colabfold_envdb_202108_db
//!     intermediate_store: /srv/colabfold/intermediate_store
//! worker:
//!   graceful_exit: true
//! queue:
//!   url: redis://127.0.0.1:6379
//! mail:
//!   sender: noreply@example.org
//!   mailer:
//!     host: smtp.example.org
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::notify::{MailTemplates, SmtpConfig};

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error while reading the configuration file.
    #[error("Failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML/JSON for this schema.
    #[error("Failed to parse config '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    Invalid(String),
}

/// Paths of the ColabFold databases used by MSA and pair jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColabfoldPaths {
    pub uniref: PathBuf,
    pub pdb: PathBuf,
    pub environmental: PathBuf,
    /// Store of precomputed alignments fetched by the pair pipeline.
    pub intermediate_store: PathBuf,
}

impl Default for ColabfoldPaths {
    fn default() -> Self {
        Self {
            uniref: PathBuf::from("databases/uniref30_2302_db"),
            pdb: PathBuf::from("databases/pdb100_230517"),
            environmental: PathBuf::from("databases/colabfold_envdb_202108_db"),
            intermediate_store: PathBuf::from("intermediate_store"),
        }
    }
}

/// Filesystem locations and tool paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the search databases and their `.params` sidecars.
    pub databases: PathBuf,
    /// Root of the per-job working directories.
    pub results: PathBuf,
    pub mmseqs: PathBuf,
    pub foldseek: PathBuf,
    /// Interpreter used for the helper scripts.
    pub python: PathBuf,
    /// Directory holding the helper scripts.
    pub helpers: PathBuf,
    pub colabfold: ColabfoldPaths,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            databases: PathBuf::from("databases"),
            results: PathBuf::from("results"),
            mmseqs: PathBuf::from("mmseqs"),
            foldseek: PathBuf::from("foldseek"),
            python: PathBuf::from("python3"),
            helpers: PathBuf::from("mmseqs-server/backend"),
            colabfold: ColabfoldPaths::default(),
        }
    }
}

impl PathsConfig {
    /// Working directory of a job.
    pub fn job_dir(&self, id: &str) -> PathBuf {
        self.results.join(id)
    }
}

/// Worker loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Install SIGINT/SIGTERM handlers that stop the loop between jobs.
    pub graceful_exit: bool,
    /// Sleep between empty or failed polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Time budget per stage (search jobs) or per pipeline (MSA and pair
    /// jobs), in seconds.
    pub stage_timeout_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            graceful_exit: false,
            poll_interval_ms: 100,
            stage_timeout_secs: 3600,
        }
    }
}

impl WorkerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

/// Ticket store connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub url: String,
    /// Key prefix shared by every worker of one deployment.
    pub prefix: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            prefix: "msa".to_string(),
        }
    }
}

/// Completion email settings. Without `mailer` no mail is sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub mailer: Option<SmtpConfig>,
    pub sender: String,
    pub templates: MailTemplates,
}

/// Complete worker configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub paths: PathsConfig,
    pub worker: WorkerSettings,
    pub queue: QueueConfig,
    pub mail: MailConfig,
    /// Forward the output of external tools to the worker's stdout/stderr.
    pub verbose: bool,
}

impl WorkerConfig {
    /// Loads the file, applies environment overrides and validates.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a configuration file. JSON is accepted as a YAML subset.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies environment overrides.
    ///
    /// # Environment Variables
    ///
    /// - `MSA_WORKER_RESULTS`: results root
    /// - `MSA_WORKER_DATABASES`: database root
    /// - `MSA_WORKER_REDIS_URL`: ticket store URL
    /// - `MSA_WORKER_SMTP_PASSWORD`: SMTP password (requires a configured mailer)
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(results) = lookup("MSA_WORKER_RESULTS") {
            self.paths.results = PathBuf::from(results);
        }
        if let Some(databases) = lookup("MSA_WORKER_DATABASES") {
            self.paths.databases = PathBuf::from(databases);
        }
        if let Some(url) = lookup("MSA_WORKER_REDIS_URL") {
            self.queue.url = url;
        }
        if let Some(password) = lookup("MSA_WORKER_SMTP_PASSWORD") {
            match self.mail.mailer.as_mut() {
                Some(mailer) => mailer.password = Some(password),
                None => {
                    return Err(ConfigError::InvalidValue {
                        key: "MSA_WORKER_SMTP_PASSWORD".to_string(),
                        message: "set but no mailer is configured".to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "worker.poll_interval_ms must be at least 1".to_string(),
            ));
        }

        if self.worker.stage_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "worker.stage_timeout_secs must be at least 1".to_string(),
            ));
        }

        if self.paths.results.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("paths.results cannot be empty".to_string()));
        }

        if self.paths.databases.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("paths.databases cannot be empty".to_string()));
        }

        if self.queue.prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("queue.prefix cannot be empty".to_string()));
        }

        if self.mail.mailer.is_some() && !self.mail.sender.contains('@') {
            return Err(ConfigError::Invalid(
                "mail.sender must be an email address when a mailer is configured".to_string(),
            ));
        }

        Ok(())
    }
}
