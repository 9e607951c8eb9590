//! Database validation jobs.
//!
//! An index job does not produce results for a user. It checks that a
//! database is usable (and builds its index when the sidecar asks for one)
//! and records the verdict in the database's params sidecar, where the
//! frontend reads database readiness from.

use std::path::{Component, Path, PathBuf};

use tracing::{error, info};

use crate::config::PathsConfig;
use crate::error::ExecutionError;
use crate::runner::{StageExecution, StageRunner};
use crate::scheduler::{IndexJob, Status};
use crate::storage::DatabaseParams;

/// Resolves the job's database path below the database root.
pub fn database_path(paths: &PathsConfig, job: &IndexJob) -> Result<PathBuf, ExecutionError> {
    let relative = Path::new(&job.path);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if job.path.is_empty() || escapes {
        return Err(ExecutionError::DatabaseCheck {
            path: relative.to_path_buf(),
            reason: "path must be relative to the database root".to_string(),
        });
    }
    Ok(paths.databases.join(relative))
}

fn sibling(database: &Path, suffix: &str) -> PathBuf {
    let mut path = database.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

/// Checks the database files and builds the index if requested.
///
/// `createindex` runs without a time budget; large databases take hours.
pub async fn check_database<R: StageRunner + ?Sized>(
    runner: &R,
    paths: &PathsConfig,
    database: &Path,
    params: &DatabaseParams,
) -> Result<(), ExecutionError> {
    for required in [database.to_path_buf(), sibling(database, ".dbtype")] {
        if !tokio::fs::try_exists(&required).await? {
            return Err(ExecutionError::DatabaseCheck {
                path: database.to_path_buf(),
                reason: format!("missing {}", required.display()),
            });
        }
    }

    let flags = params.index_flags();
    if !flags.is_empty() {
        let stage = StageExecution::new("createindex", &paths.mmseqs)
            .arg("createindex")
            .arg(database.to_string_lossy())
            .arg(paths.databases.join("tmp").to_string_lossy())
            .args(flags);
        runner.run(&stage, None).await?;
    }

    Ok(())
}

/// Runs an index job.
///
/// The sidecar is saved after every status change. On a failed check the
/// `error` status is saved before the failure is returned; a failure of
/// that save is logged and the check failure is what gets reported.
pub async fn run_index<R: StageRunner + ?Sized>(
    runner: &R,
    paths: &PathsConfig,
    job: &IndexJob,
) -> Result<(), ExecutionError> {
    let database = database_path(paths, job)?;
    let params_path = DatabaseParams::path_for(&database);

    let mut params = DatabaseParams::read(&params_path)?;
    params.status = Status::Running;
    params.save(&params_path)?;

    if let Err(e) = check_database(runner, paths, &database, &params).await {
        params.status = Status::Error;
        if let Err(save_err) = params.save(&params_path) {
            error!(
                database = %database.display(),
                error = %save_err,
                "Failed to persist error status"
            );
        }
        return Err(e);
    }

    params.status = Status::Complete;
    params.save(&params_path)?;
    info!(database = %database.display(), "Database ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::StageError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(Vec<String>, Option<Duration>)>>,
        fail: bool,
    }

    #[async_trait]
    impl StageRunner for Recorder {
        async fn run(
            &self,
            stage: &StageExecution,
            timeout: Option<Duration>,
        ) -> Result<(), StageError> {
            self.calls.lock().unwrap().push((stage.args.clone(), timeout));
            if self.fail {
                return Err(StageError::NonZeroExit {
                    program: "mmseqs".to_string(),
                    status: "exit status: 1".to_string(),
                });
            }
            Ok(())
        }
    }

    fn setup(files: &[&str], params: &str) -> (tempfile::TempDir, PathsConfig) {
        let dir = tempfile::tempdir().unwrap();
        for file in files {
            std::fs::write(dir.path().join(file), "").unwrap();
        }
        std::fs::write(dir.path().join("pdb.params"), params).unwrap();
        let paths = PathsConfig {
            databases: dir.path().to_path_buf(),
            ..PathsConfig::default()
        };
        (dir, paths)
    }

    fn stored_status(dir: &Path) -> Status {
        DatabaseParams::read(&dir.join("pdb.params")).unwrap().status
    }

    fn job() -> IndexJob {
        IndexJob {
            path: "pdb".to_string(),
        }
    }

    #[tokio::test]
    async fn test_valid_database_completes() {
        let (dir, paths) = setup(&["pdb", "pdb.dbtype"], r#"{"status": "error"}"#);
        let runner = Recorder::default();

        run_index(&runner, &paths, &job()).await.unwrap();

        assert_eq!(stored_status(dir.path()), Status::Complete);
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_dbtype_persists_error() {
        let (dir, paths) = setup(&["pdb"], r#"{"status": "complete", "name": "PDB"}"#);
        let runner = Recorder::default();

        let err = run_index(&runner, &paths, &job()).await.unwrap_err();

        assert!(matches!(err, ExecutionError::DatabaseCheck { .. }));
        let params = DatabaseParams::read(&dir.path().join("pdb.params")).unwrap();
        assert_eq!(params.status, Status::Error);
        assert_eq!(params.extra["name"], "PDB");
    }

    #[tokio::test]
    async fn test_createindex_runs_without_timeout() {
        let (dir, paths) = setup(&["pdb", "pdb.dbtype"], r#"{"index": "--split 1 -k 6"}"#);
        let runner = Recorder::default();

        run_index(&runner, &paths, &job()).await.unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (args, timeout) = &calls[0];
        assert_eq!(args[0], "createindex");
        assert_eq!(&args[3..], ["--split", "1", "-k", "6"]);
        assert!(timeout.is_none());
        assert_eq!(stored_status(dir.path()), Status::Complete);
    }

    #[tokio::test]
    async fn test_failed_createindex_persists_error() {
        let (dir, paths) = setup(&["pdb", "pdb.dbtype"], r#"{"index": "--split 1"}"#);
        let runner = Recorder {
            fail: true,
            ..Recorder::default()
        };

        let err = run_index(&runner, &paths, &job()).await.unwrap_err();

        assert!(matches!(err, ExecutionError::Stage(_)));
        assert_eq!(stored_status(dir.path()), Status::Error);
    }

    #[tokio::test]
    async fn test_missing_params_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathsConfig {
            databases: dir.path().to_path_buf(),
            ..PathsConfig::default()
        };

        let err = run_index(&Recorder::default(), &paths, &job()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Params(_)));
    }

    #[test]
    fn test_database_path_stays_below_root() {
        let paths = PathsConfig::default();
        assert!(database_path(&paths, &IndexJob { path: "sub/pdb".to_string() }).is_ok());
        for bad in ["", "../etc/passwd", "/abs/db"] {
            assert!(database_path(&paths, &IndexJob { path: bad.to_string() }).is_err());
        }
    }
}
