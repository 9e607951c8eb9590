//! Per-database params sidecar (`<database>.params`).
//!
//! Search jobs read the default search flags and the taxonomy switch from
//! it; index jobs read-modify-write its lifecycle status. Keys this worker
//! does not know about are carried through unchanged.

use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ParamsError;
use crate::scheduler::Status;

/// Extension appended to a database path to locate its sidecar.
const PARAMS_EXTENSION: &str = ".params";

fn default_status() -> Status {
    Status::Queued
}

/// Metadata describing one search database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseParams {
    /// Default search flags, a whitespace separated token string.
    #[serde(default)]
    pub search: String,
    /// Whether the database carries taxonomy information.
    #[serde(default)]
    pub taxonomy: bool,
    /// Lifecycle status of the database.
    #[serde(default = "default_status")]
    pub status: Status,
    /// Flags for `createindex`; empty means no index is built.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub index: String,
    /// Keys owned by other components.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for DatabaseParams {
    fn default() -> Self {
        Self {
            search: String::new(),
            taxonomy: false,
            status: default_status(),
            index: String::new(),
            extra: serde_json::Map::new(),
        }
    }
}

impl DatabaseParams {
    /// Returns the sidecar path for a database path.
    pub fn path_for(database: &Path) -> PathBuf {
        let mut path: OsString = database.as_os_str().to_owned();
        path.push(PARAMS_EXTENSION);
        PathBuf::from(path)
    }

    /// Reads a sidecar file.
    pub fn read(path: &Path) -> Result<Self, ParamsError> {
        let content = fs::read(path).map_err(|source| ParamsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&content).map_err(|source| ParamsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes the sidecar durably.
    ///
    /// The document goes to a temp file in the same directory, is fsynced
    /// and then renamed over `path`, so readers never see a torn file.
    pub fn save(&self, path: &Path) -> Result<(), ParamsError> {
        let content = serde_json::to_vec_pretty(self)?;
        let write_err = |source| ParamsError::Write {
            path: path.to_path_buf(),
            source,
        };

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::Builder::new()
            .prefix(".params-")
            .tempfile_in(dir)
            .map_err(write_err)?;
        temp.write_all(&content).map_err(write_err)?;
        temp.as_file().sync_all().map_err(write_err)?;
        temp.persist(path).map_err(|e| write_err(e.error))?;
        Ok(())
    }

    /// Returns the default search flags split into arguments.
    pub fn search_flags(&self) -> Vec<String> {
        self.search.split_whitespace().map(String::from).collect()
    }

    /// Returns the index build flags split into arguments.
    pub fn index_flags(&self) -> Vec<String> {
        self.index.split_whitespace().map(String::from).collect()
    }
}
