//! Result archive writer.
//!
//! Produces `<name>.tar.gz` files whose members are stored under their base
//! names. The archive is built in a temp file beside the destination and
//! only renamed into place after the tar builder and the gzip encoder have
//! both been closed and the bytes fsynced.

use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Builder as TarBuilder, HeaderMode};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::ArchiveError;

/// Selects files whose name ends with `suffix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuffixRule {
    pub suffix: String,
    pub enabled: bool,
}

impl SuffixRule {
    pub fn new(suffix: impl Into<String>, enabled: bool) -> Self {
        Self {
            suffix: suffix.into(),
            enabled,
        }
    }
}

/// Which files go into an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Manifest {
    /// Explicit paths, archived in the given order. Every path must exist.
    Files(Vec<PathBuf>),
    /// Regular files directly inside `dir`, selected by suffix rules.
    ///
    /// A file is matched by its longest matching suffix and included only
    /// if that rule is enabled, so `x.a3m.tax` is governed by a `.a3m.tax`
    /// rule rather than by `.tax` or `.a3m` rules.
    Suffixes { dir: PathBuf, rules: Vec<SuffixRule> },
}

impl Manifest {
    /// Resolves the manifest to the list of input files.
    pub fn resolve(&self) -> Result<Vec<PathBuf>, ArchiveError> {
        match self {
            Manifest::Files(files) => Ok(files.clone()),
            Manifest::Suffixes { dir, rules } => {
                let mut selected = Vec::new();
                let walker = WalkDir::new(dir)
                    .min_depth(1)
                    .max_depth(1)
                    .sort_by_file_name();
                for entry in walker {
                    let entry = entry.map_err(|source| ArchiveError::Scan {
                        path: dir.clone(),
                        source,
                    })?;
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let name = entry.file_name().to_string_lossy();
                    if matching_rule(rules, &name).is_some_and(|rule| rule.enabled) {
                        selected.push(entry.into_path());
                    }
                }
                Ok(selected)
            }
        }
    }

    fn root(&self) -> PathBuf {
        match self {
            Manifest::Files(files) => files
                .first()
                .and_then(|f| f.parent())
                .map(Path::to_path_buf)
                .unwrap_or_default(),
            Manifest::Suffixes { dir, .. } => dir.clone(),
        }
    }
}

fn matching_rule<'a>(rules: &'a [SuffixRule], name: &str) -> Option<&'a SuffixRule> {
    rules
        .iter()
        .filter(|rule| name.ends_with(rule.suffix.as_str()))
        .max_by_key(|rule| rule.suffix.len())
}

/// Writes the archive for `manifest` to `destination`.
///
/// Returns the number of entries written. On any error the destination is
/// left untouched and the temp file is removed.
pub fn write_archive(manifest: &Manifest, destination: &Path) -> Result<usize, ArchiveError> {
    let inputs = manifest.resolve()?;
    if inputs.is_empty() {
        return Err(ArchiveError::EmptySelection(manifest.root()));
    }

    let finalize_err = |source| ArchiveError::Finalize {
        path: destination.to_path_buf(),
        source,
    };

    let dir = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::Builder::new()
        .prefix(".archive-")
        .suffix(".partial")
        .tempfile_in(dir)?;

    {
        let encoder = GzEncoder::new(temp.as_file_mut(), Compression::default());
        let mut tar = TarBuilder::new(encoder);
        tar.mode(HeaderMode::Deterministic);

        for path in &inputs {
            let name = path
                .file_name()
                .ok_or_else(|| ArchiveError::NoFileName(path.clone()))?;
            let input_err = |source| ArchiveError::Input {
                path: path.clone(),
                source,
            };
            let mut file = File::open(path).map_err(input_err)?;
            tar.append_file(name, &mut file).map_err(input_err)?;
        }

        let encoder = tar.into_inner().map_err(finalize_err)?;
        encoder.finish().map_err(finalize_err)?;
    }

    temp.as_file().sync_all().map_err(finalize_err)?;
    temp.persist(destination)
        .map_err(|e| finalize_err(e.error))?;
    sync_directory(dir).map_err(finalize_err)?;

    debug!(
        archive = %destination.display(),
        entries = inputs.len(),
        "Archive written"
    );
    Ok(inputs.len())
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
