//! On-disk state owned by the worker.
//!
//! - **params**: the per-database `<db>.params` sidecar
//! - **archive**: the `tar.gz` result archive written at the end of a job

pub mod archive;
pub mod params;

pub use archive::{write_archive, Manifest, SuffixRule};
pub use params::DatabaseParams;
