//! msa-worker: queue worker for MMseqs2 and Foldseek search jobs.
//!
//! A worker takes job tickets from a shared queue, runs the external
//! pipeline the job asks for (sequence or structure search, ColabFold MSA,
//! paired MSA, database indexing) and leaves a results archive in the job
//! directory for the frontend to serve.

pub mod cli;
pub mod config;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod runner;
pub mod scheduler;
pub mod storage;

pub use error::{ArchiveError, ExecutionError, JobSpecError, ParamsError};
