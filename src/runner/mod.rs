//! Stage runner for external pipeline programs.
//!
//! This module spawns the external tools (mmseqs, foldseek, helper scripts)
//! that make up a job's pipeline.
//!
//! # Architecture
//!
//! ```text
//! StageExecution → ProcessRunner::spawn → child (own process group)
//!                                          │
//!                        monitor task ─────┘ wait() → oneshot → RunningStage::wait
//! ```
//!
//! The runner:
//! 1. Spawns the program with the merged environment
//! 2. Hands the child to a monitor task that reports its exit once
//! 3. Races that report against the stage budget
//! 4. Kills the whole process group on expiry and reaps the leader
//!
//! # Example
//!
//! ```ignore
//! use msa_worker::runner::{ProcessRunner, StageExecution, StageRunner};
//!
//! let runner = ProcessRunner::new(false);
//! let stage = StageExecution::new("createdb", "/opt/mmseqs/bin/mmseqs")
//!     .args(["createdb", "job.fasta", "qdb"]);
//! runner.run(&stage, Some(Duration::from_secs(3600))).await?;
//! ```

pub mod process;
pub mod stage;

pub use process::{ProcessGroup, ProcessRunner, RunningStage, StageRunner};
pub use stage::{CompletionPolicy, StageError, StageExecution};
