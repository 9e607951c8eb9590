//! Job execution pipelines.
//!
//! This module maps each job variant onto the external stages it runs and
//! drives those stages to a terminal [`JobOutcome`](crate::scheduler::JobOutcome).
//!
//! # Architecture
//!
//! - **Dispatcher**: exhaustive match over job variants, owns the time budget
//! - **Definitions**: static MSA and pair pipeline descriptors
//! - **Search**: argument construction for sequence and structure searches
//! - **Index**: database validation and sidecar status updates
//!
//! # Pipeline Flow
//!
//! 1. **Variant selection**: the dispatcher matches on the job variant
//! 2. **Stage construction**: arguments are built (search) or rendered from
//!    descriptors (MSA, pair)
//! 3. **Execution**: stages run one at a time through a [`StageRunner`](crate::runner::StageRunner)
//! 4. **Archiving**: the selected outputs are packed into
//!    `mmseqs_results_<id>.tar.gz` in the job directory
//!
//! # Example
//!
//! ```rust,ignore
//! use msa_worker::pipeline::Dispatcher;
//! use msa_worker::runner::ProcessRunner;
//!
//! let dispatcher = Dispatcher::new(&config, ProcessRunner::new(config.verbose));
//! let outcome = dispatcher.run(&request).await;
//! println!("Job {} finished: {}", request.id, outcome);
//! ```

pub mod definitions;
pub mod dispatcher;
pub mod index;
pub mod search;

pub use definitions::{
    Action, ArchiveRule, Condition, Pipeline, Program, Step, ALN_MARKER, MSA_PIPELINE,
    PAIR_PIPELINE,
};
pub use dispatcher::{archive_name, Dispatcher};
pub use index::{check_database, run_index};
pub use search::{AlignmentMode, StructureMode};
