//! Argument construction for sequence and structure searches.
//!
//! One `easy-search` stage is built per requested database. The argument
//! list is the fixed output setup, then the database's stored search flags,
//! then the flags the job itself asks for.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::config::PathsConfig;
use crate::error::ExecutionError;
use crate::runner::StageExecution;
use crate::scheduler::{SearchJob, StructureSearchJob};
use crate::storage::DatabaseParams;

/// Tabular columns written by every search.
pub const SEARCH_COLUMNS: &str =
    "query,target,pident,alnlen,mismatch,gapopen,qstart,qend,tstart,tend,evalue,bits,qlen,tlen,qaln,taln";

/// Columns added for structure searches.
pub const STRUCTURE_COLUMNS: &str = "tca,tseq";

/// Columns added when the database carries taxonomy.
pub const TAXONOMY_COLUMNS: &str = "taxid,taxname";

/// Mode token requesting greedy best hits.
const SUMMARY_MODE: &str = "summary";

/// Structure alignment algorithm of a structure search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentMode {
    ThreeDi,
    TmAlign,
    ThreeDiAa,
}

impl AlignmentMode {
    /// Value passed to `--alignment-type`.
    pub fn selector(&self) -> &'static str {
        match self {
            AlignmentMode::ThreeDi => "0",
            AlignmentMode::TmAlign => "1",
            AlignmentMode::ThreeDiAa => "2",
        }
    }
}

impl FromStr for AlignmentMode {
    type Err = ExecutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "3di" => Ok(AlignmentMode::ThreeDi),
            "tmalign" => Ok(AlignmentMode::TmAlign),
            "3diaa" => Ok(AlignmentMode::ThreeDiAa),
            other => Err(ExecutionError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for AlignmentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlignmentMode::ThreeDi => write!(f, "3di"),
            AlignmentMode::TmAlign => write!(f, "tmalign"),
            AlignmentMode::ThreeDiAa => write!(f, "3diaa"),
        }
    }
}

/// Parsed structure search mode, `<alignment>[-summary]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureMode {
    pub alignment: AlignmentMode,
    pub summary: bool,
}

impl StructureMode {
    pub fn parse(mode: &str) -> Result<Self, ExecutionError> {
        let (alignment, summary) = match mode.split_once('-') {
            Some((alignment, SUMMARY_MODE)) => (alignment, true),
            Some(_) => return Err(ExecutionError::InvalidMode(mode.to_string())),
            None => (mode, false),
        };
        Ok(Self {
            alignment: alignment
                .parse()
                .map_err(|_| ExecutionError::InvalidMode(mode.to_string()))?,
            summary,
        })
    }
}

/// Name of the result database for `database` inside the job directory.
pub fn output_name(database: &str) -> String {
    format!("alis_{}", database)
}

fn columns(extra: &[&str], params: &DatabaseParams) -> String {
    let mut columns = String::from(SEARCH_COLUMNS);
    for column in extra {
        columns.push(',');
        columns.push_str(column);
    }
    if params.taxonomy {
        columns.push(',');
        columns.push_str(TAXONOMY_COLUMNS);
    }
    columns
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn push_job_flags(args: &mut Vec<String>, params: &DatabaseParams, summary: bool, taxfilter: &str) {
    args.extend(params.search_flags());
    if summary {
        args.push("--greedy-best-hits".to_string());
    }
    if params.taxonomy && !taxfilter.is_empty() {
        args.push("--taxon-list".to_string());
        args.push(taxfilter.to_string());
    }
}

/// Builds the mmseqs `easy-search` stage of a sequence search.
pub fn sequence_search(
    paths: &PathsConfig,
    base: &Path,
    database: &str,
    params: &DatabaseParams,
    job: &SearchJob,
) -> StageExecution {
    let mut args = vec![
        "easy-search".to_string(),
        path_arg(&base.join("job.fasta")),
        path_arg(&paths.databases.join(database)),
        path_arg(&base.join(output_name(database))),
        path_arg(&base.join("tmp")),
        "--shuffle".to_string(),
        "0".to_string(),
        "--db-output".to_string(),
        "--db-load-mode".to_string(),
        "2".to_string(),
        "--write-lookup".to_string(),
        "1".to_string(),
        "--format-output".to_string(),
        columns(&[], params),
    ];
    push_job_flags(&mut args, params, job.mode == SUMMARY_MODE, &job.taxfilter);

    StageExecution::new(format!("search:{}", database), &paths.mmseqs).args(args)
}

/// Builds the foldseek `easy-search` stage of a structure search.
pub fn structure_search(
    paths: &PathsConfig,
    base: &Path,
    database: &str,
    params: &DatabaseParams,
    job: &StructureSearchJob,
    mode: StructureMode,
) -> StageExecution {
    let mut args = vec![
        "easy-search".to_string(),
        path_arg(&base.join("job.pdb")),
        path_arg(&paths.databases.join(database)),
        path_arg(&base.join(output_name(database))),
        path_arg(&base.join("tmp")),
        "--alignment-type".to_string(),
        mode.alignment.selector().to_string(),
        "--db-output".to_string(),
        "--db-load-mode".to_string(),
        "2".to_string(),
        "--write-lookup".to_string(),
        "1".to_string(),
        "--format-output".to_string(),
        columns(&[STRUCTURE_COLUMNS], params),
    ];
    push_job_flags(&mut args, params, mode.summary, &job.taxfilter);

    StageExecution::new(format!("structuresearch:{}", database), &paths.foldseek).args(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn paths() -> PathsConfig {
        PathsConfig {
            databases: PathBuf::from("/dbs"),
            mmseqs: PathBuf::from("/bin/mmseqs"),
            foldseek: PathBuf::from("/bin/foldseek"),
            ..PathsConfig::default()
        }
    }

    fn params(taxonomy: bool, search: &str) -> DatabaseParams {
        DatabaseParams {
            search: search.to_string(),
            taxonomy,
            ..DatabaseParams::default()
        }
    }

    fn format_output(stage: &StageExecution) -> &str {
        let pos = stage
            .args
            .iter()
            .position(|a| a == "--format-output")
            .unwrap();
        &stage.args[pos + 1]
    }

    #[test]
    fn test_sequence_search_arguments() {
        let job = SearchJob {
            database: vec!["pdb".to_string()],
            mode: "accept".to_string(),
            taxfilter: String::new(),
        };
        let stage = sequence_search(
            &paths(),
            Path::new("/results/j1"),
            "pdb",
            &params(false, "--num-iterations 3  -e 0.1"),
            &job,
        );

        assert_eq!(stage.program, PathBuf::from("/bin/mmseqs"));
        assert_eq!(stage.name, "search:pdb");
        assert_eq!(
            stage.args,
            vec![
                "easy-search",
                "/results/j1/job.fasta",
                "/dbs/pdb",
                "/results/j1/alis_pdb",
                "/results/j1/tmp",
                "--shuffle",
                "0",
                "--db-output",
                "--db-load-mode",
                "2",
                "--write-lookup",
                "1",
                "--format-output",
                SEARCH_COLUMNS,
                "--num-iterations",
                "3",
                "-e",
                "0.1",
            ]
        );
    }

    #[test]
    fn test_taxonomy_columns_and_filter() {
        let job = SearchJob {
            database: vec!["uniref".to_string()],
            mode: "summary".to_string(),
            taxfilter: "9606,10090".to_string(),
        };
        let stage = sequence_search(&paths(), Path::new("/r/j"), "uniref", &params(true, ""), &job);

        assert!(format_output(&stage).ends_with(",taln,taxid,taxname"));
        let tail: Vec<&str> = stage.args.iter().rev().take(3).rev().map(String::as_str).collect();
        assert_eq!(tail, vec!["--greedy-best-hits", "--taxon-list", "9606,10090"]);
    }

    #[test]
    fn test_taxon_filter_ignored_without_taxonomy() {
        let job = SearchJob {
            database: vec!["pdb".to_string()],
            mode: String::new(),
            taxfilter: "9606".to_string(),
        };
        let stage = sequence_search(&paths(), Path::new("/r/j"), "pdb", &params(false, ""), &job);

        assert!(!stage.args.iter().any(|a| a == "--taxon-list"));
        assert_eq!(format_output(&stage), SEARCH_COLUMNS);
    }

    #[test]
    fn test_structure_mode_parsing() {
        assert_eq!(
            StructureMode::parse("3di").unwrap(),
            StructureMode { alignment: AlignmentMode::ThreeDi, summary: false }
        );
        assert_eq!(
            StructureMode::parse("tmalign-summary").unwrap(),
            StructureMode { alignment: AlignmentMode::TmAlign, summary: true }
        );
        assert_eq!(StructureMode::parse("3diaa").unwrap().alignment.selector(), "2");

        for bad in ["", "summary", "blast", "3di-fast", "tmalign-summary-x"] {
            assert!(
                matches!(StructureMode::parse(bad), Err(ExecutionError::InvalidMode(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_structure_search_arguments() {
        let job = StructureSearchJob {
            database: vec!["afdb".to_string()],
            mode: "tmalign".to_string(),
            taxfilter: String::new(),
        };
        let mode = StructureMode::parse(&job.mode).unwrap();
        let stage = structure_search(
            &paths(),
            Path::new("/r/j"),
            "afdb",
            &params(true, ""),
            &job,
            mode,
        );

        assert_eq!(stage.program, PathBuf::from("/bin/foldseek"));
        assert_eq!(stage.args[1], "/r/j/job.pdb");
        assert!(!stage.args.iter().any(|a| a == "--shuffle"));
        let pos = stage.args.iter().position(|a| a == "--alignment-type").unwrap();
        assert_eq!(stage.args[pos + 1], "1");
        assert!(format_output(&stage).ends_with(",taln,tca,tseq,taxid,taxname"));
    }
}
