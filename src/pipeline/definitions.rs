//! Static stage descriptors for the MSA and pair pipelines.
//!
//! A pipeline is an ordered list of steps. Each step carries the conditions
//! under which it runs and the action it performs. Conditions are checked
//! right before the step, so a marker file written by an earlier stage
//! steers the rest of the pipeline.
//!
//! Arguments are tera templates rendered per job with these variables:
//!
//! | Variable             | Value                                       |
//! |----------------------|---------------------------------------------|
//! | `base`               | the job's working directory                 |
//! | `query`              | `<base>/job.fasta`                          |
//! | `uniref`             | UniRef database path                        |
//! | `pdb`                | template database path                      |
//! | `environmental`      | environmental database path                 |
//! | `intermediate_store` | precomputed alignment store                 |
//! | `helpers`            | directory holding the python helper scripts |
//! | `filter_msa`         | `1` or `0` from the `nofilter` mode token   |

use crate::runner::CompletionPolicy;
use crate::scheduler::ModeFlag;

/// Marker written by the probe helper when a precomputed alignment exists.
pub const ALN_MARKER: &str = "ALN_FOUND";

/// Environment shared by every stage of the MSA and pair pipelines.
const CALL_DEPTH_ENV: &[(&str, &str)] = &[("MMSEQS_CALL_DEPTH", "1")];

/// Executable a stage runs, resolved from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Program {
    Mmseqs,
    Python,
}

/// Predicate checked before a step runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// File `<base>/<name>` exists.
    MarkerPresent(&'static str),
    /// File `<base>/<name>` does not exist.
    MarkerAbsent(&'static str),
    /// Mode flag is enabled.
    Flag(ModeFlag),
}

/// Which files of the working directory go into the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveRule {
    /// Fixed file names, all required.
    Files(&'static [&'static str]),
    /// Suffix rules; `None` means always enabled, `Some(flag)` ties the
    /// rule to a mode flag.
    Suffixes(&'static [(&'static str, Option<ModeFlag>)]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Exec {
        name: &'static str,
        program: Program,
        args: &'static [&'static str],
        policy: CompletionPolicy,
    },
    /// Recursively remove a directory (templated path). Missing is fine.
    RemoveDir(&'static str),
    Archive(ArchiveRule),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// All conditions must hold; empty means always.
    pub when: &'static [Condition],
    pub action: Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pipeline {
    pub name: &'static str,
    pub env: &'static [(&'static str, &'static str)],
    pub steps: &'static [Step],
}

const fn mmseqs(name: &'static str, args: &'static [&'static str]) -> Action {
    Action::Exec {
        name,
        program: Program::Mmseqs,
        args,
        policy: CompletionPolicy::Abort,
    }
}

const fn helper(name: &'static str, args: &'static [&'static str]) -> Action {
    Action::Exec {
        name,
        program: Program::Python,
        args,
        policy: CompletionPolicy::Abort,
    }
}

/// `rmdb` of an intermediate database; some of them never exist.
const fn rmdb(args: &'static [&'static str]) -> Action {
    Action::Exec {
        name: "rmdb",
        program: Program::Mmseqs,
        args,
        policy: CompletionPolicy::Continue,
    }
}

const fn step(when: &'static [Condition], action: Action) -> Step {
    Step { when, action }
}

const ALWAYS: &[Condition] = &[];
const NEEDS_ALN: &[Condition] = &[Condition::MarkerAbsent(ALN_MARKER)];
const HAS_ALN: &[Condition] = &[Condition::MarkerPresent(ALN_MARKER)];
const HAS_ALN_ENV: &[Condition] = &[
    Condition::MarkerPresent(ALN_MARKER),
    Condition::Flag(ModeFlag::Env),
];
const HAS_ALN_TEMPLATES: &[Condition] = &[
    Condition::MarkerPresent(ALN_MARKER),
    Condition::Flag(ModeFlag::Templates),
];
const HAS_ALN_TABULAR: &[Condition] = &[
    Condition::MarkerPresent(ALN_MARKER),
    Condition::Flag(ModeFlag::Tabular),
];

/// Single-sequence MSA pipeline.
///
/// Without a precomputed alignment the query is searched, expanded and
/// realigned against UniRef and the per-sequence `.aln` files are archived.
/// With one, the stored alignment is formatted into `.a3m` files with
/// taxonomy annotation and the optional environmental, template and tabular
/// outputs.
pub static MSA_PIPELINE: Pipeline = Pipeline {
    name: "msa",
    env: CALL_DEPTH_ENV,
    steps: &[
        step(ALWAYS, mmseqs("createdb", &["createdb", "{{ query }}", "{{ base }}/qdb", "--shuffle", "0"])),
        step(ALWAYS, helper("aln-probe", &["{{ helpers }}/aln_or_a3mtax.py", "{{ base }}/job.fasta"])),
        // Alignment branch
        step(NEEDS_ALN, mmseqs("search", &[
            "search", "{{ base }}/qdb", "{{ uniref }}", "{{ base }}/res", "{{ base }}/tmp",
            "--num-iterations", "3", "--db-load-mode", "2", "-a", "--k-score", "seq:96,prof:80",
            "-e", "0.1", "--max-seqs", "10000",
        ])),
        step(NEEDS_ALN, mmseqs("expandaln", &[
            "expandaln", "{{ base }}/qdb", "{{ uniref }}.idx", "{{ base }}/res", "{{ uniref }}.idx",
            "{{ base }}/res_exp", "--db-load-mode", "2", "--expansion-mode", "0", "-e", "inf",
            "--expand-filter-clusters", "0", "--max-seq-id", "0.95",
        ])),
        step(NEEDS_ALN, mmseqs("align", &[
            "align", "{{ base }}/qdb", "{{ uniref }}.idx", "{{ base }}/res_exp",
            "{{ base }}/res_exp_realign", "--db-load-mode", "2", "-e", "0.001",
            "--max-accept", "1000000", "-c", "0.5", "--cov-mode", "1",
        ])),
        step(NEEDS_ALN, mmseqs("cpdb", &["cpdb", "{{ base }}/qdb.lookup", "{{ base }}/res_exp_realign.lookup"])),
        step(NEEDS_ALN, mmseqs("unpackdb", &[
            "unpackdb", "{{ base }}/res_exp_realign", "{{ base }}",
            "--unpack-name-mode", "1", "--unpack-suffix", ".aln",
        ])),
        step(NEEDS_ALN, rmdb(&["rmdb", "{{ base }}/qdb"])),
        step(NEEDS_ALN, rmdb(&["rmdb", "{{ base }}/qdb_h"])),
        step(NEEDS_ALN, rmdb(&["rmdb", "{{ base }}/res"])),
        step(NEEDS_ALN, rmdb(&["rmdb", "{{ base }}/res_exp"])),
        step(NEEDS_ALN, rmdb(&["rmdb", "{{ base }}/res_final"])),
        step(NEEDS_ALN, rmdb(&["rmdb", "{{ base }}/res_exp_realign"])),
        step(NEEDS_ALN, Action::RemoveDir("{{ base }}/tmp")),
        step(NEEDS_ALN, Action::Archive(ArchiveRule::Suffixes(&[(".aln", None)]))),
        // Formatting branch
        step(HAS_ALN, mmseqs("convertalis", &[
            "convertalis", "{{ base }}/qdb", "{{ uniref }}.idx", "{{ base }}/res_exp_realign",
            "{{ base }}/convertalis_tax", "--format-output", "target,evalue,taxid,taxname,taxlineage",
            "--db-load-mode", "2",
        ])),
        step(HAS_ALN, mmseqs("convertalis", &[
            "convertalis", "{{ base }}/qdb", "{{ uniref }}.idx", "{{ base }}/res_exp_realign",
            "{{ base }}/convertalis_seq", "--format-output", "target,tseq", "--db-load-mode", "2",
        ])),
        step(HAS_ALN, mmseqs("result2msa", &[
            "result2msa", "{{ base }}/qdb", "{{ uniref }}.idx", "{{ base }}/res_exp_realign",
            "{{ base }}/uniref.a3m", "--msa-format-mode", "6", "--db-load-mode", "2",
            "--filter-msa", "{{ filter_msa }}",
        ])),
        step(HAS_ALN, mmseqs("mvdb", &["mvdb", "{{ base }}/uniref.a3m", "{{ base }}/final.a3m"])),
        step(HAS_ALN, mmseqs("cpdb", &["cpdb", "{{ base }}/qdb.lookup", "{{ base }}/final.a3m.lookup"])),
        step(HAS_ALN, mmseqs("unpackdb", &[
            "unpackdb", "{{ base }}/final.a3m", "{{ base }}",
            "--unpack-name-mode", "1", "--unpack-suffix", ".a3m",
        ])),
        step(HAS_ALN, rmdb(&["rmdb", "{{ base }}/final.a3m"])),
        // Environmental database
        step(HAS_ALN_ENV, mmseqs("search", &[
            "search", "{{ base }}/qdb", "{{ environmental }}", "{{ base }}/res_env", "{{ base }}/tmp",
            "--num-iterations", "3", "--db-load-mode", "2", "-a", "--k-score", "seq:96,prof:80",
            "-e", "0.1", "--max-seqs", "10000",
        ])),
        step(HAS_ALN_ENV, mmseqs("expandaln", &[
            "expandaln", "{{ base }}/qdb", "{{ environmental }}.idx", "{{ base }}/res_env",
            "{{ environmental }}.idx", "{{ base }}/res_env_exp", "--db-load-mode", "2",
            "--expansion-mode", "0", "-e", "inf", "--expand-filter-clusters", "0",
            "--max-seq-id", "0.95",
        ])),
        step(HAS_ALN_ENV, mmseqs("align", &[
            "align", "{{ base }}/qdb", "{{ environmental }}.idx", "{{ base }}/res_env_exp",
            "{{ base }}/res_env_realign", "--db-load-mode", "2", "-e", "0.001",
            "--max-accept", "1000000", "-c", "0.5", "--cov-mode", "1",
        ])),
        step(HAS_ALN_ENV, mmseqs("result2msa", &[
            "result2msa", "{{ base }}/qdb", "{{ environmental }}.idx", "{{ base }}/res_env_realign",
            "{{ base }}/env.a3m", "--msa-format-mode", "6", "--db-load-mode", "2",
            "--filter-msa", "{{ filter_msa }}",
        ])),
        step(HAS_ALN_ENV, mmseqs("cpdb", &["cpdb", "{{ base }}/qdb.lookup", "{{ base }}/env.a3m.lookup"])),
        step(HAS_ALN_ENV, mmseqs("unpackdb", &[
            "unpackdb", "{{ base }}/env.a3m", "{{ base }}",
            "--unpack-name-mode", "1", "--unpack-suffix", ".env.a3m",
        ])),
        step(HAS_ALN_ENV, rmdb(&["rmdb", "{{ base }}/res_env"])),
        step(HAS_ALN_ENV, rmdb(&["rmdb", "{{ base }}/res_env_exp"])),
        step(HAS_ALN_ENV, rmdb(&["rmdb", "{{ base }}/res_env_realign"])),
        step(HAS_ALN_ENV, rmdb(&["rmdb", "{{ base }}/env.a3m"])),
        // Template hits
        step(HAS_ALN_TEMPLATES, mmseqs("search", &[
            "search", "{{ base }}/qdb", "{{ pdb }}", "{{ base }}/res_pdb", "{{ base }}/tmp",
            "--db-load-mode", "2", "-s", "7.5", "-a", "-e", "0.1",
        ])),
        step(HAS_ALN_TEMPLATES, mmseqs("convertalis", &[
            "convertalis", "{{ base }}/qdb", "{{ pdb }}.idx", "{{ base }}/res_pdb",
            "{{ base }}/pdb70.m8", "--format-output",
            "query,target,fident,alnlen,mismatch,gapopen,qstart,qend,tstart,tend,evalue,bits,cigar",
            "--db-load-mode", "2",
        ])),
        step(HAS_ALN_TEMPLATES, rmdb(&["rmdb", "{{ base }}/res_pdb"])),
        // Annotation
        step(HAS_ALN, helper("add-tax", &["{{ helpers }}/add_tax_to_msa.py", "{{ base }}/convertalis_tax", "{{ base }}"])),
        step(HAS_ALN_TABULAR, helper("seq-to-tsv", &[
            "{{ helpers }}/convertalis_seq_to_tsv.py", "{{ base }}/convertalis_seq",
            "--a3m_dir", "{{ base }}",
        ])),
        step(HAS_ALN, rmdb(&["rmdb", "{{ base }}/qdb"])),
        step(HAS_ALN, rmdb(&["rmdb", "{{ base }}/qdb_h"])),
        step(HAS_ALN, rmdb(&["rmdb", "{{ base }}/res_exp_realign"])),
        step(HAS_ALN, rmdb(&["rmdb", "{{ base }}/convertalis_tax"])),
        step(HAS_ALN, rmdb(&["rmdb", "{{ base }}/convertalis_seq"])),
        step(HAS_ALN, Action::RemoveDir("{{ base }}/tmp")),
        step(HAS_ALN, Action::Archive(ArchiveRule::Suffixes(&[
            (".a3m", None),
            (".env.a3m", Some(ModeFlag::Env)),
            (".a3m.tax", Some(ModeFlag::Taxonomy)),
            (".tsv", Some(ModeFlag::Tabular)),
            (".m8", Some(ModeFlag::Templates)),
        ]))),
    ],
};

/// Paired alignment pipeline over two chains.
pub static PAIR_PIPELINE: Pipeline = Pipeline {
    name: "pair",
    env: CALL_DEPTH_ENV,
    steps: &[
        step(ALWAYS, helper("get-intermediates", &[
            "{{ helpers }}/get_intermediates.py", "{{ base }}/job.fasta", "{{ intermediate_store }}",
        ])),
        step(ALWAYS, mmseqs("createdb", &["createdb", "{{ query }}", "{{ base }}/qdb", "--shuffle", "0"])),
        step(ALWAYS, mmseqs("pairaln", &[
            "pairaln", "{{ base }}/qdb", "{{ uniref }}.idx", "{{ base }}/res_exp_realign",
            "{{ base }}/res_exp_realign_pair", "--db-load-mode", "2",
        ])),
        step(ALWAYS, mmseqs("align", &[
            "align", "{{ base }}/qdb", "{{ uniref }}.idx", "{{ base }}/res_exp_realign_pair",
            "{{ base }}/res_exp_realign_pair_bt", "--db-load-mode", "2", "-e", "inf", "-a",
        ])),
        step(ALWAYS, mmseqs("pairaln", &[
            "pairaln", "{{ base }}/qdb", "{{ uniref }}.idx", "{{ base }}/res_exp_realign_pair_bt",
            "{{ base }}/res_final", "--db-load-mode", "2",
        ])),
        step(ALWAYS, mmseqs("convertalis", &[
            "convertalis", "{{ base }}/qdb", "{{ uniref }}.idx", "{{ base }}/res_exp_realign_pair_bt",
            "{{ base }}/convertalis_tax", "--format-output", "target,evalue,taxid,taxname,taxlineage",
            "--db-load-mode", "2",
        ])),
        step(ALWAYS, mmseqs("convertalis", &[
            "convertalis", "{{ base }}/qdb", "{{ uniref }}.idx", "{{ base }}/res_exp_realign_pair_bt",
            "{{ base }}/convertalis_seq", "--format-output", "target,tseq", "--db-load-mode", "2",
        ])),
        step(ALWAYS, mmseqs("result2msa", &[
            "result2msa", "{{ base }}/qdb", "{{ uniref }}.idx", "{{ base }}/res_final",
            "{{ base }}/pair.a3m", "--db-load-mode", "2", "--msa-format-mode", "6",
        ])),
        step(ALWAYS, mmseqs("unpackdb", &[
            "unpackdb", "{{ base }}/pair.a3m", "{{ base }}",
            "--unpack-name-mode", "0", "--unpack-suffix", ".a3m",
        ])),
        step(ALWAYS, helper("seq-to-tsv", &[
            "{{ helpers }}/convertalis_seq_to_tsv.py", "{{ base }}/convertalis_seq", "--pair",
            "--a3m_0", "{{ base }}/0.a3m", "--a3m_1", "{{ base }}/1.a3m",
        ])),
        step(ALWAYS, helper("add-tax", &["{{ helpers }}/add_tax_to_msa.py", "{{ base }}/convertalis_tax", "{{ base }}"])),
        step(ALWAYS, rmdb(&["rmdb", "{{ base }}/qdb"])),
        step(ALWAYS, rmdb(&["rmdb", "{{ base }}/qdb_h"])),
        step(ALWAYS, rmdb(&["rmdb", "{{ base }}/res"])),
        step(ALWAYS, rmdb(&["rmdb", "{{ base }}/res_exp"])),
        step(ALWAYS, rmdb(&["rmdb", "{{ base }}/res_exp_realign"])),
        step(ALWAYS, rmdb(&["rmdb", "{{ base }}/res_exp_realign_pair"])),
        step(ALWAYS, rmdb(&["rmdb", "{{ base }}/res_exp_realign_pair_bt"])),
        step(ALWAYS, rmdb(&["rmdb", "{{ base }}/res_final"])),
        step(ALWAYS, Action::RemoveDir("{{ base }}/tmp")),
        step(ALWAYS, Action::Archive(ArchiveRule::Files(&[
            "0.a3m.tax",
            "1.a3m.tax",
            "convertalis_seq.tsv",
        ]))),
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    fn archive_steps(pipeline: &Pipeline) -> Vec<&Step> {
        pipeline
            .steps
            .iter()
            .filter(|s| matches!(s.action, Action::Archive(_)))
            .collect()
    }

    #[test]
    fn test_every_branch_ends_in_one_archive() {
        let archives = archive_steps(&MSA_PIPELINE);
        assert_eq!(archives.len(), 2);
        assert_eq!(archives[0].when, NEEDS_ALN);
        assert_eq!(archives[1].when, HAS_ALN);
        assert!(matches!(
            MSA_PIPELINE.steps.last().map(|s| s.action),
            Some(Action::Archive(_))
        ));

        assert_eq!(archive_steps(&PAIR_PIPELINE).len(), 1);
        assert!(matches!(
            PAIR_PIPELINE.steps.last().map(|s| s.action),
            Some(Action::Archive(ArchiveRule::Files(_)))
        ));
    }

    #[test]
    fn test_only_cleanup_stages_continue_on_failure() {
        for pipeline in [&MSA_PIPELINE, &PAIR_PIPELINE] {
            for step in pipeline.steps {
                if let Action::Exec { name, policy, args, .. } = step.action {
                    let is_cleanup = args.first() == Some(&"rmdb");
                    assert_eq!(
                        policy == CompletionPolicy::Continue,
                        is_cleanup,
                        "{} step '{}' has unexpected policy",
                        pipeline.name,
                        name
                    );
                }
            }
        }
    }

    #[test]
    fn test_pipelines_set_call_depth() {
        assert_eq!(MSA_PIPELINE.env, &[("MMSEQS_CALL_DEPTH", "1")]);
        assert_eq!(PAIR_PIPELINE.env, &[("MMSEQS_CALL_DEPTH", "1")]);
    }

    #[test]
    fn test_mmseqs_subcommand_matches_stage_name() {
        for step in MSA_PIPELINE.steps.iter().chain(PAIR_PIPELINE.steps) {
            if let Action::Exec { name, program: Program::Mmseqs, args, .. } = step.action {
                assert_eq!(args.first().copied(), Some(name));
            }
        }
    }
}
