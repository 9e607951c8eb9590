//! Job dispatcher: turns a job request into stage executions and an outcome.
//!
//! Search-class jobs build one `easy-search` stage per database. MSA and
//! pair jobs walk a static [`Pipeline`] descriptor through one generic step
//! executor. Index jobs validate a database and update its sidecar.
//!
//! Every stage failure or timeout aborts the job; outputs written so far are
//! left in the working directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tera::{Context, Tera};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::definitions::{
    Action, ArchiveRule, Condition, Pipeline, Program, MSA_PIPELINE, PAIR_PIPELINE,
};
use super::{index, search};
use crate::config::{PathsConfig, WorkerConfig};
use crate::error::{ArchiveError, ExecutionError};
use crate::runner::{CompletionPolicy, StageError, StageExecution, StageRunner};
use crate::scheduler::{
    JobId, JobOutcome, JobRequest, JobVariant, ModeFlag, MsaModeFlags, SearchJob,
    StructureSearchJob,
};
use crate::storage::{write_archive, DatabaseParams, Manifest, SuffixRule};

/// File name of the result archive of a job.
pub fn archive_name(id: &JobId) -> String {
    format!("mmseqs_results_{}.tar.gz", id)
}

/// Runs jobs with a [`StageRunner`].
pub struct Dispatcher<R: StageRunner> {
    paths: PathsConfig,
    timeout: Duration,
    runner: R,
}

impl<R: StageRunner> Dispatcher<R> {
    pub fn new(config: &WorkerConfig, runner: R) -> Self {
        Self {
            paths: config.paths.clone(),
            timeout: config.worker.stage_timeout(),
            runner,
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Runs one job to its terminal outcome.
    pub async fn run(&self, request: &JobRequest) -> JobOutcome {
        let result = match &request.job {
            JobVariant::Search(job) => self.run_search(&request.id, job).await,
            JobVariant::StructureSearch(job) => self.run_structure_search(&request.id, job).await,
            JobVariant::Msa(job) => {
                self.run_pipeline(&request.id, &MSA_PIPELINE, MsaModeFlags::parse(&job.mode))
                    .await
            }
            JobVariant::Pair(job) => {
                self.run_pipeline(&request.id, &PAIR_PIPELINE, MsaModeFlags::parse(&job.mode))
                    .await
            }
            JobVariant::Index(job) => index::run_index(&self.runner, &self.paths, job).await,
            JobVariant::Unrecognized { kind, .. } => {
                warn!(job_id = %request.id, kind = %kind, "Unrecognized job type");
                return JobOutcome::InvalidVariant;
            }
        };

        match result {
            Ok(()) => JobOutcome::Success,
            Err(ExecutionError::Stage(e)) if e.is_timeout() => {
                warn!(job_id = %request.id, error = %e, "Job timed out");
                JobOutcome::TimeoutFailure
            }
            Err(e) => JobOutcome::ExecutionFailure(e),
        }
    }

    async fn run_search(&self, id: &JobId, job: &SearchJob) -> Result<(), ExecutionError> {
        if job.database.is_empty() {
            return Err(ExecutionError::NoDatabases);
        }
        let base = self.paths.job_dir(id.as_str());
        for database in &job.database {
            let params = self.database_params(database)?;
            let stage = search::sequence_search(&self.paths, &base, database, &params, job);
            self.runner.run(&stage, Some(self.timeout)).await?;
        }
        self.archive_search_results(id, &base, &job.database).await
    }

    async fn run_structure_search(
        &self,
        id: &JobId,
        job: &StructureSearchJob,
    ) -> Result<(), ExecutionError> {
        let mode = search::StructureMode::parse(&job.mode)?;
        if job.database.is_empty() {
            return Err(ExecutionError::NoDatabases);
        }
        let base = self.paths.job_dir(id.as_str());
        for database in &job.database {
            let params = self.database_params(database)?;
            let stage = search::structure_search(&self.paths, &base, database, &params, job, mode);
            self.runner.run(&stage, Some(self.timeout)).await?;
        }
        self.archive_search_results(id, &base, &job.database).await
    }

    fn database_params(&self, database: &str) -> Result<DatabaseParams, ExecutionError> {
        let path = DatabaseParams::path_for(&self.paths.databases.join(database));
        Ok(DatabaseParams::read(&path)?)
    }

    async fn archive_search_results(
        &self,
        id: &JobId,
        base: &Path,
        databases: &[String],
    ) -> Result<(), ExecutionError> {
        let dir = base.to_path_buf();
        let databases = databases.to_vec();
        self.archive(id, base, move || {
            Ok(Manifest::Files(search_outputs(&dir, &databases)?))
        })
        .await
    }

    /// Walks a pipeline descriptor.
    ///
    /// The whole pipeline shares one time budget; each stage gets what is
    /// left of it.
    async fn run_pipeline(
        &self,
        id: &JobId,
        pipeline: &Pipeline,
        flags: MsaModeFlags,
    ) -> Result<(), ExecutionError> {
        let base = self.paths.job_dir(id.as_str());
        tokio::fs::create_dir_all(&base).await?;

        let context = template_context(&self.paths, &base, flags);
        let deadline = Instant::now() + self.timeout;
        info!(job_id = %id, pipeline = pipeline.name, "Starting pipeline");

        for step in pipeline.steps {
            if !conditions_hold(step.when, &base, flags).await {
                continue;
            }

            match step.action {
                Action::Exec {
                    name,
                    program,
                    args,
                    policy,
                } => {
                    let mut stage = StageExecution::new(name, self.program(program))
                        .with_policy(policy);
                    for arg in args {
                        stage = stage.arg(render(arg, &context)?);
                    }
                    for (key, value) in pipeline.env {
                        stage = stage.with_env(*key, *value);
                    }

                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(StageError::Timeout {
                            program: stage.program.display().to_string(),
                            timeout: self.timeout,
                        }
                        .into());
                    }

                    match self.runner.run(&stage, Some(remaining)).await {
                        Ok(()) => {}
                        Err(e) if policy == CompletionPolicy::Continue && !e.is_timeout() => {
                            warn!(job_id = %id, stage = name, error = %e, "Cleanup stage failed, continuing");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Action::RemoveDir(template) => {
                    let dir = PathBuf::from(render(template, &context)?);
                    match tokio::fs::remove_dir_all(&dir).await {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => warn!(job_id = %id, dir = %dir.display(), error = %e, "Failed to remove directory"),
                    }
                }
                Action::Archive(rule) => {
                    let manifest = manifest_for(rule, &base, flags);
                    self.archive(id, &base, move || Ok(manifest)).await?;
                }
            }
        }

        Ok(())
    }

    fn program(&self, program: Program) -> &Path {
        match program {
            Program::Mmseqs => &self.paths.mmseqs,
            Program::Python => &self.paths.python,
        }
    }

    /// Writes `<base>/mmseqs_results_<id>.tar.gz` on the blocking pool.
    async fn archive<F>(&self, id: &JobId, base: &Path, manifest: F) -> Result<(), ExecutionError>
    where
        F: FnOnce() -> Result<Manifest, ArchiveError> + Send + 'static,
    {
        let destination = base.join(archive_name(id));
        let task = tokio::task::spawn_blocking(move || {
            let manifest = manifest()?;
            write_archive(&manifest, &destination)
        });
        let entries = task
            .await
            .map_err(|e| ExecutionError::Join(e.to_string()))??;

        info!(job_id = %id, entries = entries, "Result archive written");
        Ok(())
    }
}

async fn conditions_hold(conditions: &[Condition], base: &Path, flags: MsaModeFlags) -> bool {
    for condition in conditions {
        let holds = match condition {
            Condition::MarkerPresent(name) => marker_exists(base, name).await,
            Condition::MarkerAbsent(name) => !marker_exists(base, name).await,
            Condition::Flag(flag) => flags.is_set(*flag),
        };
        if !holds {
            debug!(condition = ?condition, "Skipping step");
            return false;
        }
    }
    true
}

async fn marker_exists(base: &Path, name: &str) -> bool {
    tokio::fs::try_exists(base.join(name)).await.unwrap_or(false)
}

fn template_context(paths: &PathsConfig, base: &Path, flags: MsaModeFlags) -> Context {
    let mut context = Context::new();
    context.insert("base", &base.display().to_string());
    context.insert("query", &base.join("job.fasta").display().to_string());
    context.insert("uniref", &paths.colabfold.uniref.display().to_string());
    context.insert("pdb", &paths.colabfold.pdb.display().to_string());
    context.insert(
        "environmental",
        &paths.colabfold.environmental.display().to_string(),
    );
    context.insert(
        "intermediate_store",
        &paths.colabfold.intermediate_store.display().to_string(),
    );
    context.insert("helpers", &paths.helpers.display().to_string());
    context.insert("filter_msa", if flags.is_set(ModeFlag::Filter) { "1" } else { "0" });
    context
}

fn render(template: &str, context: &Context) -> Result<String, ExecutionError> {
    if !template.contains("{{") {
        return Ok(template.to_string());
    }
    Tera::one_off(template, context, false).map_err(|e| ExecutionError::Template {
        template: template.to_string(),
        message: e.to_string(),
    })
}

fn manifest_for(rule: ArchiveRule, base: &Path, flags: MsaModeFlags) -> Manifest {
    match rule {
        ArchiveRule::Files(names) => Manifest::Files(names.iter().map(|n| base.join(n)).collect()),
        ArchiveRule::Suffixes(rules) => Manifest::Suffixes {
            dir: base.to_path_buf(),
            rules: rules
                .iter()
                .map(|(suffix, flag)| {
                    SuffixRule::new(*suffix, flag.map_or(true, |f| flags.is_set(f)))
                })
                .collect(),
        },
    }
}

/// Collects the result database files of each searched database.
///
/// `alis_<db>` itself is always listed, so a search that produced nothing
/// fails the archive instead of silently shipping an empty result.
fn search_outputs(base: &Path, databases: &[String]) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut names: Vec<String> = Vec::new();
    for entry in WalkDir::new(base).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|source| ArchiveError::Scan {
            path: base.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    // `alis_pdb.` also prefixes `alis_pdb.v2`, so one file can match twice.
    let mut seen = HashSet::new();
    let mut files = Vec::new();
    for database in databases {
        let output = search::output_name(database);
        let prefix = format!("{}.", output);
        let matches = names.iter().filter(|name| name.starts_with(&prefix));
        for name in std::iter::once(&output).chain(matches) {
            if seen.insert(name.clone()) {
                files.push(base.join(name));
            }
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{IndexJob, MsaJob, PairJob};
    use async_trait::async_trait;
    use flate2::read::GzDecoder;
    use std::fs;
    use std::sync::Mutex;

    type Hook = Box<dyn Fn(&StageExecution) -> Result<(), StageError> + Send + Sync>;

    /// Records every stage and lets the test simulate its effects.
    struct MockRunner {
        calls: Mutex<Vec<StageExecution>>,
        hook: Hook,
    }

    impl MockRunner {
        fn new(hook: impl Fn(&StageExecution) -> Result<(), StageError> + Send + Sync + 'static) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                hook: Box::new(hook),
            }
        }

        fn ok() -> Self {
            Self::new(|_| Ok(()))
        }

        fn names(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|s| s.name.clone()).collect()
        }

        fn calls(&self) -> Vec<StageExecution> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StageRunner for MockRunner {
        async fn run(&self, stage: &StageExecution, _timeout: Option<Duration>) -> Result<(), StageError> {
            self.calls.lock().unwrap().push(stage.clone());
            (self.hook)(stage)
        }
    }

    fn failed(program: &str) -> StageError {
        StageError::NonZeroExit {
            program: program.to_string(),
            status: "exit status: 1".to_string(),
        }
    }

    fn touch(path: impl AsRef<Path>) {
        fs::write(path, "data\n").unwrap();
    }

    struct Fixture {
        _root: tempfile::TempDir,
        config: WorkerConfig,
        base: PathBuf,
    }

    impl Fixture {
        fn new(id: &str) -> Self {
            let root = tempfile::tempdir().unwrap();
            let mut config = WorkerConfig::default();
            config.paths.results = root.path().join("results");
            config.paths.databases = root.path().join("databases");
            fs::create_dir_all(&config.paths.databases).unwrap();
            let base = config.paths.results.join(id);
            fs::create_dir_all(&base).unwrap();
            touch(base.join("job.fasta"));
            Self {
                _root: root,
                config,
                base,
            }
        }

        fn add_database(&self, name: &str, params: &str) {
            let db = self.config.paths.databases.join(name);
            touch(&db);
            fs::write(DatabaseParams::path_for(&db), params).unwrap();
        }

        fn archive(&self, id: &str) -> PathBuf {
            self.base.join(archive_name(&JobId::new(id)))
        }

        fn listing(&self) -> Vec<String> {
            let mut names: Vec<String> = fs::read_dir(&self.base)
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }
    }

    fn archive_entries(path: &Path) -> Vec<String> {
        let mut tar = tar::Archive::new(GzDecoder::new(fs::File::open(path).unwrap()));
        tar.entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    fn search_request(id: &str, databases: &[&str], mode: &str) -> JobRequest {
        JobRequest::new(
            id,
            JobVariant::Search(SearchJob {
                database: databases.iter().map(|d| d.to_string()).collect(),
                mode: mode.to_string(),
                taxfilter: String::new(),
            }),
        )
    }

    /// Simulates `easy-search --db-output` by writing `alis_<db>` and its index.
    fn fake_search(stage: &StageExecution) -> Result<(), StageError> {
        let output = &stage.args[3];
        touch(output);
        touch(format!("{}.index", output));
        touch(format!("{}.dbtype", output));
        Ok(())
    }

    #[tokio::test]
    async fn test_unrecognized_variant_has_no_side_effects() {
        let fx = Fixture::new("u1");
        let before = fx.listing();
        let dispatcher = Dispatcher::new(&fx.config, MockRunner::ok());

        let request = JobRequest::new(
            "u1",
            JobVariant::Unrecognized {
                kind: "complex".to_string(),
                payload: serde_json::json!({}),
            },
        );
        let outcome = dispatcher.run(&request).await;

        assert!(matches!(outcome, JobOutcome::InvalidVariant));
        assert!(dispatcher.runner().names().is_empty());
        assert_eq!(fx.listing(), before);
    }

    #[tokio::test]
    async fn test_invalid_structure_mode_spawns_nothing() {
        let fx = Fixture::new("s1");
        fx.add_database("afdb", "{}");
        let dispatcher = Dispatcher::new(&fx.config, MockRunner::ok());

        let request = JobRequest::new(
            "s1",
            JobVariant::StructureSearch(StructureSearchJob {
                database: vec!["afdb".to_string()],
                mode: "blast".to_string(),
                taxfilter: String::new(),
            }),
        );
        let outcome = dispatcher.run(&request).await;

        assert!(matches!(
            outcome,
            JobOutcome::ExecutionFailure(ExecutionError::InvalidMode(_))
        ));
        assert!(dispatcher.runner().names().is_empty());
    }

    #[tokio::test]
    async fn test_search_archives_every_database() {
        let fx = Fixture::new("j1");
        fx.add_database("pdb", r#"{"search": "-s 7.5", "taxonomy": false}"#);
        fx.add_database("uniref", r#"{"search": "", "taxonomy": true}"#);
        let dispatcher = Dispatcher::new(&fx.config, MockRunner::new(fake_search));

        let outcome = dispatcher
            .run(&search_request("j1", &["pdb", "uniref"], "summary"))
            .await;
        assert!(outcome.is_success(), "unexpected outcome: {}", outcome);

        let calls = dispatcher.runner().calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].args.contains(&"--greedy-best-hits".to_string()));
        let columns = |stage: &StageExecution| {
            let pos = stage.args.iter().position(|a| a == "--format-output").unwrap();
            stage.args[pos + 1].clone()
        };
        assert!(!columns(&calls[0]).contains("taxid"));
        assert!(columns(&calls[1]).ends_with("taxid,taxname"));

        assert_eq!(
            archive_entries(&fx.archive("j1")),
            vec![
                "alis_pdb",
                "alis_pdb.dbtype",
                "alis_pdb.index",
                "alis_uniref",
                "alis_uniref.dbtype",
                "alis_uniref.index",
            ]
        );
    }

    #[tokio::test]
    async fn test_dotted_database_names_archive_once() {
        let fx = Fixture::new("j5");
        fx.add_database("pdb", "{}");
        fx.add_database("pdb.v2", "{}");
        let dispatcher = Dispatcher::new(&fx.config, MockRunner::new(fake_search));

        let outcome = dispatcher
            .run(&search_request("j5", &["pdb", "pdb.v2"], ""))
            .await;
        assert!(outcome.is_success(), "unexpected outcome: {}", outcome);

        assert_eq!(
            archive_entries(&fx.archive("j5")),
            vec![
                "alis_pdb",
                "alis_pdb.dbtype",
                "alis_pdb.index",
                "alis_pdb.v2",
                "alis_pdb.v2.dbtype",
                "alis_pdb.v2.index",
            ]
        );
    }

    #[tokio::test]
    async fn test_search_without_databases_is_rejected() {
        let fx = Fixture::new("j6");
        let before = fx.listing();
        let dispatcher = Dispatcher::new(&fx.config, MockRunner::new(fake_search));

        let outcome = dispatcher.run(&search_request("j6", &[], "")).await;

        assert!(matches!(
            outcome,
            JobOutcome::ExecutionFailure(ExecutionError::NoDatabases)
        ));
        assert!(dispatcher.runner().names().is_empty());
        assert_eq!(fx.listing(), before);
    }

    #[tokio::test]
    async fn test_search_failure_aborts_remaining_databases() {
        let fx = Fixture::new("j2");
        fx.add_database("pdb", "{}");
        fx.add_database("uniref", "{}");
        let dispatcher = Dispatcher::new(&fx.config, MockRunner::new(|_| Err(failed("mmseqs"))));

        let outcome = dispatcher.run(&search_request("j2", &["pdb", "uniref"], "")).await;

        assert!(matches!(outcome, JobOutcome::ExecutionFailure(ExecutionError::Stage(_))));
        assert_eq!(dispatcher.runner().names(), vec!["search:pdb"]);
        assert!(!fx.archive("j2").exists());
    }

    #[tokio::test]
    async fn test_search_timeout_maps_to_timeout_outcome() {
        let fx = Fixture::new("j3");
        fx.add_database("pdb", "{}");
        let dispatcher = Dispatcher::new(
            &fx.config,
            MockRunner::new(|_| {
                Err(StageError::Timeout {
                    program: "mmseqs".to_string(),
                    timeout: Duration::from_secs(3600),
                })
            }),
        );

        let outcome = dispatcher.run(&search_request("j3", &["pdb"], "")).await;
        assert!(matches!(outcome, JobOutcome::TimeoutFailure));
    }

    #[tokio::test]
    async fn test_missing_params_fails_before_spawn() {
        let fx = Fixture::new("j4");
        let dispatcher = Dispatcher::new(&fx.config, MockRunner::ok());

        let outcome = dispatcher.run(&search_request("j4", &["nope"], "")).await;

        assert!(matches!(outcome, JobOutcome::ExecutionFailure(ExecutionError::Params(_))));
        assert!(dispatcher.runner().names().is_empty());
    }

    /// Simulates the MSA stages that produce files the archive depends on.
    fn fake_msa(marker: bool) -> impl Fn(&StageExecution) -> Result<(), StageError> + Send + Sync {
        move |stage: &StageExecution| {
            let last = |n: usize| stage.args[stage.args.len() - n].clone();
            match stage.name.as_str() {
                "aln-probe" if marker => {
                    let fasta = PathBuf::from(&stage.args[1]);
                    touch(fasta.with_file_name("ALN_FOUND"));
                }
                "unpackdb" => {
                    let dir = PathBuf::from(&stage.args[2]);
                    let suffix = last(1);
                    touch(dir.join(format!("0{}", suffix)));
                    touch(dir.join(format!("1{}", suffix)));
                }
                "add-tax" => {
                    let dir = PathBuf::from(last(1));
                    touch(dir.join("0.a3m.tax"));
                    touch(dir.join("1.a3m.tax"));
                }
                "seq-to-tsv" => {
                    let seq = PathBuf::from(&stage.args[1]);
                    touch(seq.with_file_name("convertalis_seq.tsv"));
                }
                "convertalis" if stage.args[4].ends_with("pdb70.m8") => touch(&stage.args[4]),
                _ => {}
            }
            Ok(())
        }
    }

    fn msa_request(id: &str, mode: &str) -> JobRequest {
        JobRequest::new(id, JobVariant::Msa(MsaJob { mode: mode.to_string() }))
    }

    #[tokio::test]
    async fn test_msa_without_precomputed_alignment_runs_search_branch() {
        let fx = Fixture::new("m1");
        let dispatcher = Dispatcher::new(&fx.config, MockRunner::new(fake_msa(false)));

        let outcome = dispatcher.run(&msa_request("m1", "")).await;
        assert!(outcome.is_success(), "unexpected outcome: {}", outcome);

        let names = dispatcher.runner().names();
        assert_eq!(&names[..5], ["createdb", "aln-probe", "search", "expandaln", "align"]);
        assert!(!names.contains(&"result2msa".to_string()));
        assert!(!names.contains(&"add-tax".to_string()));

        for stage in dispatcher.runner().calls() {
            assert_eq!(stage.env, vec![("MMSEQS_CALL_DEPTH".to_string(), "1".to_string())]);
        }
        assert_eq!(archive_entries(&fx.archive("m1")), vec!["0.aln", "1.aln"]);
    }

    #[tokio::test]
    async fn test_msa_with_precomputed_alignment_respects_flags() {
        let fx = Fixture::new("m2");
        // Left over from elsewhere; must not ship without the env flag.
        touch(fx.base.join("0.env.a3m"));
        let dispatcher = Dispatcher::new(&fx.config, MockRunner::new(fake_msa(true)));

        let outcome = dispatcher.run(&msa_request("m2", "taxonomy-nofilter-bogus")).await;
        assert!(outcome.is_success(), "unexpected outcome: {}", outcome);

        let calls = dispatcher.runner().calls();
        let names: Vec<&str> = calls.iter().map(|s| s.name.as_str()).collect();
        assert!(!names.contains(&"expandaln"));
        assert!(!names.contains(&"seq-to-tsv"));
        assert!(names.contains(&"add-tax"));

        let result2msa = calls.iter().find(|s| s.name == "result2msa").unwrap();
        assert_eq!(result2msa.args.last().map(String::as_str), Some("0"));
        assert!(calls
            .iter()
            .all(|s| !s.args.iter().any(|a| a.contains("colabfold_envdb"))));

        assert_eq!(
            archive_entries(&fx.archive("m2")),
            vec!["0.a3m", "0.a3m.tax", "1.a3m", "1.a3m.tax", "pdb70.m8"]
        );
    }

    #[tokio::test]
    async fn test_msa_env_and_tabular_outputs() {
        let fx = Fixture::new("m3");
        let dispatcher = Dispatcher::new(&fx.config, MockRunner::new(fake_msa(true)));

        let outcome = dispatcher
            .run(&msa_request("m3", "env-notemplates-m8output"))
            .await;
        assert!(outcome.is_success(), "unexpected outcome: {}", outcome);

        let names = dispatcher.runner().names();
        assert!(names.contains(&"seq-to-tsv".to_string()));
        assert!(!dispatcher
            .runner()
            .calls()
            .iter()
            .any(|s| s.args.iter().any(|a| a.ends_with("pdb70.m8"))));

        assert_eq!(
            archive_entries(&fx.archive("m3")),
            vec!["0.a3m", "0.env.a3m", "1.a3m", "1.env.a3m", "convertalis_seq.tsv"]
        );
    }

    #[tokio::test]
    async fn test_msa_aborts_on_first_failure() {
        let fx = Fixture::new("m4");
        let dispatcher = Dispatcher::new(
            &fx.config,
            MockRunner::new(|stage| {
                if stage.name == "createdb" {
                    Err(failed("mmseqs"))
                } else {
                    Ok(())
                }
            }),
        );

        let outcome = dispatcher.run(&msa_request("m4", "")).await;

        assert!(matches!(outcome, JobOutcome::ExecutionFailure(_)));
        assert_eq!(dispatcher.runner().names(), vec!["createdb"]);
        assert!(!fx.archive("m4").exists());
    }

    #[tokio::test]
    async fn test_cleanup_failures_do_not_abort() {
        let fx = Fixture::new("m5");
        let simulate = fake_msa(false);
        let dispatcher = Dispatcher::new(
            &fx.config,
            MockRunner::new(move |stage| {
                if stage.name == "rmdb" {
                    return Err(failed("mmseqs"));
                }
                simulate(stage)
            }),
        );

        let outcome = dispatcher.run(&msa_request("m5", "")).await;

        assert!(outcome.is_success(), "unexpected outcome: {}", outcome);
        assert!(fx.archive("m5").exists());
    }

    #[tokio::test]
    async fn test_pair_archives_fixed_files() {
        let fx = Fixture::new("p1");
        let dispatcher = Dispatcher::new(&fx.config, MockRunner::new(fake_msa(false)));
        touch(fx.base.join("stray.a3m"));

        let request = JobRequest::new("p1", JobVariant::Pair(PairJob::default()));
        let outcome = dispatcher.run(&request).await;
        assert!(outcome.is_success(), "unexpected outcome: {}", outcome);

        let calls = dispatcher.runner().calls();
        assert_eq!(calls[0].name, "get-intermediates");
        assert_eq!(calls[0].program, PathBuf::from("python3"));
        assert_eq!(
            calls[0].args.last().map(String::as_str),
            Some("intermediate_store")
        );
        assert_eq!(
            archive_entries(&fx.archive("p1")),
            vec!["0.a3m.tax", "1.a3m.tax", "convertalis_seq.tsv"]
        );
    }

    #[tokio::test]
    async fn test_pair_missing_output_fails() {
        let fx = Fixture::new("p2");
        let dispatcher = Dispatcher::new(&fx.config, MockRunner::ok());

        let request = JobRequest::new("p2", JobVariant::Pair(PairJob::default()));
        let outcome = dispatcher.run(&request).await;

        assert!(matches!(
            outcome,
            JobOutcome::ExecutionFailure(ExecutionError::Archive(ArchiveError::Input { .. }))
        ));
        assert!(!fx.archive("p2").exists());
    }

    #[tokio::test]
    async fn test_index_failure_is_persisted() {
        let fx = Fixture::new("i1");
        let db = fx.config.paths.databases.join("pdb");
        touch(&db);
        fs::write(DatabaseParams::path_for(&db), r#"{"status": "complete"}"#).unwrap();
        let dispatcher = Dispatcher::new(&fx.config, MockRunner::ok());

        let request = JobRequest::new("i1", JobVariant::Index(IndexJob { path: "pdb".to_string() }));
        let outcome = dispatcher.run(&request).await;

        assert!(matches!(outcome, JobOutcome::ExecutionFailure(_)));
        let params = DatabaseParams::read(&DatabaseParams::path_for(&db)).unwrap();
        assert_eq!(params.status, crate::scheduler::Status::Error);
    }
}
