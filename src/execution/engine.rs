//! Evaluation Engine
//!
//! Walks the operation graph in dependency order. Ready operations are
//! dispatched onto a bounded pool of tokio tasks; a single coordinator loop
//! owns the graph, the results store and the remaining dependency counts, so
//! completions are applied one at a time and a child is enqueued exactly once,
//! when its last parent succeeds.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::task::{self, JoinError, JoinSet};

use crate::config::EngineConfig;
use crate::error::{EngineError, ExecError, GraphError};
use crate::fs_state::FileSystemState;
use crate::graph::{CommandInfo, FileIdSet, OperationGraph, OperationId};
use crate::outdated::OutdatedChecker;
use crate::persist::{StateDirectory, ValueTable};
use crate::results::ResultRecord;

use super::build_state::BuildState;
use super::collaborators::{AccessMonitor, Collaborators, FileAccesses, ProcessOutput, ProcessRunner};
use super::summary::{EvaluationSummary, FailedOperation};

/// Generator type to pass as `None::<NoGenerator>` when a pass reuses the stored graph
pub type NoGenerator = fn(&FileSystemState, &mut ValueTable) -> Result<OperationGraph, GraphError>;

/// Everything a worker needs to decide on and run one operation
struct OperationJob {
    id: OperationId,
    title: String,
    command: CommandInfo,
    declared_input: FileIdSet,
    declared_output: FileIdSet,
    /// Declared plus previously observed
    effective_input: FileIdSet,
    effective_output: FileIdSet,
    /// A previous run exists and succeeded
    prior_success: bool,
}

enum JobOutcome {
    UpToDate,
    Finished(FinishedRun),
}

struct FinishedRun {
    /// `None` if the process never ran
    output: Option<ProcessOutput>,
    error: Option<ExecError>,
    observed_input: FileIdSet,
    observed_output: FileIdSet,
}

/// Incremental, dependency-ordered executor for an `OperationGraph`
pub struct EvaluationEngine {
    config: EngineConfig,
    collaborators: Collaborators,
}

impl EvaluationEngine {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// One complete pass against a state directory.
    ///
    /// Locks the directory, loads previous state, optionally regenerates the
    /// graph, evaluates it and saves everything back. Operation failures are
    /// reported in the summary and the state is still saved; structural graph
    /// errors abort before anything runs and leave the directory untouched.
    pub async fn run_pass<G>(
        &self,
        directory: &StateDirectory,
        generate: Option<G>,
    ) -> Result<EvaluationSummary, EngineError>
    where
        G: FnOnce(&FileSystemState, &mut ValueTable) -> Result<OperationGraph, GraphError>,
    {
        let _lock = directory.lock()?;
        let mut state = BuildState::load(directory, Arc::clone(&self.collaborators.file_system));

        if let Some(generate) = generate {
            let next = generate(state.fs_state.as_ref(), &mut state.shared_state)?;
            state.replace_graph(next);
        }

        let summary = self.evaluate(&mut state).await?;
        state.save(directory)?;
        Ok(summary)
    }

    /// Evaluate the graph held by `state`, updating its results in place.
    ///
    /// Fails only on structural graph errors, which are checked before the
    /// first operation is dispatched.
    pub async fn evaluate(&self, state: &mut BuildState) -> Result<EvaluationSummary, EngineError> {
        state.graph.validate()?;

        let workers = self.config.resolved_workers();
        let mut remaining: BTreeMap<OperationId, u32> = state.graph.derive_dependency_counts();
        let mut ready: VecDeque<OperationId> = state.graph.root_operation_ids().iter().copied().collect();
        let mut dispatched: HashSet<OperationId> = HashSet::new();
        let mut in_flight: JoinSet<JobOutcome> = JoinSet::new();
        // A panicked or cancelled task only reports its task id
        let mut running: HashMap<task::Id, OperationId> = HashMap::new();
        let mut summary = EvaluationSummary::default();
        let mut stop_dispatch = false;

        tracing::info!(
            operations = state.graph.len(),
            roots = ready.len(),
            workers,
            "Starting evaluation pass"
        );

        loop {
            while !stop_dispatch && in_flight.len() < workers {
                let Some(id) = ready.pop_front() else {
                    break;
                };
                if !dispatched.insert(id) {
                    tracing::warn!(id = id.0, "Operation became ready twice, ignoring");
                    continue;
                }

                let job = prepare_job(state, id);
                let fs_state = Arc::clone(&state.fs_state);
                let runner = Arc::clone(&self.collaborators.runner);
                let monitor = Arc::clone(&self.collaborators.monitor);

                let handle = in_flight.spawn(run_job(job, fs_state, runner, monitor));
                running.insert(handle.id(), id);
            }

            let Some(joined) = in_flight.join_next_with_id().await else {
                break;
            };
            let (task_id, outcome) = match joined {
                Ok((task_id, outcome)) => (task_id, Ok(outcome)),
                Err(e) => (e.id(), Err(e)),
            };
            let Some(id) = running.remove(&task_id) else {
                tracing::error!(task = %task_id, "Finished task does not belong to any operation");
                continue;
            };

            if self.complete(state, id, outcome, &mut summary) {
                // Counts are per distinct parent, so a repeated child entry must not decrement twice
                let children: BTreeSet<OperationId> =
                    state.graph.get_operation_info(id).children.iter().copied().collect();
                for child in children {
                    let count = remaining.entry(child).or_insert(0);
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        ready.push_back(child);
                    }
                }
            } else if !self.config.keep_going && !stop_dispatch {
                tracing::warn!("Operation failed, not starting any new operations");
                stop_dispatch = true;
            }
        }

        summary.not_run = state
            .graph
            .operations()
            .map(|operation| operation.id)
            .filter(|id| !dispatched.contains(id))
            .collect();
        summary.success = summary.failed.is_empty() && summary.not_run.is_empty();

        if summary.success {
            tracing::info!(
                executed = summary.executed,
                skipped = summary.skipped,
                "Evaluation pass complete"
            );
        } else {
            tracing::warn!(
                executed = summary.executed,
                skipped = summary.skipped,
                failed = summary.failed.len(),
                not_run = summary.not_run.len(),
                "Evaluation pass failed"
            );
        }

        Ok(summary)
    }

    /// Apply one finished job to the state. Returns whether it succeeded.
    fn complete(
        &self,
        state: &mut BuildState,
        id: OperationId,
        outcome: Result<JobOutcome, JoinError>,
        summary: &mut EvaluationSummary,
    ) -> bool {
        let run = match outcome {
            Ok(JobOutcome::UpToDate) => {
                summary.skipped += 1;
                return true;
            }
            Ok(JobOutcome::Finished(run)) => run,
            Err(join_error) => {
                let operation = state.graph.get_operation_info(id);
                FinishedRun {
                    output: None,
                    error: Some(ExecError::Join(join_error.to_string())),
                    observed_input: operation.declared_input.clone(),
                    observed_output: operation.declared_output.clone(),
                }
            }
        };

        summary.executed += 1;
        let success = run.error.is_none();

        state.results.put(
            id,
            ResultRecord::now(success, run.observed_input.clone(), run.observed_output.clone()),
        );
        state
            .graph
            .record_execution(id, success, run.observed_input, run.observed_output);

        if let Some(error) = run.error {
            let operation = state.graph.get_operation_info(id);
            tracing::warn!(
                operation = %operation.title,
                fingerprint = %operation.command.fingerprint(),
                error = %error,
                "Operation failed"
            );

            let (exit_code, stderr) = match run.output {
                Some(output) => (Some(output.exit_code), output.stderr),
                None => (None, String::new()),
            };
            summary.failed.push(FailedOperation {
                id,
                title: operation.title.clone(),
                command: operation.command.to_string(),
                fingerprint: operation.command.fingerprint(),
                exit_code,
                stderr,
                error: error.to_string(),
            });
        }

        success
    }
}

fn prepare_job(state: &BuildState, id: OperationId) -> OperationJob {
    let operation = state.graph.get_operation_info(id);
    let prior = state.results.get(id);

    let mut effective_input = operation.declared_input.clone();
    let mut effective_output = operation.declared_output.clone();
    if let Some(record) = prior {
        effective_input.extend(record.observed_input.iter().copied());
        effective_output.extend(record.observed_output.iter().copied());
    }

    OperationJob {
        id,
        title: operation.title.clone(),
        command: operation.command.clone(),
        declared_input: operation.declared_input.clone(),
        declared_output: operation.declared_output.clone(),
        effective_input,
        effective_output,
        prior_success: prior.map_or(false, |record| record.was_successful_run),
    }
}

async fn run_job(
    job: OperationJob,
    fs_state: Arc<FileSystemState>,
    runner: Arc<dyn ProcessRunner>,
    monitor: Arc<dyn AccessMonitor>,
) -> JobOutcome {
    if job.prior_success {
        // Write time queries stat the file system, keep them off the async workers
        let check = {
            let fs_state = Arc::clone(&fs_state);
            let targets = job.effective_output.clone();
            let inputs = job.effective_input.clone();
            task::spawn_blocking(move || {
                OutdatedChecker::new(&fs_state)
                    .check(&targets, &inputs)
                    .map(|reason| reason.description(&fs_state))
            })
        };
        match check.await {
            Ok(None) => {
                tracing::debug!(operation = %job.title, id = job.id.0, "Operation is up to date");
                return JobOutcome::UpToDate;
            }
            Ok(Some(reason)) => {
                tracing::debug!(
                    operation = %job.title,
                    id = job.id.0,
                    reason = %reason,
                    "Operation is out of date"
                );
            }
            Err(e) => {
                return JobOutcome::Finished(FinishedRun {
                    output: None,
                    error: Some(ExecError::Join(e.to_string())),
                    observed_input: job.declared_input,
                    observed_output: job.declared_output,
                });
            }
        }
    } else {
        tracing::debug!(operation = %job.title, id = job.id.0, "No previous successful run");
    }

    tracing::debug!(
        operation = %job.title,
        command = %job.command,
        fingerprint = %job.command.fingerprint(),
        "Executing operation"
    );

    let run = match monitor.run(&job.command, runner.as_ref()).await {
        Ok(run) => run,
        Err(error) => {
            return JobOutcome::Finished(FinishedRun {
                output: None,
                error: Some(error),
                observed_input: job.declared_input,
                observed_output: job.declared_output,
            });
        }
    };

    let (observed_input, observed_output) = match run.accesses {
        Some(accesses) => observe(&fs_state, &job.command, accesses),
        None => (job.declared_input, job.declared_output),
    };

    let error = if !run.denied.is_empty() {
        Some(ExecError::SandboxDenied(run.denied))
    } else if !run.output.success() {
        Some(ExecError::NonZeroExit {
            exit_code: run.output.exit_code,
        })
    } else {
        None
    };

    if error.is_none() {
        // Downstream staleness checks must see what this run just wrote
        let written: FileIdSet = job.effective_output.iter().chain(&observed_output).copied().collect();
        let fs_state = Arc::clone(&fs_state);
        let refresh = task::spawn_blocking(move || {
            for file in written {
                fs_state.refresh_last_write_time(file);
            }
        });
        if let Err(e) = refresh.await {
            tracing::error!(operation = %job.title, error = %e, "Failed to refresh output write times");
        }
    }

    JobOutcome::Finished(FinishedRun {
        output: Some(run.output),
        error,
        observed_input,
        observed_output,
    })
}

/// Translate monitored paths into file ids. A file the process wrote is an
/// output, even if it also read it back.
fn observe(fs_state: &FileSystemState, command: &CommandInfo, accesses: FileAccesses) -> (FileIdSet, FileIdSet) {
    let working_directory = &command.working_directory;
    let observed_output: FileIdSet = accesses
        .writes
        .iter()
        .map(|path| fs_state.to_file_id(path, working_directory))
        .collect();
    let observed_input: FileIdSet = accesses
        .reads
        .iter()
        .map(|path| fs_state.to_file_id(path, working_directory))
        .filter(|id| !observed_output.contains(id))
        .collect();
    (observed_input, observed_output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs_state::{normalize_path, FileId, FileSystem, MemoryFileSystem, Timestamp};
    use crate::graph::{GraphGenerator, OperationDeclaration, OperationInfo};
    use crate::execution::collaborators::{split_arguments, MonitoredRun, NoMonitor};
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    const WORK: &str = "/work";

    /// Writes every argument as a file; executable `fail` exits with 1 and
    /// `crash` panics instead.
    struct FakeRunner {
        file_system: Arc<MemoryFileSystem>,
        clock: AtomicI64,
        invocations: Mutex<Vec<String>>,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    impl FakeRunner {
        fn new(file_system: Arc<MemoryFileSystem>) -> Arc<Self> {
            Arc::new(Self {
                file_system,
                clock: AtomicI64::new(1_000),
                invocations: Mutex::new(Vec::new()),
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
            })
        }

        fn tick(&self) -> Timestamp {
            DateTime::from_timestamp(self.clock.fetch_add(1, Ordering::SeqCst), 0).unwrap()
        }

        /// Create or modify a file "now"
        fn touch(&self, path: &str) {
            self.file_system.set_file(path, self.tick());
        }

        fn invocations(&self) -> Vec<String> {
            self.invocations.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProcessRunner for FakeRunner {
        async fn execute(&self, command: &CommandInfo) -> Result<ProcessOutput, ExecError> {
            self.invocations.lock().unwrap().push(command.arguments.clone());
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            if command.executable == Path::new("crash") {
                panic!("runner crashed");
            }
            if command.executable == Path::new("fail") {
                return Ok(ProcessOutput {
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: "boom".to_string(),
                });
            }

            for argument in split_arguments(&command.arguments) {
                let path = normalize_path(Path::new(&argument), &command.working_directory);
                self.file_system.set_file(path, self.tick());
            }
            Ok(ProcessOutput::default())
        }
    }

    /// Reports fixed accesses in addition to running the command
    struct FixedMonitor {
        reads: Vec<PathBuf>,
        writes: Vec<PathBuf>,
    }

    #[async_trait]
    impl AccessMonitor for FixedMonitor {
        async fn run(&self, command: &CommandInfo, runner: &dyn ProcessRunner) -> Result<MonitoredRun, ExecError> {
            Ok(MonitoredRun {
                output: runner.execute(command).await?,
                accesses: Some(FileAccesses {
                    reads: self.reads.clone(),
                    writes: self.writes.clone(),
                }),
                denied: Vec::new(),
            })
        }
    }

    struct Harness {
        file_system: Arc<MemoryFileSystem>,
        runner: Arc<FakeRunner>,
        state: BuildState,
    }

    impl Harness {
        fn new() -> Self {
            let file_system = Arc::new(MemoryFileSystem::new());
            let runner = FakeRunner::new(Arc::clone(&file_system));
            let state = BuildState::empty(file_system.clone());
            Self {
                file_system,
                runner,
                state,
            }
        }

        fn generate(&mut self, declarations: Vec<OperationDeclaration>) {
            let mut generator = GraphGenerator::new(&self.state.fs_state);
            for declaration in declarations {
                generator.declare(declaration);
            }
            let graph = generator.finish().unwrap();
            self.state.replace_graph(graph);
        }

        fn engine(&self, config: EngineConfig) -> EvaluationEngine {
            self.engine_with_monitor(config, Arc::new(NoMonitor))
        }

        fn engine_with_monitor(&self, config: EngineConfig, monitor: Arc<dyn AccessMonitor>) -> EvaluationEngine {
            let file_system: Arc<dyn FileSystem> = self.file_system.clone();
            let runner: Arc<dyn ProcessRunner> = self.runner.clone();
            EvaluationEngine::new(
                config,
                Collaborators {
                    file_system,
                    runner,
                    monitor,
                },
            )
        }

        /// New pass over the same state: write times are re-read from disk
        async fn pass(&mut self, engine: &EvaluationEngine) -> EvaluationSummary {
            self.state.fs_state.clear_write_times();
            engine.evaluate(&mut self.state).await.unwrap()
        }

        fn file_id(&self, path: &str) -> FileId {
            self.state.fs_state.to_file_id(path, WORK)
        }
    }

    fn op(executable: &str, inputs: &[&str], outputs: &[&str]) -> OperationDeclaration {
        OperationDeclaration {
            title: format!("{} {}", executable, outputs.join(" ")),
            command: CommandInfo::new(WORK, executable, outputs.join(" ")),
            inputs: inputs.iter().map(PathBuf::from).collect(),
            outputs: outputs.iter().map(PathBuf::from).collect(),
        }
    }

    fn compile_and_link() -> Vec<OperationDeclaration> {
        vec![
            op("cc", &["a.c"], &["a.o"]),
            op("cc", &["b.c"], &["b.o"]),
            op("ld", &["a.o", "b.o"], &["app"]),
        ]
    }

    #[tokio::test]
    async fn test_first_pass_runs_everything_in_order() {
        let mut harness = Harness::new();
        harness.runner.touch("/work/a.c");
        harness.runner.touch("/work/b.c");
        harness.generate(compile_and_link());
        let engine = harness.engine(EngineConfig::default());

        let summary = harness.pass(&engine).await;

        assert!(summary.success, "{}", summary);
        assert_eq!(summary.executed, 3);
        assert_eq!(summary.skipped, 0);
        let invocations = harness.runner.invocations();
        assert_eq!(invocations.last().map(String::as_str), Some("app"));
        assert!(harness.state.results.iter().all(|(_, record)| record.was_successful_run));
        assert!(harness.state.graph.operations().all(|operation| operation.was_successful_run));
    }

    #[tokio::test]
    async fn test_clean_second_pass_executes_nothing() {
        let mut harness = Harness::new();
        harness.runner.touch("/work/a.c");
        harness.runner.touch("/work/b.c");
        harness.generate(compile_and_link());
        let engine = harness.engine(EngineConfig::default());
        harness.pass(&engine).await;

        let summary = harness.pass(&engine).await;

        assert!(summary.success);
        assert_eq!(summary.executed, 0);
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.to_string(), "0 operations executed, 3 skipped (up to date)");
        assert_eq!(harness.runner.invocations().len(), 3);
    }

    #[tokio::test]
    async fn test_touched_input_reruns_only_affected_operations() {
        let mut harness = Harness::new();
        harness.runner.touch("/work/a.c");
        harness.runner.touch("/work/b.c");
        harness.generate(compile_and_link());
        let engine = harness.engine(EngineConfig::default());
        harness.pass(&engine).await;

        harness.runner.touch("/work/a.c");
        let summary = harness.pass(&engine).await;

        assert_eq!(summary.executed, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(&harness.runner.invocations()[3..], &["a.o".to_string(), "app".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_output_reruns_operation() {
        let mut harness = Harness::new();
        harness.runner.touch("/work/a.c");
        harness.generate(vec![op("cc", &["a.c"], &["a.o"])]);
        let engine = harness.engine(EngineConfig::default());
        harness.pass(&engine).await;

        harness.file_system.remove_file("/work/a.o");
        let summary = harness.pass(&engine).await;

        assert_eq!(summary.executed, 1);
    }

    #[tokio::test]
    async fn test_operation_without_inputs_runs_once() {
        let mut harness = Harness::new();
        harness.generate(vec![op("gen", &[], &["version.h"])]);
        let engine = harness.engine(EngineConfig::default());
        harness.pass(&engine).await;

        harness.file_system.remove_file("/work/version.h");
        let summary = harness.pass(&engine).await;

        assert_eq!(summary.executed, 0);
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn test_failure_blocks_descendants_but_not_siblings() {
        let mut harness = Harness::new();
        harness.runner.touch("/work/a.c");
        harness.runner.touch("/work/b.c");
        harness.generate(vec![
            op("fail", &["a.c"], &["a.o"]),
            op("ld", &["a.o"], &["app"]),
            op("cc", &["b.c"], &["b.o"]),
        ]);
        let engine = harness.engine(EngineConfig::default());

        let summary = harness.pass(&engine).await;

        assert!(!summary.success);
        assert_eq!(summary.executed, 2);
        assert_eq!(summary.failed.len(), 1);
        let failed = &summary.failed[0];
        assert_eq!(failed.id, OperationId(1));
        assert_eq!(failed.exit_code, Some(1));
        assert_eq!(failed.stderr, "boom");
        assert_eq!(failed.fingerprint.len(), 64);
        assert_eq!(summary.not_run, vec![OperationId(2)]);
        assert!(!harness.state.results.get(OperationId(1)).unwrap().was_successful_run);
        assert!(harness.state.results.get(OperationId(3)).unwrap().was_successful_run);
        assert!(harness.state.results.get(OperationId(2)).is_none());
        assert!(summary.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_panicking_operation_is_reported_as_failed() {
        let mut harness = Harness::new();
        harness.runner.touch("/work/a.c");
        harness.runner.touch("/work/b.c");
        harness.generate(vec![
            op("crash", &["a.c"], &["a.o"]),
            op("ld", &["a.o"], &["app"]),
            op("cc", &["b.c"], &["b.o"]),
        ]);
        let engine = harness.engine(EngineConfig::default());

        let summary = harness.pass(&engine).await;

        assert!(!summary.success);
        assert_eq!(summary.failed.len(), 1);
        let failed = &summary.failed[0];
        assert_eq!(failed.id, OperationId(1));
        assert_eq!(failed.exit_code, None);
        assert!(failed.error.starts_with("worker task failed"), "{}", failed.error);
        assert_eq!(summary.not_run, vec![OperationId(2)]);
        assert!(!harness.state.results.get(OperationId(1)).unwrap().was_successful_run);
        assert!(harness.state.results.get(OperationId(3)).unwrap().was_successful_run);
    }

    #[tokio::test]
    async fn test_failed_operation_reruns_next_pass() {
        let mut harness = Harness::new();
        harness.runner.touch("/work/a.c");
        harness.generate(vec![op("fail", &["a.c"], &["a.o"])]);
        let engine = harness.engine(EngineConfig::default());
        harness.pass(&engine).await;

        let summary = harness.pass(&engine).await;

        assert_eq!(summary.executed, 1);
        assert_eq!(harness.runner.invocations().len(), 2);
    }

    #[tokio::test]
    async fn test_keep_going_off_stops_new_dispatches() {
        let mut harness = Harness::new();
        harness.runner.touch("/work/a.c");
        harness.runner.touch("/work/b.c");
        harness.generate(vec![op("fail", &["a.c"], &["a.o"]), op("cc", &["b.c"], &["b.o"])]);
        let engine = harness.engine(EngineConfig {
            max_workers: 1,
            keep_going: false,
        });

        let summary = harness.pass(&engine).await;

        assert_eq!(summary.executed, 1);
        assert_eq!(summary.not_run, vec![OperationId(2)]);
        assert_eq!(harness.runner.invocations(), vec!["a.o".to_string()]);
    }

    #[tokio::test]
    async fn test_worker_pool_is_bounded() {
        let mut harness = Harness::new();
        let declarations = (0..6)
            .map(|i| {
                let source = format!("s{}.c", i);
                let object = format!("s{}.o", i);
                harness.runner.touch(&format!("/work/{}", source));
                op("cc", &[source.as_str()], &[object.as_str()])
            })
            .collect();
        harness.generate(declarations);
        let engine = harness.engine(EngineConfig {
            max_workers: 2,
            keep_going: true,
        });

        let summary = harness.pass(&engine).await;

        assert_eq!(summary.executed, 6);
        let max_running = harness.runner.max_running.load(Ordering::SeqCst);
        assert!(max_running <= 2, "ran {} at once", max_running);
    }

    #[tokio::test]
    async fn test_observed_inputs_trigger_rebuild() {
        let mut harness = Harness::new();
        harness.runner.touch("/work/a.c");
        harness.runner.touch("/work/a.h");
        harness.generate(vec![op("cc", &["a.c"], &["a.o"])]);
        let monitor = Arc::new(FixedMonitor {
            reads: vec![PathBuf::from("a.c"), PathBuf::from("a.h")],
            writes: vec![PathBuf::from("a.o")],
        });
        let engine = harness.engine_with_monitor(EngineConfig::default(), monitor);
        harness.pass(&engine).await;

        let header = harness.file_id("a.h");
        let record = harness.state.results.get(OperationId(1)).unwrap();
        assert!(record.observed_input.contains(&header));
        assert!(!record.observed_input.contains(&harness.file_id("a.o")));

        assert_eq!(harness.pass(&engine).await.executed, 0);

        // Undeclared header changed
        harness.runner.touch("/work/a.h");
        assert_eq!(harness.pass(&engine).await.executed, 1);
    }

    #[tokio::test]
    async fn test_unmonitored_run_falls_back_to_declared_sets() {
        let mut harness = Harness::new();
        harness.runner.touch("/work/a.c");
        harness.generate(vec![op("cc", &["a.c"], &["a.o"])]);
        let engine = harness.engine(EngineConfig::default());
        harness.pass(&engine).await;

        let record = harness.state.results.get(OperationId(1)).unwrap();
        assert_eq!(record.observed_input, FileIdSet::from([harness.file_id("a.c")]));
        assert_eq!(record.observed_output, FileIdSet::from([harness.file_id("a.o")]));
    }

    #[tokio::test]
    async fn test_denied_access_fails_operation() {
        struct DenyingMonitor;

        #[async_trait]
        impl AccessMonitor for DenyingMonitor {
            async fn run(&self, command: &CommandInfo, runner: &dyn ProcessRunner) -> Result<MonitoredRun, ExecError> {
                Ok(MonitoredRun {
                    output: runner.execute(command).await?,
                    accesses: None,
                    denied: vec![PathBuf::from("/etc/shadow")],
                })
            }
        }

        let mut harness = Harness::new();
        harness.runner.touch("/work/a.c");
        harness.generate(vec![op("cc", &["a.c"], &["a.o"])]);
        let engine = harness.engine_with_monitor(EngineConfig::default(), Arc::new(DenyingMonitor));

        let summary = harness.pass(&engine).await;

        assert!(!summary.success);
        assert!(summary.failed[0].error.contains("access denied"));
    }

    #[tokio::test]
    async fn test_duplicate_output_rejected_before_execution() {
        let mut harness = Harness::new();
        let output = harness.file_id("a.o");
        let mut graph = OperationGraph::new();
        for (id, args) in [(1, "first"), (2, "second")] {
            graph
                .add_operation(OperationInfo::new(
                    OperationId(id),
                    args,
                    CommandInfo::new(WORK, "cc", args),
                    FileIdSet::new(),
                    FileIdSet::from([output]),
                ))
                .unwrap();
        }
        graph.set_root_operation_ids(vec![OperationId(1), OperationId(2)]);
        harness.state.graph = graph;
        let engine = harness.engine(EngineConfig::default());

        let result = engine.evaluate(&mut harness.state).await;

        assert!(matches!(
            result,
            Err(EngineError::Graph(GraphError::DuplicateOutput { .. }))
        ));
        assert!(harness.runner.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_run_pass_persists_between_passes() {
        let temp_dir = TempDir::new().unwrap();
        let directory = StateDirectory::new(temp_dir.path());
        let harness = Harness::new();
        harness.runner.touch("/work/a.c");
        harness.runner.touch("/work/b.c");
        let engine = harness.engine(EngineConfig::default());

        let generate = |fs_state: &FileSystemState, shared: &mut ValueTable| {
            shared.insert("Generated".to_string(), crate::persist::Value::Boolean(true));
            let mut generator = GraphGenerator::new(fs_state);
            for declaration in compile_and_link() {
                generator.declare(declaration);
            }
            generator.finish()
        };

        let first = engine.run_pass(&directory, Some(generate)).await.unwrap();
        assert_eq!(first.executed, 3);

        // Same declarations again: history is carried over by command
        let second = engine.run_pass(&directory, Some(generate)).await.unwrap();
        assert_eq!(second.executed, 0);
        assert_eq!(second.skipped, 3);

        // Stored graph only
        let third = engine.run_pass(&directory, None::<NoGenerator>).await.unwrap();
        assert_eq!(third.skipped, 3);

        let loaded = BuildState::load(&directory, harness.file_system.clone());
        assert_eq!(loaded.graph.len(), 3);
        assert_eq!(
            loaded.shared_state.get("Generated"),
            Some(&crate::persist::Value::Boolean(true))
        );
    }

    #[tokio::test]
    async fn test_run_pass_graph_error_saves_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let directory = StateDirectory::new(temp_dir.path());
        let harness = Harness::new();
        let engine = harness.engine(EngineConfig::default());

        let result = engine
            .run_pass(
                &directory,
                Some(|fs_state: &FileSystemState, _: &mut ValueTable| {
                    let mut generator = GraphGenerator::new(fs_state);
                    generator.declare(op("cc", &["a.c"], &["a.o"]));
                    generator.declare(op("cp", &["b.c"], &["a.o"]));
                    generator.finish()
                }),
            )
            .await;

        assert!(matches!(result, Err(EngineError::Graph(_))));
        assert!(!directory.graph_path().exists());
    }
}
