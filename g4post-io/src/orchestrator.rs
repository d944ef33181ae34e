//! Task orchestration: one task per input file, dispatched to a worker pool.
//!
//! Every task builds its own [`Pipeline`] from the shared, validated
//! instructions. Geometry files are loaded once through a shared
//! [`GeometryRegistry`]. Files whose output already exists are skipped, so
//! an interrupted run can be resumed by running it again.

use crate::config::{InputFormat, RunConfig, RunParams};
use crate::Result;
use g4post_algorithms::{GeometryRegistry, Instruction};
use std::fs;
use std::path::{Path, PathBuf};

/// Extension of every output container.
pub const OUTPUT_EXTENSION: &str = "hdf5";

/// One input file and the container it is written to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Task {
    /// Input file.
    pub input: PathBuf,
    /// Output container.
    pub output: PathBuf,
}

/// Outcome of a run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    /// Inputs processed successfully, in input order.
    pub completed: Vec<PathBuf>,
    /// Outputs that already existed, so their inputs were not dispatched.
    pub skipped_existing: Vec<PathBuf>,
    /// Inputs skipped because a declared field was absent.
    pub missing_key: Vec<(PathBuf, String)>,
    /// Inputs whose task failed, with the error.
    pub failed: Vec<(PathBuf, String)>,
    /// Merged output written in summarize mode.
    pub summary_output: Option<PathBuf>,
}

impl RunSummary {
    /// Returns true if no task failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of tasks that were dispatched.
    #[must_use]
    pub fn dispatched(&self) -> usize {
        self.completed.len() + self.missing_key.len() + self.failed.len()
    }
}

/// Lists the files of `folder` with the extension of `format`, sorted.
///
/// # Errors
/// Returns an error if the folder cannot be read.
pub fn discover_inputs(folder: &Path, format: InputFormat) -> Result<Vec<PathBuf>> {
    let mut inputs = Vec::new();
    for entry in fs::read_dir(folder)? {
        let path = entry?.path();
        let matches = path
            .extension()
            .is_some_and(|ext| ext == format.extension());
        if matches && path.is_file() {
            inputs.push(path);
        }
    }
    inputs.sort();
    Ok(inputs)
}

/// Output container of `input` inside `output_dir`: `<stem>.hdf5`.
#[must_use]
pub fn output_path(output_dir: &Path, input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or(input.as_os_str());
    let mut output = output_dir.join(stem);
    output.set_extension(OUTPUT_EXTENSION);
    output
}

/// Pairs every input with its output, splitting off those already written.
#[must_use]
pub fn plan_tasks(inputs: &[PathBuf], output_dir: &Path) -> (Vec<Task>, Vec<PathBuf>) {
    let mut tasks = Vec::new();
    let mut existing = Vec::new();
    for input in inputs {
        let output = output_path(output_dir, input);
        if output.exists() {
            existing.push(output);
        } else {
            tasks.push(Task {
                input: input.clone(),
                output,
            });
        }
    }
    (tasks, existing)
}

/// Runs a validated configuration over every input file.
pub struct Orchestrator {
    config: RunConfig,
    instructions: Vec<Instruction>,
    params: RunParams,
    registry: GeometryRegistry,
}

impl Orchestrator {
    /// Validates `config` before anything is dispatched.
    ///
    /// # Errors
    /// Returns a configuration error for invalid run parameters or
    /// instructions.
    pub fn new(config: RunConfig) -> Result<Self> {
        let instructions = config.validate()?;
        let params = config.run_params()?;
        Ok(Self {
            config,
            instructions,
            params,
            registry: GeometryRegistry::new(),
        })
    }

    /// Reads and validates a configuration file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(RunConfig::from_file(path)?)
    }

    /// Run configuration.
    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run-level parameters.
    #[must_use]
    pub fn params(&self) -> RunParams {
        self.params
    }

    /// Input files of the run, sorted.
    ///
    /// # Errors
    /// Returns an error if the input folder cannot be read.
    pub fn inputs(&self) -> Result<Vec<PathBuf>> {
        discover_inputs(
            &self.config.io.input.folder,
            self.config.io.input.format,
        )
    }

    /// Processes every pending input.
    ///
    /// Task failures are collected in the summary; only errors that prevent
    /// the run itself (unreadable input folder, pool creation, merging in
    /// summarize mode) are returned.
    ///
    /// # Errors
    /// Returns an error if the run cannot be set up or the merged output
    /// cannot be written.
    #[cfg(feature = "hdf5")]
    pub fn run(&self) -> Result<RunSummary> {
        match self.params.mode {
            crate::config::RunMode::PerFile => self.run_per_file(),
            crate::config::RunMode::Summarize => self.run_summarize(),
        }
    }

    #[cfg(feature = "hdf5")]
    fn run_per_file(&self) -> Result<RunSummary> {
        let inputs = self.inputs()?;
        let output_dir = &self.config.io.output;
        fs::create_dir_all(output_dir)?;

        let (tasks, skipped_existing) = plan_tasks(&inputs, output_dir);
        if !skipped_existing.is_empty() {
            log::info!(
                "{} of {} inputs already have outputs",
                skipped_existing.len(),
                inputs.len()
            );
        }
        let mut summary = RunSummary {
            skipped_existing,
            ..RunSummary::default()
        };
        self.dispatch(&tasks, &mut summary)?;
        Ok(summary)
    }

    #[cfg(feature = "hdf5")]
    fn run_summarize(&self) -> Result<RunSummary> {
        use crate::form::Columns;
        use crate::hdf5::{read_container, write_container_atomic, ContainerWriteOptions, DEFAULT_GROUP};

        let target = &self.config.io.output;
        if target.exists() {
            log::info!("{} already exists, nothing to do", target.display());
            return Ok(RunSummary {
                skipped_existing: vec![target.clone()],
                ..RunSummary::default()
            });
        }

        let inputs = self.inputs()?;
        let scratch = tempfile::tempdir()?;
        let (tasks, _) = plan_tasks(&inputs, scratch.path());
        let mut summary = RunSummary::default();
        self.dispatch(&tasks, &mut summary)?;

        if summary.completed.is_empty() {
            log::warn!("no input completed, {} not written", target.display());
            return Ok(summary);
        }
        let mut merged = Columns::default();
        for task in tasks.iter().filter(|t| summary.completed.contains(&t.input)) {
            merged.extend(&read_container(&task.output, DEFAULT_GROUP)?)?;
        }
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        write_container_atomic(target, &merged, &ContainerWriteOptions::default())?;
        log::info!(
            "merged {} records from {} files into {}",
            merged.len(),
            summary.completed.len(),
            target.display()
        );
        summary.summary_output = Some(target.clone());
        Ok(summary)
    }

    #[cfg(feature = "hdf5")]
    fn dispatch(&self, tasks: &[Task], summary: &mut RunSummary) -> Result<()> {
        use rayon::prelude::*;

        let threads = self.params.threads.max(1);
        log::info!("dispatching {} tasks on {threads} threads", tasks.len());
        let outcomes: Vec<Result<usize>> = if threads > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()?;
            pool.install(|| tasks.par_iter().map(|task| self.run_task(task)).collect())
        } else {
            tasks.iter().map(|task| self.run_task(task)).collect()
        };

        for (task, outcome) in tasks.iter().zip(outcomes) {
            match outcome {
                Ok(records) => {
                    log::info!(
                        "{}: {records} records written to {}",
                        task.input.display(),
                        task.output.display()
                    );
                    summary.completed.push(task.input.clone());
                }
                Err(e) if e.is_missing_key() => {
                    log::warn!("skipping {}: {e}", task.input.display());
                    summary.missing_key.push((task.input.clone(), e.to_string()));
                }
                Err(e) => {
                    log::error!("{} failed: {e}", task.input.display());
                    summary.failed.push((task.input.clone(), e.to_string()));
                }
            }
        }
        Ok(())
    }

    #[cfg(feature = "hdf5")]
    fn run_task(&self, task: &Task) -> Result<usize> {
        let pipeline = g4post_algorithms::Pipeline::new(&self.instructions, &self.registry)?;
        crate::manager::DataManager::new(&self.config, &pipeline, self.params.step_size)
            .process_file(&task.input, &task.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        path
    }

    fn config_json(input: &Path, output: &Path, para: &str, instr: &str) -> String {
        format!(
            r#"{{
                "io": {{"input": {{"folder": {input:?}, "format": "jsonl"}}, "output": {output:?}}},
                "input": {{"tree": "hit", "var": {{"t0": "hit/t", "t": "hit/t", "edep": "hit/edep"}}}},
                "output": ["energy"],
                "para": {para},
                "instr": {instr}
            }}"#
        )
    }

    const INSTR: &str = r#"[
        {"name": "w", "module": "window", "input": ["t0", "t", "edep"], "output": ["b", "wt", "we"]},
        {"name": "s", "module": "sum_energy", "input": ["we"], "output": ["energy"]}
    ]"#;

    struct Fixture {
        input: TempDir,
        output: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let input = tempfile::tempdir().unwrap();
            write_file(
                input.path(),
                "b.jsonl",
                &[r#"{"t": [0, 5, 20000], "edep": [1, 1, 1]}"#],
            );
            write_file(input.path(), "a.jsonl", &[r#"{"t": [3], "edep": [2.5]}"#]);
            write_file(input.path(), "notes.txt", &["not an input"]);
            Self {
                input,
                output: tempfile::tempdir().unwrap(),
            }
        }

        fn orchestrator(&self, output: &Path, para: &str, instr: &str) -> Orchestrator {
            let json = config_json(self.input.path(), output, para, instr);
            Orchestrator::new(RunConfig::from_json(&json).unwrap()).unwrap()
        }
    }

    #[test]
    fn test_discovery_is_sorted_and_filtered() {
        let fixture = Fixture::new();
        let inputs = discover_inputs(fixture.input.path(), InputFormat::Jsonl).unwrap();
        let names: Vec<_> = inputs
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.jsonl", "b.jsonl"]);
        assert!(discover_inputs(fixture.input.path(), InputFormat::Hdf5)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_plan_skips_existing_outputs() {
        let fixture = Fixture::new();
        let inputs = discover_inputs(fixture.input.path(), InputFormat::Jsonl).unwrap();
        let out = fixture.output.path();
        fs::write(out.join("a.hdf5"), b"").unwrap();

        let (tasks, existing) = plan_tasks(&inputs, out);
        assert_eq!(existing, vec![out.join("a.hdf5")]);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].output, out.join("b.hdf5"));
    }

    #[test]
    fn test_invalid_instruction_fails_before_dispatch() {
        let fixture = Fixture::new();
        let json = config_json(
            fixture.input.path(),
            fixture.output.path(),
            "{}",
            r#"[{"name": "x", "module": "smear", "input": ["t"], "output": ["y"]}]"#,
        );
        assert!(Orchestrator::new(RunConfig::from_json(&json).unwrap()).is_err());
    }

    #[cfg(feature = "hdf5")]
    #[test]
    fn test_rerun_dispatches_nothing() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator(fixture.output.path(), r#"{"threads": 2}"#, INSTR);

        let first = orchestrator.run().unwrap();
        assert!(first.is_success());
        assert_eq!(first.completed.len(), 2);
        assert!(fixture.output.path().join("a.hdf5").exists());
        assert!(fixture.output.path().join("b.hdf5").exists());

        let second = orchestrator.run().unwrap();
        assert_eq!(second.dispatched(), 0);
        assert_eq!(second.skipped_existing.len(), 2);
    }

    #[cfg(feature = "hdf5")]
    #[test]
    fn test_missing_key_skips_file_without_failing() {
        let fixture = Fixture::new();
        write_file(fixture.input.path(), "c.jsonl", &[r#"{"t": [1]}"#]);
        let orchestrator = fixture.orchestrator(fixture.output.path(), "{}", INSTR);

        let summary = orchestrator.run().unwrap();
        assert!(summary.is_success());
        assert_eq!(summary.completed.len(), 2);
        assert_eq!(summary.missing_key.len(), 1);
        assert!(summary.missing_key[0].0.ends_with("c.jsonl"));
        assert!(!fixture.output.path().join("c.hdf5").exists());
    }

    #[cfg(feature = "hdf5")]
    #[test]
    fn test_geometry_failure_is_reported_with_path() {
        let fixture = Fixture::new();
        let instr = r#"[{"name": "dl", "module": "active_volume",
            "input": ["t", "t", "t", "t", "t", "edep"],
            "output": ["a", "b", "c", "d", "e", "f", "g"],
            "para": {"type": "polycone", "file": "/nonexistent/geometry.json"}}]"#;
        let json = config_json(fixture.input.path(), fixture.output.path(), "{}", instr)
            .replace(r#""output": ["energy"]"#, r#""output": ["f"]"#);
        let orchestrator = Orchestrator::new(RunConfig::from_json(&json).unwrap()).unwrap();

        let summary = orchestrator.run().unwrap();
        assert!(!summary.is_success());
        assert_eq!(summary.failed.len(), 2);
        assert!(summary.failed[0].0.ends_with("a.jsonl"));
        assert!(summary.failed[0].1.contains("step `dl`"));
    }

    #[cfg(feature = "hdf5")]
    #[test]
    fn test_summarize_merges_in_input_order() {
        use crate::hdf5::{read_container, DEFAULT_GROUP};

        let fixture = Fixture::new();
        let target = fixture.output.path().join("merged").join("all.hdf5");
        let orchestrator = fixture.orchestrator(
            &target,
            r#"{"threads": 2, "mode": "summarize"}"#,
            INSTR,
        );

        let summary = orchestrator.run().unwrap();
        assert_eq!(summary.summary_output.as_deref(), Some(target.as_path()));
        let merged = read_container(&target, DEFAULT_GROUP).unwrap();
        assert_eq!(merged.len(), 2);
        let energy = merged.get("energy").unwrap();
        assert_eq!(energy.offsets()[0], vec![0, 1, 3]);
        assert_eq!(energy.values(), &[2.5, 2.0, 1.0]);

        let again = orchestrator.run().unwrap();
        assert_eq!(again.dispatched(), 0);
    }
}
