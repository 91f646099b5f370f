//! Drives a whole run: input validation, output layout, preflight and the
//! four stages in catalog order, stopping at the first failure.

use crate::about::version_line;
use crate::config::PipelineConfig;
use crate::environment::ToolEnvironments;
use crate::error::{PipelineError, Result};
use crate::logging::RunLog;
use crate::preflight::{ResourcePreflight, ResourceProbe};
use crate::process::ProcessRunner;
use crate::reference::{ObtainedReference, ReferenceDataCache, ReferenceDataset};
use crate::run::{PipelineContext, PipelineRun};
use crate::stage::StageRunner;
use crate::template::check_catalog_templates;
use bacanno_protocol::{ReferenceReport, RUN_REPORT_SCHEMA, RunReport, RunStatus, StageReport};
use std::{
    cell::Cell,
    fmt, fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Validating,
    Preflighting,
    Running(usize),
    Completed,
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Validating => write!(f, "validating"),
            RunState::Preflighting => write!(f, "preflighting"),
            RunState::Running(index) => write!(f, "running stage {index}"),
            RunState::Completed => write!(f, "completed"),
            RunState::Aborted => write!(f, "aborted"),
        }
    }
}

fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn invalid_input(path: &Path, reason: &str) -> PipelineError {
    PipelineError::InvalidInput {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// The input directory must exist, be a directory and hold at least one
/// entry. Whether any entry is a sequence file is checked per stage.
pub fn validate_input_dir(input_dir: &Path) -> Result<()> {
    if !input_dir.exists() {
        return Err(invalid_input(input_dir, "directory does not exist"));
    }
    if !input_dir.is_dir() {
        return Err(invalid_input(input_dir, "not a directory"));
    }
    let mut entries = fs::read_dir(input_dir).map_err(|e| {
        PipelineError::io(
            format!("Could not list input directory '{}'", input_dir.display()),
            e,
        )
    })?;
    if entries.next().is_none() {
        return Err(invalid_input(input_dir, "directory is empty"));
    }
    Ok(())
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| {
        PipelineError::io(format!("Could not create directory '{}'", path.display()), e)
    })
}

pub struct PipelineOrchestrator<'a> {
    config: &'a PipelineConfig,
    runner: &'a dyn ProcessRunner,
    probe: &'a dyn ResourceProbe,
    environments: ToolEnvironments,
    references: ReferenceDataCache,
    state: Cell<RunState>,
}

impl<'a> PipelineOrchestrator<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        runner: &'a dyn ProcessRunner,
        probe: &'a dyn ResourceProbe,
    ) -> Self {
        let environments =
            ToolEnvironments::from_process_env(&config.conda_executable, &config.catalog.channels);
        Self {
            config,
            runner,
            probe,
            environments,
            references: ReferenceDataCache::new(),
            state: Cell::new(RunState::Idle),
        }
    }

    pub fn with_environments(mut self, environments: ToolEnvironments) -> Self {
        self.environments = environments;
        self
    }

    pub fn state(&self) -> RunState {
        self.state.get()
    }

    fn transition(&self, next: RunState, log: &RunLog) {
        let previous = self.state.replace(next);
        log.debug(format!("Run state: {previous} -> {next}"));
    }

    fn context<'c>(&'c self, run: &'c PipelineRun, log: &'c RunLog) -> PipelineContext<'c> {
        PipelineContext {
            run,
            catalog: &self.config.catalog,
            log,
            runner: self.runner,
            environments: &self.environments,
            references: &self.references,
        }
    }

    fn create_output_tree(&self, run: &PipelineRun) -> Result<()> {
        create_dir(&run.logs_dir())?;
        for stage in &self.config.catalog.stages {
            create_dir(&run.stage_dir(&stage.output_subdir))?;
        }
        create_dir(&run.ref_dir())
    }

    fn open_run_log(&self, run: &PipelineRun) -> Result<RunLog> {
        self.create_output_tree(run)?;
        let mut log = RunLog::console_only();
        log.attach_file(&run.log_path)?;
        Ok(log)
    }

    /// Moves to `Aborted` and records why as the last entry of `log`.
    fn abort(&self, err: PipelineError, log: &RunLog) -> PipelineError {
        self.transition(RunState::Aborted, log);
        log.error(format!("Pipeline aborted: {err}"));
        err
    }

    /// Runs every stage in order. Every error returned from here has already
    /// been logged.
    pub fn execute(&self, run: &PipelineRun) -> Result<RunReport> {
        let console = RunLog::console_only();
        self.transition(RunState::Validating, &console);
        let log = match check_catalog_templates(&self.config.catalog)
            .map_err(PipelineError::Catalog)
            .and_then(|_| validate_input_dir(&run.input_dir))
            .and_then(|_| self.open_run_log(run))
        {
            Ok(log) => log,
            Err(e) => return Err(self.abort(e, &console)),
        };
        let started_at = unix_ms_now();
        log.info(format!(
            "{}, catalog: {}, environment manager: {}",
            version_line(),
            self.config.catalog_source,
            self.config.conda_executable
        ));
        log.info(format!(
            "Input: {}, output: {}, threads: {}",
            run.input_dir.display(),
            run.output_dir.display(),
            run.threads
        ));

        self.transition(RunState::Preflighting, &log);
        let requirements = &self.config.catalog.preflight;
        let warnings = ResourcePreflight::new(self.probe).check(
            requirements.memory_gb,
            requirements.disk_gb,
            &run.output_dir,
            &log,
        );

        let mut stages = Vec::new();
        let outcome = self.run_stages(run, &log, &mut stages);
        let status = match outcome {
            Ok(()) => RunStatus::Completed,
            Err(_) => RunStatus::Aborted,
        };

        let report = RunReport {
            schema: RUN_REPORT_SCHEMA.to_string(),
            status,
            input_dir: run.input_dir.to_string_lossy().into_owned(),
            output_dir: run.output_dir.to_string_lossy().into_owned(),
            threads: run.threads,
            log_file: run.log_path.to_string_lossy().into_owned(),
            started_at_unix_ms: started_at,
            finished_at_unix_ms: unix_ms_now(),
            warnings: warnings.iter().map(|w| w.message.clone()).collect(),
            references: self
                .references
                .obtained()
                .into_iter()
                .map(|r| ReferenceReport {
                    id: r.id,
                    local_path: r.local_path.to_string_lossy().into_owned(),
                    reused_existing: r.reused_existing,
                })
                .collect(),
            stages,
        };
        let written = write_report(&run.report_path(), &report);

        match outcome {
            Ok(()) => {
                written?;
                self.transition(RunState::Completed, &log);
                log.info(format!(
                    "Pipeline completed successfully; outputs in {}",
                    run.output_dir.display()
                ));
                Ok(report)
            }
            Err(e) => {
                if let Err(report_err) = written {
                    log.warn(report_err);
                }
                Err(self.abort(e, &log))
            }
        }
    }

    fn run_stages(
        &self,
        run: &PipelineRun,
        log: &RunLog,
        reports: &mut Vec<StageReport>,
    ) -> Result<()> {
        let ctx = self.context(run, log);
        let runner = StageRunner::new(&ctx);
        let total = self.config.catalog.stages.len();
        for (index, stage) in self.config.catalog.stages.iter().enumerate() {
            self.transition(RunState::Running(index), log);
            log.info(format!(
                "Starting stage {}/{total}: {} ({})",
                index + 1,
                stage.name,
                stage.output_subdir
            ));
            let report = runner.run(stage)?;
            log.info(format!(
                "Completed stage {}/{total}: {} ({} samples, {:.1}s)",
                index + 1,
                stage.name,
                report.samples.len(),
                report.elapsed_seconds
            ));
            reports.push(report);
        }
        Ok(())
    }

    /// Provisions every tool environment of the catalog without running a
    /// stage.
    pub fn ensure_environments(&self, log: &RunLog) -> Result<Vec<(String, PathBuf)>> {
        self.config
            .catalog
            .environments
            .iter()
            .map(|spec| -> Result<(String, PathBuf)> {
                let prefix = self.environments.ensure(spec, self.runner, log)?;
                log.info(format!("{}: {}", spec.name, prefix.display()));
                Ok((spec.name.clone(), prefix))
            })
            .collect()
    }

    /// Populates `<output_dir>/ref/` with every reference dataset of the
    /// catalog.
    pub fn fetch_references(
        &self,
        output_dir: &Path,
        log: &RunLog,
    ) -> Result<Vec<ObtainedReference>> {
        let ref_dir = output_dir.join(crate::run::REF_SUBDIR);
        create_dir(&ref_dir)?;
        self.config
            .catalog
            .references
            .iter()
            .map(|spec| {
                self.references
                    .obtain(&ReferenceDataset::from_spec(spec, &ref_dir), log)
            })
            .collect()
    }
}

fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let text = serde_json::to_string_pretty(report).map_err(|e| {
        PipelineError::io(
            "Could not serialize run report",
            std::io::Error::other(e),
        )
    })?;
    fs::write(path, text + "\n").map_err(|e| {
        PipelineError::io(
            format!("Could not write run report '{}'", path.display()),
            e,
        )
    })
}
