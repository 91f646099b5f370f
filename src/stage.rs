//! One annotation stage: its environment, its references and its per-sample
//! tool chain.

use crate::error::{PipelineError, Result};
use crate::process::{CommandSpec, tail_lines};
use crate::reference::ReferenceDataset;
use crate::run::PipelineContext;
use crate::sample::{Sample, enumerate_samples};
use crate::template::{TemplateValues, render_invocation};
use bacanno_protocol::{StageReport, StageSpec};
use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    time::Instant,
};

const STDERR_TAIL_LINES: usize = 20;

/// Exit statuses a POSIX shell reports when a command cannot be started.
const EXIT_NOT_EXECUTABLE: i32 = 126;
const EXIT_NOT_FOUND: i32 = 127;

pub struct StageRunner<'c, 'a> {
    ctx: &'c PipelineContext<'a>,
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| {
        PipelineError::io(
            format!("Could not create output directory '{}'", path.display()),
            e,
        )
    })
}

impl<'c, 'a> StageRunner<'c, 'a> {
    pub fn new(ctx: &'c PipelineContext<'a>) -> Self {
        Self { ctx }
    }

    pub fn run(&self, stage: &StageSpec) -> Result<StageReport> {
        let ctx = self.ctx;
        let started = Instant::now();
        let env_spec = ctx.catalog.environment(&stage.environment).ok_or_else(|| {
            PipelineError::Catalog(format!(
                "stage '{}' needs unknown environment '{}'",
                stage.name, stage.environment
            ))
        })?;

        ctx.environments.ensure(env_spec, ctx.runner, ctx.log)?;
        let activation = ctx.environments.activate(&env_spec.name)?;
        ctx.log.debug(format!(
            "Activated tool environment '{}' ({})",
            activation.name(),
            activation.bin_dir().display()
        ));

        let references = self.obtain_references(stage)?;
        let samples = enumerate_samples(&ctx.run.input_dir, |ext| {
            ctx.catalog.is_sequence_extension(ext)
        })?;
        if samples.is_empty() {
            ctx.log.info(format!(
                "No sequence files in {}; nothing to do for stage {}",
                ctx.run.input_dir.display(),
                stage.name
            ));
        }

        let stage_dir = ctx.run.stage_dir(&stage.output_subdir);
        create_dir(&stage_dir)?;
        let command_env = activation.command_env();
        let mut invocations = 0;
        for sample in &samples {
            let sample_dir = ctx.run.sample_dir(&stage.output_subdir, &sample.base_name);
            create_dir(&sample_dir)?;
            ctx.log.info(format!(
                "[{}] Processing sample {}",
                stage.name, sample.base_name
            ));
            let values = TemplateValues {
                input: &sample.path,
                sample: &sample.base_name,
                sample_dir: &sample_dir,
                stage_dir: &stage_dir,
                output: &ctx.run.output_dir,
                threads: ctx.run.threads,
                references: &references,
            };
            for invocation in &stage.invocations {
                let command = render_invocation(invocation, &values)
                    .map_err(|e| PipelineError::Catalog(format!("stage '{}': {e}", stage.name)))?
                    .current_dir(&sample_dir)
                    .envs(command_env.iter().cloned());
                self.invoke(stage, sample, &command)?;
                invocations += 1;
            }
        }

        ctx.log.debug(format!("Releasing tool environment '{}'", activation.name()));
        activation.release();

        Ok(StageReport {
            stage: stage.name.clone(),
            environment: env_spec.name.clone(),
            output_dir: stage_dir.to_string_lossy().into_owned(),
            samples: samples.into_iter().map(|s| s.base_name).collect(),
            invocations,
            elapsed_seconds: started.elapsed().as_secs_f64(),
        })
    }

    fn obtain_references(&self, stage: &StageSpec) -> Result<HashMap<String, PathBuf>> {
        let ctx = self.ctx;
        let ref_dir = ctx.run.ref_dir();
        let mut out = HashMap::new();
        for id in &stage.references {
            let spec = ctx.catalog.reference(id).ok_or_else(|| {
                PipelineError::Catalog(format!(
                    "stage '{}' needs unknown reference dataset '{id}'",
                    stage.name
                ))
            })?;
            let obtained = ctx
                .references
                .obtain(&ReferenceDataset::from_spec(spec, &ref_dir), ctx.log)?;
            out.insert(id.clone(), obtained.local_path);
        }
        Ok(out)
    }

    fn invoke(&self, stage: &StageSpec, sample: &Sample, command: &CommandSpec) -> Result<()> {
        let log = self.ctx.log;
        log.debug(format!("Running {}", command.display()));
        let output = match self.ctx.runner.run(command) {
            Ok(output) => output,
            Err(e) => {
                let exit_code = match e.kind() {
                    io::ErrorKind::NotFound => EXIT_NOT_FOUND,
                    io::ErrorKind::PermissionDenied => EXIT_NOT_EXECUTABLE,
                    _ => {
                        return Err(PipelineError::io(
                            format!("Could not run `{}`", command.display()),
                            e,
                        ));
                    }
                };
                return Err(PipelineError::tool_invocation(
                    &stage.name,
                    &sample.base_name,
                    command.display(),
                    Some(exit_code),
                    None,
                    e.to_string(),
                ));
            }
        };
        if output.success() {
            return Ok(());
        }

        let stderr_tail = tail_lines(&output.stderr, STDERR_TAIL_LINES);
        if !stderr_tail.is_empty() {
            log.error(format!(
                "stderr of `{}`:\n{stderr_tail}",
                command.program
            ));
        }
        Err(PipelineError::tool_invocation(
            &stage.name,
            &sample.base_name,
            command.display(),
            output.exit_code,
            output.signal,
            stderr_tail,
        ))
    }
}
