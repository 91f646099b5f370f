use crate::environment::ToolEnvironments;
use crate::error::{PipelineError, Result};
use crate::logging::{RunLog, run_log_file_name};
use crate::process::ProcessRunner;
use crate::reference::ReferenceDataCache;
use bacanno_protocol::PipelineCatalog;
use std::path::{Path, PathBuf};

pub const LOGS_SUBDIR: &str = "logs";
pub const REF_SUBDIR: &str = "ref";
pub const RUN_REPORT_FILE: &str = "run_report.json";

/// Per-run settings, fixed at startup. Paths are absolute so tools can be
/// run from inside their sample directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRun {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub threads: usize,
    pub log_path: PathBuf,
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| {
        PipelineError::io(format!("Could not resolve path '{}'", path.display()), e)
    })
}

impl PipelineRun {
    pub fn new(input_dir: &Path, output_dir: &Path, threads: usize) -> Result<Self> {
        let output_dir = absolute(output_dir)?;
        Ok(Self {
            input_dir: absolute(input_dir)?,
            log_path: output_dir.join(LOGS_SUBDIR).join(run_log_file_name()),
            output_dir,
            threads: threads.max(1),
        })
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.output_dir.join(LOGS_SUBDIR)
    }

    pub fn ref_dir(&self) -> PathBuf {
        self.output_dir.join(REF_SUBDIR)
    }

    pub fn stage_dir(&self, output_subdir: &str) -> PathBuf {
        self.output_dir.join(output_subdir)
    }

    pub fn sample_dir(&self, output_subdir: &str, sample: &str) -> PathBuf {
        self.stage_dir(output_subdir).join(sample)
    }

    pub fn report_path(&self) -> PathBuf {
        self.logs_dir().join(RUN_REPORT_FILE)
    }
}

/// Everything a stage needs, passed explicitly instead of living in
/// process-wide state.
pub struct PipelineContext<'a> {
    pub run: &'a PipelineRun,
    pub catalog: &'a PipelineCatalog,
    pub log: &'a RunLog,
    pub runner: &'a dyn ProcessRunner,
    pub environments: &'a ToolEnvironments,
    pub references: &'a ReferenceDataCache,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_rooted_in_the_output_directory() {
        let run = PipelineRun::new(Path::new("in"), Path::new("out"), 0).unwrap();
        assert!(run.input_dir.is_absolute());
        assert!(run.output_dir.ends_with("out"));
        assert_eq!(run.threads, 1);
        assert_eq!(run.log_path.parent(), Some(run.logs_dir().as_path()));
        let name = run.log_path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("pipeline_") && name.ends_with(".log"), "{name}");
        assert_eq!(
            run.sample_dir("Barrnap", "sample1"),
            run.output_dir.join("Barrnap").join("sample1")
        );
        assert_eq!(run.report_path(), run.output_dir.join("logs/run_report.json"));
    }
}
