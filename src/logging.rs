//! Run logging.
//!
//! Console output goes through the `log` facade, dispatched by `fern` once per
//! process. The per-run log file is a separate `fern` dispatch owned by the
//! run itself ([`RunLog`]) so that two runs in one process never share a file
//! handle.

use crate::error::{PipelineError, Result};
use log::{Level, LevelFilter, Log, Record};
use std::{
    fmt::{self, Display},
    fs,
    path::{Path, PathBuf},
};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const LOG_FILE_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// `[<timestamp>] [<LEVEL>] <message>`, shared by console and file sinks.
fn format_line(out: fern::FormatCallback, message: &fmt::Arguments, record: &Record) {
    out.finish(format_args!(
        "[{}] [{}] {}",
        chrono::Local::now().format(TIMESTAMP_FORMAT),
        record.level(),
        message
    ))
}

/// Log file name for a run started now, e.g. `pipeline_20240501_093000.log`.
pub fn run_log_file_name() -> String {
    format!(
        "pipeline_{}.log",
        chrono::Local::now().format(LOG_FILE_STAMP_FORMAT)
    )
}

pub fn init_console_logger(verbose: bool) -> std::result::Result<(), log::SetLoggerError> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    fern::Dispatch::new()
        .format(format_line)
        .level(level)
        .level_for("reqwest", LevelFilter::Warn)
        .level_for("hyper", LevelFilter::Warn)
        .chain(std::io::stdout())
        .apply()
}

/// Append-only record sink for one pipeline run.
#[derive(Default)]
pub struct RunLog {
    file: Option<Box<dyn Log>>,
    path: Option<PathBuf>,
}

impl RunLog {
    pub fn console_only() -> Self {
        Self::default()
    }

    /// Appends every record at info level and above to `path`.
    pub fn attach_file(&mut self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PipelineError::io(
                    format!("Could not create log directory '{}'", parent.display()),
                    e,
                )
            })?;
        }
        let file = fern::log_file(path).map_err(|e| {
            PipelineError::io(format!("Could not open log file '{}'", path.display()), e)
        })?;
        let (_, logger) = fern::Dispatch::new()
            .format(format_line)
            .level(LevelFilter::Info)
            .chain(file)
            .into_log();
        self.file = Some(logger);
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Every record goes to the console logger; the file dispatch keeps
    /// info and above.
    pub fn record(&self, level: Level, message: impl Display) {
        let message = message.to_string();
        log::log!(level, "{message}");
        if let Some(file) = &self.file {
            file.log(
                &Record::builder()
                    .args(format_args!("{message}"))
                    .level(level)
                    .target(module_path!())
                    .build(),
            );
        }
    }

    pub fn info(&self, message: impl Display) {
        self.record(Level::Info, message);
    }

    pub fn warn(&self, message: impl Display) {
        self.record(Level::Warn, message);
    }

    pub fn error(&self, message: impl Display) {
        self.record(Level::Error, message);
    }

    pub fn debug(&self, message: impl Display) {
        self.record(Level::Debug, message);
    }
}

impl Drop for RunLog {
    fn drop(&mut self) {
        if let Some(file) = &self.file {
            file.flush();
        }
    }
}
