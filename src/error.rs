use std::panic::Location;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Exit code used for fatal errors that carry no tool exit status.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code for unusable command-line input, after usage text was printed.
pub const EXIT_USAGE: i32 = 2;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid input directory '{}': {reason}", .path.display())]
    InvalidInput { path: PathBuf, reason: String },

    #[error("Could not provision tool environment '{environment}': {reason}")]
    EnvironmentProvision {
        environment: String,
        reason: String,
        exit_code: Option<i32>,
    },

    #[error("Could not obtain reference dataset '{dataset}' from '{url}': {reason}")]
    ReferenceFetch {
        dataset: String,
        url: String,
        reason: String,
    },

    #[error(
        "Command `{command}` failed with {} (stage '{stage}', sample '{sample}') at {location}",
        describe_status(.exit_code, .signal)
    )]
    ToolInvocation {
        stage: String,
        sample: String,
        command: String,
        exit_code: Option<i32>,
        signal: Option<i32>,
        stderr_tail: String,
        location: &'static Location<'static>,
    },

    #[error("Invalid pipeline catalog: {0}")]
    Catalog(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn describe_status(exit_code: &Option<i32>, signal: &Option<i32>) -> String {
    match (exit_code, signal) {
        (Some(code), _) => format!("exit code {code}"),
        (None, Some(sig)) => format!("signal {sig}"),
        (None, None) => "unknown status".to_string(),
    }
}

impl PipelineError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::Io {
            context: context.into(),
            source,
        }
    }

    /// Records the caller as the place the failing command was issued from.
    #[track_caller]
    pub fn tool_invocation(
        stage: &str,
        sample: &str,
        command: String,
        exit_code: Option<i32>,
        signal: Option<i32>,
        stderr_tail: String,
    ) -> Self {
        PipelineError::ToolInvocation {
            stage: stage.to_string(),
            sample: sample.to_string(),
            command,
            exit_code,
            signal,
            stderr_tail,
            location: Location::caller(),
        }
    }

    /// Process exit code for this error. A failing tool's own exit code is
    /// passed through verbatim, as is the environment manager's; a tool
    /// killed by a signal maps to 128+signal.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::ToolInvocation {
                exit_code: Some(code),
                ..
            }
            | PipelineError::EnvironmentProvision {
                exit_code: Some(code),
                ..
            } if *code != 0 => *code,
            PipelineError::ToolInvocation {
                signal: Some(sig), ..
            } => 128 + sig,
            PipelineError::InvalidInput { .. } => EXIT_USAGE,
            _ => EXIT_FAILURE,
        }
    }
}
