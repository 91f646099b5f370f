pub mod about;
pub mod config;
pub mod environment;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod preflight;
pub mod process;
pub mod reference;
pub mod run;
pub mod sample;
pub mod stage;
pub mod template;

#[cfg(test)]
mod testing;

pub use bacanno_protocol as protocol;
pub use error::{PipelineError, Result};
