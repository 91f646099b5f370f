use crate::error::{PipelineError, Result};
use bacanno_protocol::PipelineCatalog;
use std::{fs, path::Path};

pub const CATALOG_ENV_VAR: &str = "BACANNO_CATALOG";
pub const CONDA_BIN_ENV_VAR: &str = "BACANNO_CONDA_BIN";
pub const DEFAULT_CONDA_BIN: &str = "conda";

pub const DEFAULT_INPUT_DIR: &str = "./input_fasta";
pub const DEFAULT_OUTPUT_DIR: &str = "./output_annotation";
pub const DEFAULT_THREADS: usize = 8;

const EMBEDDED_CATALOG: &str = include_str!("../assets/pipeline.json");

fn normalized_non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn process_env(env_var: &str) -> Option<String> {
    std::env::var(env_var).ok()
}

fn lookup_non_empty(lookup: &dyn Fn(&str) -> Option<String>, env_var: &str) -> Option<String> {
    lookup(env_var).and_then(|v| normalized_non_empty(&v))
}

fn resolve_tool_executable_with(
    lookup: &dyn Fn(&str) -> Option<String>,
    env_var: &str,
    default_bin: &str,
) -> String {
    lookup_non_empty(lookup, env_var).unwrap_or_else(|| default_bin.to_string())
}

/// Everything a run needs that is not per-run input: the stage catalog and
/// how to reach the environment manager.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub catalog: PipelineCatalog,
    pub catalog_source: String,
    pub conda_executable: String,
}

impl PipelineConfig {
    /// Catalog precedence: explicit path, then `BACANNO_CATALOG`, then the
    /// catalog compiled into the binary.
    pub fn load(catalog_override: Option<&Path>) -> Result<Self> {
        Self::load_with(&process_env, catalog_override)
    }

    fn load_with(
        lookup: &dyn Fn(&str) -> Option<String>,
        catalog_override: Option<&Path>,
    ) -> Result<Self> {
        let catalog_path = catalog_override
            .map(|p| p.to_string_lossy().into_owned())
            .or_else(|| lookup_non_empty(lookup, CATALOG_ENV_VAR));
        let (catalog, catalog_source) = match catalog_path {
            Some(path) => (catalog_from_json_file(Path::new(&path))?, path),
            None => (embedded_catalog()?, "embedded".to_string()),
        };
        Ok(Self {
            catalog,
            catalog_source,
            conda_executable: resolve_tool_executable_with(
                lookup,
                CONDA_BIN_ENV_VAR,
                DEFAULT_CONDA_BIN,
            ),
        })
    }

    pub fn from_catalog(catalog: PipelineCatalog, conda_executable: &str) -> Self {
        Self {
            catalog,
            catalog_source: "in-memory".to_string(),
            conda_executable: conda_executable.to_string(),
        }
    }
}

pub fn embedded_catalog() -> Result<PipelineCatalog> {
    PipelineCatalog::from_json_str(EMBEDDED_CATALOG).map_err(PipelineError::Catalog)
}

pub fn catalog_from_json_file(path: &Path) -> Result<PipelineCatalog> {
    let text = fs::read_to_string(path).map_err(|e| {
        PipelineError::io(
            format!("Could not read pipeline catalog '{}'", path.display()),
            e,
        )
    })?;
    PipelineCatalog::from_json_str(&text)
        .map_err(|e| PipelineError::Catalog(format!("{} ({})", e, path.display())))
}
