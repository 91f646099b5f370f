use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const CATALOG_SCHEMA: &str = "bacanno.pipeline.v1";
pub const RUN_REPORT_SCHEMA: &str = "bacanno.run_report.v1";

/// Static description of the whole pipeline: which stages run in which
/// order, what each stage's tool environment contains, and which reference
/// datasets the homology stages need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineCatalog {
    pub schema: String,
    #[serde(default = "default_sequence_extensions")]
    pub sequence_extensions: Vec<String>,
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,
    #[serde(default)]
    pub preflight: PreflightRequirements,
    pub environments: Vec<ToolEnvironmentSpec>,
    #[serde(default)]
    pub references: Vec<ReferenceDatasetSpec>,
    pub stages: Vec<StageSpec>,
}

fn default_sequence_extensions() -> Vec<String> {
    vec!["fasta".to_string()]
}

fn default_channels() -> Vec<String> {
    vec!["conda-forge".to_string(), "bioconda".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreflightRequirements {
    pub memory_gb: f64,
    pub disk_gb: f64,
}

impl Default for PreflightRequirements {
    fn default() -> Self {
        Self {
            memory_gb: 16.0,
            disk_gb: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedPackage {
    pub name: String,
    pub version: String,
}

impl PinnedPackage {
    /// Match spec understood by conda-compatible installers, e.g. `barrnap=0.9`.
    pub fn match_spec(&self) -> String {
        format!("{}={}", self.name, self.version)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEnvironmentSpec {
    pub name: String,
    pub packages: Vec<PinnedPackage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceDatasetSpec {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub remote_url: String,
    /// File name below the run's `ref/` directory.
    pub local_name: String,
    /// Hex SHA-1 of the decompressed file, checked after a fresh fetch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocationSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    pub environment: String,
    pub output_subdir: String,
    #[serde(default)]
    pub references: Vec<String>,
    pub invocations: Vec<ToolInvocationSpec>,
}

impl PipelineCatalog {
    pub fn from_json_str(text: &str) -> Result<Self, String> {
        let catalog: Self = serde_json::from_str(text)
            .map_err(|e| format!("Could not parse pipeline catalog: {e}"))?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn environment(&self, name: &str) -> Option<&ToolEnvironmentSpec> {
        self.environments.iter().find(|env| env.name == name)
    }

    pub fn reference(&self, id: &str) -> Option<&ReferenceDatasetSpec> {
        self.references.iter().find(|dataset| dataset.id == id)
    }

    pub fn is_sequence_extension(&self, ext: &str) -> bool {
        self.sequence_extensions
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext))
    }

    /// Checks cross references and the uniqueness rules that keep every
    /// (stage, sample) pair on its own output path.
    pub fn validate(&self) -> Result<(), String> {
        if self.schema != CATALOG_SCHEMA {
            return Err(format!(
                "Unsupported catalog schema '{}', expected '{CATALOG_SCHEMA}'",
                self.schema
            ));
        }
        if self.sequence_extensions.is_empty() {
            return Err("Catalog declares no sequence file extensions".to_string());
        }
        if self.stages.is_empty() {
            return Err("Catalog declares no stages".to_string());
        }

        let mut env_names = HashSet::new();
        for env in &self.environments {
            if env.name.trim().is_empty() {
                return Err("Tool environment with empty name".to_string());
            }
            if !env_names.insert(env.name.as_str()) {
                return Err(format!("Duplicate tool environment '{}'", env.name));
            }
            if env.packages.is_empty() {
                return Err(format!("Tool environment '{}' has no packages", env.name));
            }
        }

        let mut dataset_ids = HashSet::new();
        let mut local_names = HashSet::new();
        for dataset in &self.references {
            if !dataset_ids.insert(dataset.id.as_str()) {
                return Err(format!("Duplicate reference dataset '{}'", dataset.id));
            }
            if dataset.local_name.is_empty()
                || dataset.local_name.contains(['/', '\\'])
                || dataset.local_name.starts_with('.')
            {
                return Err(format!(
                    "Reference dataset '{}' has invalid local name '{}'",
                    dataset.id, dataset.local_name
                ));
            }
            if !local_names.insert(dataset.local_name.as_str()) {
                return Err(format!(
                    "Reference datasets share the local name '{}'",
                    dataset.local_name
                ));
            }
        }

        let mut stage_names = HashSet::new();
        let mut subdirs = HashSet::new();
        for stage in &self.stages {
            if !stage_names.insert(stage.name.as_str()) {
                return Err(format!("Duplicate stage '{}'", stage.name));
            }
            if stage.output_subdir.is_empty()
                || stage.output_subdir.contains(['/', '\\'])
                || matches!(stage.output_subdir.as_str(), "." | ".." | "logs" | "ref")
            {
                return Err(format!(
                    "Stage '{}' has invalid output directory '{}'",
                    stage.name, stage.output_subdir
                ));
            }
            if !subdirs.insert(stage.output_subdir.as_str()) {
                return Err(format!(
                    "Stages share the output directory '{}'",
                    stage.output_subdir
                ));
            }
            if self.environment(&stage.environment).is_none() {
                return Err(format!(
                    "Stage '{}' requires unknown tool environment '{}'",
                    stage.name, stage.environment
                ));
            }
            for id in &stage.references {
                if self.reference(id).is_none() {
                    return Err(format!(
                        "Stage '{}' requires unknown reference dataset '{id}'",
                        stage.name
                    ));
                }
            }
            if stage.invocations.is_empty() {
                return Err(format!("Stage '{}' has no tool invocations", stage.name));
            }
            if stage.invocations.iter().any(|inv| inv.program.trim().is_empty()) {
                return Err(format!(
                    "Stage '{}' has a tool invocation without a program",
                    stage.name
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub environment: String,
    pub output_dir: String,
    pub samples: Vec<String>,
    pub invocations: usize,
    pub elapsed_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceReport {
    pub id: String,
    pub local_path: String,
    pub reused_existing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub schema: String,
    pub status: RunStatus,
    pub input_dir: String,
    pub output_dir: String,
    pub threads: usize,
    pub log_file: String,
    pub started_at_unix_ms: u64,
    pub finished_at_unix_ms: u64,
    pub warnings: Vec<String>,
    pub references: Vec<ReferenceReport>,
    pub stages: Vec<StageReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_catalog_json(stage_env: &str, subdir: &str) -> String {
        format!(
            r#"{{
  "schema": "{CATALOG_SCHEMA}",
  "environments": [
    {{ "name": "barrnap", "packages": [ {{ "name": "barrnap", "version": "0.9" }} ] }}
  ],
  "stages": [
    {{
      "name": "rRNA-detection",
      "environment": "{stage_env}",
      "output_subdir": "{subdir}",
      "invocations": [ {{ "program": "barrnap", "args": ["{{input}}"] }} ]
    }}
  ]
}}"#
        )
    }

    #[test]
    fn parses_minimal_catalog_with_defaults() {
        let catalog =
            PipelineCatalog::from_json_str(&minimal_catalog_json("barrnap", "Barrnap")).unwrap();
        assert_eq!(catalog.sequence_extensions, vec!["fasta".to_string()]);
        assert_eq!(catalog.channels, vec!["conda-forge", "bioconda"]);
        assert_eq!(catalog.preflight.memory_gb, 16.0);
        assert!(catalog.is_sequence_extension("FASTA"));
        assert!(!catalog.is_sequence_extension("txt"));
        assert_eq!(
            catalog.environments[0].packages[0].match_spec(),
            "barrnap=0.9"
        );
    }

    #[test]
    fn rejects_stage_with_unknown_environment() {
        let err = PipelineCatalog::from_json_str(&minimal_catalog_json("missing", "Barrnap"))
            .unwrap_err();
        assert!(err.contains("unknown tool environment 'missing'"), "{err}");
    }

    #[test]
    fn rejects_reserved_output_subdir() {
        let err =
            PipelineCatalog::from_json_str(&minimal_catalog_json("barrnap", "logs")).unwrap_err();
        assert!(err.contains("invalid output directory"), "{err}");
    }

    #[test]
    fn rejects_foreign_schema() {
        let text = minimal_catalog_json("barrnap", "Barrnap").replace(CATALOG_SCHEMA, "other.v9");
        let err = PipelineCatalog::from_json_str(&text).unwrap_err();
        assert!(err.contains("Unsupported catalog schema"), "{err}");
    }
}
