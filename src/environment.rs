//! Isolated tool environments managed through a conda-compatible CLI.
//!
//! Activation never touches the process environment. A [`ScopedActivation`]
//! only describes the variables a child process needs to resolve the
//! environment's executables; the stage hands them to each invocation.

use crate::error::{PipelineError, Result, describe_status};
use crate::logging::RunLog;
use crate::process::{CommandSpec, ProcessOutput, ProcessRunner, tail_lines};
use bacanno_protocol::ToolEnvironmentSpec;
use serde::Deserialize;
use std::{
    cell::RefCell,
    collections::HashMap,
    env,
    ffi::OsString,
    path::{Path, PathBuf},
};

#[derive(Debug, Deserialize)]
struct EnvironmentListing {
    envs: Vec<PathBuf>,
}

#[derive(Debug)]
pub struct ToolEnvironments {
    conda_executable: String,
    channels: Vec<String>,
    base_search_path: Vec<PathBuf>,
    prefixes: RefCell<HashMap<String, PathBuf>>,
    active: RefCell<Option<String>>,
}

impl ToolEnvironments {
    pub fn new(conda_executable: &str, channels: &[String], base_search_path: Vec<PathBuf>) -> Self {
        Self {
            conda_executable: conda_executable.to_string(),
            channels: channels.to_vec(),
            base_search_path,
            prefixes: RefCell::new(HashMap::new()),
            active: RefCell::new(None),
        }
    }

    /// Uses the current `PATH` as the base search path, minus the bin
    /// directory of any environment the operator had activated in the shell.
    pub fn from_process_env(conda_executable: &str, channels: &[String]) -> Self {
        let path = env::var_os("PATH").unwrap_or_default();
        let shell_env_bin = env::var_os("CONDA_PREFIX").map(|p| PathBuf::from(p).join("bin"));
        let base = env::split_paths(&path)
            .filter(|p| Some(p) != shell_env_bin.as_ref())
            .collect();
        Self::new(conda_executable, channels, base)
    }

    pub fn active(&self) -> Option<String> {
        self.active.borrow().clone()
    }

    fn provision_error(name: &str, reason: impl Into<String>) -> PipelineError {
        PipelineError::EnvironmentProvision {
            environment: name.to_string(),
            reason: reason.into(),
            exit_code: None,
        }
    }

    /// The environment manager ran but did not succeed; its exit code is kept.
    fn command_failed(
        name: &str,
        spec: &CommandSpec,
        output: &ProcessOutput,
        tail: usize,
    ) -> PipelineError {
        PipelineError::EnvironmentProvision {
            environment: name.to_string(),
            reason: format!(
                "`{}` failed with {}: {}",
                spec.display(),
                describe_status(&output.exit_code, &output.signal),
                tail_lines(&output.stderr, tail)
            ),
            exit_code: output.exit_code,
        }
    }

    fn list_environments(
        &self,
        runner: &dyn ProcessRunner,
        for_env: &str,
    ) -> Result<HashMap<String, PathBuf>> {
        let spec = CommandSpec::new(&self.conda_executable).args(["env", "list", "--json"]);
        let output = runner.run(&spec).map_err(|e| {
            Self::provision_error(
                for_env,
                format!("could not run `{}`: {e}", spec.display()),
            )
        })?;
        if !output.success() {
            return Err(Self::command_failed(for_env, &spec, &output, 5));
        }
        let listing: EnvironmentListing = serde_json::from_str(&output.stdout).map_err(|e| {
            Self::provision_error(for_env, format!("unreadable environment listing: {e}"))
        })?;
        Ok(listing
            .envs
            .into_iter()
            .filter(|prefix| {
                prefix
                    .parent()
                    .and_then(Path::file_name)
                    .is_some_and(|dir| dir == "envs")
            })
            .filter_map(|prefix| {
                let name = prefix.file_name()?.to_string_lossy().into_owned();
                Some((name, prefix))
            })
            .collect())
    }

    /// Makes sure an environment named like `spec` exists, creating it with
    /// the pinned package set if it does not. Returns its prefix.
    pub fn ensure(
        &self,
        spec: &ToolEnvironmentSpec,
        runner: &dyn ProcessRunner,
        log: &RunLog,
    ) -> Result<PathBuf> {
        if let Some(prefix) = self.prefixes.borrow().get(&spec.name) {
            return Ok(prefix.clone());
        }

        let existing = self.list_environments(runner, &spec.name)?;
        if let Some(prefix) = existing.get(&spec.name) {
            log.debug(format!(
                "Reusing tool environment '{}' at {}",
                spec.name,
                prefix.display()
            ));
            self.prefixes
                .borrow_mut()
                .insert(spec.name.clone(), prefix.clone());
            return Ok(prefix.clone());
        }

        let packages: Vec<String> = spec.packages.iter().map(|p| p.match_spec()).collect();
        log.info(format!(
            "Creating tool environment '{}' with {}",
            spec.name,
            packages.join(" ")
        ));
        let mut create = CommandSpec::new(&self.conda_executable)
            .args(["create", "--yes", "--name", spec.name.as_str(), "--override-channels"]);
        for channel in &self.channels {
            create = create.arg("-c").arg(channel.as_str());
        }
        let create = create.args(packages);
        let output = runner.run(&create).map_err(|e| {
            Self::provision_error(
                &spec.name,
                format!("could not run `{}`: {e}", create.display()),
            )
        })?;
        if !output.success() {
            return Err(Self::command_failed(&spec.name, &create, &output, 10));
        }

        let prefix = self
            .list_environments(runner, &spec.name)?
            .remove(&spec.name)
            .ok_or_else(|| {
                Self::provision_error(&spec.name, "environment missing after creation")
            })?;
        log.info(format!(
            "Tool environment '{}' ready at {}",
            spec.name,
            prefix.display()
        ));
        self.prefixes
            .borrow_mut()
            .insert(spec.name.clone(), prefix.clone());
        Ok(prefix)
    }

    /// Activates a previously ensured environment. Only one activation can
    /// be held at a time.
    pub fn activate(&self, name: &str) -> Result<ScopedActivation<'_>> {
        let prefix = self.prefixes.borrow().get(name).cloned().ok_or_else(|| {
            Self::provision_error(name, "environment has not been provisioned in this run")
        })?;
        if let Some(current) = self.active.borrow().as_ref() {
            return Err(Self::provision_error(
                name,
                format!("environment '{current}' is still active"),
            ));
        }

        let bin_dir = prefix.join("bin");
        let search_path = env::join_paths(
            std::iter::once(bin_dir.clone()).chain(self.base_search_path.iter().cloned()),
        )
        .map_err(|e| Self::provision_error(name, format!("invalid search path: {e}")))?;

        *self.active.borrow_mut() = Some(name.to_string());
        Ok(ScopedActivation {
            owner: self,
            name: name.to_string(),
            prefix,
            bin_dir,
            search_path,
        })
    }
}

/// Held for the duration of one stage. Dropping it deactivates the
/// environment, so every exit path releases it.
#[derive(Debug)]
pub struct ScopedActivation<'a> {
    owner: &'a ToolEnvironments,
    name: String,
    prefix: PathBuf,
    bin_dir: PathBuf,
    search_path: OsString,
}

impl ScopedActivation<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    pub fn search_path(&self) -> &OsString {
        &self.search_path
    }

    /// Variables a child process needs to run inside this environment.
    pub fn command_env(&self) -> Vec<(String, OsString)> {
        vec![
            ("PATH".to_string(), self.search_path.clone()),
            ("CONDA_PREFIX".to_string(), self.prefix.clone().into_os_string()),
            ("CONDA_DEFAULT_ENV".to_string(), OsString::from(&self.name)),
        ]
    }

    pub fn release(self) {}
}

impl Drop for ScopedActivation<'_> {
    fn drop(&mut self) {
        let mut active = self.owner.active.borrow_mut();
        if active.as_deref() == Some(self.name.as_str()) {
            *active = None;
        }
    }
}
