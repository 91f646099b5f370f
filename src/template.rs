//! Placeholder expansion for catalog tool invocations.
//!
//! Recognized placeholders: `{input}`, `{sample}`, `{sample_dir}`,
//! `{stage_dir}`, `{output}`, `{threads}` and `{ref:<dataset-id>}`.

use crate::process::CommandSpec;
use bacanno_protocol::{PipelineCatalog, ToolInvocationSpec};
use regex::{Captures, Regex};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::LazyLock,
};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([a-z_]+)(?::([A-Za-z0-9_.\-]+))?\}").expect("placeholder pattern is valid")
});

const PLAIN_KEYS: [&str; 6] = ["input", "sample", "sample_dir", "stage_dir", "output", "threads"];

#[derive(Debug, Clone)]
pub struct TemplateValues<'a> {
    pub input: &'a Path,
    pub sample: &'a str,
    pub sample_dir: &'a Path,
    pub stage_dir: &'a Path,
    pub output: &'a Path,
    pub threads: usize,
    pub references: &'a HashMap<String, PathBuf>,
}

impl TemplateValues<'_> {
    fn lookup(&self, key: &str, arg: Option<&str>) -> Result<String, String> {
        let path_text = |p: &Path| p.to_string_lossy().into_owned();
        match (key, arg) {
            ("input", None) => Ok(path_text(self.input)),
            ("sample", None) => Ok(self.sample.to_string()),
            ("sample_dir", None) => Ok(path_text(self.sample_dir)),
            ("stage_dir", None) => Ok(path_text(self.stage_dir)),
            ("output", None) => Ok(path_text(self.output)),
            ("threads", None) => Ok(self.threads.to_string()),
            ("ref", Some(id)) => self
                .references
                .get(id)
                .map(|p| path_text(p))
                .ok_or_else(|| format!("reference dataset '{id}' has not been obtained")),
            _ => Err(format!("unknown placeholder '{}'", describe(key, arg))),
        }
    }
}

fn describe(key: &str, arg: Option<&str>) -> String {
    match arg {
        Some(arg) => format!("{{{key}:{arg}}}"),
        None => format!("{{{key}}}"),
    }
}

fn expand(
    template: &str,
    mut resolve: impl FnMut(&Captures<'_>) -> Result<String, String>,
) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(template) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&template[last..whole.start()]);
        out.push_str(&resolve(&caps)?);
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

pub fn render(template: &str, values: &TemplateValues<'_>) -> Result<String, String> {
    expand(template, |caps| {
        values.lookup(&caps[1], caps.get(2).map(|m| m.as_str()))
    })
}

pub fn render_invocation(
    spec: &ToolInvocationSpec,
    values: &TemplateValues<'_>,
) -> Result<CommandSpec, String> {
    let args = spec
        .args
        .iter()
        .map(|arg| render(arg, values))
        .collect::<Result<Vec<_>, _>>()?;
    let redirect = |t: &Option<String>| -> Result<Option<PathBuf>, String> {
        t.as_ref().map(|t| render(t, values).map(PathBuf::from)).transpose()
    };
    Ok(CommandSpec {
        stdin_file: redirect(&spec.stdin)?,
        stdout_file: redirect(&spec.stdout)?,
        ..CommandSpec::new(render(&spec.program, values)?).args(args)
    })
}

/// Checks every placeholder in the catalog before any stage runs. A stage
/// may only reference datasets it declares.
pub fn check_catalog_templates(catalog: &PipelineCatalog) -> Result<(), String> {
    for stage in &catalog.stages {
        for invocation in &stage.invocations {
            let templates = std::iter::once(&invocation.program)
                .chain(invocation.args.iter())
                .chain(invocation.stdin.iter())
                .chain(invocation.stdout.iter());
            for template in templates {
                expand(template, |caps| {
                    let key = &caps[1];
                    let arg = caps.get(2).map(|m| m.as_str());
                    match (key, arg) {
                        ("ref", Some(id)) if stage.references.iter().any(|r| r == id) => {
                            Ok(String::new())
                        }
                        ("ref", Some(id)) => Err(format!(
                            "stage '{}' uses {{ref:{id}}} without declaring it",
                            stage.name
                        )),
                        (k, None) if PLAIN_KEYS.contains(&k) => Ok(String::new()),
                        _ => Err(format!(
                            "stage '{}' uses unknown placeholder '{}'",
                            stage.name,
                            describe(key, arg)
                        )),
                    }
                })?;
            }
        }
    }
    Ok(())
}
