//! Test doubles for the process and host-probe seams.

use crate::config::embedded_catalog;
use crate::preflight::ResourceProbe;
use crate::process::{CommandSpec, ProcessOutput, ProcessRunner};
use bacanno_protocol::PipelineCatalog;
use flate2::{Compression, write::GzEncoder};
use std::{
    cell::{Cell, RefCell},
    collections::BTreeSet,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

/// Simulates `conda env list --json` and `conda create` against a directory.
pub struct FakeConda {
    root: PathBuf,
    envs: RefCell<BTreeSet<String>>,
    fail_creates: Cell<Option<i32>>,
}

impl FakeConda {
    fn new(root: PathBuf) -> Self {
        Self {
            root,
            envs: RefCell::new(BTreeSet::new()),
            fail_creates: Cell::new(None),
        }
    }

    pub fn preinstall(&self, name: &str) {
        fs::create_dir_all(self.root.join("envs").join(name).join("bin")).unwrap();
        self.envs.borrow_mut().insert(name.to_string());
    }

    /// Every later `create` exits with `code`.
    pub fn fail_creates(&self, code: i32) {
        self.fail_creates.set(Some(code));
    }

    fn respond(&self, spec: &CommandSpec) -> ProcessOutput {
        match spec.args.first().map(String::as_str) {
            Some("env") => {
                let mut prefixes = vec![self.root.to_string_lossy().into_owned()];
                prefixes.extend(
                    self.envs
                        .borrow()
                        .iter()
                        .map(|name| self.root.join("envs").join(name).to_string_lossy().into_owned()),
                );
                ProcessOutput {
                    exit_code: Some(0),
                    stdout: serde_json::json!({ "envs": prefixes }).to_string(),
                    ..ProcessOutput::default()
                }
            }
            Some("create") if self.fail_creates.get().is_some() => ProcessOutput {
                exit_code: self.fail_creates.get(),
                stderr: "PackagesNotFoundError: the following packages are missing".to_string(),
                ..ProcessOutput::default()
            },
            Some("create") => {
                let name = spec
                    .args
                    .iter()
                    .skip_while(|a| *a != "--name")
                    .nth(1)
                    .cloned()
                    .unwrap_or_default();
                self.preinstall(&name);
                ProcessOutput::exited_with(0)
            }
            _ => ProcessOutput::exited_with(2),
        }
    }
}

type ToolResponder = Box<dyn Fn(&CommandSpec) -> i32>;

/// Records every command; answers conda commands through [`FakeConda`] and
/// every other program with the exit code chosen by the responder.
pub struct MockRunner {
    pub conda: FakeConda,
    calls: RefCell<Vec<CommandSpec>>,
    tool_exit: ToolResponder,
}

impl MockRunner {
    pub fn new(root: &Path) -> Self {
        Self::with_tool_exit(root, |_| 0)
    }

    pub fn with_tool_exit(root: &Path, tool_exit: impl Fn(&CommandSpec) -> i32 + 'static) -> Self {
        Self {
            conda: FakeConda::new(root.join("conda")),
            calls: RefCell::new(Vec::new()),
            tool_exit: Box::new(tool_exit),
        }
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }

    /// Invocations other than the environment manager's own commands.
    pub fn tool_calls(&self) -> Vec<CommandSpec> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.program != "conda")
            .cloned()
            .collect()
    }
}

impl ProcessRunner for MockRunner {
    fn run(&self, spec: &CommandSpec) -> io::Result<ProcessOutput> {
        self.calls.borrow_mut().push(spec.clone());
        if spec.program == "conda" {
            return Ok(self.conda.respond(spec));
        }
        if let Some(stdin) = &spec.stdin_file {
            if !stdin.exists() {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("missing stdin {}", stdin.display()),
                ));
            }
        }
        if let Some(stdout) = &spec.stdout_file {
            fs::write(stdout, format!("# output of {}\n", spec.program))?;
        }
        let code = (self.tool_exit)(spec);
        Ok(ProcessOutput {
            exit_code: Some(code),
            stderr: if code == 0 {
                String::new()
            } else {
                format!("{} failed\n", spec.program)
            },
            ..ProcessOutput::default()
        })
    }
}

pub struct FixedProbe {
    pub memory_bytes: Option<u64>,
    pub disk_bytes: Option<u64>,
}

impl ResourceProbe for FixedProbe {
    fn available_memory_bytes(&self) -> Option<u64> {
        self.memory_bytes
    }

    fn available_disk_bytes(&self, _path: &Path) -> Option<u64> {
        self.disk_bytes
    }
}

pub const GIB: u64 = 1024 * 1024 * 1024;

pub fn roomy_host() -> FixedProbe {
    FixedProbe {
        memory_bytes: Some(64 * GIB),
        disk_bytes: Some(500 * GIB),
    }
}

/// The embedded catalog with every reference dataset pointed at a local
/// gzip fixture under `root/sources`.
pub fn offline_catalog(root: &Path) -> PipelineCatalog {
    let mut catalog = embedded_catalog().unwrap();
    let sources = root.join("sources");
    fs::create_dir_all(&sources).unwrap();
    for dataset in &mut catalog.references {
        let source = sources.join(format!("{}.gz", dataset.local_name));
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        writeln!(encoder, ">{}\nACGTACGTACGT", dataset.id).unwrap();
        fs::write(&source, encoder.finish().unwrap()).unwrap();
        dataset.remote_url = source.to_string_lossy().into_owned();
    }
    catalog
}

pub fn write_samples(dir: &Path, names: &[&str]) {
    fs::create_dir_all(dir).unwrap();
    for name in names {
        fs::write(dir.join(name), ">contig_1\nATGAAACGCATTAGCACCACCATTACCACCACCATCACCATTACCACAGGTAACGGTGCGGGCTGA\n").unwrap();
    }
}
