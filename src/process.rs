use std::{
    ffi::OsString,
    fs::File,
    io,
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
};

/// One external program invocation, fully resolved: no placeholders left.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, OsString)>,
    pub stdin_file: Option<PathBuf>,
    pub stdout_file: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.working_dir = Some(dir.to_path_buf());
        self
    }

    pub fn envs(mut self, vars: impl IntoIterator<Item = (String, OsString)>) -> Self {
        self.env.extend(vars);
        self
    }

    pub fn env_value(&self, key: &str) -> Option<&OsString> {
        self.env.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Shell-like rendering for logs and error messages.
    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                out.push_str(&format!("'{arg}'"));
            } else {
                out.push_str(arg);
            }
        }
        if let Some(stdin) = &self.stdin_file {
            out.push_str(&format!(" < {}", stdin.display()));
        }
        if let Some(stdout) = &self.stdout_file {
            out.push_str(&format!(" > {}", stdout.display()));
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn exited_with(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            ..Self::default()
        }
    }
}

/// Capability to run an external program to completion. The pipeline never
/// spawns processes except through this trait.
pub trait ProcessRunner {
    fn run(&self, spec: &CommandSpec) -> io::Result<ProcessOutput>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessRunner;

impl ProcessRunner for SystemProcessRunner {
    fn run(&self, spec: &CommandSpec) -> io::Result<ProcessOutput> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }
        // An explicit PATH here also drives the program lookup on unix.
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        match &spec.stdin_file {
            Some(path) => cmd.stdin(Stdio::from(open_redirect(path, false)?)),
            None => cmd.stdin(Stdio::null()),
        };
        match &spec.stdout_file {
            Some(path) => cmd.stdout(Stdio::from(open_redirect(path, true)?)),
            None => cmd.stdout(Stdio::piped()),
        };
        cmd.stderr(Stdio::piped());

        let output = cmd.output()?;
        Ok(ProcessOutput {
            exit_code: output.status.code(),
            signal: terminating_signal(&output.status),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

fn open_redirect(path: &Path, write: bool) -> io::Result<File> {
    let file = if write {
        File::create(path)
    } else {
        File::open(path)
    };
    file.map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("Could not open redirect '{}': {e}", path.display()),
        )
    })
}

#[cfg(unix)]
fn terminating_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn terminating_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Last `max_lines` non-empty lines of a tool's output.
pub fn tail_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn display_quotes_whitespace_and_shows_redirects() {
        let spec = CommandSpec::new("extract")
            .args(["-t", "my genome.fna"])
            .arg("")
            .current_dir(Path::new("/tmp"));
        let spec = CommandSpec {
            stdout_file: Some(PathBuf::from("/out/s.train")),
            ..spec
        };
        assert_eq!(spec.display(), "extract -t 'my genome.fna' '' > /out/s.train");
    }

    #[test]
    fn tail_keeps_last_non_empty_lines() {
        let text = "one\n\ntwo\nthree\n\n";
        assert_eq!(tail_lines(text, 2), "two\nthree");
        assert_eq!(tail_lines(text, 10), "one\ntwo\nthree");
        assert_eq!(tail_lines("", 3), "");
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_reports_exit_code_and_redirects_stdout() {
        let td = tempdir().unwrap();
        let out = td.path().join("out.txt");
        let spec = CommandSpec {
            stdout_file: Some(out.clone()),
            ..CommandSpec::new("sh").args(["-c", "echo hello; echo oops >&2; exit 3"])
        };
        let result = SystemProcessRunner.run(&spec).unwrap();
        assert_eq!(result.exit_code, Some(3));
        assert!(!result.success());
        assert_eq!(result.stderr.trim(), "oops");
        assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_feeds_stdin_from_file() {
        let td = tempdir().unwrap();
        let input = td.path().join("in.txt");
        std::fs::write(&input, "ACGT\n").unwrap();
        let spec = CommandSpec {
            stdin_file: Some(input),
            ..CommandSpec::new("cat").current_dir(td.path())
        };
        let result = SystemProcessRunner.run(&spec).unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "ACGT\n");
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let spec = CommandSpec::new("bacanno-definitely-not-installed-tool");
        let err = SystemProcessRunner.run(&spec).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
