//! Spawn requests: what to run and how to wire it.
//!
//! A [`JobSpec`] describes one child process. Validation and executable
//! resolution happen before any OS resource is touched, so a rejected
//! spec leaves no trace: invalid arguments surface as the `0` sentinel
//! with a message, a missing or non-executable target as the `-1`
//! sentinel, and neither consumes a job id.

use std::path::{Path, PathBuf};

use crate::handler::SharedHandler;
use crate::kernel::KernelConfig;

/// What to execute: a plain argv vector, or a command string handed to
/// the configured shell (`sh -c '...'` by default).
#[derive(Debug, Clone)]
pub enum CommandLine {
    Argv(Vec<String>),
    Shell(String),
}

/// Initial pty geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    pub rows: u16,
    pub cols: u16,
}

impl Default for PtySize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// Description of one job to start.
pub struct JobSpec {
    pub(crate) command: CommandLine,
    pub(crate) cwd: Option<PathBuf>,
    pub(crate) env: Vec<(String, String)>,
    pub(crate) clear_env: bool,
    pub(crate) detach: bool,
    pub(crate) pty: Option<PtySize>,
    pub(crate) rpc: bool,
    pub(crate) handler: Option<SharedHandler>,
}

impl JobSpec {
    /// Spec for a plain exec of an argv vector.
    pub fn argv<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(CommandLine::Argv(argv.into_iter().map(Into::into).collect()))
    }

    /// Spec for a shell-interpreted command string.
    pub fn shell(command: impl Into<String>) -> Self {
        Self::new(CommandLine::Shell(command.into()))
    }

    fn new(command: CommandLine) -> Self {
        Self {
            command,
            cwd: None,
            env: Vec::new(),
            clear_env: false,
            detach: false,
            pty: None,
            rpc: false,
            handler: None,
        }
    }

    /// Working directory override; rejected at start time if it is not
    /// an existing directory.
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Add an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Start the child with an empty environment.
    pub fn clear_env(mut self) -> Self {
        self.clear_env = true;
        self
    }

    /// Exempt the job from host-shutdown termination.
    pub fn detach(mut self) -> Self {
        self.detach = true;
        self
    }

    /// Back the job with a pseudo-terminal of the given geometry.
    pub fn pty(mut self, size: PtySize) -> Self {
        self.pty = Some(size);
        self
    }

    /// Reserve stdout/stderr for an RPC transport collaborator: pipes
    /// are wired but the kernel attaches no line buffering to them.
    /// Mutually exclusive with pty wiring.
    pub fn rpc(mut self) -> Self {
        self.rpc = true;
        self
    }

    /// Attach an event handler.
    pub fn handler(mut self, handler: SharedHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Human-readable command description, kept for job listings.
    pub(crate) fn describe(&self) -> String {
        match &self.command {
            CommandLine::Argv(argv) => argv.join(" "),
            CommandLine::Shell(cmd) => cmd.clone(),
        }
    }
}

/// Spawn rejection, mapped to the `0`/`-1` start sentinels.
#[derive(Debug)]
pub(crate) enum SpawnError {
    Invalid(String),
    NotExecutable,
}

/// Program plus arguments after shell wrapping and PATH resolution.
pub(crate) struct ResolvedCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Validate a spec and resolve its executable.
///
/// Order matters for the sentinel contract: argument problems are
/// reported before executability, and neither path touches the job
/// table or the id counter.
pub(crate) fn resolve(spec: &JobSpec, config: &KernelConfig) -> Result<ResolvedCommand, SpawnError> {
    if spec.pty.is_some() && spec.rpc {
        return Err(SpawnError::Invalid(
            "pty and rpc wiring are mutually exclusive".into(),
        ));
    }
    if let Some(cwd) = &spec.cwd {
        if !cwd.is_dir() {
            return Err(SpawnError::Invalid(format!(
                "cwd {:?} is not a directory",
                cwd
            )));
        }
    }

    match &spec.command {
        CommandLine::Argv(argv) => {
            let Some(program) = argv.first().filter(|p| !p.is_empty()) else {
                return Err(SpawnError::Invalid("command is empty".into()));
            };
            let program = resolve_executable(program).ok_or(SpawnError::NotExecutable)?;
            Ok(ResolvedCommand {
                program,
                args: argv[1..].to_vec(),
            })
        }
        CommandLine::Shell(cmd) => {
            if cmd.trim().is_empty() {
                return Err(SpawnError::Invalid("command is empty".into()));
            }
            let shell = config.shell.to_string_lossy();
            let program = resolve_executable(&shell).ok_or(SpawnError::NotExecutable)?;
            Ok(ResolvedCommand {
                program,
                args: vec![config.shell_flag.clone(), cmd.clone()],
            })
        }
    }
}

/// Resolve a program name to an executable path.
///
/// Names containing a slash are checked directly; bare names are
/// searched in `$PATH`. Returns `None` when nothing executable is
/// found.
fn resolve_executable(name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let path = Path::new(name);
        return is_executable(path).then(|| path.to_path_buf());
    }
    let path_var = std::env::var("PATH").unwrap_or_default();
    resolve_in_path(name, &path_var)
}

/// Search each directory in `path_var` (colon-separated) for an
/// executable named `name`.
pub(crate) fn resolve_in_path(name: &str, path_var: &str) -> Option<PathBuf> {
    for dir in path_var.split(':') {
        if dir.is_empty() {
            continue;
        }
        let candidate = Path::new(dir).join(name);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match path.metadata() {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}
