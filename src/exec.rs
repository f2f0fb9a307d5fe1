//! Command execution
//!
//! Commands are built as argument lists (`ShellCommand`), never as
//! interpolated strings. For the ssh hop every argument is single-quote
//! escaped before the remote shell sees it.

use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{SlipwayError, SlipwayResult};

/// Shared interrupt flag, set from the Ctrl+C handler.
///
/// Runners check it before spawning anything, so an interrupt surfaces
/// as an `Interrupted` error that unwinds through the lock guard.
pub type CancelFlag = Arc<AtomicBool>;

pub fn cancel_flag() -> CancelFlag {
    Arc::new(AtomicBool::new(false))
}

/// A command as an argument list, with an optional working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    program: String,
    args: Vec<String>,
    cwd: Option<String>,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
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

    pub fn current_dir(mut self, dir: impl Into<String>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Render for a remote shell: every token quoted, cwd as a `cd`
    /// prefix. Also used in error messages.
    pub fn rendered(&self) -> String {
        let mut tokens = Vec::with_capacity(self.args.len() + 1);
        tokens.push(shell_quote(&self.program));
        for arg in &self.args {
            tokens.push(shell_quote(arg));
        }
        let body = tokens.join(" ");
        match &self.cwd {
            Some(dir) => format!("cd {} && {}", shell_quote(dir), body),
            None => body,
        }
    }
}

/// Quote a token for safe use in a shell command line
pub fn shell_quote(token: &str) -> String {
    if !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '-' | '_' | '=' | ':' | '+' | ','))
    {
        return token.to_string();
    }
    format!("'{}'", token.replace('\'', "'\\''"))
}

/// Captured result of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// First line of stdout, trimmed - most probes want exactly this.
    pub fn line(&self) -> String {
        self.stdout.lines().next().unwrap_or("").trim().to_string()
    }
}

/// Command-execution seam
///
/// `probe` treats a non-zero exit as data (for state checks);
/// `run` turns it into a `Transport` error carrying the output.
pub trait Runner {
    fn probe(&self, cmd: &ShellCommand) -> SlipwayResult<CmdOutput>;

    fn describe(&self, cmd: &ShellCommand) -> String;

    fn run(&self, cmd: &ShellCommand) -> SlipwayResult<CmdOutput> {
        let output = self.probe(cmd)?;
        if output.success() {
            Ok(output)
        } else {
            let mut detail = String::new();
            if !output.stdout.trim().is_empty() {
                detail.push_str(output.stdout.trim());
            }
            if !output.stderr.trim().is_empty() {
                if !detail.is_empty() {
                    detail.push('\n');
                }
                detail.push_str(output.stderr.trim());
            }
            if detail.is_empty() {
                detail = format!("exit code {}", output.code);
            }
            Err(SlipwayError::Transport {
                command: self.describe(cmd),
                detail,
            })
        }
    }
}

fn capture(mut command: Command, cancel: &Option<CancelFlag>) -> SlipwayResult<CmdOutput> {
    if let Some(flag) = cancel {
        if flag.load(Ordering::SeqCst) {
            return Err(SlipwayError::Interrupted);
        }
    }
    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()?;
    Ok(CmdOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        code: output.status.code().unwrap_or(-1),
    })
}

/// Runs commands on the operator's machine
pub struct LocalRunner {
    cancel: Option<CancelFlag>,
}

impl LocalRunner {
    pub fn new(cancel: Option<CancelFlag>) -> Self {
        Self { cancel }
    }
}

impl Runner for LocalRunner {
    fn probe(&self, cmd: &ShellCommand) -> SlipwayResult<CmdOutput> {
        let mut command = Command::new(cmd.program());
        command.args(&cmd.args);
        if let Some(dir) = &cmd.cwd {
            command.current_dir(dir);
        }
        capture(command, &self.cancel)
    }

    fn describe(&self, cmd: &ShellCommand) -> String {
        cmd.rendered()
    }
}

/// Runs commands on the target host over ssh
pub struct SshRunner {
    destination: String,
    cancel: Option<CancelFlag>,
}

impl SshRunner {
    pub fn new(destination: impl Into<String>, cancel: Option<CancelFlag>) -> Self {
        Self {
            destination: destination.into(),
            cancel,
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }
}

impl Runner for SshRunner {
    fn probe(&self, cmd: &ShellCommand) -> SlipwayResult<CmdOutput> {
        let mut command = Command::new("ssh");
        command.arg(&self.destination).arg(cmd.rendered());
        capture(command, &self.cancel)
    }

    fn describe(&self, cmd: &ShellCommand) -> String {
        format!("ssh {} {}", self.destination, cmd.rendered())
    }
}

/// Open an interactive shell in `dir` on the remote host.
///
/// Stdio is inherited; the user's own exit status is not an error.
pub fn open_shell(destination: &str, dir: &str) -> SlipwayResult<()> {
    Command::new("ssh")
        .arg("-t")
        .arg(destination)
        .arg(format!("cd {} && exec bash", shell_quote(dir)))
        .status()?;
    Ok(())
}

/// Recording runner for tests: every command succeeds unless its
/// rendering contains a configured failure marker.
#[cfg(test)]
pub struct ScriptedRunner {
    pub calls: std::sync::Mutex<Vec<String>>,
    fail_marker: Option<String>,
    cancel: Option<CancelFlag>,
}

#[cfg(test)]
impl ScriptedRunner {
    pub fn ok() -> Self {
        Self {
            calls: std::sync::Mutex::new(Vec::new()),
            fail_marker: None,
            cancel: None,
        }
    }

    pub fn failing_on(marker: impl Into<String>) -> Self {
        Self {
            fail_marker: Some(marker.into()),
            ..Self::ok()
        }
    }

    pub fn cancelled_by(flag: CancelFlag) -> Self {
        Self {
            cancel: Some(flag),
            ..Self::ok()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Runner for ScriptedRunner {
    fn probe(&self, cmd: &ShellCommand) -> SlipwayResult<CmdOutput> {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::SeqCst) {
                return Err(SlipwayError::Interrupted);
            }
        }
        let rendered = cmd.rendered();
        self.calls.lock().unwrap().push(rendered.clone());
        let failed = self
            .fail_marker
            .as_ref()
            .is_some_and(|marker| rendered.contains(marker.as_str()));
        Ok(CmdOutput {
            stdout: String::new(),
            stderr: if failed { "scripted failure".into() } else { String::new() },
            code: if failed { 1 } else { 0 },
        })
    }

    fn describe(&self, cmd: &ShellCommand) -> String {
        cmd.rendered()
    }
}
