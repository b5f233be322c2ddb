//! Shell session driver
//!
//! One long-lived shell per test file. Each command block is written to a
//! script file, and the shell is told to source it with stdin from
//! `/dev/null` followed by `echo <sentinel> $?`. Output is read until the
//! sentinel shows up, and the number after it is the block's exit status.
//! Because the shell persists, `cd`, variables and exports carry over from
//! one command block to the next, while a block that reads stdin or leaves
//! a quote open cannot swallow the sentinel.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, warn};

use crate::error::ScriptError;
use crate::matcher::{escape, needs_escape};

/// Placeholder written in place of the per-file working directory
pub const WORKDIR_PLACEHOLDER: &str = "$TESTTMP";

/// One line of captured output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActualLine {
    /// Line text without its terminator, working directory already replaced
    /// by [`WORKDIR_PLACEHOLDER`]
    pub text: String,
    /// The command's output ended here without a line break
    pub no_eol: bool,
}

impl ActualLine {
    /// The line as it would be written in a test document, without indent.
    pub fn render(&self) -> String {
        let mut s = self.text.clone();
        if self.no_eol {
            s.push_str(" (no-eol)");
        }
        if needs_escape(&s) {
            s = format!("{} (esc)", escape(&s));
        }
        s
    }
}

/// What one command block produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub output: Vec<ActualLine>,
    /// `None` if the shell went away before reporting a status
    pub exit_code: Option<i32>,
}

/// Options for spawning a shell session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Shell executable
    pub shell: PathBuf,
    /// Arguments placed before the trailing `-`
    pub args: Vec<String>,
    /// Working directory of the shell, replaced by the placeholder in output
    pub working_dir: PathBuf,
    /// Complete environment of the shell
    pub env: Vec<(String, String)>,
    /// Per-command time limit; the shell is killed when it runs out
    pub timeout: Option<Duration>,
    /// Copy output to our stdout as it arrives
    pub debug: bool,
    /// Where block scripts are written; the system temp dir if unset
    pub script_dir: Option<PathBuf>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
            args: Vec::new(),
            working_dir: PathBuf::from("."),
            env: Vec::new(),
            timeout: None,
            debug: false,
            script_dir: None,
        }
    }
}

/// A running shell.
///
/// The subprocess is shut down by [`close`](Self::close) or, failing that,
/// when the session is dropped.
pub struct ShellSession {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Receiver<Vec<u8>>,
    workdir: String,
    /// Private directory holding the current block script
    scripts: tempfile::TempDir,
    script_path: PathBuf,
    /// Written in place of the script path in output, so messages read as if
    /// the shell ran the command itself
    shell_name: String,
    timeout: Option<Duration>,
    debug: bool,
    /// Set once the shell has exited; holds its status code
    exited: Option<Option<i32>>,
}

impl ShellSession {
    /// Spawn `shell [args...] -` with the given directory and environment.
    pub fn open(options: &SessionOptions) -> Result<Self, ScriptError> {
        let scripts = script_dir(options.script_dir.as_deref())?;
        let script_path = scripts.path().join("block.sh");

        let mut cmd = Command::new(&options.shell);
        cmd.args(&options.args)
            .arg("-")
            .current_dir(&options.working_dir)
            .env_clear()
            .envs(options.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|e| {
            ScriptError::session(format!(
                "failed to start shell {}: {}",
                options.shell.display(),
                e
            ))
        })?;
        debug!(shell = %options.shell.display(), pid = child.id(), "shell started");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ScriptError::session("shell stdout not captured"))?;
        let stdin = child.stdin.take();

        // Lines are forwarded over a channel so a read can time out
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut reader = BufReader::new(stdout);
            loop {
                let mut buf = Vec::new();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if tx.send(buf).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let mut session = Self {
            child,
            stdin,
            lines: rx,
            workdir: options.working_dir.to_string_lossy().into_owned(),
            scripts,
            script_path,
            shell_name: options.shell.to_string_lossy().into_owned(),
            timeout: options.timeout,
            debug: options.debug,
            exited: None,
        };
        // Command errors belong in the transcript
        session.write_input("exec 2>&1\n");
        Ok(session)
    }

    /// Whether the shell has exited.
    pub fn is_finished(&self) -> bool {
        self.exited.is_some()
    }

    /// The shell's exit status, once it has exited.
    pub fn exit_status(&self) -> Option<i32> {
        self.exited.flatten()
    }

    /// Run one command script and collect its output and exit status.
    ///
    /// If the shell exits before printing the sentinel, the output read so
    /// far is returned with the shell's own exit status. Once the shell is
    /// gone every later call returns an empty result.
    pub fn run(&mut self, script: &str) -> ExecutionResult {
        if self.exited.is_some() {
            return ExecutionResult::default();
        }

        let mut body = script.to_string();
        if !body.ends_with('\n') {
            body.push('\n');
        }
        if let Err(e) = std::fs::write(&self.script_path, body) {
            warn!(path = %self.script_path.display(), error = %e, "failed to write block script");
            return ExecutionResult::default();
        }
        let script_path = self.script_path.to_string_lossy().into_owned();
        let quoted = match shlex::try_quote(&script_path) {
            Ok(quoted) => quoted.into_owned(),
            Err(e) => {
                warn!(path = %script_path, error = %e, "cannot quote block script path");
                return ExecutionResult::default();
            }
        };

        let sentinel = new_sentinel();
        self.write_input(&format!(". {} </dev/null\necho {} $?\n", quoted, sentinel));

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut output = Vec::new();

        loop {
            let raw = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    match self.lines.recv_timeout(left) {
                        Ok(raw) => Some(raw),
                        Err(RecvTimeoutError::Timeout) => {
                            warn!(timeout = ?self.timeout, "command timed out, killing shell");
                            let _ = self.child.kill();
                            None
                        }
                        Err(RecvTimeoutError::Disconnected) => None,
                    }
                }
                None => self.lines.recv().ok(),
            };

            let Some(raw) = raw else {
                let status = self.reap();
                debug!(?status, "shell exited before the command finished");
                return ExecutionResult {
                    output,
                    exit_code: status,
                };
            };

            let line = String::from_utf8_lossy(&raw);
            if let Some(pos) = line.find(&sentinel) {
                let before = &line[..pos];
                self.echo(before);
                if !before.is_empty() {
                    output.push(ActualLine {
                        text: self.substitute(before),
                        no_eol: true,
                    });
                }
                let exit_code = line[pos + sentinel.len()..].trim().parse().ok();
                return ExecutionResult { output, exit_code };
            }

            self.echo(&line);
            let (text, no_eol) = match line.strip_suffix('\n') {
                Some(text) => (text, false),
                None => (&*line, true),
            };
            output.push(ActualLine {
                text: self.substitute(text),
                no_eol,
            });
        }
    }

    /// Close the shell's input and wait for it to exit.
    ///
    /// Returns the shell's exit status. Calling it again is a no-op.
    pub fn close(&mut self) -> Option<i32> {
        if self.exited.is_none() {
            let status = self.reap();
            debug!(?status, "shell closed");
        }
        self.exit_status()
    }

    fn write_input(&mut self, input: &str) {
        let Some(stdin) = self.stdin.as_mut() else {
            return;
        };
        // A write error means the shell is gone; the read side reports it
        if let Err(e) = stdin.write_all(input.as_bytes()).and_then(|_| stdin.flush()) {
            debug!(error = %e, "shell input closed");
            self.stdin = None;
        }
    }

    fn reap(&mut self) -> Option<i32> {
        self.stdin = None;
        let status = match self.child.wait() {
            Ok(status) => status.code(),
            Err(e) => {
                warn!(error = %e, "failed to wait for shell");
                None
            }
        };
        self.exited = Some(status);
        status
    }

    fn substitute(&self, text: &str) -> String {
        let script_path = self.script_path.to_string_lossy();
        let text = text.replace(&*script_path, &self.shell_name);
        if self.workdir.is_empty() {
            text
        } else {
            text.replace(&self.workdir, WORKDIR_PLACEHOLDER)
        }
    }

    /// Directory holding block scripts.
    pub fn script_dir(&self) -> &Path {
        self.scripts.path()
    }

    fn echo(&self, text: &str) {
        if self.debug && !text.is_empty() {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(text.as_bytes());
            let _ = out.flush();
        }
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        if self.exited.is_some() {
            return;
        }
        self.stdin = None;
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

fn script_dir(parent: Option<&Path>) -> Result<tempfile::TempDir, ScriptError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(".shelltest-script-");
    let dir = match parent {
        Some(parent) => builder.tempdir_in(parent),
        None => builder.tempdir(),
    };
    dir.map_err(|e| ScriptError::session(format!("failed to create script directory: {}", e)))
}

/// A marker that command output will not contain by accident.
fn new_sentinel() -> String {
    format!("SHELLTEST_{:016x}_", rand::thread_rng().gen::<u64>())
}
