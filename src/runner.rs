//! Test runner
//!
//! Discovers `.t` files, and for each one parses the document, drives a
//! fresh shell session through its command blocks, matches the output and
//! assembles a [`TestOutcome`]. Tests are handed out as [`PendingTest`]s so
//! callers decide when (and whether) each one runs.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::document::{terminated, Segment, TestDocument};
use crate::error::ScriptError;
use crate::matcher::{compare_block, passthrough_block, BlockComparison};
use crate::parser::parse_document;
use crate::patch::unified_diff;
use crate::sandbox::{create_workdir, remove_var, set_var, Sandbox};
use crate::session::{ExecutionResult, SessionOptions, ShellSession};

/// Shell exit status that marks a test as skipped
pub const SKIP_EXIT_CODE: i32 = 80;

/// Extension of test files picked up from directories
pub const TEST_EXTENSION: &str = ".t";

/// Configuration for the test runner
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Shell executable
    pub shell: PathBuf,
    /// Extra shell arguments
    pub shell_args: Vec<String>,
    /// Spaces before `$ `, `> ` and output lines
    pub indent: usize,
    /// Stream output to the terminal instead of checking it
    pub debug: bool,
    /// Per-command time limit
    pub timeout: Option<Duration>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
            shell_args: Vec::new(),
            indent: 2,
            debug: false,
            timeout: None,
        }
    }
}

/// Verdict of one test file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    /// The file has no commands
    Empty,
    /// The test asked to be skipped, or ran in debug mode
    Skipped,
    Passed,
    Failed,
}

/// Per-block part of an outcome
#[derive(Debug, Clone)]
pub struct BlockOutcome {
    /// Line of the block in the test file
    pub line: usize,
    pub comparison: BlockComparison,
}

/// Result of running one test file
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub path: PathBuf,
    /// The document's lines; `None` when it has no commands
    pub reference_output: Option<Vec<String>>,
    /// The document with actual output in place of expected output; `None`
    /// when the test was skipped
    pub post_output: Option<Vec<String>>,
    /// Unified diff from `reference_output` to `post_output`; empty on pass
    pub diff: Vec<String>,
    pub blocks: Vec<BlockOutcome>,
    pub duration: Duration,
}

impl TestOutcome {
    pub fn status(&self) -> TestStatus {
        if self.reference_output.is_none() {
            TestStatus::Empty
        } else if self.post_output.is_none() {
            TestStatus::Skipped
        } else if self.diff.is_empty() {
            TestStatus::Passed
        } else {
            TestStatus::Failed
        }
    }

    /// Expected output lines of all blocks, concatenated.
    pub fn expected_output(&self) -> Vec<String> {
        self.blocks
            .iter()
            .flat_map(|b| b.comparison.expected.iter().cloned())
            .collect()
    }

    /// Actual output lines of all blocks, concatenated.
    pub fn actual_output(&self) -> Vec<String> {
        self.blocks
            .iter()
            .flat_map(|b| b.comparison.actual.iter().cloned())
            .collect()
    }

    /// Where the post-output of a failing run is saved.
    pub fn err_path(&self) -> PathBuf {
        err_path(&self.path)
    }
}

/// `<test>.err`
pub fn err_path(path: &Path) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(".err");
    PathBuf::from(s)
}

/// A test that has been discovered but not run yet
pub struct PendingTest<'r> {
    path: PathBuf,
    runner: &'r TestRunner,
}

impl PendingTest<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run the test.
    pub fn run(self) -> Result<TestOutcome, ScriptError> {
        self.runner.run_file(&self.path)
    }
}

/// The test runner
pub struct TestRunner {
    config: RunConfig,
    root: PathBuf,
    env: Vec<(String, String)>,
}

impl TestRunner {
    /// Create a runner whose tests live under `sandbox`.
    ///
    /// The sandbox must outlive every test run through this runner.
    pub fn new(config: RunConfig, sandbox: &Sandbox) -> Self {
        Self {
            config,
            root: sandbox.path().to_path_buf(),
            env: sandbox.environ().to_vec(),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Expand `paths` into test files.
    ///
    /// Directories are searched recursively for `*.t`, skipping hidden
    /// entries; files are taken as given. Every path must exist.
    pub fn discover(paths: &[PathBuf]) -> Result<Vec<PathBuf>, ScriptError> {
        if let Some(missing) = paths.iter().find(|p| !p.exists()) {
            return Err(ScriptError::discovery(format!(
                "no such file: {}",
                missing.display()
            )));
        }

        let mut files = Vec::new();
        for path in paths {
            if path.is_dir() {
                scan_dir(path, &mut files)?;
            } else {
                files.push(path.clone());
            }
        }
        Ok(files)
    }

    /// Discover tests without running them.
    pub fn tests(&self, paths: &[PathBuf]) -> Result<Vec<PendingTest<'_>>, ScriptError> {
        Ok(Self::discover(paths)?
            .into_iter()
            .map(|path| PendingTest { path, runner: self })
            .collect())
    }

    /// Read, parse and run one test file.
    pub fn run_file(&self, path: &Path) -> Result<TestOutcome, ScriptError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ScriptError::from(e).with_file(path.display().to_string()))?;
        let document = parse_document(&content, self.config.indent);
        self.run_document(path, &document)
    }

    /// Run a parsed document as the test at `path`.
    pub fn run_document(&self, path: &Path, document: &TestDocument) -> Result<TestOutcome, ScriptError> {
        let start = Instant::now();
        let name = path.display().to_string();

        if !document.has_commands() {
            info!(file = %name, "no commands");
            return Ok(TestOutcome {
                path: path.to_path_buf(),
                reference_output: None,
                post_output: None,
                diff: Vec::new(),
                blocks: Vec::new(),
                duration: start.elapsed(),
            });
        }

        let reference = document.lines();
        let workdir = create_workdir(&self.root, path)?;
        let options = self.session_options(path, &workdir);
        let indent = document.indent_prefix();

        let mut session = match ShellSession::open(&options) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(file = %name, error = %e, "shell unavailable, commands produce no output");
                None
            }
        };

        let mut post = Vec::with_capacity(reference.len());
        let mut blocks = Vec::new();
        for segment in &document.segments {
            match segment {
                Segment::Narrative { lines } => {
                    post.extend(lines.iter().map(|l| terminated(l)));
                }
                Segment::Command(block) => {
                    post.extend(block.command_lines.iter().map(|l| terminated(&l.raw)));
                    let comparison = if block.is_executable() {
                        let result = match session.as_mut() {
                            Some(session) => session.run(&block.script()),
                            None => ExecutionResult::default(),
                        };
                        debug!(
                            file = %name,
                            line = block.line,
                            exit_code = ?result.exit_code,
                            lines = result.output.len(),
                            "block finished"
                        );
                        compare_block(block, &result, &indent)
                    } else {
                        passthrough_block(block)
                    };
                    post.extend(comparison.post_lines.iter().cloned());
                    blocks.push(BlockOutcome {
                        line: block.line,
                        comparison,
                    });
                }
            }
        }
        let shell_status = session.as_mut().and_then(|s| s.close());
        drop(session);

        let skipped = shell_status == Some(SKIP_EXIT_CODE) || self.config.debug;
        let (post_output, diff) = if skipped {
            (None, Vec::new())
        } else {
            let diff = unified_diff(&reference, &post, &name, &format!("{}.err", name));
            (Some(post), diff)
        };

        let outcome = TestOutcome {
            path: path.to_path_buf(),
            reference_output: Some(reference),
            post_output,
            diff,
            blocks,
            duration: start.elapsed(),
        };
        info!(file = %name, status = ?outcome.status(), "test finished");
        Ok(outcome)
    }

    fn session_options(&self, test: &Path, workdir: &Path) -> SessionOptions {
        let test_dir = test
            .canonicalize()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .or_else(|| test.parent().map(Path::to_path_buf))
            .unwrap_or_default();
        let test_file = test
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let workdir_str = workdir.to_string_lossy().into_owned();

        let mut env = self.env.clone();
        set_var(&mut env, "TESTDIR", test_dir.to_string_lossy());
        set_var(&mut env, "TESTFILE", &test_file);
        set_var(&mut env, "TESTSHELL", self.config.shell.to_string_lossy());
        set_var(&mut env, "TESTTMP", &workdir_str);
        // Lets the shell report the directory as given rather than resolved
        set_var(&mut env, "PWD", &workdir_str);
        remove_var(&mut env, "OLDPWD");

        SessionOptions {
            shell: self.config.shell.clone(),
            args: self.config.shell_args.clone(),
            working_dir: workdir.to_path_buf(),
            env,
            timeout: self.config.timeout,
            debug: self.config.debug,
            script_dir: Some(self.root.clone()),
        }
    }
}

/// Collect test files below `dir`: files first, then subdirectories, each
/// in name order.
fn scan_dir(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), ScriptError> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        entries.push((name, entry.path()));
    }
    entries.sort();

    let mut subdirs = Vec::new();
    for (name, path) in entries {
        if path.is_dir() {
            subdirs.push(path);
        } else if name.ends_with(TEST_EXTENSION) {
            files.push(path);
        }
    }
    for sub in subdirs {
        scan_dir(&sub, files)?;
    }
    Ok(())
}

/// Run every test under `dir` and integrate with `#[test]` by panicking on
/// failure.
///
/// Usage in cargo tests:
/// ```rust,ignore
/// #[test]
/// fn shell_tests() {
///     emx_shelltest::run_and_assert("tests/shelltest");
/// }
/// ```
pub fn run_and_assert(dir: impl Into<PathBuf>) {
    run_and_assert_with(dir, |_| {});
}

/// Like `run_and_assert` but allows config customization.
pub fn run_and_assert_with(dir: impl Into<PathBuf>, customize: impl FnOnce(&mut RunConfig)) {
    let dir = dir.into();
    let mut config = RunConfig::default();
    customize(&mut config);

    let sandbox = Sandbox::create(true).expect("failed to create sandbox");
    let runner = TestRunner::new(config, &sandbox);
    let tests = runner.tests(&[dir]).expect("failed to discover tests");

    let mut ran = 0;
    let mut failed = 0;
    for test in tests {
        ran += 1;
        let path = test.path().display().to_string();
        match test.run() {
            Ok(outcome) => match outcome.status() {
                TestStatus::Passed => {
                    eprintln!("PASS  {} ({}ms)", path, outcome.duration.as_millis())
                }
                TestStatus::Skipped => eprintln!("SKIP  {}", path),
                TestStatus::Empty => eprintln!("EMPTY {}", path),
                TestStatus::Failed => {
                    failed += 1;
                    eprintln!("FAIL  {}", path);
                    for line in &outcome.diff {
                        eprint!("  {}", line);
                    }
                }
            },
            Err(e) => {
                failed += 1;
                eprintln!("FAIL  {}", path);
                eprintln!("  {}", e);
            }
        }
    }

    let keep = std::env::var("SHELLTEST_KEEP").is_ok();
    if let Ok(Some(kept)) = sandbox.finish(keep) {
        eprintln!("  workdir: {}", kept.display());
    }

    eprintln!("\n{} tests, {} failed", ran, failed);
    if failed > 0 {
        panic!("{} test(s) failed", failed);
    }
}
