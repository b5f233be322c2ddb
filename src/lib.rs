//! emx-shelltest: functional tests written as shell transcripts
//!
//! A test file is prose interleaved with indented shell commands and the
//! output they are expected to print. Every file runs in one persistent
//! shell inside a private temporary directory; the actual output is compared
//! line by line with the expected output and mismatches are reported as a
//! unified diff, which can be merged back into the file.
//!
//! # Test Syntax
//!
//! ```text
//! Narrative lines are ignored.
//!
//!   $ echo hello
//!   hello
//!   $ printf 'a\nb\n' | \
//!   > sort -r
//!   b
//!   a
//!   $ ls missing
//!   ls: *: No such file or directory (glob)
//!   [1]
//! ```
//!
//! # Annotations
//!
//! | Suffix | Meaning |
//! |--------|---------|
//! | `(glob)` | `*` and `?` wildcards, `\` escapes |
//! | `(re)` | anchored regular expression |
//! | `(esc)` | backslash escapes for control bytes |
//! | `(no-eol)` | the line has no trailing newline |
//!
//! A trailing `[N]` line expects exit status `N`; without one the last
//! command must exit 0. A shell that exits with status 80 skips the file.
//!
//! # Environment
//!
//! Each file sees `TESTDIR`, `TESTFILE`, `TESTSHELL` and `TESTTMP`. Its
//! working directory appears as `$TESTTMP` in output.

mod config;
mod document;
mod error;
mod matcher;
mod parser;
mod patch;
mod report;
mod runner;
mod sandbox;
mod session;

pub use config::{config_path, env_args, expand_path, load_file, parse_file, which, FileSettings, Settings};
pub use document::{CommandBlock, CommandLine, ExitLine, ExpectedLine, MatchMode, Segment, TestDocument};
pub use error::{ErrorKind, ScriptError};
pub use matcher::{compare_block, escape, glob_matches, match_line, regex_matches, unescape, BlockComparison, DiffLine, LineMatch};
pub use parser::{parse_document, parse_exit_code, parse_expected_line};
pub use patch::{apply as apply_patch, merge_file, unified_diff};
pub use report::{Answer, PromptPolicy, ReportConfig, Reporter, Summary};
pub use runner::{err_path, BlockOutcome, PendingTest, RunConfig, TestOutcome, TestRunner, TestStatus, SKIP_EXIT_CODE};
pub use sandbox::{create_workdir, Sandbox};
pub use session::{ActualLine, ExecutionResult, SessionOptions, ShellSession, WORKDIR_PLACEHOLDER};

// Convenience functions for cargo test integration
pub use runner::{run_and_assert, run_and_assert_with};
