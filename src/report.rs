//! Result reporting
//!
//! Prints per-file progress and diffs, keeps `.err` files in step with the
//! outcome, asks whether to merge changed output back, and prints the final
//! tally.

use std::io::{self, BufRead, Write};
use std::path::Path;

use tracing::warn;

use crate::error::ScriptError;
use crate::patch::merge_file;
use crate::runner::{err_path, TestOutcome, TestStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Yes,
    No,
}

/// How merge questions are answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptPolicy {
    AutoYes,
    AutoNo,
    /// Read the answer from input; empty input or EOF picks `default`
    Ask { default: Answer },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportConfig {
    pub quiet: bool,
    pub verbose: bool,
    pub interactive: bool,
    pub prompt: PromptPolicy,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            quiet: false,
            verbose: false,
            interactive: false,
            prompt: PromptPolicy::Ask { default: Answer::No },
        }
    }
}

/// Totals of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Summary {
    /// Process exit status for this run.
    pub fn exit_code(&self) -> u8 {
        if self.failed > 0 {
            1
        } else {
            0
        }
    }
}

/// Writes progress to `out` and reads merge answers from `input`.
pub struct Reporter<W: Write, R: BufRead> {
    config: ReportConfig,
    out: W,
    input: R,
    summary: Summary,
}

impl<W: Write, R: BufRead> Reporter<W, R> {
    pub fn new(config: ReportConfig, out: W, input: R) -> Self {
        Self {
            config,
            out,
            input,
            summary: Summary::default(),
        }
    }

    /// Report one finished test.
    pub fn report(&mut self, outcome: &TestOutcome) -> io::Result<()> {
        let name = outcome.path.display().to_string();
        let err_file = outcome.err_path();
        self.summary.total += 1;

        match outcome.status() {
            TestStatus::Empty => {
                self.summary.skipped += 1;
                self.progress("s", &format!("{}: empty", name))?;
            }
            TestStatus::Skipped => {
                self.summary.skipped += 1;
                self.progress("s", &format!("{}: skipped", name))?;
            }
            TestStatus::Passed => {
                self.progress(".", &format!("{}: passed", name))?;
                remove_err_file(&err_file);
            }
            TestStatus::Failed => {
                self.summary.failed += 1;
                self.progress("!", &format!("{}: failed", name))?;
                if let Some(post) = &outcome.post_output {
                    if let Err(e) = std::fs::write(&err_file, post.concat()) {
                        warn!(file = %err_file.display(), error = %e, "failed to write .err file");
                    }
                }
                if !self.config.quiet {
                    if !self.config.verbose {
                        writeln!(self.out)?;
                    }
                    for line in &outcome.diff {
                        self.out.write_all(line.as_bytes())?;
                    }
                    self.out.flush()?;
                    if self.config.interactive && self.ask("Accept this change?")? == Answer::Yes {
                        self.merge(&outcome.path, &outcome.diff, &name)?;
                    }
                }
            }
        }
        self.out.flush()
    }

    /// Report a test that could not be run at all.
    pub fn report_error(&mut self, path: &Path, err: &ScriptError) -> io::Result<()> {
        self.summary.total += 1;
        self.summary.failed += 1;
        let name = path.display().to_string();
        self.progress("!", &format!("{}: failed", name))?;
        if !self.config.verbose {
            writeln!(self.out)?;
        }
        writeln!(self.out, "{}: {}", name, err)?;
        self.out.flush()
    }

    /// Print the summary line and return the totals.
    pub fn finish(mut self) -> io::Result<Summary> {
        if !self.config.verbose {
            writeln!(self.out)?;
        }
        writeln!(
            self.out,
            "# Ran {} tests, {} skipped, {} failed.",
            self.summary.total, self.summary.skipped, self.summary.failed
        )?;
        self.out.flush()?;
        Ok(self.summary)
    }

    fn merge(&mut self, path: &Path, diff: &[String], name: &str) -> io::Result<()> {
        match merge_file(path, diff) {
            Ok(()) => {
                remove_err_file(&err_path(path));
                if self.config.verbose {
                    writeln!(self.out, "{}: merged output", name)?;
                }
            }
            Err(e) => {
                warn!(error = %e, "merge failed");
                writeln!(self.out, "{}: merge failed", name)?;
            }
        }
        Ok(())
    }

    /// A marker in normal mode, a full line in verbose mode.
    fn progress(&mut self, marker: &str, line: &str) -> io::Result<()> {
        if self.config.verbose {
            writeln!(self.out, "{}", line)
        } else {
            write!(self.out, "{}", marker)?;
            self.out.flush()
        }
    }

    fn ask(&mut self, question: &str) -> io::Result<Answer> {
        let default = match self.config.prompt {
            PromptPolicy::AutoYes => {
                writeln!(self.out, "{} [yN] y", question)?;
                return Ok(Answer::Yes);
            }
            PromptPolicy::AutoNo => {
                writeln!(self.out, "{} [yN] n", question)?;
                return Ok(Answer::No);
            }
            PromptPolicy::Ask { default } => default,
        };
        let choices = match default {
            Answer::Yes => "[Yn]",
            Answer::No => "[yN]",
        };

        loop {
            write!(self.out, "{} {} ", question, choices)?;
            self.out.flush()?;
            let mut reply = String::new();
            if self.input.read_line(&mut reply)? == 0 {
                writeln!(self.out)?;
                return Ok(default);
            }
            match reply.trim().to_ascii_lowercase().as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(Answer::Yes),
                "n" | "no" => return Ok(Answer::No),
                _ => continue,
            }
        }
    }
}

fn remove_err_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(file = %path.display(), error = %e, "failed to remove .err file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::path::PathBuf;
    use std::time::Duration;

    use crate::patch::unified_diff;

    fn lines(s: &str) -> Vec<String> {
        s.split_inclusive('\n').map(str::to_string).collect()
    }

    fn outcome(path: PathBuf, reference: Option<&str>, post: Option<&str>) -> TestOutcome {
        let reference = reference.map(lines);
        let post = post.map(lines);
        let diff = match (&reference, &post) {
            (Some(r), Some(p)) => {
                let name = path.display().to_string();
                unified_diff(r, p, &name, &format!("{}.err", name))
            }
            _ => Vec::new(),
        };
        TestOutcome {
            path,
            reference_output: reference,
            post_output: post,
            diff,
            blocks: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    fn failing(dir: &Path) -> TestOutcome {
        let path = dir.join("fail.t");
        std::fs::write(&path, "  $ echo hi\n  bye\n").unwrap();
        outcome(path, Some("  $ echo hi\n  bye\n"), Some("  $ echo hi\n  hi\n"))
    }

    fn run(config: ReportConfig, input: &str, outcomes: &[TestOutcome]) -> (String, Summary) {
        let mut out = Vec::new();
        let mut reporter = Reporter::new(config, &mut out, Cursor::new(input.as_bytes().to_vec()));
        for o in outcomes {
            reporter.report(o).unwrap();
        }
        let summary = reporter.finish().unwrap();
        (String::from_utf8(out).unwrap(), summary)
    }

    #[test]
    fn test_markers_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let outcomes = vec![
            outcome(dir.path().join("a.t"), Some("  $ true\n"), Some("  $ true\n")),
            outcome(dir.path().join("b.t"), None, None),
            outcome(dir.path().join("c.t"), Some("  $ exit 80\n"), None),
            failing(dir.path()),
        ];
        let config = ReportConfig {
            quiet: true,
            ..Default::default()
        };
        let (out, summary) = run(config, "", &outcomes);
        assert_eq!(out, ".ss!\n# Ran 4 tests, 2 skipped, 1 failed.\n");
        assert_eq!(
            summary,
            Summary {
                total: 4,
                skipped: 2,
                failed: 1
            }
        );
        assert_eq!(summary.exit_code(), 1);
    }

    #[test]
    fn test_verbose_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.t");
        let outcomes = vec![outcome(path.clone(), Some("  $ true\n"), Some("  $ true\n"))];
        let config = ReportConfig {
            verbose: true,
            ..Default::default()
        };
        let (out, summary) = run(config, "", &outcomes);
        assert_eq!(
            out,
            format!("{}: passed\n# Ran 1 tests, 0 skipped, 0 failed.\n", path.display())
        );
        assert_eq!(summary.exit_code(), 0);
    }

    #[test]
    fn test_failure_writes_err_and_diff() {
        let dir = tempfile::tempdir().unwrap();
        let o = failing(dir.path());
        let (out, _) = run(ReportConfig::default(), "", &[o]);
        assert!(out.starts_with("!\n--- "));
        assert!(out.contains("-  bye\n+  hi\n"));
        let err = std::fs::read_to_string(dir.path().join("fail.t.err")).unwrap();
        assert_eq!(err, "  $ echo hi\n  hi\n");
    }

    #[test]
    fn test_pass_removes_stale_err() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.t");
        std::fs::write(dir.path().join("a.t.err"), "old").unwrap();
        run(
            ReportConfig::default(),
            "",
            &[outcome(path, Some("  $ true\n"), Some("  $ true\n"))],
        );
        assert!(!dir.path().join("a.t.err").exists());
    }

    #[test]
    fn test_interactive_accept_merges() {
        let dir = tempfile::tempdir().unwrap();
        let o = failing(dir.path());
        let config = ReportConfig {
            interactive: true,
            verbose: true,
            ..Default::default()
        };
        let (out, _) = run(config, "y\n", &[o]);
        assert!(out.contains("Accept this change? [yN] "));
        assert!(out.contains("fail.t: merged output"));
        let merged = std::fs::read_to_string(dir.path().join("fail.t")).unwrap();
        assert_eq!(merged, "  $ echo hi\n  hi\n");
        assert!(!dir.path().join("fail.t.err").exists());
    }

    #[test]
    fn test_interactive_default_and_eof_decline() {
        let dir = tempfile::tempdir().unwrap();
        let config = ReportConfig {
            interactive: true,
            ..Default::default()
        };
        run(config, "\n", &[failing(dir.path())]);
        run(config, "", &[failing(dir.path())]);
        let content = std::fs::read_to_string(dir.path().join("fail.t")).unwrap();
        assert_eq!(content, "  $ echo hi\n  bye\n");
        assert!(dir.path().join("fail.t.err").exists());
    }

    #[test]
    fn test_interactive_reasks_on_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let config = ReportConfig {
            interactive: true,
            prompt: PromptPolicy::Ask { default: Answer::Yes },
            ..Default::default()
        };
        let (out, _) = run(config, "maybe\nn\n", &[failing(dir.path())]);
        assert_eq!(out.matches("Accept this change? [Yn] ").count(), 2);
        let content = std::fs::read_to_string(dir.path().join("fail.t")).unwrap();
        assert_eq!(content, "  $ echo hi\n  bye\n");
    }

    #[test]
    fn test_auto_answers() {
        let dir = tempfile::tempdir().unwrap();
        let config = ReportConfig {
            interactive: true,
            prompt: PromptPolicy::AutoNo,
            ..Default::default()
        };
        let (out, _) = run(config, "", &[failing(dir.path())]);
        assert!(out.contains("Accept this change? [yN] n\n"));

        let config = ReportConfig {
            interactive: true,
            prompt: PromptPolicy::AutoYes,
            ..Default::default()
        };
        let (out, _) = run(config, "", &[failing(dir.path())]);
        assert!(out.contains("Accept this change? [yN] y\n"));
        let content = std::fs::read_to_string(dir.path().join("fail.t")).unwrap();
        assert_eq!(content, "  $ echo hi\n  hi\n");
    }

    #[test]
    fn test_merge_conflict_reported() {
        let dir = tempfile::tempdir().unwrap();
        let o = failing(dir.path());
        std::fs::write(&o.path, "  $ echo changed\n  bye\n").unwrap();
        let config = ReportConfig {
            interactive: true,
            prompt: PromptPolicy::AutoYes,
            ..Default::default()
        };
        let (out, _) = run(config, "", &[o]);
        assert!(out.contains("fail.t: merge failed\n"));
        assert!(dir.path().join("fail.t.err").exists());
    }

    #[test]
    fn test_report_error_counts_failure() {
        let mut out = Vec::new();
        let mut reporter = Reporter::new(ReportConfig::default(), &mut out, Cursor::new(Vec::new()));
        let err = ScriptError::new(crate::ErrorKind::Io, "unreadable");
        reporter.report_error(Path::new("x.t"), &err).unwrap();
        let summary = reporter.finish().unwrap();
        assert_eq!(summary.failed, 1);
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("x.t: unreadable"));
    }
}
