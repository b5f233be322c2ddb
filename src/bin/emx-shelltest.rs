//! emx-shelltest CLI
//!
//! Run shell transcript tests and optionally merge changed output back.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use emx_shelltest::{config_path, env_args, load_file, Reporter, Sandbox, Settings, TestRunner};

#[derive(Parser, Debug)]
#[command(name = "emx-shelltest")]
#[command(author = "nzinfo <li.monan@gmail.com>")]
#[command(version)]
#[command(about = "Run shell transcript tests")]
struct Cli {
    /// Test files or directories to search for *.t files
    #[arg(value_name = "TESTS")]
    tests: Vec<PathBuf>,

    /// Don't print diffs
    #[arg(short, long)]
    quiet: bool,

    /// Show filenames and test status
    #[arg(short, long)]
    verbose: bool,

    /// Interactively merge changed test output
    #[arg(short, long)]
    interactive: bool,

    /// Write script output directly to the terminal
    #[arg(short, long)]
    debug: bool,

    /// Answer yes to all questions
    #[arg(short, long)]
    yes: bool,

    /// Answer no to all questions
    #[arg(short, long)]
    no: bool,

    /// Don't reset common environment variables
    #[arg(short = 'E', long = "preserve-env")]
    preserve_env: bool,

    /// Keep temporary directories
    #[arg(long = "keep-tmpdir")]
    keep_tmpdir: bool,

    /// Shell to use for running tests [default: /bin/sh]
    #[arg(long, value_name = "PATH")]
    shell: Option<String>,

    /// Arguments to invoke the shell with
    #[arg(long = "shell-opts", value_name = "OPTS", allow_hyphen_values = true)]
    shell_opts: Option<String>,

    /// Number of spaces to use for indentation [default: 2]
    #[arg(long, value_name = "NUM")]
    indent: Option<usize>,

    /// Per-command timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
}

impl From<Cli> for Settings {
    fn from(cli: Cli) -> Self {
        Settings {
            tests: cli.tests,
            quiet: cli.quiet,
            verbose: cli.verbose,
            interactive: cli.interactive,
            debug: cli.debug,
            yes: cli.yes,
            no: cli.no,
            preserve_env: cli.preserve_env,
            keep_tmpdir: cli.keep_tmpdir,
            shell: cli.shell,
            shell_opts: cli.shell_opts,
            indent: cli.indent,
            timeout: cli.timeout,
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("SHELLTEST_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    init_logging();
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("emx-shelltest: {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn run() -> Result<ExitCode> {
    let extra = env_args("SHELLTEST")?;
    let cli = match Cli::try_parse_from(std::env::args_os().chain(extra.into_iter().map(Into::into))) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    let rc = config_path();
    let file = load_file(&rc).with_context(|| format!("loading {}", rc.display()))?;
    let settings = Settings::from(cli).merged(&file);
    settings.validate()?;
    if settings.tests.is_empty() {
        bail!("no test files specified");
    }
    let run_config = settings.run_config()?;

    let files = TestRunner::discover(&settings.tests)?;
    if files.is_empty() {
        bail!("no tests found");
    }

    let sandbox = Sandbox::create(!settings.preserve_env).context("creating temporary directory")?;
    let runner = TestRunner::new(run_config, &sandbox);
    let tests = runner.tests(&files)?;

    let code = if settings.debug {
        for test in tests {
            let path = test.path().display().to_string();
            if let Err(e) = test.run() {
                eprintln!("{}: {}", path, e);
            }
        }
        ExitCode::SUCCESS
    } else {
        let stdin = io::stdin();
        let mut reporter = Reporter::new(settings.report_config(), io::stdout(), stdin.lock());
        for test in tests {
            let path = test.path().to_path_buf();
            match test.run() {
                Ok(outcome) => reporter.report(&outcome)?,
                Err(e) => reporter.report_error(&path, &e)?,
            }
        }
        let summary = reporter.finish()?;
        ExitCode::from(summary.exit_code())
    };

    if let Some(kept) = sandbox.finish(settings.keep_tmpdir)? {
        println!("# Kept temporary directory: {}", kept.display());
    }
    Ok(code)
}
