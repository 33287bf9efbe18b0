//! `brains [-q N | -Q N] file1 [file2 ...]` — the CLI front end.
//!
//! Thin by design: argument parsing and per-file dispatch only, a load +
//! run driver around the library.

use std::io::{stdin, stdout};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::debug;

use brains_vm::{Interpreter, RunConfig, SchedulerKind};

/// Brains: an esoteric tape-and-cell language with cooperative threads,
/// forked processes, and semaphores.
#[derive(Parser, Debug)]
#[command(name = "brains", disable_help_flag = true, disable_version_flag = true)]
struct Cli {
    /// Process-fair scheduler with quantum N (0 = unbounded, < 0 = random
    /// 1..=128 per turn). May be written `-qN` or `-q N`.
    #[arg(short = 'q', value_name = "N", allow_hyphen_values = true)]
    quantum_process_fair: Option<i64>,

    /// Thread-fair scheduler with quantum N, otherwise identical to `-q`.
    #[arg(short = 'Q', value_name = "N", allow_hyphen_values = true)]
    quantum_thread_fair: Option<i64>,

    #[arg(required = false)]
    files: Vec<String>,
}

fn main() -> ExitCode {
    env_logger::init();

    if std::env::args().len() < 2 {
        eprintln!("usage: brains [-q N | -Q N] file1 [file2 ...]");
        return ExitCode::SUCCESS;
    }

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(_) => {
            eprintln!("brains: unrecognized option");
            return ExitCode::FAILURE;
        }
    };

    let (scheduler, quantum) = match (cli.quantum_process_fair, cli.quantum_thread_fair) {
        (Some(n), None) => (SchedulerKind::ProcessFair, n),
        (None, Some(n)) => (SchedulerKind::ThreadFair, n),
        (None, None) => (SchedulerKind::ProcessFair, 10),
        (Some(_), Some(_)) => {
            eprintln!("brains: -q and -Q are mutually exclusive");
            return ExitCode::FAILURE;
        }
    };

    let config = RunConfig { scheduler, quantum, cascading_termination: false };
    let interpreter = Interpreter::new(config);

    for path in &cli.files {
        if let Err(err) = run_one(&interpreter, path) {
            // Each file's failure is independent and never fatal to the run;
            // anyhow just gives us the `{:#}` chain of context.
            eprintln!("brains: {err:#}");
        }
    }

    ExitCode::SUCCESS
}

fn run_one(interpreter: &Interpreter, path: &str) -> anyhow::Result<()> {
    let source = std::fs::read(path).with_context(|| format!("cannot open {path}"))?;

    debug!("compiling and running {path}");
    let mut input = stdin().lock();
    let mut output = stdout().lock();
    let mut errors = std::io::stderr().lock();
    interpreter
        .run_file(&source, &mut input, &mut output, &mut errors)
        .with_context(|| format!("{path} not syntactically correct"))
}
