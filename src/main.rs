// File: src/main.rs
//
// Command-line entry point for the Strand machine. Reads one source file,
// stages it into the root context, and drives the worker pool until every
// context has drained.

use clap::Parser;
use log::LevelFilter;
use simple_logger::SimpleLogger;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use strand::errors::fatal;
use strand::lexer::tokenize;
use strand::pool;
use strand::vm::Machine;

#[derive(Parser)]
#[command(
    name = "strand",
    about = "Strand: a concurrent, concatenative stack machine",
    version = env!("CARGO_PKG_VERSION"),
    long_about = None
)]
struct Cli {
    /// Path to the source file
    file: Option<PathBuf>,

    /// Number of worker threads
    #[arg(long, default_value_t = pool::DEFAULT_WORKERS)]
    workers: usize,

    /// Enable step-level trace logging
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Trace
    } else {
        LevelFilter::Warn
    };
    let _ = SimpleLogger::new().with_level(level).init();

    let Some(file) = cli.file else {
        eprintln!("Usage: strand <source-file>");
        std::process::exit(1);
    };

    let source = match fs::read_to_string(&file) {
        Ok(text) => text,
        Err(err) => fatal(format!("Unable to read '{}': {err}", file.display())),
    };

    let machine = Arc::new(Machine::new(cli.workers.max(1)));
    machine.load(tokenize(&source));
    if let Err(err) = pool::run(&machine) {
        fatal(err);
    }
}
