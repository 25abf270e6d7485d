//! Command-line entry point for `patman`.
//!
//! Everything here is the "external collaborator" `spec.md`'s Scope section
//! draws a line around: flag parsing, help text, file-open/stdin selection,
//! and process-signal wiring to a `CancellationToken`. None of it is
//! respecified — it only has to hand `patman_core::Engine` a configured
//! `EngineConfig`, a byte source, and a cancellation signal. Grounded on the
//! retrieval pack's closest sibling (a `clap`-derive, multi-flag,
//! line-processing CLI) for the derive shape, and on `ctrlc`'s own
//! documented usage for SIGINT wiring.

use std::fs::File;
use std::io::{self, Read};
use std::process::ExitCode;

use clap::Parser;

use patman_core::engine::{CancellationToken, Engine, EngineConfig, parse_pipelines};
use patman_core::printer::OutputFormat;
use patman_core::record::RecordDelimiter;

/// A line-oriented stream-processing engine: reads records from stdin or a
/// file, runs one or more `op1(arg) |> op2(arg) |> name(label)` pipelines
/// over each in parallel, and prints the results in input order.
#[derive(Parser, Debug)]
#[command(name = "patman", version, about)]
struct Cli {
    /// Pipeline source strings, e.g. `match(e(.*)) |> name(greeting)`.
    #[arg(required = true)]
    pipelines: Vec<String>,

    /// Read from this path instead of stdin.
    #[arg(long = "file", default_value = "")]
    file: String,

    /// Enable the index correlator on this named pipeline's label.
    #[arg(long = "index", default_value = "")]
    index: String,

    /// Output format: `stdout`, `csv`, `json`, or a `%name`-templated string.
    #[arg(long = "format", default_value = "stdout")]
    format: String,

    /// Scanner buffer size in MiB.
    #[arg(long = "mem", default_value_t = 10)]
    mem: usize,

    /// Worker count; 0 auto-detects the host CPU count.
    #[arg(long = "workers", default_value_t = 0)]
    workers: usize,

    /// Bounded job-queue size.
    #[arg(long = "queue", default_value_t = 10_000)]
    queue: usize,

    /// Use this string as the record delimiter instead of a newline.
    #[arg(long = "delimiter", default_value = "")]
    delimiter: String,

    /// Join all non-empty matches with this delimiter; overrides `--format`.
    #[arg(long = "join", default_value = "")]
    join: String,

    /// If > 0, buffer stdout and flush every N writes (and at exit).
    #[arg(long = "buffer", default_value_t = 0)]
    buffer: usize,

    /// Fail fast on the first operator error. Pass `--exit false` to skip
    /// bad records instead of aborting the process.
    #[arg(long = "exit", default_value_t = true, action = clap::ArgAction::Set)]
    exit: bool,
}

fn open_input(path: &str) -> io::Result<Box<dyn Read + Send>> {
    if path.is_empty() {
        Ok(Box::new(io::stdin()))
    } else {
        Ok(Box::new(File::open(path)?))
    }
}

fn record_delimiter(cli: &Cli) -> RecordDelimiter {
    if cli.delimiter.is_empty() {
        RecordDelimiter::Newline
    } else {
        RecordDelimiter::Custom(cli.delimiter.clone())
    }
}

fn build_config(cli: &Cli) -> EngineConfig {
    let mut config = EngineConfig::new();
    config
        .workers(cli.workers)
        .queue_size(cli.queue)
        .mem_buffer_mib(cli.mem)
        .exit_on_error(cli.exit)
        .format(OutputFormat::parse(&cli.format))
        .delimiter(record_delimiter(cli));

    config.index_label(if cli.index.is_empty() { None } else { Some(cli.index.clone()) });
    config.join_delimiter(if cli.join.is_empty() { None } else { Some(cli.join.clone()) });
    config.stdout_buffer_size(cli.buffer);

    config
}

fn run(cli: Cli) -> Result<(), ExitCode> {
    let config = build_config(&cli);
    let engine = Engine::new(config);

    let (pipelines, names) = parse_pipelines(&cli.pipelines, engine.registry()).map_err(|e| {
        eprintln!("{e}");
        ExitCode::FAILURE
    })?;

    let input = open_input(&cli.file).map_err(|e| {
        eprintln!("patman: failed to open input: {e}");
        ExitCode::FAILURE
    })?;

    let cancel = CancellationToken::new();
    let cancel_for_handler = cancel.clone();
    // best-effort: a platform that refuses to register a handler still runs
    // to completion, it just can't be interrupted early.
    let _ = ctrlc::set_handler(move || cancel_for_handler.cancel());

    let mem_bytes = cli.mem.max(1) * 1024 * 1024;
    let records = patman_core::record::RecordSplitter::new(input, record_delimiter(&cli), mem_bytes);

    let out: Box<dyn io::Write + Send> = Box::new(io::stdout());

    engine
        .run(&pipelines, &names, records, out, &cancel)
        .map_err(|e| {
            eprintln!("{e}");
            ExitCode::FAILURE
        })
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("patman").chain(args.iter().copied()))
    }

    #[test]
    fn defaults_to_stdin_and_newline_delimiter() {
        let cli = parse(&["uppercase()"]);
        assert_eq!(cli.file, "");
        assert_eq!(cli.delimiter, "");
        assert!(matches!(record_delimiter(&cli), RecordDelimiter::Newline));
        assert!(cli.exit);
    }

    #[test]
    fn custom_delimiter_is_threaded_through() {
        let cli = parse(&["--delimiter", ";", "uppercase()"]);
        assert!(matches!(record_delimiter(&cli), RecordDelimiter::Custom(d) if d == ";"));
    }

    #[test]
    fn join_flag_is_parsed_alongside_format() {
        let cli = parse(&["--format", "csv", "--join", "|", "match(a) |> name(x)"]);
        assert_eq!(cli.format, "csv");
        assert_eq!(cli.join, "|");
        // Engine::build_printer gives --join priority over --format; exercised
        // end-to-end in patman-core's engine tests.
        let _config = build_config(&cli);
    }

    #[test]
    fn exit_flag_can_be_disabled() {
        let cli = parse(&["--exit", "false", "uppercase()"]);
        assert!(!cli.exit);
    }

    #[test]
    fn accepts_multiple_positional_pipelines() {
        let cli = parse(&["uppercase()", "lowercase()"]);
        assert_eq!(cli.pipelines.len(), 2);
    }
}
