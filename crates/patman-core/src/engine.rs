//! Wires the lexer/parser output, the operator registry, the dispatcher,
//! the index correlator, and a printer together behind one configuration
//! type.
//!
//! Grounded on `mdi::workflow::Log` for the stderr diagnostics and on the
//! chained-builder style of `mdi::record::fanner::RecordFanner` /
//! `mdi_streamer::RecordStreamer` (`.ordered()`, `.has_headers()`, ...) for
//! `EngineConfig`. `CancellationToken` takes the name and shape of
//! `tokio_util::sync::CancellationToken` but is a bare `Arc<AtomicBool>`:
//! the dispatcher/collector here poll it between records rather than
//! blocking on it, so there is no wait to wake with a `Condvar` (see
//! DESIGN.md).

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use time::OffsetDateTime;

use crate::dispatch;
use crate::error::PatmanError;
use crate::index::IndexCorrelator;
use crate::operators::{self, OperatorContext, Registry};
use crate::parser::{self, Command};
use crate::printer::{
    BufferedStdoutPrinter, CsvPrinter, JoinPrinter, JsonPrinter, OutputFormat, Printer,
    StdoutPrinter, TemplatePrinter,
};
use crate::record::RecordDelimiter;

/// A cooperative, pollable stop signal shared across the dispatcher,
/// workers, and collector. Cancelling is idempotent.
#[derive(Clone)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Timestamped diagnostics to stderr. Named `log` by convention.
pub struct Log {
    tool: String,
}

impl Log {
    pub fn new(tool: &str) -> Self {
        Self { tool: tool.to_string() }
    }

    pub fn print(&self, msg: &str) {
        eprintln!("{}: {} ({})", self.tool, msg, OffsetDateTime::now_utc());
    }

    pub fn initializing(&self) {
        eprintln!("\n{}: {} ({})", self.tool, "initializing", OffsetDateTime::now_utc());
    }
}

/// Records-read / rows-emitted tallies, printed once at shutdown.
/// A lighter-weight cousin of `mdi::workflow::Counters`: patman has no
/// keyed breakdowns to track, just the two process-wide totals.
#[derive(Default)]
pub struct Counters {
    records_read: AtomicU64,
    rows_emitted: AtomicU64,
}

impl Counters {
    fn record(&self) {
        self.records_read.fetch_add(1, Ordering::Relaxed);
    }

    fn emit(&self, n: u64) {
        self.rows_emitted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn summary(&self) -> String {
        format!(
            "{} records read, {} rows emitted",
            self.records_read.load(Ordering::Relaxed),
            self.rows_emitted.load(Ordering::Relaxed)
        )
    }
}

/// Typed, assemble-once-then-immutable configuration for an [`Engine`].
pub struct EngineConfig {
    workers: usize,
    queue_size: usize,
    mem_buffer_mib: usize,
    delimiter: RecordDelimiter,
    format: OutputFormat,
    index_label: Option<String>,
    exit_on_error: bool,
    join_delimiter: Option<String>,
    stdout_buffer_size: usize,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            workers: 0,
            queue_size: 10_000,
            mem_buffer_mib: 10,
            delimiter: RecordDelimiter::Newline,
            format: OutputFormat::Stdout,
            index_label: None,
            exit_on_error: true,
            join_delimiter: None,
            stdout_buffer_size: 0,
        }
    }

    /// 0 means auto-detect via `num_cpus::get`, resolved in [`Engine::new`].
    pub fn workers(&mut self, workers: usize) -> &mut Self {
        self.workers = workers;
        self
    }

    pub fn queue_size(&mut self, queue_size: usize) -> &mut Self {
        self.queue_size = queue_size;
        self
    }

    pub fn mem_buffer_mib(&mut self, mem_buffer_mib: usize) -> &mut Self {
        self.mem_buffer_mib = mem_buffer_mib;
        self
    }

    pub fn delimiter(&mut self, delimiter: RecordDelimiter) -> &mut Self {
        self.delimiter = delimiter;
        self
    }

    pub fn format(&mut self, format: OutputFormat) -> &mut Self {
        self.format = format;
        self
    }

    pub fn index_label(&mut self, label: Option<String>) -> &mut Self {
        self.index_label = label;
        self
    }

    pub fn exit_on_error(&mut self, exit_on_error: bool) -> &mut Self {
        self.exit_on_error = exit_on_error;
        self
    }

    pub fn join_delimiter(&mut self, delimiter: Option<String>) -> &mut Self {
        self.join_delimiter = delimiter;
        self
    }

    pub fn stdout_buffer_size(&mut self, size: usize) -> &mut Self {
        self.stdout_buffer_size = size;
        self
    }

    fn resolved_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse every positional pipeline source string against `registry`,
/// returning each pipeline's commands alongside the label given to it by
/// its `name`/`n` command (empty string if unnamed).
pub fn parse_pipelines(
    sources: &[String],
    registry: &Registry,
) -> Result<(Vec<Vec<Command>>, Vec<String>), PatmanError> {
    let mut pipelines = Vec::with_capacity(sources.len());
    let mut names = Vec::with_capacity(sources.len());
    for source in sources {
        let commands = parser::parse(source, |name| registry.is_known(name))
            .map_err(PatmanError::Syntax)?;
        let name = commands
            .iter()
            .find(|c| c.name == "name" || c.name == "n")
            .map(|c| c.arg.clone())
            .unwrap_or_default();
        names.push(name);
        pipelines.push(commands);
    }
    Ok((pipelines, names))
}

/// The assembled engine: owns the registry, the shared operator context,
/// configuration, logging, and counters. Built once per process.
pub struct Engine {
    config: EngineConfig,
    registry: Registry,
    ctx: OperatorContext,
    log: Log,
    counters: Counters,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let log = Log::new("patman");
        log.initializing();
        Self { config, registry: Registry::default(), ctx: OperatorContext::new(), log, counters: Counters::default() }
    }

    fn build_printer(&self, out: Box<dyn Write + Send>, pipeline_names: &[String]) -> Result<Box<dyn Printer>, PatmanError> {
        if let Some(delim) = &self.config.join_delimiter {
            return Ok(Box::new(JoinPrinter::new(out, delim.clone())));
        }
        if self.config.stdout_buffer_size > 0 {
            return Ok(Box::new(BufferedStdoutPrinter::new(out, self.config.stdout_buffer_size)));
        }
        match &self.config.format {
            OutputFormat::Stdout => Ok(Box::new(StdoutPrinter::new(out))),
            OutputFormat::Csv => Ok(Box::new(CsvPrinter::new(out, pipeline_names.to_vec(), pipeline_names.len())?)),
            OutputFormat::Json => Ok(Box::new(JsonPrinter::new(out))),
            OutputFormat::Template(t) => Ok(Box::new(TemplatePrinter::new(out, t.clone()))),
        }
    }

    /// Drive records → dispatch → (optional index correlation) → printer
    /// to completion, or until `cancel` is observed. `out` receives the
    /// rendered output; pass `io::stdout()` wrapped in a `Box` for normal
    /// CLI use.
    pub fn run(
        &self,
        pipelines: &[Vec<Command>],
        pipeline_names: &[String],
        records: impl Iterator<Item = io::Result<Vec<u8>>> + Send,
        out: Box<dyn Write + Send>,
        cancel: &CancellationToken,
    ) -> Result<(), PatmanError> {
        if operators::uses_js(pipelines) && self.config.resolved_workers() > 1 {
            let err = PatmanError::Config("the js operator requires workers = 1".to_string());
            self.log.print(&err.to_string());
            return Err(err);
        }

        let mut index = match &self.config.index_label {
            Some(label) => {
                if !pipeline_names.iter().any(|n| n == label) {
                    let err = PatmanError::Config(format!(
                        "--index label `{label}` does not match any named pipeline"
                    ));
                    self.log.print(&err.to_string());
                    return Err(err);
                }
                Some(IndexCorrelator::new(label.clone(), pipelines.len()))
            }
            None => None,
        };

        let mut printer = self.build_printer(out, pipeline_names)?;

        let result = dispatch::run(
            self.config.resolved_workers(),
            self.config.queue_size,
            self.config.exit_on_error,
            pipelines,
            pipeline_names,
            &self.registry,
            &self.ctx,
            records,
            cancel,
            |rows| {
                self.counters.record();
                let combined = match &mut index {
                    Some(correlator) => correlator.ingest(rows),
                    None => Some(rows),
                };
                if let Some(rows) = combined {
                    self.counters.emit(rows.len() as u64);
                    printer.print(&rows)?;
                }
                Ok(())
            },
        );

        printer.finish()?;

        match &result {
            Ok(()) => self.log.print(&format!("shutdown complete: {}", self.counters.summary())),
            Err(e) => self.log.print(&format!("fatal: {e}")),
        }
        result
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
