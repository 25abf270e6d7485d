//! Renders a record's rows to the active output format.
//!
//! `stdout`, `csv`, and `json` are grounded on `original_source/printers.go`
//! (`handleStdoutPrint`, `handleCsvPrint`, `handleJsonPrint`). `template`,
//! `join`, and `buffered-stdout` have no Go precedent — `spec.md` §4.7 adds
//! them, so they're authored fresh here in the same style: a `print`
//! method, an owned writer, and a fatal `PatmanError::Config` for the one
//! static misconfiguration each format can hit (csv's name-count check).

use std::io::Write;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::PatmanError;
use crate::executor::Row;

fn numeric_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+(\.\d+)?$").unwrap())
}

/// Parse a string already known to match `numeric_pattern()` into a JSON
/// number: an integer when it has no fractional part, a float otherwise.
fn parse_number(text: &str) -> Option<serde_json::Value> {
    if text.contains('.') {
        text.parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(serde_json::Value::Number)
    } else {
        text.parse::<u64>().ok().map(|n| serde_json::Value::Number(n.into()))
    }
}

/// Which output format the printer renders, or a custom `%name` template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFormat {
    Stdout,
    Csv,
    Json,
    Template(String),
}

impl OutputFormat {
    /// `spec.md` §6: `-format` is one of the three known names, or else
    /// treated as a template string.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "stdout" => OutputFormat::Stdout,
            "csv" => OutputFormat::Csv,
            "json" => OutputFormat::Json,
            other => OutputFormat::Template(other.to_string()),
        }
    }
}

pub trait Printer: Send {
    fn print(&mut self, rows: &[Row]) -> Result<(), PatmanError>;

    /// Flush any buffered output. Called once at shutdown.
    fn finish(&mut self) -> Result<(), PatmanError> {
        Ok(())
    }
}

pub struct StdoutPrinter {
    out: Box<dyn Write + Send>,
}

impl StdoutPrinter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out }
    }
}

impl Printer for StdoutPrinter {
    fn print(&mut self, rows: &[Row]) -> Result<(), PatmanError> {
        for (i, row) in rows.iter().enumerate() {
            write!(self.out, "{}", row.match_.trim())?;
            if i != rows.len() - 1 {
                write!(self.out, " ")?;
            }
        }
        if !rows.is_empty() {
            writeln!(self.out)?;
        }
        Ok(())
    }
}

pub struct JoinPrinter {
    out: Box<dyn Write + Send>,
    delimiter: String,
}

impl JoinPrinter {
    pub fn new(out: Box<dyn Write + Send>, delimiter: String) -> Self {
        Self { out, delimiter }
    }
}

impl Printer for JoinPrinter {
    fn print(&mut self, rows: &[Row]) -> Result<(), PatmanError> {
        if rows.is_empty() {
            return Ok(());
        }
        let joined = rows
            .iter()
            .map(|r| r.match_.trim())
            .collect::<Vec<_>>()
            .join(&self.delimiter);
        writeln!(self.out, "{joined}")?;
        Ok(())
    }
}

pub struct CsvPrinter {
    writer: csv::Writer<Box<dyn Write + Send>>,
    pipeline_names: Vec<String>,
    header_written: bool,
}

impl CsvPrinter {
    /// Fails (fatally, matching `handleCsvPrint`'s `os.Exit(1)`) unless
    /// every pipeline is named — a static fact knowable once at startup,
    /// since `pipeline_names`' length must equal the pipeline count.
    pub fn new(
        out: Box<dyn Write + Send>,
        pipeline_names: Vec<String>,
        pipeline_count: usize,
    ) -> Result<Self, PatmanError> {
        if pipeline_names.len() != pipeline_count {
            return Err(PatmanError::Config(
                "all pipelines must be named for csv output".to_string(),
            ));
        }
        Ok(Self { writer: csv::Writer::from_writer(out), pipeline_names, header_written: false })
    }
}

impl Printer for CsvPrinter {
    fn print(&mut self, rows: &[Row]) -> Result<(), PatmanError> {
        if !self.header_written {
            self.writer
                .write_record(&self.pipeline_names)
                .map_err(|e| PatmanError::Config(format!("csv header write failed: {e}")))?;
            self.header_written = true;
        }

        let mut record = vec![String::new(); self.pipeline_names.len()];
        let mut empty = true;
        for row in rows {
            if let Some(idx) = self.pipeline_names.iter().position(|n| n == &row.name) {
                record[idx] = row.match_.clone();
                empty = false;
            }
        }

        if !empty {
            self.writer
                .write_record(&record)
                .map_err(|e| PatmanError::Config(format!("csv write failed: {e}")))?;
            self.writer.flush()?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), PatmanError> {
        Ok(self.writer.flush()?)
    }
}

pub struct JsonPrinter {
    out: Box<dyn Write + Send>,
}

impl JsonPrinter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out }
    }
}

impl Printer for JsonPrinter {
    fn print(&mut self, rows: &[Row]) -> Result<(), PatmanError> {
        let mut map = serde_json::Map::new();
        for row in rows {
            if row.name.is_empty() {
                return Err(PatmanError::Config(
                    "cannot set json without named pipeline".to_string(),
                ));
            }
            let value = if numeric_pattern().is_match(&row.match_) {
                parse_number(&row.match_).unwrap_or_else(|| serde_json::Value::String(row.match_.clone()))
            } else {
                serde_json::Value::String(row.match_.clone())
            };
            map.insert(row.name.clone(), value);
        }
        if !map.is_empty() {
            writeln!(self.out, "{}", serde_json::Value::Object(map))?;
        }
        Ok(())
    }
}

pub struct TemplatePrinter {
    out: Box<dyn Write + Send>,
    template: String,
}

impl TemplatePrinter {
    pub fn new(out: Box<dyn Write + Send>, template: String) -> Self {
        Self { out, template }
    }
}

impl Printer for TemplatePrinter {
    fn print(&mut self, rows: &[Row]) -> Result<(), PatmanError> {
        let mut rendered = self.template.clone();
        for row in rows {
            if row.name.is_empty() {
                continue;
            }
            rendered = rendered.replace(&format!("%{}", row.name), &row.match_);
        }
        if rendered != self.template {
            writeln!(self.out, "{rendered}")?;
        }
        Ok(())
    }
}

pub struct BufferedStdoutPrinter {
    out: Box<dyn Write + Send>,
    buffer: Vec<u8>,
    flush_every: usize,
    pending_writes: usize,
}

impl BufferedStdoutPrinter {
    pub fn new(out: Box<dyn Write + Send>, flush_every: usize) -> Self {
        Self { out, buffer: Vec::new(), flush_every: flush_every.max(1), pending_writes: 0 }
    }

    fn flush_buffer(&mut self) -> Result<(), PatmanError> {
        self.out.write_all(&self.buffer)?;
        self.out.flush()?;
        self.buffer.clear();
        self.pending_writes = 0;
        Ok(())
    }
}

impl Printer for BufferedStdoutPrinter {
    fn print(&mut self, rows: &[Row]) -> Result<(), PatmanError> {
        for (i, row) in rows.iter().enumerate() {
            write!(self.buffer, "{}", row.match_.trim())?;
            if i != rows.len() - 1 {
                write!(self.buffer, " ")?;
            }
        }
        if !rows.is_empty() {
            writeln!(self.buffer)?;
        }

        self.pending_writes += 1;
        if self.pending_writes >= self.flush_every {
            self.flush_buffer()?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), PatmanError> {
        self.flush_buffer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn row(name: &str, value: &str) -> Row {
        Row { match_: value.to_string(), name: name.to_string() }
    }

    /// A `Write + Send + 'static` handle onto a buffer the test can still
    /// read after handing ownership of the other end to a printer.
    #[derive(Clone)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn new() -> Self {
            Self(Arc::new(Mutex::new(Vec::new())))
        }
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stdout_prints_space_joined_trimmed_matches() {
        let buf = SharedBuf::new();
        let mut p = StdoutPrinter::new(Box::new(buf.clone()));
        p.print(&[row("", " hello "), row("", "world")]).unwrap();
        assert_eq!(buf.text(), "hello world\n");
    }

    #[test]
    fn stdout_prints_nothing_for_empty_rows() {
        let buf = SharedBuf::new();
        let mut p = StdoutPrinter::new(Box::new(buf.clone()));
        p.print(&[]).unwrap();
        assert_eq!(buf.text(), "");
    }

    #[test]
    fn csv_rejects_unequal_names_and_pipeline_count() {
        let err = CsvPrinter::new(Box::new(SharedBuf::new()), vec!["a".to_string()], 2).unwrap_err();
        assert!(matches!(err, PatmanError::Config(_)));
    }

    #[test]
    fn csv_writes_header_then_named_columns() {
        let buf = SharedBuf::new();
        let mut p = CsvPrinter::new(Box::new(buf.clone()), vec!["id".into(), "amt".into()], 2).unwrap();
        p.print(&[row("id", "1"), row("amt", "10")]).unwrap();
        assert_eq!(buf.text(), "id,amt\n1,10\n");
    }

    #[test]
    fn csv_skips_entirely_empty_record() {
        let buf = SharedBuf::new();
        let mut p = CsvPrinter::new(Box::new(buf.clone()), vec!["id".into()], 1).unwrap();
        p.print(&[]).unwrap();
        assert_eq!(buf.text(), "id\n");
    }

    #[test]
    fn json_emits_numeric_and_string_values() {
        let buf = SharedBuf::new();
        let mut p = JsonPrinter::new(Box::new(buf.clone()));
        p.print(&[row("id", "1"), row("name", "bob")]).unwrap();
        assert_eq!(buf.text().trim(), r#"{"id":1,"name":"bob"}"#);
    }

    #[test]
    fn json_is_fatal_on_unnamed_row() {
        let mut p = JsonPrinter::new(Box::new(SharedBuf::new()));
        assert!(p.print(&[row("", "1")]).is_err());
    }

    #[test]
    fn json_skips_empty_object() {
        let buf = SharedBuf::new();
        let mut p = JsonPrinter::new(Box::new(buf.clone()));
        p.print(&[]).unwrap();
        assert_eq!(buf.text(), "");
    }

    #[test]
    fn template_substitutes_percent_names_and_skips_unchanged() {
        let buf = SharedBuf::new();
        let mut p = TemplatePrinter::new(Box::new(buf.clone()), "%id -> %amt".to_string());
        p.print(&[row("id", "1"), row("amt", "10")]).unwrap();
        p.print(&[]).unwrap();
        assert_eq!(buf.text(), "1 -> 10\n");
    }

    #[test]
    fn join_uses_custom_delimiter() {
        let buf = SharedBuf::new();
        let mut p = JoinPrinter::new(Box::new(buf.clone()), "|".to_string());
        p.print(&[row("", "a"), row("", "b")]).unwrap();
        assert_eq!(buf.text(), "a|b\n");
    }

    #[test]
    fn buffered_stdout_flushes_after_configured_write_count() {
        let buf = SharedBuf::new();
        let mut p = BufferedStdoutPrinter::new(Box::new(buf.clone()), 2);
        p.print(&[row("", "a")]).unwrap();
        // flush_every == 2, and only one print happened — nothing flushed yet.
        assert_eq!(buf.text(), "");
    }

    #[test]
    fn buffered_stdout_finish_flushes_remainder() {
        let buf = SharedBuf::new();
        let mut p = BufferedStdoutPrinter::new(Box::new(buf.clone()), 10);
        p.print(&[row("", "a")]).unwrap();
        p.finish().unwrap();
        assert_eq!(buf.text(), "a\n");
    }

    #[test]
    fn output_format_unknown_name_is_a_template() {
        assert_eq!(OutputFormat::parse("stdout"), OutputFormat::Stdout);
        assert_eq!(OutputFormat::parse("%a %b"), OutputFormat::Template("%a %b".to_string()));
    }
}
