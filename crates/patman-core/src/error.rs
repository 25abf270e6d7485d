//! Fatal error taxonomy for the patman engine.
//!
//! Per-record operator failures do *not* go through this type — a worker
//! reports those as `Result<_, Box<dyn Error + Send + Sync>>` so that
//! `exit_on_error = false` can skip a single row without tearing down the
//! process. `PatmanError` is reserved for conditions that are fatal by
//! construction: a bad DSL string, a broken regex, an I/O failure, or a
//! startup configuration mistake.

use std::error::Error as StdError;
use thiserror::Error;

/// Fatal error produced while parsing a pipeline or running the engine.
#[derive(Error, Debug)]
pub enum PatmanError {
    /// A pipeline string failed to lex or parse. The message is the fully
    /// rendered caret diagnostic produced by [`crate::parser::syntax_error`].
    #[error("{0}")]
    Syntax(String),

    /// An I/O failure reading the input stream or writing output.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A startup configuration mistake: an `--index` label with no matching
    /// named pipeline, an unnamed pipeline under the csv/json printer, a
    /// `js` operator requested with more than one worker, or an invalid
    /// regex pattern.
    #[error("configuration error: {0}")]
    Config(String),

    /// A per-record operator failure that was promoted to fatal because
    /// `exit_on_error` is set.
    #[error("operator error at record {seq}: {source}")]
    Operator {
        seq: u64,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

pub type Result<T> = std::result::Result<T, PatmanError>;
