//! Folds one record through one pipeline's command chain.
//!
//! The Go original's `handle()` (`patman.go`) is recursive: it matches the
//! first transformer against the head of the command list and recurses on
//! the rest. `spec.md` §9 calls that out explicitly as something that
//! should be reexpressed iteratively here to avoid stack growth on long
//! pipelines — so this folds left with a plain loop instead.

use crate::operators::{OperatorContext, OperatorError, Registry};
use crate::parser::Command;

/// One pipeline's output for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub match_: String,
    pub name: String,
}

/// Run a single pipeline's commands over `record`. Returns `Ok(None)` when
/// the chain short-circuited on an empty intermediate result — that is not
/// an error, just "no output" for this pipeline on this record.
pub fn run_pipeline(
    record: &str,
    commands: &[Command],
    registry: &Registry,
    ctx: &OperatorContext,
) -> Result<Option<Row>, OperatorError> {
    let mut value = record.to_string();
    let mut name = String::new();

    for cmd in commands {
        if cmd.name == "name" || cmd.name == "n" {
            name = cmd.arg.clone();
            continue;
        }

        let entry = registry
            .get(&cmd.name)
            .ok_or_else(|| -> OperatorError { format!("unknown operator `{}`", cmd.name).into() })?;
        value = (entry.func)(&value, &cmd.arg, ctx)?;
        if value.is_empty() {
            return Ok(None);
        }
    }

    Ok(Some(Row { match_: value, name }))
}

/// Run every pipeline over `record`, independently. One outcome per
/// pipeline, in pipeline-declaration order — callers decide per their own
/// `exit_on_error` policy whether one pipeline's error aborts the others.
pub fn evaluate_record(
    record: &str,
    pipelines: &[Vec<Command>],
    registry: &Registry,
    ctx: &OperatorContext,
) -> Vec<Result<Option<Row>, OperatorError>> {
    pipelines
        .iter()
        .map(|commands| run_pipeline(record, commands, registry, ctx))
        .collect()
}

/// Stable-sort `rows` by their position in `pipeline_names`, pushing
/// unnamed rows (or rows whose name isn't in the configured ordering) to
/// the tail while preserving their relative order.
pub fn sort_rows(rows: &mut [Row], pipeline_names: &[String]) {
    rows.sort_by_key(|row| {
        pipeline_names
            .iter()
            .position(|n| n == &row.name)
            .unwrap_or(usize::MAX)
    });
}
