//! Bounded job queue, worker pool, and ordering collector.
//!
//! Grounded on `mdi::record::fanner::RecordFanner::fan`/`handle_output_records`:
//! a `crossbeam::scope` spawning N worker threads over a bounded
//! `crossbeam::channel`, a dedicated thread reading the source on the
//! caller's behalf, and a `BTreeMap`-buffered collector that releases
//! results strictly in sequence order. `spec.md` §4.5 names the same three
//! roles (dispatcher/workers/collector); this is that shape specialized to
//! patman's `Job`/`Row` types instead of the teacher's generic `I`/`O`.

use std::collections::BTreeMap;
use std::io;
use std::sync::Mutex;

use crossbeam::channel::bounded;

use crate::engine::CancellationToken;
use crate::error::PatmanError;
use crate::executor::{self, Row};
use crate::operators::{OperatorContext, OperatorError, Registry};
use crate::parser::Command;

struct Job {
    seq: u64,
    line: String,
}

struct RecordResult {
    seq: u64,
    rows: Vec<Row>,
    err: Option<OperatorError>,
}

/// Run the dispatcher/worker/collector pipeline to completion over
/// `records`, calling `emit` with each record's rows in strict input
/// order. Returns the first fatal error encountered: an I/O error from the
/// record source, or a per-operator error promoted to fatal by
/// `exit_on_error`.
#[allow(clippy::too_many_arguments)]
pub fn run(
    workers: usize,
    queue_size: usize,
    exit_on_error: bool,
    pipelines: &[Vec<Command>],
    pipeline_names: &[String],
    registry: &Registry,
    ctx: &OperatorContext,
    records: impl Iterator<Item = io::Result<Vec<u8>>> + Send,
    cancel: &CancellationToken,
    mut emit: impl FnMut(Vec<Row>) -> Result<(), PatmanError>,
) -> Result<(), PatmanError> {
    let (job_tx, job_rx) = bounded::<Job>(queue_size.max(1));
    let (res_tx, res_rx) = bounded::<RecordResult>(queue_size.max(1));
    let io_err: Mutex<Option<io::Error>> = Mutex::new(None);
    let io_err_ref = &io_err;

    crossbeam::scope(|scope| {
        for _ in 0..workers.max(1) {
            let job_rx = job_rx.clone();
            let res_tx = res_tx.clone();
            scope.spawn(move |_| {
                for job in job_rx.iter() {
                    let outcomes = executor::evaluate_record(&job.line, pipelines, registry, ctx);
                    let mut rows = Vec::new();
                    let mut err = None;
                    for outcome in outcomes {
                        match outcome {
                            Ok(Some(row)) => rows.push(row),
                            Ok(None) => {}
                            Err(e) => {
                                if exit_on_error {
                                    err = Some(e);
                                    break;
                                }
                            }
                        }
                    }
                    executor::sort_rows(&mut rows, pipeline_names);
                    let fatal = err.is_some();
                    if res_tx.send(RecordResult { seq: job.seq, rows, err }).is_err() {
                        break;
                    }
                    if fatal {
                        break;
                    }
                }
            });
        }
        drop(res_tx);

        // `move` so `job_tx` is owned here and dropped the moment this
        // thread's loop ends — that is what lets the workers' `job_rx.iter()`
        // observe disconnection and exit, which in turn drops every `res_tx`
        // clone and unblocks the collector below.
        scope.spawn(move |_| {
            let mut seq = 0u64;
            for rec in records {
                if cancel.is_cancelled() {
                    break;
                }
                match rec {
                    Ok(bytes) => {
                        let line = String::from_utf8_lossy(&bytes).into_owned();
                        if job_tx.send(Job { seq, line }).is_err() {
                            break;
                        }
                        seq += 1;
                    }
                    Err(e) => {
                        *io_err_ref.lock().expect("io_err mutex poisoned") = Some(e);
                        cancel.cancel();
                        break;
                    }
                }
            }
        });

        // collector: runs on the thread that entered this scope.
        let mut pending: BTreeMap<u64, RecordResult> = BTreeMap::new();
        let mut next_out = 0u64;
        let mut fatal: Option<PatmanError> = None;

        for result in res_rx.iter() {
            pending.insert(result.seq, result);
            while let Some(result) = pending.remove(&next_out) {
                next_out += 1;
                if fatal.is_some() {
                    continue; // keep draining the channel without emitting more
                }
                if let Some(source) = result.err {
                    fatal = Some(PatmanError::Operator { seq: result.seq, source });
                    cancel.cancel();
                    continue;
                }
                if let Err(e) = emit(result.rows) {
                    fatal = Some(e);
                    cancel.cancel();
                }
            }
        }

        if let Some(e) = io_err.lock().expect("io_err mutex poisoned").take() {
            return Err(PatmanError::Io(e));
        }
        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    })
    .expect("dispatch worker thread panicked")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn registry() -> Registry {
        Registry::default()
    }

    fn lines(input: &[&str]) -> Vec<io::Result<Vec<u8>>> {
        input.iter().map(|s| Ok(s.as_bytes().to_vec())).collect()
    }

    #[test]
    fn preserves_input_order_regardless_of_worker_count() {
        let reg = registry();
        let ctx = OperatorContext::new();
        let pipelines = vec![parse("uppercase()", |n| reg.is_known(n)).unwrap()];
        let input: Vec<String> = (0..200).map(|i| i.to_string()).collect();
        let records = lines(&input.iter().map(|s| s.as_str()).collect::<Vec<_>>());
        let cancel = CancellationToken::new();

        let out = Mutex::new(Vec::new());
        run(
            8,
            16,
            true,
            &pipelines,
            &[],
            &reg,
            &ctx,
            records.into_iter(),
            &cancel,
            |rows| {
                out.lock().unwrap().push(rows[0].match_.clone());
                Ok(())
            },
        )
        .unwrap();

        let got = out.into_inner().unwrap();
        assert_eq!(got, input);
    }

    #[test]
    fn exit_on_error_true_is_fatal_and_stops_emission() {
        let mut reg = registry();
        // an operator that always errors, to exercise the fatal path
        reg.register(
            "boom",
            None,
            std::sync::Arc::new(|_line: &str, _arg: &str, _ctx: &OperatorContext| -> crate::operators::OperatorResult {
                Err("boom".into())
            }),
            "",
            "",
        );
        let ctx = OperatorContext::new();
        let pipelines = vec![parse("boom()", |n| reg.is_known(n)).unwrap()];
        let records = lines(&["a", "b", "c"]);
        let cancel = CancellationToken::new();

        let result = run(1, 4, true, &pipelines, &[], &reg, &ctx, records.into_iter(), &cancel, |_rows| Ok(()));
        assert!(result.is_err());
    }

    #[test]
    fn exit_on_error_false_skips_failed_rows_and_continues() {
        let mut reg = registry();
        reg.register(
            "boom",
            None,
            std::sync::Arc::new(|_line: &str, _arg: &str, _ctx: &OperatorContext| -> crate::operators::OperatorResult {
                Err("boom".into())
            }),
            "",
            "",
        );
        let ctx = OperatorContext::new();
        let pipelines = vec![parse("boom()", |n| reg.is_known(n)).unwrap()];
        let records = lines(&["a", "b", "c"]);
        let cancel = CancellationToken::new();

        let emitted = Mutex::new(0usize);
        let result = run(1, 4, false, &pipelines, &[], &reg, &ctx, records.into_iter(), &cancel, |_rows| {
            *emitted.lock().unwrap() += 1;
            Ok(())
        });
        assert!(result.is_ok());
        // every row errored and was dropped, so rows are empty but emit is
        // still called once per record (with zero rows each time)
        assert_eq!(*emitted.lock().unwrap(), 3);
    }
}
