//! Cross-pipeline correlation buffer keyed by a chosen pipeline's value.
//!
//! Grounded directly on `original_source/buffer.go`: a global
//! `map[string][][]string` keyed by the index pipeline's match, appended to
//! by every other pipeline's row, and drained into a combined record once
//! every non-index pipeline has contributed for that key. The buffer grows
//! unboundedly by design (`spec.md` §4.6, §9) — this is a documented
//! limitation, not a bug to be fixed here.

use std::collections::HashMap;

use crate::executor::Row;

pub struct IndexCorrelator {
    label: String,
    pipeline_count: usize,
    state: HashMap<String, Vec<Row>>,
}

impl IndexCorrelator {
    pub fn new(label: String, pipeline_count: usize) -> Self {
        Self { label, pipeline_count, state: HashMap::new() }
    }

    /// Ingest one record's rows. Returns `Some(combined)` the moment the
    /// index key's group first closes (every non-index pipeline has
    /// contributed at least once for that key); otherwise `None`. Per
    /// `spec.md` §4.6/§9 and `original_source/buffer.go`, the group is never
    /// removed from `state` once it closes — the buffer is not garbage
    /// collected, and a later record sharing the same key only keeps
    /// growing the already-closed group without emitting again.
    pub fn ingest(&mut self, rows: Vec<Row>) -> Option<Vec<Row>> {
        let key = rows
            .iter()
            .find(|r| r.name == self.label)
            .map(|r| r.match_.clone())
            .filter(|k| !k.is_empty())?;

        for row in rows.into_iter().filter(|r| r.name != self.label) {
            self.state.entry(key.clone()).or_default().push(row);
        }

        let group = self.state.get(&key)?;
        if group.len() != self.pipeline_count.saturating_sub(1) {
            return None;
        }

        let mut combined = vec![Row { match_: key.clone(), name: self.label.clone() }];
        combined.extend(group.clone());
        Some(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, value: &str) -> Row {
        Row { match_: value.to_string(), name: name.to_string() }
    }

    #[test]
    fn drops_records_with_no_index_row() {
        let mut corr = IndexCorrelator::new("id".into(), 2);
        assert!(corr.ingest(vec![row("amt", "10")]).is_none());
    }

    #[test]
    fn emits_once_all_non_index_pipelines_have_contributed() {
        let mut corr = IndexCorrelator::new("id".into(), 2);
        assert!(corr.ingest(vec![row("id", "1")]).is_none());
        let combined = corr.ingest(vec![row("id", "1"), row("amt", "10")]).unwrap();
        assert_eq!(combined, vec![row("id", "1"), row("amt", "10")]);
    }

    #[test]
    fn group_emits_once_and_the_buffer_is_never_evicted() {
        let mut corr = IndexCorrelator::new("id".into(), 2);
        let combined = corr.ingest(vec![row("id", "1"), row("amt", "10")]).unwrap();
        assert_eq!(combined, vec![row("id", "1"), row("amt", "10")]);

        // the key's group already closed; it is kept (not removed), so later
        // records for the same key keep accumulating without re-emitting.
        assert!(corr.ingest(vec![row("id", "1"), row("amt", "11")]).is_none());
        assert_eq!(
            corr.state.get("1").unwrap(),
            &vec![row("amt", "10"), row("amt", "11")]
        );
    }

    #[test]
    fn distinct_keys_are_buffered_independently() {
        let mut corr = IndexCorrelator::new("id".into(), 2);
        assert!(corr.ingest(vec![row("id", "1")]).is_none());
        assert!(corr.ingest(vec![row("id", "2")]).is_none());
        let combined = corr.ingest(vec![row("id", "2"), row("amt", "20")]).unwrap();
        assert_eq!(combined, vec![row("id", "2"), row("amt", "20")]);
    }
}
