//! What a client is missing, relative to a snapshot.

use crate::{Snapshot, VersionVector};
use std::sync::Arc;
use tally_storage::{Document, Entry, FileGroup};

/// The part of a [`Snapshot`] newer than a client's [`VersionVector`].
///
/// A read-only view: nothing is copied out of the snapshot, the diff only
/// records which parts of it the client should receive. Holding a diff keeps
/// its snapshot alive even if the cache has moved on in the meantime.
#[derive(Debug, Clone)]
pub struct DataDiff {
    snapshot: Arc<Snapshot>,
    full: bool,
    data: bool,
    sponsors: bool,
    messages_from: usize,
    results_from: usize,
}

impl DataDiff {
    pub(crate) fn between(snapshot: Arc<Snapshot>, previous: &VersionVector) -> Self {
        let current = snapshot.versions();
        if previous.is_older_epoch_than(current) {
            return Self { snapshot, full: true, data: true, sponsors: true, messages_from: 0, results_from: 0 };
        }
        // Objects are all or nothing; lists are sliced from the client's count.
        let data = previous.data < current.data;
        let sponsors = previous.sponsors < current.sponsors;
        let messages_from = (previous.messages as usize).min(snapshot.messages().len());
        let results_from = (previous.results as usize).min(snapshot.results().len());
        Self { snapshot, full: false, data, sponsors, messages_from, results_from }
    }

    /// The current versions. Clients must store these even when every data
    /// field is empty.
    pub fn versions(&self) -> &VersionVector {
        self.snapshot.versions()
    }

    /// Whether the client was on an older epoch and receives everything.
    pub fn is_full(&self) -> bool {
        self.full
    }

    /// The whole "databases" document, or `None` when the client is up to date.
    pub fn data(&self) -> Option<&Document> {
        self.data.then(|| self.snapshot.data().as_ref())
    }

    /// The whole "sponsors" document, or `None` when the client is up to date.
    pub fn sponsors(&self) -> Option<&Document> {
        self.sponsors.then(|| self.snapshot.sponsors().as_ref())
    }

    pub fn messages(&self) -> &[FileGroup] {
        &self.snapshot.messages()[self.messages_from..]
    }

    pub fn results(&self) -> &[FileGroup] {
        &self.snapshot.results()[self.results_from..]
    }

    /// New message entries, flattened across files.
    pub fn flat_messages(&self) -> impl Iterator<Item = &Entry> + '_ {
        self.messages().iter().flatten()
    }

    /// New result entries, flattened across files.
    pub fn flat_results(&self) -> impl Iterator<Item = &Entry> + '_ {
        self.results().iter().flatten()
    }

    /// Whether there is nothing at all for the client.
    pub fn is_empty(&self) -> bool {
        self.data().is_none_or(Document::is_empty)
            && self.sponsors().is_none_or(Document::is_empty)
            && self.messages().is_empty()
            && self.results().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::{Value, json};

    fn document(value: Value) -> Arc<Document> {
        match value {
            Value::Object(map) => Arc::new(map),
            _ => unreachable!("test documents are objects"),
        }
    }

    fn results() -> Vec<FileGroup> {
        vec![
            vec![json!({"one": "one"}), json!({"two": "two"})],
            vec![json!({"one": "one1"})],
            vec![json!({"two": "two2"})],
            vec![json!({"one": "one2"})],
        ]
    }

    fn versions(database: &str, data: u32, messages: u32, results: u32, sponsors: u32) -> VersionVector {
        VersionVector { database: database.to_string(), data, messages, results, sponsors }
    }

    fn snapshot() -> Arc<Snapshot> {
        Arc::new(Snapshot::new(
            versions("20190001", 3, 0, 4, 2),
            document(json!({"some": "data"})),
            document(json!({"other": "data"})),
            Arc::new(Vec::new()),
            Arc::new(results()),
        ))
    }

    #[test]
    fn test_current_versions_yield_nothing() {
        let diff = DataDiff::between(snapshot(), &versions("20190001", 3, 0, 4, 2));
        assert_eq!(diff.versions(), &versions("20190001", 3, 0, 4, 2));
        assert!(!diff.is_full());
        assert!(diff.data().is_none());
        assert!(diff.sponsors().is_none());
        assert!(diff.messages().is_empty());
        assert!(diff.results().is_empty());
        assert!(diff.is_empty());
    }

    #[test]
    fn test_partial_diff() {
        let diff = DataDiff::between(snapshot(), &versions("20190001", 3, 0, 2, 1));
        assert_eq!(diff.versions(), &versions("20190001", 3, 0, 4, 2));
        assert!(diff.data().is_none());
        assert_eq!(diff.sponsors().cloned().map(Value::Object), Some(json!({"other": "data"})));
        assert!(diff.messages().is_empty());
        assert_eq!(diff.results(), &results()[2..]);
        let flat: Vec<_> = diff.flat_results().cloned().collect();
        assert_eq!(flat, vec![json!({"two": "two2"}), json!({"one": "one2"})]);
    }

    #[test]
    fn test_older_epoch_returns_everything() {
        let diff = DataDiff::between(snapshot(), &versions("20180004", 6, 3, 2, 8));
        assert!(diff.is_full());
        assert_eq!(diff.versions(), &versions("20190001", 3, 0, 4, 2));
        assert_eq!(diff.data().cloned().map(Value::Object), Some(json!({"some": "data"})));
        assert_eq!(diff.sponsors().cloned().map(Value::Object), Some(json!({"other": "data"})));
        assert_eq!(diff.results(), results().as_slice());
        assert_eq!(diff.flat_results().count(), 5);
    }

    #[rstest]
    #[case(0, &[0, 1, 2, 3])]
    #[case(1, &[1, 2, 3])]
    #[case(3, &[3])]
    #[case(4, &[])]
    #[case(9, &[])]
    fn test_list_diff_is_tail(#[case] previous: u32, #[case] expected: &[usize]) {
        let diff = DataDiff::between(snapshot(), &versions("20190001", 3, 0, previous, 2));
        let expected: Vec<FileGroup> = expected.iter().map(|i| results()[*i].clone()).collect();
        assert_eq!(diff.results(), expected.as_slice());
    }

    #[rstest]
    #[case(0, true)]
    #[case(2, true)]
    #[case(3, false)]
    #[case(7, false)]
    fn test_object_diff_is_all_or_nothing(#[case] previous: u32, #[case] included: bool) {
        let diff = DataDiff::between(snapshot(), &versions("20190001", previous, 0, 4, 2));
        assert_eq!(diff.data().is_some(), included);
    }

    #[test]
    fn test_newer_sounding_epoch_still_diffs_per_field() {
        let diff = DataDiff::between(snapshot(), &versions("20190002", 0, 0, 0, 0));
        assert!(!diff.is_full());
        assert!(diff.data().is_some());
        assert_eq!(diff.results().len(), 4);
    }
}
