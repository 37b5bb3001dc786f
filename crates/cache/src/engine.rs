//! Synchronization of the snapshot with storage.

use crate::error::{ErrorKind, Result};
use crate::{DataDiff, Snapshot, VersionVector};
use arc_swap::ArcSwapOption;
use exn::OptionExt;
use std::sync::Arc;
use tally_storage::{Category, Document, FileGroup, FileNumber, StorageHandle};
use tracing::instrument;

/// Result of a synchronization that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A new snapshot was installed with these versions.
    Updated(VersionVector),
    /// Storage holds no database folder; the previous snapshot (if any) was kept.
    NoDatabase,
}

/// Holds the current [`Snapshot`] and refreshes it from storage.
///
/// Readers never wait on I/O: [`get_newer_data()`](Self::get_newer_data)
/// only loads the current snapshot pointer. A synchronization assembles the
/// next snapshot off to the side and installs it with a single atomic swap,
/// so readers see either all of the old snapshot or all of the new one.
///
/// Concurrent synchronizations are not serialized here; the last one to
/// finish wins. Callers that need at most one at a time must arrange that.
pub struct CacheEngine {
    storage: StorageHandle,
    /// `None` until the first successful synchronization.
    snapshot: ArcSwapOption<Snapshot>,
}

impl CacheEngine {
    pub fn new(storage: StorageHandle) -> Self {
        Self { storage, snapshot: ArcSwapOption::empty() }
    }

    pub fn is_initialized(&self) -> bool {
        self.snapshot.load().is_some()
    }

    /// Versions of the current snapshot, if there is one.
    pub fn versions(&self) -> Option<VersionVector> {
        self.snapshot.load().as_ref().map(|snapshot| snapshot.versions().clone())
    }

    /// The current snapshot, if there is one.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.load_full()
    }

    /// Refresh the snapshot, logging instead of returning failures.
    ///
    /// On failure the previous snapshot stays in place and keeps being served.
    pub async fn synchronize(&self) {
        match self.try_synchronize().await {
            Ok(SyncOutcome::Updated(versions)) => {
                tracing::info!(
                    database = %versions.database,
                    data = versions.data,
                    messages = versions.messages,
                    results = versions.results,
                    sponsors = versions.sponsors,
                    "Cache synchronization complete"
                );
            },
            Ok(SyncOutcome::NoDatabase) => {},
            Err(err) => tracing::error!(error = ?err, "Failed to synchronize cache"),
        }
    }

    /// Refresh the snapshot from storage, fetching only what changed.
    #[instrument(level = "debug", skip(self))]
    pub async fn try_synchronize(&self) -> Result<SyncOutcome> {
        tracing::debug!("Starting cache synchronization");

        let database = self.storage.latest_folder_name().await.map_err(|err| ErrorKind::storage(err, None))?;
        let Some(database) = database else {
            tracing::warn!("No database found");
            return Ok(SyncOutcome::NoDatabase);
        };
        tracing::debug!(%database, "Found database");

        let (data, messages, results, sponsors) = futures::try_join!(
            self.latest(&database, Category::Databases),
            self.latest(&database, Category::Messages),
            self.latest(&database, Category::Results),
            self.latest(&database, Category::Sponsors),
        )?;
        let versions = VersionVector { database, data, messages, results, sponsors };
        tracing::debug!(data, messages, results, sponsors, "Versions found");

        // Before the first synchronization this is the empty snapshot, which
        // matches no database folder and so fetches everything.
        let current = self.snapshot.load_full().unwrap_or_default();
        let (data, messages, results, sponsors) = futures::try_join!(
            self.object(&current, &versions, Category::Databases),
            self.list(&current, &versions, Category::Messages),
            self.list(&current, &versions, Category::Results),
            self.object(&current, &versions, Category::Sponsors),
        )?;

        let snapshot = Snapshot::new(versions.clone(), data, sponsors, messages, results);
        self.snapshot.store(Some(Arc::new(snapshot)));
        Ok(SyncOutcome::Updated(versions))
    }

    /// Everything in the current snapshot newer than `previous`.
    pub fn get_newer_data(&self, previous: &VersionVector) -> Result<DataDiff> {
        let snapshot = self.snapshot.load_full().ok_or_raise(|| ErrorKind::NotInitialized)?;
        Ok(DataDiff::between(snapshot, previous))
    }

    /// Latest file number of a category, `0` when it has no files.
    async fn latest(&self, database: &str, category: Category) -> Result<FileNumber> {
        let latest = self
            .storage
            .latest_file_number(database, category)
            .await
            .map_err(|err| ErrorKind::storage(err, None))?;
        Ok(latest.unwrap_or(0))
    }

    async fn object(&self, current: &Snapshot, versions: &VersionVector, category: Category) -> Result<Arc<Document>> {
        let database = versions.database.as_str();
        let number = versions.get(category);
        if current.versions().database == database && current.versions().get(category) == number {
            tracing::debug!(%database, %category, "Cache is already up to date");
            return Ok(Arc::clone(match category {
                Category::Sponsors => current.sponsors(),
                _ => current.data(),
            }));
        }
        if number == 0 {
            tracing::debug!(%database, %category, "No data yet");
            return Ok(Arc::default());
        }
        let document = self
            .storage
            .object_file(database, category, number)
            .await
            .map_err(|err| ErrorKind::storage(err, Some(category)))?;
        tracing::debug!(%database, %category, version = number, "Loaded object file");
        Ok(Arc::new(document))
    }

    async fn list(
        &self,
        current: &Snapshot,
        versions: &VersionVector,
        category: Category,
    ) -> Result<Arc<Vec<FileGroup>>> {
        let database = versions.database.as_str();
        let number = versions.get(category);
        let same_epoch = current.versions().database == database;
        let existing = match category {
            Category::Results => current.results(),
            _ => current.messages(),
        };
        if same_epoch && current.versions().get(category) == number {
            tracing::debug!(%database, %category, "Cache is already up to date");
            return Ok(Arc::clone(existing));
        }
        if number == 0 {
            tracing::debug!(%database, %category, "No data yet");
            return Ok(Arc::default());
        }

        // A new epoch starts over from its first file.
        let start = match same_epoch {
            true => current.versions().get(category),
            false => 0,
        };
        let fetched = self
            .storage
            .array_files(database, category, start, number)
            .await
            .map_err(|err| ErrorKind::storage(err, None))?;
        tracing::debug!(%database, %category, from = start, to = number, files = fetched.len(), "Loaded file range");

        let merged = match same_epoch {
            true => existing.iter().cloned().chain(fetched).collect::<Vec<_>>(),
            false => fetched,
        };
        if merged.len() != number as usize {
            tracing::warn!(
                %database,
                %category,
                version = number,
                files = merged.len(),
                "Version does not match number of merged files"
            );
        }
        Ok(Arc::new(merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::path::Path;
    use tally_storage::backend::{MockBackend, StorageBackend};
    use tally_storage::{VersionedStore, file_key};

    fn versions(database: &str, data: u32, messages: u32, results: u32, sponsors: u32) -> VersionVector {
        VersionVector { database: database.to_string(), data, messages, results, sponsors }
    }

    fn engine(backend: &Arc<MockBackend>) -> CacheEngine {
        CacheEngine::new(Arc::new(VersionedStore::new(backend.clone())))
    }

    async fn put(backend: &MockBackend, database: &str, category: Category, number: FileNumber, contents: Value) {
        let key = file_key(database, category, number);
        backend.write(&key, contents.to_string().as_bytes()).await.unwrap();
    }

    /// "20190001" with databases at 3, no messages, 4 results and sponsors at 2.
    async fn seeded() -> Arc<MockBackend> {
        let backend = Arc::new(MockBackend::default());
        for n in 1..=3 {
            put(&backend, "20190001", Category::Databases, n, json!({"some": format!("data v{n}")})).await;
        }
        put(&backend, "20190001", Category::Results, 1, json!([{"one": "one"}, {"two": "two"}])).await;
        put(&backend, "20190001", Category::Results, 2, json!([{"one": "one1"}])).await;
        put(&backend, "20190001", Category::Results, 3, json!([{"two": "two2"}])).await;
        put(&backend, "20190001", Category::Results, 4, json!([{"one": "one2"}])).await;
        put(&backend, "20190001", Category::Sponsors, 1, json!({"other": "old"})).await;
        put(&backend, "20190001", Category::Sponsors, 2, json!({"other": "data"})).await;
        backend.create_directory(Path::new("20190001/messages")).await.unwrap();
        backend
    }

    fn object(document: Option<&Document>) -> Option<Value> {
        document.cloned().map(Value::Object)
    }

    #[tokio::test]
    async fn test_uninitialized_rejects_queries() {
        let backend = Arc::new(MockBackend::default());
        let engine = engine(&backend);
        assert!(!engine.is_initialized());
        let err = engine.get_newer_data(&versions("something", 5, 3, 4, 8)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotInitialized));
    }

    #[tokio::test]
    async fn test_no_database_stays_uninitialized() {
        let backend = Arc::new(MockBackend::default());
        let engine = engine(&backend);
        assert_eq!(engine.try_synchronize().await.unwrap(), SyncOutcome::NoDatabase);
        engine.synchronize().await;
        assert!(!engine.is_initialized());
        assert!(engine.get_newer_data(&VersionVector::default()).is_err());
    }

    #[tokio::test]
    async fn test_database_without_data() {
        let backend = Arc::new(MockBackend::default());
        backend.create_directory(Path::new("20190001")).await.unwrap();
        let engine = engine(&backend);
        engine.synchronize().await;

        let diff = engine.get_newer_data(&versions("20180003", 9, 2, 15, 8)).unwrap();
        assert!(diff.is_full());
        assert_eq!(diff.versions(), &versions("20190001", 0, 0, 0, 0));
        assert!(diff.is_empty());
        assert_eq!(backend.reads(), 0);
    }

    #[tokio::test]
    async fn test_partial_data_for_older_versions() {
        let backend = seeded().await;
        let engine = engine(&backend);
        engine.synchronize().await;
        assert_eq!(engine.versions(), Some(versions("20190001", 3, 0, 4, 2)));

        let diff = engine.get_newer_data(&versions("20190001", 3, 0, 2, 1)).unwrap();
        assert_eq!(diff.versions(), &versions("20190001", 3, 0, 4, 2));
        assert_eq!(object(diff.data()), None);
        assert_eq!(object(diff.sponsors()), Some(json!({"other": "data"})));
        assert!(diff.messages().is_empty());
        assert_eq!(diff.results(), &[vec![json!({"two": "two2"})], vec![json!({"one": "one2"})]]);
    }

    #[tokio::test]
    async fn test_current_versions_return_nothing() {
        let backend = seeded().await;
        let engine = engine(&backend);
        engine.synchronize().await;

        let diff = engine.get_newer_data(&versions("20190001", 3, 0, 4, 2)).unwrap();
        assert_eq!(diff.versions(), &versions("20190001", 3, 0, 4, 2));
        assert!(diff.is_empty());
    }

    #[tokio::test]
    async fn test_old_database_returns_everything() {
        let backend = seeded().await;
        let engine = engine(&backend);
        engine.synchronize().await;

        let diff = engine.get_newer_data(&versions("20180004", 6, 3, 2, 8)).unwrap();
        assert!(diff.is_full());
        assert_eq!(object(diff.data()), Some(json!({"some": "data v3"})));
        assert_eq!(object(diff.sponsors()), Some(json!({"other": "data"})));
        assert_eq!(diff.results().len(), 4);
        assert_eq!(diff.flat_results().count(), 5);
    }

    #[tokio::test]
    async fn test_unchanged_storage_performs_no_reads() {
        let backend = seeded().await;
        let engine = engine(&backend);
        engine.synchronize().await;
        let before = engine.snapshot().unwrap();
        let reads = backend.reads();

        engine.synchronize().await;
        assert_eq!(backend.reads(), reads);
        let after = engine.snapshot().unwrap();
        assert!(Arc::ptr_eq(before.data(), after.data()));
        assert!(Arc::ptr_eq(before.results(), after.results()));
    }

    #[tokio::test]
    async fn test_updates_are_merged() {
        let backend = seeded().await;
        let engine = engine(&backend);
        engine.synchronize().await;
        let reads = backend.reads();

        put(&backend, "20190001", Category::Databases, 4, json!({"some": "new data"})).await;
        put(&backend, "20190001", Category::Messages, 1, json!([{"message": "one a"}, {"message": "one b"}])).await;
        put(&backend, "20190001", Category::Messages, 2, json!([{"message": "two"}])).await;
        put(&backend, "20190001", Category::Messages, 3, json!([{"message": "three"}])).await;
        engine.synchronize().await;
        // One databases file and three messages files; results and sponsors are reused.
        assert_eq!(backend.reads() - reads, 4);

        let diff = engine.get_newer_data(&versions("20180004", 6, 3, 2, 8)).unwrap();
        assert_eq!(diff.versions(), &versions("20190001", 4, 3, 4, 2));
        assert_eq!(object(diff.data()), Some(json!({"some": "new data"})));
        assert_eq!(
            diff.messages(),
            &[
                vec![json!({"message": "one a"}), json!({"message": "one b"})],
                vec![json!({"message": "two"})],
                vec![json!({"message": "three"})],
            ]
        );
        assert_eq!(diff.results().len(), 4);
        assert_eq!(object(diff.sponsors()), Some(json!({"other": "data"})));
    }

    #[tokio::test]
    async fn test_only_new_list_files_are_fetched() {
        let backend = Arc::new(MockBackend::default());
        put(&backend, "20190001", Category::Messages, 1, json!([{"m": "a"}])).await;
        let engine = engine(&backend);
        engine.synchronize().await;
        assert_eq!(backend.reads(), 1);

        put(&backend, "20190001", Category::Messages, 2, json!([{"m": "b"}])).await;
        put(&backend, "20190001", Category::Messages, 3, json!([{"m": "c"}, {"m": "d"}])).await;
        engine.synchronize().await;
        assert_eq!(backend.reads(), 3);

        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.versions().messages, 3);
        assert_eq!(
            snapshot.messages().as_slice(),
            &[vec![json!({"m": "a"})], vec![json!({"m": "b"})], vec![json!({"m": "c"}), json!({"m": "d"})]]
        );

        let diff = engine.get_newer_data(&versions("20190001", 0, 1, 0, 0)).unwrap();
        let flat: Vec<_> = diff.flat_messages().cloned().collect();
        assert_eq!(flat, vec![json!({"m": "b"}), json!({"m": "c"}), json!({"m": "d"})]);
        let diff = engine.get_newer_data(&versions("20190001", 0, 3, 0, 0)).unwrap();
        assert!(diff.messages().is_empty());
    }

    #[tokio::test]
    async fn test_new_database_discards_previous_lists() {
        let backend = seeded().await;
        let engine = engine(&backend);
        engine.synchronize().await;

        put(&backend, "20190002", Category::Databases, 1, json!({"some": "new data"})).await;
        put(&backend, "20190002", Category::Messages, 1, json!([{"message": "one a"}, {"message": "one b"}])).await;
        put(&backend, "20190002", Category::Results, 1, json!([{"some": "thing"}])).await;
        put(&backend, "20190002", Category::Sponsors, 1, json!({"some": "sponsors"})).await;
        engine.synchronize().await;

        let diff = engine.get_newer_data(&versions("20180004", 6, 3, 2, 8)).unwrap();
        assert_eq!(diff.versions(), &versions("20190002", 1, 1, 1, 1));
        assert_eq!(object(diff.data()), Some(json!({"some": "new data"})));
        assert_eq!(diff.messages(), &[vec![json!({"message": "one a"}), json!({"message": "one b"})]]);
        assert_eq!(diff.results(), &[vec![json!({"some": "thing"})]]);
        assert_eq!(object(diff.sponsors()), Some(json!({"some": "sponsors"})));

        // A client still on the previous epoch gets the new one in full.
        let diff = engine.get_newer_data(&versions("20190001", 3, 0, 4, 2)).unwrap();
        assert!(diff.is_full());
    }

    #[tokio::test]
    async fn test_failed_synchronization_keeps_snapshot() {
        let backend = seeded().await;
        let engine = engine(&backend);
        engine.synchronize().await;
        let before = engine.snapshot().unwrap();

        put(&backend, "20190001", Category::Results, 5, json!([{"late": true}])).await;
        backend.set_unavailable(true);
        let err = engine.try_synchronize().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::StorageUnavailable));
        engine.synchronize().await;

        assert!(Arc::ptr_eq(&before, &engine.snapshot().unwrap()));
        let diff = engine.get_newer_data(&versions("20190001", 3, 0, 4, 2)).unwrap();
        assert!(diff.results().is_empty());

        backend.set_unavailable(false);
        engine.synchronize().await;
        assert_eq!(engine.versions().map(|v| v.results), Some(5));
    }

    #[tokio::test]
    async fn test_held_diff_survives_synchronization() {
        let backend = seeded().await;
        let engine = engine(&backend);
        engine.synchronize().await;
        let held = engine.get_newer_data(&versions("20190001", 3, 0, 3, 2)).unwrap();

        put(&backend, "20190001", Category::Results, 5, json!([{"late": true}])).await;
        engine.synchronize().await;

        assert_eq!(held.versions(), &versions("20190001", 3, 0, 4, 2));
        assert_eq!(held.results(), &[vec![json!({"one": "one2"})]]);
        assert_eq!(engine.versions(), Some(versions("20190001", 3, 0, 5, 2)));
        let diff = engine.get_newer_data(&versions("20190001", 3, 0, 3, 2)).unwrap();
        assert_eq!(diff.results(), &[vec![json!({"one": "one2"})], vec![json!({"late": true})]]);
    }

    #[tokio::test]
    async fn test_overlapping_synchronizations_converge() {
        let backend = seeded().await;
        let engine = engine(&backend);
        engine.synchronize().await;

        put(&backend, "20190001", Category::Results, 5, json!([{"late": true}])).await;
        put(&backend, "20190001", Category::Messages, 1, json!([{"message": "hi"}])).await;
        let (first, second) = futures::join!(engine.try_synchronize(), engine.try_synchronize());

        let expected = versions("20190001", 3, 1, 5, 2);
        assert_eq!(first.unwrap(), SyncOutcome::Updated(expected.clone()));
        assert_eq!(second.unwrap(), SyncOutcome::Updated(expected.clone()));
        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.versions(), &expected);
        assert_eq!(snapshot.results().len(), 5);
        assert_eq!(snapshot.messages().as_slice(), &[vec![json!({"message": "hi"})]]);
    }

    #[tokio::test]
    async fn test_malformed_object_file_aborts_synchronization() {
        let backend = seeded().await;
        let engine = engine(&backend);
        engine.synchronize().await;

        backend.write(&file_key("20190001", Category::Sponsors, 3), b"{not json").await.unwrap();
        let err = engine.try_synchronize().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::MalformedObjectFile(Category::Sponsors)));
        assert_eq!(engine.versions(), Some(versions("20190001", 3, 0, 4, 2)));
    }

    #[tokio::test]
    async fn test_malformed_list_file_is_skipped() {
        let backend = seeded().await;
        backend.write(&file_key("20190001", Category::Messages, 1), b"[broken").await.unwrap();
        put(&backend, "20190001", Category::Messages, 2, json!([{"message": "ok"}])).await;
        let engine = engine(&backend);
        engine.synchronize().await;

        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.versions().messages, 2);
        assert_eq!(snapshot.messages().as_slice(), &[vec![json!({"message": "ok"})]]);
    }
}
