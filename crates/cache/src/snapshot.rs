//! The single, immutable in-memory view of the dataset.

use crate::VersionVector;
use std::sync::Arc;
use tally_storage::{Document, FileGroup};

/// One complete, internally consistent copy of the dataset plus the versions
/// it represents.
///
/// Snapshots are never mutated once built. Each category payload sits behind
/// its own [`Arc`] so that a synchronization which finds a category
/// unchanged can carry it into the next snapshot without copying it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    versions: VersionVector,
    data: Arc<Document>,
    sponsors: Arc<Document>,
    messages: Arc<Vec<FileGroup>>,
    results: Arc<Vec<FileGroup>>,
}

impl Snapshot {
    pub(crate) fn new(
        versions: VersionVector,
        data: Arc<Document>,
        sponsors: Arc<Document>,
        messages: Arc<Vec<FileGroup>>,
        results: Arc<Vec<FileGroup>>,
    ) -> Self {
        Self { versions, data, sponsors, messages, results }
    }

    pub fn versions(&self) -> &VersionVector {
        &self.versions
    }

    /// Contents of the latest "databases" file.
    pub fn data(&self) -> &Arc<Document> {
        &self.data
    }

    pub fn sponsors(&self) -> &Arc<Document> {
        &self.sponsors
    }

    /// One group per merged "messages" file, in upload order.
    pub fn messages(&self) -> &Arc<Vec<FileGroup>> {
        &self.messages
    }

    /// One group per merged "results" file, in upload order.
    pub fn results(&self) -> &Arc<Vec<FileGroup>> {
        &self.results
    }
}
