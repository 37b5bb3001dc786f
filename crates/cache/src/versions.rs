//! The version vector clients and the cache use to describe what they have seen.

use serde::{Deserialize, Serialize};
use tally_storage::{Category, FileNumber};

/// How much of the dataset a client (or the cache itself) has seen.
///
/// `database` is the epoch: an opaque folder name (in practice `YYYY` plus a
/// two digit sequence) ordered lexicographically. The counters are the
/// latest file number per object category, and the number of files merged
/// so far per list category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionVector {
    pub database: String,
    pub data: FileNumber,
    pub messages: FileNumber,
    pub results: FileNumber,
    pub sponsors: FileNumber,
}

impl VersionVector {
    /// Counter recorded for a category.
    pub fn get(&self, category: Category) -> FileNumber {
        match category {
            Category::Databases => self.data,
            Category::Messages => self.messages,
            Category::Results => self.results,
            Category::Sponsors => self.sponsors,
        }
    }

    /// Whether this vector belongs to an epoch older than (or unknown to)
    /// `other`'s, in which case a diff is pointless.
    ///
    /// ```
    /// use tally_cache::VersionVector;
    ///
    /// let client = VersionVector { database: "20180004".to_string(), ..Default::default() };
    /// let current = VersionVector { database: "20190001".to_string(), ..Default::default() };
    /// assert!(client.is_older_epoch_than(&current));
    /// assert!(!current.is_older_epoch_than(&client));
    /// ```
    pub fn is_older_epoch_than(&self, other: &Self) -> bool {
        self.database < other.database
    }
}
