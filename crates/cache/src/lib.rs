//! Version-tracking snapshot cache.
//!
//! The [`CacheEngine`] keeps one in-memory [`Snapshot`] of the whole dataset
//! stored by [`tally_storage`], refreshes it incrementally with
//! [`synchronize()`](CacheEngine::synchronize), and answers clients with the
//! [`DataDiff`] between their [`VersionVector`] and the snapshot.
//!
//! # Versions
//! - **database**: the epoch. Any client on an older epoch gets everything.
//! - **data**/**sponsors**: object categories. Either the whole document is
//!   newer than the client's version, or nothing is.
//! - **messages**/**results**: list categories. The version is the number
//!   of files merged so far, so the client receives the tail from there.

mod diff;
mod engine;
pub mod error;
mod snapshot;
mod versions;

pub use crate::diff::DataDiff;
pub use crate::engine::{CacheEngine, SyncOutcome};
pub use crate::snapshot::Snapshot;
pub use crate::versions::VersionVector;
