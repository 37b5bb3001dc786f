use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tally_cache::CacheEngine;
use tally_storage::WritableHandle;
use tokio::time::Instant;

/// Shared state of every request handler.
#[derive(Clone)]
pub struct AppState {
    pub(crate) cache: Arc<CacheEngine>,
    pub(crate) storage: WritableHandle,
    pub(crate) password: Arc<str>,
    pub(crate) cooldown: Arc<Cooldown>,
}

impl AppState {
    pub fn new(
        cache: Arc<CacheEngine>,
        storage: WritableHandle,
        password: impl Into<Arc<str>>,
        cooldown: Duration,
    ) -> Self {
        Self { cache, storage, password: password.into(), cooldown: Arc::new(Cooldown::new(cooldown)) }
    }

    pub fn cache(&self) -> &Arc<CacheEngine> {
        &self.cache
    }
}

/// Lets at most one caller through per window.
///
/// The window starts at the last accepted call; rejected calls do not extend it.
#[derive(Debug)]
pub struct Cooldown {
    window: Duration,
    last: Mutex<Option<Instant>>,
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self { window, last: Mutex::new(None) }
    }

    /// Take the token if the window since the last accepted call is over.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    pub(crate) fn try_acquire_at(&self, now: Instant) -> bool {
        // The guarded value is a plain timestamp, always valid after a panic.
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(previous) if now.saturating_duration_since(previous) < self.window => false,
            _ => {
                *last = Some(now);
                true
            },
        }
    }
}
