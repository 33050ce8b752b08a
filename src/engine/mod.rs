mod calendar;
mod error;
mod mutations;
mod queries;
mod stats;
mod status;
mod store;
mod validate;
#[cfg(test)]
mod tests;

pub use calendar::{bucket_by_week, week_start_for, WeekGrid, CALENDAR_HOURS};
pub use error::EngineError;
pub use stats::{aggregate_catalog, aggregate_resource, summarize, WEEKLY_CAPACITY_HOURS};
pub use status::{classify, filter_bookings, overview};
pub use store::{BookingStore, InMemoryStore, SeedError};
pub use validate::{
    find_conflict, validate, BookingRules, ErrorClass, ValidationError, MIN_DURATION_MINUTES,
};

use std::sync::{Arc, Mutex as StdMutex};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::limits::*;
use crate::model::*;

/// Source of "now". Injected so that rule evaluation is reproducible.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Local wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Local::now().naive_local()
    }
}

/// A clock that only moves when told to.
pub struct FixedClock {
    now: StdMutex<Timestamp>,
}

impl FixedClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: StdMutex::new(now),
        }
    }

    pub fn set(&self, now: Timestamp) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: chrono::TimeDelta) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

pub struct Engine {
    store: Arc<dyn BookingStore>,
    rules: BookingRules,
    /// Names that may be booked, in display order.
    catalog: Vec<String>,
    clock: Arc<dyn Clock>,
    /// Per-resource critical sections. A booking is validated and committed
    /// while its resource's lock is held.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn BookingStore>,
        rules: BookingRules,
        catalog: Vec<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            rules,
            catalog,
            clock,
            locks: DashMap::new(),
        }
    }

    pub fn rules(&self) -> &BookingRules {
        &self.rules
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub(super) fn check_resource(&self, resource: &str) -> Result<(), EngineError> {
        if resource.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("resource name too long"));
        }
        if !resource.is_empty() && !self.catalog.iter().any(|r| r == resource) {
            return Err(EngineError::UnknownResource(resource.to_string()));
        }
        Ok(())
    }

    pub(super) fn check_requester(&self, requested_by: &str) -> Result<(), EngineError> {
        if requested_by.len() > MAX_REQUESTER_LEN {
            return Err(EngineError::LimitExceeded("requester name too long"));
        }
        Ok(())
    }

    /// Acquire the locks of every named resource, in sorted order to prevent deadlocks.
    pub(super) async fn lock_resources<'a>(
        &self,
        resources: impl IntoIterator<Item = &'a str>,
    ) -> Vec<OwnedMutexGuard<()>> {
        let mut names: Vec<&str> = resources.into_iter().collect();
        names.sort_unstable();
        names.dedup();

        let mut guards = Vec::with_capacity(names.len());
        for name in names {
            let lock = self
                .locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value()
                .clone();
            guards.push(lock.lock_owned().await);
        }
        guards
    }
}
