use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use ulid::{Generator, Ulid};

use crate::limits::MAX_BOOKINGS;
use crate::model::*;

use super::EngineError;

/// Owner of the booking records. The engine only ever sees snapshots from
/// `list` and hands back new or removed records through this contract.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Every booking, in insertion order.
    async fn list(&self) -> Result<Vec<Booking>, EngineError>;

    async fn get(&self, id: Ulid) -> Result<Option<Booking>, EngineError>;

    /// Assign an id, stamp `created_at`, append.
    async fn insert(&self, booking: NewBooking, created_at: Timestamp) -> Result<Booking, EngineError>;

    /// Returns whether anything was removed. Absent ids are not an error.
    async fn delete(&self, id: Ulid) -> Result<bool, EngineError>;

    async fn update(&self, id: Ulid, patch: &BookingPatch) -> Result<Booking, EngineError>;
}

/// A seed file that cannot be loaded. Fixing it means editing the file, not retrying.
#[derive(Debug)]
pub enum SeedError {
    Malformed(serde_json::Error),
    TooManyBookings(usize),
}

impl std::fmt::Display for SeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeedError::Malformed(e) => write!(f, "malformed booking seed: {e}"),
            SeedError::TooManyBookings(n) => {
                write!(f, "booking seed has {n} records, limit is {MAX_BOOKINGS}")
            }
        }
    }
}

impl std::error::Error for SeedError {}

struct Entry {
    seq: u64,
    booking: Booking,
}

pub struct InMemoryStore {
    bookings: DashMap<Ulid, Entry>,
    ids: Mutex<Generator>,
    /// Insertion counter. Seeded records keep their own ids, so ids alone
    /// don't give load order.
    next_seq: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            bookings: DashMap::new(),
            ids: Mutex::new(Generator::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Load existing records as-is, keeping their ids.
    pub fn with_bookings(bookings: impl IntoIterator<Item = Booking>) -> Self {
        let store = Self::new();
        for b in bookings {
            store.append(b);
        }
        store
    }

    /// Load a JSON array of bookings in the dashboard's record shape.
    pub fn from_json(json: &str) -> Result<Self, SeedError> {
        let bookings: Vec<Booking> = serde_json::from_str(json).map_err(SeedError::Malformed)?;
        if bookings.len() > MAX_BOOKINGS {
            return Err(SeedError::TooManyBookings(bookings.len()));
        }
        Ok(Self::with_bookings(bookings))
    }

    /// The sample week of January 2024 the dashboard ships with.
    pub fn demo() -> Self {
        const DEMO: [(&str, &str, &str, &str, &str); 5] = [
            ("Conference Room A", "2024-01-15T14:00", "2024-01-15T15:30", "John Doe", "2024-01-14T10:00:00"),
            ("Projector", "2024-01-15T10:00", "2024-01-15T11:00", "Jane Smith", "2024-01-14T09:00:00"),
            ("Meeting Room B", "2024-01-16T09:00", "2024-01-16T10:30", "Bob Johnson", "2024-01-14T11:00:00"),
            ("Conference Room A", "2024-01-17T11:00", "2024-01-17T12:00", "Alice Wilson", "2024-01-14T12:00:00"),
            ("Presentation Equipment", "2024-01-18T15:00", "2024-01-18T16:30", "Mike Davis", "2024-01-14T13:00:00"),
        ];

        let store = Self::new();
        for (resource, start, end, who, created) in DEMO {
            let (Some(start_time), Some(end_time), Some(created_at)) =
                (parse_timestamp(start), parse_timestamp(end), parse_timestamp(created))
            else {
                continue;
            };
            let Ok(id) = store.next_id() else { continue };
            store.append(Booking {
                id,
                resource: resource.to_string(),
                start_time,
                end_time,
                requested_by: who.to_string(),
                created_at,
            });
        }
        store
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    fn append(&self, booking: Booking) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.bookings.insert(booking.id, Entry { seq, booking });
    }

    fn next_id(&self) -> Result<Ulid, EngineError> {
        let mut ids = self
            .ids
            .lock()
            .map_err(|_| EngineError::Store("id generator poisoned".into()))?;
        ids.generate()
            .map_err(|e| EngineError::Store(format!("id generator: {e}")))
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn list(&self) -> Result<Vec<Booking>, EngineError> {
        let mut all: Vec<(u64, Booking)> = self
            .bookings
            .iter()
            .map(|e| (e.seq, e.booking.clone()))
            .collect();
        all.sort_by_key(|(seq, _)| *seq);
        Ok(all.into_iter().map(|(_, b)| b).collect())
    }

    async fn get(&self, id: Ulid) -> Result<Option<Booking>, EngineError> {
        Ok(self.bookings.get(&id).map(|e| e.booking.clone()))
    }

    async fn insert(&self, booking: NewBooking, created_at: Timestamp) -> Result<Booking, EngineError> {
        if self.bookings.len() >= MAX_BOOKINGS {
            return Err(EngineError::LimitExceeded("too many bookings"));
        }
        let stored = Booking {
            id: self.next_id()?,
            resource: booking.resource,
            start_time: booking.span.start,
            end_time: booking.span.end,
            requested_by: booking.requested_by,
            created_at,
        };
        self.append(stored.clone());
        Ok(stored)
    }

    async fn delete(&self, id: Ulid) -> Result<bool, EngineError> {
        Ok(self.bookings.remove(&id).is_some())
    }

    async fn update(&self, id: Ulid, patch: &BookingPatch) -> Result<Booking, EngineError> {
        let mut entry = self.bookings.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        let updated = patch.apply(&entry.booking);
        entry.booking = updated.clone();
        Ok(updated)
    }
}
