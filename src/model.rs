use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Timezone-naive local wall-clock time. The only time type.
pub type Timestamp = NaiveDateTime;

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Parse the timestamp shapes a booking form or SQL literal may carry.
/// A trailing `Z` is accepted and ignored; the value stays local.
pub fn parse_timestamp(s: &str) -> Option<Timestamp> {
    let s = s.trim();
    let s = s.strip_suffix('Z').unwrap_or(s);
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S").to_string()
}

mod timestamp_format {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Timestamp;

    pub fn serialize<S: Serializer>(ts: &Timestamp, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Timestamp, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_timestamp(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("bad timestamp: {raw}")))
    }
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Span {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn duration_minutes(&self) -> i64 {
        self.duration().num_minutes()
    }

    pub fn duration_hours(&self) -> f64 {
        self.duration().num_seconds() as f64 / 3600.0
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Timestamp) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Widen both ends by `buffer`.
    pub fn expand(&self, buffer: TimeDelta) -> Span {
        Span {
            start: self.start - buffer,
            end: self.end + buffer,
        }
    }

    /// `"1h 30m"` or `"45m"`.
    pub fn format_duration(&self) -> String {
        let minutes = self.duration_minutes();
        let (hours, rest) = (minutes / 60, minutes % 60);
        if hours > 0 {
            format!("{hours}h {rest}m")
        } else {
            format!("{rest}m")
        }
    }
}

/// A stored reservation. `id` and `created_at` are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Ulid,
    pub resource: String,
    #[serde(with = "timestamp_format")]
    pub start_time: Timestamp,
    #[serde(with = "timestamp_format")]
    pub end_time: Timestamp,
    pub requested_by: String,
    #[serde(with = "timestamp_format")]
    pub created_at: Timestamp,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span {
            start: self.start_time,
            end: self.end_time,
        }
    }
}

/// Candidate fields as entered on the booking form. Times are optional so
/// that a missing value is reported instead of rejected at parse time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingRequest {
    pub resource: String,
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
    pub requested_by: String,
}

impl BookingRequest {
    pub fn new(
        resource: impl Into<String>,
        start_time: Timestamp,
        end_time: Timestamp,
        requested_by: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            start_time: Some(start_time),
            end_time: Some(end_time),
            requested_by: requested_by.into(),
        }
    }

    /// The candidate as a storable record. Only meaningful once validation passed.
    pub fn to_new_booking(&self) -> Option<NewBooking> {
        let (start, end) = (self.start_time?, self.end_time?);
        if start >= end {
            return None;
        }
        Some(NewBooking {
            resource: self.resource.clone(),
            span: Span::new(start, end),
            requested_by: self.requested_by.trim().to_string(),
        })
    }
}

impl From<&Booking> for BookingRequest {
    fn from(b: &Booking) -> Self {
        Self {
            resource: b.resource.clone(),
            start_time: Some(b.start_time),
            end_time: Some(b.end_time),
            requested_by: b.requested_by.clone(),
        }
    }
}

/// A validated candidate, ready for `BookingStore::insert`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub resource: String,
    pub span: Span,
    pub requested_by: String,
}

/// Partial replacement of a booking's editable fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingPatch {
    pub resource: Option<String>,
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
    pub requested_by: Option<String>,
}

impl BookingPatch {
    pub fn is_empty(&self) -> bool {
        self.resource.is_none()
            && self.start_time.is_none()
            && self.end_time.is_none()
            && self.requested_by.is_none()
    }

    /// Whether the patch moves the booking in time or onto another resource.
    pub fn touches_schedule(&self) -> bool {
        self.resource.is_some() || self.start_time.is_some() || self.end_time.is_some()
    }

    /// The booking with this patch laid over it. `id` and `created_at` never change.
    pub fn apply(&self, booking: &Booking) -> Booking {
        Booking {
            id: booking.id,
            resource: self.resource.clone().unwrap_or_else(|| booking.resource.clone()),
            start_time: self.start_time.unwrap_or(booking.start_time),
            end_time: self.end_time.unwrap_or(booking.end_time),
            requested_by: self
                .requested_by
                .clone()
                .unwrap_or_else(|| booking.requested_by.clone()),
            created_at: booking.created_at,
        }
    }
}

/// Derived from the clock, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Upcoming,
    Ongoing,
    Past,
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BookingStatus::Upcoming => "Upcoming",
            BookingStatus::Ongoing => "Ongoing",
            BookingStatus::Past => "Past",
        };
        f.write_str(s)
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "upcoming" => Ok(BookingStatus::Upcoming),
            "ongoing" => Ok(BookingStatus::Ongoing),
            "past" => Ok(BookingStatus::Past),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

/// Narrowing applied to the booking list. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub resource: Option<String>,
    /// Calendar date the booking starts on.
    pub date: Option<NaiveDate>,
    pub status: Option<BookingStatus>,
    /// Case-insensitive substring of resource or requester.
    pub search: Option<String>,
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStats {
    pub name: String,
    pub total_bookings: usize,
    pub upcoming_bookings: usize,
    pub ongoing_bookings: usize,
    pub total_hours: f64,
    /// Percentage of the weekly capacity, capped at 100.
    pub utilization: f64,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSummary {
    pub resources: usize,
    pub active_resources: usize,
    pub average_utilization: f64,
    pub total_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardOverview {
    pub total_bookings: usize,
    pub upcoming_bookings: usize,
    pub ongoing_bookings: usize,
    pub today_bookings: usize,
    pub resources_in_use: usize,
}
