use std::collections::BTreeMap;
use std::ops::Range;

use chrono::{Datelike, NaiveDate, NaiveTime, TimeDelta, Timelike};

use crate::model::*;

/// Hour rows shown on the weekly calendar (8 AM through 7 PM).
pub const CALENDAR_HOURS: Range<u32> = 8..20;

pub const DAYS_PER_WEEK: i64 = 7;

/// The Sunday on or before `date`.
pub fn week_start_for(date: NaiveDate) -> NaiveDate {
    date - TimeDelta::days(i64::from(date.weekday().num_days_from_sunday()))
}

/// Bookings of one week laid out by `(day, hour)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekGrid {
    pub week_start: NaiveDate,
    slots: BTreeMap<(NaiveDate, u32), Vec<Booking>>,
    days: BTreeMap<NaiveDate, Vec<Booking>>,
}

impl WeekGrid {
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.days.keys().copied()
    }

    /// Bookings drawn in the `hour` row of `day`. Empty outside the week.
    pub fn slot(&self, day: NaiveDate, hour: u32) -> &[Booking] {
        self.slots.get(&(day, hour)).map_or(&[], Vec::as_slice)
    }

    /// Every booking starting on `day`, in input order.
    pub fn day(&self, day: NaiveDate) -> &[Booking] {
        self.days.get(&day).map_or(&[], Vec::as_slice)
    }

    /// All `(day, hour)` cells in chronological order, empty ones included.
    pub fn slots(&self) -> impl Iterator<Item = (NaiveDate, u32, &[Booking])> {
        self.slots
            .iter()
            .map(|((day, hour), bookings)| (*day, *hour, bookings.as_slice()))
    }

    pub fn booking_count(&self) -> usize {
        self.days.values().map(Vec::len).sum()
    }
}

/// Group the bookings that start within `[week_start, week_start + 7 days)`.
///
/// A booking occupies hour row `h` of its start day when
/// `start.hour <= h < end.hour`. Minutes are truncated and bookings running
/// past midnight are only drawn on their start day.
pub fn bucket_by_week(bookings: &[Booking], week_start: NaiveDate) -> WeekGrid {
    let window_start = week_start.and_time(NaiveTime::MIN);
    let window_end = window_start + TimeDelta::days(DAYS_PER_WEEK);
    let in_week: Vec<&Booking> = bookings
        .iter()
        .filter(|b| b.start_time >= window_start && b.start_time < window_end)
        .collect();

    let mut slots = BTreeMap::new();
    let mut days = BTreeMap::new();
    for offset in 0..DAYS_PER_WEEK {
        let day = week_start + TimeDelta::days(offset);
        let on_day: Vec<&Booking> = in_week
            .iter()
            .copied()
            .filter(|b| b.start_time.date() == day)
            .collect();

        for hour in CALENDAR_HOURS {
            let cell: Vec<Booking> = on_day
                .iter()
                .filter(|b| b.start_time.hour() <= hour && b.end_time.hour() > hour)
                .map(|b| (*b).clone())
                .collect();
            slots.insert((day, hour), cell);
        }
        days.insert(day, on_day.into_iter().cloned().collect());
    }

    WeekGrid {
        week_start,
        slots,
        days,
    }
}
