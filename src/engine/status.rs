use std::collections::HashSet;

use crate::model::*;

/// Where `now` falls relative to the span. Both boundary instants count as
/// `Ongoing`.
pub fn classify(span: &Span, now: Timestamp) -> BookingStatus {
    if now > span.end {
        BookingStatus::Past
    } else if now >= span.start {
        BookingStatus::Ongoing
    } else {
        BookingStatus::Upcoming
    }
}

impl BookingFilter {
    pub fn matches(&self, booking: &Booking, now: Timestamp) -> bool {
        if let Some(resource) = &self.resource
            && booking.resource != *resource
        {
            return false;
        }
        if let Some(date) = self.date
            && booking.start_time.date() != date
        {
            return false;
        }
        if let Some(status) = self.status
            && classify(&booking.span(), now) != status
        {
            return false;
        }
        if let Some(needle) = &self.search {
            let needle = needle.to_lowercase();
            if !booking.resource.to_lowercase().contains(&needle)
                && !booking.requested_by.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        true
    }
}

/// Apply `filter` and order by start time, earliest first.
pub fn filter_bookings(bookings: &[Booking], filter: &BookingFilter, now: Timestamp) -> Vec<Booking> {
    let mut out: Vec<Booking> = bookings
        .iter()
        .filter(|b| filter.matches(b, now))
        .cloned()
        .collect();
    out.sort_by_key(|b| b.start_time);
    out
}

pub fn overview(bookings: &[Booking], now: Timestamp) -> DashboardOverview {
    let today = now.date();
    let resources: HashSet<&str> = bookings.iter().map(|b| b.resource.as_str()).collect();
    DashboardOverview {
        total_bookings: bookings.len(),
        upcoming_bookings: bookings.iter().filter(|b| b.start_time > now).count(),
        ongoing_bookings: bookings
            .iter()
            .filter(|b| now >= b.start_time && now <= b.end_time)
            .count(),
        today_bookings: bookings.iter().filter(|b| b.start_time.date() == today).count(),
        resources_in_use: resources.len(),
    }
}
