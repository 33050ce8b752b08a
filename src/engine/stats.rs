use crate::model::*;

/// Bookable hours per resource per week (8 hours × 5 days).
pub const WEEKLY_CAPACITY_HOURS: f64 = 40.0;

/// Usage figures for one resource.
///
/// Counts use direct instant comparisons (`start > now` for upcoming,
/// `start <= now <= end` for ongoing) rather than `classify`. Hours are
/// summed over every booking on the resource whatever its status.
pub fn aggregate_resource(resource: &str, bookings: &[Booking], now: Timestamp) -> ResourceStats {
    let mine: Vec<&Booking> = bookings.iter().filter(|b| b.resource == resource).collect();

    let upcoming = mine.iter().filter(|b| b.start_time > now).count();
    let ongoing = mine
        .iter()
        .filter(|b| now >= b.start_time && now <= b.end_time)
        .count();
    let total_hours: f64 = mine.iter().map(|b| b.span().duration_hours()).sum();
    let utilization = (total_hours / WEEKLY_CAPACITY_HOURS * 100.0).min(100.0);

    ResourceStats {
        name: resource.to_string(),
        total_bookings: mine.len(),
        upcoming_bookings: upcoming,
        ongoing_bookings: ongoing,
        total_hours,
        utilization,
        is_active: ongoing > 0,
    }
}

/// Stats for every catalog entry, in catalog order.
pub fn aggregate_catalog(catalog: &[String], bookings: &[Booking], now: Timestamp) -> Vec<ResourceStats> {
    catalog
        .iter()
        .map(|r| aggregate_resource(r, bookings, now))
        .collect()
}

pub fn summarize(stats: &[ResourceStats]) -> FleetSummary {
    let average_utilization = if stats.is_empty() {
        0.0
    } else {
        stats.iter().map(|s| s.utilization).sum::<f64>() / stats.len() as f64
    };
    FleetSummary {
        resources: stats.len(),
        active_resources: stats.iter().filter(|s| s.is_active).count(),
        average_utilization,
        total_hours: stats.iter().map(|s| s.total_hours).sum(),
    }
}
