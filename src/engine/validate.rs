use std::fmt;

use chrono::TimeDelta;
use ulid::Ulid;

use crate::model::*;

/// Floor on booking length. `validate` always enforces this value; the
/// configured `BookingRules::min_duration_minutes` is informational only.
pub const MIN_DURATION_MINUTES: i64 = 15;

/// Scheduling policy handed to the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingRules {
    /// Idle gap required before and after every booking on a resource.
    pub buffer_minutes: u32,
    /// Declared minimum. See `MIN_DURATION_MINUTES`.
    pub min_duration_minutes: u32,
    pub max_duration_hours: u32,
    /// Declared horizon for advance bookings. Not enforced.
    pub advance_booking_days: u32,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            buffer_minutes: 10,
            min_duration_minutes: MIN_DURATION_MINUTES as u32,
            max_duration_hours: 2,
            advance_booking_days: 30,
        }
    }
}

impl BookingRules {
    pub fn validate(
        &self,
        candidate: &BookingRequest,
        existing: &[Booking],
        now: Timestamp,
    ) -> Vec<ValidationError> {
        validate(
            candidate,
            existing,
            self.buffer_minutes,
            self.max_duration_hours,
            now,
        )
    }

    pub fn buffer(&self) -> TimeDelta {
        TimeDelta::minutes(i64::from(self.buffer_minutes))
    }
}

/// Whether a problem is bad input or a broken scheduling rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Field,
    Rule,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingResource,
    MissingStart,
    MissingEnd,
    MissingRequester,
    EndNotAfterStart,
    TooShort { min_minutes: i64 },
    TooLong { max_hours: u32 },
    StartNotInFuture,
    Conflict {
        existing_id: Ulid,
        /// The existing booking's own span, without buffer.
        existing: Span,
        buffer_minutes: u32,
    },
}

impl ValidationError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ValidationError::MissingResource
            | ValidationError::MissingStart
            | ValidationError::MissingEnd
            | ValidationError::MissingRequester
            | ValidationError::EndNotAfterStart => ErrorClass::Field,
            _ => ErrorClass::Rule,
        }
    }

    /// Short machine-readable code for metrics labels and SQL rows.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::MissingResource => "missing_resource",
            ValidationError::MissingStart => "missing_start",
            ValidationError::MissingEnd => "missing_end",
            ValidationError::MissingRequester => "missing_requester",
            ValidationError::EndNotAfterStart => "end_not_after_start",
            ValidationError::TooShort { .. } => "too_short",
            ValidationError::TooLong { .. } => "too_long",
            ValidationError::StartNotInFuture => "start_not_in_future",
            ValidationError::Conflict { .. } => "conflict",
        }
    }
}

fn display_time(ts: &Timestamp) -> String {
    ts.format("%-m/%-d/%Y, %-I:%M:%S %p").to_string()
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingResource => write!(f, "Please select a resource"),
            ValidationError::MissingStart => write!(f, "Please select a start time"),
            ValidationError::MissingEnd => write!(f, "Please select an end time"),
            ValidationError::MissingRequester => write!(f, "Please enter your name"),
            ValidationError::EndNotAfterStart => write!(f, "End time must be after start time"),
            ValidationError::TooShort { min_minutes } => {
                write!(f, "Booking duration must be at least {min_minutes} minutes")
            }
            ValidationError::TooLong { max_hours } => {
                write!(f, "Booking duration cannot exceed {max_hours} hours")
            }
            ValidationError::StartNotInFuture => write!(f, "Start time must be in the future"),
            ValidationError::Conflict {
                existing,
                buffer_minutes,
                ..
            } => write!(
                f,
                "Conflict detected with existing booking ({} - {}). \
                 Please allow {buffer_minutes}-minute buffer before and after existing bookings.",
                display_time(&existing.start),
                display_time(&existing.end),
            ),
        }
    }
}

/// Check a candidate against the rules and the existing bookings.
///
/// All checks run; every failure is returned so the caller can show them
/// together. Conflict detection reports only the first colliding booking
/// in `existing` order. `now` drives the future-start check only.
pub fn validate(
    candidate: &BookingRequest,
    existing: &[Booking],
    buffer_minutes: u32,
    max_duration_hours: u32,
    now: Timestamp,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if candidate.resource.is_empty() {
        errors.push(ValidationError::MissingResource);
    }
    if candidate.start_time.is_none() {
        errors.push(ValidationError::MissingStart);
    }
    if candidate.end_time.is_none() {
        errors.push(ValidationError::MissingEnd);
    }
    if candidate.requested_by.trim().is_empty() {
        errors.push(ValidationError::MissingRequester);
    }

    let (Some(start), Some(end)) = (candidate.start_time, candidate.end_time) else {
        return errors;
    };

    if end <= start {
        errors.push(ValidationError::EndNotAfterStart);
    }

    let length = end - start;
    if length < TimeDelta::minutes(MIN_DURATION_MINUTES) {
        errors.push(ValidationError::TooShort {
            min_minutes: MIN_DURATION_MINUTES,
        });
    }
    if length > TimeDelta::hours(i64::from(max_duration_hours)) {
        errors.push(ValidationError::TooLong {
            max_hours: max_duration_hours,
        });
    }

    if start <= now {
        errors.push(ValidationError::StartNotInFuture);
    }

    if !candidate.resource.is_empty() {
        let buffer = TimeDelta::minutes(i64::from(buffer_minutes));
        if let Some(hit) = find_conflict(&candidate.resource, start, end, existing, buffer) {
            errors.push(ValidationError::Conflict {
                existing_id: hit.id,
                existing: hit.span(),
                buffer_minutes,
            });
        }
    }

    errors
}

/// First booking on `resource` whose buffered span the raw `[start, end)`
/// collides with, scanning in slice order.
pub fn find_conflict<'a>(
    resource: &str,
    start: Timestamp,
    end: Timestamp,
    existing: &'a [Booking],
    buffer: TimeDelta,
) -> Option<&'a Booking> {
    existing
        .iter()
        .filter(|b| b.resource == resource)
        .find(|b| collides(&b.span().expand(buffer), start, end))
}

/// Start inside the buffered span, end inside it, or the candidate covering it.
fn collides(buffered: &Span, start: Timestamp, end: Timestamp) -> bool {
    buffered.contains_instant(start)
        || (end > buffered.start && end <= buffered.end)
        || (start <= buffered.start && end >= buffered.end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, h: u32, m: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn now() -> Timestamp {
        at(10, 9, 0)
    }

    fn existing(resource: &str, start: Timestamp, end: Timestamp) -> Booking {
        Booking {
            id: Ulid::new(),
            resource: resource.into(),
            start_time: start,
            end_time: end,
            requested_by: "John Doe".into(),
            created_at: at(9, 10, 0),
        }
    }

    fn request(resource: &str, start: Timestamp, end: Timestamp) -> BookingRequest {
        BookingRequest::new(resource, start, end, "Alice Wilson")
    }

    fn run(candidate: &BookingRequest, existing: &[Booking]) -> Vec<ValidationError> {
        validate(candidate, existing, 10, 2, now())
    }

    #[test]
    fn valid_candidate_has_no_errors() {
        let errors = run(&request("Projector", at(15, 10, 0), at(15, 11, 0)), &[]);
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn missing_fields_all_reported() {
        let candidate = BookingRequest {
            resource: String::new(),
            start_time: None,
            end_time: None,
            requested_by: "   ".into(),
        };
        let errors = run(&candidate, &[]);
        assert_eq!(
            errors,
            vec![
                ValidationError::MissingResource,
                ValidationError::MissingStart,
                ValidationError::MissingEnd,
                ValidationError::MissingRequester,
            ]
        );
        assert!(errors.iter().all(|e| e.class() == ErrorClass::Field));
    }

    #[test]
    fn time_checks_skipped_when_a_time_is_missing() {
        let candidate = BookingRequest {
            resource: "Projector".into(),
            start_time: Some(at(1, 10, 0)),
            end_time: None,
            requested_by: "Alice".into(),
        };
        assert_eq!(run(&candidate, &[]), vec![ValidationError::MissingEnd]);
    }

    #[test]
    fn end_before_start_always_reported() {
        let errors = run(&request("Projector", at(15, 11, 0), at(15, 10, 0)), &[]);
        assert!(errors.contains(&ValidationError::EndNotAfterStart));
        // Negative duration is also below the floor.
        assert!(errors.contains(&ValidationError::TooShort { min_minutes: 15 }));

        let equal = run(&request("Projector", at(15, 11, 0), at(15, 11, 0)), &[]);
        assert!(equal.contains(&ValidationError::EndNotAfterStart));
    }

    #[test]
    fn ten_minute_booking_is_too_short() {
        let errors = run(&request("Projector", at(15, 10, 0), at(15, 10, 10)), &[]);
        assert_eq!(errors, vec![ValidationError::TooShort { min_minutes: 15 }]);
        assert_eq!(
            errors[0].to_string(),
            "Booking duration must be at least 15 minutes"
        );
    }

    #[test]
    fn too_short_even_when_conflicting() {
        let booked = [existing("Projector", at(15, 10, 0), at(15, 11, 0))];
        let errors = run(&request("Projector", at(15, 10, 30), at(15, 10, 40)), &booked);
        assert!(errors.contains(&ValidationError::TooShort { min_minutes: 15 }));
        assert!(errors.iter().any(|e| e.code() == "conflict"));
    }

    #[test]
    fn exactly_fifteen_minutes_is_allowed() {
        let errors = run(&request("Projector", at(15, 10, 0), at(15, 10, 15)), &[]);
        assert!(errors.is_empty());
    }

    #[test]
    fn max_duration_boundary() {
        let at_limit = run(&request("Projector", at(15, 10, 0), at(15, 12, 0)), &[]);
        assert!(at_limit.is_empty());

        let over = run(&request("Projector", at(15, 10, 0), at(15, 12, 1)), &[]);
        assert_eq!(over, vec![ValidationError::TooLong { max_hours: 2 }]);
        assert_eq!(over[0].to_string(), "Booking duration cannot exceed 2 hours");
    }

    #[test]
    fn sub_second_overrun_counts() {
        let half = TimeDelta::milliseconds(500);
        let errors = run(&request("Projector", at(15, 10, 0), at(15, 12, 0) + half), &[]);
        assert_eq!(errors, vec![ValidationError::TooLong { max_hours: 2 }]);

        let errors = run(&request("Projector", at(15, 10, 0), at(15, 10, 15) - half), &[]);
        assert_eq!(errors, vec![ValidationError::TooShort { min_minutes: 15 }]);
    }

    #[test]
    fn min_floor_ignores_configured_rules() {
        let rules = BookingRules {
            min_duration_minutes: 60,
            ..Default::default()
        };
        let errors = rules.validate(&request("Projector", at(15, 10, 0), at(15, 10, 30)), &[], now());
        assert!(errors.is_empty());
    }

    #[test]
    fn start_must_be_strictly_future() {
        let errors = validate(&request("Projector", now(), now() + TimeDelta::hours(1)), &[], 10, 2, now());
        assert_eq!(errors, vec![ValidationError::StartNotInFuture]);

        let past = run(&request("Projector", at(1, 10, 0), at(1, 11, 0)), &[]);
        assert_eq!(past, vec![ValidationError::StartNotInFuture]);
    }

    // Existing 14:00–15:30 on Conference Room A, 10 minute buffer.
    fn conference_room() -> Vec<Booking> {
        vec![existing("Conference Room A", at(15, 14, 0), at(15, 15, 30))]
    }

    #[test]
    fn candidate_inside_trailing_buffer_rejected() {
        let errors = run(&request("Conference Room A", at(15, 15, 35), at(15, 16, 0)), &conference_room());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code(), "conflict");
        assert_eq!(
            errors[0].to_string(),
            "Conflict detected with existing booking (1/15/2024, 2:00:00 PM - 1/15/2024, 3:30:00 PM). \
             Please allow 10-minute buffer before and after existing bookings."
        );
    }

    #[test]
    fn candidate_clearing_buffer_accepted() {
        let errors = run(&request("Conference Room A", at(15, 15, 41), at(15, 16, 10)), &conference_room());
        assert!(errors.is_empty());
        // Half-open: starting exactly at end + buffer is clear.
        let edge = run(&request("Conference Room A", at(15, 15, 40), at(15, 16, 10)), &conference_room());
        assert!(edge.is_empty());
    }

    #[test]
    fn candidate_ending_in_leading_buffer_rejected() {
        let errors = run(&request("Conference Room A", at(15, 13, 0), at(15, 13, 55)), &conference_room());
        assert_eq!(errors.len(), 1);
        // Ending exactly at start - buffer is clear.
        let edge = run(&request("Conference Room A", at(15, 13, 0), at(15, 13, 50)), &conference_room());
        assert!(edge.is_empty());
    }

    #[test]
    fn candidate_covering_existing_rejected() {
        let booked = [existing("Projector", at(15, 10, 30), at(15, 10, 45))];
        let errors = run(&request("Projector", at(15, 10, 0), at(15, 11, 30)), &booked);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code(), "conflict");
    }

    #[test]
    fn other_resources_never_conflict() {
        let errors = run(&request("Projector", at(15, 14, 0), at(15, 15, 30)), &conference_room());
        assert!(errors.is_empty());
    }

    #[test]
    fn only_first_conflict_in_store_order_reported() {
        let later = existing("Projector", at(15, 11, 0), at(15, 11, 30));
        let earlier = existing("Projector", at(15, 10, 0), at(15, 10, 30));
        let booked = vec![later.clone(), earlier];
        let errors = run(&request("Projector", at(15, 10, 15), at(15, 11, 15)), &booked);
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            ValidationError::Conflict { existing_id, existing, .. } => {
                assert_eq!(*existing_id, later.id);
                assert_eq!(*existing, later.span());
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn zero_buffer_allows_back_to_back() {
        let booked = conference_room();
        let errors = validate(
            &request("Conference Room A", at(15, 15, 30), at(15, 16, 0)),
            &booked,
            0,
            2,
            now(),
        );
        assert!(errors.is_empty());
    }

    #[test]
    fn rule_errors_classified() {
        assert_eq!(ValidationError::StartNotInFuture.class(), ErrorClass::Rule);
        assert_eq!(ValidationError::TooLong { max_hours: 2 }.class(), ErrorClass::Rule);
        assert_eq!(ValidationError::EndNotAfterStart.class(), ErrorClass::Field);
    }
}
