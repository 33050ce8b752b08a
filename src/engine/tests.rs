use super::*;
use crate::config::DEFAULT_RESOURCES;
use crate::limits::*;
use crate::model::*;

use chrono::{NaiveDate, TimeDelta};
use ulid::Ulid;

fn at(day: u32, h: u32, m: u32) -> Timestamp {
    NaiveDate::from_ymd_opt(2024, 1, day)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn catalog() -> Vec<String> {
    DEFAULT_RESOURCES.iter().map(|r| r.to_string()).collect()
}

/// Empty store, default rules, clock frozen at `now`.
fn engine_at(now: Timestamp) -> (Engine, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(now));
    let engine = Engine::new(
        Arc::new(InMemoryStore::new()),
        BookingRules::default(),
        catalog(),
        clock.clone(),
    );
    (engine, clock)
}

fn request(resource: &str, start: Timestamp, end: Timestamp) -> BookingRequest {
    BookingRequest::new(resource, start, end, "John Doe")
}

fn codes(err: &EngineError) -> Vec<&'static str> {
    err.validation_errors().iter().map(|e| e.code()).collect()
}

// ── Create ───────────────────────────────────────────────

#[tokio::test]
async fn create_stamps_id_and_created_at() {
    let (engine, _) = engine_at(at(10, 9, 0));
    let b = engine
        .create_booking(request("Projector", at(15, 10, 0), at(15, 11, 0)))
        .await
        .unwrap();
    assert_eq!(b.created_at, at(10, 9, 0));
    assert_eq!(engine.get_booking(b.id).await.unwrap(), b);
    assert_eq!(engine.list_bookings().await.unwrap().len(), 1);
}

#[tokio::test]
async fn create_trims_requester() {
    let (engine, _) = engine_at(at(10, 9, 0));
    let b = engine
        .create_booking(BookingRequest::new(
            "Projector",
            at(15, 10, 0),
            at(15, 11, 0),
            "  Jane Smith ",
        ))
        .await
        .unwrap();
    assert_eq!(b.requested_by, "Jane Smith");
}

#[tokio::test]
async fn buffer_after_existing_booking() {
    let (engine, _) = engine_at(at(10, 9, 0));
    engine
        .create_booking(request("Conference Room A", at(15, 14, 0), at(15, 15, 30)))
        .await
        .unwrap();

    let err = engine
        .create_booking(request("Conference Room A", at(15, 15, 35), at(15, 16, 0)))
        .await
        .unwrap_err();
    assert_eq!(codes(&err), vec!["conflict"]);

    // The buffered window ends at 15:40 exclusive.
    engine
        .create_booking(request("Conference Room A", at(15, 15, 40), at(15, 16, 10)))
        .await
        .unwrap();
}

#[tokio::test]
async fn buffer_is_per_resource() {
    let (engine, _) = engine_at(at(10, 9, 0));
    engine
        .create_booking(request("Conference Room A", at(15, 14, 0), at(15, 15, 30)))
        .await
        .unwrap();
    engine
        .create_booking(request("Conference Room B", at(15, 14, 0), at(15, 15, 30)))
        .await
        .unwrap();
}

#[tokio::test]
async fn rejected_create_stores_nothing() {
    let (engine, _) = engine_at(at(10, 9, 0));
    let err = engine
        .create_booking(request("Projector", at(15, 10, 0), at(15, 10, 10)))
        .await
        .unwrap_err();
    assert_eq!(codes(&err), vec!["too_short"]);
    assert!(engine.list_bookings().await.unwrap().is_empty());
}

#[tokio::test]
async fn past_start_rejected() {
    let (engine, _) = engine_at(at(15, 12, 0));
    let err = engine
        .create_booking(request("Projector", at(15, 12, 0), at(15, 13, 0)))
        .await
        .unwrap_err();
    assert_eq!(codes(&err), vec!["start_not_in_future"]);
}

#[tokio::test]
async fn missing_fields_reported_together() {
    let (engine, _) = engine_at(at(10, 9, 0));
    let err = engine
        .create_booking(BookingRequest::default())
        .await
        .unwrap_err();
    assert_eq!(
        codes(&err),
        vec!["missing_resource", "missing_start", "missing_end", "missing_requester"]
    );
}

#[tokio::test]
async fn unknown_resource_rejected() {
    let (engine, _) = engine_at(at(10, 9, 0));
    let result = engine
        .create_booking(request("Boardroom", at(15, 10, 0), at(15, 11, 0)))
        .await;
    assert!(matches!(result, Err(EngineError::UnknownResource(r)) if r == "Boardroom"));
}

#[tokio::test]
async fn oversized_requester_rejected() {
    let (engine, _) = engine_at(at(10, 9, 0));
    let who = "x".repeat(MAX_REQUESTER_LEN + 1);
    let result = engine
        .create_booking(BookingRequest::new("Projector", at(15, 10, 0), at(15, 11, 0), who))
        .await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}

#[tokio::test]
async fn concurrent_creates_only_one_wins() {
    let (engine, _) = engine_at(at(10, 9, 0));
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for i in 0..8u32 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            // Every candidate overlaps every other one.
            let start = at(15, 10, i);
            engine
                .create_booking(request("Projector", start, start + TimeDelta::minutes(45)))
                .await
        }));
    }

    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(e) => assert_eq!(codes(&e), vec!["conflict"]),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(engine.list_bookings().await.unwrap().len(), 1);
}

// ── Batch ────────────────────────────────────────────────

#[tokio::test]
async fn batch_commits_all() {
    let (engine, _) = engine_at(at(10, 9, 0));
    let stored = engine
        .create_bookings(vec![
            request("Projector", at(15, 10, 0), at(15, 11, 0)),
            request("Projector", at(15, 12, 0), at(15, 13, 0)),
            request("Meeting Room B", at(15, 10, 0), at(15, 11, 0)),
        ])
        .await
        .unwrap();
    assert_eq!(stored.len(), 3);
    assert_eq!(engine.list_bookings().await.unwrap(), stored);
}

#[tokio::test]
async fn batch_rows_conflict_with_each_other() {
    let (engine, _) = engine_at(at(10, 9, 0));
    let err = engine
        .create_bookings(vec![
            request("Projector", at(15, 10, 0), at(15, 11, 0)),
            request("Projector", at(15, 11, 5), at(15, 12, 0)),
        ])
        .await
        .unwrap_err();
    assert_eq!(codes(&err), vec!["conflict"]);
    assert!(engine.list_bookings().await.unwrap().is_empty());
}

#[tokio::test]
async fn batch_rejects_whole_on_one_bad_row() {
    let (engine, _) = engine_at(at(10, 9, 0));
    let err = engine
        .create_bookings(vec![
            request("Projector", at(15, 10, 0), at(15, 11, 0)),
            request("Meeting Room B", at(15, 10, 0), at(15, 13, 0)),
        ])
        .await
        .unwrap_err();
    assert_eq!(codes(&err), vec!["too_long"]);
    assert!(engine.list_bookings().await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_batch_is_noop() {
    let (engine, _) = engine_at(at(10, 9, 0));
    assert!(engine.create_bookings(Vec::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn oversized_batch_rejected() {
    let (engine, _) = engine_at(at(10, 9, 0));
    let rows = (0..=MAX_BATCH_SIZE)
        .map(|_| request("Projector", at(15, 10, 0), at(15, 11, 0)))
        .collect();
    let result = engine.create_bookings(rows).await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}

// ── Update ───────────────────────────────────────────────

#[tokio::test]
async fn update_missing_is_not_found() {
    let (engine, _) = engine_at(at(10, 9, 0));
    let id = Ulid::new();
    let patch = BookingPatch {
        requested_by: Some("Bob Johnson".into()),
        ..Default::default()
    };
    let result = engine.update_booking(id, patch).await;
    assert!(matches!(result, Err(EngineError::NotFound(missing)) if missing == id));
}

#[tokio::test]
async fn update_requester_only() {
    let (engine, _) = engine_at(at(10, 9, 0));
    let b = engine
        .create_booking(request("Projector", at(15, 10, 0), at(15, 11, 0)))
        .await
        .unwrap();
    let updated = engine
        .update_booking(
            b.id,
            BookingPatch {
                requested_by: Some(" Alice Wilson ".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.requested_by, "Alice Wilson");
    assert_eq!(updated.span(), b.span());

    let blank = engine
        .update_booking(
            b.id,
            BookingPatch {
                requested_by: Some("   ".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(codes(&blank), vec!["missing_requester"]);
}

#[tokio::test]
async fn update_does_not_conflict_with_itself() {
    let (engine, _) = engine_at(at(10, 9, 0));
    let b = engine
        .create_booking(request("Projector", at(15, 10, 0), at(15, 11, 0)))
        .await
        .unwrap();
    let updated = engine
        .update_booking(
            b.id,
            BookingPatch {
                end_time: Some(at(15, 11, 30)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.end_time, at(15, 11, 30));
    assert_eq!(updated.id, b.id);
    assert_eq!(updated.created_at, b.created_at);
}

#[tokio::test]
async fn update_follows_booking_moved_while_waiting() {
    let (engine, _) = engine_at(at(10, 9, 0));
    let engine = Arc::new(engine);
    let b = engine
        .create_booking(request("Conference Room A", at(15, 10, 0), at(15, 11, 0)))
        .await
        .unwrap();

    let room_a = engine.lock_resources(["Conference Room A"]).await;
    let patching = {
        let engine = engine.clone();
        tokio::spawn(async move {
            let patch = BookingPatch {
                start_time: Some(at(15, 9, 30)),
                ..Default::default()
            };
            engine.update_booking(b.id, patch).await
        })
    };
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    // Another writer moves the booking to room B, and a booking lands in
    // room B that clashes with the pending start.
    let to_b = BookingPatch {
        resource: Some("Conference Room B".into()),
        ..Default::default()
    };
    engine.store.update(b.id, &to_b).await.unwrap();
    let room_b = engine.lock_resources(["Conference Room B"]).await;
    drop(room_a);
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(!patching.is_finished(), "update must wait for room B");

    let clash = NewBooking {
        resource: "Conference Room B".into(),
        span: Span::new(at(15, 8, 30), at(15, 9, 25)),
        requested_by: "Bob Johnson".into(),
    };
    engine.store.insert(clash, at(10, 9, 0)).await.unwrap();
    drop(room_b);

    let err = patching.await.unwrap().unwrap_err();
    assert_eq!(codes(&err), vec!["conflict"]);
    let stored = engine.get_booking(b.id).await.unwrap();
    assert_eq!(stored.resource, "Conference Room B");
    assert_eq!(stored.start_time, at(15, 10, 0));
}

#[tokio::test]
async fn update_revalidates_move() {
    let (engine, _) = engine_at(at(10, 9, 0));
    engine
        .create_booking(request("Conference Room A", at(15, 14, 0), at(15, 15, 30)))
        .await
        .unwrap();
    let b = engine
        .create_booking(request("Conference Room B", at(15, 14, 0), at(15, 15, 0)))
        .await
        .unwrap();

    let err = engine
        .update_booking(
            b.id,
            BookingPatch {
                resource: Some("Conference Room A".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(codes(&err), vec!["conflict"]);
    assert_eq!(engine.get_booking(b.id).await.unwrap(), b);

    let err = engine
        .update_booking(
            b.id,
            BookingPatch {
                start_time: Some(at(15, 15, 30)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(codes(&err), vec!["end_not_after_start", "too_short"]);
}

#[tokio::test]
async fn update_rejects_unknown_resource() {
    let (engine, _) = engine_at(at(10, 9, 0));
    let b = engine
        .create_booking(request("Projector", at(15, 10, 0), at(15, 11, 0)))
        .await
        .unwrap();
    let result = engine
        .update_booking(
            b.id,
            BookingPatch {
                resource: Some("Boardroom".into()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(EngineError::UnknownResource(_))));
}

// ── Delete ───────────────────────────────────────────────

#[tokio::test]
async fn delete_twice_is_idempotent() {
    let (engine, _) = engine_at(at(10, 9, 0));
    let b = engine
        .create_booking(request("Projector", at(15, 10, 0), at(15, 11, 0)))
        .await
        .unwrap();
    assert!(engine.delete_booking(b.id).await.unwrap());
    assert!(!engine.delete_booking(b.id).await.unwrap());
    assert!(engine.list_bookings().await.unwrap().is_empty());
    assert!(matches!(engine.get_booking(b.id).await, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn delete_frees_the_slot() {
    let (engine, _) = engine_at(at(10, 9, 0));
    let b = engine
        .create_booking(request("Projector", at(15, 10, 0), at(15, 11, 0)))
        .await
        .unwrap();
    engine.delete_booking(b.id).await.unwrap();
    engine
        .create_booking(request("Projector", at(15, 10, 30), at(15, 11, 30)))
        .await
        .unwrap();
}

// ── Queries ──────────────────────────────────────────────

fn demo_engine(now: Timestamp) -> Engine {
    Engine::new(
        Arc::new(InMemoryStore::demo()),
        BookingRules::default(),
        catalog(),
        Arc::new(FixedClock::new(now)),
    )
}

#[tokio::test]
async fn find_bookings_by_status_follows_clock() {
    let clock = Arc::new(FixedClock::new(at(15, 14, 0)));
    let engine = Engine::new(
        Arc::new(InMemoryStore::demo()),
        BookingRules::default(),
        catalog(),
        clock.clone(),
    );
    let ongoing = BookingFilter {
        status: Some(BookingStatus::Ongoing),
        ..Default::default()
    };
    // Start instant counts as ongoing.
    let found = engine.find_bookings(&ongoing).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].requested_by, "John Doe");

    clock.advance(TimeDelta::hours(2));
    assert!(engine.find_bookings(&ongoing).await.unwrap().is_empty());
}

#[tokio::test]
async fn find_bookings_sorted_by_start() {
    let engine = demo_engine(at(1, 0, 0));
    let all = engine.find_bookings(&BookingFilter::default()).await.unwrap();
    assert_eq!(all.len(), 5);
    assert!(all.windows(2).all(|w| w[0].start_time <= w[1].start_time));
    // Insertion order differs: the Projector booking starts first.
    assert_eq!(all[0].resource, "Projector");

    let search = BookingFilter {
        search: Some("conference".into()),
        ..Default::default()
    };
    assert_eq!(engine.find_bookings(&search).await.unwrap().len(), 2);
}

#[tokio::test]
async fn validate_request_does_not_commit() {
    let engine = demo_engine(at(10, 9, 0));
    let errors = engine
        .validate_request(&request("Conference Room A", at(15, 15, 35), at(15, 16, 0)))
        .await
        .unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].to_string().starts_with("Conflict detected with existing booking"));

    let clean = engine
        .validate_request(&request("Conference Room B", at(15, 15, 35), at(15, 16, 0)))
        .await
        .unwrap();
    assert!(clean.is_empty());
    assert_eq!(engine.list_bookings().await.unwrap().len(), 5);
}

#[tokio::test]
async fn stats_cover_whole_catalog() {
    let engine = demo_engine(at(15, 14, 30));
    let stats = engine.resource_stats().await.unwrap();
    let names: Vec<&str> = stats.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, DEFAULT_RESOURCES);

    let room_a = &stats[0];
    assert_eq!(room_a.total_bookings, 2);
    assert_eq!(room_a.ongoing_bookings, 1);
    assert_eq!(room_a.upcoming_bookings, 1);
    assert!((room_a.total_hours - 2.5).abs() < 1e-9);
    assert!(stats[1].total_hours == 0.0 && !stats[1].is_active);

    let summary = engine.fleet_summary().await.unwrap();
    assert_eq!(summary.resources, 5);
    assert_eq!(summary.active_resources, 1);
    assert!((summary.total_hours - 6.5).abs() < 1e-9);
}

#[tokio::test]
async fn week_calendar_from_any_day() {
    let engine = demo_engine(at(1, 0, 0));
    let day = NaiveDate::from_ymd_opt(2024, 1, 17).unwrap();
    let grid = engine.week_calendar(day).await.unwrap();
    assert_eq!(grid.week_start, NaiveDate::from_ymd_opt(2024, 1, 14).unwrap());
    assert_eq!(grid.booking_count(), 5);
    let monday = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
    assert_eq!(grid.slot(monday, 14).len(), 1);
    assert_eq!(grid.slot(monday, 10).len(), 1);
}

#[tokio::test]
async fn overview_counts() {
    let engine = demo_engine(at(15, 10, 30));
    let o = engine.overview().await.unwrap();
    assert_eq!(o.total_bookings, 5);
    assert_eq!(o.ongoing_bookings, 1);
    assert_eq!(o.upcoming_bookings, 4);
    assert_eq!(o.today_bookings, 2);
    assert_eq!(o.resources_in_use, 4);
}

#[test]
fn fixed_clock_moves_only_when_told() {
    let clock = FixedClock::new(at(15, 10, 0));
    assert_eq!(clock.now(), at(15, 10, 0));
    clock.advance(TimeDelta::minutes(5));
    assert_eq!(clock.now(), at(15, 10, 5));
    clock.set(at(1, 0, 0));
    assert_eq!(clock.now(), at(1, 0, 0));
}
