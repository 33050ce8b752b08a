use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{BOOKINGS_CREATED_TOTAL, BOOKINGS_DELETED_TOTAL, BOOKINGS_REJECTED_TOTAL};

use super::{Engine, EngineError, ValidationError};

fn record_rejections(errors: &[ValidationError]) {
    for e in errors {
        metrics::counter!(BOOKINGS_REJECTED_TOTAL, "reason" => e.code()).increment(1);
    }
}

impl Engine {
    /// Validate and commit one booking under its resource's lock, so two
    /// concurrent requests cannot both pass against the same snapshot.
    pub async fn create_booking(&self, request: BookingRequest) -> Result<Booking, EngineError> {
        self.check_resource(&request.resource)?;
        self.check_requester(&request.requested_by)?;

        let _guard = self.lock_resources([request.resource.as_str()]).await;

        let existing = self.store.list().await?;
        let now = self.clock.now();
        let errors = self.rules.validate(&request, &existing, now);
        if !errors.is_empty() {
            debug!(resource = %request.resource, count = errors.len(), "booking rejected");
            record_rejections(&errors);
            return Err(EngineError::Invalid(errors));
        }
        let Some(new) = request.to_new_booking() else {
            return Err(EngineError::Invalid(vec![ValidationError::EndNotAfterStart]));
        };

        let stored = self.store.insert(new, now).await?;
        info!(id = %stored.id, resource = %stored.resource, "booking created");
        metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(1);
        Ok(stored)
    }

    /// Create several bookings atomically. All-or-nothing: if any candidate
    /// fails validation, against the store or an earlier row of the same
    /// batch, nothing is committed and that row's errors are returned.
    pub async fn create_bookings(&self, requests: Vec<BookingRequest>) -> Result<Vec<Booking>, EngineError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        if requests.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        for request in &requests {
            self.check_resource(&request.resource)?;
            self.check_requester(&request.requested_by)?;
        }

        let _guards = self
            .lock_resources(requests.iter().map(|r| r.resource.as_str()))
            .await;

        // Phase 1: validate every row against the store plus the rows before it.
        let mut snapshot = self.store.list().await?;
        let now = self.clock.now();
        let mut accepted = Vec::with_capacity(requests.len());
        for (row, request) in requests.iter().enumerate() {
            let errors = self.rules.validate(request, &snapshot, now);
            if !errors.is_empty() {
                debug!(row, count = errors.len(), "batch rejected");
                record_rejections(&errors);
                return Err(EngineError::Invalid(errors));
            }
            let Some(new) = request.to_new_booking() else {
                return Err(EngineError::Invalid(vec![ValidationError::EndNotAfterStart]));
            };
            snapshot.push(Booking {
                id: Ulid::new(),
                resource: new.resource.clone(),
                start_time: new.span.start,
                end_time: new.span.end,
                requested_by: new.requested_by.clone(),
                created_at: now,
            });
            accepted.push(new);
        }

        // Phase 2: commit.
        let mut stored = Vec::with_capacity(accepted.len());
        for new in accepted {
            stored.push(self.store.insert(new, now).await?);
        }
        info!(count = stored.len(), "batch created");
        metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(stored.len() as u64);
        Ok(stored)
    }

    /// Replace a subset of a booking's fields.
    ///
    /// A patch that moves the booking (resource, start or end) is validated
    /// as a fresh candidate against every other booking, under the locks of
    /// both the old and the new resource. A requester-only patch only needs a
    /// non-empty name.
    pub async fn update_booking(&self, id: Ulid, mut patch: BookingPatch) -> Result<Booking, EngineError> {
        if let Some(resource) = &patch.resource {
            self.check_resource(resource)?;
        }
        if let Some(who) = &mut patch.requested_by {
            self.check_requester(who)?;
            *who = who.trim().to_string();
        }

        let mut current = self.store.get(id).await?.ok_or(EngineError::NotFound(id))?;
        if patch.is_empty() {
            return Ok(current);
        }

        if !patch.touches_schedule() {
            if patch.requested_by.as_deref().is_some_and(str::is_empty) {
                return Err(EngineError::Invalid(vec![ValidationError::MissingRequester]));
            }
            return self.store.update(id, &patch).await;
        }

        // Re-read under the lock; the booking may have moved or vanished. If it
        // moved, the locks held are the wrong ones, so take them again.
        let _guards = loop {
            let target = patch.resource.clone().unwrap_or_else(|| current.resource.clone());
            let guards = self
                .lock_resources([current.resource.as_str(), target.as_str()])
                .await;
            let fresh = self.store.get(id).await?.ok_or(EngineError::NotFound(id))?;
            let moved = fresh.resource != current.resource;
            current = fresh;
            if !moved {
                break guards;
            }
            debug!(%id, resource = %current.resource, "booking moved while waiting for its lock, retrying");
        };
        let merged = patch.apply(&current);
        let others: Vec<Booking> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|b| b.id != id)
            .collect();
        let errors = self
            .rules
            .validate(&BookingRequest::from(&merged), &others, self.clock.now());
        if !errors.is_empty() {
            debug!(%id, count = errors.len(), "update rejected");
            record_rejections(&errors);
            return Err(EngineError::Invalid(errors));
        }

        let updated = self.store.update(id, &patch).await?;
        info!(%id, resource = %updated.resource, "booking updated");
        Ok(updated)
    }

    /// Cancel a booking. Returns whether it existed; deleting an absent id is a no-op.
    pub async fn delete_booking(&self, id: Ulid) -> Result<bool, EngineError> {
        let removed = self.store.delete(id).await?;
        if removed {
            info!(%id, "booking deleted");
            metrics::counter!(BOOKINGS_DELETED_TOTAL).increment(1);
        } else {
            debug!(%id, "delete of absent booking ignored");
        }
        Ok(removed)
    }
}
