use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::calendar::{bucket_by_week, WeekGrid};
use super::stats::{aggregate_catalog, summarize};
use super::status::{filter_bookings, overview};
use super::{Engine, EngineError, ValidationError};

impl Engine {
    /// Every booking, in insertion order.
    pub async fn list_bookings(&self) -> Result<Vec<Booking>, EngineError> {
        self.store.list().await
    }

    /// Bookings matching `filter`, earliest start first.
    pub async fn find_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, EngineError> {
        if filter.search.as_ref().is_some_and(|s| s.len() > MAX_SEARCH_LEN) {
            return Err(EngineError::LimitExceeded("search text too long"));
        }
        let all = self.store.list().await?;
        Ok(filter_bookings(&all, filter, self.clock.now()))
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.store.get(id).await?.ok_or(EngineError::NotFound(id))
    }

    /// Run the rules against the current bookings without committing.
    /// Advisory: a later create may still be rejected.
    pub async fn validate_request(&self, request: &BookingRequest) -> Result<Vec<ValidationError>, EngineError> {
        self.check_resource(&request.resource)?;
        self.check_requester(&request.requested_by)?;
        let existing = self.store.list().await?;
        Ok(self.rules.validate(request, &existing, self.clock.now()))
    }

    /// Usage of every catalog resource, in catalog order.
    pub async fn resource_stats(&self) -> Result<Vec<ResourceStats>, EngineError> {
        let all = self.store.list().await?;
        Ok(aggregate_catalog(&self.catalog, &all, self.clock.now()))
    }

    pub async fn fleet_summary(&self) -> Result<FleetSummary, EngineError> {
        Ok(summarize(&self.resource_stats().await?))
    }

    /// The calendar week containing `day`, starting on its Sunday.
    pub async fn week_calendar(&self, day: NaiveDate) -> Result<WeekGrid, EngineError> {
        let all = self.store.list().await?;
        Ok(bucket_by_week(&all, super::week_start_for(day)))
    }

    pub async fn overview(&self) -> Result<DashboardOverview, EngineError> {
        let all = self.store.list().await?;
        Ok(overview(&all, self.clock.now()))
    }

    pub fn resources(&self) -> &[String] {
        &self.catalog
    }
}
