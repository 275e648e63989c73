use std::time::Instant;

use tokio::sync::OwnedRwLockReadGuard;

use crate::model::*;
use crate::observability::QUERY_DURATION_SECONDS;

use super::availability;
use super::conflict::validate_stay;
use super::{Engine, EngineError, Snapshot};

fn observe(query: &'static str, started: Instant) {
    metrics::histogram!(QUERY_DURATION_SECONDS, "query" => query)
        .record(started.elapsed().as_secs_f64());
}

impl Engine {
    /// Read-lock a property, checking that `exclude` names one of its reservations.
    async fn read_with_exclusion(
        &self,
        property_id: &Id,
        exclude: Option<&Id>,
    ) -> Result<OwnedRwLockReadGuard<PropertyState>, EngineError> {
        let guard = self.resolve_property_read(property_id).await?;
        if let Some(rid) = exclude
            && guard.get(rid).is_none()
        {
            return Err(EngineError::NotFound(rid.clone()));
        }
        Ok(guard)
    }

    /// `false` iff a pending or confirmed reservation other than `exclude`
    /// overlaps `[start, end)`. Any window width is accepted.
    pub async fn is_range_available(
        &self,
        property_id: &Id,
        start: Day,
        end: Day,
        exclude: Option<&Id>,
    ) -> Result<bool, EngineError> {
        let started = Instant::now();
        availability::checked_range(start, end)?;
        let guard = self.read_with_exclusion(property_id, exclude).await?;
        let available = availability::is_range_available(&guard, start, end, exclude);
        observe("is_range_available", started);
        available
    }

    /// Active reservations overlapping `[start, end)`, in `check_in` order.
    pub async fn conflicting(
        &self,
        property_id: &Id,
        start: Day,
        end: Day,
        exclude: Option<&Id>,
    ) -> Result<Vec<Reservation>, EngineError> {
        let window = availability::checked_range(start, end)?;
        let guard = self.read_with_exclusion(property_id, exclude).await?;
        Ok(availability::conflicting(&guard, window, exclude)
            .cloned()
            .collect())
    }

    pub async fn occupancy_for_day(
        &self,
        property_id: &Id,
        day: Day,
    ) -> Result<Occupancy, EngineError> {
        let started = Instant::now();
        let guard = self.resolve_property_read(property_id).await?;
        let occupancy = availability::occupancy_for_day(&guard, day);
        observe("occupancy_for_day", started);
        Ok(occupancy)
    }

    /// Owned copy of the day's bookings; the lock is released on return.
    pub async fn bookings_for_day(
        &self,
        property_id: &Id,
        day: Day,
    ) -> Result<Vec<Reservation>, EngineError> {
        let guard = self.resolve_property_read(property_id).await?;
        Ok(availability::bookings_for_day(&guard, day).cloned().collect())
    }

    pub async fn month_calendar(
        &self,
        property_id: &Id,
        year: i32,
        month: u32,
    ) -> Result<Vec<DayCell>, EngineError> {
        let started = Instant::now();
        let guard = self.resolve_property_read(property_id).await?;
        let cells = availability::month_calendar(&guard, year, month);
        observe("month_calendar", started);
        cells
    }

    pub async fn unavailable_ranges(&self, property_id: &Id) -> Result<Vec<Stay>, EngineError> {
        let guard = self.resolve_property_read(property_id).await?;
        Ok(availability::unavailable_ranges(&guard, None))
    }

    pub async fn quote(
        &self,
        property_id: &Id,
        check_in: Day,
        check_out: Day,
    ) -> Result<Quote, EngineError> {
        let stay = validate_stay(check_in, check_out)?;
        let guard = self.resolve_property_read(property_id).await?;
        Ok(availability::quote(&guard, stay))
    }

    pub async fn list_properties(&self) -> Vec<PropertyInfo> {
        let shared: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut infos = Vec::with_capacity(shared.len());
        for ps in shared {
            infos.push(ps.read().await.info());
        }
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Reservations on a property, optionally narrowed to one status.
    pub async fn get_reservations(
        &self,
        property_id: &Id,
        status: Option<ReservationStatus>,
    ) -> Result<Vec<Reservation>, EngineError> {
        let guard = self.resolve_property_read(property_id).await?;
        Ok(guard
            .reservations
            .iter()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect())
    }

    pub async fn get_reservation(&self, id: &Id) -> Result<Reservation, EngineError> {
        let not_found = || EngineError::NotFound(id.clone());
        let property_id = self.get_property_for_reservation(id).ok_or_else(not_found)?;
        let guard = self.resolve_property_read(&property_id).await?;
        guard.get(id).cloned().ok_or_else(not_found)
    }

    /// Point-in-time copy of every property, for pure queries and export.
    pub async fn snapshot(&self) -> Snapshot {
        let shared: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut states = Vec::with_capacity(shared.len());
        for ps in shared {
            states.push(ps.read().await.clone());
        }
        Snapshot::from_states(states)
    }
}
