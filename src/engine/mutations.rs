use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::limits::*;
use crate::model::*;
use crate::observability::{
    CONFLICTS_TOTAL, PROPERTIES_ACTIVE, RESERVATIONS_TOTAL, STAYS_COMPLETED_TOTAL,
};

use super::conflict::{check_no_conflict, validate_stay};
use super::{Engine, EngineError, Snapshot};

fn validate_property(name: &Option<String>, max_guests: u32) -> Result<(), EngineError> {
    if let Some(n) = name
        && n.len() > MAX_NAME_LEN
    {
        return Err(EngineError::LimitExceeded("property name too long"));
    }
    if max_guests == 0 || max_guests > MAX_GUESTS_PER_PROPERTY {
        return Err(EngineError::LimitExceeded("max guests out of range"));
    }
    Ok(())
}

fn record_outcome<T>(action: &'static str, result: &Result<T, EngineError>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(EngineError::Conflict { .. }) => {
            metrics::counter!(CONFLICTS_TOTAL, "action" => action).increment(1);
            "conflict"
        }
        Err(_) => "error",
    };
    metrics::counter!(RESERVATIONS_TOTAL, "action" => action, "outcome" => outcome).increment(1);
}

impl Engine {
    pub async fn create_property(
        &self,
        id: Id,
        name: Option<String>,
        max_guests: u32,
        nightly_price: u64,
    ) -> Result<(), EngineError> {
        validate_property(&name, max_guests)?;
        let permit = self.commit_permit().await;
        let _catalog = self.lock_catalog().await;
        if self.state.len() >= MAX_PROPERTIES {
            return Err(EngineError::LimitExceeded("too many properties"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::PropertyCreated {
            id: id.clone(),
            name: name.clone(),
            max_guests,
            nightly_price,
        };
        self.journal_append(&permit, &event).await?;
        let ps = PropertyState::new(id.clone(), name, max_guests, nightly_price);
        self.state.insert(id.clone(), Arc::new(RwLock::new(ps)));
        self.notify.send(&id, &event);
        metrics::gauge!(PROPERTIES_ACTIVE).set(self.state.len() as f64);
        info!("property {id} created");
        Ok(())
    }

    pub async fn update_property(
        &self,
        id: Id,
        name: Option<String>,
        max_guests: u32,
        nightly_price: u64,
    ) -> Result<(), EngineError> {
        validate_property(&name, max_guests)?;
        let mut txn = self.write_property(&id).await?;
        let event = Event::PropertyUpdated {
            id,
            name,
            max_guests,
            nightly_price,
        };
        self.persist_and_apply(&mut txn, &event).await
    }

    /// Refuses while any reservation still holds dates on the property.
    pub async fn delete_property(&self, id: Id) -> Result<(), EngineError> {
        let permit = self.commit_permit().await;
        let _catalog = self.lock_catalog().await;
        let ps = self
            .get_property(&id)
            .ok_or_else(|| EngineError::NotFound(id.clone()))?;
        let guard = ps.write().await;
        if guard.reservations.iter().any(|r| r.status.blocks()) {
            return Err(EngineError::HasActiveReservations(id));
        }

        let event = Event::PropertyDeleted { id: id.clone() };
        self.journal_append(&permit, &event).await?;
        self.state.remove(&id);
        for r in &guard.reservations {
            self.reservation_to_property.remove(&r.id);
        }
        drop(guard);
        self.notify.send(&id, &event);
        self.notify.remove(&id);
        metrics::gauge!(PROPERTIES_ACTIVE).set(self.state.len() as f64);
        info!("property {id} deleted");
        Ok(())
    }

    /// Create a `pending` reservation. The availability check and the insert
    /// happen under the property's write lock, so two overlapping requests
    /// cannot both succeed.
    pub async fn request_reservation(
        &self,
        id: Id,
        property_id: Id,
        check_in: Day,
        check_out: Day,
        guest_count: u32,
        guest_name: Option<String>,
    ) -> Result<(), EngineError> {
        let result = self
            .request_reservation_inner(id, property_id, check_in, check_out, guest_count, guest_name)
            .await;
        record_outcome("request", &result);
        result
    }

    async fn request_reservation_inner(
        &self,
        id: Id,
        property_id: Id,
        check_in: Day,
        check_out: Day,
        guest_count: u32,
        guest_name: Option<String>,
    ) -> Result<(), EngineError> {
        let stay = validate_stay(check_in, check_out)?;
        if let Some(ref n) = guest_name
            && n.len() > MAX_GUEST_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("guest name too long"));
        }
        let mut txn = self.write_property(&property_id).await?;
        if guest_count == 0 || guest_count > txn.max_guests {
            return Err(EngineError::GuestLimitExceeded {
                requested: guest_count,
                max: txn.max_guests,
            });
        }
        if self.reservation_to_property.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if txn.reservations.len() >= MAX_RESERVATIONS_PER_PROPERTY {
            return Err(EngineError::LimitExceeded("too many reservations on property"));
        }

        check_no_conflict(&txn, &stay, None)?;

        let event = Event::ReservationRequested {
            id: id.clone(),
            property_id: property_id.clone(),
            stay,
            guest_count,
            guest_name,
        };
        self.persist_and_apply(&mut txn, &event).await?;
        info!("reservation {id} requested on {property_id} for {stay}");
        Ok(())
    }

    /// Host acceptance: pending → confirmed. Availability is re-checked against
    /// everything but the reservation itself, and a lost race fails with `Conflict`.
    pub async fn accept_reservation(&self, id: Id) -> Result<Id, EngineError> {
        let result = self.accept_reservation_inner(id).await;
        record_outcome("accept", &result);
        result
    }

    async fn accept_reservation_inner(&self, id: Id) -> Result<Id, EngineError> {
        let mut txn = self.write_reservation_property(&id).await?;
        let current = current_reservation(&txn, &id)?;
        ensure_transition(&current, ReservationStatus::Confirmed, "accept")?;
        check_no_conflict(&txn, &current.stay(), Some(&id))?;

        let property_id = txn.property_id.clone();
        let event = Event::ReservationAccepted {
            id: id.clone(),
            property_id: property_id.clone(),
        };
        self.persist_and_apply(&mut txn, &event).await?;
        info!("reservation {id} confirmed");
        Ok(property_id)
    }

    /// Host decline: pending → cancelled.
    pub async fn decline_reservation(&self, id: Id) -> Result<Id, EngineError> {
        let mut txn = self.write_reservation_property(&id).await?;
        let current = current_reservation(&txn, &id)?;
        if current.status != ReservationStatus::Pending {
            return Err(EngineError::InvalidTransition {
                id,
                status: current.status,
                action: "decline",
            });
        }
        let property_id = txn.property_id.clone();
        let event = Event::ReservationDeclined {
            id: id.clone(),
            property_id: property_id.clone(),
        };
        self.persist_and_apply(&mut txn, &event).await?;
        info!("reservation {id} declined");
        Ok(property_id)
    }

    /// Guest or host cancellation: pending|confirmed → cancelled.
    pub async fn cancel_reservation(&self, id: Id) -> Result<Id, EngineError> {
        let mut txn = self.write_reservation_property(&id).await?;
        let current = current_reservation(&txn, &id)?;
        ensure_transition(&current, ReservationStatus::Cancelled, "cancel")?;
        let property_id = txn.property_id.clone();
        let event = Event::ReservationCancelled {
            id: id.clone(),
            property_id: property_id.clone(),
        };
        self.persist_and_apply(&mut txn, &event).await?;
        info!("reservation {id} cancelled");
        Ok(property_id)
    }

    /// confirmed → completed, allowed once `today` has reached the check-out day.
    pub async fn complete_reservation(&self, id: Id, today: Day) -> Result<Id, EngineError> {
        let mut txn = self.write_reservation_property(&id).await?;
        let current = current_reservation(&txn, &id)?;
        ensure_transition(&current, ReservationStatus::Completed, "complete")?;
        if current.check_out > today {
            return Err(EngineError::StayNotElapsed(id));
        }
        let property_id = txn.property_id.clone();
        let event = Event::ReservationCompleted {
            id: id.clone(),
            property_id: property_id.clone(),
        };
        self.persist_and_apply(&mut txn, &event).await?;
        metrics::counter!(STAYS_COMPLETED_TOTAL).increment(1);
        info!("reservation {id} completed");
        Ok(property_id)
    }

    /// Move a pending or confirmed reservation to new dates. Its own current
    /// occupancy is ignored during the availability check.
    pub async fn reschedule_reservation(
        &self,
        id: Id,
        check_in: Day,
        check_out: Day,
    ) -> Result<Id, EngineError> {
        let result = self.reschedule_reservation_inner(id, check_in, check_out).await;
        record_outcome("reschedule", &result);
        result
    }

    async fn reschedule_reservation_inner(
        &self,
        id: Id,
        check_in: Day,
        check_out: Day,
    ) -> Result<Id, EngineError> {
        let stay = validate_stay(check_in, check_out)?;
        let mut txn = self.write_reservation_property(&id).await?;
        let current = current_reservation(&txn, &id)?;
        if !current.status.blocks() {
            return Err(EngineError::InvalidTransition {
                id,
                status: current.status,
                action: "reschedule",
            });
        }
        check_no_conflict(&txn, &stay, Some(&id))?;

        let property_id = txn.property_id.clone();
        let event = Event::ReservationRescheduled {
            id: id.clone(),
            property_id: property_id.clone(),
            stay,
        };
        self.persist_and_apply(&mut txn, &event).await?;
        info!("reservation {id} moved to {stay}");
        Ok(property_id)
    }

    /// Load an external snapshot into an empty-or-disjoint store. Every property
    /// must be new and the snapshot must hold no double bookings.
    pub async fn import_snapshot(&self, snapshot: &Snapshot) -> Result<usize, EngineError> {
        for ps in snapshot.properties() {
            if self.state.contains_key(&ps.id) {
                return Err(EngineError::AlreadyExists(ps.id.clone()));
            }
            validate_property(&ps.name, ps.max_guests)?;
            if ps.reservations.len() > MAX_RESERVATIONS_PER_PROPERTY {
                return Err(EngineError::LimitExceeded("too many reservations on property"));
            }
            for r in &ps.reservations {
                if self.reservation_to_property.contains_key(&r.id) {
                    return Err(EngineError::AlreadyExists(r.id.clone()));
                }
                validate_stay(r.check_in, r.check_out)?;
                if r.status.blocks() {
                    check_no_conflict(ps, &r.stay(), Some(&r.id))?;
                }
            }
        }

        // Each property is its own commit; a compaction may land between two.
        let mut imported = 0;
        for ps in snapshot.properties() {
            self.create_property(ps.id.clone(), ps.name.clone(), ps.max_guests, ps.nightly_price)
                .await?;
            let mut txn = self.write_property(&ps.id).await?;
            for event in reservation_events(ps) {
                self.persist_and_apply(&mut txn, &event).await?;
            }
            imported += ps.reservations.len();
        }
        info!("imported {imported} reservations");
        Ok(imported)
    }

    /// Confirmed reservations whose check-out day is on or before `today`.
    pub fn collect_elapsed_stays(&self, today: Day) -> Vec<(Id, Id)> {
        let mut elapsed = Vec::new();
        for entry in self.state.iter() {
            let ps = entry.value().clone();
            let Ok(guard) = ps.try_read() else {
                debug!("sweep skipped busy property {}", entry.key());
                continue;
            };
            for r in &guard.reservations {
                if r.status == ReservationStatus::Confirmed && r.check_out <= today {
                    elapsed.push((r.id.clone(), guard.id.clone()));
                }
            }
        }
        elapsed
    }

    /// Rewrite the log with just the events that rebuild the current state.
    ///
    /// Writers are held off from the first property read until the new log
    /// is in place, so no acknowledged write can fall between the two.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let exclusive = self.exclusive().await;

        let shared: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for ps in shared {
            let guard = ps.read().await;
            events.push(Event::PropertyCreated {
                id: guard.id.clone(),
                name: guard.name.clone(),
                max_guests: guard.max_guests,
                nightly_price: guard.nightly_price,
            });
            events.extend(reservation_events(&guard));
        }

        let count = events.len();
        self.rewrite_journal(&exclusive, events).await?;
        info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.journal_append_count().await
    }
}

fn current_reservation(ps: &PropertyState, id: &Id) -> Result<Reservation, EngineError> {
    ps.get(id)
        .cloned()
        .ok_or_else(|| EngineError::NotFound(id.clone()))
}

fn ensure_transition(
    current: &Reservation,
    next: ReservationStatus,
    action: &'static str,
) -> Result<(), EngineError> {
    if current.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            id: current.id.clone(),
            status: current.status,
            action,
        })
    }
}

/// Events that rebuild a property's reservations with their current status.
fn reservation_events(ps: &PropertyState) -> Vec<Event> {
    let mut events = Vec::with_capacity(ps.reservations.len());
    for r in &ps.reservations {
        let id = || r.id.clone();
        let property_id = || ps.id.clone();
        events.push(Event::ReservationRequested {
            id: id(),
            property_id: property_id(),
            stay: r.stay(),
            guest_count: r.guest_count,
            guest_name: r.guest_name.clone(),
        });
        let accepted = || Event::ReservationAccepted {
            id: id(),
            property_id: property_id(),
        };
        match r.status {
            ReservationStatus::Pending => {}
            ReservationStatus::Confirmed => events.push(accepted()),
            ReservationStatus::Cancelled => events.push(Event::ReservationCancelled {
                id: id(),
                property_id: property_id(),
            }),
            ReservationStatus::Completed => {
                events.push(accepted());
                events.push(Event::ReservationCompleted {
                    id: id(),
                    property_id: property_id(),
                });
            }
        }
    }
    events
}
