pub mod availability;
mod conflict;
mod error;
mod journal;
mod mutations;
mod queries;
mod snapshot;
#[cfg(test)]
mod tests;

pub use conflict::today;
pub use error::EngineError;
pub use snapshot::{parse_day, Snapshot, SnapshotDocument};

use std::collections::HashMap;
use std::fs::{File, OpenOptions, TryLockError};
use std::io;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock, RwLockReadGuard};

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

use journal::Journal;

pub type SharedPropertyState = Arc<RwLock<PropertyState>>;

/// The reservation store: one lock per property, so a check-then-insert on
/// a property is serialized while other properties proceed in parallel.
///
/// Lock order is commit gate, then catalog, then property.
pub struct Engine {
    pub state: DashMap<Id, SharedPropertyState>,
    pub notify: Arc<NotifyHub>,
    /// Reservation id to property id.
    pub(super) reservation_to_property: DashMap<Id, Id>,
    journal: Journal,
    /// Shared by every write from validation through apply; exclusive
    /// while the log is rewritten.
    commit_gate: RwLock<()>,
    /// Serializes property creation and deletion.
    catalog: Mutex<()>,
    /// Advisory lock on `<wal>.lock`, released on drop.
    _data_lock: File,
}

/// Held while a write validates, journals and applies an event.
pub(super) struct CommitPermit<'a> {
    _gate: RwLockReadGuard<'a, ()>,
}

/// Exclusive write access to one property under a commit permit.
pub(super) struct PropertyTxn<'a> {
    pub(super) property_id: Id,
    state: OwnedRwLockWriteGuard<PropertyState>,
    permit: CommitPermit<'a>,
}

impl Deref for PropertyTxn<'_> {
    type Target = PropertyState;

    fn deref(&self) -> &PropertyState {
        &self.state
    }
}

impl DerefMut for PropertyTxn<'_> {
    fn deref_mut(&mut self) -> &mut PropertyState {
        &mut self.state
    }
}

/// Apply an event to a property the caller already holds.
fn apply_to_property(ps: &mut PropertyState, event: &Event, index: &DashMap<Id, Id>) {
    match event {
        Event::ReservationRequested {
            id,
            property_id,
            stay,
            guest_count,
            guest_name,
        } => {
            ps.insert_reservation(Reservation {
                id: id.clone(),
                property_id: property_id.clone(),
                check_in: stay.check_in,
                check_out: stay.check_out,
                status: ReservationStatus::Pending,
                guest_count: *guest_count,
                guest_name: guest_name.clone(),
            });
            index.insert(id.clone(), property_id.clone());
        }
        Event::ReservationAccepted { id, .. }
        | Event::ReservationDeclined { id, .. }
        | Event::ReservationCancelled { id, .. }
        | Event::ReservationCompleted { id, .. } => {
            if let Some(status) = event.resulting_status() {
                ps.set_status(id, status);
            }
        }
        Event::ReservationRescheduled { id, stay, .. } => {
            ps.reschedule(id, *stay);
        }
        Event::PropertyUpdated {
            name,
            max_guests,
            nightly_price,
            ..
        } => {
            ps.name = name.clone();
            ps.max_guests = *max_guests;
            ps.nightly_price = *nightly_price;
        }
        // Creation and deletion change the property map, not a property.
        Event::PropertyCreated { .. } | Event::PropertyDeleted { .. } => {}
    }
}

/// Fold a log into property states. Events for unknown properties are
/// skipped; a later delete may have removed them.
fn rebuild(events: &[Event], index: &DashMap<Id, Id>) -> HashMap<Id, PropertyState> {
    let mut states: HashMap<Id, PropertyState> = HashMap::new();
    for event in events {
        match event {
            Event::PropertyCreated {
                id,
                name,
                max_guests,
                nightly_price,
            } => {
                let ps = PropertyState::new(id.clone(), name.clone(), *max_guests, *nightly_price);
                states.insert(id.clone(), ps);
            }
            Event::PropertyDeleted { id } => {
                if let Some(ps) = states.remove(id) {
                    for r in &ps.reservations {
                        index.remove(&r.id);
                    }
                }
            }
            other => {
                if let Some(ps) = states.get_mut(other.property_id()) {
                    apply_to_property(ps, other, index);
                }
            }
        }
    }
    states
}

/// Take the advisory lock that keeps a second process off the same log.
fn lock_data_file(wal_path: &Path) -> io::Result<File> {
    let lock_path = wal_path.with_extension("wal.lock");
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)?;
    match file.try_lock() {
        Ok(()) => Ok(file),
        Err(TryLockError::WouldBlock) => Err(io::Error::new(
            io::ErrorKind::WouldBlock,
            format!(
                "{} is locked by another novodom process (stop the daemon first)",
                wal_path.display()
            ),
        )),
        Err(TryLockError::Error(e)) => Err(e),
    }
}

impl Engine {
    /// Open the log at `wal_path`, replay it and start the journal task.
    /// Fails if another engine, in this process or another, holds the log.
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let data_lock = lock_data_file(&wal_path)?;
        let events = Wal::replay(&wal_path)?;
        let reservation_to_property = DashMap::new();
        let states = rebuild(&events, &reservation_to_property);

        let state = DashMap::with_capacity(states.len());
        for (id, ps) in states {
            state.insert(id, Arc::new(RwLock::new(ps)));
        }
        tracing::debug!(
            "replayed {} events into {} properties",
            events.len(),
            state.len()
        );
        metrics::gauge!(crate::observability::PROPERTIES_ACTIVE).set(state.len() as f64);

        Ok(Self {
            state,
            notify,
            reservation_to_property,
            journal: Journal::spawn(Wal::open(&wal_path)?),
            commit_gate: RwLock::new(()),
            catalog: Mutex::new(()),
            _data_lock: data_lock,
        })
    }

    pub fn get_property(&self, id: &Id) -> Option<SharedPropertyState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_property_for_reservation(&self, reservation_id: &Id) -> Option<Id> {
        self.reservation_to_property
            .get(reservation_id)
            .map(|e| e.value().clone())
    }

    pub(super) async fn commit_permit(&self) -> CommitPermit<'_> {
        CommitPermit {
            _gate: self.commit_gate.read().await,
        }
    }

    /// Waits out every in-flight write and holds new ones off until dropped.
    pub(super) async fn exclusive(&self) -> tokio::sync::RwLockWriteGuard<'_, ()> {
        self.commit_gate.write().await
    }

    pub(super) async fn lock_catalog(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.catalog.lock().await
    }

    /// Append an event that has no property lock to apply under.
    pub(super) async fn journal_append(
        &self,
        _permit: &CommitPermit<'_>,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.journal.append(event.clone()).await
    }

    pub(super) async fn rewrite_journal(
        &self,
        _exclusive: &tokio::sync::RwLockWriteGuard<'_, ()>,
        events: Vec<Event>,
    ) -> Result<(), EngineError> {
        self.journal.rewrite(events).await
    }

    pub(super) async fn journal_append_count(&self) -> u64 {
        self.journal.append_count().await
    }

    /// Write-lock a property that is still in the store once the lock is won.
    async fn lock_live_property(
        &self,
        property_id: &Id,
    ) -> Result<OwnedRwLockWriteGuard<PropertyState>, EngineError> {
        let shared = self
            .get_property(property_id)
            .ok_or_else(|| EngineError::NotFound(property_id.clone()))?;
        let guard = shared.clone().write_owned().await;
        match self.get_property(property_id) {
            Some(current) if Arc::ptr_eq(&current, &shared) => Ok(guard),
            _ => Err(EngineError::NotFound(property_id.clone())),
        }
    }

    pub(super) async fn write_property(&self, property_id: &Id) -> Result<PropertyTxn<'_>, EngineError> {
        let permit = self.commit_permit().await;
        let state = self.lock_live_property(property_id).await?;
        Ok(PropertyTxn {
            property_id: property_id.clone(),
            state,
            permit,
        })
    }

    /// Resolve a reservation to its property and write-lock that property.
    pub(super) async fn write_reservation_property(
        &self,
        reservation_id: &Id,
    ) -> Result<PropertyTxn<'_>, EngineError> {
        let permit = self.commit_permit().await;
        let property_id = self
            .get_property_for_reservation(reservation_id)
            .ok_or_else(|| EngineError::NotFound(reservation_id.clone()))?;
        let state = self.lock_live_property(&property_id).await?;
        Ok(PropertyTxn {
            property_id,
            state,
            permit,
        })
    }

    /// Journal, apply, then notify subscribers of the property.
    pub(super) async fn persist_and_apply(
        &self,
        txn: &mut PropertyTxn<'_>,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.journal_append(&txn.permit, event).await?;
        apply_to_property(&mut txn.state, event, &self.reservation_to_property);
        self.notify.send(event.property_id(), event);
        Ok(())
    }

    pub(super) async fn resolve_property_read(
        &self,
        property_id: &Id,
    ) -> Result<OwnedRwLockReadGuard<PropertyState>, EngineError> {
        let ps = self
            .get_property(property_id)
            .ok_or_else(|| EngineError::NotFound(property_id.clone()))?;
        Ok(ps.read_owned().await)
    }
}
