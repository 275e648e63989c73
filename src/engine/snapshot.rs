use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::limits::MAX_IMPORT_RESERVATIONS;
use crate::model::*;

use super::availability;
use super::EngineError;

/// Interchange document: properties plus reservations, as read from or
/// written to an external store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub properties: Vec<PropertyInfo>,
    pub reservations: Vec<Reservation>,
}

/// Inbound shape of a document. Dates stay text until `parse_day` so a bad
/// date reports as a range error, not as a decode failure.
#[derive(Deserialize)]
struct RawDocument {
    properties: Vec<PropertyInfo>,
    reservations: Vec<RawReservation>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReservation {
    id: Id,
    property_id: Id,
    check_in: String,
    check_out: String,
    status: ReservationStatus,
    guest_count: u32,
    #[serde(default)]
    guest_name: Option<String>,
}

impl RawReservation {
    fn parse(self) -> Result<Reservation, EngineError> {
        Ok(Reservation {
            check_in: parse_day(&self.check_in)?,
            check_out: parse_day(&self.check_out)?,
            id: self.id,
            property_id: self.property_id,
            status: self.status,
            guest_count: self.guest_count,
            guest_name: self.guest_name,
        })
    }
}

/// `YYYY-MM-DD`, the date format of the interchange document.
pub fn parse_day(s: &str) -> Result<Day, EngineError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| EngineError::InvalidRange(format!("malformed date '{s}'")))
}

/// Immutable point-in-time view of reservation data.
///
/// Every query here is a pure read. Overlapping active reservations are kept
/// (not rejected) so that per-day queries can surface the anomaly.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    properties: HashMap<Id, PropertyState>,
}

impl Snapshot {
    /// Validate and index a document. Reservations must have `check_in < check_out`
    /// and reference a listed property.
    pub fn new(
        properties: Vec<PropertyInfo>,
        reservations: Vec<Reservation>,
    ) -> Result<Self, EngineError> {
        if reservations.len() > MAX_IMPORT_RESERVATIONS {
            return Err(EngineError::LimitExceeded("too many reservations in snapshot"));
        }
        let mut map = HashMap::with_capacity(properties.len());
        for p in properties {
            if map.contains_key(&p.id) {
                return Err(EngineError::AlreadyExists(p.id));
            }
            map.insert(
                p.id.clone(),
                PropertyState::new(p.id, p.name, p.max_guests, p.nightly_price),
            );
        }
        let mut seen = std::collections::HashSet::with_capacity(reservations.len());
        for r in reservations {
            availability::checked_range(r.check_in, r.check_out)?;
            if !seen.insert(r.id.clone()) {
                return Err(EngineError::AlreadyExists(r.id));
            }
            let Some(ps) = map.get_mut(&r.property_id) else {
                return Err(EngineError::NotFound(r.property_id));
            };
            ps.insert_reservation(r);
        }
        Ok(Self { properties: map })
    }

    pub(crate) fn from_states(states: Vec<PropertyState>) -> Self {
        Self {
            properties: states.into_iter().map(|ps| (ps.id.clone(), ps)).collect(),
        }
    }

    pub fn from_document(doc: SnapshotDocument) -> Result<Self, EngineError> {
        Self::new(doc.properties, doc.reservations)
    }

    /// Broken JSON or an unknown status fails with `Decode`. Unparseable or
    /// inverted dates fail with `InvalidRange`.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let raw: RawDocument =
            serde_json::from_str(json).map_err(|e| EngineError::Decode(e.to_string()))?;
        let reservations = raw
            .reservations
            .into_iter()
            .map(RawReservation::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(raw.properties, reservations)
    }

    /// Properties sorted by id, reservations grouped per property in `check_in` order.
    pub fn to_document(&self) -> SnapshotDocument {
        let mut states: Vec<&PropertyState> = self.properties.values().collect();
        states.sort_by(|a, b| a.id.cmp(&b.id));
        SnapshotDocument {
            properties: states.iter().map(|ps| ps.info()).collect(),
            reservations: states
                .iter()
                .flat_map(|ps| ps.reservations.iter().cloned())
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        serde_json::to_string_pretty(&self.to_document())
            .map_err(|e| EngineError::Decode(e.to_string()))
    }

    pub fn property(&self, id: &Id) -> Result<&PropertyState, EngineError> {
        self.properties
            .get(id)
            .ok_or_else(|| EngineError::NotFound(id.clone()))
    }

    pub fn properties(&self) -> impl Iterator<Item = &PropertyState> {
        self.properties.values()
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    pub fn reservation_count(&self) -> usize {
        self.properties.values().map(|ps| ps.reservations.len()).sum()
    }

    /// Property and, when given, the excluded reservation must both exist.
    fn property_with_exclusion(
        &self,
        property_id: &Id,
        exclude: Option<&Id>,
    ) -> Result<&PropertyState, EngineError> {
        let ps = self.property(property_id)?;
        if let Some(rid) = exclude
            && ps.get(rid).is_none()
        {
            return Err(EngineError::NotFound(rid.clone()));
        }
        Ok(ps)
    }

    pub fn is_range_available(
        &self,
        property_id: &Id,
        start: Day,
        end: Day,
        exclude: Option<&Id>,
    ) -> Result<bool, EngineError> {
        let ps = self.property_with_exclusion(property_id, exclude)?;
        availability::is_range_available(ps, start, end, exclude)
    }

    /// Active reservations overlapping `[start, end)`.
    pub fn conflicting<'a>(
        &'a self,
        property_id: &Id,
        start: Day,
        end: Day,
        exclude: Option<&'a Id>,
    ) -> Result<impl Iterator<Item = &'a Reservation> + Clone, EngineError> {
        let ps = self.property_with_exclusion(property_id, exclude)?;
        let stay = availability::checked_range(start, end)?;
        Ok(availability::conflicting(ps, stay, exclude))
    }

    pub fn occupancy_for_day(&self, property_id: &Id, day: Day) -> Result<Occupancy, EngineError> {
        Ok(availability::occupancy_for_day(self.property(property_id)?, day))
    }

    /// Lazy and restartable (`Clone`): typically zero or one element.
    pub fn bookings_for_property_and_day(
        &self,
        property_id: &Id,
        day: Day,
    ) -> Result<impl Iterator<Item = &Reservation> + Clone, EngineError> {
        Ok(availability::bookings_for_day(self.property(property_id)?, day))
    }

    pub fn unavailable_ranges(&self, property_id: &Id) -> Result<Vec<Stay>, EngineError> {
        Ok(availability::unavailable_ranges(self.property(property_id)?, None))
    }

    pub fn month_calendar(
        &self,
        property_id: &Id,
        year: i32,
        month: u32,
    ) -> Result<Vec<DayCell>, EngineError> {
        availability::month_calendar(self.property(property_id)?, year, month)
    }

    /// Pairs of active reservations on the same property whose stays overlap.
    pub fn anomalies(&self) -> Vec<(Id, Id)> {
        let mut found = Vec::new();
        for ps in self.properties.values() {
            for (i, a) in ps.reservations.iter().enumerate() {
                if !a.status.blocks() {
                    continue;
                }
                for b in ps.reservations[i + 1..].iter() {
                    if b.check_in >= a.check_out {
                        break;
                    }
                    if b.status.blocks() {
                        found.push((a.id.clone(), b.id.clone()));
                    }
                }
            }
        }
        found
    }
}
