use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::MAX_ID_LEN;

/// Calendar day, no time-of-day component.
pub type Day = NaiveDate;

/// Opaque property or reservation id.
///
/// Ids from the marketplace database are UUID strings; ids minted here are
/// ULIDs. Nothing looks inside them beyond the length check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct Id(String);

impl Id {
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Id {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s.is_empty() {
            return Err("id must not be empty".into());
        }
        if s.len() > MAX_ID_LEN {
            return Err(format!("id longer than {MAX_ID_LEN} bytes"));
        }
        Ok(Self(s))
    }
}

impl FromStr for Id {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.trim().to_string())
    }
}

/// Half-open stay `[check_in, check_out)`. The check-out day is free for the next guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stay {
    pub check_in: Day,
    pub check_out: Day,
}

impl Stay {
    pub fn new(check_in: Day, check_out: Day) -> Self {
        debug_assert!(check_in < check_out, "Stay check_in must be before check_out");
        Self {
            check_in,
            check_out,
        }
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub fn overlaps(&self, other: &Stay) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }

    pub fn contains_day(&self, day: Day) -> bool {
        self.check_in <= day && day < self.check_out
    }
}

impl fmt::Display for Stay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.check_in, self.check_out)
    }
}

/// Reservation lifecycle.
///
/// ```text
/// pending   --accept-->  confirmed
/// pending   --decline--> cancelled
/// confirmed --cancel-->  cancelled
/// confirmed --checkout elapses--> completed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    /// Pending and confirmed reservations hold their range against other bookings.
    pub fn blocks(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    /// Everything except cancelled is painted on the calendar, completed stays included.
    pub fn occupies(self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }

    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed)
                | (Self::Pending, Self::Cancelled)
                | (Self::Confirmed, Self::Cancelled)
                | (Self::Confirmed, Self::Completed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown reservation status: {other}")),
        }
    }
}

/// A guest's claim on a property for a stay. Field names follow the JSON interchange shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: Id,
    pub property_id: Id,
    pub check_in: Day,
    pub check_out: Day,
    pub status: ReservationStatus,
    pub guest_count: u32,
    #[serde(default)]
    pub guest_name: Option<String>,
}

impl Reservation {
    pub fn stay(&self) -> Stay {
        Stay::new(self.check_in, self.check_out)
    }
}

#[derive(Debug, Clone)]
pub struct PropertyState {
    pub id: Id,
    pub name: Option<String>,
    /// Maximum occupancy a single reservation may request.
    pub max_guests: u32,
    /// Price of one night, whole currency units.
    pub nightly_price: u64,
    /// All reservations regardless of status, sorted by `check_in`.
    pub reservations: Vec<Reservation>,
}

impl PropertyState {
    pub fn new(id: Id, name: Option<String>, max_guests: u32, nightly_price: u64) -> Self {
        Self {
            id,
            name,
            max_guests,
            nightly_price,
            reservations: Vec::new(),
        }
    }

    pub fn info(&self) -> PropertyInfo {
        PropertyInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            max_guests: self.max_guests,
            nightly_price: self.nightly_price,
        }
    }

    /// Insert keeping `check_in` order; equal check-ins keep arrival order.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.check_in <= reservation.check_in);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: &Id) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| &r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get(&self, id: &Id) -> Option<&Reservation> {
        self.reservations.iter().find(|r| &r.id == id)
    }

    /// Overwrite a reservation's status, returning the previous one.
    pub fn set_status(&mut self, id: &Id, status: ReservationStatus) -> Option<ReservationStatus> {
        let r = self.reservations.iter_mut().find(|r| &r.id == id)?;
        Some(std::mem::replace(&mut r.status, status))
    }

    /// Move a reservation to new dates, keeping the list sorted.
    pub fn reschedule(&mut self, id: &Id, stay: Stay) -> bool {
        match self.remove_reservation(id) {
            Some(mut r) => {
                r.check_in = stay.check_in;
                r.check_out = stay.check_out;
                self.insert_reservation(r);
                true
            }
            None => false,
        }
    }

    /// Reservations of any status whose stay overlaps `query`.
    /// Binary search skips everything checking in on or after `query.check_out`.
    pub fn overlapping(&self, query: Stay) -> impl Iterator<Item = &Reservation> + Clone {
        let right_bound = self
            .reservations
            .partition_point(|r| r.check_in < query.check_out);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.check_out > query.check_in)
    }

    /// Reservations of any status whose stay contains `day`, in `check_in` order.
    pub fn covering(&self, day: Day) -> impl Iterator<Item = &Reservation> + Clone {
        let right_bound = self.reservations.partition_point(|r| r.check_in <= day);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.check_out > day)
    }
}

/// WAL record format. Flat, one variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    PropertyCreated {
        id: Id,
        name: Option<String>,
        max_guests: u32,
        nightly_price: u64,
    },
    PropertyUpdated {
        id: Id,
        name: Option<String>,
        max_guests: u32,
        nightly_price: u64,
    },
    PropertyDeleted {
        id: Id,
    },
    ReservationRequested {
        id: Id,
        property_id: Id,
        stay: Stay,
        guest_count: u32,
        guest_name: Option<String>,
    },
    ReservationAccepted {
        id: Id,
        property_id: Id,
    },
    ReservationDeclined {
        id: Id,
        property_id: Id,
    },
    ReservationCancelled {
        id: Id,
        property_id: Id,
    },
    ReservationCompleted {
        id: Id,
        property_id: Id,
    },
    ReservationRescheduled {
        id: Id,
        property_id: Id,
        stay: Stay,
    },
}

impl Event {
    /// Property the event belongs to.
    pub fn property_id(&self) -> &Id {
        match self {
            Event::PropertyCreated { id, .. }
            | Event::PropertyUpdated { id, .. }
            | Event::PropertyDeleted { id } => id,
            Event::ReservationRequested { property_id, .. }
            | Event::ReservationAccepted { property_id, .. }
            | Event::ReservationDeclined { property_id, .. }
            | Event::ReservationCancelled { property_id, .. }
            | Event::ReservationCompleted { property_id, .. }
            | Event::ReservationRescheduled { property_id, .. } => property_id,
        }
    }

    /// Status a reservation lands in after this event, if the event changes one.
    pub fn resulting_status(&self) -> Option<ReservationStatus> {
        match self {
            Event::ReservationRequested { .. } => Some(ReservationStatus::Pending),
            Event::ReservationAccepted { .. } => Some(ReservationStatus::Confirmed),
            Event::ReservationDeclined { .. } | Event::ReservationCancelled { .. } => {
                Some(ReservationStatus::Cancelled)
            }
            Event::ReservationCompleted { .. } => Some(ReservationStatus::Completed),
            _ => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyInfo {
    pub id: Id,
    #[serde(default)]
    pub name: Option<String>,
    pub max_guests: u32,
    #[serde(default)]
    pub nightly_price: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Occupancy {
    Available,
    Occupied,
}

/// One calendar cell: a day and every non-cancelled reservation covering it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayCell {
    pub day: Day,
    pub occupancy: Occupancy,
    pub reservations: Vec<Reservation>,
}

/// Price breakdown shown before a guest books. Whole currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub nights: i64,
    pub nightly_price: u64,
    /// `nights * nightly_price`.
    pub subtotal: u64,
    pub cleaning_fee: u64,
    pub service_fee: u64,
    /// Subtotal plus both fees.
    pub total: u64,
}
