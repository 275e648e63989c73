use crate::model::{Day, Id, ReservationStatus, Stay};

#[derive(Debug)]
pub enum EngineError {
    /// Bad dates: `check_in >= check_out`, a malformed date or a month
    /// that does not exist. Never corrected silently.
    InvalidRange(String),
    /// The range overlaps a pending or confirmed reservation.
    /// `unavailable` lists the property's current blocked ranges for display.
    Conflict {
        reservation_id: Id,
        unavailable: Vec<Stay>,
    },
    NotFound(Id),
    AlreadyExists(Id),
    InvalidTransition {
        id: Id,
        status: ReservationStatus,
        action: &'static str,
    },
    StayNotElapsed(Id),
    GuestLimitExceeded {
        requested: u32,
        max: u32,
    },
    HasActiveReservations(Id),
    LimitExceeded(&'static str),
    Decode(String),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRange(msg) => write!(f, "invalid range: {msg}"),
            EngineError::Conflict {
                reservation_id,
                unavailable,
            } => {
                write!(f, "conflict with reservation: {reservation_id}; unavailable:")?;
                if unavailable.is_empty() {
                    return write!(f, " none");
                }
                for stay in unavailable {
                    write!(f, " {stay}")?;
                }
                Ok(())
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidTransition { id, status, action } => {
                write!(f, "cannot {action} reservation {id}: status is {status}")
            }
            EngineError::StayNotElapsed(id) => {
                write!(f, "reservation {id} has not reached its check-out day")
            }
            EngineError::GuestLimitExceeded { requested, max } => {
                write!(f, "guest count {requested} outside allowed range 1..={max}")
            }
            EngineError::HasActiveReservations(id) => {
                write!(f, "cannot delete property {id}: has pending or confirmed reservations")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Decode(e) => write!(f, "malformed snapshot: {e}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl EngineError {
    pub(crate) fn inverted(check_in: Day, check_out: Day) -> Self {
        EngineError::InvalidRange(format!(
            "check-in {check_in} must be before check-out {check_out}"
        ))
    }
}

impl std::error::Error for EngineError {}
