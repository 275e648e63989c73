use chrono::Datelike;

use crate::model::*;

use super::availability::{checked_range, conflicting, unavailable_ranges};
use super::EngineError;

/// Today's calendar day in local time.
pub fn today() -> Day {
    chrono::Local::now().date_naive()
}

fn validate_day(day: Day) -> Result<(), EngineError> {
    use crate::limits::*;
    if day.year() < MIN_VALID_YEAR || day.year() > MAX_VALID_YEAR {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    Ok(())
}

/// Validate a stay on the write path: ordering, date bounds, length.
pub(crate) fn validate_stay(check_in: Day, check_out: Day) -> Result<Stay, EngineError> {
    let stay = checked_range(check_in, check_out)?;
    validate_day(check_in)?;
    validate_day(check_out)?;
    if stay.nights() > crate::limits::MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(stay)
}

/// Fails with `Conflict` if any pending or confirmed reservation other than
/// `exclude` overlaps `stay`. The error carries the blocked ranges to show.
pub(crate) fn check_no_conflict(
    ps: &PropertyState,
    stay: &Stay,
    exclude: Option<&Id>,
) -> Result<(), EngineError> {
    if let Some(blocker) = conflicting(ps, *stay, exclude).next() {
        return Err(EngineError::Conflict {
            reservation_id: blocker.id.clone(),
            unavailable: unavailable_ranges(ps, exclude),
        });
    }
    Ok(())
}
