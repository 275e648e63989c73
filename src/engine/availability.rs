use chrono::NaiveDate;

use crate::model::*;

use super::EngineError;

// ── Availability Engine ───────────────────────────────────────────
//
// Pure functions over one property's reservations. Nothing here locks,
// allocates state or touches I/O; callers hand in a `PropertyState` they
// already hold (a snapshot copy or a read guard).

/// Flat cleaning charge added to every quote, whole currency units.
pub const CLEANING_FEE: u64 = 1_000;

/// Flat marketplace service charge added to every quote.
pub const SERVICE_FEE: u64 = 500;

/// Build a query range, rejecting `start >= end`.
pub fn checked_range(start: Day, end: Day) -> Result<Stay, EngineError> {
    if start >= end {
        return Err(EngineError::inverted(start, end));
    }
    Ok(Stay::new(start, end))
}

/// Pending or confirmed reservations overlapping `stay`, minus `exclude`.
pub fn conflicting<'a>(
    property: &'a PropertyState,
    stay: Stay,
    exclude: Option<&'a Id>,
) -> impl Iterator<Item = &'a Reservation> + Clone {
    property
        .overlapping(stay)
        .filter(move |r| r.status.blocks() && Some(&r.id) != exclude)
}

/// `false` iff some pending or confirmed reservation other than `exclude`
/// overlaps `[start, end)`.
pub fn is_range_available(
    property: &PropertyState,
    start: Day,
    end: Day,
    exclude: Option<&Id>,
) -> Result<bool, EngineError> {
    let stay = checked_range(start, end)?;
    Ok(conflicting(property, stay, exclude).next().is_none())
}

/// Non-cancelled reservations containing `day`, ordered by `check_in`.
///
/// Under the no-double-booking invariant this yields at most one pending or
/// confirmed reservation; anything more is a data anomaly and is yielded as-is.
pub fn bookings_for_day(
    property: &PropertyState,
    day: Day,
) -> impl Iterator<Item = &Reservation> + Clone {
    property.covering(day).filter(|r| r.status.occupies())
}

pub fn occupancy_for_day(property: &PropertyState, day: Day) -> Occupancy {
    if bookings_for_day(property, day).next().is_some() {
        Occupancy::Occupied
    } else {
        Occupancy::Available
    }
}

/// Merged ranges currently held by pending or confirmed reservations.
pub fn unavailable_ranges(property: &PropertyState, exclude: Option<&Id>) -> Vec<Stay> {
    // `reservations` is sorted by check_in, so the filtered stays are too.
    let held: Vec<Stay> = property
        .reservations
        .iter()
        .filter(|r| r.status.blocks() && Some(&r.id) != exclude)
        .map(Reservation::stay)
        .collect();
    merge_overlapping(&held)
}

/// One cell per day of `year`-`month`.
pub fn month_calendar(
    property: &PropertyState,
    year: i32,
    month: u32,
) -> Result<Vec<DayCell>, EngineError> {
    let no_such_month = || EngineError::InvalidRange(format!("no such month {year}-{month:02}"));
    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(no_such_month)?;
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let next_first = NaiveDate::from_ymd_opt(next_year, next_month, 1).ok_or_else(no_such_month)?;

    Ok(first
        .iter_days()
        .take_while(|day| *day < next_first)
        .map(|day| {
            let reservations: Vec<Reservation> = bookings_for_day(property, day).cloned().collect();
            let occupancy = if reservations.is_empty() {
                Occupancy::Available
            } else {
                Occupancy::Occupied
            };
            DayCell {
                day,
                occupancy,
                reservations,
            }
        })
        .collect())
}

/// Nights times the nightly price, plus the cleaning and service fees.
pub fn quote(property: &PropertyState, stay: Stay) -> Quote {
    let nights = stay.nights();
    let subtotal = property.nightly_price.saturating_mul(nights as u64);
    Quote {
        nights,
        nightly_price: property.nightly_price,
        subtotal,
        cleaning_fee: CLEANING_FEE,
        service_fee: SERVICE_FEE,
        total: subtotal
            .saturating_add(CLEANING_FEE)
            .saturating_add(SERVICE_FEE),
    }
}

/// Merge sorted overlapping/adjacent stays into disjoint ranges.
pub fn merge_overlapping(sorted: &[Stay]) -> Vec<Stay> {
    let mut merged: Vec<Stay> = Vec::new();
    for &stay in sorted {
        if let Some(last) = merged.last_mut()
            && stay.check_in <= last.check_out
        {
            last.check_out = last.check_out.max(stay.check_out);
            continue;
        }
        merged.push(stay);
    }
    merged
}
