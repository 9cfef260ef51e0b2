//! Datetime algebra
//!
//! Integer-only Julian-day spans, masked field comparison and the run
//! timestamp base.

use chrono::NaiveDateTime;
use hxvm_bytecode::{Datetime, DtMask};

/// Julian day number and seconds into that day
///
/// Fields are taken as they are; out-of-range values shift the result
/// instead of failing.
pub fn julian_span(dt: &Datetime) -> (i64, i64) {
    let month = i64::from(dt.month);
    let a = i64::from(month <= 2);
    let y = i64::from(dt.year) + 4800 - a;
    let m = month + 12 * a - 3;
    let days =
        i64::from(dt.day) + (153 * m + 2) / 5 + 365 * y + y / 4 - y / 100 + y / 400 - 32045;
    let secs = i64::from(dt.second) + 60 * i64::from(dt.minute) + 3600 * i64::from(dt.hour);
    (days, secs)
}

/// Seconds from `rhs` to `lhs`, wrapped to 32 bits
///
/// Reading the result as `i32` gives the signed difference whenever it fits.
pub fn diff(lhs: &Datetime, rhs: &Datetime) -> u32 {
    let (d1, s1) = julian_span(lhs);
    let (d2, s2) = julian_span(rhs);
    (86_400 * (d1 - d2) + (s1 - s2)) as u32
}

/// Every field selected by `mask` satisfies `lhs >= rhs`
///
/// An empty mask selects nothing and is trivially true.
pub fn masked_ge(lhs: &Datetime, rhs: &Datetime, mask: DtMask) -> bool {
    let fields = [
        (DtMask::SECOND, u16::from(lhs.second), u16::from(rhs.second)),
        (DtMask::MINUTE, lhs.minute.into(), rhs.minute.into()),
        (DtMask::HOUR, lhs.hour.into(), rhs.hour.into()),
        (DtMask::DAY, lhs.day.into(), rhs.day.into()),
        (DtMask::MONTH, lhs.month.into(), rhs.month.into()),
        (DtMask::YEAR, lhs.year, rhs.year),
        (DtMask::WEEKDAY, lhs.weekday.into(), rhs.weekday.into()),
    ];
    fields
        .iter()
        .filter(|(bit, _, _)| mask.contains(*bit))
        .all(|(_, l, r)| l >= r)
}

/// Negation of [`masked_ge`]
#[inline]
pub fn masked_lt(lhs: &Datetime, rhs: &Datetime, mask: DtMask) -> bool {
    !masked_ge(lhs, rhs, mask)
}

/// Masked fields in push order: weekday, year, month, day, hour, minute, second
pub fn decompose(dt: &Datetime, mask: DtMask) -> impl Iterator<Item = u32> {
    [
        (DtMask::WEEKDAY, u32::from(dt.weekday)),
        (DtMask::YEAR, u32::from(dt.year)),
        (DtMask::MONTH, u32::from(dt.month)),
        (DtMask::DAY, u32::from(dt.day)),
        (DtMask::HOUR, u32::from(dt.hour)),
        (DtMask::MINUTE, u32::from(dt.minute)),
        (DtMask::SECOND, u32::from(dt.second)),
    ]
    .into_iter()
    .filter(move |(bit, _)| mask.contains(*bit))
    .map(|(_, field)| field)
}

/// Whole seconds from `origin` to `now`
///
/// Clamped at zero and saturated to `u32`.
pub fn timestamp(now: NaiveDateTime, origin: NaiveDateTime) -> u32 {
    let secs = now.signed_duration_since(origin).num_seconds().max(0);
    u32::try_from(secs).unwrap_or(u32::MAX)
}
