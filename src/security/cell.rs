//! Signed-byte cell encoding.
//!
//! Every tracked address owns one `i8`:
//!
//! | value        | meaning                                    |
//! |--------------|--------------------------------------------|
//! | `0`          | unseen                                     |
//! | `1..limit`   | visits in the current decay cycle          |
//! | `-127..=-1`  | temporary ban, magnitude = minutes left    |
//! | `-128`       | permanent ban, never decays                |
//!
//! `limit` itself is never stored: the visit that would reach it rewrites
//! the cell to `-ban_minutes`.

use std::fmt;

/// Cell value for a permanent ban.
pub const PERMANENT_BAN: i8 = i8::MIN;

/// Longest temporary ban a cell can hold, in minutes.
pub const MAX_TEMPORARY_MINUTES: u8 = i8::MAX as u8;

/// Decoded view of a raw cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    /// No record for this address.
    Unseen,
    /// Visits counted in the current cycle.
    Visits(u8),
    /// Temporary ban with the remaining minutes.
    TemporarilyBanned(u8),
    /// Sticky ban.
    PermanentlyBanned,
}

impl CellState {
    /// Decode a raw cell value. Total over `i8`.
    #[inline]
    pub fn decode(cell: i8) -> Self {
        match cell {
            0 => CellState::Unseen,
            PERMANENT_BAN => CellState::PermanentlyBanned,
            c if c > 0 => CellState::Visits(c as u8),
            c => CellState::TemporarilyBanned(c.unsigned_abs()),
        }
    }

    /// True for both temporary and permanent bans.
    #[inline]
    pub fn is_banned(&self) -> bool {
        matches!(
            self,
            CellState::TemporarilyBanned(_) | CellState::PermanentlyBanned
        )
    }
}

impl From<i8> for CellState {
    fn from(cell: i8) -> Self {
        Self::decode(cell)
    }
}

/// Length of an administrative ban.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanDuration {
    /// Temporary ban in minutes, `1..=127`.
    Minutes(u8),
    /// Permanent ban.
    Permanent,
}

impl BanDuration {
    /// Build a temporary ban, rejecting `0` and anything above 127 minutes.
    pub fn minutes(minutes: u8) -> Option<Self> {
        (1..=MAX_TEMPORARY_MINUTES)
            .contains(&minutes)
            .then_some(BanDuration::Minutes(minutes))
    }

    /// Interpret the negative-minutes convention used by the admin surface:
    /// `-128` is permanent, `-n` is `n` minutes, non-negative is rejected.
    pub fn from_cell_value(value: i8) -> Option<Self> {
        match value {
            PERMANENT_BAN => Some(BanDuration::Permanent),
            v if v < 0 => Some(BanDuration::Minutes(v.unsigned_abs())),
            _ => None,
        }
    }

    /// Raw cell value this duration is written as.
    #[inline]
    pub fn cell_value(self) -> i8 {
        match self {
            BanDuration::Minutes(m) => -(m.min(MAX_TEMPORARY_MINUTES) as i8),
            BanDuration::Permanent => PERMANENT_BAN,
        }
    }
}

impl fmt::Display for BanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BanDuration::Minutes(m) => write!(f, "{m} minutes"),
            BanDuration::Permanent => f.write_str("permanent"),
        }
    }
}

/// Extend a ban cell by `duration`.
///
/// Unbanned cells take the duration as-is. Temporary bans accumulate and
/// saturate at the permanent sentinel instead of wrapping. A permanent
/// duration always wins. A zero-minute duration leaves the cell unchanged.
#[inline]
pub(crate) fn extend_ban(cell: i8, duration: BanDuration) -> i8 {
    let add = duration.cell_value();
    if add == 0 {
        return cell;
    }
    if add == PERMANENT_BAN || cell >= 0 {
        return add;
    }
    let sum = i16::from(cell) + i16::from(add);
    if sum <= i16::from(PERMANENT_BAN) {
        PERMANENT_BAN
    } else {
        sum as i8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_covers_every_value() {
        for raw in i8::MIN..=i8::MAX {
            let state = CellState::decode(raw);
            match raw {
                0 => assert_eq!(state, CellState::Unseen),
                -128 => assert_eq!(state, CellState::PermanentlyBanned),
                r if r > 0 => assert_eq!(state, CellState::Visits(r as u8)),
                r => assert_eq!(state, CellState::TemporarilyBanned((-r) as u8)),
            }
        }
    }

    #[test]
    fn ban_duration_from_cell_value() {
        assert_eq!(BanDuration::from_cell_value(-128), Some(BanDuration::Permanent));
        assert_eq!(BanDuration::from_cell_value(-5), Some(BanDuration::Minutes(5)));
        assert_eq!(BanDuration::from_cell_value(-127), Some(BanDuration::Minutes(127)));
        assert_eq!(BanDuration::from_cell_value(0), None);
        assert_eq!(BanDuration::from_cell_value(12), None);
    }

    #[test]
    fn ban_duration_minutes_range() {
        assert_eq!(BanDuration::minutes(0), None);
        assert_eq!(BanDuration::minutes(128), None);
        assert_eq!(BanDuration::minutes(1), Some(BanDuration::Minutes(1)));
        assert_eq!(BanDuration::Minutes(127).cell_value(), -127);
    }

    #[test]
    fn extend_unbanned_sets_duration() {
        assert_eq!(extend_ban(0, BanDuration::Minutes(10)), -10);
        assert_eq!(extend_ban(42, BanDuration::Minutes(10)), -10);
    }

    #[test]
    fn extend_accumulates_and_saturates() {
        assert_eq!(extend_ban(-10, BanDuration::Minutes(5)), -15);
        assert_eq!(extend_ban(-100, BanDuration::Minutes(50)), PERMANENT_BAN);
        assert_eq!(extend_ban(-78, BanDuration::Minutes(50)), PERMANENT_BAN);
        assert_eq!(extend_ban(-77, BanDuration::Minutes(50)), -127);
    }

    #[test]
    fn zero_minutes_is_a_no_op() {
        assert_eq!(BanDuration::Minutes(0).cell_value(), 0);
        assert_eq!(extend_ban(0, BanDuration::Minutes(0)), 0);
        assert_eq!(extend_ban(42, BanDuration::Minutes(0)), 42);
        assert_eq!(extend_ban(-7, BanDuration::Minutes(0)), -7);
        assert_eq!(extend_ban(PERMANENT_BAN, BanDuration::Minutes(0)), PERMANENT_BAN);
    }

    #[test]
    fn permanent_always_wins() {
        assert_eq!(extend_ban(0, BanDuration::Permanent), PERMANENT_BAN);
        assert_eq!(extend_ban(-3, BanDuration::Permanent), PERMANENT_BAN);
        assert_eq!(extend_ban(PERMANENT_BAN, BanDuration::Permanent), PERMANENT_BAN);
        assert_eq!(extend_ban(PERMANENT_BAN, BanDuration::Minutes(1)), PERMANENT_BAN);
    }
}
