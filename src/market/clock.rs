//! Trading calendar and slot arithmetic.
//!
//! A trading day has 1440 ticks at a 10-second cadence: slots 0-719 cover the
//! morning session 09:30:00-11:29:50, slots 720-1439 the afternoon session
//! 13:00:00-14:59:50. Weekends are not trading days.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};

pub const SLOTS_PER_DAY: usize = 1440;
pub const MORNING_SLOTS: usize = 720;
pub const TICK_SECONDS: i64 = 10;

/// Start of the pre-open housekeeping window (order expiry, bankruptcy
/// restoration).
pub fn pre_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).unwrap()
}

pub fn morning_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 30, 0).unwrap()
}

pub fn morning_close() -> NaiveTime {
    NaiveTime::from_hms_opt(11, 30, 0).unwrap()
}

pub fn afternoon_open() -> NaiveTime {
    NaiveTime::from_hms_opt(13, 0, 0).unwrap()
}

pub fn afternoon_close() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 0, 0).unwrap()
}

pub fn is_trading_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Whether orders may execute at this instant (weekday within a session).
pub fn is_trading_time(at: NaiveDateTime) -> bool {
    if !is_trading_day(at.date()) {
        return false;
    }
    let t = at.time();
    (t >= morning_open() && t < morning_close())
        || (t >= afternoon_open() && t < afternoon_close())
}

/// Wall-clock time of a slot's tick.
pub fn slot_time(date: NaiveDate, slot: usize) -> NaiveDateTime {
    debug_assert!(slot < SLOTS_PER_DAY);
    let (base, offset) = if slot < MORNING_SLOTS {
        (morning_open(), slot)
    } else {
        (afternoon_open(), slot - MORNING_SLOTS)
    };
    date.and_time(base) + Duration::seconds(offset as i64 * TICK_SECONDS)
}

/// Slot whose tick fires at this instant, if inside a session.
pub fn slot_at(at: NaiveDateTime) -> Option<usize> {
    if !is_trading_day(at.date()) {
        return None;
    }
    let t = at.time();
    if t >= morning_open() && t < morning_close() {
        let elapsed = (t - morning_open()).num_seconds();
        Some((elapsed / TICK_SECONDS) as usize)
    } else if t >= afternoon_open() && t < afternoon_close() {
        let elapsed = (t - afternoon_open()).num_seconds();
        Some(MORNING_SLOTS + (elapsed / TICK_SECONDS) as usize)
    } else {
        None
    }
}

/// Last slot that has fired at or before this instant on a trading day.
/// `None` before the morning open; snaps to 719 over lunch and to 1439 after
/// the close.
pub fn effective_end_slot(at: NaiveDateTime) -> Option<usize> {
    let t = at.time();
    if t < morning_open() {
        return None;
    }
    if let Some(slot) = slot_at(at) {
        return Some(slot);
    }
    if t >= afternoon_close() {
        Some(SLOTS_PER_DAY - 1)
    } else {
        // lunch break
        Some(MORNING_SLOTS - 1)
    }
}

pub fn next_trading_day(date: NaiveDate) -> NaiveDate {
    let mut d = date + Duration::days(1);
    while !is_trading_day(d) {
        d += Duration::days(1);
    }
    d
}

/// T+1 settlement instant for a trade: same time of day, next trading day.
pub fn settle_time(trade_time: NaiveDateTime) -> NaiveDateTime {
    next_trading_day(trade_time.date()).and_time(trade_time.time())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monday() -> NaiveDate {
        // 2024-06-03 is a Monday
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
    }

    #[test]
    fn test_slot_time_mapping() {
        let d = monday();
        assert_eq!(
            slot_time(d, 0),
            d.and_time(NaiveTime::from_hms_opt(9, 30, 0).unwrap())
        );
        assert_eq!(
            slot_time(d, 719),
            d.and_time(NaiveTime::from_hms_opt(11, 29, 50).unwrap())
        );
        assert_eq!(
            slot_time(d, 720),
            d.and_time(NaiveTime::from_hms_opt(13, 0, 0).unwrap())
        );
        assert_eq!(
            slot_time(d, 1439),
            d.and_time(NaiveTime::from_hms_opt(14, 59, 50).unwrap())
        );
    }

    #[test]
    fn test_slot_at_inverts_slot_time() {
        let d = monday();
        for slot in [0, 1, 719, 720, 1000, 1439] {
            assert_eq!(slot_at(slot_time(d, slot)), Some(slot));
        }
    }

    #[test]
    fn test_slot_at_outside_sessions() {
        let d = monday();
        assert_eq!(slot_at(d.and_hms_opt(9, 0, 0).unwrap()), None);
        assert_eq!(slot_at(d.and_hms_opt(12, 0, 0).unwrap()), None);
        assert_eq!(slot_at(d.and_hms_opt(15, 0, 0).unwrap()), None);
    }

    #[test]
    fn test_effective_end_slot_snapping() {
        let d = monday();
        assert_eq!(effective_end_slot(d.and_hms_opt(9, 0, 0).unwrap()), None);
        assert_eq!(
            effective_end_slot(d.and_hms_opt(12, 0, 0).unwrap()),
            Some(719)
        );
        assert_eq!(
            effective_end_slot(d.and_hms_opt(16, 0, 0).unwrap()),
            Some(1439)
        );
    }

    #[test]
    fn test_weekend_not_trading() {
        let saturday = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        assert!(!is_trading_day(saturday));
        assert!(!is_trading_time(saturday.and_hms_opt(10, 0, 0).unwrap()));
    }

    #[test]
    fn test_next_trading_day_skips_weekend() {
        let friday = NaiveDate::from_ymd_opt(2024, 6, 7).unwrap();
        assert_eq!(
            next_trading_day(friday),
            NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()
        );
    }

    #[test]
    fn test_settle_time_is_next_trading_day() {
        let trade = monday().and_hms_opt(10, 15, 30).unwrap();
        let settle = settle_time(trade);
        assert_eq!(settle.date(), NaiveDate::from_ymd_opt(2024, 6, 4).unwrap());
        assert_eq!(settle.time(), trade.time());
    }
}
