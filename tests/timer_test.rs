use chrono::{DateTime, Datelike, TimeZone, Utc};
use tokio_test::{assert_err, assert_ok};

use cloudmirror::timer::{CycleType, Timer};

fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

#[test]
fn test_weekly_timer_advances_to_listed_days() {
    // 2024-01-01 is a Monday.
    let mut timer = Timer::weekly(2, 30, &[2, 4]);
    assert_ok!(timer.validate());

    timer.update(at(2024, 1, 1, 3, 0));
    assert_eq!(timer.next_time, Some(at(2024, 1, 2, 2, 30)));
    assert!(!timer.is_expired);

    timer.update(at(2024, 1, 2, 2, 31));
    assert_eq!(timer.next_time, Some(at(2024, 1, 4, 2, 30)));
}

#[test]
fn test_next_time_is_always_in_the_future() {
    let timers = [
        Timer::daily(0, 0),
        Timer::daily(23, 59),
        Timer::weekly(12, 0, &[1, 7]),
        Timer::monthly(6, 15, &[1, 15, 31]),
    ];
    let mut now = at(2024, 2, 27, 23, 59);
    for _ in 0..50 {
        for timer in &timers {
            let next = timer.next_after(now).unwrap();
            assert!(next > now, "{} fired at {} for now {}", timer.describe(), next, now);
        }
        now = now + chrono::Duration::hours(17);
    }
}

#[test]
fn test_firing_exactly_at_slot_moves_on() {
    let timer = Timer::daily(8, 0);
    assert_eq!(timer.next_after(at(2024, 5, 10, 8, 0)), Some(at(2024, 5, 11, 8, 0)));
    assert_eq!(timer.next_after(at(2024, 5, 10, 7, 59)), Some(at(2024, 5, 10, 8, 0)));
}

#[test]
fn test_month_days_missing_from_a_month_are_skipped() {
    let timer = Timer::monthly(0, 0, &[31]);
    let next = timer.next_after(at(2024, 4, 1, 0, 0)).unwrap();
    assert_eq!(next, at(2024, 5, 31, 0, 0));

    let timer = Timer::monthly(9, 0, &[30, 31]);
    let next = timer.next_after(at(2024, 2, 1, 0, 0)).unwrap();
    assert_eq!(next, at(2024, 3, 30, 9, 0));
    assert_eq!(next.day(), 30);
}

#[test]
fn test_once_timer_expires_after_firing() {
    let mut timer = Timer::once(at(2024, 3, 1, 12, 0));
    assert_ok!(timer.validate());
    assert_eq!(timer.cycle, CycleType::Once);

    timer.update(at(2024, 3, 1, 11, 0));
    assert_eq!(timer.next_time, Some(at(2024, 3, 1, 12, 0)));
    assert!(timer.is_due(at(2024, 3, 1, 12, 0)));
    assert!(!timer.is_due(at(2024, 3, 1, 11, 30)));

    timer.update(at(2024, 3, 1, 12, 0));
    assert!(timer.is_expired);
    assert_eq!(timer.next_time, None);
    assert!(!timer.is_due(at(2024, 3, 2, 0, 0)));
}

#[test]
fn test_window_bounds_firing() {
    let mut timer = Timer::daily(10, 0).between(Some(at(2024, 6, 10, 0, 0)), Some(at(2024, 6, 12, 12, 0)));
    assert_ok!(timer.validate());

    timer.update(at(2024, 6, 1, 0, 0));
    assert_eq!(timer.next_time, Some(at(2024, 6, 10, 10, 0)));

    timer.update(at(2024, 6, 12, 10, 0));
    assert_eq!(timer.next_time, Some(at(2024, 6, 13, 10, 0)));
    assert!(timer.is_expired);
}

#[test]
fn test_validation_rejects_bad_fields() {
    assert_ok!(Timer::daily(23, 59).validate());
    assert_err!(Timer::monthly(1, 0, &[]).validate());
    assert_eq!(Timer::daily(24, 0).validate().unwrap_err().code(), "input_parameter");
    assert_eq!(Timer::daily(1, 60).validate().unwrap_err().code(), "input_parameter");
    assert_eq!(Timer::weekly(1, 0, &[]).validate().unwrap_err().code(), "input_parameter");
    assert_eq!(Timer::weekly(1, 0, &[0]).validate().unwrap_err().code(), "input_parameter");
    assert_eq!(Timer::monthly(1, 0, &[32]).validate().unwrap_err().code(), "input_parameter");

    let backwards = Timer::daily(1, 0).between(Some(at(2024, 2, 1, 0, 0)), Some(at(2024, 1, 1, 0, 0)));
    assert_eq!(backwards.validate().unwrap_err().code(), "input_parameter");

    let mut once = Timer::once(at(2024, 1, 1, 0, 0));
    once.exec_time = None;
    assert_eq!(once.validate().unwrap_err().code(), "missing_parameter");
}

#[test]
fn test_timer_serializes_as_snake_case() {
    let timer = Timer::weekly(2, 30, &[2, 4]);
    let value = serde_json::to_value(&timer).unwrap();
    assert_eq!(value["cycle"], "week");
    assert_eq!(value["weekdays"], serde_json::json!([2, 4]));
    assert!(value.get("month_days").is_none());

    let back: Timer = serde_json::from_value(value).unwrap();
    assert_eq!(back, timer);
}
