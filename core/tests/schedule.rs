mod common;

use common::ts;
use datamodel_core::{
    config::PipelineConfig,
    schedule::{Schedule, ScheduleInterval},
};

fn daily(catchup: bool) -> Schedule {
    Schedule::new(ts("2023-11-01"), ScheduleInterval::Daily, catchup)
}

#[test]
fn nothing_is_due_before_the_first_interval_closes() {
    let s = daily(false);
    assert_eq!(s.latest_complete(ts("2023-10-20")), None);
    assert_eq!(s.due_logical_date(None, ts("2023-11-01 23:59:59")), None);
    assert_eq!(s.next_fire_time(None, ts("2023-11-01 08:00:00")), ts("2023-11-02"));
}

#[test]
fn first_interval_is_due_at_its_end() {
    let s = daily(false);
    assert_eq!(s.due_logical_date(None, ts("2023-11-02")), Some(ts("2023-11-01")));
    assert_eq!(s.next_fire_time(None, ts("2023-11-02")), ts("2023-11-02"));
}

#[test]
fn without_catchup_missed_intervals_are_skipped() {
    let s = daily(false);
    let due = s.due_logical_date(Some(ts("2023-11-01")), ts("2023-11-05 10:00:00"));
    assert_eq!(due, Some(ts("2023-11-04")));
}

#[test]
fn with_catchup_the_oldest_missed_interval_runs_first() {
    let s = daily(true);
    let due = s.due_logical_date(Some(ts("2023-11-01")), ts("2023-11-05 10:00:00"));
    assert_eq!(due, Some(ts("2023-11-02")));
}

#[test]
fn after_the_latest_run_the_next_fire_is_the_following_midnight() {
    let s = daily(false);
    let now = ts("2023-11-05 10:00:00");
    assert_eq!(s.due_logical_date(Some(ts("2023-11-04")), now), None);
    assert_eq!(s.next_fire_time(Some(ts("2023-11-04")), now), ts("2023-11-06"));
}

#[test]
fn weekly_intervals_align_to_the_start_date() {
    let s = Schedule::new(ts("2023-11-01"), ScheduleInterval::Weekly, false);
    assert_eq!(s.latest_complete(ts("2023-11-20")), Some(ts("2023-11-08")));
    assert_eq!(s.due_logical_date(Some(ts("2023-11-08")), ts("2023-11-20")), None);
    assert_eq!(s.next_fire_time(Some(ts("2023-11-08")), ts("2023-11-20")), ts("2023-11-22"));
}

#[test]
fn production_config_schedules_daily_from_november_first() {
    let s = Schedule::from_config(&PipelineConfig::default()).expect("schedule");
    assert_eq!(s.start, ts("2023-11-01"));
    assert_eq!(s.interval, ScheduleInterval::Daily);
    assert!(!s.catchup);
}

#[test]
fn unparseable_start_date_is_a_config_error() {
    let config = PipelineConfig { start_date: "first of november".into(), ..PipelineConfig::default() };
    assert!(Schedule::from_config(&config).is_err());
}

#[test]
fn long_hourly_spans_do_not_truncate() {
    let s = Schedule::new(ts("2000-01-01"), ScheduleInterval::Hourly, false);
    assert_eq!(s.latest_complete(ts("2300-01-01")), Some(ts("2299-12-31 23:00:00")));
}
