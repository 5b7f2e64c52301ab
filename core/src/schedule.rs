//! Schedule arithmetic: cadence, logical dates, and the no-catch-up rule.
//!
//! A run for the logical interval `[d, d + step)` becomes due at
//! `d + step`. Logical dates are aligned to `start_date` at midnight.

use crate::{
    config::PipelineConfig,
    error::{PipelineError, PipelineResult},
    types::{parse_ts, Timestamp},
};
use chrono::Duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScheduleInterval {
    #[serde(rename = "@hourly")]
    Hourly,
    #[serde(rename = "@daily")]
    Daily,
    #[serde(rename = "@weekly")]
    Weekly,
}

impl ScheduleInterval {
    pub fn step(&self) -> Duration {
        match self {
            Self::Hourly => Duration::hours(1),
            Self::Daily  => Duration::days(1),
            Self::Weekly => Duration::days(7),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub start:    Timestamp,
    pub interval: ScheduleInterval,
    pub catchup:  bool,
}

impl Schedule {
    pub fn new(start: Timestamp, interval: ScheduleInterval, catchup: bool) -> Self {
        Self { start, interval, catchup }
    }

    pub fn from_config(config: &PipelineConfig) -> PipelineResult<Self> {
        let start = parse_ts(&config.start_date).ok_or_else(|| {
            PipelineError::Config(format!("start_date '{}' is not a date", config.start_date))
        })?;
        Ok(Self::new(start, config.schedule_interval, config.catchup))
    }

    /// Most recent logical date whose interval has fully elapsed at `now`.
    pub fn latest_complete(&self, now: Timestamp) -> Option<Timestamp> {
        let step = self.interval.step();
        if now < self.start + step {
            return None;
        }
        let step_secs = step.num_seconds();
        let intervals = (now - self.start).num_seconds() / step_secs;
        Some(self.start + Duration::seconds(step_secs * (intervals - 1)))
    }

    /// Logical date that should run now, given the last scheduled one.
    ///
    /// Without catch-up only the most recent due interval is returned and
    /// every earlier missed interval is skipped.
    pub fn due_logical_date(&self, last: Option<Timestamp>, now: Timestamp) -> Option<Timestamp> {
        let candidate = self.next_candidate(last);
        let latest = self.latest_complete(now)?;
        if candidate > latest {
            return None;
        }
        if self.catchup {
            Some(candidate)
        } else {
            Some(latest)
        }
    }

    /// When the scheduler should wake up next.
    pub fn next_fire_time(&self, last: Option<Timestamp>, now: Timestamp) -> Timestamp {
        if self.due_logical_date(last, now).is_some() {
            return now;
        }
        self.next_candidate(last) + self.interval.step()
    }

    fn next_candidate(&self, last: Option<Timestamp>) -> Timestamp {
        match last {
            Some(d) => (d + self.interval.step()).max(self.start),
            None    => self.start,
        }
    }
}
