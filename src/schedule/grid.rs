use chrono::{NaiveDate, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::model::*;

use super::ScheduleError;

const HOUR_MS: Ms = 60 * MINUTE_MS;
const DAY_MS: Ms = 24 * HOUR_MS;

/// Shape of the bookable day: 25 half-hour slots from 08:00 puts the last
/// slot start at 20:00.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridConfig {
    pub start_hour: u32,
    pub step_minutes: u32,
    pub slot_count: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            start_hour: 8,
            step_minutes: 30,
            slot_count: 25,
        }
    }
}

/// Candidate slot sequence for one calendar day in the caller's time zone.
///
/// `slot(i).start = local(day, start_hour) + i * step`, added in absolute
/// time. Cheap to clone; `iter()` can be restarted any number of times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeGrid {
    day: NaiveDate,
    day_start: Ms,
    first_start: Ms,
    step: Ms,
    count: u32,
}

impl TimeGrid {
    pub fn new(day: NaiveDate, tz: Tz, config: GridConfig) -> Result<Self, ScheduleError> {
        if config.step_minutes == 0 {
            return Err(ScheduleError::invalid("grid step must be positive"));
        }
        if config.slot_count == 0 {
            return Err(ScheduleError::invalid("grid must contain at least one slot"));
        }
        let opening = day.and_hms_opt(config.start_hour, 0, 0).ok_or_else(|| {
            ScheduleError::invalid(format!("start hour {} out of range", config.start_hour))
        })?;
        let first_start = tz
            .from_local_datetime(&opening)
            .earliest()
            .ok_or_else(|| {
                ScheduleError::invalid(format!("{opening} does not exist in {}", tz.name()))
            })?
            .timestamp_millis();

        // Local midnight can fall in a DST gap; the opening time is then
        // the only trustworthy anchor.
        let day_start = day
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| tz.from_local_datetime(&midnight).earliest())
            .map(|dt| dt.timestamp_millis())
            .unwrap_or(first_start - Ms::from(config.start_hour) * HOUR_MS);

        Ok(Self {
            day,
            day_start,
            first_start,
            step: Ms::from(config.step_minutes) * MINUTE_MS,
            count: config.slot_count,
        })
    }

    /// Parse a `YYYY-MM-DD` day.
    pub fn parse(day: &str, tz: Tz, config: GridConfig) -> Result<Self, ScheduleError> {
        let trimmed = day.trim();
        if trimmed.is_empty() {
            return Err(ScheduleError::invalid("day is empty"));
        }
        let parsed = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .map_err(|e| ScheduleError::invalid(format!("unparseable day {trimmed:?}: {e}")))?;
        Self::new(parsed, tz, config)
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn step_ms(&self) -> Ms {
        self.step
    }

    pub fn slot(&self, i: usize) -> Option<TimeSlot> {
        (i < self.len()).then(|| TimeSlot {
            start: self.first_start + i as Ms * self.step,
            step: self.step,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = TimeSlot> + '_ {
        (0..self.len()).filter_map(|i| self.slot(i))
    }

    /// Index of the slot starting exactly at `start`.
    pub fn index_of(&self, start: Ms) -> Option<usize> {
        let offset = start - self.first_start;
        if offset < 0 || offset % self.step != 0 {
            return None;
        }
        let i = (offset / self.step) as usize;
        (i < self.len()).then_some(i)
    }

    /// Range of appointments that can affect any slot of this day for an
    /// appointment of `duration_ms`. Starts at local midnight so that an
    /// appointment ending exactly at the first slot is still fetched.
    pub fn fetch_window(&self, duration_ms: Ms) -> Span {
        let last_start = self.first_start + (self.count as Ms - 1) * self.step;
        let end = (last_start + duration_ms.max(self.step)).max(self.day_start + DAY_MS);
        Span::new(self.day_start, end)
    }
}
