use chrono::{DateTime, Datelike, Duration, FixedOffset, TimeZone, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::ports::ScheduleSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl DayOfWeek {
    pub fn index(self) -> usize {
        match self {
            Self::Mon => 0,
            Self::Tue => 1,
            Self::Wed => 2,
            Self::Thu => 3,
            Self::Fri => 4,
            Self::Sat => 5,
            Self::Sun => 6,
        }
    }

    pub fn from_index(index: usize) -> Self {
        match index % 7 {
            0 => Self::Mon,
            1 => Self::Tue,
            2 => Self::Wed,
            3 => Self::Thu,
            4 => Self::Fri,
            5 => Self::Sat,
            _ => Self::Sun,
        }
    }

    pub fn from_chrono(weekday: Weekday) -> Self {
        Self::from_index(weekday.num_days_from_monday() as usize)
    }
}

/// Switches the comfort period on or off from `start_minutes` onwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub day: DayOfWeek,
    #[serde(rename = "startMinutes")]
    pub start_minutes: u16,
    pub active: bool,
}

impl ScheduleEntry {
    pub fn validate(&self) -> bool {
        self.start_minutes < 24 * 60
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schedule {
    pub enabled: bool,
    pub entries: Vec<ScheduleEntry>,
}

impl Schedule {
    pub fn normalize(&mut self) {
        self.entries.retain(ScheduleEntry::validate);
        self.entries
            .sort_by_key(|entry| (entry.day.index(), entry.start_minutes));
        self.entries
            .dedup_by_key(|entry| (entry.day.index(), entry.start_minutes));
    }

    /// Comfort state in effect at `now`, `None` when the schedule has nothing to say.
    pub fn state_at(&self, now: DateTime<FixedOffset>) -> Option<bool> {
        if !self.enabled || self.entries.is_empty() {
            return None;
        }

        let day = DayOfWeek::from_chrono(now.weekday());
        let current_minutes = now.hour() as u16 * 60 + now.minute() as u16;

        // Current day, last entry <= now.
        let mut best: Option<&ScheduleEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.day == day && entry.start_minutes <= current_minutes)
            .max_by_key(|entry| entry.start_minutes);

        // Wrap to previous days until we find one.
        if best.is_none() {
            for i in 1..=7 {
                let candidate_day = DayOfWeek::from_index((day.index() + 7 - i) % 7);
                best = self
                    .entries
                    .iter()
                    .filter(|entry| entry.day == candidate_day)
                    .max_by_key(|entry| entry.start_minutes);

                if best.is_some() {
                    break;
                }
            }
        }

        best.map(|entry| entry.active)
    }

    /// Next instant an inactive schedule turns active.
    pub fn next_activation(&self, now: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
        let mut active = self.state_at(now)?;

        for (at, entry) in self.upcoming(now) {
            if entry.active && !active {
                return Some(at);
            }
            active = entry.active;
        }
        None
    }

    /// Entries of the coming week in chronological order, strictly after `now`.
    fn upcoming(&self, now: DateTime<FixedOffset>) -> Vec<(DateTime<FixedOffset>, &ScheduleEntry)> {
        let now_day = DayOfWeek::from_chrono(now.weekday());
        let now_minute = now.hour() as u16 * 60 + now.minute() as u16;

        let mut candidates = Vec::new();
        for day_offset in 0..=7i64 {
            let day = DayOfWeek::from_index((now_day.index() + day_offset as usize) % 7);
            for entry in self.entries.iter().filter(|entry| entry.day == day) {
                if day_offset == 0 && entry.start_minutes <= now_minute {
                    continue;
                }
                if day_offset == 7 && entry.start_minutes > now_minute {
                    continue;
                }

                let date = now.date_naive() + Duration::days(day_offset);
                let hour = (entry.start_minutes / 60) as u32;
                let minute = (entry.start_minutes % 60) as u32;

                let Some(naive) = date.and_hms_opt(hour, minute, 0) else {
                    continue;
                };

                let Some(candidate) = now.offset().from_local_datetime(&naive).single() else {
                    continue;
                };

                candidates.push((candidate, entry));
            }
        }

        candidates.sort_by_key(|(at, _)| *at);
        candidates
    }
}

impl ScheduleSource for Schedule {
    fn is_active(&self, now: DateTime<FixedOffset>) -> bool {
        self.state_at(now).unwrap_or(false)
    }

    fn next_activation_time(&self, now: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
        self.next_activation(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_time(day: u32, hour: u32, minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2026, 1, day, hour, minute, 0)
            .unwrap()
    }

    fn weekday_mornings() -> Schedule {
        let mut entries = Vec::new();
        for day in [DayOfWeek::Mon, DayOfWeek::Tue] {
            entries.push(ScheduleEntry {
                day,
                start_minutes: 7 * 60,
                active: true,
            });
            entries.push(ScheduleEntry {
                day,
                start_minutes: 9 * 60,
                active: false,
            });
        }
        let mut schedule = Schedule {
            enabled: true,
            entries,
        };
        schedule.normalize();
        schedule
    }

    #[test]
    fn wraps_schedule_to_previous_day() {
        let mut schedule = Schedule {
            enabled: true,
            entries: vec![ScheduleEntry {
                day: DayOfWeek::Sun,
                start_minutes: 23 * 60,
                active: true,
            }],
        };
        schedule.normalize();

        // Monday 08:00 should still be affected by Sunday 23:00 program.
        let now = fixed_time(5, 8, 0); // Jan 5, 2026 is Monday.
        assert!(schedule.is_active(now));
    }

    #[test]
    fn active_window_is_detected() {
        let schedule = weekday_mornings();

        assert!(!schedule.is_active(fixed_time(5, 6, 59)));
        assert!(schedule.is_active(fixed_time(5, 7, 0)));
        assert!(schedule.is_active(fixed_time(5, 8, 59)));
        assert!(!schedule.is_active(fixed_time(5, 9, 0)));
    }

    #[test]
    fn next_activation_skips_the_current_active_period() {
        let schedule = weekday_mornings();

        assert_eq!(
            schedule.next_activation(fixed_time(5, 6, 0)),
            Some(fixed_time(5, 7, 0))
        );
        assert_eq!(
            schedule.next_activation(fixed_time(5, 8, 0)),
            Some(fixed_time(6, 7, 0))
        );
        // Tuesday after 09:00 wraps to next Monday.
        assert_eq!(
            schedule.next_activation(fixed_time(6, 10, 0)),
            Some(fixed_time(12, 7, 0))
        );
    }

    #[test]
    fn disabled_schedule_is_inactive_without_activation() {
        let mut schedule = weekday_mornings();
        schedule.enabled = false;

        assert!(!schedule.is_active(fixed_time(5, 8, 0)));
        assert_eq!(schedule.next_activation_time(fixed_time(5, 6, 0)), None);
    }

    #[test]
    fn normalize_drops_invalid_and_duplicate_entries() {
        let mut schedule = Schedule {
            enabled: true,
            entries: vec![
                ScheduleEntry {
                    day: DayOfWeek::Wed,
                    start_minutes: 24 * 60,
                    active: true,
                },
                ScheduleEntry {
                    day: DayOfWeek::Mon,
                    start_minutes: 60,
                    active: true,
                },
                ScheduleEntry {
                    day: DayOfWeek::Mon,
                    start_minutes: 60,
                    active: false,
                },
            ],
        };
        schedule.normalize();

        assert_eq!(schedule.entries.len(), 1);
        assert_eq!(schedule.entries[0].day, DayOfWeek::Mon);
    }
}
