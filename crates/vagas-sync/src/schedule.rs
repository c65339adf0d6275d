//! When to start the next cycle. Pure time arithmetic; the sleeping lives in
//! [`crate::run_scheduled`].

use std::str::FromStr;

use chrono::{DateTime, Days, Duration, FixedOffset, NaiveTime, TimeZone, Utc};

use crate::config::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Start a cycle this many minutes after the previous one started.
    Interval { minutes: u32 },
    /// Start at the top of each listed local hour.
    FixedHours(Vec<u32>),
}

impl Default for Schedule {
    fn default() -> Self {
        Self::Interval { minutes: 60 }
    }
}

impl FromStr for Schedule {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::Schedule {
            value: value.to_string(),
            reason: reason.to_string(),
        };
        let (kind, rest) = value
            .trim()
            .split_once(':')
            .ok_or_else(|| invalid("expected interval:<minutes> or hours:<h1,h2,..>"))?;

        match kind.trim() {
            "interval" => {
                let minutes: u32 = rest
                    .trim()
                    .parse()
                    .map_err(|_| invalid("minutes must be a whole number"))?;
                if minutes == 0 {
                    return Err(invalid("interval must be at least one minute"));
                }
                Ok(Self::Interval { minutes })
            }
            "hours" => {
                let mut hours = rest
                    .split(',')
                    .map(|h| h.trim().parse::<u32>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| invalid("hours must be whole numbers"))?;
                if hours.is_empty() || hours.iter().any(|h| *h > 23) {
                    return Err(invalid("hours must be between 0 and 23"));
                }
                hours.sort_unstable();
                hours.dedup();
                Ok(Self::FixedHours(hours))
            }
            _ => Err(invalid("unknown schedule kind")),
        }
    }
}

/// Holds the only state kept between cycles: when the last one started.
#[derive(Debug, Clone)]
pub struct Scheduler {
    schedule: Schedule,
    offset: FixedOffset,
    last_started: Option<DateTime<Utc>>,
}

impl Scheduler {
    pub fn new(schedule: Schedule, utc_offset_hours: i32) -> Result<Self, ConfigError> {
        let offset = utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ConfigError::InvalidEnv {
                name: "VAGAS_UTC_OFFSET_HOURS",
                value: utc_offset_hours.to_string(),
                reason: "offset out of range".to_string(),
            })?;
        Ok(Self {
            schedule,
            offset,
            last_started: None,
        })
    }

    pub fn last_started(&self) -> Option<DateTime<Utc>> {
        self.last_started
    }

    pub fn mark_started(&mut self, at: DateTime<Utc>) {
        self.last_started = Some(at);
    }

    /// Interval schedules run immediately the first time and then once per
    /// interval, never earlier than `now`. Fixed hours pick the first listed
    /// local hour strictly after `now`.
    pub fn next_run_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match &self.schedule {
            Schedule::Interval { minutes } => match self.last_started {
                None => now,
                Some(last) => (last + Duration::minutes(i64::from(*minutes))).max(now),
            },
            Schedule::FixedHours(hours) => self.next_fixed_hour(hours, now),
        }
    }

    fn next_fixed_hour(&self, hours: &[u32], now: DateTime<Utc>) -> DateTime<Utc> {
        let local_now = now.with_timezone(&self.offset);
        let today = local_now.date_naive();
        let candidates = [Some(today), today.checked_add_days(Days::new(1))];

        candidates
            .into_iter()
            .flatten()
            .flat_map(|day| {
                hours.iter().filter_map(move |hour| {
                    let time = NaiveTime::from_hms_opt(*hour, 0, 0)?;
                    self.offset
                        .from_local_datetime(&day.and_time(time))
                        .single()
                })
            })
            .map(|at| at.with_timezone(&Utc))
            .find(|at| *at > now)
            .unwrap_or(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn parses_both_schedule_forms() {
        assert_eq!("interval:30".parse::<Schedule>().unwrap(), Schedule::Interval { minutes: 30 });
        assert_eq!(
            " hours: 18, 9 ,9".parse::<Schedule>().unwrap(),
            Schedule::FixedHours(vec![9, 18])
        );
        for bad in ["", "interval:0", "interval:x", "hours:", "hours:24", "cron:* * *"] {
            assert!(bad.parse::<Schedule>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn interval_runs_now_then_waits_out_the_remainder() {
        let mut scheduler = Scheduler::new(Schedule::Interval { minutes: 60 }, -3).unwrap();
        let now = utc("2024-05-01T12:00:00Z");
        assert_eq!(scheduler.next_run_at(now), now);

        scheduler.mark_started(now);
        assert_eq!(
            scheduler.next_run_at(utc("2024-05-01T12:20:00Z")),
            utc("2024-05-01T13:00:00Z")
        );
        // A cycle that overran its interval starts the next one right away.
        let late = utc("2024-05-01T13:45:00Z");
        assert_eq!(scheduler.next_run_at(late), late);
    }

    #[test]
    fn fixed_hours_use_the_local_offset() {
        let scheduler = Scheduler::new(Schedule::FixedHours(vec![9, 18]), -3).unwrap();
        // 10:00 local.
        assert_eq!(
            scheduler.next_run_at(utc("2024-05-01T13:00:00Z")),
            utc("2024-05-01T21:00:00Z")
        );
        // 19:00 local rolls over to 09:00 local tomorrow.
        assert_eq!(
            scheduler.next_run_at(utc("2024-05-01T22:00:00Z")),
            utc("2024-05-02T12:00:00Z")
        );
        // Exactly on the hour waits for the next slot.
        assert_eq!(
            scheduler.next_run_at(utc("2024-05-01T12:00:00Z")),
            utc("2024-05-01T21:00:00Z")
        );
    }

    #[test]
    fn next_run_is_a_pure_function_of_now_and_last_start() {
        let mut scheduler = Scheduler::new(Schedule::FixedHours(vec![6]), 0).unwrap();
        let now = utc("2024-05-01T05:59:59Z");
        assert_eq!(scheduler.next_run_at(now), scheduler.next_run_at(now));
        scheduler.mark_started(now);
        assert_eq!(scheduler.next_run_at(now), utc("2024-05-01T06:00:00Z"));
        assert_eq!(scheduler.last_started(), Some(now));
    }

    #[test]
    fn out_of_range_offsets_are_rejected() {
        assert!(Scheduler::new(Schedule::default(), 30).is_err());
        for hours in [i32::MAX, i32::MIN, 600_000] {
            let err = Scheduler::new(Schedule::default(), hours).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidEnv { name: "VAGAS_UTC_OFFSET_HOURS", .. }));
        }
    }
}
