//! Recurrence expressions
//!
//! Supported forms (all UTC):
//!
//! | Expression      | Meaning                         |
//! |-----------------|---------------------------------|
//! | `@every 30m`    | fixed interval (`s`, `m`, `h`, `d`) |
//! | `@hourly`       | every hour on the hour          |
//! | `@daily`        | every day at 00:00              |
//! | `hourly :15`    | every hour at minute 15         |
//! | `daily 02:00`   | every day at 02:00              |

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveTime, Utc};

use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recurrence {
    Every(Duration),
    HourlyAt { minute: u32 },
    DailyAt(NaiveTime),
}

impl Recurrence {
    /// First firing strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Recurrence::Every(interval) => after + *interval,
            Recurrence::HourlyAt { minute } => {
                let into_hour = Duration::seconds(after.timestamp().rem_euclid(3600))
                    + Duration::nanoseconds(i64::from(after.timestamp_subsec_nanos()));
                let candidate = after - into_hour + Duration::minutes(i64::from(*minute));
                if candidate > after {
                    candidate
                } else {
                    candidate + Duration::hours(1)
                }
            }
            Recurrence::DailyAt(time) => {
                let candidate = after.date_naive().and_time(*time).and_utc();
                if candidate > after {
                    candidate
                } else {
                    candidate + Duration::days(1)
                }
            }
        }
    }
}

impl FromStr for Recurrence {
    type Err = Error;

    fn from_str(expression: &str) -> Result<Self, Self::Err> {
        let expression = expression.trim();
        let invalid = |why: &str| Error::schedule(format!("invalid recurrence '{}': {}", expression, why));

        match expression {
            "@hourly" => return Ok(Recurrence::HourlyAt { minute: 0 }),
            "@daily" => return Ok(Recurrence::DailyAt(NaiveTime::default())),
            _ => {}
        }

        if let Some(interval) = expression.strip_prefix("@every ") {
            let interval = interval.trim();
            let Some((split, _)) = interval.char_indices().last() else {
                return Err(invalid("expected '@every <n><s|m|h|d>'"));
            };
            let (amount, unit) = interval.split_at(split);
            let amount: i64 = amount
                .parse()
                .map_err(|_| invalid("expected '@every <n><s|m|h|d>'"))?;
            if amount <= 0 {
                return Err(invalid("interval must be positive"));
            }
            let interval = match unit {
                "s" => Duration::try_seconds(amount),
                "m" => Duration::try_minutes(amount),
                "h" => Duration::try_hours(amount),
                "d" => Duration::try_days(amount),
                _ => return Err(invalid("unit must be one of s, m, h, d")),
            };
            return interval
                .map(Recurrence::Every)
                .ok_or_else(|| invalid("interval too large"));
        }

        if let Some(minute) = expression.strip_prefix("hourly :") {
            let minute: u32 = minute
                .trim()
                .parse()
                .map_err(|_| invalid("expected 'hourly :MM'"))?;
            if minute >= 60 {
                return Err(invalid("minute must be below 60"));
            }
            return Ok(Recurrence::HourlyAt { minute });
        }

        if let Some(time) = expression.strip_prefix("daily ") {
            let time = NaiveTime::parse_from_str(time.trim(), "%H:%M")
                .map_err(|_| invalid("expected 'daily HH:MM'"))?;
            return Ok(Recurrence::DailyAt(time));
        }

        Err(invalid("unsupported form"))
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recurrence::Every(interval) => {
                let secs = interval.num_seconds();
                if secs % 86_400 == 0 {
                    write!(f, "@every {}d", secs / 86_400)
                } else if secs % 3600 == 0 {
                    write!(f, "@every {}h", secs / 3600)
                } else if secs % 60 == 0 {
                    write!(f, "@every {}m", secs / 60)
                } else {
                    write!(f, "@every {}s", secs)
                }
            }
            Recurrence::HourlyAt { minute } => write!(f, "hourly :{:02}", minute),
            Recurrence::DailyAt(time) => write!(f, "daily {}", time.format("%H:%M")),
        }
    }
}
