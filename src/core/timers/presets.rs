use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// Predefined timer schedules, each armed under a fixed task id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimerPreset {
    EveryMinute,
    EveryFiveMinutes,
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl TimerPreset {
    pub const ALL: [TimerPreset; 6] = [
        TimerPreset::EveryMinute,
        TimerPreset::EveryFiveMinutes,
        TimerPreset::Hourly,
        TimerPreset::Daily,
        TimerPreset::Weekly,
        TimerPreset::Monthly,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            TimerPreset::EveryMinute => "minute-task",
            TimerPreset::EveryFiveMinutes => "five-minute-task",
            TimerPreset::Hourly => "hourly-task",
            TimerPreset::Daily => "daily-task",
            TimerPreset::Weekly => "weekly-task",
            TimerPreset::Monthly => "monthly-task",
        }
    }

    pub fn expression(&self) -> &'static str {
        match self {
            TimerPreset::EveryMinute => "* * * * *",
            TimerPreset::EveryFiveMinutes => "*/5 * * * *",
            TimerPreset::Hourly => "0 * * * *",
            TimerPreset::Daily => "0 0 * * *",
            TimerPreset::Weekly => "0 0 * * 0",
            TimerPreset::Monthly => "0 0 1 * *",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            TimerPreset::EveryMinute => "Runs every minute",
            TimerPreset::EveryFiveMinutes => "Runs every 5 minutes",
            TimerPreset::Hourly => "Runs at the top of every hour",
            TimerPreset::Daily => "Runs daily at midnight",
            TimerPreset::Weekly => "Runs every Sunday at midnight",
            TimerPreset::Monthly => "Runs on the first day of every month",
        }
    }

    pub fn from_id(id: &str) -> Option<TimerPreset> {
        TimerPreset::ALL.into_iter().find(|preset| preset.id() == id)
    }
}

impl fmt::Display for TimerPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for TimerPreset {
    type Err = AppError;

    /// Accepts short names (`minute`, `five-minutes`, `hourly`, ...) as well
    /// as task ids.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        let preset = match key.as_str() {
            "minute" | "every-minute" => Some(TimerPreset::EveryMinute),
            "five-minutes" | "5-minutes" | "every-five-minutes" => {
                Some(TimerPreset::EveryFiveMinutes)
            }
            "hourly" | "hour" => Some(TimerPreset::Hourly),
            "daily" | "day" => Some(TimerPreset::Daily),
            "weekly" | "week" => Some(TimerPreset::Weekly),
            "monthly" | "month" => Some(TimerPreset::Monthly),
            other => TimerPreset::from_id(other),
        };
        preset.ok_or_else(|| AppError::ConfigError(format!("unknown timer preset '{}'", s)))
    }
}
