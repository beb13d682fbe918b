use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

use crate::error::{AppError, Result};

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// A validated cron pattern.
///
/// Accepts the classic five-field form (`min hour dom month dow`) and the
/// six-field form with a leading seconds column. Day-of-week follows the
/// usual crontab numbering where both 0 and 7 mean Sunday.
#[derive(Debug, Clone)]
pub struct CronExpression {
    source: String,
    schedule: Schedule,
}

impl CronExpression {
    pub fn parse(expression: &str) -> Result<Self> {
        let invalid = |reason: String| AppError::InvalidCronExpression {
            expression: expression.to_string(),
            reason,
        };

        let mut fields: Vec<String> = expression.split_whitespace().map(str::to_string).collect();
        match fields.len() {
            5 => fields.insert(0, "0".to_string()),
            6 => {}
            n => return Err(invalid(format!("expected 5 or 6 fields, found {}", n))),
        }

        fields[5] = translate_day_of_week(&fields[5]).map_err(invalid)?;

        let schedule =
            Schedule::from_str(&fields.join(" ")).map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            source: expression.trim().to_string(),
            schedule,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// First firing strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(after).next()
    }
}

// The cron crate numbers days 1-7 from Sunday; crontab uses 0-7. Numeric
// days are rewritten as names, which both agree on.
fn translate_day_of_week(field: &str) -> std::result::Result<String, String> {
    field
        .split(',')
        .map(translate_day_item)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map(|items| items.join(","))
}

fn translate_day_item(item: &str) -> std::result::Result<String, String> {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (item, None),
    };

    let range = match (range.split_once('-'), step) {
        // 7 is Sunday again, which would invert the range
        (Some((start, "7")), None) => format!("{}-SAT,SUN", day_name(start)?),
        (Some((start, "7")), Some(step)) => return stepped_through_sunday(start, step),
        (Some((start, end)), _) => format!("{}-{}", day_name(start)?, day_name(end)?),
        (None, _) => day_name(range)?,
    };

    Ok(match step {
        Some(step) => format!("{}/{}", range, step),
        None => range,
    })
}

// Expands `start-7/step` into an explicit list of day names.
fn stepped_through_sunday(start: &str, step: &str) -> std::result::Result<String, String> {
    let first = start
        .parse::<usize>()
        .ok()
        .or_else(|| DAY_NAMES.iter().position(|day| day.eq_ignore_ascii_case(start)))
        .filter(|day| *day <= 7)
        .ok_or_else(|| format!("invalid day of week '{}'", start))?;
    let step = step
        .parse::<usize>()
        .ok()
        .filter(|step| *step > 0)
        .ok_or_else(|| format!("invalid step '{}'", step))?;

    let mut days: Vec<&str> = Vec::new();
    for day in (first..=7).step_by(step) {
        let name = DAY_NAMES[day % 7];
        if !days.contains(&name) {
            days.push(name);
        }
    }
    Ok(days.join(","))
}

fn day_name(token: &str) -> std::result::Result<String, String> {
    match token.parse::<usize>() {
        Ok(day) if day <= 7 => Ok(DAY_NAMES[day % 7].to_string()),
        Ok(day) => Err(format!("day of week {} is out of range 0-7", day)),
        Err(_) => Ok(token.to_string()),
    }
}
