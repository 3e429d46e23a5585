//! Cron expressions and triggers
//!
//! Schedules are written in standard crontab syntax with five fields
//! (`minute hour day-of-month month day-of-week`). The `cron` crate expects a
//! leading seconds field and numbers days of the week from 1 (Sunday), so
//! expressions are normalised before being compiled:
//!
//! - a `0` seconds field is prepended;
//! - numeric day-of-week values (crontab: 0 and 7 are Sunday) are rewritten as
//!   day names. Named values pass through unchanged.

use crate::error::{OperatorError, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::collections::BTreeSet;
use std::str::FromStr;

/// Number of fields in a crontab expression
pub const CRON_FIELD_COUNT: usize = 5;

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Structural validation: exactly five whitespace-separated fields.
///
/// Field values are not range-checked here.
pub fn validate_cron_expression(expression: &str) -> Result<()> {
    let fields = expression.split_whitespace().count();
    if fields != CRON_FIELD_COUNT {
        return Err(OperatorError::Validation(format!(
            "cron expression must have 5 fields (minute hour day month weekday), got {}: '{}'",
            fields, expression
        )));
    }
    Ok(())
}

/// Parse an IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim().parse::<Tz>().map_err(|e| {
        OperatorError::Validation(format!("invalid timezone '{}': {}", name, e))
    })
}

/// Rewrite a validated 5-field expression into the 6-field form the engine parses.
fn normalize_cron(expression: &str) -> Result<String> {
    validate_cron_expression(expression)?;
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let day_of_week = translate_day_of_week(fields[4])?;
    Ok(format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], day_of_week
    ))
}

fn translate_day_of_week(field: &str) -> Result<String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let invalid = || OperatorError::Validation(format!("invalid day-of-week field '{}'", field));
    let mut named: Vec<String> = Vec::new();
    let mut days: BTreeSet<u32> = BTreeSet::new();

    for item in field.split(',') {
        if item.chars().any(|c| c.is_ascii_alphabetic()) {
            named.push(item.to_string());
            continue;
        }

        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid())?;
                if step == 0 {
                    return Err(invalid());
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = if range == "*" {
            (0, 6)
        } else if let Some((a, b)) = range.split_once('-') {
            (a.parse().map_err(|_| invalid())?, b.parse().map_err(|_| invalid())?)
        } else {
            let a: u32 = range.parse().map_err(|_| invalid())?;
            // crontab reads "a/n" as "a through the maximum, every n"
            if step.is_some() {
                (a, 7)
            } else {
                (a, a)
            }
        };

        if start > end || end > 7 {
            return Err(invalid());
        }
        for day in (start..=end).step_by(step.unwrap_or(1) as usize) {
            days.insert(day % 7);
        }
    }

    if named.is_empty() && days.len() == DAY_NAMES.len() {
        return Ok("*".to_string());
    }

    let mut parts: Vec<String> = days.iter().map(|d| DAY_NAMES[*d as usize].to_string()).collect();
    parts.extend(named);
    Ok(parts.join(","))
}

/// A compiled cron expression bound to a timezone
#[derive(Debug, Clone)]
pub struct CronTrigger {
    expression: String,
    timezone: Tz,
    schedule: Schedule,
}

impl CronTrigger {
    /// Compile a 5-field expression evaluated in the IANA zone `timezone`.
    pub fn parse(expression: &str, timezone: &str) -> Result<Self> {
        let timezone = parse_timezone(timezone)?;
        let normalized = normalize_cron(expression)?;
        let schedule = Schedule::from_str(&normalized).map_err(|e| {
            OperatorError::Validation(format!("invalid cron expression '{}': {}", expression, e))
        })?;
        Ok(Self {
            expression: expression.trim().to_string(),
            timezone,
            schedule,
        })
    }

    /// First fire strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&self.timezone);
        self.schedule
            .after(&local)
            .next()
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_validate_field_count() {
        assert!(validate_cron_expression("0 18 * * 1-5").is_ok());
        assert!(validate_cron_expression("  0   18 *  * 1-5 ").is_ok());
        assert!(validate_cron_expression("0 18 * *").is_err());
        assert!(validate_cron_expression("0 0 18 * * 1-5").is_err());
        assert!(validate_cron_expression("").is_err());
    }

    #[test]
    fn test_validation_is_structural_only() {
        // five fields are accepted regardless of what they contain
        assert!(validate_cron_expression("99 99 99 99 99").is_ok());
        assert!(validate_cron_expression("a b c d e").is_ok());
    }

    #[test]
    fn test_day_of_week_translation() {
        assert_eq!(translate_day_of_week("*").unwrap(), "*");
        assert_eq!(translate_day_of_week("1-5").unwrap(), "Mon,Tue,Wed,Thu,Fri");
        assert_eq!(translate_day_of_week("0").unwrap(), "Sun");
        assert_eq!(translate_day_of_week("7").unwrap(), "Sun");
        assert_eq!(translate_day_of_week("5-7").unwrap(), "Sun,Fri,Sat");
        assert_eq!(translate_day_of_week("*/2").unwrap(), "Sun,Tue,Thu,Sat");
        assert_eq!(translate_day_of_week("0-7").unwrap(), "*");
        assert_eq!(translate_day_of_week("MON-FRI").unwrap(), "MON-FRI");
        assert!(translate_day_of_week("8").is_err());
        assert!(translate_day_of_week("5-2").is_err());
        assert!(translate_day_of_week("1/0").is_err());
    }

    #[test]
    fn test_normalize_prepends_seconds() {
        assert_eq!(normalize_cron("30 8 * * *").unwrap(), "0 30 8 * * *");
        assert_eq!(normalize_cron("0 18 * * 1-5").unwrap(), "0 0 18 * * Mon,Tue,Wed,Thu,Fri");
    }

    #[test]
    fn test_trigger_weekdays() {
        let trigger = CronTrigger::parse("0 18 * * 1-5", "UTC").unwrap();

        // Friday 2026-01-02 17:00 → same day 18:00
        let friday = Utc.with_ymd_and_hms(2026, 1, 2, 17, 0, 0).unwrap();
        assert_eq!(
            trigger.next_after(friday),
            Some(Utc.with_ymd_and_hms(2026, 1, 2, 18, 0, 0).unwrap())
        );

        // Friday after the fire → Monday 2026-01-05 18:00
        let later = Utc.with_ymd_and_hms(2026, 1, 2, 19, 0, 0).unwrap();
        assert_eq!(
            trigger.next_after(later),
            Some(Utc.with_ymd_and_hms(2026, 1, 5, 18, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_trigger_next_is_strictly_after() {
        let trigger = CronTrigger::parse("0 8 * * *", "UTC").unwrap();
        let at_fire = Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap();
        assert_eq!(
            trigger.next_after(at_fire),
            Some(Utc.with_ymd_and_hms(2026, 3, 11, 8, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_trigger_respects_timezone() {
        // Berlin is UTC+1 in January
        let trigger = CronTrigger::parse("0 8 * * *", "Europe/Berlin").unwrap();
        let start = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();
        assert_eq!(
            trigger.next_after(start),
            Some(Utc.with_ymd_and_hms(2026, 1, 10, 7, 0, 0).unwrap())
        );
        assert_eq!(trigger.timezone(), chrono_tz::Europe::Berlin);
    }

    #[test]
    fn test_trigger_rejects_bad_input() {
        assert!(matches!(
            CronTrigger::parse("0 18 * *", "UTC"),
            Err(OperatorError::Validation(_))
        ));
        assert!(matches!(
            CronTrigger::parse("0 18 * * 1-5", "Mars/Olympus"),
            Err(OperatorError::Validation(_))
        ));
        assert!(matches!(
            CronTrigger::parse("99 18 * * *", "UTC"),
            Err(OperatorError::Validation(_))
        ));
    }
}
