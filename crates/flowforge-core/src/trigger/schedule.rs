//! Schedule parsing for time triggers.
//!
//! A time trigger carries either a `cron` property (5 or 6 fields) or a
//! `schedule` property with a human phrase. Both are normalised to a
//! 6-field (seconds-first) cron expression and evaluated with `croner`.

use chrono::{DateTime, Utc};
use flowforge_types::execution::WorkflowTrigger;
use flowforge_types::workflow::TriggerConfig;

use super::TriggerError;

pub const CRON_PROPERTY: &str = "cron";
pub const SCHEDULE_PROPERTY: &str = "schedule";

/// Turn a schedule phrase or cron expression into 6-field cron.
///
/// Accepted phrases (case-insensitive): `every minute`, `minutely`,
/// `every hour`, `hourly`, `every day`, `daily`, `every day at HH:MM`,
/// `every N seconds|minutes|hours` (N below 60, 60 and 24 respectively).
pub fn normalize_schedule(input: &str) -> Result<String, TriggerError> {
    let trimmed = input.trim();
    let invalid = || TriggerError::InvalidSchedule(input.to_string());

    match trimmed.split_whitespace().count() {
        5 => return Ok(format!("0 {trimmed}")),
        6 => return Ok(trimmed.to_string()),
        _ => {}
    }

    let lower = trimmed.to_lowercase();
    match lower.as_str() {
        "every minute" | "minutely" => return Ok("0 * * * * *".into()),
        "every hour" | "hourly" => return Ok("0 0 * * * *".into()),
        "every day" | "daily" => return Ok("0 0 0 * * *".into()),
        _ => {}
    }

    let rest = lower.strip_prefix("every ").ok_or_else(invalid)?;

    if let Some(at) = rest.strip_prefix("day at ") {
        let (hour, minute) = at.trim().split_once(':').ok_or_else(invalid)?;
        let hour: u32 = hour.parse().map_err(|_| invalid())?;
        let minute: u32 = minute.parse().map_err(|_| invalid())?;
        if hour >= 24 || minute >= 60 {
            return Err(invalid());
        }
        return Ok(format!("0 {minute} {hour} * * *"));
    }

    let mut words = rest.split_whitespace();
    let (Some(n), Some(unit), None) = (words.next(), words.next(), words.next()) else {
        return Err(invalid());
    };
    let n: u32 = n.parse().map_err(|_| invalid())?;
    if n == 0 {
        return Err(invalid());
    }
    let (unit, range) = match unit.trim_end_matches('s') {
        "second" => ("second", 60),
        "minute" => ("minute", 60),
        "hour" => ("hour", 24),
        _ => return Err(invalid()),
    };
    // A cron step cannot exceed its field; `*/90` minutes would fire hourly.
    if n >= range {
        return Err(TriggerError::InvalidSchedule(format!(
            "{input}: every N {unit}s needs N below {range}"
        )));
    }
    Ok(match unit {
        "second" => format!("*/{n} * * * * *"),
        "minute" => format!("0 */{n} * * * *"),
        _ => format!("0 0 */{n} * * *"),
    })
}

/// A parsed trigger schedule.
pub struct TimeSchedule {
    expression: String,
    cron: croner::Cron,
}

impl TimeSchedule {
    pub fn parse(input: &str) -> Result<Self, TriggerError> {
        let expression = normalize_schedule(input)?;
        let cron = expression
            .parse::<croner::Cron>()
            .map_err(|e| TriggerError::InvalidSchedule(format!("{input}: {e}")))?;
        Ok(Self { expression, cron })
    }

    /// Schedule of a persisted trigger (`cron` wins over `schedule`).
    pub fn of_trigger(trigger: &WorkflowTrigger) -> Result<Self, TriggerError> {
        let raw = trigger
            .property(CRON_PROPERTY)
            .or_else(|| trigger.property(SCHEDULE_PROPERTY))
            .ok_or_else(|| TriggerError::MissingProperty {
                trigger: trigger.id.to_string(),
                property: CRON_PROPERTY,
            })?;
        Self::parse(&raw)
    }

    /// Schedule declared in a definition's trigger configuration.
    pub fn of_config(config: &TriggerConfig) -> Result<Self, TriggerError> {
        let raw = config
            .property(CRON_PROPERTY)
            .or_else(|| config.property(SCHEDULE_PROPERTY))
            .ok_or_else(|| TriggerError::MissingProperty {
                trigger: config.trigger_type.to_string(),
                property: CRON_PROPERTY,
            })?;
        Self::parse(&raw)
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First occurrence strictly after `from`.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.cron.iter_after(from).next()
    }

    /// The occurrence that makes the trigger due at `now`, if any.
    ///
    /// The baseline is the last firing (or creation); every occurrence
    /// between the baseline and `now` is coalesced into this one.
    pub fn due_occurrence(
        &self,
        last_fired_at: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let baseline = last_fired_at.unwrap_or(created_at);
        self.next_after(baseline).filter(|next| *next <= now)
    }
}

impl std::fmt::Debug for TimeSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSchedule")
            .field("expression", &self.expression)
            .finish()
    }
}
