use chrono::{DateTime, Duration, Utc};

/// Whether a rule last triggered at `last_triggered` may trigger again at `now`.
///
/// The cooldown runs from the last trigger, whatever happened to the instance
/// since. Cooldowns under one minute count as one minute.
pub fn permitted(
    last_triggered: Option<DateTime<Utc>>,
    cooldown_minutes: u32,
    now: DateTime<Utc>,
) -> bool {
    match last_triggered {
        None => true,
        Some(last) => now - last >= Duration::minutes(i64::from(cooldown_minutes.max(1))),
    }
}
