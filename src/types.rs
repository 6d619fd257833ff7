use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Behaviour when a trigger arrives while the job's slot is held.
///
/// - `Skip`: the trigger is not admitted; the next scheduled tick will try
///   again (default).
/// - `Queue`: wait for the running Run to finish, bounded by `queue_length`
///   waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggeredWhileBusy {
    Skip,
    Queue,
}

impl Default for TriggeredWhileBusy {
    fn default() -> Self {
        TriggeredWhileBusy::Skip
    }
}

impl FromStr for TriggeredWhileBusy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(TriggeredWhileBusy::Skip),
            "queue" => Ok(TriggeredWhileBusy::Queue),
            other => Err(format!(
                "invalid triggered_while_busy: {other} (expected \"skip\" or \"queue\")"
            )),
        }
    }
}

/// What caused a Run to be requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    /// Fired by the fixed-interval schedule.
    Scheduled,
    /// Explicit on-demand request (`--once`, SIGUSR1, `TriggerHandle`).
    Manual,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerKind::Scheduled => f.write_str("scheduled"),
            TriggerKind::Manual => f.write_str("manual"),
        }
    }
}

/// How a secret is handed to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretDelivery {
    /// Injected as an environment variable of the child only.
    Env,
    /// Written to an owner-only file; the variable holds the file path.
    File,
}

impl Default for SecretDelivery {
    fn default() -> Self {
        SecretDelivery::Env
    }
}

/// Parse a duration string such as `"500ms"`, `"30s"`, `"10m"`, `"1h"` or
/// `"7d"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{s}' missing unit suffix"))?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        "d" => Ok(Duration::from_secs(value * 60 * 60 * 24)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, h, or d",
            unit
        )),
    }
}
