// src/schedule/mod.rs

//! Fixed-interval trigger source.
//!
//! The schedule knows nothing about runs; it only decides when the next
//! scheduled trigger is due and pushes a `RuntimeEvent::Triggered` into the
//! runtime when it is.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::RuntimeEvent;
use crate::types::TriggerKind;

/// When scheduled triggers fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Interval between triggers.
    pub every: Duration,
    /// Fire on multiples of `every` since the unix epoch, so `1h` means
    /// "every hour on the hour" (UTC).
    pub align: bool,
    /// Fire once immediately at startup.
    pub run_on_start: bool,
}

impl Schedule {
    /// Delay from `now` until the next trigger.
    ///
    /// Aligned schedules return the time to the next interval boundary
    /// strictly after `now`; unaligned ones simply wait a full interval.
    pub fn delay_until_next(&self, now: SystemTime) -> Duration {
        if !self.align {
            return self.every;
        }

        let every_ms = self.every.as_millis().max(1);
        let now_ms = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis();
        let next_ms = (now_ms / every_ms + 1) * every_ms;
        // Fits in u64 for any realistic date.
        Duration::from_millis((next_ms - now_ms) as u64)
    }
}

/// Spawn the schedule loop. It stops once the runtime stops listening.
pub fn spawn_schedule(schedule: Schedule, tx: mpsc::Sender<RuntimeEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(every = ?schedule.every, align = schedule.align, "schedule started");

        if schedule.run_on_start && !send_tick(&tx).await {
            return;
        }

        loop {
            let delay = schedule.delay_until_next(SystemTime::now());
            debug!(?delay, "next scheduled trigger");
            tokio::time::sleep(delay).await;

            if !send_tick(&tx).await {
                break;
            }
        }

        info!("schedule finished (runtime closed)");
    })
}

async fn send_tick(tx: &mpsc::Sender<RuntimeEvent>) -> bool {
    tx.send(RuntimeEvent::Triggered {
        kind: TriggerKind::Scheduled,
    })
    .await
    .is_ok()
}
