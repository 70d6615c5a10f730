use crate::core::drain::QueueDrainer;
use crate::domain::ports::{Geocoder, InventoryStore, MessageQueue, Notifier};
use crate::utils::error::{BloodSearchError, Result};
use chrono::{DateTime, Duration, NaiveTime, TimeZone};
use std::sync::Arc;
use tokio::task::JoinHandle;

pub fn parse_daily_time(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|e| BloodSearchError::InvalidConfigValueError {
        field: "schedule.daily_at".to_string(),
        value: value.to_string(),
        reason: format!("Expected HH:MM: {}", e),
    })
}

/// The next instant strictly after `now` whose local wall-clock time is `at`.
pub fn next_run_after<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut day = now.date_naive();

    // Walk forward past days where `at` falls into a DST gap.
    for _ in 0..3 {
        if let Some(candidate) = tz.from_local_datetime(&day.and_time(at)).earliest() {
            if candidate > *now {
                return candidate;
            }
        }
        day = day.succ_opt().unwrap_or(day);
    }
    now.clone() + Duration::days(1)
}

/// Runs a drain every day at `at` local time. Runs never overlap: the next
/// one is only scheduled after the previous finished. Do not await the
/// returned handle; abort it on shutdown.
pub fn start_daily_worker<Q, S, G, N>(drainer: Arc<QueueDrainer<Q, S, G, N>>, at: NaiveTime) -> JoinHandle<()>
where
    Q: MessageQueue + 'static,
    S: InventoryStore + 'static,
    G: Geocoder + 'static,
    N: Notifier + 'static,
{
    tokio::spawn(async move {
        tracing::info!(at = %at, "🕰️ Daily blood request worker started");
        loop {
            let now = chrono::Local::now();
            let next = next_run_after(&now, at);
            let wait = (next.clone() - now).to_std().unwrap_or_default();
            tracing::info!(next_run = %next, "🕰️ Next queue drain scheduled");
            tokio::time::sleep(wait).await;

            match drainer.drain().await {
                Ok(report) => tracing::info!(fetched = report.fetched, "🕰️ Daily job completed"),
                Err(e) if e.is_transient() => tracing::warn!(
                    error = %e,
                    "🕰️ Daily job ended early, remaining messages wait for the next run"
                ),
                Err(e) => tracing::error!(
                    error = %e,
                    suggestion = e.recovery_suggestion(),
                    "🕰️ Daily job ended early"
                ),
            }
        }
    })
}
