//! Health Checker: a purely observational task that periodically logs a
//! snapshot of session state. It never influences the connection — no
//! forced reconnects, no queue mutation — only visibility for operators.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::session::{Inner, Phase};

pub(crate) async fn run(inner: Arc<Inner>) {
    let interval_duration = inner.tuning().health_interval;
    let mut ticker = tokio::time::interval(interval_duration);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                report(&inner, interval_duration).await;
            }
            () = inner.shutdown_signal().notified() => return,
        }
    }
}

/// What a single health report found, for tests to assert against — the
/// report itself is still emitted through `tracing` regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct ReportOutcome {
    pressure_alert: bool,
    staleness_alert: bool,
}

async fn report(inner: &Arc<Inner>, interval: std::time::Duration) -> Option<ReportOutcome> {
    let (phase, last_message_at) = inner.health_snapshot().await;
    if phase == Phase::Stopping || phase == Phase::Stopped {
        return None;
    }

    let queue_len = inner.queue_len();
    let pressure_threshold = inner.tuning().queue_pressure_threshold();

    if !inner.logger().enabled() {
        return None;
    }

    info!(?phase, queue_len, "session health snapshot");

    let mut outcome = ReportOutcome::default();
    if phase == Phase::Connected {
        if queue_len > pressure_threshold {
            error!(queue_len, pressure_threshold, "outbound queue under sustained pressure");
            outcome.pressure_alert = true;
        }

        if let Some(at) = last_message_at {
            if at.elapsed() > interval {
                warn!(elapsed = ?at.elapsed(), "no inbound message received recently while connected");
                outcome.staleness_alert = true;
            }
        }
    }
    Some(outcome)
}
