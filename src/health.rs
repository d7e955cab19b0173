//! Background session health monitoring.
//!
//! A monitor task probes the live page on a fixed interval by evaluating
//! a trivial expression. Probe failures retry with bounded exponential
//! backoff inside the cycle; once the retry budget is exhausted the
//! session is declared unhealthy and rebuilt exactly once for that
//! cycle. A failure during the rebuild itself is fatal and surfaced on
//! the fatal channel rather than retried indefinitely.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{HealthSettings, Settings};
use crate::session::{BrowserSession, SharedSession};

/// Process-wide liveness state. Written only by the monitor; read by the
/// command API before starting a plan.
#[derive(Clone, Copy, Debug)]
pub struct SessionHealth {
    pub last_check: Option<DateTime<Utc>>,
    pub is_healthy: bool,
}

impl Default for SessionHealth {
    fn default() -> Self {
        Self {
            last_check: None,
            is_healthy: true,
        }
    }
}

/// Shared handle to the health state.
#[derive(Clone, Default)]
pub struct HealthState(Arc<RwLock<SessionHealth>>);

impl HealthState {
    pub fn snapshot(&self) -> SessionHealth {
        *self.0.read()
    }

    fn mark(&self, healthy: bool) {
        let mut guard = self.0.write();
        guard.is_healthy = healthy;
        guard.last_check = Some(Utc::now());
    }
}

pub struct HealthMonitor {
    session: SharedSession,
    settings: Arc<Settings>,
    state: HealthState,
    fatal_tx: watch::Sender<Option<String>>,
    shutdown: CancellationToken,
}

impl HealthMonitor {
    /// Spawn the monitor loop. Returns the shared health state, the
    /// fatal-error channel and the task handle.
    pub fn spawn(
        session: SharedSession,
        settings: Arc<Settings>,
        shutdown: CancellationToken,
    ) -> (HealthState, watch::Receiver<Option<String>>, JoinHandle<()>) {
        let state = HealthState::default();
        let (fatal_tx, fatal_rx) = watch::channel(None);

        let monitor = Self {
            session,
            settings,
            state: state.clone(),
            fatal_tx,
            shutdown,
        };
        let handle = tokio::spawn(monitor.run());

        (state, fatal_rx, handle)
    }

    async fn run(self) {
        let period = Duration::from_secs(self.settings.health.check_interval_secs.max(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so the session
        // gets a full interval before the first probe.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.probe_with_retry().await {
                Ok(()) => {
                    self.state.mark(true);
                }
                Err(reason) => {
                    warn!(target: "health", %reason, "session unhealthy, attempting recovery");
                    self.state.mark(false);

                    match self.recover().await {
                        Ok(()) => {
                            info!(target: "health", "session recovery successful");
                            self.state.mark(true);
                        }
                        Err(reason) => {
                            error!(target: "health", %reason, "session recovery failed");
                            let _ = self.fatal_tx.send(Some(reason));
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Probe with bounded exponential backoff between attempts.
    async fn probe_with_retry(&self) -> Result<(), String> {
        let attempts = self.settings.health.probe_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.probe().await {
                Ok(()) => return Ok(()),
                Err(reason) => {
                    last_error = reason;
                    if attempt < attempts {
                        sleep(backoff_delay(attempt, &self.settings.health)).await;
                    }
                }
            }
        }

        Err(last_error)
    }

    /// A healthy session evaluates a trivial expression successfully.
    async fn probe(&self) -> Result<(), String> {
        let guard = self.session.read().await;
        let Some(session) = guard.as_ref() else {
            return Err("no active session".into());
        };

        match session.driver.evaluate(session.page, "1 + 1").await {
            Ok(value) if value.as_i64() == Some(2) => Ok(()),
            Ok(value) => Err(format!("probe returned unexpected value: {value}")),
            Err(err) => Err(err.to_string()),
        }
    }

    /// One teardown + relaunch. Handles close first, so an in-flight
    /// plan step fails with a session-closed error instead of touching a
    /// dead browser.
    async fn recover(&self) -> Result<(), String> {
        let mut guard = self.session.write().await;
        if let Some(old) = guard.take() {
            old.teardown().await;
        }

        match BrowserSession::launch(&self.settings).await {
            Ok(session) => {
                *guard = Some(session);
                Ok(())
            }
            Err(err) => Err(format!("failed to rebuild browser session: {err}")),
        }
    }
}

/// Exponential backoff for probe retries: base * 2^(attempt-1), capped.
fn backoff_delay(attempt: u32, settings: &HealthSettings) -> Duration {
    let base = settings.backoff_base_secs.max(1);
    let factor = 1u64 << (attempt.saturating_sub(1)).min(16);
    Duration::from_secs(base.saturating_mul(factor).min(settings.backoff_max_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_is_bounded() {
        let settings = HealthSettings::default();
        assert_eq!(backoff_delay(1, &settings), Duration::from_secs(4));
        assert_eq!(backoff_delay(2, &settings), Duration::from_secs(8));
        assert_eq!(backoff_delay(3, &settings), Duration::from_secs(10));
        assert_eq!(backoff_delay(10, &settings), Duration::from_secs(10));
    }

    #[test]
    fn default_state_is_healthy_and_unchecked() {
        let state = HealthState::default();
        let snapshot = state.snapshot();
        assert!(snapshot.is_healthy);
        assert!(snapshot.last_check.is_none());
    }

    #[test]
    fn mark_updates_timestamp() {
        let state = HealthState::default();
        state.mark(false);
        let snapshot = state.snapshot();
        assert!(!snapshot.is_healthy);
        assert!(snapshot.last_check.is_some());
    }
}
