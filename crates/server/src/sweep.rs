use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use loanline_core::config::SweepConfig;
use loanline_db::repositories::SessionRepository;

/// Background best-effort purge of stale, never-authenticated sessions. The
/// store handle arrives by constructor injection; there is no ambient
/// runtime lookup. Failures are logged and swallowed so the sweep can never
/// take the process down or block turn handling.
pub struct SessionSweeper {
    repository: Arc<dyn SessionRepository>,
    interval: Duration,
    horizon: chrono::Duration,
}

impl SessionSweeper {
    pub fn new(repository: Arc<dyn SessionRepository>, config: &SweepConfig) -> Self {
        Self {
            repository,
            interval: Duration::from_secs(config.interval_secs),
            horizon: chrono::Duration::hours(config.purge_horizon_hours as i64),
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }

    pub async fn run_once(&self) {
        let cutoff = Utc::now() - self.horizon;
        match self.repository.purge_stale(cutoff).await {
            Ok(0) => {}
            Ok(purged) => {
                info!(event_name = "sweep.purged", purged, "removed stale sessions");
            }
            Err(error) => {
                warn!(event_name = "sweep.failed", error = %error, "sweep pass failed");
            }
        }
    }
}
