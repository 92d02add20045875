//! services/api/src/web/sweep.rs
//!
//! Background housekeeping: marks submissions idle for longer than the
//! configured TTL as abandoned.

use crate::web::state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

const SWEEP_EVERY: Duration = Duration::from_secs(15 * 60);

/// Spawns the sweep loop. Returns `None` when no TTL is configured.
pub fn spawn_abandonment_sweep(app_state: Arc<AppState>) -> Option<JoinHandle<()>> {
    let ttl = app_state.config.submission_ttl?;
    info!("Abandonment sweep enabled (idle limit: {} hours).", ttl.num_hours());

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_EVERY);
        loop {
            ticker.tick().await;
            if let Err(e) = app_state.engine.expire_idle(ttl).await {
                error!("Abandonment sweep failed: {}", e);
            }
        }
    }))
}
