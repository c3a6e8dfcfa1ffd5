//! Liveness heartbeat: a timestamp file rewritten on a fixed interval, for
//! an external watchdog to age-check.

use chrono::Utc;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

const BEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Spawn the heartbeat task. Write failures are logged and retried on the
/// next beat; they never bring the task down.
pub fn spawn_heartbeat(path: PathBuf) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(BEAT_INTERVAL);
        loop {
            interval.tick().await;
            let stamp = Utc::now().to_rfc3339();
            if let Err(e) = tokio::fs::write(&path, &stamp).await {
                debug!("Could not write heartbeat to {}: {e}", path.display());
            }
        }
    })
}
