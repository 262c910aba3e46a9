//! Periodic removal of expired endpoints

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info};

use crate::app::App;
use crate::network::ShutdownListener;
use crate::Result;

/// Delete endpoints expired at `now` and disconnect their viewers
///
/// # Errors
///
/// Returns error if the store fails
pub fn sweep_once(app: &App, now: DateTime<Utc>) -> Result<Vec<String>> {
    let expired = app.store().cleanup_expired(now)?;
    for endpoint_id in &expired {
        let closed = app.registry().close_all(endpoint_id);
        if closed > 0 {
            debug!("Closed {} viewers of expired endpoint {}", closed, endpoint_id);
        }
    }
    Ok(expired)
}

/// Sweep every cleanup interval until shutdown
pub async fn run_sweeper(app: Arc<App>, mut shutdown: ShutdownListener) {
    let period = app.config().cleanup_interval();
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = ticker.tick() => match sweep_once(&app, Utc::now()) {
                Ok(expired) if !expired.is_empty() => {
                    info!("Cleaned up {} expired endpoints", expired.len());
                }
                Ok(_) => {}
                Err(e) => error!("Expiry sweep failed: {}", e),
            },
            () = shutdown.wait() => break,
        }
    }

    debug!("Sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing;
    use crate::live::Transport;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sweep_removes_expired_and_closes_viewers() {
        let app = testing::app();
        app.store()
            .create_endpoint("old", None, None, Duration::from_secs(1))
            .unwrap();
        app.store()
            .create_endpoint("fresh", None, None, Duration::from_secs(3600))
            .unwrap();
        let mut viewer = app.registry().subscribe("old", Transport::Sse);

        let later = Utc::now() + chrono::Duration::seconds(5);
        let expired = sweep_once(&app, later).unwrap();

        assert_eq!(expired, ["old"]);
        assert!(viewer.next().await.is_none());
        assert!(app.store().get_endpoint("fresh").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_on_shutdown() {
        let app = Arc::new(testing::app());
        let handle = tokio::spawn(run_sweeper(Arc::clone(&app), app.shutdown().listener()));

        app.shutdown().trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
