use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};

use super::ClientResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiHealth {
    Unknown,
    Healthy,
    Unreachable,
}

#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn ping(&self) -> ClientResult<()>;
}

/// Polls the API in the background and publishes the latest result. The
/// first check runs immediately; polling stops when the monitor is dropped.
pub struct HealthMonitor {
    status: watch::Receiver<ApiHealth>,
    task: JoinHandle<()>,
}

impl HealthMonitor {
    pub fn spawn(checker: Arc<dyn HealthCheck>, every: Duration) -> Self {
        let (tx, rx) = watch::channel(ApiHealth::Unknown);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let next = match checker.ping().await {
                    Ok(()) => ApiHealth::Healthy,
                    Err(err) => {
                        tracing::warn!(error = %err, "api health check failed");
                        ApiHealth::Unreachable
                    }
                };
                tx.send_if_modified(|current| {
                    if *current == next {
                        return false;
                    }
                    tracing::info!(from = ?*current, to = ?next, "api health changed");
                    *current = next;
                    true
                });
                if tx.is_closed() {
                    break;
                }
            }
        });
        Self { status: rx, task }
    }

    pub fn status(&self) -> ApiHealth {
        *self.status.borrow()
    }

    /// Receiver that wakes on every status change, e.g. to call
    /// `CartStore::retry_sync` when the API comes back.
    pub fn subscribe(&self) -> watch::Receiver<ApiHealth> {
        self.status.clone()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use reqwest::StatusCode;

    use super::*;
    use crate::client::ClientError;

    struct FlakyApi {
        up: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HealthCheck for FlakyApi {
        async fn ping(&self) -> ClientResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.up.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ClientError::api(StatusCode::SERVICE_UNAVAILABLE, "degraded"))
            }
        }
    }

    async fn wait_for(rx: &mut watch::Receiver<ApiHealth>, want: ApiHealth) {
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == want))
            .await
            .expect("status change in time")
            .expect("monitor still running");
    }

    #[tokio::test]
    async fn reports_transitions_between_healthy_and_unreachable() {
        let checker = Arc::new(FlakyApi {
            up: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        });
        let monitor = HealthMonitor::spawn(checker.clone(), Duration::from_millis(10));
        let mut rx = monitor.subscribe();

        wait_for(&mut rx, ApiHealth::Healthy).await;
        checker.up.store(false, Ordering::SeqCst);
        wait_for(&mut rx, ApiHealth::Unreachable).await;
        checker.up.store(true, Ordering::SeqCst);
        wait_for(&mut rx, ApiHealth::Healthy).await;

        assert_eq!(monitor.status(), ApiHealth::Healthy);
        assert!(checker.calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn dropping_the_monitor_stops_polling() {
        let checker = Arc::new(FlakyApi {
            up: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        });
        let monitor = HealthMonitor::spawn(checker.clone(), Duration::from_millis(5));
        let mut rx = monitor.subscribe();
        wait_for(&mut rx, ApiHealth::Healthy).await;
        drop(monitor);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_drop = checker.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(checker.calls.load(Ordering::SeqCst), after_drop);
    }
}
