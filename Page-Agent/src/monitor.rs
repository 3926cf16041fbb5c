use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, trace, warn};

use crate::config::MonitorConfig;
use crate::protocol::PageId;

/// `interval_at` rejects a zero period.
const MIN_CHECK_INTERVAL: std::time::Duration = std::time::Duration::from_millis(1);

struct MonitorEntry {
    last_request: Instant,
    epoch: u64,
    task: JoinHandle<()>,
}

struct MonitorInner {
    config: MonitorConfig,
    entries: Mutex<HashMap<PageId, MonitorEntry>>,
    next_epoch: AtomicU64,
}

impl MonitorInner {
    fn entries(&self) -> MutexGuard<'_, HashMap<PageId, MonitorEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Declares a page's generation finished once its telemetry traffic has
/// been silent for the configured threshold.
///
/// The target tool emits background requests only while it is generating,
/// so a sustained gap is the completion proxy. One entry per page; starting
/// again for the same page replaces the previous entry and its callback.
///
/// If traffic never starts the monitor never fires. Callers own the hard
/// timeout.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<MonitorInner>,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

impl NetworkMonitor {
    pub fn new(mut config: MonitorConfig) -> Self {
        if config.check_interval < MIN_CHECK_INTERVAL {
            warn!(requested = ?config.check_interval, "Check interval too small, clamping");
            config.check_interval = MIN_CHECK_INTERVAL;
        }
        Self {
            inner: Arc::new(MonitorInner {
                config,
                entries: Mutex::new(HashMap::new()),
                next_epoch: AtomicU64::new(1),
            }),
        }
    }

    /// Begin (or restart) tracking `page_id`. `on_complete` runs at most once,
    /// at the first check where the silence threshold has elapsed.
    pub fn start_monitoring<F>(&self, page_id: &str, on_complete: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let epoch = self.inner.next_epoch.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.inner.entries();

        let task = tokio::spawn(watch(
            Arc::clone(&self.inner),
            page_id.to_string(),
            epoch,
            on_complete,
        ));

        let previous = entries.insert(
            page_id.to_string(),
            MonitorEntry {
                last_request: Instant::now(),
                epoch,
                task,
            },
        );
        drop(entries);

        if let Some(previous) = previous {
            previous.task.abort();
            debug!(page_id, "Network monitor restarted, previous entry superseded");
        } else {
            info!(page_id, "Network monitor started");
        }
    }

    /// Stop tracking `page_id`. No-op when it is not tracked.
    pub fn stop_monitoring(&self, page_id: &str) {
        let removed = self.inner.entries().remove(page_id);
        if let Some(entry) = removed {
            entry.task.abort();
            info!(page_id, "Network monitor stopped");
        }
    }

    /// Record a matching outbound request from `page_id`, restarting its
    /// silence countdown. Returns `false` when the page is not tracked.
    pub fn record_activity(&self, page_id: &str) -> bool {
        match self.inner.entries().get_mut(page_id) {
            Some(entry) => {
                entry.last_request = Instant::now();
                trace!(page_id, "Network activity recorded");
                true
            }
            None => false,
        }
    }

    pub fn is_monitoring(&self, page_id: &str) -> bool {
        self.inner.entries().contains_key(page_id)
    }

    /// Time since the last recorded request, if the page is tracked.
    pub fn silence(&self, page_id: &str) -> Option<std::time::Duration> {
        self.inner
            .entries()
            .get(page_id)
            .map(|e| Instant::now().saturating_duration_since(e.last_request))
    }
}

async fn watch<F>(inner: Arc<MonitorInner>, page_id: PageId, epoch: u64, on_complete: F)
where
    F: FnOnce() + Send + 'static,
{
    let period = inner.config.check_interval;
    let threshold = inner.config.silence_threshold;
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        ticker.tick().await;

        let fired = {
            let mut entries = inner.entries();
            match entries.get(&page_id) {
                Some(entry) if entry.epoch == epoch => {
                    let elapsed = Instant::now().saturating_duration_since(entry.last_request);
                    if elapsed >= threshold {
                        entries.remove(&page_id);
                        true
                    } else {
                        trace!(page_id = %page_id, ?elapsed, "Still active");
                        false
                    }
                }
                // Stopped or superseded.
                _ => return,
            }
        };

        if fired {
            info!(page_id = %page_id, ?threshold, "Network silent, generation considered complete");
            on_complete();
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_silence() {
        let monitor = NetworkMonitor::default();
        let (count, cb) = counter();
        monitor.start_monitoring("tab-1", cb);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(monitor.is_monitoring("tab-1"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!monitor.is_monitoring("tab-1"));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_check_interval_still_fires() {
        let monitor = NetworkMonitor::new(MonitorConfig {
            check_interval: Duration::ZERO,
            silence_threshold: Duration::from_secs(30),
        });
        let (count, cb) = counter();
        monitor.start_monitoring("tab-1", cb);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!monitor.is_monitoring("tab-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_restarts_countdown() {
        let monitor = NetworkMonitor::default();
        let (count, cb) = counter();
        monitor.start_monitoring("tab-1", cb);

        tokio::time::sleep(Duration::from_secs(22)).await;
        assert!(monitor.record_activity("tab-1"));

        // 31s after start but only 9s after the last request.
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // Silence reaches 30s at t=52, first tick after that is t=55.
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_cancels() {
        let monitor = NetworkMonitor::default();
        let (count, cb) = counter();
        monitor.start_monitoring("tab-1", cb);
        monitor.stop_monitoring("tab-1");
        monitor.stop_monitoring("tab-1");
        monitor.stop_monitoring("never-started");

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!monitor.record_activity("tab-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_supersedes_previous_entry() {
        let monitor = NetworkMonitor::default();
        let (first, cb1) = counter();
        let (second, cb2) = counter();

        monitor.start_monitoring("tab-1", cb1);
        tokio::time::sleep(Duration::from_secs(12)).await;
        monitor.start_monitoring("tab-1", cb2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pages_are_independent() {
        let monitor = NetworkMonitor::new(MonitorConfig {
            check_interval: Duration::from_secs(1),
            silence_threshold: Duration::from_secs(10),
        });
        let (a, cb_a) = counter();
        let (b, cb_b) = counter();
        monitor.start_monitoring("a", cb_a);
        monitor.start_monitoring("b", cb_b);

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(4)).await;
            monitor.record_activity("b");
        }
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 0);
    }
}
