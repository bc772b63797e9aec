//! Watchdog: a background thread that hard-exits the process if any
//! consumer thread's heartbeat goes stale, so a stuck event loop can
//! never silently wedge the scheduler. Timeout 600s, poll interval 30s.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(600);
pub const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Shared heartbeat table: one entry per named consumer thread/task.
#[derive(Clone, Default)]
pub struct Heartbeats {
    last_beat: Arc<Mutex<HashMap<String, Instant>>>,
}

impl Heartbeats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn beat(&self, name: &str) {
        self.last_beat
            .lock()
            .unwrap()
            .insert(name.to_string(), Instant::now());
    }

    /// Names of channels whose heartbeat is older than `timeout`.
    fn stale(&self, timeout: Duration) -> Vec<String> {
        let now = Instant::now();
        self.last_beat
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, beat)| now.duration_since(**beat) > timeout)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// What the watchdog does once it finds a stale channel — a seam for
/// tests; production code uses `hard_exit`.
pub trait WatchdogAction: Send + Sync {
    fn act(&self, stale: &[String]);
}

pub struct HardExit;

impl WatchdogAction for HardExit {
    fn act(&self, stale: &[String]) {
        tracing::error!(channels = ?stale, "watchdog: stuck thread(s) detected, exiting");
        std::process::exit(1);
    }
}

/// Poll `heartbeats` every `check_interval`; if any entry is older than
/// `timeout`, invoke `action` (which by default hard-exits the process —
/// there is no graceful path back from a wedged consumer thread).
pub async fn run(heartbeats: Heartbeats, timeout: Duration, check_interval: Duration, action: Arc<dyn WatchdogAction>) {
    loop {
        tokio::time::sleep(check_interval).await;
        let stale = heartbeats.stale(timeout);
        if !stale.is_empty() {
            action.act(&stale);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAction(Arc<AtomicUsize>);
    impl WatchdogAction for CountingAction {
        fn act(&self, _stale: &[String]) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn fresh_heartbeat_is_not_stale() {
        let heartbeats = Heartbeats::new();
        heartbeats.beat("node");
        assert!(heartbeats.stale(Duration::from_secs(600)).is_empty());
    }

    #[test]
    fn missing_heartbeat_past_timeout_is_stale() {
        let heartbeats = Heartbeats::new();
        heartbeats.beat("node");
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(heartbeats.stale(Duration::from_millis(1)).len(), 1);
    }
}
