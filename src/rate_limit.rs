use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::debug;

/// Sliding-window admission control keyed by client address.
///
/// Each address keeps the timestamps of its admitted requests. Timestamps
/// older than the window are evicted on every check; rejected requests are
/// not recorded.
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn allow(&self, address: &str) -> bool {
        self.allow_at(address, Instant::now())
    }

    pub fn allow_at(&self, address: &str, now: Instant) -> bool {
        let mut windows = self.windows.lock();
        let timestamps = windows.entry(address.to_string()).or_default();
        evict_expired(timestamps, now, self.window);

        if timestamps.len() >= self.limit {
            return false;
        }
        timestamps.push_back(now);
        true
    }

    /// Drops addresses with no admissions left inside the window.
    pub fn purge_idle(&self, now: Instant) -> usize {
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, timestamps| {
            evict_expired(timestamps, now, self.window);
            !timestamps.is_empty()
        });
        before - windows.len()
    }

    pub fn tracked_addresses(&self) -> usize {
        self.windows.lock().len()
    }

    /// Runs [`RateLimiter::purge_idle`] once per window for the life of the
    /// process.
    pub fn spawn_idle_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.window.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let purged = self.purge_idle(Instant::now());
                if purged > 0 {
                    debug!(purged, "purged idle rate-limit entries");
                }
            }
        })
    }
}

fn evict_expired(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = timestamps.front() {
        if now.saturating_duration_since(*oldest) > window {
            timestamps.pop_front();
        } else {
            break;
        }
    }
}
