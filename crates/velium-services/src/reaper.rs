//! Idle reaper — periodic eviction of entries that have gone silent.
//!
//! Both transports keep a DashMap of clients with a last-seen timestamp.
//! `sweep_idle` walks one such table and hands every stale entry, already
//! removed, to a caller-supplied eviction action. `Reaper::run` drives any
//! sweep on a fixed interval until shutdown.

use std::hash::Hash;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};

/// Anything tracked by a last-seen timestamp.
pub trait LastSeen {
    fn last_seen(&self) -> Instant;
}

/// Remove every entry silent for longer than `idle_timeout` and pass it to
/// `on_evict`. Returns how many entries were evicted.
///
/// Staleness is re-checked under the shard lock at removal time, so an entry
/// refreshed between the scan and the removal survives.
pub fn sweep_idle<K, V>(
    table: &DashMap<K, V>,
    idle_timeout: Duration,
    mut on_evict: impl FnMut(K, V),
) -> usize
where
    K: Eq + Hash + Clone,
    V: LastSeen,
{
    let now = Instant::now();
    let is_stale = |v: &V| now.saturating_duration_since(v.last_seen()) > idle_timeout;

    let stale: Vec<K> = table
        .iter()
        .filter(|e| is_stale(e.value()))
        .map(|e| e.key().clone())
        .collect();

    let mut evicted = 0;
    for key in stale {
        if let Some((key, value)) = table.remove_if(&key, |_, v| is_stale(v)) {
            on_evict(key, value);
            evicted += 1;
        }
    }
    evicted
}

/// Fixed-interval driver for a sweep.
#[derive(Debug, Clone, Copy)]
pub struct Reaper {
    pub interval: Duration,
}

impl Reaper {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Call `sweep` every interval until the shutdown channel fires.
    ///
    /// `label` names the table in logs ("tcp", "udp", "sessions").
    pub async fn run(
        self,
        label: &'static str,
        mut sweep: impl FnMut() -> usize,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut interval = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::debug!(table = label, "reaper shutting down");
                    return;
                }
                _ = interval.tick() => {
                    let evicted = sweep();
                    if evicted > 0 {
                        tracing::debug!(table = label, evicted, "reaped idle entries");
                    }
                }
            }
        }
    }
}
