//! Per-key exclusive locks that release themselves after a fixed TTL.
//!
//! Each hold carries a generation number. The expiry timer and an explicit
//! [`LockManager::release`] both funnel into one release path that only acts
//! when the generation still matches, so a hold is freed exactly once no
//! matter which trigger fires first.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use runpool_observe::metrics::{Counter, Gauge};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct LockConfig {
    pub ttl: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_LOCK_TTL,
        }
    }
}

#[derive(Debug, Default)]
pub struct LockStats {
    pub acquired_total: Counter,
    pub released_total: Counter,
    pub expired_total: Counter,
    pub held: Gauge,
}

/// Proof of a successful acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub key: String,
    pub generation: u64,
    pub expires_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReleaseCause {
    Explicit,
    Expired,
}

#[derive(Debug)]
struct Hold {
    generation: u64,
    expires_at: Instant,
    timer: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct Slot {
    hold: Option<Hold>,
    next_generation: u64,
}

#[derive(Debug)]
struct Inner {
    cfg: LockConfig,
    slots: Mutex<HashMap<String, Slot>>,
    released: Notify,
    stats: LockStats,
}

/// Cheap to clone; clones share the same lock table.
///
/// Acquisition spawns the expiry timer, so it must run inside a tokio runtime.
#[derive(Debug, Clone)]
pub struct LockManager {
    inner: Arc<Inner>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}

impl LockManager {
    pub fn new(cfg: LockConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                cfg,
                slots: Mutex::new(HashMap::new()),
                released: Notify::new(),
                stats: LockStats::default(),
            }),
        }
    }

    pub fn stats(&self) -> &LockStats {
        &self.inner.stats
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.inner
            .slots()
            .get(key)
            .is_some_and(|slot| slot.hold.is_some())
    }

    /// Atomically acquires `key` if it is free. Never waits.
    pub fn try_lock(&self, key: &str) -> Option<LockLease> {
        let mut slots = self.inner.slots();
        let slot = slots.entry(key.to_string()).or_default();
        if slot.hold.is_some() {
            return None;
        }

        let generation = slot.next_generation;
        slot.next_generation = slot.next_generation.wrapping_add(1);
        let expires_at = Instant::now() + self.inner.cfg.ttl;
        let timer = spawn_expiry(
            Arc::downgrade(&self.inner),
            key.to_string(),
            generation,
            expires_at,
        );
        slot.hold = Some(Hold {
            generation,
            expires_at,
            timer,
        });
        drop(slots);

        self.inner.stats.acquired_total.inc();
        self.inner.stats.held.inc();
        debug!(run_id = %key, generation, "lock acquired");
        Some(LockLease {
            key: key.to_string(),
            generation,
            expires_at,
        })
    }

    /// Acquires `key`, waiting for the current holder to release or expire.
    pub async fn lock(&self, key: &str) -> LockLease {
        loop {
            let notified = self.released();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(lease) = self.try_lock(key) {
                return lease;
            }
            notified.await;
        }
    }

    /// Releases whatever hold exists on `key`. Returns false if it was already free.
    pub fn release(&self, key: &str) -> bool {
        let generation = {
            let slots = self.inner.slots();
            match slots.get(key).and_then(|slot| slot.hold.as_ref()) {
                Some(hold) => hold.generation,
                None => return false,
            }
        };
        self.inner
            .release_hold(key, generation, ReleaseCause::Explicit)
    }

    /// Releases `lease` only if it is still the current hold on its key.
    pub fn release_lease(&self, lease: &LockLease) -> bool {
        self.inner
            .release_hold(&lease.key, lease.generation, ReleaseCause::Explicit)
    }

    /// Remaining time before the hold on `key` expires, if held.
    pub fn remaining(&self, key: &str) -> Option<Duration> {
        let slots = self.inner.slots();
        let hold = slots.get(key)?.hold.as_ref()?;
        Some(hold.expires_at.saturating_duration_since(Instant::now()))
    }

    pub fn held_count(&self) -> usize {
        self.inner
            .slots()
            .values()
            .filter(|slot| slot.hold.is_some())
            .count()
    }

    /// Resolves on the next release of any key, explicit or by expiry.
    ///
    /// Only releases after the future is polled or [`Notified::enable`]d are
    /// seen; enable it before checking lock state to avoid a missed wakeup.
    pub fn released(&self) -> Notified<'_> {
        self.inner.released.notified()
    }
}

impl Inner {
    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release_hold(&self, key: &str, generation: u64, cause: ReleaseCause) -> bool {
        let hold = {
            let mut slots = self.slots();
            let Some(slot) = slots.get_mut(key) else {
                return false;
            };
            match &slot.hold {
                Some(hold) if hold.generation == generation => slot.hold.take(),
                _ => None,
            }
        };
        let Some(hold) = hold else {
            return false;
        };

        self.stats.held.dec();
        match cause {
            ReleaseCause::Explicit => {
                hold.timer.abort();
                self.stats.released_total.inc();
                debug!(run_id = %key, generation, "lock released");
            }
            ReleaseCause::Expired => {
                self.stats.expired_total.inc();
                info!(
                    target: "runpool_proof",
                    event = "lock_expired",
                    run_id = %key,
                    generation,
                    ttl_ms = self.cfg.ttl.as_millis() as u64,
                    "lock expired without release"
                );
            }
        }
        self.released.notify_waiters();
        true
    }
}

fn spawn_expiry(
    inner: Weak<Inner>,
    key: String,
    generation: u64,
    expires_at: Instant,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep_until(expires_at).await;
        if let Some(inner) = inner.upgrade() {
            inner.release_hold(&key, generation, ReleaseCause::Expired);
        }
    })
}
