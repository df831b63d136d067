//! Typed, bounded, single-producer/single-consumer event channels.
//!
//! Each channel is a small ring with an explicit overflow policy. Producers
//! never block: when a channel is full the policy decides whether the oldest
//! queued item is evicted (score-style signals, where staleness is worse
//! than loss) or the new item is refused (fill-style signals, where FIFO for
//! already-accepted items matters more). Drops are counted and logged at
//! most once per rolling second per channel.
//!
//! Capacity rationale:
//!   game_events    50  — 50 queued score events are stale anyway
//!   trade_signals  10  — Brain must never outrun Sniper by more than this
//!   fill_reports  100  — Shield processes async; a drop here is an incident
//!   settlements    50  — one per game per day, the cap is never reached

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::warn;

use crate::events::{ExecuteTrade, FillReport, GameEvent, GameSettled};

/// What to do when a channel is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict the oldest queued item to make room for the new one.
    DropOldest,
    /// Refuse the new item.
    DropNewest,
}

/// Publish outcome. Producers use this to decide whether to log; the channel
/// itself already counted the drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publish {
    Delivered,
    Dropped,
}

impl Publish {
    pub fn is_dropped(&self) -> bool {
        matches!(self, Publish::Dropped)
    }
}

struct Inner<T> {
    name: &'static str,
    capacity: usize,
    policy: OverflowPolicy,
    queue: Mutex<VecDeque<T>>,
    notify: Notify,
    dropped: AtomicU64,
    last_drop_log_ms: AtomicI64,
}

impl<T> Inner<T> {
    fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        let now_ms = chrono::Utc::now().timestamp_millis();
        let last = self.last_drop_log_ms.load(Ordering::Relaxed);
        if now_ms - last >= 1000
            && self
                .last_drop_log_ms
                .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            warn!(
                channel = self.name,
                dropped_total = self.dropped.load(Ordering::Relaxed),
                policy = ?self.policy,
                "channel full, dropping"
            );
        }
    }
}

/// Producer half. Cloneable; publishing never blocks.
pub struct BusSender<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for BusSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> BusSender<T> {
    pub fn publish(&self, item: T) -> Publish {
        let outcome = {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.capacity {
                match self.inner.policy {
                    OverflowPolicy::DropOldest => {
                        queue.pop_front();
                        queue.push_back(item);
                        Publish::Dropped
                    }
                    OverflowPolicy::DropNewest => Publish::Dropped,
                }
            } else {
                queue.push_back(item);
                Publish::Delivered
            }
        };
        match outcome {
            Publish::Delivered => self.inner.notify.notify_one(),
            Publish::Dropped => {
                // DropOldest still enqueued the new item.
                if self.inner.policy == OverflowPolicy::DropOldest {
                    self.inner.notify.notify_one();
                }
                self.inner.record_drop();
            }
        }
        outcome
    }

    /// Total items dropped since startup.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consumer half. Exactly one per channel.
pub struct BusReceiver<T> {
    inner: Arc<Inner<T>>,
}

impl<T> BusReceiver<T> {
    /// Wait for the next item. FIFO among items that were not dropped.
    pub async fn recv(&mut self) -> T {
        loop {
            if let Some(item) = self.inner.queue.lock().pop_front() {
                return item;
            }
            self.inner.notify.notified().await;
        }
    }

    /// Non-blocking pop, used by the shutdown drain.
    pub fn try_recv(&mut self) -> Option<T> {
        self.inner.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Create one named channel.
pub fn channel<T>(
    name: &'static str,
    capacity: usize,
    policy: OverflowPolicy,
) -> (BusSender<T>, BusReceiver<T>) {
    let inner = Arc::new(Inner {
        name,
        capacity,
        policy,
        queue: Mutex::new(VecDeque::with_capacity(capacity)),
        notify: Notify::new(),
        dropped: AtomicU64::new(0),
        last_drop_log_ms: AtomicI64::new(0),
    });
    (
        BusSender {
            inner: Arc::clone(&inner),
        },
        BusReceiver { inner },
    )
}

/// All producer handles, cloned into every agent that publishes.
#[derive(Clone)]
pub struct EventBus {
    pub game_events: BusSender<GameEvent>,
    pub trade_signals: BusSender<ExecuteTrade>,
    pub fill_reports: BusSender<FillReport>,
    pub settlements: BusSender<GameSettled>,
}

/// All consumer handles, split out to the owning agents at wiring time.
pub struct BusReceivers {
    pub game_events: BusReceiver<GameEvent>,
    pub trade_signals: BusReceiver<ExecuteTrade>,
    pub fill_reports: BusReceiver<FillReport>,
    pub settlements: BusReceiver<GameSettled>,
}

/// Build the full bus with the standard capacities and policies.
pub fn event_bus() -> (EventBus, BusReceivers) {
    let (game_tx, game_rx) = channel("game_events", 50, OverflowPolicy::DropOldest);
    let (signal_tx, signal_rx) = channel("trade_signals", 10, OverflowPolicy::DropNewest);
    let (fill_tx, fill_rx) = channel("fill_reports", 100, OverflowPolicy::DropNewest);
    let (settle_tx, settle_rx) = channel("settlements", 50, OverflowPolicy::DropNewest);
    (
        EventBus {
            game_events: game_tx,
            trade_signals: signal_tx,
            fill_reports: fill_tx,
            settlements: settle_tx,
        },
        BusReceivers {
            game_events: game_rx,
            trade_signals: signal_rx,
            fill_reports: fill_rx,
            settlements: settle_rx,
        },
    )
}
