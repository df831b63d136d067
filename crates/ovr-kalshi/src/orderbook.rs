//! Local orderbook replica, one book per market ticker.
//!
//! Written only by the stream consumer (Watcher), read by the strategy on the
//! hot path. Per-ticker updates are atomic under the map's shard lock;
//! cross-ticker consistency is explicitly not provided.

use std::collections::HashMap;
use std::time::Instant;

use dashmap::DashMap;

use ovr_common::Side;

/// Valid price band for a binary contract, in cents.
const MIN_PRICE: i64 = 1;
const MAX_PRICE: i64 = 99;

/// Outcome of applying a delta to a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// Delta applied in sequence.
    Applied,
    /// Sequence gap detected; the book is now stale and needs a snapshot.
    Gap { expected: u64, got: u64 },
    /// Book is stale (pre-snapshot); delta dropped.
    Dropped,
}

/// Aggregated book for a single ticker.
///
/// Level maps hold resting sell offers per side, price -> contracts, so the
/// best ask on a side is the minimum price with quantity.
#[derive(Debug, Clone)]
pub struct OrderBook {
    yes: HashMap<i64, u32>,
    no: HashMap<i64, u32>,
    sequence: u64,
    stale: bool,
    last_update: Instant,
}

impl OrderBook {
    /// A new book starts stale: nothing is tradeable until a snapshot lands.
    pub fn new() -> Self {
        Self {
            yes: HashMap::new(),
            no: HashMap::new(),
            sequence: 0,
            stale: true,
            last_update: Instant::now(),
        }
    }

    /// Replace the whole book from a snapshot and reset the sequence.
    pub fn apply_snapshot(&mut self, yes: &[(i64, u32)], no: &[(i64, u32)], sequence: u64) {
        self.yes.clear();
        self.no.clear();
        for &(price, qty) in yes {
            if (MIN_PRICE..=MAX_PRICE).contains(&price) && qty > 0 {
                self.yes.insert(price, qty);
            }
        }
        for &(price, qty) in no {
            if (MIN_PRICE..=MAX_PRICE).contains(&price) && qty > 0 {
                self.no.insert(price, qty);
            }
        }
        self.sequence = sequence;
        self.stale = false;
        self.last_update = Instant::now();
    }

    /// Apply one delta. Quantity zero removes the level.
    ///
    /// Deltas must arrive with strictly consecutive sequence numbers; a gap
    /// marks the book stale until the next snapshot.
    pub fn apply_delta(&mut self, side: Side, price: i64, qty: u32, sequence: u64) -> DeltaOutcome {
        if self.stale {
            return DeltaOutcome::Dropped;
        }
        let expected = self.sequence + 1;
        if sequence != expected {
            self.stale = true;
            return DeltaOutcome::Gap {
                expected,
                got: sequence,
            };
        }
        self.sequence = sequence;
        self.last_update = Instant::now();

        if !(MIN_PRICE..=MAX_PRICE).contains(&price) {
            // Malformed level; sequence still advances so the stream stays in sync.
            return DeltaOutcome::Applied;
        }
        let book = match side {
            Side::Yes => &mut self.yes,
            Side::No => &mut self.no,
        };
        if qty == 0 {
            book.remove(&price);
        } else {
            book.insert(price, qty);
        }
        DeltaOutcome::Applied
    }

    pub fn best_yes_ask(&self) -> Option<i64> {
        self.yes.keys().copied().min()
    }

    pub fn best_no_ask(&self) -> Option<i64> {
        self.no.keys().copied().min()
    }

    /// Contracts offered at the best YES ask.
    pub fn yes_size_at_ask(&self) -> u32 {
        self.best_yes_ask()
            .and_then(|p| self.yes.get(&p).copied())
            .unwrap_or(0)
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub fn is_empty(&self) -> bool {
        self.yes.is_empty() && self.no.is_empty()
    }

    pub fn last_update(&self) -> Instant {
        self.last_update
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

/// Read view of a book's top of book, cheap to copy out to the strategy.
#[derive(Debug, Clone, Copy)]
pub struct BookTop {
    pub yes_ask: Option<i64>,
    pub no_ask: Option<i64>,
    pub yes_size: u32,
    pub sequence: u64,
    pub stale: bool,
}

/// Concurrent ticker -> book map. Single writer (the stream consumer),
/// many readers.
#[derive(Debug, Default)]
pub struct BookCache {
    books: DashMap<String, OrderBook>,
}

impl BookCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a ticker with an empty, stale book so readers can distinguish
    /// "subscribed, waiting for snapshot" from "unknown ticker".
    pub fn register(&self, ticker: &str) {
        self.books.entry(ticker.to_string()).or_default();
    }

    /// Mutate a book in place, creating it if absent.
    pub fn with_book_mut<R>(&self, ticker: &str, f: impl FnOnce(&mut OrderBook) -> R) -> R {
        let mut entry = self.books.entry(ticker.to_string()).or_default();
        f(entry.value_mut())
    }

    /// Top-of-book read for the hot path. `None` when the ticker is unknown;
    /// callers must also check `stale` before trusting prices.
    pub fn top(&self, ticker: &str) -> Option<BookTop> {
        self.books.get(ticker).map(|b| BookTop {
            yes_ask: b.best_yes_ask(),
            no_ask: b.best_no_ask(),
            yes_size: b.yes_size_at_ask(),
            sequence: b.sequence(),
            stale: b.is_stale(),
        })
    }

    /// Mark every registered book stale (used on stream reconnect).
    pub fn mark_all_stale(&self) {
        for mut entry in self.books.iter_mut() {
            entry.value_mut().mark_stale();
        }
    }

    pub fn mark_stale(&self, ticker: &str) {
        if let Some(mut entry) = self.books.get_mut(ticker) {
            entry.value_mut().mark_stale();
        }
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_book() -> OrderBook {
        let mut book = OrderBook::new();
        book.apply_snapshot(&[(80, 40), (82, 100)], &[(25, 60)], 4);
        book
    }

    #[test]
    fn test_new_book_is_stale_and_empty() {
        let book = OrderBook::new();
        assert!(book.is_stale());
        assert!(book.is_empty());
        assert_eq!(book.best_yes_ask(), None);
    }

    #[test]
    fn test_snapshot_sets_top() {
        let book = snapshot_book();
        assert!(!book.is_stale());
        assert_eq!(book.best_yes_ask(), Some(80));
        assert_eq!(book.best_no_ask(), Some(25));
        assert_eq!(book.yes_size_at_ask(), 40);
        assert_eq!(book.sequence(), 4);
    }

    #[test]
    fn test_delta_in_sequence() {
        let mut book = snapshot_book();
        assert_eq!(book.apply_delta(Side::Yes, 79, 10, 5), DeltaOutcome::Applied);
        assert_eq!(book.best_yes_ask(), Some(79));
        // Remove the level again.
        assert_eq!(book.apply_delta(Side::Yes, 79, 0, 6), DeltaOutcome::Applied);
        assert_eq!(book.best_yes_ask(), Some(80));
    }

    #[test]
    fn test_sequence_gap_marks_stale() {
        // Deltas 5 then 7: the gap at 7 must stale the book and drop
        // everything until a snapshot.
        let mut book = snapshot_book();
        assert_eq!(book.apply_delta(Side::Yes, 79, 10, 5), DeltaOutcome::Applied);
        assert_eq!(
            book.apply_delta(Side::Yes, 78, 10, 7),
            DeltaOutcome::Gap {
                expected: 6,
                got: 7
            }
        );
        assert!(book.is_stale());
        assert_eq!(book.apply_delta(Side::Yes, 77, 10, 8), DeltaOutcome::Dropped);

        // Snapshot recovers and resets the sequence.
        book.apply_snapshot(&[(75, 5)], &[], 20);
        assert!(!book.is_stale());
        assert_eq!(book.apply_delta(Side::Yes, 74, 1, 21), DeltaOutcome::Applied);
    }

    #[test]
    fn test_out_of_band_prices_ignored() {
        let mut book = OrderBook::new();
        book.apply_snapshot(&[(0, 10), (100, 10), (50, 10)], &[], 1);
        assert_eq!(book.best_yes_ask(), Some(50));
        // A malformed delta price still advances the sequence.
        assert_eq!(book.apply_delta(Side::Yes, 120, 5, 2), DeltaOutcome::Applied);
        assert_eq!(book.sequence(), 2);
        assert_eq!(book.best_yes_ask(), Some(50));
    }

    #[test]
    fn test_cache_register_and_top() {
        let cache = BookCache::new();
        assert!(cache.top("T1").is_none());

        cache.register("T1");
        let top = cache.top("T1").unwrap();
        assert!(top.stale);
        assert_eq!(top.yes_ask, None);

        cache.with_book_mut("T1", |b| b.apply_snapshot(&[(60, 10)], &[], 1));
        let top = cache.top("T1").unwrap();
        assert!(!top.stale);
        assert_eq!(top.yes_ask, Some(60));
        assert_eq!(top.yes_size, 10);
    }

    #[test]
    fn test_cache_mark_all_stale() {
        let cache = BookCache::new();
        cache.with_book_mut("T1", |b| b.apply_snapshot(&[(60, 10)], &[], 1));
        cache.with_book_mut("T2", |b| b.apply_snapshot(&[(70, 10)], &[], 1));
        cache.mark_all_stale();
        assert!(cache.top("T1").unwrap().stale);
        assert!(cache.top("T2").unwrap().stale);
    }
}
