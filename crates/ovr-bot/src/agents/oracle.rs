//! Oracle: score ingestion.
//!
//! One poll loop per configured feed, all fanning into the shared
//! `game_events` channel. Dedup is strictly by total change, never by any
//! provider sequence: providers re-emit stale frames, and a re-emitted total
//! is worthless. The loops never exit on their own; transient poll failures
//! back off exponentially up to five seconds.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::{DashMap, DashSet};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::events::{GameEvent, GameSettled};
use crate::feed::ScoreFeed;

/// Poll-failure backoff cap.
const MAX_POLL_BACKOFF: Duration = Duration::from_secs(5);

/// Records claiming to be in progress with a kickoff further than this many
/// minutes in the future are clock-skew garbage and dropped.
const KICKOFF_SKEW_GUARD_MINS: i64 = 10;

pub struct Oracle {
    bus: EventBus,
    feeds: Vec<Arc<dyn ScoreFeed>>,
    poll_interval: Duration,
    /// game_id -> last emitted total, shared across feeds so the first
    /// delivery wins when providers overlap.
    last_total_by_game: Arc<DashMap<String, u32>>,
    /// Games whose settlement has already been published.
    settled: Arc<DashSet<String>>,
}

impl Oracle {
    pub fn new(bus: EventBus, feeds: Vec<Arc<dyn ScoreFeed>>, poll_interval: Duration) -> Self {
        Self {
            bus,
            feeds,
            poll_interval,
            last_total_by_game: Arc::new(DashMap::new()),
            settled: Arc::new(DashSet::new()),
        }
    }

    /// Run all feed loops until shutdown.
    pub async fn run(self, shutdown: broadcast::Sender<()>) {
        info!(feeds = self.feeds.len(), "oracle running");
        let mut handles = Vec::new();
        for feed in &self.feeds {
            let feed = Arc::clone(feed);
            let bus = self.bus.clone();
            let last_totals = Arc::clone(&self.last_total_by_game);
            let settled = Arc::clone(&self.settled);
            let poll_interval = self.poll_interval;
            let shutdown_rx = shutdown.subscribe();
            handles.push(tokio::spawn(run_feed(
                feed,
                bus,
                last_totals,
                settled,
                poll_interval,
                shutdown_rx,
            )));
        }
        for handle in handles {
            let _ = handle.await;
        }
        info!("oracle stopped");
    }
}

async fn run_feed(
    feed: Arc<dyn ScoreFeed>,
    bus: EventBus,
    last_totals: Arc<DashMap<String, u32>>,
    settled: Arc<DashSet<String>>,
    poll_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!(feed = %feed.name(), "feed loop started");
    let mut consecutive_errors: u32 = 0;

    loop {
        let poll_start = Instant::now();

        match feed.poll().await {
            Ok(records) => {
                consecutive_errors = 0;
                for record in records {
                    handle_record(&bus, &last_totals, &settled, record);
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                // First failure and every 100th after that; a dead provider
                // would otherwise log at poll frequency.
                if consecutive_errors == 1 || consecutive_errors % 100 == 0 {
                    warn!(feed = %feed.name(), errors = consecutive_errors, error = %e, "poll failed");
                }
            }
        }

        let delay = if consecutive_errors > 0 {
            backoff_for(consecutive_errors, poll_interval)
        } else {
            poll_interval.saturating_sub(poll_start.elapsed())
        };
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.recv() => {
                info!(feed = %feed.name(), "feed loop stopped");
                return;
            }
        }
    }
}

fn handle_record(
    bus: &EventBus,
    last_totals: &DashMap<String, u32>,
    settled: &DashSet<String>,
    record: GameEvent,
) {
    if record.is_final {
        last_totals.insert(record.game_id.clone(), record.total_score);
        if settled.insert(record.game_id.clone()) {
            info!(
                game_id = %record.game_id,
                final_total = record.total_score,
                "game final, publishing settlement"
            );
            bus.settlements.publish(GameSettled {
                game_id: record.game_id.clone(),
                final_total: record.total_score,
            });
        }
        return;
    }

    // Clock-skew guard: a "live" record whose kickoff is well in the future
    // is a provider glitch.
    if (record.kickoff - chrono::Utc::now()).num_minutes() > KICKOFF_SKEW_GUARD_MINS {
        warn!(game_id = %record.game_id, kickoff = %record.kickoff, "kickoff in the future, dropping record");
        return;
    }

    let emit = match last_totals.insert(record.game_id.clone(), record.total_score) {
        // First sighting: only a nonzero total is worth waking the matcher.
        None => record.total_score > 0,
        Some(prev) => prev != record.total_score,
    };
    if !emit {
        return;
    }

    debug!(
        game_id = %record.game_id,
        sport = %record.sport,
        away = %record.away_team,
        home = %record.home_team,
        total = record.total_score,
        clock = %record.game_clock,
        provider = record.provider,
        "score change"
    );
    bus.game_events.publish(record);
}

fn backoff_for(consecutive_errors: u32, base: Duration) -> Duration {
    let shift = consecutive_errors.min(6);
    (base * 2u32.saturating_pow(shift)).min(MAX_POLL_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::event_bus;
    use ovr_common::Sport;

    fn record(game_id: &str, away: u32, home: u32, is_final: bool) -> GameEvent {
        GameEvent {
            sport: Sport::NcaaBasketball,
            game_id: game_id.to_string(),
            away_team: "WEBB".into(),
            home_team: "RADF".into(),
            away_score: away,
            home_score: home,
            total_score: away + home,
            game_clock: "H2 04:22".into(),
            period: 2,
            is_final,
            kickoff: chrono::Utc::now() - chrono::Duration::hours(1),
            provider: "espn",
            received_at: Instant::now(),
        }
    }

    #[test]
    fn test_dedup_by_total() {
        let (bus, mut rx) = event_bus();
        let totals = DashMap::new();
        let settled = DashSet::new();

        handle_record(&bus, &totals, &settled, record("g1", 88, 90, false));
        // Identical total on the next poll: suppressed.
        handle_record(&bus, &totals, &settled, record("g1", 88, 90, false));
        assert!(rx.game_events.try_recv().is_some());
        assert!(rx.game_events.try_recv().is_none());

        // Total change emits again.
        handle_record(&bus, &totals, &settled, record("g1", 88, 93, false));
        assert_eq!(rx.game_events.try_recv().unwrap().total_score, 181);
    }

    #[test]
    fn test_first_sight_zero_total_suppressed() {
        let (bus, mut rx) = event_bus();
        let totals = DashMap::new();
        let settled = DashSet::new();

        handle_record(&bus, &totals, &settled, record("g1", 0, 0, false));
        assert!(rx.game_events.try_recv().is_none());
        // The 0 total is recorded, so the first score emits.
        handle_record(&bus, &totals, &settled, record("g1", 2, 0, false));
        assert_eq!(rx.game_events.try_recv().unwrap().total_score, 2);
    }

    #[test]
    fn test_settlement_published_once() {
        let (bus, mut rx) = event_bus();
        let totals = DashMap::new();
        let settled = DashSet::new();

        handle_record(&bus, &totals, &settled, record("g1", 99, 101, true));
        handle_record(&bus, &totals, &settled, record("g1", 99, 101, true));
        let settlement = rx.settlements.try_recv().unwrap();
        assert_eq!(settlement.game_id, "g1");
        assert_eq!(settlement.final_total, 200);
        assert!(rx.settlements.try_recv().is_none());
        // Finals never reach the game-event channel.
        assert!(rx.game_events.try_recv().is_none());
    }

    #[test]
    fn test_future_kickoff_dropped() {
        let (bus, mut rx) = event_bus();
        let totals = DashMap::new();
        let settled = DashSet::new();

        let mut rec = record("g1", 10, 10, false);
        rec.kickoff = chrono::Utc::now() + chrono::Duration::hours(2);
        handle_record(&bus, &totals, &settled, rec);
        assert!(rx.game_events.try_recv().is_none());
    }

    #[test]
    fn test_backoff_caps() {
        let base = Duration::from_millis(750);
        assert_eq!(backoff_for(1, base), Duration::from_millis(1500));
        assert_eq!(backoff_for(2, base), Duration::from_millis(3000));
        assert_eq!(backoff_for(3, base), MAX_POLL_BACKOFF);
        assert_eq!(backoff_for(100, base), MAX_POLL_BACKOFF);
    }
}
