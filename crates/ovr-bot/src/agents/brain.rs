//! Brain: matcher and edge evaluator.
//!
//! Consumes score changes and turns crossed lines into trade commands. The
//! hot path per event is a handful of map lookups and integer math; the only
//! awaited work is the once-per-game market discovery, which is memoized and
//! coalesced through a per-game registration state so concurrent events for
//! the same game never duplicate the REST fetch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ovr_common::{Side, Sport};
use ovr_kalshi::Market;

use crate::bus::{BusReceiver, EventBus};
use crate::config::MarketsConfig;
use crate::events::{ExecuteTrade, GameEvent};
use crate::exchange::MarketCatalog;
use crate::state::RiskState;
use crate::strategy::{build_entries, edge_cents, has_edge, limit_price, TeamResolver, ThresholdMap};

use super::watcher::WatcherHandle;

/// Market-list fetch budget: one timeout plus a single retry.
const MARKET_LIST_TIMEOUT: Duration = Duration::from_secs(3);
const MARKET_LIST_PAGE: u32 = 1000;

/// Strategy knobs, a copy of the relevant config values.
#[derive(Debug, Clone)]
pub struct BrainParams {
    pub min_edge_cents: i64,
    pub max_slippage_cents: i64,
    pub default_quantity: u32,
    pub max_quantity: u32,
    pub max_open_exposure_cents: i64,
}

/// Per-game registration state. `Pending` coalesces concurrent builds;
/// `Failed` stops retry storms for games the exchange never listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Registration {
    Pending,
    Registered,
    Failed,
}

/// The day's market list for one sport, shared by every game that day.
struct DayMarkets {
    date: String,
    markets: Vec<Market>,
}

pub struct Brain<C: MarketCatalog> {
    bus: EventBus,
    game_events: BusReceiver<GameEvent>,
    watcher: WatcherHandle,
    risk: Arc<RiskState>,
    thresholds: Arc<ThresholdMap>,
    resolver: TeamResolver,
    catalog: Arc<C>,
    markets_cfg: MarketsConfig,
    params: BrainParams,
    registrations: HashMap<String, Registration>,
    day_markets: HashMap<Sport, DayMarkets>,
}

impl<C: MarketCatalog> Brain<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: EventBus,
        game_events: BusReceiver<GameEvent>,
        watcher: WatcherHandle,
        risk: Arc<RiskState>,
        thresholds: Arc<ThresholdMap>,
        catalog: Arc<C>,
        markets_cfg: MarketsConfig,
        params: BrainParams,
    ) -> Self {
        Self {
            bus,
            game_events,
            watcher,
            risk,
            thresholds,
            resolver: TeamResolver::new(),
            catalog,
            markets_cfg,
            params,
            registrations: HashMap::new(),
            day_markets: HashMap::new(),
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            min_edge = self.params.min_edge_cents,
            slippage = self.params.max_slippage_cents,
            qty = self.params.default_quantity,
            "brain running"
        );
        loop {
            tokio::select! {
                event = self.game_events.recv() => self.process_event(event).await,
                _ = shutdown.recv() => {
                    info!("brain stopped");
                    return;
                }
            }
        }
    }

    async fn process_event(&mut self, event: GameEvent) {
        if event.is_final {
            self.thresholds.unregister_game(event.sport, &event.game_id);
            self.registrations.remove(&event.game_id);
            return;
        }

        if self.risk.is_halted() {
            debug!(game_id = %event.game_id, "halted, event discarded");
            return;
        }
        if !self.risk.can_trade_game(&event.game_id) {
            debug!(game_id = %event.game_id, "per-game limit reached, event discarded");
            return;
        }

        match self.registrations.get(&event.game_id) {
            None => {
                self.registrations
                    .insert(event.game_id.clone(), Registration::Pending);
                self.register_game(&event).await;
            }
            Some(Registration::Pending) | Some(Registration::Failed) => return,
            Some(Registration::Registered) => {}
        }
        if self.registrations.get(&event.game_id) != Some(&Registration::Registered) {
            return;
        }

        let crossed =
            self.thresholds
                .claim_crossed(event.sport, &event.game_id, event.total_score);
        for (ticker, line) in crossed {
            self.evaluate_and_signal(&event, ticker, line);
        }
    }

    /// Fetch the day's markets for this sport (memoized per UTC date), match
    /// this game's contracts and register its threshold map. Runs once per
    /// game, off the hot path.
    async fn register_game(&mut self, event: &GameEvent) {
        let Some(spec) = self.markets_cfg.spec(event.sport).cloned() else {
            warn!(sport = %event.sport, "no series configured, game ignored");
            self.registrations
                .insert(event.game_id.clone(), Registration::Failed);
            return;
        };

        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let cached = self
            .day_markets
            .get(&event.sport)
            .is_some_and(|d| d.date == today);
        if !cached {
            match self.fetch_markets(&spec.series_prefix).await {
                Ok(markets) => {
                    // The series listing spans several days; only today's
                    // date code is relevant for live games.
                    let date_code = chrono::Utc::now()
                        .format("%y%b%d")
                        .to_string()
                        .to_uppercase();
                    let total = markets.len();
                    let markets: Vec<Market> = markets
                        .into_iter()
                        .filter(|m| m.ticker.contains(&format!("-{date_code}")))
                        .collect();
                    info!(
                        sport = %event.sport,
                        series = %spec.series_prefix,
                        today = markets.len(),
                        total,
                        "market list fetched"
                    );
                    self.day_markets.insert(
                        event.sport,
                        DayMarkets {
                            date: today,
                            markets,
                        },
                    );
                }
                Err(reason) => {
                    warn!(
                        sport = %event.sport,
                        game_id = %event.game_id,
                        %reason,
                        "market list unavailable, game registration failed"
                    );
                    self.registrations
                        .insert(event.game_id.clone(), Registration::Failed);
                    return;
                }
            }
        }

        let markets = &self.day_markets[&event.sport].markets;
        let prefixes = [spec.series_prefix.clone()];
        let entries = build_entries(
            markets,
            &prefixes,
            &self.resolver,
            &event.game_id,
            &event.away_team,
            &event.home_team,
            event.total_score,
            spec.line_spacing,
        );
        if entries.is_empty() {
            warn!(
                game_id = %event.game_id,
                away = %event.away_team,
                home = %event.home_team,
                "no markets matched this game; the exchange may not have listed it"
            );
            self.registrations
                .insert(event.game_id.clone(), Registration::Failed);
            return;
        }

        let tickers: Vec<String> = entries.iter().map(|e| e.ticker.clone()).collect();
        info!(
            game_id = %event.game_id,
            markets = tickers.len(),
            current_total = event.total_score,
            "game registered"
        );
        self.watcher.subscribe(tickers).await;
        self.thresholds
            .register_game(event.sport, &event.game_id, entries);
        self.registrations
            .insert(event.game_id.clone(), Registration::Registered);
    }

    async fn fetch_markets(&self, series: &str) -> Result<Vec<Market>, String> {
        let mut last_err = String::new();
        for attempt in 0..2 {
            match timeout(
                MARKET_LIST_TIMEOUT,
                self.catalog.markets_by_series(series, MARKET_LIST_PAGE),
            )
            .await
            {
                Ok(Ok(markets)) => return Ok(markets),
                Ok(Err(e)) => last_err = e.to_string(),
                Err(_) => last_err = "market list fetch timed out".to_string(),
            }
            if attempt == 0 {
                debug!(series, error = %last_err, "market list fetch failed, retrying once");
            }
        }
        Err(last_err)
    }

    /// Steps 5-8 for a single crossed line. Synchronous by design: nothing
    /// here may await.
    fn evaluate_and_signal(&self, event: &GameEvent, ticker: String, line: u32) {
        let Some(top) = self.watcher.book_top(&ticker) else {
            warn!(ticker, "no book for crossed line, signal skipped");
            return;
        };
        if top.stale {
            warn!(ticker, "book stale, signal skipped");
            return;
        }
        let Some(yes_ask) = top.yes_ask else {
            debug!(ticker, "empty book, no edge computable");
            return;
        };

        if !has_edge(yes_ask, self.params.min_edge_cents) {
            info!(
                ticker,
                yes_ask,
                edge = edge_cents(yes_ask),
                min_edge = self.params.min_edge_cents,
                "no edge, signal skipped"
            );
            return;
        }

        let quantity = self.params.default_quantity.min(self.params.max_quantity);
        let projected = self.risk.open_exposure_cents() + yes_ask * i64::from(quantity);
        if projected > self.params.max_open_exposure_cents {
            warn!(
                ticker,
                projected,
                limit = self.params.max_open_exposure_cents,
                "exposure gate, signal skipped"
            );
            return;
        }

        if !self.risk.reserve_trade(&event.game_id) {
            debug!(ticker, game_id = %event.game_id, "trade slot refused, signal skipped");
            return;
        }

        let trade = ExecuteTrade {
            signal_id: Uuid::new_v4(),
            ticker: ticker.clone(),
            side: Side::Yes,
            limit_price: limit_price(
                yes_ask,
                self.params.min_edge_cents,
                self.params.max_slippage_cents,
            ),
            quantity,
            game_id: event.game_id.clone(),
            total_at_signal: event.total_score,
            line,
            generated_at: Instant::now(),
        };
        info!(
            signal_id = %trade.signal_id,
            ticker,
            line,
            total = event.total_score,
            yes_ask,
            limit = trade.limit_price,
            qty = trade.quantity,
            "SIGNAL"
        );
        if self.bus.trade_signals.publish(trade).is_dropped() {
            self.risk.release_trade(&event.game_id);
            warn!(ticker, "trade signal dropped on full channel, slot released");
        }
    }
}
