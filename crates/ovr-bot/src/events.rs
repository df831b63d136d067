//! Messages that cross agent boundaries.
//!
//! Everything here is immutable once published. Orderbook updates are not in
//! this module on purpose: they flow from the stream straight into the book
//! cache (`ovr_kalshi::ws::WsEvent`) and are never queued to the strategy.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use ovr_common::{Side, Sport};

/// A score-change observation from one provider.
///
/// Emitted by Oracle only when the observed total differs from the last
/// total it saw for the game. `received_at` is captured at socket receive
/// time, not parse time.
#[derive(Debug, Clone)]
pub struct GameEvent {
    pub sport: Sport,
    /// Provider-scoped stable identifier for the match.
    pub game_id: String,
    pub away_team: String,
    pub home_team: String,
    pub away_score: u32,
    pub home_score: u32,
    /// Always `away_score + home_score`.
    pub total_score: u32,
    /// e.g. "H2 04:22", "67'", "HT".
    pub game_clock: String,
    /// Quarter/half, 1-based; 0 when unknown.
    pub period: u32,
    pub is_final: bool,
    /// Scheduled start, used for the clock-skew guard.
    pub kickoff: DateTime<Utc>,
    /// Source tag for latency telemetry.
    pub provider: &'static str,
    pub received_at: Instant,
}

impl GameEvent {
    /// Total derived from the two score fields; the invariant the rest of
    /// the pipeline relies on.
    pub fn derived_total(&self) -> u32 {
        self.away_score + self.home_score
    }
}

/// Command from Brain to Sniper: buy `quantity` contracts at up to
/// `limit_price` cents.
#[derive(Debug, Clone)]
pub struct ExecuteTrade {
    pub signal_id: Uuid,
    pub ticker: String,
    pub side: Side,
    /// Limit price in cents; never above net payout minus the minimum edge
    /// (plus the slippage budget).
    pub limit_price: i64,
    pub quantity: u32,
    /// Causal score observation, carried for risk accounting.
    pub game_id: String,
    pub total_at_signal: u32,
    /// The contract's total line, so settlement never re-parses tickers.
    pub line: u32,
    pub generated_at: Instant,
}

/// What happened to one ExecuteTrade. Exactly one report per command.
#[derive(Debug, Clone)]
pub struct FillReport {
    pub signal_id: Uuid,
    pub ticker: String,
    pub game_id: String,
    pub line: u32,
    pub side: Side,
    pub outcome: FillOutcome,
    /// Signal-to-report latency, for telemetry.
    pub latency: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillOutcome {
    Filled { qty: u32, avg_price: i64 },
    PartialFill { qty: u32, avg_price: i64 },
    Rejected { reason: String },
    Error { reason: String },
}

impl FillOutcome {
    /// True when any contracts were bought.
    pub fn filled_qty(&self) -> u32 {
        match self {
            FillOutcome::Filled { qty, .. } | FillOutcome::PartialFill { qty, .. } => *qty,
            _ => 0,
        }
    }

    /// True for Rejected/Error: the optimistic trade reservation must be
    /// released.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            FillOutcome::Rejected { .. } | FillOutcome::Error { .. }
        )
    }
}

impl std::fmt::Display for FillOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FillOutcome::Filled { qty, avg_price } => {
                write!(f, "filled {qty} @ {avg_price}c")
            }
            FillOutcome::PartialFill { qty, avg_price } => {
                write!(f, "partial {qty} @ {avg_price}c")
            }
            FillOutcome::Rejected { reason } => write!(f, "rejected: {reason}"),
            FillOutcome::Error { reason } => write!(f, "error: {reason}"),
        }
    }
}

/// A game went final; Shield settles every open lot for it.
#[derive(Debug, Clone)]
pub struct GameSettled {
    pub game_id: String,
    pub final_total: u32,
}
