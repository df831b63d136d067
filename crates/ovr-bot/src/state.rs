//! Shared risk state.
//!
//! One writer (Shield), many readers (Brain on the decision path). Every
//! mutation happens under a single lock so the observable state is always
//! one consistent snapshot; the global halt flag is mirrored into an atomic
//! so the hot-path gate is a single load.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{error, info, warn};

use ovr_common::fmt_cents;

use crate::strategy::edge::NET_PAYOUT_CENTS;

/// Hard limits enforced after every fill and settlement.
#[derive(Debug, Clone)]
pub struct RiskLimits {
    /// Halt when realized P&L drops to or below the negation of this.
    pub max_daily_loss_cents: i64,
    /// Halt when open exposure exceeds this.
    pub max_open_exposure_cents: i64,
    /// Per-game cap on submitted trades.
    pub max_trades_per_game: u32,
}

/// Why the global halt flag is set. Sticky until manual restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    DailyLoss,
    Exposure,
    AuthFailure,
}

impl HaltReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HaltReason::DailyLoss => "daily_loss",
            HaltReason::Exposure => "exposure",
            HaltReason::AuthFailure => "auth_failure",
        }
    }
}

/// An open cost-basis lot, keyed by (game_id, ticker).
#[derive(Debug, Clone, Copy)]
struct Lot {
    line: u32,
    qty: u32,
    cost_cents: i64,
}

#[derive(Debug, Default)]
struct RiskInner {
    realized_pnl_cents: i64,
    open_exposure_cents: i64,
    trades_by_game: HashMap<String, u32>,
    halted_games: HashSet<String>,
    lots: HashMap<(String, String), Lot>,
    halt_reason: Option<HaltReason>,
}

/// Consistent read of the risk state, for logs and tests.
#[derive(Debug, Clone)]
pub struct RiskSnapshot {
    pub realized_pnl_cents: i64,
    pub open_exposure_cents: i64,
    pub open_lots: usize,
    pub is_halted: bool,
    pub halt_reason: Option<HaltReason>,
}

/// Process-wide risk state. See module docs for the access discipline.
pub struct RiskState {
    limits: RiskLimits,
    inner: Mutex<RiskInner>,
    halted: AtomicBool,
}

impl RiskState {
    pub fn new(limits: RiskLimits) -> Self {
        Self {
            limits,
            inner: Mutex::new(RiskInner::default()),
            halted: AtomicBool::new(false),
        }
    }

    /// Hot-path gate: single atomic load.
    #[inline(always)]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Whether this game may still be traded (global halt, per-game halt,
    /// and the trade-count gate).
    pub fn can_trade_game(&self, game_id: &str) -> bool {
        if self.is_halted() {
            return false;
        }
        let inner = self.inner.lock();
        !inner.halted_games.contains(game_id)
            && inner.trades_by_game.get(game_id).copied().unwrap_or(0)
                < self.limits.max_trades_per_game
    }

    /// Optimistically reserve one trade slot for a game. Returns false and
    /// reserves nothing when any gate refuses. Shield releases the slot if
    /// the order comes back Rejected/Error.
    pub fn reserve_trade(&self, game_id: &str) -> bool {
        if self.is_halted() {
            return false;
        }
        let mut inner = self.inner.lock();
        if inner.halted_games.contains(game_id) {
            return false;
        }
        let count = inner.trades_by_game.entry(game_id.to_string()).or_insert(0);
        if *count >= self.limits.max_trades_per_game {
            return false;
        }
        *count += 1;
        true
    }

    /// Release an optimistic reservation after a Rejected/Error report.
    pub fn release_trade(&self, game_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(count) = inner.trades_by_game.get_mut(game_id) {
            *count = count.saturating_sub(1);
        }
    }

    /// Account a (partial) fill: exposure grows by the cost, and the lot is
    /// recorded for settlement. Limits are evaluated before the lock drops.
    pub fn apply_fill(
        &self,
        game_id: &str,
        ticker: &str,
        line: u32,
        qty: u32,
        avg_price_cents: i64,
    ) -> RiskSnapshot {
        let mut inner = self.inner.lock();
        let cost = avg_price_cents * i64::from(qty);
        inner.open_exposure_cents += cost;

        let lot = inner
            .lots
            .entry((game_id.to_string(), ticker.to_string()))
            .or_insert(Lot {
                line,
                qty: 0,
                cost_cents: 0,
            });
        lot.qty += qty;
        lot.cost_cents += cost;

        self.enforce_limits(&mut inner, game_id);
        self.snapshot_locked(&inner)
    }

    /// Settle every open lot for a finished game. A lot wins when the final
    /// total reaches its line: each contract pays the net payout.
    pub fn settle_game(&self, game_id: &str, final_total: u32) -> RiskSnapshot {
        let mut inner = self.inner.lock();
        let keys: Vec<(String, String)> = inner
            .lots
            .keys()
            .filter(|(g, _)| g == game_id)
            .cloned()
            .collect();

        for key in keys {
            let Some(lot) = inner.lots.remove(&key) else {
                continue;
            };
            let won = final_total >= lot.line;
            let pnl = if won {
                NET_PAYOUT_CENTS * i64::from(lot.qty) - lot.cost_cents
            } else {
                -lot.cost_cents
            };
            inner.realized_pnl_cents += pnl;
            inner.open_exposure_cents -= lot.cost_cents;
            info!(
                game_id,
                ticker = %key.1,
                line = lot.line,
                final_total,
                won,
                pnl = %fmt_cents(pnl),
                "lot settled"
            );
        }

        self.enforce_limits(&mut inner, game_id);
        self.snapshot_locked(&inner)
    }

    /// Trip the global halt. Sticky: nothing in the process clears it.
    pub fn halt(&self, reason: HaltReason) {
        let mut inner = self.inner.lock();
        if inner.halt_reason.is_none() {
            inner.halt_reason = Some(reason);
            error!(reason = reason.as_str(), "RISK HALT: suppressing all new signals");
        }
        self.halted.store(true, Ordering::Release);
    }

    pub fn snapshot(&self) -> RiskSnapshot {
        self.snapshot_locked(&self.inner.lock())
    }

    /// Trades currently counted against a game (reservations included).
    pub fn trades_for_game(&self, game_id: &str) -> u32 {
        self.inner
            .lock()
            .trades_by_game
            .get(game_id)
            .copied()
            .unwrap_or(0)
    }

    fn enforce_limits(&self, inner: &mut RiskInner, game_id: &str) {
        if inner.realized_pnl_cents <= -self.limits.max_daily_loss_cents {
            if inner.halt_reason.is_none() {
                inner.halt_reason = Some(HaltReason::DailyLoss);
                error!(
                    pnl = %fmt_cents(inner.realized_pnl_cents),
                    limit = %fmt_cents(-self.limits.max_daily_loss_cents),
                    "RISK HALT: daily loss limit breached"
                );
            }
            self.halted.store(true, Ordering::Release);
        }
        if inner.open_exposure_cents > self.limits.max_open_exposure_cents {
            if inner.halt_reason.is_none() {
                inner.halt_reason = Some(HaltReason::Exposure);
                error!(
                    exposure = %fmt_cents(inner.open_exposure_cents),
                    limit = %fmt_cents(self.limits.max_open_exposure_cents),
                    "RISK HALT: open exposure limit breached"
                );
            }
            self.halted.store(true, Ordering::Release);
        }
        let trades = inner.trades_by_game.get(game_id).copied().unwrap_or(0);
        if trades >= self.limits.max_trades_per_game && inner.halted_games.insert(game_id.to_string())
        {
            warn!(
                game_id,
                trades,
                max = self.limits.max_trades_per_game,
                "per-game trade limit reached"
            );
        }
    }

    fn snapshot_locked(&self, inner: &RiskInner) -> RiskSnapshot {
        RiskSnapshot {
            realized_pnl_cents: inner.realized_pnl_cents,
            open_exposure_cents: inner.open_exposure_cents,
            open_lots: inner.lots.len(),
            is_halted: self.is_halted(),
            halt_reason: inner.halt_reason,
        }
    }

    /// Current open exposure, for the pre-trade exposure gate.
    pub fn open_exposure_cents(&self) -> i64 {
        self.inner.lock().open_exposure_cents
    }
}
