//! Shield: risk accounting.
//!
//! Sole writer of the shared risk state. Consumes fill reports (exposure,
//! cost-basis lots, per-game counts) and settlements (realized P&L), and
//! trips the halt flags the decision path reads. Limits are evaluated inside
//! the state's own lock after every update.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

use ovr_common::fmt_cents;

use crate::bus::BusReceiver;
use crate::events::{FillOutcome, FillReport, GameSettled};
use crate::state::RiskState;

pub struct Shield {
    fill_reports: BusReceiver<FillReport>,
    settlements: BusReceiver<GameSettled>,
    risk: Arc<RiskState>,
}

impl Shield {
    pub fn new(
        fill_reports: BusReceiver<FillReport>,
        settlements: BusReceiver<GameSettled>,
        risk: Arc<RiskState>,
    ) -> Self {
        Self {
            fill_reports,
            settlements,
            risk,
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("shield running");
        loop {
            tokio::select! {
                report = self.fill_reports.recv() => self.process_fill(report),
                settlement = self.settlements.recv() => self.process_settlement(settlement),
                _ = shutdown.recv() => {
                    // Account everything already queued before exiting.
                    while let Some(report) = self.fill_reports.try_recv() {
                        self.process_fill(report);
                    }
                    while let Some(settlement) = self.settlements.try_recv() {
                        self.process_settlement(settlement);
                    }
                    info!("shield stopped");
                    return;
                }
            }
        }
    }

    pub(crate) fn process_fill(&mut self, report: FillReport) {
        let (qty, avg_price) = match &report.outcome {
            FillOutcome::Filled { qty, avg_price }
            | FillOutcome::PartialFill { qty, avg_price } => (*qty, *avg_price),
            FillOutcome::Rejected { .. } | FillOutcome::Error { .. } => {
                // Brain reserved the slot optimistically; give it back.
                self.risk.release_trade(&report.game_id);
                debug!(
                    signal_id = %report.signal_id,
                    game_id = %report.game_id,
                    outcome = %report.outcome,
                    "failed order, trade slot released"
                );
                return;
            }
        };
        if qty == 0 {
            return;
        }

        let snap = self
            .risk
            .apply_fill(&report.game_id, &report.ticker, report.line, qty, avg_price);
        info!(
            ticker = %report.ticker,
            game_id = %report.game_id,
            qty,
            avg_price,
            exposure = %fmt_cents(snap.open_exposure_cents),
            pnl = %fmt_cents(snap.realized_pnl_cents),
            latency_us = report.latency.as_micros() as u64,
            "fill accounted"
        );
    }

    pub(crate) fn process_settlement(&mut self, settlement: GameSettled) {
        let snap = self
            .risk
            .settle_game(&settlement.game_id, settlement.final_total);
        info!(
            game_id = %settlement.game_id,
            final_total = settlement.final_total,
            pnl = %fmt_cents(snap.realized_pnl_cents),
            exposure = %fmt_cents(snap.open_exposure_cents),
            "game settled"
        );
    }
}
