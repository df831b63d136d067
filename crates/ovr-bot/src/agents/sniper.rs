//! Sniper: order execution.
//!
//! Consumes trade commands and fires limit orders over the pre-warmed REST
//! pool. One order per command, one report per order, no retries: the edge
//! decays on the market's own reaction time, so a retried order is usually
//! an adverse-selection trade at a repriced book. A circuit breaker shields
//! the venue from failure storms by rejecting commands locally while open.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::bus::{BusReceiver, EventBus};
use crate::events::{ExecuteTrade, FillOutcome, FillReport};
use crate::exchange::OrderGateway;
use crate::risk::{BreakerState, CircuitBreaker, OPEN_REJECT_REASON};
use crate::state::{HaltReason, RiskState};

pub struct Sniper<G: OrderGateway> {
    bus: EventBus,
    trade_signals: BusReceiver<ExecuteTrade>,
    gateway: Arc<G>,
    breaker: CircuitBreaker,
    risk: Arc<RiskState>,
    order_timeout: Duration,
}

impl<G: OrderGateway> Sniper<G> {
    pub fn new(
        bus: EventBus,
        trade_signals: BusReceiver<ExecuteTrade>,
        gateway: Arc<G>,
        breaker: CircuitBreaker,
        risk: Arc<RiskState>,
        order_timeout: Duration,
    ) -> Self {
        Self {
            bus,
            trade_signals,
            gateway,
            breaker,
            risk,
            order_timeout,
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(order_timeout_ms = self.order_timeout.as_millis() as u64, "sniper running");
        loop {
            tokio::select! {
                signal = self.trade_signals.recv() => self.execute(signal).await,
                _ = shutdown.recv() => {
                    // Bounded drain: whatever is already queued gets its
                    // report; the supervisor caps how long this takes.
                    while let Some(signal) = self.trade_signals.try_recv() {
                        self.execute(signal).await;
                    }
                    info!("sniper stopped");
                    return;
                }
            }
        }
    }

    pub(crate) async fn execute(&mut self, signal: ExecuteTrade) {
        if !self.breaker.acquire() {
            error!(
                signal_id = %signal.signal_id,
                ticker = %signal.ticker,
                cooldown_ms = self.breaker.cooldown().as_millis() as u64,
                "breaker open, command rejected locally"
            );
            self.publish_report(
                &signal,
                FillOutcome::Rejected {
                    reason: OPEN_REJECT_REASON.to_string(),
                },
            );
            return;
        }
        if self.breaker.state() == BreakerState::HalfOpen {
            info!(signal_id = %signal.signal_id, "half-open probe order");
        }

        // The exchange-side idempotency key ties back to the signal.
        let client_order_id = format!("ovr-{}", &signal.signal_id.simple().to_string()[..12]);
        let attempt = timeout(
            self.order_timeout,
            self.gateway.place_limit_order(
                &signal.ticker,
                signal.side,
                signal.quantity,
                signal.limit_price,
                &client_order_id,
            ),
        )
        .await;

        let outcome = match attempt {
            Ok(Ok(order)) => {
                self.breaker.record_success();
                let avg_price = order.avg_fill_price.unwrap_or(signal.limit_price);
                match order.filled_count {
                    0 => FillOutcome::Rejected {
                        reason: format!("unfilled: status={}", order.status),
                    },
                    qty if qty >= signal.quantity => FillOutcome::Filled {
                        qty: signal.quantity,
                        avg_price,
                    },
                    qty => FillOutcome::PartialFill { qty, avg_price },
                }
            }
            Ok(Err(e)) => {
                // A signature rejection never recovers on its own; halt the
                // whole engine rather than burn the breaker on it.
                if e.is_auth_failure() {
                    error!(error = %e, "authentication rejected on order path");
                    self.risk.halt(HaltReason::AuthFailure);
                }
                if self.breaker.record_failure() {
                    error!(error = %e, "order failure tripped the breaker");
                } else {
                    warn!(error = %e, "order failed");
                }
                FillOutcome::Error {
                    reason: e.to_string(),
                }
            }
            Err(_) => {
                if self.breaker.record_failure() {
                    error!("order timeout tripped the breaker");
                } else {
                    warn!(timeout_ms = self.order_timeout.as_millis() as u64, "order timed out");
                }
                FillOutcome::Error {
                    reason: "order timeout".to_string(),
                }
            }
        };
        self.publish_report(&signal, outcome);
    }

    fn publish_report(&self, signal: &ExecuteTrade, outcome: FillOutcome) {
        let latency = signal.generated_at.elapsed();
        info!(
            signal_id = %signal.signal_id,
            ticker = %signal.ticker,
            %outcome,
            latency_us = latency.as_micros() as u64,
            "fill report"
        );
        let report = FillReport {
            signal_id: signal.signal_id,
            ticker: signal.ticker.clone(),
            game_id: signal.game_id.clone(),
            line: signal.line,
            side: signal.side,
            outcome,
            latency,
        };
        if self.bus.fill_reports.publish(report).is_dropped() {
            // Shield missing a report is a real accounting hole.
            error!(signal_id = %signal.signal_id, "fill report DROPPED on full channel");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;
    use uuid::Uuid;

    use crate::bus::event_bus;
    use crate::risk::BreakerConfig;
    use crate::state::RiskLimits;
    use ovr_common::Side;
    use ovr_kalshi::{OrderInfo, RestError};

    /// Gateway stub: a scripted sequence of responses.
    struct StubGateway {
        responses: parking_lot::Mutex<Vec<Result<OrderInfo, RestError>>>,
        calls: AtomicU32,
    }

    impl StubGateway {
        fn new(responses: Vec<Result<OrderInfo, RestError>>) -> Self {
            Self {
                responses: parking_lot::Mutex::new(responses),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl OrderGateway for StubGateway {
        async fn place_limit_order(
            &self,
            _ticker: &str,
            _side: Side,
            _quantity: u32,
            _limit_price: i64,
            _client_order_id: &str,
        ) -> Result<OrderInfo, RestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                Err(RestError::Api {
                    status: 500,
                    body: "stub exhausted".into(),
                })
            } else {
                responses.remove(0)
            }
        }
    }

    fn signal(ticker: &str) -> ExecuteTrade {
        ExecuteTrade {
            signal_id: Uuid::new_v4(),
            ticker: ticker.to_string(),
            side: Side::Yes,
            limit_price: 82,
            quantity: 10,
            game_id: "g1".into(),
            total_at_signal: 178,
            line: 175,
            generated_at: Instant::now(),
        }
    }

    fn filled(qty: u32, avg: i64) -> Result<OrderInfo, RestError> {
        Ok(OrderInfo {
            order_id: "o1".into(),
            status: "executed".into(),
            filled_count: qty,
            avg_fill_price: Some(avg),
        })
    }

    fn api_error() -> Result<OrderInfo, RestError> {
        Err(RestError::Api {
            status: 500,
            body: "boom".into(),
        })
    }

    fn sniper_with(
        responses: Vec<Result<OrderInfo, RestError>>,
    ) -> (Sniper<StubGateway>, crate::bus::BusReceivers, Arc<StubGateway>) {
        let (bus, mut receivers) = event_bus();
        let gateway = Arc::new(StubGateway::new(responses));
        let trade_rx = std::mem::replace(
            &mut receivers.trade_signals,
            crate::bus::channel("unused", 1, crate::bus::OverflowPolicy::DropNewest).1,
        );
        let risk = Arc::new(RiskState::new(RiskLimits {
            max_daily_loss_cents: 10_000,
            max_open_exposure_cents: 50_000,
            max_trades_per_game: 5,
        }));
        let sniper = Sniper::new(
            bus,
            trade_rx,
            Arc::clone(&gateway),
            CircuitBreaker::new(BreakerConfig {
                max_consecutive_failures: 3,
                base_cooldown: Duration::from_secs(30),
                max_cooldown: Duration::from_secs(300),
            }),
            risk,
            Duration::from_millis(500),
        );
        (sniper, receivers, gateway)
    }

    #[tokio::test]
    async fn test_full_fill_reported() {
        let (mut sniper, mut rx, _gw) = sniper_with(vec![filled(10, 81)]);
        sniper.execute(signal("T1")).await;
        let report = rx.fill_reports.try_recv().unwrap();
        assert_eq!(
            report.outcome,
            FillOutcome::Filled {
                qty: 10,
                avg_price: 81
            }
        );
        assert_eq!(report.game_id, "g1");
        assert_eq!(report.line, 175);
    }

    #[tokio::test]
    async fn test_partial_fill_reported() {
        let (mut sniper, mut rx, _gw) = sniper_with(vec![filled(4, 82)]);
        sniper.execute(signal("T1")).await;
        assert_eq!(
            rx.fill_reports.try_recv().unwrap().outcome,
            FillOutcome::PartialFill {
                qty: 4,
                avg_price: 82
            }
        );
    }

    #[tokio::test]
    async fn test_unfilled_order_is_rejected() {
        let (mut sniper, mut rx, _gw) = sniper_with(vec![Ok(OrderInfo {
            order_id: "o1".into(),
            status: "canceled".into(),
            filled_count: 0,
            avg_fill_price: None,
        })]);
        sniper.execute(signal("T1")).await;
        match rx.fill_reports.try_recv().unwrap().outcome {
            FillOutcome::Rejected { reason } => assert!(reason.contains("canceled")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_breaker_opens_after_three_errors() {
        // Three consecutive errors open the breaker; the
        // fourth command is rejected locally without touching the venue.
        let (mut sniper, mut rx, gw) =
            sniper_with(vec![api_error(), api_error(), api_error()]);
        for _ in 0..3 {
            sniper.execute(signal("T1")).await;
            assert!(matches!(
                rx.fill_reports.try_recv().unwrap().outcome,
                FillOutcome::Error { .. }
            ));
        }
        assert_eq!(sniper.breaker.state(), BreakerState::Open);

        sniper.execute(signal("T1")).await;
        match rx.fill_reports.try_recv().unwrap().outcome {
            FillOutcome::Rejected { reason } => assert_eq!(reason, OPEN_REJECT_REASON),
            other => panic!("unexpected outcome: {other:?}"),
        }
        // The venue saw only the first three attempts.
        assert_eq!(gw.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_auth_rejection_halts_engine() {
        let (mut sniper, mut rx, _gw) = sniper_with(vec![Err(RestError::AuthRejected {
            status: 401,
            body: "bad signature".into(),
        })]);
        assert!(!sniper.risk.is_halted());
        sniper.execute(signal("T1")).await;
        assert!(sniper.risk.is_halted());
        assert!(matches!(
            rx.fill_reports.try_recv().unwrap().outcome,
            FillOutcome::Error { .. }
        ));
    }

    #[tokio::test]
    async fn test_exactly_one_report_per_command() {
        let (mut sniper, mut rx, _gw) =
            sniper_with(vec![filled(10, 81), api_error(), filled(10, 80)]);
        for _ in 0..3 {
            sniper.execute(signal("T1")).await;
        }
        for _ in 0..3 {
            assert!(rx.fill_reports.try_recv().is_some());
        }
        assert!(rx.fill_reports.try_recv().is_none());
    }
}
