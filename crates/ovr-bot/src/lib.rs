//! Latency-arbitrage engine for alternate-total contracts on live sports.
//!
//! The engine watches live scores and races the market's own repricing:
//! when a score change makes an over contract certain to resolve YES, any
//! ask below the deterministic net payout (93 of 100 cents after fees) is
//! captured with a limit order.
//!
//! ## Architecture
//!
//! Five agents on one tokio runtime, coupled by typed bounded channels plus
//! two pieces of shared read-mostly state:
//!
//! - `Oracle` polls score feeds and emits deduplicated score changes
//! - `Watcher` mirrors the exchange orderbook stream into a local cache
//! - `Brain` matches games to markets and turns crossed lines into commands
//! - `Sniper` fires limit orders behind a circuit breaker
//! - `Shield` owns the risk state: exposure, P&L, halts
//!
//! ## Modules
//!
//! - `bus`: bounded channels with per-channel overflow policies
//! - `events`: the messages that cross agent boundaries
//! - `state`: shared risk state, single-writer discipline
//! - `feed`: pluggable score providers
//! - `strategy`: edge math, ticker grammar, team resolution, threshold maps
//! - `risk`: the execution circuit breaker
//! - `exchange`: narrow trait seams over the venue REST surface

pub mod agents;
pub mod bus;
pub mod config;
pub mod events;
pub mod exchange;
pub mod feed;
pub mod risk;
pub mod state;
pub mod strategy;

pub use agents::{Brain, BrainParams, Oracle, Shield, Sniper, Watcher, WatcherHandle};
pub use bus::{event_bus, BusReceiver, BusSender, EventBus, OverflowPolicy, Publish};
pub use config::{Config, MarketsConfig, SeriesSpec};
pub use events::{ExecuteTrade, FillOutcome, FillReport, GameEvent, GameSettled};
pub use exchange::{MarketCatalog, OrderGateway};
pub use risk::{BreakerConfig, BreakerState, CircuitBreaker};
pub use state::{HaltReason, RiskLimits, RiskSnapshot, RiskState};
