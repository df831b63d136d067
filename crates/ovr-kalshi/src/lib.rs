//! Kalshi transport layer for the ovr-bot trading system.
//!
//! What lives here:
//! - `auth`: signed request headers (RSA-PSS-SHA256 or Ed25519, selected by
//!   the loaded PEM key)
//! - `rest`: pooled, pre-warmed REST client (markets, orders, status, balance)
//! - `ws`: reconnecting orderbook stream with dynamic subscriptions
//! - `orderbook`: per-ticker book replica with sequence/gap discipline and
//!   the concurrent cache the strategy reads from
//!
//! Strategy and risk logic live in `ovr-bot`; nothing in this crate decides
//! whether to trade.

pub mod auth;
pub mod orderbook;
pub mod rest;
pub mod ws;

pub use auth::{AuthError, KalshiAuth};
pub use orderbook::{BookCache, BookTop, DeltaOutcome, OrderBook};
pub use rest::{
    Balance, ExchangeStatus, KalshiRestClient, Market, OrderInfo, RestError, DEMO_BASE_URL,
    PROD_BASE_URL,
};
pub use ws::{KalshiWsClient, WsCommand, WsError, WsEvent, DEMO_WS_URL, PROD_WS_URL};
