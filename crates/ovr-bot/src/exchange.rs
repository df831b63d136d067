//! Trait seams over the exchange REST surface.
//!
//! Brain only lists markets; Sniper only places orders. Narrow traits keep
//! both testable against stubs without a live venue.

use async_trait::async_trait;

use ovr_common::Side;
use ovr_kalshi::{KalshiRestClient, Market, OrderInfo, RestError};

/// Market discovery, used once per game to build the threshold map.
#[async_trait]
pub trait MarketCatalog: Send + Sync {
    async fn markets_by_series(&self, series: &str, limit: u32)
        -> Result<Vec<Market>, RestError>;
}

/// Order submission, used by the execution agent.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place_limit_order(
        &self,
        ticker: &str,
        side: Side,
        quantity: u32,
        limit_price: i64,
        client_order_id: &str,
    ) -> Result<OrderInfo, RestError>;
}

#[async_trait]
impl MarketCatalog for KalshiRestClient {
    async fn markets_by_series(
        &self,
        series: &str,
        limit: u32,
    ) -> Result<Vec<Market>, RestError> {
        KalshiRestClient::markets_by_series(self, series, limit).await
    }
}

#[async_trait]
impl OrderGateway for KalshiRestClient {
    async fn place_limit_order(
        &self,
        ticker: &str,
        side: Side,
        quantity: u32,
        limit_price: i64,
        client_order_id: &str,
    ) -> Result<OrderInfo, RestError> {
        KalshiRestClient::place_limit_order(self, ticker, side, quantity, limit_price, client_order_id)
            .await
    }
}
