//! Signed REST client for the Kalshi trade API.
//!
//! One pooled `reqwest::Client` is shared for every request. The pool is
//! pre-warmed at startup (DNS resolved, TCP + TLS handshake completed via an
//! authenticated status call) and kept hot by a keepalive task, so order
//! placement never pays a connection setup on the critical path.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ovr_common::Side;

use crate::auth::{AuthError, KalshiAuth};

/// Production trade API base URL.
pub const PROD_BASE_URL: &str = "https://api.elections.kalshi.com/trade-api/v2";
/// Demo/sandbox trade API base URL.
pub const DEMO_BASE_URL: &str = "https://demo-api.kalshi.co/trade-api/v2";

/// Default timeout for market-data reads.
const READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Errors from the REST transport.
#[derive(Debug, Error)]
pub enum RestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: status {status}, body: {body}")]
    Api { status: u16, body: String },

    #[error("authentication rejected: status {status}, body: {body}")]
    AuthRejected { status: u16, body: String },

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl RestError {
    /// True for signature/credential failures. These never recover on
    /// retry; callers treat them as fatal.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, RestError::AuthRejected { .. })
    }
}

/// Exchange status payload, used as the warmup/keepalive no-op.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeStatus {
    #[serde(default)]
    pub exchange_active: bool,
    #[serde(default)]
    pub trading_active: bool,
}

/// Account balance in cents.
#[derive(Debug, Clone, Deserialize)]
pub struct Balance {
    pub balance: i64,
}

/// One market from the list-markets endpoint. Only the fields the matcher
/// consumes; everything else in the payload is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Market {
    pub ticker: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct MarketsPage {
    #[serde(default)]
    markets: Vec<Market>,
}

/// Order acknowledgment from the place-order endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderInfo {
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub status: String,
    /// Contracts filled immediately (taker fills).
    #[serde(default, alias = "taker_fill_count", alias = "count_filled")]
    pub filled_count: u32,
    /// Average fill price in cents, when the exchange reports one.
    #[serde(default, alias = "avg_price", alias = "taker_fill_price")]
    pub avg_fill_price: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OrderEnvelope {
    order: OrderInfo,
}

/// Async REST client for the Kalshi trade API.
///
/// Construct once, call [`KalshiRestClient::startup`] before first use.
pub struct KalshiRestClient {
    http: reqwest::Client,
    base_url: String,
    /// URL path prefix of `base_url`; signatures cover the full request path.
    sign_prefix: String,
    auth: Arc<KalshiAuth>,
    order_timeout: Duration,
}

impl KalshiRestClient {
    pub fn new(base_url: &str, auth: Arc<KalshiAuth>, order_timeout: Duration) -> Result<Self, RestError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let sign_prefix = base_url
            .splitn(4, '/')
            .nth(3)
            .map(|p| format!("/{p}"))
            .unwrap_or_default();

        let http = reqwest::Client::builder()
            .timeout(READ_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url,
            sign_prefix,
            auth,
            order_timeout,
        })
    }

    /// Pre-resolve DNS and force a TCP + TLS handshake into the pool with an
    /// authenticated no-op. Must be awaited before the agents start.
    pub async fn startup(&self) -> Result<(), RestError> {
        if let Some(host) = self.host() {
            match tokio::net::lookup_host((host.as_str(), 443)).await {
                Ok(mut addrs) => {
                    info!(host = %host, addr = ?addrs.next(), "DNS pre-resolved");
                }
                Err(e) => warn!(host = %host, error = %e, "DNS pre-resolve failed"),
            }
        }

        let status = self.exchange_status().await?;
        info!(
            exchange_active = status.exchange_active,
            trading_active = status.trading_active,
            "REST connection warmed"
        );
        Ok(())
    }

    /// Spawn a task that pings exchange status every `interval` to keep the
    /// pooled connection alive. Abort the handle on shutdown.
    pub fn spawn_keepalive(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                if let Err(e) = client.exchange_status().await {
                    warn!(error = %e, "keepalive ping failed");
                }
            }
        })
    }

    fn host(&self) -> Option<String> {
        self.base_url
            .split("//")
            .nth(1)
            .and_then(|rest| rest.split('/').next())
            .map(str::to_string)
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<T, RestError> {
        let headers = self
            .auth
            .signed_headers(method.as_str(), &format!("{}{path}", self.sign_prefix))?;

        let mut req = self.http.request(method, format!("{}{path}", self.base_url));
        for (name, value) in headers {
            req = req.header(name, value);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(RestError::AuthRejected {
                    status: status.as_u16(),
                    body,
                });
            }
            return Err(RestError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json().await?)
    }

    /// Lightweight authenticated no-op; also the keepalive ping.
    pub async fn exchange_status(&self) -> Result<ExchangeStatus, RestError> {
        self.request(reqwest::Method::GET, "/exchange/status", None, None)
            .await
    }

    pub async fn balance(&self) -> Result<Balance, RestError> {
        self.request(reqwest::Method::GET, "/portfolio/balance", None, None)
            .await
    }

    /// List markets for a series. One page, capped at `limit`.
    pub async fn markets_by_series(
        &self,
        series_ticker: &str,
        limit: u32,
    ) -> Result<Vec<Market>, RestError> {
        let path = format!("/markets?limit={limit}&series_ticker={series_ticker}");
        let page: MarketsPage = self.request(reqwest::Method::GET, &path, None, None).await?;
        debug!(
            series = series_ticker,
            count = page.markets.len(),
            "fetched markets"
        );
        Ok(page.markets)
    }

    /// Place a limit buy order. `limit_price` is cents on the 1-99 scale;
    /// `client_order_id` is the exchange-side idempotency key.
    pub async fn place_limit_order(
        &self,
        ticker: &str,
        side: Side,
        quantity: u32,
        limit_price: i64,
        client_order_id: &str,
    ) -> Result<OrderInfo, RestError> {
        let body = serde_json::json!({
            "ticker": ticker,
            "action": "buy",
            "type": "limit",
            "side": side.as_str(),
            "count": quantity,
            "limit_price": limit_price,
            "client_order_id": client_order_id,
        });
        let env: OrderEnvelope = self
            .request(
                reqwest::Method::POST,
                "/portfolio/orders",
                Some(body),
                Some(self.order_timeout),
            )
            .await?;
        Ok(env.order)
    }

}

impl std::fmt::Debug for KalshiRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KalshiRestClient")
            .field("base_url", &self.base_url)
            .field("sign_prefix", &self.sign_prefix)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_prefix_derivation() {
        let auth = Arc::new(
            KalshiAuth::from_pem(
                "k",
                &rsa_test_pem(),
            )
            .unwrap(),
        );
        let client =
            KalshiRestClient::new(PROD_BASE_URL, auth, Duration::from_millis(500)).unwrap();
        assert_eq!(client.sign_prefix, "/trade-api/v2");
        assert_eq!(
            client.host().as_deref(),
            Some("api.elections.kalshi.com")
        );
    }

    #[test]
    fn test_order_info_aliases() {
        let raw = r#"{"order_id":"o1","status":"executed","taker_fill_count":10,"avg_price":61}"#;
        let info: OrderInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(info.filled_count, 10);
        assert_eq!(info.avg_fill_price, Some(61));
    }

    #[test]
    fn test_order_info_defaults() {
        let info: OrderInfo = serde_json::from_str(r#"{"order_id":"o2"}"#).unwrap();
        assert_eq!(info.status, "");
        assert_eq!(info.filled_count, 0);
        assert_eq!(info.avg_fill_price, None);
    }

    #[test]
    fn test_markets_page_tolerates_extra_fields() {
        let raw = r#"{"markets":[{"ticker":"KXNCAAMBTOTAL-26FEB19WEBBRAD-177","title":"T","status":"active","volume":123}],"cursor":"abc"}"#;
        let page: MarketsPage = serde_json::from_str(raw).unwrap();
        assert_eq!(page.markets.len(), 1);
        assert_eq!(page.markets[0].ticker, "KXNCAAMBTOTAL-26FEB19WEBBRAD-177");
    }

    fn rsa_test_pem() -> String {
        use rsa::pkcs8::EncodePrivateKey as _;
        rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048)
            .unwrap()
            .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .unwrap()
            .to_string()
    }
}
