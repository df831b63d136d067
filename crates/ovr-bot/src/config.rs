//! Configuration: environment variables for every knob, plus a TOML document
//! describing the market series per sport.
//!
//! Everything is either required or defaulted; `validate()` refuses
//! out-of-range strategy and risk values before any connection is opened.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;

use ovr_common::Sport;
use ovr_kalshi::{DEMO_BASE_URL, DEMO_WS_URL, PROD_BASE_URL, PROD_WS_URL};

use crate::state::RiskLimits;

/// Latency-arbitrage engine for alternate-total contracts on live sports.
#[derive(Parser, Debug, Clone)]
#[command(name = "ovr-bot", version, about)]
pub struct Config {
    /// Kalshi API key id.
    #[arg(long, env = "KALSHI_API_KEY_ID")]
    pub kalshi_api_key_id: String,

    /// Path to the PEM-encoded RSA or Ed25519 private key.
    #[arg(long, env = "KALSHI_PRIVATE_KEY_PATH")]
    pub kalshi_private_key_path: PathBuf,

    /// Use the demo/sandbox environment.
    #[arg(long, env = "KALSHI_DEMO", default_value = "false")]
    pub kalshi_demo: bool,

    /// Override the REST base URL (defaults per the demo flag).
    #[arg(long, env = "KALSHI_BASE_URL")]
    pub kalshi_base_url: Option<String>,

    /// Override the stream URL (defaults per the demo flag).
    #[arg(long, env = "KALSHI_WS_URL")]
    pub kalshi_ws_url: Option<String>,

    /// Minimum edge in cents per contract to fire a signal.
    #[arg(long, env = "MIN_EDGE_CENTS", default_value = "3")]
    pub min_edge_cents: i64,

    /// Maximum cents above the ask the limit price may chase.
    #[arg(long, env = "MAX_PRICE_SLIPPAGE_CENTS", default_value = "2")]
    pub max_price_slippage_cents: i64,

    /// Contracts per signal.
    #[arg(long, env = "DEFAULT_QUANTITY", default_value = "10")]
    pub default_quantity: u32,

    /// Hard cap on contracts per signal.
    #[arg(long, env = "MAX_QUANTITY", default_value = "50")]
    pub max_quantity: u32,

    /// Halt when realized daily P&L reaches the negation of this.
    #[arg(long, env = "MAX_DAILY_LOSS_CENTS", default_value = "10000")]
    pub max_daily_loss_cents: i64,

    /// Halt when open exposure exceeds this.
    #[arg(long, env = "MAX_OPEN_EXPOSURE_CENTS", default_value = "50000")]
    pub max_open_exposure_cents: i64,

    /// Stop trading a game after this many submitted trades.
    #[arg(long, env = "MAX_TRADES_PER_GAME", default_value = "5")]
    pub max_trades_per_game: u32,

    /// REST keepalive ping interval, seconds.
    #[arg(long, env = "KEEPALIVE_INTERVAL_SECS", default_value = "30")]
    pub keepalive_interval_secs: u64,

    /// Score provider poll interval, milliseconds.
    #[arg(long, env = "SPORTS_POLL_INTERVAL_MS", default_value = "750")]
    pub sports_poll_interval_ms: u64,

    /// Path to the market series TOML document.
    #[arg(long, env = "MARKETS_CONFIG", default_value = "config/markets.toml")]
    pub markets_config: PathBuf,

    /// Hard timeout on order placement, milliseconds.
    #[arg(long, env = "ORDER_TIMEOUT_MS", default_value = "500")]
    pub order_timeout_ms: u64,

    /// Grace period for draining pending trade signals at shutdown,
    /// milliseconds.
    #[arg(long, env = "SHUTDOWN_GRACE_MS", default_value = "2000")]
    pub shutdown_grace_ms: u64,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if !(1..=92).contains(&self.min_edge_cents) {
            bail!("MIN_EDGE_CENTS must be in 1..=92, got {}", self.min_edge_cents);
        }
        if !(0..=10).contains(&self.max_price_slippage_cents) {
            bail!(
                "MAX_PRICE_SLIPPAGE_CENTS must be in 0..=10, got {}",
                self.max_price_slippage_cents
            );
        }
        if self.default_quantity == 0 || self.max_quantity == 0 {
            bail!("quantities must be positive");
        }
        if self.default_quantity > self.max_quantity {
            bail!(
                "DEFAULT_QUANTITY ({}) exceeds MAX_QUANTITY ({})",
                self.default_quantity,
                self.max_quantity
            );
        }
        if self.max_daily_loss_cents <= 0 || self.max_open_exposure_cents <= 0 {
            bail!("risk limits must be positive");
        }
        if self.max_trades_per_game == 0 {
            bail!("MAX_TRADES_PER_GAME must be positive");
        }
        if self.sports_poll_interval_ms < 100 {
            bail!("SPORTS_POLL_INTERVAL_MS below 100 would hammer the provider");
        }
        Ok(())
    }

    pub fn base_url(&self) -> &str {
        match (&self.kalshi_base_url, self.kalshi_demo) {
            (Some(url), _) => url,
            (None, true) => DEMO_BASE_URL,
            (None, false) => PROD_BASE_URL,
        }
    }

    pub fn ws_url(&self) -> &str {
        match (&self.kalshi_ws_url, self.kalshi_demo) {
            (Some(url), _) => url,
            (None, true) => DEMO_WS_URL,
            (None, false) => PROD_WS_URL,
        }
    }

    pub fn risk_limits(&self) -> RiskLimits {
        RiskLimits {
            max_daily_loss_cents: self.max_daily_loss_cents,
            max_open_exposure_cents: self.max_open_exposure_cents,
            max_trades_per_game: self.max_trades_per_game,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.sports_poll_interval_ms)
    }

    pub fn order_timeout(&self) -> Duration {
        Duration::from_millis(self.order_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}

/// One sport's market series record.
#[derive(Debug, Clone, Deserialize)]
pub struct SeriesSpec {
    /// Ticker series prefix, e.g. "KXNCAAMBTOTAL".
    pub series_prefix: String,
    /// Typical spacing between adjacent lines, used for sanity warnings.
    pub line_spacing: u32,
    /// Score provider competition path override (e.g. "eng.1").
    #[serde(default)]
    pub score_provider_competition_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMarketsConfig {
    series: HashMap<String, SeriesSpec>,
}

/// Per-sport market series configuration, loaded from TOML.
#[derive(Debug, Clone, Default)]
pub struct MarketsConfig {
    pub series: HashMap<Sport, SeriesSpec>,
}

impl MarketsConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading markets config {}", path.display()))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let parsed: RawMarketsConfig = toml::from_str(raw).context("parsing markets config")?;
        let mut series = HashMap::new();
        for (key, spec) in parsed.series {
            let sport: Sport = key
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .with_context(|| format!("markets config key {key:?}"))?;
            series.insert(sport, spec);
        }
        if series.is_empty() {
            bail!("markets config declares no series");
        }
        Ok(Self { series })
    }

    pub fn spec(&self, sport: Sport) -> Option<&SeriesSpec> {
        self.series.get(&sport)
    }

    /// All configured series prefixes, the ticker parser's allow-list.
    pub fn series_prefixes(&self) -> Vec<String> {
        self.series
            .values()
            .map(|s| s.series_prefix.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config::try_parse_from([
            "ovr-bot",
            "--kalshi-api-key-id",
            "key",
            "--kalshi-private-key-path",
            "/tmp/key.pem",
        ])
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let cfg = base_config();
        assert_eq!(cfg.min_edge_cents, 3);
        assert_eq!(cfg.max_price_slippage_cents, 2);
        assert_eq!(cfg.default_quantity, 10);
        assert_eq!(cfg.max_quantity, 50);
        assert_eq!(cfg.max_daily_loss_cents, 10_000);
        assert_eq!(cfg.max_open_exposure_cents, 50_000);
        assert_eq!(cfg.max_trades_per_game, 5);
        assert_eq!(cfg.poll_interval(), Duration::from_millis(750));
        assert_eq!(cfg.order_timeout(), Duration::from_millis(500));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_demo_flag_switches_urls() {
        let mut cfg = base_config();
        assert_eq!(cfg.base_url(), PROD_BASE_URL);
        cfg.kalshi_demo = true;
        assert_eq!(cfg.base_url(), DEMO_BASE_URL);
        assert_eq!(cfg.ws_url(), DEMO_WS_URL);
        cfg.kalshi_base_url = Some("http://localhost:9".into());
        assert_eq!(cfg.base_url(), "http://localhost:9");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut cfg = base_config();
        cfg.min_edge_cents = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base_config();
        cfg.default_quantity = 100;
        assert!(cfg.validate().is_err());

        let mut cfg = base_config();
        cfg.sports_poll_interval_ms = 10;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_markets_config_parses() {
        let cfg = MarketsConfig::from_toml(
            r#"
            [series.ncaa_basketball]
            series_prefix = "KXNCAAMBTOTAL"
            line_spacing = 3
            score_provider_competition_id = "mens-college-basketball"

            [series.premier_league]
            series_prefix = "KXEPLTOTAL"
            line_spacing = 1
            "#,
        )
        .unwrap();
        assert_eq!(cfg.series.len(), 2);
        let ncaa = cfg.spec(Sport::NcaaBasketball).unwrap();
        assert_eq!(ncaa.series_prefix, "KXNCAAMBTOTAL");
        assert_eq!(ncaa.line_spacing, 3);
        assert!(cfg.spec(Sport::ChampionsLeague).is_none());
        let mut prefixes = cfg.series_prefixes();
        prefixes.sort();
        assert_eq!(prefixes, vec!["KXEPLTOTAL", "KXNCAAMBTOTAL"]);
    }

    #[test]
    fn test_markets_config_rejects_unknown_sport() {
        let err = MarketsConfig::from_toml(
            r#"
            [series.cricket]
            series_prefix = "KXCRICKET"
            line_spacing = 10
            "#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_markets_config_rejects_empty() {
        assert!(MarketsConfig::from_toml("").is_err());
    }
}
