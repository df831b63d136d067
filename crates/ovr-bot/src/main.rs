//! ovr-bot entrypoint.
//!
//! Startup order matters: config and key failures must exit non-zero before
//! any socket opens, and the REST pool is warmed before the agents start so
//! the first order never pays connection setup.
//!
//! Shutdown is two-phase: Oracle stops first (no new score events), pending
//! trade signals drain within a bounded grace period, then everything else
//! is cancelled.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use ovr_bot::agents::{Brain, BrainParams, Oracle, Shield, Sniper, Watcher};
use ovr_bot::bus::event_bus;
use ovr_bot::config::{Config, MarketsConfig};
use ovr_bot::feed::espn::EspnFeed;
use ovr_bot::feed::ScoreFeed;
use ovr_bot::risk::{BreakerConfig, CircuitBreaker};
use ovr_bot::state::RiskState;
use ovr_bot::strategy::ThresholdMap;
use ovr_kalshi::{BookCache, KalshiAuth, KalshiRestClient, KalshiWsClient};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    // .env is optional; a missing file is not an error.
    let _ = dotenvy::dotenv();

    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    config.validate().context("configuration invalid")?;
    info!(
        demo = config.kalshi_demo,
        base_url = config.base_url(),
        "ovr-bot starting"
    );

    let markets_cfg = MarketsConfig::from_file(&config.markets_config)
        .context("loading markets config")?;
    info!(sports = markets_cfg.series.len(), "markets config loaded");

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------
    let auth = Arc::new(
        KalshiAuth::from_pem_file(&config.kalshi_api_key_id, &config.kalshi_private_key_path)
            .context("loading private key")?,
    );

    let rest = Arc::new(
        KalshiRestClient::new(config.base_url(), Arc::clone(&auth), config.order_timeout())
            .context("building REST client")?,
    );
    // DNS pre-resolve + TLS warmup; an auth rejection here is fatal.
    rest.startup().await.context("warming REST connection")?;
    match rest.balance().await {
        Ok(balance) => info!(balance = %ovr_common::fmt_cents(balance.balance), "account balance"),
        Err(e) => warn!(error = %e, "balance lookup failed"),
    }
    if let Some(ws_host) = host_of(config.ws_url()) {
        match tokio::net::lookup_host((ws_host.as_str(), 443)).await {
            Ok(mut addrs) => info!(host = %ws_host, addr = ?addrs.next(), "stream DNS pre-resolved"),
            Err(e) => warn!(host = %ws_host, error = %e, "stream DNS pre-resolve failed"),
        }
    }
    let keepalive = rest.spawn_keepalive(config.keepalive_interval());

    // ------------------------------------------------------------------
    // Bus, shared state, stream plumbing
    // ------------------------------------------------------------------
    let (bus, receivers) = event_bus();
    let risk = Arc::new(RiskState::new(config.risk_limits()));
    let thresholds = Arc::new(ThresholdMap::new());
    let cache = Arc::new(BookCache::new());

    let (ws_event_tx, ws_event_rx) = mpsc::channel(1024);
    let (ws_cmd_tx, ws_cmd_rx) = mpsc::channel(64);

    // Oracle gets its own stop signal so score intake can halt before the
    // rest of the pipeline drains.
    let (oracle_stop_tx, _) = broadcast::channel::<()>(4);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let watcher = Watcher::new(Arc::clone(&cache), ws_event_rx, ws_cmd_tx.clone());
    let watcher_handle = watcher.handle();

    let ws_client = KalshiWsClient::new(
        config.ws_url(),
        Arc::clone(&auth),
        ws_cmd_rx,
        ws_event_tx,
        shutdown_tx.subscribe(),
    );

    // ------------------------------------------------------------------
    // Feeds
    // ------------------------------------------------------------------
    let mut feeds: Vec<Arc<dyn ScoreFeed>> = Vec::new();
    for (sport, spec) in &markets_cfg.series {
        let feed = EspnFeed::new(*sport, spec.score_provider_competition_id.as_deref())
            .context("building score feed")?;
        info!(feed = %feed.name(), "score feed configured");
        feeds.push(Arc::new(feed));
    }

    // ------------------------------------------------------------------
    // Agents
    // ------------------------------------------------------------------
    let oracle = Oracle::new(bus.clone(), feeds, config.poll_interval());
    let brain = Brain::new(
        bus.clone(),
        receivers.game_events,
        watcher_handle,
        Arc::clone(&risk),
        Arc::clone(&thresholds),
        Arc::clone(&rest),
        markets_cfg,
        BrainParams {
            min_edge_cents: config.min_edge_cents,
            max_slippage_cents: config.max_price_slippage_cents,
            default_quantity: config.default_quantity,
            max_quantity: config.max_quantity,
            max_open_exposure_cents: config.max_open_exposure_cents,
        },
    );
    let sniper = Sniper::new(
        bus.clone(),
        receivers.trade_signals,
        Arc::clone(&rest),
        CircuitBreaker::new(BreakerConfig::default()),
        Arc::clone(&risk),
        config.order_timeout(),
    );
    let shield = Shield::new(
        receivers.fill_reports,
        receivers.settlements,
        Arc::clone(&risk),
    );

    let ws_task = tokio::spawn(ws_client.run());
    let watcher_task = tokio::spawn(watcher.run(shutdown_tx.subscribe()));
    let oracle_task = tokio::spawn(oracle.run(oracle_stop_tx.clone()));
    let brain_task = tokio::spawn(brain.run(shutdown_tx.subscribe()));
    let sniper_task = tokio::spawn(sniper.run(shutdown_tx.subscribe()));
    let shield_task = tokio::spawn(shield.run(shutdown_tx.subscribe()));
    info!("all agents launched");

    // ------------------------------------------------------------------
    // Wait for termination, then drain
    // ------------------------------------------------------------------
    wait_for_shutdown().await?;
    info!("shutting down");

    // Phase 1: no new score events.
    let _ = oracle_stop_tx.send(());
    let _ = oracle_task.await;

    // Phase 2: give queued trade signals a bounded window to reach Sniper.
    let drain_deadline = tokio::time::Instant::now() + config.shutdown_grace();
    while !bus.trade_signals.is_empty() && tokio::time::Instant::now() < drain_deadline {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    if !bus.trade_signals.is_empty() {
        warn!(
            pending = bus.trade_signals.len(),
            "grace period expired with trade signals still queued"
        );
    }

    // Phase 3: stop everything else. Open positions are left as-is.
    let _ = shutdown_tx.send(());
    keepalive.abort();
    for task in [ws_task, watcher_task, brain_task, sniper_task, shield_task] {
        let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
    }

    info!(
        dropped_game_events = bus.game_events.dropped(),
        dropped_signals = bus.trade_signals.dropped(),
        dropped_fills = bus.fill_reports.dropped(),
        "ovr-bot stopped cleanly"
    );
    Ok(())
}

fn host_of(url: &str) -> Option<String> {
    url.split("//")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .map(str::to_string)
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c().await?;
        info!("received Ctrl+C");
    }

    Ok(())
}
