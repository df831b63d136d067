//! Kalshi orderbook WebSocket stream.
//!
//! Maintains one long-lived authenticated connection and feeds parsed book
//! events to the consumer over a channel. Connection lifecycle per session:
//!
//! `Connecting -> Authenticating -> Subscribing -> Streaming`, with any
//! transport error falling back to `ReconnectBackoff` (exponential, 100 ms to
//! 30 s, 10% jitter). On reconnect every registered ticker is re-subscribed
//! and the consumer is told to treat its books as stale until fresh
//! snapshots arrive.
//!
//! Sequence discipline lives in the orderbook layer; this module only
//! transports frames in arrival order.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ovr_common::Side;

use crate::auth::KalshiAuth;

/// Production stream URL.
pub const PROD_WS_URL: &str = "wss://api.elections.kalshi.com/trade-api/ws/v2";
/// Demo/sandbox stream URL.
pub const DEMO_WS_URL: &str = "wss://demo-api.kalshi.co/trade-api/ws/v2";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const PING_INTERVAL: Duration = Duration::from_secs(10);
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Errors from the stream transport.
#[derive(Debug, Error)]
pub enum WsError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("handshake rejected: status {0}")]
    AuthRejected(u16),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("stream error: {0}")]
    Stream(String),

    #[error("stream closed by peer")]
    Closed,

    #[error("no traffic for {0:?}, forcing reconnect")]
    Idle(Duration),
}

/// Commands from the consumer into the stream task.
#[derive(Debug)]
pub enum WsCommand {
    /// Subscribe the orderbook channel for additional tickers.
    Subscribe(Vec<String>),
    /// Re-request a snapshot for one ticker (cycle its subscription).
    Resnapshot(String),
}

/// Parsed events out of the stream task.
#[derive(Debug, Clone)]
pub enum WsEvent {
    /// A (re)connect completed; all previously cached books are stale until
    /// their next snapshot.
    StreamReset,
    /// Full book for one ticker.
    Snapshot {
        ticker: String,
        yes: Vec<(i64, u32)>,
        no: Vec<(i64, u32)>,
        sequence: u64,
    },
    /// Single-level change on one side.
    Delta {
        ticker: String,
        side: Side,
        price: i64,
        qty: u32,
        sequence: u64,
    },
}

/// Connection lifecycle, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Connecting,
    Authenticating,
    Subscribing,
    Streaming,
    ReconnectBackoff,
}

impl std::fmt::Display for ConnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnState::Connecting => "connecting",
            ConnState::Authenticating => "authenticating",
            ConnState::Subscribing => "subscribing",
            ConnState::Streaming => "streaming",
            ConnState::ReconnectBackoff => "reconnect_backoff",
        };
        write!(f, "{s}")
    }
}

/// Reconnecting orderbook stream client.
///
/// `run()` owns the connection loop; it exits only on shutdown. Subscriptions
/// issued while disconnected are queued in the registered-ticker set and
/// flushed on the next (re)connect.
pub struct KalshiWsClient {
    ws_url: String,
    auth: std::sync::Arc<KalshiAuth>,
    cmd_rx: mpsc::Receiver<WsCommand>,
    event_tx: mpsc::Sender<WsEvent>,
    shutdown_rx: broadcast::Receiver<()>,
    subscribed: HashSet<String>,
}

impl KalshiWsClient {
    pub fn new(
        ws_url: &str,
        auth: std::sync::Arc<KalshiAuth>,
        cmd_rx: mpsc::Receiver<WsCommand>,
        event_tx: mpsc::Sender<WsEvent>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            ws_url: ws_url.to_string(),
            auth,
            cmd_rx,
            event_tx,
            shutdown_rx,
            subscribed: HashSet::new(),
        }
    }

    /// Main loop: connect, stream, reconnect with backoff, forever.
    pub async fn run(mut self) {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if self.shutdown_rx.try_recv().is_ok() {
                info!("stream client: shutdown requested");
                return;
            }

            match self.run_session().await {
                Ok(()) => {
                    info!("stream client: clean shutdown");
                    return;
                }
                // A signature rejection never recovers on retry. Stop the
                // stream for good: every book stays stale, so nothing trades.
                Err(WsError::AuthRejected(status)) => {
                    tracing::error!(status, "stream handshake rejected, stream permanently down");
                    return;
                }
                Err(e) => {
                    let delay = with_jitter(backoff);
                    info!(state = %ConnState::ReconnectBackoff, error = %e,
                          delay_ms = delay.as_millis() as u64, "stream session ended");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown_rx.recv() => {
                            info!("stream client: shutdown during backoff");
                            return;
                        }
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    /// One connection lifetime. `Ok(())` means shutdown was requested.
    async fn run_session(&mut self) -> Result<(), WsError> {
        info!(state = %ConnState::Connecting, url = %self.ws_url, "opening stream");

        // Authenticating: the handshake itself carries the signed headers.
        let ws_path = self
            .ws_url
            .splitn(4, '/')
            .nth(3)
            .map(|p| format!("/{p}"))
            .unwrap_or_else(|| "/".to_string());
        let mut request = self
            .ws_url
            .as_str()
            .into_client_request()
            .map_err(|e| WsError::Connect(e.to_string()))?;
        let signed = self
            .auth
            .signed_headers("GET", &ws_path)
            .map_err(|e| WsError::Connect(e.to_string()))?;
        debug!(state = %ConnState::Authenticating, path = %ws_path, "signing handshake");
        for (name, value) in signed {
            request.headers_mut().insert(
                name,
                value
                    .parse()
                    .map_err(|_| WsError::Connect("bad header value".into()))?,
            );
        }

        let (ws, _resp) = match timeout(CONNECT_TIMEOUT, connect_async(request)).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(tokio_tungstenite::tungstenite::Error::Http(resp)))
                if resp.status().as_u16() == 401 || resp.status().as_u16() == 403 =>
            {
                return Err(WsError::AuthRejected(resp.status().as_u16()));
            }
            Ok(Err(e)) => return Err(WsError::Connect(e.to_string())),
            Err(_) => return Err(WsError::ConnectTimeout),
        };
        let (mut write, mut read) = ws.split();

        // Everything cached before this instant is stale until re-snapshotted.
        if self.event_tx.send(WsEvent::StreamReset).await.is_err() {
            return Ok(());
        }

        info!(state = %ConnState::Subscribing, tickers = self.subscribed.len(), "re-issuing subscriptions");
        if !self.subscribed.is_empty() {
            let tickers: Vec<String> = self.subscribed.iter().cloned().collect();
            send_subscribe(&mut write, &tickers).await?;
        }

        info!(state = %ConnState::Streaming, "stream live");
        let mut ping_timer = interval(PING_INTERVAL);
        let mut last_rx = Instant::now();

        loop {
            tokio::select! {
                msg = read.next() => {
                    last_rx = Instant::now();
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(event) = parse_frame(&text) {
                                if self.event_tx.send(event).await.is_err() {
                                    return Ok(());
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await
                                .map_err(|e| WsError::Stream(e.to_string()))?;
                        }
                        Some(Ok(Message::Close(_))) | None => return Err(WsError::Closed),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(WsError::Stream(e.to_string())),
                    }
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(WsCommand::Subscribe(tickers)) => {
                            let fresh: Vec<String> = tickers
                                .into_iter()
                                .filter(|t| self.subscribed.insert(t.clone()))
                                .collect();
                            if !fresh.is_empty() {
                                send_subscribe(&mut write, &fresh).await?;
                            }
                        }
                        Some(WsCommand::Resnapshot(ticker)) => {
                            // Cycling the subscription makes the server replay
                            // a fresh snapshot for this ticker.
                            send_unsubscribe(&mut write, &[ticker.clone()]).await?;
                            send_subscribe(&mut write, &[ticker]).await?;
                        }
                        None => return Ok(()),
                    }
                }
                _ = ping_timer.tick() => {
                    if last_rx.elapsed() > IDLE_TIMEOUT {
                        return Err(WsError::Idle(IDLE_TIMEOUT));
                    }
                    write.send(Message::Ping(Vec::new())).await
                        .map_err(|e| WsError::Stream(e.to_string()))?;
                }
                _ = self.shutdown_rx.recv() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }
}

fn with_jitter(base: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.9..1.1);
    base.mul_f64(factor)
}

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    Message,
>;

async fn send_subscribe(write: &mut WsSink, tickers: &[String]) -> Result<(), WsError> {
    let msg = serde_json::json!({
        "id": Uuid::new_v4().to_string(),
        "cmd": "subscribe",
        "params": {
            "channels": ["orderbook_delta"],
            "market_tickers": tickers,
        },
    });
    write
        .send(Message::Text(msg.to_string()))
        .await
        .map_err(|e| WsError::Stream(e.to_string()))?;
    info!(count = tickers.len(), "subscribed orderbook channels");
    Ok(())
}

async fn send_unsubscribe(write: &mut WsSink, tickers: &[String]) -> Result<(), WsError> {
    let msg = serde_json::json!({
        "id": Uuid::new_v4().to_string(),
        "cmd": "unsubscribe",
        "params": {
            "channels": ["orderbook_delta"],
            "market_tickers": tickers,
        },
    });
    write
        .send(Message::Text(msg.to_string()))
        .await
        .map_err(|e| WsError::Stream(e.to_string()))
}

// ---------------------------------------------------------------------------
// Frame parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    seq: u64,
    #[serde(default)]
    msg: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SnapshotBody {
    market_ticker: String,
    #[serde(default)]
    yes: Vec<(i64, u32)>,
    #[serde(default)]
    no: Vec<(i64, u32)>,
}

#[derive(Debug, Deserialize)]
struct DeltaBody {
    market_ticker: String,
    side: Side,
    price: i64,
    /// Absolute quantity now resting at `price` (zero removes the level).
    #[serde(alias = "delta")]
    quantity: u32,
}

/// Parse one text frame into a book event. Unknown or malformed frames are
/// logged and skipped; the stream must never die on a bad payload.
fn parse_frame(text: &str) -> Option<WsEvent> {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, raw = %text.chars().take(120).collect::<String>(), "malformed frame");
            return None;
        }
    };

    match frame.frame_type.as_str() {
        "orderbook_snapshot" => {
            let body: SnapshotBody = match serde_json::from_value(frame.msg) {
                Ok(b) => b,
                Err(e) => {
                    warn!(error = %e, "malformed snapshot body");
                    return None;
                }
            };
            Some(WsEvent::Snapshot {
                ticker: body.market_ticker,
                yes: body.yes,
                no: body.no,
                sequence: frame.seq,
            })
        }
        "orderbook_delta" => {
            let body: DeltaBody = match serde_json::from_value(frame.msg) {
                Ok(b) => b,
                Err(e) => {
                    warn!(error = %e, "malformed delta body");
                    return None;
                }
            };
            Some(WsEvent::Delta {
                ticker: body.market_ticker,
                side: body.side,
                price: body.price,
                qty: body.quantity,
                sequence: frame.seq,
            })
        }
        // Subscription acks, errors, heartbeats: nothing for the cache.
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_snapshot() {
        let raw = r#"{"type":"orderbook_snapshot","sid":1,"seq":9,
            "msg":{"market_ticker":"KXNCAAMBTOTAL-26FEB19WEBBRAD-177",
                   "yes":[[80,40],[82,100]],"no":[[25,60]]}}"#;
        match parse_frame(raw) {
            Some(WsEvent::Snapshot {
                ticker,
                yes,
                no,
                sequence,
            }) => {
                assert_eq!(ticker, "KXNCAAMBTOTAL-26FEB19WEBBRAD-177");
                assert_eq!(yes, vec![(80, 40), (82, 100)]);
                assert_eq!(no, vec![(25, 60)]);
                assert_eq!(sequence, 9);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_parse_delta() {
        let raw = r#"{"type":"orderbook_delta","seq":10,
            "msg":{"market_ticker":"T1","side":"yes","price":79,"delta":15}}"#;
        match parse_frame(raw) {
            Some(WsEvent::Delta {
                ticker,
                side,
                price,
                qty,
                sequence,
            }) => {
                assert_eq!(ticker, "T1");
                assert_eq!(side, Side::Yes);
                assert_eq!(price, 79);
                assert_eq!(qty, 15);
                assert_eq!(sequence, 10);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_parse_ignores_other_frames() {
        assert!(parse_frame(r#"{"type":"subscribed","id":"x"}"#).is_none());
        assert!(parse_frame("not json").is_none());
        assert!(parse_frame(r#"{"type":"orderbook_delta","seq":1,"msg":{}}"#).is_none());
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..100 {
            let d = with_jitter(Duration::from_secs(10));
            assert!(d >= Duration::from_secs(9));
            assert!(d < Duration::from_secs(11));
        }
    }
}
