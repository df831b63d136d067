//! Watcher: orderbook stream consumer.
//!
//! Applies stream events into the shared book cache. The strategy reads the
//! cache directly; nothing book-shaped ever crosses a queue to Brain. On a
//! sequence gap the ticker is marked stale and a re-snapshot is requested;
//! deltas for a stale book are dropped until its snapshot arrives.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use ovr_kalshi::{BookCache, BookTop, DeltaOutcome, WsCommand, WsEvent};

/// Handle given to the strategy: register/subscribe tickers and read books.
#[derive(Clone)]
pub struct WatcherHandle {
    cmd_tx: mpsc::Sender<WsCommand>,
    cache: Arc<BookCache>,
}

impl WatcherHandle {
    /// Subscribe the stream to new tickers and pre-register their (stale)
    /// cache entries so readers can tell "waiting for snapshot" from
    /// "unknown".
    pub async fn subscribe(&self, tickers: Vec<String>) {
        for ticker in &tickers {
            self.cache.register(ticker);
        }
        if self.cmd_tx.send(WsCommand::Subscribe(tickers)).await.is_err() {
            warn!("stream command channel closed, subscription lost");
        }
    }

    /// Hot-path book read.
    pub fn book_top(&self, ticker: &str) -> Option<BookTop> {
        self.cache.top(ticker)
    }
}

pub struct Watcher {
    cache: Arc<BookCache>,
    events_rx: mpsc::Receiver<WsEvent>,
    cmd_tx: mpsc::Sender<WsCommand>,
}

impl Watcher {
    pub fn new(
        cache: Arc<BookCache>,
        events_rx: mpsc::Receiver<WsEvent>,
        cmd_tx: mpsc::Sender<WsCommand>,
    ) -> Self {
        Self {
            cache,
            events_rx,
            cmd_tx,
        }
    }

    pub fn handle(&self) -> WatcherHandle {
        WatcherHandle {
            cmd_tx: self.cmd_tx.clone(),
            cache: Arc::clone(&self.cache),
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("watcher running");
        loop {
            tokio::select! {
                event = self.events_rx.recv() => {
                    match event {
                        Some(event) => self.apply(event).await,
                        None => {
                            info!("stream event channel closed, watcher exiting");
                            return;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("watcher stopped");
                    return;
                }
            }
        }
    }

    async fn apply(&mut self, event: WsEvent) {
        match event {
            WsEvent::StreamReset => {
                warn!(books = self.cache.len(), "stream reset, all books stale until snapshots");
                self.cache.mark_all_stale();
            }
            WsEvent::Snapshot {
                ticker,
                yes,
                no,
                sequence,
            } => {
                self.cache.with_book_mut(&ticker, |book| {
                    book.apply_snapshot(&yes, &no, sequence);
                });
                debug!(ticker, sequence, "snapshot applied");
            }
            WsEvent::Delta {
                ticker,
                side,
                price,
                qty,
                sequence,
            } => {
                let outcome = self.cache.with_book_mut(&ticker, |book| {
                    book.apply_delta(side, price, qty, sequence)
                });
                match outcome {
                    DeltaOutcome::Applied => {}
                    DeltaOutcome::Gap { expected, got } => {
                        warn!(ticker, expected, got, "sequence gap, requesting snapshot");
                        if self
                            .cmd_tx
                            .send(WsCommand::Resnapshot(ticker))
                            .await
                            .is_err()
                        {
                            warn!("stream command channel closed, cannot re-snapshot");
                        }
                    }
                    DeltaOutcome::Dropped => {
                        debug!(ticker, sequence, "delta dropped, book awaiting snapshot");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovr_common::Side;

    fn watcher() -> (Watcher, mpsc::Sender<WsEvent>, mpsc::Receiver<WsCommand>) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let watcher = Watcher::new(Arc::new(BookCache::new()), event_rx, cmd_tx);
        (watcher, event_tx, cmd_rx)
    }

    #[tokio::test]
    async fn test_snapshot_then_delta() {
        let (mut w, _tx, _cmd) = watcher();
        let handle = w.handle();

        w.apply(WsEvent::Snapshot {
            ticker: "T1".into(),
            yes: vec![(80, 40)],
            no: vec![(25, 60)],
            sequence: 1,
        })
        .await;
        w.apply(WsEvent::Delta {
            ticker: "T1".into(),
            side: Side::Yes,
            price: 78,
            qty: 10,
            sequence: 2,
        })
        .await;

        let top = handle.book_top("T1").unwrap();
        assert!(!top.stale);
        assert_eq!(top.yes_ask, Some(78));
        assert_eq!(top.sequence, 2);
    }

    #[tokio::test]
    async fn test_gap_requests_resnapshot() {
        // Deltas [4,5,7]: the gap at 7 stales the book, a snapshot is requested,
        // nothing tradeable until it lands.
        let (mut w, _tx, mut cmd_rx) = watcher();
        let handle = w.handle();

        w.apply(WsEvent::Snapshot {
            ticker: "T1".into(),
            yes: vec![(80, 40)],
            no: vec![],
            sequence: 3,
        })
        .await;
        for seq in [4u64, 5] {
            w.apply(WsEvent::Delta {
                ticker: "T1".into(),
                side: Side::Yes,
                price: 79,
                qty: 1,
                sequence: seq,
            })
            .await;
        }
        w.apply(WsEvent::Delta {
            ticker: "T1".into(),
            side: Side::Yes,
            price: 78,
            qty: 1,
            sequence: 7,
        })
        .await;

        assert!(handle.book_top("T1").unwrap().stale);
        match cmd_rx.recv().await {
            Some(WsCommand::Resnapshot(ticker)) => assert_eq!(ticker, "T1"),
            other => panic!("expected resnapshot, got {other:?}"),
        }

        // Deltas stay dropped until the snapshot arrives.
        w.apply(WsEvent::Delta {
            ticker: "T1".into(),
            side: Side::Yes,
            price: 70,
            qty: 1,
            sequence: 8,
        })
        .await;
        assert!(handle.book_top("T1").unwrap().stale);

        w.apply(WsEvent::Snapshot {
            ticker: "T1".into(),
            yes: vec![(77, 5)],
            no: vec![],
            sequence: 12,
        })
        .await;
        let top = handle.book_top("T1").unwrap();
        assert!(!top.stale);
        assert_eq!(top.yes_ask, Some(77));
    }

    #[tokio::test]
    async fn test_stream_reset_stales_everything() {
        let (mut w, _tx, _cmd) = watcher();
        let handle = w.handle();
        w.apply(WsEvent::Snapshot {
            ticker: "T1".into(),
            yes: vec![(80, 40)],
            no: vec![],
            sequence: 1,
        })
        .await;
        w.apply(WsEvent::StreamReset).await;
        assert!(handle.book_top("T1").unwrap().stale);
    }

    #[tokio::test]
    async fn test_subscribe_registers_stale_entry() {
        let (w, _tx, mut cmd_rx) = watcher();
        let handle = w.handle();
        handle.subscribe(vec!["T9".into()]).await;
        let top = handle.book_top("T9").unwrap();
        assert!(top.stale);
        assert!(matches!(cmd_rx.recv().await, Some(WsCommand::Subscribe(t)) if t == vec!["T9".to_string()]));
    }
}
