//! Score feed abstraction.
//!
//! A feed polls one provider for one sport and returns canonical game
//! records. Oracle owns dedup and settlement detection; feeds stay dumb
//! translators. Swapping providers is a construction-time change, the
//! pipeline never sees provider-specific structures.

pub mod espn;
pub mod normalize;

use async_trait::async_trait;
use thiserror::Error;

use ovr_common::Sport;

use crate::events::GameEvent;

/// Errors from a score feed poll.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider payload unusable: {0}")]
    Payload(String),
}

/// A pollable source of live game records for one sport.
#[async_trait]
pub trait ScoreFeed: Send + Sync {
    /// Human-readable provider tag for logging.
    fn name(&self) -> String;

    fn sport(&self) -> Sport;

    /// Fetch the current in-progress and just-finished games. Records that
    /// are neither live nor final are already filtered out; individual
    /// malformed records are skipped, never an error.
    async fn poll(&self) -> Result<Vec<GameEvent>, FeedError>;
}
