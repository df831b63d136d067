//! ESPN public scoreboard adapter. Free tier, no API key.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use ovr_common::Sport;

use super::normalize::{normalize_event, Scoreboard};
use super::{FeedError, ScoreFeed};
use crate::events::GameEvent;

const SCOREBOARD_BASE: &str = "https://site.api.espn.com/apis/site/v2/sports";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(4);

/// Default competition paths per sport; overridable from the markets config.
fn default_competition(sport: Sport) -> &'static str {
    match sport {
        Sport::NcaaBasketball => "basketball/mens-college-basketball",
        Sport::PremierLeague => "soccer/eng.1",
        Sport::ChampionsLeague => "soccer/UEFA.CHAMPIONS",
    }
}

/// Polls ESPN's scoreboard for one sport.
pub struct EspnFeed {
    sport: Sport,
    url: String,
    http: reqwest::Client,
}

impl EspnFeed {
    /// `competition_override` replaces the trailing competition path, e.g.
    /// `soccer/eng.1`.
    pub fn new(sport: Sport, competition_override: Option<&str>) -> Result<Self, FeedError> {
        let competition = competition_override
            .map(str::to_string)
            .unwrap_or_else(|| default_competition(sport).to_string());
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("Mozilla/5.0")
            .build()?;
        Ok(Self {
            sport,
            url: format!("{SCOREBOARD_BASE}/{competition}/scoreboard"),
            http,
        })
    }
}

#[async_trait]
impl ScoreFeed for EspnFeed {
    fn name(&self) -> String {
        format!("espn:{}", self.sport)
    }

    fn sport(&self) -> Sport {
        self.sport
    }

    async fn poll(&self) -> Result<Vec<GameEvent>, FeedError> {
        let received_at = Instant::now();
        let board: Scoreboard = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let total = board.events.len();
        let events: Vec<GameEvent> = board
            .events
            .iter()
            .filter_map(|raw| normalize_event(raw, self.sport, received_at))
            .collect();
        debug!(
            feed = %self.name(),
            live_or_final = events.len(),
            total,
            "scoreboard polled"
        );
        Ok(events)
    }
}
