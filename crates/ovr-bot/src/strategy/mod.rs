//! Strategy layer: edge math, ticker grammar, team resolution, and the
//! per-game threshold maps the matcher scans on every score change.

pub mod edge;
pub mod resolver;
pub mod threshold;

pub use edge::{edge_cents, has_edge, limit_price, max_tradeable_price, NET_PAYOUT_CENTS};
pub use resolver::{match_tier, split_team_run, MatchTier, TeamResolver};
pub use threshold::{build_entries, parse_ticker, ParsedTicker, ThresholdEntry, ThresholdMap};
