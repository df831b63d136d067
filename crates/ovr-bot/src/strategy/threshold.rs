//! Score-to-market threshold map.
//!
//! Ticker grammar for alternate-total contracts:
//!
//! ```text
//! KXNCAAMBTOTAL-26FEB19WEBBRAD-177
//! |             |      |      |
//! series        date   teams  line
//! ```
//!
//! The date code is the exchange's uppercased `%y%b%d`; the team segment is
//! the away and home codes concatenated with no delimiter, so the split
//! point is recovered by requiring both halves to resolve against the score
//! provider's codes for the game. The trailing integer is the total line:
//! the contract resolves YES once the game total reaches it.
//!
//! The per-game entry list is built once from the REST market list, sorted
//! ascending by line, and then only its `triggered` tombstones mutate. Lines
//! at or below the total at build time are tombstoned immediately: they were
//! crossed before we started watching and the book has long repriced.

use dashmap::DashMap;
use tracing::{debug, warn};

use ovr_common::Sport;

use super::resolver::TeamResolver;

/// A parsed alternate-total ticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTicker {
    pub series: String,
    pub date_code: String,
    pub team_run: String,
    pub line: u32,
}

/// Parse a ticker against the configured series prefix set. Returns `None`
/// for tickers from other series or with a malformed shape; the caller skips
/// those markets.
pub fn parse_ticker(ticker: &str, series_prefixes: &[String]) -> Option<ParsedTicker> {
    let (series, rest) = ticker.split_once('-')?;
    if !series_prefixes.iter().any(|p| p == series) {
        return None;
    }
    let (middle, line_str) = rest.rsplit_once('-')?;
    let line: u32 = line_str.parse().ok()?;

    let date_code = parse_date_code(middle)?;
    let team_run = &middle[date_code.len()..];
    if team_run.is_empty() || !team_run.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }

    Some(ParsedTicker {
        series: series.to_string(),
        date_code,
        team_run: team_run.to_string(),
        line,
    })
}

/// Leading `%y%b%d` date code: two digits, three uppercase letters, two
/// digits (`26FEB19`).
fn parse_date_code(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    if bytes.len() < 8 {
        return None;
    }
    let shape_ok = bytes[0].is_ascii_digit()
        && bytes[1].is_ascii_digit()
        && bytes[2].is_ascii_uppercase()
        && bytes[3].is_ascii_uppercase()
        && bytes[4].is_ascii_uppercase()
        && bytes[5].is_ascii_digit()
        && bytes[6].is_ascii_digit();
    if !shape_ok {
        return None;
    }
    Some(s[..7].to_string())
}

/// One tradeable line for one market. `triggered` is a tombstone: set before
/// evaluation on first crossing, so a line fires at most once per game even
/// when the evaluation skips (no book, no edge, risk gate).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdEntry {
    pub ticker: String,
    pub line: u32,
    pub triggered: bool,
}

/// Per-game ordered threshold lists. Built once per game, then immutable
/// apart from the tombstones.
#[derive(Debug, Default)]
pub struct ThresholdMap {
    map: DashMap<(Sport, String), Vec<ThresholdEntry>>,
}

impl ThresholdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_game(&self, sport: Sport, game_id: &str, mut entries: Vec<ThresholdEntry>) {
        entries.sort_by_key(|e| e.line);
        debug!(
            %sport,
            game_id,
            count = entries.len(),
            next = ?entries.iter().filter(|e| !e.triggered).map(|e| e.line).take(5).collect::<Vec<_>>(),
            "thresholds registered"
        );
        self.map.insert((sport, game_id.to_string()), entries);
    }

    pub fn unregister_game(&self, sport: Sport, game_id: &str) {
        self.map.remove(&(sport, game_id.to_string()));
    }

    pub fn is_registered(&self, sport: Sport, game_id: &str) -> bool {
        self.map.contains_key(&(sport, game_id.to_string()))
    }

    /// Tombstone and return every not-yet-triggered line at or below `total`,
    /// ascending. The caller owns evaluation; the tombstone is set here so a
    /// line never fires twice.
    pub fn claim_crossed(&self, sport: Sport, game_id: &str, total: u32) -> Vec<(String, u32)> {
        let mut crossed = Vec::new();
        if let Some(mut entries) = self.map.get_mut(&(sport, game_id.to_string())) {
            for entry in entries.iter_mut() {
                if !entry.triggered && entry.line <= total {
                    entry.triggered = true;
                    crossed.push((entry.ticker.clone(), entry.line));
                }
            }
        }
        crossed
    }

}

/// Build the threshold entries for one game from the day's market list.
///
/// A market joins the map when its ticker parses, and its team run splits
/// against the provider codes for this game (memoized in `resolver`). Lines
/// already at or below `current_total` are tombstoned on entry.
/// `line_spacing` is only used to flag suspicious gaps (a likely sign the
/// team match excluded real markets).
#[allow(clippy::too_many_arguments)]
pub fn build_entries(
    markets: &[ovr_kalshi::Market],
    series_prefixes: &[String],
    resolver: &TeamResolver,
    game_id: &str,
    away_code: &str,
    home_code: &str,
    current_total: u32,
    line_spacing: u32,
) -> Vec<ThresholdEntry> {
    let mut entries: Vec<ThresholdEntry> = Vec::new();
    for market in markets {
        let Some(parsed) = parse_ticker(&market.ticker, series_prefixes) else {
            continue;
        };
        if resolver
            .resolve_run(&parsed.series, game_id, &parsed.team_run, away_code, home_code)
            .is_none()
        {
            continue;
        }
        entries.push(ThresholdEntry {
            ticker: market.ticker.clone(),
            line: parsed.line,
            triggered: parsed.line <= current_total,
        });
    }
    entries.sort_by_key(|e| e.line);

    if line_spacing > 0 {
        for pair in entries.windows(2) {
            if pair[1].line - pair[0].line > 3 * line_spacing {
                warn!(
                    below = pair[0].line,
                    above = pair[1].line,
                    line_spacing,
                    "threshold gap wider than expected, team match may have excluded markets"
                );
            }
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefixes() -> Vec<String> {
        vec!["KXNCAAMBTOTAL".to_string(), "KXEPLTOTAL".to_string()]
    }

    #[test]
    fn test_parse_ticker() {
        let parsed =
            parse_ticker("KXNCAAMBTOTAL-26FEB19WEBBRAD-177", &prefixes()).unwrap();
        assert_eq!(parsed.series, "KXNCAAMBTOTAL");
        assert_eq!(parsed.date_code, "26FEB19");
        assert_eq!(parsed.team_run, "WEBBRAD");
        assert_eq!(parsed.line, 177);
    }

    #[test]
    fn test_parse_ticker_rejects() {
        // Unknown series.
        assert!(parse_ticker("KXNBATOTAL-26FEB19LALBOS-220", &prefixes()).is_none());
        // Missing line.
        assert!(parse_ticker("KXNCAAMBTOTAL-26FEB19WEBBRAD", &prefixes()).is_none());
        // Non-numeric line.
        assert!(parse_ticker("KXNCAAMBTOTAL-26FEB19WEBBRAD-OT", &prefixes()).is_none());
        // Malformed date code.
        assert!(parse_ticker("KXNCAAMBTOTAL-FEB2619WEBBRAD-177", &prefixes()).is_none());
        // Empty team run.
        assert!(parse_ticker("KXNCAAMBTOTAL-26FEB19-177", &prefixes()).is_none());
    }

    #[test]
    fn test_claim_crossed_orders_and_tombstones() {
        let map = ThresholdMap::new();
        map.register_game(
            Sport::NcaaBasketball,
            "g1",
            vec![
                ThresholdEntry {
                    ticker: "T3".into(),
                    line: 181,
                    triggered: false,
                },
                ThresholdEntry {
                    ticker: "T1".into(),
                    line: 175,
                    triggered: false,
                },
                ThresholdEntry {
                    ticker: "T2".into(),
                    line: 178,
                    triggered: false,
                },
            ],
        );

        let crossed = map.claim_crossed(Sport::NcaaBasketball, "g1", 178);
        assert_eq!(
            crossed,
            vec![("T1".to_string(), 175), ("T2".to_string(), 178)]
        );
        // Second claim at the same total returns nothing: tombstoned.
        assert!(map
            .claim_crossed(Sport::NcaaBasketball, "g1", 178)
            .is_empty());
        // A later total only returns the new crossing.
        let crossed = map.claim_crossed(Sport::NcaaBasketball, "g1", 181);
        assert_eq!(crossed, vec![("T3".to_string(), 181)]);
    }

    #[test]
    fn test_build_entries_filters_and_tombstones() {
        let markets = vec![
            market("KXNCAAMBTOTAL-26FEB19WEBBRAD-171"),
            market("KXNCAAMBTOTAL-26FEB19WEBBRAD-177"),
            market("KXNCAAMBTOTAL-26FEB19WEBBRAD-174"),
            // Different game, same series.
            market("KXNCAAMBTOTAL-26FEB19DUKEUNC-150"),
            // Unparseable.
            market("KXNCAAMBTOTAL-garbage"),
        ];
        let resolver = TeamResolver::new();
        let entries = build_entries(
            &markets,
            &prefixes(),
            &resolver,
            "g1",
            "WEBB",
            "RADF",
            172,
            3,
        );
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries.iter().map(|e| e.line).collect::<Vec<_>>(),
            vec![171, 174, 177]
        );
        // 171 was already crossed at build time.
        assert!(entries[0].triggered);
        assert!(!entries[1].triggered);
        assert!(!entries[2].triggered);
    }

    #[test]
    fn test_register_unregister() {
        let map = ThresholdMap::new();
        assert!(!map.is_registered(Sport::PremierLeague, "m1"));
        map.register_game(Sport::PremierLeague, "m1", vec![]);
        assert!(map.is_registered(Sport::PremierLeague, "m1"));
        map.unregister_game(Sport::PremierLeague, "m1");
        assert!(!map.is_registered(Sport::PremierLeague, "m1"));
    }

    fn market(ticker: &str) -> ovr_kalshi::Market {
        ovr_kalshi::Market {
            ticker: ticker.to_string(),
            title: String::new(),
            status: "active".to_string(),
        }
    }
}
