//! Domain types shared between the exchange client and the engine.

use serde::{Deserialize, Serialize};

/// Sports with configured alternate-total markets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sport {
    NcaaBasketball,
    PremierLeague,
    ChampionsLeague,
}

impl Sport {
    /// Returns the config/logging tag for this sport.
    pub fn as_str(&self) -> &'static str {
        match self {
            Sport::NcaaBasketball => "ncaa_basketball",
            Sport::PremierLeague => "premier_league",
            Sport::ChampionsLeague => "champions_league",
        }
    }

    /// All sports the engine knows about.
    pub fn all() -> &'static [Sport] {
        &[
            Sport::NcaaBasketball,
            Sport::PremierLeague,
            Sport::ChampionsLeague,
        ]
    }
}

impl std::fmt::Display for Sport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Sport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ncaa_basketball" | "ncaab" | "cbb" => Ok(Sport::NcaaBasketball),
            "premier_league" | "epl" => Ok(Sport::PremierLeague),
            "champions_league" | "ucl" => Ok(Sport::ChampionsLeague),
            other => Err(format!("unknown sport: {other}")),
        }
    }
}

/// Contract side on a binary market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    /// Wire representation used by the exchange order API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "yes",
            Side::No => "no",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Format signed cents as a dollar string for logs, e.g. `-10001` -> `"-$100.01"`.
pub fn fmt_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}${}.{:02}", abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sport_round_trip() {
        for sport in Sport::all() {
            assert_eq!(sport.as_str().parse::<Sport>().unwrap(), *sport);
        }
    }

    #[test]
    fn test_sport_aliases() {
        assert_eq!("ncaab".parse::<Sport>().unwrap(), Sport::NcaaBasketball);
        assert_eq!("EPL".parse::<Sport>().unwrap(), Sport::PremierLeague);
        assert!("curling".parse::<Sport>().is_err());
    }

    #[test]
    fn test_side_serde() {
        assert_eq!(serde_json::to_string(&Side::Yes).unwrap(), "\"yes\"");
        assert_eq!(
            serde_json::from_str::<Side>("\"no\"").unwrap(),
            Side::No
        );
    }

    #[test]
    fn test_fmt_cents() {
        assert_eq!(fmt_cents(0), "$0.00");
        assert_eq!(fmt_cents(9), "$0.09");
        assert_eq!(fmt_cents(-10001), "-$100.01");
        assert_eq!(fmt_cents(50000), "$500.00");
    }
}
