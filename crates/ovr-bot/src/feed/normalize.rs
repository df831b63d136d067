//! ESPN scoreboard JSON -> canonical game records.
//!
//! ESPN's public scoreboard nests everything under
//! `events[].competitions[].competitors[]` with scores as strings and a
//! status name like `STATUS_IN_PROGRESS`. Only live and final games come out
//! of here; anything scheduled, postponed or unparseable is dropped
//! record-by-record.

use std::time::Instant;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use ovr_common::Sport;

use crate::events::GameEvent;

const LIVE_STATUSES: &[&str] = &[
    "STATUS_IN_PROGRESS",
    "STATUS_HALFTIME",
    "STATUS_DELAYED",
    "STATUS_EXTRA_TIME",
    "STATUS_PENALTY",
];

const FINAL_STATUSES: &[&str] = &["STATUS_FINAL", "STATUS_FINAL_OT", "STATUS_FULL_TIME"];

#[derive(Debug, Deserialize)]
pub struct Scoreboard {
    #[serde(default)]
    pub events: Vec<Event>,
}

#[derive(Debug, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub competitions: Vec<Competition>,
}

#[derive(Debug, Deserialize)]
pub struct Competition {
    #[serde(default)]
    pub competitors: Vec<Competitor>,
    #[serde(default)]
    pub status: Status,
}

#[derive(Debug, Default, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub period: u32,
    #[serde(default, rename = "displayClock")]
    pub display_clock: String,
    #[serde(default, rename = "type")]
    pub status_type: StatusType,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusType {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct Competitor {
    #[serde(default, rename = "homeAway")]
    pub home_away: String,
    #[serde(default)]
    pub score: String,
    #[serde(default)]
    pub team: Team,
}

#[derive(Debug, Default, Deserialize)]
pub struct Team {
    #[serde(default)]
    pub abbreviation: String,
}

/// Normalize one scoreboard event. `None` when the game is not live or
/// final, or the record is missing required fields.
pub fn normalize_event(
    raw: &Event,
    sport: Sport,
    received_at: Instant,
) -> Option<GameEvent> {
    let comp = raw.competitions.first()?;
    let status_name = comp.status.status_type.name.as_str();
    let is_live = LIVE_STATUSES.contains(&status_name);
    let is_final = FINAL_STATUSES.contains(&status_name);
    if !is_live && !is_final {
        return None;
    }

    let home = comp.competitors.iter().find(|c| c.home_away == "home")?;
    let away = comp.competitors.iter().find(|c| c.home_away == "away")?;
    if home.team.abbreviation.is_empty() || away.team.abbreviation.is_empty() {
        debug!(game_id = %raw.id, "competitor missing abbreviation, skipping");
        return None;
    }

    let home_score: u32 = home.score.parse().ok()?;
    let away_score: u32 = away.score.parse().ok()?;
    let kickoff = parse_kickoff(&raw.date)?;

    let period = comp.status.period;
    let game_clock = format_clock(sport, status_name, period, &comp.status.display_clock);

    Some(GameEvent {
        sport,
        game_id: raw.id.clone(),
        away_team: away.team.abbreviation.clone(),
        home_team: home.team.abbreviation.clone(),
        away_score,
        home_score,
        total_score: away_score + home_score,
        game_clock,
        period,
        is_final,
        kickoff,
        provider: "espn",
        received_at,
    })
}

/// ESPN dates come as RFC 3339 or the minute-precision `%Y-%m-%dT%H:%MZ`.
fn parse_kickoff(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%MZ")
        .ok()
        .map(|naive| naive.and_utc())
}

fn format_clock(sport: Sport, status_name: &str, period: u32, display_clock: &str) -> String {
    if status_name == "STATUS_HALFTIME" {
        return "HT".to_string();
    }
    match sport {
        Sport::NcaaBasketball => {
            if display_clock.is_empty() {
                format!("H{period}")
            } else {
                format!("H{period} {display_clock}")
            }
        }
        // Soccer clocks are elapsed minutes.
        Sport::PremierLeague | Sport::ChampionsLeague => {
            if display_clock.is_empty() {
                status_name.to_string()
            } else {
                format!("{display_clock}'")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scoreboard(status: &str, home_score: &str, away_score: &str) -> Scoreboard {
        let raw = format!(
            r#"{{"events":[{{
                "id":"401712345",
                "date":"2026-02-19T00:00Z",
                "competitions":[{{
                    "status":{{"period":2,"displayClock":"4:22","type":{{"name":"{status}"}}}},
                    "competitors":[
                        {{"homeAway":"home","score":"{home_score}","team":{{"abbreviation":"RADF"}}}},
                        {{"homeAway":"away","score":"{away_score}","team":{{"abbreviation":"WEBB"}}}}
                    ]
                }}]
            }}]}}"#
        );
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn test_normalize_live_game() {
        let board = scoreboard("STATUS_IN_PROGRESS", "90", "88");
        let event =
            normalize_event(&board.events[0], Sport::NcaaBasketball, Instant::now()).unwrap();
        assert_eq!(event.game_id, "401712345");
        assert_eq!(event.home_team, "RADF");
        assert_eq!(event.away_team, "WEBB");
        assert_eq!(event.total_score, 178);
        assert_eq!(event.total_score, event.derived_total());
        assert_eq!(event.game_clock, "H2 4:22");
        assert!(!event.is_final);
        assert_eq!(event.kickoff.timestamp(), 1771459200);
    }

    #[test]
    fn test_normalize_final_game() {
        let board = scoreboard("STATUS_FINAL", "101", "99");
        let event =
            normalize_event(&board.events[0], Sport::NcaaBasketball, Instant::now()).unwrap();
        assert!(event.is_final);
        assert_eq!(event.total_score, 200);
    }

    #[test]
    fn test_scheduled_game_dropped() {
        let board = scoreboard("STATUS_SCHEDULED", "0", "0");
        assert!(
            normalize_event(&board.events[0], Sport::NcaaBasketball, Instant::now()).is_none()
        );
    }

    #[test]
    fn test_malformed_score_dropped() {
        let board = scoreboard("STATUS_IN_PROGRESS", "", "12");
        assert!(
            normalize_event(&board.events[0], Sport::NcaaBasketball, Instant::now()).is_none()
        );
    }

    #[test]
    fn test_halftime_clock() {
        let board = scoreboard("STATUS_HALFTIME", "45", "40");
        let event =
            normalize_event(&board.events[0], Sport::NcaaBasketball, Instant::now()).unwrap();
        assert_eq!(event.game_clock, "HT");
    }

    #[test]
    fn test_soccer_clock() {
        let board = scoreboard("STATUS_IN_PROGRESS", "1", "2");
        let event =
            normalize_event(&board.events[0], Sport::PremierLeague, Instant::now()).unwrap();
        assert_eq!(event.game_clock, "4:22'");
        assert_eq!(event.total_score, 3);
    }

    #[test]
    fn test_kickoff_formats() {
        assert!(parse_kickoff("2026-02-19T00:00Z").is_some());
        assert!(parse_kickoff("2026-02-19T00:00:00Z").is_some());
        assert!(parse_kickoff("2026-02-19T00:00:00+00:00").is_some());
        assert!(parse_kickoff("not a date").is_none());
    }
}
