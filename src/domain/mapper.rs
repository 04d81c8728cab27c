//! Detail normalisation
//!
//! Turns the raw detail payload returned by the feed (a `match` object plus an
//! optional point-by-point log) and the matching summary entry into an
//! [`EventDetail`]. Keys are inconsistent across feed versions, so every field
//! is looked up through a list of fallbacks and empty values count as missing.

use super::event::{
    EventDetail, EventSummary, GameScore, MatchState, Player, Score, SetScore, StatGroup,
    StatItem,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

const MAX_SETS: usize = 5;
const SETS_TO_WIN: u32 = 2;
const COMPLETED_KEYWORDS: &[&str] = &["finished", "retired", "walkover", "awarded", "cancelled"];

const STAT_NAMES: [&str; 11] = [
    "Aces",
    "Double Faults",
    "1st Serve",
    "1st Serve Points Won",
    "2nd Serve Points Won",
    "Break Points Saved",
    "Service Games Played",
    "1st Serve Return Points Won",
    "2nd Serve Return Points Won",
    "Break Points Converted",
    "Return Games Played",
];

/// Normalise a raw detail payload; `None` when the payload has no `match` object
pub fn map_detail(summary: &EventSummary, raw: &Value) -> Option<EventDetail> {
    let match_info = raw.get("match")?.as_object()?;

    // Summary first, match details win on conflicts
    let mut merged = summary.fields.clone();
    for (key, value) in match_info {
        merged.insert(key.clone(), value.clone());
    }

    let players = vec![
        parse_player(
            text(&summary.fields, "player1").unwrap_or_default(),
            text(&summary.fields, "country1").unwrap_or_default(),
        ),
        parse_player(
            text(&summary.fields, "player2").unwrap_or_default(),
            text(&summary.fields, "country2").unwrap_or_default(),
        ),
    ];

    let sets: Vec<SetScore> = (1..=MAX_SETS)
        .map(|i| {
            let (long1, short1) = (format!("set{i}1"), format!("s{i}1"));
            let (long2, short2) = (format!("set{i}2"), format!("s{i}2"));
            SetScore {
                p1: to_int_score(first_of(&merged, &[long1.as_str(), short1.as_str()])),
                p2: to_int_score(first_of(&merged, &[long2.as_str(), short2.as_str()])),
            }
        })
        .collect();

    let state = determine_state(&merged, &sets);

    let score = Score {
        sets,
        current_game: GameScore {
            p1: first_of(&merged, &["game1", "point1"]),
            p2: first_of(&merged, &["game2", "point2"]),
        },
        state,
    };

    let round = text(&merged, "round")
        .and_then(|r| r.split('-').next().map(|s| s.trim().to_string()))
        .filter(|r| !r.is_empty());

    let started_at = text(&merged, "starttime")
        .and_then(|s| s.parse::<f64>().ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0));

    let statistics = first_of(&merged, &["stats", "statistics"])
        .map(|s| parse_stats(&s))
        .unwrap_or_default();

    let point_by_point = raw
        .get("point_by_point")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    Some(EventDetail {
        tournament: summary
            .tournament
            .clone()
            .or_else(|| text(&merged, "tournament_name")),
        round,
        players,
        score,
        started_at,
        statistics,
        point_by_point,
    })
}

/// Non-empty string form of a field (numbers are stringified)
fn text(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_of(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| text(fields, key))
}

/// Scores may carry tie-break decimals ("7.5"); anything unparsable counts as zero
fn to_int_score(value: Option<String>) -> u32 {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u32)
        .unwrap_or(0)
}

fn determine_state(fields: &Map<String, Value>, sets: &[SetScore]) -> MatchState {
    if matches!(text(fields, "winner").as_deref(), Some("1") | Some("2")) {
        debug!("match completed by winner tag");
        return MatchState::Completed;
    }

    if let Some(status) = text(fields, "status") {
        let status = status.to_lowercase();
        if COMPLETED_KEYWORDS.iter().any(|k| status.contains(k)) {
            debug!("match completed by status text '{}'", status);
            return MatchState::Completed;
        }
    }

    let (p1_sets, p2_sets) = sets.iter().fold((0, 0), |(p1, p2), set| {
        match set_winner(set) {
            Some(1) => (p1 + 1, p2),
            Some(_) => (p1, p2 + 1),
            None => (p1, p2),
        }
    });

    if p1_sets >= SETS_TO_WIN || p2_sets >= SETS_TO_WIN {
        debug!("match completed by set count {}-{}", p1_sets, p2_sets);
        return MatchState::Completed;
    }

    MatchState::Live
}

/// Winner of a finished set: 6 games with a two game lead, or 7 games
fn set_winner(set: &SetScore) -> Option<u8> {
    let (hi, lo, who) = if set.p1 >= set.p2 {
        (set.p1, set.p2, 1)
    } else {
        (set.p2, set.p1, 2)
    };
    let finished = (hi == 6 && hi - lo >= 2) || (hi == 7 && lo >= 5);
    finished.then_some(who)
}

/// `"Jane Doe (Q)"` + `"FRA #312"` → name, country code, ranking
fn parse_player(player: String, country: String) -> Player {
    let name = player.replace(" (Q)", "").replace(" (WC)", "").trim().to_string();
    let country_code = country
        .split_whitespace()
        .next()
        .filter(|c| !c.starts_with('#'))
        .map(String::from);
    let ranking = country.split('#').nth(1).and_then(|rest| {
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    });

    Player {
        name,
        country: country_code,
        ranking,
    }
}

/// Dense `header/p1,p1,.../p2,p2,...` statistics string
fn parse_stats(raw: &str) -> Vec<StatGroup> {
    let mut parts = raw.split('/');
    let (Some(_), Some(p1), Some(p2), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Vec::new();
    };
    let p1_vals: Vec<&str> = p1.split(',').collect();
    let p2_vals: Vec<&str> = p2.split(',').collect();
    let value_at = |vals: &[&str], idx: usize| -> String {
        vals.get(idx)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .unwrap_or("0")
            .to_string()
    };

    let mut service = Vec::new();
    let mut returns = Vec::new();
    for (offset, name) in STAT_NAMES.iter().enumerate() {
        let idx = offset + 1;
        // Aces are reported as a pair inside the first player's block
        let (home, away) = if idx == 1 {
            (value_at(&p1_vals, 1), value_at(&p1_vals, 0))
        } else {
            (value_at(&p1_vals, idx), value_at(&p2_vals, idx))
        };
        let item = StatItem {
            name: name.to_string(),
            home,
            away,
        };
        let is_service = name.contains("Serve")
            || name.contains("Aces")
            || name.contains("Double")
            || name.contains("Games Played");
        if is_service {
            service.push(item);
        } else {
            returns.push(item);
        }
    }

    vec![
        StatGroup {
            group_name: "Service".to_string(),
            items: service,
        },
        StatGroup {
            group_name: "Return".to_string(),
            items: returns,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn summary() -> EventSummary {
        EventSummary::new("5512")
            .with_tournament("ITF W35 Santo Domingo")
            .with_field("player1", "Jane Doe (Q)")
            .with_field("country1", "FRA #312")
            .with_field("player2", "Ana Roe")
            .with_field("country2", "ESP")
    }

    #[test]
    fn test_map_live_match() {
        let raw = json!({
            "match": {
                "set11": "6", "set12": "4",
                "s21": 3, "s22": "2",
                "game1": "30", "game2": "15",
                "round": "R16-$1,200-8",
                "starttime": "1700000000"
            },
            "point_by_point": [{"game": "1", "points": ["15-0"]}]
        });

        let detail = map_detail(&summary(), &raw).unwrap();
        assert_eq!(detail.score.state, MatchState::Live);
        assert_eq!(detail.score.sets[0], SetScore { p1: 6, p2: 4 });
        assert_eq!(detail.score.sets[1], SetScore { p1: 3, p2: 2 });
        assert_eq!(detail.score.current_game.p1.as_deref(), Some("30"));
        assert_eq!(detail.round.as_deref(), Some("R16"));
        assert_eq!(detail.players[0].name, "Jane Doe");
        assert_eq!(detail.players[0].country.as_deref(), Some("FRA"));
        assert_eq!(detail.players[0].ranking, Some(312));
        assert_eq!(detail.players[1].ranking, None);
        assert_eq!(detail.point_by_point.len(), 1);
        assert!(detail.started_at.is_some());
    }

    #[test]
    fn test_completion_detection() {
        let by_winner = json!({"match": {"winner": "2"}});
        assert!(map_detail(&summary(), &by_winner).unwrap().is_completed());

        let by_status = json!({"match": {"status": "Retired (injury)"}});
        assert!(map_detail(&summary(), &by_status).unwrap().is_completed());

        let by_sets = json!({"match": {"set11": "6", "set12": "3", "set21": "7.5", "set22": "6"}});
        assert!(map_detail(&summary(), &by_sets).unwrap().is_completed());

        // Second set still in progress
        let in_progress = json!({"match": {"set11": "6", "set12": "3", "set21": "3", "set22": "1"}});
        assert!(!map_detail(&summary(), &in_progress).unwrap().is_completed());
    }

    #[test]
    fn test_invalid_payload() {
        assert!(map_detail(&summary(), &json!({"foo": 1})).is_none());
        assert!(map_detail(&summary(), &json!({"match": "oops"})).is_none());
    }

    #[test]
    fn test_parse_stats() {
        let groups = parse_stats("x/3,5,60,70,50,2,8,30,40,1,8/0,2,55,65,45,3,8,35,45,2,8");
        assert_eq!(groups.len(), 2);
        let aces = &groups[0].items[0];
        assert_eq!((aces.home.as_str(), aces.away.as_str()), ("5", "3"));
        assert_eq!(groups[1].group_name, "Return");
        assert!(groups[1].items.iter().any(|i| i.name == "Break Points Converted"));
        assert!(parse_stats("garbage").is_empty());
    }
}
