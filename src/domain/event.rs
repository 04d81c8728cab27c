use super::state::EventStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entry of the live feed listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    pub id: String,
    #[serde(default)]
    pub tournament: Option<String>,
    /// Remaining summary fields as reported by the feed (players, countries, h2h, ...)
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl EventSummary {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tournament: None,
            fields: Map::new(),
        }
    }

    pub fn with_tournament(mut self, tournament: impl Into<String>) -> Self {
        self.tournament = Some(tournament.into());
        self
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Build a summary from a raw feed object; `None` when it carries no id
    pub fn from_raw(raw: &Value) -> Option<Self> {
        let object = raw.as_object()?;
        let id = match object.get("id")? {
            Value::String(s) if !s.is_empty() => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let tournament = object
            .get("tournament_name")
            .or_else(|| object.get("tournament"))
            .and_then(Value::as_str)
            .map(String::from);

        Some(Self {
            id,
            tournament,
            fields: object.clone(),
        })
    }

    /// Case-insensitive tournament match used by the feed pre-filter
    pub fn matches_tournament(&self, needle: &str) -> bool {
        self.tournament
            .as_deref()
            .map(|t| t.to_lowercase().contains(&needle.to_lowercase()))
            .unwrap_or(false)
    }
}

/// Whether the event is still being played
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchState {
    #[default]
    Live,
    Completed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetScore {
    pub p1: u32,
    pub p2: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameScore {
    pub p1: Option<String>,
    pub p2: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub sets: Vec<SetScore>,
    pub current_game: GameScore,
    pub state: MatchState,
}

impl Score {
    /// Canonical form used to decide whether the score moved, e.g. `6475_3040`
    pub fn fingerprint(&self) -> String {
        let sets: String = self
            .sets
            .iter()
            .map(|s| format!("{}{}", s.p1, s.p2))
            .collect();
        format!(
            "{}_{}{}",
            sets,
            self.current_game.p1.as_deref().unwrap_or("-"),
            self.current_game.p2.as_deref().unwrap_or("-")
        )
    }

    /// Human readable score such as `6-4 3-2 (30-15)`; untouched sets are skipped
    pub fn display(&self) -> String {
        let mut parts: Vec<String> = self
            .sets
            .iter()
            .filter(|s| s.p1 > 0 || s.p2 > 0)
            .map(|s| format!("{}-{}", s.p1, s.p2))
            .collect();
        parts.push(format!(
            "({}-{})",
            self.current_game.p1.as_deref().unwrap_or("0"),
            self.current_game.p2.as_deref().unwrap_or("0")
        ));
        parts.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    pub country: Option<String>,
    pub ranking: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatItem {
    pub name: String,
    pub home: String,
    pub away: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatGroup {
    pub group_name: String,
    pub items: Vec<StatItem>,
}

/// Normalised per-event snapshot produced from a detail fetch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventDetail {
    pub tournament: Option<String>,
    pub round: Option<String>,
    pub players: Vec<Player>,
    pub score: Score,
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub statistics: Vec<StatGroup>,
    #[serde(default)]
    pub point_by_point: Vec<Value>,
}

impl EventDetail {
    pub fn is_completed(&self) -> bool {
        self.score.state == MatchState::Completed
    }

    /// `A vs B`, falling back to whatever names are known
    pub fn matchup(&self) -> String {
        match self.players.as_slice() {
            [p1, p2, ..] => format!("{} vs {}", p1.name, p2.name),
            [p1] => p1.name.clone(),
            [] => "unknown players".to_string(),
        }
    }
}

/// Stored state of one tracked event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub status: EventStatus,
    /// Latest successfully fetched detail; `None` until the first fetch lands
    pub detail: Option<EventDetail>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub quarantined_since: Option<DateTime<Utc>>,
    pub last_score_change_at: DateTime<Utc>,
    pub last_alert_sent_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl EventRecord {
    /// Fresh Active record for an id seen in the feed for the first time
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            status: EventStatus::Active,
            detail: None,
            created_at: now,
            last_seen_at: now,
            quarantined_since: None,
            last_score_change_at: now,
            last_alert_sent_at: None,
            archived_at: None,
        }
    }

    pub fn score_fingerprint(&self) -> Option<String> {
        self.detail.as_ref().map(|d| d.score.fingerprint())
    }

    /// Back in the feed: Active, grace cleared, presence bumped
    pub fn mark_seen(&mut self, now: DateTime<Utc>) {
        self.status = EventStatus::Active;
        self.quarantined_since = None;
        if now > self.last_seen_at {
            self.last_seen_at = now;
        }
    }

    pub fn mark_quarantined(&mut self, now: DateTime<Utc>) {
        self.status = EventStatus::Quarantined;
        self.quarantined_since = Some(now);
    }

    /// Replace the detail; returns true when the score moved
    pub fn apply_detail(&mut self, detail: EventDetail, now: DateTime<Utc>) -> bool {
        let changed = self.score_fingerprint().as_deref() != Some(detail.score.fingerprint().as_str());
        self.detail = Some(detail);
        if changed {
            self.last_score_change_at = now.min(self.last_seen_at);
        }
        changed
    }

    /// Snapshot written to the history partition
    pub fn into_archived(mut self, now: DateTime<Utc>) -> Self {
        self.status = EventStatus::Archived;
        self.quarantined_since = None;
        self.archived_at = Some(now);
        self
    }

    /// Checks the record-level invariants; returns the first violation
    pub fn check_invariants(&self) -> Result<(), String> {
        match (self.status, self.quarantined_since) {
            (EventStatus::Quarantined, None) => {
                return Err(format!("{}: quarantined without quarantined_since", self.id))
            }
            (EventStatus::Active | EventStatus::Archived, Some(_)) => {
                return Err(format!("{}: quarantined_since set while {}", self.id, self.status))
            }
            _ => {}
        }
        if self.last_score_change_at > self.last_seen_at {
            return Err(format!("{}: score change after last sighting", self.id));
        }
        Ok(())
    }
}
