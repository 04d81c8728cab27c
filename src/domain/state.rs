use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a tracked event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    /// Present in the latest feed summary
    Active,
    /// Missing from the feed, still inside the grace period
    Quarantined,
    /// Terminal; lives only in the history partition
    Archived,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Active => "ACTIVE",
            EventStatus::Quarantined => "QUARANTINED",
            EventStatus::Archived => "ARCHIVED",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for EventStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Ok(EventStatus::Active),
            "QUARANTINED" => Ok(EventStatus::Quarantined),
            "ARCHIVED" => Ok(EventStatus::Archived),
            _ => Err(format!("Unknown status: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_roundtrip() {
        for status in [
            EventStatus::Active,
            EventStatus::Quarantined,
            EventStatus::Archived,
        ] {
            assert_eq!(EventStatus::try_from(status.as_str()), Ok(status));
        }
        assert_eq!(
            EventStatus::try_from("quarantined"),
            Ok(EventStatus::Quarantined)
        );
        assert!(EventStatus::try_from("live").is_err());
    }
}
