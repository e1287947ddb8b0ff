//! Payloads carried in STOMP frame bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Kind of a notification; drives toast severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Warning,
    Error,
    /// Unknown kinds sent by the backend fall back to info.
    #[default]
    #[serde(other)]
    Info,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Success => "success",
            NotificationKind::Warning => "warning",
            NotificationKind::Error => "error",
            NotificationKind::Info => "info",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification pushed on the personal notifications queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "message")]
    pub body: String,
    #[serde(default)]
    pub kind: NotificationKind,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, alias = "url", skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
}

/// Backends disagree on whether ids are strings or numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Text(s) if !s.is_empty() => Ok(s),
        Raw::Text(_) => Err(serde::de::Error::custom("empty notification id")),
        Raw::Number(n) => Ok(n.to_string()),
    }
}

/// Body of the unread-count queue. Accepts `5`, `"5"` and `{"count": 5}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum UnreadPayload {
    Bare(u64),
    Text(String),
    Wrapped {
        #[serde(alias = "unreadCount")]
        count: u64,
    },
}

/// Parse an unread-count body into its integer value.
pub fn parse_unread_count(body: &str) -> Result<u64, String> {
    let payload = serde_json::from_str::<UnreadPayload>(body.trim())
        .map_err(|e| format!("unread count body {body:?} is not a count: {e}"))?;
    match payload {
        UnreadPayload::Bare(n) | UnreadPayload::Wrapped { count: n } => Ok(n),
        UnreadPayload::Text(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("unread count body {body:?} is not a count")),
    }
}

/// Announcement sent after the session goes live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectAnnouncement {
    pub device: String,
    pub timestamp: DateTime<Utc>,
}

/// First application message in the message-based auth variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthMessage {
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_accepts_message_alias_and_defaults() {
        let event: NotificationEvent = serde_json::from_str(
            r#"{"id":"n1","title":"New request","message":"..","kind":"success"}"#,
        )
        .unwrap();
        assert_eq!(event.id, "n1");
        assert_eq!(event.body, "..");
        assert_eq!(event.kind, NotificationKind::Success);
        assert!(event.target_url.is_none());
    }

    #[test]
    fn notification_numeric_id_and_unknown_kind() {
        let event: NotificationEvent =
            serde_json::from_str(r#"{"id":42,"title":"t","body":"b","kind":"urgent"}"#).unwrap();
        assert_eq!(event.id, "42");
        assert_eq!(event.kind, NotificationKind::Info);
    }

    #[test]
    fn notification_without_id_is_rejected() {
        assert!(serde_json::from_str::<NotificationEvent>(r#"{"title":"t"}"#).is_err());
        assert!(serde_json::from_str::<NotificationEvent>(r#"{"id":""}"#).is_err());
    }

    #[test]
    fn unread_count_forms() {
        assert_eq!(parse_unread_count("5"), Ok(5));
        assert_eq!(parse_unread_count("\"7\""), Ok(7));
        assert_eq!(parse_unread_count(r#"{"count":3}"#), Ok(3));
        assert_eq!(parse_unread_count(r#"{"unreadCount":9}"#), Ok(9));
        assert!(parse_unread_count("abc").is_err());
        assert!(parse_unread_count("-1").is_err());
    }

    #[test]
    fn announcement_serializes_iso_timestamp() {
        let ts = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let json = serde_json::to_string(&ConnectAnnouncement {
            device: "desktop".into(),
            timestamp: ts,
        })
        .unwrap();
        assert_eq!(json, r#"{"device":"desktop","timestamp":"2026-01-02T03:04:05Z"}"#);
    }
}
