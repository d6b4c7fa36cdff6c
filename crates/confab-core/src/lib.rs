#![forbid(unsafe_code)]

//! Shared domain vocabulary for the confab gateway: identifiers, roles and
//! presence states used on both sides of the wire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid identifier")]
pub struct IdParseError;

/// Stable user identifier (ULID, Crockford base32 on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(Ulid);

impl UserId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for UserId {
    type Err = IdParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(value).map(Self).map_err(|_| IdParseError)
    }
}

impl TryFrom<String> for UserId {
    type Error = IdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.to_string()
    }
}

/// Stable channel identifier (ULID, Crockford base32 on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelId(Ulid);

impl ChannelId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ChannelId {
    type Err = IdParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(value).map(Self).map_err(|_| IdParseError)
    }
}

impl TryFrom<String> for ChannelId {
    type Error = IdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChannelId> for String {
    fn from(value: ChannelId) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    Moderator,
    Member,
}

/// Explicit per-session presence state. The per-user aggregate is derived
/// from the states of all of a user's sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Online,
    Idle,
    Dnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Text,
    Voice,
}

#[cfg(test)]
mod tests {
    use super::{ChannelId, ChannelKind, IdParseError, PresenceState, UserId};

    #[test]
    fn user_id_round_trips_through_string() {
        let id = UserId::new();
        let parsed: UserId = id.to_string().parse().expect("rendered id should parse");
        assert_eq!(parsed, id);
    }

    #[test]
    fn channel_id_rejects_invalid_input() {
        let error = "not-a-ulid".parse::<ChannelId>().unwrap_err();
        assert_eq!(error, IdParseError);
    }

    #[test]
    fn presence_state_uses_lowercase_wire_names() {
        let rendered = serde_json::to_string(&PresenceState::Dnd).expect("state should serialize");
        assert_eq!(rendered, "\"dnd\"");
        let parsed: PresenceState =
            serde_json::from_str("\"idle\"").expect("state should deserialize");
        assert_eq!(parsed, PresenceState::Idle);
    }

    #[test]
    fn channel_kind_uses_snake_case_wire_names() {
        let rendered = serde_json::to_string(&ChannelKind::Voice).expect("kind should serialize");
        assert_eq!(rendered, "\"voice\"");
    }
}
