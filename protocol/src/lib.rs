//! Shared wire-level types for the lobby coordination service.
//!
//! Everything a client, a request router, or a test harness needs to speak
//! the protocol lives here: identifiers, the event taxonomy, client-visible
//! lobby projections, and the error kinds. Server-side state (members with
//! their bearer tokens, subscriber bookkeeping) stays in the server crate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Upper bound for opaque identifiers (game ids, lobby ids, tokens).
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Bounds applied to `maxPlayers` on lobby creation.
pub const MIN_PLAYERS: u32 = 2;
pub const MAX_PLAYERS: u32 = 64;

/// Custom property limits.
pub const MAX_PROPERTIES: usize = 32;
pub const MAX_PROPERTY_KEY_LEN: usize = 64;
pub const MAX_PROPERTY_VALUE_LEN: usize = 256;

/// Display names are truncated to this many characters after sanitization.
pub const MAX_DISPLAY_NAME_LEN: usize = 64;

/// The privileged property key mirrored into the lobby's display name.
pub const NAME_PROPERTY_KEY: &str = "Name";

/// Search result cap.
pub const MAX_SEARCH_RESULTS: u32 = 100;

/// Tenant scope. Lobbies in different games never interact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(pub String);

impl GameId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GameId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a lobby, stable for the lobby's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LobbyId(pub String);

impl LobbyId {
    /// Fresh 128-bit identifier in hyphenated form.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LobbyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LobbyId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identity resolved from a session token by the token validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenIdentity {
    pub user_id: String,
    pub display_name: String,
}

/// Why a session token was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenRejection {
    #[error("session token expired")]
    Expired,
    #[error("session token invalid: {0}")]
    Invalid(String),
}

/// Error kinds surfaced by lobby operations.
///
/// Operations never partially mutate state: an error means the lobby
/// registry looks exactly as it did before the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LobbyError {
    /// Malformed input (empty or oversize identifier, missing key).
    #[error("invalid request: {0}")]
    Invalid(String),
    /// Token invalid or expired.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Owner-gated operation attempted by a non-owner.
    #[error("operation restricted to the lobby owner")]
    Forbidden,
    /// Lobby missing, scoped to another game, full, started, or the caller
    /// is not a member.
    #[error("lobby not found")]
    NotFound,
    /// The caller's cancellation signal fired before the mutation committed.
    #[error("operation cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<TokenRejection> for LobbyError {
    fn from(rejection: TokenRejection) -> Self {
        LobbyError::Unauthorized(rejection.to_string())
    }
}

/// Validate an opaque identifier: non-empty and at most
/// [`MAX_IDENTIFIER_LEN`] characters.
pub fn validate_identifier(label: &str, value: &str) -> Result<(), LobbyError> {
    if value.is_empty() {
        return Err(LobbyError::Invalid(format!("{label} must not be empty")));
    }
    if value.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(LobbyError::Invalid(format!(
            "{label} exceeds {MAX_IDENTIFIER_LEN} characters"
        )));
    }
    Ok(())
}

/// A member as projected to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub user_id: String,
    pub display_name: String,
    pub is_ready: bool,
}

/// The client-visible shape of a lobby.
///
/// `is_owner` is computed relative to the caller; projections produced
/// without caller context (search results) always carry `false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyView {
    pub lobby_id: LobbyId,
    pub lobby_code: String,
    pub game_id: GameId,
    pub name: String,
    pub owner_user_id: String,
    pub max_players: u32,
    pub started: bool,
    /// Creation time, Unix epoch milliseconds.
    pub created_at_utc: u64,
    pub properties: HashMap<String, String>,
    pub members: Vec<MemberView>,
    pub is_owner: bool,
}

/// Events fanned out to lobby subscribers.
///
/// Serialized as a JSON object with a snake_case `type` discriminator and
/// camelCase payload keys, e.g.
/// `{"type":"member_joined","userId":"u1","displayName":"Ada"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum LobbyEvent {
    LobbyCreated {
        lobby_id: LobbyId,
        owner_user_id: String,
        owner_display_name: String,
        max_players: u32,
    },
    MemberJoined {
        user_id: String,
        display_name: String,
    },
    MemberLeft {
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_owner_user_id: Option<String>,
    },
    MemberReady {
        user_id: String,
        is_ready: bool,
    },
    EveryoneReady {
        affected_members: Vec<String>,
    },
    LobbyData {
        key: String,
        value: String,
    },
    LobbyStarted,
    LobbyEmpty,
    LobbyDeleted {
        lobby_id: LobbyId,
        game_id: GameId,
    },
    /// Server-initiated heartbeat. `ts` is the send time in Unix epoch
    /// milliseconds.
    Ping {
        ts: u64,
    },
}

impl LobbyEvent {
    /// Canonical textual encoding: compact JSON, camelCase keys.
    pub fn encode(&self) -> String {
        // A LobbyEvent cannot fail to serialize: every payload is made of
        // strings, integers and bools.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Recognized heartbeat response tokens, compared case-insensitively after
/// trimming.
const HEARTBEAT_TOKENS: [&str; 3] = ["pong", "hb", "heartbeat"];

/// Whether an inbound text frame counts as a heartbeat response.
///
/// Either the literal token (`pong`, `hb`, `heartbeat`; case-insensitive,
/// trimmed) or a JSON object whose `type` field is one of those tokens.
/// All other frames are ignored by the core.
pub fn is_heartbeat_response(frame: &str) -> bool {
    let trimmed = frame.trim();
    if HEARTBEAT_TOKENS
        .iter()
        .any(|t| trimmed.eq_ignore_ascii_case(t))
    {
        return true;
    }
    let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return false;
    };
    value
        .get("type")
        .and_then(|t| t.as_str())
        .map(|t| {
            let t = t.trim();
            HEARTBEAT_TOKENS.iter().any(|k| t.eq_ignore_ascii_case(k))
        })
        .unwrap_or(false)
}
