//! Lobby state: members, properties, ownership, lifecycle flags.
//!
//! Everything in this module is plain data plus invariant-preserving
//! mutators; locking and event emission live in the engine. Mutators are
//! written so a failed call leaves the state untouched.

use lobby_kit_protocol::{
    GameId, LobbyId, LobbyView, MemberView, MAX_DISPLAY_NAME_LEN, MAX_PROPERTIES,
    MAX_PROPERTY_KEY_LEN, MAX_PROPERTY_VALUE_LEN, MAX_PLAYERS, MIN_PLAYERS, NAME_PROPERTY_KEY,
};
use rand::Rng;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Human-enterable lobby code alphabet, omitting visually ambiguous glyphs
/// (no I, L, O, 0, 1).
pub const LOBBY_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of a generated lobby code.
pub const LOBBY_CODE_LEN: usize = 6;

/// How many collision retries before falling back to a hex code.
pub const LOBBY_CODE_RETRIES: usize = 10;

/// A user currently participating in a lobby.
///
/// `session_token` is the bearer presented at admission; it is re-validated
/// on every mutating call and used by the hub to evict dead transports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub user_id: String,
    pub display_name: String,
    pub session_token: String,
    pub is_ready: bool,
}

impl Member {
    pub fn to_view(&self) -> MemberView {
        MemberView {
            user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            is_ready: self.is_ready,
        }
    }
}

/// Mutable lobby state, guarded by the per-lobby mutex in the engine.
#[derive(Debug)]
pub struct LobbyState {
    pub lobby_id: LobbyId,
    pub lobby_code: String,
    pub game_id: GameId,
    /// Display name, mirrored from the `Name` property.
    pub name: String,
    pub owner_user_id: String,
    pub max_players: u32,
    pub created_at_utc: u64,
    /// Monotonic: once set, never cleared.
    pub started: bool,
    properties: HashMap<String, String>,
    /// Insertion order is load-bearing: the member at index 0 inherits
    /// ownership when the owner leaves.
    pub members: Vec<Member>,
}

/// Outcome of a property write.
#[derive(Debug, PartialEq, Eq)]
pub enum PropertyWrite {
    Stored { key: String, value: String },
    /// A new key would exceed the property cap.
    CapExceeded,
}

impl LobbyState {
    pub fn new(
        lobby_id: LobbyId,
        lobby_code: String,
        game_id: GameId,
        owner: Member,
        max_players: u32,
    ) -> Self {
        Self {
            lobby_id,
            lobby_code,
            game_id,
            name: String::new(),
            owner_user_id: owner.user_id.clone(),
            max_players,
            created_at_utc: unix_now_millis(),
            started: false,
            properties: HashMap::new(),
            members: vec![owner],
        }
    }

    pub fn member_by_token(&self, token: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.session_token == token)
    }

    pub fn member_by_token_mut(&mut self, token: &str) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| m.session_token == token)
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.max_players as usize
    }

    /// Remove the member admitted with `token`. If the removed member owned
    /// the lobby and members remain, ownership hands off to the
    /// longest-tenured remaining member (index 0).
    ///
    /// Returns the removed member and the new owner's user id, if a
    /// hand-off happened.
    pub fn remove_member_by_token(&mut self, token: &str) -> Option<(Member, Option<String>)> {
        let idx = self.members.iter().position(|m| m.session_token == token)?;
        let removed = self.members.remove(idx);

        let mut new_owner = None;
        if removed.user_id == self.owner_user_id {
            if let Some(next) = self.members.first() {
                self.owner_user_id = next.user_id.clone();
                new_owner = Some(next.user_id.clone());
            }
        }
        Some((removed, new_owner))
    }

    /// Case-insensitive property read.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    /// Write a property, sanitizing key and value first. An existing key
    /// (matched case-insensitively) is overwritten keeping its stored
    /// casing; a new key beyond the cap is rejected. The `Name` key mirrors
    /// into the lobby's display name.
    pub fn set_property(&mut self, key: &str, value: &str) -> PropertyWrite {
        let key = sanitize_text(key, MAX_PROPERTY_KEY_LEN);
        let value = sanitize_text(value, MAX_PROPERTY_VALUE_LEN);

        let stored_key = self
            .properties
            .keys()
            .find(|k| k.eq_ignore_ascii_case(&key))
            .cloned();

        let key = match stored_key {
            Some(existing) => existing,
            None => {
                if self.properties.len() >= MAX_PROPERTIES {
                    return PropertyWrite::CapExceeded;
                }
                key
            }
        };

        self.properties.insert(key.clone(), value.clone());
        if key.eq_ignore_ascii_case(NAME_PROPERTY_KEY) {
            self.name = value.clone();
        }
        PropertyWrite::Stored { key, value }
    }

    /// Apply up to [`MAX_PROPERTIES`] creation-time properties; entries past
    /// the cap are dropped silently.
    pub fn apply_initial_properties(&mut self, properties: &HashMap<String, String>) {
        for (key, value) in properties {
            self.set_property(key, value);
        }
    }

    /// Project the client-visible shape. `caller_user_id` drives the
    /// `isOwner` flag; `None` (search results) always projects `false`.
    pub fn to_view(&self, caller_user_id: Option<&str>) -> LobbyView {
        LobbyView {
            lobby_id: self.lobby_id.clone(),
            lobby_code: self.lobby_code.clone(),
            game_id: self.game_id.clone(),
            name: self.name.clone(),
            owner_user_id: self.owner_user_id.clone(),
            max_players: self.max_players,
            started: self.started,
            created_at_utc: self.created_at_utc,
            properties: self.properties.clone(),
            members: self.members.iter().map(Member::to_view).collect(),
            is_owner: caller_user_id.is_some_and(|id| id == self.owner_user_id),
        }
    }

    /// Whether the lobby matches a search filter set: every `(k, v)` pair
    /// must be present with a case-insensitively equal value.
    pub fn matches_filters(&self, filters: &HashMap<String, String>) -> bool {
        filters.iter().all(|(key, value)| {
            self.property(key)
                .is_some_and(|stored| stored.eq_ignore_ascii_case(value))
        })
    }
}

/// Clamp a requested player cap into `[MIN_PLAYERS, MAX_PLAYERS]`.
pub fn clamp_max_players(requested: u32) -> u32 {
    requested.clamp(MIN_PLAYERS, MAX_PLAYERS)
}

/// Trim, drop control characters (except tab/CR/LF), truncate to
/// `max_chars` characters.
pub fn sanitize_text(input: &str, max_chars: usize) -> String {
    input
        .trim()
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\r' | '\n'))
        .take(max_chars)
        .collect()
}

/// Sanitize a display name as reported by the token validator.
pub fn sanitize_display_name(input: &str) -> String {
    sanitize_text(input, MAX_DISPLAY_NAME_LEN)
}

/// Generate one lobby-code candidate from the restricted alphabet.
pub fn generate_lobby_code<R: Rng>(rng: &mut R) -> String {
    (0..LOBBY_CODE_LEN)
        .map(|_| LOBBY_CODE_ALPHABET[rng.gen_range(0..LOBBY_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Collision fallback: first six uppercase hex digits of a fresh random
/// 128-bit value.
pub fn fallback_lobby_code() -> String {
    let hex = Uuid::new_v4().simple().to_string().to_uppercase();
    hex[..LOBBY_CODE_LEN].to_string()
}

/// Wall-clock now, Unix epoch milliseconds.
pub fn unix_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(user: &str, token: &str) -> Member {
        Member {
            user_id: user.to_string(),
            display_name: user.to_uppercase(),
            session_token: token.to_string(),
            is_ready: false,
        }
    }

    fn lobby_with_owner() -> LobbyState {
        LobbyState::new(
            LobbyId::generate(),
            "ABCDEF".to_string(),
            GameId::from("g1"),
            member("u1", "t1"),
            4,
        )
    }

    #[test]
    fn max_players_clamps_to_bounds() {
        assert_eq!(clamp_max_players(1), MIN_PLAYERS);
        assert_eq!(clamp_max_players(2), 2);
        assert_eq!(clamp_max_players(16), 16);
        assert_eq!(clamp_max_players(64), 64);
        assert_eq!(clamp_max_players(1000), MAX_PLAYERS);
    }

    #[test]
    fn sanitize_strips_controls_and_truncates() {
        assert_eq!(sanitize_text("  Ada \u{7}Lovelace  ", 64), "Ada Lovelace");
        assert_eq!(sanitize_text("a\tb\r\nc", 64), "a\tb\r\nc");
        assert_eq!(sanitize_text("\u{0}\u{1}", 64), "");
        let long = "x".repeat(100);
        assert_eq!(sanitize_text(&long, 64).chars().count(), 64);
    }

    #[test]
    fn generated_codes_use_the_restricted_alphabet() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let code = generate_lobby_code(&mut rng);
            assert_eq!(code.len(), LOBBY_CODE_LEN);
            assert!(code.bytes().all(|b| LOBBY_CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn fallback_codes_are_uppercase_hex() {
        let code = fallback_lobby_code();
        assert_eq!(code.len(), LOBBY_CODE_LEN);
        assert!(code
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[test]
    fn owner_hand_off_goes_to_longest_tenured_member() {
        let mut lobby = lobby_with_owner();
        lobby.members.push(member("u2", "t2"));
        lobby.members.push(member("u3", "t3"));

        let (removed, new_owner) = lobby.remove_member_by_token("t1").unwrap();
        assert_eq!(removed.user_id, "u1");
        assert_eq!(new_owner.as_deref(), Some("u2"));
        assert_eq!(lobby.owner_user_id, "u2");
    }

    #[test]
    fn non_owner_departure_keeps_owner() {
        let mut lobby = lobby_with_owner();
        lobby.members.push(member("u2", "t2"));

        let (removed, new_owner) = lobby.remove_member_by_token("t2").unwrap();
        assert_eq!(removed.user_id, "u2");
        assert!(new_owner.is_none());
        assert_eq!(lobby.owner_user_id, "u1");
    }

    #[test]
    fn last_departure_leaves_members_empty() {
        let mut lobby = lobby_with_owner();
        let (_, new_owner) = lobby.remove_member_by_token("t1").unwrap();
        assert!(new_owner.is_none());
        assert!(lobby.members.is_empty());
    }

    #[test]
    fn properties_are_case_insensitive_and_keep_first_casing() {
        let mut lobby = lobby_with_owner();
        lobby.set_property("Mode", "ranked");
        assert_eq!(lobby.property("mode"), Some("ranked"));
        assert_eq!(lobby.property("MODE"), Some("ranked"));

        lobby.set_property("MODE", "casual");
        assert_eq!(lobby.property_count(), 1);
        assert_eq!(lobby.property("Mode"), Some("casual"));
        let view = lobby.to_view(None);
        assert!(view.properties.contains_key("Mode"));
    }

    #[test]
    fn thirty_third_distinct_key_is_rejected() {
        let mut lobby = lobby_with_owner();
        for i in 0..MAX_PROPERTIES {
            assert!(matches!(
                lobby.set_property(&format!("k{i}"), "v"),
                PropertyWrite::Stored { .. }
            ));
        }
        assert_eq!(lobby.set_property("k32", "v"), PropertyWrite::CapExceeded);
        // Overwriting an existing key still succeeds at the cap.
        assert!(matches!(
            lobby.set_property("K0", "v2"),
            PropertyWrite::Stored { .. }
        ));
        assert_eq!(lobby.property_count(), MAX_PROPERTIES);
    }

    #[test]
    fn oversize_property_key_is_truncated_before_store() {
        let mut lobby = lobby_with_owner();
        let long_key = "k".repeat(MAX_PROPERTY_KEY_LEN + 10);
        lobby.set_property(&long_key, "v");
        let truncated = "k".repeat(MAX_PROPERTY_KEY_LEN);
        assert_eq!(lobby.property(&truncated), Some("v"));
    }

    #[test]
    fn name_property_mirrors_into_display_name() {
        let mut lobby = lobby_with_owner();
        lobby.set_property("name", "The Pit");
        assert_eq!(lobby.name, "The Pit");
        assert_eq!(lobby.property("Name"), Some("The Pit"));
    }

    #[test]
    fn view_owner_flag_is_caller_relative() {
        let lobby = lobby_with_owner();
        assert!(lobby.to_view(Some("u1")).is_owner);
        assert!(!lobby.to_view(Some("u2")).is_owner);
        assert!(!lobby.to_view(None).is_owner);
    }

    #[test]
    fn filter_matching_is_case_insensitive_on_values() {
        let mut lobby = lobby_with_owner();
        lobby.set_property("Mode", "Ranked");
        let mut filters = HashMap::new();
        filters.insert("mode".to_string(), "ranked".to_string());
        assert!(lobby.matches_filters(&filters));
        filters.insert("region".to_string(), "eu".to_string());
        assert!(!lobby.matches_filters(&filters));
    }
}
