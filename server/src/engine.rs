//! The lobby state engine: authoritative, invariant-preserving mutation of
//! lobby state.
//!
//! The registry is a concurrent map of lobbies; each lobby carries its own
//! mutex. The locking discipline is acquire → mutate → release → emit: no
//! lock is ever held across an await on the validator or the event sink, so
//! the hub can call back into the engine (evictions) without reentrancy
//! hazards.

use crate::lobby::{
    clamp_max_players, fallback_lobby_code, generate_lobby_code, sanitize_display_name,
    sanitize_text, LobbyState, Member, PropertyWrite, LOBBY_CODE_RETRIES,
};
use crate::validator::TokenValidator;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lobby_kit_protocol::{
    validate_identifier, GameId, LobbyError, LobbyEvent, LobbyId, LobbyView, MemberView,
    TokenIdentity, MAX_PROPERTY_KEY_LEN, MAX_SEARCH_RESULTS,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Where the engine publishes events. Implemented by the event hub.
///
/// Both calls are fire-and-forget from the engine's point of view: delivery
/// failures affect subscriber bookkeeping, never the originating request.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, game_id: &GameId, lobby_id: &LobbyId, event: LobbyEvent);

    /// Tear down all subscriber state for a lobby that no longer exists.
    async fn close_lobby(&self, game_id: &GameId, lobby_id: &LobbyId);
}

/// The narrow engine surface the hub needs to evict members whose transport
/// died. Errors are flattened to `false`: the hub's own bookkeeping is
/// already updated by the time it calls in, and a revoked token failing
/// re-validation is expected.
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    async fn leave_lobby(&self, game_id: &GameId, lobby_id: &LobbyId, token: &str) -> bool;

    async fn leave_lobby_by_token(&self, game_id: &GameId, token: &str) -> bool;

    async fn get_lobby_members(&self, game_id: &GameId, lobby_id: &LobbyId) -> Vec<Member>;
}

/// Registry entry: immutable scope data plus the mutex-guarded state.
///
/// `game_id` is duplicated outside the mutex so tenant-scope checks and
/// per-game stats never contend with mutations.
struct LobbyHandle {
    game_id: GameId,
    state: Mutex<LobbyState>,
}

pub struct LobbyEngine {
    lobbies: DashMap<LobbyId, Arc<LobbyHandle>>,
    /// Single-lobby-per-(game, token) index.
    user_index: DashMap<(GameId, String), LobbyId>,
    /// Active lobby codes. The entry API makes the uniqueness check and the
    /// reservation a single linearizable step.
    codes: DashMap<String, LobbyId>,
    validator: Arc<dyn TokenValidator>,
    events: Arc<dyn EventSink>,
}

impl LobbyEngine {
    pub fn new(validator: Arc<dyn TokenValidator>, events: Arc<dyn EventSink>) -> Self {
        Self {
            lobbies: DashMap::new(),
            user_index: DashMap::new(),
            codes: DashMap::new(),
            validator,
            events,
        }
    }

    async fn authenticate(&self, token: &str) -> Result<TokenIdentity, LobbyError> {
        validate_identifier("sessionToken", token)?;
        self.validator
            .validate(token)
            .await
            .map_err(LobbyError::from)
    }

    fn ensure_live(cancel: &CancellationToken) -> Result<(), LobbyError> {
        if cancel.is_cancelled() {
            Err(LobbyError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Clone the handle out of the registry so no shard lock is held while
    /// the lobby mutex is taken.
    fn handle(&self, game_id: &GameId, lobby_id: &LobbyId) -> Option<Arc<LobbyHandle>> {
        let handle = self.lobbies.get(lobby_id).map(|r| Arc::clone(r.value()))?;
        (&handle.game_id == game_id).then_some(handle)
    }

    /// Reserve a unique lobby code: up to [`LOBBY_CODE_RETRIES`] draws from
    /// the restricted alphabet, then a hex fallback.
    fn allocate_code(&self, lobby_id: &LobbyId) -> String {
        let mut rng = rand::thread_rng();
        for _ in 0..LOBBY_CODE_RETRIES {
            let code = generate_lobby_code(&mut rng);
            if let Entry::Vacant(slot) = self.codes.entry(code.clone()) {
                slot.insert(lobby_id.clone());
                return code;
            }
        }
        let code = fallback_lobby_code();
        self.codes.insert(code.clone(), lobby_id.clone());
        code
    }

    pub async fn create_lobby(
        &self,
        game_id: &GameId,
        token: &str,
        max_players: u32,
        properties: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<LobbyView, LobbyError> {
        validate_identifier("gameId", game_id.as_str())?;
        let identity = self.authenticate(token).await?;
        Self::ensure_live(cancel)?;

        let lobby_id = LobbyId::generate();
        let lobby_code = self.allocate_code(&lobby_id);
        let max_players = clamp_max_players(max_players);

        let owner = Member {
            user_id: identity.user_id.clone(),
            display_name: sanitize_display_name(&identity.display_name),
            session_token: token.to_string(),
            is_ready: false,
        };
        let owner_display_name = owner.display_name.clone();

        let mut state = LobbyState::new(
            lobby_id.clone(),
            lobby_code,
            game_id.clone(),
            owner,
            max_players,
        );
        state.apply_initial_properties(properties);
        let view = state.to_view(Some(&identity.user_id));

        self.lobbies.insert(
            lobby_id.clone(),
            Arc::new(LobbyHandle {
                game_id: game_id.clone(),
                state: Mutex::new(state),
            }),
        );
        self.user_index
            .insert((game_id.clone(), token.to_string()), lobby_id.clone());

        tracing::info!(%lobby_id, %game_id, owner = %identity.user_id, "lobby created");
        self.events
            .publish(
                game_id,
                &lobby_id,
                LobbyEvent::LobbyCreated {
                    lobby_id: lobby_id.clone(),
                    owner_user_id: identity.user_id,
                    owner_display_name,
                    max_players,
                },
            )
            .await;

        Ok(view)
    }

    pub async fn join_lobby(
        &self,
        game_id: &GameId,
        lobby_id: &LobbyId,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<LobbyView, LobbyError> {
        validate_identifier("gameId", game_id.as_str())?;
        validate_identifier("lobbyId", lobby_id.as_str())?;
        let identity = self.authenticate(token).await?;

        let handle = self
            .handle(game_id, lobby_id)
            .ok_or(LobbyError::NotFound)?;

        // No cross-lobby jumping without an explicit leave.
        let indexed = self
            .user_index
            .get(&(game_id.clone(), token.to_string()))
            .map(|r| r.value().clone());
        if indexed.as_ref().is_some_and(|existing| existing != lobby_id) {
            return Err(LobbyError::NotFound);
        }

        Self::ensure_live(cancel)?;

        // Capacity and lifecycle are re-checked under the lock: that is the
        // arbitration point for racing joiners.
        let view = {
            let mut state = handle.state.lock().await;
            if state.started {
                return Err(LobbyError::NotFound);
            }
            if let Some(member) = state.member_by_token(token) {
                // Idempotent re-join: current view, no event.
                let user_id = member.user_id.clone();
                return Ok(state.to_view(Some(&user_id)));
            }
            if state.is_full() {
                return Err(LobbyError::NotFound);
            }
            state.members.push(Member {
                user_id: identity.user_id.clone(),
                display_name: sanitize_display_name(&identity.display_name),
                session_token: token.to_string(),
                is_ready: false,
            });
            self.user_index
                .insert((game_id.clone(), token.to_string()), lobby_id.clone());
            state.to_view(Some(&identity.user_id))
        };

        tracing::debug!(%lobby_id, user = %identity.user_id, "member joined");
        self.events
            .publish(
                game_id,
                lobby_id,
                LobbyEvent::MemberJoined {
                    user_id: identity.user_id,
                    display_name: sanitize_display_name(&identity.display_name),
                },
            )
            .await;

        Ok(view)
    }

    pub async fn leave_lobby(
        &self,
        game_id: &GameId,
        lobby_id: &LobbyId,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, LobbyError> {
        validate_identifier("gameId", game_id.as_str())?;
        validate_identifier("lobbyId", lobby_id.as_str())?;
        self.authenticate(token).await?;

        let Some(handle) = self.handle(game_id, lobby_id) else {
            return Ok(false);
        };
        Self::ensure_live(cancel)?;

        let (removed, new_owner, now_empty) = {
            let mut state = handle.state.lock().await;
            let Some((removed, new_owner)) = state.remove_member_by_token(token) else {
                return Ok(false);
            };
            self.user_index
                .remove(&(game_id.clone(), token.to_string()));

            let now_empty = state.members.is_empty();
            if now_empty {
                // The registry entry goes away before the lock is released:
                // no external observer can see an empty lobby.
                self.lobbies.remove(lobby_id);
                self.codes.remove(&state.lobby_code);
            }
            (removed, new_owner, now_empty)
        };

        if now_empty {
            tracing::info!(%lobby_id, %game_id, "last member left, lobby removed");
            self.events
                .publish(game_id, lobby_id, LobbyEvent::LobbyEmpty)
                .await;
            self.events.close_lobby(game_id, lobby_id).await;
        } else {
            self.events
                .publish(
                    game_id,
                    lobby_id,
                    LobbyEvent::MemberLeft {
                        user_id: removed.user_id,
                        new_owner_user_id: new_owner,
                    },
                )
                .await;
        }

        Ok(true)
    }

    pub async fn leave_lobby_by_token(
        &self,
        game_id: &GameId,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, LobbyError> {
        validate_identifier("gameId", game_id.as_str())?;
        let Some(lobby_id) = self
            .user_index
            .get(&(game_id.clone(), token.to_string()))
            .map(|r| r.value().clone())
        else {
            return Ok(false);
        };
        self.leave_lobby(game_id, &lobby_id, token, cancel).await
    }

    pub async fn set_ready(
        &self,
        game_id: &GameId,
        lobby_id: &LobbyId,
        token: &str,
        is_ready: bool,
        cancel: &CancellationToken,
    ) -> Result<bool, LobbyError> {
        validate_identifier("gameId", game_id.as_str())?;
        validate_identifier("lobbyId", lobby_id.as_str())?;
        let identity = self.authenticate(token).await?;

        let Some(handle) = self.handle(game_id, lobby_id) else {
            return Ok(false);
        };
        Self::ensure_live(cancel)?;

        {
            let mut state = handle.state.lock().await;
            if state.started {
                return Ok(false);
            }
            let Some(member) = state.member_by_token_mut(token) else {
                return Ok(false);
            };
            member.is_ready = is_ready;
        }

        self.events
            .publish(
                game_id,
                lobby_id,
                LobbyEvent::MemberReady {
                    user_id: identity.user_id,
                    is_ready,
                },
            )
            .await;

        Ok(true)
    }

    pub async fn set_everyone_ready(
        &self,
        game_id: &GameId,
        lobby_id: &LobbyId,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, LobbyError> {
        validate_identifier("gameId", game_id.as_str())?;
        validate_identifier("lobbyId", lobby_id.as_str())?;
        let identity = self.authenticate(token).await?;

        let handle = self
            .handle(game_id, lobby_id)
            .ok_or(LobbyError::NotFound)?;
        Self::ensure_live(cancel)?;

        let affected = {
            let mut state = handle.state.lock().await;
            // Ownership is re-checked under the lock: the caller may have
            // been demoted between validation and now.
            if state.owner_user_id != identity.user_id {
                return Err(LobbyError::Forbidden);
            }
            if state.started {
                return Ok(false);
            }
            let mut affected = Vec::with_capacity(state.members.len());
            for member in &mut state.members {
                member.is_ready = true;
                affected.push(member.user_id.clone());
            }
            affected
        };

        self.events
            .publish(
                game_id,
                lobby_id,
                LobbyEvent::EveryoneReady {
                    affected_members: affected,
                },
            )
            .await;

        Ok(true)
    }

    pub async fn set_lobby_data(
        &self,
        game_id: &GameId,
        lobby_id: &LobbyId,
        token: &str,
        key: &str,
        value: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, LobbyError> {
        validate_identifier("gameId", game_id.as_str())?;
        validate_identifier("lobbyId", lobby_id.as_str())?;
        if sanitize_text(key, MAX_PROPERTY_KEY_LEN).is_empty() {
            return Err(LobbyError::Invalid("property key must not be empty".into()));
        }
        let identity = self.authenticate(token).await?;

        let handle = self
            .handle(game_id, lobby_id)
            .ok_or(LobbyError::NotFound)?;
        Self::ensure_live(cancel)?;

        let (stored_key, stored_value) = {
            let mut state = handle.state.lock().await;
            if state.owner_user_id != identity.user_id {
                return Err(LobbyError::Forbidden);
            }
            match state.set_property(key, value) {
                PropertyWrite::Stored { key, value } => (key, value),
                PropertyWrite::CapExceeded => return Ok(false),
            }
        };

        self.events
            .publish(
                game_id,
                lobby_id,
                LobbyEvent::LobbyData {
                    key: stored_key,
                    value: stored_value,
                },
            )
            .await;

        Ok(true)
    }

    /// Read-only, unauthenticated property lookup.
    pub async fn get_lobby_data(
        &self,
        game_id: &GameId,
        lobby_id: &LobbyId,
        key: &str,
    ) -> Option<String> {
        let handle = self.handle(game_id, lobby_id)?;
        let state = handle.state.lock().await;
        state.property(key).map(str::to_string)
    }

    pub fn lobby_exists(&self, game_id: &GameId, lobby_id: &LobbyId) -> bool {
        self.handle(game_id, lobby_id).is_some()
    }

    /// Read-only member snapshot.
    pub async fn get_lobby_members(&self, game_id: &GameId, lobby_id: &LobbyId) -> Vec<Member> {
        let Some(handle) = self.handle(game_id, lobby_id) else {
            return Vec::new();
        };
        let state = handle.state.lock().await;
        state.members.clone()
    }

    /// Visible only to current members.
    pub async fn get_lobby(
        &self,
        game_id: &GameId,
        lobby_id: &LobbyId,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<LobbyView, LobbyError> {
        validate_identifier("gameId", game_id.as_str())?;
        validate_identifier("lobbyId", lobby_id.as_str())?;
        self.authenticate(token).await?;

        let handle = self
            .handle(game_id, lobby_id)
            .ok_or(LobbyError::NotFound)?;
        Self::ensure_live(cancel)?;

        let state = handle.state.lock().await;
        let member = state.member_by_token(token).ok_or(LobbyError::NotFound)?;
        let user_id = member.user_id.clone();
        Ok(state.to_view(Some(&user_id)))
    }

    pub async fn start_lobby(
        &self,
        game_id: &GameId,
        lobby_id: &LobbyId,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, LobbyError> {
        validate_identifier("gameId", game_id.as_str())?;
        validate_identifier("lobbyId", lobby_id.as_str())?;
        let identity = self.authenticate(token).await?;

        let handle = self
            .handle(game_id, lobby_id)
            .ok_or(LobbyError::NotFound)?;
        Self::ensure_live(cancel)?;

        {
            let mut state = handle.state.lock().await;
            if state.owner_user_id != identity.user_id {
                return Err(LobbyError::Forbidden);
            }
            if state.started {
                return Ok(false);
            }
            state.started = true;
        }

        tracing::info!(%lobby_id, %game_id, "lobby started");
        self.events
            .publish(game_id, lobby_id, LobbyEvent::LobbyStarted)
            .await;

        Ok(true)
    }

    /// Flat filtered search over joinable lobbies in one game, newest
    /// first. Projections carry no caller context.
    pub async fn search_lobbies(
        &self,
        game_id: &GameId,
        max_rooms: u32,
        filters: &HashMap<String, String>,
    ) -> Vec<LobbyView> {
        let max_rooms = max_rooms.clamp(1, MAX_SEARCH_RESULTS) as usize;

        let handles: Vec<Arc<LobbyHandle>> = self
            .lobbies
            .iter()
            .filter(|entry| &entry.value().game_id == game_id)
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            let state = handle.state.lock().await;
            if state.started || state.is_full() || !state.matches_filters(filters) {
                continue;
            }
            results.push(state.to_view(None));
        }

        results.sort_by(|a, b| b.created_at_utc.cmp(&a.created_at_utc));
        results.truncate(max_rooms);
        results
    }

    /// Total member count across all lobbies, all games.
    pub async fn global_player_count(&self) -> usize {
        let handles: Vec<Arc<LobbyHandle>> = self
            .lobbies
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut count = 0;
        for handle in handles {
            count += handle.state.lock().await.members.len();
        }
        count
    }

    pub fn global_lobby_count(&self) -> usize {
        self.lobbies.len()
    }

    pub fn lobby_count_by_game(&self, game_id: &GameId) -> usize {
        self.lobbies
            .iter()
            .filter(|entry| &entry.value().game_id == game_id)
            .count()
    }

    /// De-duplicated (by user id) snapshot of every member in one game.
    pub async fn active_players_by_game(&self, game_id: &GameId) -> Vec<MemberView> {
        let handles: Vec<Arc<LobbyHandle>> = self
            .lobbies
            .iter()
            .filter(|entry| &entry.value().game_id == game_id)
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut seen = HashSet::new();
        let mut players = Vec::new();
        for handle in handles {
            let state = handle.state.lock().await;
            for member in &state.members {
                if seen.insert(member.user_id.clone()) {
                    players.push(member.to_view());
                }
            }
        }
        players
    }
}

#[async_trait]
impl MemberDirectory for LobbyEngine {
    async fn leave_lobby(&self, game_id: &GameId, lobby_id: &LobbyId, token: &str) -> bool {
        LobbyEngine::leave_lobby(self, game_id, lobby_id, token, &CancellationToken::new())
            .await
            .unwrap_or(false)
    }

    async fn leave_lobby_by_token(&self, game_id: &GameId, token: &str) -> bool {
        LobbyEngine::leave_lobby_by_token(self, game_id, token, &CancellationToken::new())
            .await
            .unwrap_or(false)
    }

    async fn get_lobby_members(&self, game_id: &GameId, lobby_id: &LobbyId) -> Vec<Member> {
        LobbyEngine::get_lobby_members(self, game_id, lobby_id).await
    }
}
