//! REST handlers exposing the engine to a request router.
//!
//! Every mutating route carries the caller's session token as a Bearer
//! header; the engine re-validates it on each call. Handlers translate
//! engine error kinds onto HTTP statuses and never touch lobby state
//! themselves.

use crate::engine::LobbyEngine;
use crate::validator::JwtSessionValidator;
use actix_web::{web, HttpRequest, HttpResponse};
use lobby_kit_protocol::{GameId, LobbyError, LobbyId, MemberView};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared application state for REST handlers.
pub struct AppState {
    pub engine: Arc<LobbyEngine>,
    pub sessions: Arc<JwtSessionValidator>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub user_id: String,
    pub display_name: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLobbyRequest {
    #[serde(default = "default_max_players")]
    pub max_players: u32,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

fn default_max_players() -> u32 {
    lobby_kit_protocol::MAX_PLAYERS
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(default = "default_max_rooms")]
    pub max_rooms: u32,
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

fn default_max_rooms() -> u32 {
    lobby_kit_protocol::MAX_SEARCH_RESULTS
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyRequest {
    pub is_ready: bool,
}

#[derive(Deserialize)]
pub struct DataRequest {
    pub key: String,
    pub value: String,
}

fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn missing_bearer() -> HttpResponse {
    HttpResponse::Unauthorized().json(ErrorResponse {
        error: "Missing Authorization header".to_string(),
    })
}

fn error_response(err: LobbyError) -> HttpResponse {
    let body = ErrorResponse {
        error: err.to_string(),
    };
    match err {
        LobbyError::Invalid(_) => HttpResponse::BadRequest().json(body),
        LobbyError::Unauthorized(_) => HttpResponse::Unauthorized().json(body),
        LobbyError::Forbidden => HttpResponse::Forbidden().json(body),
        LobbyError::NotFound => HttpResponse::NotFound().json(body),
        LobbyError::Cancelled => HttpResponse::RequestTimeout().json(body),
        LobbyError::Internal(_) => HttpResponse::InternalServerError().json(body),
    }
}

/// POST /session - issue a session ticket.
pub async fn issue_session(
    body: web::Json<SessionRequest>,
    state: web::Data<AppState>,
) -> HttpResponse {
    if body.user_id.is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "userId must not be empty".to_string(),
        });
    }
    match state.sessions.issue(&body.user_id, &body.display_name) {
        Ok(token) => HttpResponse::Ok().json(SessionResponse { token }),
        Err(e) => HttpResponse::InternalServerError().json(ErrorResponse {
            error: e.to_string(),
        }),
    }
}

/// POST /games/{game_id}/lobbies - create a lobby.
pub async fn create_lobby(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<CreateLobbyRequest>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let Some(token) = bearer_token(&req) else {
        return missing_bearer();
    };
    let game_id = GameId(path.into_inner());

    match state
        .engine
        .create_lobby(
            &game_id,
            token,
            body.max_players,
            &body.properties,
            &CancellationToken::new(),
        )
        .await
    {
        Ok(view) => HttpResponse::Ok().json(view),
        Err(e) => error_response(e),
    }
}

/// POST /games/{game_id}/lobbies/search - filtered lobby search.
pub async fn search_lobbies(
    path: web::Path<String>,
    body: web::Json<SearchRequest>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let game_id = GameId(path.into_inner());
    let results = state
        .engine
        .search_lobbies(&game_id, body.max_rooms, &body.filters)
        .await;
    HttpResponse::Ok().json(results)
}

/// GET /games/{game_id}/lobbies/{lobby_id} - member-only lobby view.
pub async fn get_lobby(
    req: HttpRequest,
    path: web::Path<(String, String)>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let Some(token) = bearer_token(&req) else {
        return missing_bearer();
    };
    let (game_id, lobby_id) = path.into_inner();

    match state
        .engine
        .get_lobby(
            &GameId(game_id),
            &LobbyId(lobby_id),
            token,
            &CancellationToken::new(),
        )
        .await
    {
        Ok(view) => HttpResponse::Ok().json(view),
        Err(e) => error_response(e),
    }
}

/// POST /games/{game_id}/lobbies/{lobby_id}/join
pub async fn join_lobby(
    req: HttpRequest,
    path: web::Path<(String, String)>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let Some(token) = bearer_token(&req) else {
        return missing_bearer();
    };
    let (game_id, lobby_id) = path.into_inner();

    match state
        .engine
        .join_lobby(
            &GameId(game_id),
            &LobbyId(lobby_id),
            token,
            &CancellationToken::new(),
        )
        .await
    {
        Ok(view) => HttpResponse::Ok().json(view),
        Err(e) => error_response(e),
    }
}

/// POST /games/{game_id}/lobbies/{lobby_id}/leave
pub async fn leave_lobby(
    req: HttpRequest,
    path: web::Path<(String, String)>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let Some(token) = bearer_token(&req) else {
        return missing_bearer();
    };
    let (game_id, lobby_id) = path.into_inner();

    match state
        .engine
        .leave_lobby(
            &GameId(game_id),
            &LobbyId(lobby_id),
            token,
            &CancellationToken::new(),
        )
        .await
    {
        Ok(left) => HttpResponse::Ok().json(serde_json::json!({ "left": left })),
        Err(e) => error_response(e),
    }
}

/// POST /games/{game_id}/leave - leave whatever lobby the token is in.
pub async fn leave_by_token(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let Some(token) = bearer_token(&req) else {
        return missing_bearer();
    };
    let game_id = GameId(path.into_inner());

    match state
        .engine
        .leave_lobby_by_token(&game_id, token, &CancellationToken::new())
        .await
    {
        Ok(left) => HttpResponse::Ok().json(serde_json::json!({ "left": left })),
        Err(e) => error_response(e),
    }
}

/// GET /games/{game_id}/lobbies/{lobby_id}/members - public member list.
pub async fn get_members(
    path: web::Path<(String, String)>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let (game_id, lobby_id) = path.into_inner();
    let members: Vec<MemberView> = state
        .engine
        .get_lobby_members(&GameId(game_id), &LobbyId(lobby_id))
        .await
        .iter()
        .map(|m| m.to_view())
        .collect();
    HttpResponse::Ok().json(members)
}

/// POST /games/{game_id}/lobbies/{lobby_id}/ready
pub async fn set_ready(
    req: HttpRequest,
    path: web::Path<(String, String)>,
    body: web::Json<ReadyRequest>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let Some(token) = bearer_token(&req) else {
        return missing_bearer();
    };
    let (game_id, lobby_id) = path.into_inner();

    match state
        .engine
        .set_ready(
            &GameId(game_id),
            &LobbyId(lobby_id),
            token,
            body.is_ready,
            &CancellationToken::new(),
        )
        .await
    {
        Ok(updated) => HttpResponse::Ok().json(serde_json::json!({ "updated": updated })),
        Err(e) => error_response(e),
    }
}

/// POST /games/{game_id}/lobbies/{lobby_id}/everyone-ready (owner only)
pub async fn set_everyone_ready(
    req: HttpRequest,
    path: web::Path<(String, String)>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let Some(token) = bearer_token(&req) else {
        return missing_bearer();
    };
    let (game_id, lobby_id) = path.into_inner();

    match state
        .engine
        .set_everyone_ready(
            &GameId(game_id),
            &LobbyId(lobby_id),
            token,
            &CancellationToken::new(),
        )
        .await
    {
        Ok(updated) => HttpResponse::Ok().json(serde_json::json!({ "updated": updated })),
        Err(e) => error_response(e),
    }
}

/// PUT /games/{game_id}/lobbies/{lobby_id}/data (owner only)
pub async fn set_lobby_data(
    req: HttpRequest,
    path: web::Path<(String, String)>,
    body: web::Json<DataRequest>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let Some(token) = bearer_token(&req) else {
        return missing_bearer();
    };
    let (game_id, lobby_id) = path.into_inner();

    match state
        .engine
        .set_lobby_data(
            &GameId(game_id),
            &LobbyId(lobby_id),
            token,
            &body.key,
            &body.value,
            &CancellationToken::new(),
        )
        .await
    {
        Ok(stored) => HttpResponse::Ok().json(serde_json::json!({ "stored": stored })),
        Err(e) => error_response(e),
    }
}

/// GET /games/{game_id}/lobbies/{lobby_id}/data/{key}
pub async fn get_lobby_data(
    path: web::Path<(String, String, String)>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let (game_id, lobby_id, key) = path.into_inner();
    match state
        .engine
        .get_lobby_data(&GameId(game_id), &LobbyId(lobby_id), &key)
        .await
    {
        Some(value) => HttpResponse::Ok().json(serde_json::json!({ "key": key, "value": value })),
        None => HttpResponse::NotFound().json(ErrorResponse {
            error: "property not found".to_string(),
        }),
    }
}

/// POST /games/{game_id}/lobbies/{lobby_id}/start (owner only)
pub async fn start_lobby(
    req: HttpRequest,
    path: web::Path<(String, String)>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let Some(token) = bearer_token(&req) else {
        return missing_bearer();
    };
    let (game_id, lobby_id) = path.into_inner();

    match state
        .engine
        .start_lobby(
            &GameId(game_id),
            &LobbyId(lobby_id),
            token,
            &CancellationToken::new(),
        )
        .await
    {
        Ok(started) => HttpResponse::Ok().json(serde_json::json!({ "started": started })),
        Err(e) => error_response(e),
    }
}

/// GET /stats/players
pub async fn global_players(state: web::Data<AppState>) -> HttpResponse {
    let count = state.engine.global_player_count().await;
    HttpResponse::Ok().json(serde_json::json!({ "players": count }))
}

/// GET /stats/lobbies
pub async fn global_lobbies(state: web::Data<AppState>) -> HttpResponse {
    let count = state.engine.global_lobby_count();
    HttpResponse::Ok().json(serde_json::json!({ "lobbies": count }))
}

/// GET /stats/games/{game_id}/lobbies
pub async fn lobbies_by_game(path: web::Path<String>, state: web::Data<AppState>) -> HttpResponse {
    let game_id = GameId(path.into_inner());
    let count = state.engine.lobby_count_by_game(&game_id);
    HttpResponse::Ok().json(serde_json::json!({ "lobbies": count }))
}

/// GET /stats/games/{game_id}/players
pub async fn players_by_game(path: web::Path<String>, state: web::Data<AppState>) -> HttpResponse {
    let game_id = GameId(path.into_inner());
    let players = state.engine.active_players_by_game(&game_id).await;
    HttpResponse::Ok().json(players)
}
