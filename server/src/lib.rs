//! Multi-tenant, in-memory game lobby coordination service.
//!
//! Two coupled cores: the [`engine::LobbyEngine`] (authoritative lobby
//! registry under per-lobby mutexes) and the [`hub::EventHub`] (subscriber
//! fan-out, heartbeat liveness, idle reaping). The engine publishes events
//! into the hub; the hub evicts dead members back through the engine's
//! narrow [`engine::MemberDirectory`] seam. Everything is process-local: a
//! restart drops all lobbies and subscribers.

pub mod builder;
pub mod engine;
pub mod error;
pub mod hub;
pub mod lobby;
pub mod rest;
pub mod transport;
pub mod validator;
pub mod ws;

use crate::rest::AppState;
use crate::ws::WsState;
use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use std::sync::Arc;

pub use builder::ServerBuilder;
pub use engine::{EventSink, LobbyEngine, MemberDirectory};
pub use error::ServerError;
pub use hub::{EventHub, HubSettings};
pub use transport::{CloseReason, EventTransport, TransportError};
pub use validator::{JwtSessionValidator, TokenValidator};

/// Wire an engine/hub pair around a token validator.
///
/// The hub is constructed first so the engine can publish into it; the
/// engine is then attached as the hub's eviction directory. Embedders and
/// tests use this directly; [`LobbyServer::run`] uses it under the hood.
pub fn wire_core(
    validator: Arc<dyn TokenValidator>,
    settings: HubSettings,
) -> (Arc<LobbyEngine>, EventHub) {
    let hub = EventHub::new(Arc::clone(&validator), settings);
    let engine = Arc::new(LobbyEngine::new(validator, Arc::new(hub.clone())));
    hub.attach_directory(engine.clone());
    (engine, hub)
}

/// Configuration for the server.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP server.
    pub http_addr: String,
    /// Session ticket expiry in seconds.
    pub session_expiry_secs: u64,
    /// Allowed CORS origins. Empty means permissive (development).
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".to_string(),
            session_expiry_secs: 3600,
            cors_origins: vec![],
        }
    }
}

/// The lobby coordination server.
pub struct LobbyServer {
    pub(crate) config: ServerConfig,
    pub(crate) jwt_secret: Vec<u8>,
    pub(crate) hub_settings: HubSettings,
}

impl LobbyServer {
    /// Create a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Run the server.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("lobby server starting on {}", self.config.http_addr);

        let sessions = Arc::new(JwtSessionValidator::new(
            &self.jwt_secret,
            self.config.session_expiry_secs,
        ));
        let validator: Arc<dyn TokenValidator> = sessions.clone();
        let (engine, hub) = wire_core(validator, self.hub_settings);

        let app_state = web::Data::new(AppState {
            engine: Arc::clone(&engine),
            sessions,
        });
        let ws_state = web::Data::new(WsState { engine, hub });

        let cors_origins = self.config.cors_origins.clone();
        let http_server = HttpServer::new(move || {
            let cors = if cors_origins.is_empty() {
                Cors::permissive()
            } else {
                let mut cors_builder = Cors::default()
                    .allowed_methods(vec!["GET", "POST", "PUT", "OPTIONS"])
                    .allowed_headers(vec!["Authorization", "Content-Type"])
                    .max_age(3600);
                for origin in &cors_origins {
                    cors_builder = cors_builder.allowed_origin(origin);
                }
                cors_builder
            };

            App::new()
                .wrap(cors)
                .app_data(app_state.clone())
                .app_data(ws_state.clone())
                .route("/session", web::post().to(rest::issue_session))
                .route(
                    "/games/{game_id}/lobbies",
                    web::post().to(rest::create_lobby),
                )
                .route(
                    "/games/{game_id}/lobbies/search",
                    web::post().to(rest::search_lobbies),
                )
                .route(
                    "/games/{game_id}/lobbies/{lobby_id}",
                    web::get().to(rest::get_lobby),
                )
                .route(
                    "/games/{game_id}/lobbies/{lobby_id}/join",
                    web::post().to(rest::join_lobby),
                )
                .route(
                    "/games/{game_id}/lobbies/{lobby_id}/leave",
                    web::post().to(rest::leave_lobby),
                )
                .route("/games/{game_id}/leave", web::post().to(rest::leave_by_token))
                .route(
                    "/games/{game_id}/lobbies/{lobby_id}/members",
                    web::get().to(rest::get_members),
                )
                .route(
                    "/games/{game_id}/lobbies/{lobby_id}/ready",
                    web::post().to(rest::set_ready),
                )
                .route(
                    "/games/{game_id}/lobbies/{lobby_id}/everyone-ready",
                    web::post().to(rest::set_everyone_ready),
                )
                .route(
                    "/games/{game_id}/lobbies/{lobby_id}/data",
                    web::put().to(rest::set_lobby_data),
                )
                .route(
                    "/games/{game_id}/lobbies/{lobby_id}/data/{key}",
                    web::get().to(rest::get_lobby_data),
                )
                .route(
                    "/games/{game_id}/lobbies/{lobby_id}/start",
                    web::post().to(rest::start_lobby),
                )
                .route("/stats/players", web::get().to(rest::global_players))
                .route("/stats/lobbies", web::get().to(rest::global_lobbies))
                .route(
                    "/stats/games/{game_id}/lobbies",
                    web::get().to(rest::lobbies_by_game),
                )
                .route(
                    "/stats/games/{game_id}/players",
                    web::get().to(rest::players_by_game),
                )
                .route(
                    "/games/{game_id}/lobbies/{lobby_id}/subscribe",
                    web::get().to(ws::subscribe_ws),
                )
        });

        http_server.bind(&self.config.http_addr)?.run().await?;

        Ok(())
    }
}
