//! Standalone lobby coordination server.
//!
//! Run with: cargo run --bin lobby-server
//!
//! `LOBBY_HTTP_ADDR` and `LOBBY_JWT_SECRET` override the dev defaults.

use lobby_kit_server::LobbyServer;
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let http_addr =
        std::env::var("LOBBY_HTTP_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let jwt_secret = std::env::var("LOBBY_JWT_SECRET")
        .unwrap_or_else(|_| "super-secret-key-for-dev-only".to_string());

    println!("Starting lobby server...");
    println!("  HTTP: http://{http_addr}");
    println!("  WS:   ws://{http_addr}/games/{{game}}/lobbies/{{id}}/subscribe?token=...");
    println!();
    println!("Endpoints:");
    println!("  POST /session                                   - Get session ticket");
    println!("  POST /games/{{game}}/lobbies                      - Create lobby");
    println!("  POST /games/{{game}}/lobbies/search               - Search lobbies");
    println!("  POST /games/{{game}}/lobbies/{{id}}/join            - Join");
    println!("  POST /games/{{game}}/lobbies/{{id}}/leave           - Leave");
    println!("  POST /games/{{game}}/lobbies/{{id}}/start           - Start (owner)");
    println!("  GET  /stats/players, /stats/lobbies             - Counters");
    println!();

    let server = LobbyServer::builder()
        .http_addr(http_addr)
        .jwt_secret(jwt_secret.into_bytes())
        .build()?;

    server.run().await?;

    Ok(())
}
