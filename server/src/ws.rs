//! WebSocket subscriber surface.
//!
//! Each connection is one subscriber on one lobby's event channel. The
//! actor forwards inbound text frames to the hub (heartbeat responses) and
//! plays outbound frames from the hub onto the socket. Liveness is handled
//! entirely by the hub's application-level heartbeat; the actor only
//! answers WebSocket protocol pings as a courtesy.

use crate::engine::LobbyEngine;
use crate::hub::{EventHub, SubscriberId};
use crate::transport::{CloseReason, EventTransport, TransportError};
use actix::{Actor, ActorContext, Addr, AsyncContext, Handler, Message, StreamHandler};
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use async_trait::async_trait;
use lobby_kit_protocol::{GameId, LobbyId};
use std::sync::Arc;

/// Shared state for the WebSocket handlers.
pub struct WsState {
    pub engine: Arc<LobbyEngine>,
    pub hub: EventHub,
}

/// Outbound frame from the hub to this socket.
#[derive(Message)]
#[rtype(result = "()")]
struct OutboundFrame(String);

/// Close command from the hub.
#[derive(Message)]
#[rtype(result = "()")]
struct CloseSession(CloseReason);

/// Subscriber id assigned once hub admission completes.
#[derive(Message)]
#[rtype(result = "()")]
struct Subscribed(SubscriberId);

/// The hub's view of one WebSocket peer.
struct WsTransport {
    addr: Addr<SubscriberWs>,
}

#[async_trait]
impl EventTransport for WsTransport {
    fn is_open(&self) -> bool {
        self.addr.connected()
    }

    async fn send_text(&self, frame: &str) -> Result<(), TransportError> {
        self.addr
            .try_send(OutboundFrame(frame.to_string()))
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&self, reason: CloseReason) {
        self.addr.do_send(CloseSession(reason));
    }
}

/// WebSocket actor for a lobby subscription.
pub struct SubscriberWs {
    game_id: GameId,
    lobby_id: LobbyId,
    token: String,
    hub: EventHub,
    subscriber_id: Option<SubscriberId>,
}

impl SubscriberWs {
    fn new(game_id: GameId, lobby_id: LobbyId, token: String, hub: EventHub) -> Self {
        Self {
            game_id,
            lobby_id,
            token,
            hub,
            subscriber_id: None,
        }
    }
}

impl Actor for SubscriberWs {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let addr = ctx.address();
        let hub = self.hub.clone();
        let game_id = self.game_id.clone();
        let lobby_id = self.lobby_id.clone();
        let token = self.token.clone();

        actix::spawn(async move {
            let transport = Arc::new(WsTransport { addr: addr.clone() });
            match hub.subscribe(&game_id, &lobby_id, &token, transport).await {
                Ok(id) => {
                    let _ = addr.try_send(Subscribed(id));
                }
                Err(e) => {
                    // The hub already closed the transport with a policy
                    // violation; this is just for the log.
                    tracing::debug!(%lobby_id, "subscription refused: {e}");
                }
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(id) = self.subscriber_id.take() {
            let hub = self.hub.clone();
            let game_id = self.game_id.clone();
            let lobby_id = self.lobby_id.clone();
            actix::spawn(async move {
                hub.unsubscribe(&game_id, &lobby_id, id).await;
            });
        }
    }
}

impl Handler<OutboundFrame> for SubscriberWs {
    type Result = ();

    fn handle(&mut self, msg: OutboundFrame, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl Handler<CloseSession> for SubscriberWs {
    type Result = ();

    fn handle(&mut self, msg: CloseSession, ctx: &mut Self::Context) {
        let code = match msg.0 {
            CloseReason::Normal => ws::CloseCode::Normal,
            CloseReason::PolicyViolation => ws::CloseCode::Policy,
        };
        ctx.close(Some(code.into()));
        ctx.stop();
    }
}

impl Handler<Subscribed> for SubscriberWs {
    type Result = ();

    fn handle(&mut self, msg: Subscribed, _ctx: &mut Self::Context) {
        self.subscriber_id = Some(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for SubscriberWs {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                if let Some(id) = self.subscriber_id {
                    let hub = self.hub.clone();
                    let game_id = self.game_id.clone();
                    let lobby_id = self.lobby_id.clone();
                    actix::spawn(async move {
                        hub.handle_frame(&game_id, &lobby_id, id, &text).await;
                    });
                }
            }
            Ok(ws::Message::Ping(payload)) => {
                ctx.pong(&payload);
            }
            Ok(ws::Message::Pong(_)) => {
                // Protocol-level pongs are not heartbeat responses; the
                // subscriber protocol is text frames only.
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::debug!(lobby_id = %self.lobby_id, "subscriber closed: {reason:?}");
                ctx.stop();
            }
            Err(e) => {
                tracing::debug!(lobby_id = %self.lobby_id, "subscriber protocol error: {e}");
                ctx.stop();
            }
            _ => (),
        }
    }
}

#[derive(serde::Deserialize)]
pub struct SubscribeQuery {
    pub token: String,
}

/// HTTP handler upgrading to a lobby event subscription.
pub async fn subscribe_ws(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<(String, String)>,
    query: web::Query<SubscribeQuery>,
    state: web::Data<WsState>,
) -> Result<HttpResponse, actix_web::Error> {
    let (game_id, lobby_id) = path.into_inner();
    let game_id = GameId(game_id);
    let lobby_id = LobbyId(lobby_id);

    if !state.engine.lobby_exists(&game_id, &lobby_id) {
        return Err(actix_web::error::ErrorNotFound("lobby not found"));
    }

    tracing::info!(%lobby_id, %game_id, "websocket subscription requested");

    let actor = SubscriberWs::new(game_id, lobby_id, query.token.clone(), state.hub.clone());
    ws::start(actor, &req, stream)
}
