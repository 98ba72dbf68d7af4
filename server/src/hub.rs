//! The event hub: per-lobby subscriber sets, broadcast fan-out, liveness
//! heartbeats, and coordinated teardown of idle or failed lobbies.
//!
//! The hub owns no lobby state. It reaches back into the engine through the
//! narrow [`MemberDirectory`] seam to evict members whose transport died and
//! to drain members out of lobbies it is reaping.

use crate::engine::{EventSink, MemberDirectory};
use crate::lobby::unix_now_millis;
use crate::transport::{CloseReason, EventTransport};
use crate::validator::TokenValidator;
use async_trait::async_trait;
use dashmap::DashMap;
use lobby_kit_protocol::{is_heartbeat_response, GameId, LobbyError, LobbyEvent, LobbyId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Cadence of the server-initiated heartbeat.
pub const PING_INTERVAL: Duration = Duration::from_secs(10);
/// How long subscribers get to answer a ping.
pub const PONG_TIMEOUT: Duration = Duration::from_secs(15);
/// How long a lobby may sit without subscribers before it is reaped.
pub const IDLE_REAP_DELAY: Duration = Duration::from_secs(45);

/// Heartbeat and reaping cadence. The defaults are the production values;
/// overrides exist for embedding and tests.
#[derive(Debug, Clone)]
pub struct HubSettings {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub idle_reap_delay: Duration,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            ping_interval: PING_INTERVAL,
            pong_timeout: PONG_TIMEOUT,
            idle_reap_delay: IDLE_REAP_DELAY,
        }
    }
}

pub type SubscriberId = u64;

/// A connected peer receiving events for one lobby.
pub struct Subscriber {
    pub id: SubscriberId,
    pub session_token: String,
    pub user_id: String,
    transport: Arc<dyn EventTransport>,
    /// High-water mark of the most recent heartbeat response.
    last_response: RwLock<Instant>,
}

/// Per-lobby subscriber set plus the flags guarding its background tasks.
struct LobbyChannel {
    subscribers: RwLock<HashMap<SubscriberId, Arc<Subscriber>>>,
    next_subscriber_id: AtomicU64,
    /// Set while the heartbeat loop is running; CAS-guarded so the loop is
    /// started at most once.
    heartbeat_active: AtomicBool,
    /// Set while an idle-reap timer is armed.
    idle_pending: AtomicBool,
}

impl LobbyChannel {
    fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(1),
            heartbeat_active: AtomicBool::new(false),
            idle_pending: AtomicBool::new(false),
        }
    }

    async fn snapshot(&self) -> Vec<Arc<Subscriber>> {
        self.subscribers.read().await.values().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ChannelKey {
    game_id: GameId,
    lobby_id: LobbyId,
}

struct HubInner {
    channels: DashMap<ChannelKey, Arc<LobbyChannel>>,
    /// Attached after construction to break the engine↔hub cycle.
    directory: OnceLock<Arc<dyn MemberDirectory>>,
    validator: Arc<dyn TokenValidator>,
    settings: HubSettings,
}

/// Cheaply cloneable handle; background tasks hold their own clone.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl EventHub {
    pub fn new(validator: Arc<dyn TokenValidator>, settings: HubSettings) -> Self {
        Self {
            inner: Arc::new(HubInner {
                channels: DashMap::new(),
                directory: OnceLock::new(),
                validator,
                settings,
            }),
        }
    }

    /// Wire in the engine-side eviction seam. Later calls are ignored.
    pub fn attach_directory(&self, directory: Arc<dyn MemberDirectory>) {
        let _ = self.inner.directory.set(directory);
    }

    /// Admit a subscriber. The token is validated first; a rejected token
    /// closes the transport with a policy violation.
    pub async fn subscribe(
        &self,
        game_id: &GameId,
        lobby_id: &LobbyId,
        token: &str,
        transport: Arc<dyn EventTransport>,
    ) -> Result<SubscriberId, LobbyError> {
        let identity = match self.inner.validator.validate(token).await {
            Ok(identity) => identity,
            Err(rejection) => {
                tracing::warn!(%lobby_id, "subscriber rejected: {rejection}");
                transport.close(CloseReason::PolicyViolation).await;
                return Err(rejection.into());
            }
        };

        let key = ChannelKey {
            game_id: game_id.clone(),
            lobby_id: lobby_id.clone(),
        };
        let channel = self
            .inner
            .channels
            .entry(key.clone())
            .or_insert_with(|| Arc::new(LobbyChannel::new()))
            .value()
            .clone();

        let id = channel.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        let subscriber = Arc::new(Subscriber {
            id,
            session_token: token.to_string(),
            user_id: identity.user_id.clone(),
            transport,
            last_response: RwLock::new(Instant::now()),
        });
        channel.subscribers.write().await.insert(id, subscriber);

        tracing::info!(%lobby_id, %game_id, user = %identity.user_id, "subscriber connected");
        self.ensure_heartbeat(&key, &channel);
        Ok(id)
    }

    /// Inbound text frame from a subscriber. Heartbeat responses bump the
    /// liveness mark; everything else is ignored by the core.
    pub async fn handle_frame(
        &self,
        game_id: &GameId,
        lobby_id: &LobbyId,
        subscriber_id: SubscriberId,
        frame: &str,
    ) {
        if !is_heartbeat_response(frame) {
            tracing::trace!(%lobby_id, subscriber_id, "ignoring non-heartbeat frame");
            return;
        }
        let Some(channel) = self.channel(game_id, lobby_id) else {
            return;
        };
        let subscriber = channel.subscribers.read().await.get(&subscriber_id).cloned();
        if let Some(subscriber) = subscriber {
            *subscriber.last_response.write().await = Instant::now();
        }
    }

    /// Drop a subscriber after its transport closed or errored.
    pub async fn unsubscribe(
        &self,
        game_id: &GameId,
        lobby_id: &LobbyId,
        subscriber_id: SubscriberId,
    ) {
        let key = ChannelKey {
            game_id: game_id.clone(),
            lobby_id: lobby_id.clone(),
        };
        let Some(channel) = self.inner.channels.get(&key).map(|r| Arc::clone(r.value())) else {
            return;
        };

        let removed = channel.subscribers.write().await.remove(&subscriber_id);
        let Some(subscriber) = removed else {
            return;
        };
        tracing::debug!(%lobby_id, subscriber_id, "subscriber disconnected");
        if subscriber.transport.is_open() {
            subscriber.transport.close(CloseReason::Normal).await;
        }

        if channel.subscribers.read().await.is_empty() {
            self.schedule_idle_cleanup(&key, &channel);
        }
    }

    /// Atomically drop the subscriber set, telling every remaining peer the
    /// lobby is gone.
    pub async fn close_lobby(&self, game_id: &GameId, lobby_id: &LobbyId) {
        let key = ChannelKey {
            game_id: game_id.clone(),
            lobby_id: lobby_id.clone(),
        };
        let Some((_, channel)) = self.inner.channels.remove(&key) else {
            return;
        };
        tracing::info!(%lobby_id, %game_id, "closing lobby channel");

        let farewell = LobbyEvent::LobbyDeleted {
            lobby_id: lobby_id.clone(),
            game_id: game_id.clone(),
        }
        .encode();

        let subscribers = channel.snapshot().await;
        // Emptying the set is what makes a still-running heartbeat loop
        // exit on its next pass.
        channel.subscribers.write().await.clear();

        for subscriber in subscribers {
            if subscriber.transport.is_open() {
                let _ = subscriber.transport.send_text(&farewell).await;
            }
            subscriber.transport.close(CloseReason::Normal).await;
        }
    }

    pub async fn subscriber_count(&self, game_id: &GameId, lobby_id: &LobbyId) -> usize {
        match self.channel(game_id, lobby_id) {
            Some(channel) => channel.subscribers.read().await.len(),
            None => 0,
        }
    }

    fn channel(&self, game_id: &GameId, lobby_id: &LobbyId) -> Option<Arc<LobbyChannel>> {
        let key = ChannelKey {
            game_id: game_id.clone(),
            lobby_id: lobby_id.clone(),
        };
        self.inner.channels.get(&key).map(|r| Arc::clone(r.value()))
    }

    /// Send one encoded frame to every live subscriber, pruning peers whose
    /// transport is gone. Best-effort: a subscriber added mid-iteration may
    /// miss this frame and catches the next one.
    async fn fan_out(&self, key: &ChannelKey, frame: &str) {
        let Some(channel) = self.inner.channels.get(key).map(|r| Arc::clone(r.value())) else {
            return;
        };

        let mut dead = Vec::new();
        for subscriber in channel.snapshot().await {
            if !subscriber.transport.is_open() {
                dead.push(subscriber);
                continue;
            }
            if subscriber.transport.send_text(frame).await.is_err() {
                dead.push(subscriber);
            }
        }

        for subscriber in dead {
            tracing::debug!(
                lobby_id = %key.lobby_id,
                subscriber_id = subscriber.id,
                "pruning dead transport during broadcast"
            );
            channel.subscribers.write().await.remove(&subscriber.id);
            subscriber.transport.close(CloseReason::Normal).await;
        }

        if channel.subscribers.read().await.is_empty() {
            self.schedule_idle_cleanup(key, &channel);
        } else {
            self.ensure_heartbeat(key, &channel);
        }
    }

    /// Start the per-lobby heartbeat loop if it is not already running.
    fn ensure_heartbeat(&self, key: &ChannelKey, channel: &Arc<LobbyChannel>) {
        if channel
            .heartbeat_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let hub = self.clone();
        let key = key.clone();
        let channel = Arc::clone(channel);
        tokio::spawn(async move {
            hub.run_heartbeat(key, channel).await;
        });
    }

    /// One heartbeat loop per lobby. Each cycle: ping everyone, wait out
    /// the pong window, evict non-responders, sleep the interval. The loop
    /// exits when the subscriber set empties or when nobody answered at
    /// all (total failure → force close).
    ///
    /// Responders are judged against the capture time of this round's ping,
    /// so a late answer to the previous round does not count.
    async fn run_heartbeat(&self, key: ChannelKey, channel: Arc<LobbyChannel>) {
        tracing::debug!(lobby_id = %key.lobby_id, "heartbeat loop started");
        loop {
            if channel.subscribers.read().await.is_empty() {
                break;
            }

            let ping_sent = Instant::now();
            let frame = LobbyEvent::Ping {
                ts: unix_now_millis(),
            }
            .encode();
            for subscriber in channel.snapshot().await {
                if subscriber.transport.is_open() {
                    let _ = subscriber.transport.send_text(&frame).await;
                }
            }

            tokio::time::sleep(self.inner.settings.pong_timeout).await;

            let subscribers = channel.snapshot().await;
            if subscribers.is_empty() {
                break;
            }

            let mut responders = 0usize;
            let mut silent = Vec::new();
            for subscriber in subscribers {
                if *subscriber.last_response.read().await >= ping_sent {
                    responders += 1;
                } else {
                    silent.push(subscriber);
                }
            }

            if responders == 0 {
                tracing::warn!(
                    lobby_id = %key.lobby_id,
                    game_id = %key.game_id,
                    "no subscriber answered the heartbeat, forcing close"
                );
                self.force_close_lobby(&key.game_id, &key.lobby_id).await;
                break;
            }

            for subscriber in silent {
                tracing::warn!(
                    lobby_id = %key.lobby_id,
                    user = %subscriber.user_id,
                    "evicting silent subscriber"
                );
                channel.subscribers.write().await.remove(&subscriber.id);
                subscriber.transport.close(CloseReason::PolicyViolation).await;
                if let Some(directory) = self.inner.directory.get() {
                    // A stale or revoked token failing re-validation is
                    // fine; the subscriber is already gone from the hub.
                    let _ = directory
                        .leave_lobby_by_token(&key.game_id, &subscriber.session_token)
                        .await;
                }
            }

            tokio::time::sleep(self.inner.settings.ping_interval).await;
        }

        channel.heartbeat_active.store(false, Ordering::Release);
        tracing::debug!(lobby_id = %key.lobby_id, "heartbeat loop stopped");
        // A subscriber may have slipped in while this loop was exiting.
        if !channel.subscribers.read().await.is_empty() {
            self.ensure_heartbeat(&key, &channel);
        }
    }

    /// Arm the one-shot idle reaper for a lobby whose subscriber set just
    /// emptied. Re-entrance is guarded; a subscriber arriving before expiry
    /// aborts the reap.
    fn schedule_idle_cleanup(&self, key: &ChannelKey, channel: &Arc<LobbyChannel>) {
        if channel
            .idle_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        tracing::debug!(lobby_id = %key.lobby_id, "subscriber set empty, arming idle reap");
        let hub = self.clone();
        let key = key.clone();
        let channel = Arc::clone(channel);
        tokio::spawn(async move {
            tokio::time::sleep(hub.inner.settings.idle_reap_delay).await;
            channel.idle_pending.store(false, Ordering::Release);
            if !channel.subscribers.read().await.is_empty() {
                return;
            }
            tracing::info!(lobby_id = %key.lobby_id, game_id = %key.game_id, "reaping idle lobby");
            hub.reap_lobby(&key.game_id, &key.lobby_id).await;
        });
    }

    /// Immediate teardown after total heartbeat failure.
    pub async fn force_close_lobby(&self, game_id: &GameId, lobby_id: &LobbyId) {
        self.reap_lobby(game_id, lobby_id).await;
    }

    /// Drain every member out through the engine (running its normal
    /// teardown, `lobby_empty` included), then drop hub bookkeeping.
    async fn reap_lobby(&self, game_id: &GameId, lobby_id: &LobbyId) {
        if let Some(directory) = self.inner.directory.get() {
            let members = directory.get_lobby_members(game_id, lobby_id).await;
            for member in members {
                let _ = directory
                    .leave_lobby(game_id, lobby_id, &member.session_token)
                    .await;
            }
        }
        self.close_lobby(game_id, lobby_id).await;
    }
}

#[async_trait]
impl EventSink for EventHub {
    async fn publish(&self, game_id: &GameId, lobby_id: &LobbyId, event: LobbyEvent) {
        let key = ChannelKey {
            game_id: game_id.clone(),
            lobby_id: lobby_id.clone(),
        };
        self.fan_out(&key, &event.encode()).await;
    }

    async fn close_lobby(&self, game_id: &GameId, lobby_id: &LobbyId) {
        EventHub::close_lobby(self, game_id, lobby_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::Member;
    use crate::transport::TransportError;
    use lobby_kit_protocol::{TokenIdentity, TokenRejection};
    use std::sync::Mutex as StdMutex;

    struct AnyTokenValidator;

    #[async_trait]
    impl TokenValidator for AnyTokenValidator {
        async fn validate(&self, token: &str) -> Result<TokenIdentity, TokenRejection> {
            if token.starts_with("bad") {
                return Err(TokenRejection::Invalid("bad token".into()));
            }
            Ok(TokenIdentity {
                user_id: format!("user-{token}"),
                display_name: format!("User {token}"),
            })
        }
    }

    /// Transport double recording every frame and close.
    struct MockTransport {
        open: AtomicBool,
        sent: StdMutex<Vec<String>>,
        closes: StdMutex<Vec<CloseReason>>,
    }

    impl MockTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                open: AtomicBool::new(true),
                sent: StdMutex::new(Vec::new()),
                closes: StdMutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        fn closes(&self) -> Vec<CloseReason> {
            self.closes.lock().unwrap().clone()
        }

        fn drop_connection(&self) {
            self.open.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl EventTransport for MockTransport {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        async fn send_text(&self, frame: &str) -> Result<(), TransportError> {
            if !self.is_open() {
                return Err(TransportError::Closed);
            }
            self.sent.lock().unwrap().push(frame.to_string());
            Ok(())
        }

        async fn close(&self, reason: CloseReason) {
            self.open.store(false, Ordering::SeqCst);
            self.closes.lock().unwrap().push(reason);
        }
    }

    /// Engine double recording evictions.
    #[derive(Default)]
    struct MockDirectory {
        members: StdMutex<Vec<Member>>,
        leaves: StdMutex<Vec<String>>,
        leaves_by_token: StdMutex<Vec<String>>,
    }

    impl MockDirectory {
        fn with_members(members: Vec<Member>) -> Arc<Self> {
            Arc::new(Self {
                members: StdMutex::new(members),
                ..Default::default()
            })
        }

        fn leaves(&self) -> Vec<String> {
            self.leaves.lock().unwrap().clone()
        }

        fn leaves_by_token(&self) -> Vec<String> {
            self.leaves_by_token.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MemberDirectory for MockDirectory {
        async fn leave_lobby(&self, _game_id: &GameId, _lobby_id: &LobbyId, token: &str) -> bool {
            self.leaves.lock().unwrap().push(token.to_string());
            true
        }

        async fn leave_lobby_by_token(&self, _game_id: &GameId, token: &str) -> bool {
            self.leaves_by_token.lock().unwrap().push(token.to_string());
            true
        }

        async fn get_lobby_members(&self, _game_id: &GameId, _lobby_id: &LobbyId) -> Vec<Member> {
            self.members.lock().unwrap().clone()
        }
    }

    fn member(user: &str, token: &str) -> Member {
        Member {
            user_id: user.to_string(),
            display_name: user.to_string(),
            session_token: token.to_string(),
            is_ready: false,
        }
    }

    fn hub_with(directory: Arc<MockDirectory>) -> EventHub {
        let hub = EventHub::new(Arc::new(AnyTokenValidator), HubSettings::default());
        hub.attach_directory(directory);
        hub
    }

    fn scope() -> (GameId, LobbyId) {
        (GameId::from("g1"), LobbyId::generate())
    }

    /// Answers every ping on behalf of one subscriber.
    fn auto_responder(
        hub: EventHub,
        game_id: GameId,
        lobby_id: LobbyId,
        subscriber_id: SubscriberId,
        transport: Arc<MockTransport>,
    ) {
        tokio::spawn(async move {
            let mut answered = 0;
            loop {
                let pings = transport
                    .sent()
                    .iter()
                    .filter(|f| f.contains("\"ping\""))
                    .count();
                if pings > answered {
                    answered = pings;
                    hub.handle_frame(&game_id, &lobby_id, subscriber_id, "pong")
                        .await;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        });
    }

    #[tokio::test]
    async fn rejected_tokens_close_the_transport() {
        let hub = hub_with(MockDirectory::with_members(vec![]));
        let (game, lobby) = scope();
        let transport = MockTransport::new();

        let result = hub
            .subscribe(&game, &lobby, "bad-token", transport.clone())
            .await;
        assert!(matches!(result, Err(LobbyError::Unauthorized(_))));
        assert_eq!(transport.closes(), vec![CloseReason::PolicyViolation]);
        assert_eq!(hub.subscriber_count(&game, &lobby).await, 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_live_subscribers_and_prunes_dead_ones() {
        let hub = hub_with(MockDirectory::with_members(vec![]));
        let (game, lobby) = scope();

        let alive = MockTransport::new();
        let dead = MockTransport::new();
        hub.subscribe(&game, &lobby, "t1", alive.clone()).await.unwrap();
        hub.subscribe(&game, &lobby, "t2", dead.clone()).await.unwrap();
        dead.drop_connection();

        hub.publish(
            &game,
            &lobby,
            LobbyEvent::LobbyData {
                key: "mode".into(),
                value: "ranked".into(),
            },
        )
        .await;

        assert!(alive
            .sent()
            .iter()
            .any(|f| f.contains("\"lobby_data\"") && f.contains("\"ranked\"")));
        assert_eq!(hub.subscriber_count(&game, &lobby).await, 1);
        assert_eq!(dead.closes(), vec![CloseReason::Normal]);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let hub = hub_with(MockDirectory::with_members(vec![]));
        let (game, lobby) = scope();
        hub.publish(&game, &lobby, LobbyEvent::LobbyStarted).await;
        assert_eq!(hub.subscriber_count(&game, &lobby).await, 0);
    }

    #[tokio::test]
    async fn close_lobby_broadcasts_deletion_and_closes_everyone() {
        let hub = hub_with(MockDirectory::with_members(vec![]));
        let (game, lobby) = scope();
        let t1 = MockTransport::new();
        let t2 = MockTransport::new();
        hub.subscribe(&game, &lobby, "t1", t1.clone()).await.unwrap();
        hub.subscribe(&game, &lobby, "t2", t2.clone()).await.unwrap();

        EventHub::close_lobby(&hub, &game, &lobby).await;

        for transport in [&t1, &t2] {
            assert!(transport
                .sent()
                .iter()
                .any(|f| f.contains("\"lobby_deleted\"")));
            assert_eq!(transport.closes(), vec![CloseReason::Normal]);
        }
        assert_eq!(hub.subscriber_count(&game, &lobby).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_subscriber_is_evicted_while_responders_survive() {
        let directory = MockDirectory::with_members(vec![]);
        let hub = hub_with(directory.clone());
        let (game, lobby) = scope();

        let responsive = MockTransport::new();
        let silent = MockTransport::new();
        let responsive_id = hub
            .subscribe(&game, &lobby, "alive", responsive.clone())
            .await
            .unwrap();
        hub.subscribe(&game, &lobby, "gone", silent.clone())
            .await
            .unwrap();

        auto_responder(
            hub.clone(),
            game.clone(),
            lobby.clone(),
            responsive_id,
            responsive.clone(),
        );

        // Two full heartbeat cycles are enough to classify the silent peer.
        tokio::time::sleep(Duration::from_secs(55)).await;

        assert_eq!(hub.subscriber_count(&game, &lobby).await, 1);
        assert_eq!(silent.closes(), vec![CloseReason::PolicyViolation]);
        assert_eq!(directory.leaves_by_token(), vec!["gone".to_string()]);
        assert!(responsive.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn total_silence_forces_the_lobby_closed() {
        let directory =
            MockDirectory::with_members(vec![member("u1", "t1"), member("u2", "t2")]);
        let hub = hub_with(directory.clone());
        let (game, lobby) = scope();

        let t1 = MockTransport::new();
        let t2 = MockTransport::new();
        hub.subscribe(&game, &lobby, "t1", t1.clone()).await.unwrap();
        hub.subscribe(&game, &lobby, "t2", t2.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(55)).await;

        // Every member was driven through the engine's leave.
        assert_eq!(directory.leaves(), vec!["t1".to_string(), "t2".to_string()]);
        assert_eq!(hub.subscriber_count(&game, &lobby).await, 0);
        // Transports got the farewell close.
        assert!(!t1.is_open());
        assert!(!t2.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_lobby_is_reaped_after_the_delay() {
        let directory = MockDirectory::with_members(vec![member("u1", "t1")]);
        let hub = hub_with(directory.clone());
        let (game, lobby) = scope();

        let transport = MockTransport::new();
        let id = hub
            .subscribe(&game, &lobby, "t1", transport.clone())
            .await
            .unwrap();
        hub.unsubscribe(&game, &lobby, id).await;

        // Not yet: the reaper fires at 45s.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(directory.leaves().is_empty());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(directory.leaves(), vec!["t1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn returning_subscriber_aborts_the_idle_reap() {
        let directory = MockDirectory::with_members(vec![member("u1", "t1")]);
        let hub = hub_with(directory.clone());
        let (game, lobby) = scope();

        let first = MockTransport::new();
        let id = hub.subscribe(&game, &lobby, "t1", first.clone()).await.unwrap();
        hub.unsubscribe(&game, &lobby, id).await;

        tokio::time::sleep(Duration::from_secs(20)).await;
        let second = MockTransport::new();
        let second_id = hub
            .subscribe(&game, &lobby, "t1", second.clone())
            .await
            .unwrap();
        auto_responder(hub.clone(), game.clone(), lobby.clone(), second_id, second.clone());

        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(directory.leaves().is_empty());
        assert_eq!(hub.subscriber_count(&game, &lobby).await, 1);
    }

    #[tokio::test]
    async fn non_heartbeat_frames_do_not_bump_liveness() {
        let hub = hub_with(MockDirectory::with_members(vec![]));
        let (game, lobby) = scope();
        let transport = MockTransport::new();
        let id = hub
            .subscribe(&game, &lobby, "t1", transport.clone())
            .await
            .unwrap();

        let channel = hub.channel(&game, &lobby).unwrap();
        let before = {
            let subs = channel.subscribers.read().await;
            let guard = subs.get(&id).unwrap().last_response.read().await;
            *guard
        };

        hub.handle_frame(&game, &lobby, id, r#"{"type":"chat","text":"hi"}"#)
            .await;
        let after_chat = {
            let subs = channel.subscribers.read().await;
            let guard = subs.get(&id).unwrap().last_response.read().await;
            *guard
        };
        assert_eq!(before, after_chat);

        hub.handle_frame(&game, &lobby, id, "heartbeat").await;
        let after_heartbeat = {
            let subs = channel.subscribers.read().await;
            let guard = subs.get(&id).unwrap().last_response.read().await;
            *guard
        };
        assert!(after_heartbeat >= before);
    }
}
