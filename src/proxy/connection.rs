//! Connection module
//!
//! One connection aggregates the upstream server link, the world mirror,
//! the walk state, and the ordered list of attached clients. The
//! connection runs as a single task; every packet from either side passes
//! through it in arrival order, which is what keeps the mirror, the walk
//! queue, and the fan-out coherent without locks.
//!
//! Lifecycle: created when the first client finishes its account login,
//! torn down when the last client detaches with auto-reconnect and
//! background mode both off, or on a fatal upstream error.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::ProxyConfig;
use crate::error::{Result, UogateError};
use crate::protocol::codec::{ids, Frame};
use crate::protocol::packets::{
    client_version_string, unicode_speech_text, AccountLogin, CharacterList, ContainerContent,
    ContainerOpen, ContainerUpdate, Equip, GameLogin, MobileIncoming, MobileMoving, MobileStatus,
    MobileUpdate, PlayCharacter, Relay, Remove, ServerSelect, SpeakAscii, Start, Walk, WalkAck,
    WalkCancel, WirePacket, WorldItem, WorldItem7, ZoneChange,
};
use crate::protocol::{translate, ProtocolVersion};
use crate::proxy::attached::AttachedClient;
use crate::proxy::registry::{ConnectionHandle, ConnectionRegistry};
use crate::proxy::replay::build_replay;
use crate::proxy::upstream::UpstreamLink;
use crate::proxy::walk::{ClientId, WalkAckAction, WalkCancelAction, WalkRequest, WalkState};
use crate::world::WorldMirror;

/// Initial delay before the first reconnect attempt
pub const RECONNECT_DELAY_INITIAL: Duration = Duration::from_secs(5);

/// Upper bound on the reconnect delay
pub const RECONNECT_DELAY_MAX: Duration = Duration::from_secs(30);

/// Time budget for one automatic re-login attempt
const RELOGIN_TIMEOUT: Duration = Duration::from_secs(20);

/// Depth of the connection's event channel
const EVENT_QUEUE: usize = 256;

/// Name the console helper speaks under
const CONSOLE_NAME: &str = "uogate";

/// Events feeding a connection task
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A framed packet from an attached client
    ClientPacket {
        /// Originating client
        client: ClientId,
        /// The packet
        frame: Frame,
    },
    /// An attached client's socket closed
    ClientClosed {
        /// The client that went away
        client: ClientId,
    },
    /// A fresh game socket routed to this session by the registry
    Attach {
        /// The accepted socket
        stream: TcpStream,
        /// Peer address
        address: SocketAddr,
        /// The game login it presented
        login: GameLogin,
        /// Bytes the handshake already pulled off the socket
        leftover: bytes::BytesMut,
    },
}

/// Phase of the upstream session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    /// Relaying the login-server dance for the first client
    LoginRelay,
    /// Relay rewritten; waiting for the client's game socket
    AwaitingGame,
    /// Relaying the game handshake (character list, select)
    GameRelay,
    /// Fully in game; the mirror is live
    InGame,
    /// Upstream lost; retry timer running
    Reconnecting,
}

/// Everything needed to repeat the login without a client
#[derive(Debug, Clone)]
struct LoginIdentity {
    username: String,
    password: String,
    server_index: u16,
    character_index: u32,
    character_name: String,
    seed: u32,
}

/// One proxied game session
pub struct Connection {
    id: u64,
    config: Arc<ProxyConfig>,
    registry: Arc<ConnectionRegistry>,
    handle: Arc<ConnectionHandle>,
    world: WorldMirror,
    walk: WalkState,
    clients: Vec<AttachedClient>,
    events_tx: mpsc::Sender<ConnectionEvent>,
    events_rx: mpsc::Receiver<ConnectionEvent>,
    upstream: Option<UpstreamLink>,
    phase: SessionPhase,
    login: LoginIdentity,
    client_version: Option<String>,
    /// Server handshake frames cached for attach handshakes
    supported_features: Option<Frame>,
    character_list: Option<Frame>,
    /// Real game server address learned from the relay
    game_address_stored: Option<SocketAddr>,
    next_client_id: ClientId,
    reconnect_delay: Duration,
    reconnect_at: Option<Instant>,
    /// Answer the next character list ourselves (automatic re-login)
    auto_select_character: bool,
    /// Fatal upstream error with auto-reconnect off
    doomed: bool,
}

impl Connection {
    /// Create a connection for a freshly logged-in client and spawn its
    /// task
    pub fn spawn(
        config: Arc<ProxyConfig>,
        registry: Arc<ConnectionRegistry>,
        stream: TcpStream,
        address: SocketAddr,
        login: AccountLogin,
        seed: u32,
        leftover: bytes::BytesMut,
    ) -> Arc<ConnectionHandle> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let id = registry.next_id();
        let handle = registry.register(
            id,
            login.username.clone(),
            login.password.clone(),
            events_tx.clone(),
        );

        let (server_index, character_index) = config
            .login
            .as_ref()
            .map(|l| (l.server_index, l.character_index))
            .unwrap_or((0, 0));

        let mut connection = Self {
            id,
            registry,
            handle: handle.clone(),
            world: WorldMirror::new(),
            walk: WalkState::new(),
            clients: Vec::new(),
            events_tx: events_tx.clone(),
            events_rx,
            upstream: None,
            phase: SessionPhase::LoginRelay,
            login: LoginIdentity {
                username: login.username.clone(),
                password: login.password.clone(),
                server_index,
                character_index,
                character_name: String::new(),
                seed,
            },
            client_version: Some(config.client_version.clone()),
            supported_features: None,
            character_list: None,
            game_address_stored: None,
            next_client_id: 1,
            reconnect_delay: RECONNECT_DELAY_INITIAL,
            reconnect_at: None,
            auto_select_character: false,
            doomed: false,
            config,
        };

        let first = AttachedClient::spawn(
            connection.alloc_client_id(),
            stream,
            address,
            ProtocolVersion::from_client_version(&connection.config.client_version),
            leftover,
            events_tx,
        );
        connection.clients.push(first);

        tokio::spawn(async move {
            connection.run(login).await;
        });

        handle
    }

    fn alloc_client_id(&mut self) -> ClientId {
        let id = self.next_client_id;
        self.next_client_id += 1;
        id
    }

    fn in_game(&self) -> bool {
        self.phase == SessionPhase::InGame
    }

    /// Main task loop
    async fn run(mut self, login: AccountLogin) {
        info!(
            connection = self.id,
            username = %self.login.username,
            server = %self.config.server_address,
            "starting session"
        );

        // Dial the login server and relay the account login
        match UpstreamLink::connect(self.config.server_addr(), self.login.seed).await {
            Ok(mut link) => {
                if let Err(e) = link.send(&login.to_frame()).await {
                    warn!(connection = self.id, error = %e, "failed to relay account login");
                }
                self.upstream = Some(link);
            }
            Err(e) => {
                warn!(connection = self.id, error = %e, "cannot reach login server");
                self.speak_console("uogate: cannot reach the game server");
                self.registry.unregister(self.id);
                return;
            }
        }

        loop {
            let reconnect_at = self
                .reconnect_at
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            let channel_closed = tokio::select! {
                event = self.events_rx.recv() => match event {
                    Some(event) => {
                        self.handle_event(event).await;
                        false
                    }
                    None => true,
                },
                result = Self::upstream_frame(&mut self.upstream) => {
                    match result {
                        Ok(frame) => self.handle_server_frame(frame).await,
                        Err(e) => self.handle_upstream_loss(&e),
                    }
                    false
                },
                _ = sleep_until(reconnect_at), if self.reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    self.try_relogin().await;
                    false
                }
            };

            if channel_closed || self.should_teardown() {
                break;
            }
        }

        info!(connection = self.id, "session torn down");
        self.registry.unregister(self.id);
    }

    /// Next frame from the upstream link, pending forever while there is
    /// none
    async fn upstream_frame(upstream: &mut Option<UpstreamLink>) -> Result<Frame> {
        match upstream {
            Some(link) => link.next_frame().await,
            None => std::future::pending().await,
        }
    }

    fn should_teardown(&self) -> bool {
        self.doomed
            || (self.clients.is_empty() && !self.config.autoreconnect && !self.config.background)
    }

    // ============ Event handling ============

    async fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::ClientPacket { client, frame } => {
                self.handle_client_frame(client, frame).await;
            }
            ConnectionEvent::ClientClosed { client } => self.detach(client),
            ConnectionEvent::Attach {
                stream,
                address,
                login,
                leftover,
            } => self.handle_attach(stream, address, login, leftover).await,
        }
    }

    /// Bind a routed game socket to this session
    async fn handle_attach(
        &mut self,
        stream: TcpStream,
        address: SocketAddr,
        login: GameLogin,
        leftover: bytes::BytesMut,
    ) {
        let dialect = self
            .client_version
            .as_deref()
            .map(ProtocolVersion::from_client_version)
            .unwrap_or_default();
        let id = self.alloc_client_id();
        let mut client = AttachedClient::spawn(
            id,
            stream,
            address,
            dialect,
            leftover,
            self.events_tx.clone(),
        );

        if self.phase == SessionPhase::AwaitingGame {
            // The first client coming back through the rewritten relay;
            // open the real game link and relay its login.
            info!(connection = self.id, client = id, "client returned for game phase");
            match self.connect_game_server(login).await {
                Ok(()) => self.phase = SessionPhase::GameRelay,
                Err(e) => {
                    warn!(connection = self.id, error = %e, "cannot reach game server");
                    client.zombify();
                }
            }
            self.clients.push(client);
            return;
        }

        // A client attaching to a running session: answer the game
        // handshake from the caches, then replay once it selects a
        // character.
        info!(connection = self.id, client = id, address = %address, "client attaching");
        if let Some(features) = self.supported_features.clone() {
            client.send(&features);
        }
        let list = self
            .character_list
            .clone()
            .unwrap_or_else(|| self.synthesized_character_list());
        client.send(&list);
        client.pending_play = true;
        self.clients.push(client);
    }

    /// Dial the game server recorded from the relay and forward the login
    async fn connect_game_server(&mut self, login: GameLogin) -> Result<()> {
        let address = self.game_address()?;
        let mut link = UpstreamLink::connect(address, login.auth_id).await?;
        link.send(&login.to_frame()).await?;
        self.upstream = Some(link);
        Ok(())
    }

    fn game_address(&self) -> Result<SocketAddr> {
        self.game_address_stored
            .ok_or_else(|| UogateError::Internal("no game server address recorded".into()))
    }

    /// Character list shown to attaching clients when the real one was
    /// never observed; clients expect at least five slots
    fn synthesized_character_list(&self) -> Frame {
        let mut names = vec![self.login.character_name.clone()];
        names.resize(5, String::new());
        CharacterList { names, flags: 0x14 }.to_frame()
    }

    // ============ Client-origin packets ============

    async fn handle_client_frame(&mut self, client_id: ClientId, frame: Frame) {
        let Some(index) = self.clients.iter().position(|c| c.id == client_id) else {
            return;
        };
        if self.clients[index].is_zombie() {
            return;
        }

        match frame.id {
            ids::WALK if self.in_game() => {
                let Ok(packet) = Walk::parse(&frame) else {
                    return;
                };
                match self.walk.request(client_id, packet, &self.world) {
                    WalkRequest::Forward(out) => self.forward_upstream(&out.to_frame()).await,
                    WalkRequest::Reject(cancel) => {
                        self.clients[index].send_raw(cancel.to_frame());
                    }
                }
            }
            ids::PLAY_CHARACTER => {
                if self.clients[index].pending_play {
                    // An attach handshake completing: replay the world
                    // instead of disturbing the live session upstream.
                    self.clients[index].pending_play = false;
                    let frames = build_replay(&self.world);
                    info!(
                        connection = self.id,
                        client = client_id,
                        frames = frames.len(),
                        "replaying world to attached client"
                    );
                    for frame in &frames {
                        self.clients[index].send(frame);
                    }
                    self.broadcast_except(
                        &console_frame("uogate: another client attached to this session"),
                        client_id,
                    );
                    return;
                }
                if let Ok(packet) = PlayCharacter::parse(&frame) {
                    self.login.character_index = packet.slot;
                    self.login.character_name = packet.name;
                }
                self.forward_upstream(&frame).await;
            }
            ids::CLIENT_VERSION => {
                if let Some(version) = client_version_string(&frame) {
                    debug!(connection = self.id, client = client_id, version = %version, "client version");
                    let dialect = ProtocolVersion::from_client_version(&version);
                    self.clients[index].dialect = dialect;
                    // The server talks the same dialect back; the widened
                    // fixed packets must be framed accordingly.
                    if let Some(link) = self.upstream.as_mut() {
                        link.set_protocol(dialect);
                    }
                    self.client_version = Some(version);
                }
                self.forward_upstream(&frame).await;
            }
            ids::SPEAK_ASCII => {
                if let Ok(packet) = SpeakAscii::parse(&frame) {
                    if let Some(command) = packet.text.strip_prefix('%') {
                        let command = command.to_string();
                        self.handle_command(client_id, &command).await;
                        return;
                    }
                }
                self.forward_upstream(&frame).await;
            }
            ids::SPEAK_UNICODE_REQUEST => {
                if let Some(text) = unicode_speech_text(&frame) {
                    if let Some(command) = text.strip_prefix('%') {
                        let command = command.to_string();
                        self.handle_command(client_id, &command).await;
                        return;
                    }
                }
                self.forward_upstream(&frame).await;
            }
            _ => self.forward_upstream(&frame).await,
        }
    }

    async fn forward_upstream(&mut self, frame: &Frame) {
        let Some(link) = self.upstream.as_mut() else {
            debug!(
                connection = self.id,
                packet = format_args!("{:#04x}", frame.id),
                "dropping client packet, no upstream"
            );
            return;
        };
        if let Err(e) = link.send(frame).await {
            self.handle_upstream_loss(&e);
        }
    }

    /// In-band proxy commands spoken as `%command`
    async fn handle_command(&mut self, client_id: ClientId, command: &str) {
        debug!(connection = self.id, client = client_id, command = %command, "console command");
        match command.trim() {
            "help" => {
                self.speak_console_to(client_id, "uogate commands: %help %clients %reconnect");
            }
            "clients" => {
                let line = format!(
                    "uogate: {} client(s) attached",
                    self.clients.iter().filter(|c| !c.is_zombie()).count()
                );
                self.speak_console_to(client_id, &line);
            }
            "reconnect" => {
                if !self.config.autoreconnect {
                    self.speak_console_to(client_id, "uogate: autoreconnect is disabled");
                    return;
                }
                self.speak_console_to(client_id, "uogate: dropping upstream link");
                self.upstream = None;
                self.begin_reconnect();
            }
            _ => {
                self.speak_console_to(client_id, "uogate: unknown command, try %help");
            }
        }
    }

    // ============ Server-origin packets ============

    async fn handle_server_frame(&mut self, frame: Frame) {
        match self.phase {
            SessionPhase::LoginRelay => self.handle_login_frame(frame).await,
            SessionPhase::GameRelay => self.handle_game_relay_frame(frame).await,
            SessionPhase::InGame => self.handle_in_game_frame(frame).await,
            SessionPhase::AwaitingGame | SessionPhase::Reconnecting => {
                debug!(
                    connection = self.id,
                    packet = format_args!("{:#04x}", frame.id),
                    "server frame outside a relay phase"
                );
            }
        }
    }

    async fn handle_login_frame(&mut self, frame: Frame) {
        match frame.id {
            ids::RELAY => {
                let Ok(relay) = Relay::parse(&frame) else {
                    warn!(connection = self.id, "malformed relay packet");
                    return;
                };
                let game_address = SocketAddr::new(IpAddr::from(relay.ip), relay.port);
                self.game_address_stored = Some(game_address);
                self.handle.set_auth_id(relay.auth_id);
                info!(
                    connection = self.id,
                    game_server = %game_address,
                    "relay received, rewriting to proxy"
                );

                // Point the client back at us; it will drop this socket
                // and present the auth id on a fresh one.
                let rewritten = rewrite_relay(&relay, self.config.bind_addr());
                self.broadcast_raw(&rewritten.to_frame());
                self.phase = SessionPhase::AwaitingGame;
                // The login server closes after the relay; that is not a
                // connection loss.
                self.upstream = None;
            }
            _ => self.broadcast(&frame),
        }
    }

    async fn handle_game_relay_frame(&mut self, frame: Frame) {
        match frame.id {
            ids::SUPPORTED_FEATURES => {
                self.supported_features = Some(frame.clone());
                if !self.auto_select_character {
                    self.broadcast(&frame);
                }
            }
            ids::CHARACTER_LIST => {
                self.character_list = Some(frame.clone());
                if self.auto_select_character {
                    // Automatic re-login: answer the list ourselves
                    self.auto_select_character = false;
                    let play = PlayCharacter {
                        name: self.login.character_name.clone(),
                        client_flags: 0,
                        slot: self.login.character_index,
                        client_ip: 0,
                    };
                    info!(
                        connection = self.id,
                        slot = play.slot,
                        "selecting character after re-login"
                    );
                    self.forward_upstream(&play.to_frame()).await;
                } else {
                    self.broadcast(&frame);
                }
            }
            ids::START => {
                let Ok(start) = Start::parse(&frame) else {
                    warn!(connection = self.id, "malformed start packet");
                    return;
                };
                self.world.start(&start);
                self.phase = SessionPhase::InGame;
                info!(
                    connection = self.id,
                    serial = format_args!("{:#010x}", start.serial),
                    "session in game"
                );
                self.broadcast(&frame);
            }
            _ => self.broadcast(&frame),
        }
    }

    async fn handle_in_game_frame(&mut self, frame: Frame) {
        match frame.id {
            ids::WORLD_ITEM => {
                let Ok(packet) = WorldItem::parse(&frame) else {
                    warn!(connection = self.id, "malformed ground item dropped");
                    return;
                };
                self.world.world_item(&packet);
                let upgraded = translate::world_item_to_7(&packet).to_frame();
                self.broadcast_divert(&frame, &upgraded, ProtocolVersion::V7);
            }
            ids::WORLD_ITEM_7 => {
                let Ok(packet) = WorldItem7::parse(&frame) else {
                    warn!(connection = self.id, "malformed ground item dropped");
                    return;
                };
                self.world.world_item_7(&packet);
                self.broadcast(&frame);
            }
            ids::EQUIP => {
                let Ok(packet) = Equip::parse(&frame) else {
                    return;
                };
                self.world.equip(&packet);
                self.broadcast(&frame);
            }
            ids::CONTAINER_OPEN => {
                let Ok(packet) = ContainerOpen::parse(&frame) else {
                    return;
                };
                self.world.container_open(&packet);
                self.broadcast(&frame);
            }
            ids::CONTAINER_UPDATE => {
                let Ok(packet) = ContainerUpdate::parse(&frame) else {
                    return;
                };
                self.world.container_update(&packet);
                self.broadcast(&frame);
            }
            ids::CONTAINER_CONTENT => {
                let Ok(packet) = ContainerContent::parse(&frame) else {
                    warn!(connection = self.id, "malformed container content dropped");
                    return;
                };
                self.world.container_content(&packet);
                self.broadcast(&frame);
            }
            ids::MOBILE_INCOMING => {
                let Ok(packet) = MobileIncoming::parse(&frame) else {
                    warn!(connection = self.id, "malformed mobile incoming dropped");
                    return;
                };
                self.world.mobile_incoming(&packet);
                self.broadcast(&frame);
            }
            ids::MOBILE_STATUS => {
                let Ok(packet) = MobileStatus::parse(&frame) else {
                    return;
                };
                self.world.mobile_status(&packet);
                self.broadcast(&frame);
            }
            ids::MOBILE_UPDATE => {
                let Ok(packet) = MobileUpdate::parse(&frame) else {
                    return;
                };
                self.world.mobile_update(&packet);
                self.broadcast(&frame);
            }
            ids::MOBILE_MOVING => {
                let Ok(packet) = MobileMoving::parse(&frame) else {
                    return;
                };
                self.world.mobile_moving(&packet);
                self.broadcast(&frame);
            }
            ids::ZONE_CHANGE => {
                let Ok(packet) = ZoneChange::parse(&frame) else {
                    return;
                };
                self.world.zone_change(&packet);
                self.broadcast(&frame);
            }
            ids::REMOVE => {
                let Ok(packet) = Remove::parse(&frame) else {
                    return;
                };
                self.world.remove_serial(packet.serial);
                self.broadcast(&frame);
            }
            ids::WALK_ACK => {
                let Ok(packet) = WalkAck::parse(&frame) else {
                    return;
                };
                match self.walk.ack(&packet, &mut self.world) {
                    WalkAckAction::Deliver { client, packet } => {
                        self.send_to(client, &packet.to_frame());
                    }
                    WalkAckAction::PassThrough => self.broadcast(&frame),
                }
            }
            ids::WALK_CANCEL => {
                let Ok(packet) = WalkCancel::parse(&frame) else {
                    return;
                };
                match self.walk.cancel(&packet, &mut self.world) {
                    WalkCancelAction::Deliver { client, packet } => {
                        self.send_to(client, &packet.to_frame());
                    }
                    WalkCancelAction::PassThrough => self.broadcast(&frame),
                }
            }
            ids::START => {
                if let Ok(start) = Start::parse(&frame) {
                    self.world.start(&start);
                }
                self.broadcast(&frame);
            }
            _ => {
                self.world.cache_player_frame(&frame);
                self.broadcast(&frame);
            }
        }
    }

    // ============ Fan-out ============

    /// Send to every routable client, translating per dialect
    fn broadcast(&mut self, frame: &Frame) {
        for client in &mut self.clients {
            client.send(frame);
        }
    }

    /// Send to every routable client without translation
    fn broadcast_raw(&mut self, frame: &Frame) {
        for client in &mut self.clients {
            client.send_raw(frame.clone());
        }
    }

    /// Send to every routable client except one
    fn broadcast_except(&mut self, frame: &Frame, except: ClientId) {
        for client in &mut self.clients {
            if client.id != except {
                client.send(frame);
            }
        }
    }

    /// Send `new` to clients speaking `new_protocol`, `old` to the rest
    fn broadcast_divert(&mut self, old: &Frame, new: &Frame, new_protocol: ProtocolVersion) {
        for client in &mut self.clients {
            if client.dialect == new_protocol {
                client.send_raw(new.clone());
            } else {
                client.send_raw(old.clone());
            }
        }
    }

    fn send_to(&mut self, client_id: ClientId, frame: &Frame) {
        if let Some(client) = self.clients.iter_mut().find(|c| c.id == client_id) {
            client.send(frame);
        }
    }

    /// Speak a console line to every attached client
    fn speak_console(&mut self, text: &str) {
        let frame = console_frame(text);
        self.broadcast_raw(&frame);
    }

    /// Speak a console line to one client
    fn speak_console_to(&mut self, client_id: ClientId, text: &str) {
        if let Some(client) = self.clients.iter_mut().find(|c| c.id == client_id) {
            client.send_raw(console_frame(text));
        }
    }

    // ============ Detach and teardown ============

    fn detach(&mut self, client_id: ClientId) {
        if let Some(index) = self.clients.iter().position(|c| c.id == client_id) {
            let client = self.clients.remove(index);
            info!(
                connection = self.id,
                client = client_id,
                address = %client.address,
                remaining = self.clients.len(),
                "client detached"
            );
        }
        self.walk.client_removed(client_id);
    }

    // ============ Reconnect ============

    /// Upstream link failed; reconnect or mark the connection doomed
    fn handle_upstream_loss(&mut self, error: &UogateError) {
        warn!(connection = self.id, error = %error, "upstream link lost");
        self.upstream = None;
        if self.config.autoreconnect {
            self.begin_reconnect();
        } else {
            self.doomed = true;
        }
    }

    /// Enter the reconnecting phase
    fn begin_reconnect(&mut self) {
        // The next session starts from scratch on both axes
        self.world.clear();
        self.walk = WalkState::new();
        self.phase = SessionPhase::Reconnecting;
        self.speak_console("uogate: connection to server lost, reconnecting...");
        self.reconnect_at = Some(Instant::now() + self.reconnect_delay);
        info!(
            connection = self.id,
            delay_secs = self.reconnect_delay.as_secs(),
            "reconnect scheduled"
        );
    }

    /// One automatic re-login attempt
    async fn try_relogin(&mut self) {
        info!(connection = self.id, username = %self.login.username, "re-login attempt");

        match timeout(RELOGIN_TIMEOUT, self.relogin_once()).await {
            Ok(Ok(link)) => {
                self.upstream = Some(link);
                self.phase = SessionPhase::GameRelay;
                self.auto_select_character = true;
                self.reconnect_delay = RECONNECT_DELAY_INITIAL;
                self.speak_console("uogate: reconnected, restoring session...");
            }
            Ok(Err(e)) => {
                warn!(connection = self.id, error = %e, "re-login failed");
                self.schedule_retry();
            }
            Err(_) => {
                warn!(connection = self.id, "re-login timed out");
                self.schedule_retry();
            }
        }
    }

    fn schedule_retry(&mut self) {
        self.reconnect_delay = (self.reconnect_delay * 2).min(RECONNECT_DELAY_MAX);
        self.reconnect_at = Some(Instant::now() + self.reconnect_delay);
    }

    /// Run the login dance without a client: account login, server
    /// select, relay, game login
    async fn relogin_once(&mut self) -> Result<UpstreamLink> {
        let mut link = UpstreamLink::connect(self.config.server_addr(), self.login.seed).await?;
        link.send(
            &AccountLogin {
                username: self.login.username.clone(),
                password: self.login.password.clone(),
            }
            .to_frame(),
        )
        .await?;

        loop {
            let frame = link.next_frame().await?;
            match frame.id {
                ids::SERVER_LIST => {
                    link.send(
                        &ServerSelect {
                            index: self.login.server_index,
                        }
                        .to_frame(),
                    )
                    .await?;
                }
                ids::RELAY => {
                    let relay = Relay::parse(&frame)?;
                    let address = SocketAddr::new(IpAddr::from(relay.ip), relay.port);
                    self.game_address_stored = Some(address);
                    self.handle.set_auth_id(relay.auth_id);

                    let mut game = UpstreamLink::connect(address, relay.auth_id).await?;
                    game.send(
                        &GameLogin {
                            auth_id: relay.auth_id,
                            username: self.login.username.clone(),
                            password: self.login.password.clone(),
                        }
                        .to_frame(),
                    )
                    .await?;
                    return Ok(game);
                }
                0x82 => {
                    return Err(UogateError::Internal(format!(
                        "login rejected, code {:#04x}",
                        frame.data.get(1).copied().unwrap_or(0)
                    )));
                }
                _ => {}
            }
        }
    }
}

/// Rewrite a relay packet to point back at the proxy
///
/// An unspecified bind address cannot be handed to a client; loopback is
/// the only safe fallback.
fn rewrite_relay(relay: &Relay, bind: SocketAddr) -> Relay {
    let ip = match bind.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => ip,
        _ => Ipv4Addr::LOCALHOST,
    };
    Relay {
        ip: ip.octets(),
        port: bind.port(),
        auth_id: relay.auth_id,
    }
}

/// The console-speak helper: system text from the proxy itself
fn console_frame(text: &str) -> Frame {
    SpeakAscii {
        serial: 0xffff_ffff,
        graphic: 0xffff,
        speech_type: 1,
        hue: 0x35,
        font: 3,
        name: CONSOLE_NAME.to_string(),
        text: text.to_string(),
    }
    .to_frame()
}
