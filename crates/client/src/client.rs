use std::net::SocketAddr;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::Context;

use fray::net::PROTOCOL_VERSION;
use fray::{
    AckTracker, ApplyContext, Buttons, Channel, ChatRecipient, ClientInfo, ClientRegistry,
    DeltaBuffer, DemoHeader, DemoReader, DemoRecorder, DemoSide, DisconnectReason, FloorStatus,
    GameSettings, InfoPayload, MAX_CHAT_LEN, Message, NUM_WEAPONS, NetEvent, NetworkEndpoint,
    Notifier, NotifyTarget, PacketBody, PacketHeader, PlayerCommand, PlayerInfoUpdate,
    ReceiveTracker, RequestKind, Role, Simulation, SyncValue, TeamColor, apply_game_state,
    apply_player_info, build_array_info, build_scalar_info, build_string_info, encode_text,
    extract_text, record_inbound, reset_life,
};

use crate::buffer::PacketBuffer;
use crate::config::ClientConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Connected, waiting for the full game-state transfer.
    AwaitingGameState,
    /// Snapshot applied; deltas stream normally.
    Active,
}

/// The game client's network core: connection state machine, inbound
/// buffering, snapshot synchronization, and the mirror application path.
/// Rendering and input are other modules' problems; this one keeps the
/// local mirror of the server's world truthful.
pub struct GameClient<S: Simulation> {
    endpoint: NetworkEndpoint,
    server_addr: Option<SocketAddr>,
    state: ConnectionState,
    local_slot: Option<usize>,
    connect_value: Option<u32>,

    registry: ClientRegistry,
    settings: GameSettings,
    sim: S,
    config: ClientConfig,

    recv: ReceiveTracker,
    acks: AckTracker,
    packet_buffer: PacketBuffer,
    delta_buffer: DeltaBuffer,
    demo: Option<DemoRecorder>,
    notifier: Box<dyn Notifier>,

    /// Latest tick confirmed by the server's stream.
    world_index: u32,
    command_index: u32,
    connect_started: Option<Instant>,
    pending_join: bool,
}

impl<S: Simulation> GameClient<S> {
    pub fn new(config: ClientConfig, sim: S, notifier: Box<dyn Notifier>) -> anyhow::Result<Self> {
        let endpoint = NetworkEndpoint::bind("0.0.0.0:0").context("binding client socket")?;

        Ok(Self {
            endpoint,
            server_addr: None,
            state: ConnectionState::Disconnected,
            local_slot: None,
            connect_value: None,
            registry: ClientRegistry::new(),
            settings: GameSettings::default(),
            sim,
            recv: ReceiveTracker::new(),
            acks: AckTracker::default(),
            packet_buffer: PacketBuffer::default(),
            delta_buffer: DeltaBuffer::default(),
            demo: None,
            notifier,
            world_index: 0,
            command_index: 0,
            connect_started: None,
            pending_join: false,
            config,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn local_slot(&self) -> Option<usize> {
        self.local_slot
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &GameSettings {
        &self.settings
    }

    pub fn simulation(&self) -> &S {
        &self.sim
    }

    pub fn world_index(&self) -> u32 {
        self.world_index
    }

    pub fn connect(&mut self, addr: SocketAddr) -> anyhow::Result<()> {
        log::info!("connecting to {addr}");
        self.server_addr = Some(addr);
        self.state = ConnectionState::Connecting;
        self.connect_started = Some(Instant::now());
        self.send_body(PacketBody::Connect {
            protocol_version: PROTOCOL_VERSION,
        });
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            self.send_body(PacketBody::Disconnect {
                reason_raw: DisconnectReason::None as u32,
            });
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.server_addr = None;
        self.local_slot = None;
        self.connect_value = None;
        self.registry.zero_all();
        self.recv = ReceiveTracker::new();
        self.acks = AckTracker::default();
        self.packet_buffer.clear();
        self.delta_buffer.clear();
        self.world_index = 0;
        self.command_index = 0;
        self.connect_started = None;
        self.pending_join = false;
        if let Some(recorder) = self.demo.take() {
            if let Err(e) = recorder.finish() {
                log::error!("closing demo: {e}");
            }
        }
    }

    /// Drain the transport once (bounded wait) and route what arrived.
    pub fn pump_network(&mut self) -> anyhow::Result<()> {
        if self.state == ConnectionState::Connecting {
            if let Some(started) = self.connect_started {
                if started.elapsed() > self.config.connect_timeout {
                    self.notify("Connection attempt timed out.");
                    self.reset();
                    return Ok(());
                }
            }
        }

        let events = match self.endpoint.poll(self.config.poll_timeout) {
            Ok(events) => events,
            Err(e) => {
                log::warn!("transport poll failed: {e}");
                return Ok(());
            }
        };

        for event in events {
            match event {
                NetEvent::ConnectAck {
                    addr,
                    client_num,
                    connect_value,
                } => self.handle_connect_ack(addr, client_num, connect_value),
                NetEvent::Deny { addr, reason_raw } => {
                    if self.is_server(addr) {
                        let reason = DisconnectReason::from_raw(reason_raw)
                            .unwrap_or(DisconnectReason::None);
                        self.notify(&format!("Connection refused: {}", reason.as_str()));
                        self.reset();
                    }
                }
                NetEvent::Disconnect { addr, reason_raw } => {
                    if self.is_server(addr) {
                        let reason = DisconnectReason::from_raw(reason_raw)
                            .unwrap_or(DisconnectReason::None);
                        if reason == DisconnectReason::None {
                            self.notify("Disconnected from server.");
                        } else {
                            self.notify(&format!("Disconnected: {}", reason.as_str()));
                        }
                        self.reset();
                    }
                }
                NetEvent::Connect { addr, .. } => {
                    // Clients never receive connection requests.
                    log::info!("spurious connection attempt from {addr}, ignoring");
                }
                NetEvent::Message { addr, packet, raw } => {
                    if self.is_server(addr) {
                        self.handle_packet(packet.header, packet.body, raw)?;
                    } else {
                        log::info!("message from unknown address {addr}, ignoring");
                    }
                }
            }
        }
        Ok(())
    }

    fn is_server(&self, addr: SocketAddr) -> bool {
        self.server_addr == Some(addr)
    }

    fn handle_connect_ack(&mut self, addr: SocketAddr, client_num: u32, connect_value: u32) {
        if !self.is_server(addr) || self.state != ConnectionState::Connecting {
            return;
        }
        log::info!("server assigned slot {client_num} (connection {connect_value})");
        self.local_slot = Some(client_num as usize);
        self.connect_value = Some(connect_value);
        self.state = ConnectionState::AwaitingGameState;
        self.announce_local_info();
    }

    fn handle_packet(
        &mut self,
        header: PacketHeader,
        body: PacketBody,
        raw: Vec<u8>,
    ) -> anyhow::Result<()> {
        self.acks.acked(header.ack, header.ack_bits);
        if header.channel == Channel::Sequenced && !self.recv.accept(header.sequence) {
            return Ok(());
        }

        let PacketBody::Message(message) = body else {
            return Ok(());
        };

        self.tap_demo(&message, &raw)?;

        match self.state {
            ConnectionState::AwaitingGameState => match message {
                Message::GameState(payload) => self.apply_snapshot(payload),
                // Deltas racing the snapshot wait their turn.
                other => {
                    self.delta_buffer.push(other);
                    Ok(())
                }
            },
            ConnectionState::Active => {
                self.packet_buffer.push(message);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Mirror every inbound message into the demo log. The recorder opens
    /// on the first game state, when the map is known.
    fn tap_demo(&mut self, message: &Message, raw: &[u8]) -> anyhow::Result<()> {
        if self.demo.is_none() {
            let Some(path) = self.config.demo_path.clone() else {
                return Ok(());
            };
            let Message::GameState(payload) = message else {
                return Ok(());
            };
            let header = DemoHeader {
                protocol_version: PROTOCOL_VERSION,
                side: DemoSide::Client,
                timestamp: SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs(),
                map_name: format!("MAP{:02}", payload.map_number),
                local_slot: self.local_slot.unwrap_or_default() as u32,
                settings: payload.settings.clone(),
            };
            self.demo = Some(
                DemoRecorder::create(&path, &header)
                    .with_context(|| format!("opening demo file {}", path.display()))?,
            );
        }

        if let Some(recorder) = self.demo.as_mut() {
            if let Err(e) = record_inbound(recorder, Role::Client, message.kind(), 0, raw) {
                log::error!("demo error, recording aborted: {e}");
                self.demo = None;
            }
        }
        Ok(())
    }

    fn apply_snapshot(&mut self, payload: fray::GameStatePayload) -> anyhow::Result<()> {
        if let Some(slot) = self.local_slot {
            if payload.player_num as usize != slot {
                log::warn!(
                    "snapshot targets slot {}, expected {slot}; following the server",
                    payload.player_num
                );
                self.local_slot = Some(payload.player_num as usize);
            }
        } else {
            self.local_slot = Some(payload.player_num as usize);
        }

        match apply_game_state(&mut self.sim, &mut self.registry, &payload) {
            Ok(settings) => {
                self.settings = settings;
                self.world_index = payload.world_index;
                self.state = ConnectionState::Active;

                let (replay, discarded) = self.delta_buffer.drain_from(payload.world_index);
                if discarded > 0 {
                    log::debug!("discarded {discarded} deltas older than the snapshot");
                }
                log::info!(
                    "synchronized at tick {} ({} buffered deltas to replay)",
                    payload.world_index,
                    replay.len()
                );
                for message in replay {
                    self.dispatch_message(message);
                }
                self.notify("Synchronized with server.");
                Ok(())
            }
            Err(e) => {
                log::error!("game state from server was unusable: {e}");
                self.notify("Could not load the server's game state.");
                self.disconnect();
                Ok(())
            }
        }
    }

    /// Process at most one complete server tick from the packet buffer,
    /// then emit this tick's command. Call once per local tick.
    pub fn run_tic(&mut self) {
        if self.state != ConnectionState::Active {
            return;
        }

        let batch = self.packet_buffer.next_tic_batch();
        for message in batch {
            self.dispatch_message(message);
        }

        self.send_command();
    }

    /// The one dispatch path: live traffic and demo playback both land
    /// here, which is what keeps playback bit-exact.
    fn dispatch_message(&mut self, message: Message) {
        match &message {
            Message::Sync(info) => {
                self.world_index = info.world_index;
            }
            Message::TicFinished { world_index } => {
                self.world_index = *world_index;
            }
            Message::PlayerInfoUpdated(update) => self.apply_info_update(update),
            Message::ClientInit {
                client_num,
                summary,
                ..
            } => {
                if let Some(client) = self.registry.client_mut(*client_num as usize) {
                    summary.install(client);
                }
            }
            Message::PlayerSpawned {
                player_num,
                as_spectator,
                ..
            } => {
                let slot = *player_num as usize;
                if let Some(player) = self.registry.player_mut(slot) {
                    player.in_game = true;
                }
                if let Some(client) = self.registry.client_mut(slot) {
                    client.spectating = *as_spectator;
                    reset_life(client);
                }
                self.sim.apply_world_event(&message);
            }
            Message::PlayerRemoved {
                player_num,
                reason_raw,
                ..
            } => {
                let slot = *player_num as usize;
                let name = self
                    .registry
                    .player(slot)
                    .map(|p| p.name.clone())
                    .unwrap_or_default();
                let reason =
                    DisconnectReason::from_raw(*reason_raw).unwrap_or(DisconnectReason::None);
                let shown = if name.is_empty() {
                    format!("player {slot}")
                } else {
                    name
                };
                if reason == DisconnectReason::None {
                    self.notify(&format!("{shown} left the game."));
                } else {
                    self.notify(&format!("{shown} left the game: {}.", reason.as_str()));
                }
                self.registry.init_slot(slot);
            }
            Message::ServerMessage {
                prepend_name,
                declared_len,
                bytes,
                ..
            } => match extract_text(*declared_len, bytes, MAX_CHAT_LEN) {
                Ok(text) => {
                    let line = if *prepend_name {
                        format!("[SERVER] {text}")
                    } else {
                        text.to_string()
                    };
                    self.notify(&line);
                }
                Err(e) => log::warn!("malformed server message: {e}"),
            },
            Message::PlayerMessage {
                sender_num,
                declared_len,
                bytes,
                ..
            } => match extract_text(*declared_len, bytes, MAX_CHAT_LEN) {
                Ok(text) => {
                    let name = self
                        .registry
                        .player(*sender_num as usize)
                        .map(|p| p.name.clone())
                        .filter(|n| !n.is_empty())
                        .unwrap_or_else(|| format!("player {sender_num}"));
                    self.notify(&format!("{name}: {text}"));
                }
                Err(e) => log::warn!("malformed chat message: {e}"),
            },
            Message::ClientStatus {
                client_num,
                server_lag,
                transit_lag,
                packet_loss,
                floor_status_raw,
                ..
            } => {
                if let Some(client) = self.registry.client_mut(*client_num as usize) {
                    client.server_lag = *server_lag;
                    client.transit_lag = *transit_lag;
                    client.packet_loss = *packet_loss;
                    if let Some(status) = FloorStatus::from_raw(*floor_status_raw) {
                        client.floor_status = status;
                    }
                }
            }
            Message::MapStarted {
                world_index,
                settings,
                players_in_game,
                ..
            } => {
                self.world_index = *world_index;
                self.settings = settings.clone();
                self.registry.set_teams_enabled(self.settings.teams_enabled());
                for slot in 0..players_in_game.len() {
                    self.registry.reset_stats(slot);
                    if let Some(player) = self.registry.player_mut(slot) {
                        player.in_game = players_in_game[slot];
                    }
                }
                self.notify("Map started.");
            }
            Message::MapCompleted { .. } => {
                self.notify("Map completed.");
            }
            Message::AuthResult { success, .. } => {
                if *success {
                    self.notify("Authorization granted.");
                } else {
                    self.notify("Authorization failed.");
                }
            }
            Message::VoteRequest {
                declared_len,
                bytes,
                ..
            } => match extract_text(*declared_len, bytes, MAX_CHAT_LEN) {
                Ok(text) => self.notify(&format!("Vote called: {text}")),
                Err(e) => log::warn!("malformed vote request: {e}"),
            },
            Message::VoteResult {
                passed,
                declared_len,
                bytes,
                ..
            } => match extract_text(*declared_len, bytes, MAX_CHAT_LEN) {
                Ok(text) => {
                    let verdict = if *passed { "passed" } else { "failed" };
                    self.notify(&format!("Vote \"{text}\" {verdict}."));
                }
                Err(e) => log::warn!("malformed vote result: {e}"),
            },
            Message::GameState(payload) => {
                // A resumed connection gets a fresh snapshot mid-session.
                let payload = payload.clone();
                if let Err(e) = self.apply_snapshot(payload) {
                    log::error!("resynchronization failed: {e}");
                }
            }
            Message::PlayerCommand(_) => {
                log::warn!("server sent a player command, dropping");
            }
            // Entity traffic belongs to the simulation.
            other => self.sim.apply_world_event(other),
        }
    }

    fn apply_info_update(&mut self, update: &PlayerInfoUpdate) {
        let ctx = ApplyContext {
            role: Role::Client,
            local_slot: self.local_slot,
        };
        match apply_player_info(&ctx, &mut self.registry, None, update) {
            Ok(outcome) => {
                for notice in outcome.notices {
                    self.notify(&notice);
                }
            }
            Err(e) => log::warn!("dropping player info update: {e}"),
        }
    }

    fn send_command(&mut self) {
        if self.local_slot.is_none() {
            return;
        }
        self.command_index += 1;
        let mut command = PlayerCommand::new(self.world_index, self.command_index);
        if self.pending_join {
            // Joining rides the command path; the server queues a
            // spectator who presses use.
            command.set_button(Buttons::USE, true);
            self.pending_join = false;
        }
        self.send_on(
            Channel::Unsequenced,
            PacketBody::Message(Message::PlayerCommand(command)),
        );
    }

    /// Ask to leave the spectators and enter the join queue.
    pub fn request_join(&mut self) {
        self.pending_join = true;
    }

    /// Offer the server password to raise this connection's auth level.
    pub fn request_auth(&mut self, password: &str) {
        let (declared_len, bytes) = encode_text(password);
        self.send_message(Message::ClientRequest {
            world_index: self.world_index,
            request_raw: RequestKind::Auth as u32,
            declared_len,
            bytes,
        });
    }

    /// Push the locally-authoritative fields (name, options, weapon order)
    /// to the server right after connecting.
    fn announce_local_info(&mut self) {
        let Some(slot) = self.local_slot else { return };

        if let Some(player) = self.registry.player_mut(slot) {
            player.name = self.config.name.clone();
            player.skin = self.config.skin.clone();
        }

        let tick = self.world_index;
        for info in [ClientInfo::Name, ClientInfo::Skin] {
            match build_string_info(&self.registry, slot, info, tick) {
                Ok(update) => self.send_message(Message::PlayerInfoUpdated(update)),
                Err(e) => log::warn!("building local {info:?}: {e}"),
            }
        }

        let prefs = self.config.prefs.clone();
        for info in [
            ClientInfo::WeaponSwitchOnPickup,
            ClientInfo::AmmoSwitchOnPickup,
            ClientInfo::Bobbing,
            ClientInfo::WeaponToggles,
            ClientInfo::Autoaim,
            ClientInfo::WeaponSpeed,
            ClientInfo::Buffering,
        ] {
            match build_scalar_info(&self.registry, &prefs, slot, info, tick) {
                Ok(update) => self.send_message(Message::PlayerInfoUpdated(update)),
                Err(e) => log::warn!("building local {info:?}: {e}"),
            }
        }

        for index in 0..=NUM_WEAPONS as u32 {
            match build_array_info(
                &self.registry,
                &prefs,
                slot,
                ClientInfo::WeaponPreference,
                index,
                tick,
            ) {
                Ok(update) => self.send_message(Message::PlayerInfoUpdated(update)),
                Err(e) => log::warn!("building weapon preference {index}: {e}"),
            }
        }
    }

    /// Declare intent to spectate. The server validates and rebroadcasts.
    pub fn request_spectate(&mut self) {
        let Some(slot) = self.local_slot else { return };
        let update = PlayerInfoUpdate {
            world_index: self.world_index,
            player_num: slot as u32,
            info_raw: ClientInfo::Spectating as u32,
            array_index: 0,
            payload: InfoPayload::Value(SyncValue::Boolean(true)),
        };
        self.send_message(Message::PlayerInfoUpdated(update));
    }

    /// Ask for a team. The server validates the transition.
    pub fn request_team(&mut self, team: TeamColor) {
        let Some(slot) = self.local_slot else { return };
        let update = PlayerInfoUpdate {
            world_index: self.world_index,
            player_num: slot as u32,
            info_raw: ClientInfo::Team as u32,
            array_index: 0,
            payload: InfoPayload::Value(SyncValue::Int(team as i32)),
        };
        self.send_message(Message::PlayerInfoUpdated(update));
    }

    pub fn send_chat(&mut self, recipient: ChatRecipient, recipient_num: u32, text: &str) {
        let Some(slot) = self.local_slot else { return };
        let (declared_len, bytes) = encode_text(text);
        self.send_message(Message::PlayerMessage {
            world_index: self.world_index,
            recipient_raw: recipient as u32,
            sender_num: slot as u32,
            recipient_num,
            declared_len,
            bytes,
        });
    }

    /// Replay a recorded demo through the live dispatch path.
    pub fn play_demo(&mut self, path: &std::path::Path) -> anyhow::Result<()> {
        let mut reader = DemoReader::open(path)
            .with_context(|| format!("opening demo {}", path.display()))?;
        self.local_slot = Some(reader.header().local_slot as usize);
        self.settings = reader.header().settings.clone();
        self.registry.set_teams_enabled(self.settings.teams_enabled());
        log::info!(
            "playing demo on {} ({} side)",
            reader.header().map_name,
            match reader.header().side {
                DemoSide::Client => "client",
                DemoSide::Server => "server",
            }
        );

        while let Some(record) = reader.next_record()? {
            let packet = match fray::Packet::deserialize(&record.data) {
                Ok(packet) => packet,
                Err(e) => {
                    log::warn!("skipping undecodable demo record: {e}");
                    continue;
                }
            };
            match packet.body {
                PacketBody::Message(Message::GameState(payload)) => {
                    self.state = ConnectionState::Active;
                    if let Err(e) = self.apply_snapshot(payload) {
                        log::error!("demo game state failed to apply: {e}");
                        break;
                    }
                }
                PacketBody::Message(message) => self.dispatch_message(message),
                _ => {}
            }
        }
        Ok(())
    }

    fn notify(&mut self, text: &str) {
        self.notifier.notify(NotifyTarget::Broadcast, text);
    }

    fn send_message(&mut self, message: Message) {
        self.send_on(Channel::Sequenced, PacketBody::Message(message));
    }

    fn send_body(&mut self, body: PacketBody) {
        self.send_on(Channel::Sequenced, body);
    }

    fn send_on(&mut self, channel: Channel, body: PacketBody) {
        let Some(addr) = self.server_addr else { return };
        let (ack, ack_bits) = self.recv.ack_data();
        let packet = self.endpoint.make_packet(channel, ack, ack_bits, body);
        self.acks.sent(packet.header.sequence);
        if let Err(e) = self.endpoint.send_to(&packet, addr) {
            log::warn!("send to {addr} failed: {e}");
        }
    }
}
