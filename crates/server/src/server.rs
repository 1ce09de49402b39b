use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::Context;

use fray::net::PROTOCOL_VERSION;
use fray::{
    ApplyContext, AuthLevel, Buttons, Channel, ChatRecipient, ClientInfo, ClientRegistry,
    ClientSummary, DeathCause, DemoHeader, DemoRecorder, DemoSide, DisconnectReason, FieldShape,
    FragKind, InfoPayload, MAX_CHAT_LEN, MAX_LATENCY_SECS, Message, NetEvent, NetStats,
    NetworkEndpoint, PacketBody, PendingRequest, PlayerCommand, PlayerInfoUpdate, QueueLevel,
    RequestKind, Role, ServerClients, SimEvent, Simulation, SyncValue, TICRATE,
    apply_player_info, build_array_info, build_game_state, build_scalar_info, build_string_info,
    build_sync_info, encode_text, extract_text, record_frag, record_inbound, reset_life,
};

use crate::config::ServerConfig;
use crate::queue;
use crate::vote::{Ballot, VoteState};

/// The authoritative server: one endpoint, one registry, one simulation,
/// all driven from a single tick loop. Everything a handler needs is
/// passed down explicitly; there is no ambient state.
pub struct GameServer<S: Simulation> {
    endpoint: NetworkEndpoint,
    registry: ClientRegistry,
    server_clients: ServerClients,
    sim: S,
    config: ServerConfig,
    demo: Option<DemoRecorder>,
    vote: Option<VoteState>,
    level_start_tick: u32,
    tick_duration: Duration,
    last_tick_time: Instant,
    accumulator: Duration,
    running: Arc<AtomicBool>,
}

impl<S: Simulation> GameServer<S> {
    pub fn new(bind_addr: &str, config: ServerConfig, sim: S) -> anyhow::Result<Self> {
        let endpoint =
            NetworkEndpoint::bind(bind_addr).with_context(|| format!("binding {bind_addr}"))?;

        let mut registry = ClientRegistry::new();
        registry.set_teams_enabled(config.settings.teams_enabled());

        let demo = match &config.demo_path {
            Some(path) => {
                let header = DemoHeader {
                    protocol_version: PROTOCOL_VERSION,
                    side: DemoSide::Server,
                    timestamp: SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_secs(),
                    map_name: format!("MAP{:02}", config.map_number),
                    local_slot: 0,
                    settings: config.settings.clone(),
                };
                Some(
                    DemoRecorder::create(path, &header)
                        .with_context(|| format!("opening demo file {}", path.display()))?,
                )
            }
            None => None,
        };

        let level_start_tick = sim.current_tick();

        Ok(Self {
            endpoint,
            registry,
            server_clients: ServerClients::new(),
            sim,
            demo,
            vote: None,
            level_start_tick,
            tick_duration: Duration::from_secs_f64(1.0 / TICRATE as f64),
            last_tick_time: Instant::now(),
            accumulator: Duration::ZERO,
            running: Arc::new(AtomicBool::new(true)),
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn server_clients(&self) -> &ServerClients {
        &self.server_clients
    }

    pub fn simulation(&self) -> &S {
        &self.sim
    }

    pub fn net_stats(&self) -> &NetStats {
        self.endpoint.stats()
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        while self.running.load(Ordering::SeqCst) {
            self.tick_once()?;
        }
        self.shutdown();
        Ok(())
    }

    /// One scheduler pass: drain the transport (bounded wait), then step
    /// the simulation for however many ticks have elapsed.
    pub fn tick_once(&mut self) -> anyhow::Result<()> {
        let now = Instant::now();
        self.accumulator += now - self.last_tick_time;
        self.last_tick_time = now;

        self.process_network()?;

        while self.accumulator >= self.tick_duration {
            self.accumulator -= self.tick_duration;
            self.advance_tick()?;
        }
        Ok(())
    }

    pub fn shutdown(&mut self) {
        for slot in self.connected_slots() {
            self.disconnect_player(slot, DisconnectReason::None, true);
        }
        if let Some(recorder) = self.demo.take() {
            if let Err(e) = recorder.finish() {
                log::error!("closing demo: {e}");
            }
        }
    }

    fn connected_slots(&self) -> Vec<usize> {
        self.server_clients
            .iter_connected()
            .map(|(slot, _)| slot)
            .collect()
    }

    fn process_network(&mut self) -> anyhow::Result<()> {
        let events = match self.endpoint.poll(self.config.poll_timeout) {
            Ok(events) => events,
            Err(e) => {
                log::warn!("transport poll failed: {e}");
                return Ok(());
            }
        };

        for event in events {
            match event {
                NetEvent::Connect {
                    addr,
                    protocol_version,
                } => self.handle_connect(addr, protocol_version)?,
                NetEvent::Disconnect { addr, .. } => {
                    match self.server_clients.slot_for_addr(addr) {
                        Some(slot) => self.disconnect_player(slot, DisconnectReason::None, false),
                        None => log::info!("disconnect from unknown peer {addr}, ignoring"),
                    }
                }
                NetEvent::Message { addr, packet, raw } => {
                    self.handle_message(addr, packet.header, packet.body, raw)?
                }
                NetEvent::ConnectAck { addr, .. } | NetEvent::Deny { addr, .. } => {
                    log::debug!("client-bound control frame from {addr}, ignoring");
                }
            }
        }
        Ok(())
    }

    fn handle_connect(&mut self, addr: SocketAddr, protocol_version: u32) -> anyhow::Result<()> {
        if protocol_version != PROTOCOL_VERSION {
            log::warn!(
                "refusing {addr}: protocol {protocol_version} (running {PROTOCOL_VERSION})"
            );
            self.send_control(addr, PacketBody::Deny {
                reason_raw: DisconnectReason::InvalidMessage as u32,
            });
            return Ok(());
        }

        // A known address is a resume, not a new connection.
        if let Some(slot) = self.server_clients.slot_for_addr(addr) {
            log::info!("{addr} reconnected to slot {slot}");
            let connect_value = self.server_clients.get(slot).and_then(|s| s.connect);
            if let Some(connect) = connect_value {
                self.send_control(addr, PacketBody::ConnectAck {
                    client_num: slot as u32,
                    connect_value: connect.value,
                });
            }
            return self.send_game_state(slot);
        }

        if self.server_clients.connected_count() >= self.config.effective_max_clients() {
            log::info!("refusing {addr}: server full");
            self.send_control(addr, PacketBody::Deny {
                reason_raw: DisconnectReason::ServerFull as u32,
            });
            return Ok(());
        }
        let Some(slot) = self.server_clients.claim(addr) else {
            log::info!("refusing {addr}: server full");
            self.send_control(addr, PacketBody::Deny {
                reason_raw: DisconnectReason::ServerFull as u32,
            });
            return Ok(());
        };

        self.registry.init_slot(slot);
        let connect = self
            .server_clients
            .get(slot)
            .and_then(|s| s.connect)
            .expect("freshly claimed");
        log::info!("adding client {addr} in slot {slot} (connection {})", connect.value);

        self.send_control(addr, PacketBody::ConnectAck {
            client_num: slot as u32,
            connect_value: connect.value,
        });
        self.send_roster(slot);
        self.send_game_state(slot)?;

        let summary = ClientSummary::capture(self.registry.client(slot).expect("slot in range"));
        let tick = self.sim.current_tick();
        self.broadcast_except(
            Message::ClientInit {
                world_index: tick,
                client_num: slot as u32,
                summary,
            },
            Some(slot),
        );
        Ok(())
    }

    /// Tell a new client about everyone already here.
    fn send_roster(&mut self, new_slot: usize) {
        let tick = self.sim.current_tick();
        for slot in self.connected_slots() {
            if slot == new_slot {
                continue;
            }
            let summary =
                ClientSummary::capture(self.registry.client(slot).expect("slot in range"));
            self.send_message(new_slot, Message::ClientInit {
                world_index: tick,
                client_num: slot as u32,
                summary,
            });

            let has_name = self
                .registry
                .player(slot)
                .is_some_and(|p| !p.name.is_empty());
            if has_name {
                match build_string_info(&self.registry, slot, ClientInfo::Name, tick) {
                    Ok(update) => {
                        self.send_message(new_slot, Message::PlayerInfoUpdated(update));
                    }
                    Err(e) => log::warn!("building roster name for slot {slot}: {e}"),
                }
            }
        }
    }

    /// Ship the full snapshot plus the tick alignment that follows it.
    /// Scratch-file failure is fatal: it means the server host is
    /// misconfigured, not that a peer misbehaved.
    fn send_game_state(&mut self, slot: usize) -> anyhow::Result<()> {
        let payload = build_game_state(
            &self.sim,
            &self.registry,
            &self.config.settings,
            self.config.map_number,
            self.config.rng_seed,
            slot,
            &self.config.scratch_path,
        )
        .context("staging full game state")?;

        if let Some(state) = self.server_clients.get_mut(slot) {
            state.received_game_state = false;
        }
        self.send_message(slot, Message::GameState(payload));
        let sync = build_sync_info(&self.sim, self.level_start_tick);
        self.send_message(slot, Message::Sync(sync));
        Ok(())
    }

    fn handle_message(
        &mut self,
        addr: SocketAddr,
        header: fray::PacketHeader,
        body: PacketBody,
        raw: Vec<u8>,
    ) -> anyhow::Result<()> {
        let Some(slot) = self.server_clients.slot_for_addr(addr) else {
            log::info!("message from unknown address {addr}, ignoring");
            return Ok(());
        };

        if let Some(state) = self.server_clients.get_mut(slot) {
            state.acks.acked(header.ack, header.ack_bits);
            if header.channel == Channel::Sequenced && !state.recv.accept(header.sequence) {
                return Ok(());
            }
        }

        let PacketBody::Message(message) = body else {
            return Ok(());
        };

        if let Some(recorder) = self.demo.as_mut() {
            if let Err(e) =
                record_inbound(recorder, Role::Server, message.kind(), slot as u32, &raw)
            {
                log::error!("demo error, recording aborted: {e}");
                self.demo = None;
            }
        }

        self.dispatch(slot, message)
    }

    fn dispatch(&mut self, slot: usize, message: Message) -> anyhow::Result<()> {
        match message {
            Message::PlayerInfoUpdated(update) => self.handle_info_update(slot, update),
            Message::PlayerCommand(command) => self.handle_player_command(slot, command),
            Message::PlayerMessage {
                recipient_raw,
                sender_num,
                recipient_num,
                declared_len,
                bytes,
                world_index,
            } => self.handle_chat(
                slot,
                recipient_raw,
                sender_num,
                recipient_num,
                declared_len,
                bytes,
                world_index,
            ),
            Message::VoteRequest {
                declared_len,
                bytes,
                ..
            } => self.handle_vote_request(slot, declared_len, bytes),
            Message::Vote { yea, .. } => self.handle_vote(slot, yea),
            Message::ClientRequest {
                request_raw,
                declared_len,
                bytes,
                ..
            } => self.handle_client_request(slot, request_raw, declared_len, bytes),
            other => {
                log::warn!(
                    "unexpected {} message from slot {slot}, dropping",
                    other.kind().name()
                );
                Ok(())
            }
        }
    }

    fn handle_info_update(&mut self, slot: usize, update: PlayerInfoUpdate) -> anyhow::Result<()> {
        if update.player_num as usize != slot {
            log::warn!(
                "slot {slot} tried to update player {}, disconnecting",
                update.player_num
            );
            self.disconnect_player(slot, DisconnectReason::InvalidMessage, true);
            return Ok(());
        }

        let ctx = ApplyContext {
            role: Role::Server,
            local_slot: None,
        };
        match apply_player_info(&ctx, &mut self.registry, Some(&mut self.server_clients), &update) {
            Ok(outcome) => {
                for notice in &outcome.notices {
                    log::info!("{notice}");
                }
                if outcome.applied && outcome.broadcast {
                    self.rebroadcast_info(slot, &update);
                }
                for (info, array_index) in &outcome.extra_broadcasts {
                    self.broadcast_rebuilt_info(slot, *info, *array_index, None);
                }
                if update.info_raw == ClientInfo::Spectating as u32 && outcome.applied {
                    // Keep a restorable self-snapshot across the
                    // spectate/rejoin cycle.
                    if let Some(state) = self.server_clients.get_mut(slot) {
                        state.saved_position = state.positions.latest().copied();
                    }
                }
                if outcome.requeue {
                    queue::set_not_playing(&mut self.registry, slot);
                    let connected = self.connected_slots();
                    queue::renumber(&mut self.registry, &connected);
                    self.broadcast_queue_state();
                }
                if outcome.respawn {
                    self.respawn(slot, true);
                }
            }
            Err(e) => {
                log::warn!("rejecting player info update from slot {slot}: {e}");
                if let Some(text) = e.notify_sender() {
                    self.send_server_message(slot, &text);
                }
            }
        }
        Ok(())
    }

    /// Relay an accepted field update by rebuilding it from the store, so
    /// peers always see what the server now holds, not what the sender
    /// claimed.
    fn rebroadcast_info(&mut self, slot: usize, update: &PlayerInfoUpdate) {
        let Some(info) = ClientInfo::from_raw(update.info_raw) else {
            return;
        };
        self.broadcast_rebuilt_info(slot, info, update.array_index, Some(slot));
    }

    fn broadcast_rebuilt_info(
        &mut self,
        slot: usize,
        info: ClientInfo,
        array_index: u32,
        except: Option<usize>,
    ) {
        let tick = self.sim.current_tick();
        let prefs = match self.server_clients.get(slot) {
            Some(state) => state.prefs.clone(),
            None => return,
        };
        let built = match info.spec().shape {
            FieldShape::Text => build_string_info(&self.registry, slot, info, tick),
            FieldShape::Array => {
                build_array_info(&self.registry, &prefs, slot, info, array_index, tick)
            }
            FieldShape::Scalar => build_scalar_info(&self.registry, &prefs, slot, info, tick),
        };
        match built {
            Ok(update) => self.broadcast_except(Message::PlayerInfoUpdated(update), except),
            Err(e) => log::warn!("rebuilding {info:?} for broadcast: {e}"),
        }
    }

    fn handle_player_command(
        &mut self,
        slot: usize,
        command: PlayerCommand,
    ) -> anyhow::Result<()> {
        let flood_limit = self.config.command_flood_limit;
        let Some(state) = self.server_clients.get_mut(slot) else {
            return Ok(());
        };

        // The first command through confirms the peer is on the current
        // map with the snapshot applied.
        state.received_game_state = true;
        state.received_command_for_current_map = true;
        state.command_world_index = command.world_index;
        if command.index > state.last_command_received_index {
            state.last_command_received_index = command.index;
        }

        if !state.commands.insert(command) {
            log::debug!(
                "slot {slot} command {} dropped ({} so far)",
                command.index,
                state.commands.dropped()
            );
        }

        if state.commands.len() > flood_limit {
            log::warn!("slot {slot} is flooding commands, disconnecting");
            self.disconnect_player(slot, DisconnectReason::CommandFlood, true);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_chat(
        &mut self,
        slot: usize,
        recipient_raw: u32,
        sender_num: u32,
        recipient_num: u32,
        declared_len: u32,
        bytes: Vec<u8>,
        world_index: u32,
    ) -> anyhow::Result<()> {
        if sender_num as usize != slot {
            log::warn!("slot {slot} spoofed chat sender {sender_num}, disconnecting");
            self.disconnect_player(slot, DisconnectReason::InvalidMessage, true);
            return Ok(());
        }

        let text = match extract_text(declared_len, &bytes, MAX_CHAT_LEN) {
            Ok(text) => text.to_string(),
            Err(e) => {
                log::warn!("malformed chat from slot {slot}: {e}");
                return Ok(());
            }
        };
        let Some(recipient) = ChatRecipient::from_raw(recipient_raw) else {
            log::warn!("chat from slot {slot} with unknown recipient {recipient_raw}");
            return Ok(());
        };

        let relay = Message::PlayerMessage {
            world_index,
            recipient_raw,
            sender_num,
            recipient_num,
            declared_len,
            bytes,
        };

        match recipient {
            ChatRecipient::Server => {
                log::info!("[chat to server] slot {slot}: {text}");
            }
            ChatRecipient::All => {
                log::info!("[chat] slot {slot}: {text}");
                self.broadcast_except(relay, Some(slot));
            }
            ChatRecipient::Team => {
                let team = self
                    .registry
                    .client(slot)
                    .map(|c| c.team)
                    .unwrap_or_default();
                for other in self.connected_slots() {
                    let same_team = self
                        .registry
                        .client(other)
                        .is_some_and(|c| c.team == team);
                    if other != slot && same_team {
                        self.send_message(other, relay.clone());
                    }
                }
            }
            ChatRecipient::Player => {
                let target = recipient_num as usize;
                if self
                    .server_clients
                    .get(target)
                    .is_some_and(|s| s.is_connected())
                {
                    self.send_message(target, relay);
                } else {
                    self.send_server_message(slot, "That player is not connected.");
                }
            }
        }
        Ok(())
    }

    fn handle_client_request(
        &mut self,
        slot: usize,
        request_raw: u32,
        declared_len: u32,
        bytes: Vec<u8>,
    ) -> anyhow::Result<()> {
        let Some(request) = RequestKind::from_raw(request_raw) else {
            log::warn!("unknown request kind {request_raw} from slot {slot}, dropping");
            return Ok(());
        };

        if let Some(state) = self.server_clients.get_mut(slot) {
            state.pending_request = match request {
                RequestKind::Auth => PendingRequest::Auth,
                RequestKind::Join => PendingRequest::Join,
                RequestKind::Spectate => PendingRequest::Spectate,
            };
        }

        match request {
            RequestKind::Auth => {
                let offered = match extract_text(declared_len, &bytes, MAX_CHAT_LEN) {
                    Ok(text) => text.to_string(),
                    Err(e) => {
                        log::warn!("malformed auth request from slot {slot}: {e}");
                        return Ok(());
                    }
                };
                let granted = self
                    .config
                    .password
                    .as_deref()
                    .is_some_and(|password| password == offered);
                let level = if granted {
                    AuthLevel::Moderator
                } else {
                    AuthLevel::None
                };

                let tick = self.sim.current_tick();
                if let Some(state) = self.server_clients.get_mut(slot) {
                    if granted {
                        state.auth_level = level;
                    }
                    state.last_auth_attempt_tick = tick;
                }
                log::info!(
                    "auth attempt from slot {slot}: {}",
                    if granted { "granted" } else { "denied" }
                );
                self.send_message(slot, Message::AuthResult {
                    world_index: tick,
                    success: granted,
                    level_raw: level as u32,
                });
            }
            RequestKind::Join => {
                let wants_queue = self.registry.client(slot).is_some_and(|c| {
                    c.spectating && c.queue_level == QueueLevel::None
                });
                if wants_queue {
                    let connected = self.connected_slots();
                    queue::enqueue(&mut self.registry, &connected, slot);
                    self.broadcast_queue_state();
                }
            }
            RequestKind::Spectate => {
                // Equivalent to a spectating field update from the peer.
                let update = PlayerInfoUpdate {
                    world_index: self.sim.current_tick(),
                    player_num: slot as u32,
                    info_raw: ClientInfo::Spectating as u32,
                    array_index: 0,
                    payload: InfoPayload::Value(SyncValue::Boolean(true)),
                };
                self.handle_info_update(slot, update)?;
            }
        }

        if let Some(state) = self.server_clients.get_mut(slot) {
            state.pending_request = PendingRequest::None;
        }
        Ok(())
    }

    fn handle_vote_request(
        &mut self,
        slot: usize,
        declared_len: u32,
        bytes: Vec<u8>,
    ) -> anyhow::Result<()> {
        let command = match extract_text(declared_len, &bytes, MAX_CHAT_LEN) {
            Ok(text) => text.to_string(),
            Err(e) => {
                log::warn!("malformed vote request from slot {slot}: {e}");
                return Ok(());
            }
        };

        if self.vote.is_some() {
            self.send_server_message(slot, "A vote is already in progress.");
            return Ok(());
        }

        let tick = self.sim.current_tick();
        log::info!("slot {slot} called a vote: {command}");
        self.vote = Some(VoteState::new(command.clone(), slot, tick));

        let (declared_len, bytes) = encode_text(&command);
        self.broadcast_except(
            Message::VoteRequest {
                world_index: tick,
                declared_len,
                bytes,
            },
            Some(slot),
        );
        Ok(())
    }

    fn handle_vote(&mut self, slot: usize, yea: bool) -> anyhow::Result<()> {
        let electorate = self.server_clients.connected_count();
        let Some(vote) = self.vote.as_mut() else {
            self.send_server_message(slot, "No vote is in progress.");
            return Ok(());
        };

        if vote.cast(slot, yea) == Ballot::AlreadyVoted {
            self.send_server_message(slot, "You have already voted.");
            return Ok(());
        }
        let decided = vote.decided(electorate);

        if let Some(passed) = decided {
            self.finish_vote(passed);
        }
        Ok(())
    }

    fn finish_vote(&mut self, passed: bool) {
        let Some(vote) = self.vote.take() else { return };
        log::info!(
            "vote \"{}\" {} ({} yea, {} nay)",
            vote.command,
            if passed { "passed" } else { "failed" },
            vote.yeas(),
            vote.nays()
        );
        let tick = self.sim.current_tick();
        let (declared_len, bytes) = encode_text(&vote.command);
        self.broadcast_except(
            Message::VoteResult {
                world_index: tick,
                passed,
                declared_len,
                bytes,
            },
            None,
        );
    }

    fn advance_tick(&mut self) -> anyhow::Result<()> {
        // Run buffered commands in index order; a backlogged peer gets a
        // small burst so it can catch back up to real time.
        let mut join_intents = Vec::new();
        for slot in self.connected_slots() {
            let Some(state) = self.server_clients.get_mut(slot) else {
                continue;
            };
            let burst = if state.commands.len() > TICRATE as usize {
                2
            } else {
                1
            };
            for _ in 0..burst {
                let Some(command) = state.commands.pop_next() else {
                    break;
                };
                state.last_command_run_index = command.index;
                if command.buttons().contains(Buttons::USE) {
                    join_intents.push(slot);
                }
                self.sim.apply_command(slot, &command);
            }
        }

        // Joining goes through the command path: a spectator pressing use
        // enters the queue, never a bare field update.
        for slot in join_intents {
            let wants_queue = self.registry.client(slot).is_some_and(|c| {
                c.spectating && c.queue_level == QueueLevel::None
            });
            if wants_queue {
                let connected = self.connected_slots();
                queue::enqueue(&mut self.registry, &connected, slot);
                self.broadcast_queue_state();
            }
        }

        self.sim.run_tick();
        self.process_sim_events();
        let tick = self.sim.current_tick();

        // Record fresh positions for lag compensation.
        for slot in self.connected_slots() {
            if let Some(mut position) = self.sim.player_position(slot) {
                position.world_index = tick;
                if let Some(state) = self.server_clients.get_mut(slot) {
                    state.positions.store(position);
                }
            }
        }

        self.police_latency();
        self.promote_queue();

        if self.vote.as_ref().is_some_and(|v| v.expired(tick)) {
            let passed = self.vote.as_ref().map(|v| v.final_result()).unwrap_or(false);
            self.finish_vote(passed);
        }

        if self.config.status_interval_ticks > 0 && tick % self.config.status_interval_ticks == 0 {
            self.send_status_updates(tick);
        }

        self.broadcast_except(Message::TicFinished { world_index: tick }, None);
        Ok(())
    }

    fn process_sim_events(&mut self) {
        for event in self.sim.drain_events() {
            match event {
                SimEvent::PlayerDamaged { victim, amount } => {
                    if let Some(client) = self.registry.client_mut(victim) {
                        client.stats.record_damage(amount);
                    }
                }
                SimEvent::PlayerKilled {
                    victim,
                    killer,
                    by_monster,
                } => self.handle_player_killed(victim, killer, by_monster),
            }
        }
    }

    fn handle_player_killed(&mut self, victim: usize, killer: Option<usize>, by_monster: bool) {
        let tick = self.sim.current_tick();
        let teams_enabled = self.registry.teams_enabled();

        let kind = match killer {
            Some(k) if k == victim => Some(FragKind::Suicide),
            Some(k) => {
                let same_team = teams_enabled
                    && self.registry.client(k).map(|c| c.team)
                        == self.registry.client(victim).map(|c| c.team);
                if same_team {
                    Some(FragKind::TeamKill)
                } else {
                    Some(FragKind::Player)
                }
            }
            None => None,
        };
        let cause = match (kind, by_monster) {
            (Some(FragKind::Suicide), _) => DeathCause::Suicide,
            (Some(FragKind::TeamKill), _) => DeathCause::TeamMate,
            (Some(FragKind::Player), _) => DeathCause::Player,
            (None, true) => DeathCause::Monster,
            (None, false) => DeathCause::Environment,
        };

        if let Some(client) = self.registry.client_mut(victim) {
            client.death_count += 1;
            client.death_ticks = 0;
            client.stats.record_death(cause);
            reset_life(client);
        }

        let Some(killer) = killer else { return };
        let kind = kind.expect("killer implies a frag kind");

        let spree = {
            let Some(client) = self.registry.client_mut(killer) else {
                return;
            };
            record_frag(client, tick, kind)
        };

        // Frag bookkeeping mirrors the scoreboard rules: own-slot entries
        // count against the total.
        if let Some(player) = self.registry.player_mut(killer) {
            player.frags[victim] += 1;
        }
        let score = self.registry.client(killer).map(|c| c.score).unwrap_or(0);
        let delta = if kind == FragKind::Player { 1 } else { -1 };
        self.registry.set_score(killer, score + delta);
        self.broadcast_rebuilt_info(killer, ClientInfo::Frags, victim as u32, None);

        if let Some(fragment) = spree.frag_announcement {
            let name = self
                .registry
                .player(killer)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| format!("player {killer}"));
            self.broadcast_server_message(&format!("{name} is {fragment}!"));
        }
        if let Some(text) = spree.consecutive_announcement {
            self.send_hud_message(killer, text);
        }
    }

    fn police_latency(&mut self) {
        let ceiling_ms = (MAX_LATENCY_SECS * 1000 / 2) as f32;
        let over: Vec<usize> = self
            .server_clients
            .iter_connected()
            .filter(|(_, state)| state.acks.has_estimate() && state.acks.srtt_ms() > ceiling_ms)
            .map(|(slot, _)| slot)
            .collect();
        for slot in over {
            log::warn!("slot {slot} exceeded the latency ceiling, disconnecting");
            self.disconnect_player(slot, DisconnectReason::ExcessiveLatency, true);
        }
    }

    fn promote_queue(&mut self) {
        let connected = self.connected_slots();
        let promoted = queue::promote(&mut self.registry, &self.config.settings, &connected);
        if promoted.is_empty() {
            return;
        }
        let tick = self.sim.current_tick();
        for slot in promoted {
            if let Some(client) = self.registry.client_mut(slot) {
                client.spectating = false;
            }
            if let Some(state) = self.server_clients.get_mut(slot) {
                state.finished_queue_wait_tick = tick;
            }
            self.broadcast_rebuilt_info(slot, ClientInfo::Spectating, 0, None);
            self.respawn(slot, false);
        }
        self.broadcast_queue_state();
    }

    fn broadcast_queue_state(&mut self) {
        for slot in self.connected_slots() {
            self.broadcast_rebuilt_info(slot, ClientInfo::QueueLevel, 0, None);
            self.broadcast_rebuilt_info(slot, ClientInfo::QueuePosition, 0, None);
        }
    }

    fn respawn(&mut self, slot: usize, as_spectator: bool) {
        self.sim.respawn_player(slot, as_spectator);
        if let Some(client) = self.registry.client_mut(slot) {
            reset_life(client);
            client.death_ticks = 0;
        }
        if let Some(player) = self.registry.player_mut(slot) {
            player.in_game = true;
        }

        let tick = self.sim.current_tick();
        let position = self.sim.player_position(slot).unwrap_or_default();
        self.broadcast_except(
            Message::PlayerSpawned {
                world_index: tick,
                player_num: slot as u32,
                net_id: slot as u32 + 1,
                as_spectator,
                origin: position.origin.into(),
                angle: position.angle,
            },
            None,
        );
    }

    fn send_status_updates(&mut self, tick: u32) {
        for slot in self.connected_slots() {
            let Some(state) = self.server_clients.get(slot) else {
                continue;
            };
            let position = state
                .positions
                .latest()
                .copied()
                .or(state.saved_position)
                .unwrap_or_default();
            let server_lag = state.commands.len() as u32;
            let transit_lag =
                (state.acks.srtt_ms() / 2.0 / (1000.0 / TICRATE as f32)).round() as u32;
            let last_command_run = state.last_command_run_index;
            let floor_status_raw = self
                .registry
                .client(slot)
                .map(|c| c.floor_status as i32)
                .unwrap_or(0);

            self.send_message(slot, Message::ClientStatus {
                world_index: tick,
                client_num: slot as u32,
                server_lag,
                transit_lag,
                packet_loss: 0,
                position,
                last_command_run,
                floor_status_raw,
            });
        }
    }

    fn send_server_message(&mut self, slot: usize, text: &str) {
        let tick = self.sim.current_tick();
        let (declared_len, bytes) = encode_text(text);
        self.send_message(slot, Message::ServerMessage {
            world_index: tick,
            hud_message: false,
            prepend_name: true,
            declared_len,
            bytes,
        });
    }

    fn broadcast_server_message(&mut self, text: &str) {
        log::info!("{text}");
        let tick = self.sim.current_tick();
        let (declared_len, bytes) = encode_text(text);
        self.broadcast_except(
            Message::ServerMessage {
                world_index: tick,
                hud_message: false,
                prepend_name: false,
                declared_len,
                bytes,
            },
            None,
        );
    }

    /// Center-screen text for one peer (chained-kill callouts).
    fn send_hud_message(&mut self, slot: usize, text: &str) {
        let tick = self.sim.current_tick();
        let (declared_len, bytes) = encode_text(text);
        self.send_message(slot, Message::ServerMessage {
            world_index: tick,
            hud_message: true,
            prepend_name: false,
            declared_len,
            bytes,
        });
    }

    fn send_message(&mut self, slot: usize, message: Message) {
        self.send_body(slot, PacketBody::Message(message));
    }

    fn broadcast_except(&mut self, message: Message, except: Option<usize>) {
        for slot in self.connected_slots() {
            if Some(slot) == except {
                continue;
            }
            self.send_message(slot, message.clone());
        }
    }

    fn send_body(&mut self, slot: usize, body: PacketBody) {
        let Some(state) = self.server_clients.get(slot) else {
            return;
        };
        let Some(addr) = state.addr else {
            return;
        };
        let (ack, ack_bits) = state.recv.ack_data();

        let packet = self.endpoint.make_packet(Channel::Sequenced, ack, ack_bits, body);
        if let Some(state) = self.server_clients.get_mut(slot) {
            state.acks.sent(packet.header.sequence);
        }
        if let Err(e) = self.endpoint.send_to(&packet, addr) {
            log::warn!("send to slot {slot} ({addr}) failed: {e}");
        }
    }

    /// Control frames go to addresses that may not have a slot yet.
    fn send_control(&mut self, addr: SocketAddr, body: PacketBody) {
        let packet = self.endpoint.make_packet(Channel::Sequenced, 0, 0, body);
        if let Err(e) = self.endpoint.send_to(&packet, addr) {
            log::warn!("send to {addr} failed: {e}");
        }
    }

    /// Tear down one peer: notify it (optionally), tell everyone else,
    /// free the transport binding, and only then zero the gameplay-visible
    /// record.
    pub fn disconnect_player(
        &mut self,
        slot: usize,
        reason: DisconnectReason,
        notify_peer: bool,
    ) {
        let name = self
            .registry
            .player(slot)
            .map(|p| p.name.clone())
            .unwrap_or_default();
        let shown = if name.is_empty() {
            format!("slot {slot}")
        } else {
            name
        };
        if reason == DisconnectReason::None {
            log::info!("{shown} disconnected");
        } else {
            log::info!("{shown} disconnected: {}", reason.as_str());
        }

        if notify_peer {
            self.send_body(slot, PacketBody::Disconnect {
                reason_raw: reason as u32,
            });
        }

        let tick = self.sim.current_tick();
        self.broadcast_except(
            Message::PlayerRemoved {
                world_index: tick,
                player_num: slot as u32,
                reason_raw: reason as u32,
            },
            Some(slot),
        );

        queue::set_not_playing(&mut self.registry, slot);
        self.server_clients.release(slot);
        self.server_clients.zero(slot);
        self.registry.init_slot(slot);

        let connected = self.connected_slots();
        queue::renumber(&mut self.registry, &connected);
        self.broadcast_queue_state();
    }
}
