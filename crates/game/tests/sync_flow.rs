use std::net::SocketAddr;
use std::time::Duration;

use fray::{
    ApplyContext, Channel, ClientInfo, ClientRegistry, DeltaBuffer, GameSettings, GameType,
    InfoPayload, InvalidState, MAX_CLIENTS, Message, NetEvent, NetworkEndpoint, PacketBody,
    PlayerCommand, PlayerInfoUpdate, PlayerPreferences, PositionSnapshot, Role, ServerClients,
    Simulation, SyncValue, TeamColor, apply_game_state, apply_player_info, build_game_state,
    build_scalar_info,
};

/// Black-box simulation stand-in for driving the sync layer.
#[derive(Debug, Default)]
struct FixtureSim {
    tick: u32,
    state: Vec<u8>,
}

impl FixtureSim {
    fn at_tick(tick: u32) -> Self {
        Self {
            tick,
            state: vec![0xab; 16],
        }
    }
}

impl Simulation for FixtureSim {
    fn current_tick(&self) -> u32 {
        self.tick
    }

    fn run_tick(&mut self) {
        self.tick += 1;
    }

    fn apply_command(&mut self, _slot: usize, _command: &PlayerCommand) {}

    fn player_position(&self, _slot: usize) -> Option<PositionSnapshot> {
        None
    }

    fn serialize_full_state(&self) -> Vec<u8> {
        self.state.clone()
    }

    fn deserialize_full_state(&mut self, state: &[u8]) -> Result<(), InvalidState> {
        if state.is_empty() {
            return Err(InvalidState);
        }
        self.state = state.to_vec();
        Ok(())
    }

    fn respawn_player(&mut self, _slot: usize, _as_spectator: bool) {}
}

fn scratch(tag: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("fray-it-{tag}-{}.state", std::process::id()))
}

fn team_settings() -> GameSettings {
    GameSettings {
        game_type: GameType::TeamDeathmatch,
        ..GameSettings::default()
    }
}

#[test]
fn join_flow_discards_deltas_older_than_the_snapshot() {
    // Server side: slot 3 joins at tick 1000.
    let sim = FixtureSim::at_tick(1000);
    let mut registry = ClientRegistry::new();
    registry.set_teams_enabled(true);
    registry.player_mut(0).unwrap().in_game = true;

    let path = scratch("join");
    let payload = build_game_state(
        &sim,
        &registry,
        &team_settings(),
        1,
        0xbeef,
        3,
        &path,
    )
    .unwrap();
    assert_eq!(payload.world_index, 1000);
    assert_eq!(payload.player_num, 3);

    // Client side: three deltas race the snapshot.
    let mut deltas = DeltaBuffer::new(16);
    deltas.push(Message::TicFinished { world_index: 998 });
    deltas.push(Message::TicFinished { world_index: 1001 });
    deltas.push(Message::TicFinished { world_index: 1002 });

    let mut client_sim = FixtureSim::default();
    let mut client_registry = ClientRegistry::new();
    apply_game_state(&mut client_sim, &mut client_registry, &payload).unwrap();

    let (replay, discarded) = deltas.drain_from(payload.world_index);
    assert_eq!(discarded, 1);
    assert_eq!(replay.len(), 2);
    assert_eq!(replay[0].world_index(), 1001);
    assert_eq!(replay[1].world_index(), 1002);

    let _ = std::fs::remove_file(path);
}

#[test]
fn team_switch_propagates_to_mirrors_with_score() {
    // Server applies client 2's request for the red team.
    let mut server_registry = ClientRegistry::new();
    server_registry.set_teams_enabled(true);
    let mut server_clients = ServerClients::new();
    server_registry.set_score(2, 5);

    let request = PlayerInfoUpdate {
        world_index: 500,
        player_num: 2,
        info_raw: ClientInfo::Team as u32,
        array_index: 0,
        payload: InfoPayload::Value(SyncValue::Int(TeamColor::Red as i32)),
    };
    let ctx = ApplyContext {
        role: Role::Server,
        local_slot: None,
    };
    let outcome = apply_player_info(
        &ctx,
        &mut server_registry,
        Some(&mut server_clients),
        &request,
    )
    .unwrap();

    assert!(outcome.broadcast);
    assert_eq!(server_registry.team_score(TeamColor::Red), 5);

    // The relay is rebuilt from the server's store, then applied by a
    // spectating third client.
    let prefs = PlayerPreferences::default();
    let relay = build_scalar_info(&server_registry, &prefs, 2, ClientInfo::Team, 500).unwrap();

    let mut mirror = ClientRegistry::new();
    mirror.set_teams_enabled(true);
    mirror.set_score(2, 5);
    let ctx = ApplyContext {
        role: Role::Client,
        local_slot: Some(7),
    };
    let outcome = apply_player_info(&ctx, &mut mirror, None, &relay).unwrap();

    assert_eq!(mirror.client(2).unwrap().team, TeamColor::Red);
    assert_eq!(mirror.team_score(TeamColor::Red), 5);
    assert!(outcome.notices.iter().any(|n| n.contains("red team")));
}

#[test]
fn malicious_name_length_never_reads_past_the_payload() {
    let mut registry = ClientRegistry::new();
    let hostile = PlayerInfoUpdate {
        world_index: 0,
        player_num: 1,
        info_raw: ClientInfo::Name as u32,
        array_index: 0,
        payload: InfoPayload::Text {
            declared_len: 50,
            bytes: b"ten bytes\0".to_vec(),
        },
    };
    let ctx = ApplyContext {
        role: Role::Client,
        local_slot: None,
    };
    assert!(apply_player_info(&ctx, &mut registry, None, &hostile).is_err());
    assert!(registry.player(1).unwrap().name.is_empty());
}

#[test]
fn slots_stay_dense_and_zeroed_across_churn() {
    let mut server_clients = ServerClients::new();
    let mut registry = ClientRegistry::new();

    let addr = |n: usize| -> SocketAddr { format!("10.1.2.{}:7000", n + 1).parse().unwrap() };

    // Fill every slot, then drop every other one.
    for n in 0..MAX_CLIENTS {
        let slot = server_clients.claim(addr(n)).unwrap();
        registry.init_slot(slot);
        registry.player_mut(slot).unwrap().name = format!("p{n}");
    }
    for slot in (0..MAX_CLIENTS).step_by(2) {
        server_clients.release(slot);
        server_clients.zero(slot);
        registry.init_slot(slot);
    }

    // Every released slot reads as zeroed defaults.
    for slot in (0..MAX_CLIENTS).step_by(2) {
        assert!(registry.player(slot).unwrap().name.is_empty());
        assert!(registry.client(slot).unwrap().spectating);
        assert!(!server_clients.get(slot).unwrap().is_connected());
    }

    // Reconnects land in the freed slots; survivors keep theirs.
    let reclaimed = server_clients.claim(addr(100)).unwrap();
    assert_eq!(reclaimed % 2, 0);
    assert_eq!(
        server_clients.slot_for_addr(addr(1)),
        Some(1),
        "survivor slot moved"
    );

    // Each connected peer maps to a unique slot in range.
    let mut seen = std::collections::HashSet::new();
    for (slot, _) in server_clients.iter_connected() {
        assert!(slot < MAX_CLIENTS);
        assert!(seen.insert(slot));
    }
}

#[test]
fn field_updates_survive_a_loopback_transit() {
    let mut sender = NetworkEndpoint::bind("127.0.0.1:0").unwrap();
    let mut receiver = NetworkEndpoint::bind("127.0.0.1:0").unwrap();

    let mut source = ClientRegistry::new();
    source.player_mut(4).unwrap().health = 61;
    let prefs = PlayerPreferences::default();
    let update = build_scalar_info(&source, &prefs, 4, ClientInfo::Health, 42).unwrap();

    let packet = sender.make_packet(
        Channel::Sequenced,
        0,
        0,
        PacketBody::Message(Message::PlayerInfoUpdated(update)),
    );
    sender.send_to(&packet, receiver.local_addr()).unwrap();

    let events = receiver.poll(Duration::from_millis(200)).unwrap();
    assert_eq!(events.len(), 1);
    let NetEvent::Message { packet, .. } = &events[0] else {
        panic!("expected a message event");
    };
    let PacketBody::Message(Message::PlayerInfoUpdated(received)) = &packet.body else {
        panic!("expected a player info update");
    };

    let mut mirror = ClientRegistry::new();
    let ctx = ApplyContext {
        role: Role::Client,
        local_slot: Some(0),
    };
    apply_player_info(&ctx, &mut mirror, None, received).unwrap();
    assert_eq!(mirror.player(4).unwrap().health, 61);
}
