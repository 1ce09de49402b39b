//! The wire message registry: every message kind exchanged between server
//! and clients, the packet framing around them, and the validation helpers
//! for untrusted variable-length payloads.
//!
//! The kind set is closed and versioned. Numeric ids are wire contract:
//! new kinds are appended, existing kinds are never renumbered.

use rkyv::{Archive, Deserialize, Serialize, rancor};

use crate::MAX_CLIENTS;
use crate::clients::PositionSnapshot;
use crate::command::PlayerCommand;
use crate::settings::GameSettings;
use crate::team::FlagState;

pub const PROTOCOL_MAGIC: u32 = 0x4652_4159;
pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_PORT: u16 = 10666;

/// Largest datagram we will emit or accept. Full game-state payloads are
/// the only kind that approaches this.
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Longest chat message in bytes, terminator excluded.
pub const MAX_CHAT_LEN: usize = 256;

/// Logical delivery class. Sequenced traffic is de-duplicated and ordered
/// per peer (late arrivals are dropped); unsequenced traffic is taken as it
/// comes and carries its own ordering index where it matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
#[repr(u8)]
pub enum Channel {
    Sequenced = 0,
    Unsequenced = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct PacketHeader {
    pub magic: u32,
    pub version: u32,
    pub channel: Channel,
    pub sequence: u32,
    pub ack: u32,
    pub ack_bits: u32,
}

impl PacketHeader {
    pub fn new(channel: Channel, sequence: u32, ack: u32, ack_bits: u32) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
            channel,
            sequence,
            ack,
            ack_bits,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == PROTOCOL_MAGIC && self.version == PROTOCOL_VERSION
    }
}

/// Why a peer was (or is being) disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DisconnectReason {
    None = 0,
    ServerFull = 1,
    InvalidMessage = 2,
    ExcessiveLatency = 3,
    CommandFlood = 4,
    Kicked = 5,
    Banned = 6,
}

impl DisconnectReason {
    pub fn from_raw(value: u32) -> Option<DisconnectReason> {
        match value {
            0 => Some(DisconnectReason::None),
            1 => Some(DisconnectReason::ServerFull),
            2 => Some(DisconnectReason::InvalidMessage),
            3 => Some(DisconnectReason::ExcessiveLatency),
            4 => Some(DisconnectReason::CommandFlood),
            5 => Some(DisconnectReason::Kicked),
            6 => Some(DisconnectReason::Banned),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DisconnectReason::None => "",
            DisconnectReason::ServerFull => "Server is full",
            DisconnectReason::InvalidMessage => "Invalid message received",
            DisconnectReason::ExcessiveLatency => "Latency limit exceeded",
            DisconnectReason::CommandFlood => "Command flood",
            DisconnectReason::Kicked => "Kicked",
            DisconnectReason::Banned => "Banned",
        }
    }
}

/// Stable numeric id for each message kind. Append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageKind {
    GameState = 0,
    Sync = 1,
    MapStarted = 2,
    MapCompleted = 3,
    AuthResult = 4,
    ClientInit = 5,
    PlayerCommand = 6,
    ClientStatus = 7,
    PlayerSpawned = 8,
    PlayerInfoUpdated = 9,
    PlayerWeaponState = 10,
    PlayerRemoved = 11,
    PlayerTouchedSpecial = 12,
    ServerMessage = 13,
    PlayerMessage = 14,
    PuffSpawned = 15,
    BloodSpawned = 16,
    ActorSpawned = 17,
    ActorPosition = 18,
    ActorTarget = 19,
    ActorTracer = 20,
    ActorState = 21,
    ActorAttribute = 22,
    ActorDamaged = 23,
    ActorKilled = 24,
    ActorRemoved = 25,
    LineActivated = 26,
    MonsterActive = 27,
    MonsterAwakened = 28,
    MissileSpawned = 29,
    MissileExploded = 30,
    SectorPosition = 31,
    AnnouncerEvent = 32,
    VoteRequest = 33,
    Vote = 34,
    VoteResult = 35,
    TicFinished = 36,
    ClientRequest = 37,
}

pub const MESSAGE_KIND_COUNT: usize = 38;

impl MessageKind {
    /// Human-readable name, for logs and demo tooling.
    pub fn name(self) -> &'static str {
        const NAMES: [&str; MESSAGE_KIND_COUNT] = [
            "game state",
            "sync",
            "map started",
            "map completed",
            "authorization result",
            "client initialization",
            "player command",
            "client status",
            "player spawned",
            "player info updated",
            "player weapon state",
            "player removed",
            "player touched special",
            "server message",
            "player message",
            "puff spawned",
            "blood spawned",
            "actor spawned",
            "actor position",
            "actor target",
            "actor tracer",
            "actor state",
            "actor attribute",
            "actor damaged",
            "actor killed",
            "actor removed",
            "line activated",
            "monster active",
            "monster awakened",
            "missile spawned",
            "missile exploded",
            "sector position",
            "announcer event",
            "vote request",
            "vote",
            "vote result",
            "tic finished",
            "client request",
        ];
        NAMES[self as usize]
    }
}

/// What a client is asking the server for in a client-request message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RequestKind {
    Auth = 0,
    Join = 1,
    Spectate = 2,
}

impl RequestKind {
    pub fn from_raw(value: u32) -> Option<RequestKind> {
        match value {
            0 => Some(RequestKind::Auth),
            1 => Some(RequestKind::Join),
            2 => Some(RequestKind::Spectate),
            _ => None,
        }
    }
}

/// One scalar crossing the wire, tagged with its type.
#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum SyncValue {
    Int(i32),
    Boolean(bool),
    Float(f32),
}

/// Variable part of a player-info update: either a bounded, NUL-terminated
/// byte string with its redundant declared length, or one tagged scalar.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum InfoPayload {
    Text { declared_len: u32, bytes: Vec<u8> },
    Value(SyncValue),
}

/// The generic field-sync message: one named field of one player.
/// `info_raw` stays raw through decode so unknown values survive to the
/// apply layer, where they are rejected with a log line instead of a
/// decode failure.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PlayerInfoUpdate {
    pub world_index: u32,
    pub player_num: u32,
    pub info_raw: u32,
    /// Element index for array-shaped fields, 0 otherwise.
    pub array_index: u32,
    pub payload: InfoPayload,
}

/// The full-state payload sent to a joining or resynchronizing client:
/// everything needed to load the map and align, plus the serialized
/// simulation blob.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct GameStatePayload {
    /// Server tick this snapshot was taken at; deltas older than this are
    /// safe to discard on the receiving side.
    pub world_index: u32,
    pub map_number: u32,
    pub rng_seed: u32,
    /// The recipient's own slot.
    pub player_num: u32,
    pub flags: [FlagState; crate::team::TeamColor::COUNT],
    pub team_scores: [i32; crate::team::TeamColor::COUNT],
    pub players_in_game: [bool; MAX_CLIENTS],
    pub settings: GameSettings,
    /// Opaque simulation state, produced and consumed by the simulation
    /// collaborator.
    pub state: Vec<u8>,
}

/// Tick alignment, sent directly after the game state so the client starts
/// from counters that are not already stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct SyncInfo {
    pub world_index: u32,
    pub game_tick: u32,
    pub level_start_tick: u32,
    pub base_tick: u32,
    pub level_time: u32,
}

/// Compact wire form of a session record, sent when a new client must learn
/// about an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ClientSummary {
    pub join_tick: u32,
    pub spectating: bool,
    pub team_raw: i32,
    pub queue_level_raw: i32,
    pub queue_position: u32,
    pub floor_status_raw: i32,
    pub afk: bool,
    pub score: i32,
    pub client_lag: u32,
    pub server_lag: u32,
    pub transit_lag: u32,
    pub packet_loss: u8,
    pub death_ticks: u32,
    pub death_count: u32,
}

impl ClientSummary {
    pub fn capture(client: &crate::clients::ClientState) -> Self {
        Self {
            join_tick: client.join_tick,
            spectating: client.spectating,
            team_raw: client.team as i32,
            queue_level_raw: client.queue_level as i32,
            queue_position: client.queue_position,
            floor_status_raw: client.floor_status as i32,
            afk: client.afk,
            score: client.score,
            client_lag: client.client_lag,
            server_lag: client.server_lag,
            transit_lag: client.transit_lag,
            packet_loss: client.packet_loss,
            death_ticks: client.death_ticks,
            death_count: client.death_count,
        }
    }

    /// Install onto a local record. Raw enum values that fail to decode
    /// leave the current field untouched.
    pub fn install(&self, client: &mut crate::clients::ClientState) {
        use crate::clients::{FloorStatus, QueueLevel};
        use crate::team::TeamColor;

        client.join_tick = self.join_tick;
        client.spectating = self.spectating;
        if let Some(team) = TeamColor::from_raw(self.team_raw) {
            client.team = team;
        }
        if let Some(level) = QueueLevel::from_raw(self.queue_level_raw) {
            client.queue_level = level;
        }
        client.queue_position = self.queue_position;
        if let Some(status) = FloorStatus::from_raw(self.floor_status_raw) {
            client.floor_status = status;
        }
        client.afk = self.afk;
        client.score = self.score;
        client.client_lag = self.client_lag;
        client.server_lag = self.server_lag;
        client.transit_lag = self.transit_lag;
        client.packet_loss = self.packet_loss;
        client.death_ticks = self.death_ticks;
        client.death_count = self.death_count;
    }
}

/// Every message kind exchanged after connection setup. Variant order
/// mirrors [`MessageKind`] and is append-only for the same reason.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum Message {
    GameState(GameStatePayload),
    Sync(SyncInfo),
    MapStarted {
        world_index: u32,
        map_number: u32,
        game_tick: u32,
        level_start_tick: u32,
        base_tick: u32,
        level_time: u32,
        players_in_game: [bool; MAX_CLIENTS],
        settings: GameSettings,
        net_ids: [u32; MAX_CLIENTS],
    },
    MapCompleted {
        world_index: u32,
        new_map_number: u32,
        enter_intermission: bool,
    },
    AuthResult {
        world_index: u32,
        success: bool,
        level_raw: u32,
    },
    ClientInit {
        world_index: u32,
        client_num: u32,
        summary: ClientSummary,
    },
    PlayerCommand(PlayerCommand),
    ClientStatus {
        world_index: u32,
        client_num: u32,
        server_lag: u32,
        transit_lag: u32,
        packet_loss: u8,
        position: PositionSnapshot,
        last_command_run: u32,
        floor_status_raw: i32,
    },
    PlayerSpawned {
        world_index: u32,
        player_num: u32,
        net_id: u32,
        as_spectator: bool,
        origin: [f32; 3],
        angle: f32,
    },
    PlayerInfoUpdated(PlayerInfoUpdate),
    PlayerWeaponState {
        world_index: u32,
        player_num: u32,
        psprite_slot: u32,
        weapon_state: u32,
    },
    PlayerRemoved {
        world_index: u32,
        player_num: u32,
        reason_raw: u32,
    },
    PlayerTouchedSpecial {
        world_index: u32,
        player_num: u32,
        thing_net_id: u32,
    },
    ServerMessage {
        world_index: u32,
        hud_message: bool,
        prepend_name: bool,
        declared_len: u32,
        bytes: Vec<u8>,
    },
    PlayerMessage {
        world_index: u32,
        recipient_raw: u32,
        sender_num: u32,
        recipient_num: u32,
        declared_len: u32,
        bytes: Vec<u8>,
    },
    PuffSpawned {
        world_index: u32,
        origin: [f32; 3],
        angle: f32,
        up_down: i32,
        particle: bool,
    },
    BloodSpawned {
        world_index: u32,
        target_net_id: u32,
        origin: [f32; 3],
        angle: f32,
        damage: i32,
    },
    ActorSpawned {
        world_index: u32,
        net_id: u32,
        origin: [f32; 3],
        momentum: [f32; 3],
        angle: f32,
        flags: u32,
        actor_type: u32,
    },
    ActorPosition {
        world_index: u32,
        net_id: u32,
        position: PositionSnapshot,
    },
    ActorTarget {
        world_index: u32,
        net_id: u32,
        target_net_id: u32,
    },
    ActorTracer {
        world_index: u32,
        net_id: u32,
        tracer_net_id: u32,
    },
    ActorState {
        world_index: u32,
        net_id: u32,
        state_number: u32,
        actor_type: u32,
    },
    ActorAttribute {
        world_index: u32,
        net_id: u32,
        attribute_raw: u32,
        value: i32,
    },
    ActorDamaged {
        world_index: u32,
        target_net_id: u32,
        inflictor_net_id: u32,
        source_net_id: u32,
        health_damage: i32,
        armor_damage: i32,
        means_of_death: u32,
        fatal: bool,
        just_hit: bool,
    },
    ActorKilled {
        world_index: u32,
        target_net_id: u32,
        inflictor_net_id: u32,
        source_net_id: u32,
        damage: i32,
        means_of_death: u32,
    },
    ActorRemoved {
        world_index: u32,
        net_id: u32,
    },
    LineActivated {
        world_index: u32,
        activation_raw: u32,
        net_id: u32,
        origin: [f32; 3],
        angle: f32,
        line_number: u32,
        side: u32,
    },
    MonsterActive {
        world_index: u32,
        net_id: u32,
    },
    MonsterAwakened {
        world_index: u32,
        net_id: u32,
    },
    MissileSpawned {
        world_index: u32,
        net_id: u32,
        source_net_id: u32,
        missile_type: u32,
        origin: [f32; 3],
        momentum: [f32; 3],
        angle: f32,
    },
    MissileExploded {
        world_index: u32,
        net_id: u32,
        tics: u32,
    },
    SectorPosition {
        world_index: u32,
        sector_number: u32,
        ceiling_height: f32,
        floor_height: f32,
    },
    AnnouncerEvent {
        world_index: u32,
        event_raw: u32,
        source_net_id: u32,
    },
    VoteRequest {
        world_index: u32,
        declared_len: u32,
        bytes: Vec<u8>,
    },
    Vote {
        world_index: u32,
        yea: bool,
    },
    VoteResult {
        world_index: u32,
        passed: bool,
        declared_len: u32,
        bytes: Vec<u8>,
    },
    TicFinished {
        world_index: u32,
    },
    ClientRequest {
        world_index: u32,
        request_raw: u32,
        /// Auth requests carry the password here; other kinds leave it
        /// empty.
        declared_len: u32,
        bytes: Vec<u8>,
    },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::GameState(_) => MessageKind::GameState,
            Message::Sync(_) => MessageKind::Sync,
            Message::MapStarted { .. } => MessageKind::MapStarted,
            Message::MapCompleted { .. } => MessageKind::MapCompleted,
            Message::AuthResult { .. } => MessageKind::AuthResult,
            Message::ClientInit { .. } => MessageKind::ClientInit,
            Message::PlayerCommand(_) => MessageKind::PlayerCommand,
            Message::ClientStatus { .. } => MessageKind::ClientStatus,
            Message::PlayerSpawned { .. } => MessageKind::PlayerSpawned,
            Message::PlayerInfoUpdated(_) => MessageKind::PlayerInfoUpdated,
            Message::PlayerWeaponState { .. } => MessageKind::PlayerWeaponState,
            Message::PlayerRemoved { .. } => MessageKind::PlayerRemoved,
            Message::PlayerTouchedSpecial { .. } => MessageKind::PlayerTouchedSpecial,
            Message::ServerMessage { .. } => MessageKind::ServerMessage,
            Message::PlayerMessage { .. } => MessageKind::PlayerMessage,
            Message::PuffSpawned { .. } => MessageKind::PuffSpawned,
            Message::BloodSpawned { .. } => MessageKind::BloodSpawned,
            Message::ActorSpawned { .. } => MessageKind::ActorSpawned,
            Message::ActorPosition { .. } => MessageKind::ActorPosition,
            Message::ActorTarget { .. } => MessageKind::ActorTarget,
            Message::ActorTracer { .. } => MessageKind::ActorTracer,
            Message::ActorState { .. } => MessageKind::ActorState,
            Message::ActorAttribute { .. } => MessageKind::ActorAttribute,
            Message::ActorDamaged { .. } => MessageKind::ActorDamaged,
            Message::ActorKilled { .. } => MessageKind::ActorKilled,
            Message::ActorRemoved { .. } => MessageKind::ActorRemoved,
            Message::LineActivated { .. } => MessageKind::LineActivated,
            Message::MonsterActive { .. } => MessageKind::MonsterActive,
            Message::MonsterAwakened { .. } => MessageKind::MonsterAwakened,
            Message::MissileSpawned { .. } => MessageKind::MissileSpawned,
            Message::MissileExploded { .. } => MessageKind::MissileExploded,
            Message::SectorPosition { .. } => MessageKind::SectorPosition,
            Message::AnnouncerEvent { .. } => MessageKind::AnnouncerEvent,
            Message::VoteRequest { .. } => MessageKind::VoteRequest,
            Message::Vote { .. } => MessageKind::Vote,
            Message::VoteResult { .. } => MessageKind::VoteResult,
            Message::TicFinished { .. } => MessageKind::TicFinished,
            Message::ClientRequest { .. } => MessageKind::ClientRequest,
        }
    }

    /// The server tick this message is associated with. Deltas older than a
    /// freshly-applied snapshot are discarded by this index.
    pub fn world_index(&self) -> u32 {
        match self {
            Message::GameState(payload) => payload.world_index,
            Message::Sync(info) => info.world_index,
            Message::PlayerCommand(command) => command.world_index,
            Message::PlayerInfoUpdated(update) => update.world_index,
            Message::MapStarted { world_index, .. }
            | Message::MapCompleted { world_index, .. }
            | Message::AuthResult { world_index, .. }
            | Message::ClientInit { world_index, .. }
            | Message::ClientStatus { world_index, .. }
            | Message::PlayerSpawned { world_index, .. }
            | Message::PlayerWeaponState { world_index, .. }
            | Message::PlayerRemoved { world_index, .. }
            | Message::PlayerTouchedSpecial { world_index, .. }
            | Message::ServerMessage { world_index, .. }
            | Message::PlayerMessage { world_index, .. }
            | Message::PuffSpawned { world_index, .. }
            | Message::BloodSpawned { world_index, .. }
            | Message::ActorSpawned { world_index, .. }
            | Message::ActorPosition { world_index, .. }
            | Message::ActorTarget { world_index, .. }
            | Message::ActorTracer { world_index, .. }
            | Message::ActorState { world_index, .. }
            | Message::ActorAttribute { world_index, .. }
            | Message::ActorDamaged { world_index, .. }
            | Message::ActorKilled { world_index, .. }
            | Message::ActorRemoved { world_index, .. }
            | Message::LineActivated { world_index, .. }
            | Message::MonsterActive { world_index, .. }
            | Message::MonsterAwakened { world_index, .. }
            | Message::MissileSpawned { world_index, .. }
            | Message::MissileExploded { world_index, .. }
            | Message::SectorPosition { world_index, .. }
            | Message::AnnouncerEvent { world_index, .. }
            | Message::VoteRequest { world_index, .. }
            | Message::Vote { world_index, .. }
            | Message::VoteResult { world_index, .. }
            | Message::TicFinished { world_index }
            | Message::ClientRequest { world_index, .. } => *world_index,
        }
    }
}

/// Who a player message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ChatRecipient {
    Server = 0,
    Player = 1,
    Team = 2,
    All = 3,
}

impl ChatRecipient {
    pub fn from_raw(value: u32) -> Option<ChatRecipient> {
        match value {
            0 => Some(ChatRecipient::Server),
            1 => Some(ChatRecipient::Player),
            2 => Some(ChatRecipient::Team),
            3 => Some(ChatRecipient::All),
            _ => None,
        }
    }
}

/// Transport-level frames. Connection control lives below the message
/// layer; the event loop turns these into connect/disconnect events and
/// never hands them to the dispatcher or the demo log.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum PacketBody {
    Connect { protocol_version: u32 },
    ConnectAck { client_num: u32, connect_value: u32 },
    Deny { reason_raw: u32 },
    Disconnect { reason_raw: u32 },
    Message(Message),
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Packet {
    pub header: PacketHeader,
    pub body: PacketBody,
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
    #[error("bad packet header")]
    BadHeader,
    #[error("datagram of {0} bytes exceeds the size ceiling")]
    Oversized(usize),
}

impl Packet {
    pub fn new(header: PacketHeader, body: PacketBody) -> Self {
        Self { header, body }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, ProtocolError> {
        let bytes = rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(ProtocolError::Serialize)?;
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(ProtocolError::Oversized(bytes.len()));
        }
        Ok(bytes)
    }

    /// Validated decode of an untrusted datagram. Anything that fails here
    /// is a protocol violation: logged and dropped, never fatal.
    pub fn deserialize(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(ProtocolError::Oversized(data.len()));
        }
        let packet: Packet =
            rkyv::from_bytes::<Self, rancor::Error>(data).map_err(ProtocolError::Deserialize)?;
        if !packet.header.is_valid() {
            return Err(ProtocolError::BadHeader);
        }
        Ok(packet)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TextError {
    #[error("declared length is zero")]
    Empty,
    #[error("declared length {declared} does not match payload of {actual} bytes")]
    LengthMismatch { declared: u32, actual: usize },
    #[error("declared length {0} exceeds the field bound {1}")]
    TooLong(u32, usize),
    #[error("payload is not terminated")]
    MissingTerminator,
    #[error("payload is not valid UTF-8")]
    NotUtf8,
}

/// Validate an untrusted length-prefixed, NUL-terminated byte string and
/// borrow its text. Every check runs before any string handling, so a
/// hostile payload can never cause a read past its own bytes: the declared
/// length must match the payload exactly, the terminator must be the final
/// byte, and the text must fit the field bound.
pub fn extract_text(declared_len: u32, bytes: &[u8], max_len: usize) -> Result<&str, TextError> {
    if declared_len == 0 {
        return Err(TextError::Empty);
    }
    if declared_len as usize > max_len + 1 {
        return Err(TextError::TooLong(declared_len, max_len));
    }
    if bytes.len() != declared_len as usize {
        return Err(TextError::LengthMismatch {
            declared: declared_len,
            actual: bytes.len(),
        });
    }
    match bytes.iter().position(|&b| b == 0) {
        Some(at) if at == bytes.len() - 1 => {}
        Some(at) => {
            // An interior NUL means the declared length lied about where
            // the string ends.
            return Err(TextError::LengthMismatch {
                declared: declared_len,
                actual: at + 1,
            });
        }
        None => return Err(TextError::MissingTerminator),
    }
    std::str::from_utf8(&bytes[..bytes.len() - 1]).map_err(|_| TextError::NotUtf8)
}

/// Encode text the way [`extract_text`] expects it back.
pub fn encode_text(text: &str) -> (u32, Vec<u8>) {
    let mut bytes = Vec::with_capacity(text.len() + 1);
    bytes.extend_from_slice(text.as_bytes());
    bytes.push(0);
    (bytes.len() as u32, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_ids_are_stable() {
        // Wire contract: these ids never change.
        assert_eq!(MessageKind::GameState as u32, 0);
        assert_eq!(MessageKind::PlayerCommand as u32, 6);
        assert_eq!(MessageKind::PlayerInfoUpdated as u32, 9);
        assert_eq!(MessageKind::PlayerMessage as u32, 14);
        assert_eq!(MessageKind::TicFinished as u32, 36);
        // Appended after the initial set; must never move.
        assert_eq!(MessageKind::ClientRequest as u32, 37);
    }

    #[test]
    fn every_kind_has_a_name() {
        assert_eq!(MessageKind::GameState.name(), "game state");
        assert_eq!(MessageKind::TicFinished.name(), "tic finished");
        assert_eq!(MessageKind::PlayerInfoUpdated.name(), "player info updated");
    }

    #[test]
    fn packet_round_trip() {
        let header = PacketHeader::new(Channel::Sequenced, 7, 3, 0b101);
        let packet = Packet::new(
            header,
            PacketBody::Message(Message::TicFinished { world_index: 99 }),
        );

        let bytes = packet.serialize().unwrap();
        let decoded = Packet::deserialize(&bytes).unwrap();

        assert_eq!(decoded.header, header);
        assert_eq!(decoded, packet);
    }

    #[test]
    fn garbage_datagrams_are_rejected() {
        assert!(Packet::deserialize(&[0x13, 0x37, 0x00]).is_err());
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut header = PacketHeader::new(Channel::Sequenced, 0, 0, 0);
        header.magic = 0xdead_beef;
        let packet = Packet::new(
            header,
            PacketBody::Message(Message::TicFinished { world_index: 0 }),
        );
        let bytes = packet.serialize().unwrap();
        assert!(matches!(
            Packet::deserialize(&bytes),
            Err(ProtocolError::BadHeader)
        ));
    }

    #[test]
    fn text_round_trip() {
        let (declared, bytes) = encode_text("hello there");
        assert_eq!(extract_text(declared, &bytes, 64).unwrap(), "hello there");
    }

    #[test]
    fn zero_declared_length_is_rejected() {
        assert_eq!(extract_text(0, &[], 64), Err(TextError::Empty));
    }

    #[test]
    fn declared_length_beyond_payload_is_rejected() {
        // Claims 50 bytes, delivers 10. Must fail without touching
        // anything past the real payload.
        let bytes = *b"malicious\0";
        assert!(matches!(
            extract_text(50, &bytes, 64),
            Err(TextError::LengthMismatch {
                declared: 50,
                actual: 10
            })
        ));
    }

    #[test]
    fn missing_terminator_is_rejected() {
        let bytes = *b"no-term!";
        assert_eq!(
            extract_text(8, &bytes, 64),
            Err(TextError::MissingTerminator)
        );
    }

    #[test]
    fn interior_nul_is_rejected() {
        let bytes = *b"ab\0cd\0";
        assert!(matches!(
            extract_text(6, &bytes, 64),
            Err(TextError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn over_bound_text_is_rejected() {
        let (declared, bytes) = encode_text("abcdefgh");
        assert!(matches!(
            extract_text(declared, &bytes, 4),
            Err(TextError::TooLong(9, 4))
        ));
    }

    #[test]
    fn disconnect_reasons_round_trip() {
        for raw in 0..7 {
            let reason = DisconnectReason::from_raw(raw).unwrap();
            assert_eq!(reason as u32, raw);
        }
        assert!(DisconnectReason::from_raw(7).is_none());
    }
}
