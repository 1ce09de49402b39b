pub mod clients;
pub mod command;
pub mod demo;
pub mod gamestate;
pub mod net;
pub mod player;
pub mod settings;
pub mod sim;
pub mod spree;
pub mod sync;
pub mod team;

/// Simulation ticks per second.
pub const TICRATE: u32 = 35;

/// Hard ceiling on peers; slot arrays are this wide for the process
/// lifetime and are recycled, never reallocated.
pub const MAX_CLIENTS: usize = 32;

/// Latency tolerated between any pair of peers, in seconds. A peer past
/// half of this is disconnected.
pub const MAX_LATENCY_SECS: u32 = 10;

/// Which side of the protocol this process is. Injected into the
/// dispatcher and the sync layer; never a compile-time flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

pub use clients::{
    AmmoSwitch, AuthLevel, ClientOptions, ClientRegistry, ClientState, ClientStats, ConnectId,
    DeathCause, FloorStatus, PendingRequest, PlayerPreferences, PositionHistory, PositionSnapshot,
    QueueLevel, ServerClientState, ServerClients, WeaponSwitch,
};
pub use command::{Buttons, CommandBuffer, PlayerCommand};
pub use demo::{DemoError, DemoHeader, DemoReader, DemoRecord, DemoRecorder, DemoSide,
    record_inbound};
pub use gamestate::{DeltaBuffer, GameStateError, apply_game_state, build_game_state,
    build_sync_info};
pub use net::{
    AckTracker, Channel, ChatRecipient, ClientSummary, DEFAULT_PORT, DisconnectReason,
    GameStatePayload, ReceiveTracker,
    InfoPayload, MAX_CHAT_LEN, MAX_DATAGRAM_SIZE, Message, MessageKind, NetEvent, NetStats,
    NetworkEndpoint, Packet, PacketBody, PacketHeader, PlayerInfoUpdate, ProtocolError,
    RequestKind, SyncInfo, SyncValue, TextError, encode_text, extract_text,
};
pub use player::{MAX_NAME_LEN, MAX_STRING_LEN, NUM_AMMO, NUM_CARDS, NUM_POWERS, NUM_WEAPONS,
    PlayerState, WeaponId};
pub use settings::{GameSettings, GameType, MatchFlags};
pub use sim::{ConsoleNotifier, InvalidState, Notifier, NotifyTarget, SimEvent, Simulation};
pub use spree::{ConsecutiveFragLevel, FragKind, FragLevel, SPREE_WINDOW_TICKS, SpreeUpdate,
    record_frag, reset_life};
pub use sync::{
    ApplyContext, ApplyOutcome, CLIENT_INFO_COUNT, ClientInfo, FieldShape, INFO_TABLE, InfoSpec,
    SyncError, Writer, apply_player_info, build_array_info, build_scalar_info, build_string_info,
};
pub use team::{FlagState, TeamColor};
