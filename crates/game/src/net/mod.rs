pub mod endpoint;
pub mod protocol;
pub mod tracking;

pub use endpoint::{NetEvent, NetStats, NetworkEndpoint};
pub use protocol::{
    Channel, ChatRecipient, ClientSummary, DEFAULT_PORT, DisconnectReason, GameStatePayload,
    InfoPayload, MAX_CHAT_LEN, MAX_DATAGRAM_SIZE, MESSAGE_KIND_COUNT, Message, MessageKind,
    PROTOCOL_MAGIC, PROTOCOL_VERSION, Packet, PacketBody, PacketHeader, PlayerInfoUpdate,
    ProtocolError, RequestKind, SyncInfo, SyncValue, TextError, encode_text, extract_text,
};
pub use tracking::{AckTracker, ReceiveTracker, sequence_newer};
