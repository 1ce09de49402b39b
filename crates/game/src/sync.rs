//! The generic field-sync protocol: one message kind that can carry any
//! named field of any player's state, partitioned into three payload
//! shapes (string, array element, scalar).
//!
//! The protocol is table-driven: [`INFO_TABLE`] maps every info type to its
//! shape, its legitimate originator, and whether the server relays an
//! accepted client update to the other peers. Handlers consult the table
//! instead of hard-coding per-field chains, which also makes the whole
//! registry walkable from tests.

use crate::clients::{
    AmmoSwitch, ClientRegistry, PlayerPreferences, QueueLevel, ServerClients, WeaponSwitch,
};
use crate::net::protocol::{
    InfoPayload, PlayerInfoUpdate, SyncValue, TextError, encode_text, extract_text,
};
use crate::player::{
    CheatFlags, MAX_NAME_LEN, MAX_STRING_LEN, NUM_AMMO, NUM_CARDS, NUM_POWERS, NUM_WEAPONS,
    WeaponId,
};
use crate::team::TeamColor;
use crate::{MAX_CLIENTS, Role};

/// Every synchronizable field. Numeric values are wire contract; append
/// only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ClientInfo {
    Team = 0,
    Spectating = 1,
    KillCount = 2,
    ItemCount = 3,
    SecretCount = 4,
    Colormap = 5,
    Cheats = 6,
    Health = 7,
    ArmorPoints = 8,
    ArmorType = 9,
    ReadyWeapon = 10,
    PendingWeapon = 11,
    Frags = 12,
    PowerEnabled = 13,
    OwnsCard = 14,
    OwnsWeapon = 15,
    AmmoAmount = 16,
    MaxAmmo = 17,
    OwnsBackpack = 18,
    DidSecret = 19,
    Name = 20,
    Skin = 21,
    Class = 22,
    QueueLevel = 23,
    QueuePosition = 24,
    WeaponPreference = 25,
    WeaponSwitchOnPickup = 26,
    AmmoSwitchOnPickup = 27,
    Bobbing = 28,
    WeaponToggles = 29,
    Autoaim = 30,
    WeaponSpeed = 31,
    Buffering = 32,
    Afk = 33,
}

pub const CLIENT_INFO_COUNT: usize = 34;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    /// Length-prefixed, NUL-terminated byte string.
    Text,
    /// Element index plus one tagged scalar.
    Array,
    /// One tagged scalar.
    Scalar,
}

/// Who may legitimately originate an update of this field. Everything a
/// server sends is accepted by clients; this governs what a server will
/// take from a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Writer {
    /// Server-authoritative mirror; a client copy never originates it.
    Server,
    /// Client-declared; the server validates before accepting.
    Client,
}

#[derive(Debug, Clone, Copy)]
pub struct InfoSpec {
    pub info: ClientInfo,
    pub shape: FieldShape,
    pub writer: Writer,
    /// Whether the server relays an accepted client update to all other
    /// peers. Pure client-to-server notifications do not broadcast.
    pub broadcasts: bool,
}

const fn spec(info: ClientInfo, shape: FieldShape, writer: Writer, broadcasts: bool) -> InfoSpec {
    InfoSpec {
        info,
        shape,
        writer,
        broadcasts,
    }
}

pub const INFO_TABLE: [InfoSpec; CLIENT_INFO_COUNT] = [
    spec(ClientInfo::Team, FieldShape::Scalar, Writer::Client, true),
    spec(ClientInfo::Spectating, FieldShape::Scalar, Writer::Client, true),
    spec(ClientInfo::KillCount, FieldShape::Scalar, Writer::Server, false),
    spec(ClientInfo::ItemCount, FieldShape::Scalar, Writer::Server, false),
    spec(ClientInfo::SecretCount, FieldShape::Scalar, Writer::Server, false),
    spec(ClientInfo::Colormap, FieldShape::Scalar, Writer::Server, false),
    spec(ClientInfo::Cheats, FieldShape::Scalar, Writer::Server, false),
    spec(ClientInfo::Health, FieldShape::Scalar, Writer::Server, false),
    spec(ClientInfo::ArmorPoints, FieldShape::Scalar, Writer::Server, false),
    spec(ClientInfo::ArmorType, FieldShape::Scalar, Writer::Server, false),
    spec(ClientInfo::ReadyWeapon, FieldShape::Scalar, Writer::Client, true),
    spec(ClientInfo::PendingWeapon, FieldShape::Scalar, Writer::Client, true),
    spec(ClientInfo::Frags, FieldShape::Array, Writer::Server, false),
    spec(ClientInfo::PowerEnabled, FieldShape::Array, Writer::Server, false),
    spec(ClientInfo::OwnsCard, FieldShape::Array, Writer::Server, false),
    spec(ClientInfo::OwnsWeapon, FieldShape::Array, Writer::Server, false),
    spec(ClientInfo::AmmoAmount, FieldShape::Array, Writer::Server, false),
    spec(ClientInfo::MaxAmmo, FieldShape::Array, Writer::Server, false),
    spec(ClientInfo::OwnsBackpack, FieldShape::Scalar, Writer::Server, false),
    spec(ClientInfo::DidSecret, FieldShape::Scalar, Writer::Server, false),
    spec(ClientInfo::Name, FieldShape::Text, Writer::Client, true),
    spec(ClientInfo::Skin, FieldShape::Text, Writer::Client, true),
    spec(ClientInfo::Class, FieldShape::Text, Writer::Client, true),
    spec(ClientInfo::QueueLevel, FieldShape::Scalar, Writer::Server, false),
    spec(ClientInfo::QueuePosition, FieldShape::Scalar, Writer::Server, false),
    spec(ClientInfo::WeaponPreference, FieldShape::Array, Writer::Client, false),
    spec(ClientInfo::WeaponSwitchOnPickup, FieldShape::Scalar, Writer::Client, false),
    spec(ClientInfo::AmmoSwitchOnPickup, FieldShape::Scalar, Writer::Client, false),
    spec(ClientInfo::Bobbing, FieldShape::Scalar, Writer::Client, false),
    spec(ClientInfo::WeaponToggles, FieldShape::Scalar, Writer::Client, false),
    spec(ClientInfo::Autoaim, FieldShape::Scalar, Writer::Client, false),
    spec(ClientInfo::WeaponSpeed, FieldShape::Scalar, Writer::Client, false),
    spec(ClientInfo::Buffering, FieldShape::Scalar, Writer::Client, false),
    spec(ClientInfo::Afk, FieldShape::Scalar, Writer::Client, true),
];

impl ClientInfo {
    pub fn from_raw(value: u32) -> Option<ClientInfo> {
        INFO_TABLE
            .get(value as usize)
            .map(|entry| entry.info)
            .filter(|info| *info as u32 == value)
    }

    pub fn spec(self) -> &'static InfoSpec {
        &INFO_TABLE[self as usize]
    }

    /// Bound of the target array for array-shaped fields.
    pub fn array_len(self) -> Option<usize> {
        match self {
            ClientInfo::Frags => Some(MAX_CLIENTS),
            ClientInfo::PowerEnabled => Some(NUM_POWERS),
            ClientInfo::OwnsCard => Some(NUM_CARDS),
            ClientInfo::OwnsWeapon => Some(NUM_WEAPONS),
            ClientInfo::AmmoAmount | ClientInfo::MaxAmmo => Some(NUM_AMMO),
            ClientInfo::WeaponPreference => Some(NUM_WEAPONS + 1),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("unknown info type {0}")]
    UnknownInfo(u32),
    #[error("player slot {0} out of range")]
    BadSlot(u32),
    #[error("wrong payload shape for {0:?}")]
    WrongPayload(ClientInfo),
    #[error("bad string payload: {0}")]
    BadText(#[from] TextError),
    #[error("name of {0} bytes exceeds the limit")]
    NameTooLong(usize),
    #[error("blank name")]
    BlankName,
    #[error("invalid team {0}")]
    BadTeam(i32),
    #[error("invalid join request")]
    InvalidJoin,
    #[error("value {value} out of range for {info:?}")]
    BadValue { info: ClientInfo, value: i32 },
    #[error("array index {index} out of range for {info:?}")]
    BadIndex { info: ClientInfo, index: u32 },
    #[error("{0:?} is not client-writable")]
    NotClientWritable(ClientInfo),
    #[error("server-role apply without server client records")]
    MissingServerState,
}

impl SyncError {
    /// Text to send back to the originating peer, for rejections the peer
    /// should hear about. Everything else is just logged and dropped.
    pub fn notify_sender(&self) -> Option<String> {
        match self {
            SyncError::BadTeam(value) => Some(format!("Invalid team {value}.")),
            SyncError::InvalidJoin => Some(String::from("Invalid join request.")),
            SyncError::BlankName => Some(String::from("Cannot blank your name.")),
            SyncError::NameTooLong(_) => {
                Some(format!("Name may not exceed {MAX_NAME_LEN} characters."))
            }
            _ => None,
        }
    }
}

/// Where an apply ran and on whose behalf.
#[derive(Debug, Clone, Copy)]
pub struct ApplyContext {
    pub role: Role,
    /// The slot this process plays as, if any. Drives first- versus
    /// third-person notices and the own-weapon mirror exception.
    pub local_slot: Option<usize>,
}

/// What an accepted update asked the caller to do. The store write already
/// happened; everything here is cross-cutting follow-up.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// False for validated no-ops (value unchanged).
    pub applied: bool,
    /// Server: relay this update to all other connected peers.
    pub broadcast: bool,
    /// Server: schedule a respawn for the player.
    pub respawn: bool,
    /// Server: the player left active play; requeue them.
    pub requeue: bool,
    /// Server: additional field broadcasts for the same player,
    /// as (info, array index).
    pub extra_broadcasts: Vec<(ClientInfo, u32)>,
    /// Status lines for the local console.
    pub notices: Vec<String>,
}

impl ApplyOutcome {
    fn noop() -> Self {
        Self::default()
    }
}

/// Read one string field out of the store and wrap it for the wire.
pub fn build_string_info(
    registry: &ClientRegistry,
    slot: usize,
    info: ClientInfo,
    world_index: u32,
) -> Result<PlayerInfoUpdate, SyncError> {
    let player = registry
        .player(slot)
        .ok_or(SyncError::BadSlot(slot as u32))?;

    let text = match info {
        ClientInfo::Name => &player.name,
        ClientInfo::Skin => &player.skin,
        ClientInfo::Class => &player.class,
        _ => return Err(SyncError::WrongPayload(info)),
    };
    let (declared_len, bytes) = encode_text(text);

    Ok(PlayerInfoUpdate {
        world_index,
        player_num: slot as u32,
        info_raw: info as u32,
        array_index: 0,
        payload: InfoPayload::Text {
            declared_len,
            bytes,
        },
    })
}

/// Read one array element out of the store (or the preference set for
/// weapon orderings) and wrap it for the wire.
pub fn build_array_info(
    registry: &ClientRegistry,
    prefs: &PlayerPreferences,
    slot: usize,
    info: ClientInfo,
    array_index: u32,
    world_index: u32,
) -> Result<PlayerInfoUpdate, SyncError> {
    let player = registry
        .player(slot)
        .ok_or(SyncError::BadSlot(slot as u32))?;

    let len = info.array_len().ok_or(SyncError::WrongPayload(info))?;
    let index = array_index as usize;
    if index >= len {
        return Err(SyncError::BadIndex {
            info,
            index: array_index,
        });
    }

    let value = match info {
        ClientInfo::Frags => SyncValue::Int(player.frags[index]),
        ClientInfo::PowerEnabled => SyncValue::Int(player.powers[index]),
        ClientInfo::OwnsCard => SyncValue::Boolean(player.cards[index]),
        ClientInfo::OwnsWeapon => SyncValue::Boolean(player.weapons_owned[index]),
        ClientInfo::AmmoAmount => SyncValue::Int(player.ammo[index]),
        ClientInfo::MaxAmmo => SyncValue::Int(player.max_ammo[index]),
        ClientInfo::WeaponPreference => SyncValue::Int(prefs.weapon_order[index] as i32),
        _ => return Err(SyncError::WrongPayload(info)),
    };

    Ok(PlayerInfoUpdate {
        world_index,
        player_num: slot as u32,
        info_raw: info as u32,
        array_index,
        payload: InfoPayload::Value(value),
    })
}

/// Read one scalar field out of the store and wrap it for the wire.
/// `prefs` resolves the option fields: a server passes the peer's
/// negotiated set, a client its own local set.
pub fn build_scalar_info(
    registry: &ClientRegistry,
    prefs: &PlayerPreferences,
    slot: usize,
    info: ClientInfo,
    world_index: u32,
) -> Result<PlayerInfoUpdate, SyncError> {
    let player = registry
        .player(slot)
        .ok_or(SyncError::BadSlot(slot as u32))?;
    let client = registry
        .client(slot)
        .ok_or(SyncError::BadSlot(slot as u32))?;

    let value = match info {
        ClientInfo::Team => SyncValue::Int(client.team as i32),
        ClientInfo::Spectating => SyncValue::Boolean(client.spectating),
        ClientInfo::KillCount => SyncValue::Int(player.kill_count),
        ClientInfo::ItemCount => SyncValue::Int(player.item_count),
        ClientInfo::SecretCount => SyncValue::Int(player.secret_count),
        ClientInfo::Colormap => SyncValue::Int(player.colormap),
        ClientInfo::Cheats => SyncValue::Int(player.cheats.bits() as i32),
        ClientInfo::Health => SyncValue::Int(player.health),
        ClientInfo::ArmorPoints => SyncValue::Int(player.armor_points),
        ClientInfo::ArmorType => SyncValue::Int(player.armor_type),
        ClientInfo::ReadyWeapon => SyncValue::Int(player.ready_weapon as i32),
        ClientInfo::PendingWeapon => SyncValue::Int(player.pending_weapon as i32),
        ClientInfo::OwnsBackpack => SyncValue::Boolean(player.backpack),
        ClientInfo::DidSecret => SyncValue::Boolean(player.did_secret),
        ClientInfo::QueueLevel => SyncValue::Int(client.queue_level as i32),
        ClientInfo::QueuePosition => SyncValue::Int(client.queue_position as i32),
        ClientInfo::WeaponSwitchOnPickup => SyncValue::Int(prefs.weapon_switch as i32),
        ClientInfo::AmmoSwitchOnPickup => SyncValue::Int(prefs.ammo_switch as i32),
        ClientInfo::Bobbing => SyncValue::Boolean(prefs.options.bobbing),
        ClientInfo::WeaponToggles => SyncValue::Boolean(prefs.options.weapon_toggles),
        ClientInfo::Autoaim => SyncValue::Boolean(prefs.options.autoaim),
        ClientInfo::WeaponSpeed => SyncValue::Int(prefs.options.weapon_speed as i32),
        ClientInfo::Buffering => SyncValue::Boolean(prefs.buffering),
        ClientInfo::Afk => SyncValue::Boolean(client.afk),
        _ => return Err(SyncError::WrongPayload(info)),
    };

    Ok(PlayerInfoUpdate {
        world_index,
        player_num: slot as u32,
        info_raw: info as u32,
        array_index: 0,
        payload: InfoPayload::Value(value),
    })
}

fn expect_int(info: ClientInfo, payload: &InfoPayload) -> Result<i32, SyncError> {
    match payload {
        InfoPayload::Value(SyncValue::Int(value)) => Ok(*value),
        _ => Err(SyncError::WrongPayload(info)),
    }
}

fn expect_bool(info: ClientInfo, payload: &InfoPayload) -> Result<bool, SyncError> {
    match payload {
        InfoPayload::Value(SyncValue::Boolean(value)) => Ok(*value),
        _ => Err(SyncError::WrongPayload(info)),
    }
}

fn expect_weapon(info: ClientInfo, value: i32, allow_none: bool) -> Result<WeaponId, SyncError> {
    let floor = if allow_none { 0 } else { 1 };
    if value < floor || value as usize > NUM_WEAPONS {
        return Err(SyncError::BadValue { info, value });
    }
    Ok(value as WeaponId)
}

/// Apply a validated inbound field update to the store.
///
/// `server_clients` must be supplied in the server role; it receives the
/// negotiated option fields. The returned outcome carries every
/// cross-cutting follow-up (broadcast, respawn, requeue, notices) so the
/// dispatch layer stays the single place that talks to the network.
pub fn apply_player_info(
    ctx: &ApplyContext,
    registry: &mut ClientRegistry,
    server_clients: Option<&mut ServerClients>,
    update: &PlayerInfoUpdate,
) -> Result<ApplyOutcome, SyncError> {
    let info =
        ClientInfo::from_raw(update.info_raw).ok_or(SyncError::UnknownInfo(update.info_raw))?;
    let slot = update.player_num as usize;
    if slot >= registry.slot_count() {
        return Err(SyncError::BadSlot(update.player_num));
    }

    let field = info.spec();

    // A server only takes fields clients are allowed to originate;
    // authoritative mirrors arriving from a peer are protocol violations.
    if ctx.role == Role::Server && field.writer == Writer::Server {
        return Err(SyncError::NotClientWritable(info));
    }
    if ctx.role == Role::Server && server_clients.is_none() {
        debug_assert!(false, "server apply requires server client records");
        return Err(SyncError::MissingServerState);
    }

    match field.shape {
        FieldShape::Text => apply_text(ctx, registry, slot, info, update),
        FieldShape::Array => apply_array(ctx, registry, server_clients, slot, info, update),
        FieldShape::Scalar => apply_scalar(ctx, registry, server_clients, slot, info, update),
    }
}

fn is_local(ctx: &ApplyContext, slot: usize) -> bool {
    ctx.local_slot == Some(slot)
}

fn apply_text(
    ctx: &ApplyContext,
    registry: &mut ClientRegistry,
    slot: usize,
    info: ClientInfo,
    update: &PlayerInfoUpdate,
) -> Result<ApplyOutcome, SyncError> {
    let (declared_len, bytes) = match &update.payload {
        InfoPayload::Text {
            declared_len,
            bytes,
        } => (*declared_len, bytes.as_slice()),
        _ => return Err(SyncError::WrongPayload(info)),
    };
    let text = extract_text(declared_len, bytes, MAX_STRING_LEN)?;

    let mut outcome = ApplyOutcome {
        applied: true,
        broadcast: info.spec().broadcasts,
        ..ApplyOutcome::default()
    };

    match info {
        ClientInfo::Name => {
            if text.len() > MAX_NAME_LEN {
                return Err(SyncError::NameTooLong(text.len()));
            }
            if text.is_empty() {
                return Err(SyncError::BlankName);
            }

            let player = registry.player_mut(slot).expect("slot checked");
            if !is_local(ctx, slot) && player.name == text {
                return Ok(ApplyOutcome::noop());
            }

            if !player.name.is_empty() {
                if is_local(ctx, slot) {
                    outcome.notices.push(format!("You are now known as {text}."));
                } else {
                    outcome
                        .notices
                        .push(format!("{} is now known as {text}.", player.name));
                }
            } else if is_local(ctx, slot) {
                outcome.notices.push(format!("Connected as {text}."));
            } else {
                outcome.notices.push(format!("{text} connected."));
            }
            player.name = text.to_string();
        }
        ClientInfo::Skin => {
            registry.player_mut(slot).expect("slot checked").skin = text.to_string();
        }
        ClientInfo::Class => {
            registry.player_mut(slot).expect("slot checked").class = text.to_string();
        }
        _ => return Err(SyncError::WrongPayload(info)),
    }

    Ok(outcome)
}

fn apply_array(
    ctx: &ApplyContext,
    registry: &mut ClientRegistry,
    server_clients: Option<&mut ServerClients>,
    slot: usize,
    info: ClientInfo,
    update: &PlayerInfoUpdate,
) -> Result<ApplyOutcome, SyncError> {
    let len = info.array_len().ok_or(SyncError::WrongPayload(info))?;
    let index = update.array_index as usize;
    if index >= len {
        return Err(SyncError::BadIndex {
            info,
            index: update.array_index,
        });
    }

    let outcome = ApplyOutcome {
        applied: true,
        broadcast: info.spec().broadcasts,
        ..ApplyOutcome::default()
    };

    if info == ClientInfo::WeaponPreference {
        // Negotiated server-side; a client applying its own broadcast
        // would be writing state it already owns.
        if ctx.role == Role::Server {
            let value = expect_int(info, &update.payload)?;
            let weapon = expect_weapon(info, value, true)?;
            let clients = server_clients.ok_or(SyncError::MissingServerState)?;
            let state = clients.get_mut(slot).ok_or(SyncError::BadSlot(slot as u32))?;
            state.prefs.set_preference(index, weapon);
        }
        return Ok(outcome);
    }

    // The remaining array fields are pure mirrors: only a client writes
    // them, straight into the target slot.
    if ctx.role != Role::Client {
        return Ok(ApplyOutcome::noop());
    }
    let player = registry.player_mut(slot).expect("slot checked");
    match info {
        ClientInfo::Frags => player.frags[index] = expect_int(info, &update.payload)?,
        ClientInfo::PowerEnabled => player.powers[index] = expect_int(info, &update.payload)?,
        ClientInfo::OwnsCard => player.cards[index] = expect_bool(info, &update.payload)?,
        ClientInfo::OwnsWeapon => {
            player.weapons_owned[index] = expect_bool(info, &update.payload)?
        }
        ClientInfo::AmmoAmount => player.ammo[index] = expect_int(info, &update.payload)?,
        ClientInfo::MaxAmmo => player.max_ammo[index] = expect_int(info, &update.payload)?,
        _ => return Err(SyncError::WrongPayload(info)),
    }

    Ok(outcome)
}

fn apply_scalar(
    ctx: &ApplyContext,
    registry: &mut ClientRegistry,
    server_clients: Option<&mut ServerClients>,
    slot: usize,
    info: ClientInfo,
    update: &PlayerInfoUpdate,
) -> Result<ApplyOutcome, SyncError> {
    let mut outcome = ApplyOutcome {
        applied: true,
        broadcast: info.spec().broadcasts,
        ..ApplyOutcome::default()
    };

    match info {
        ClientInfo::Team => {
            let raw = expect_int(info, &update.payload)?;
            if !registry.teams_enabled() {
                return Ok(ApplyOutcome::noop());
            }
            let team = TeamColor::from_raw(raw).ok_or(SyncError::BadTeam(raw))?;
            if registry.client(slot).expect("slot checked").team == team {
                return Ok(ApplyOutcome::noop());
            }

            registry.drop_flag(slot, update.world_index);
            registry.set_team(slot, team);

            let client = registry.client(slot).expect("slot checked");
            let name = registry.player(slot).expect("slot checked").name.clone();
            let team_name = team.name();
            let notice = match client.queue_level {
                QueueLevel::None => {
                    if is_local(ctx, slot) {
                        format!("You are now watching on the {team_name} team.")
                    } else {
                        format!("{name} is now watching on the {team_name} team.")
                    }
                }
                QueueLevel::Waiting => {
                    if is_local(ctx, slot) {
                        format!("You are now waiting on the {team_name} team.")
                    } else {
                        format!("{name} is now waiting on the {team_name} team.")
                    }
                }
                QueueLevel::Playing => {
                    if is_local(ctx, slot) {
                        format!("You are now on the {team_name} team.")
                    } else {
                        format!("{name} is now on the {team_name} team.")
                    }
                }
            };
            outcome.notices.push(notice);

            if ctx.role == Role::Server {
                outcome.requeue = true;
                if client.queue_level == QueueLevel::Playing {
                    outcome.respawn = true;
                }
            }
        }
        ClientInfo::Spectating => {
            let spectating = expect_bool(info, &update.payload)?;
            if registry.client(slot).expect("slot checked").spectating == spectating {
                return Ok(ApplyOutcome::noop());
            }
            if !spectating {
                // Joining happens through the command path after the server
                // respawns the player; a bare "not spectating" update can
                // only come from a broken or hostile peer.
                return Err(SyncError::InvalidJoin);
            }

            registry.drop_flag(slot, update.world_index);
            registry.client_mut(slot).expect("slot checked").spectating = true;

            if ctx.role == Role::Server {
                // Spectating costs a scoreboard frag.
                let player = registry.player_mut(slot).expect("slot checked");
                player.frags[slot] += 1;
                outcome
                    .extra_broadcasts
                    .push((ClientInfo::Frags, slot as u32));
                outcome.requeue = true;
                outcome.respawn = true;
            } else if is_local(ctx, slot) {
                outcome.notices.push(String::from("You are now spectating."));
            } else {
                let name = &registry.player(slot).expect("slot checked").name;
                outcome.notices.push(format!("{name} is now spectating."));
            }
        }
        ClientInfo::ReadyWeapon | ClientInfo::PendingWeapon => {
            let raw = expect_int(info, &update.payload)?;
            let weapon = expect_weapon(info, raw, true)?;
            // Each client already knows its own weapon state; only mirrors
            // of other players are written here. The server stores the
            // declared value so relays rebuild from the record.
            if ctx.role == Role::Server || !is_local(ctx, slot) {
                let player = registry.player_mut(slot).expect("slot checked");
                if info == ClientInfo::ReadyWeapon {
                    player.ready_weapon = weapon;
                } else {
                    player.pending_weapon = weapon;
                }
            }
        }
        ClientInfo::KillCount => {
            mirror_int(ctx, registry, slot, info, update, |p, v| p.kill_count = v)?
        }
        ClientInfo::ItemCount => {
            mirror_int(ctx, registry, slot, info, update, |p, v| p.item_count = v)?
        }
        ClientInfo::SecretCount => {
            mirror_int(ctx, registry, slot, info, update, |p, v| p.secret_count = v)?
        }
        ClientInfo::Colormap => {
            mirror_int(ctx, registry, slot, info, update, |p, v| p.colormap = v)?
        }
        ClientInfo::Cheats => mirror_int(ctx, registry, slot, info, update, |p, v| {
            p.cheats = CheatFlags::from_bits_truncate(v as u32)
        })?,
        ClientInfo::Health => {
            mirror_int(ctx, registry, slot, info, update, |p, v| p.health = v)?
        }
        ClientInfo::ArmorPoints => {
            mirror_int(ctx, registry, slot, info, update, |p, v| p.armor_points = v)?
        }
        ClientInfo::ArmorType => {
            mirror_int(ctx, registry, slot, info, update, |p, v| p.armor_type = v)?
        }
        ClientInfo::OwnsBackpack => {
            let value = expect_bool(info, &update.payload)?;
            if ctx.role == Role::Client {
                registry.player_mut(slot).expect("slot checked").backpack = value;
            }
        }
        ClientInfo::DidSecret => {
            let value = expect_bool(info, &update.payload)?;
            if ctx.role == Role::Client {
                registry.player_mut(slot).expect("slot checked").did_secret = value;
            }
        }
        ClientInfo::QueueLevel => {
            let raw = expect_int(info, &update.payload)?;
            let level = QueueLevel::from_raw(raw).ok_or(SyncError::BadValue { info, value: raw })?;
            if ctx.role == Role::Client {
                registry.client_mut(slot).expect("slot checked").queue_level = level;
            }
        }
        ClientInfo::QueuePosition => {
            let raw = expect_int(info, &update.payload)?;
            if raw < 0 {
                return Err(SyncError::BadValue { info, value: raw });
            }
            if ctx.role == Role::Client {
                let client = registry.client_mut(slot).expect("slot checked");
                client.queue_position = raw as u32;
                if is_local(ctx, slot) && client.queue_level == QueueLevel::Waiting {
                    outcome
                        .notices
                        .push(format!("Waiting to play, position {raw}."));
                }
            }
        }
        ClientInfo::WeaponSwitchOnPickup => {
            let raw = expect_int(info, &update.payload)?;
            let value =
                WeaponSwitch::from_raw(raw).ok_or(SyncError::BadValue { info, value: raw })?;
            if let Some(state) = server_state(ctx, server_clients, slot)? {
                state.prefs.weapon_switch = value;
            }
        }
        ClientInfo::AmmoSwitchOnPickup => {
            let raw = expect_int(info, &update.payload)?;
            let value =
                AmmoSwitch::from_raw(raw).ok_or(SyncError::BadValue { info, value: raw })?;
            if let Some(state) = server_state(ctx, server_clients, slot)? {
                state.prefs.ammo_switch = value;
            }
        }
        ClientInfo::Bobbing => {
            let value = expect_bool(info, &update.payload)?;
            if let Some(state) = server_state(ctx, server_clients, slot)? {
                state.prefs.options.bobbing = value;
            }
        }
        ClientInfo::WeaponToggles => {
            let value = expect_bool(info, &update.payload)?;
            if let Some(state) = server_state(ctx, server_clients, slot)? {
                state.prefs.options.weapon_toggles = value;
            }
        }
        ClientInfo::Autoaim => {
            let value = expect_bool(info, &update.payload)?;
            if let Some(state) = server_state(ctx, server_clients, slot)? {
                state.prefs.options.autoaim = value;
            }
        }
        ClientInfo::WeaponSpeed => {
            let raw = expect_int(info, &update.payload)?;
            if raw < 0 {
                return Err(SyncError::BadValue { info, value: raw });
            }
            if let Some(state) = server_state(ctx, server_clients, slot)? {
                state.prefs.options.weapon_speed = raw as u32;
            }
        }
        ClientInfo::Buffering => {
            let value = expect_bool(info, &update.payload)?;
            if let Some(state) = server_state(ctx, server_clients, slot)? {
                state.prefs.buffering = value;
            }
        }
        ClientInfo::Afk => {
            let value = expect_bool(info, &update.payload)?;
            let client = registry.client_mut(slot).expect("slot checked");
            if client.afk == value {
                return Ok(ApplyOutcome::noop());
            }
            client.afk = value;
            if value {
                let name = &registry.player(slot).expect("slot checked").name;
                outcome.notices.push(format!("{name} is AFK."));
            }
        }
        _ => return Err(SyncError::WrongPayload(info)),
    }

    Ok(outcome)
}

/// Write one mirror scalar; a no-op off the client role.
fn mirror_int(
    ctx: &ApplyContext,
    registry: &mut ClientRegistry,
    slot: usize,
    info: ClientInfo,
    update: &PlayerInfoUpdate,
    write: impl FnOnce(&mut crate::player::PlayerState, i32),
) -> Result<(), SyncError> {
    let value = expect_int(info, &update.payload)?;
    if ctx.role == Role::Client {
        write(registry.player_mut(slot).expect("slot checked"), value);
    }
    Ok(())
}

/// Resolve the server-side record for option writes; `Ok(None)` when
/// running as a client (the server's copy is the one that matters).
fn server_state<'a>(
    ctx: &ApplyContext,
    server_clients: Option<&'a mut ServerClients>,
    slot: usize,
) -> Result<Option<&'a mut crate::clients::ServerClientState>, SyncError> {
    if ctx.role != Role::Server {
        return Ok(None);
    }
    let clients = server_clients.ok_or(SyncError::MissingServerState)?;
    clients
        .get_mut(slot)
        .map(Some)
        .ok_or(SyncError::BadSlot(slot as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_ctx(local: Option<usize>) -> ApplyContext {
        ApplyContext {
            role: Role::Client,
            local_slot: local,
        }
    }

    fn server_ctx() -> ApplyContext {
        ApplyContext {
            role: Role::Server,
            local_slot: None,
        }
    }

    fn update_with(info: ClientInfo, slot: u32, payload: InfoPayload) -> PlayerInfoUpdate {
        PlayerInfoUpdate {
            world_index: 100,
            player_num: slot,
            info_raw: info as u32,
            array_index: 0,
            payload,
        }
    }

    #[test]
    fn table_rows_match_their_discriminants() {
        for (index, entry) in INFO_TABLE.iter().enumerate() {
            assert_eq!(entry.info as usize, index);
            assert_eq!(ClientInfo::from_raw(index as u32), Some(entry.info));
        }
        assert_eq!(ClientInfo::from_raw(CLIENT_INFO_COUNT as u32), None);
    }

    #[test]
    fn every_field_round_trips_through_its_shape() {
        let mut source = ClientRegistry::new();
        source.set_teams_enabled(true);
        let prefs = PlayerPreferences::default();
        let slot = 2;

        {
            let player = source.player_mut(slot).unwrap();
            player.name = String::from("quake");
            player.skin = String::from("crimson");
            player.health = 61;
            player.armor_points = 40;
            player.ammo[1] = 33;
            player.cards[2] = true;
            player.frags[5] = 4;
            player.powers[1] = 350;
            player.kill_count = 17;
        }
        source.set_team(slot, TeamColor::Blue);

        let mut target = ClientRegistry::new();
        target.set_teams_enabled(true);
        let ctx = client_ctx(Some(9));

        for entry in INFO_TABLE.iter() {
            let update = match entry.shape {
                FieldShape::Text => build_string_info(&source, slot, entry.info, 100).unwrap(),
                FieldShape::Array => {
                    build_array_info(&source, &prefs, slot, entry.info, 1, 100).unwrap()
                }
                FieldShape::Scalar => {
                    build_scalar_info(&source, &prefs, slot, entry.info, 100).unwrap()
                }
            };
            apply_player_info(&ctx, &mut target, None, &update).unwrap();
        }

        let player = target.player(slot).unwrap();
        assert_eq!(player.name, "quake");
        assert_eq!(player.skin, "crimson");
        assert_eq!(player.health, 61);
        assert_eq!(player.armor_points, 40);
        assert_eq!(player.ammo[1], 33);
        assert_eq!(player.kill_count, 17);
        assert_eq!(target.client(slot).unwrap().team, TeamColor::Blue);
    }

    #[test]
    fn server_rejects_authoritative_mirrors_from_peers() {
        let mut registry = ClientRegistry::new();
        let mut server_clients = ServerClients::new();

        let update = update_with(
            ClientInfo::Health,
            3,
            InfoPayload::Value(SyncValue::Int(9999)),
        );
        let result =
            apply_player_info(&server_ctx(), &mut registry, Some(&mut server_clients), &update);

        assert_eq!(result, Err(SyncError::NotClientWritable(ClientInfo::Health)));
        assert_eq!(registry.player(3).unwrap().health, 100);
    }

    #[test]
    fn unknown_info_type_is_reported_not_fatal() {
        let mut registry = ClientRegistry::new();
        let update = PlayerInfoUpdate {
            world_index: 0,
            player_num: 0,
            info_raw: 999,
            array_index: 0,
            payload: InfoPayload::Value(SyncValue::Int(0)),
        };
        assert_eq!(
            apply_player_info(&client_ctx(None), &mut registry, None, &update),
            Err(SyncError::UnknownInfo(999))
        );
    }

    #[test]
    fn team_switch_applies_and_requeues_on_server() {
        let mut registry = ClientRegistry::new();
        registry.set_teams_enabled(true);
        let mut server_clients = ServerClients::new();
        registry.set_score(2, 5);
        registry.client_mut(2).unwrap().queue_level = QueueLevel::Playing;

        let update = update_with(ClientInfo::Team, 2, InfoPayload::Value(SyncValue::Int(1)));
        let outcome =
            apply_player_info(&server_ctx(), &mut registry, Some(&mut server_clients), &update)
                .unwrap();

        assert!(outcome.applied);
        assert!(outcome.broadcast);
        assert!(outcome.requeue);
        assert!(outcome.respawn);
        assert_eq!(registry.client(2).unwrap().team, TeamColor::Red);
        assert_eq!(registry.team_score(TeamColor::Red), 5);
    }

    #[test]
    fn out_of_range_team_is_rejected_with_notice() {
        let mut registry = ClientRegistry::new();
        registry.set_teams_enabled(true);
        let mut server_clients = ServerClients::new();

        let update = update_with(ClientInfo::Team, 2, InfoPayload::Value(SyncValue::Int(7)));
        let error =
            apply_player_info(&server_ctx(), &mut registry, Some(&mut server_clients), &update)
                .unwrap_err();

        assert_eq!(error, SyncError::BadTeam(7));
        assert!(error.notify_sender().unwrap().contains("Invalid team"));
        assert_eq!(registry.client(2).unwrap().team, TeamColor::None);
    }

    #[test]
    fn unchanged_team_is_a_noop() {
        let mut registry = ClientRegistry::new();
        registry.set_teams_enabled(true);
        registry.set_team(2, TeamColor::Red);

        let update = update_with(ClientInfo::Team, 2, InfoPayload::Value(SyncValue::Int(1)));
        let outcome = apply_player_info(&client_ctx(None), &mut registry, None, &update).unwrap();
        assert!(!outcome.applied);
        assert!(!outcome.broadcast);
    }

    #[test]
    fn spectating_costs_a_frag_serverside() {
        let mut registry = ClientRegistry::new();
        let mut server_clients = ServerClients::new();
        registry.client_mut(4).unwrap().spectating = false;

        let update = update_with(
            ClientInfo::Spectating,
            4,
            InfoPayload::Value(SyncValue::Boolean(true)),
        );
        let outcome =
            apply_player_info(&server_ctx(), &mut registry, Some(&mut server_clients), &update)
                .unwrap();

        assert!(registry.client(4).unwrap().spectating);
        assert_eq!(registry.player(4).unwrap().frags[4], 1);
        assert!(outcome.requeue);
        assert!(outcome.respawn);
        assert!(
            outcome
                .extra_broadcasts
                .contains(&(ClientInfo::Frags, 4))
        );
    }

    #[test]
    fn join_disguised_as_spectate_update_is_rejected() {
        let mut registry = ClientRegistry::new();
        let mut server_clients = ServerClients::new();
        // Slot is spectating; a `false` update claims a join.
        let update = update_with(
            ClientInfo::Spectating,
            4,
            InfoPayload::Value(SyncValue::Boolean(false)),
        );
        let error =
            apply_player_info(&server_ctx(), &mut registry, Some(&mut server_clients), &update)
                .unwrap_err();
        assert_eq!(error, SyncError::InvalidJoin);
        assert!(error.notify_sender().is_some());
    }

    #[test]
    fn oversized_name_claim_is_rejected_without_overread() {
        let mut registry = ClientRegistry::new();
        let update = PlayerInfoUpdate {
            world_index: 0,
            player_num: 1,
            info_raw: ClientInfo::Name as u32,
            array_index: 0,
            payload: InfoPayload::Text {
                declared_len: 50,
                bytes: b"short\0".to_vec(),
            },
        };
        let error = apply_player_info(&client_ctx(None), &mut registry, None, &update).unwrap_err();
        assert!(matches!(error, SyncError::BadText(_)));
        assert!(registry.player(1).unwrap().name.is_empty());
    }

    #[test]
    fn blank_and_overlong_names_are_refused() {
        let mut registry = ClientRegistry::new();

        let blank = PlayerInfoUpdate {
            world_index: 0,
            player_num: 1,
            info_raw: ClientInfo::Name as u32,
            array_index: 0,
            payload: InfoPayload::Text {
                declared_len: 1,
                bytes: vec![0],
            },
        };
        assert_eq!(
            apply_player_info(&client_ctx(None), &mut registry, None, &blank),
            Err(SyncError::BlankName)
        );

        let long_name = "x".repeat(MAX_NAME_LEN + 1);
        let (declared_len, bytes) = encode_text(&long_name);
        let long = PlayerInfoUpdate {
            world_index: 0,
            player_num: 1,
            info_raw: ClientInfo::Name as u32,
            array_index: 0,
            payload: InfoPayload::Text {
                declared_len,
                bytes,
            },
        };
        assert_eq!(
            apply_player_info(&client_ctx(None), &mut registry, None, &long),
            Err(SyncError::NameTooLong(MAX_NAME_LEN + 1))
        );
    }

    #[test]
    fn name_change_notices_use_the_right_person() {
        let mut registry = ClientRegistry::new();
        registry.player_mut(0).unwrap().name = String::from("old");

        let (declared_len, bytes) = encode_text("new");
        let update = PlayerInfoUpdate {
            world_index: 0,
            player_num: 0,
            info_raw: ClientInfo::Name as u32,
            array_index: 0,
            payload: InfoPayload::Text {
                declared_len,
                bytes,
            },
        };

        let outcome =
            apply_player_info(&client_ctx(Some(0)), &mut registry, None, &update).unwrap();
        assert_eq!(outcome.notices, vec!["You are now known as new."]);

        registry.player_mut(1).unwrap().name = String::from("rival");
        let (declared_len, bytes) = encode_text("nemesis");
        let update = PlayerInfoUpdate {
            world_index: 0,
            player_num: 1,
            info_raw: ClientInfo::Name as u32,
            array_index: 0,
            payload: InfoPayload::Text {
                declared_len,
                bytes,
            },
        };
        let outcome =
            apply_player_info(&client_ctx(Some(0)), &mut registry, None, &update).unwrap();
        assert_eq!(outcome.notices, vec!["rival is now known as nemesis."]);
    }

    #[test]
    fn options_land_in_the_server_record_and_do_not_broadcast() {
        let mut registry = ClientRegistry::new();
        let mut server_clients = ServerClients::new();

        let update = update_with(
            ClientInfo::Autoaim,
            6,
            InfoPayload::Value(SyncValue::Boolean(true)),
        );
        let outcome =
            apply_player_info(&server_ctx(), &mut registry, Some(&mut server_clients), &update)
                .unwrap();

        assert!(!outcome.broadcast);
        assert!(server_clients.get(6).unwrap().prefs.options.autoaim);

        let update = update_with(
            ClientInfo::WeaponSwitchOnPickup,
            6,
            InfoPayload::Value(SyncValue::Int(2)),
        );
        apply_player_info(&server_ctx(), &mut registry, Some(&mut server_clients), &update)
            .unwrap();
        assert_eq!(
            server_clients.get(6).unwrap().prefs.weapon_switch,
            WeaponSwitch::Never
        );
    }

    #[test]
    fn weapon_preference_updates_are_validated() {
        let mut registry = ClientRegistry::new();
        let mut server_clients = ServerClients::new();

        let mut update = update_with(
            ClientInfo::WeaponPreference,
            1,
            InfoPayload::Value(SyncValue::Int(42)),
        );
        update.array_index = 0;
        assert!(matches!(
            apply_player_info(&server_ctx(), &mut registry, Some(&mut server_clients), &update),
            Err(SyncError::BadValue { .. })
        ));

        let mut update = update_with(
            ClientInfo::WeaponPreference,
            1,
            InfoPayload::Value(SyncValue::Int(3)),
        );
        update.array_index = 99;
        assert!(matches!(
            apply_player_info(&server_ctx(), &mut registry, Some(&mut server_clients), &update),
            Err(SyncError::BadIndex { .. })
        ));
    }

    #[test]
    fn own_ready_weapon_mirror_is_skipped_on_the_local_client() {
        let mut registry = ClientRegistry::new();
        registry.player_mut(3).unwrap().ready_weapon = 5;

        let update = update_with(
            ClientInfo::ReadyWeapon,
            3,
            InfoPayload::Value(SyncValue::Int(1)),
        );
        apply_player_info(&client_ctx(Some(3)), &mut registry, None, &update).unwrap();
        assert_eq!(registry.player(3).unwrap().ready_weapon, 5);

        apply_player_info(&client_ctx(Some(0)), &mut registry, None, &update).unwrap();
        assert_eq!(registry.player(3).unwrap().ready_weapon, 1);
    }

    #[test]
    fn wrong_payload_shape_is_rejected() {
        let mut registry = ClientRegistry::new();
        let update = update_with(
            ClientInfo::Health,
            0,
            InfoPayload::Text {
                declared_len: 2,
                bytes: vec![b'x', 0],
            },
        );
        assert_eq!(
            apply_player_info(&client_ctx(None), &mut registry, None, &update),
            Err(SyncError::WrongPayload(ClientInfo::Health))
        );
    }
}
