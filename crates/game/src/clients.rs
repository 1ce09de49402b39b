//! The client record store: canonical per-slot state for every potential
//! player, on both roles, plus the server-only connection records.
//!
//! Slots are process-lifetime. Connecting peers claim a slot, disconnecting
//! peers leave a zeroed slot behind, and indices stay dense and stable for
//! the lifetime of a connection.

use std::net::SocketAddr;

use glam::Vec3;
use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};

use crate::MAX_CLIENTS;
use crate::command::CommandBuffer;
use crate::net::tracking::{AckTracker, ReceiveTracker};
use crate::player::{NUM_WEAPONS, PlayerState, WEAPON_NONE, WeaponId};
use crate::spree::{ConsecutiveFragLevel, FragLevel};
use crate::team::{FlagState, TeamColor};

/// Ticks of position history kept per peer for lag compensation.
pub const MAX_POSITIONS: usize = (crate::TICRATE as usize) * (crate::MAX_LATENCY_SECS as usize);

/// Commands buffered per peer before inserts start failing.
pub const COMMAND_BUFFER_CAPACITY: usize = 2 * crate::TICRATE as usize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum QueueLevel {
    #[default]
    None = 0,
    Waiting = 1,
    Playing = 2,
}

impl QueueLevel {
    pub fn from_raw(value: i32) -> Option<QueueLevel> {
        match value {
            0 => Some(QueueLevel::None),
            1 => Some(QueueLevel::Waiting),
            2 => Some(QueueLevel::Playing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum FloorStatus {
    #[default]
    None = 0,
    Hit = 1,
    HitOnThing = 2,
}

impl FloorStatus {
    pub fn from_raw(value: i32) -> Option<FloorStatus> {
        match value {
            0 => Some(FloorStatus::None),
            1 => Some(FloorStatus::Hit),
            2 => Some(FloorStatus::HitOnThing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum AuthLevel {
    #[default]
    None = 0,
    Spectator = 1,
    Player = 2,
    Moderator = 3,
    Administrator = 4,
}

impl AuthLevel {
    pub fn from_raw(value: u32) -> Option<AuthLevel> {
        match value {
            0 => Some(AuthLevel::None),
            1 => Some(AuthLevel::Spectator),
            2 => Some(AuthLevel::Player),
            3 => Some(AuthLevel::Moderator),
            4 => Some(AuthLevel::Administrator),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PendingRequest {
    #[default]
    None,
    Auth,
    Join,
    Spectate,
}

/// Aggregate per-client statistics, kept across deaths, cleared at map
/// boundaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub player_kills: u32,
    pub monster_kills: u32,
    pub team_kills: u32,
    pub suicides: u32,

    pub deaths_by_player: u32,
    pub deaths_by_monster: u32,
    pub deaths_by_team: u32,
    pub deaths_by_environment: u32,

    pub flag_touches: u32,
    pub flag_captures: u32,
    pub flag_picks: u32,
    pub flag_carrier_frags: u32,

    total_damage: u64,
    damage_samples: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeathCause {
    Player,
    Monster,
    TeamMate,
    Environment,
    Suicide,
}

impl ClientStats {
    pub fn record_death(&mut self, cause: DeathCause) {
        match cause {
            DeathCause::Player => self.deaths_by_player += 1,
            DeathCause::Monster => self.deaths_by_monster += 1,
            DeathCause::TeamMate => self.deaths_by_team += 1,
            DeathCause::Environment => self.deaths_by_environment += 1,
            DeathCause::Suicide => self.suicides += 1,
        }
    }

    pub fn record_damage(&mut self, amount: u32) {
        self.total_damage += u64::from(amount);
        self.damage_samples += 1;
    }

    pub fn average_damage(&self) -> u32 {
        if self.damage_samples == 0 {
            0
        } else {
            (self.total_damage / u64::from(self.damage_samples)) as u32
        }
    }
}

/// Session record for one slot; present on both roles.
#[derive(Debug, Clone, Default)]
pub struct ClientState {
    pub team: TeamColor,
    pub spectating: bool,
    pub queue_level: QueueLevel,
    pub queue_position: u32,
    pub floor_status: FloorStatus,
    pub afk: bool,
    /// Tick this client first joined the spectators.
    pub join_tick: u32,

    pub score: i32,
    pub frags_this_life: u32,
    pub last_frag_tick: u32,
    pub frag_level: FragLevel,
    pub consecutive_frag_level: ConsecutiveFragLevel,

    /// Ticks spent dead so far this death; drives the death time limit.
    pub death_ticks: u32,
    pub death_count: u32,

    /// Lag figures mirrored from client-status messages.
    pub client_lag: u32,
    pub server_lag: u32,
    pub transit_lag: u32,
    pub packet_loss: u8,

    pub stats: ClientStats,

    /// Set by any mutation the scoreboard should repaint for.
    pub scoreboard_dirty: bool,
}

fn zeroed_client() -> ClientState {
    // A zeroed slot is a spectator; everything else is the type default.
    ClientState {
        spectating: true,
        ..ClientState::default()
    }
}

/// One tick-stamped position record, kept server-side for lag compensation
/// and shipped inside client-status and actor-position messages.
#[derive(Debug, Clone, Copy, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[rkyv(derive(Debug))]
pub struct PositionSnapshot {
    pub world_index: u32,
    pub origin: Vec3,
    pub momentum: Vec3,
    pub angle: f32,
}

impl Default for PositionSnapshot {
    fn default() -> Self {
        Self {
            world_index: 0,
            origin: Vec3::ZERO,
            momentum: Vec3::ZERO,
            angle: 0.0,
        }
    }
}

/// Fixed ring of recent positions, indexed by tick modulo capacity.
#[derive(Debug, Clone)]
pub struct PositionHistory {
    ring: Vec<Option<PositionSnapshot>>,
}

impl Default for PositionHistory {
    fn default() -> Self {
        Self::new(MAX_POSITIONS)
    }
}

impl PositionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: vec![None; capacity],
        }
    }

    pub fn store(&mut self, snapshot: PositionSnapshot) {
        let index = snapshot.world_index as usize % self.ring.len();
        self.ring[index] = Some(snapshot);
    }

    pub fn get(&self, world_index: u32) -> Option<&PositionSnapshot> {
        let index = world_index as usize % self.ring.len();
        self.ring[index]
            .as_ref()
            .filter(|p| p.world_index == world_index)
    }

    pub fn latest(&self) -> Option<&PositionSnapshot> {
        self.ring
            .iter()
            .filter_map(|p| p.as_ref())
            .max_by_key(|p| p.world_index)
    }

    pub fn clear(&mut self) {
        self.ring.fill(None);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientOptions {
    pub bobbing: bool,
    pub weapon_toggles: bool,
    pub autoaim: bool,
    pub weapon_speed: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum WeaponSwitch {
    #[default]
    Always = 0,
    UsePreferences = 1,
    Never = 2,
}

impl WeaponSwitch {
    pub fn from_raw(value: i32) -> Option<WeaponSwitch> {
        match value {
            0 => Some(WeaponSwitch::Always),
            1 => Some(WeaponSwitch::UsePreferences),
            2 => Some(WeaponSwitch::Never),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum AmmoSwitch {
    #[default]
    Vanilla = 0,
    UsePreferences = 1,
    Disabled = 2,
}

impl AmmoSwitch {
    pub fn from_raw(value: i32) -> Option<AmmoSwitch> {
        match value {
            0 => Some(AmmoSwitch::Vanilla),
            1 => Some(AmmoSwitch::UsePreferences),
            2 => Some(AmmoSwitch::Disabled),
            _ => None,
        }
    }
}

/// Negotiated per-connection preferences. On the server one of these lives
/// in each [`ServerClientState`]; a client holds a single local copy that it
/// announces after connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerPreferences {
    pub options: ClientOptions,
    pub weapon_switch: WeaponSwitch,
    pub ammo_switch: AmmoSwitch,
    /// Total order over weapon ids, most preferred first; trailing
    /// [`WEAPON_NONE`] entries pad the fixed width.
    pub weapon_order: [WeaponId; NUM_WEAPONS + 1],
    /// Whether the peer smooths incoming packets through a buffer.
    pub buffering: bool,
}

impl Default for PlayerPreferences {
    fn default() -> Self {
        let mut weapon_order = [WEAPON_NONE; NUM_WEAPONS + 1];
        for (index, preference) in weapon_order.iter_mut().take(NUM_WEAPONS).enumerate() {
            *preference = (index + 1) as WeaponId;
        }
        Self {
            options: ClientOptions::default(),
            weapon_switch: WeaponSwitch::default(),
            ammo_switch: AmmoSwitch::default(),
            weapon_order,
            buffering: false,
        }
    }
}

impl PlayerPreferences {
    /// True when `first` outranks `second` in this peer's ordering.
    pub fn weapon_preferred(&self, first: WeaponId, second: WeaponId) -> bool {
        let rank = |weapon: WeaponId| {
            self.weapon_order
                .iter()
                .position(|&w| w == weapon)
                .unwrap_or(self.weapon_order.len())
        };
        rank(first) < rank(second)
    }

    pub fn set_preference(&mut self, index: usize, weapon: WeaponId) -> bool {
        if index >= self.weapon_order.len() || weapon as usize > NUM_WEAPONS {
            return false;
        }
        self.weapon_order[index] = weapon;
        true
    }
}

/// Connection identity: a monotonically-assigned value plus the slot's
/// generation at claim time, so a stale reference from a previous
/// connection on a reused slot can never alias the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectId {
    pub value: u32,
    pub generation: u32,
}

/// Server-only connection record, keyed by the same slot index as the
/// gameplay-visible records.
#[derive(Debug, Default)]
pub struct ServerClientState {
    pub addr: Option<SocketAddr>,
    pub connect: Option<ConnectId>,

    pub auth_level: AuthLevel,
    pub pending_request: PendingRequest,
    /// Set once the full game-state payload has gone out and the peer has
    /// confirmed it by sending a command for the current map. There is no
    /// dedicated timeout on this flag; a peer stalled in transfer falls to
    /// the latency ceiling instead.
    pub received_game_state: bool,
    pub last_auth_attempt_tick: u32,

    pub commands: CommandBuffer,
    pub last_command_run_index: u32,
    pub last_command_received_index: u32,
    /// World index attached to the most recent command, used to pick the
    /// lag-compensation position to load.
    pub command_world_index: u32,
    pub received_command_for_current_map: bool,

    pub positions: PositionHistory,
    pub prefs: PlayerPreferences,
    /// Self-snapshot taken when the player spectates; consulted while the
    /// position ring has nothing fresher. A reconnect (new generation)
    /// discards it with the rest of the record.
    pub saved_position: Option<PositionSnapshot>,
    /// Tick this client last cleared the join queue.
    pub finished_queue_wait_tick: u32,

    pub recv: ReceiveTracker,
    pub acks: AckTracker,
}

impl ServerClientState {
    pub fn is_connected(&self) -> bool {
        self.connect.is_some()
    }
}

/// The server's array of connection records. Slots match the registry's.
#[derive(Debug)]
pub struct ServerClients {
    slots: Vec<ServerClientState>,
    generations: Vec<u32>,
    next_connect_value: u32,
}

impl ServerClients {
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_CLIENTS).map(|_| ServerClientState::default()).collect(),
            generations: vec![0; MAX_CLIENTS],
            next_connect_value: 1,
        }
    }

    fn check(&self, slot: usize) -> bool {
        let ok = slot < self.slots.len();
        debug_assert!(ok, "server client slot {slot} out of range");
        if !ok {
            log::warn!("server client slot {slot} out of range, ignoring");
        }
        ok
    }

    pub fn get(&self, slot: usize) -> Option<&ServerClientState> {
        self.slots.get(slot)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut ServerClientState> {
        self.slots.get_mut(slot)
    }

    pub fn slot_for_addr(&self, addr: SocketAddr) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.is_connected() && s.addr == Some(addr))
    }

    /// Claim the first free slot for a new connection. Returns `None` when
    /// the server is full.
    pub fn claim(&mut self, addr: SocketAddr) -> Option<usize> {
        let slot = self.slots.iter().position(|s| !s.is_connected())?;

        self.generations[slot] = self.generations[slot].wrapping_add(1);
        let connect = ConnectId {
            value: self.next_connect_value,
            generation: self.generations[slot],
        };
        self.next_connect_value = self.next_connect_value.wrapping_add(1);

        self.zero(slot);
        let state = &mut self.slots[slot];
        state.addr = Some(addr);
        state.connect = Some(connect);
        Some(slot)
    }

    /// Free the transport binding. The gameplay-visible record is zeroed
    /// separately once the disconnect is fully processed.
    pub fn release(&mut self, slot: usize) {
        if !self.check(slot) {
            return;
        }
        self.slots[slot].addr = None;
        self.slots[slot].connect = None;
    }

    /// Reset every transient field of a slot; the generation counter is the
    /// only thing that survives.
    pub fn zero(&mut self, slot: usize) {
        if !self.check(slot) {
            return;
        }
        self.slots[slot] = ServerClientState::default();
    }

    pub fn connected_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_connected()).count()
    }

    pub fn iter_connected(&self) -> impl Iterator<Item = (usize, &ServerClientState)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_connected())
    }
}

/// The canonical slot-indexed store shared by both roles: gameplay mirrors,
/// session records, and team aggregates. Handlers receive this by reference;
/// nothing else owns or caches client state.
#[derive(Debug)]
pub struct ClientRegistry {
    players: Vec<PlayerState>,
    clients: Vec<ClientState>,
    team_scores: [i32; TeamColor::COUNT],
    flags: [FlagState; TeamColor::COUNT],
    teams_enabled: bool,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            players: (0..MAX_CLIENTS).map(|_| PlayerState::default()).collect(),
            clients: (0..MAX_CLIENTS).map(|_| zeroed_client()).collect(),
            team_scores: [0; TeamColor::COUNT],
            flags: [FlagState::home(); TeamColor::COUNT],
            teams_enabled: false,
        }
    }

    pub fn set_teams_enabled(&mut self, enabled: bool) {
        self.teams_enabled = enabled;
    }

    pub fn teams_enabled(&self) -> bool {
        self.teams_enabled
    }

    fn check(&self, slot: usize) -> bool {
        let ok = slot < self.clients.len();
        debug_assert!(ok, "client slot {slot} out of range");
        if !ok {
            log::warn!("client slot {slot} out of range, ignoring");
        }
        ok
    }

    pub fn player(&self, slot: usize) -> Option<&PlayerState> {
        self.players.get(slot)
    }

    pub fn player_mut(&mut self, slot: usize) -> Option<&mut PlayerState> {
        self.players.get_mut(slot)
    }

    pub fn client(&self, slot: usize) -> Option<&ClientState> {
        self.clients.get(slot)
    }

    pub fn client_mut(&mut self, slot: usize) -> Option<&mut ClientState> {
        self.clients.get_mut(slot)
    }

    pub fn team_score(&self, team: TeamColor) -> i32 {
        self.team_scores[team.index()]
    }

    pub fn set_team_score(&mut self, team: TeamColor, score: i32) {
        self.team_scores[team.index()] = score;
    }

    pub fn flag(&self, team: TeamColor) -> &FlagState {
        &self.flags[team.index()]
    }

    pub fn flag_mut(&mut self, team: TeamColor) -> &mut FlagState {
        &mut self.flags[team.index()]
    }

    /// Zero a slot's transient state: gameplay mirror and session record go
    /// back to defaults. Called on connect and on "zero all".
    pub fn init_slot(&mut self, slot: usize) {
        if !self.check(slot) {
            return;
        }
        self.players[slot] = PlayerState::default();
        self.clients[slot] = zeroed_client();
    }

    pub fn zero_all(&mut self) {
        for slot in 0..self.clients.len() {
            self.init_slot(slot);
        }
        self.team_scores = [0; TeamColor::COUNT];
        self.flags = [FlagState::home(); TeamColor::COUNT];
    }

    /// New-map boundary: identity (name, team, spectating, queue) persists,
    /// cumulative stats do not.
    pub fn reset_stats(&mut self, slot: usize) {
        if !self.check(slot) {
            return;
        }
        self.set_score(slot, 0);

        let client = &mut self.clients[slot];
        client.stats = ClientStats::default();
        client.frags_this_life = 0;
        client.last_frag_tick = 0;
        client.frag_level = FragLevel::None;
        client.consecutive_frag_level = ConsecutiveFragLevel::None;
        client.death_ticks = 0;
        client.death_count = 0;
        client.scoreboard_dirty = true;

        let player = &mut self.players[slot];
        player.frags = [0; MAX_CLIENTS];
        player.kill_count = 0;
        player.item_count = 0;
        player.secret_count = 0;
    }

    /// Change a slot's team. A no-op when unchanged; otherwise the client's
    /// score follows it between the team aggregates (team games only).
    pub fn set_team(&mut self, slot: usize, team: TeamColor) {
        if !self.check(slot) {
            return;
        }
        let old = self.clients[slot].team;
        if old == team {
            return;
        }
        if self.teams_enabled {
            let score = self.clients[slot].score;
            self.team_scores[old.index()] -= score;
            self.team_scores[team.index()] += score;
        }
        self.clients[slot].team = team;
        self.clients[slot].scoreboard_dirty = true;
    }

    /// Absolute score set; the signed delta flows into the team aggregate.
    pub fn set_score(&mut self, slot: usize, score: i32) {
        if !self.check(slot) {
            return;
        }
        let old = self.clients[slot].score;
        self.clients[slot].score = score;
        if self.teams_enabled {
            let team = self.clients[slot].team;
            self.team_scores[team.index()] += score - old;
        }
        self.clients[slot].scoreboard_dirty = true;
    }

    /// Force `slot` to drop any flag it carries. Returns the team whose
    /// flag fell, for announcements.
    pub fn drop_flag(&mut self, slot: usize, world_index: u32) -> Option<TeamColor> {
        for team in TeamColor::ALL {
            let flag = &mut self.flags[team.index()];
            if flag.carrier == Some(slot as u32) {
                flag.carrier = None;
                flag.at_base = false;
                flag.drop_tick = world_index;
                return Some(team);
            }
        }
        None
    }

    pub fn players_in_game(&self) -> [bool; MAX_CLIENTS] {
        let mut mask = [false; MAX_CLIENTS];
        for (slot, player) in self.players.iter().enumerate() {
            mask[slot] = player.in_game;
        }
        mask
    }

    pub fn slot_count(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_team_moves_score_between_aggregates() {
        let mut registry = ClientRegistry::new();
        registry.set_teams_enabled(true);

        registry.set_team(2, TeamColor::Red);
        registry.set_score(2, 7);
        assert_eq!(registry.team_score(TeamColor::Red), 7);

        registry.set_team(2, TeamColor::Blue);
        assert_eq!(registry.team_score(TeamColor::Red), 0);
        assert_eq!(registry.team_score(TeamColor::Blue), 7);
    }

    #[test]
    fn set_team_is_a_noop_when_unchanged() {
        let mut registry = ClientRegistry::new();
        registry.set_teams_enabled(true);
        registry.set_team(0, TeamColor::Red);
        registry.client_mut(0).unwrap().scoreboard_dirty = false;

        registry.set_team(0, TeamColor::Red);
        assert!(!registry.client(0).unwrap().scoreboard_dirty);
    }

    #[test]
    fn set_score_applies_signed_delta_to_team() {
        let mut registry = ClientRegistry::new();
        registry.set_teams_enabled(true);
        registry.set_team(1, TeamColor::Blue);

        registry.set_score(1, 10);
        registry.set_score(1, 4);
        assert_eq!(registry.team_score(TeamColor::Blue), 4);
        assert_eq!(registry.client(1).unwrap().score, 4);
    }

    #[test]
    fn out_of_range_slot_is_ignored_in_release() {
        let mut registry = ClientRegistry::new();
        // Should not panic in release builds; debug_assert covers debug.
        if cfg!(not(debug_assertions)) {
            registry.set_score(MAX_CLIENTS + 4, 5);
        }
        assert!(registry.client(MAX_CLIENTS + 4).is_none());
    }

    #[test]
    fn reset_stats_keeps_identity() {
        let mut registry = ClientRegistry::new();
        registry.set_teams_enabled(true);
        registry.set_team(3, TeamColor::Red);
        registry.player_mut(3).unwrap().name = String::from("gunner");
        registry.set_score(3, 12);
        registry.client_mut(3).unwrap().stats.player_kills = 9;

        registry.reset_stats(3);

        assert_eq!(registry.player(3).unwrap().name, "gunner");
        assert_eq!(registry.client(3).unwrap().team, TeamColor::Red);
        assert_eq!(registry.client(3).unwrap().score, 0);
        assert_eq!(registry.client(3).unwrap().stats.player_kills, 0);
        assert_eq!(registry.team_score(TeamColor::Red), 0);
    }

    #[test]
    fn zeroed_slot_is_a_spectator() {
        let mut registry = ClientRegistry::new();
        registry.client_mut(5).unwrap().spectating = false;
        registry.init_slot(5);
        assert!(registry.client(5).unwrap().spectating);
    }

    #[test]
    fn claimed_slots_are_dense_and_unique() {
        let mut clients = ServerClients::new();
        let mut claimed = Vec::new();

        for i in 0..MAX_CLIENTS {
            let addr: SocketAddr = format!("127.0.0.1:{}", 9000 + i).parse().unwrap();
            let slot = clients.claim(addr).expect("slot available");
            assert!(slot < MAX_CLIENTS);
            assert!(!claimed.contains(&slot));
            claimed.push(slot);
        }

        let overflow: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        assert!(clients.claim(overflow).is_none());
    }

    #[test]
    fn reused_slot_bumps_generation() {
        let mut clients = ServerClients::new();
        let addr: SocketAddr = "10.0.0.1:7777".parse().unwrap();

        let slot = clients.claim(addr).unwrap();
        let first = clients.get(slot).unwrap().connect.unwrap();

        clients.release(slot);
        clients.zero(slot);

        let slot2 = clients.claim(addr).unwrap();
        assert_eq!(slot, slot2);
        let second = clients.get(slot2).unwrap().connect.unwrap();

        assert_ne!(first.generation, second.generation);
        assert_ne!(first.value, second.value);
    }

    #[test]
    fn position_history_is_tick_addressed() {
        let mut history = PositionHistory::new(8);
        for tick in 0..20u32 {
            history.store(PositionSnapshot {
                world_index: tick,
                origin: Vec3::new(tick as f32, 0.0, 0.0),
                momentum: Vec3::ZERO,
                angle: 0.0,
            });
        }
        assert!(history.get(19).is_some());
        assert!(history.get(5).is_none());
        assert_eq!(history.latest().unwrap().world_index, 19);
    }

    #[test]
    fn weapon_preference_rank() {
        let mut prefs = PlayerPreferences::default();
        prefs.set_preference(0, 4);
        prefs.set_preference(1, 2);
        assert!(prefs.weapon_preferred(4, 2));
        assert!(!prefs.weapon_preferred(2, 4));
        assert!(!prefs.set_preference(99, 1));
        assert!(!prefs.set_preference(0, (NUM_WEAPONS + 1) as WeaponId));
    }

    #[test]
    fn running_damage_average() {
        let mut stats = ClientStats::default();
        assert_eq!(stats.average_damage(), 0);
        stats.record_damage(10);
        stats.record_damage(30);
        assert_eq!(stats.average_damage(), 20);
    }
}
