//! Full-state snapshot transfer: one payload that brings a joining or
//! resynchronizing client up to date, instead of replaying every delta
//! since the session began, plus the client-side buffer that bridges the
//! gap while the snapshot is in flight.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use crate::clients::ClientRegistry;
use crate::net::protocol::{GameStatePayload, Message, SyncInfo};
use crate::settings::GameSettings;
use crate::sim::Simulation;
use crate::team::TeamColor;

#[derive(Debug, thiserror::Error)]
pub enum GameStateError {
    /// Scratch-file trouble is misconfiguration, not adversarial input;
    /// callers treat it as fatal.
    #[error("state scratch file: {0}")]
    Scratch(#[from] std::io::Error),
    #[error("simulation rejected the state blob")]
    BadState,
    #[error("snapshot targets slot {0}, which is out of range")]
    BadSlot(u32),
}

/// Serialize the whole authoritative state for `target_slot`, stamped with
/// the current tick. Built lazily, on demand: there is no snapshot
/// schedule, only joining or lagging clients asking for one.
///
/// The blob is staged through `scratch_path` (the save-game file); failing
/// to write or read it back is fatal to the caller.
pub fn build_game_state<S: Simulation>(
    sim: &S,
    registry: &ClientRegistry,
    settings: &GameSettings,
    map_number: u32,
    rng_seed: u32,
    target_slot: usize,
    scratch_path: &Path,
) -> Result<GameStatePayload, GameStateError> {
    if target_slot >= registry.slot_count() {
        return Err(GameStateError::BadSlot(target_slot as u32));
    }

    fs::write(scratch_path, sim.serialize_full_state())?;
    let state = fs::read(scratch_path)?;

    let mut flags = [Default::default(); TeamColor::COUNT];
    let mut team_scores = [0i32; TeamColor::COUNT];
    for team in TeamColor::ALL {
        flags[team.index()] = *registry.flag(team);
        team_scores[team.index()] = registry.team_score(team);
    }

    Ok(GameStatePayload {
        world_index: sim.current_tick(),
        map_number,
        rng_seed,
        player_num: target_slot as u32,
        flags,
        team_scores,
        players_in_game: registry.players_in_game(),
        settings: settings.clone(),
        state,
    })
}

/// Tick alignment sent directly after the game state, so the client resumes
/// from counters that are not already stale by the time the (large)
/// snapshot has been applied.
pub fn build_sync_info<S: Simulation>(sim: &S, level_start_tick: u32) -> SyncInfo {
    let tick = sim.current_tick();
    SyncInfo {
        world_index: tick,
        game_tick: tick,
        level_start_tick,
        base_tick: tick,
        level_time: tick.saturating_sub(level_start_tick),
    }
}

/// Install a received snapshot: registry aggregates first, then the
/// simulation blob. Returns the settings the server is running so the
/// caller can adopt them.
pub fn apply_game_state<S: Simulation>(
    sim: &mut S,
    registry: &mut ClientRegistry,
    payload: &GameStatePayload,
) -> Result<GameSettings, GameStateError> {
    registry.set_teams_enabled(payload.settings.teams_enabled());
    for team in TeamColor::ALL {
        *registry.flag_mut(team) = payload.flags[team.index()];
        registry.set_team_score(team, payload.team_scores[team.index()]);
    }
    for (slot, &in_game) in payload.players_in_game.iter().enumerate() {
        if let Some(player) = registry.player_mut(slot) {
            player.in_game = in_game;
        }
    }

    sim.deserialize_full_state(&payload.state)
        .map_err(|_| GameStateError::BadState)?;

    Ok(payload.settings.clone())
}

/// Client-side holding pen for deltas that arrive while the full snapshot
/// is still being applied. Deltas carry a tick index; once the snapshot
/// lands, everything older than its stamp is garbage and everything newer
/// replays in arrival order.
#[derive(Debug)]
pub struct DeltaBuffer {
    pending: VecDeque<Message>,
    capacity: usize,
}

impl Default for DeltaBuffer {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl DeltaBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(capacity.min(256)),
            capacity,
        }
    }

    pub fn push(&mut self, message: Message) {
        if self.pending.len() >= self.capacity {
            // Oldest deltas are the most likely to predate the snapshot
            // anyway.
            self.pending.pop_front();
        }
        self.pending.push_back(message);
    }

    /// Take everything at or after `snapshot_tick`, in arrival order.
    /// Returns the replayable messages and the count discarded as stale.
    pub fn drain_from(&mut self, snapshot_tick: u32) -> (Vec<Message>, usize) {
        let mut replay = Vec::with_capacity(self.pending.len());
        let mut discarded = 0;

        for message in self.pending.drain(..) {
            if message.world_index() < snapshot_tick {
                discarded += 1;
            } else {
                replay.push(message);
            }
        }
        (replay, discarded)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::tests::RecordingSimulation;

    fn scratch_path(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("fray-state-{tag}-{}.bin", std::process::id()))
    }

    #[test]
    fn snapshot_round_trips_through_the_scratch_file() {
        let mut sim = RecordingSimulation::at_tick(1000);
        sim.state = vec![7, 7, 7, 1, 2, 3];
        let mut registry = ClientRegistry::new();
        registry.set_teams_enabled(true);
        registry.set_team(1, TeamColor::Red);
        registry.set_score(1, 9);
        registry.player_mut(1).unwrap().in_game = true;

        let path = scratch_path("roundtrip");
        let settings = GameSettings {
            game_type: crate::settings::GameType::CaptureTheFlag,
            ..GameSettings::default()
        };
        let payload =
            build_game_state(&sim, &registry, &settings, 3, 0xfeed, 4, &path).unwrap();

        assert_eq!(payload.world_index, 1000);
        assert_eq!(payload.player_num, 4);
        assert_eq!(payload.team_scores[TeamColor::Red.index()], 9);
        assert!(payload.players_in_game[1]);
        assert_eq!(payload.state, vec![7, 7, 7, 1, 2, 3]);

        let mut client_sim = RecordingSimulation::at_tick(0);
        let mut client_registry = ClientRegistry::new();
        let settings = apply_game_state(&mut client_sim, &mut client_registry, &payload).unwrap();

        assert!(settings.teams_enabled());
        assert_eq!(client_registry.team_score(TeamColor::Red), 9);
        assert!(client_registry.player(1).unwrap().in_game);
        assert_eq!(client_sim.state, vec![7, 7, 7, 1, 2, 3]);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_scratch_directory_is_an_error() {
        let sim = RecordingSimulation::at_tick(5);
        let registry = ClientRegistry::new();
        let settings = GameSettings::default();
        let bogus = std::path::Path::new("/nonexistent-dir-for-sure/state.bin");

        assert!(matches!(
            build_game_state(&sim, &registry, &settings, 0, 0, 0, bogus),
            Err(GameStateError::Scratch(_))
        ));
    }

    #[test]
    fn stale_deltas_are_discarded_fresh_ones_replay_in_order() {
        let mut buffer = DeltaBuffer::new(64);
        buffer.push(Message::TicFinished { world_index: 998 });
        buffer.push(Message::TicFinished { world_index: 1001 });
        buffer.push(Message::TicFinished { world_index: 1002 });

        let (replay, discarded) = buffer.drain_from(1000);
        assert_eq!(discarded, 1);
        assert_eq!(
            replay
                .iter()
                .map(|message| message.world_index())
                .collect::<Vec<_>>(),
            vec![1001, 1002]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn sync_info_aligns_to_the_current_tick() {
        let sim = RecordingSimulation::at_tick(500);
        let info = build_sync_info(&sim, 340);
        assert_eq!(info.world_index, 500);
        assert_eq!(info.level_time, 160);
    }
}
