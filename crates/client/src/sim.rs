//! A minimal client-side simulation mirror: holds the server's opaque
//! state blob and counts the entity traffic routed at it. The real game
//! links its full presentation simulation here.

use fray::{InvalidState, Message, PlayerCommand, PositionSnapshot, Simulation};

#[derive(Debug, Default)]
pub struct MirrorSimulation {
    tick: u32,
    state: Vec<u8>,
    world_events: u64,
}

impl MirrorSimulation {
    pub fn world_events(&self) -> u64 {
        self.world_events
    }

    pub fn state_len(&self) -> usize {
        self.state.len()
    }
}

impl Simulation for MirrorSimulation {
    fn current_tick(&self) -> u32 {
        self.tick
    }

    fn run_tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
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

    fn apply_world_event(&mut self, _message: &Message) {
        self.world_events += 1;
    }
}
