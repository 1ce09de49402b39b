//! A minimal simulation backing for standalone operation and tests. It
//! moves players by their movement axes and round-trips its state through
//! a flat byte layout; the real game links its own implementation.

use glam::Vec3;

use fray::{InvalidState, MAX_CLIENTS, PlayerCommand, PositionSnapshot, Simulation, TICRATE};

const UNITS_PER_TICK: f32 = 8.0;

#[derive(Debug)]
pub struct HeadlessSimulation {
    tick: u32,
    origins: [Vec3; MAX_CLIENTS],
    angles: [f32; MAX_CLIENTS],
}

impl Default for HeadlessSimulation {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessSimulation {
    pub fn new() -> Self {
        Self {
            tick: 0,
            origins: [Vec3::ZERO; MAX_CLIENTS],
            angles: [0.0; MAX_CLIENTS],
        }
    }

    fn state_len() -> usize {
        4 + MAX_CLIENTS * 4 * 4
    }
}

impl Simulation for HeadlessSimulation {
    fn current_tick(&self) -> u32 {
        self.tick
    }

    fn run_tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
    }

    fn apply_command(&mut self, slot: usize, command: &PlayerCommand) {
        if slot >= MAX_CLIENTS {
            return;
        }
        let angle = self.angles[slot] + command.angle_turn as f32 / 32768.0 * std::f32::consts::PI;
        let forward = command.forward_move as f32 / 127.0 * UNITS_PER_TICK;
        let side = command.side_move as f32 / 127.0 * UNITS_PER_TICK;

        self.angles[slot] = angle;
        self.origins[slot] += Vec3::new(
            angle.cos() * forward - angle.sin() * side,
            angle.sin() * forward + angle.cos() * side,
            0.0,
        );
    }

    fn player_position(&self, slot: usize) -> Option<PositionSnapshot> {
        if slot >= MAX_CLIENTS {
            return None;
        }
        Some(PositionSnapshot {
            world_index: self.tick,
            origin: self.origins[slot],
            momentum: Vec3::ZERO,
            angle: self.angles[slot],
        })
    }

    fn serialize_full_state(&self) -> Vec<u8> {
        let mut state = Vec::with_capacity(Self::state_len());
        state.extend_from_slice(&self.tick.to_le_bytes());
        for slot in 0..MAX_CLIENTS {
            state.extend_from_slice(&self.origins[slot].x.to_le_bytes());
            state.extend_from_slice(&self.origins[slot].y.to_le_bytes());
            state.extend_from_slice(&self.origins[slot].z.to_le_bytes());
            state.extend_from_slice(&self.angles[slot].to_le_bytes());
        }
        state
    }

    fn deserialize_full_state(&mut self, state: &[u8]) -> Result<(), InvalidState> {
        if state.len() != Self::state_len() {
            return Err(InvalidState);
        }
        let mut chunks = state.chunks_exact(4);
        let mut next = || -> [u8; 4] {
            chunks
                .next()
                .map(|c| [c[0], c[1], c[2], c[3]])
                .unwrap_or_default()
        };

        self.tick = u32::from_le_bytes(next());
        for slot in 0..MAX_CLIENTS {
            self.origins[slot] = Vec3::new(
                f32::from_le_bytes(next()),
                f32::from_le_bytes(next()),
                f32::from_le_bytes(next()),
            );
            self.angles[slot] = f32::from_le_bytes(next());
        }
        Ok(())
    }

    fn respawn_player(&mut self, slot: usize, _as_spectator: bool) {
        if slot < MAX_CLIENTS {
            self.origins[slot] = Vec3::ZERO;
            self.angles[slot] = 0.0;
        }
    }
}

/// Ticks per wall-clock second the server steps the simulation.
pub const SIM_TICK_RATE: u32 = TICRATE;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips() {
        let mut sim = HeadlessSimulation::new();
        let mut command = PlayerCommand::new(0, 1);
        command.forward_move = 127;
        sim.apply_command(2, &command);
        sim.run_tick();

        let state = sim.serialize_full_state();
        let mut restored = HeadlessSimulation::new();
        restored.deserialize_full_state(&state).unwrap();

        assert_eq!(restored.current_tick(), 1);
        assert_eq!(
            restored.player_position(2).unwrap().origin,
            sim.player_position(2).unwrap().origin
        );
    }

    #[test]
    fn short_state_is_rejected() {
        let mut sim = HeadlessSimulation::new();
        assert!(sim.deserialize_full_state(&[1, 2, 3]).is_err());
    }
}
