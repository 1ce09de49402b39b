//! Interfaces to the collaborators this crate deliberately does not
//! implement: the gameplay simulation and the user-facing text surface.

use crate::clients::PositionSnapshot;
use crate::command::PlayerCommand;
use crate::net::protocol::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid simulation state blob")]
pub struct InvalidState;

/// Happenings the simulation surfaces to the sync layer after each tick.
/// The driver turns these into stats, sprees, and broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    PlayerKilled {
        victim: usize,
        /// The responsible player slot, if a player did it.
        killer: Option<usize>,
        by_monster: bool,
    },
    PlayerDamaged {
        victim: usize,
        amount: u32,
    },
}

/// The authoritative game simulation, as seen from the sync layer. One
/// implementation runs behind the server; a client runs its own mirror of
/// it for prediction and presentation.
pub trait Simulation {
    fn current_tick(&self) -> u32;

    /// Advance the world one tick.
    fn run_tick(&mut self);

    fn apply_command(&mut self, slot: usize, command: &PlayerCommand);

    fn player_position(&self, slot: usize) -> Option<PositionSnapshot>;

    /// Serialize everything needed to reconstruct the live world.
    fn serialize_full_state(&self) -> Vec<u8>;

    fn deserialize_full_state(&mut self, state: &[u8]) -> Result<(), InvalidState>;

    fn respawn_player(&mut self, slot: usize, as_spectator: bool);

    /// Entity-level events (actor/missile/sector traffic) pass straight
    /// through; their semantics live entirely in the simulation.
    fn apply_world_event(&mut self, _message: &Message) {}

    /// Kills and damage since the last drain, in occurrence order.
    fn drain_events(&mut self) -> Vec<SimEvent> {
        Vec::new()
    }
}

/// Where a piece of user-visible text should land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyTarget {
    Slot(usize),
    Broadcast,
}

/// Plain-text notification surface. Failures are never silent: anything a
/// peer must hear about goes through here.
pub trait Notifier {
    fn notify(&mut self, target: NotifyTarget, text: &str);
}

/// Routes notifications to the log, for headless operation.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&mut self, target: NotifyTarget, text: &str) {
        match target {
            NotifyTarget::Slot(slot) => log::info!("[to {slot}] {text}"),
            NotifyTarget::Broadcast => log::info!("{text}"),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal simulation double: remembers what was asked of it.
    #[derive(Debug, Default)]
    pub struct RecordingSimulation {
        pub tick: u32,
        pub state: Vec<u8>,
        pub commands: Vec<(usize, PlayerCommand)>,
        pub respawns: Vec<(usize, bool)>,
        pub world_events: u32,
    }

    impl RecordingSimulation {
        pub fn at_tick(tick: u32) -> Self {
            Self {
                tick,
                ..Self::default()
            }
        }
    }

    impl Simulation for RecordingSimulation {
        fn current_tick(&self) -> u32 {
            self.tick
        }

        fn run_tick(&mut self) {
            self.tick = self.tick.wrapping_add(1);
        }

        fn apply_command(&mut self, slot: usize, command: &PlayerCommand) {
            self.commands.push((slot, *command));
        }

        fn player_position(&self, _slot: usize) -> Option<PositionSnapshot> {
            Some(PositionSnapshot {
                world_index: self.tick,
                ..PositionSnapshot::default()
            })
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

        fn respawn_player(&mut self, slot: usize, as_spectator: bool) {
            self.respawns.push((slot, as_spectator));
        }

        fn apply_world_event(&mut self, _message: &Message) {
            self.world_events += 1;
        }
    }
}
