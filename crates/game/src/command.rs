use std::collections::VecDeque;

use bitflags::bitflags;
use rkyv::{Archive, Deserialize, Serialize};

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct Buttons: u16 {
        const ATTACK        = 1 << 0;
        const USE           = 1 << 1;
        const JUMP          = 1 << 2;
        const CHANGE_WEAPON = 1 << 3;
        const SPECIAL       = 1 << 4;
    }
}

/// One tick's worth of input from one client. Commands ride the unsequenced
/// channel; `index` is the per-client ordering the buffer restores, and
/// `world_index` is the tick the client generated it for.
#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct PlayerCommand {
    pub world_index: u32,
    pub index: u32,
    pub buttons: u16,
    pub forward_move: i8,
    pub side_move: i8,
    pub angle_turn: i16,
    pub look: i16,
}

impl PlayerCommand {
    pub fn new(world_index: u32, index: u32) -> Self {
        Self {
            world_index,
            index,
            buttons: 0,
            forward_move: 0,
            side_move: 0,
            angle_turn: 0,
            look: 0,
        }
    }

    pub fn buttons(&self) -> Buttons {
        Buttons::from_bits_truncate(self.buttons)
    }

    pub fn set_button(&mut self, button: Buttons, pressed: bool) {
        let mut buttons = self.buttons();
        buttons.set(button, pressed);
        self.buttons = buttons.bits();
    }
}

/// Per-peer command FIFO. The transport may reorder or duplicate command
/// datagrams, so insertion restores index order and drops anything at or
/// below the last index already handed to the simulation.
#[derive(Debug)]
pub struct CommandBuffer {
    commands: VecDeque<PlayerCommand>,
    capacity: usize,
    last_popped_index: u32,
    dropped: u32,
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new(crate::clients::COMMAND_BUFFER_CAPACITY)
    }
}

impl CommandBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            commands: VecDeque::with_capacity(capacity),
            capacity,
            last_popped_index: 0,
            dropped: 0,
        }
    }

    /// Queue a command, keeping the buffer sorted by index. Returns false
    /// for stale or duplicate commands, which are counted as dropped.
    pub fn insert(&mut self, command: PlayerCommand) -> bool {
        if command.index <= self.last_popped_index && self.last_popped_index != 0 {
            self.dropped += 1;
            return false;
        }
        if self.commands.iter().any(|c| c.index == command.index) {
            self.dropped += 1;
            return false;
        }
        if self.commands.len() >= self.capacity {
            self.dropped += 1;
            return false;
        }

        let at = self
            .commands
            .iter()
            .position(|c| c.index > command.index)
            .unwrap_or(self.commands.len());
        self.commands.insert(at, command);
        true
    }

    pub fn pop_next(&mut self) -> Option<PlayerCommand> {
        let command = self.commands.pop_front()?;
        self.last_popped_index = command.index;
        Some(command)
    }

    pub fn peek_next(&self) -> Option<&PlayerCommand> {
        self.commands.front()
    }

    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn last_popped_index(&self) -> u32 {
        self.last_popped_index
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
        self.last_popped_index = 0;
        self.dropped = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_pop_in_index_order() {
        let mut buffer = CommandBuffer::new(16);

        buffer.insert(PlayerCommand::new(10, 3));
        buffer.insert(PlayerCommand::new(8, 1));
        buffer.insert(PlayerCommand::new(9, 2));

        assert_eq!(buffer.pop_next().unwrap().index, 1);
        assert_eq!(buffer.pop_next().unwrap().index, 2);
        assert_eq!(buffer.pop_next().unwrap().index, 3);
        assert!(buffer.pop_next().is_none());
    }

    #[test]
    fn duplicates_and_stale_commands_are_dropped() {
        let mut buffer = CommandBuffer::new(16);

        assert!(buffer.insert(PlayerCommand::new(8, 1)));
        assert!(!buffer.insert(PlayerCommand::new(8, 1)));
        buffer.pop_next();

        assert!(!buffer.insert(PlayerCommand::new(8, 1)));
        assert_eq!(buffer.dropped(), 2);
    }

    #[test]
    fn overflow_drops_instead_of_growing() {
        let mut buffer = CommandBuffer::new(2);

        assert!(buffer.insert(PlayerCommand::new(1, 1)));
        assert!(buffer.insert(PlayerCommand::new(2, 2)));
        assert!(!buffer.insert(PlayerCommand::new(3, 3)));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.dropped(), 1);
    }

    #[test]
    fn button_helpers() {
        let mut command = PlayerCommand::new(0, 1);
        command.set_button(Buttons::ATTACK, true);
        command.set_button(Buttons::JUMP, true);
        command.set_button(Buttons::JUMP, false);

        assert!(command.buttons().contains(Buttons::ATTACK));
        assert!(!command.buttons().contains(Buttons::JUMP));
    }
}
