//! The inbound packet buffer: received messages queue here and are
//! processed in complete per-tick batches, delimited by the server's
//! tic-finished marker, so a tick is never applied half-way.

use std::collections::VecDeque;

use fray::{Message, MessageKind};

pub struct PacketBuffer {
    messages: VecDeque<Message>,
    capacity: usize,
    enabled: bool,
    needs_flushing: bool,
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new(2048)
    }
}

impl PacketBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity.min(256)),
            capacity,
            enabled: true,
            needs_flushing: false,
        }
    }

    pub fn push(&mut self, message: Message) {
        if self.messages.len() >= self.capacity {
            log::warn!("packet buffer full, forcing a flush");
            self.needs_flushing = true;
        }
        self.messages.push_back(message);
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_needs_flushing(&mut self, needs_flushing: bool) {
        self.needs_flushing = needs_flushing;
    }

    /// Messages for one simulation tick: everything up to and including
    /// the first tic-finished marker. With buffering off (or a flush
    /// forced) everything queued drains at once. An incomplete tick stays
    /// buffered.
    pub fn next_tic_batch(&mut self) -> Vec<Message> {
        if !self.enabled || self.needs_flushing {
            self.needs_flushing = false;
            return self.messages.drain(..).collect();
        }

        let boundary = self
            .messages
            .iter()
            .position(|m| m.kind() == MessageKind::TicFinished);
        match boundary {
            Some(index) => self.messages.drain(..=index).collect(),
            None => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.needs_flushing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tic(world_index: u32) -> Message {
        Message::TicFinished { world_index }
    }

    fn filler(world_index: u32) -> Message {
        Message::MonsterActive {
            world_index,
            net_id: 1,
        }
    }

    #[test]
    fn batches_stop_at_the_tic_boundary() {
        let mut buffer = PacketBuffer::new(64);
        buffer.push(filler(1));
        buffer.push(filler(1));
        buffer.push(tic(1));
        buffer.push(filler(2));

        let batch = buffer.next_tic_batch();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[2].kind(), MessageKind::TicFinished);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn incomplete_ticks_wait() {
        let mut buffer = PacketBuffer::new(64);
        buffer.push(filler(1));
        assert!(buffer.next_tic_batch().is_empty());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn flush_drains_everything() {
        let mut buffer = PacketBuffer::new(64);
        buffer.push(filler(1));
        buffer.set_needs_flushing(true);
        assert_eq!(buffer.next_tic_batch().len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn disabled_buffer_passes_straight_through() {
        let mut buffer = PacketBuffer::new(64);
        buffer.set_enabled(false);
        buffer.push(filler(1));
        assert_eq!(buffer.next_tic_batch().len(), 1);
    }
}
