//! The join queue: when more clients are connected than the match allows
//! to play, the surplus waits in FIFO order and is promoted as playing
//! slots free up.

use fray::{ClientRegistry, GameSettings, QueueLevel};

pub fn playing_count(registry: &ClientRegistry, connected: &[usize]) -> usize {
    connected
        .iter()
        .filter(|&&slot| {
            registry
                .client(slot)
                .is_some_and(|c| c.queue_level == QueueLevel::Playing)
        })
        .count()
}

/// Put a client at the back of the waiting line.
pub fn enqueue(registry: &mut ClientRegistry, connected: &[usize], slot: usize) {
    let next_position = connected
        .iter()
        .filter_map(|&s| registry.client(s))
        .filter(|c| c.queue_level == QueueLevel::Waiting)
        .map(|c| c.queue_position + 1)
        .max()
        .unwrap_or(0);

    if let Some(client) = registry.client_mut(slot) {
        client.queue_level = QueueLevel::Waiting;
        client.queue_position = next_position;
    }
}

/// Take a client out of active play (spectate, team switch, disconnect
/// processing). Their playing slot opens up for the next in line.
pub fn set_not_playing(registry: &mut ClientRegistry, slot: usize) {
    if let Some(client) = registry.client_mut(slot) {
        if client.queue_level == QueueLevel::Playing {
            client.queue_level = QueueLevel::None;
            client.queue_position = 0;
        }
    }
}

/// Promote waiting clients while playing slots remain, preserving queue
/// order, then renumber the line. Returns the promoted slots.
pub fn promote(
    registry: &mut ClientRegistry,
    settings: &GameSettings,
    connected: &[usize],
) -> Vec<usize> {
    let mut promoted = Vec::new();
    let mut playing = playing_count(registry, connected);

    loop {
        if playing >= settings.max_players as usize {
            break;
        }
        let next = connected
            .iter()
            .copied()
            .filter(|&s| {
                registry
                    .client(s)
                    .is_some_and(|c| c.queue_level == QueueLevel::Waiting)
            })
            .min_by_key(|&s| registry.client(s).map(|c| c.queue_position).unwrap_or(u32::MAX));
        let Some(slot) = next else { break };

        let client = registry.client_mut(slot).expect("connected slot");
        client.queue_level = QueueLevel::Playing;
        client.queue_position = 0;
        playing += 1;
        promoted.push(slot);
    }

    renumber(registry, connected);
    promoted
}

/// Keep waiting positions dense and FIFO after any queue mutation.
pub fn renumber(registry: &mut ClientRegistry, connected: &[usize]) {
    let mut waiting: Vec<usize> = connected
        .iter()
        .copied()
        .filter(|&s| {
            registry
                .client(s)
                .is_some_and(|c| c.queue_level == QueueLevel::Waiting)
        })
        .collect();
    waiting.sort_by_key(|&s| registry.client(s).map(|c| c.queue_position).unwrap_or(u32::MAX));

    for (position, slot) in waiting.into_iter().enumerate() {
        if let Some(client) = registry.client_mut(slot) {
            client.queue_position = position as u32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(max_players: u8) -> GameSettings {
        GameSettings {
            max_players,
            ..GameSettings::default()
        }
    }

    #[test]
    fn promotion_respects_queue_order() {
        let mut registry = ClientRegistry::new();
        let connected = vec![0, 1, 2, 3];

        for &slot in &connected {
            enqueue(&mut registry, &connected, slot);
        }
        assert_eq!(registry.client(3).unwrap().queue_position, 3);

        let promoted = promote(&mut registry, &settings(2), &connected);
        assert_eq!(promoted, vec![0, 1]);
        assert_eq!(registry.client(0).unwrap().queue_level, QueueLevel::Playing);
        assert_eq!(registry.client(2).unwrap().queue_level, QueueLevel::Waiting);
        // The line renumbers densely behind the promoted pair.
        assert_eq!(registry.client(2).unwrap().queue_position, 0);
        assert_eq!(registry.client(3).unwrap().queue_position, 1);
    }

    #[test]
    fn leaving_play_frees_a_slot_for_the_next_in_line() {
        let mut registry = ClientRegistry::new();
        let connected = vec![0, 1, 2];
        for &slot in &connected {
            enqueue(&mut registry, &connected, slot);
        }
        promote(&mut registry, &settings(2), &connected);

        set_not_playing(&mut registry, 0);
        let promoted = promote(&mut registry, &settings(2), &connected);
        assert_eq!(promoted, vec![2]);
        assert_eq!(registry.client(0).unwrap().queue_level, QueueLevel::None);
    }

    #[test]
    fn set_not_playing_ignores_waiters() {
        let mut registry = ClientRegistry::new();
        let connected = vec![0];
        enqueue(&mut registry, &connected, 0);
        set_not_playing(&mut registry, 0);
        assert_eq!(registry.client(0).unwrap().queue_level, QueueLevel::Waiting);
    }
}
