use bitflags::bitflags;

use crate::MAX_CLIENTS;

pub const NUM_WEAPONS: usize = 9;
pub const NUM_AMMO: usize = 4;
pub const NUM_CARDS: usize = 6;
pub const NUM_POWERS: usize = 6;

/// Longest player name in bytes, terminator excluded.
pub const MAX_NAME_LEN: usize = 19;
/// Longest transmitted string in bytes, terminator excluded.
pub const MAX_STRING_LEN: usize = 255;

/// Weapon identifier; indexes the ownership and preference arrays.
pub type WeaponId = u8;
/// `0` is reserved in preference orderings for "no weapon".
pub const WEAPON_NONE: WeaponId = 0;

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct CheatFlags: u32 {
        const NOCLIP   = 1 << 0;
        const GODMODE  = 1 << 1;
        const NOTARGET = 1 << 2;
        const FLY      = 1 << 3;
    }
}

/// Gameplay-visible state for one slot. On the server this is the source of
/// truth; on a client every field except the local player's own weapon
/// choice is a write-only mirror fed by field-sync messages.
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub name: String,
    pub skin: String,
    pub class: String,
    pub in_game: bool,

    pub health: i32,
    pub armor_points: i32,
    pub armor_type: i32,
    pub colormap: i32,
    pub cheats: CheatFlags,

    pub ready_weapon: WeaponId,
    pub pending_weapon: WeaponId,

    pub kill_count: i32,
    pub item_count: i32,
    pub secret_count: i32,
    pub backpack: bool,
    pub did_secret: bool,

    pub weapons_owned: [bool; NUM_WEAPONS],
    pub ammo: [i32; NUM_AMMO],
    pub max_ammo: [i32; NUM_AMMO],
    pub cards: [bool; NUM_CARDS],
    /// Remaining ticks per power-up; 0 when inactive.
    pub powers: [i32; NUM_POWERS],
    /// Frags scored against each opponent slot; own slot counts suicides
    /// and spectate penalties against the total.
    pub frags: [i32; MAX_CLIENTS],
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            name: String::new(),
            skin: String::from("base"),
            class: String::from("marine"),
            in_game: false,
            health: 100,
            armor_points: 0,
            armor_type: 0,
            colormap: 0,
            cheats: CheatFlags::empty(),
            ready_weapon: WEAPON_NONE,
            pending_weapon: WEAPON_NONE,
            kill_count: 0,
            item_count: 0,
            secret_count: 0,
            backpack: false,
            did_secret: false,
            weapons_owned: [false; NUM_WEAPONS],
            ammo: [0; NUM_AMMO],
            max_ammo: [0; NUM_AMMO],
            cards: [false; NUM_CARDS],
            powers: [0; NUM_POWERS],
            frags: [0; MAX_CLIENTS],
        }
    }
}

impl PlayerState {
    /// Scoreboard frag total: everyone else counts up, own-slot entries
    /// (suicides, spectate penalties) count down.
    pub fn frag_total(&self, own_slot: usize) -> i32 {
        let mut total = 0;
        for (slot, &frags) in self.frags.iter().enumerate() {
            if slot == own_slot {
                total -= frags;
            } else {
                total += frags;
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_slot_frags_count_against_total() {
        let mut player = PlayerState::default();
        player.frags[1] = 3;
        player.frags[2] = 2;
        player.frags[0] = 1;
        assert_eq!(player.frag_total(0), 4);
        assert_eq!(player.frag_total(3), 6);
    }
}
