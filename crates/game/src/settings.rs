use bitflags::bitflags;
use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};

bitflags! {
    /// Match rule toggles. Stored as a raw `u32` in [`GameSettings`] so
    /// unknown future bits survive a round trip through older peers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MatchFlags: u32 {
        const ITEMS_RESPAWN   = 1 << 0;
        const WEAPONS_STAY    = 1 << 1;
        const FRIENDLY_FIRE   = 1 << 2;
        const SPAWN_FARTHEST  = 1 << 3;
        const FORCE_RESPAWN   = 1 << 4;
        const INFINITE_AMMO   = 1 << 5;
        const KEEP_ITEMS      = 1 << 6;
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Archive,
    RkyvSerialize,
    RkyvDeserialize,
    Serialize,
    Deserialize,
)]
#[rkyv(compare(PartialEq), derive(Debug))]
#[repr(u8)]
pub enum GameType {
    Cooperative = 0,
    #[default]
    Deathmatch = 1,
    TeamDeathmatch = 2,
    CaptureTheFlag = 3,
}

impl GameType {
    pub fn uses_teams(self) -> bool {
        matches!(self, GameType::TeamDeathmatch | GameType::CaptureTheFlag)
    }
}

/// Sync-critical match settings. These travel inside the full game-state
/// payload; a client may not run a map with settings that disagree with the
/// server's, so they are never configurable client-side.
#[derive(
    Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize, Serialize, Deserialize,
)]
#[rkyv(derive(Debug))]
pub struct GameSettings {
    pub game_type: GameType,
    /// Slots allowed to be playing at once; the rest wait in the join queue.
    pub max_players: u8,
    pub frag_limit: u32,
    /// Minutes; 0 disables.
    pub time_limit: u32,
    pub score_limit: u32,
    /// Ticks of post-spawn damage immunity.
    pub respawn_protection_ticks: u32,
    /// Ticks a corpse may idle before the server forces an action; 0 disables.
    pub death_time_limit_ticks: u32,
    /// Percentage of damage applied to teammates when friendly fire is on.
    pub friendly_damage_percent: u32,
    /// Raw [`MatchFlags`] bits.
    pub match_flags: u32,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            game_type: GameType::Deathmatch,
            max_players: 16,
            frag_limit: 0,
            time_limit: 0,
            score_limit: 0,
            respawn_protection_ticks: 0,
            death_time_limit_ticks: 0,
            friendly_damage_percent: 100,
            match_flags: MatchFlags::WEAPONS_STAY.bits(),
        }
    }
}

impl GameSettings {
    pub fn teams_enabled(&self) -> bool {
        self.game_type.uses_teams()
    }

    pub fn match_flags(&self) -> MatchFlags {
        MatchFlags::from_bits_truncate(self.match_flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn team_games_enable_teams() {
        let mut settings = GameSettings::default();
        assert!(!settings.teams_enabled());

        settings.game_type = GameType::CaptureTheFlag;
        assert!(settings.teams_enabled());
    }

    #[test]
    fn unknown_flag_bits_are_dropped_on_read() {
        let settings = GameSettings {
            match_flags: 0xffff_ffff,
            ..Default::default()
        };
        assert!(settings.match_flags().contains(MatchFlags::FRIENDLY_FIRE));
    }
}
