use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};

/// Team affiliation. `None` is a real value on the wire: spectators and
/// free-for-all players carry it, so every slot always has a team.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Archive,
    RkyvSerialize,
    RkyvDeserialize,
    Serialize,
    Deserialize,
)]
#[rkyv(compare(PartialEq), derive(Debug))]
#[repr(u8)]
pub enum TeamColor {
    #[default]
    None = 0,
    Red = 1,
    Blue = 2,
}

impl TeamColor {
    pub const COUNT: usize = 3;

    pub const ALL: [TeamColor; Self::COUNT] = [TeamColor::None, TeamColor::Red, TeamColor::Blue];

    pub fn from_raw(value: i32) -> Option<TeamColor> {
        match value {
            0 => Some(TeamColor::None),
            1 => Some(TeamColor::Red),
            2 => Some(TeamColor::Blue),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            TeamColor::None => "none",
            TeamColor::Red => "red",
            TeamColor::Blue => "blue",
        }
    }
}

/// Per-team flag status, shipped inside the full game-state payload so a
/// joining client sees carriers and scores without replaying the match.
#[derive(Debug, Clone, Copy, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[rkyv(derive(Debug))]
pub struct FlagState {
    /// Slot currently carrying this team's flag, if any.
    pub carrier: Option<u32>,
    /// True while the flag sits at its base stand.
    pub at_base: bool,
    /// Tick the flag was dropped in the field, 0 otherwise.
    pub drop_tick: u32,
}

impl Default for FlagState {
    fn default() -> Self {
        Self::home()
    }
}

impl FlagState {
    pub fn home() -> Self {
        Self {
            carrier: None,
            at_base: true,
            drop_tick: 0,
        }
    }

    pub fn return_home(&mut self) {
        *self = Self::home();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_team_values_round_trip() {
        for team in TeamColor::ALL {
            assert_eq!(TeamColor::from_raw(team as i32), Some(team));
        }
        assert_eq!(TeamColor::from_raw(-1), None);
        assert_eq!(TeamColor::from_raw(3), None);
    }

    #[test]
    fn flag_returns_home() {
        let mut flag = FlagState {
            carrier: Some(4),
            at_base: false,
            drop_tick: 900,
        };
        flag.return_home();
        assert_eq!(flag, FlagState::home());
    }
}
