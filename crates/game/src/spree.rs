//! Frag-streak bookkeeping layered on the client record store.
//!
//! Two independent tiers are tracked per life: the frag level, derived from
//! total frags this life, and the consecutive-frag level, which chains only
//! while each frag lands within a fixed window of the previous one.

use crate::TICRATE;
use crate::clients::ClientState;

/// A chained frag must land within this many ticks of the previous frag.
pub const SPREE_WINDOW_TICKS: u32 = 3 * TICRATE;

/// Frags required to advance one frag-level tier.
pub const FRAGS_PER_LEVEL: u32 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum FragLevel {
    #[default]
    None = 0,
    KillingSpree = 1,
    Rampage = 2,
    Dominating = 3,
    Unstoppable = 4,
    GodLike = 5,
}

impl FragLevel {
    pub fn from_frags(frags_this_life: u32) -> FragLevel {
        match frags_this_life / FRAGS_PER_LEVEL {
            0 => FragLevel::None,
            1 => FragLevel::KillingSpree,
            2 => FragLevel::Rampage,
            3 => FragLevel::Dominating,
            4 => FragLevel::Unstoppable,
            _ => FragLevel::GodLike,
        }
    }

    /// Third-person announcement fragment ("<name> is ...!"), if this tier
    /// is announced at all.
    pub fn announcement(self) -> Option<&'static str> {
        match self {
            FragLevel::None => None,
            FragLevel::KillingSpree => Some("on a killing spree"),
            FragLevel::Rampage => Some("on a rampage"),
            FragLevel::Dominating => Some("dominating"),
            FragLevel::Unstoppable => Some("unstoppable"),
            FragLevel::GodLike => Some("God like"),
        }
    }

    /// Center-screen text shown to the player who crossed the tier.
    pub fn hud_text(self) -> Option<&'static str> {
        match self {
            FragLevel::None => None,
            FragLevel::KillingSpree => Some("Killing Spree!"),
            FragLevel::Rampage => Some("Rampage!"),
            FragLevel::Dominating => Some("Dominating!"),
            FragLevel::Unstoppable => Some("Unstoppable!"),
            FragLevel::GodLike => Some("God Like!"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConsecutiveFragLevel {
    #[default]
    None = 0,
    /// One unchained frag; the baseline a new chain restarts from.
    Single = 1,
    Double = 2,
    Multi = 3,
    Ultra = 4,
    Monster = 5,
}

impl ConsecutiveFragLevel {
    pub fn next(self) -> ConsecutiveFragLevel {
        match self {
            ConsecutiveFragLevel::None => ConsecutiveFragLevel::Single,
            ConsecutiveFragLevel::Single => ConsecutiveFragLevel::Double,
            ConsecutiveFragLevel::Double => ConsecutiveFragLevel::Multi,
            ConsecutiveFragLevel::Multi => ConsecutiveFragLevel::Ultra,
            ConsecutiveFragLevel::Ultra | ConsecutiveFragLevel::Monster => {
                ConsecutiveFragLevel::Monster
            }
        }
    }

    pub fn hud_text(self) -> Option<&'static str> {
        match self {
            ConsecutiveFragLevel::None | ConsecutiveFragLevel::Single => None,
            ConsecutiveFragLevel::Double => Some("Double Kill!"),
            ConsecutiveFragLevel::Multi => Some("Multi Kill!"),
            ConsecutiveFragLevel::Ultra => Some("Ultra Kill!"),
            ConsecutiveFragLevel::Monster => Some("Monster Kill!"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragKind {
    Player,
    Suicide,
    TeamKill,
}

/// What changed when a frag was recorded; announcements appear at most once
/// per tier crossing.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SpreeUpdate {
    pub frag_level: FragLevel,
    pub consecutive_level: ConsecutiveFragLevel,
    /// Set only on the tick the frag level crossed into a new tier.
    pub frag_announcement: Option<&'static str>,
    /// Set when the chained-kill tier is worth showing.
    pub consecutive_announcement: Option<&'static str>,
    /// True when a suicide or team kill ended every running spree.
    pub sprees_ended: bool,
}

/// Record one frag scored by `client` at `world_index`.
///
/// The chain window is checked against the previous frag's tick before
/// `last_frag_tick` is updated, so the comparison is always against the
/// immediately preceding frag.
pub fn record_frag(client: &mut ClientState, world_index: u32, kind: FragKind) -> SpreeUpdate {
    match kind {
        FragKind::Suicide | FragKind::TeamKill => {
            if kind == FragKind::Suicide {
                client.stats.suicides += 1;
            } else {
                client.stats.team_kills += 1;
            }
            client.frags_this_life = 0;
            client.frag_level = FragLevel::None;
            client.consecutive_frag_level = ConsecutiveFragLevel::None;
            SpreeUpdate {
                sprees_ended: true,
                ..SpreeUpdate::default()
            }
        }
        FragKind::Player => {
            client.stats.player_kills += 1;
            client.frags_this_life += 1;

            let mut update = SpreeUpdate::default();

            let new_level = FragLevel::from_frags(client.frags_this_life);
            if client.frag_level < FragLevel::GodLike && new_level != client.frag_level {
                client.frag_level = new_level;
                update.frag_announcement = new_level.announcement();
            }

            let chained = client.last_frag_tick != 0
                && world_index.wrapping_sub(client.last_frag_tick) <= SPREE_WINDOW_TICKS;
            client.consecutive_frag_level = if chained {
                client.consecutive_frag_level.next()
            } else {
                ConsecutiveFragLevel::Single
            };
            update.consecutive_announcement = client.consecutive_frag_level.hud_text();

            client.last_frag_tick = world_index;

            update.frag_level = client.frag_level;
            update.consecutive_level = client.consecutive_frag_level;
            update
        }
    }
}

/// Death or respawn: every per-life counter goes back to zero.
pub fn reset_life(client: &mut ClientState) {
    client.frags_this_life = 0;
    client.frag_level = FragLevel::None;
    client.consecutive_frag_level = ConsecutiveFragLevel::None;
    client.last_frag_tick = 0;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_client() -> ClientState {
        ClientState::default()
    }

    #[test]
    fn frag_level_is_monotonic_within_a_life() {
        let mut client = fresh_client();
        let mut previous = FragLevel::None;

        for i in 0..40 {
            let update = record_frag(&mut client, 1000 + i * 200, FragKind::Player);
            assert!(update.frag_level >= previous);
            previous = update.frag_level;
        }
        assert_eq!(previous, FragLevel::GodLike);
    }

    #[test]
    fn tier_crossing_announces_exactly_once() {
        let mut client = fresh_client();
        let mut announcements = 0;

        for i in 0..10 {
            let update = record_frag(&mut client, 1000 + i * 200, FragKind::Player);
            if update.frag_announcement.is_some() {
                announcements += 1;
            }
        }
        // 10 frags cross into KillingSpree at 5 and Rampage at 10.
        assert_eq!(announcements, 2);
    }

    #[test]
    fn chain_window_boundary() {
        let mut client = fresh_client();

        record_frag(&mut client, 1000, FragKind::Player);
        let update = record_frag(&mut client, 1000 + SPREE_WINDOW_TICKS - 1, FragKind::Player);
        assert_eq!(update.consecutive_level, ConsecutiveFragLevel::Double);

        let mut client = fresh_client();
        record_frag(&mut client, 1000, FragKind::Player);
        let update = record_frag(&mut client, 1000 + SPREE_WINDOW_TICKS + 1, FragKind::Player);
        assert_eq!(update.consecutive_level, ConsecutiveFragLevel::Single);
    }

    #[test]
    fn window_compares_against_immediately_preceding_frag() {
        let mut client = fresh_client();

        record_frag(&mut client, 1000, FragKind::Player);
        record_frag(&mut client, 1000 + SPREE_WINDOW_TICKS, FragKind::Player);
        let update = record_frag(
            &mut client,
            1000 + 2 * SPREE_WINDOW_TICKS,
            FragKind::Player,
        );
        // Each hop is within the window of the previous frag even though the
        // first and third frags are further apart than the window.
        assert_eq!(update.consecutive_level, ConsecutiveFragLevel::Multi);
    }

    #[test]
    fn suicide_ends_all_sprees() {
        let mut client = fresh_client();
        for i in 0..6 {
            record_frag(&mut client, 1000 + i * 10, FragKind::Player);
        }
        assert_eq!(client.frag_level, FragLevel::KillingSpree);

        let update = record_frag(&mut client, 1100, FragKind::Suicide);
        assert!(update.sprees_ended);
        assert_eq!(client.frag_level, FragLevel::None);
        assert_eq!(client.consecutive_frag_level, ConsecutiveFragLevel::None);
        assert_eq!(client.frags_this_life, 0);
        assert_eq!(client.stats.suicides, 1);
    }

    #[test]
    fn reset_clears_levels_and_nothing_else_does() {
        let mut client = fresh_client();
        for i in 0..7 {
            record_frag(&mut client, 1000 + i * 1000, FragKind::Player);
        }
        assert_eq!(client.frag_level, FragLevel::KillingSpree);

        reset_life(&mut client);
        assert_eq!(client.frag_level, FragLevel::None);
        assert_eq!(client.frags_this_life, 0);
        assert_eq!(client.last_frag_tick, 0);
    }
}
