//! Room-scoped player records.
//!
//! A `Player` is created when an identity joins a room and upserted (never
//! duplicated) on rejoin. Cash and passive income are mutated directly by the
//! turn engine; audited transfers live in the ledger instead.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cash every player starts a game with.
pub const STARTING_CASH: i64 = 10_000;

/// A profession card: the player's baseline monthly finances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profession {
    pub id: String,
    pub name: String,
    pub description: String,
    pub salary: i64,
    pub expenses: i64,
    pub cash_flow: i64,
}

impl Profession {
    /// Look up a profession by id, falling back to the entrepreneur card.
    pub fn by_id(id: &str) -> Self {
        match id {
            "doctor" => Self {
                id: "doctor".to_string(),
                name: "Doctor".to_string(),
                description: "Medical specialist".to_string(),
                salary: 8_000,
                expenses: 4_500,
                cash_flow: 3_500,
            },
            _ => Self::entrepreneur(),
        }
    }

    /// The default profession assigned at game start.
    pub fn entrepreneur() -> Self {
        Self {
            id: "entrepreneur".to_string(),
            name: "Entrepreneur".to_string(),
            description: "Owner of a successful business".to_string(),
            salary: 10_000,
            expenses: 6_200,
            cash_flow: 3_800,
        }
    }
}

/// A business the player picked up on the track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub cell_id: u32,
    pub name: String,
    pub monthly_income: i64,
}

/// Per-player counters kept for the whole game.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub turns_taken: u32,
    pub dice_rolled: u32,
    pub income_received: i64,
    pub expenses_paid: i64,
}

/// A player inside one room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    /// Stable identity, shared across rooms and connections.
    pub id: Uuid,
    pub name: String,
    pub is_host: bool,
    pub is_ready: bool,
    pub connected: bool,
    pub selected_token: Option<String>,
    /// Id of the dream cell the player is chasing.
    pub selected_dream: Option<u32>,
    pub joined_at_ms: u64,
    /// Index into the board's cell list.
    pub position: usize,
    pub cash: i64,
    pub passive_income: i64,
    pub assets: Vec<Asset>,
    pub stats: PlayerStats,
    pub profession: Profession,
    pub dream_achieved: bool,
}

impl Player {
    pub fn new(id: Uuid, name: String, is_host: bool, joined_at_ms: u64) -> Self {
        Self {
            id,
            name,
            is_host,
            is_ready: false,
            connected: true,
            selected_token: None,
            selected_dream: None,
            joined_at_ms,
            position: 0,
            cash: STARTING_CASH,
            passive_income: 0,
            assets: Vec::new(),
            stats: PlayerStats::default(),
            profession: Profession::entrepreneur(),
            dream_achieved: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_player_defaults() {
        let player = Player::new(Uuid::new_v4(), "Alice".to_string(), true, 0);
        assert_eq!(player.cash, STARTING_CASH);
        assert_eq!(player.position, 0);
        assert!(player.is_host);
        assert!(!player.is_ready);
        assert!(player.connected);
        assert!(player.assets.is_empty());
    }

    #[test]
    fn test_profession_lookup() {
        assert_eq!(Profession::by_id("doctor").salary, 8_000);
        assert_eq!(Profession::by_id("entrepreneur").cash_flow, 3_800);
        // Unknown ids fall back to the default card.
        assert_eq!(Profession::by_id("astronaut").id, "entrepreneur");
    }
}
