//! Board topology: an immutable closed loop of cells.
//!
//! The board is loaded once and never mutated. Movement is a pure function of
//! position and dice total; cell effects are tagged variants so the turn
//! engine can match on them exhaustively.

use serde::{Deserialize, Serialize};

/// Bonus credited when a move wraps past the last cell back to the first.
pub const PASS_START_BONUS: i64 = 2_000;

/// Fixed payout of an investment-income cell.
pub const INVESTMENT_INCOME: i64 = 2_000;

/// Display category of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    Money,
    Business,
    Dream,
    Loss,
    Charity,
}

/// What landing on a cell does to the player record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CellEffect {
    /// Fixed amount credited to cash.
    FlatIncome { amount: i64 },
    /// Cash adjusted by a fraction of current holdings (negative for losses).
    CashFactor { factor: f64 },
    /// Recurring amount added to passive income.
    MonthlyIncome { amount: i64 },
    /// Marks the player's dream as achieved.
    DreamAchieved,
    /// No effect on the player record.
    None,
}

/// One position on the track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardCell {
    pub id: u32,
    pub kind: CellKind,
    pub name: String,
    /// Purchase price shown to clients; not charged by the engine.
    pub cost: Option<i64>,
    pub effect: CellEffect,
}

/// Result of advancing a token around the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub new_position: usize,
    pub passed_start: bool,
}

/// The ordered cycle of cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Board {
    cells: Vec<BoardCell>,
}

impl Board {
    /// Build a board from an ordered cell list.
    pub fn new(cells: Vec<BoardCell>) -> Self {
        assert!(!cells.is_empty(), "board must have at least one cell");
        Self { cells }
    }

    /// Number of cells on the track.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Cell at a position, if within bounds.
    pub fn cell(&self, position: usize) -> Option<&BoardCell> {
        self.cells.get(position)
    }

    /// Cell by its id.
    pub fn cell_by_id(&self, id: u32) -> Option<&BoardCell> {
        self.cells.iter().find(|c| c.id == id)
    }

    /// All cells of a given kind.
    pub fn cells_of_kind(&self, kind: CellKind) -> impl Iterator<Item = &BoardCell> {
        self.cells.iter().filter(move |c| c.kind == kind)
    }

    /// All cells, in track order.
    pub fn cells(&self) -> &[BoardCell] {
        &self.cells
    }

    /// Advance a token by `steps` cells. Pure: wraps modulo the track length
    /// and reports whether the move passed the start cell.
    pub fn advance(&self, from: usize, steps: u8) -> Move {
        let raw = from + steps as usize;
        Move {
            new_position: raw % self.cells.len(),
            passed_start: raw >= self.cells.len(),
        }
    }

    /// The standard 44-cell track.
    pub fn standard() -> Self {
        Self::new(vec![
            money(1, "Investment income"),
            dream(2, "Dream house", 100_000),
            business(3, "Coffee shop", 100_000, 3_000),
            loss(4, "Audit", -0.5),
            business(5, "Wellness center", 270_000, 5_000),
            dream(6, "Antarctica expedition", 150_000),
            business(7, "Mobile app", 420_000, 10_000),
            charity(8, "Charity"),
            business(9, "Digital marketing agency", 160_000, 4_000),
            loss(10, "Robbery", -1.0),
            business(11, "Boutique hotel", 200_000, 5_000),
            money(12, "Investment income"),
            business(13, "Restaurant franchise", 320_000, 8_000),
            dream(14, "Climb the highest peaks", 500_000),
            business(15, "Boutique hotel II", 200_000, 4_000),
            dream(16, "Bestselling book", 300_000),
            business(17, "Yoga studio", 170_000, 4_500),
            loss(18, "Divorce", -0.5),
            business(19, "Car wash chain", 120_000, 3_000),
            dream(20, "Mediterranean yacht", 300_000),
            business(21, "Beauty salon", 500_000, 15_000),
            dream(22, "World festival", 200_000),
            money(23, "Investment income"),
            business(24, "Online store", 110_000, 3_000),
            inert(25, CellKind::Loss, "Fire"),
            dream(26, "Retreat center", 500_000),
            dream(27, "Talent foundation", 300_000),
            dream(28, "Around-the-world voyage", 200_000),
            business(29, "Eco ranch", 1_000_000, 20_000),
            dream(30, "Around-the-world voyage II", 300_000),
            inert(31, CellKind::Business, "Stock exchange"),
            dream(32, "Private jet", 1_000_000),
            business(33, "NFT platform", 400_000, 12_000),
            money(34, "Investment income"),
            business(35, "Language school", 20_000, 3_000),
            dream(36, "Supercar collection", 1_000_000),
            business(37, "School of the future", 300_000, 10_000),
            dream(38, "Feature film", 500_000),
            inert(39, CellKind::Loss, "Hostile takeover"),
            dream(40, "Global opinion leader", 1_000_000),
            business(41, "Car wash chain II", 120_000, 3_500),
            dream(42, "White yacht", 300_000),
            business(43, "Cashflow franchise", 100_000, 10_000),
            dream(44, "Space flight", 250_000),
        ])
    }
}

fn money(id: u32, name: &str) -> BoardCell {
    BoardCell {
        id,
        kind: CellKind::Money,
        name: name.to_string(),
        cost: None,
        effect: CellEffect::FlatIncome {
            amount: INVESTMENT_INCOME,
        },
    }
}

fn business(id: u32, name: &str, cost: i64, monthly: i64) -> BoardCell {
    BoardCell {
        id,
        kind: CellKind::Business,
        name: name.to_string(),
        cost: Some(cost),
        effect: CellEffect::MonthlyIncome { amount: monthly },
    }
}

fn dream(id: u32, name: &str, cost: i64) -> BoardCell {
    BoardCell {
        id,
        kind: CellKind::Dream,
        name: name.to_string(),
        cost: Some(cost),
        effect: CellEffect::DreamAchieved,
    }
}

fn loss(id: u32, name: &str, factor: f64) -> BoardCell {
    BoardCell {
        id,
        kind: CellKind::Loss,
        name: name.to_string(),
        cost: None,
        effect: CellEffect::CashFactor { factor },
    }
}

fn charity(id: u32, name: &str) -> BoardCell {
    inert(id, CellKind::Charity, name)
}

/// Cells whose effects are resolved outside the turn engine.
fn inert(id: u32, kind: CellKind, name: &str) -> BoardCell {
    BoardCell {
        id,
        kind,
        name: name.to_string(),
        cost: None,
        effect: CellEffect::None,
    }
}
