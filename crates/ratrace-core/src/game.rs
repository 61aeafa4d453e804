//! Turn engine: whose turn it is, dice, movement, and cell effects.
//!
//! `GameState` is created lazily at game start and owns the frozen turn order.
//! Every transition validates all preconditions before mutating anything, so a
//! rejected request leaves players and game state untouched.

use crate::board::{Board, BoardCell, CellEffect, CellKind, PASS_START_BONUS};
use crate::player::{Asset, Player};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Sub-state of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    /// The active player may roll.
    AwaitingRoll,
    /// The active player has rolled and may end the turn.
    AwaitingEnd,
}

/// Errors from illegal turn transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum GameError {
    #[error("not your turn")]
    NotYourTurn,

    #[error("that action is not available in the current phase")]
    WrongPhase,
}

/// Two independent dice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceRoll {
    pub values: [u8; 2],
}

impl DiceRoll {
    /// Draw two uniform integers in [1, 6].
    pub fn roll<R: Rng>(rng: &mut R) -> Self {
        Self {
            values: [rng.gen_range(1..=6), rng.gen_range(1..=6)],
        }
    }

    pub fn total(&self) -> u8 {
        self.values[0] + self.values[1]
    }

    pub fn is_double(&self) -> bool {
        self.values[0] == self.values[1]
    }
}

/// Client-facing summary of the cell a roll landed on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSummary {
    pub id: u32,
    pub kind: CellKind,
    pub name: String,
}

impl From<&BoardCell> for CellSummary {
    fn from(cell: &BoardCell) -> Self {
        Self {
            id: cell.id,
            kind: cell.kind,
            name: cell.name.clone(),
        }
    }
}

/// The roll currently showing on the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastRoll {
    pub player_id: Uuid,
    pub values: [u8; 2],
    pub total: u8,
    pub is_double: bool,
    pub cell: Option<CellSummary>,
}

/// Something a cell effect did to the player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    Income { amount: i64, source: String },
    Bonus { amount: i64, source: String },
    Expense { amount: i64, source: String },
    PassiveIncome { amount: i64, source: String },
    DreamAchieved { name: String },
}

/// Append-only record of what happened during the game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEvent {
    Roll {
        player_id: Uuid,
        values: [u8; 2],
        total: u8,
        timestamp_ms: u64,
    },
}

/// Outcome of a legal roll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollReport {
    pub roll: DiceRoll,
    pub player_id: Uuid,
    pub old_position: usize,
    pub new_position: usize,
    pub passed_start: bool,
    pub cell: Option<CellSummary>,
    pub events: Vec<GameEvent>,
}

/// Per-room game state, created once at game start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub started_at_ms: u64,
    /// Frozen permutation of member identities; filtered on membership change.
    pub turn_order: Vec<Uuid>,
    pub active_player_index: usize,
    pub phase: TurnPhase,
    pub last_roll: Option<LastRoll>,
    pub rounds_completed: u32,
    pub history: Vec<HistoryEvent>,
}

impl GameState {
    /// Freeze the turn order from current membership and start the first turn.
    pub fn start(players: &[Player]) -> Self {
        Self {
            started_at_ms: now_ms(),
            turn_order: players.iter().map(|p| p.id).collect(),
            active_player_index: 0,
            phase: TurnPhase::AwaitingRoll,
            last_roll: None,
            rounds_completed: 0,
            history: Vec::new(),
        }
    }

    /// Identity whose turn it is, if any.
    pub fn active_player(&self) -> Option<Uuid> {
        self.turn_order.get(self.active_player_index).copied()
    }

    /// Roll the dice for `requester`, move their token, and apply the landed
    /// cell's effect. Legal only for the active player in `AwaitingRoll`.
    pub fn roll<R: Rng>(
        &mut self,
        players: &mut [Player],
        board: &Board,
        requester: Uuid,
        rng: &mut R,
    ) -> Result<RollReport, GameError> {
        if self.active_player() != Some(requester) {
            return Err(GameError::NotYourTurn);
        }
        if self.phase != TurnPhase::AwaitingRoll {
            return Err(GameError::WrongPhase);
        }
        let player = players
            .iter_mut()
            .find(|p| p.id == requester)
            .ok_or(GameError::NotYourTurn)?;

        let roll = DiceRoll::roll(rng);
        let old_position = player.position;
        let mv = board.advance(old_position, roll.total());

        if mv.passed_start {
            player.cash += PASS_START_BONUS;
            player.stats.income_received += PASS_START_BONUS;
        }
        player.position = mv.new_position;

        let cell = board.cell(mv.new_position);
        let events = match cell {
            Some(cell) => apply_cell_effect(player, cell),
            None => Vec::new(),
        };
        player.stats.dice_rolled += 1;

        let summary = cell.map(CellSummary::from);
        self.last_roll = Some(LastRoll {
            player_id: requester,
            values: roll.values,
            total: roll.total(),
            is_double: roll.is_double(),
            cell: summary.clone(),
        });
        self.history.push(HistoryEvent::Roll {
            player_id: requester,
            values: roll.values,
            total: roll.total(),
            timestamp_ms: now_ms(),
        });
        self.phase = TurnPhase::AwaitingEnd;

        Ok(RollReport {
            roll,
            player_id: requester,
            old_position,
            new_position: mv.new_position,
            passed_start: mv.passed_start,
            cell: summary,
            events,
        })
    }

    /// End the active player's turn and hand over to the next one. Legal in
    /// either phase, so a player may pass without rolling.
    pub fn end_turn(&mut self, players: &mut [Player], requester: Uuid) -> Result<(), GameError> {
        if self.active_player() != Some(requester) {
            return Err(GameError::NotYourTurn);
        }
        if let Some(player) = players.iter_mut().find(|p| p.id == requester) {
            player.stats.turns_taken += 1;
        }
        self.active_player_index = (self.active_player_index + 1) % self.turn_order.len();
        self.last_roll = None;
        self.phase = TurnPhase::AwaitingRoll;
        if self.active_player_index == 0 {
            self.rounds_completed += 1;
        }
        Ok(())
    }

    /// Reconcile the turn order with current membership. Called on every
    /// join/leave so the active index never points outside the order.
    pub fn normalize_turn_order(&mut self, players: &[Player]) {
        let members: Vec<Uuid> = players.iter().map(|p| p.id).collect();
        self.turn_order.retain(|id| members.contains(id));
        if self.turn_order.is_empty() {
            self.turn_order = members;
            self.active_player_index = 0;
        } else {
            self.active_player_index %= self.turn_order.len();
        }
    }
}

/// Mutate the player record according to the landed cell. Board-driven income
/// does not go through the ledger; only explicit transfers are audited.
fn apply_cell_effect(player: &mut Player, cell: &BoardCell) -> Vec<GameEvent> {
    let mut events = Vec::new();
    match &cell.effect {
        CellEffect::FlatIncome { amount } => {
            player.cash += amount;
            player.stats.income_received += amount;
            events.push(GameEvent::Income {
                amount: *amount,
                source: cell.name.clone(),
            });
        }
        CellEffect::CashFactor { factor } => {
            let delta = (player.cash as f64 * factor).round() as i64;
            player.cash += delta;
            if delta >= 0 {
                events.push(GameEvent::Bonus {
                    amount: delta,
                    source: cell.name.clone(),
                });
            } else {
                player.stats.expenses_paid += -delta;
                events.push(GameEvent::Expense {
                    amount: delta,
                    source: cell.name.clone(),
                });
            }
        }
        CellEffect::MonthlyIncome { amount } => {
            player.passive_income += amount;
            player.assets.push(Asset {
                cell_id: cell.id,
                name: cell.name.clone(),
                monthly_income: *amount,
            });
            events.push(GameEvent::PassiveIncome {
                amount: *amount,
                source: cell.name.clone(),
            });
        }
        CellEffect::DreamAchieved => {
            player.dream_achieved = true;
            events.push(GameEvent::DreamAchieved {
                name: cell.name.clone(),
            });
        }
        CellEffect::None => {}
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn players(n: usize) -> Vec<Player> {
        (0..n)
            .map(|i| Player::new(Uuid::new_v4(), format!("Player {}", i + 1), i == 0, 0))
            .collect()
    }

    #[test]
    fn test_dice_bounds_and_doubles() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1_000 {
            let roll = DiceRoll::roll(&mut rng);
            assert!((1..=6).contains(&roll.values[0]));
            assert!((1..=6).contains(&roll.values[1]));
            assert!((2..=12).contains(&roll.total()));
            assert_eq!(roll.is_double(), roll.values[0] == roll.values[1]);
        }
    }

    #[test]
    fn test_dice_uniform_per_die() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut counts = [0u32; 6];
        let trials = 60_000;
        for _ in 0..trials {
            let roll = DiceRoll::roll(&mut rng);
            counts[roll.values[0] as usize - 1] += 1;
        }
        // Each face should land near trials/6; 5% slack is generous for this
        // sample size.
        let expected = trials / 6;
        for (face, &count) in counts.iter().enumerate() {
            let deviation = (count as i64 - expected as i64).abs();
            assert!(
                deviation < (expected / 20) as i64,
                "face {} count {} too far from {}",
                face + 1,
                count,
                expected
            );
        }
    }

    #[test]
    fn test_start_freezes_turn_order() {
        let players = players(3);
        let game = GameState::start(&players);
        assert_eq!(game.turn_order.len(), 3);
        assert_eq!(game.turn_order[0], players[0].id);
        assert_eq!(game.active_player_index, 0);
        assert_eq!(game.phase, TurnPhase::AwaitingRoll);
        assert!(game.last_roll.is_none());
    }

    #[test]
    fn test_roll_by_non_active_player_changes_nothing() {
        let mut players = players(2);
        let mut game = GameState::start(&players);
        let before_players = players.clone();
        let before_game = game.clone();
        let intruder = players[1].id;

        let mut rng = StdRng::seed_from_u64(1);
        let err = game.roll(&mut players, &Board::standard(), intruder, &mut rng);
        assert_eq!(err, Err(GameError::NotYourTurn));
        assert_eq!(players, before_players);
        assert_eq!(game, before_game);
    }

    #[test]
    fn test_roll_twice_in_one_turn_is_rejected() {
        let mut players = players(2);
        let mut game = GameState::start(&players);
        let active = players[0].id;
        let board = Board::standard();
        let mut rng = StdRng::seed_from_u64(2);

        game.roll(&mut players, &board, active, &mut rng).unwrap();
        let err = game.roll(&mut players, &board, active, &mut rng);
        assert_eq!(err, Err(GameError::WrongPhase));
    }

    #[test]
    fn test_roll_moves_player_and_records_history() {
        let mut players = players(2);
        let mut game = GameState::start(&players);
        let active = players[0].id;
        let board = Board::standard();
        let mut rng = StdRng::seed_from_u64(3);

        let report = game.roll(&mut players, &board, active, &mut rng).unwrap();
        assert_eq!(report.old_position, 0);
        assert_eq!(report.new_position, report.roll.total() as usize);
        assert!(!report.passed_start);
        assert_eq!(players[0].position, report.new_position);
        assert_eq!(players[0].stats.dice_rolled, 1);
        assert_eq!(game.phase, TurnPhase::AwaitingEnd);
        assert_eq!(game.history.len(), 1);
        let last = game.last_roll.as_ref().unwrap();
        assert_eq!(last.total, report.roll.total());
        assert_eq!(last.player_id, active);
    }

    #[test]
    fn test_end_turn_advances_and_wraps_rounds() {
        let mut players = players(2);
        let mut game = GameState::start(&players);
        let (first, second) = (players[0].id, players[1].id);

        // Passing without rolling is legal.
        game.end_turn(&mut players, first).unwrap();
        assert_eq!(game.active_player_index, 1);
        assert_eq!(game.rounds_completed, 0);
        assert_eq!(players[0].stats.turns_taken, 1);

        game.end_turn(&mut players, second).unwrap();
        assert_eq!(game.active_player_index, 0);
        assert_eq!(game.rounds_completed, 1);
        assert_eq!(game.phase, TurnPhase::AwaitingRoll);
        assert!(game.last_roll.is_none());
    }

    #[test]
    fn test_end_turn_by_non_active_player_rejected() {
        let mut players = players(3);
        let mut game = GameState::start(&players);
        let before = game.clone();
        let intruder = players[2].id;
        let err = game.end_turn(&mut players, intruder);
        assert_eq!(err, Err(GameError::NotYourTurn));
        assert_eq!(game, before);
    }

    #[test]
    fn test_normalize_after_leave_keeps_index_in_bounds() {
        let mut players = players(3);
        let mut game = GameState::start(&players);
        game.active_player_index = 2;

        players.pop();
        game.normalize_turn_order(&players);
        assert_eq!(game.turn_order.len(), 2);
        assert_eq!(game.active_player_index, 0);
        assert!(game.active_player_index < game.turn_order.len());
    }

    #[test]
    fn test_normalize_rebuilds_when_order_emptied() {
        let original = players(2);
        let mut game = GameState::start(&original);

        // Everyone who was in the frozen order left; two new members joined.
        let replacements = players(2);
        game.normalize_turn_order(&replacements);
        assert_eq!(game.turn_order, vec![replacements[0].id, replacements[1].id]);
        assert_eq!(game.active_player_index, 0);
    }

    #[test]
    fn test_flat_income_cell() {
        let mut player = Player::new(Uuid::new_v4(), "A".to_string(), true, 0);
        let board = Board::standard();
        let cell = board.cell(0).unwrap(); // investment income
        let events = apply_cell_effect(&mut player, cell);
        assert_eq!(player.cash, crate::player::STARTING_CASH + 2_000);
        assert_eq!(player.stats.income_received, 2_000);
        assert!(matches!(events[0], GameEvent::Income { amount: 2_000, .. }));
    }

    #[test]
    fn test_cash_factor_cell_halves_cash() {
        let mut player = Player::new(Uuid::new_v4(), "A".to_string(), true, 0);
        player.cash = 10_000;
        let board = Board::standard();
        let cell = board.cell(3).unwrap(); // audit, factor -0.5
        let events = apply_cell_effect(&mut player, cell);
        assert_eq!(player.cash, 5_000);
        assert_eq!(player.stats.expenses_paid, 5_000);
        assert!(matches!(events[0], GameEvent::Expense { amount: -5_000, .. }));
    }

    #[test]
    fn test_monthly_income_cell_adds_asset() {
        let mut player = Player::new(Uuid::new_v4(), "A".to_string(), true, 0);
        let board = Board::standard();
        let cell = board.cell(2).unwrap(); // coffee shop, 3000/month
        apply_cell_effect(&mut player, cell);
        assert_eq!(player.passive_income, 3_000);
        assert_eq!(player.assets.len(), 1);
        assert_eq!(player.assets[0].monthly_income, 3_000);
    }

    #[test]
    fn test_dream_cell_marks_achievement() {
        let mut player = Player::new(Uuid::new_v4(), "A".to_string(), true, 0);
        let board = Board::standard();
        let cell = board.cell(1).unwrap(); // dream house
        apply_cell_effect(&mut player, cell);
        assert!(player.dream_achieved);
    }

    #[test]
    fn test_inert_cell_has_no_effect() {
        let mut player = Player::new(Uuid::new_v4(), "A".to_string(), true, 0);
        let before = player.clone();
        let board = Board::standard();
        let cell = board.cell(7).unwrap(); // charity
        let events = apply_cell_effect(&mut player, cell);
        assert!(events.is_empty());
        assert_eq!(player, before);
    }
}
