//! Ratrace - session, turn, and ledger engine for a financial-freedom board game
//!
//! This crate provides the synchronous core of the game, including:
//! - The immutable board topology (a closed loop of effect-tagged cells)
//! - Room-scoped player records and profession cards
//! - The turn state machine (dice, movement, cell effects)
//! - The per-room ledger with audited transfers
//!
//! # Architecture
//!
//! The engine performs no I/O and holds no locks; it mutates the state it is
//! handed and returns structured errors for illegal transitions. The
//! `ratrace-server` crate owns the state, serializes access per room, and
//! carries requests over WebSocket.
//!
//! # Modules
//!
//! - [`board`]: cell list, effect variants, and pure movement
//! - [`player`]: player records, stats, professions
//! - [`game`]: turn order, phases, rolls, and cell-effect application
//! - [`ledger`]: balances and transfer history

pub mod board;
pub mod game;
pub mod ledger;
pub mod player;

// Re-export commonly used types
pub use board::{Board, BoardCell, CellEffect, CellKind, Move, INVESTMENT_INCOME, PASS_START_BONUS};
pub use game::{
    now_ms, CellSummary, DiceRoll, GameError, GameEvent, GameState, HistoryEvent, LastRoll,
    RollReport, TurnPhase,
};
pub use ledger::{Ledger, LedgerEntry, LedgerError, STARTING_BALANCE};
pub use player::{Asset, Player, PlayerStats, Profession, STARTING_CASH};
