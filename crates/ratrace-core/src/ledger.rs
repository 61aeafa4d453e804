//! Per-room ledger: balances and an append-only transfer history.
//!
//! Balances are keyed by (player, room) and default to a fixed starting
//! amount the first time they are read. Board-driven income never touches the
//! ledger; only explicit transfers are recorded here.

use crate::game::now_ms;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Balance a player starts with in every room's ledger.
pub const STARTING_BALANCE: i64 = 1_000;

/// Immutable audit record of one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub from: Uuid,
    pub to: Uuid,
    pub amount: i64,
    pub room_id: Uuid,
    pub timestamp_ms: u64,
}

/// Errors from ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum LedgerError {
    #[error("cannot transfer to yourself")]
    SameParty,

    #[error("amount must be positive")]
    InvalidAmount,

    #[error("insufficient funds")]
    InsufficientFunds,
}

/// Balances and transfer history for every room in the process.
#[derive(Debug, Default)]
pub struct Ledger {
    balances: HashMap<(Uuid, Uuid), i64>,
    history: Vec<LedgerEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current balance, defaulting to the starting amount if unseen.
    pub fn balance(&self, player: Uuid, room_id: Uuid) -> i64 {
        self.balances
            .get(&(player, room_id))
            .copied()
            .unwrap_or(STARTING_BALANCE)
    }

    /// Absolute overwrite. Callers must read-modify-write; this is only safe
    /// because all mutation funnels through one owner.
    pub fn set_balance(&mut self, player: Uuid, room_id: Uuid, amount: i64) {
        self.balances.insert((player, room_id), amount);
    }

    /// Move `amount` from one player to another inside a room. Either the
    /// debit, credit, and history entry all happen, or none do. Returns the
    /// sender's new balance.
    pub fn transfer(
        &mut self,
        from: Uuid,
        to: Uuid,
        amount: i64,
        room_id: Uuid,
    ) -> Result<i64, LedgerError> {
        if from == to {
            return Err(LedgerError::SameParty);
        }
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let from_balance = self.balance(from, room_id);
        if from_balance < amount {
            return Err(LedgerError::InsufficientFunds);
        }
        let to_balance = self.balance(to, room_id);

        self.set_balance(from, room_id, from_balance - amount);
        self.set_balance(to, room_id, to_balance + amount);
        self.history.push(LedgerEntry {
            from,
            to,
            amount,
            room_id,
            timestamp_ms: now_ms(),
        });
        Ok(from_balance - amount)
    }

    /// All entries for a room, in no particular order; callers sort by
    /// timestamp for display.
    pub fn history(&self, room_id: Uuid) -> Vec<LedgerEntry> {
        self.history
            .iter()
            .filter(|e| e.room_id == room_id)
            .cloned()
            .collect()
    }

    /// Every known balance in a room.
    pub fn room_balances(&self, room_id: Uuid) -> HashMap<Uuid, i64> {
        self.balances
            .iter()
            .filter(|((_, r), _)| *r == room_id)
            .map(|((player, _), amount)| (*player, *amount))
            .collect()
    }
}
