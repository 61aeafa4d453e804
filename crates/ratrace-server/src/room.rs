//! Room state and room-scoped rules.
//!
//! A `Room` owns its roster and, once started, the game state. Every mutation
//! validates all preconditions before touching anything, so a failed request
//! leaves the room exactly as it was.

use rand::Rng;
use ratrace_core::{now_ms, Board, GameState, Player, Profession, RollReport};
use thiserror::Error;
use uuid::Uuid;

use crate::protocol::{ErrorCode, GameStateView, PlayerInfo, RoomInfo, RoomStatus};

/// Ready players required before the host may start.
const MIN_READY_PLAYERS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("room not found")]
    NotFound,

    #[error("room is full")]
    RoomFull,

    #[error("wrong password")]
    WrongPassword,

    #[error("player not in room")]
    PlayerNotInRoom,

    #[error("only the host can start the game")]
    NotHost,

    #[error("game already started")]
    AlreadyStarted,

    #[error("game has not started")]
    NotStarted,

    #[error("at least two ready players are required to start")]
    NotEnoughReady,

    #[error("that token is already taken by another player")]
    TokenTaken,

    #[error("select a token and a dream before readying up")]
    MissingSelections,

    #[error("room name must not be empty")]
    EmptyName,

    #[error("capacity must be at least 2")]
    CapacityTooSmall,

    #[error(transparent)]
    Game(#[from] ratrace_core::GameError),
}

impl RoomError {
    /// Status class for the wire.
    pub fn code(&self) -> ErrorCode {
        use ratrace_core::GameError;
        match self {
            RoomError::NotFound | RoomError::PlayerNotInRoom => ErrorCode::NotFound,
            RoomError::WrongPassword | RoomError::NotHost => ErrorCode::Forbidden,
            RoomError::TokenTaken => ErrorCode::Conflict,
            RoomError::EmptyName | RoomError::CapacityTooSmall | RoomError::MissingSelections => {
                ErrorCode::Validation
            }
            RoomError::RoomFull
            | RoomError::AlreadyStarted
            | RoomError::NotStarted
            | RoomError::NotEnoughReady => ErrorCode::State,
            RoomError::Game(GameError::NotYourTurn) => ErrorCode::Forbidden,
            RoomError::Game(GameError::WrongPhase) => ErrorCode::State,
        }
    }
}

/// Parameters for creating a room.
#[derive(Debug, Clone)]
pub struct RoomSpec {
    pub name: String,
    pub capacity: u8,
    pub turn_time_secs: u32,
    pub password: Option<String>,
    pub default_profession: String,
}

/// A bounded multiplayer session container.
#[derive(Debug)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub capacity: u8,
    /// Stored as configuration; never enforced by a timer.
    pub turn_time_secs: u32,
    pub status: RoomStatus,
    pub password: Option<String>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    pub creator_id: Uuid,
    pub default_profession: String,
    /// Roster in join order.
    pub players: Vec<Player>,
    /// Created lazily at game start.
    pub game: Option<GameState>,
}

impl Room {
    /// Create a room with the creator as host. Fails on an empty name or a
    /// capacity below two.
    pub fn new(spec: RoomSpec, creator_id: Uuid, creator_name: String) -> Result<Self, RoomError> {
        if spec.name.trim().is_empty() {
            return Err(RoomError::EmptyName);
        }
        if spec.capacity < 2 {
            return Err(RoomError::CapacityTooSmall);
        }
        let now = now_ms();
        Ok(Self {
            id: Uuid::new_v4(),
            name: spec.name,
            capacity: spec.capacity,
            turn_time_secs: spec.turn_time_secs,
            status: RoomStatus::Waiting,
            password: spec.password,
            created_at_ms: now,
            updated_at_ms: now,
            creator_id,
            default_profession: spec.default_profession,
            players: vec![Player::new(creator_id, creator_name, true, now)],
            game: None,
        })
    }

    pub fn player(&self, id: Uuid) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_mut(&mut self, id: Uuid) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.capacity as usize
    }

    fn touch(&mut self) {
        self.updated_at_ms = now_ms();
    }

    /// Add a player, or refresh the existing entry when the same identity
    /// rejoins. Rejoin bypasses the capacity check since no seat is taken.
    pub fn add_player(
        &mut self,
        id: Uuid,
        name: String,
        password: Option<&str>,
    ) -> Result<(), RoomError> {
        if self.password.is_some() && self.password.as_deref() != password {
            return Err(RoomError::WrongPassword);
        }
        if let Some(existing) = self.player_mut(id) {
            existing.connected = true;
            existing.name = name;
            self.touch();
            return Ok(());
        }
        if self.is_full() {
            return Err(RoomError::RoomFull);
        }
        let is_host = self.players.is_empty();
        self.players.push(Player::new(id, name, is_host, now_ms()));
        self.touch();
        Ok(())
    }

    /// Remove a player, promoting a new host if needed. Returns true when the
    /// room is now empty and should be deleted.
    pub fn remove_player(&mut self, id: Uuid) -> Result<bool, RoomError> {
        let index = self
            .players
            .iter()
            .position(|p| p.id == id)
            .ok_or(RoomError::PlayerNotInRoom)?;
        let removed = self.players.remove(index);

        if removed.is_host {
            if let Some(next) = self.players.first_mut() {
                next.is_host = true;
            }
        }
        if let Some(game) = self.game.as_mut() {
            game.normalize_turn_order(&self.players);
        }
        self.touch();
        Ok(self.players.is_empty())
    }

    pub fn set_connected(&mut self, id: Uuid, connected: bool) -> bool {
        match self.player_mut(id) {
            Some(player) => {
                player.connected = connected;
                self.touch();
                true
            }
            None => false,
        }
    }

    /// Pick a token; conflicts when another player already holds it. Changing
    /// a selection always clears readiness.
    pub fn select_token(&mut self, id: Uuid, token_id: &str) -> Result<(), RoomError> {
        if self.player(id).is_none() {
            return Err(RoomError::PlayerNotInRoom);
        }
        let taken = self
            .players
            .iter()
            .any(|p| p.selected_token.as_deref() == Some(token_id) && p.id != id);
        if taken {
            return Err(RoomError::TokenTaken);
        }
        let player = self.player_mut(id).expect("presence checked above");
        player.selected_token = Some(token_id.to_string());
        player.is_ready = false;
        self.touch();
        Ok(())
    }

    pub fn select_dream(&mut self, id: Uuid, dream_id: u32) -> Result<(), RoomError> {
        let player = self.player_mut(id).ok_or(RoomError::PlayerNotInRoom)?;
        player.selected_dream = Some(dream_id);
        player.is_ready = false;
        self.touch();
        Ok(())
    }

    /// Toggle readiness. A player must have chosen a token and a dream first.
    pub fn toggle_ready(&mut self, id: Uuid) -> Result<bool, RoomError> {
        let player = self.player_mut(id).ok_or(RoomError::PlayerNotInRoom)?;
        if player.selected_token.is_none() || player.selected_dream.is_none() {
            return Err(RoomError::MissingSelections);
        }
        player.is_ready = !player.is_ready;
        let ready = player.is_ready;
        self.touch();
        Ok(ready)
    }

    pub fn ready_count(&self) -> usize {
        self.players.iter().filter(|p| p.is_ready).count()
    }

    /// Start the game: host only, enough ready players, not already running.
    /// Assigns the room's default profession to everyone and freezes the turn
    /// order from current membership.
    pub fn start(&mut self, requester: Uuid) -> Result<(), RoomError> {
        let player = self.player(requester).ok_or(RoomError::PlayerNotInRoom)?;
        if !player.is_host {
            return Err(RoomError::NotHost);
        }
        if self.status == RoomStatus::Playing {
            return Err(RoomError::AlreadyStarted);
        }
        if self.ready_count() < MIN_READY_PLAYERS {
            return Err(RoomError::NotEnoughReady);
        }

        let profession = Profession::by_id(&self.default_profession);
        for player in &mut self.players {
            player.profession = profession.clone();
        }
        self.game = Some(GameState::start(&self.players));
        self.status = RoomStatus::Playing;
        self.touch();
        Ok(())
    }

    pub fn roll<R: Rng>(
        &mut self,
        board: &Board,
        requester: Uuid,
        rng: &mut R,
    ) -> Result<RollReport, RoomError> {
        if self.player(requester).is_none() {
            return Err(RoomError::PlayerNotInRoom);
        }
        let game = self.game.as_mut().ok_or(RoomError::NotStarted)?;
        let report = game.roll(&mut self.players, board, requester, rng)?;
        self.touch();
        Ok(report)
    }

    pub fn end_turn(&mut self, requester: Uuid) -> Result<(), RoomError> {
        if self.player(requester).is_none() {
            return Err(RoomError::PlayerNotInRoom);
        }
        let game = self.game.as_mut().ok_or(RoomError::NotStarted)?;
        game.end_turn(&mut self.players, requester)?;
        self.touch();
        Ok(())
    }

    /// Sanitized projection for clients. The password never leaves the room.
    pub fn to_info(&self) -> RoomInfo {
        let players: Vec<PlayerInfo> = self.players.iter().map(PlayerInfo::from).collect();
        let ready_count = self.ready_count();
        RoomInfo {
            id: self.id,
            name: self.name.clone(),
            capacity: self.capacity,
            turn_time_secs: self.turn_time_secs,
            status: self.status,
            created_at_ms: self.created_at_ms,
            updated_at_ms: self.updated_at_ms,
            creator_id: self.creator_id,
            player_count: players.len(),
            ready_count,
            can_start: players.len() >= MIN_READY_PLAYERS && ready_count >= MIN_READY_PLAYERS,
            players,
        }
    }

    pub fn game_view(&self) -> Result<GameStateView, RoomError> {
        let game = self.game.as_ref().ok_or(RoomError::NotStarted)?;
        Ok(GameStateView::build(
            self.id,
            self.status,
            self.turn_time_secs,
            game,
            &self.players,
        ))
    }
}
