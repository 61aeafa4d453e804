//! WebSocket protocol messages for ratrace multiplayer.
//!
//! Every reply is either a success variant carrying its payload or a
//! `Failure` with a status class and message. Room and player views are
//! sanitized here; internal-only fields (passwords, connection handles) never
//! appear in any variant.

use ratrace_core::{
    BoardCell, GameState, LastRoll, LedgerEntry, Player, PlayerStats, Profession, RollReport,
    TurnPhase,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    /// Register an identity for this connection; must be the first message.
    Register {
        name: Option<String>,
        /// Stable external credential; omitted for a fresh guest identity.
        credential: Option<String>,
    },

    /// Create a new room; the creator becomes host
    CreateRoom {
        name: String,
        capacity: u8,
        turn_time_secs: Option<u32>,
        password: Option<String>,
        profession: Option<String>,
    },

    /// Join an existing room (idempotent for the same identity)
    JoinRoom {
        room_id: Uuid,
        password: Option<String>,
    },

    /// Leave a room
    LeaveRoom { room_id: Uuid },

    /// Fetch one room
    GetRoom { room_id: Uuid },

    /// Request the room list
    ListRooms,

    /// Fetch the board topology
    GetBoard,

    /// Pick a token; fails if another player holds it
    SelectToken { room_id: Uuid, token_id: String },

    /// Pick a dream cell
    SelectDream { room_id: Uuid, dream_id: u32 },

    /// Toggle readiness (requires token and dream chosen)
    SetReady { room_id: Uuid },

    /// Start the game (host only)
    StartGame { room_id: Uuid },

    /// Fetch the current game state
    GetGameState { room_id: Uuid },

    /// Roll the dice (active player only)
    Roll { room_id: Uuid },

    /// End the current turn (active player only)
    EndTurn { room_id: Uuid },

    /// Fetch own ledger balance in a room
    GetBalance { room_id: Uuid },

    /// Fetch every known ledger balance in a room
    GetRoomBalances { room_id: Uuid },

    /// Transfer funds to another player in a room
    Transfer { room_id: Uuid, to: Uuid, amount: i64 },

    /// Fetch a room's transfer history
    GetHistory { room_id: Uuid },

    /// Ping for keepalive
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    /// Identity bound to this connection
    Welcome { player_id: Uuid, name: String },

    /// Full sanitized room list (reply and global push)
    RoomList { rooms: Vec<RoomInfo> },

    /// Room created successfully
    RoomCreated { room: RoomInfo },

    /// Joined (or rejoined) a room
    RoomJoined { room: RoomInfo },

    /// Left a room
    RoomLeft { room_id: Uuid },

    /// Single room fetch
    Room { room: RoomInfo },

    /// Room state changed (push to room subscribers)
    RoomUpdated { room: RoomInfo },

    /// The board topology
    Board { cells: Vec<BoardCell> },

    /// Game started
    GameStarted { state: GameStateView },

    /// Current game state
    GameState { state: GameStateView },

    /// Outcome of a legal roll
    RollResult {
        report: RollReport,
        state: GameStateView,
    },

    /// Turn handed to the next player
    TurnEnded { state: GameStateView },

    /// Ledger balance
    Balance { player_id: Uuid, amount: i64 },

    /// Every known ledger balance in a room
    RoomBalances {
        room_id: Uuid,
        balances: HashMap<Uuid, i64>,
    },

    /// Transfer applied; sender's new balance
    TransferResult { new_balance: i64 },

    /// A transfer happened in a room (push to room subscribers)
    LedgerUpdated { entry: LedgerEntry },

    /// Transfer history for a room, unordered
    History { entries: Vec<LedgerEntry> },

    /// Structured failure for the preceding request
    Failure { code: ErrorCode, message: String },

    /// Pong response
    Pong,
}

/// Status class of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    Forbidden,
    NotFound,
    Conflict,
    State,
}

/// Room status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Waiting,
    Playing,
}

/// Sanitized player view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub user_id: Uuid,
    pub name: String,
    pub is_host: bool,
    pub is_ready: bool,
    pub connected: bool,
    pub selected_token: Option<String>,
    pub selected_dream: Option<u32>,
    pub position: usize,
    pub cash: i64,
    pub passive_income: i64,
    pub stats: PlayerStats,
    pub profession: Profession,
    pub dream_achieved: bool,
}

impl From<&Player> for PlayerInfo {
    fn from(player: &Player) -> Self {
        Self {
            user_id: player.id,
            name: player.name.clone(),
            is_host: player.is_host,
            is_ready: player.is_ready,
            connected: player.connected,
            selected_token: player.selected_token.clone(),
            selected_dream: player.selected_dream,
            position: player.position,
            cash: player.cash,
            passive_income: player.passive_income,
            stats: player.stats.clone(),
            profession: player.profession.clone(),
            dream_achieved: player.dream_achieved,
        }
    }
}

/// Sanitized room view. Never carries the password.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: Uuid,
    pub name: String,
    pub capacity: u8,
    pub turn_time_secs: u32,
    pub status: RoomStatus,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    pub creator_id: Uuid,
    pub players: Vec<PlayerInfo>,
    pub player_count: usize,
    pub ready_count: usize,
    pub can_start: bool,
}

/// Sanitized game-state view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStateView {
    pub room_id: Uuid,
    pub status: RoomStatus,
    pub started_at_ms: u64,
    pub turn_time_secs: u32,
    pub turn_order: Vec<Uuid>,
    pub active_player_id: Option<Uuid>,
    pub phase: TurnPhase,
    pub last_roll: Option<LastRoll>,
    pub rounds_completed: u32,
    pub players: Vec<PlayerInfo>,
}

impl GameStateView {
    /// Project a sanitized view; players are listed in turn order.
    pub fn build(
        room_id: Uuid,
        status: RoomStatus,
        turn_time_secs: u32,
        game: &GameState,
        players: &[Player],
    ) -> Self {
        let ordered: Vec<PlayerInfo> = game
            .turn_order
            .iter()
            .filter_map(|id| players.iter().find(|p| p.id == *id))
            .map(PlayerInfo::from)
            .collect();

        Self {
            room_id,
            status,
            started_at_ms: game.started_at_ms,
            turn_time_secs,
            turn_order: game.turn_order.clone(),
            active_player_id: game.active_player(),
            phase: game.phase,
            last_roll: game.last_roll.clone(),
            rounds_completed: game.rounds_completed,
            players: ordered,
        }
    }
}
