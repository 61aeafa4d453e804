//! The owned registry of active rooms.
//!
//! All room state lives in one keyed collection; each mutation runs to
//! completion under the room's map entry, so two mutations of the same room
//! never interleave. The registry is an explicit object with an explicit
//! lifecycle, constructed in `main` and shut down by dropping all rooms.

use dashmap::DashMap;
use rand::Rng;
use ratrace_core::{Board, RollReport};
use uuid::Uuid;

use crate::protocol::{GameStateView, RoomInfo, RoomStatus};
use crate::room::{Room, RoomError, RoomSpec};

pub struct RoomRegistry {
    rooms: DashMap<Uuid, Room>,
    board: Board,
}

impl RoomRegistry {
    pub fn new(board: Board) -> Self {
        Self {
            rooms: DashMap::new(),
            board,
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Drop every room. Part of the registry's explicit lifecycle.
    pub fn shutdown(&self) {
        self.rooms.clear();
    }

    /// Run a closure against one room under its entry lock.
    fn with_room<T>(
        &self,
        room_id: Uuid,
        f: impl FnOnce(&mut Room) -> Result<T, RoomError>,
    ) -> Result<T, RoomError> {
        let mut room = self.rooms.get_mut(&room_id).ok_or(RoomError::NotFound)?;
        f(&mut room)
    }

    pub fn create_room(
        &self,
        spec: RoomSpec,
        creator_id: Uuid,
        creator_name: String,
    ) -> Result<RoomInfo, RoomError> {
        let room = Room::new(spec, creator_id, creator_name)?;
        let info = room.to_info();
        self.rooms.insert(room.id, room);
        Ok(info)
    }

    pub fn join_room(
        &self,
        room_id: Uuid,
        identity: Uuid,
        name: String,
        password: Option<&str>,
    ) -> Result<RoomInfo, RoomError> {
        self.with_room(room_id, |room| {
            room.add_player(identity, name, password)?;
            Ok(room.to_info())
        })
    }

    /// Remove a player; deletes the room once empty. Returns the updated room
    /// view, or `None` when the room was deleted.
    pub fn leave_room(&self, room_id: Uuid, identity: Uuid) -> Result<Option<RoomInfo>, RoomError> {
        let info = {
            let mut room = self.rooms.get_mut(&room_id).ok_or(RoomError::NotFound)?;
            let now_empty = room.remove_player(identity)?;
            if now_empty {
                None
            } else {
                Some(room.to_info())
            }
        };
        // Guard dropped above; removing while holding it would deadlock.
        if info.is_none() {
            self.rooms.remove(&room_id);
        }
        Ok(info)
    }

    pub fn get_room(&self, room_id: Uuid) -> Result<RoomInfo, RoomError> {
        self.rooms
            .get(&room_id)
            .map(|r| r.to_info())
            .ok_or(RoomError::NotFound)
    }

    /// Sanitized views of every room, for the global room-list channel.
    pub fn list_rooms(&self) -> Vec<RoomInfo> {
        self.rooms.iter().map(|r| r.to_info()).collect()
    }

    pub fn select_token(
        &self,
        room_id: Uuid,
        identity: Uuid,
        token_id: &str,
    ) -> Result<RoomInfo, RoomError> {
        self.with_room(room_id, |room| {
            room.select_token(identity, token_id)?;
            Ok(room.to_info())
        })
    }

    pub fn select_dream(
        &self,
        room_id: Uuid,
        identity: Uuid,
        dream_id: u32,
    ) -> Result<RoomInfo, RoomError> {
        self.with_room(room_id, |room| {
            room.select_dream(identity, dream_id)?;
            Ok(room.to_info())
        })
    }

    pub fn set_ready(&self, room_id: Uuid, identity: Uuid) -> Result<RoomInfo, RoomError> {
        self.with_room(room_id, |room| {
            room.toggle_ready(identity)?;
            Ok(room.to_info())
        })
    }

    pub fn start_game(&self, room_id: Uuid, identity: Uuid) -> Result<GameStateView, RoomError> {
        self.with_room(room_id, |room| {
            room.start(identity)?;
            room.game_view()
        })
    }

    pub fn game_state(&self, room_id: Uuid) -> Result<GameStateView, RoomError> {
        self.with_room(room_id, |room| room.game_view())
    }

    pub fn roll<R: Rng>(
        &self,
        room_id: Uuid,
        identity: Uuid,
        rng: &mut R,
    ) -> Result<(RollReport, GameStateView), RoomError> {
        let mut room = self.rooms.get_mut(&room_id).ok_or(RoomError::NotFound)?;
        let report = room.roll(&self.board, identity, rng)?;
        let view = room.game_view()?;
        Ok((report, view))
    }

    pub fn end_turn(&self, room_id: Uuid, identity: Uuid) -> Result<GameStateView, RoomError> {
        let mut room = self.rooms.get_mut(&room_id).ok_or(RoomError::NotFound)?;
        room.end_turn(identity)?;
        room.game_view()
    }

    /// Ids of the rooms an identity is currently in.
    pub fn rooms_of(&self, identity: Uuid) -> Vec<Uuid> {
        self.rooms
            .iter()
            .filter(|r| r.player(identity).is_some())
            .map(|r| r.id)
            .collect()
    }

    /// Room status lookup, used by the disconnect policy.
    pub fn room_status(&self, room_id: Uuid) -> Option<RoomStatus> {
        self.rooms.get(&room_id).map(|r| r.status)
    }

    /// Flip a player's connected flag; returns the updated view when the
    /// player was present.
    pub fn set_connected(
        &self,
        room_id: Uuid,
        identity: Uuid,
        connected: bool,
    ) -> Option<RoomInfo> {
        let mut room = self.rooms.get_mut(&room_id)?;
        if room.set_connected(identity, connected) {
            Some(room.to_info())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> RoomRegistry {
        RoomRegistry::new(Board::standard())
    }

    fn spec(name: &str, capacity: u8) -> RoomSpec {
        RoomSpec {
            name: name.to_string(),
            capacity,
            turn_time_secs: 180,
            password: None,
            default_profession: "entrepreneur".to_string(),
        }
    }

    fn ready_up(registry: &RoomRegistry, room_id: Uuid, identity: Uuid, token: &str) {
        registry.select_token(room_id, identity, token).unwrap();
        registry.select_dream(room_id, identity, 2).unwrap();
        registry.set_ready(room_id, identity).unwrap();
    }

    #[test]
    fn test_lobby_to_playing_flow() {
        let registry = registry();
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();

        let info = registry
            .create_room(spec("Friday game", 4), host, "Alice".to_string())
            .unwrap();
        let room_id = info.id;

        let info = registry
            .join_room(room_id, guest, "Bob".to_string(), None)
            .unwrap();
        assert_eq!(info.player_count, 2);

        ready_up(&registry, room_id, host, "car");
        ready_up(&registry, room_id, guest, "hat");

        let state = registry.start_game(room_id, host).unwrap();
        assert_eq!(state.turn_order.len(), 2);
        assert_eq!(
            registry.get_room(room_id).unwrap().status,
            RoomStatus::Playing
        );
    }

    #[test]
    fn test_join_missing_room_fails() {
        let registry = registry();
        assert_eq!(
            registry.join_room(Uuid::new_v4(), Uuid::new_v4(), "Bob".to_string(), None),
            Err(RoomError::NotFound)
        );
    }

    #[test]
    fn test_rejoin_does_not_duplicate() {
        let registry = registry();
        let host = Uuid::new_v4();
        let info = registry
            .create_room(spec("Rejoin", 2), host, "Alice".to_string())
            .unwrap();

        let info = registry
            .join_room(info.id, host, "Alice".to_string(), None)
            .unwrap();
        assert_eq!(info.player_count, 1);
    }

    #[test]
    fn test_room_deleted_when_empty() {
        let registry = registry();
        let host = Uuid::new_v4();
        let info = registry
            .create_room(spec("Short-lived", 2), host, "Alice".to_string())
            .unwrap();

        assert_eq!(registry.leave_room(info.id, host).unwrap(), None);
        assert_eq!(registry.get_room(info.id), Err(RoomError::NotFound));
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_non_active_roll_is_rejected_with_state_intact() {
        let registry = registry();
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let info = registry
            .create_room(spec("Dice", 2), host, "Alice".to_string())
            .unwrap();
        let room_id = info.id;
        registry
            .join_room(room_id, guest, "Bob".to_string(), None)
            .unwrap();
        ready_up(&registry, room_id, host, "car");
        ready_up(&registry, room_id, guest, "hat");
        registry.start_game(room_id, host).unwrap();

        let before = registry.game_state(room_id).unwrap();
        let mut rng = rand::thread_rng();
        let err = registry.roll(room_id, guest, &mut rng).unwrap_err();
        assert_eq!(err, RoomError::Game(ratrace_core::GameError::NotYourTurn));

        let after = registry.game_state(room_id).unwrap();
        assert_eq!(after.active_player_id, before.active_player_id);
        assert_eq!(after.phase, before.phase);
        assert!(after.last_roll.is_none());
    }

    #[test]
    fn test_shutdown_drops_all_rooms() {
        let registry = registry();
        for i in 0..3 {
            registry
                .create_room(spec(&format!("Room {i}"), 2), Uuid::new_v4(), "H".to_string())
                .unwrap();
        }
        assert_eq!(registry.room_count(), 3);
        registry.shutdown();
        assert_eq!(registry.room_count(), 0);
    }
}
