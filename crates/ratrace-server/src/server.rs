//! WebSocket server and connection handling.

use crate::hub::BroadcastHub;
use crate::identity::IdentityRegistry;
use crate::protocol::{ClientMessage, ErrorCode, RoomInfo, RoomStatus, ServerMessage};
use crate::registry::RoomRegistry;
use crate::room::{RoomError, RoomSpec};
use futures_util::{SinkExt, StreamExt};
use ratrace_core::{Board, Ledger, LedgerError};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Default turn time limit stored on rooms that do not set one. Stored as
/// configuration only; no timer enforces it.
const DEFAULT_TURN_TIME_SECS: u32 = 180;

/// Server state shared across all connections.
pub struct AppState {
    pub registry: RoomRegistry,
    pub identities: IdentityRegistry,
    pub hub: BroadcastHub,
    pub ledger: Mutex<Ledger>,
}

impl AppState {
    pub fn new(board: Board) -> Self {
        Self {
            registry: RoomRegistry::new(board),
            identities: IdentityRegistry::new(),
            hub: BroadcastHub::new(),
            ledger: Mutex::new(Ledger::new()),
        }
    }

    /// Push the sanitized room list to every connected client.
    pub fn rooms_changed(&self) {
        let msg = ServerMessage::RoomList {
            rooms: self.registry.list_rooms(),
        };
        self.hub.send_all(&msg);
    }

    /// Push a sanitized room to every connection of its members.
    pub fn room_changed(&self, room: &RoomInfo) {
        let msg = ServerMessage::RoomUpdated { room: room.clone() };
        for player in &room.players {
            self.hub
                .send_many(self.identities.connections_of(player.user_id), &msg);
        }
    }

    /// Push a message to every connection of a room's members.
    fn push_to_room(&self, room: &RoomInfo, msg: &ServerMessage) {
        for player in &room.players {
            self.hub
                .send_many(self.identities.connections_of(player.user_id), msg);
        }
    }
}

fn failure(code: ErrorCode, message: impl Into<String>) -> ServerMessage {
    ServerMessage::Failure {
        code,
        message: message.into(),
    }
}

fn room_failure(err: &RoomError) -> ServerMessage {
    failure(err.code(), err.to_string())
}

fn ledger_failure(err: &LedgerError) -> ServerMessage {
    let code = match err {
        LedgerError::SameParty | LedgerError::InvalidAmount => ErrorCode::Validation,
        LedgerError::InsufficientFunds => ErrorCode::State,
    };
    failure(code, err.to_string())
}

/// Run the WebSocket server.
pub async fn run_server(addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("ratrace server listening on {}", addr);

    while let Ok((stream, peer_addr)) = listener.accept().await {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer_addr, state).await {
                error!("Connection error from {}: {}", peer_addr, e);
            }
        });
    }

    Ok(())
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<AppState>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    info!("New WebSocket connection from {}", addr);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // One handle per connection; several handles may share an identity.
    let conn_id = Uuid::new_v4();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    state.hub.register(conn_id, tx);

    // Forward outbound messages from the channel to the socket.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(text) = serde_json::to_string(&msg) {
                if ws_sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    let mut identity: Option<Uuid> = None;

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let client_msg = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(m) => m,
                    Err(_) => {
                        warn!("Invalid message on connection {}: {}", conn_id, text);
                        state
                            .hub
                            .send(conn_id, failure(ErrorCode::Validation, "malformed message"));
                        continue;
                    }
                };

                match (identity, client_msg) {
                    (_, ClientMessage::Register { name, credential }) => {
                        identity = Some(handle_register(
                            conn_id,
                            identity,
                            name.as_deref(),
                            credential.as_deref(),
                            &state,
                        ));
                    }
                    (None, _) => {
                        state.hub.send(
                            conn_id,
                            failure(ErrorCode::Validation, "register an identity first"),
                        );
                    }
                    (Some(id), msg) => handle_message(conn_id, id, msg, &state),
                }
            }
            Ok(Message::Close(_)) => {
                info!("Connection {} closing", conn_id);
                break;
            }
            Ok(Message::Ping(_)) => {
                // Pong frames are handled by the transport.
            }
            Err(e) => {
                error!("WebSocket error on connection {}: {}", conn_id, e);
                break;
            }
            _ => {}
        }
    }

    state.hub.unregister(conn_id);
    if let Some(id) = identity {
        handle_disconnect(id, conn_id, &state);
    }
    send_task.abort();

    info!("Connection {} closed", conn_id);
    Ok(())
}

/// Bind an identity to this connection and surface any rooms the player can
/// reconnect to.
fn handle_register(
    conn_id: Uuid,
    previous: Option<Uuid>,
    name: Option<&str>,
    credential: Option<&str>,
    state: &Arc<AppState>,
) -> Uuid {
    let profile = state.identities.resolve(credential, name);
    if let Some(old) = previous {
        // Re-registering on a live connection swaps the identity. The old
        // identity gets the same room cleanup as a plain disconnect.
        if old != profile.id && !state.identities.release_connection(old, conn_id) {
            identity_offline(old, state);
        }
    }
    state.identities.bind_connection(profile.id, conn_id);
    info!("Identity {} registered on connection {}", profile.id, conn_id);

    // A returning player comes back online in every room holding a seat.
    for room_id in state.registry.rooms_of(profile.id) {
        if let Some(info) = state.registry.set_connected(room_id, profile.id, true) {
            state.room_changed(&info);
        }
    }

    state.hub.send(
        conn_id,
        ServerMessage::Welcome {
            player_id: profile.id,
            name: profile.name,
        },
    );
    state.hub.send(
        conn_id,
        ServerMessage::RoomList {
            rooms: state.registry.list_rooms(),
        },
    );
    profile.id
}

/// Dispatch one request. Broadcasts go out before the caller's reply so a
/// client never sees its own reply ahead of the push it implies.
fn handle_message(conn_id: Uuid, identity: Uuid, msg: ClientMessage, state: &Arc<AppState>) {
    match msg {
        ClientMessage::Register { .. } => unreachable!("handled by the connection loop"),

        ClientMessage::CreateRoom {
            name,
            capacity,
            turn_time_secs,
            password,
            profession,
        } => {
            let creator_name = state
                .identities
                .profile(identity)
                .map(|p| p.name)
                .unwrap_or_else(|| "Guest".to_string());
            let spec = RoomSpec {
                name,
                capacity,
                turn_time_secs: turn_time_secs.unwrap_or(DEFAULT_TURN_TIME_SECS),
                password,
                default_profession: profession.unwrap_or_else(|| "entrepreneur".to_string()),
            };
            match state.registry.create_room(spec, identity, creator_name) {
                Ok(room) => {
                    info!("Room {} created by {}", room.id, identity);
                    state.rooms_changed();
                    state.hub.send(conn_id, ServerMessage::RoomCreated { room });
                }
                Err(e) => state.hub.send(conn_id, room_failure(&e)),
            }
        }

        ClientMessage::JoinRoom { room_id, password } => {
            let name = state
                .identities
                .profile(identity)
                .map(|p| p.name)
                .unwrap_or_else(|| "Guest".to_string());
            match state
                .registry
                .join_room(room_id, identity, name, password.as_deref())
            {
                Ok(room) => {
                    state.rooms_changed();
                    state.room_changed(&room);
                    state.hub.send(conn_id, ServerMessage::RoomJoined { room });
                }
                Err(e) => state.hub.send(conn_id, room_failure(&e)),
            }
        }

        ClientMessage::LeaveRoom { room_id } => {
            match state.registry.leave_room(room_id, identity) {
                Ok(room) => {
                    state.rooms_changed();
                    if let Some(room) = room {
                        state.room_changed(&room);
                    }
                    state.hub.send(conn_id, ServerMessage::RoomLeft { room_id });
                }
                Err(e) => state.hub.send(conn_id, room_failure(&e)),
            }
        }

        ClientMessage::GetRoom { room_id } => match state.registry.get_room(room_id) {
            Ok(room) => state.hub.send(conn_id, ServerMessage::Room { room }),
            Err(e) => state.hub.send(conn_id, room_failure(&e)),
        },

        ClientMessage::ListRooms => {
            state.hub.send(
                conn_id,
                ServerMessage::RoomList {
                    rooms: state.registry.list_rooms(),
                },
            );
        }

        ClientMessage::GetBoard => {
            state.hub.send(
                conn_id,
                ServerMessage::Board {
                    cells: state.registry.board().cells().to_vec(),
                },
            );
        }

        ClientMessage::SelectToken { room_id, token_id } => {
            match state.registry.select_token(room_id, identity, &token_id) {
                Ok(room) => {
                    state.rooms_changed();
                    state.room_changed(&room);
                    state.hub.send(conn_id, ServerMessage::Room { room });
                }
                Err(e) => state.hub.send(conn_id, room_failure(&e)),
            }
        }

        ClientMessage::SelectDream { room_id, dream_id } => {
            match state.registry.select_dream(room_id, identity, dream_id) {
                Ok(room) => {
                    state.rooms_changed();
                    state.room_changed(&room);
                    state.hub.send(conn_id, ServerMessage::Room { room });
                }
                Err(e) => state.hub.send(conn_id, room_failure(&e)),
            }
        }

        ClientMessage::SetReady { room_id } => {
            match state.registry.set_ready(room_id, identity) {
                Ok(room) => {
                    state.rooms_changed();
                    state.room_changed(&room);
                    state.hub.send(conn_id, ServerMessage::Room { room });
                }
                Err(e) => state.hub.send(conn_id, room_failure(&e)),
            }
        }

        ClientMessage::StartGame { room_id } => {
            match state.registry.start_game(room_id, identity) {
                Ok(game_state) => {
                    info!("Game started in room {}", room_id);
                    state.rooms_changed();
                    if let Ok(room) = state.registry.get_room(room_id) {
                        state.room_changed(&room);
                        // Reaches the host's own connections as well.
                        state.push_to_room(
                            &room,
                            &ServerMessage::GameStarted { state: game_state },
                        );
                    }
                }
                Err(e) => state.hub.send(conn_id, room_failure(&e)),
            }
        }

        ClientMessage::GetGameState { room_id } => match state.registry.game_state(room_id) {
            Ok(game_state) => state
                .hub
                .send(conn_id, ServerMessage::GameState { state: game_state }),
            Err(e) => state.hub.send(conn_id, room_failure(&e)),
        },

        ClientMessage::Roll { room_id } => {
            let mut rng = rand::thread_rng();
            match state.registry.roll(room_id, identity, &mut rng) {
                Ok((report, game_state)) => {
                    if let Ok(room) = state.registry.get_room(room_id) {
                        state.room_changed(&room);
                        state.push_to_room(
                            &room,
                            &ServerMessage::GameState {
                                state: game_state.clone(),
                            },
                        );
                    }
                    state.hub.send(
                        conn_id,
                        ServerMessage::RollResult {
                            report,
                            state: game_state,
                        },
                    );
                }
                Err(e) => state.hub.send(conn_id, room_failure(&e)),
            }
        }

        ClientMessage::EndTurn { room_id } => {
            match state.registry.end_turn(room_id, identity) {
                Ok(game_state) => {
                    if let Ok(room) = state.registry.get_room(room_id) {
                        state.room_changed(&room);
                        state.push_to_room(
                            &room,
                            &ServerMessage::GameState {
                                state: game_state.clone(),
                            },
                        );
                    }
                    state
                        .hub
                        .send(conn_id, ServerMessage::TurnEnded { state: game_state });
                }
                Err(e) => state.hub.send(conn_id, room_failure(&e)),
            }
        }

        ClientMessage::GetBalance { room_id } => {
            let amount = state
                .ledger
                .lock()
                .expect("ledger lock poisoned")
                .balance(identity, room_id);
            state.hub.send(
                conn_id,
                ServerMessage::Balance {
                    player_id: identity,
                    amount,
                },
            );
        }

        ClientMessage::GetRoomBalances { room_id } => {
            let balances = state
                .ledger
                .lock()
                .expect("ledger lock poisoned")
                .room_balances(room_id);
            state
                .hub
                .send(conn_id, ServerMessage::RoomBalances { room_id, balances });
        }

        ClientMessage::Transfer {
            room_id,
            to,
            amount,
        } => {
            // One lock scope, so the pushed entry is the one this transfer wrote.
            let result = {
                let mut ledger = state.ledger.lock().expect("ledger lock poisoned");
                ledger
                    .transfer(identity, to, amount, room_id)
                    .map(|new_balance| (new_balance, ledger.history(room_id).pop()))
            };
            match result {
                Ok((new_balance, entry)) => {
                    if let (Ok(room), Some(entry)) = (state.registry.get_room(room_id), entry) {
                        state.push_to_room(&room, &ServerMessage::LedgerUpdated { entry });
                    }
                    state
                        .hub
                        .send(conn_id, ServerMessage::TransferResult { new_balance });
                }
                Err(e) => state.hub.send(conn_id, ledger_failure(&e)),
            }
        }

        ClientMessage::GetHistory { room_id } => {
            let entries = state
                .ledger
                .lock()
                .expect("ledger lock poisoned")
                .history(room_id);
            state.hub.send(conn_id, ServerMessage::History { entries });
        }

        ClientMessage::Ping => {
            state.hub.send(conn_id, ServerMessage::Pong);
        }
    }
}

/// Handle the close of one connection. Room membership only reacts when the
/// identity's last connection is gone; an active player's seat and turn are
/// left untouched in running games.
fn handle_disconnect(identity: Uuid, conn_id: Uuid, state: &Arc<AppState>) {
    let still_connected = state.identities.release_connection(identity, conn_id);
    if still_connected {
        return;
    }
    identity_offline(identity, state);
}

/// Room cleanup for an identity whose last connection is gone, whether by
/// socket close or by re-registering as someone else.
fn identity_offline(identity: Uuid, state: &Arc<AppState>) {
    let mut membership_changed = false;
    for room_id in state.registry.rooms_of(identity) {
        match state.registry.room_status(room_id) {
            Some(RoomStatus::Playing) => {
                // Keep the seat; mark the player offline so clients can show it.
                if let Some(info) = state.registry.set_connected(room_id, identity, false) {
                    state.room_changed(&info);
                }
            }
            Some(RoomStatus::Waiting) => match state.registry.leave_room(room_id, identity) {
                Ok(Some(info)) => {
                    state.room_changed(&info);
                    membership_changed = true;
                }
                Ok(None) => {
                    membership_changed = true;
                }
                Err(e) => warn!("Disconnect cleanup for room {}: {}", room_id, e),
            },
            None => {}
        }
    }
    if membership_changed {
        state.rooms_changed();
    }
    info!("Identity {} fully disconnected", identity);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::GameStateView;

    fn app() -> Arc<AppState> {
        Arc::new(AppState::new(Board::standard()))
    }

    fn join_with_connection(state: &Arc<AppState>, credential: &str, name: &str) -> (Uuid, Uuid) {
        let profile = state.identities.resolve(Some(credential), Some(name));
        let conn = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        state.hub.register(conn, tx);
        state.identities.bind_connection(profile.id, conn);
        (profile.id, conn)
    }

    fn lobby_with_two_ready_players(state: &Arc<AppState>) -> (Uuid, Uuid, Uuid) {
        let (host, _) = join_with_connection(state, "host", "Alice");
        let (guest, _) = join_with_connection(state, "guest", "Bob");
        let room = state
            .registry
            .create_room(
                RoomSpec {
                    name: "Game night".to_string(),
                    capacity: 4,
                    turn_time_secs: DEFAULT_TURN_TIME_SECS,
                    password: None,
                    default_profession: "entrepreneur".to_string(),
                },
                host,
                "Alice".to_string(),
            )
            .unwrap();
        state
            .registry
            .join_room(room.id, guest, "Bob".to_string(), None)
            .unwrap();
        for (id, token) in [(host, "car"), (guest, "hat")] {
            state.registry.select_token(room.id, id, token).unwrap();
            state.registry.select_dream(room.id, id, 2).unwrap();
            state.registry.set_ready(room.id, id).unwrap();
        }
        (room.id, host, guest)
    }

    #[test]
    fn test_scenario_create_join_ready_start() {
        let state = app();
        let (room_id, host, guest) = lobby_with_two_ready_players(&state);

        let view: GameStateView = state.registry.start_game(room_id, host).unwrap();
        assert_eq!(view.turn_order, vec![host, guest]);
        assert_eq!(
            state.registry.get_room(room_id).unwrap().status,
            RoomStatus::Playing
        );
    }

    #[test]
    fn test_disconnect_during_game_keeps_seat_and_turn() {
        let state = app();
        let (room_id, host, _guest) = lobby_with_two_ready_players(&state);
        state.registry.start_game(room_id, host).unwrap();

        // The active player's only connection drops.
        let conns = state.identities.connections_of(host);
        handle_disconnect(host, conns[0], &state);

        let room = state.registry.get_room(room_id).unwrap();
        assert_eq!(room.player_count, 2);
        let host_info = room.players.iter().find(|p| p.user_id == host).unwrap();
        assert!(!host_info.connected);

        // The turn did not auto-advance.
        let view = state.registry.game_state(room_id).unwrap();
        assert_eq!(view.active_player_id, Some(host));
    }

    #[test]
    fn test_disconnect_with_second_tab_changes_nothing() {
        let state = app();
        let (room_id, host, _) = lobby_with_two_ready_players(&state);

        let second_tab = Uuid::new_v4();
        state.identities.bind_connection(host, second_tab);

        let first_tab = state
            .identities
            .connections_of(host)
            .into_iter()
            .find(|c| *c != second_tab)
            .unwrap();
        handle_disconnect(host, first_tab, &state);

        let room = state.registry.get_room(room_id).unwrap();
        let host_info = room.players.iter().find(|p| p.user_id == host).unwrap();
        assert!(host_info.connected);
        assert_eq!(room.player_count, 2);
    }

    #[test]
    fn test_disconnect_from_waiting_room_leaves_it() {
        let state = app();
        let (room_id, host, guest) = lobby_with_two_ready_players(&state);

        let conns = state.identities.connections_of(guest);
        handle_disconnect(guest, conns[0], &state);

        let room = state.registry.get_room(room_id).unwrap();
        assert_eq!(room.player_count, 1);
        assert!(room.players.iter().all(|p| p.user_id == host));
    }

    #[test]
    fn test_room_balances_reply() {
        let state = app();
        let conn = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.hub.register(conn, tx);
        let alice = state.identities.resolve(Some("alice-cred"), Some("Alice")).id;
        state.identities.bind_connection(alice, conn);

        let (bob, room_id) = (Uuid::new_v4(), Uuid::new_v4());
        state
            .ledger
            .lock()
            .unwrap()
            .transfer(alice, bob, 400, room_id)
            .unwrap();

        handle_message(
            conn,
            alice,
            ClientMessage::GetRoomBalances { room_id },
            &state,
        );
        match rx.try_recv().unwrap() {
            ServerMessage::RoomBalances {
                room_id: got,
                balances,
            } => {
                assert_eq!(got, room_id);
                assert_eq!(balances[&alice], 600);
                assert_eq!(balances[&bob], 1_400);
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_reregister_swap_releases_old_waiting_room_seat() {
        let state = app();
        let (alice, conn) = join_with_connection(&state, "alice-cred", "Alice");
        let room = state
            .registry
            .create_room(
                RoomSpec {
                    name: "Solo lobby".to_string(),
                    capacity: 4,
                    turn_time_secs: DEFAULT_TURN_TIME_SECS,
                    password: None,
                    default_profession: "entrepreneur".to_string(),
                },
                alice,
                "Alice".to_string(),
            )
            .unwrap();

        // The connection swaps to a different identity without closing.
        let bob = handle_register(conn, Some(alice), Some("Bob"), Some("bob-cred"), &state);
        assert_ne!(alice, bob);
        assert!(state.identities.connections_of(alice).is_empty());
        assert_eq!(state.identities.connections_of(bob), vec![conn]);

        // Alice held the only seat, so her waiting room is gone.
        assert_eq!(state.registry.get_room(room.id), Err(RoomError::NotFound));
    }

    #[test]
    fn test_reregister_same_credential_keeps_seat() {
        let state = app();
        let (alice, conn) = join_with_connection(&state, "alice-cred", "Alice");
        let room = state
            .registry
            .create_room(
                RoomSpec {
                    name: "Solo lobby".to_string(),
                    capacity: 4,
                    turn_time_secs: DEFAULT_TURN_TIME_SECS,
                    password: None,
                    default_profession: "entrepreneur".to_string(),
                },
                alice,
                "Alice".to_string(),
            )
            .unwrap();

        let same = handle_register(conn, Some(alice), Some("Alice"), Some("alice-cred"), &state);
        assert_eq!(same, alice);
        assert_eq!(state.identities.connections_of(alice), vec![conn]);
        assert!(state.registry.get_room(room.id).is_ok());
    }
}
