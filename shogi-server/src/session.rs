//! Room registry, seating, and per-room intent handling.
//!
//! Each room sits behind its own mutex; an intent holds that lock for its
//! whole validate + apply + broadcast sequence, so intents for one room are
//! serialized while different rooms proceed in parallel. When both locks are
//! needed the registry is always locked first.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::Rng;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use tracing::{debug, info, warn};

use shogi_core::rules::{can_promote, drop_squares, legal_destinations, must_promote};
use shogi_core::{Game, Kind, Piece, Player};

use crate::error::SessionError;
use crate::protocol::{self, ClientMessage, MoveHintModel, ServerMessage, SquareModel};

/// Room codes are drawn from this alphabet.
const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LEN: usize = 6;

/// Messages a connection may have queued before new ones are dropped.
pub const OUTBOX_CAPACITY: usize = 256;

/// Outbound queue of one connection, drained by its writer task.
pub type Outbox = Sender<ServerMessage>;

/// Create the bounded outbound queue for a new connection.
pub fn outbox() -> (Outbox, Receiver<ServerMessage>) {
    mpsc::channel(OUTBOX_CAPACITY)
}

/// Identity of one client connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a room. `Empty` rooms are never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoomPhase {
    WaitingForOpponent,
    Active,
    Terminated,
}

// =============================================================================
// Room
// =============================================================================

struct Seat {
    conn: ConnId,
    outbox: Outbox,
}

struct Room {
    code: String,
    /// Seat 0 is Player One, seat 1 is Player Two.
    seats: Vec<Seat>,
    game: Game,
    /// The player waiting for an answer to an undo request.
    pending_undo: Option<Player>,
    started: bool,
    terminated: bool,
}

impl Room {
    fn new(code: String, creator: Seat) -> Room {
        Room {
            code,
            seats: vec![creator],
            game: Game::new(),
            pending_undo: None,
            started: false,
            terminated: false,
        }
    }

    fn phase(&self) -> RoomPhase {
        if self.terminated {
            RoomPhase::Terminated
        } else if self.started {
            RoomPhase::Active
        } else {
            RoomPhase::WaitingForOpponent
        }
    }

    fn player_of(&self, conn: ConnId) -> Option<Player> {
        let index = self.seats.iter().position(|seat| seat.conn == conn)?;
        Player::from_number(index as u8 + 1)
    }

    fn send_to(&self, player: Player, msg: ServerMessage) {
        if let Some(seat) = self.seats.get(u8::from(player) as usize - 1) {
            deliver(&self.code, seat, msg);
        }
    }

    /// Send to every seated connection. A closed outbox is skipped.
    fn broadcast(&self, msg: &ServerMessage) {
        for seat in &self.seats {
            deliver(&self.code, seat, msg.clone());
        }
    }

    fn require_started(&self) -> Result<(), SessionError> {
        if self.started {
            Ok(())
        } else {
            Err(SessionError::InvalidIntent("Game has not started"))
        }
    }
}

/// Enqueue without waiting. Snapshots are always full, so a dropped message
/// is superseded by the next one the reader does take.
fn deliver(code: &str, seat: &Seat, msg: ServerMessage) {
    match seat.outbox.try_send(msg) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!(room = %code, conn = %seat.conn, "outbox full, dropping message");
        }
        Err(TrySendError::Closed(_)) => {
            warn!(room = %code, conn = %seat.conn, "dropping message for closed connection");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Room codes are case-insensitive.
fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

fn generate_code(rng: &mut impl Rng) -> String {
    (0..CODE_LEN)
        .map(|_| CODE_CHARSET[rng.random_range(0..CODE_CHARSET.len())] as char)
        .collect()
}

/// Draw codes until one is not in `taken`.
fn unique_code<V>(taken: &HashMap<String, V>, rng: &mut impl Rng) -> String {
    loop {
        let candidate = generate_code(rng);
        if !taken.contains_key(&candidate) {
            return candidate;
        }
    }
}

// =============================================================================
// Session Manager
// =============================================================================

#[derive(Default)]
struct Registry {
    rooms: HashMap<String, Arc<Mutex<Room>>>,
    /// Which room each seated connection belongs to.
    members: HashMap<ConnId, String>,
}

/// Owns every live room.
#[derive(Default)]
pub struct SessionManager {
    registry: Mutex<Registry>,
    next_conn: AtomicU64,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an identity for a new connection.
    pub fn connect(&self) -> ConnId {
        ConnId(self.next_conn.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        lock(&self.registry).rooms.len()
    }

    /// Phase of a live room, if it exists.
    #[cfg(test)]
    pub fn room_phase(&self, code: &str) -> Option<RoomPhase> {
        let room = lock(&self.registry).rooms.get(&normalize_code(code)).cloned()?;
        let phase = lock(&room).phase();
        Some(phase)
    }

    /// Handle one intent. Errors go back to `outbox` only.
    pub fn handle(&self, conn: ConnId, outbox: &Outbox, msg: ClientMessage) {
        let result = match msg {
            ClientMessage::CreateRoom => self.create_room(conn, outbox).map(drop),
            ClientMessage::JoinRoom { code } => self.join_room(conn, outbox, &code),
            ClientMessage::Move {
                code,
                from,
                to,
                promote,
            } => self.make_move(conn, &code, from, to, promote),
            ClientMessage::Drop {
                code,
                square,
                piece_kind,
            } => self.drop_piece(conn, &code, square, piece_kind),
            ClientMessage::RequestUndo { code } => self.request_undo(conn, &code),
            ClientMessage::UndoResponse { code, approved } => self.respond_undo(conn, &code, approved),
            ClientMessage::MoveHints { code, from } => self.move_hints(conn, &code, from),
            ClientMessage::DropHints { code, piece_kind } => self.drop_hints(conn, &code, piece_kind),
        };

        if let Err(err) = result {
            warn!(conn = %conn, error = %err, "intent rejected");
            self.reject(outbox, &err);
        }
    }

    /// Report an error to a single connection.
    pub fn reject(&self, outbox: &Outbox, err: &SessionError) {
        // The connection may already be gone or stalled; nothing else to tell.
        let _ = outbox.try_send(ServerMessage::from(err));
    }

    // ========== Lifecycle ==========

    /// Open a new room with `conn` seated as Player One.
    pub fn create_room(&self, conn: ConnId, outbox: &Outbox) -> Result<String, SessionError> {
        let mut registry = lock(&self.registry);
        if registry.members.contains_key(&conn) {
            return Err(SessionError::InvalidIntent("Already in a room"));
        }

        let code = unique_code(&registry.rooms, &mut rand::rng());

        let seat = Seat {
            conn,
            outbox: outbox.clone(),
        };
        let room = Room::new(code.clone(), seat);
        room.send_to(
            Player::One,
            ServerMessage::RoomCreated {
                code: code.clone(),
                player_number: Player::One,
            },
        );

        registry.rooms.insert(code.clone(), Arc::new(Mutex::new(room)));
        registry.members.insert(conn, code.clone());
        info!(room = %code, conn = %conn, "room created");
        Ok(code)
    }

    /// Seat `conn` as Player Two and start the game.
    pub fn join_room(&self, conn: ConnId, outbox: &Outbox, code: &str) -> Result<(), SessionError> {
        let code = normalize_code(code);
        let mut registry = lock(&self.registry);
        if registry.members.contains_key(&conn) {
            return Err(SessionError::InvalidIntent("Already in a room"));
        }
        let room = registry.rooms.get(&code).cloned().ok_or(SessionError::RoomNotFound)?;

        let mut room = lock(&room);
        if room.terminated {
            return Err(SessionError::RoomNotFound);
        }
        if room.seats.len() >= 2 {
            return Err(SessionError::RoomFull);
        }

        room.seats.push(Seat {
            conn,
            outbox: outbox.clone(),
        });
        room.started = true;
        registry.members.insert(conn, code.clone());
        drop(registry);

        room.send_to(
            Player::Two,
            ServerMessage::RoomJoined {
                code: code.clone(),
                player_number: Player::Two,
            },
        );
        room.broadcast(&protocol::game_start(&room.game));
        info!(room = %code, conn = %conn, "player joined, game started");
        Ok(())
    }

    /// Tear down the room `conn` sits in, if any. The other player is notified.
    pub fn disconnect(&self, conn: ConnId) {
        let mut registry = lock(&self.registry);
        let Some(code) = registry.members.remove(&conn) else {
            return;
        };
        let Some(room) = registry.rooms.remove(&code) else {
            return;
        };

        let mut room = lock(&room);
        let phase = room.phase();
        room.terminated = true;
        for seat in room.seats.iter().filter(|seat| seat.conn != conn) {
            registry.members.remove(&seat.conn);
            deliver(&code, seat, ServerMessage::PlayerDisconnected);
        }
        info!(room = %code, conn = %conn, ?phase, "player disconnected, room destroyed");
    }

    // ========== Per-room intents ==========

    /// Run `f` under the room's lock with the caller's seat resolved.
    fn with_room<T>(
        &self,
        conn: ConnId,
        code: &str,
        f: impl FnOnce(&mut Room, Player) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        let code = normalize_code(code);
        let room = lock(&self.registry)
            .rooms
            .get(&code)
            .cloned()
            .ok_or(SessionError::RoomNotFound)?;

        let mut room = lock(&room);
        if room.terminated {
            return Err(SessionError::RoomNotFound);
        }
        let player = room
            .player_of(conn)
            .ok_or(SessionError::InvalidIntent("Not a player in this room"))?;
        f(&mut *room, player)
    }

    fn make_move(
        &self,
        conn: ConnId,
        code: &str,
        from: SquareModel,
        to: SquareModel,
        promote: bool,
    ) -> Result<(), SessionError> {
        self.with_room(conn, code, |room, player| {
            room.require_started()?;
            let (Some(from), Some(to)) = (from.to_square(), to.to_square()) else {
                return Err(shogi_core::RuleError::InvalidMove.into());
            };

            let record = room.game.apply_move(player, from, to, promote)?;
            room.pending_undo = None;
            debug!(room = %room.code, %player, %from, %to, ?record, "move applied");
            room.broadcast(&protocol::game_state(&room.game));
            Ok(())
        })
    }

    fn drop_piece(&self, conn: ConnId, code: &str, square: SquareModel, kind: Kind) -> Result<(), SessionError> {
        self.with_room(conn, code, |room, player| {
            room.require_started()?;
            let Some(square) = square.to_square() else {
                return Err(shogi_core::RuleError::InvalidDrop.into());
            };

            room.game.apply_drop(player, square, kind)?;
            room.pending_undo = None;
            debug!(room = %room.code, %player, %square, ?kind, "drop applied");
            room.broadcast(&protocol::game_state(&room.game));
            Ok(())
        })
    }

    // ========== Undo negotiation ==========

    fn request_undo(&self, conn: ConnId, code: &str) -> Result<(), SessionError> {
        self.with_room(conn, code, |room, player| {
            room.require_started()?;
            if room.game.history().is_empty() {
                return Err(shogi_core::RuleError::NoHistory.into());
            }

            room.pending_undo = Some(player);
            debug!(room = %room.code, %player, "undo requested");
            room.send_to(player.opponent(), ServerMessage::UndoRequest { from: player });
            Ok(())
        })
    }

    fn respond_undo(&self, conn: ConnId, code: &str, approved: bool) -> Result<(), SessionError> {
        self.with_room(conn, code, |room, player| {
            match room.pending_undo {
                None => return Err(SessionError::InvalidIntent("No undo request pending")),
                Some(requester) if requester == player => {
                    return Err(SessionError::InvalidIntent("Cannot answer your own undo request"))
                }
                Some(_) => {}
            }

            if approved {
                let record = room.game.undo()?;
                debug!(room = %room.code, ?record, "undo approved");
            } else {
                debug!(room = %room.code, "undo denied");
            }
            room.pending_undo = None;
            room.broadcast(&protocol::undo_result(&room.game, approved));
            Ok(())
        })
    }

    // ========== Hints ==========

    fn move_hints(&self, conn: ConnId, code: &str, from: SquareModel) -> Result<(), SessionError> {
        self.with_room(conn, code, |room, player| {
            room.require_started()?;
            let from = from.to_square().ok_or(shogi_core::RuleError::InvalidMove)?;
            let board = room.game.board();

            let destinations = match board.get(from) {
                Some(piece) if piece.owner == player => legal_destinations(board, from)
                    .into_iter()
                    .map(|square| MoveHintModel {
                        square,
                        can_promote: can_promote(piece, from.row(), square.row()),
                        must_promote: must_promote(piece, square.row()),
                    })
                    .collect(),
                _ => Vec::new(),
            };

            room.send_to(player, ServerMessage::MoveHints { from, destinations });
            Ok(())
        })
    }

    fn drop_hints(&self, conn: ConnId, code: &str, kind: Kind) -> Result<(), SessionError> {
        self.with_room(conn, code, |room, player| {
            room.require_started()?;
            if !room.game.pool(player).iter().any(|p| p.kind == kind) {
                return Err(shogi_core::RuleError::PieceNotHeld.into());
            }

            let squares = drop_squares(room.game.board(), Piece::new(kind, player));
            room.send_to(
                player,
                ServerMessage::DropHints {
                    piece_kind: kind,
                    squares,
                },
            );
            Ok(())
        })
    }

    #[cfg(test)]
    fn room_game(&self, code: &str) -> Option<Game> {
        let room = lock(&self.registry).rooms.get(code).cloned()?;
        let game = lock(&room).game.clone();
        Some(game)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shogi_core::Square;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    struct Client {
        conn: ConnId,
        outbox: Outbox,
        inbox: Receiver<ServerMessage>,
    }

    impl Client {
        fn new(sessions: &SessionManager) -> Client {
            let (outbox, inbox) = outbox();
            Client {
                conn: sessions.connect(),
                outbox,
                inbox,
            }
        }

        fn send(&self, sessions: &SessionManager, msg: ClientMessage) {
            sessions.handle(self.conn, &self.outbox, msg);
        }

        fn drain(&mut self) -> Vec<ServerMessage> {
            let mut out = Vec::new();
            while let Ok(msg) = self.inbox.try_recv() {
                out.push(msg);
            }
            out
        }

        fn error_kind(&mut self) -> Option<String> {
            self.drain().into_iter().find_map(|msg| match msg {
                ServerMessage::Error { kind, .. } => Some(kind),
                _ => None,
            })
        }
    }

    fn at(row: u8, col: u8) -> SquareModel {
        SquareModel { row, col }
    }

    /// Two seated players with the game started; inboxes drained.
    fn started_room(sessions: &SessionManager) -> (String, Client, Client) {
        let mut one = Client::new(sessions);
        let mut two = Client::new(sessions);
        let code = sessions.create_room(one.conn, &one.outbox).unwrap();
        two.send(sessions, ClientMessage::JoinRoom { code: code.clone() });
        one.drain();
        two.drain();
        (code, one, two)
    }

    fn mv(code: &str, from: SquareModel, to: SquareModel) -> ClientMessage {
        ClientMessage::Move {
            code: code.to_string(),
            from,
            to,
            promote: false,
        }
    }

    // ========== Lifecycle ==========

    #[test]
    fn test_create_room() {
        let sessions = SessionManager::new();
        let mut one = Client::new(&sessions);
        one.send(&sessions, ClientMessage::CreateRoom);

        let msgs = one.drain();
        let ServerMessage::RoomCreated { code, player_number } = &msgs[0] else {
            panic!("expected roomCreated, got {:?}", msgs);
        };
        assert_eq!(*player_number, Player::One);
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        assert_eq!(sessions.room_phase(code), Some(RoomPhase::WaitingForOpponent));
    }

    #[test]
    fn test_room_codes_unique() {
        let sessions = SessionManager::new();
        let mut codes = std::collections::HashSet::new();
        for _ in 0..200 {
            let client = Client::new(&sessions);
            codes.insert(sessions.create_room(client.conn, &client.outbox).unwrap());
        }
        assert_eq!(codes.len(), 200);
        assert_eq!(sessions.room_count(), 200);
    }

    #[test]
    fn test_room_code_collision_regenerates() {
        let taken_code = generate_code(&mut StdRng::seed_from_u64(7));
        let taken = HashMap::from([(taken_code.clone(), ())]);

        let code = unique_code(&taken, &mut StdRng::seed_from_u64(7));
        assert_ne!(code, taken_code);

        // The second draw from the same stream is the one kept.
        let mut replay = StdRng::seed_from_u64(7);
        generate_code(&mut replay);
        assert_eq!(code, generate_code(&mut replay));
    }

    #[test]
    fn test_join_unknown_room() {
        let sessions = SessionManager::new();
        let (_code, _one, _two) = started_room(&sessions);
        let mut three = Client::new(&sessions);

        three.send(&sessions, ClientMessage::JoinRoom { code: "ZZZZZZ".into() });
        assert_eq!(three.error_kind().as_deref(), Some("RoomNotFound"));
        assert_eq!(sessions.room_count(), 1);
    }

    #[test]
    fn test_join_starts_game_for_both() {
        let sessions = SessionManager::new();
        let mut one = Client::new(&sessions);
        let mut two = Client::new(&sessions);
        let code = sessions.create_room(one.conn, &one.outbox).unwrap();
        one.drain();

        two.send(&sessions, ClientMessage::JoinRoom { code: code.to_lowercase() });

        let msgs = two.drain();
        assert_eq!(
            msgs[0],
            ServerMessage::RoomJoined {
                code: code.clone(),
                player_number: Player::Two,
            }
        );
        assert!(matches!(msgs[1], ServerMessage::GameStart { current_turn: Player::One, .. }));
        assert!(matches!(&one.drain()[..], [ServerMessage::GameStart { .. }]));
        assert_eq!(sessions.room_phase(&code), Some(RoomPhase::Active));
    }

    #[test]
    fn test_room_full() {
        let sessions = SessionManager::new();
        let (code, _one, _two) = started_room(&sessions);
        let mut three = Client::new(&sessions);

        three.send(&sessions, ClientMessage::JoinRoom { code });
        assert_eq!(three.error_kind().as_deref(), Some("RoomFull"));
    }

    #[test]
    fn test_already_seated_cannot_create_or_join() {
        let sessions = SessionManager::new();
        let (code, mut one, _two) = started_room(&sessions);

        one.send(&sessions, ClientMessage::CreateRoom);
        assert_eq!(one.error_kind().as_deref(), Some("InvalidIntent"));
        one.send(&sessions, ClientMessage::JoinRoom { code });
        assert_eq!(one.error_kind().as_deref(), Some("InvalidIntent"));
        assert_eq!(sessions.room_count(), 1);
    }

    #[test]
    fn test_disconnect_notifies_and_destroys() {
        let sessions = SessionManager::new();
        let (code, mut one, mut two) = started_room(&sessions);

        sessions.disconnect(two.conn);

        assert_eq!(one.drain(), vec![ServerMessage::PlayerDisconnected]);
        assert!(two.drain().is_empty());
        assert_eq!(sessions.room_phase(&code), None);
        assert_eq!(sessions.room_count(), 0);

        one.send(&sessions, mv(&code, at(6, 4), at(5, 4)));
        assert_eq!(one.error_kind().as_deref(), Some("RoomNotFound"));

        // Both seats are free again.
        one.send(&sessions, ClientMessage::CreateRoom);
        assert!(matches!(&one.drain()[..], [ServerMessage::RoomCreated { .. }]));
    }

    #[test]
    fn test_disconnect_while_waiting() {
        let sessions = SessionManager::new();
        let one = Client::new(&sessions);
        sessions.create_room(one.conn, &one.outbox).unwrap();
        sessions.disconnect(one.conn);
        assert_eq!(sessions.room_count(), 0);

        // Unknown connections are ignored.
        sessions.disconnect(ConnId(999));
    }

    // ========== Moves ==========

    #[test]
    fn test_move_before_opponent_joins() {
        let sessions = SessionManager::new();
        let mut one = Client::new(&sessions);
        let code = sessions.create_room(one.conn, &one.outbox).unwrap();
        one.drain();

        one.send(&sessions, mv(&code, at(6, 4), at(5, 4)));
        assert_eq!(one.error_kind().as_deref(), Some("InvalidIntent"));
    }

    #[test]
    fn test_first_pawn_push_broadcast() {
        let sessions = SessionManager::new();
        let (code, mut one, mut two) = started_room(&sessions);

        one.send(&sessions, mv(&code, at(6, 4), at(5, 4)));

        for client in [&mut one, &mut two] {
            let msgs = client.drain();
            assert_eq!(msgs.len(), 1);
            let ServerMessage::GameState {
                board,
                current_turn,
                in_check,
                last_move,
                ..
            } = &msgs[0]
            else {
                panic!("expected gameState, got {:?}", msgs);
            };
            assert!(board[6][4].is_none());
            assert_eq!(board[5][4].as_ref().map(|p| (p.code.as_str(), p.player)), Some(("P", 1)));
            assert_eq!(*current_turn, Player::Two);
            assert!(!in_check);
            assert_eq!(last_move.map(|m| (m.from_row, m.to_row)), Some((6, 5)));
        }
    }

    #[test]
    fn test_errors_go_to_sender_only() {
        let sessions = SessionManager::new();
        let (code, mut one, mut two) = started_room(&sessions);

        two.send(&sessions, mv(&code, at(2, 4), at(3, 4)));
        assert_eq!(two.error_kind().as_deref(), Some("NotYourTurn"));
        assert!(one.drain().is_empty());

        one.send(&sessions, mv(&code, at(6, 4), at(4, 4)));
        assert_eq!(one.error_kind().as_deref(), Some("InvalidMove"));
        one.send(&sessions, mv(&code, at(6, 4), at(12, 4)));
        assert_eq!(one.error_kind().as_deref(), Some("InvalidMove"));
        assert!(two.drain().is_empty());

        assert_eq!(sessions.room_game(&code), Some(Game::new()));
    }

    #[test]
    fn test_intent_from_outsider() {
        let sessions = SessionManager::new();
        let (code, _one, _two) = started_room(&sessions);
        let mut three = Client::new(&sessions);

        three.send(&sessions, mv(&code, at(6, 4), at(5, 4)));
        assert_eq!(three.error_kind().as_deref(), Some("InvalidIntent"));
    }

    #[test]
    fn test_drop_errors() {
        let sessions = SessionManager::new();
        let (code, mut one, _two) = started_room(&sessions);

        one.send(
            &sessions,
            ClientMessage::Drop {
                code: code.clone(),
                square: at(4, 4),
                piece_kind: Kind::Pawn,
            },
        );
        assert_eq!(one.error_kind().as_deref(), Some("PieceNotHeld"));

        one.send(
            &sessions,
            ClientMessage::Drop {
                code,
                square: at(4, 9),
                piece_kind: Kind::Pawn,
            },
        );
        assert_eq!(one.error_kind().as_deref(), Some("InvalidDrop"));
    }

    #[test]
    fn test_broadcast_survives_closed_connection() {
        let sessions = SessionManager::new();
        let (code, mut one, two) = started_room(&sessions);
        drop(two.inbox);

        one.send(&sessions, mv(&code, at(6, 4), at(5, 4)));
        assert!(matches!(&one.drain()[..], [ServerMessage::GameState { .. }]));
    }

    #[test]
    fn test_full_outbox_does_not_block_room() {
        let sessions = SessionManager::new();
        let (code, mut one, mut two) = started_room(&sessions);
        for _ in 0..OUTBOX_CAPACITY {
            two.outbox.try_send(ServerMessage::PlayerDisconnected).unwrap();
        }

        one.send(&sessions, mv(&code, at(6, 4), at(5, 4)));
        assert!(matches!(&one.drain()[..], [ServerMessage::GameState { .. }]));

        let queued = two.drain();
        assert_eq!(queued.len(), OUTBOX_CAPACITY);
        assert!(queued.iter().all(|msg| *msg == ServerMessage::PlayerDisconnected));

        // With room in the queue again, the next snapshot arrives.
        two.send(&sessions, mv(&code, at(2, 4), at(3, 4)));
        assert!(matches!(&two.drain()[..], [ServerMessage::GameState { .. }]));
    }

    // ========== Undo ==========

    #[test]
    fn test_undo_request_needs_history() {
        let sessions = SessionManager::new();
        let (code, mut one, _two) = started_room(&sessions);

        one.send(&sessions, ClientMessage::RequestUndo { code });
        assert_eq!(one.error_kind().as_deref(), Some("NoHistory"));
    }

    #[test]
    fn test_undo_approved_restores_previous_state() {
        let sessions = SessionManager::new();
        let (code, mut one, mut two) = started_room(&sessions);

        one.send(&sessions, mv(&code, at(6, 2), at(5, 2)));
        let before_second = sessions.room_game(&code).unwrap();
        two.send(&sessions, mv(&code, at(2, 6), at(3, 6)));
        one.drain();
        two.drain();

        one.send(&sessions, ClientMessage::RequestUndo { code: code.clone() });
        assert!(one.drain().is_empty());
        assert_eq!(two.drain(), vec![ServerMessage::UndoRequest { from: Player::One }]);

        two.send(
            &sessions,
            ClientMessage::UndoResponse {
                code: code.clone(),
                approved: true,
            },
        );

        let expected = protocol::undo_result(&before_second, true);
        assert_eq!(one.drain(), vec![expected.clone()]);
        assert_eq!(two.drain(), vec![expected]);
        assert_eq!(sessions.room_game(&code), Some(before_second));
    }

    #[test]
    fn test_undo_denied_keeps_state() {
        let sessions = SessionManager::new();
        let (code, mut one, mut two) = started_room(&sessions);

        one.send(&sessions, mv(&code, at(6, 2), at(5, 2)));
        let after_move = sessions.room_game(&code).unwrap();
        two.send(&sessions, ClientMessage::RequestUndo { code: code.clone() });
        one.drain();
        two.drain();

        one.send(
            &sessions,
            ClientMessage::UndoResponse {
                code: code.clone(),
                approved: false,
            },
        );
        let expected = protocol::undo_result(&after_move, false);
        assert_eq!(one.drain(), vec![expected.clone()]);
        assert_eq!(two.drain(), vec![expected]);
        assert_eq!(sessions.room_game(&code), Some(after_move));

        // The request is consumed.
        one.send(&sessions, ClientMessage::UndoResponse { code, approved: true });
        assert_eq!(one.error_kind().as_deref(), Some("InvalidIntent"));
    }

    #[test]
    fn test_requester_cannot_answer_own_request() {
        let sessions = SessionManager::new();
        let (code, mut one, _two) = started_room(&sessions);

        one.send(&sessions, mv(&code, at(6, 2), at(5, 2)));
        one.send(&sessions, ClientMessage::RequestUndo { code: code.clone() });
        one.drain();

        one.send(&sessions, ClientMessage::UndoResponse { code, approved: true });
        assert_eq!(one.error_kind().as_deref(), Some("InvalidIntent"));
    }

    #[test]
    fn test_move_clears_pending_undo() {
        let sessions = SessionManager::new();
        let (code, mut one, mut two) = started_room(&sessions);

        one.send(&sessions, mv(&code, at(6, 2), at(5, 2)));
        one.send(&sessions, ClientMessage::RequestUndo { code: code.clone() });
        two.send(&sessions, mv(&code, at(2, 6), at(3, 6)));
        one.drain();
        two.drain();

        two.send(&sessions, ClientMessage::UndoResponse { code, approved: true });
        assert_eq!(two.error_kind().as_deref(), Some("InvalidIntent"));
    }

    #[test]
    fn test_drop_clears_pending_undo() {
        let sessions = SessionManager::new();
        let (code, mut one, mut two) = started_room(&sessions);

        // Trade into a held Bishop for Player One.
        one.send(&sessions, mv(&code, at(6, 2), at(5, 2)));
        two.send(&sessions, mv(&code, at(2, 6), at(3, 6)));
        one.send(&sessions, mv(&code, at(7, 1), at(1, 7)));
        two.send(&sessions, mv(&code, at(2, 0), at(3, 0)));
        two.send(&sessions, ClientMessage::RequestUndo { code: code.clone() });
        one.send(
            &sessions,
            ClientMessage::Drop {
                code: code.clone(),
                square: at(4, 4),
                piece_kind: Kind::Bishop,
            },
        );
        one.drain();
        two.drain();

        let game = sessions.room_game(&code).unwrap();
        assert_eq!(game.history().len(), 5);
        assert!(game.pool(Player::One).is_empty());

        one.send(&sessions, ClientMessage::UndoResponse { code, approved: true });
        assert_eq!(one.error_kind().as_deref(), Some("InvalidIntent"));
    }

    // ========== Concurrency ==========

    /// Shuffle a King back and forth while asking for and granting undos.
    fn shuffle_king(
        sessions: &SessionManager,
        conn: ConnId,
        outbox: &Outbox,
        code: &str,
        home: SquareModel,
        step: SquareModel,
    ) {
        for round in 0..20 {
            sessions.handle(conn, outbox, mv(code, home, step));
            sessions.handle(conn, outbox, mv(code, step, home));
            if round % 3 == 0 {
                sessions.handle(conn, outbox, ClientMessage::RequestUndo { code: code.to_string() });
            }
            if round % 5 == 0 {
                sessions.handle(
                    conn,
                    outbox,
                    ClientMessage::UndoResponse {
                        code: code.to_string(),
                        approved: true,
                    },
                );
            }
        }
    }

    fn snapshots(client: &mut Client) -> Vec<ServerMessage> {
        client
            .drain()
            .into_iter()
            .filter(|msg| matches!(msg, ServerMessage::GameState { .. } | ServerMessage::UndoResult { .. }))
            .collect()
    }

    #[test]
    fn test_concurrent_intents_stay_consistent() {
        let sessions = SessionManager::new();
        let rooms: Vec<_> = (0..2).map(|_| started_room(&sessions)).collect();

        std::thread::scope(|scope| {
            for (code, one, two) in &rooms {
                for (client, home, step) in [(one, at(8, 4), at(7, 4)), (two, at(0, 4), at(1, 4))] {
                    let (conn, outbox) = (client.conn, client.outbox.clone());
                    let sessions = &sessions;
                    scope.spawn(move || shuffle_king(sessions, conn, &outbox, code, home, step));
                }
            }
        });

        for (code, mut one, mut two) in rooms {
            let game = sessions.room_game(&code).unwrap();
            let seen = snapshots(&mut one);

            // Both players observed the same sequence of room updates.
            assert_eq!(seen, snapshots(&mut two));

            let applied = seen
                .iter()
                .filter(|msg| matches!(msg, ServerMessage::GameState { .. }))
                .count();
            let undone = seen
                .iter()
                .filter(|msg| matches!(msg, ServerMessage::UndoResult { approved: true, .. }))
                .count();
            assert_eq!(game.history().len(), applied - undone);

            let expected_turn = if game.history().len() % 2 == 0 {
                Player::One
            } else {
                Player::Two
            };
            assert_eq!(game.turn(), expected_turn);

            if let Some(last) = seen.last() {
                let expected = match last {
                    ServerMessage::GameState { .. } => protocol::game_state(&game),
                    _ => protocol::undo_result(&game, true),
                };
                assert_eq!(*last, expected);
            }
        }
    }

    // ========== Hints ==========

    #[test]
    fn test_move_hints() {
        let sessions = SessionManager::new();
        let (code, mut one, _two) = started_room(&sessions);

        one.send(
            &sessions,
            ClientMessage::MoveHints {
                code: code.clone(),
                from: at(6, 4),
            },
        );
        let target = Square::new(5, 4).unwrap();
        assert_eq!(
            one.drain(),
            vec![ServerMessage::MoveHints {
                from: Square::new(6, 4).unwrap(),
                destinations: vec![MoveHintModel {
                    square: target,
                    can_promote: false,
                    must_promote: false,
                }],
            }]
        );

        // Opponent pieces get no hints.
        one.send(&sessions, ClientMessage::MoveHints { code, from: at(2, 4) });
        assert!(matches!(
            &one.drain()[..],
            [ServerMessage::MoveHints { destinations, .. }] if destinations.is_empty()
        ));
    }

    #[test]
    fn test_drop_hints_require_held_piece() {
        let sessions = SessionManager::new();
        let (code, mut one, _two) = started_room(&sessions);

        one.send(
            &sessions,
            ClientMessage::DropHints {
                code,
                piece_kind: Kind::Gold,
            },
        );
        assert_eq!(one.error_kind().as_deref(), Some("PieceNotHeld"));
    }
}
