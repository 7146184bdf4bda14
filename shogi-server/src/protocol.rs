//! JSON wire protocol.
//!
//! One message per WebSocket text frame, internally tagged by `"type"`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use shogi_core::{Board, Game, Kind, Piece, Player, Square};

use crate::error::SessionError;

// =============================================================================
// Inbound
// =============================================================================

/// A square as sent by a client. Not trusted to be on the board.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct SquareModel {
    pub row: u8,
    pub col: u8,
}

impl SquareModel {
    pub fn to_square(self) -> Option<Square> {
        Square::new(self.row, self.col)
    }
}

/// Client → server intents.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    CreateRoom,
    JoinRoom {
        code: String,
    },
    Move {
        code: String,
        from: SquareModel,
        to: SquareModel,
        #[serde(default)]
        promote: bool,
    },
    Drop {
        code: String,
        square: SquareModel,
        #[serde(rename = "pieceKind")]
        piece_kind: Kind,
    },
    RequestUndo {
        code: String,
    },
    UndoResponse {
        code: String,
        approved: bool,
    },
    MoveHints {
        code: String,
        from: SquareModel,
    },
    DropHints {
        code: String,
        #[serde(rename = "pieceKind")]
        piece_kind: Kind,
    },
}

// =============================================================================
// Outbound
// =============================================================================

/// A piece as the browser client draws it: `+` prefix for promoted pieces.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct PieceModel {
    #[serde(rename = "type")]
    pub code: String,
    pub player: u8,
}

impl From<Piece> for PieceModel {
    fn from(piece: Piece) -> Self {
        PieceModel {
            code: piece.code(),
            player: piece.owner.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LastMoveModel {
    pub from_row: u8,
    pub from_col: u8,
    pub to_row: u8,
    pub to_col: u8,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MoveHintModel {
    pub square: Square,
    pub can_promote: bool,
    pub must_promote: bool,
}

/// Pools keyed by player number: `{"1": [...], "2": [...]}`.
pub type PoolsModel = BTreeMap<String, Vec<PieceModel>>;

/// Rows of cells, row 0 first; `null` for empty cells.
pub type BoardModel = Vec<Vec<Option<PieceModel>>>;

/// Server → client events. Board and pools are always sent in full.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    RoomCreated { code: String, player_number: Player },
    #[serde(rename_all = "camelCase")]
    RoomJoined { code: String, player_number: Player },
    #[serde(rename_all = "camelCase")]
    GameStart {
        board: BoardModel,
        captured: PoolsModel,
        current_turn: Player,
    },
    #[serde(rename_all = "camelCase")]
    GameState {
        board: BoardModel,
        captured: PoolsModel,
        current_turn: Player,
        in_check: bool,
        last_move: Option<LastMoveModel>,
    },
    UndoRequest { from: Player },
    #[serde(rename_all = "camelCase")]
    UndoResult {
        approved: bool,
        board: BoardModel,
        captured: PoolsModel,
        current_turn: Player,
    },
    MoveHints {
        from: Square,
        destinations: Vec<MoveHintModel>,
    },
    #[serde(rename_all = "camelCase")]
    DropHints { piece_kind: Kind, squares: Vec<Square> },
    PlayerDisconnected,
    Error { kind: String, message: String },
}

impl From<&SessionError> for ServerMessage {
    fn from(err: &SessionError) -> Self {
        ServerMessage::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

// =============================================================================
// Conversion Functions
// =============================================================================

fn board_to_model(board: &Board) -> BoardModel {
    board
        .rows()
        .map(|row| row.iter().map(|cell| cell.map(PieceModel::from)).collect())
        .collect()
}

fn pools_to_model(game: &Game) -> PoolsModel {
    [Player::One, Player::Two]
        .into_iter()
        .map(|player| {
            let pool = game.pool(player).iter().copied().map(PieceModel::from).collect();
            (player.to_string(), pool)
        })
        .collect()
}

/// Initial snapshot sent to both players when the second one joins.
pub fn game_start(game: &Game) -> ServerMessage {
    ServerMessage::GameStart {
        board: board_to_model(game.board()),
        captured: pools_to_model(game),
        current_turn: game.turn(),
    }
}

/// Snapshot after a move or drop. `inCheck` refers to the player now on turn.
pub fn game_state(game: &Game) -> ServerMessage {
    let last_move = game
        .last_record()
        .and_then(|record| record.move_squares())
        .map(|(from, to)| LastMoveModel {
            from_row: from.row(),
            from_col: from.col(),
            to_row: to.row(),
            to_col: to.col(),
        });

    ServerMessage::GameState {
        board: board_to_model(game.board()),
        captured: pools_to_model(game),
        current_turn: game.turn(),
        in_check: game.in_check(game.turn()),
        last_move,
    }
}

/// Outcome of an undo negotiation, sent to both players.
pub fn undo_result(game: &Game, approved: bool) -> ServerMessage {
    ServerMessage::UndoResult {
        approved,
        board: board_to_model(game.board()),
        captured: pools_to_model(game),
        current_turn: game.turn(),
    }
}
