//! Shogi rules engine.
//!
//! # Coordinates
//!
//! ```text
//!          col 0 1 2 3 4 5 6 7 8
//!   row 0      L N S G K G S N L    <- Player Two's home edge
//!   row 1      . R . . . . . B .
//!   row 2      P P P P P P P P P
//!   ...
//!   row 6      P P P P P P P P P
//!   row 7      . B . . . . . R .
//!   row 8      L N S G K G S N L    <- Player One's home edge
//! ```
//!
//! Player One moves toward row 0, Player Two toward row 8. The promotion zone
//! is the three rows nearest the opponent's home edge.
//!
//! # Layers
//!
//! - [`Board`]: 81 optional pieces, nothing else.
//! - [`movegen`]: pseudo-legal destinations for a single piece.
//! - [`rules`]: check detection, the self-check filter, promotion and drop policy.
//! - [`Game`]: board + captured pools + turn + reversible history.

use std::fmt;

use serde::{Deserialize, Serialize};

mod board;
mod game;
pub mod movegen;
pub mod rules;

pub use board::Board;
pub use game::{Game, Record, RuleError};

/// Side length of the board.
pub const BOARD_SIZE: u8 = 9;

// =============================================================================
// Player
// =============================================================================

/// Player identifier. Serialized as `1` or `2`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum Player {
    /// Sente, moves first, toward row 0.
    One = 1,
    /// Gote, toward row 8.
    Two = 2,
}

impl Player {
    /// Get the opponent player.
    #[inline]
    pub fn opponent(self) -> Player {
        match self {
            Player::One => Player::Two,
            Player::Two => Player::One,
        }
    }

    /// Row delta of one step "forward" for this player.
    #[inline]
    pub fn forward(self) -> i8 {
        match self {
            Player::One => -1,
            Player::Two => 1,
        }
    }

    /// How many rows `row` lies from this player's far edge (0 = the farthest row).
    #[inline]
    pub fn distance_to_far_edge(self, row: u8) -> u8 {
        match self {
            Player::One => row,
            Player::Two => BOARD_SIZE - 1 - row,
        }
    }

    /// Check if `row` is inside this player's promotion zone.
    #[inline]
    pub fn in_promotion_zone(self, row: u8) -> bool {
        self.distance_to_far_edge(row) < 3
    }

    /// Index into per-player arrays (0 or 1).
    #[inline]
    pub(crate) fn index(self) -> usize {
        self as usize - 1
    }

    /// Convert from u8 (1 or 2) to Player.
    #[inline]
    pub fn from_number(n: u8) -> Option<Player> {
        match n {
            1 => Some(Player::One),
            2 => Some(Player::Two),
            _ => None,
        }
    }
}

impl From<Player> for u8 {
    fn from(player: Player) -> u8 {
        player as u8
    }
}

impl TryFrom<u8> for Player {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Player::from_number(n).ok_or_else(|| format!("invalid player number {n}"))
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

// =============================================================================
// Piece
// =============================================================================

/// Base piece kind. Serialized as its one-letter code.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
pub enum Kind {
    #[serde(rename = "K")]
    King,
    #[serde(rename = "R")]
    Rook,
    #[serde(rename = "B")]
    Bishop,
    #[serde(rename = "G")]
    Gold,
    #[serde(rename = "S")]
    Silver,
    #[serde(rename = "N")]
    Knight,
    #[serde(rename = "L")]
    Lance,
    #[serde(rename = "P")]
    Pawn,
}

impl Kind {
    /// One-letter code.
    pub fn letter(self) -> char {
        match self {
            Kind::King => 'K',
            Kind::Rook => 'R',
            Kind::Bishop => 'B',
            Kind::Gold => 'G',
            Kind::Silver => 'S',
            Kind::Knight => 'N',
            Kind::Lance => 'L',
            Kind::Pawn => 'P',
        }
    }

    /// King and Gold have no promoted form.
    #[inline]
    pub fn can_promote(self) -> bool {
        !matches!(self, Kind::King | Kind::Gold)
    }
}

/// A piece on the board or in a captured pool.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
pub struct Piece {
    pub kind: Kind,
    pub promoted: bool,
    pub owner: Player,
}

impl Piece {
    /// Create an unpromoted piece.
    #[inline]
    pub const fn new(kind: Kind, owner: Player) -> Piece {
        Piece { kind, promoted: false, owner }
    }

    /// The promoted form of this piece. King and Gold are returned unchanged.
    #[inline]
    pub fn promote(self) -> Piece {
        Piece {
            promoted: self.kind.can_promote(),
            ..self
        }
    }

    /// The unpromoted form of this piece.
    #[inline]
    pub fn demote(self) -> Piece {
        Piece { promoted: false, ..self }
    }

    /// The form this piece takes in `captor`'s pool.
    #[inline]
    pub fn captured_by(self, captor: Player) -> Piece {
        Piece::new(self.kind, captor)
    }

    /// Wire code: the kind letter, prefixed with `+` when promoted.
    pub fn code(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Piece {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.promoted {
            write!(f, "+{}", self.kind.letter())
        } else {
            write!(f, "{}", self.kind.letter())
        }
    }
}

// =============================================================================
// Square
// =============================================================================

/// A square on the 9x9 board. Always in bounds.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, PartialOrd, Ord, Serialize)]
pub struct Square {
    row: u8,
    col: u8,
}

impl Square {
    /// Create a square, or `None` if off the board.
    #[inline]
    pub fn new(row: u8, col: u8) -> Option<Square> {
        (row < BOARD_SIZE && col < BOARD_SIZE).then_some(Square { row, col })
    }

    #[inline]
    pub fn row(self) -> u8 {
        self.row
    }

    #[inline]
    pub fn col(self) -> u8 {
        self.col
    }

    /// The square `dr` rows and `dc` columns away, if still on the board.
    #[inline]
    pub fn offset(self, dr: i8, dc: i8) -> Option<Square> {
        let row = self.row as i8 + dr;
        let col = self.col as i8 + dc;
        if (0..BOARD_SIZE as i8).contains(&row) && (0..BOARD_SIZE as i8).contains(&col) {
            Some(Square { row: row as u8, col: col as u8 })
        } else {
            None
        }
    }

    /// Iterate over all 81 squares in row-major order.
    pub fn all() -> impl Iterator<Item = Square> {
        (0..BOARD_SIZE).flat_map(|row| (0..BOARD_SIZE).map(move |col| Square { row, col }))
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.row, self.col)
    }
}
