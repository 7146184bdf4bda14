use thiserror::Error;

use crate::movegen::destinations;
use crate::rules::{can_drop, can_promote, in_check, must_promote, would_leave_in_check};
use crate::{Board, Kind, Piece, Player, Square};

/// Why a move, drop or undo was rejected. Rejections never mutate the game.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RuleError {
    #[error("Not your turn")]
    NotYourTurn,
    #[error("Invalid move")]
    InvalidMove,
    #[error("Move would leave you in check")]
    WouldBeInCheck,
    #[error("Piece not in hand")]
    PieceNotHeld,
    #[error("Invalid drop")]
    InvalidDrop,
    #[error("No moves to undo")]
    NoHistory,
}

/// One reversible history entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Record {
    /// A board move.
    Move {
        from: Square,
        to: Square,
        /// The moving piece as it stood on `from`.
        piece: Piece,
        /// What stood on `to`, in its on-board form.
        captured: Option<Piece>,
        promoted: bool,
        /// Where the captured piece was inserted into the mover's pool.
        pool_index: Option<usize>,
    },
    /// A piece placed from the pool.
    Drop {
        square: Square,
        piece: Piece,
        pool_index: usize,
    },
}

impl Record {
    /// The player who made this entry.
    pub fn player(&self) -> Player {
        match self {
            Record::Move { piece, .. } | Record::Drop { piece, .. } => piece.owner,
        }
    }

    /// From/to squares of a board move. Drops have none.
    pub fn move_squares(&self) -> Option<(Square, Square)> {
        match *self {
            Record::Move { from, to, .. } => Some((from, to)),
            Record::Drop { .. } => None,
        }
    }
}

/// Board, captured pools, turn and history of one game.
///
/// Every mutation goes through [`Game::apply_move`], [`Game::apply_drop`] or
/// [`Game::undo`], which validate fully before touching any state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Game {
    board: Board,
    pools: [Vec<Piece>; 2],
    turn: Player,
    history: Vec<Record>,
}

impl Game {
    /// Standard starting position, Player One to move.
    pub fn new() -> Game {
        Game::from_position(Board::initial(), Player::One)
    }

    /// Start from an arbitrary position with empty pools.
    pub fn from_position(board: Board, turn: Player) -> Game {
        Game {
            board,
            pools: [Vec::new(), Vec::new()],
            turn,
            history: Vec::new(),
        }
    }

    #[inline]
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// A player's captured pieces, in capture order.
    #[inline]
    pub fn pool(&self, player: Player) -> &[Piece] {
        &self.pools[player.index()]
    }

    /// Whose turn it is.
    #[inline]
    pub fn turn(&self) -> Player {
        self.turn
    }

    #[inline]
    pub fn history(&self) -> &[Record] {
        &self.history
    }

    /// The most recent history entry.
    #[inline]
    pub fn last_record(&self) -> Option<&Record> {
        self.history.last()
    }

    /// Check if `player`'s King is currently attacked.
    pub fn in_check(&self, player: Player) -> bool {
        in_check(&self.board, player)
    }

    // ========== Apply ==========

    /// Move the piece on `from` to `to` for `player`.
    ///
    /// Promotion is forced when the piece would otherwise be stuck, and
    /// otherwise happens iff `promote` is requested and allowed.
    pub fn apply_move(
        &mut self,
        player: Player,
        from: Square,
        to: Square,
        promote: bool,
    ) -> Result<Record, RuleError> {
        if player != self.turn {
            return Err(RuleError::NotYourTurn);
        }
        let piece = match self.board.get(from) {
            Some(piece) if piece.owner == player => piece,
            _ => return Err(RuleError::InvalidMove),
        };
        if !destinations(&self.board, from, piece).contains(&to) {
            return Err(RuleError::InvalidMove);
        }
        if would_leave_in_check(&self.board, from, to, player) {
            return Err(RuleError::WouldBeInCheck);
        }

        let captured = self.board.relocate(from, to);
        let pool_index = captured.map(|taken| {
            let pool = &mut self.pools[player.index()];
            pool.push(taken.captured_by(player));
            pool.len() - 1
        });

        let promoted = must_promote(piece, to.row())
            || (promote && can_promote(piece, from.row(), to.row()));
        if promoted {
            self.board.set(to, Some(piece.promote()));
        }

        let record = Record::Move {
            from,
            to,
            piece,
            captured,
            promoted,
            pool_index,
        };
        self.turn = player.opponent();
        self.history.push(record);
        Ok(record)
    }

    /// Drop a held piece of `kind` on `square` for `player`.
    ///
    /// The first matching piece in the pool is used.
    pub fn apply_drop(&mut self, player: Player, square: Square, kind: Kind) -> Result<Record, RuleError> {
        if player != self.turn {
            return Err(RuleError::NotYourTurn);
        }
        let pool = &self.pools[player.index()];
        let pool_index = pool
            .iter()
            .position(|p| p.kind == kind)
            .ok_or(RuleError::PieceNotHeld)?;
        let piece = pool[pool_index];
        if !can_drop(&self.board, square, piece) {
            return Err(RuleError::InvalidDrop);
        }

        self.pools[player.index()].remove(pool_index);
        self.board.set(square, Some(piece));

        let record = Record::Drop {
            square,
            piece,
            pool_index,
        };
        self.turn = player.opponent();
        self.history.push(record);
        Ok(record)
    }

    // ========== Undo ==========

    /// Revert the most recent history entry and give the turn back to its player.
    pub fn undo(&mut self) -> Result<Record, RuleError> {
        let record = self.history.pop().ok_or(RuleError::NoHistory)?;

        match record {
            Record::Move {
                from,
                to,
                piece,
                captured,
                pool_index,
                ..
            } => {
                self.board.set(from, Some(piece));
                self.board.set(to, captured);
                if let Some(index) = pool_index {
                    self.pools[piece.owner.index()].remove(index);
                }
            }
            Record::Drop {
                square,
                piece,
                pool_index,
            } => {
                self.board.set(square, None);
                self.pools[piece.owner.index()].insert(pool_index, piece);
            }
        }

        self.turn = record.player();
        Ok(record)
    }
}

impl Default for Game {
    fn default() -> Self {
        Self::new()
    }
}
