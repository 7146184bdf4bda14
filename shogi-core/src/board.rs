use crate::{Kind, Piece, Player, Square, BOARD_SIZE};

const SIZE: usize = BOARD_SIZE as usize;

/// Back rank from column 0 to column 8, identical for both players.
const BACK_RANK: [Kind; SIZE] = [
    Kind::Lance,
    Kind::Knight,
    Kind::Silver,
    Kind::Gold,
    Kind::King,
    Kind::Gold,
    Kind::Silver,
    Kind::Knight,
    Kind::Lance,
];

/// 9x9 grid of optional pieces.
///
/// Pure data: the board does not know whose turn it is or what is in hand.
/// Mutators do NOT validate; callers apply rules first.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Board {
    cells: [[Option<Piece>; SIZE]; SIZE],
}

impl Board {
    /// Create an empty board.
    pub fn empty() -> Board {
        Board {
            cells: [[None; SIZE]; SIZE],
        }
    }

    /// Create the standard starting position.
    pub fn initial() -> Board {
        let mut board = Board::empty();

        for (col, kind) in BACK_RANK.into_iter().enumerate() {
            board.cells[8][col] = Some(Piece::new(kind, Player::One));
            board.cells[0][col] = Some(Piece::new(kind, Player::Two));
            board.cells[6][col] = Some(Piece::new(Kind::Pawn, Player::One));
            board.cells[2][col] = Some(Piece::new(Kind::Pawn, Player::Two));
        }

        board.cells[7][1] = Some(Piece::new(Kind::Bishop, Player::One));
        board.cells[7][7] = Some(Piece::new(Kind::Rook, Player::One));
        board.cells[1][1] = Some(Piece::new(Kind::Rook, Player::Two));
        board.cells[1][7] = Some(Piece::new(Kind::Bishop, Player::Two));

        board
    }

    /// Get the piece on a square.
    #[inline]
    pub fn get(&self, sq: Square) -> Option<Piece> {
        self.cells[sq.row() as usize][sq.col() as usize]
    }

    /// Replace the contents of a square, returning what was there.
    #[inline]
    pub fn set(&mut self, sq: Square, piece: Option<Piece>) -> Option<Piece> {
        std::mem::replace(&mut self.cells[sq.row() as usize][sq.col() as usize], piece)
    }

    /// Check if a square is empty.
    #[inline]
    pub fn is_empty(&self, sq: Square) -> bool {
        self.get(sq).is_none()
    }

    /// Move whatever is on `from` to `to`, overwriting `to`.
    /// Returns the overwritten piece.
    pub fn relocate(&mut self, from: Square, to: Square) -> Option<Piece> {
        let moving = self.set(from, None);
        self.set(to, moving)
    }

    /// Find a player's King.
    pub fn king_square(&self, player: Player) -> Option<Square> {
        self.pieces(player)
            .find(|(_, piece)| piece.kind == Kind::King)
            .map(|(sq, _)| sq)
    }

    /// Iterate over a player's pieces in row-major order.
    pub fn pieces(&self, player: Player) -> impl Iterator<Item = (Square, Piece)> + '_ {
        Square::all().filter_map(move |sq| {
            self.get(sq)
                .filter(|piece| piece.owner == player)
                .map(|piece| (sq, piece))
        })
    }

    /// Rows of the board, row 0 first.
    pub fn rows(&self) -> impl Iterator<Item = &[Option<Piece>; SIZE]> {
        self.cells.iter()
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::initial()
    }
}
