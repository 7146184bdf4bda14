//! Pseudo-legal move generation.
//!
//! Directions are written relative to the moving player: a row delta of `+1`
//! means one step *forward*, which is toward row 0 for Player One and toward
//! row 8 for Player Two. Self-check is not considered here; see [`crate::rules`].

use crate::{Board, Kind, Piece, Square};

/// (forward, sideways) offsets.
type Dir = (i8, i8);

const NONE: &[Dir] = &[];
const ORTHOGONAL: &[Dir] = &[(1, 0), (-1, 0), (0, 1), (0, -1)];
const DIAGONAL: &[Dir] = &[(1, 1), (1, -1), (-1, 1), (-1, -1)];
const KING: &[Dir] = &[
    (1, 0),
    (-1, 0),
    (0, 1),
    (0, -1),
    (1, 1),
    (1, -1),
    (-1, 1),
    (-1, -1),
];
const GOLD: &[Dir] = &[(1, 0), (1, 1), (1, -1), (0, 1), (0, -1), (-1, 0)];
const SILVER: &[Dir] = &[(1, 0), (1, 1), (1, -1), (-1, 1), (-1, -1)];
const KNIGHT: &[Dir] = &[(2, 1), (2, -1)];
const FORWARD: &[Dir] = &[(1, 0)];

/// How a piece moves: single steps plus unlimited slides.
#[derive(Clone, Copy, Debug)]
pub struct Movement {
    pub steps: &'static [Dir],
    pub slides: &'static [Dir],
}

/// Movement table for a piece.
pub fn movement(piece: Piece) -> Movement {
    let (steps, slides) = match (piece.kind, piece.promoted) {
        (Kind::King, _) => (KING, NONE),
        (Kind::Rook, false) => (NONE, ORTHOGONAL),
        (Kind::Rook, true) => (DIAGONAL, ORTHOGONAL),
        (Kind::Bishop, false) => (NONE, DIAGONAL),
        (Kind::Bishop, true) => (ORTHOGONAL, DIAGONAL),
        // Gold, and every other promoted piece
        (Kind::Gold, _) | (_, true) => (GOLD, NONE),
        (Kind::Silver, false) => (SILVER, NONE),
        (Kind::Knight, false) => (KNIGHT, NONE),
        (Kind::Lance, false) => (NONE, FORWARD),
        (Kind::Pawn, false) => (FORWARD, NONE),
    };
    Movement { steps, slides }
}

/// Destinations reachable by `piece` standing on `from`.
///
/// A destination is either empty or holds an opponent piece. Sliders stop
/// before their own pieces and on the first opponent piece.
pub fn destinations(board: &Board, from: Square, piece: Piece) -> Vec<Square> {
    let Movement { steps, slides } = movement(piece);
    let forward = piece.owner.forward();
    let mut out = Vec::with_capacity(16);

    let open = |sq: Square| !matches!(board.get(sq), Some(other) if other.owner == piece.owner);

    for &(df, ds) in steps {
        if let Some(to) = from.offset(df * forward, ds) {
            if open(to) {
                out.push(to);
            }
        }
    }

    for &(df, ds) in slides {
        let mut cursor = from;
        while let Some(to) = cursor.offset(df * forward, ds) {
            match board.get(to) {
                None => out.push(to),
                Some(other) => {
                    if other.owner != piece.owner {
                        out.push(to);
                    }
                    break;
                }
            }
            cursor = to;
        }
    }

    out
}

/// Check if `piece` on `from` attacks `target`.
pub fn attacks(board: &Board, from: Square, piece: Piece, target: Square) -> bool {
    destinations(board, from, piece).contains(&target)
}
