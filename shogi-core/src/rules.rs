//! Check detection, the self-check filter, and promotion / drop policy.

use crate::movegen::{attacks, destinations};
use crate::{Board, Kind, Piece, Player, Square};

// =============================================================================
// Check
// =============================================================================

/// Check if `player`'s King is attacked.
///
/// Attack reach is pseudo-legal: an attacker pinned to its own King still
/// gives check. Returns false when `player` has no King on the board.
pub fn in_check(board: &Board, player: Player) -> bool {
    let Some(king) = board.king_square(player) else {
        return false;
    };
    board
        .pieces(player.opponent())
        .any(|(from, piece)| attacks(board, from, piece, king))
}

/// Check if relocating the piece on `from` to `to` would leave `player` in check.
///
/// The relocation is raw: no promotion, no capture bookkeeping.
pub fn would_leave_in_check(board: &Board, from: Square, to: Square, player: Player) -> bool {
    let mut probe = board.clone();
    probe.relocate(from, to);
    in_check(&probe, player)
}

/// Destinations of the piece on `from` that do not leave its owner in check.
pub fn legal_destinations(board: &Board, from: Square) -> Vec<Square> {
    let Some(piece) = board.get(from) else {
        return Vec::new();
    };
    destinations(board, from, piece)
        .into_iter()
        .filter(|&to| !would_leave_in_check(board, from, to, piece.owner))
        .collect()
}

// =============================================================================
// Promotion
// =============================================================================

/// Check if a move from `from_row` to `to_row` may promote `piece`.
pub fn can_promote(piece: Piece, from_row: u8, to_row: u8) -> bool {
    if piece.promoted || !piece.kind.can_promote() {
        return false;
    }
    piece.owner.in_promotion_zone(from_row) || piece.owner.in_promotion_zone(to_row)
}

/// Check if `piece` landing on `to_row` would have no legal move left unpromoted.
pub fn must_promote(piece: Piece, to_row: u8) -> bool {
    if piece.promoted {
        return false;
    }
    let distance = piece.owner.distance_to_far_edge(to_row);
    match piece.kind {
        Kind::Knight => distance < 2,
        Kind::Lance | Kind::Pawn => distance == 0,
        _ => false,
    }
}

// =============================================================================
// Drops
// =============================================================================

/// Check if `piece` (owned by the dropper) may be dropped on `square`.
///
/// Pawn drops that give immediate mate are not detected.
pub fn can_drop(board: &Board, square: Square, piece: Piece) -> bool {
    if !board.is_empty(square) {
        return false;
    }

    let distance = piece.owner.distance_to_far_edge(square.row());
    match piece.kind {
        Kind::Pawn => distance > 0 && !has_unpromoted_pawn(board, square.col(), piece.owner),
        Kind::Lance => distance > 0,
        Kind::Knight => distance > 1,
        // A captured King stays in the pool.
        Kind::King => false,
        _ => true,
    }
}

/// Every square `piece` may be dropped on.
pub fn drop_squares(board: &Board, piece: Piece) -> Vec<Square> {
    Square::all().filter(|&sq| can_drop(board, sq, piece)).collect()
}

/// Nifu: does `col` already hold one of `player`'s unpromoted Pawns?
fn has_unpromoted_pawn(board: &Board, col: u8, player: Player) -> bool {
    (0..crate::BOARD_SIZE)
        .filter_map(|row| Square::new(row, col))
        .filter_map(|sq| board.get(sq))
        .any(|p| p == Piece::new(Kind::Pawn, player))
}
