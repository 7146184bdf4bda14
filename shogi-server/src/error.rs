use thiserror::Error;

use shogi_core::RuleError;

/// Why an intent was rejected. Reported to the sender only; never mutates a room.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Room not found")]
    RoomNotFound,
    #[error("Room is full")]
    RoomFull,
    #[error(transparent)]
    Rule(#[from] RuleError),
    #[error("{0}")]
    InvalidIntent(&'static str),
}

impl SessionError {
    /// Stable error name sent on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::RoomNotFound => "RoomNotFound",
            SessionError::RoomFull => "RoomFull",
            SessionError::Rule(rule) => match rule {
                RuleError::NotYourTurn => "NotYourTurn",
                RuleError::InvalidMove => "InvalidMove",
                RuleError::WouldBeInCheck => "WouldBeInCheck",
                RuleError::PieceNotHeld => "PieceNotHeld",
                RuleError::InvalidDrop => "InvalidDrop",
                RuleError::NoHistory => "NoHistory",
            },
            SessionError::InvalidIntent(_) => "InvalidIntent",
        }
    }
}
