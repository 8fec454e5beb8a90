#![warn(missing_docs)]
//! Core game values shared across the workspace.

pub mod board;
pub mod player;

use thiserror::Error;

// Re-export commonly used types
pub use board::{Board, BoardSnapshot, BoardSource, BOARD_CELLS};
pub use player::Player;

/// Largest supported board edge length.
pub const MAX_BOARD_SIZE: usize = 5;

/// Smallest supported board edge length.
pub const MIN_BOARD_SIZE: usize = 3;

/// Errors raised when a value does not fit the board model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Coordinates outside the fixed board grid.
    #[error("cell ({row}, {col}) is outside the {max}x{max} grid", max = MAX_BOARD_SIZE)]
    OutOfBounds {
        /// Requested row.
        row: usize,
        /// Requested column.
        col: usize,
    },
    /// Byte value that does not name a player.
    #[error("invalid player value {0}")]
    InvalidPlayer(u8),
    /// Board edge length outside the supported range.
    #[error("board size {0} is not supported")]
    InvalidSize(usize),
}
