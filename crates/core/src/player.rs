//! Player identifiers.
//!
//! The numeric values are part of the network packet layout and must stay
//! stable across builds.

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Occupant of a board cell, or the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Player {
    /// Empty cell / nobody.
    #[default]
    None = 0,
    /// The X player (the host in network play).
    X = 1,
    /// The O player (the client in network play).
    O = 2,
}

impl Player {
    /// Convert to the stable numeric representation.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to convert from the stable numeric representation.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::X),
            2 => Some(Self::O),
            _ => None,
        }
    }

    /// The other side. `None` stays `None`.
    pub const fn opponent(self) -> Self {
        match self {
            Self::X => Self::O,
            Self::O => Self::X,
            Self::None => Self::None,
        }
    }

    /// Single-character board symbol.
    pub const fn symbol(self) -> char {
        match self {
            Self::X => 'X',
            Self::O => 'O',
            Self::None => '.',
        }
    }
}

impl TryFrom<u8> for Player {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u8(value).ok_or(CoreError::InvalidPlayer(value))
    }
}
