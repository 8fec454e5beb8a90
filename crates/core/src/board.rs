//! Board snapshots exchanged between peers.
//!
//! Game rules live with the caller; this module only tracks cell occupancy
//! on the fixed 5x5 grid the network layout is built around. Smaller boards
//! use the top-left corner and leave the rest empty.

use serde::{Deserialize, Serialize};

use crate::{CoreError, Player, MAX_BOARD_SIZE, MIN_BOARD_SIZE};

/// Number of cells in a snapshot.
pub const BOARD_CELLS: usize = MAX_BOARD_SIZE * MAX_BOARD_SIZE;

/// Fixed-size copy of the board grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoardSnapshot {
    cells: [[Player; MAX_BOARD_SIZE]; MAX_BOARD_SIZE],
}

impl BoardSnapshot {
    /// Empty grid.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a cell.
    pub fn get(&self, row: usize, col: usize) -> Result<Player, CoreError> {
        check_bounds(row, col)?;
        Ok(self.cells[row][col])
    }

    /// Overwrite a cell.
    pub fn set(&mut self, row: usize, col: usize, player: Player) -> Result<(), CoreError> {
        check_bounds(row, col)?;
        self.cells[row][col] = player;
        Ok(())
    }

    /// Row-major cell values, one byte per cell.
    pub fn to_bytes(&self) -> [u8; BOARD_CELLS] {
        let mut out = [0u8; BOARD_CELLS];
        for (i, player) in self.cells.iter().flatten().enumerate() {
            out[i] = player.as_u8();
        }
        out
    }

    /// Inverse of [`BoardSnapshot::to_bytes`]; rejects unknown cell values.
    pub fn from_bytes(bytes: &[u8; BOARD_CELLS]) -> Result<Self, CoreError> {
        let mut snapshot = Self::new();
        for (i, &value) in bytes.iter().enumerate() {
            snapshot.cells[i / MAX_BOARD_SIZE][i % MAX_BOARD_SIZE] = Player::try_from(value)?;
        }
        Ok(snapshot)
    }

    /// Count of occupied cells.
    pub fn occupied(&self) -> usize {
        self.cells
            .iter()
            .flatten()
            .filter(|p| **p != Player::None)
            .count()
    }
}

fn check_bounds(row: usize, col: usize) -> Result<(), CoreError> {
    if row >= MAX_BOARD_SIZE || col >= MAX_BOARD_SIZE {
        return Err(CoreError::OutOfBounds { row, col });
    }
    Ok(())
}

/// Source of the values serialized into a board-sync packet.
pub trait BoardSource {
    /// Current grid contents.
    fn snapshot(&self) -> BoardSnapshot;

    /// Side to move.
    fn current_player(&self) -> Player;
}

/// Minimal occupancy tracker for a square board of `size` cells per edge.
///
/// Alternates turns on every placement and refuses occupied cells. Win and
/// draw detection belong to the game layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    size: usize,
    snapshot: BoardSnapshot,
    current: Player,
}

impl Board {
    /// Empty board; X moves first.
    pub fn new(size: usize) -> Result<Self, CoreError> {
        if !(MIN_BOARD_SIZE..=MAX_BOARD_SIZE).contains(&size) {
            return Err(CoreError::InvalidSize(size));
        }
        Ok(Self {
            size,
            snapshot: BoardSnapshot::new(),
            current: Player::X,
        })
    }

    /// Edge length.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Place the current player's mark and pass the turn.
    ///
    /// Returns `Ok(false)` when the cell is already taken.
    pub fn place(&mut self, row: usize, col: usize) -> Result<bool, CoreError> {
        if row >= self.size || col >= self.size {
            return Err(CoreError::OutOfBounds { row, col });
        }
        if self.snapshot.get(row, col)? != Player::None {
            return Ok(false);
        }
        self.snapshot.set(row, col, self.current)?;
        self.current = self.current.opponent();
        Ok(true)
    }

    /// Replace the grid and turn with values received from the peer.
    pub fn apply_sync(&mut self, snapshot: BoardSnapshot, current: Player) {
        self.snapshot = snapshot;
        self.current = current;
    }

    /// True once every cell inside `size` is occupied.
    pub fn is_full(&self) -> bool {
        self.snapshot.occupied() == self.size * self.size
    }

    /// Render as text rows, one line per row.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("   ");
        for col in 0..self.size {
            out.push_str(&format!(" {}", col + 1));
        }
        out.push('\n');
        for row in 0..self.size {
            out.push_str(&format!(" {} ", row + 1));
            for col in 0..self.size {
                let cell = self.snapshot.cells[row][col];
                out.push(' ');
                out.push(cell.symbol());
            }
            out.push('\n');
        }
        out
    }
}

impl BoardSource for Board {
    fn snapshot(&self) -> BoardSnapshot {
        self.snapshot
    }

    fn current_player(&self) -> Player {
        self.current
    }
}
