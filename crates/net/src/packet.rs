//! Fixed-layout game packet codec.
//!
//! Frame format has no length field, so every packet serializes to exactly
//! [`PACKET_SIZE`] bytes regardless of kind:
//!
//! ```text
//! [kind: u8][row: u8][col: u8][board: 25 x u8][current_player: u8][message: 256 bytes]
//! ```
//!
//! The message buffer holds at most [`MAX_CHAT_BYTES`] UTF-8 bytes followed by
//! NUL padding.

use tictactoe_core::{BoardSnapshot, Player, BOARD_CELLS};

use crate::error::{NetError, Result};

/// Size of the chat buffer on the wire.
pub const MESSAGE_BUFFER_SIZE: usize = 256;

/// Longest chat text that fits (one byte is reserved for the terminator).
pub const MAX_CHAT_BYTES: usize = MESSAGE_BUFFER_SIZE - 1;

/// Encoded packet size in bytes.
pub const PACKET_SIZE: usize = 1 + 1 + 1 + BOARD_CELLS + 1 + MESSAGE_BUFFER_SIZE;

const BOARD_OFFSET: usize = 3;
const PLAYER_OFFSET: usize = BOARD_OFFSET + BOARD_CELLS;
const MESSAGE_OFFSET: usize = PLAYER_OFFSET + 1;

/// Packet kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    /// A single move at (row, col).
    Move = 1,
    /// Full board snapshot plus side to move.
    Sync = 2,
    /// Chat line.
    Chat = 3,
    /// Request to restart the match.
    Reset = 4,
    /// Peer is leaving.
    Quit = 5,
}

impl TryFrom<u8> for PacketKind {
    type Error = NetError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PacketKind::Move),
            2 => Ok(PacketKind::Sync),
            3 => Ok(PacketKind::Chat),
            4 => Ok(PacketKind::Reset),
            5 => Ok(PacketKind::Quit),
            _ => Err(NetError::InvalidPacket(format!(
                "unknown packet kind {value}"
            ))),
        }
    }
}

/// Decoded game packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet kind.
    pub kind: PacketKind,
    /// Move row (Move only).
    pub row: u8,
    /// Move column (Move only).
    pub col: u8,
    /// Board contents (Sync only).
    pub board: BoardSnapshot,
    /// Side to move (Sync only).
    pub current_player: Player,
    /// Chat text (Chat only).
    pub message: String,
}

impl Packet {
    fn empty(kind: PacketKind) -> Self {
        Self {
            kind,
            row: 0,
            col: 0,
            board: BoardSnapshot::new(),
            current_player: Player::None,
            message: String::new(),
        }
    }

    /// Move packet.
    pub fn movement(row: u8, col: u8) -> Self {
        Self {
            row,
            col,
            ..Self::empty(PacketKind::Move)
        }
    }

    /// Board-sync packet.
    pub fn sync(board: BoardSnapshot, current_player: Player) -> Self {
        Self {
            board,
            current_player,
            ..Self::empty(PacketKind::Sync)
        }
    }

    /// Chat packet. Text longer than [`MAX_CHAT_BYTES`] is cut at the last
    /// char boundary that fits.
    pub fn chat(text: &str) -> Self {
        Self {
            message: truncate_utf8(text, MAX_CHAT_BYTES).to_string(),
            ..Self::empty(PacketKind::Chat)
        }
    }

    /// Reset or Quit packet; other kinds get their default payload.
    pub fn control(kind: PacketKind) -> Self {
        Self::empty(kind)
    }

    /// Serialize to the fixed wire layout.
    pub fn encode(&self) -> [u8; PACKET_SIZE] {
        let mut out = [0u8; PACKET_SIZE];
        out[0] = self.kind as u8;
        out[1] = self.row;
        out[2] = self.col;
        out[BOARD_OFFSET..PLAYER_OFFSET].copy_from_slice(&self.board.to_bytes());
        out[PLAYER_OFFSET] = self.current_player.as_u8();

        let text = truncate_utf8(&self.message, MAX_CHAT_BYTES).as_bytes();
        out[MESSAGE_OFFSET..MESSAGE_OFFSET + text.len()].copy_from_slice(text);
        out
    }

    /// Parse the fixed wire layout.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != PACKET_SIZE {
            return Err(NetError::InvalidPacket(format!(
                "expected {PACKET_SIZE} bytes, got {}",
                data.len()
            )));
        }

        let kind = PacketKind::try_from(data[0])?;

        let mut cells = [0u8; BOARD_CELLS];
        cells.copy_from_slice(&data[BOARD_OFFSET..PLAYER_OFFSET]);
        let board = BoardSnapshot::from_bytes(&cells)
            .map_err(|e| NetError::InvalidPacket(e.to_string()))?;
        let current_player = Player::try_from(data[PLAYER_OFFSET])
            .map_err(|e| NetError::InvalidPacket(e.to_string()))?;

        let buffer = &data[MESSAGE_OFFSET..];
        let end = buffer
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_CHAT_BYTES)
            .min(MAX_CHAT_BYTES);
        let message = std::str::from_utf8(&buffer[..end])
            .map_err(|_| NetError::InvalidPacket("chat text is not UTF-8".to_string()))?
            .to_string();

        Ok(Self {
            kind,
            row: data[1],
            col: data[2],
            board,
            current_player,
            message,
        })
    }
}

/// Longest prefix of `text` that is at most `max` bytes and ends on a char boundary.
pub(crate) fn truncate_utf8(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
