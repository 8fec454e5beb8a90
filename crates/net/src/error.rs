//! Error taxonomy for the secure transport.

use std::io;

use thiserror::Error;

/// Errors surfaced by transport, handshake, and channel operations.
#[derive(Debug, Error)]
pub enum NetError {
    /// Socket-level failure (bind, accept, connect, send, recv).
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    /// Operation needs an established peer connection.
    #[error("not connected to a peer")]
    NotConnected,
    /// `accept` was called without a prior `host`.
    #[error("not listening for a peer")]
    NotListening,
    /// Host name did not resolve to any socket address.
    #[error("could not resolve {0}")]
    AddressResolution(String),
    /// Peer closed the stream.
    #[error("connection closed by peer")]
    ConnectionClosed,
    /// A read that must complete did not finish in time.
    #[error("timed out waiting for peer")]
    Timeout,

    /// First bytes from the peer match neither handshake dialect.
    #[error("peer speaks an unknown handshake dialect")]
    UnknownDialect,
    /// Handshake record had a bad magic, type, version, or echo field.
    #[error("malformed handshake: {0}")]
    MalformedHandshake(&'static str),
    /// Peer could not prove knowledge of the shared passphrase.
    #[error("handshake authentication failed")]
    AuthenticationFailed,
    /// Every handshake dialect the client was allowed to try failed.
    #[error("secure handshake failed")]
    HandshakeFailed,

    /// Encrypted I/O attempted before a handshake completed.
    #[error("secure channel is not established")]
    NotSecure,
    /// Frame did not start with the expected magic.
    #[error("frame magic mismatch")]
    BadMagic,
    /// Frame counter did not advance past the last accepted value.
    #[error("replayed or reordered frame (got {got}, last accepted {last})")]
    Replay {
        /// Counter carried by the rejected frame.
        got: u64,
        /// Last accepted counter.
        last: u64,
    },
    /// AEAD encryption refused the buffer.
    #[error("frame encryption failed")]
    EncryptionFailed,
    /// AEAD tag did not verify.
    #[error("frame authentication failed")]
    DecryptionFailed,
    /// Legacy checksum did not match.
    #[error("legacy frame checksum mismatch")]
    IntegrityCheckFailed,
    /// Send counter would wrap.
    #[error("send sequence exhausted")]
    SequenceExhausted,
    /// Buffer length differs from the fixed frame size.
    #[error("frame size {got}, expected {expected}")]
    FrameSize {
        /// Received length.
        got: usize,
        /// Fixed frame length.
        expected: usize,
    },

    /// A packet arrived while the caller waited for another kind and the
    /// hold-back queue had only game-state packets in it.
    #[error("pending queue full, refused {0:?} packet")]
    PendingOverflow(crate::packet::PacketKind),

    /// Decrypted packet bytes do not form a valid packet.
    #[error("invalid packet: {0}")]
    InvalidPacket(String),
}

impl NetError {
    /// Whether this error means the underlying stream can no longer be used.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            NetError::Io(_) | NetError::ConnectionClosed | NetError::Timeout
        )
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, NetError>;
