#![warn(missing_docs)]
//! Authenticated, encrypted two-player transport over TCP.
//!
//! A [`Session`] listens or connects, runs a passphrase handshake that
//! settles on either the AEAD channel or the legacy channel for old peers,
//! and then exchanges fixed-size game [`Packet`]s.

mod channel;
mod error;
mod handshake;
mod kdf;
mod legacy;
mod packet;
mod session;
mod transport;

pub use channel::{ModernChannel, SecureChannel, SecurityMode, FRAME_MAGIC, FRAME_SIZE};
pub use error::{NetError, Result};
pub use handshake::{
    classify, ClientDialect, ClientHello, Dialect, HandshakeState, LegacyHello, Negotiator,
    ServerHello, CLIENT_HELLO_SIZE, LEGACY_HANDSHAKE_MAGIC, LEGACY_HELLO_SIZE,
    MODERN_HANDSHAKE_MAGIC, MSG_CLIENT_HELLO, MSG_SERVER_HELLO, PROTOCOL_VERSION,
    SERVER_HELLO_SIZE,
};
pub use kdf::{
    derive_base_key, derive_direction_key, legacy_proof, legacy_seed, legacy_session_key,
    SymmetricKey, LABEL_C2S, LABEL_S2C, PBKDF2_ITERATIONS,
};
pub use legacy::{LegacyChannel, LEGACY_FRAME_MAGIC, LEGACY_FRAME_SIZE};
pub use packet::{Packet, PacketKind, MAX_CHAT_BYTES, MESSAGE_BUFFER_SIZE, PACKET_SIZE};
pub use session::{
    Role, Session, DEFAULT_PASSPHRASE, FRAME_COMPLETION_TIMEOUT, MAX_PASSPHRASE_BYTES,
    PENDING_LIMIT,
};
pub use transport::{Transport, DEFAULT_PORT};
