//! Encrypted framing for game packets.
//!
//! Modern frame format:
//!
//! ```text
//! [magic: 4 = "TXF1"][sequence: u64 BE][ciphertext: PACKET_SIZE][tag: 16]
//! ```
//!
//! ChaCha20-Poly1305 with nonce `iv_prefix(4) || sequence(8 BE)`; the 12-byte
//! header is authenticated as associated data. Each direction has its own key
//! and its own strictly increasing counter, so a (key, nonce) pair is never
//! reused.

use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce, Tag};
use tracing::trace;

use crate::error::{NetError, Result};
use crate::kdf::SymmetricKey;
use crate::legacy::{LegacyChannel, LEGACY_FRAME_SIZE};
use crate::packet::{Packet, PACKET_SIZE};

/// Modern frame magic.
pub const FRAME_MAGIC: [u8; 4] = *b"TXF1";

/// Length of the per-direction IV prefix.
pub const IV_PREFIX_LEN: usize = 4;

/// AEAD tag length.
pub const TAG_LEN: usize = 16;

const HEADER_LEN: usize = 4 + 8;

/// Modern frame size on the wire.
pub const FRAME_SIZE: usize = HEADER_LEN + PACKET_SIZE + TAG_LEN;

/// Negotiated protection for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SecurityMode {
    /// No handshake has completed.
    #[default]
    None,
    /// AEAD channel with directional keys.
    Modern,
    /// Compatibility channel for old peers.
    Legacy,
}

/// One direction pair of modern channel state.
#[derive(Debug)]
pub struct ModernChannel {
    send_key: SymmetricKey,
    recv_key: SymmetricKey,
    send_iv_prefix: [u8; IV_PREFIX_LEN],
    recv_iv_prefix: [u8; IV_PREFIX_LEN],
    tx_seq: u64,
    rx_seq: u64,
}

impl ModernChannel {
    /// Fresh channel with both counters at zero.
    pub fn new(
        send_key: SymmetricKey,
        recv_key: SymmetricKey,
        send_iv_prefix: [u8; IV_PREFIX_LEN],
        recv_iv_prefix: [u8; IV_PREFIX_LEN],
    ) -> Self {
        Self {
            send_key,
            recv_key,
            send_iv_prefix,
            recv_iv_prefix,
            tx_seq: 0,
            rx_seq: 0,
        }
    }

    /// Last sequence number sent.
    pub fn tx_seq(&self) -> u64 {
        self.tx_seq
    }

    /// Last sequence number accepted.
    pub fn rx_seq(&self) -> u64 {
        self.rx_seq
    }

    /// Encrypt one packet into a complete frame.
    pub fn seal(&mut self, packet: &Packet) -> Result<[u8; FRAME_SIZE]> {
        let seq = self
            .tx_seq
            .checked_add(1)
            .ok_or(NetError::SequenceExhausted)?;

        let mut frame = [0u8; FRAME_SIZE];
        frame[..4].copy_from_slice(&FRAME_MAGIC);
        frame[4..HEADER_LEN].copy_from_slice(&seq.to_be_bytes());
        frame[HEADER_LEN..HEADER_LEN + PACKET_SIZE].copy_from_slice(&packet.encode());

        let (header, rest) = frame.split_at_mut(HEADER_LEN);
        let (body, tag_out) = rest.split_at_mut(PACKET_SIZE);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(self.send_key.as_bytes()));
        let nonce = build_nonce(&self.send_iv_prefix, seq);
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), header, body)
            .map_err(|_| NetError::EncryptionFailed)?;
        tag_out.copy_from_slice(&tag);

        self.tx_seq = seq;
        trace!("Sealed frame seq={}", seq);
        Ok(frame)
    }

    /// Authenticate and decrypt one frame.
    ///
    /// The receive counter only advances when the frame verifies.
    pub fn open(&mut self, frame: &[u8]) -> Result<Packet> {
        if frame.len() != FRAME_SIZE {
            return Err(NetError::FrameSize {
                got: frame.len(),
                expected: FRAME_SIZE,
            });
        }
        if frame[..4] != FRAME_MAGIC {
            return Err(NetError::BadMagic);
        }

        let mut seq_bytes = [0u8; 8];
        seq_bytes.copy_from_slice(&frame[4..HEADER_LEN]);
        let seq = u64::from_be_bytes(seq_bytes);
        if seq <= self.rx_seq {
            return Err(NetError::Replay {
                got: seq,
                last: self.rx_seq,
            });
        }

        let header = &frame[..HEADER_LEN];
        let mut body = [0u8; PACKET_SIZE];
        body.copy_from_slice(&frame[HEADER_LEN..HEADER_LEN + PACKET_SIZE]);
        let tag = Tag::from_slice(&frame[HEADER_LEN + PACKET_SIZE..]);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(self.recv_key.as_bytes()));
        let nonce = build_nonce(&self.recv_iv_prefix, seq);
        cipher
            .decrypt_in_place_detached(Nonce::from_slice(&nonce), header, &mut body, tag)
            .map_err(|_| NetError::DecryptionFailed)?;

        let packet = Packet::decode(&body)?;
        self.rx_seq = seq;
        trace!("Opened frame seq={}", seq);
        Ok(packet)
    }
}

fn build_nonce(prefix: &[u8; IV_PREFIX_LEN], seq: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..IV_PREFIX_LEN].copy_from_slice(prefix);
    nonce[IV_PREFIX_LEN..].copy_from_slice(&seq.to_be_bytes());
    nonce
}

/// The channel installed by a successful handshake.
#[derive(Debug)]
pub enum SecureChannel {
    /// AEAD framing.
    Modern(ModernChannel),
    /// Keystream + checksum framing.
    Legacy(LegacyChannel),
}

impl SecureChannel {
    /// Which dialect this channel speaks.
    pub fn mode(&self) -> SecurityMode {
        match self {
            SecureChannel::Modern(_) => SecurityMode::Modern,
            SecureChannel::Legacy(_) => SecurityMode::Legacy,
        }
    }

    /// Fixed frame size for this dialect.
    pub fn frame_len(&self) -> usize {
        match self {
            SecureChannel::Modern(_) => FRAME_SIZE,
            SecureChannel::Legacy(_) => LEGACY_FRAME_SIZE,
        }
    }

    /// Encrypt a packet into a frame.
    pub fn seal(&mut self, packet: &Packet) -> Result<Vec<u8>> {
        match self {
            SecureChannel::Modern(channel) => Ok(channel.seal(packet)?.to_vec()),
            SecureChannel::Legacy(channel) => Ok(channel.seal(packet)?.to_vec()),
        }
    }

    /// Verify and decrypt a frame.
    pub fn open(&mut self, frame: &[u8]) -> Result<Packet> {
        match self {
            SecureChannel::Modern(channel) => channel.open(frame),
            SecureChannel::Legacy(channel) => channel.open(frame),
        }
    }
}
