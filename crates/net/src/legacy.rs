//! Compatibility channel for peers that predate the AEAD handshake.
//!
//! Frame format:
//!
//! ```text
//! [magic: 4 = "TXL1"][nonce: u32 BE][mac: u32 BE][ciphertext: PACKET_SIZE]
//! ```
//!
//! The cipher is an XOR against a SplitMix64 keystream and the "mac" is a
//! keyed FNV fold. Neither is a vetted primitive. This is weaker than
//! [`crate::channel::ModernChannel`] and only negotiated when the peer cannot
//! do better.
//!
//! Both directions use the same session key and both nonce counters start
//! at 1, so frame `n` from the host and frame `n` from the client are sealed
//! with the same keystream. XORing the two ciphertexts yields the XOR of the
//! two plaintexts (a two-time pad). Old peers derive the keystream this way,
//! so it cannot change without breaking them.

use subtle::ConstantTimeEq;
use tracing::trace;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{NetError, Result};
use crate::kdf::{fnv1a, mix64};
use crate::packet::{Packet, PACKET_SIZE};

/// Legacy frame magic.
pub const LEGACY_FRAME_MAGIC: [u8; 4] = *b"TXL1";

const HEADER_LEN: usize = 4 + 4 + 4;

/// Legacy frame size on the wire.
pub const LEGACY_FRAME_SIZE: usize = HEADER_LEN + PACKET_SIZE;

const GOLDEN_GAMMA: u64 = 0x9e37_79b9_7f4a_7c15;
const KEYSTREAM_DOMAIN: u64 = 0x4b45_5953_5452_4d31; // "KEYSTRM1"
const CHECKSUM_DOMAIN: u64 = 0x4348_4543_4b53_554d; // "CHECKSUM"

/// Legacy channel state: one shared key, one nonce counter per direction.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct LegacyChannel {
    session_key: u64,
    tx_nonce: u32,
    rx_nonce: u32,
}

impl std::fmt::Debug for LegacyChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyChannel")
            .field("tx_nonce", &self.tx_nonce)
            .field("rx_nonce", &self.rx_nonce)
            .finish_non_exhaustive()
    }
}

impl LegacyChannel {
    /// Fresh channel with both nonces at zero.
    pub fn new(session_key: u64) -> Self {
        Self {
            session_key,
            tx_nonce: 0,
            rx_nonce: 0,
        }
    }

    /// Last nonce sent.
    pub fn tx_nonce(&self) -> u32 {
        self.tx_nonce
    }

    /// Last nonce accepted.
    pub fn rx_nonce(&self) -> u32 {
        self.rx_nonce
    }

    /// Encrypt one packet into a legacy frame.
    pub fn seal(&mut self, packet: &Packet) -> Result<[u8; LEGACY_FRAME_SIZE]> {
        let nonce = self
            .tx_nonce
            .checked_add(1)
            .ok_or(NetError::SequenceExhausted)?;

        let mut body = packet.encode();
        apply_keystream(self.session_key, nonce, &mut body);
        let mac = checksum(self.session_key, nonce, &body);

        let mut frame = [0u8; LEGACY_FRAME_SIZE];
        frame[..4].copy_from_slice(&LEGACY_FRAME_MAGIC);
        frame[4..8].copy_from_slice(&nonce.to_be_bytes());
        frame[8..12].copy_from_slice(&mac.to_be_bytes());
        frame[HEADER_LEN..].copy_from_slice(&body);

        self.tx_nonce = nonce;
        trace!("Sealed legacy frame nonce={}", nonce);
        Ok(frame)
    }

    /// Check and decrypt one legacy frame.
    pub fn open(&mut self, frame: &[u8]) -> Result<Packet> {
        if frame.len() != LEGACY_FRAME_SIZE {
            return Err(NetError::FrameSize {
                got: frame.len(),
                expected: LEGACY_FRAME_SIZE,
            });
        }
        if frame[..4] != LEGACY_FRAME_MAGIC {
            return Err(NetError::BadMagic);
        }

        let nonce = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]);
        if nonce <= self.rx_nonce {
            return Err(NetError::Replay {
                got: u64::from(nonce),
                last: u64::from(self.rx_nonce),
            });
        }

        let mac = u32::from_be_bytes([frame[8], frame[9], frame[10], frame[11]]);
        let mut body = [0u8; PACKET_SIZE];
        body.copy_from_slice(&frame[HEADER_LEN..]);
        let expected = checksum(self.session_key, nonce, &body);
        if !bool::from(expected.ct_eq(&mac)) {
            return Err(NetError::IntegrityCheckFailed);
        }

        apply_keystream(self.session_key, nonce, &mut body);
        let packet = Packet::decode(&body)?;
        self.rx_nonce = nonce;
        trace!("Opened legacy frame nonce={}", nonce);
        Ok(packet)
    }
}

fn apply_keystream(key: u64, nonce: u32, data: &mut [u8]) {
    let nonce = u64::from(nonce);
    let mut state = mix64(key ^ (nonce << 32 | nonce) ^ KEYSTREAM_DOMAIN);
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_add(GOLDEN_GAMMA);
        let block = mix64(state).to_le_bytes();
        for (byte, k) in chunk.iter_mut().zip(block) {
            *byte ^= k;
        }
    }
}

fn checksum(key: u64, nonce: u32, ciphertext: &[u8]) -> u32 {
    let start = mix64(key ^ u64::from(nonce).rotate_left(40) ^ CHECKSUM_DOMAIN);
    let folded = fnv1a(start, ciphertext);
    (mix64(folded ^ key) >> 32) as u32
}
