//! Key derivation for both handshake dialects.
//!
//! Modern: PBKDF2-HMAC-SHA256 turns the passphrase and a per-session salt into
//! a base key, then HMAC-SHA256 expands it into one key per traffic direction.
//!
//! Legacy: a 64-bit seed from a non-cryptographic mixing hash of the
//! passphrase, and a single 64-bit session key shared by both directions.
//! Kept only for interoperability with older peers.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// PBKDF2 iteration count.
pub const PBKDF2_ITERATIONS: u32 = 200_000;

/// Symmetric key length in bytes.
pub const KEY_LEN: usize = 32;

/// Salt length carried in the client hello.
pub const SALT_LEN: usize = 16;

/// Handshake nonce length (modern dialect).
pub const NONCE_LEN: usize = 12;

/// HMAC-SHA256 tag length.
pub const MAC_LEN: usize = 32;

/// Direction label for traffic sent by the client.
pub const LABEL_C2S: &[u8; 3] = b"C2S";

/// Direction label for traffic sent by the host.
pub const LABEL_S2C: &[u8; 3] = b"S2C";

/// 256-bit key, wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Stretch the passphrase into the 32-byte base key.
pub fn derive_base_key(passphrase: &str, salt: &[u8; SALT_LEN]) -> SymmetricKey {
    let bytes = pbkdf2::pbkdf2_hmac_array::<Sha256, KEY_LEN>(
        passphrase.as_bytes(),
        salt,
        PBKDF2_ITERATIONS,
    );
    SymmetricKey(bytes)
}

/// Expand the base key into the key for one traffic direction.
///
/// `label` is [`LABEL_C2S`] or [`LABEL_S2C`]; nonce order is always
/// client first.
pub fn derive_direction_key(
    base_key: &SymmetricKey,
    label: &[u8; 3],
    client_nonce: &[u8; NONCE_LEN],
    server_nonce: &[u8; NONCE_LEN],
) -> SymmetricKey {
    SymmetricKey(hmac_sha256(
        base_key.as_bytes(),
        &[label, client_nonce, server_nonce],
    ))
}

/// HMAC-SHA256 over the concatenation of `parts`.
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> [u8; MAC_LEN] {
    let mut mac = new_mac(key);
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// Constant-time check of an HMAC-SHA256 tag.
pub fn verify_hmac_sha256(key: &[u8], parts: &[&[u8]], tag: &[u8]) -> bool {
    let mut mac = new_mac(key);
    for part in parts {
        mac.update(part);
    }
    mac.verify_slice(tag).is_ok()
}

fn new_mac(key: &[u8]) -> HmacSha256 {
    <HmacSha256 as Mac>::new_from_slice(key).expect("hmac accepts any key length")
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
const PROOF_DOMAIN: u64 = 0x5052_4f4f_465f_5631; // "PROOF_V1"
const SESSION_DOMAIN: u64 = 0x5345_5353_4b45_5931; // "SESSKEY1"

/// SplitMix64 finalizer.
pub(crate) fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// FNV-1a byte fold, used by the legacy seed and checksum.
pub(crate) fn fnv1a(mut hash: u64, bytes: &[u8]) -> u64 {
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Deterministic legacy key seed.
pub fn legacy_seed(passphrase: &str) -> u64 {
    mix64(fnv1a(FNV_OFFSET, passphrase.as_bytes()))
}

/// Legacy handshake proof. The client proves with `server_nonce = 0`.
pub fn legacy_proof(seed: u64, client_nonce: u64, server_nonce: u64) -> u32 {
    let mixed = mix64(seed ^ mix64(client_nonce ^ PROOF_DOMAIN) ^ server_nonce.rotate_left(29));
    (mixed >> 32) as u32
}

/// Single legacy session key shared by both directions.
pub fn legacy_session_key(seed: u64, client_nonce: u64, server_nonce: u64) -> u64 {
    mix64(seed.rotate_left(7) ^ mix64(client_nonce) ^ mix64(server_nonce ^ SESSION_DOMAIN))
}
