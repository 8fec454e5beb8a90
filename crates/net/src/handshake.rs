//! Passphrase-authenticated handshake with legacy fallback.
//!
//! Modern dialect, two messages:
//!
//! ```text
//! ClientHello (72): [magic "TXH2"][type=1][version][reserved: 2][salt: 16]
//!                   [client_nonce: 12][client_iv_prefix: 4][hmac: 32]
//! ServerHello (84): [magic "TXH2"][type=2][version][reserved: 2][salt: 16]
//!                   [client_nonce: 12][server_nonce: 12][server_iv_prefix: 4][hmac: 32]
//! ```
//!
//! Both HMACs are keyed with the PBKDF2 base key, so a valid hello proves the
//! sender knows the passphrase. Legacy dialect, one 28-byte record each way:
//!
//! ```text
//! [magic "TXH1"][type][reserved: 3][client_nonce: u64][server_nonce: u64][proof: u32]
//! ```
//!
//! The host sniffs the first bytes without consuming them to pick a dialect.
//! The client tries modern first and, unless told otherwise, reconnects and
//! retries with the legacy dialect when that fails.

use std::time::Duration;

use rand::RngCore;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use crate::channel::{ModernChannel, SecureChannel, IV_PREFIX_LEN};
use crate::error::{NetError, Result};
use crate::kdf::{
    derive_base_key, derive_direction_key, hmac_sha256, legacy_proof, legacy_seed,
    legacy_session_key, verify_hmac_sha256, SymmetricKey, LABEL_C2S, LABEL_S2C, MAC_LEN,
    NONCE_LEN, SALT_LEN,
};
use crate::legacy::LegacyChannel;
use crate::transport::Transport;

/// Magic opening every modern handshake message.
pub const MODERN_HANDSHAKE_MAGIC: [u8; 4] = *b"TXH2";

/// Magic opening every legacy handshake record.
pub const LEGACY_HANDSHAKE_MAGIC: [u8; 4] = *b"TXH1";

/// Modern protocol version byte.
pub const PROTOCOL_VERSION: u8 = 2;

/// Message type of the client's opening message (both dialects).
pub const MSG_CLIENT_HELLO: u8 = 1;

/// Message type of the host's reply (both dialects).
pub const MSG_SERVER_HELLO: u8 = 2;

/// Encoded client hello size.
pub const CLIENT_HELLO_SIZE: usize = 4 + 1 + 1 + 2 + SALT_LEN + NONCE_LEN + IV_PREFIX_LEN + MAC_LEN;

/// Encoded server hello size.
pub const SERVER_HELLO_SIZE: usize =
    4 + 1 + 1 + 2 + SALT_LEN + NONCE_LEN + NONCE_LEN + IV_PREFIX_LEN + MAC_LEN;

/// Encoded legacy handshake record size.
pub const LEGACY_HELLO_SIZE: usize = 4 + 1 + 3 + 8 + 8 + 4;

/// Bytes the host peeks to classify a peer.
pub const CLASSIFY_LEN: usize = 6;

const CLIENT_HELLO_SIGNED: usize = CLIENT_HELLO_SIZE - MAC_LEN;
const SERVER_HELLO_SIGNED: usize = SERVER_HELLO_SIZE - MAC_LEN;

/// Handshake wire dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// PBKDF2 + HMAC hello exchange, AEAD channel.
    Modern,
    /// Proof exchange over the legacy seed, legacy channel.
    Legacy,
}

/// Progress of a handshake run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HandshakeState {
    /// Nothing started.
    #[default]
    Idle,
    /// Waiting for the peer's first message.
    AwaitingPeer,
    /// Dialect chosen, exchange in progress.
    Classified(Dialect),
    /// Keys installed.
    Authenticated(Dialect),
    /// Attempt aborted; the connection has been closed.
    Failed,
}

/// Which dialects a client may try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClientDialect {
    /// Modern first, then reconnect and try legacy.
    #[default]
    ModernWithLegacyFallback,
    /// Modern only; fail instead of downgrading.
    ModernOnly,
    /// Legacy only, as an old client would.
    LegacyOnly,
}

/// Decide the dialect from the first [`CLASSIFY_LEN`] bytes of a peer stream.
pub fn classify(prefix: &[u8]) -> Result<Dialect> {
    if prefix.len() < CLASSIFY_LEN {
        return Err(NetError::MalformedHandshake("short handshake prefix"));
    }
    if prefix[..4] == MODERN_HANDSHAKE_MAGIC
        && prefix[4] == MSG_CLIENT_HELLO
        && prefix[5] == PROTOCOL_VERSION
    {
        return Ok(Dialect::Modern);
    }
    if prefix[..4] == LEGACY_HANDSHAKE_MAGIC && prefix[4] == MSG_CLIENT_HELLO {
        return Ok(Dialect::Legacy);
    }
    Err(NetError::UnknownDialect)
}

fn check_modern_header(data: &[u8], msg_type: u8) -> Result<()> {
    if data[..4] != MODERN_HANDSHAKE_MAGIC {
        return Err(NetError::MalformedHandshake("bad magic"));
    }
    if data[4] != msg_type {
        return Err(NetError::MalformedHandshake("unexpected message type"));
    }
    if data[5] != PROTOCOL_VERSION {
        return Err(NetError::MalformedHandshake("unsupported protocol version"));
    }
    Ok(())
}

/// Client's opening message (modern dialect).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    /// PBKDF2 salt for this session.
    pub salt: [u8; SALT_LEN],
    /// Client randomness for key expansion.
    pub client_nonce: [u8; NONCE_LEN],
    /// Prefix of every nonce the client will send under.
    pub client_iv_prefix: [u8; IV_PREFIX_LEN],
    /// HMAC over the preceding fields.
    pub mac: [u8; MAC_LEN],
}

impl ClientHello {
    /// Build and authenticate a hello.
    pub fn new(
        base_key: &SymmetricKey,
        salt: [u8; SALT_LEN],
        client_nonce: [u8; NONCE_LEN],
        client_iv_prefix: [u8; IV_PREFIX_LEN],
    ) -> Self {
        let mut hello = Self {
            salt,
            client_nonce,
            client_iv_prefix,
            mac: [0u8; MAC_LEN],
        };
        hello.mac = hmac_sha256(base_key.as_bytes(), &[&hello.signed_bytes()]);
        hello
    }

    fn signed_bytes(&self) -> [u8; CLIENT_HELLO_SIGNED] {
        let mut out = [0u8; CLIENT_HELLO_SIGNED];
        out[..4].copy_from_slice(&MODERN_HANDSHAKE_MAGIC);
        out[4] = MSG_CLIENT_HELLO;
        out[5] = PROTOCOL_VERSION;
        let mut at = 8;
        out[at..at + SALT_LEN].copy_from_slice(&self.salt);
        at += SALT_LEN;
        out[at..at + NONCE_LEN].copy_from_slice(&self.client_nonce);
        at += NONCE_LEN;
        out[at..at + IV_PREFIX_LEN].copy_from_slice(&self.client_iv_prefix);
        out
    }

    /// Serialize to the wire layout.
    pub fn encode(&self) -> [u8; CLIENT_HELLO_SIZE] {
        let mut out = [0u8; CLIENT_HELLO_SIZE];
        out[..CLIENT_HELLO_SIGNED].copy_from_slice(&self.signed_bytes());
        out[CLIENT_HELLO_SIGNED..].copy_from_slice(&self.mac);
        out
    }

    /// Parse and check the header. Does not verify the MAC.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != CLIENT_HELLO_SIZE {
            return Err(NetError::MalformedHandshake("unexpected client hello size"));
        }
        check_modern_header(data, MSG_CLIENT_HELLO)?;

        let mut hello = Self {
            salt: [0u8; SALT_LEN],
            client_nonce: [0u8; NONCE_LEN],
            client_iv_prefix: [0u8; IV_PREFIX_LEN],
            mac: [0u8; MAC_LEN],
        };
        let mut at = 8;
        hello.salt.copy_from_slice(&data[at..at + SALT_LEN]);
        at += SALT_LEN;
        hello.client_nonce.copy_from_slice(&data[at..at + NONCE_LEN]);
        at += NONCE_LEN;
        hello
            .client_iv_prefix
            .copy_from_slice(&data[at..at + IV_PREFIX_LEN]);
        hello.mac.copy_from_slice(&data[CLIENT_HELLO_SIGNED..]);
        Ok(hello)
    }

    /// Constant-time MAC check against a base key.
    pub fn verify(&self, base_key: &SymmetricKey) -> bool {
        verify_hmac_sha256(base_key.as_bytes(), &[&self.signed_bytes()], &self.mac)
    }
}

/// Host's reply (modern dialect).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    /// Echo of the client's salt.
    pub salt: [u8; SALT_LEN],
    /// Echo of the client's nonce.
    pub client_nonce: [u8; NONCE_LEN],
    /// Host randomness for key expansion.
    pub server_nonce: [u8; NONCE_LEN],
    /// Prefix of every nonce the host will send under.
    pub server_iv_prefix: [u8; IV_PREFIX_LEN],
    /// HMAC over the preceding fields.
    pub mac: [u8; MAC_LEN],
}

impl ServerHello {
    /// Build and authenticate a reply to `client`.
    pub fn new(
        base_key: &SymmetricKey,
        client: &ClientHello,
        server_nonce: [u8; NONCE_LEN],
        server_iv_prefix: [u8; IV_PREFIX_LEN],
    ) -> Self {
        let mut hello = Self {
            salt: client.salt,
            client_nonce: client.client_nonce,
            server_nonce,
            server_iv_prefix,
            mac: [0u8; MAC_LEN],
        };
        hello.mac = hmac_sha256(base_key.as_bytes(), &[&hello.signed_bytes()]);
        hello
    }

    fn signed_bytes(&self) -> [u8; SERVER_HELLO_SIGNED] {
        let mut out = [0u8; SERVER_HELLO_SIGNED];
        out[..4].copy_from_slice(&MODERN_HANDSHAKE_MAGIC);
        out[4] = MSG_SERVER_HELLO;
        out[5] = PROTOCOL_VERSION;
        let mut at = 8;
        out[at..at + SALT_LEN].copy_from_slice(&self.salt);
        at += SALT_LEN;
        out[at..at + NONCE_LEN].copy_from_slice(&self.client_nonce);
        at += NONCE_LEN;
        out[at..at + NONCE_LEN].copy_from_slice(&self.server_nonce);
        at += NONCE_LEN;
        out[at..at + IV_PREFIX_LEN].copy_from_slice(&self.server_iv_prefix);
        out
    }

    /// Serialize to the wire layout.
    pub fn encode(&self) -> [u8; SERVER_HELLO_SIZE] {
        let mut out = [0u8; SERVER_HELLO_SIZE];
        out[..SERVER_HELLO_SIGNED].copy_from_slice(&self.signed_bytes());
        out[SERVER_HELLO_SIGNED..].copy_from_slice(&self.mac);
        out
    }

    /// Parse and check the header. Does not verify the MAC.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != SERVER_HELLO_SIZE {
            return Err(NetError::MalformedHandshake("unexpected server hello size"));
        }
        check_modern_header(data, MSG_SERVER_HELLO)?;

        let mut hello = Self {
            salt: [0u8; SALT_LEN],
            client_nonce: [0u8; NONCE_LEN],
            server_nonce: [0u8; NONCE_LEN],
            server_iv_prefix: [0u8; IV_PREFIX_LEN],
            mac: [0u8; MAC_LEN],
        };
        let mut at = 8;
        hello.salt.copy_from_slice(&data[at..at + SALT_LEN]);
        at += SALT_LEN;
        hello.client_nonce.copy_from_slice(&data[at..at + NONCE_LEN]);
        at += NONCE_LEN;
        hello.server_nonce.copy_from_slice(&data[at..at + NONCE_LEN]);
        at += NONCE_LEN;
        hello
            .server_iv_prefix
            .copy_from_slice(&data[at..at + IV_PREFIX_LEN]);
        hello.mac.copy_from_slice(&data[SERVER_HELLO_SIGNED..]);
        Ok(hello)
    }

    /// Constant-time MAC check against a base key.
    pub fn verify(&self, base_key: &SymmetricKey) -> bool {
        verify_hmac_sha256(base_key.as_bytes(), &[&self.signed_bytes()], &self.mac)
    }
}

/// Legacy handshake record, same layout in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyHello {
    /// [`MSG_CLIENT_HELLO`] or [`MSG_SERVER_HELLO`].
    pub msg_type: u8,
    /// Client randomness.
    pub client_nonce: u64,
    /// Host randomness; zero in the client's record.
    pub server_nonce: u64,
    /// Keyed proof over the seed and nonces.
    pub proof: u32,
}

impl LegacyHello {
    /// Serialize to the wire layout.
    pub fn encode(&self) -> [u8; LEGACY_HELLO_SIZE] {
        let mut out = [0u8; LEGACY_HELLO_SIZE];
        out[..4].copy_from_slice(&LEGACY_HANDSHAKE_MAGIC);
        out[4] = self.msg_type;
        out[8..16].copy_from_slice(&self.client_nonce.to_be_bytes());
        out[16..24].copy_from_slice(&self.server_nonce.to_be_bytes());
        out[24..28].copy_from_slice(&self.proof.to_be_bytes());
        out
    }

    /// Parse a record of the given type.
    pub fn decode(data: &[u8], msg_type: u8) -> Result<Self> {
        if data.len() != LEGACY_HELLO_SIZE {
            return Err(NetError::MalformedHandshake("unexpected legacy record size"));
        }
        if data[..4] != LEGACY_HANDSHAKE_MAGIC {
            return Err(NetError::MalformedHandshake("bad magic"));
        }
        if data[4] != msg_type {
            return Err(NetError::MalformedHandshake("unexpected message type"));
        }

        let mut word = [0u8; 8];
        word.copy_from_slice(&data[8..16]);
        let client_nonce = u64::from_be_bytes(word);
        word.copy_from_slice(&data[16..24]);
        let server_nonce = u64::from_be_bytes(word);
        let proof = u32::from_be_bytes([data[24], data[25], data[26], data[27]]);

        Ok(Self {
            msg_type,
            client_nonce,
            server_nonce,
            proof,
        })
    }
}

fn random_array<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

fn random_nonzero_u64() -> u64 {
    let mut rng = rand::thread_rng();
    loop {
        let value = rng.next_u64();
        if value != 0 {
            return value;
        }
    }
}

/// One handshake run over an already connected transport.
///
/// On failure the transport is closed and no key material survives.
pub struct Negotiator<'a> {
    transport: &'a mut Transport,
    passphrase: &'a str,
    timeout: Duration,
    state: HandshakeState,
}

impl<'a> Negotiator<'a> {
    /// Prepare a run; `timeout` bounds each handshake read.
    pub fn new(transport: &'a mut Transport, passphrase: &'a str, timeout: Duration) -> Self {
        Self {
            transport,
            passphrase,
            timeout,
            state: HandshakeState::Idle,
        }
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Host role: classify the peer and answer in its dialect.
    pub fn run_host(&mut self) -> Result<SecureChannel> {
        let result = self.host_exchange();
        self.finish(result)
    }

    /// Client role: run the exchange permitted by `dialect`.
    pub fn run_client(&mut self, dialect: ClientDialect) -> Result<SecureChannel> {
        let result = match dialect {
            ClientDialect::ModernOnly => self.client_exchange(Dialect::Modern),
            ClientDialect::LegacyOnly => self.client_exchange(Dialect::Legacy),
            ClientDialect::ModernWithLegacyFallback => self.client_with_fallback(),
        };
        self.finish(result)
    }

    fn finish(&mut self, result: Result<SecureChannel>) -> Result<SecureChannel> {
        match result {
            Ok(channel) => {
                let dialect = match channel {
                    SecureChannel::Modern(_) => Dialect::Modern,
                    SecureChannel::Legacy(_) => Dialect::Legacy,
                };
                self.state = HandshakeState::Authenticated(dialect);
                info!("Secure handshake complete ({:?})", dialect);
                Ok(channel)
            }
            Err(e) => {
                warn!("Secure handshake failed: {}", e);
                self.state = HandshakeState::Failed;
                self.transport.close();
                Err(e)
            }
        }
    }

    fn host_exchange(&mut self) -> Result<SecureChannel> {
        self.state = HandshakeState::AwaitingPeer;
        let mut prefix = [0u8; CLASSIFY_LEN];
        self.transport.peek_exact(&mut prefix, self.timeout)?;

        let dialect = classify(&prefix)?;
        self.state = HandshakeState::Classified(dialect);
        debug!("Peer classified as {:?}", dialect);

        match dialect {
            Dialect::Modern => self.host_modern(),
            Dialect::Legacy => self.host_legacy(),
        }
    }

    fn host_modern(&mut self) -> Result<SecureChannel> {
        let mut buf = [0u8; CLIENT_HELLO_SIZE];
        self.transport.read_exact(&mut buf, self.timeout)?;
        let client = ClientHello::decode(&buf)?;

        let base_key = derive_base_key(self.passphrase, &client.salt);
        if !client.verify(&base_key) {
            return Err(NetError::AuthenticationFailed);
        }

        let server = ServerHello::new(&base_key, &client, random_array(), random_array());
        self.transport.write_all(&server.encode())?;

        let c2s = derive_direction_key(
            &base_key,
            LABEL_C2S,
            &client.client_nonce,
            &server.server_nonce,
        );
        let s2c = derive_direction_key(
            &base_key,
            LABEL_S2C,
            &client.client_nonce,
            &server.server_nonce,
        );
        Ok(SecureChannel::Modern(ModernChannel::new(
            s2c,
            c2s,
            server.server_iv_prefix,
            client.client_iv_prefix,
        )))
    }

    fn host_legacy(&mut self) -> Result<SecureChannel> {
        let mut buf = [0u8; LEGACY_HELLO_SIZE];
        self.transport.read_exact(&mut buf, self.timeout)?;
        let client = LegacyHello::decode(&buf, MSG_CLIENT_HELLO)?;

        let seed = legacy_seed(self.passphrase);
        let expected = legacy_proof(seed, client.client_nonce, 0);
        if !bool::from(expected.ct_eq(&client.proof)) {
            return Err(NetError::AuthenticationFailed);
        }

        let server_nonce = random_nonzero_u64();
        let reply = LegacyHello {
            msg_type: MSG_SERVER_HELLO,
            client_nonce: client.client_nonce,
            server_nonce,
            proof: legacy_proof(seed, client.client_nonce, server_nonce),
        };
        self.transport.write_all(&reply.encode())?;

        let key = legacy_session_key(seed, client.client_nonce, server_nonce);
        Ok(SecureChannel::Legacy(LegacyChannel::new(key)))
    }

    fn client_with_fallback(&mut self) -> Result<SecureChannel> {
        let modern_err = match self.client_exchange(Dialect::Modern) {
            Ok(channel) => return Ok(channel),
            Err(e) => e,
        };

        warn!(
            "Modern handshake failed ({}); downgrading to legacy dialect",
            modern_err
        );
        let addr = self.transport.peer_addr().ok_or(NetError::NotConnected)?;
        if let Err(e) = self.transport.connect_addr(addr, self.timeout) {
            debug!("Legacy reconnect to {} failed: {}", addr, e);
            return Err(NetError::HandshakeFailed);
        }

        match self.client_exchange(Dialect::Legacy) {
            Ok(channel) => {
                warn!("Session with {} is using the legacy channel", addr);
                Ok(channel)
            }
            Err(e) => {
                debug!("Legacy handshake failed: {}", e);
                Err(NetError::HandshakeFailed)
            }
        }
    }

    fn client_exchange(&mut self, dialect: Dialect) -> Result<SecureChannel> {
        self.state = HandshakeState::Classified(dialect);
        match dialect {
            Dialect::Modern => self.client_modern(),
            Dialect::Legacy => self.client_legacy(),
        }
    }

    fn client_modern(&mut self) -> Result<SecureChannel> {
        let salt: [u8; SALT_LEN] = random_array();
        let base_key = derive_base_key(self.passphrase, &salt);
        let client = ClientHello::new(&base_key, salt, random_array(), random_array());
        self.transport.write_all(&client.encode())?;

        let mut buf = [0u8; SERVER_HELLO_SIZE];
        self.transport.read_exact(&mut buf, self.timeout)?;
        let server = ServerHello::decode(&buf)?;

        if server.salt != client.salt || server.client_nonce != client.client_nonce {
            return Err(NetError::MalformedHandshake("server hello echo mismatch"));
        }
        if !server.verify(&base_key) {
            return Err(NetError::AuthenticationFailed);
        }

        let c2s = derive_direction_key(
            &base_key,
            LABEL_C2S,
            &client.client_nonce,
            &server.server_nonce,
        );
        let s2c = derive_direction_key(
            &base_key,
            LABEL_S2C,
            &client.client_nonce,
            &server.server_nonce,
        );
        Ok(SecureChannel::Modern(ModernChannel::new(
            c2s,
            s2c,
            client.client_iv_prefix,
            server.server_iv_prefix,
        )))
    }

    fn client_legacy(&mut self) -> Result<SecureChannel> {
        let seed = legacy_seed(self.passphrase);
        let client_nonce = random_nonzero_u64();
        let hello = LegacyHello {
            msg_type: MSG_CLIENT_HELLO,
            client_nonce,
            server_nonce: 0,
            proof: legacy_proof(seed, client_nonce, 0),
        };
        self.transport.write_all(&hello.encode())?;

        let mut buf = [0u8; LEGACY_HELLO_SIZE];
        self.transport.read_exact(&mut buf, self.timeout)?;
        let reply = LegacyHello::decode(&buf, MSG_SERVER_HELLO)?;

        if reply.client_nonce != client_nonce || reply.server_nonce == 0 {
            return Err(NetError::MalformedHandshake("legacy reply echo mismatch"));
        }
        let expected = legacy_proof(seed, client_nonce, reply.server_nonce);
        if !bool::from(expected.ct_eq(&reply.proof)) {
            return Err(NetError::AuthenticationFailed);
        }

        let key = legacy_session_key(seed, client_nonce, reply.server_nonce);
        Ok(SecureChannel::Legacy(LegacyChannel::new(key)))
    }
}
