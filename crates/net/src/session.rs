//! Owned session value tying transport, handshake, and channel together.
//!
//! A session is one connection attempt with one peer. Every receive takes a
//! timeout and returns `Ok(None)` when nothing arrived in time; any transport
//! failure tears the session down so that no key material outlives the socket.

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tictactoe_core::{BoardSnapshot, BoardSource, Player};
use tracing::{debug, info, trace, warn};

use crate::channel::{SecureChannel, SecurityMode};
use crate::error::{NetError, Result};
use crate::handshake::{ClientDialect, HandshakeState, Negotiator};
use crate::packet::{truncate_utf8, Packet, PacketKind};
use crate::transport::{deadline_after, time_left, Transport};

/// Passphrase used when none (or an empty one) is configured.
pub const DEFAULT_PASSPHRASE: &str = "tictactoe-cx-lan-default";

/// Longest passphrase kept, in bytes.
pub const MAX_PASSPHRASE_BYTES: usize = 63;

/// Packets held back while the caller waits for a different kind.
pub const PENDING_LIMIT: usize = 32;

/// Once a frame starts arriving, the rest must follow within this window.
pub const FRAME_COMPLETION_TIMEOUT: Duration = Duration::from_secs(2);

/// Which end of the connection this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    /// Neither listening nor connected.
    #[default]
    None,
    /// Listened and accepted the peer.
    Host,
    /// Connected out to the peer.
    Client,
}

/// One peer connection and its security state.
pub struct Session {
    role: Role,
    passphrase: String,
    transport: Transport,
    channel: Option<SecureChannel>,
    handshake_state: HandshakeState,
    client_dialect: ClientDialect,
    pending: VecDeque<Packet>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("connected", &self.is_connected())
            .field("security_mode", &self.security_mode())
            .field("handshake_state", &self.handshake_state)
            .field("peer_addr", &self.transport.peer_addr())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Idle session using [`DEFAULT_PASSPHRASE`].
    pub fn new() -> Self {
        Self {
            role: Role::None,
            passphrase: DEFAULT_PASSPHRASE.to_string(),
            transport: Transport::new(),
            channel: None,
            handshake_state: HandshakeState::Idle,
            client_dialect: ClientDialect::default(),
            pending: VecDeque::new(),
        }
    }

    /// Set the shared secret for the next handshake.
    ///
    /// Empty input selects [`DEFAULT_PASSPHRASE`]; input longer than
    /// [`MAX_PASSPHRASE_BYTES`] is cut at the last char boundary that fits.
    pub fn set_passphrase(&mut self, passphrase: &str) {
        if passphrase.is_empty() {
            debug!("Empty passphrase, using default");
            self.passphrase = DEFAULT_PASSPHRASE.to_string();
            return;
        }
        let kept = truncate_utf8(passphrase, MAX_PASSPHRASE_BYTES);
        if kept.len() < passphrase.len() {
            warn!(
                "Passphrase truncated to {} bytes",
                MAX_PASSPHRASE_BYTES
            );
        }
        self.passphrase = kept.to_string();
    }

    /// Dialects a client session may try during [`Session::secure_handshake`].
    pub fn set_client_dialect(&mut self, dialect: ClientDialect) {
        self.client_dialect = dialect;
    }

    /// Start listening on `port` (0 picks a free one). Returns the bound address.
    pub fn host(&mut self, port: u16) -> Result<SocketAddr> {
        self.close();
        let addr = self.transport.listen(port)?;
        self.role = Role::Host;
        Ok(addr)
    }

    /// Wait up to `timeout` for the peer. `Ok(None)` when nobody connected.
    pub fn accept(&mut self, timeout: Duration) -> Result<Option<SocketAddr>> {
        if self.role != Role::Host || !self.transport.is_listening() {
            return Err(NetError::NotListening);
        }
        let peer = self.transport.accept(timeout)?;
        if let Some(addr) = peer {
            info!("Peer {} joined", addr);
        }
        Ok(peer)
    }

    /// Connect to a host.
    pub fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> Result<SocketAddr> {
        self.close();
        let addr = self.transport.connect(host, port, timeout)?;
        self.role = Role::Client;
        Ok(addr)
    }

    /// Authenticate the peer and install a secure channel.
    ///
    /// Each handshake starts from a clean security state. On failure the
    /// connection is closed.
    pub fn secure_handshake(&mut self, timeout: Duration) -> Result<SecurityMode> {
        if !self.transport.is_connected() || self.role == Role::None {
            return Err(NetError::NotConnected);
        }
        self.channel = None;
        self.pending.clear();

        let mut negotiator = Negotiator::new(&mut self.transport, &self.passphrase, timeout);
        let result = match self.role {
            Role::Host => negotiator.run_host(),
            _ => negotiator.run_client(self.client_dialect),
        };
        self.handshake_state = negotiator.state();

        match result {
            Ok(channel) => {
                let mode = channel.mode();
                if mode == SecurityMode::Legacy {
                    warn!(
                        "Peer {:?} negotiated the legacy channel; traffic is only weakly protected",
                        self.transport.peer_addr()
                    );
                }
                self.channel = Some(channel);
                Ok(mode)
            }
            Err(e) => {
                self.teardown();
                Err(e)
            }
        }
    }

    /// True once a handshake installed a channel on a live connection.
    pub fn is_secure(&self) -> bool {
        self.channel.is_some() && self.transport.is_connected()
    }

    /// Release sockets and wipe keys. Safe to call repeatedly.
    pub fn close(&mut self) {
        let was_open = self.transport.is_connected() || self.transport.is_listening();
        self.teardown();
        self.role = Role::None;
        self.handshake_state = HandshakeState::Idle;
        if was_open {
            info!("Session closed");
        }
    }

    fn teardown(&mut self) {
        self.transport.close();
        // Dropping the channel zeroizes its keys.
        self.channel = None;
        self.pending.clear();
    }

    /// Current role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// True while a peer stream is open.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Dialect of the installed channel, or [`SecurityMode::None`].
    pub fn security_mode(&self) -> SecurityMode {
        self.channel
            .as_ref()
            .map_or(SecurityMode::None, SecureChannel::mode)
    }

    /// State reached by the last handshake.
    pub fn handshake_state(&self) -> HandshakeState {
        self.handshake_state
    }

    /// Local socket address, if listening or connected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    /// Address of the current or last peer.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.transport.peer_addr()
    }

    /// Seal and send one packet.
    pub fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        if !self.transport.is_connected() {
            return Err(NetError::NotConnected);
        }
        let channel = self.channel.as_mut().ok_or(NetError::NotSecure)?;
        let frame = channel.seal(packet)?;

        if let Err(e) = self.transport.write_all(&frame) {
            warn!("Send failed, closing session: {}", e);
            self.teardown();
            return Err(e);
        }
        trace!("Sent {:?} packet", packet.kind);
        Ok(())
    }

    /// Send a move.
    pub fn send_move(&mut self, row: u8, col: u8) -> Result<()> {
        self.send_packet(&Packet::movement(row, col))
    }

    /// Wait for the peer's next move.
    pub fn receive_move(&mut self, timeout: Duration) -> Result<Option<(u8, u8)>> {
        Ok(self
            .receive_kind(PacketKind::Move, timeout)?
            .map(|packet| (packet.row, packet.col)))
    }

    /// Send the board and whose turn it is.
    pub fn sync_board(&mut self, board: &impl BoardSource) -> Result<()> {
        self.send_packet(&Packet::sync(board.snapshot(), board.current_player()))
    }

    /// Wait for a board sync.
    pub fn receive_sync(&mut self, timeout: Duration) -> Result<Option<(BoardSnapshot, Player)>> {
        Ok(self
            .receive_kind(PacketKind::Sync, timeout)?
            .map(|packet| (packet.board, packet.current_player)))
    }

    /// Send a chat line, truncated to the packet's text capacity.
    pub fn send_chat(&mut self, text: &str) -> Result<()> {
        self.send_packet(&Packet::chat(text))
    }

    /// Wait for a chat line.
    pub fn receive_chat(&mut self, timeout: Duration) -> Result<Option<String>> {
        Ok(self
            .receive_kind(PacketKind::Chat, timeout)?
            .map(|packet| packet.message))
    }

    /// Send a payload-free packet such as Reset or Quit.
    pub fn send_control(&mut self, kind: PacketKind) -> Result<()> {
        self.send_packet(&Packet::control(kind))
    }

    /// Next packet of any kind, queued packets first.
    pub fn receive_packet(&mut self, timeout: Duration) -> Result<Option<Packet>> {
        if let Some(packet) = self.pending.pop_front() {
            return Ok(Some(packet));
        }
        self.read_frame(timeout)
    }

    fn receive_kind(&mut self, kind: PacketKind, timeout: Duration) -> Result<Option<Packet>> {
        if let Some(pos) = self.pending.iter().position(|p| p.kind == kind) {
            return Ok(self.pending.remove(pos));
        }

        let deadline = deadline_after(timeout);
        loop {
            match self.read_frame(time_left(deadline))? {
                Some(packet) if packet.kind == kind => return Ok(Some(packet)),
                Some(packet) => self.hold(packet)?,
                None => return Ok(None),
            }
        }
    }

    /// Queue a packet the caller is not waiting for yet.
    ///
    /// A full queue sheds its oldest chat line. Game-state packets are never
    /// shed: with no chat left to drop the packet is refused with
    /// [`NetError::PendingOverflow`].
    fn hold(&mut self, packet: Packet) -> Result<()> {
        if self.pending.len() >= PENDING_LIMIT {
            let chat = self
                .pending
                .iter()
                .position(|p| p.kind == PacketKind::Chat);
            match chat {
                Some(pos) => {
                    self.pending.remove(pos);
                    warn!("Pending queue full, dropped oldest chat line");
                }
                None => {
                    warn!("Pending queue full, refusing {:?} packet", packet.kind);
                    return Err(NetError::PendingOverflow(packet.kind));
                }
            }
        }
        debug!("Holding {:?} packet for later", packet.kind);
        self.pending.push_back(packet);
        Ok(())
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Packet>> {
        if !self.transport.is_connected() {
            return Err(NetError::NotConnected);
        }
        let frame_len = self
            .channel
            .as_ref()
            .ok_or(NetError::NotSecure)?
            .frame_len();

        match self.transport.wait_readable(timeout) {
            Ok(true) => {}
            Ok(false) => return Ok(None),
            Err(e) => {
                info!("Peer connection lost: {}", e);
                self.teardown();
                return Err(e);
            }
        }

        let mut frame = vec![0u8; frame_len];
        if let Err(e) = self
            .transport
            .read_exact(&mut frame, FRAME_COMPLETION_TIMEOUT)
        {
            warn!("Incomplete frame, closing session: {}", e);
            self.teardown();
            return Err(e);
        }

        let channel = self.channel.as_mut().ok_or(NetError::NotSecure)?;
        match channel.open(&frame) {
            Ok(packet) => {
                trace!("Received {:?} packet", packet.kind);
                Ok(Some(packet))
            }
            Err(e) => {
                warn!("Rejected frame from peer: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_idle() {
        let session = Session::new();
        assert_eq!(session.role(), Role::None);
        assert!(!session.is_connected());
        assert!(!session.is_secure());
        assert_eq!(session.security_mode(), SecurityMode::None);
        assert_eq!(session.handshake_state(), HandshakeState::Idle);
        assert!(session.peer_addr().is_none());
    }

    #[test]
    fn test_empty_passphrase_uses_default() {
        let mut session = Session::new();
        session.set_passphrase("custom");
        assert_eq!(session.passphrase, "custom");
        session.set_passphrase("");
        assert_eq!(session.passphrase, DEFAULT_PASSPHRASE);
    }

    #[test]
    fn test_long_passphrase_truncated_on_char_boundary() {
        let mut session = Session::new();
        session.set_passphrase(&"a".repeat(100));
        assert_eq!(session.passphrase.len(), MAX_PASSPHRASE_BYTES);

        // 62 ASCII bytes then a 2-byte char straddling the limit.
        let mut text = "b".repeat(62);
        text.push('é');
        session.set_passphrase(&text);
        assert_eq!(session.passphrase, "b".repeat(62));
    }

    #[test]
    fn test_io_before_connect_fails() {
        let mut session = Session::new();
        assert!(matches!(
            session.send_move(0, 0),
            Err(NetError::NotConnected)
        ));
        assert!(matches!(
            session.receive_move(Duration::from_millis(10)),
            Err(NetError::NotConnected)
        ));
        assert!(matches!(
            session.secure_handshake(Duration::from_millis(10)),
            Err(NetError::NotConnected)
        ));
        assert!(matches!(
            session.accept(Duration::from_millis(10)),
            Err(NetError::NotListening)
        ));
    }

    #[test]
    fn test_host_then_close() {
        let mut session = Session::new();
        let addr = session.host(0).unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(session.role(), Role::Host);
        assert!(session.accept(Duration::from_millis(20)).unwrap().is_none());

        session.close();
        session.close();
        assert_eq!(session.role(), Role::None);
        assert!(session.local_addr().is_none());
    }

    #[test]
    fn test_debug_hides_passphrase() {
        let mut session = Session::new();
        session.set_passphrase("hunter2hunter2");
        assert!(!format!("{session:?}").contains("hunter2"));
    }

    #[test]
    fn test_full_queue_sheds_chat_first() {
        let mut session = Session::new();
        session.hold(Packet::chat("oldest")).unwrap();
        for i in 1..PENDING_LIMIT {
            session.hold(Packet::movement(i as u8, 0)).unwrap();
        }

        session.hold(Packet::movement(9, 9)).unwrap();
        assert_eq!(session.pending.len(), PENDING_LIMIT);
        assert!(session.pending.iter().all(|p| p.kind == PacketKind::Move));
        assert_eq!(session.pending.front().map(|p| p.row), Some(1));
    }

    #[test]
    fn test_full_queue_of_moves_refuses_instead_of_dropping() {
        let mut session = Session::new();
        for i in 0..PENDING_LIMIT {
            session.hold(Packet::movement(i as u8, 0)).unwrap();
        }

        assert!(matches!(
            session.hold(Packet::control(PacketKind::Quit)),
            Err(NetError::PendingOverflow(PacketKind::Quit))
        ));
        assert_eq!(session.pending.len(), PENDING_LIMIT);
        assert_eq!(session.pending.front().map(|p| p.row), Some(0));
    }

    #[test]
    fn test_accept_with_unbounded_timeout() {
        let mut session = Session::new();
        let port = session.host(0).unwrap().port();

        let peer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            std::net::TcpStream::connect(("127.0.0.1", port)).unwrap()
        });

        let accepted = session.accept(Duration::MAX).unwrap();
        assert!(accepted.is_some());
        assert!(session.is_connected());
        drop(peer.join().unwrap());
    }
}
