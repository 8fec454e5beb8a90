//! Loopback tests driving two sessions through handshake and play.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use tictactoe_core::{Board, Player};
use tictactoe_net::{
    legacy_proof, legacy_seed, legacy_session_key, ClientDialect, Dialect, HandshakeState,
    LegacyChannel, LegacyHello, NetError, Packet, PacketKind, Role, SecurityMode, Session,
    DEFAULT_PORT, LEGACY_FRAME_SIZE, LEGACY_HELLO_SIZE, MSG_CLIENT_HELLO, MSG_SERVER_HELLO,
};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const ACCEPT_WAIT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct Pair {
    host: Session,
    host_result: tictactoe_net::Result<SecurityMode>,
    client: Session,
    client_result: tictactoe_net::Result<SecurityMode>,
}

fn handshake_pair(port: u16, host_pass: &str, client_pass: &str, dialect: ClientDialect) -> Pair {
    let mut host = Session::new();
    host.set_passphrase(host_pass);
    let port = host.host(port).expect("listen").port();

    let host_thread = thread::spawn(move || {
        let peer = host.accept(ACCEPT_WAIT).expect("accept");
        assert!(peer.is_some(), "client never connected");
        let result = host.secure_handshake(HANDSHAKE_TIMEOUT);
        (host, result)
    });

    let mut client = Session::new();
    client.set_passphrase(client_pass);
    client.set_client_dialect(dialect);
    client
        .connect("127.0.0.1", port, CONNECT_TIMEOUT)
        .expect("connect");
    let client_result = client.secure_handshake(HANDSHAKE_TIMEOUT);

    let (host, host_result) = host_thread.join().expect("host thread panicked");
    Pair {
        host,
        host_result,
        client,
        client_result,
    }
}

fn secure_pair(dialect: ClientDialect) -> (Session, Session) {
    let pair = handshake_pair(0, "swordfish", "swordfish", dialect);
    pair.host_result.expect("host handshake");
    pair.client_result.expect("client handshake");
    (pair.host, pair.client)
}

#[test]
fn move_is_delivered_exactly_once_on_default_port() {
    let pair = handshake_pair(
        DEFAULT_PORT,
        "swordfish",
        "swordfish",
        ClientDialect::default(),
    );
    assert_eq!(pair.host_result.unwrap(), SecurityMode::Modern);
    assert_eq!(pair.client_result.unwrap(), SecurityMode::Modern);

    let (mut host, mut client) = (pair.host, pair.client);
    assert_eq!(host.role(), Role::Host);
    assert_eq!(client.role(), Role::Client);
    assert!(host.is_secure() && client.is_secure());
    assert_eq!(
        host.handshake_state(),
        HandshakeState::Authenticated(Dialect::Modern)
    );

    client.send_move(1, 2).unwrap();
    assert_eq!(host.receive_move(RECV_TIMEOUT).unwrap(), Some((1, 2)));
    assert_eq!(
        host.receive_move(Duration::from_millis(200)).unwrap(),
        None
    );

    host.close();
    client.close();
}

#[test]
fn traffic_flows_both_ways() {
    let (mut host, mut client) = secure_pair(ClientDialect::ModernOnly);

    host.send_move(0, 0).unwrap();
    assert_eq!(client.receive_move(RECV_TIMEOUT).unwrap(), Some((0, 0)));

    client.send_move(2, 2).unwrap();
    assert_eq!(host.receive_move(RECV_TIMEOUT).unwrap(), Some((2, 2)));

    host.send_chat("good game").unwrap();
    assert_eq!(
        client.receive_chat(RECV_TIMEOUT).unwrap().as_deref(),
        Some("good game")
    );
}

#[test]
fn passphrase_mismatch_fails_on_both_sides() {
    let pair = handshake_pair(0, "swordfish", "marlin", ClientDialect::default());

    assert!(matches!(
        pair.host_result,
        Err(NetError::AuthenticationFailed)
    ));
    assert!(pair.client_result.is_err());

    assert!(!pair.host.is_connected());
    assert!(!pair.client.is_connected());
    assert!(!pair.host.is_secure());
    assert!(!pair.client.is_secure());
    assert_eq!(pair.host.handshake_state(), HandshakeState::Failed);
    assert_eq!(pair.client.handshake_state(), HandshakeState::Failed);
}

#[test]
fn legacy_only_peer_gets_legacy_channel() {
    let pair = handshake_pair(0, "swordfish", "swordfish", ClientDialect::LegacyOnly);
    assert_eq!(pair.host_result.unwrap(), SecurityMode::Legacy);
    assert_eq!(pair.client_result.unwrap(), SecurityMode::Legacy);

    let (mut host, mut client) = (pair.host, pair.client);
    assert_eq!(host.security_mode(), SecurityMode::Legacy);
    assert_eq!(
        host.handshake_state(),
        HandshakeState::Authenticated(Dialect::Legacy)
    );

    client.send_move(1, 0).unwrap();
    assert_eq!(host.receive_move(RECV_TIMEOUT).unwrap(), Some((1, 0)));
    host.send_chat("hello from the past").unwrap();
    assert_eq!(
        client.receive_chat(RECV_TIMEOUT).unwrap().as_deref(),
        Some("hello from the past")
    );
}

#[test]
fn legacy_passphrase_mismatch_is_rejected() {
    let pair = handshake_pair(0, "swordfish", "marlin", ClientDialect::LegacyOnly);
    assert!(matches!(
        pair.host_result,
        Err(NetError::AuthenticationFailed)
    ));
    assert!(pair.client_result.is_err());
    assert!(!pair.client.is_secure());
}

#[test]
fn chat_arriving_while_waiting_for_move_is_kept() {
    let (mut host, mut client) = secure_pair(ClientDialect::default());

    client.send_chat("gl hf").unwrap();
    client.send_move(0, 2).unwrap();

    assert_eq!(host.receive_move(RECV_TIMEOUT).unwrap(), Some((0, 2)));
    assert_eq!(
        host.receive_chat(RECV_TIMEOUT).unwrap().as_deref(),
        Some("gl hf")
    );
}

#[test]
fn board_sync_roundtrip() {
    let (mut host, mut client) = secure_pair(ClientDialect::default());

    let mut board = Board::new(3).unwrap();
    assert!(board.place(1, 1).unwrap());
    host.sync_board(&board).unwrap();

    let (snapshot, current) = client.receive_sync(RECV_TIMEOUT).unwrap().unwrap();
    assert_eq!(snapshot.get(1, 1).unwrap(), Player::X);
    assert_eq!(snapshot.occupied(), 1);
    assert_eq!(current, Player::O);
}

#[test]
fn control_packets_arrive_in_order() {
    let (mut host, mut client) = secure_pair(ClientDialect::default());

    client.send_control(PacketKind::Reset).unwrap();
    client.send_control(PacketKind::Quit).unwrap();

    let first = host.receive_packet(RECV_TIMEOUT).unwrap().unwrap();
    let second = host.receive_packet(RECV_TIMEOUT).unwrap().unwrap();
    assert_eq!(first.kind, PacketKind::Reset);
    assert_eq!(second.kind, PacketKind::Quit);
}

#[test]
fn close_is_idempotent_and_peer_sees_disconnect() {
    let (mut host, mut client) = secure_pair(ClientDialect::default());

    client.close();
    client.close();
    assert!(!client.is_connected());
    assert!(!client.is_secure());
    assert_eq!(client.security_mode(), SecurityMode::None);
    assert_eq!(client.role(), Role::None);
    assert!(matches!(
        client.send_move(0, 0),
        Err(NetError::NotConnected)
    ));

    assert!(host.receive_move(RECV_TIMEOUT).is_err());
    assert!(!host.is_connected());
    assert!(!host.is_secure());
}

#[test]
fn connect_to_closed_port_fails_fast() {
    let mut scratch = Session::new();
    let port = scratch.host(0).unwrap().port();
    scratch.close();

    let mut client = Session::new();
    assert!(client.connect("127.0.0.1", port, CONNECT_TIMEOUT).is_err());
    assert_eq!(client.role(), Role::None);
}

#[test]
fn unbounded_receive_returns_once_data_arrives() {
    let (mut host, mut client) = secure_pair(ClientDialect::default());

    client.send_move(2, 0).unwrap();
    assert_eq!(host.receive_move(Duration::MAX).unwrap(), Some((2, 0)));

    host.send_chat("no rush").unwrap();
    assert_eq!(
        client.receive_chat(Duration::MAX).unwrap().as_deref(),
        Some("no rush")
    );
}

/// Host side of an old build: hangs up on the modern hello, then answers the
/// legacy hello on the next connection. Returns the first packet it receives.
fn old_legacy_host(listener: TcpListener, passphrase: &str) -> Packet {
    let (first, _) = listener.accept().expect("first accept");
    drop(first);

    let (mut stream, _) = listener.accept().expect("second accept");
    stream
        .set_read_timeout(Some(HANDSHAKE_TIMEOUT))
        .expect("read timeout");

    let mut buf = [0u8; LEGACY_HELLO_SIZE];
    stream.read_exact(&mut buf).expect("legacy hello");
    let hello = LegacyHello::decode(&buf, MSG_CLIENT_HELLO).expect("decode hello");
    let seed = legacy_seed(passphrase);
    assert_eq!(hello.proof, legacy_proof(seed, hello.client_nonce, 0));

    let server_nonce = 0x5eed_0001;
    let reply = LegacyHello {
        msg_type: MSG_SERVER_HELLO,
        client_nonce: hello.client_nonce,
        server_nonce,
        proof: legacy_proof(seed, hello.client_nonce, server_nonce),
    };
    stream.write_all(&reply.encode()).expect("legacy reply");

    let mut channel =
        LegacyChannel::new(legacy_session_key(seed, hello.client_nonce, server_nonce));
    let mut frame = [0u8; LEGACY_FRAME_SIZE];
    stream.read_exact(&mut frame).expect("frame");
    let packet = channel.open(&frame).expect("open frame");

    let answer = channel.seal(&Packet::chat("welcome back")).expect("seal");
    stream.write_all(&answer).expect("answer");
    packet
}

#[test]
fn default_client_falls_back_to_legacy_host() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let host = thread::spawn(move || old_legacy_host(listener, "swordfish"));

    let mut client = Session::new();
    client.set_passphrase("swordfish");
    client
        .connect("127.0.0.1", port, CONNECT_TIMEOUT)
        .expect("connect");
    assert_eq!(
        client.secure_handshake(HANDSHAKE_TIMEOUT).unwrap(),
        SecurityMode::Legacy
    );
    assert_eq!(
        client.handshake_state(),
        HandshakeState::Authenticated(Dialect::Legacy)
    );

    client.send_move(1, 2).unwrap();
    assert_eq!(
        client.receive_chat(RECV_TIMEOUT).unwrap().as_deref(),
        Some("welcome back")
    );

    let packet = host.join().expect("legacy host panicked");
    assert_eq!(packet.kind, PacketKind::Move);
    assert_eq!((packet.row, packet.col), (1, 2));
}

#[test]
fn fallback_gives_up_when_reconnect_is_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let host = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        // Stop listening before hanging up so the retry is refused.
        drop(listener);
        drop(stream);
    });

    let mut client = Session::new();
    client.set_passphrase("swordfish");
    client
        .connect("127.0.0.1", port, CONNECT_TIMEOUT)
        .expect("connect");
    let result = client.secure_handshake(HANDSHAKE_TIMEOUT);
    host.join().expect("host thread panicked");

    assert!(matches!(result, Err(NetError::HandshakeFailed)));
    assert_eq!(client.handshake_state(), HandshakeState::Failed);
    assert!(!client.is_connected());
    assert!(!client.is_secure());
}
