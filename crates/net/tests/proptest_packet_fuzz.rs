//! Fuzz-style property tests for the packet codec and frame parsers.
//!
//! Decoders face bytes straight off the socket, so none of them may panic.

use proptest::prelude::*;
use tictactoe_core::{BoardSnapshot, Player, MAX_BOARD_SIZE};
use tictactoe_net::{
    classify, ClientHello, LegacyChannel, LegacyHello, ModernChannel, Packet, PacketKind,
    ServerHello, SymmetricKey, FRAME_SIZE, LEGACY_FRAME_SIZE, MAX_CHAT_BYTES, PACKET_SIZE,
};

fn modern_pair() -> (ModernChannel, ModernChannel) {
    let c2s = SymmetricKey::from_bytes([0x11; 32]);
    let s2c = SymmetricKey::from_bytes([0x22; 32]);
    let client = ModernChannel::new(c2s.clone(), s2c.clone(), [1; 4], [2; 4]);
    let host = ModernChannel::new(s2c, c2s, [2; 4], [1; 4]);
    (client, host)
}

fn player_strategy() -> impl Strategy<Value = Player> {
    prop_oneof![Just(Player::None), Just(Player::X), Just(Player::O)]
}

proptest! {
    /// Property: arbitrary bytes don't crash the packet decoder
    #[test]
    fn arbitrary_bytes_dont_crash_packet_decode(
        random_bytes in prop::collection::vec(any::<u8>(), 0..600),
    ) {
        let _result = Packet::decode(&random_bytes);
    }

    /// Property: arbitrary full-size buffers either decode or error cleanly
    #[test]
    fn arbitrary_packet_sized_buffers_dont_crash(
        random_bytes in prop::collection::vec(any::<u8>(), PACKET_SIZE..=PACKET_SIZE),
    ) {
        if let Ok(packet) = Packet::decode(&random_bytes) {
            prop_assert!(packet.message.len() <= MAX_CHAT_BYTES);
        }
    }

    /// Property: garbage never opens on the modern channel
    #[test]
    fn arbitrary_frames_rejected_by_modern_channel(
        random_bytes in prop::collection::vec(any::<u8>(), 0..700),
    ) {
        let (_, mut host) = modern_pair();
        prop_assert!(host.open(&random_bytes).is_err());
        prop_assert_eq!(host.rx_seq(), 0);
    }

    /// Property: garbage of the exact frame size still fails authentication
    #[test]
    fn frame_sized_garbage_rejected_by_modern_channel(
        random_bytes in prop::collection::vec(any::<u8>(), FRAME_SIZE..=FRAME_SIZE),
    ) {
        let (_, mut host) = modern_pair();
        prop_assert!(host.open(&random_bytes).is_err());
    }

    /// Property: arbitrary bytes don't crash the legacy channel
    #[test]
    fn arbitrary_frames_dont_crash_legacy_channel(
        random_bytes in prop::collection::vec(any::<u8>(), 0..700),
        key in any::<u64>(),
    ) {
        let mut channel = LegacyChannel::new(key);
        let _result = channel.open(&random_bytes);
    }

    /// Property: legacy-sized garbage leaves the nonce untouched when rejected
    #[test]
    fn legacy_sized_garbage_keeps_nonce(
        random_bytes in prop::collection::vec(any::<u8>(), LEGACY_FRAME_SIZE..=LEGACY_FRAME_SIZE),
        key in any::<u64>(),
    ) {
        let mut channel = LegacyChannel::new(key);
        if channel.open(&random_bytes).is_err() {
            prop_assert_eq!(channel.rx_nonce(), 0);
        }
    }

    /// Property: handshake parsers don't crash on arbitrary input
    #[test]
    fn arbitrary_bytes_dont_crash_handshake_parsers(
        random_bytes in prop::collection::vec(any::<u8>(), 0..128),
        msg_type in any::<u8>(),
    ) {
        let _ = classify(&random_bytes);
        let _ = ClientHello::decode(&random_bytes);
        let _ = ServerHello::decode(&random_bytes);
        let _ = LegacyHello::decode(&random_bytes, msg_type);
    }

    /// Property: move packets roundtrip through encode/decode
    #[test]
    fn move_packets_roundtrip(row in any::<u8>(), col in any::<u8>()) {
        let packet = Packet::movement(row, col);
        let decoded = Packet::decode(&packet.encode()).unwrap();
        prop_assert_eq!(packet, decoded);
    }

    /// Property: sync packets carry every cell and the side to move
    #[test]
    fn sync_packets_roundtrip(
        cells in prop::collection::vec(player_strategy(), MAX_BOARD_SIZE * MAX_BOARD_SIZE),
        current in player_strategy(),
    ) {
        let mut board = BoardSnapshot::new();
        for (i, player) in cells.iter().enumerate() {
            board.set(i / MAX_BOARD_SIZE, i % MAX_BOARD_SIZE, *player).unwrap();
        }
        let packet = Packet::sync(board, current);
        let decoded = Packet::decode(&packet.encode()).unwrap();
        prop_assert_eq!(decoded.kind, PacketKind::Sync);
        prop_assert_eq!(decoded.board, board);
        prop_assert_eq!(decoded.current_player, current);
    }

    /// Property: chat text survives sealing, truncated on a char boundary
    #[test]
    fn chat_survives_modern_channel(text in "\\PC{0,300}") {
        let (mut client, mut host) = modern_pair();
        let frame = client.seal(&Packet::chat(&text)).unwrap();
        let packet = host.open(&frame).unwrap();

        prop_assert!(packet.message.len() <= MAX_CHAT_BYTES);
        prop_assert!(text.starts_with(&packet.message));
    }

    /// Property: flipping any single bit of a sealed frame is detected
    #[test]
    fn single_bit_flip_is_detected(index in 0..FRAME_SIZE, bit in 0u8..8) {
        let (mut client, mut host) = modern_pair();
        let mut frame = client.seal(&Packet::movement(1, 2)).unwrap();
        frame[index] ^= 1 << bit;
        prop_assert!(host.open(&frame).is_err());
    }
}
