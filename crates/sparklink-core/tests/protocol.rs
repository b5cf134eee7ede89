use bytes::BytesMut;
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sparklink_core::protocol::{
    checksum, Command, Frame, FrameSynchronizer, Packet, ProtocolError, CHECKSUM_OFFSET,
    COMMAND_OFFSET, FRAME_SIZE, PAYLOAD_SIZE,
};
use tokio_util::codec::Decoder;

/// Noise that can never contain a start marker byte
fn noise(rng: &mut StdRng, len: usize) -> Vec<u8> {
    (0..len).map(|_| rng.gen_range(0x10..=0xFF)).collect()
}

/// A mixed stream: frames separated by runs of noise of varying length
fn noisy_stream(rng: &mut StdRng, frames: usize) -> (Vec<u8>, Vec<Frame>) {
    let mut stream = Vec::new();
    let mut sent = Vec::new();
    for i in 0..frames {
        let gap = rng.gen_range(0..150);
        stream.extend(noise(rng, gap));
        let len = rng.gen_range(0..=PAYLOAD_SIZE);
        let payload = noise(rng, len);
        let command = Command::ALL[i % Command::ALL.len()];
        let frame = Frame::encode(command.code(), &payload).unwrap();
        stream.extend_from_slice(frame.as_bytes());
        sent.push(frame);
    }
    stream.extend(noise(rng, 7));
    (stream, sent)
}

/// Bytes drawn from `0..6`, so marker pieces, false markers and markers
/// inside payloads all show up often
fn marker_dense(rng: &mut StdRng, len: usize) -> Vec<u8> {
    (0..len).map(|_| rng.gen_range(0..6)).collect()
}

fn decode_in_chunks(stream: &[u8], cuts: &[usize]) -> Vec<Frame> {
    let mut sync = FrameSynchronizer::new();
    let mut buf = BytesMut::new();
    let mut out = Vec::new();

    let mut start = 0;
    for &end in cuts.iter().chain(std::iter::once(&stream.len())) {
        buf.extend_from_slice(&stream[start..end]);
        start = end;
        while let Some(frame) = sync.decode(&mut buf).unwrap() {
            out.push(frame);
        }
    }
    while let Some(frame) = sync.decode_eof(&mut buf).unwrap() {
        out.push(frame);
    }
    out
}

#[test]
fn test_checksum_check_value() {
    assert_eq!(checksum(b"123456789"), 0x29B1);
}

#[test]
fn test_frame_roundtrip_keeps_payload() {
    let payload: Vec<u8> = (0..PAYLOAD_SIZE as u8).collect();
    let frame = Frame::encode(Command::SendMapData.code(), &payload).unwrap();
    let parsed = Frame::from_bytes(frame.as_bytes()).unwrap();

    assert_eq!(parsed.known_command(), Some(Command::SendMapData));
    assert_eq!(parsed.payload(), &payload[..]);
    assert_eq!(
        parsed.checksum(),
        checksum(&frame.as_bytes()[COMMAND_OFFSET..CHECKSUM_OFFSET])
    );
}

#[test]
fn test_every_single_bit_flip_is_caught() {
    let frame = Frame::encode(Command::GetData.code(), &[0xA5; 18]).unwrap();

    for byte in COMMAND_OFFSET..FRAME_SIZE {
        for bit in 0..8 {
            let mut corrupted = *frame.as_bytes();
            corrupted[byte] ^= 1 << bit;
            assert!(
                matches!(
                    Frame::from_bytes(&corrupted),
                    Err(ProtocolError::CrcMismatch { .. })
                ),
                "flip of bit {} in byte {} went unnoticed",
                bit,
                byte
            );
        }
    }
}

#[test]
fn test_packet_survives_frame_encoding() {
    let packet = Packet::new(Command::MapDataPacket, vec![4, 0, 0, 0x20, 0x41]);
    let frame = packet.to_frame().unwrap();
    let back = Packet::from_frame(&frame);

    assert_eq!(back.command, Command::MapDataPacket.code());
    assert_eq!(&back.payload[..5], &packet.payload[..]);
    assert!(back.payload[5..].iter().all(|&b| b == 0));
}

#[test]
fn test_noisy_stream_yields_every_frame() {
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let (stream, sent) = noisy_stream(&mut rng, 25);

    let received = decode_in_chunks(&stream, &[]);
    assert_eq!(received, sent);
}

#[test]
fn test_decoding_is_independent_of_chunking() {
    let mut rng = StdRng::seed_from_u64(2024);
    let (stream, sent) = noisy_stream(&mut rng, 20);
    let whole = decode_in_chunks(&stream, &[]);
    assert_eq!(whole, sent);

    for _ in 0..50 {
        let mut cuts: Vec<usize> = (0..rng.gen_range(1..40))
            .map(|_| rng.gen_range(0..stream.len()))
            .collect();
        cuts.sort_unstable();
        assert_eq!(decode_in_chunks(&stream, &cuts), whole, "cuts: {:?}", cuts);
    }

    // One byte at a time is the worst case for marker splitting
    let every_byte: Vec<usize> = (1..stream.len()).collect();
    assert_eq!(decode_in_chunks(&stream, &every_byte), whole);
}

#[test]
fn test_corrupted_frame_does_not_hide_the_next() {
    let good = Frame::command(Command::Sync);
    let mut bad = *Frame::command(Command::GetData).as_bytes();
    bad[20] ^= 0xFF;

    let mut stream = Vec::new();
    stream.extend_from_slice(&bad);
    stream.extend_from_slice(good.as_bytes());

    let mut sync = FrameSynchronizer::new();
    let mut buf = BytesMut::from(&stream[..]);
    assert_eq!(sync.decode(&mut buf).unwrap(), Some(good));
    assert_eq!(sync.stats().crc_errors, 1);
    assert_eq!(sync.stats().frames, 1);
    assert_eq!(sync.stats().bytes_discarded, FRAME_SIZE as u64);
}

#[test]
fn test_marker_dense_stream_is_chunking_independent() {
    let mut rng = StdRng::seed_from_u64(0xC0FFEE);

    for round in 0..300 {
        let mut stream = Vec::new();
        for i in 0..rng.gen_range(1..8) {
            let gap = rng.gen_range(0..80);
            stream.extend(marker_dense(&mut rng, gap));

            let len = rng.gen_range(0..=PAYLOAD_SIZE);
            let payload = marker_dense(&mut rng, len);
            let command = Command::ALL[i % Command::ALL.len()];
            let mut bytes = *Frame::encode(command.code(), &payload).unwrap().as_bytes();
            if rng.gen_bool(0.3) {
                let bit = rng.gen_range(0..FRAME_SIZE * 8);
                bytes[bit / 8] ^= 1 << (bit % 8);
            }
            stream.extend_from_slice(&bytes);
        }
        let tail = rng.gen_range(0..10);
        stream.extend(marker_dense(&mut rng, tail));

        let whole = decode_in_chunks(&stream, &[]);
        let every_byte: Vec<usize> = (1..stream.len()).collect();
        assert_eq!(
            decode_in_chunks(&stream, &every_byte),
            whole,
            "round {} differs between bulk and bytewise decoding",
            round
        );
    }
}
