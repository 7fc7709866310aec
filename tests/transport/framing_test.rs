// Framing Tests
// Byte stuffing, resynchronization and size bounds of the frame codec

use bytes::{BufMut, BytesMut};
use hammesh::transport::framing::{wrapped_len, ESCAPE, FRAME_END, FRAME_START};
use hammesh::transport::{FrameCodec, TransportError};
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

fn wrap(payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::new();
    FrameCodec::default().encode(payload.to_vec(), &mut buf).unwrap();
    buf
}

fn decode_all(codec: &mut FrameCodec, buf: &mut BytesMut) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    while let Some(frame) = codec.decode(buf).unwrap() {
        frames.push(frame);
    }
    frames
}

// ============================================================================
// ROUND TRIP
// ============================================================================

#[test]
fn test_every_marker_byte_survives() {
    let payload = vec![ESCAPE, FRAME_START, FRAME_END, 0x00, ESCAPE, ESCAPE, FRAME_END, 0xFF];
    let mut buf = wrap(&payload);

    assert_eq!(buf.len(), wrapped_len(&payload));
    let mut codec = FrameCodec::default();
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(payload));
}

#[test]
fn test_empty_payload() {
    let mut buf = wrap(&[]);
    assert_eq!(&buf[..], &[FRAME_START, FRAME_END]);
    assert_eq!(FrameCodec::default().decode(&mut buf).unwrap(), Some(vec![]));
}

#[test]
fn test_two_frames_in_one_read() {
    let mut buf = wrap(b"first");
    buf.extend_from_slice(&wrap(b"second"));

    let frames = decode_all(&mut FrameCodec::default(), &mut buf);
    assert_eq!(frames, vec![b"first".to_vec(), b"second".to_vec()]);
}

#[test]
fn test_frame_split_across_reads() {
    let wire = wrap(&[1, FRAME_START, 2, FRAME_END, 3]);
    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::new();
    let mut frames = Vec::new();

    for byte in wire.iter() {
        buf.put_u8(*byte);
        if let Some(frame) = codec.decode(&mut buf).unwrap() {
            frames.push(frame);
        }
    }
    assert_eq!(frames, vec![vec![1, FRAME_START, 2, FRAME_END, 3]]);
}

// ============================================================================
// RESYNCHRONIZATION
// ============================================================================

#[test]
fn test_bytes_outside_frame_ignored() {
    let mut buf = BytesMut::from(&[0x01, 0x02, 0x03][..]);
    buf.extend_from_slice(&wrap(b"ok"));
    buf.extend_from_slice(&[0x04]);

    let frames = decode_all(&mut FrameCodec::default(), &mut buf);
    assert_eq!(frames, vec![b"ok".to_vec()]);
    assert!(buf.is_empty());
}

#[test]
fn test_start_inside_frame_restarts() {
    let mut buf = BytesMut::from(&[FRAME_START, b'l', b'o', b's', b't'][..]);
    buf.extend_from_slice(&wrap(b"kept"));

    let frames = decode_all(&mut FrameCodec::default(), &mut buf);
    assert_eq!(frames, vec![b"kept".to_vec()]);
}

#[test]
fn test_end_without_frame_ignored() {
    let mut buf = BytesMut::from(&[FRAME_END, FRAME_END][..]);
    buf.extend_from_slice(&wrap(b"next"));

    let frames = decode_all(&mut FrameCodec::default(), &mut buf);
    assert_eq!(frames, vec![b"next".to_vec()]);
}

#[test]
fn test_oversized_inbound_frame_dropped() {
    let mut codec = FrameCodec::new(16);
    let mut buf = BytesMut::new();
    buf.put_u8(FRAME_START);
    buf.put_slice(&[0x11; 40]);
    buf.put_u8(FRAME_END);
    // a valid frame right after the oversized one
    buf.put_slice(&[FRAME_START, 0x22, FRAME_END]);

    let frames = decode_all(&mut codec, &mut buf);
    assert_eq!(frames, vec![vec![0x22]]);
}

#[test]
fn test_escaped_end_while_discarding() {
    let mut codec = FrameCodec::new(16);
    let mut buf = BytesMut::new();
    buf.put_u8(FRAME_START);
    buf.put_slice(&[0x11; 20]);
    // escaped end marker belongs to the dropped frame
    buf.put_slice(&[ESCAPE, FRAME_END, 0x11, FRAME_END]);
    buf.put_slice(&[FRAME_START, 0x33, FRAME_END]);

    let frames = decode_all(&mut codec, &mut buf);
    assert_eq!(frames, vec![vec![0x33]]);
}

// ============================================================================
// SIZE BOUND
// ============================================================================

#[test]
fn test_encode_counts_escapes_against_bound() {
    let mut codec = FrameCodec::new(16);
    let mut buf = BytesMut::new();

    // 8 plain bytes fit, 8 reserved bytes double to 16 plus markers
    assert!(codec.encode(vec![0x01; 8], &mut buf).is_ok());
    buf.clear();
    let result = codec.encode(vec![FRAME_START; 8], &mut buf);

    assert_eq!(result, Err(TransportError::FrameTooLarge { size: 18, max: 16 }));
    assert!(buf.is_empty());
}

#[test]
fn test_max_sized_frame_roundtrips() {
    let mut codec = FrameCodec::new(64);
    let payload = vec![0x42; 62];
    let mut buf = BytesMut::new();

    codec.encode(payload.clone(), &mut buf).unwrap();
    assert_eq!(buf.len(), 64);
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(payload));
}

proptest! {
    #[test]
    fn prop_framing_roundtrip(payload in proptest::collection::vec(any::<u8>(), 0..512)) {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(payload.clone(), &mut buf).unwrap();

        prop_assert_eq!(codec.decode(&mut buf).unwrap(), Some(payload));
        prop_assert!(buf.is_empty());
    }
}
