//! Property tests for the wire codec and the parity engine.

use proptest::prelude::*;

use qrcm::fec;
use qrcm::frame::{Frame, FrameType};

fn arb_frame() -> impl Strategy<Value = Frame> {
    (
        0u8..4,
        any::<[u8; 16]>(),
        any::<u32>(),
        any::<u32>(),
        any::<u32>(),
        any::<u16>(),
        any::<u8>(),
        proptest::collection::vec(any::<u8>(), 0..1024),
    )
        .prop_map(
            |(ft, session_id, superblock_id, block_id, total_blocks, blocks_in_super, flags, payload)| Frame {
                frame_type: FrameType::from_u8(ft).unwrap(),
                session_id,
                superblock_id,
                block_id,
                total_blocks,
                blocks_in_super,
                flags,
                payload,
            },
        )
}

proptest! {
    #[test]
    fn binary_roundtrip(frame in arb_frame()) {
        let bytes = frame.to_bytes().unwrap();
        prop_assert_eq!(Frame::from_bytes(&bytes).unwrap(), frame);
    }

    #[test]
    fn text_roundtrip(frame in arb_frame()) {
        let text = frame.to_b64().unwrap();
        prop_assert!(text.is_ascii());
        prop_assert_eq!(Frame::from_b64(&text).unwrap(), frame);
    }

    /// Any single bit flip in the serialised frame is caught by the CRC32 or
    /// by the structural checks in front of it.
    #[test]
    fn single_bit_flip_rejected(
        (bytes, bit) in arb_frame().prop_flat_map(|f| {
            let bytes = f.to_bytes().unwrap();
            let bits = bytes.len() * 8;
            (Just(bytes), 0..bits)
        })
    ) {
        let mut corrupted = bytes;
        corrupted[bit / 8] ^= 1 << (bit % 8);
        prop_assert!(Frame::from_bytes(&corrupted).is_err());
    }

    /// Characters outside the standard base64 alphabet are rejected wherever
    /// they land in the symbol text.
    #[test]
    fn foreign_base64_char_rejected(
        (text, pos) in arb_frame().prop_flat_map(|f| {
            let text = f.to_b64().unwrap();
            let len = text.len();
            (Just(text), 0..len)
        }),
        bad in "[^A-Za-z0-9+/=]",
    ) {
        let mut corrupted = text;
        corrupted.replace_range(pos..=pos, &bad);
        prop_assert!(Frame::from_b64(&corrupted).is_err());
    }

    /// For any block list and index, the block equals the XOR of the parity
    /// with every other block, modulo right-zero-padding.
    #[test]
    fn xor_parity_law(
        (blocks, idx) in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 1..64), 1..8)
            .prop_flat_map(|blocks| {
                let len = blocks.len();
                (Just(blocks), 0..len)
            })
    ) {
        let parity = fec::xor_parity(&blocks);
        let others: Vec<&[u8]> = blocks
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != idx)
            .map(|(_, b)| b.as_slice())
            .collect();
        let recovered = fec::recover_single(&others, &parity, 1).unwrap();
        prop_assert_eq!(&recovered[..blocks[idx].len()], blocks[idx].as_slice());
        prop_assert!(recovered[blocks[idx].len()..].iter().all(|&b| b == 0));
    }
}

#[test]
fn incorrect_padding_rejected() {
    let frame = Frame {
        frame_type:      FrameType::Data,
        session_id:      [1; 16],
        superblock_id:   0,
        block_id:        0,
        total_blocks:    1,
        blocks_in_super: 1,
        flags:           0,
        payload:         vec![0xAB; 10],
    };
    let text = frame.to_b64().unwrap();
    assert!(text.ends_with('='));
    assert!(Frame::from_b64(text.trim_end_matches('=')).is_err());
    assert!(Frame::from_b64(&format!("{text}==")).is_err());
}
