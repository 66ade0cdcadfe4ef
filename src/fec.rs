//! Superblock XOR parity.
//!
//! The QR symbol's own Reed–Solomon already protects individual frames; this
//! outer code only needs to rescue the occasional frame the camera never saw.
//! One parity block is the byte-wise XOR of every data block in a superblock,
//! each right-padded with zeros to the longest block, and the sender repeats
//! it `redundancy` times so that *some* copy survives.
//!
//! A single missing block is the XOR of the parity with every observed block.
//! Two or more missing blocks are unrecoverable by construction; the engine
//! reports inability instead of guessing.

/// Byte-wise XOR of all blocks, each zero-padded to the longest.
pub fn xor_parity<B: AsRef<[u8]>>(blocks: &[B]) -> Vec<u8> {
    let max_len = blocks.iter().map(|b| b.as_ref().len()).max().unwrap_or(0);
    let mut parity = vec![0u8; max_len];
    for block in blocks {
        // Zero padding is a no-op under XOR, so shorter blocks just stop early.
        for (p, &byte) in parity.iter_mut().zip(block.as_ref()) {
            *p ^= byte;
        }
    }
    parity
}

/// `count` identical copies of the superblock parity.
pub fn parity_copies<B: AsRef<[u8]>>(blocks: &[B], count: u16) -> Vec<Vec<u8>> {
    if count == 0 {
        return Vec::new();
    }
    let parity = xor_parity(blocks);
    vec![parity; usize::from(count)]
}

/// Recover the single missing block of a superblock.
///
/// `present` are the observed data blocks (any order), `parity` one surviving
/// parity copy, `missing` how many block ids the caller found absent.  Returns
/// `None` unless exactly one block is missing and a parity copy exists; the
/// result is padded to the parity length and must be truncated by the caller
/// to the block's expected length.
pub fn recover_single<B: AsRef<[u8]>>(
    present: &[B],
    parity:  &[u8],
    missing: usize,
) -> Option<Vec<u8>> {
    if missing != 1 || parity.is_empty() {
        return None;
    }
    let mut out = parity.to_vec();
    for block in present {
        for (o, &byte) in out.iter_mut().zip(block.as_ref()) {
            *o ^= byte;
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parity_recovers_each_block() {
        let blocks: Vec<Vec<u8>> = vec![
            vec![0xAA; 500],
            (0..=255u8).cycle().take(500).collect(),
            vec![0x17; 300], // short tail
        ];
        let parity = xor_parity(&blocks);
        assert_eq!(parity.len(), 500);

        for drop_idx in 0..blocks.len() {
            let present: Vec<&[u8]> = blocks
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != drop_idx)
                .map(|(_, b)| b.as_slice())
                .collect();
            let mut recovered = recover_single(&present, &parity, 1).unwrap();
            recovered.truncate(blocks[drop_idx].len());
            assert_eq!(recovered, blocks[drop_idx]);
        }
    }

    #[test]
    fn two_missing_is_not_recoverable() {
        let blocks = [vec![1u8; 8], vec![2u8; 8], vec![3u8; 8]];
        let parity = xor_parity(&blocks);
        assert_eq!(recover_single(&blocks[..1], &parity, 2), None);
    }

    #[test]
    fn copies_and_empty_inputs() {
        let blocks = [vec![0xF0u8; 4]];
        assert_eq!(parity_copies(&blocks, 3).len(), 3);
        assert!(parity_copies(&blocks, 0).is_empty());
        assert!(xor_parity::<Vec<u8>>(&[]).is_empty());
    }
}
