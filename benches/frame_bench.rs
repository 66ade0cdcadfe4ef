use criterion::{black_box, criterion_group, criterion_main, Criterion};
use qrcm::fec;
use qrcm::frame::{Frame, FrameType};

fn bench_frame_codec(c: &mut Criterion) {
    let frame = Frame {
        frame_type:      FrameType::Data,
        session_id:      [0x42; 16],
        superblock_id:   7,
        block_id:        151,
        total_blocks:    4096,
        blocks_in_super: 20,
        flags:           0,
        payload:         vec![0xA5; 512],
    };
    let symbol = frame.to_b64().unwrap();
    c.bench_function("frame_encode_512b", |b| b.iter(|| black_box(&frame).to_b64().unwrap()));
    c.bench_function("frame_decode_512b", |b| b.iter(|| Frame::from_b64(black_box(&symbol)).unwrap()));
}

fn bench_parity(c: &mut Criterion) {
    let blocks: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i; 512]).collect();
    c.bench_function("xor_parity_20x512", |b| b.iter(|| fec::xor_parity(black_box(&blocks))));
}

criterion_group!(benches, bench_frame_codec, bench_parity);
criterion_main!(benches);
