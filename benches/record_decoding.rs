//! Benchmarks for per-record decoding on the fetch hot path.
//!
//! Covers packed sequence decoding, CIGAR rendering and aux tag lookup
//! over records of increasing read length.
//!
//! Run with: cargo bench --bench record_decoding

use bamfetch::io::bam::{decode_sequence, reverse_complement, RecordView};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const SEQ_CODES: &[u8] = b"=ACMGRSVTWYHKDBN";

fn generate_sequence(len: usize) -> Vec<u8> {
    (0..len).map(|i| [b'A', b'C', b'G', b'T'][(i * 7 + i / 3) % 4]).collect()
}

/// One record block: `4S{len-8}M4S`, qualities present, five aux tags
/// with the one looked up last.
fn generate_record(len: usize) -> Vec<u8> {
    let name = format!("read_{}", len);
    let cigar = [4u32 << 4 | 4, ((len - 8) as u32) << 4, 4 << 4 | 4];
    let seq = generate_sequence(len);

    let mut b = Vec::new();
    b.extend_from_slice(&0i32.to_le_bytes());
    b.extend_from_slice(&1000i32.to_le_bytes());
    b.push(name.len() as u8 + 1);
    b.push(60);
    b.extend_from_slice(&0u16.to_le_bytes());
    b.extend_from_slice(&(cigar.len() as u16).to_le_bytes());
    b.extend_from_slice(&0x10u16.to_le_bytes());
    b.extend_from_slice(&(len as i32).to_le_bytes());
    b.extend_from_slice(&(-1i32).to_le_bytes());
    b.extend_from_slice(&(-1i32).to_le_bytes());
    b.extend_from_slice(&0i32.to_le_bytes());
    b.extend_from_slice(name.as_bytes());
    b.push(0);
    for op in cigar {
        b.extend_from_slice(&op.to_le_bytes());
    }
    let code = |c: u8| SEQ_CODES.iter().position(|&x| x == c).unwrap_or(15) as u8;
    for pair in seq.chunks(2) {
        b.push(code(pair[0]) << 4 | pair.get(1).map_or(0, |&c| code(c)));
    }
    b.extend((0..len).map(|i| 20 + (i % 20) as u8));
    b.extend_from_slice(b"RGZlane1\0");
    b.extend_from_slice(b"NMC\x02");
    b.extend_from_slice(b"ASs\x10\x00");
    b.extend_from_slice(b"XSf\x00\x00\x80\x3f");
    b.extend_from_slice(b"MDZ10A20^C5\0");
    b
}

fn bench_sequence(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequence");
    for len in [100usize, 150, 1000, 10_000] {
        let block = generate_record(len);
        let view = RecordView::parse(&block).unwrap();
        group.throughput(Throughput::Elements(len as u64));

        group.bench_with_input(BenchmarkId::new("decode", len), &view, |b, view| {
            b.iter(|| decode_sequence(black_box(view.packed_sequence()), view.query_len()).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("decode_stranded", len), &view, |b, view| {
            b.iter(|| black_box(view).query_sequence(true).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("reverse_complement", len), &len, |b, &len| {
            let seq = generate_sequence(len);
            b.iter(|| {
                let mut bases = seq.clone();
                reverse_complement(black_box(&mut bases));
                bases
            })
        });
    }
    group.finish();
}

fn bench_fields(c: &mut Criterion) {
    let mut group = c.benchmark_group("fields");
    let block = generate_record(150);

    group.bench_function("parse_view", |b| b.iter(|| RecordView::parse(black_box(&block)).unwrap()));

    let view = RecordView::parse(&block).unwrap();
    group.bench_function("cigar_string", |b| b.iter(|| black_box(&view).cigar_string().unwrap()));
    group.bench_function("soft_clipping", |b| b.iter(|| black_box(&view).soft_clipping().unwrap()));
    group.bench_function("target_length", |b| b.iter(|| black_box(&view).target_length().unwrap()));
    group.bench_function("tag_string_last", |b| {
        b.iter(|| black_box(&view).tag_string("MD", 64).unwrap())
    });
    group.bench_function("aux_text", |b| b.iter(|| black_box(&view).aux_text().unwrap()));
    group.finish();
}

criterion_group!(benches, bench_sequence, bench_fields);
criterion_main!(benches);
