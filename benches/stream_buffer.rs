use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use streambuf::StreamBuffer;

const OPS_PER_ITER: u64 = 10_000;

/// Benchmarks the hot path: lease a chunk, fill it in place, publish, then
/// drain it through a read lease.
fn bench_lease_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_buffer");
    group.throughput(Throughput::Elements(OPS_PER_ITER));

    group.bench_function("round_trip_chunk4_cap64", |b| {
        let buf: StreamBuffer<u64, 64> = StreamBuffer::new();
        b.iter(|| {
            let mut produced = 0u64;
            while produced < OPS_PER_ITER {
                let mut w = buf.prepare(4).unwrap();
                w.fill_with(|i| black_box(produced + i as u64));
                drop(w);
                produced += 4;

                black_box(buf.read(4).unwrap());
            }
        })
    });

    group.bench_function("round_trip_chunk16_cap64", |b| {
        let buf: StreamBuffer<u64, 64> = StreamBuffer::new();
        b.iter(|| {
            let mut produced = 0u64;
            while produced < OPS_PER_ITER {
                let mut w = buf.prepare(16).unwrap();
                w.fill_with(|i| black_box(produced + i as u64));
                drop(w);
                produced += 16;

                black_box(buf.read(16).unwrap());
            }
        })
    });

    group.bench_function("round_trip_chunk64_cap1024", |b| {
        let buf: StreamBuffer<u64, 1024> = StreamBuffer::new();
        b.iter(|| {
            let mut produced = 0u64;
            while produced < OPS_PER_ITER {
                let mut w = buf.prepare(64).unwrap();
                w.fill_with(|i| black_box(produced + i as u64));
                drop(w);
                produced += 64;

                black_box(buf.read(64).unwrap());
            }
        })
    });

    group.finish();
}

/// Benchmarks consuming published data through the two-slice view instead of
/// element indexing.
fn bench_slice_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_buffer_slices");
    group.throughput(Throughput::Elements(OPS_PER_ITER));

    group.bench_function("drain_as_slices_cap256", |b| {
        let buf: StreamBuffer<u64, 256> = StreamBuffer::new();
        b.iter(|| {
            let mut produced = 0u64;
            let mut consumed = 0u64;
            while consumed < OPS_PER_ITER {
                let mut w = buf.prepare_all();
                w.fill_with(|i| black_box(produced + i as u64));
                produced += w.len() as u64;
                drop(w);

                let r = buf.read_all();
                let (head, tail) = r.as_slices();
                consumed += (head.len() + tail.len()) as u64;
                black_box((head.last(), tail.last()));
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_lease_round_trip, bench_slice_drain);
criterion_main!(benches);
