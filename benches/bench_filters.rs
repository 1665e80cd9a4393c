use criterion::{
    black_box, criterion_group, criterion_main, measurement::WallTime, BenchmarkGroup, BenchmarkId,
    Criterion, PlotConfiguration,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use streambloom::{
    BloomFilter, Filter, InverseBloomFilter, PartitionedBloomFilter, StableBloomFilter,
};

const NUM_CELLS: usize = 262144 * 8;

fn random_strings(num: usize, min_len: usize, max_len: usize, seed: u64) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..num)
        .map(|_| {
            let len = rng.random_range(min_len..=max_len);
            (0..len)
                .map(|_| rng.random_range(b'a'..=b'z') as char)
                .collect()
        })
        .collect()
}

fn run_bench_for<F: Filter>(
    group: &mut BenchmarkGroup<'_, WallTime>,
    name: &str,
    num_items: usize,
    mut filter: F,
) {
    let members = random_strings(num_items, 6, 12, 1234);
    for key in members.iter() {
        filter.add(key.as_bytes());
    }
    let sample_vals = random_strings(1000, 6, 12, 9876);
    group.bench_with_input(BenchmarkId::new(name, num_items), &num_items, |b, _| {
        b.iter(|| {
            for val in sample_vals.iter() {
                black_box(filter.test_and_add(val.as_bytes()));
            }
        })
    });
}

fn bench(c: &mut Criterion) {
    let mut group = c.benchmark_group(format!(
        "Test-and-add Speed vs Number of Items in Filter ({}Kb Allocated, FNV)",
        NUM_CELLS / 8 / 1000
    ));
    group.plot_config(PlotConfiguration::default());
    for num_items in [5000, 10_000, 50_000, 100_000] {
        run_bench_for(
            &mut group,
            "StableBloomFilter",
            num_items,
            StableBloomFilter::with_defaults(NUM_CELLS),
        );
        run_bench_for(
            &mut group,
            "StableBloomFilter (3 bits)",
            num_items,
            StableBloomFilter::new(NUM_CELLS / 3, 3, 10, 3),
        );
        run_bench_for(
            &mut group,
            "BloomFilter",
            num_items,
            BloomFilter::with_num_bits(NUM_CELLS).hashes(3),
        );
        run_bench_for(
            &mut group,
            "PartitionedBloomFilter",
            num_items,
            PartitionedBloomFilter::with_num_bits(NUM_CELLS).hashes(3),
        );
    }
    group.finish();
}

fn bench_inverse(c: &mut Criterion) {
    let mut group = c.benchmark_group("InverseBloomFilter observe");
    for size in [1 << 10, 1 << 16, 1 << 20] {
        let filter = InverseBloomFilter::new(size).unwrap();
        let sample_vals = random_strings(1000, 6, 12, 9876);
        group.bench_with_input(BenchmarkId::new("observe", size), &size, |b, _| {
            b.iter(|| {
                for val in sample_vals.iter() {
                    black_box(filter.observe(val.as_bytes()));
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench, bench_inverse);
criterion_main!(benches);
