use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use proxcausal::ObservationTable;
use proxcausal::config::FieldNames;
use proxcausal::effect::restore_effect;
use proxcausal::two_proxy::{EstimatorOptions, Roles, moment_matrices, solve_moments};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_table(n: usize) -> ObservationTable {
    let mut rng = StdRng::seed_from_u64(0x5EED_0000 + n as u64);
    let mut bit = |p: f64| u8::from(rng.gen_bool(p));
    let (mut x, mut y, mut z, mut w) = (
        Vec::with_capacity(n),
        Vec::with_capacity(n),
        Vec::with_capacity(n),
        Vec::with_capacity(n),
    );
    for _ in 0..n {
        let u = bit(0.48) == 1;
        w.push(bit(if u { 0.82 } else { 0.18 }));
        z.push(bit(if u { 0.80 } else { 0.20 }));
        let xi = bit(if u { 0.67 } else { 0.40 });
        let py = match (xi == 1, u) {
            (false, false) => 0.27,
            (true, false) => 0.50,
            (false, true) => 0.73,
            (true, true) => 0.88,
        };
        y.push(bit(py));
        x.push(xi);
    }
    ObservationTable::from_columns(vec![("X", x), ("Y", y), ("Z", z), ("W", w)])
        .expect("binary columns")
}

fn benchmark_two_proxy(c: &mut Criterion) {
    let sizes = [1_000_usize, 10_000, 100_000];
    let tables: Vec<_> = sizes.iter().map(|&n| (n, random_table(n))).collect();
    let options = EstimatorOptions::default();

    let mut group = c.benchmark_group("two_proxy");
    for (n, table) in tables.iter() {
        let roles = Roles::resolve(table, &FieldNames::default()).expect("roles");
        group.throughput(Throughput::Elements(*n as u64));

        group.bench_with_input(BenchmarkId::new("moments", n), table, |b, input| {
            b.iter(|| black_box(moment_matrices(black_box(input), &roles)));
        });

        group.bench_with_input(BenchmarkId::new("restore_effect", n), table, |b, input| {
            b.iter(|| black_box(restore_effect(black_box(input), &roles, &options)));
        });
    }
    group.finish();

    let (_, smallest) = &tables[0];
    let roles = Roles::resolve(smallest, &FieldNames::default()).expect("roles");
    let moments = moment_matrices(smallest, &roles).expect("moments");
    c.bench_function("solve_moments", |b| {
        b.iter(|| black_box(solve_moments(black_box(&moments), &options)));
    });
}

criterion_group!(two_proxy, benchmark_two_proxy);
criterion_main!(two_proxy);
