use std::{collections::BTreeMap, time::Duration};

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use netmodel::{NetworkModel, Reducer, TableId};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::{Value, json};

const ROW_SEED: u64 = 0x5EED;
const SAMPLE_SIZE: usize = 20;
const WARM_UP: Duration = Duration::from_millis(300);
const MEASURE: Duration = Duration::from_millis(500);

fn bench_scales() -> &'static [usize] {
    &[1_000, 10_000]
}

/// `rows` trips between `rows / 10` places.
fn trip_rows(rows: usize) -> Value {
    let mut rng = StdRng::seed_from_u64(ROW_SEED + rows as u64);
    let places = (rows / 10).max(1);
    let trips: Vec<Value> = (0..rows)
        .map(|_| {
            json!({
                "from": format!("p{}", rng.gen_range(0..places)),
                "to": format!("p{}", rng.gen_range(0..places)),
                "km": rng.gen_range(1..500),
            })
        })
        .collect();
    Value::Array(trips)
}

fn trips_model(rows: usize) -> (NetworkModel, TableId) {
    let mut model = NetworkModel::new("bench");
    let class_id = model
        .add_static_table("trips", trip_rows(rows), ["from", "to", "km"])
        .expect("static table");
    let table_id = model.class(&class_id).expect("class").table_id().clone();
    (model, table_id)
}

/// Resets `table_id` and counts its rows, i.e. one full rebuild.
fn rebuild(model: &mut NetworkModel, table_id: &TableId) -> usize {
    model.reset_table(table_id).expect("reset");
    model.count_rows(table_id).expect("count")
}

fn bench_static_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("static_build");
    group.sample_size(SAMPLE_SIZE);
    group.warm_up_time(WARM_UP);
    group.measurement_time(MEASURE);
    for &rows in bench_scales() {
        let (mut model, table_id) = trips_model(rows);
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, _| {
            b.iter(|| rebuild(&mut model, &table_id));
        });
    }
    group.finish();
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");
    group.sample_size(SAMPLE_SIZE);
    group.warm_up_time(WARM_UP);
    group.measurement_time(MEASURE);
    for &rows in bench_scales() {
        let (mut model, table_id) = trips_model(rows);
        let reducers = BTreeMap::from([
            (String::from("trips"), Reducer::Count),
            (
                String::from("total_km"),
                Reducer::Sum {
                    attribute: String::from("km"),
                },
            ),
        ]);
        let grouped = model.aggregate(&table_id, "from", reducers).expect("aggregate");
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, _| {
            b.iter(|| rebuild(&mut model, &grouped));
        });
    }
    group.finish();
}

fn bench_connect(c: &mut Criterion) {
    let mut group = c.benchmark_group("connect");
    group.sample_size(SAMPLE_SIZE);
    group.warm_up_time(WARM_UP);
    group.measurement_time(MEASURE);
    for &rows in bench_scales() {
        let (mut model, table_id) = trips_model(rows);
        let origins = model.promote(&table_id, "from").expect("promote from");
        let destinations = model.promote(&table_id, "to").expect("promote to");
        let joined = model.connect(&origins, &[destinations]).expect("connect");
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, _| {
            b.iter(|| rebuild(&mut model, &joined));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_static_build, bench_aggregate, bench_connect);
criterion_main!(benches);
