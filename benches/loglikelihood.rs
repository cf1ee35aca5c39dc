use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use modechoice::choice::data::{Database, schema};
use modechoice::choice::estimate::LikelihoodProblem;
use modechoice::choice::specification::{ModelKind, ModelSpecification};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn column(rng: &mut StdRng, n: usize, draw: impl Fn(&mut StdRng) -> f64) -> Array1<f64> {
    (0..n).map(|_| draw(rng)).collect()
}

fn random_survey(n: usize) -> Database {
    let mut rng = StdRng::seed_from_u64(0x5EED_0DE + n as u64);
    let rng = &mut rng;
    let columns = vec![
        (schema::TRAVEL_MODE, column(rng, n, |r| r.gen_range(1..=4) as f64)),
        (schema::PURPOSE, column(rng, n, |r| r.gen_range(1..=5) as f64)),
        (schema::AGE, column(rng, n, |r| r.gen_range(5..=85) as f64)),
        (schema::FEMALE, column(rng, n, |r| r.gen_range(0..=1) as f64)),
        (schema::DUR_WALKING, column(rng, n, |r| r.gen_range(0.05..1.5))),
        (schema::DUR_CYCLING, column(rng, n, |r| r.gen_range(0.02..0.6))),
        (schema::DUR_PT_ACCESS, column(rng, n, |r| r.gen_range(0.02..0.25))),
        (schema::DUR_PT_RAIL, column(rng, n, |r| r.gen_range(0.0..0.6))),
        (schema::DUR_PT_BUS, column(rng, n, |r| r.gen_range(0.0..0.4))),
        (schema::DUR_PT_INT, column(rng, n, |r| r.gen_range(0.0..0.1))),
        (schema::PT_INTERCHANGES, column(rng, n, |r| r.gen_range(0..=2) as f64)),
        (schema::DUR_DRIVING, column(rng, n, |r| r.gen_range(0.05..0.8))),
        (schema::COST_TRANSIT, column(rng, n, |r| r.gen_range(0.0..5.0))),
        (schema::COST_DRIVING_FUEL, column(rng, n, |r| r.gen_range(0.1..3.0))),
        (schema::COST_DRIVING_CCHARGE, column(rng, n, |r| if r.gen_bool(0.1) { 10.5 } else { 0.0 })),
        (schema::DRIVING_TRAFFIC_PERCENT, column(rng, n, |r| r.gen_range(0.0..0.6))),
    ];
    Database::from_columns(
        "bench",
        columns
            .into_iter()
            .map(|(name, values)| (name.to_string(), values))
            .collect(),
    )
    .expect("survey columns")
}

fn benchmark_loglikelihood(c: &mut Criterion) {
    let sizes = [1_000_usize, 5_000];
    let mut group = c.benchmark_group("loglikelihood");
    for &size in &sizes {
        group.throughput(Throughput::Elements(size as u64));
        for kind in [ModelKind::Model0, ModelKind::Model4] {
            let model = ModelSpecification::build(kind).expect("model");
            let mut database = random_survey(size);
            model.prepare(&mut database).expect("prepare");
            let problem = LikelihoodProblem::new(&model, &database, false).expect("problem");
            let start = problem.free_values(&model.parameters.start_values());

            group.bench_with_input(BenchmarkId::new(kind.name(), size), &start, |b, input| {
                b.iter(|| {
                    let value = problem.log_likelihood_and_gradient(black_box(input));
                    black_box(value.is_ok());
                });
            });
        }
    }
    group.finish();
}

criterion_group!(loglikelihood, benchmark_loglikelihood);
criterion_main!(loglikelihood);
