//! Synthetic survey data drawn from a linear logit model with known betas.

#![allow(dead_code)]

use modechoice::choice::data::{Database, schema};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Gumbel};
use std::fmt::Write as _;
use std::path::Path;

/// Betas of the linear specification the choices are drawn from.
pub const TRUE_BETAS: [(&str, f64); 8] = [
    ("ASC_CAR", 0.5),
    ("ASC_PT", 0.3),
    ("ASC_WALK", 0.8),
    ("B_TIME_CAR", -4.0),
    ("B_TIME_PT", -2.5),
    ("B_TIME_WALK", -6.0),
    ("B_TIME_BIKE", -5.0),
    ("B_COST", -0.3),
];

pub fn true_beta(name: &str) -> f64 {
    TRUE_BETAS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, v)| *v)
        .unwrap()
}

/// Raw survey columns in file order.
pub fn synthetic_columns(n: usize, seed: u64) -> Vec<(String, Vec<f64>)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let gumbel = Gumbel::new(0.0, 1.0).unwrap();
    let names = [
        schema::TRAVEL_MODE,
        schema::PURPOSE,
        schema::AGE,
        schema::FEMALE,
        schema::DUR_WALKING,
        schema::DUR_CYCLING,
        schema::DUR_PT_ACCESS,
        schema::DUR_PT_RAIL,
        schema::DUR_PT_BUS,
        schema::DUR_PT_INT,
        schema::PT_INTERCHANGES,
        schema::DUR_DRIVING,
        schema::COST_TRANSIT,
        schema::COST_DRIVING_FUEL,
        schema::COST_DRIVING_CCHARGE,
        schema::DRIVING_TRAFFIC_PERCENT,
    ];
    let mut columns: Vec<Vec<f64>> = vec![Vec::with_capacity(n); names.len()];
    let b = |name| true_beta(name);

    for _ in 0..n {
        let purpose = rng.gen_range(1..=5) as f64;
        let age = rng.gen_range(5..=85) as f64;
        let female = if rng.gen_bool(0.5) { 1.0 } else { 0.0 };
        let walk = rng.gen_range(0.05..1.5);
        let cycle = walk * rng.gen_range(0.25..0.4);
        let access = rng.gen_range(0.02..0.25);
        let rail = if rng.gen_bool(0.5) { rng.gen_range(0.0..0.6) } else { 0.0 };
        let bus = rng.gen_range(0.0..0.4);
        let interchange = rng.gen_range(0.0..0.1);
        let interchanges = rng.gen_range(0..=2) as f64;
        let driving = rng.gen_range(0.05..0.8);
        let transit_cost = rng.gen_range(0.0..5.0);
        let fuel = rng.gen_range(0.1..3.0);
        let ccharge = if rng.gen_bool(0.1) { 10.5 } else { 0.0 };
        let traffic = rng.gen_range(0.0..0.6);

        let dur_pt = access + rail + bus + interchange * interchanges;
        let utilities = [
            b("ASC_WALK") + b("B_TIME_WALK") * walk,
            b("B_TIME_BIKE") * cycle,
            b("ASC_PT") + b("B_TIME_PT") * dur_pt + b("B_COST") * transit_cost,
            b("ASC_CAR") + b("B_TIME_CAR") * driving + b("B_COST") * (fuel + ccharge),
        ];
        let chosen = utilities
            .iter()
            .map(|v| v + gumbel.sample(&mut rng))
            .enumerate()
            .max_by(|a, c| a.1.total_cmp(&c.1))
            .map(|(i, _)| i + 1)
            .unwrap();

        let row = [
            chosen as f64,
            purpose,
            age,
            female,
            walk,
            cycle,
            access,
            rail,
            bus,
            interchange,
            interchanges,
            driving,
            transit_cost,
            fuel,
            ccharge,
            traffic,
        ];
        for (column, value) in columns.iter_mut().zip(row) {
            column.push(value);
        }
    }

    names
        .iter()
        .map(|s| s.to_string())
        .zip(columns)
        .collect()
}

pub fn synthetic_database(n: usize, seed: u64) -> Database {
    let columns = synthetic_columns(n, seed)
        .into_iter()
        .map(|(name, values)| (name, Array1::from_vec(values)))
        .collect();
    Database::from_columns("synthetic", columns).unwrap()
}

/// Writes the synthetic survey as a tab-separated file.
pub fn write_survey(path: &Path, n: usize, seed: u64) {
    let columns = synthetic_columns(n, seed);
    let mut out = String::new();
    let header: Vec<&str> = columns.iter().map(|(name, _)| name.as_str()).collect();
    writeln!(out, "{}", header.join("\t")).unwrap();
    for row in 0..n {
        let fields: Vec<String> = columns.iter().map(|(_, v)| v[row].to_string()).collect();
        writeln!(out, "{}", fields.join("\t")).unwrap();
    }
    std::fs::write(path, out).unwrap();
}
