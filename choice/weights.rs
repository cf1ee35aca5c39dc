//! # Post-Stratification Weights
//!
//! The survey over-represents some demographic cells. Each respondent is
//! assigned the weight of their age × sex stratum so that weighted totals match
//! the census:
//!
//! `weight_k = census_k * N / (n_k * census_total)`
//!
//! where `N` is the sample size and `n_k` the number of respondents in stratum
//! `k`. By construction the weights of all respondents sum to `N`.

use crate::choice::data::{DataError, Database, schema};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Respondents strictly older than this are counted as "old".
pub const OLD_AGE_THRESHOLD: f64 = 40.0;

#[derive(Error, Debug)]
pub enum WeightError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("Stratum {0} has a positive census count but no respondent in the sample.")]
    EmptyStratum(Stratum),
    #[error("Census count for stratum {0} must be finite and non-negative, got {1}.")]
    InvalidCensusCount(Stratum, f64),
    #[error("The census totals sum to zero.")]
    EmptyCensus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stratum {
    OldMen,
    YoungMen,
    OldWomen,
    YoungWomen,
}

impl Stratum {
    pub const ALL: [Stratum; 4] = [
        Stratum::OldMen,
        Stratum::YoungMen,
        Stratum::OldWomen,
        Stratum::YoungWomen,
    ];

    pub fn of(age: f64, female: f64) -> Self {
        match (age > OLD_AGE_THRESHOLD, female != 0.0) {
            (true, false) => Stratum::OldMen,
            (false, false) => Stratum::YoungMen,
            (true, true) => Stratum::OldWomen,
            (false, true) => Stratum::YoungWomen,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stratum::OldMen => "OLD_MEN",
            Stratum::YoungMen => "YG_MEN",
            Stratum::OldWomen => "OLD_WOMEN",
            Stratum::YoungWomen => "YG_WOMEN",
        }
    }

    fn index(self) -> usize {
        match self {
            Stratum::OldMen => 0,
            Stratum::YoungMen => 1,
            Stratum::OldWomen => 2,
            Stratum::YoungWomen => 3,
        }
    }
}

impl fmt::Display for Stratum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Population counts per stratum. Defaults are the Greater London census figures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CensusTotals {
    pub old_men: f64,
    pub young_men: f64,
    pub old_women: f64,
    pub young_women: f64,
}

impl Default for CensusTotals {
    fn default() -> Self {
        Self {
            old_men: 1_633_263.0,
            young_men: 2_676_249.0,
            old_women: 1_765_143.0,
            young_women: 2_599_058.0,
        }
    }
}

impl CensusTotals {
    pub fn count(&self, stratum: Stratum) -> f64 {
        match stratum {
            Stratum::OldMen => self.old_men,
            Stratum::YoungMen => self.young_men,
            Stratum::OldWomen => self.old_women,
            Stratum::YoungWomen => self.young_women,
        }
    }

    pub fn total(&self) -> f64 {
        Stratum::ALL.iter().map(|&s| self.count(s)).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StratumWeight {
    pub stratum: Stratum,
    pub census: f64,
    pub sample_size: usize,
    pub weight: f64,
}

/// Weights of all four strata, in `Stratum::ALL` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrataWeights {
    pub strata: Vec<StratumWeight>,
    pub sample_size: usize,
}

impl StrataWeights {
    pub fn weight_of(&self, stratum: Stratum) -> f64 {
        self.strata[stratum.index()].weight
    }
}

impl fmt::Display for StrataWeights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<12}{:>14}{:>14}{:>12}",
            "Stratum", "Census", "Sample size", "Weight"
        )?;
        for s in &self.strata {
            writeln!(
                f,
                "{:<12}{:>14.0}{:>14}{:>12.6}",
                s.stratum.label(),
                s.census,
                s.sample_size,
                s.weight
            )?;
        }
        write!(f, "{:<12}{:>14}{:>14}", "Total", "", self.sample_size)
    }
}

/// Counts respondents per stratum and derives the stratum weights.
pub fn compute_strata_weights(
    database: &Database,
    census: &CensusTotals,
) -> Result<StrataWeights, WeightError> {
    database.require([schema::AGE, schema::FEMALE])?;
    for stratum in Stratum::ALL {
        let count = census.count(stratum);
        if !count.is_finite() || count < 0.0 {
            return Err(WeightError::InvalidCensusCount(stratum, count));
        }
    }
    let census_total = census.total();
    if census_total <= 0.0 {
        return Err(WeightError::EmptyCensus);
    }

    let ages = database.column(schema::AGE)?;
    let females = database.column(schema::FEMALE)?;
    let mut counts = [0usize; 4];
    for (&age, &female) in ages.iter().zip(females.iter()) {
        counts[Stratum::of(age, female).index()] += 1;
    }
    let sample_size = database.n_rows();

    let strata = Stratum::ALL
        .iter()
        .map(|&stratum| {
            let n_k = counts[stratum.index()];
            let census_k = census.count(stratum);
            let weight = match n_k {
                0 if census_k > 0.0 => return Err(WeightError::EmptyStratum(stratum)),
                0 => 0.0,
                _ => census_k * sample_size as f64 / (n_k as f64 * census_total),
            };
            Ok(StratumWeight {
                stratum,
                census: census_k,
                sample_size: n_k,
                weight,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(StrataWeights {
        strata,
        sample_size,
    })
}

/// Census totals, up to scale, implied by a sample that already carries its
/// `Weight` column: the weighted count of each stratum.
pub fn implied_census(database: &Database) -> Result<CensusTotals, WeightError> {
    database.require([schema::AGE, schema::FEMALE, schema::WEIGHT])?;
    let ages = database.column(schema::AGE)?;
    let females = database.column(schema::FEMALE)?;
    let weights = database.column(schema::WEIGHT)?;
    let mut totals = [0.0; 4];
    for ((&age, &female), &w) in ages.iter().zip(females.iter()).zip(weights.iter()) {
        totals[Stratum::of(age, female).index()] += w;
    }
    Ok(CensusTotals {
        old_men: totals[Stratum::OldMen.index()],
        young_men: totals[Stratum::YoungMen.index()],
        old_women: totals[Stratum::OldWomen.index()],
        young_women: totals[Stratum::YoungWomen.index()],
    })
}

/// Computes the stratum weights and writes them to the `Weight` column
/// without logging. Used for bootstrap replicas.
pub fn reweight(
    database: &mut Database,
    census: &CensusTotals,
) -> Result<StrataWeights, WeightError> {
    let weights = compute_strata_weights(database, census)?;
    let column: Array1<f64> = {
        let ages = database.column(schema::AGE)?;
        let females = database.column(schema::FEMALE)?;
        ages.iter()
            .zip(females.iter())
            .map(|(&age, &female)| weights.weight_of(Stratum::of(age, female)))
            .collect()
    };
    database.insert_column(schema::WEIGHT, column)?;
    Ok(weights)
}

/// Computes the stratum weights and writes them to the `Weight` column.
pub fn apply_weights(
    database: &mut Database,
    census: &CensusTotals,
) -> Result<StrataWeights, WeightError> {
    let weights = reweight(database, census)?;

    let total: f64 = database.column(schema::WEIGHT)?.sum();
    log::info!(
        "Post-stratification weights sum to {:.3} over {} observations.",
        total,
        weights.sample_size
    );
    Ok(weights)
}
