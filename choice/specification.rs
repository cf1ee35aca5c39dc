//! # Mode Choice Specifications
//!
//! The four travel mode models shipped with this crate. Each one declares its
//! betas, the utility of every alternative and, for the nested model, the nest
//! structure. They share the same alternatives and the same data layout:
//!
//! | model  | structure | additions over the baseline                           |
//! |--------|-----------|-------------------------------------------------------|
//! | model0 | logit     | transit duration includes interchange time            |
//! | model2 | logit     | ASCs segmented by age group and trip purpose          |
//! | model3 | logit     | Box-Cox durations, walking time by age, car traffic   |
//! | model4 | nested    | model3 with motorized / non-motorized nests           |

use crate::choice::data::{DataError, Database, schema};
use crate::choice::expression::{
    DiscreteSegmentation, Expr, ExpressionError, ParameterSet, box_cox, segment_parameter,
};
use crate::choice::scenario::Scenario;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Name of the cost coefficient shared by the transit and car utilities.
pub const COST_PARAMETER: &str = "B_COST";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alternative {
    Walk,
    Bike,
    Pt,
    Car,
}

impl Alternative {
    pub const ALL: [Alternative; 4] = [
        Alternative::Walk,
        Alternative::Bike,
        Alternative::Pt,
        Alternative::Car,
    ];

    /// Code of the alternative in the `travel_mode` column.
    pub fn code(self) -> u8 {
        self.index() as u8 + 1
    }

    pub fn from_code(code: f64) -> Option<Self> {
        Self::ALL.into_iter().find(|alt| alt.code() as f64 == code)
    }

    /// Position of the alternative in utility and probability vectors.
    pub fn index(self) -> usize {
        match self {
            Alternative::Walk => 0,
            Alternative::Bike => 1,
            Alternative::Pt => 2,
            Alternative::Car => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Alternative::Walk => "walk",
            Alternative::Bike => "bike",
            Alternative::Pt => "PT",
            Alternative::Car => "car",
        }
    }

    /// Travel duration column entering the utility of this alternative.
    pub fn duration_variable(self) -> &'static str {
        match self {
            Alternative::Walk => schema::DUR_WALKING,
            Alternative::Bike => schema::DUR_CYCLING,
            Alternative::Pt => schema::DUR_PT,
            Alternative::Car => schema::DUR_DRIVING,
        }
    }

    /// Monetary cost column, for the alternatives that have one.
    pub fn cost_variable(self) -> Option<&'static str> {
        match self {
            Alternative::Pt => Some(schema::COST_TRANSIT),
            Alternative::Car => Some(schema::COST_DRIVING),
            Alternative::Walk | Alternative::Bike => None,
        }
    }
}

impl fmt::Display for Alternative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Linear multinomial logit.
    Model0,
    /// Logit with ASCs segmented by age group and trip purpose.
    Model2,
    /// Logit with Box-Cox transformed durations.
    Model3,
    /// Nested logit with Box-Cox transformed durations.
    Model4,
}

impl ModelKind {
    pub fn name(self) -> &'static str {
        match self {
            ModelKind::Model0 => "model0",
            ModelKind::Model2 => "model2",
            ModelKind::Model3 => "model3",
            ModelKind::Model4 => "model4",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A group of alternatives sharing a scale parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Nest {
    pub name: String,
    pub scale: Expr,
    pub members: Vec<Alternative>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Structure {
    Logit,
    /// Alternatives that belong to no nest form a nest of their own with scale 1.
    Nested(Vec<Nest>),
}

/// A complete model: betas, utilities, availability and structure.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpecification {
    pub kind: ModelKind,
    pub parameters: ParameterSet,
    /// Utilities in `Alternative::index` order.
    pub utilities: Vec<Expr>,
    pub availability: [bool; 4],
    pub structure: Structure,
    /// Columns computed from other columns before estimation, in order.
    definitions: Vec<(String, Expr)>,
    uses_age_group: bool,
}

impl ModelSpecification {
    pub fn build(kind: ModelKind) -> Result<Self, ExpressionError> {
        let mut p = ParameterSet::new();

        let mut asc_car = p.free("ASC_CAR", 0.0)?;
        let mut asc_pt = p.free("ASC_PT", 0.0)?;
        let mut asc_walk = p.free("ASC_WALK", 0.0)?;
        let mut asc_bike = p.fixed("ASC_BIKE", 0.0)?;
        let b_time_car = p.free("B_TIME_CAR", 0.0)?;
        let b_time_pt = p.free("B_TIME_PT", 0.0)?;
        let mut b_time_walk = p.free("B_TIME_WALK", 0.0)?;
        let b_time_bike = p.free("B_TIME_BIKE", 0.0)?;
        let b_cost = p.free(COST_PARAMETER, 0.0)?;

        let age_segments = DiscreteSegmentation::new(
            schema::AGE_GROUP,
            &[
                (0.0, "young"),
                (1.0, "young_adult"),
                (2.0, "adult"),
                (3.0, "senior"),
            ],
        );

        let pt_components = Expr::var(schema::DUR_PT_ACCESS)
            + Expr::var(schema::DUR_PT_RAIL)
            + Expr::var(schema::DUR_PT_BUS);
        let dur_pt_definition = match kind {
            ModelKind::Model0 => {
                pt_components
                    + Expr::var(schema::DUR_PT_INT) * Expr::var(schema::PT_INTERCHANGES)
            }
            _ => pt_components + Expr::var(schema::DUR_PT_INT),
        };
        let definitions = vec![
            (
                schema::COST_DRIVING.to_string(),
                Expr::var(schema::COST_DRIVING_FUEL) + Expr::var(schema::COST_DRIVING_CCHARGE),
            ),
            (schema::DUR_PT.to_string(), dur_pt_definition),
        ];

        let uses_age_group = kind != ModelKind::Model0;
        match kind {
            ModelKind::Model0 => {}
            ModelKind::Model2 => {
                let purpose_levels: Vec<(f64, String)> =
                    (1..=5).map(|i| (i as f64, format!("purpose_{i}"))).collect();
                let purpose_refs: Vec<(f64, &str)> = purpose_levels
                    .iter()
                    .map(|(level, label)| (*level, label.as_str()))
                    .collect();
                let segments = [
                    age_segments.clone(),
                    DiscreteSegmentation::new(schema::PURPOSE, &purpose_refs),
                ];
                asc_car = segment_parameter(&mut p, "ASC_CAR", &segments)?;
                asc_pt = segment_parameter(&mut p, "ASC_PT", &segments)?;
                asc_walk = segment_parameter(&mut p, "ASC_WALK", &segments)?;
                asc_bike = segment_parameter(&mut p, "ASC_BIKE", &segments)?;
            }
            ModelKind::Model3 | ModelKind::Model4 => {
                b_time_walk = segment_parameter(&mut p, "B_TIME_WALK", &[age_segments.clone()])?;
            }
        }

        let box_cox_lambda = match kind {
            ModelKind::Model3 | ModelKind::Model4 => Some(p.free("LAMBDA", 1.0)?),
            _ => None,
        };
        let duration = |alt: Alternative| {
            let x = Expr::var(alt.duration_variable());
            match &box_cox_lambda {
                Some(lambda) => box_cox(x, lambda.clone()),
                None => x,
            }
        };

        let v_walk = asc_walk + b_time_walk * duration(Alternative::Walk);
        let v_bike = asc_bike + b_time_bike * duration(Alternative::Bike);
        let v_pt = asc_pt
            + b_time_pt * duration(Alternative::Pt)
            + b_cost.clone() * Expr::var(schema::COST_TRANSIT);
        let mut v_car = asc_car
            + b_time_car * duration(Alternative::Car)
            + b_cost * Expr::var(schema::COST_DRIVING);
        if box_cox_lambda.is_some() {
            let b_traffic = p.free("B_DRIVING_TRAFFIC_PERCENT", 0.0)?;
            v_car = v_car + b_traffic * Expr::var(schema::DRIVING_TRAFFIC_PERCENT);
        }

        let structure = match kind {
            ModelKind::Model4 => {
                let mu = p.bounded("mu", 1.0, Some(1.0), Some(10.0))?;
                Structure::Nested(vec![
                    Nest {
                        name: "motorized".to_string(),
                        scale: mu,
                        members: vec![Alternative::Pt, Alternative::Car],
                    },
                    Nest {
                        name: "non_motorized".to_string(),
                        scale: Expr::constant(1.0),
                        members: vec![Alternative::Walk, Alternative::Bike],
                    },
                ])
            }
            _ => Structure::Logit,
        };

        Ok(Self {
            kind,
            parameters: p,
            utilities: vec![v_walk, v_bike, v_pt, v_car],
            availability: [true; 4],
            structure,
            definitions,
            uses_age_group,
        })
    }

    pub fn utility(&self, alternative: Alternative) -> &Expr {
        &self.utilities[alternative.index()]
    }

    /// Adds the derived columns this model reads and validates every input column.
    pub fn prepare(&self, database: &mut Database) -> Result<(), DataError> {
        if self.uses_age_group {
            database.require([schema::AGE])?;
            database.add_age_group()?;
        }
        for (name, definition) in &self.definitions {
            database.require(definition.variables().iter().map(String::as_str))?;
            database.define_variable(name, definition)?;
        }
        let required = self.required_columns();
        database.require(required.iter().map(String::as_str))
    }

    /// Columns of the survey file the model depends on.
    pub fn required_columns(&self) -> BTreeSet<String> {
        let derived: BTreeSet<&str> = self
            .definitions
            .iter()
            .map(|(name, _)| name.as_str())
            .chain(self.uses_age_group.then_some(schema::AGE_GROUP))
            .collect();

        let mut columns: BTreeSet<String> = self
            .utilities
            .iter()
            .flat_map(Expr::variables)
            .chain(self.definitions.iter().flat_map(|(_, e)| e.variables()))
            .filter(|name| !derived.contains(name.as_str()))
            .collect();
        columns.insert(schema::TRAVEL_MODE.to_string());
        if self.uses_age_group {
            columns.insert(schema::AGE.to_string());
        }
        columns
    }

    /// Copy of the model where the scenario variable is scaled inside the
    /// utility of the scenario alternative only.
    pub fn with_scenario(&self, scenario: &Scenario) -> Self {
        let mut scenario_model = self.clone();
        let index = scenario.alternative.index();
        scenario_model.utilities[index] =
            self.utilities[index].scale_variable(&scenario.variable, scenario.factor);
        scenario_model
    }

    /// Human-readable listing of the utilities.
    pub fn describe(&self) -> String {
        Alternative::ALL
            .iter()
            .map(|&alt| {
                format!(
                    "V_{} = {}",
                    alt.label(),
                    self.utility(alt).describe(&self.parameters)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
