//! # Report Formatting
//!
//! Plain-text and LaTeX renderings of estimation results and forecasts. Each
//! report is a small wrapper implementing `Display`, so the binary prints it
//! and tests compare the rendered string.

use crate::choice::results::{EstimationResults, GeneralStatistics};
use crate::choice::scenario::{Forecast, ScenarioOutcome};
use crate::choice::simulate::{Elasticity, Interval, MarketShares, ValueOfTime};
use crate::choice::specification::Alternative;
use itertools::Itertools;
use std::fmt;

const NAME_WIDTH: usize = 28;

/// Estimates with classical and robust tests, one row per free beta.
pub struct ParameterTable<'a>(pub &'a EstimationResults);

impl fmt::Display for ParameterTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bootstrap = self
            .0
            .parameters
            .iter()
            .any(|p| p.bootstrap_std_err.is_some());
        write!(
            f,
            "{:<NAME_WIDTH$} {:>12} {:>12} {:>9} {:>9} {:>14} {:>12} {:>13}",
            "", "Value", "Std err", "t-test", "p-value", "Rob. Std err", "Rob. t-test", "Rob. p-value"
        )?;
        if bootstrap {
            write!(f, " {:>14} {:>14}", "Boot. Std err", "Boot. p-value")?;
        }
        writeln!(f)?;
        for p in &self.0.parameters {
            write!(
                f,
                "{:<NAME_WIDTH$} {:>12.6} {:>12.6} {:>9.3} {:>9.4} {:>14.6} {:>12.3} {:>13.4}",
                p.name,
                p.value,
                p.std_err,
                p.t_test,
                p.p_value,
                p.robust_std_err,
                p.robust_t_test,
                p.robust_p_value
            )?;
            if let (Some(se), Some(pv)) = (p.bootstrap_std_err, p.bootstrap_p_value) {
                write!(f, " {:>14.6} {:>14.4}", se, pv)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

pub struct StatisticsTable<'a>(pub &'a GeneralStatistics);

impl fmt::Display for StatisticsTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0;
        let rows: [(&str, String); 19] = [
            ("Number of estimated parameters", s.n_parameters.to_string()),
            ("Sample size", s.sample_size.to_string()),
            ("Excluded observations", s.excluded_observations.to_string()),
            ("Null log likelihood", format!("{:.4}", s.null_log_likelihood)),
            ("Init log likelihood", format!("{:.4}", s.init_log_likelihood)),
            ("Final log likelihood", format!("{:.4}", s.final_log_likelihood)),
            ("Likelihood ratio test for the init. model", format!("{:.4}", s.likelihood_ratio)),
            ("Rho-square for the init. model", format!("{:.4}", s.rho_square)),
            ("Rho-square-bar for the init. model", format!("{:.4}", s.rho_bar_square)),
            ("Rho-square for the null model", format!("{:.4}", s.rho_square_null)),
            ("Rho-square-bar for the null model", format!("{:.4}", s.rho_bar_square_null)),
            ("Akaike Information Criterion", format!("{:.4}", s.akaike)),
            ("Bayesian Information Criterion", format!("{:.4}", s.bayesian)),
            ("Final gradient norm", format!("{:.4e}", s.final_gradient_norm)),
            ("Iterations", s.iterations.to_string()),
            ("Smallest eigenvalue", format!("{:.6e}", s.smallest_eigenvalue)),
            ("Largest eigenvalue", format!("{:.6e}", s.largest_eigenvalue)),
            ("Bootstrapping replications", s.bootstrap_draws.to_string()),
            ("Weighted estimation", s.weighted.to_string()),
        ];
        for (label, value) in rows {
            writeln!(f, "{:<45} {}", format!("{label}:"), value)?;
        }
        Ok(())
    }
}

/// `tabular` environment with the robust statistics.
pub struct LatexTable<'a>(pub &'a EstimationResults);

impl fmt::Display for LatexTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\\begin{{tabular}}{{rlr@{{.}}lr@{{.}}lr@{{.}}lr@{{.}}l}}")?;
        writeln!(
            f,
            "&\\multicolumn{{1}}{{l}}{{Description}}&\\multicolumn{{2}}{{l}}{{Estimate}}&\
             \\multicolumn{{2}}{{l}}{{Robust SE}}&\\multicolumn{{2}}{{l}}{{t-stat.}}&\
             \\multicolumn{{2}}{{l}}{{p-value}}\\\\"
        )?;
        writeln!(f, "\\hline")?;
        for (i, p) in self.0.parameters.iter().enumerate() {
            writeln!(
                f,
                "{}&{}&{}&{}&{}&{}\\\\",
                i + 1,
                p.name.replace('_', "\\_"),
                latex_decimal(p.value, 3),
                latex_decimal(p.robust_std_err, 3),
                latex_decimal(p.robust_t_test, 2),
                latex_decimal(p.robust_p_value, 2)
            )?;
        }
        writeln!(f, "\\hline")?;
        let s = &self.0.statistics;
        writeln!(f, "\\multicolumn{{10}}{{l}}{{Number of observations = {}}}\\\\", s.sample_size)?;
        writeln!(
            f,
            "\\multicolumn{{10}}{{l}}{{$\\mathcal{{L}}(\\hat{{\\beta}}) = {:.3}$}}\\\\",
            s.final_log_likelihood
        )?;
        writeln!(f, "\\multicolumn{{10}}{{l}}{{$\\bar{{\\rho}}^2 = {:.3}$}}\\\\", s.rho_bar_square)?;
        writeln!(f, "\\end{{tabular}}")
    }
}

/// Splits a number at the decimal point for `r@{.}l` columns.
fn latex_decimal(value: f64, decimals: usize) -> String {
    let text = format!("{value:.decimals$}");
    match text.split_once('.') {
        Some((int, frac)) => format!("{int}&{frac}"),
        None => format!("{text}&0"),
    }
}

pub struct ShareLines<'a> {
    pub shares: &'a MarketShares,
    pub intervals: Option<(&'a [Interval; 4], f64)>,
}

impl fmt::Display for ShareLines<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for alt in Alternative::ALL {
            writeln!(
                f,
                "Market share for {}: {:.2}%",
                alt.label(),
                100.0 * self.shares.share(alt)
            )?;
            if let Some((intervals, level)) = self.intervals {
                let interval = intervals[alt.index()];
                writeln!(
                    f,
                    "{:.0}% Confidence interval: [{:.2}%, {:.2}%]",
                    100.0 * level,
                    100.0 * interval.lower,
                    100.0 * interval.upper
                )?;
            }
        }
        Ok(())
    }
}

pub struct ValueOfTimeLines<'a>(pub &'a [ValueOfTime]);

impl fmt::Display for ValueOfTimeLines<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for vot in self.0 {
            writeln!(
                f,
                "Average value of time in {}: {:.2} GBP/hour",
                vot.alternative.label(),
                vot.value
            )?;
        }
        Ok(())
    }
}

pub struct ElasticityLines<'a>(pub &'a [Elasticity]);

impl fmt::Display for ElasticityLines<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for e in self.0.iter().unique_by(|e| e.probability_of) {
            writeln!(
                f,
                "Normalizing factor of {} prob. elast.: {:.4}",
                e.probability_of.label(),
                e.normalizing_factor
            )?;
        }
        for e in self.0 {
            if e.is_direct() {
                writeln!(
                    f,
                    "Direct aggregate elasticity of {} cost: {:.4}",
                    e.cost_of.label(),
                    e.aggregate
                )?;
            } else {
                writeln!(
                    f,
                    "Cross aggregate elasticity of {} cost and {} prob.: {:.4}",
                    e.cost_of.label(),
                    e.probability_of.label(),
                    e.aggregate
                )?;
            }
        }
        Ok(())
    }
}

pub struct ScenarioLines<'a>(pub &'a ScenarioOutcome);

impl fmt::Display for ScenarioLines<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = self.0;
        writeln!(f, "Scenario: {}", outcome.scenario)?;
        for alt in Alternative::ALL {
            writeln!(
                f,
                "Market share for {}: {:.2}% (arc elasticity {:.4})",
                alt.label(),
                100.0 * outcome.shares.share(alt),
                outcome.arc_elasticities[alt.index()]
            )?;
        }
        Ok(())
    }
}

/// The complete forecasting report.
pub struct ForecastReport<'a>(pub &'a Forecast);

impl fmt::Display for ForecastReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let forecast = self.0;
        writeln!(f, "Simulated market shares:")?;
        write!(
            f,
            "{}",
            ShareLines {
                shares: &forecast.base,
                intervals: forecast
                    .intervals
                    .as_ref()
                    .map(|i| (i, forecast.confidence_level)),
            }
        )?;
        writeln!(f, "\nActual market shares from data:")?;
        write!(
            f,
            "{}",
            ShareLines {
                shares: &forecast.actual,
                intervals: None,
            }
        )?;
        writeln!(f)?;
        write!(f, "{}", ValueOfTimeLines(&forecast.values_of_time))?;
        writeln!(f)?;
        write!(f, "{}", ElasticityLines(&forecast.elasticities))?;
        for outcome in &forecast.scenarios {
            writeln!(f)?;
            write!(f, "{}", ScenarioLines(outcome))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choice::data::schema;
    use crate::choice::results::ParameterEstimate;
    use crate::choice::scenario::Scenario;
    use crate::choice::specification::ModelKind;

    fn results() -> EstimationResults {
        EstimationResults {
            model: ModelKind::Model0,
            robust_covariance: vec![vec![0.01]],
            bootstrap: Vec::new(),
            statistics: GeneralStatistics {
                n_parameters: 1,
                sample_size: 100,
                excluded_observations: 0,
                init_log_likelihood: -138.6,
                final_log_likelihood: -120.25,
                null_log_likelihood: -138.6,
                likelihood_ratio: 36.7,
                rho_square: 0.132,
                rho_bar_square: 0.125,
                rho_square_null: 0.132,
                rho_bar_square_null: 0.125,
                akaike: 242.5,
                bayesian: 245.1,
                final_gradient_norm: 1e-7,
                iterations: 12,
                smallest_eigenvalue: 10.0,
                largest_eigenvalue: 10.0,
                bootstrap_draws: 0,
                weighted: false,
            },
            parameters: vec![ParameterEstimate {
                name: "B_COST".to_string(),
                value: -0.5,
                std_err: 0.1,
                t_test: -5.0,
                p_value: 5.7e-7,
                robust_std_err: 0.125,
                robust_t_test: -4.0,
                robust_p_value: 6.3e-5,
                bootstrap_std_err: None,
                bootstrap_p_value: None,
            }],
        }
    }

    #[test]
    fn parameter_table_lists_every_parameter() {
        let text = ParameterTable(&results()).to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Rob. p-value"));
        assert!(!lines[0].contains("Boot."));
        assert!(lines[1].starts_with("B_COST"));
        assert!(lines[1].contains("-0.500000"));
    }

    #[test]
    fn statistics_table_shows_fit_measures() {
        let text = StatisticsTable(&results().statistics).to_string();
        assert!(text.contains("Final log likelihood:"));
        assert!(text.contains("-120.2500"));
        assert!(text.contains("Sample size:"));
    }

    #[test]
    fn latex_decimal_splits_at_the_point() {
        assert_eq!(latex_decimal(-0.5, 3), "-0&500");
        assert_eq!(latex_decimal(12.0, 2), "12&00");
        let table = LatexTable(&results()).to_string();
        assert!(table.contains("B\\_COST"));
        assert!(table.starts_with("\\begin{tabular}"));
        assert!(table.trim_end().ends_with("\\end{tabular}"));
    }

    #[test]
    fn share_lines_use_percentages() {
        let shares = MarketShares {
            shares: [0.1, 0.05, 0.35, 0.5],
        };
        let intervals = [Interval {
            value: 0.1,
            lower: 0.08,
            upper: 0.125,
        }; 4];
        let text = ShareLines {
            shares: &shares,
            intervals: Some((&intervals, 0.9)),
        }
        .to_string();
        assert!(text.contains("Market share for PT: 35.00%"));
        assert!(text.contains("90% Confidence interval: [8.00%, 12.50%]"));
    }

    #[test]
    fn elasticity_lines_distinguish_direct_and_cross() {
        let elasticities = [
            Elasticity {
                cost_of: Alternative::Pt,
                probability_of: Alternative::Pt,
                aggregate: -0.3,
                normalizing_factor: 0.35,
            },
            Elasticity {
                cost_of: Alternative::Car,
                probability_of: Alternative::Pt,
                aggregate: 0.12,
                normalizing_factor: 0.35,
            },
        ];
        let text = ElasticityLines(&elasticities).to_string();
        assert_eq!(text.matches("Normalizing factor of PT").count(), 1);
        assert!(text.contains("Direct aggregate elasticity of PT cost: -0.3000"));
        assert!(text.contains("Cross aggregate elasticity of car cost and PT prob.: 0.1200"));
    }

    #[test]
    fn scenario_lines_name_the_scenario() {
        let outcome = ScenarioOutcome {
            scenario: Scenario::new(Alternative::Car, schema::COST_DRIVING, 1.15),
            shares: MarketShares {
                shares: [0.11, 0.06, 0.38, 0.45],
            },
            arc_elasticities: [0.7, 0.6, 0.5, -0.75],
        };
        let text = ScenarioLines(&outcome).to_string();
        assert!(text.starts_with("Scenario: increase of car cost_driving by 15%"));
        assert!(text.contains("Market share for car: 45.00% (arc elasticity -0.7500)"));
    }
}
