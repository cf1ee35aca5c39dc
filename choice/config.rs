//! Analysis settings read from a TOML file. Every section is optional and
//! falls back to its defaults, so an empty file is a valid configuration.

use crate::choice::estimate::EstimationConfig;
use crate::choice::scenario::Scenario;
use crate::choice::weights::CensusTotals;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse configuration file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Confidence level must lie strictly between 0 and 1, got {0}.")]
    InvalidConfidenceLevel(f64),
    #[error("The number of threads must be at least 1.")]
    ZeroThreads,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub census: CensusTotals,
    pub estimation: EstimationConfig,
    /// Worker threads; all logical cores when absent.
    pub threads: Option<usize>,
    pub confidence_level: f64,
    /// Beta draws for the market share intervals when no bootstrap draws were saved.
    pub sensitivity_draws: usize,
    pub scenarios: Vec<Scenario>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            census: CensusTotals::default(),
            estimation: EstimationConfig::default(),
            threads: None,
            confidence_level: 0.9,
            sensitivity_draws: 200,
            scenarios: Scenario::defaults(),
        }
    }
}

impl AnalysisConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Loads `path` when given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(ConfigError::InvalidConfidenceLevel(self.confidence_level));
        }
        if self.threads == Some(0) {
            return Err(ConfigError::ZeroThreads);
        }
        Ok(())
    }

    /// Configured thread count, or the number of logical cores.
    pub fn thread_count(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choice::specification::Alternative;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_file_gives_defaults() {
        let file = NamedTempFile::new().unwrap();
        let config = AnalysisConfig::load(file.path()).unwrap();
        assert_eq!(config, AnalysisConfig::default());
        assert_eq!(config.scenarios.len(), 2);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
threads = 2
confidence_level = 0.95

[census]
old_men = 1000.0

[estimation]
weighted = true

[[scenarios]]
alternative = "pt"
variable = "cost_transit"
factor = 0.5
"#
        )
        .unwrap();
        let config = AnalysisConfig::load(file.path()).unwrap();
        assert_eq!(config.thread_count(), 2);
        assert_eq!(config.confidence_level, 0.95);
        assert_eq!(config.census.old_men, 1000.0);
        assert_eq!(config.census.young_men, CensusTotals::default().young_men);
        assert!(config.estimation.weighted);
        assert_eq!(config.estimation.max_iterations, 1000);
        assert_eq!(
            config.scenarios,
            vec![Scenario::new(Alternative::Pt, "cost_transit", 0.5)]
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "confidence_level = 1.5").unwrap();
        assert!(matches!(
            AnalysisConfig::load(file.path()),
            Err(ConfigError::InvalidConfidenceLevel(_))
        ));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "threads = \"many\"").unwrap();
        assert!(matches!(
            AnalysisConfig::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AnalysisConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
