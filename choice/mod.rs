pub mod config;
pub mod data;
pub mod dual;
pub mod estimate;
pub mod expression;
pub mod faer_ndarray;
pub mod models;
pub mod report;
pub mod results;
pub mod scenario;
pub mod simulate;
pub mod specification;
pub mod weights;
