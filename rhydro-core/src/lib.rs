pub mod boundary;
pub mod errors;
pub mod expression;
pub mod function;
pub mod missing;
pub mod parameters;
pub mod series;
pub mod statistics;
pub mod timeseries;
pub mod topology;
