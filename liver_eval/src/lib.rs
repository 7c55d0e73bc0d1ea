pub mod cli;
pub mod commands;
pub mod dataset;
pub mod metrics;
