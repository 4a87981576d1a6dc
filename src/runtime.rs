//! Runtime glue: validated configuration and telemetry.

pub mod config;
pub mod telemetry;
