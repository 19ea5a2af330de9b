//! Command implementations for the Kiln CLI.

pub mod check;
pub mod dataset;
pub mod run;
pub mod types;

pub use types::{DatasetCommand, EnvironmentArgs, RunArgs};
