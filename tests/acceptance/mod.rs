//! Acceptance test modules.

mod common;
mod config_test;
mod estimator_test;
mod pipeline_test;
