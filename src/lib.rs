//! pbtgen library crate
//!
//! Generates, validates and repairs Hypothesis property-based tests for the
//! functions of a Python project. The binary wires these modules together;
//! tests and benchmarks drive them directly with scripted collaborators.

pub mod config;
pub mod discovery;
pub mod llm;
pub mod model;
pub mod pipeline;
pub mod result_log;
pub mod retrieval;
pub mod sandbox;
pub mod scheduler;
pub mod signals;
pub mod telemetry;
