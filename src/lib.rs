//! Library root for the `assure_engine` crate
//! Pre-execution risk scoring for operator-initiated infrastructure actions

// Core error handling
pub mod errors;

// Configuration & CLI
pub mod cli;
pub mod config_loader;

// Request and result model
pub mod risk_types;

// Scoring pipeline
pub mod dependency_graph;
pub mod explainer;
pub mod jitter;
pub mod predictor;
pub mod signals;
pub mod synthesizer;
pub mod verdict;

// Adaptive weights
pub mod bias_table;
pub mod learning;

// Audit
pub mod audit_store;

// Engine & web server interface
pub mod risk_engine;
pub mod riskweb;
