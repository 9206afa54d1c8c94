//! fcip: forensic analysis orchestrator.
//!
//! Runs evidence-analysis engines over a case's documents through the
//! S.A.M. phases (ANCHOR → INHERIT → COMPOUND → ARRIVE) and assembles
//! citation-backed findings with reproducible audit trails.

pub mod audit;
pub mod document;
pub mod engine;
pub mod errors;
pub mod fcip_config;
pub mod findings;
pub mod logging;
pub mod orchestrator;
pub mod sam;
pub mod storage;
pub mod text;
pub mod tracker;

pub use orchestrator::Orchestrator;
