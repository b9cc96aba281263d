//! crisisd - incident correlation and deduplication engine.
//!
//! For every newly opened support ticket the engine decides one of:
//! link to an already-open incident, open a new incident, or do nothing.
//! The pipeline is stateless per evaluation: every decision is recomputed
//! from persisted state so the engine can run behind multiple replicas.

pub mod cluster;
pub mod correlator;
pub mod engine;
pub mod matcher;
pub mod server;
pub mod signals;
pub mod similarity;
pub mod store;
