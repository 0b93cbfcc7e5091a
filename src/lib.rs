//! Event-driven trading pipeline
//!
//! Feed -> features -> strategy -> risk gate -> broker -> ledger, with
//! results fanned out on an in-process event bus and the decision policy
//! hot-swapped from a versioned model registry.
//!
//! - `adapters`: feed/broker seams, market types, paper implementations
//! - `core`: event bus, ledger, risk, strategies, engine
//! - `registry`: on-disk model versions with atomic activation
//! - `config`: YAML config, runtime knobs, logging

pub mod adapters;
pub mod config;
pub mod core;
pub mod error;
pub mod registry;

pub use error::AppError;
