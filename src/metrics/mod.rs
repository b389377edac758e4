//! Metrics export.
//!
//! Run counters can be pushed to a Prometheus Push Gateway once a batch has
//! finished.
//!
//! # Submodules
//!
//! - `prom` - Prometheus metrics integration

pub mod prom;
