//! DST - Deterministic Simulation Testing
//!
//! TigerBeetle/FoundationDB-style support for the simulated backend.
//!
//! # Philosophy
//!
//! > "If you're not testing with fault injection, you're not testing."
//!
//! # Usage
//!
//! ```rust
//! use vitals_core::dst::{FaultConfig, FaultInjector, FaultType};
//! use vitals_core::SimHealthStore;
//!
//! let faults = FaultInjector::builder(42)
//!     .with_fault(FaultConfig::new(FaultType::Connection, 0.1))
//!     .build();
//! let store = SimHealthStore::new().with_faults(faults);
//! assert!(store.is_empty());
//! ```
//!
//! Run with explicit seed for reproducibility:
//! ```bash
//! DST_SEED=12345 cargo test
//! ```

mod clock;
mod fault;
mod rng;

pub use clock::SimClock;
pub use fault::{FaultConfig, FaultInjector, FaultInjectorBuilder, FaultType};
pub use rng::{DeterministicRng, DST_SEED_ENV};
