//! FaultInjector - Simulated Failures
//!
//! TigerStyle: Faults are either forced (a toggle a test flips) or
//! probabilistic (drawn from a seeded RNG). Forced faults win and are
//! checked in a fixed order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use super::rng::DeterministicRng;

// =============================================================================
// FaultType
// =============================================================================

/// A failure the simulated backend can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultType {
    /// The operation's deadline passed
    Timeout,
    /// The operation was cancelled
    Cancel,
    /// The backend was unreachable
    Connection,
    /// An engine constraint rejected a write
    Constraint,
}

impl FaultType {
    /// Every fault, in the order forced toggles are checked.
    pub const ALL: [FaultType; 4] = [
        Self::Timeout,
        Self::Cancel,
        Self::Connection,
        Self::Constraint,
    ];

    /// Whether this fault can hit read-only operations.
    #[must_use]
    pub fn affects_reads(self) -> bool {
        !matches!(self, Self::Constraint)
    }

    fn index(self) -> usize {
        match self {
            Self::Timeout => 0,
            Self::Cancel => 1,
            Self::Connection => 2,
            Self::Constraint => 3,
        }
    }
}

// =============================================================================
// FaultConfig
// =============================================================================

/// A fault and the probability it fires on each eligible operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultConfig {
    /// Which fault
    pub fault_type: FaultType,
    /// Chance per operation, in `[0, 1]`
    pub probability: f64,
}

impl FaultConfig {
    /// Create a fault config.
    ///
    /// # Panics
    /// Panics if `probability` is outside `0.0..=1.0`.
    #[must_use]
    pub fn new(fault_type: FaultType, probability: f64) -> Self {
        // Precondition
        assert!(
            (0.0..=1.0).contains(&probability),
            "probability must be in [0, 1], got {probability}"
        );
        Self {
            fault_type,
            probability,
        }
    }
}

// =============================================================================
// FaultInjector
// =============================================================================

/// Decides, per operation, whether a fault fires.
#[derive(Debug)]
pub struct FaultInjector {
    rng: Mutex<DeterministicRng>,
    faults: Vec<FaultConfig>,
    forced: [AtomicBool; 4],
    injected: AtomicU64,
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self::new(0)
    }
}

impl FaultInjector {
    /// An injector with no faults configured.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        FaultInjectorBuilder::new(seed).build()
    }

    /// Start configuring an injector.
    #[must_use]
    pub fn builder(seed: u64) -> FaultInjectorBuilder {
        FaultInjectorBuilder::new(seed)
    }

    /// Force `fault` on or off for every eligible operation.
    pub fn set_forced(&self, fault: FaultType, on: bool) {
        self.forced[fault.index()].store(on, Ordering::SeqCst);
    }

    /// Whether `fault` is currently forced.
    #[must_use]
    pub fn is_forced(&self, fault: FaultType) -> bool {
        self.forced[fault.index()].load(Ordering::SeqCst)
    }

    /// Clear every forced toggle. Probabilistic faults stay configured.
    pub fn reset_forced(&self) {
        for fault in FaultType::ALL {
            self.set_forced(fault, false);
        }
    }

    /// Number of faults fired so far.
    #[must_use]
    pub fn injected_count(&self) -> u64 {
        self.injected.load(Ordering::SeqCst)
    }

    /// The fault to raise for the next operation, if any.
    ///
    /// `write` marks mutating operations; constraint faults only hit those.
    pub fn check(&self, write: bool) -> Option<FaultType> {
        let eligible = |fault: FaultType| write || fault.affects_reads();

        let fired = FaultType::ALL
            .into_iter()
            .find(|&fault| eligible(fault) && self.is_forced(fault))
            .or_else(|| {
                let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
                self.faults
                    .iter()
                    .filter(|config| eligible(config.fault_type))
                    .find(|config| rng.next_bool(config.probability))
                    .map(|config| config.fault_type)
            });

        if let Some(fault) = fired {
            self.injected.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(?fault, write, "fault injected");
        }
        fired
    }
}

/// Builder for [`FaultInjector`].
#[derive(Debug)]
pub struct FaultInjectorBuilder {
    seed: u64,
    faults: Vec<FaultConfig>,
}

impl FaultInjectorBuilder {
    /// Start with no faults.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            faults: Vec::new(),
        }
    }

    /// Add a probabilistic fault.
    #[must_use]
    pub fn with_fault(mut self, config: FaultConfig) -> Self {
        self.faults.push(config);
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> FaultInjector {
        FaultInjector {
            rng: Mutex::new(DeterministicRng::new(self.seed)),
            faults: self.faults,
            forced: Default::default(),
            injected: AtomicU64::new(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_faults_by_default() {
        let injector = FaultInjector::new(1);
        assert!((0..100).all(|_| injector.check(true).is_none()));
        assert_eq!(injector.injected_count(), 0);
    }

    #[test]
    fn test_forced_order() {
        let injector = FaultInjector::new(1);
        injector.set_forced(FaultType::Connection, true);
        injector.set_forced(FaultType::Timeout, true);
        assert_eq!(injector.check(false), Some(FaultType::Timeout));

        injector.set_forced(FaultType::Timeout, false);
        assert_eq!(injector.check(false), Some(FaultType::Connection));

        injector.reset_forced();
        assert_eq!(injector.check(true), None);
        assert_eq!(injector.injected_count(), 2);
    }

    #[test]
    fn test_constraint_only_hits_writes() {
        let injector = FaultInjector::new(1);
        injector.set_forced(FaultType::Constraint, true);
        assert_eq!(injector.check(false), None);
        assert_eq!(injector.check(true), Some(FaultType::Constraint));
    }

    #[test]
    fn test_probabilistic_is_reproducible() {
        let run = |seed| {
            let injector = FaultInjector::builder(seed)
                .with_fault(FaultConfig::new(FaultType::Connection, 0.3))
                .build();
            (0..200).map(|_| injector.check(true)).collect::<Vec<_>>()
        };

        let first = run(99);
        assert_eq!(first, run(99));

        let fired = first.iter().filter(|f| f.is_some()).count();
        assert!(fired > 20 && fired < 120, "fired {fired} of 200");
    }

    #[test]
    fn test_certain_fault_always_fires() {
        let injector = FaultInjector::builder(5)
            .with_fault(FaultConfig::new(FaultType::Timeout, 1.0))
            .build();
        assert!((0..50).all(|_| injector.check(false) == Some(FaultType::Timeout)));
    }

    #[test]
    #[should_panic(expected = "probability")]
    fn test_config_rejects_bad_probability() {
        let _ = FaultConfig::new(FaultType::Cancel, -0.1);
    }
}
