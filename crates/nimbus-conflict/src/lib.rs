//! nimbus-conflict - conflict detection, classification, and resolution
//!
//! Implements the conflict engine of the Nimbus sync core:
//!
//! - [`ConflictDetector`] - decides whether two replicas diverge and
//!   classifies the divergence (`type` > `name` > `content`)
//! - [`ConflictResolver`] - executes a chosen [`Resolution`] against the
//!   store, transport, and filesystem
//! - [`StrategyPolicy`] - glob-scoped rules that auto-select resolutions
//!   for batch operations
//! - [`ConflictNamer`] - generates `(Conflicted Copy ...)` sibling names
//!
//! Conflicts are not errors: an item in conflict state is parked until a
//! resolution is applied, and the reconciliation loop skips it.
//!
//! [`Resolution`]: nimbus_core::domain::Resolution

pub mod detector;
pub mod namer;
pub mod policy;
pub mod resolver;

pub use detector::ConflictDetector;
pub use namer::ConflictNamer;
pub use policy::StrategyPolicy;
pub use resolver::{BatchOutcome, BatchResult, ConflictResolver};
