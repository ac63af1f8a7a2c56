//! Authoritative farm session kernel: serializes concurrent client actions
//! into one ordered stream, validates them against live world state, applies
//! them atomically, and republishes versioned deltas.

pub mod grid;
pub mod ports;
pub mod registry;
pub mod router;
pub mod system;
pub mod systems;
pub mod world;

pub use grid::{GridError, OccupancyIndex};
pub use ports::{BoundedCostPort, CostError, CostPort, WalletLedger};
pub use registry::{default_registry, DefinitionRegistry};
pub use system::{DomainSystem, StateSlice, SystemId};
pub use world::{DrainMetrics, FarmSession};
