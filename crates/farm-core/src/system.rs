//! Domain system contract: each system owns one slice of world state and is
//! the only writer to it.

use std::any::Any;
use std::fmt;

use async_trait::async_trait;
use contracts::{ActionEnvelope, ActionError, ActionOutcome, DomainEvent, WorldState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SystemId {
    Buildings,
    Crops,
    Animals,
    Economy,
    Inventory,
}

impl SystemId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buildings => "buildings",
            Self::Crops => "crops",
            Self::Animals => "animals",
            Self::Economy => "economy",
            Self::Inventory => "inventory",
        }
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one system's slice, handed back to the session for assembly
/// into the aggregate `WorldState`.
#[derive(Debug, Clone, PartialEq)]
pub enum StateSlice {
    Buildings(contracts::GridState),
    Crops(contracts::CropsState),
    Animals(contracts::AnimalsState),
    Inventories(contracts::InventoriesState),
    Economy(contracts::EconomyState),
}

/// A capability unit that validates and applies actions against its state
/// slice.
///
/// `validate` is pure and synchronous: cheap rejects short-circuit before any
/// external call. `apply` performs the mutation and may await injected ports;
/// the check-cost, apply-cost, mutate-local ordering is mandatory so a failed
/// external call leaves the slice untouched.
#[async_trait]
pub trait DomainSystem: Send {
    fn id(&self) -> SystemId;

    /// Adopt the slice from a loaded world or default-initialize it. Called
    /// once per session before any action is routed here.
    fn init(&mut self, state: &WorldState);

    fn validate(
        &self,
        env: &ActionEnvelope,
        view: &WorldState,
        now_ms: u64,
    ) -> Result<(), ActionError>;

    async fn apply(
        &mut self,
        env: &ActionEnvelope,
        view: &WorldState,
        now_ms: u64,
    ) -> Result<ActionOutcome, ActionError>;

    fn state_slice(&self) -> StateSlice;

    /// Periodic progression unrelated to discrete actions. Idempotent per
    /// call and independent of queue ordering.
    fn on_tick(&mut self, _delta_ms: u64, _now_ms: u64, _events: &mut Vec<DomainEvent>) {}

    /// Downcast hook for session-mediated cross-system effects.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
