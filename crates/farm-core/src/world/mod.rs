//! The farm session: single-writer owner of the action queue, the domain
//! systems, and the versioned outbox. Ingress only ever appends to the
//! queue; all mutation happens on the drain and tick paths.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

mod drain;
mod events;
mod queue;
mod snapshot;
mod step;

use contracts::{
    ActionEnvelope, ActionError, ActionKind, ActionOutcome, PlayerProfile, PlayersState,
    SessionConfig, SessionEvent, WorldState,
};

use crate::ports::{BoundedCostPort, CostPort, WalletLedger};
use crate::registry::{default_registry, DefinitionRegistry};
use crate::system::{DomainSystem, SystemId};
use crate::systems::{
    AnimalsSystem, BuildingsSystem, CropsSystem, EconomySystem, InventorySystem,
};

/// Bounded ring of recently processed `action_id`s for duplicate detection.
#[derive(Debug)]
struct RecentActionIds {
    ring: VecDeque<String>,
    seen: BTreeSet<String>,
    capacity: usize,
}

impl RecentActionIds {
    fn new(capacity: usize) -> Self {
        Self {
            ring: VecDeque::new(),
            seen: BTreeSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record the id; returns false if it was already seen.
    fn observe(&mut self, action_id: &str) -> bool {
        if self.seen.contains(action_id) {
            return false;
        }
        self.ring.push_back(action_id.to_string());
        self.seen.insert(action_id.to_string());
        while self.ring.len() > self.capacity {
            if let Some(evicted) = self.ring.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainMetrics {
    pub processed: usize,
    pub applied: usize,
    pub rejected: usize,
    pub carried_over: usize,
}

pub struct FarmSession {
    config: SessionConfig,
    version: u64,
    tick: u64,
    last_saved_at_ms: Option<u64>,
    players: PlayersState,
    systems: BTreeMap<SystemId, Box<dyn DomainSystem>>,
    queue: VecDeque<ActionEnvelope>,
    recent_action_ids: RecentActionIds,
    outbox: Vec<SessionEvent>,
    dirty: bool,
    last_drain: DrainMetrics,
}

impl FarmSession {
    /// Build a session with the default catalog and a fresh in-memory wallet
    /// ledger behind a bounded cost port.
    pub fn new(config: SessionConfig) -> Self {
        let ledger = Arc::new(WalletLedger::new());
        Self::with_collaborators(config, Arc::new(default_registry()), ledger)
    }

    pub fn with_collaborators(
        config: SessionConfig,
        registry: Arc<DefinitionRegistry>,
        ledger: Arc<WalletLedger>,
    ) -> Self {
        let cost_port: Arc<dyn CostPort> = Arc::new(BoundedCostPort::new(
            Arc::clone(&ledger),
            Duration::from_millis(config.cost_timeout_ms),
        ));
        Self::with_cost_port(config, registry, ledger, cost_port)
    }

    /// Full control over the cost boundary, used by tests and by embedders
    /// wiring a real external ledger.
    pub fn with_cost_port(
        config: SessionConfig,
        registry: Arc<DefinitionRegistry>,
        ledger: Arc<WalletLedger>,
        cost_port: Arc<dyn CostPort>,
    ) -> Self {
        let systems: Vec<Box<dyn DomainSystem>> = vec![
            Box::new(BuildingsSystem::new(
                Arc::clone(&registry),
                Arc::clone(&cost_port),
                config.bounds,
            )),
            Box::new(CropsSystem::new(
                Arc::clone(&registry),
                Arc::clone(&cost_port),
                config.bounds,
            )),
            Box::new(AnimalsSystem::new(
                Arc::clone(&registry),
                Arc::clone(&cost_port),
            )),
            Box::new(EconomySystem::new(Arc::clone(&registry), ledger)),
            Box::new(InventorySystem::new()),
        ];
        Self::with_systems(config, systems)
    }

    /// Assemble a session from an explicit system set. Kinds whose owner is
    /// absent are rejected as unrouted at drain time.
    pub fn with_systems(config: SessionConfig, systems: Vec<Box<dyn DomainSystem>>) -> Self {
        let dedup_capacity = config.action_dedup_capacity;
        let mut session = Self {
            version: 0,
            tick: 0,
            last_saved_at_ms: None,
            players: PlayersState::default(),
            systems: systems
                .into_iter()
                .map(|system| (system.id(), system))
                .collect(),
            queue: VecDeque::new(),
            recent_action_ids: RecentActionIds::new(dedup_capacity),
            outbox: Vec::new(),
            dirty: false,
            last_drain: DrainMetrics::default(),
            config,
        };
        let empty = WorldState::empty(session.config.session_id.clone(), session.config.bounds);
        session.restore(&empty);
        session
    }

    /// Adopt a loaded world: slices go to their systems, meta stays here.
    pub fn restore(&mut self, state: &WorldState) {
        for system in self.systems.values_mut() {
            system.init(state);
        }
        self.version = state.version;
        self.tick = state.tick;
        self.last_saved_at_ms = state.last_saved_at_ms;
        self.players = state.players.clone();
    }

    /// Register or refresh a player profile; the joining client is pushed a
    /// full snapshot by the caller.
    pub fn register_player(&mut self, user_id: &str, now_ms: u64) {
        let profile = self
            .players
            .by_id
            .entry(user_id.to_string())
            .or_insert_with(|| PlayerProfile {
                user_id: user_id.to_string(),
                joined_at_ms: now_ms,
                last_seen_ms: now_ms,
            });
        profile.last_seen_ms = now_ms;
        self.dirty = true;
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn dirty(&self) -> bool {
        self.dirty
    }

    /// Downstream persistence marks the session clean after a save.
    pub fn mark_saved(&mut self, now_ms: u64) {
        self.dirty = false;
        self.last_saved_at_ms = Some(now_ms);
    }

    pub fn last_drain_metrics(&self) -> DrainMetrics {
        self.last_drain
    }
}
