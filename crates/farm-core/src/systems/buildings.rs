//! Buildings system: placement, removal, and upgrade of grid structures.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use contracts::{
    ActionEnvelope, ActionError, ActionOutcome, ActionPayload, BuildingDef, BuildingsDelta,
    CostMap, DomainEvent, DomainEventType, GridBounds, RejectCode, StateDelta, WorldState,
};
use serde_json::json;

use crate::grid::{GridError, OccupancyIndex};
use crate::ports::{CostError, CostPort};
use crate::registry::DefinitionRegistry;
use crate::system::{DomainSystem, StateSlice, SystemId};

pub struct BuildingsSystem {
    registry: Arc<DefinitionRegistry>,
    cost_port: Arc<dyn CostPort>,
    grid: OccupancyIndex,
    bounds: GridBounds,
}

/// Upgrade pricing for level n -> n+1: `floor(base * (n+1) / 2)` per
/// resource. Monotonically non-decreasing in level.
pub fn scaled_upgrade_cost(def: &BuildingDef, level: u8) -> CostMap {
    def.upgrade_cost
        .iter()
        .map(|(kind, amount)| (*kind, amount * (i64::from(level) + 1) / 2))
        .collect()
}

fn cost_rejection(err: CostError) -> ActionError {
    match err {
        CostError::Unavailable(reason) => {
            ActionError::external(RejectCode::CostUnavailable, reason)
        }
        other => ActionError::rejected(RejectCode::CostCheckFailed, other.to_string()),
    }
}

fn grid_rejection(err: GridError) -> ActionError {
    let code = match &err {
        GridError::OutOfBounds { .. } => RejectCode::OutOfBounds,
        GridError::CellOccupied { .. } => RejectCode::CellOccupied,
        GridError::NotFound(_) => RejectCode::NotFound,
        GridError::NotOwner(_) => RejectCode::NotOwner,
        GridError::MaxLevel(_) => RejectCode::MaxLevel,
    };
    ActionError::rejected(code, err.to_string())
}

impl BuildingsSystem {
    pub fn new(
        registry: Arc<DefinitionRegistry>,
        cost_port: Arc<dyn CostPort>,
        bounds: GridBounds,
    ) -> Self {
        Self {
            registry,
            cost_port,
            grid: OccupancyIndex::new(),
            bounds,
        }
    }

    async fn charge(&self, user_id: &str, cost: &CostMap) -> Result<(), ActionError> {
        if cost.is_empty() {
            return Ok(());
        }
        self.cost_port
            .check_cost(user_id, cost)
            .await
            .map_err(cost_rejection)?;
        self.cost_port
            .apply_cost(user_id, cost)
            .await
            .map_err(cost_rejection)
    }
}

#[async_trait]
impl DomainSystem for BuildingsSystem {
    fn id(&self) -> SystemId {
        SystemId::Buildings
    }

    fn init(&mut self, state: &WorldState) {
        self.bounds = state.bounds;
        self.grid.adopt(state.buildings.clone());
    }

    fn validate(
        &self,
        env: &ActionEnvelope,
        _view: &WorldState,
        _now_ms: u64,
    ) -> Result<(), ActionError> {
        let user_id = env.ctx.user_id.as_str();
        match &env.payload {
            ActionPayload::PlaceBuilding {
                def_id,
                origin,
                rotation,
            } => {
                let def = self.registry.building(def_id).ok_or_else(|| {
                    ActionError::rejected(
                        RejectCode::UnknownTemplate,
                        format!("no building template {def_id}"),
                    )
                })?;
                let footprint = def.size.oriented(*rotation);
                if !self.grid.can_place(*origin, footprint, self.bounds) {
                    return Err(ActionError::rejected(
                        RejectCode::CellOccupied,
                        "footprint out of bounds or overlapping",
                    ));
                }
                Ok(())
            }
            ActionPayload::RemoveBuilding { building_id } => {
                let instance = self.grid.instance(building_id).ok_or_else(|| {
                    ActionError::rejected(
                        RejectCode::NotFound,
                        format!("building {building_id} not found"),
                    )
                })?;
                if instance.owner_id != user_id {
                    return Err(ActionError::rejected(
                        RejectCode::NotOwner,
                        format!("building {building_id} belongs to another player"),
                    ));
                }
                Ok(())
            }
            ActionPayload::UpgradeBuilding { building_id } => {
                let instance = self.grid.instance(building_id).ok_or_else(|| {
                    ActionError::rejected(
                        RejectCode::NotFound,
                        format!("building {building_id} not found"),
                    )
                })?;
                if instance.owner_id != user_id {
                    return Err(ActionError::rejected(
                        RejectCode::NotOwner,
                        format!("building {building_id} belongs to another player"),
                    ));
                }
                let def = self.registry.building(&instance.def_id).ok_or_else(|| {
                    ActionError::rejected(
                        RejectCode::UnknownTemplate,
                        format!("building {building_id} references missing template"),
                    )
                })?;
                if instance.level >= def.max_level {
                    return Err(ActionError::rejected(
                        RejectCode::MaxLevel,
                        format!("building {building_id} already at level {}", instance.level),
                    ));
                }
                Ok(())
            }
            _ => Err(ActionError::rejected(
                RejectCode::UnroutedAction,
                "action not handled by the buildings system",
            )),
        }
    }

    async fn apply(
        &mut self,
        env: &ActionEnvelope,
        _view: &WorldState,
        now_ms: u64,
    ) -> Result<ActionOutcome, ActionError> {
        let user_id = env.ctx.user_id.clone();
        match &env.payload {
            ActionPayload::PlaceBuilding {
                def_id,
                origin,
                rotation,
            } => {
                let def = self
                    .registry
                    .building(def_id)
                    .cloned()
                    .ok_or_else(|| {
                        ActionError::rejected(
                            RejectCode::UnknownTemplate,
                            format!("no building template {def_id}"),
                        )
                    })?;
                let footprint = def.size.oriented(*rotation);

                self.charge(&user_id, &def.build_cost).await?;

                // The cost is already applied; a placement failure past this
                // point is a partial-failure state, not a plain rejection.
                let placed = self
                    .grid
                    .place(
                        &user_id,
                        &def.def_id,
                        *origin,
                        footprint,
                        *rotation,
                        self.bounds,
                        now_ms,
                    )
                    .map_err(|err| {
                        tracing::error!(
                            user_id = %user_id,
                            def_id = %def.def_id,
                            error = %err,
                            "placement failed after build cost was applied"
                        );
                        ActionError::inconsistency(format!(
                            "build cost charged but placement failed: {err}"
                        ))
                    })?;

                Ok(ActionOutcome {
                    delta: StateDelta {
                        buildings: Some(BuildingsDelta {
                            added: vec![placed.clone()],
                            ..BuildingsDelta::default()
                        }),
                        ..StateDelta::default()
                    },
                    events: vec![DomainEvent {
                        event_type: DomainEventType::BuildingPlaced,
                        data: json!({
                            "building_id": placed.id,
                            "def_id": placed.def_id,
                            "origin": placed.pos,
                            "footprint": placed.footprint,
                        }),
                    }],
                    inventory_changes: Vec::new(),
                })
            }
            ActionPayload::RemoveBuilding { building_id } => {
                let removed = self
                    .grid
                    .remove(&user_id, building_id)
                    .map_err(grid_rejection)?;

                Ok(ActionOutcome {
                    delta: StateDelta {
                        buildings: Some(BuildingsDelta {
                            removed: vec![removed.id.clone()],
                            ..BuildingsDelta::default()
                        }),
                        ..StateDelta::default()
                    },
                    events: vec![DomainEvent {
                        event_type: DomainEventType::BuildingRemoved,
                        data: json!({
                            "building_id": removed.id,
                            "origin": removed.pos,
                            "footprint": removed.footprint,
                        }),
                    }],
                    inventory_changes: Vec::new(),
                })
            }
            ActionPayload::UpgradeBuilding { building_id } => {
                let instance = self
                    .grid
                    .instance(building_id)
                    .cloned()
                    .ok_or_else(|| {
                        ActionError::rejected(
                            RejectCode::NotFound,
                            format!("building {building_id} not found"),
                        )
                    })?;
                let def = self
                    .registry
                    .building(&instance.def_id)
                    .cloned()
                    .ok_or_else(|| {
                        ActionError::rejected(
                            RejectCode::UnknownTemplate,
                            format!("building {building_id} references missing template"),
                        )
                    })?;
                if !self
                    .grid
                    .can_upgrade(&user_id, building_id, Some(def.max_level))
                {
                    return Err(if instance.owner_id != user_id {
                        ActionError::rejected(
                            RejectCode::NotOwner,
                            format!("building {building_id} belongs to another player"),
                        )
                    } else {
                        ActionError::rejected(
                            RejectCode::MaxLevel,
                            format!("building {building_id} already at level {}", instance.level),
                        )
                    });
                }

                let cost = scaled_upgrade_cost(&def, instance.level);
                self.charge(&user_id, &cost).await?;

                let upgraded = self
                    .grid
                    .upgrade(&user_id, building_id, Some(def.max_level))
                    .map_err(|err| {
                        tracing::error!(
                            user_id = %user_id,
                            building_id = %building_id,
                            error = %err,
                            "upgrade failed after cost was applied"
                        );
                        ActionError::inconsistency(format!(
                            "upgrade cost charged but upgrade failed: {err}"
                        ))
                    })?;

                Ok(ActionOutcome {
                    delta: StateDelta {
                        buildings: Some(BuildingsDelta {
                            updated: vec![upgraded.clone()],
                            ..BuildingsDelta::default()
                        }),
                        ..StateDelta::default()
                    },
                    events: vec![DomainEvent {
                        event_type: DomainEventType::BuildingUpgraded,
                        data: json!({
                            "building_id": upgraded.id,
                            "level": upgraded.level,
                        }),
                    }],
                    inventory_changes: Vec::new(),
                })
            }
            _ => Err(ActionError::rejected(
                RejectCode::UnroutedAction,
                "action not handled by the buildings system",
            )),
        }
    }

    fn state_slice(&self) -> StateSlice {
        StateSlice::Buildings(self.grid.snapshot())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
