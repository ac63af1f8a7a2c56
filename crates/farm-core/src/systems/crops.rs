//! Crops system: planting against the plot map, timed growth, and harvest.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use contracts::{
    cell_key, ActionEnvelope, ActionError, ActionOutcome, ActionPayload, CropInstance, CropsDelta,
    CropsState, DomainEvent, DomainEventType, GridBounds, GridPos, InventoryChange, RejectCode,
    StateDelta, WorldState, DEFAULT_CONTAINER,
};
use serde_json::json;

use crate::ports::{CostError, CostPort};
use crate::registry::DefinitionRegistry;
use crate::system::{DomainSystem, StateSlice, SystemId};

pub struct CropsSystem {
    registry: Arc<DefinitionRegistry>,
    cost_port: Arc<dyn CostPort>,
    state: CropsState,
    bounds: GridBounds,
}

fn cost_rejection(err: CostError) -> ActionError {
    match err {
        CostError::Unavailable(reason) => {
            ActionError::external(RejectCode::CostUnavailable, reason)
        }
        other => ActionError::rejected(RejectCode::CostCheckFailed, other.to_string()),
    }
}

impl CropsSystem {
    pub fn new(
        registry: Arc<DefinitionRegistry>,
        cost_port: Arc<dyn CostPort>,
        bounds: GridBounds,
    ) -> Self {
        Self {
            registry,
            cost_port,
            state: CropsState::default(),
            bounds,
        }
    }

    fn plot_free(&self, plot: GridPos, view: &WorldState) -> Result<(), ActionError> {
        if plot.x < 0
            || plot.y < 0
            || plot.x >= self.bounds.width as i32
            || plot.y >= self.bounds.height as i32
        {
            return Err(ActionError::rejected(
                RejectCode::OutOfBounds,
                format!("plot ({}, {}) outside the farm", plot.x, plot.y),
            ));
        }
        let key = cell_key(plot.x, plot.y);
        if self.state.plots.contains_key(&key) {
            return Err(ActionError::rejected(
                RejectCode::PlotOccupied,
                format!("plot {key} already planted"),
            ));
        }
        // Soil under a structure cannot be planted.
        if view.buildings.occupancy.contains_key(&key) {
            return Err(ActionError::rejected(
                RejectCode::CellOccupied,
                format!("plot {key} covered by a building"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DomainSystem for CropsSystem {
    fn id(&self) -> SystemId {
        SystemId::Crops
    }

    fn init(&mut self, state: &WorldState) {
        self.bounds = state.bounds;
        self.state = state.crops.clone();
    }

    fn validate(
        &self,
        env: &ActionEnvelope,
        view: &WorldState,
        now_ms: u64,
    ) -> Result<(), ActionError> {
        match &env.payload {
            ActionPayload::PlantCrop { def_id, plot } => {
                if self.registry.crop(def_id).is_none() {
                    return Err(ActionError::rejected(
                        RejectCode::UnknownTemplate,
                        format!("no crop template {def_id}"),
                    ));
                }
                self.plot_free(*plot, view)
            }
            ActionPayload::HarvestCrop { crop_id } => {
                let crop = self.state.by_id.get(crop_id).ok_or_else(|| {
                    ActionError::rejected(
                        RejectCode::NotFound,
                        format!("crop {crop_id} not found"),
                    )
                })?;
                if crop.owner_id != env.ctx.user_id {
                    return Err(ActionError::rejected(
                        RejectCode::NotOwner,
                        format!("crop {crop_id} belongs to another player"),
                    ));
                }
                if now_ms < crop.ripe_at_ms {
                    return Err(ActionError::rejected(
                        RejectCode::NotRipe,
                        format!("crop {crop_id} not ripe yet"),
                    ));
                }
                Ok(())
            }
            _ => Err(ActionError::rejected(
                RejectCode::UnroutedAction,
                "action not handled by the crops system",
            )),
        }
    }

    async fn apply(
        &mut self,
        env: &ActionEnvelope,
        view: &WorldState,
        now_ms: u64,
    ) -> Result<ActionOutcome, ActionError> {
        let user_id = env.ctx.user_id.clone();
        match &env.payload {
            ActionPayload::PlantCrop { def_id, plot } => {
                let def = self.registry.crop(def_id).cloned().ok_or_else(|| {
                    ActionError::rejected(
                        RejectCode::UnknownTemplate,
                        format!("no crop template {def_id}"),
                    )
                })?;
                self.plot_free(*plot, view)?;

                self.cost_port
                    .check_cost(&user_id, &def.seed_cost)
                    .await
                    .map_err(cost_rejection)?;
                self.cost_port
                    .apply_cost(&user_id, &def.seed_cost)
                    .await
                    .map_err(cost_rejection)?;

                self.state.next_id += 1;
                let id = format!("crp_{:06}", self.state.next_id);
                let planted = CropInstance {
                    id: id.clone(),
                    def_id: def.def_id.clone(),
                    owner_id: user_id,
                    plot: *plot,
                    planted_at_ms: now_ms,
                    ripe_at_ms: now_ms + def.growth_ms,
                    ripe_announced: false,
                };
                self.state
                    .plots
                    .insert(cell_key(plot.x, plot.y), id.clone());
                self.state.by_id.insert(id, planted.clone());

                Ok(ActionOutcome {
                    delta: StateDelta {
                        crops: Some(CropsDelta {
                            added: vec![planted.clone()],
                            ..CropsDelta::default()
                        }),
                        ..StateDelta::default()
                    },
                    events: vec![DomainEvent {
                        event_type: DomainEventType::CropPlanted,
                        data: json!({
                            "crop_id": planted.id,
                            "def_id": planted.def_id,
                            "plot": planted.plot,
                            "ripe_at_ms": planted.ripe_at_ms,
                        }),
                    }],
                    inventory_changes: Vec::new(),
                })
            }
            ActionPayload::HarvestCrop { crop_id } => {
                let crop = self.state.by_id.get(crop_id).cloned().ok_or_else(|| {
                    ActionError::rejected(
                        RejectCode::NotFound,
                        format!("crop {crop_id} not found"),
                    )
                })?;
                if crop.owner_id != user_id {
                    return Err(ActionError::rejected(
                        RejectCode::NotOwner,
                        format!("crop {crop_id} belongs to another player"),
                    ));
                }
                if now_ms < crop.ripe_at_ms {
                    return Err(ActionError::rejected(
                        RejectCode::NotRipe,
                        format!("crop {crop_id} not ripe yet"),
                    ));
                }
                let def = self.registry.crop(&crop.def_id).cloned().ok_or_else(|| {
                    ActionError::rejected(
                        RejectCode::UnknownTemplate,
                        format!("crop {crop_id} references missing template"),
                    )
                })?;

                self.state.by_id.remove(crop_id);
                self.state.plots.remove(&cell_key(crop.plot.x, crop.plot.y));

                Ok(ActionOutcome {
                    delta: StateDelta {
                        crops: Some(CropsDelta {
                            removed: vec![crop.id.clone()],
                            ..CropsDelta::default()
                        }),
                        ..StateDelta::default()
                    },
                    events: vec![DomainEvent {
                        event_type: DomainEventType::CropHarvested,
                        data: json!({
                            "crop_id": crop.id,
                            "plot": crop.plot,
                            "yield_item": def.yield_item,
                            "yield_qty": def.yield_qty,
                        }),
                    }],
                    inventory_changes: vec![InventoryChange {
                        user_id,
                        container: DEFAULT_CONTAINER.to_string(),
                        item: def.yield_item,
                        delta: def.yield_qty,
                    }],
                })
            }
            _ => Err(ActionError::rejected(
                RejectCode::UnroutedAction,
                "action not handled by the crops system",
            )),
        }
    }

    fn state_slice(&self) -> StateSlice {
        StateSlice::Crops(self.state.clone())
    }

    fn on_tick(&mut self, _delta_ms: u64, now_ms: u64, events: &mut Vec<DomainEvent>) {
        for crop in self.state.by_id.values_mut() {
            if !crop.ripe_announced && now_ms >= crop.ripe_at_ms {
                crop.ripe_announced = true;
                events.push(DomainEvent {
                    event_type: DomainEventType::CropRipened,
                    data: json!({
                        "crop_id": crop.id,
                        "plot": crop.plot,
                    }),
                });
            }
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::WalletLedger;
    use crate::registry::default_registry;
    use contracts::{ActionContext, CostMap, ResourceKind};
    use std::collections::BTreeMap;

    fn funded_ledger(user: &str) -> Arc<WalletLedger> {
        let ledger = Arc::new(WalletLedger::new());
        let mut balances = BTreeMap::new();
        let mut balance = CostMap::new();
        balance.insert(ResourceKind::Gold, 1_000);
        balances.insert(user.to_string(), balance);
        ledger.adopt(balances);
        ledger
    }

    fn system(user: &str) -> (CropsSystem, Arc<WalletLedger>) {
        let ledger = funded_ledger(user);
        let system = CropsSystem::new(
            Arc::new(default_registry()),
            ledger.clone(),
            GridBounds {
                width: 10,
                height: 10,
            },
        );
        (system, ledger)
    }

    fn envelope(user: &str, payload: ActionPayload) -> ActionEnvelope {
        ActionEnvelope::new(
            payload,
            ActionContext {
                client_id: format!("client:{user}"),
                user_id: user.to_string(),
                issued_at_ms: 1,
            },
        )
    }

    fn view() -> WorldState {
        WorldState::empty(
            "test",
            GridBounds {
                width: 10,
                height: 10,
            },
        )
    }

    async fn plant(system: &mut CropsSystem, user: &str, x: i32, y: i32, now_ms: u64) -> String {
        let env = envelope(
            user,
            ActionPayload::PlantCrop {
                def_id: "wheat".to_string(),
                plot: GridPos { x, y },
            },
        );
        let outcome = system.apply(&env, &view(), now_ms).await.expect("plants");
        outcome.delta.crops.expect("crops delta").added[0].id.clone()
    }

    #[tokio::test]
    async fn plant_charges_seed_cost_and_claims_plot() {
        let (mut system, ledger) = system("alice");
        system.init(&view());

        plant(&mut system, "alice", 2, 2, 1_000).await;
        assert_eq!(
            ledger.balance("alice").get(&ResourceKind::Gold),
            Some(&990)
        );
        assert!(system.state.plots.contains_key("2:2"));
    }

    #[tokio::test]
    async fn double_planting_same_plot_is_rejected() {
        let (mut system, _) = system("alice");
        system.init(&view());
        plant(&mut system, "alice", 2, 2, 1_000).await;

        let env = envelope(
            "alice",
            ActionPayload::PlantCrop {
                def_id: "carrot".to_string(),
                plot: GridPos { x: 2, y: 2 },
            },
        );
        let err = system.validate(&env, &view(), 2_000).expect_err("taken");
        assert_eq!(err.code, RejectCode::PlotOccupied);
    }

    #[tokio::test]
    async fn planting_under_a_building_is_rejected() {
        let (system, _) = system("alice");
        let mut world = view();
        world
            .buildings
            .occupancy
            .insert(cell_key(4, 4), "bld_000001".to_string());

        let env = envelope(
            "alice",
            ActionPayload::PlantCrop {
                def_id: "wheat".to_string(),
                plot: GridPos { x: 4, y: 4 },
            },
        );
        let err = system.validate(&env, &world, 1_000).expect_err("covered");
        assert_eq!(err.code, RejectCode::CellOccupied);
    }

    #[tokio::test]
    async fn harvest_before_ripeness_is_rejected() {
        let (mut system, _) = system("alice");
        system.init(&view());
        let crop_id = plant(&mut system, "alice", 1, 1, 1_000).await;

        let env = envelope("alice", ActionPayload::HarvestCrop { crop_id });
        let err = system.validate(&env, &view(), 5_000).expect_err("green");
        assert_eq!(err.code, RejectCode::NotRipe);
    }

    #[tokio::test]
    async fn ripe_harvest_yields_into_inventory_changes() {
        let (mut system, _) = system("alice");
        system.init(&view());
        let crop_id = plant(&mut system, "alice", 1, 1, 1_000).await;

        let ripe_time = 1_000 + 60_000;
        let env = envelope("alice", ActionPayload::HarvestCrop { crop_id });
        system.validate(&env, &view(), ripe_time).expect("ripe");
        let outcome = system.apply(&env, &view(), ripe_time).await.expect("harvest");

        assert_eq!(outcome.inventory_changes.len(), 1);
        let change = &outcome.inventory_changes[0];
        assert_eq!(change.item, "wheat");
        assert_eq!(change.delta, 3);
        assert!(system.state.by_id.is_empty());
        assert!(system.state.plots.is_empty());
    }

    #[tokio::test]
    async fn harvest_by_non_owner_is_rejected() {
        let (mut system, _) = system("alice");
        system.init(&view());
        let crop_id = plant(&mut system, "alice", 1, 1, 1_000).await;

        let env = envelope("mallory", ActionPayload::HarvestCrop { crop_id });
        let err = system
            .validate(&env, &view(), 100_000)
            .expect_err("not the owner");
        assert_eq!(err.code, RejectCode::NotOwner);
    }

    #[tokio::test]
    async fn tick_announces_ripeness_exactly_once() {
        let (mut system, _) = system("alice");
        system.init(&view());
        plant(&mut system, "alice", 1, 1, 1_000).await;

        let mut events = Vec::new();
        system.on_tick(1_000, 30_000, &mut events);
        assert!(events.is_empty(), "still growing");

        system.on_tick(1_000, 61_500, &mut events);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, DomainEventType::CropRipened);

        let mut repeat = Vec::new();
        system.on_tick(1_000, 62_500, &mut repeat);
        assert!(repeat.is_empty(), "announced only once");
    }
}
