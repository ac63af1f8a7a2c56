//! Animals system: feeding and product collection on a produce interval.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use contracts::{
    ActionEnvelope, ActionError, ActionOutcome, ActionPayload, AnimalInstance, AnimalsDelta,
    AnimalsState, DomainEvent, DomainEventType, InventoryChange, RejectCode, StateDelta,
    WorldState, DEFAULT_CONTAINER,
};
use serde_json::json;

use crate::ports::{CostError, CostPort};
use crate::registry::DefinitionRegistry;
use crate::system::{DomainSystem, StateSlice, SystemId};

pub struct AnimalsSystem {
    registry: Arc<DefinitionRegistry>,
    cost_port: Arc<dyn CostPort>,
    state: AnimalsState,
}

fn cost_rejection(err: CostError) -> ActionError {
    match err {
        CostError::Unavailable(reason) => {
            ActionError::external(RejectCode::CostUnavailable, reason)
        }
        other => ActionError::rejected(RejectCode::CostCheckFailed, other.to_string()),
    }
}

impl AnimalsSystem {
    pub fn new(registry: Arc<DefinitionRegistry>, cost_port: Arc<dyn CostPort>) -> Self {
        Self {
            registry,
            cost_port,
            state: AnimalsState::default(),
        }
    }

    fn owned_animal(&self, animal_id: &str, user_id: &str) -> Result<&AnimalInstance, ActionError> {
        let animal = self.state.by_id.get(animal_id).ok_or_else(|| {
            ActionError::rejected(
                RejectCode::NotFound,
                format!("animal {animal_id} not found"),
            )
        })?;
        if animal.owner_id != user_id {
            return Err(ActionError::rejected(
                RejectCode::NotOwner,
                format!("animal {animal_id} belongs to another player"),
            ));
        }
        Ok(animal)
    }
}

#[async_trait]
impl DomainSystem for AnimalsSystem {
    fn id(&self) -> SystemId {
        SystemId::Animals
    }

    fn init(&mut self, state: &WorldState) {
        self.state = state.animals.clone();
    }

    fn validate(
        &self,
        env: &ActionEnvelope,
        _view: &WorldState,
        now_ms: u64,
    ) -> Result<(), ActionError> {
        let user_id = env.ctx.user_id.as_str();
        match &env.payload {
            ActionPayload::FeedAnimal { animal_id } => {
                self.owned_animal(animal_id, user_id).map(|_| ())
            }
            ActionPayload::CollectProduct { animal_id } => {
                let animal = self.owned_animal(animal_id, user_id)?;
                let fed_at = animal.fed_at_ms.ok_or_else(|| {
                    ActionError::rejected(
                        RejectCode::AnimalNotFed,
                        format!("animal {animal_id} has not been fed"),
                    )
                })?;
                let def = self.registry.animal(&animal.def_id).ok_or_else(|| {
                    ActionError::rejected(
                        RejectCode::UnknownTemplate,
                        format!("animal {animal_id} references missing template"),
                    )
                })?;
                if now_ms < fed_at + def.produce_interval_ms {
                    return Err(ActionError::rejected(
                        RejectCode::ProduceNotReady,
                        format!("animal {animal_id} has nothing to collect yet"),
                    ));
                }
                Ok(())
            }
            _ => Err(ActionError::rejected(
                RejectCode::UnroutedAction,
                "action not handled by the animals system",
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
            ActionPayload::FeedAnimal { animal_id } => {
                let animal = self.owned_animal(animal_id, &user_id)?.clone();
                let def = self.registry.animal(&animal.def_id).cloned().ok_or_else(|| {
                    ActionError::rejected(
                        RejectCode::UnknownTemplate,
                        format!("animal {animal_id} references missing template"),
                    )
                })?;

                self.cost_port
                    .check_cost(&user_id, &def.feed_cost)
                    .await
                    .map_err(cost_rejection)?;
                self.cost_port
                    .apply_cost(&user_id, &def.feed_cost)
                    .await
                    .map_err(cost_rejection)?;

                let animal = self.state.by_id.get_mut(animal_id).ok_or_else(|| {
                    ActionError::inconsistency(format!(
                        "feed cost charged but animal {animal_id} disappeared"
                    ))
                })?;
                animal.fed_at_ms = Some(now_ms);
                let updated = animal.clone();

                Ok(ActionOutcome {
                    delta: StateDelta {
                        animals: Some(AnimalsDelta {
                            updated: vec![updated.clone()],
                        }),
                        ..StateDelta::default()
                    },
                    events: vec![DomainEvent {
                        event_type: DomainEventType::AnimalFed,
                        data: json!({
                            "animal_id": updated.id,
                            "fed_at_ms": now_ms,
                        }),
                    }],
                    inventory_changes: Vec::new(),
                })
            }
            ActionPayload::CollectProduct { animal_id } => {
                let animal = self.owned_animal(animal_id, &user_id)?.clone();
                let def = self.registry.animal(&animal.def_id).cloned().ok_or_else(|| {
                    ActionError::rejected(
                        RejectCode::UnknownTemplate,
                        format!("animal {animal_id} references missing template"),
                    )
                })?;
                let fed_at = animal.fed_at_ms.ok_or_else(|| {
                    ActionError::rejected(
                        RejectCode::AnimalNotFed,
                        format!("animal {animal_id} has not been fed"),
                    )
                })?;
                if now_ms < fed_at + def.produce_interval_ms {
                    return Err(ActionError::rejected(
                        RejectCode::ProduceNotReady,
                        format!("animal {animal_id} has nothing to collect yet"),
                    ));
                }

                let animal = self.state.by_id.get_mut(animal_id).ok_or_else(|| {
                    ActionError::rejected(
                        RejectCode::NotFound,
                        format!("animal {animal_id} not found"),
                    )
                })?;
                // Collection consumes the feeding; the animal must be fed again
                // before the next product.
                animal.fed_at_ms = None;
                animal.last_collected_ms = Some(now_ms);
                let updated = animal.clone();

                Ok(ActionOutcome {
                    delta: StateDelta {
                        animals: Some(AnimalsDelta {
                            updated: vec![updated.clone()],
                        }),
                        ..StateDelta::default()
                    },
                    events: vec![DomainEvent {
                        event_type: DomainEventType::ProductCollected,
                        data: json!({
                            "animal_id": updated.id,
                            "product_item": def.product_item,
                            "product_qty": def.product_qty,
                        }),
                    }],
                    inventory_changes: vec![InventoryChange {
                        user_id,
                        container: DEFAULT_CONTAINER.to_string(),
                        item: def.product_item,
                        delta: def.product_qty,
                    }],
                })
            }
            _ => Err(ActionError::rejected(
                RejectCode::UnroutedAction,
                "action not handled by the animals system",
            )),
        }
    }

    fn state_slice(&self) -> StateSlice {
        StateSlice::Animals(self.state.clone())
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
    use contracts::{ActionContext, CostMap, GridBounds, ResourceKind};
    use std::collections::BTreeMap;

    fn seeded_system(user: &str) -> (AnimalsSystem, Arc<WalletLedger>) {
        let ledger = Arc::new(WalletLedger::new());
        let mut balances = BTreeMap::new();
        let mut balance = CostMap::new();
        balance.insert(ResourceKind::Feed, 100);
        balances.insert(user.to_string(), balance);
        ledger.adopt(balances);

        let mut system = AnimalsSystem::new(Arc::new(default_registry()), ledger.clone());
        let mut world = WorldState::empty("test", GridBounds::default());
        world.animals.next_id = 1;
        world.animals.by_id.insert(
            "anm_000001".to_string(),
            AnimalInstance {
                id: "anm_000001".to_string(),
                def_id: "chicken".to_string(),
                owner_id: user.to_string(),
                fed_at_ms: None,
                last_collected_ms: None,
            },
        );
        system.init(&world);
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
        WorldState::empty("test", GridBounds::default())
    }

    #[tokio::test]
    async fn feeding_charges_feed_cost_and_stamps_time() {
        let (mut system, ledger) = seeded_system("alice");
        let env = envelope(
            "alice",
            ActionPayload::FeedAnimal {
                animal_id: "anm_000001".to_string(),
            },
        );
        system.validate(&env, &view(), 1_000).expect("validates");
        system.apply(&env, &view(), 1_000).await.expect("feeds");

        assert_eq!(ledger.balance("alice").get(&ResourceKind::Feed), Some(&98));
        assert_eq!(
            system.state.by_id["anm_000001"].fed_at_ms,
            Some(1_000)
        );
    }

    #[tokio::test]
    async fn collect_requires_feeding_first() {
        let (system, _) = seeded_system("alice");
        let env = envelope(
            "alice",
            ActionPayload::CollectProduct {
                animal_id: "anm_000001".to_string(),
            },
        );
        let err = system.validate(&env, &view(), 1_000).expect_err("hungry");
        assert_eq!(err.code, RejectCode::AnimalNotFed);
    }

    #[tokio::test]
    async fn collect_waits_for_produce_interval() {
        let (mut system, _) = seeded_system("alice");
        let feed = envelope(
            "alice",
            ActionPayload::FeedAnimal {
                animal_id: "anm_000001".to_string(),
            },
        );
        system.apply(&feed, &view(), 1_000).await.expect("feeds");

        let collect = envelope(
            "alice",
            ActionPayload::CollectProduct {
                animal_id: "anm_000001".to_string(),
            },
        );
        let err = system
            .validate(&collect, &view(), 60_000)
            .expect_err("too early");
        assert_eq!(err.code, RejectCode::ProduceNotReady);

        let ready = 1_000 + 120_000;
        system.validate(&collect, &view(), ready).expect("ready");
        let outcome = system.apply(&collect, &view(), ready).await.expect("collects");
        assert_eq!(outcome.inventory_changes[0].item, "egg");
        assert_eq!(system.state.by_id["anm_000001"].fed_at_ms, None);
    }

    #[tokio::test]
    async fn foreign_animal_is_rejected() {
        let (system, _) = seeded_system("alice");
        let env = envelope(
            "mallory",
            ActionPayload::FeedAnimal {
                animal_id: "anm_000001".to_string(),
            },
        );
        let err = system.validate(&env, &view(), 1_000).expect_err("not hers");
        assert_eq!(err.code, RejectCode::NotOwner);
    }
}
