//! Inventory system: container moves, plus the mediated credit/debit entry
//! point other systems' outcomes are funneled through. This system is the
//! only writer of the inventories slice.

use std::any::Any;

use async_trait::async_trait;
use contracts::{
    ActionEnvelope, ActionError, ActionOutcome, ActionPayload, DomainEvent, DomainEventType,
    InventoriesState, InventoryChange, RejectCode, StateDelta, WorldState,
};
use serde_json::json;

use crate::system::{DomainSystem, StateSlice, SystemId};

#[derive(Default)]
pub struct InventorySystem {
    state: InventoriesState,
}

impl InventorySystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn quantity(&self, user_id: &str, container: &str, item: &str) -> i64 {
        self.state
            .by_user
            .get(user_id)
            .map(|inventory| inventory.quantity(container, item))
            .unwrap_or(0)
    }

    /// Apply a batch of mediated changes atomically: every debit is verified
    /// before any change lands, so a failing batch leaves the slice as-is.
    pub fn apply_changes(&mut self, changes: &[InventoryChange]) -> Result<(), ActionError> {
        let mut projected = std::collections::BTreeMap::new();
        for change in changes {
            let key = (
                change.user_id.as_str(),
                change.container.as_str(),
                change.item.as_str(),
            );
            let entry = projected
                .entry(key)
                .or_insert_with(|| self.quantity(change.user_id.as_str(), &change.container, &change.item));
            *entry += change.delta;
            if *entry < 0 {
                return Err(ActionError::rejected(
                    RejectCode::InsufficientItems,
                    format!(
                        "{} holds too few {} in {}",
                        change.user_id, change.item, change.container
                    ),
                ));
            }
        }

        for change in changes {
            let inventory = self.state.by_user.entry(change.user_id.clone()).or_default();
            let slots = inventory
                .containers
                .entry(change.container.clone())
                .or_default();
            let qty = slots.entry(change.item.clone()).or_insert(0);
            *qty += change.delta;
            if *qty == 0 {
                slots.remove(&change.item);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DomainSystem for InventorySystem {
    fn id(&self) -> SystemId {
        SystemId::Inventory
    }

    fn init(&mut self, state: &WorldState) {
        self.state = state.inventories.clone();
    }

    fn validate(
        &self,
        env: &ActionEnvelope,
        _view: &WorldState,
        _now_ms: u64,
    ) -> Result<(), ActionError> {
        match &env.payload {
            ActionPayload::MoveInventory {
                item,
                qty,
                from_container,
                to_container,
            } => {
                if *qty <= 0 {
                    return Err(ActionError::rejected(
                        RejectCode::InvalidQuantity,
                        format!("cannot move {qty} of {item}"),
                    ));
                }
                if from_container == to_container {
                    return Err(ActionError::rejected(
                        RejectCode::InvalidQuantity,
                        "source and target containers are the same",
                    ));
                }
                let held = self.quantity(&env.ctx.user_id, from_container, item);
                if held < *qty {
                    return Err(ActionError::rejected(
                        RejectCode::InsufficientItems,
                        format!("holding {held} of {item} in {from_container}, need {qty}"),
                    ));
                }
                Ok(())
            }
            _ => Err(ActionError::rejected(
                RejectCode::UnroutedAction,
                "action not handled by the inventory system",
            )),
        }
    }

    async fn apply(
        &mut self,
        env: &ActionEnvelope,
        view: &WorldState,
        now_ms: u64,
    ) -> Result<ActionOutcome, ActionError> {
        match &env.payload {
            ActionPayload::MoveInventory {
                item,
                qty,
                from_container,
                to_container,
            } => {
                self.validate(env, view, now_ms)?;
                let changes = vec![
                    InventoryChange {
                        user_id: env.ctx.user_id.clone(),
                        container: from_container.clone(),
                        item: item.clone(),
                        delta: -qty,
                    },
                    InventoryChange {
                        user_id: env.ctx.user_id.clone(),
                        container: to_container.clone(),
                        item: item.clone(),
                        delta: *qty,
                    },
                ];
                self.apply_changes(&changes)?;

                Ok(ActionOutcome {
                    delta: StateDelta {
                        inventories: changes,
                        ..StateDelta::default()
                    },
                    events: vec![DomainEvent {
                        event_type: DomainEventType::InventoryMoved,
                        data: json!({
                            "item": item,
                            "qty": qty,
                            "from": from_container,
                            "to": to_container,
                        }),
                    }],
                    inventory_changes: Vec::new(),
                })
            }
            _ => Err(ActionError::rejected(
                RejectCode::UnroutedAction,
                "action not handled by the inventory system",
            )),
        }
    }

    fn state_slice(&self) -> StateSlice {
        StateSlice::Inventories(self.state.clone())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ActionContext, GridBounds, DEFAULT_CONTAINER};

    fn seeded_system(user: &str, item: &str, qty: i64) -> InventorySystem {
        let mut system = InventorySystem::new();
        system
            .apply_changes(&[InventoryChange {
                user_id: user.to_string(),
                container: DEFAULT_CONTAINER.to_string(),
                item: item.to_string(),
                delta: qty,
            }])
            .expect("seed");
        system
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
    async fn move_shifts_items_between_containers() {
        let mut system = seeded_system("alice", "wheat", 10);
        let env = envelope(
            "alice",
            ActionPayload::MoveInventory {
                item: "wheat".to_string(),
                qty: 4,
                from_container: DEFAULT_CONTAINER.to_string(),
                to_container: "barn".to_string(),
            },
        );
        system.apply(&env, &view(), 1_000).await.expect("moves");

        assert_eq!(system.quantity("alice", DEFAULT_CONTAINER, "wheat"), 6);
        assert_eq!(system.quantity("alice", "barn", "wheat"), 4);
    }

    #[tokio::test]
    async fn overdraw_is_rejected_without_mutation() {
        let mut system = seeded_system("alice", "wheat", 3);
        let env = envelope(
            "alice",
            ActionPayload::MoveInventory {
                item: "wheat".to_string(),
                qty: 5,
                from_container: DEFAULT_CONTAINER.to_string(),
                to_container: "barn".to_string(),
            },
        );
        let err = system.apply(&env, &view(), 1_000).await.expect_err("short");
        assert_eq!(err.code, RejectCode::InsufficientItems);
        assert_eq!(system.quantity("alice", DEFAULT_CONTAINER, "wheat"), 3);
        assert_eq!(system.quantity("alice", "barn", "wheat"), 0);
    }

    #[test]
    fn batched_changes_are_atomic() {
        let mut system = seeded_system("alice", "egg", 2);
        let result = system.apply_changes(&[
            InventoryChange {
                user_id: "alice".to_string(),
                container: DEFAULT_CONTAINER.to_string(),
                item: "egg".to_string(),
                delta: -1,
            },
            InventoryChange {
                user_id: "alice".to_string(),
                container: DEFAULT_CONTAINER.to_string(),
                item: "milk".to_string(),
                delta: -1,
            },
        ]);
        assert!(result.is_err(), "no milk held");
        assert_eq!(system.quantity("alice", DEFAULT_CONTAINER, "egg"), 2);
    }

    #[test]
    fn zero_quantity_slots_are_pruned() {
        let mut system = seeded_system("alice", "egg", 2);
        system
            .apply_changes(&[InventoryChange {
                user_id: "alice".to_string(),
                container: DEFAULT_CONTAINER.to_string(),
                item: "egg".to_string(),
                delta: -2,
            }])
            .expect("drain");
        let inventory = system.state.by_user.get("alice").expect("inventory");
        assert!(!inventory.containers[DEFAULT_CONTAINER].contains_key("egg"));
    }

    #[tokio::test]
    async fn same_container_move_is_rejected() {
        let system = seeded_system("alice", "wheat", 3);
        let env = envelope(
            "alice",
            ActionPayload::MoveInventory {
                item: "wheat".to_string(),
                qty: 1,
                from_container: DEFAULT_CONTAINER.to_string(),
                to_container: DEFAULT_CONTAINER.to_string(),
            },
        );
        let err = system.validate(&env, &view(), 1_000).expect_err("no-op");
        assert_eq!(err.code, RejectCode::InvalidQuantity);
    }
}
