//! Economy system: item sales credited against the wallet ledger.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use contracts::{
    ActionEnvelope, ActionError, ActionOutcome, ActionPayload, DomainEvent, DomainEventType,
    EconomyState, InventoryChange, RejectCode, ResourceKind, StateDelta, WorldState,
    DEFAULT_CONTAINER,
};
use serde_json::json;

use crate::ports::WalletLedger;
use crate::registry::DefinitionRegistry;
use crate::system::{DomainSystem, StateSlice, SystemId};

pub struct EconomySystem {
    registry: Arc<DefinitionRegistry>,
    ledger: Arc<WalletLedger>,
    state: EconomyState,
}

impl EconomySystem {
    pub fn new(registry: Arc<DefinitionRegistry>, ledger: Arc<WalletLedger>) -> Self {
        Self {
            registry,
            ledger,
            state: EconomyState::default(),
        }
    }

    fn check_sale(
        &self,
        env: &ActionEnvelope,
        view: &WorldState,
        item: &str,
        qty: i64,
    ) -> Result<i64, ActionError> {
        if qty <= 0 {
            return Err(ActionError::rejected(
                RejectCode::InvalidQuantity,
                format!("cannot sell {qty} of {item}"),
            ));
        }
        let price = self.registry.sale_price(item).ok_or_else(|| {
            ActionError::rejected(
                RejectCode::NotFound,
                format!("item {item} has no sale price"),
            )
        })?;
        let held = view
            .inventories
            .by_user
            .get(&env.ctx.user_id)
            .map(|inventory| inventory.quantity(DEFAULT_CONTAINER, item))
            .unwrap_or(0);
        if held < qty {
            return Err(ActionError::rejected(
                RejectCode::InsufficientItems,
                format!("holding {held} of {item}, need {qty}"),
            ));
        }
        Ok(price)
    }
}

#[async_trait]
impl DomainSystem for EconomySystem {
    fn id(&self) -> SystemId {
        SystemId::Economy
    }

    fn init(&mut self, state: &WorldState) {
        self.state = state.economy.clone();
        // Seed the external ledger mirror from the restored slice.
        self.ledger.adopt(self.state.balances.clone());
    }

    fn validate(
        &self,
        env: &ActionEnvelope,
        view: &WorldState,
        _now_ms: u64,
    ) -> Result<(), ActionError> {
        match &env.payload {
            ActionPayload::SellItem { item, qty } => {
                self.check_sale(env, view, item, *qty).map(|_| ())
            }
            _ => Err(ActionError::rejected(
                RejectCode::UnroutedAction,
                "action not handled by the economy system",
            )),
        }
    }

    async fn apply(
        &mut self,
        env: &ActionEnvelope,
        view: &WorldState,
        _now_ms: u64,
    ) -> Result<ActionOutcome, ActionError> {
        match &env.payload {
            ActionPayload::SellItem { item, qty } => {
                let price = self.check_sale(env, view, item, *qty)?;
                let user_id = env.ctx.user_id.clone();
                let proceeds = price * qty;

                self.ledger
                    .credit(&user_id, ResourceKind::Gold, proceeds)
                    .map_err(|err| {
                        ActionError::rejected(RejectCode::InvalidQuantity, err.to_string())
                    })?;
                self.state
                    .balances
                    .insert(user_id.clone(), self.ledger.balance(&user_id));

                let mut delta = StateDelta::default();
                delta
                    .balances
                    .insert(user_id.clone(), self.ledger.balance(&user_id));

                Ok(ActionOutcome {
                    delta,
                    events: vec![DomainEvent {
                        event_type: DomainEventType::ItemSold,
                        data: json!({
                            "item": item,
                            "qty": qty,
                            "unit_price": price,
                            "proceeds": proceeds,
                        }),
                    }],
                    inventory_changes: vec![InventoryChange {
                        user_id,
                        container: DEFAULT_CONTAINER.to_string(),
                        item: item.clone(),
                        delta: -qty,
                    }],
                })
            }
            _ => Err(ActionError::rejected(
                RejectCode::UnroutedAction,
                "action not handled by the economy system",
            )),
        }
    }

    fn state_slice(&self) -> StateSlice {
        // Refresh the mirror so snapshots always reflect the live ledger.
        let mut state = self.state.clone();
        state.balances = self.ledger.snapshot();
        StateSlice::Economy(state)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
