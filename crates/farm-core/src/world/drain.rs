use super::*;

use contracts::ErrorClass;
use contracts::RejectCode;

use crate::router;

impl FarmSession {
    /// One drain cycle: process queued envelopes strictly in arrival order,
    /// up to the per-cycle cap. Envelope N+1 is not touched until envelope
    /// N's apply, including any awaited external call, has fully resolved.
    ///
    /// Every failure inside an envelope's validate/apply path converts into
    /// a rejection event for its originating client; nothing aborts the
    /// cycle for subsequent envelopes.
    pub async fn drain(&mut self, now_ms: u64) -> DrainMetrics {
        let cycle_cap = self.config.max_actions_per_drain.max(1);
        let mut metrics = DrainMetrics::default();

        while metrics.processed < cycle_cap {
            let Some(envelope) = self.queue.pop_front() else {
                break;
            };
            metrics.processed += 1;
            let kind = envelope.kind();
            let client_id = envelope.ctx.client_id.clone();

            match self.process_envelope(envelope, now_ms).await {
                Ok(outcome) => {
                    self.version += 1;
                    self.dirty = true;
                    self.push_outcome(kind, outcome);
                    metrics.applied += 1;
                }
                Err(error) => {
                    match error.class {
                        ErrorClass::Inconsistency => tracing::error!(
                            kind = %kind,
                            code = ?error.code,
                            "action left partial external state: {}",
                            error.message
                        ),
                        ErrorClass::External => tracing::warn!(
                            kind = %kind,
                            "external dependency failed: {}",
                            error.message
                        ),
                        _ => tracing::debug!(
                            kind = %kind,
                            code = ?error.code,
                            "action rejected"
                        ),
                    }
                    self.push_rejection(client_id, Some(kind), error);
                    metrics.rejected += 1;
                }
            }
        }

        metrics.carried_over = self.queue.len();
        self.last_drain = metrics;
        metrics
    }

    async fn process_envelope(
        &mut self,
        envelope: ActionEnvelope,
        now_ms: u64,
    ) -> Result<ActionOutcome, ActionError> {
        if let Some(action_id) = envelope.action_id.as_deref() {
            if !self.recent_action_ids.observe(action_id) {
                return Err(ActionError::rejected(
                    RejectCode::DuplicateAction,
                    format!("action {action_id} was already processed"),
                ));
            }
        }

        let system_id = router::route(envelope.kind());
        if !self.systems.contains_key(&system_id) {
            return Err(ActionError::rejected(
                RejectCode::UnroutedAction,
                format!("no {system_id} system registered for {}", envelope.kind()),
            ));
        }

        let view = self.world_state();
        let system = self
            .systems
            .get_mut(&system_id)
            .ok_or_else(|| ActionError::inconsistency("system vanished mid-drain"))?;

        system.validate(&envelope, &view, now_ms)?;
        let mut outcome = system.apply(&envelope, &view, now_ms).await?;

        if !outcome.inventory_changes.is_empty() {
            self.apply_inventory_changes(&outcome.inventory_changes)?;
            outcome
                .delta
                .inventories
                .extend(outcome.inventory_changes.clone());
        }

        Ok(outcome)
    }

    /// Cross-slice item movements pass back through the inventory system,
    /// the sole writer of that slice. Under sequential draining a mediated
    /// debit validated against the view cannot fail; if it does, the action
    /// has already mutated its own slice, which is a partial-failure state.
    fn apply_inventory_changes(
        &mut self,
        changes: &[contracts::InventoryChange],
    ) -> Result<(), ActionError> {
        let inventory = self
            .systems
            .get_mut(&SystemId::Inventory)
            .and_then(|system| system.as_any_mut().downcast_mut::<InventorySystem>())
            .ok_or_else(|| {
                ActionError::inconsistency("inventory system missing for mediated change")
            })?;

        inventory.apply_changes(changes).map_err(|err| {
            tracing::error!(
                "mediated inventory change failed after local mutation: {}",
                err.message
            );
            ActionError::inconsistency(format!("mediated inventory change failed: {}", err.message))
        })
    }
}
