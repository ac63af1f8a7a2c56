use super::*;

use contracts::{
    DomainEvent as Event, OutcomeEvent, RejectionNotice, TickReport, SCHEMA_VERSION_V1,
};

impl FarmSession {
    /// Broadcast outcome for an applied action, in apply order and carrying
    /// the version its application produced.
    pub(super) fn push_outcome(&mut self, kind: ActionKind, outcome: ActionOutcome) {
        self.outbox.push(SessionEvent::Event(OutcomeEvent {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            event_id: format!("evt_{:06}", self.version),
            kind,
            version: self.version,
            outcome,
        }));
    }

    /// Rejection unicast to the originating client only.
    pub(super) fn push_rejection(
        &mut self,
        client_id: String,
        kind: Option<ActionKind>,
        error: ActionError,
    ) {
        self.outbox.push(SessionEvent::ActionError(RejectionNotice {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            client_id,
            kind,
            error,
        }));
    }

    pub(super) fn push_tick_report(&mut self, events: Vec<Event>) {
        self.outbox.push(SessionEvent::Tick(TickReport {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tick: self.tick,
            events,
        }));
    }

    /// Drain the outbox for transport. Order matches apply order.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.outbox)
    }
}
