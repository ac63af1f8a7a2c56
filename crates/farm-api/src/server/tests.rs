use super::*;

use contracts::{ActionError, ActionKind, ActionOutcome, OutcomeEvent, RejectCode, RejectionNotice};

fn outcome_event(version: u64) -> SessionEvent {
    SessionEvent::Event(OutcomeEvent {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        event_id: format!("evt_{version:06}"),
        kind: ActionKind::PlaceBuilding,
        version,
        outcome: ActionOutcome::default(),
    })
}

fn rejection_event(client_id: &str) -> SessionEvent {
    SessionEvent::ActionError(RejectionNotice {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        client_id: client_id.to_string(),
        kind: Some(ActionKind::PlaceBuilding),
        error: ActionError::rejected(RejectCode::CellOccupied, "overlap"),
    })
}

#[test]
fn outcome_messages_broadcast_to_every_subscriber() {
    let messages = session_events_to_messages("farm_1", &[outcome_event(3)]);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message_type, "event");
    assert!(messages[0].client_id.is_none());
    assert!(messages[0].should_deliver(Some("client:anyone")));
    assert!(messages[0].should_deliver(None));
}

#[test]
fn rejection_messages_unicast_to_their_origin() {
    let messages = session_events_to_messages("farm_1", &[rejection_event("client:alice")]);
    assert_eq!(messages[0].message_type, "action_error");
    assert!(messages[0].should_deliver(Some("client:alice")));
    assert!(!messages[0].should_deliver(Some("client:bob")));
    assert!(!messages[0].should_deliver(None));
}

#[test]
fn messages_carry_the_session_id_for_stream_filtering() {
    let messages =
        session_events_to_messages("farm_1", &[outcome_event(1), rejection_event("client:a")]);
    assert!(messages.iter().all(|message| message.session_id == "farm_1"));
}

#[test]
fn outcome_payload_preserves_version_for_gap_detection() {
    let messages = session_events_to_messages("farm_1", &[outcome_event(41), outcome_event(42)]);
    let versions: Vec<u64> = messages
        .iter()
        .map(|message| {
            message.payload["version"]
                .as_u64()
                .expect("version in payload")
        })
        .collect();
    assert_eq!(versions, vec![41, 42]);
}
