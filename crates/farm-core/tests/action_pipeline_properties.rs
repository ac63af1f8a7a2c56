use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use contracts::{
    cell_key, ActionContext, ActionEnvelope, ActionPayload, CostMap, GridBounds, GridPos,
    ResourceKind, SessionConfig, SessionEvent, WorldState,
};
use farm_core::{default_registry, FarmSession, WalletLedger};
use proptest::prelude::*;

fn base_config() -> SessionConfig {
    SessionConfig {
        session_id: "farm_props".to_string(),
        bounds: GridBounds {
            width: 12,
            height: 12,
        },
        ..SessionConfig::default()
    }
}

fn rich_balance() -> CostMap {
    let mut balance = CostMap::new();
    balance.insert(ResourceKind::Gold, 1_000_000);
    balance.insert(ResourceKind::Wood, 100_000);
    balance.insert(ResourceKind::Stone, 100_000);
    balance.insert(ResourceKind::Feed, 100_000);
    balance
}

fn funded_session(users: &[&str]) -> FarmSession {
    let ledger = Arc::new(WalletLedger::new());
    let mut balances = BTreeMap::new();
    for user in users {
        balances.insert(user.to_string(), rich_balance());
    }
    ledger.adopt(balances);
    FarmSession::with_collaborators(base_config(), Arc::new(default_registry()), ledger)
}

fn place(user: &str, def_id: &str, x: i32, y: i32) -> ActionEnvelope {
    ActionEnvelope::new(
        ActionPayload::PlaceBuilding {
            def_id: def_id.to_string(),
            origin: GridPos { x, y },
            rotation: Default::default(),
        },
        ActionContext {
            client_id: format!("client:{user}"),
            user_id: user.to_string(),
            issued_at_ms: 1,
        },
    )
}

/// Claimed cell sets of any two distinct structures are disjoint, and the
/// occupancy map is exactly the union of all claimed cells.
fn assert_occupancy_exclusive(world: &WorldState) {
    let mut claimed = BTreeSet::new();
    for instance in world.buildings.by_id.values() {
        for dy in 0..instance.footprint.height as i32 {
            for dx in 0..instance.footprint.width as i32 {
                let key = cell_key(instance.pos.x + dx, instance.pos.y + dy);
                assert!(
                    claimed.insert(key.clone()),
                    "cell {key} claimed by two structures"
                );
                assert_eq!(
                    world.buildings.occupancy.get(&key),
                    Some(&instance.id),
                    "cell {key} not indexed to its owner"
                );
            }
        }
    }
    assert_eq!(
        claimed.len(),
        world.buildings.occupancy.len(),
        "occupancy map holds orphaned cells"
    );
}

fn drain_blocking(session: &mut FarmSession, now_ms: u64) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("test runtime");
    runtime.block_on(session.drain(now_ms));
}

#[test]
fn property_occupancy_stays_exclusive_under_dense_placement() {
    let mut session = funded_session(&["alice", "bob"]);
    // Saturate the farm with 1x1 wells on every cell plus a layer of
    // overlapping farmhouses; only non-overlapping placements may land.
    for y in 0..12 {
        for x in 0..12 {
            let user = if (x + y) % 2 == 0 { "alice" } else { "bob" };
            session.submit(place(user, "well", x, y));
        }
    }
    for y in 0..11 {
        session.submit(place("alice", "farmhouse", 3, y));
    }
    drain_blocking(&mut session, 1_000);

    assert_occupancy_exclusive(&session.world_state());
}

#[test]
fn property_version_counts_only_applied_actions() {
    let mut session = funded_session(&["alice"]);
    session.submit(place("alice", "farmhouse", 0, 0));
    session.submit(place("alice", "farmhouse", 0, 0)); // overlap, rejected
    session.submit(place("alice", "farmhouse", 40, 0)); // out of bounds
    session.submit(place("alice", "farmhouse", 4, 0));
    drain_blocking(&mut session, 1_000);

    assert_eq!(session.version(), 2);
    let applied = session
        .take_events()
        .iter()
        .filter(|event| matches!(event, SessionEvent::Event(_)))
        .count();
    assert_eq!(applied, 2);
}

#[test]
fn property_rejections_never_change_the_assembled_world() {
    let mut session = funded_session(&["alice", "bob"]);
    session.submit(place("alice", "barn", 0, 0));
    drain_blocking(&mut session, 1_000);
    let settled = session.world_state();

    // Ownership violations and overlaps from a second player.
    let building_id = settled
        .buildings
        .by_id
        .keys()
        .next()
        .cloned()
        .expect("barn placed");
    session.submit(ActionEnvelope::new(
        ActionPayload::RemoveBuilding {
            building_id: building_id.clone(),
        },
        ActionContext {
            client_id: "client:bob".to_string(),
            user_id: "bob".to_string(),
            issued_at_ms: 2,
        },
    ));
    session.submit(ActionEnvelope::new(
        ActionPayload::UpgradeBuilding { building_id },
        ActionContext {
            client_id: "client:bob".to_string(),
            user_id: "bob".to_string(),
            issued_at_ms: 3,
        },
    ));
    session.submit(place("bob", "well", 1, 1));
    drain_blocking(&mut session, 2_000);

    assert_eq!(session.world_state(), settled);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any sequence of randomly sized placements at random origins keeps the
    /// occupancy index exclusive and the version equal to the applied count.
    #[test]
    fn occupancy_exclusivity_holds_for_random_placements(
        placements in prop::collection::vec(
            (0i32..14, 0i32..14, prop::sample::select(vec!["well", "coop", "farmhouse", "barn"])),
            1..40,
        )
    ) {
        let mut session = funded_session(&["alice"]);
        for (x, y, def_id) in &placements {
            session.submit(place("alice", def_id, *x, *y));
        }
        drain_blocking(&mut session, 1_000);

        let world = session.world_state();
        assert_occupancy_exclusive(&world);
        prop_assert_eq!(session.version(), world.buildings.by_id.len() as u64);
    }
}
