//! v1 cross-boundary contracts for the farm session kernel, API, and persistence.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod serde_u64_string;

pub const SCHEMA_VERSION_V1: &str = "1.0";

/// Default farm grid dimensions, matching the shipped starter farm.
pub const DEFAULT_GRID_WIDTH: u32 = 30;
pub const DEFAULT_GRID_HEIGHT: u32 = 30;

// ---------------------------------------------------------------------------
// Grid geometry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct GridPos {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Footprint {
    pub width: u32,
    pub height: u32,
}

impl Footprint {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width/height swap under quarter rotations. The occupancy index never
    /// infers rotated dimensions; callers resolve the footprint first.
    pub fn oriented(self, rotation: Rotation) -> Self {
        match rotation {
            Rotation::R0 | Rotation::R180 => self,
            Rotation::R90 | Rotation::R270 => Self {
                width: self.height,
                height: self.width,
            },
        }
    }

    pub fn cell_count(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    #[default]
    R0,
    R90,
    R180,
    R270,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GridBounds {
    pub width: u32,
    pub height: u32,
}

impl Default for GridBounds {
    fn default() -> Self {
        Self {
            width: DEFAULT_GRID_WIDTH,
            height: DEFAULT_GRID_HEIGHT,
        }
    }
}

/// Canonical occupancy key for a cell, `"x:y"`.
pub fn cell_key(x: i32, y: i32) -> String {
    format!("{x}:{y}")
}

// ---------------------------------------------------------------------------
// Resources and definitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Gold,
    Wood,
    Stone,
    Feed,
}

pub type CostMap = BTreeMap<ResourceKind, i64>;

/// Building template. `upgrade_cost` is a first-class field: upgrade pricing
/// is never derived from the shape of `build_cost`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildingDef {
    pub def_id: String,
    pub name: String,
    pub size: Footprint,
    pub build_cost: CostMap,
    pub upgrade_cost: CostMap,
    pub max_level: u8,
    /// Percentage of `build_cost` notionally returned on removal, informational
    /// for clients; the kernel does not credit refunds.
    pub refund_pct: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CropDef {
    pub def_id: String,
    pub name: String,
    pub seed_cost: CostMap,
    pub growth_ms: u64,
    pub yield_item: String,
    pub yield_qty: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnimalDef {
    pub def_id: String,
    pub name: String,
    pub feed_cost: CostMap,
    pub produce_interval_ms: u64,
    pub product_item: String,
    pub product_qty: i64,
}

// ---------------------------------------------------------------------------
// World state slices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildingInstance {
    pub id: String,
    pub def_id: String,
    pub owner_id: String,
    pub pos: GridPos,
    /// Cached at placement time so later template edits never resize an
    /// existing placement.
    pub footprint: Footprint,
    pub rotation: Rotation,
    pub level: u8,
    pub created_at_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GridState {
    pub by_id: BTreeMap<String, BuildingInstance>,
    /// Cell key -> occupying structure id. At most one id per cell; the union
    /// of all instances' claimed cells equals this map's key set.
    pub occupancy: BTreeMap<String, String>,
    pub next_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CropInstance {
    pub id: String,
    pub def_id: String,
    pub owner_id: String,
    pub plot: GridPos,
    pub planted_at_ms: u64,
    pub ripe_at_ms: u64,
    /// Set by the tick pass once ripeness has been announced, so the event
    /// fires exactly once per crop.
    #[serde(default)]
    pub ripe_announced: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CropsState {
    pub by_id: BTreeMap<String, CropInstance>,
    /// Plot cell key -> crop id, disjoint bookkeeping from building occupancy.
    pub plots: BTreeMap<String, String>,
    pub next_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnimalInstance {
    pub id: String,
    pub def_id: String,
    pub owner_id: String,
    pub fed_at_ms: Option<u64>,
    pub last_collected_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnimalsState {
    pub by_id: BTreeMap<String, AnimalInstance>,
    pub next_id: u64,
}

/// Per-user item containers; `"main"` is the default container.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Inventory {
    pub containers: BTreeMap<String, BTreeMap<String, i64>>,
}

pub const DEFAULT_CONTAINER: &str = "main";

impl Inventory {
    pub fn quantity(&self, container: &str, item: &str) -> i64 {
        self.containers
            .get(container)
            .and_then(|slots| slots.get(item))
            .copied()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InventoriesState {
    pub by_user: BTreeMap<String, Inventory>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EconomyState {
    /// Read-only mirror of the external wallet ledger, refreshed on apply.
    pub balances: BTreeMap<String, CostMap>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerProfile {
    pub user_id: String,
    pub joined_at_ms: u64,
    pub last_seen_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayersState {
    pub by_id: BTreeMap<String, PlayerProfile>,
}

/// Root aggregate. Mutated only by the session's drain and tick paths, never
/// by network handlers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorldState {
    pub schema_version: String,
    pub session_id: String,
    pub version: u64,
    pub tick: u64,
    pub last_saved_at_ms: Option<u64>,
    pub bounds: GridBounds,
    pub buildings: GridState,
    pub crops: CropsState,
    pub animals: AnimalsState,
    pub inventories: InventoriesState,
    pub economy: EconomyState,
    pub players: PlayersState,
}

impl WorldState {
    pub fn empty(session_id: impl Into<String>, bounds: GridBounds) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            session_id: session_id.into(),
            version: 0,
            tick: 0,
            last_saved_at_ms: None,
            bounds,
            buildings: GridState::default(),
            crops: CropsState::default(),
            animals: AnimalsState::default(),
            inventories: InventoriesState::default(),
            economy: EconomyState::default(),
            players: PlayersState::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    PlaceBuilding,
    RemoveBuilding,
    UpgradeBuilding,
    PlantCrop,
    HarvestCrop,
    FeedAnimal,
    CollectProduct,
    SellItem,
    MoveInventory,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlaceBuilding => "place_building",
            Self::RemoveBuilding => "remove_building",
            Self::UpgradeBuilding => "upgrade_building",
            Self::PlantCrop => "plant_crop",
            Self::HarvestCrop => "harvest_crop",
            Self::FeedAnimal => "feed_animal",
            Self::CollectProduct => "collect_product",
            Self::SellItem => "sell_item",
            Self::MoveInventory => "move_inventory",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of client intents. Unknown tags fail at deserialization and are
/// reported as protocol errors; nothing routes by raw string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionPayload {
    PlaceBuilding {
        def_id: String,
        origin: GridPos,
        #[serde(default)]
        rotation: Rotation,
    },
    RemoveBuilding {
        building_id: String,
    },
    UpgradeBuilding {
        building_id: String,
    },
    PlantCrop {
        def_id: String,
        plot: GridPos,
    },
    HarvestCrop {
        crop_id: String,
    },
    FeedAnimal {
        animal_id: String,
    },
    CollectProduct {
        animal_id: String,
    },
    SellItem {
        item: String,
        qty: i64,
    },
    MoveInventory {
        item: String,
        qty: i64,
        from_container: String,
        to_container: String,
    },
}

impl ActionPayload {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::PlaceBuilding { .. } => ActionKind::PlaceBuilding,
            Self::RemoveBuilding { .. } => ActionKind::RemoveBuilding,
            Self::UpgradeBuilding { .. } => ActionKind::UpgradeBuilding,
            Self::PlantCrop { .. } => ActionKind::PlantCrop,
            Self::HarvestCrop { .. } => ActionKind::HarvestCrop,
            Self::FeedAnimal { .. } => ActionKind::FeedAnimal,
            Self::CollectProduct { .. } => ActionKind::CollectProduct,
            Self::SellItem { .. } => ActionKind::SellItem,
            Self::MoveInventory { .. } => ActionKind::MoveInventory,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionContext {
    pub client_id: String,
    pub user_id: String,
    #[serde(with = "serde_u64_string")]
    pub issued_at_ms: u64,
}

/// A client intent plus its execution context. Immutable after creation,
/// consumed exactly once by the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionEnvelope {
    pub schema_version: String,
    #[serde(default)]
    pub action_id: Option<String>,
    /// Reserved for future scheduling; never consulted for ordering.
    #[serde(default)]
    pub priority: i8,
    pub payload: ActionPayload,
    pub ctx: ActionContext,
}

impl ActionEnvelope {
    pub fn new(payload: ActionPayload, ctx: ActionContext) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            action_id: None,
            priority: 0,
            payload,
            ctx,
        }
    }

    pub fn with_action_id(mut self, action_id: impl Into<String>) -> Self {
        self.action_id = Some(action_id.into());
        self
    }

    pub fn kind(&self) -> ActionKind {
        self.payload.kind()
    }
}

// ---------------------------------------------------------------------------
// Action outcomes and errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectCode {
    UnknownTemplate,
    OutOfBounds,
    CellOccupied,
    PlotOccupied,
    NotFound,
    NotOwner,
    MaxLevel,
    InsufficientItems,
    NotRipe,
    AnimalNotFed,
    ProduceNotReady,
    InvalidQuantity,
    UnroutedAction,
    DuplicateAction,
    InvalidPayload,
    CostCheckFailed,
    CostUnavailable,
    InternalInconsistency,
}

/// Failure classes per the propagation policy: everything converts into a
/// rejection event, but operators and compensation logic need to tell an
/// expected validation failure apart from a partial-failure state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Rejected,
    External,
    Inconsistency,
    Protocol,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionError {
    pub class: ErrorClass,
    pub code: RejectCode,
    pub message: String,
    pub details: Option<String>,
}

impl ActionError {
    pub fn rejected(code: RejectCode, message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Rejected,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn external(code: RejectCode, message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::External,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn inconsistency(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Inconsistency,
            code: RejectCode::InternalInconsistency,
            message: message.into(),
            details: None,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Protocol,
            code: RejectCode::InvalidPayload,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ActionError {}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BuildingsDelta {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<BuildingInstance>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updated: Vec<BuildingInstance>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CropsDelta {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<CropInstance>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnimalsDelta {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updated: Vec<AnimalInstance>,
}

/// Signed item movement on a user's inventory, applied only by the inventory
/// system itself. Foreign systems request these through `ActionOutcome`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InventoryChange {
    pub user_id: String,
    pub container: String,
    pub item: String,
    pub delta: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StateDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buildings: Option<BuildingsDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crops: Option<CropsDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animals: Option<AnimalsDelta>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inventories: Vec<InventoryChange>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub balances: BTreeMap<String, CostMap>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DomainEventType {
    BuildingPlaced,
    BuildingRemoved,
    BuildingUpgraded,
    CropPlanted,
    CropRipened,
    CropHarvested,
    AnimalFed,
    ProductCollected,
    ItemSold,
    InventoryMoved,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomainEvent {
    pub event_type: DomainEventType,
    pub data: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActionOutcome {
    pub delta: StateDelta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<DomainEvent>,
    /// Cross-slice item movements, mediated by the session and folded into
    /// `delta.inventories` once the inventory system has applied them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inventory_changes: Vec<InventoryChange>,
}

// ---------------------------------------------------------------------------
// Session events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutcomeEvent {
    pub schema_version: String,
    pub event_id: String,
    pub kind: ActionKind,
    pub version: u64,
    pub outcome: ActionOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RejectionNotice {
    pub schema_version: String,
    pub client_id: String,
    pub kind: Option<ActionKind>,
    pub error: ActionError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickReport {
    pub schema_version: String,
    pub tick: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<DomainEvent>,
}

/// Everything the session emits toward connected clients. Outcome and tick
/// reports broadcast to all members; rejections unicast to their origin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Event(OutcomeEvent),
    ActionError(RejectionNotice),
    Tick(TickReport),
}

// ---------------------------------------------------------------------------
// Session configuration and status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    pub schema_version: String,
    pub session_id: String,
    pub bounds: GridBounds,
    /// Queue drain cadence; distinct from the gameplay tick cadence.
    pub drain_interval_ms: u64,
    pub tick_interval_ms: u64,
    /// Per-cycle envelope cap so floods cannot starve tick updates.
    pub max_actions_per_drain: usize,
    /// Capacity of the recently-seen `action_id` ring used for dedup.
    pub action_dedup_capacity: usize,
    /// Bound on each external cost port call.
    pub cost_timeout_ms: u64,
    pub snapshot_debounce_ms: u64,
    pub notes: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            session_id: "farm_local_001".to_string(),
            bounds: GridBounds::default(),
            drain_interval_ms: 50,
            tick_interval_ms: 1_000,
            max_actions_per_drain: 256,
            action_dedup_capacity: 1_024,
            cost_timeout_ms: 2_000,
            snapshot_debounce_ms: 3_000,
            notes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStatus {
    pub schema_version: String,
    pub session_id: String,
    pub version: u64,
    pub tick: u64,
    pub queue_depth: usize,
    pub dirty: bool,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "session_id={} version={} tick={} queue_depth={}",
            self.session_id, self.version, self.tick, self.queue_depth
        )
    }
}

// ---------------------------------------------------------------------------
// API surface errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SessionNotFound,
    InvalidAction,
    InvalidQuery,
    ContractVersionUnsupported,
    SessionStateConflict,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub schema_version: String,
    pub error_code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            error_code,
            message: message.into(),
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_payload_round_trips_tagged_json() {
        let payload = ActionPayload::PlaceBuilding {
            def_id: "barn".to_string(),
            origin: GridPos { x: 3, y: 4 },
            rotation: Rotation::R90,
        };
        let raw = serde_json::to_string(&payload).expect("serialize");
        assert!(raw.contains(r#""type":"place_building""#));
        let decoded: ActionPayload = serde_json::from_str(&raw).expect("deserialize");
        assert_eq!(payload, decoded);
    }

    #[test]
    fn unknown_action_tag_fails_deserialization() {
        let raw = r#"{"type":"teleport_cow","cow_id":"c1"}"#;
        assert!(serde_json::from_str::<ActionPayload>(raw).is_err());
    }

    #[test]
    fn payload_kind_matches_variant() {
        let payload = ActionPayload::SellItem {
            item: "wheat".to_string(),
            qty: 3,
        };
        assert_eq!(payload.kind(), ActionKind::SellItem);
        assert_eq!(payload.kind().as_str(), "sell_item");
    }

    #[test]
    fn rotation_swaps_footprint_dimensions() {
        let fp = Footprint::new(3, 2);
        assert_eq!(fp.oriented(Rotation::R0), fp);
        assert_eq!(fp.oriented(Rotation::R90), Footprint::new(2, 3));
        assert_eq!(fp.oriented(Rotation::R180), fp);
        assert_eq!(fp.oriented(Rotation::R270), Footprint::new(2, 3));
    }

    #[test]
    fn envelope_defaults_priority_and_action_id() {
        let raw = r#"{
            "schema_version": "1.0",
            "payload": {"type": "harvest_crop", "crop_id": "crp_000001"},
            "ctx": {"client_id": "c1", "user_id": "u1", "issued_at_ms": "17"}
        }"#;
        let envelope: ActionEnvelope = serde_json::from_str(raw).expect("deserialize");
        assert_eq!(envelope.priority, 0);
        assert!(envelope.action_id.is_none());
        assert_eq!(envelope.ctx.issued_at_ms, 17);
    }

    #[test]
    fn reject_codes_use_screaming_snake_case() {
        let raw = serde_json::to_string(&RejectCode::CellOccupied).expect("serialize");
        assert_eq!(raw, r#""CELL_OCCUPIED""#);
    }
}
