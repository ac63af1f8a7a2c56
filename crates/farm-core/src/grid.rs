//! Grid occupancy index: arbitrates placement, removal, and upgrade of
//! multi-cell structure footprints.

use std::fmt;

use contracts::{
    cell_key, BuildingInstance, Footprint, GridBounds, GridPos, GridState, Rotation,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    OutOfBounds { origin: GridPos, footprint: Footprint },
    CellOccupied { x: i32, y: i32, occupant: String },
    NotFound(String),
    NotOwner(String),
    MaxLevel(String),
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBounds { origin, footprint } => write!(
                f,
                "footprint {}x{} at ({}, {}) exceeds bounds",
                footprint.width, footprint.height, origin.x, origin.y
            ),
            Self::CellOccupied { x, y, occupant } => {
                write!(f, "cell {x}:{y} already occupied by {occupant}")
            }
            Self::NotFound(id) => write!(f, "structure {id} not found"),
            Self::NotOwner(id) => write!(f, "structure {id} belongs to another owner"),
            Self::MaxLevel(id) => write!(f, "structure {id} is at max level"),
        }
    }
}

impl std::error::Error for GridError {}

/// Owns the buildings slice: the structure table and the sparse cell map.
/// Exclusively held by the buildings system; no other system touches it.
#[derive(Debug, Clone, Default)]
pub struct OccupancyIndex {
    state: GridState,
}

/// Footprint cells enumerated row-major from the origin.
fn cells_for(origin: GridPos, footprint: Footprint) -> impl Iterator<Item = (i32, i32)> {
    let (w, h) = (footprint.width as i32, footprint.height as i32);
    (0..h).flat_map(move |dy| (0..w).map(move |dx| (origin.x + dx, origin.y + dy)))
}

impl OccupancyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt a previously persisted slice, replacing the current one.
    pub fn adopt(&mut self, state: GridState) {
        self.state = state;
    }

    /// Value copy of the slice for persistence or diffing.
    pub fn snapshot(&self) -> GridState {
        self.state.clone()
    }

    pub fn instance(&self, id: &str) -> Option<&BuildingInstance> {
        self.state.by_id.get(id)
    }

    pub fn len(&self) -> usize {
        self.state.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.by_id.is_empty()
    }

    fn in_bounds(origin: GridPos, footprint: Footprint, bounds: GridBounds) -> bool {
        origin.x >= 0
            && origin.y >= 0
            && origin.x + footprint.width as i32 <= bounds.width as i32
            && origin.y + footprint.height as i32 <= bounds.height as i32
    }

    pub fn can_place(&self, origin: GridPos, footprint: Footprint, bounds: GridBounds) -> bool {
        if !Self::in_bounds(origin, footprint, bounds) {
            return false;
        }
        cells_for(origin, footprint)
            .all(|(x, y)| !self.state.occupancy.contains_key(&cell_key(x, y)))
    }

    /// Claim all footprint cells and record the instance.
    ///
    /// Callers are expected to have confirmed `can_place`; the check is still
    /// repeated atomically against this index's own state, and an occupied
    /// target cell is a hard error — never an overwrite.
    #[allow(clippy::too_many_arguments)]
    pub fn place(
        &mut self,
        owner_id: &str,
        def_id: &str,
        origin: GridPos,
        footprint: Footprint,
        rotation: Rotation,
        bounds: GridBounds,
        now_ms: u64,
    ) -> Result<BuildingInstance, GridError> {
        if !Self::in_bounds(origin, footprint, bounds) {
            return Err(GridError::OutOfBounds { origin, footprint });
        }
        for (x, y) in cells_for(origin, footprint) {
            if let Some(occupant) = self.state.occupancy.get(&cell_key(x, y)) {
                return Err(GridError::CellOccupied {
                    x,
                    y,
                    occupant: occupant.clone(),
                });
            }
        }

        self.state.next_id += 1;
        let id = format!("bld_{:06}", self.state.next_id);
        let placed = BuildingInstance {
            id: id.clone(),
            def_id: def_id.to_string(),
            owner_id: owner_id.to_string(),
            pos: origin,
            footprint,
            rotation,
            level: 1,
            created_at_ms: now_ms,
        };
        for (x, y) in cells_for(origin, footprint) {
            self.state.occupancy.insert(cell_key(x, y), id.clone());
        }
        self.state.by_id.insert(id, placed.clone());
        Ok(placed)
    }

    pub fn can_remove(&self, owner_id: &str, id: &str) -> bool {
        self.state
            .by_id
            .get(id)
            .map_or(false, |instance| instance.owner_id == owner_id)
    }

    /// Release all cells held by the instance and return it, so callers can
    /// report the vacated footprint.
    pub fn remove(&mut self, owner_id: &str, id: &str) -> Result<BuildingInstance, GridError> {
        let instance = self
            .state
            .by_id
            .get(id)
            .ok_or_else(|| GridError::NotFound(id.to_string()))?;
        if instance.owner_id != owner_id {
            return Err(GridError::NotOwner(id.to_string()));
        }
        let instance = instance.clone();
        for (x, y) in cells_for(instance.pos, instance.footprint) {
            self.state.occupancy.remove(&cell_key(x, y));
        }
        self.state.by_id.remove(id);
        Ok(instance)
    }

    pub fn can_upgrade(&self, owner_id: &str, id: &str, max_level: Option<u8>) -> bool {
        match self.state.by_id.get(id) {
            Some(instance) if instance.owner_id == owner_id => {
                max_level.map_or(true, |max| instance.level < max)
            }
            _ => false,
        }
    }

    /// Level +1; footprint and occupied cells are untouched.
    pub fn upgrade(
        &mut self,
        owner_id: &str,
        id: &str,
        max_level: Option<u8>,
    ) -> Result<BuildingInstance, GridError> {
        let instance = self
            .state
            .by_id
            .get_mut(id)
            .ok_or_else(|| GridError::NotFound(id.to_string()))?;
        if instance.owner_id != owner_id {
            return Err(GridError::NotOwner(id.to_string()));
        }
        if max_level.map_or(false, |max| instance.level >= max) {
            return Err(GridError::MaxLevel(id.to_string()));
        }
        instance.level += 1;
        Ok(instance.clone())
    }

    /// Exclusivity invariant: the union of all instances' claimed cells must
    /// exactly equal the occupancy key set. Exposed for tests and debugging.
    pub fn invariant_holds(&self) -> bool {
        let mut expected = std::collections::BTreeMap::new();
        for instance in self.state.by_id.values() {
            for (x, y) in cells_for(instance.pos, instance.footprint) {
                if expected.insert(cell_key(x, y), instance.id.clone()).is_some() {
                    return false;
                }
            }
        }
        expected == self.state.occupancy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds_10() -> GridBounds {
        GridBounds {
            width: 10,
            height: 10,
        }
    }

    fn place_2x2_at_origin(index: &mut OccupancyIndex) -> BuildingInstance {
        index
            .place(
                "alice",
                "barn",
                GridPos { x: 0, y: 0 },
                Footprint::new(2, 2),
                Rotation::R0,
                bounds_10(),
                1_000,
            )
            .expect("placement succeeds")
    }

    #[test]
    fn place_claims_exactly_footprint_cells() {
        let mut index = OccupancyIndex::new();
        let placed = place_2x2_at_origin(&mut index);

        let snapshot = index.snapshot();
        assert_eq!(snapshot.occupancy.len(), 4);
        for key in ["0:0", "0:1", "1:0", "1:1"] {
            assert_eq!(snapshot.occupancy.get(key), Some(&placed.id));
        }
        assert!(index.invariant_holds());
    }

    #[test]
    fn overlapping_placement_is_rejected_without_mutation() {
        let mut index = OccupancyIndex::new();
        place_2x2_at_origin(&mut index);
        let before = index.snapshot();

        let err = index
            .place(
                "bob",
                "well",
                GridPos { x: 0, y: 0 },
                Footprint::new(1, 1),
                Rotation::R0,
                bounds_10(),
                2_000,
            )
            .expect_err("overlap must fail");
        assert!(matches!(err, GridError::CellOccupied { x: 0, y: 0, .. }));
        assert_eq!(index.snapshot(), before);
    }

    #[test]
    fn can_place_rejects_out_of_bounds() {
        let index = OccupancyIndex::new();
        let fp = Footprint::new(2, 2);
        assert!(!index.can_place(GridPos { x: -1, y: 0 }, fp, bounds_10()));
        assert!(!index.can_place(GridPos { x: 9, y: 0 }, fp, bounds_10()));
        assert!(!index.can_place(GridPos { x: 0, y: 9 }, fp, bounds_10()));
        assert!(index.can_place(GridPos { x: 8, y: 8 }, fp, bounds_10()));
    }

    #[test]
    fn remove_by_non_owner_fails_and_keeps_cells() {
        let mut index = OccupancyIndex::new();
        let placed = place_2x2_at_origin(&mut index);

        let err = index.remove("mallory", &placed.id).expect_err("wrong owner");
        assert!(matches!(err, GridError::NotOwner(_)));
        assert_eq!(index.snapshot().occupancy.len(), 4);
        assert!(index.instance(&placed.id).is_some());
    }

    #[test]
    fn remove_by_owner_releases_every_cell() {
        let mut index = OccupancyIndex::new();
        let placed = place_2x2_at_origin(&mut index);

        let removed = index.remove("alice", &placed.id).expect("owner removes");
        assert_eq!(removed.id, placed.id);
        assert!(index.snapshot().occupancy.is_empty());
        assert!(index.is_empty());
        assert!(index.invariant_holds());
    }

    #[test]
    fn remove_unknown_id_reports_not_found() {
        let mut index = OccupancyIndex::new();
        let err = index.remove("alice", "bld_999999").expect_err("missing id");
        assert!(matches!(err, GridError::NotFound(_)));
    }

    #[test]
    fn upgrade_respects_max_level() {
        let mut index = OccupancyIndex::new();
        let placed = place_2x2_at_origin(&mut index);

        let upgraded = index
            .upgrade("alice", &placed.id, Some(2))
            .expect("first upgrade");
        assert_eq!(upgraded.level, 2);

        let err = index
            .upgrade("alice", &placed.id, Some(2))
            .expect_err("second upgrade hits cap");
        assert!(matches!(err, GridError::MaxLevel(_)));
        assert_eq!(index.instance(&placed.id).map(|b| b.level), Some(2));
    }

    #[test]
    fn upgrade_never_changes_occupancy() {
        let mut index = OccupancyIndex::new();
        let placed = place_2x2_at_origin(&mut index);
        let cells_before = index.snapshot().occupancy;

        index
            .upgrade("alice", &placed.id, None)
            .expect("upgrade without cap");
        assert_eq!(index.snapshot().occupancy, cells_before);
    }

    #[test]
    fn can_upgrade_checks_ownership() {
        let mut index = OccupancyIndex::new();
        let placed = place_2x2_at_origin(&mut index);
        assert!(index.can_upgrade("alice", &placed.id, Some(5)));
        assert!(!index.can_upgrade("mallory", &placed.id, Some(5)));
        assert!(!index.can_upgrade("alice", "bld_404", Some(5)));
    }

    #[test]
    fn snapshot_is_idempotent_without_mutation() {
        let mut index = OccupancyIndex::new();
        place_2x2_at_origin(&mut index);
        assert_eq!(index.snapshot(), index.snapshot());
    }

    #[test]
    fn adopted_state_round_trips() {
        let mut index = OccupancyIndex::new();
        place_2x2_at_origin(&mut index);
        let snapshot = index.snapshot();

        let mut restored = OccupancyIndex::new();
        restored.adopt(snapshot.clone());
        assert_eq!(restored.snapshot(), snapshot);
        assert!(restored.invariant_holds());
    }

    #[test]
    fn ids_remain_unique_after_removal() {
        let mut index = OccupancyIndex::new();
        let first = place_2x2_at_origin(&mut index);
        index.remove("alice", &first.id).expect("remove");
        let second = place_2x2_at_origin(&mut index);
        assert_ne!(first.id, second.id);
    }
}
