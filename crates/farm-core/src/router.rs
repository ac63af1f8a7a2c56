//! Action routing: a compile-time exhaustive map from action kind to the
//! owning domain system.

use contracts::ActionKind;

use crate::system::SystemId;

pub fn route(kind: ActionKind) -> SystemId {
    match kind {
        ActionKind::PlaceBuilding | ActionKind::RemoveBuilding | ActionKind::UpgradeBuilding => {
            SystemId::Buildings
        }
        ActionKind::PlantCrop | ActionKind::HarvestCrop => SystemId::Crops,
        ActionKind::FeedAnimal | ActionKind::CollectProduct => SystemId::Animals,
        ActionKind::SellItem => SystemId::Economy,
        ActionKind::MoveInventory => SystemId::Inventory,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn building_actions_route_to_buildings() {
        assert_eq!(route(ActionKind::PlaceBuilding), SystemId::Buildings);
        assert_eq!(route(ActionKind::RemoveBuilding), SystemId::Buildings);
        assert_eq!(route(ActionKind::UpgradeBuilding), SystemId::Buildings);
    }

    #[test]
    fn remaining_kinds_route_to_their_owners() {
        assert_eq!(route(ActionKind::PlantCrop), SystemId::Crops);
        assert_eq!(route(ActionKind::HarvestCrop), SystemId::Crops);
        assert_eq!(route(ActionKind::FeedAnimal), SystemId::Animals);
        assert_eq!(route(ActionKind::CollectProduct), SystemId::Animals);
        assert_eq!(route(ActionKind::SellItem), SystemId::Economy);
        assert_eq!(route(ActionKind::MoveInventory), SystemId::Inventory);
    }
}
