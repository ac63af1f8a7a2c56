//! Read-only definition registry: building, crop, and animal templates plus
//! sale prices, fixed at construction and shared by `Arc` into the systems.

use std::collections::BTreeMap;

use contracts::{AnimalDef, BuildingDef, CostMap, CropDef, Footprint, ResourceKind};

#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    buildings: BTreeMap<String, BuildingDef>,
    crops: BTreeMap<String, CropDef>,
    animals: BTreeMap<String, AnimalDef>,
    sale_prices: BTreeMap<String, i64>,
}

impl DefinitionRegistry {
    pub fn new(
        buildings: Vec<BuildingDef>,
        crops: Vec<CropDef>,
        animals: Vec<AnimalDef>,
        sale_prices: BTreeMap<String, i64>,
    ) -> Self {
        Self {
            buildings: buildings
                .into_iter()
                .map(|def| (def.def_id.clone(), def))
                .collect(),
            crops: crops
                .into_iter()
                .map(|def| (def.def_id.clone(), def))
                .collect(),
            animals: animals
                .into_iter()
                .map(|def| (def.def_id.clone(), def))
                .collect(),
            sale_prices,
        }
    }

    pub fn building(&self, def_id: &str) -> Option<&BuildingDef> {
        self.buildings.get(def_id)
    }

    pub fn crop(&self, def_id: &str) -> Option<&CropDef> {
        self.crops.get(def_id)
    }

    pub fn animal(&self, def_id: &str) -> Option<&AnimalDef> {
        self.animals.get(def_id)
    }

    /// Unit sale price for an item; items without a listed price cannot be sold.
    pub fn sale_price(&self, item: &str) -> Option<i64> {
        self.sale_prices.get(item).copied()
    }
}

fn gold(amount: i64) -> CostMap {
    let mut cost = CostMap::new();
    cost.insert(ResourceKind::Gold, amount);
    cost
}

/// Starter catalog matching the shipped farm content.
pub fn default_registry() -> DefinitionRegistry {
    let buildings = vec![
        BuildingDef {
            def_id: "farmhouse".to_string(),
            name: "Farmhouse".to_string(),
            size: Footprint::new(2, 2),
            build_cost: gold(120),
            upgrade_cost: gold(80),
            max_level: 4,
            refund_pct: 50,
        },
        BuildingDef {
            def_id: "barn".to_string(),
            name: "Barn".to_string(),
            size: Footprint::new(3, 2),
            build_cost: {
                let mut cost = gold(200);
                cost.insert(ResourceKind::Wood, 40);
                cost
            },
            upgrade_cost: gold(150),
            max_level: 3,
            refund_pct: 50,
        },
        BuildingDef {
            def_id: "coop".to_string(),
            name: "Chicken Coop".to_string(),
            size: Footprint::new(2, 1),
            build_cost: {
                let mut cost = gold(80);
                cost.insert(ResourceKind::Wood, 20);
                cost
            },
            upgrade_cost: gold(60),
            max_level: 3,
            refund_pct: 50,
        },
        BuildingDef {
            def_id: "well".to_string(),
            name: "Well".to_string(),
            size: Footprint::new(1, 1),
            build_cost: {
                let mut cost = gold(50);
                cost.insert(ResourceKind::Stone, 30);
                cost
            },
            upgrade_cost: gold(40),
            max_level: 2,
            refund_pct: 25,
        },
    ];

    let crops = vec![
        CropDef {
            def_id: "wheat".to_string(),
            name: "Wheat".to_string(),
            seed_cost: gold(10),
            growth_ms: 60_000,
            yield_item: "wheat".to_string(),
            yield_qty: 3,
        },
        CropDef {
            def_id: "carrot".to_string(),
            name: "Carrot".to_string(),
            seed_cost: gold(15),
            growth_ms: 90_000,
            yield_item: "carrot".to_string(),
            yield_qty: 2,
        },
    ];

    let animals = vec![
        AnimalDef {
            def_id: "chicken".to_string(),
            name: "Chicken".to_string(),
            feed_cost: {
                let mut cost = CostMap::new();
                cost.insert(ResourceKind::Feed, 2);
                cost
            },
            produce_interval_ms: 120_000,
            product_item: "egg".to_string(),
            product_qty: 1,
        },
        AnimalDef {
            def_id: "cow".to_string(),
            name: "Cow".to_string(),
            feed_cost: {
                let mut cost = CostMap::new();
                cost.insert(ResourceKind::Feed, 5);
                cost
            },
            produce_interval_ms: 300_000,
            product_item: "milk".to_string(),
            product_qty: 1,
        },
    ];

    let mut sale_prices = BTreeMap::new();
    sale_prices.insert("wheat".to_string(), 6);
    sale_prices.insert("carrot".to_string(), 11);
    sale_prices.insert("egg".to_string(), 8);
    sale_prices.insert("milk".to_string(), 20);

    DefinitionRegistry::new(buildings, crops, animals, sale_prices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_resolves_known_templates() {
        let registry = default_registry();
        let barn = registry.building("barn").expect("barn exists");
        assert_eq!(barn.size, Footprint::new(3, 2));
        assert!(registry.crop("wheat").is_some());
        assert!(registry.animal("cow").is_some());
        assert_eq!(registry.sale_price("milk"), Some(20));
    }

    #[test]
    fn unknown_ids_resolve_to_none() {
        let registry = default_registry();
        assert!(registry.building("castle").is_none());
        assert!(registry.crop("mandrake").is_none());
        assert!(registry.sale_price("relic").is_none());
    }

    #[test]
    fn every_building_has_positive_upgrade_cost() {
        let registry = default_registry();
        for def_id in ["farmhouse", "barn", "coop", "well"] {
            let def = registry.building(def_id).expect("catalog entry");
            assert!(
                def.upgrade_cost.values().all(|amount| *amount > 0),
                "{def_id} must carry a first-class upgrade cost"
            );
        }
    }
}
