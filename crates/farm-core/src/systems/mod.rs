pub mod animals;
pub mod buildings;
pub mod crops;
pub mod economy;
pub mod inventory;

pub use animals::AnimalsSystem;
pub use buildings::BuildingsSystem;
pub use crops::CropsSystem;
pub use economy::EconomySystem;
pub use inventory::InventorySystem;
