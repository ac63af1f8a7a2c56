use super::*;

use contracts::{SessionStatus, SCHEMA_VERSION_V1};

use crate::system::StateSlice;

impl FarmSession {
    /// Assemble the aggregate world from the systems' slices plus the meta
    /// owned here. Used for validation views, join pushes, and persistence.
    pub fn world_state(&self) -> WorldState {
        let mut state = WorldState::empty(self.config.session_id.clone(), self.config.bounds);
        state.version = self.version;
        state.tick = self.tick;
        state.last_saved_at_ms = self.last_saved_at_ms;
        state.players = self.players.clone();

        for system in self.systems.values() {
            match system.state_slice() {
                StateSlice::Buildings(slice) => state.buildings = slice,
                StateSlice::Crops(slice) => state.crops = slice,
                StateSlice::Animals(slice) => state.animals = slice,
                StateSlice::Inventories(slice) => state.inventories = slice,
                StateSlice::Economy(slice) => state.economy = slice,
            }
        }
        state
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            session_id: self.config.session_id.clone(),
            version: self.version,
            tick: self.tick,
            queue_depth: self.queue.len(),
            dirty: self.dirty,
        }
    }
}
