use super::*;

impl FarmSession {
    /// One gameplay tick: periodic progression across systems, decoupled
    /// from the queue drain cadence. Tick events broadcast without a version
    /// bump; only applied actions move the version.
    pub fn run_tick(&mut self, delta_ms: u64, now_ms: u64) {
        self.tick += 1;
        let mut events = Vec::new();
        for system in self.systems.values_mut() {
            system.on_tick(delta_ms, now_ms, &mut events);
        }
        if !events.is_empty() {
            self.dirty = true;
            self.push_tick_report(events);
        }
    }
}
