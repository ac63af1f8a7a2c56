use super::*;

impl FarmSession {
    /// Ingress entry point: append and return immediately. Never blocks on
    /// processing and never touches world state.
    pub fn submit(&mut self, envelope: ActionEnvelope) {
        self.queue.push_back(envelope);
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }
}
