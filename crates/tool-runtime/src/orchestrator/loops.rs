use std::collections::HashSet;

/// Remembers which `(tool_id, canonical arguments)` pairs ran this turn.
#[derive(Debug, Default)]
pub struct LoopDetector {
    seen: HashSet<(String, String)>,
}

impl LoopDetector {
    pub fn seen(&self, tool_id: &str, args_hash: &str) -> bool {
        self.seen
            .contains(&(tool_id.to_string(), args_hash.to_string()))
    }

    pub fn record(&mut self, tool_id: &str, args_hash: &str) {
        self.seen.insert((tool_id.to_string(), args_hash.to_string()));
    }

    pub fn reset(&mut self) {
        self.seen.clear();
    }
}
