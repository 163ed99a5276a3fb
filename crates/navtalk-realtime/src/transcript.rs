use std::collections::HashMap;

/// Assembles streamed assistant transcript deltas into complete utterances,
/// keyed by the server-assigned response id.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    open: HashMap<String, String>,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `delta` to the response's text and returns the text so far.
    pub fn append(&mut self, response_id: &str, delta: &str) -> &str {
        let text = self.open.entry(response_id.to_string()).or_default();
        text.push_str(delta);
        text
    }

    /// Closes a response. A transcript carried by the `done` message takes
    /// precedence over the accumulated deltas.
    pub fn finish(&mut self, response_id: &str, transcript: Option<String>) -> String {
        let accumulated = self.open.remove(response_id);
        transcript.or(accumulated).unwrap_or_default()
    }

    pub fn get(&self, response_id: &str) -> Option<&str> {
        self.open.get(response_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    pub fn clear(&mut self) {
        self.open.clear();
    }
}
