#![forbid(unsafe_code)]
//! Lifecycle hooks: notify-event-with-context, best effort. Hooks see
//! what happened; they cannot veto or reorder anything.

use serde_json::Value;

pub mod events {
    pub const TRANSITION_PROPOSED: &str = "transition.proposed";
    pub const TRANSITION_ACCEPTED: &str = "transition.accepted";
    pub const TRANSITION_REJECTED: &str = "transition.rejected";
    pub const LANE_PROMOTED: &str = "lane.promoted";
}

pub trait Hook {
    fn notify(&self, event: &str, context: &Value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl Hook for Recorder {
        fn notify(&self, event: &str, _context: &Value) {
            self.0.lock().unwrap().push(event.to_string());
        }
    }

    #[test]
    fn hooks_observe_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hook: Box<dyn Hook> = Box::new(Recorder(seen.clone()));
        hook.notify(events::TRANSITION_PROPOSED, &serde_json::json!({}));
        assert_eq!(*seen.lock().unwrap(), vec![events::TRANSITION_PROPOSED]);
    }
}
