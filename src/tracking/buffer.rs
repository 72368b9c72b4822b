//! Buffering of change events while a live-preview dialog is open
//!
//! Dialogs re-apply a property on every slider tick, so recording each event
//! would flood the history with intermediate states. While a dialog is open
//! the buffer holds one pending action per property key: the first-seen
//! initial value and the latest commit closure. Confirming the dialog
//! commits each key's net change as a single action; cancelling drops
//! everything unrecorded.

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

/// Commit closure for a buffered change; receives the first-seen initial
/// value so the recorded action inverts back to the pre-dialog state.
pub type BufferedCommit = Box<dyn FnOnce(Value) + Send>;

struct BufferedAction {
    initial: Value,
    commit: BufferedCommit,
}

#[derive(Default)]
struct BufferState {
    open: bool,
    // insertion-ordered so confirmed actions land in the history in the
    // order they were first touched
    actions: Vec<(String, BufferedAction)>,
}

#[derive(Default)]
pub struct DialogBuffer {
    state: Mutex<BufferState>,
}

impl DialogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    pub fn open(&self) {
        let mut state = self.state.lock();
        state.open = true;
        state.actions.clear();
    }

    /// Buffer a change under `key`. When no dialog is open the commit
    /// closure is handed back so the caller records the change directly.
    pub fn record(
        &self,
        key: &str,
        initial: Value,
        commit: BufferedCommit,
    ) -> Result<(), BufferedCommit> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(commit);
        }
        if let Some((_, action)) = state.actions.iter_mut().find(|(k, _)| k == key) {
            // keep the first-seen initial value; only the commit advances
            action.commit = commit;
        } else {
            state.actions.push((
                key.to_string(),
                BufferedAction { initial, commit },
            ));
        }
        Ok(())
    }

    /// Commit all buffered changes, one action per key.
    pub fn confirm(&self) {
        let actions = {
            let mut state = self.state.lock();
            state.open = false;
            std::mem::take(&mut state.actions)
        };
        if !actions.is_empty() {
            debug!(count = actions.len(), "committing buffered dialog changes");
        }
        // run outside the lock; commits re-enter the tracking layer
        for (_, action) in actions {
            (action.commit)(action.initial);
        }
    }

    /// Drop all buffered changes without recording them.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        let dropped = state.actions.len();
        state.open = false;
        state.actions.clear();
        if dropped > 0 {
            debug!(count = dropped, "discarding buffered dialog changes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_record_without_open_dialog_declines() {
        let buffer = DialogBuffer::new();
        let declined = buffer.record("width@c1", json!(100.0), Box::new(|_| {}));
        assert!(declined.is_err());
    }

    #[test]
    fn test_confirm_commits_net_change_per_key() {
        let buffer = DialogBuffer::new();
        buffer.open();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for step in [json!(110.0), json!(120.0), json!(130.0)] {
            let seen = seen.clone();
            let committed = buffer.record(
                "width@c1",
                json!(100.0),
                Box::new(move |initial| seen.lock().push((initial, step))),
            );
            assert!(committed.is_ok());
        }
        buffer.confirm();
        // one commit, carrying the pre-dialog value and the last step
        assert_eq!(*seen.lock(), vec![(json!(100.0), json!(130.0))]);
    }

    #[test]
    fn test_cancel_discards_everything() {
        let buffer = DialogBuffer::new();
        buffer.open();
        let ran = Arc::new(Mutex::new(false));
        let r2 = ran.clone();
        let buffered = buffer.record("filter@c1", json!(null), Box::new(move |_| *r2.lock() = true));
        assert!(buffered.is_ok());
        buffer.cancel();
        assert!(!*ran.lock());
        assert!(!buffer.is_open());
    }

    #[test]
    fn test_keys_commit_in_first_touch_order() {
        let buffer = DialogBuffer::new();
        buffer.open();
        let order = Arc::new(Mutex::new(Vec::new()));
        for key in ["a", "b", "a"] {
            let order = order.clone();
            let buffered = buffer.record(key, json!(0), Box::new(move |_| order.lock().push(key)));
            assert!(buffered.is_ok());
        }
        buffer.confirm();
        assert_eq!(*order.lock(), vec!["a", "b"]);
    }
}
