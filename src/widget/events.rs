//! Named, namespaced change events fired by widget elements
//!
//! Every handler is registered under `(event, namespace)`; registering a
//! second handler for the same pair replaces the first. This lets a consumer
//! own its subscriptions (e.g. the tracking layer uses one namespace for
//! capture and another for one-shot settle waiters) and tear them down
//! without touching anyone else's.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::widget::column::Column;
use crate::widget::filter::ColumnFilter;
use crate::widget::ranking::Ranking;

// collection level
pub const EVENT_ADD_RANKING: &str = "addRanking";
pub const EVENT_REMOVE_RANKING: &str = "removeRanking";
pub const EVENT_DIALOG_OPENED: &str = "dialogOpened";
pub const EVENT_DIALOG_CLOSED: &str = "dialogClosed";

// ranking / composite level
pub const EVENT_ADD_COLUMN: &str = "addColumn";
pub const EVENT_REMOVE_COLUMN: &str = "removeColumn";
pub const EVENT_MOVE_COLUMN: &str = "moveColumn";
pub const EVENT_SORT_CRITERIA_CHANGED: &str = "sortCriteriaChanged";
pub const EVENT_GROUP_SORT_CRITERIA_CHANGED: &str = "groupSortCriteriaChanged";
pub const EVENT_GROUP_CRITERIA_CHANGED: &str = "groupCriteriaChanged";

// order recomputation signal pair
pub const EVENT_DIRTY_ORDER: &str = "dirtyOrder";
pub const EVENT_ORDER_CHANGED: &str = "orderChanged";

/// Event name for a generic property change, e.g. `widthChanged`.
pub fn property_changed_event(prop: &str) -> String {
    format!("{prop}Changed")
}

/// Payload handed to event handlers.
#[derive(Debug, Clone)]
pub enum EventArgs {
    None,
    /// Old and new value of a property, already JSON-serializable.
    Value { old: Value, new: Value },
    /// Filters carry their live values; pattern filters are not JSON-safe
    /// and are serialized by whoever records them.
    Filter {
        old: Option<ColumnFilter>,
        new: Option<ColumnFilter>,
    },
    Column {
        column: Column,
        index: usize,
    },
    ColumnMoved {
        column: Column,
        index: usize,
        old_index: usize,
    },
    Ranking {
        ranking: Ranking,
        index: usize,
    },
    Dialog {
        confirmed: bool,
    },
}

pub type EventHandler = Arc<dyn Fn(&EventArgs) + Send + Sync>;

#[derive(Default)]
pub struct EventEmitter {
    handlers: Mutex<HashMap<String, Vec<(String, EventHandler)>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event` under `ns`, replacing any previous
    /// handler registered under the same pair.
    pub fn on(&self, event: &str, ns: &str, handler: EventHandler) {
        let mut handlers = self.handlers.lock();
        let entry = handlers.entry(event.to_string()).or_default();
        if let Some(slot) = entry.iter_mut().find(|(n, _)| n == ns) {
            slot.1 = handler;
        } else {
            entry.push((ns.to_string(), handler));
        }
    }

    pub fn off(&self, event: &str, ns: &str) {
        let mut handlers = self.handlers.lock();
        if let Some(entry) = handlers.get_mut(event) {
            entry.retain(|(n, _)| n != ns);
        }
    }

    pub fn off_all(&self, events: &[&str], ns: &str) {
        for event in events {
            self.off(event, ns);
        }
    }

    /// Fire `event`; handlers run synchronously on the caller's stack.
    ///
    /// The handler list is snapshotted first so handlers may subscribe or
    /// unsubscribe (including themselves) while the event dispatches.
    pub fn fire(&self, event: &str, args: &EventArgs) {
        let snapshot: Vec<EventHandler> = {
            let handlers = self.handlers.lock();
            match handlers.get(event) {
                Some(entry) => entry.iter().map(|(_, h)| h.clone()).collect(),
                None => return,
            }
        };
        for handler in snapshot {
            handler(args);
        }
    }
}
