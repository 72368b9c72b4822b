//! Rankings: ordered column trees plus sort/group criteria
//!
//! A ranking owns its columns and the order-recomputation signal pair: any
//! mutation that can change the displayed order fires `dirtyOrder`
//! immediately and `orderChanged` once the recomputation settles. With
//! auto-settle (the default) settling happens on a spawned task right after
//! the mutating call returns; tests drive [`Ranking::settle`] manually to
//! control the timing.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::widget::column::{Column, ColumnDump, ColumnError};
use crate::widget::events::{
    EventArgs, EventEmitter, EVENT_ADD_COLUMN, EVENT_DIRTY_ORDER, EVENT_GROUP_CRITERIA_CHANGED,
    EVENT_GROUP_SORT_CRITERIA_CHANGED, EVENT_MOVE_COLUMN, EVENT_ORDER_CHANGED,
    EVENT_REMOVE_COLUMN, EVENT_SORT_CRITERIA_CHANGED,
};

/// Namespace for the ranking's own dirty-marking subscriptions on columns.
const NS_ORDER: &str = "order";

/// Column property events that can change the computed order.
const ORDER_EVENTS: &[&str] = &[
    "filterChanged",
    "mappingChanged",
    "groupingChanged",
    "scriptChanged",
    "sortMethodChanged",
    "weightsChanged",
];

/// Live sort criterion: a column and a direction.
#[derive(Debug, Clone, PartialEq)]
pub struct SortCriterion {
    pub column: Column,
    pub asc: bool,
}

/// Serialized sort criterion: the column's path within its ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortDesc {
    pub col: Option<String>,
    pub asc: bool,
}

#[derive(Default)]
struct RankingState {
    columns: Vec<Column>,
    sort_criteria: Vec<SortCriterion>,
    group_sort_criteria: Vec<SortCriterion>,
    group_criteria: Vec<Column>,
    aggregation: Value,
    dirty: bool,
}

struct RankingInner {
    id: String,
    events: EventEmitter,
    state: Mutex<RankingState>,
    auto_settle: AtomicBool,
}

#[derive(Clone)]
pub struct Ranking {
    inner: Arc<RankingInner>,
}

impl PartialEq for Ranking {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Ranking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ranking")
            .field("id", &self.inner.id)
            .field("columns", &self.inner.state.lock().columns.len())
            .finish()
    }
}

/// Serializable snapshot of a ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingDump {
    pub id: String,
    pub columns: Vec<ColumnDump>,
    pub sort_criteria: Vec<SortDesc>,
    pub group_sort_criteria: Vec<SortDesc>,
    pub group_criteria: Vec<String>,
    pub aggregation: Value,
}

impl Default for Ranking {
    fn default() -> Self {
        Self::new()
    }
}

impl Ranking {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().simple().to_string())
    }

    fn with_id(id: String) -> Self {
        Self {
            inner: Arc::new(RankingInner {
                id,
                events: EventEmitter::new(),
                state: Mutex::new(RankingState {
                    aggregation: Value::Null,
                    ..RankingState::default()
                }),
                auto_settle: AtomicBool::new(true),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn events(&self) -> &EventEmitter {
        &self.inner.events
    }

    /// Whether `orderChanged` fires automatically after `dirtyOrder`.
    pub fn set_auto_settle(&self, auto: bool) {
        self.inner.auto_settle.store(auto, Ordering::SeqCst);
    }

    // -- columns -----------------------------------------------------------

    pub fn columns(&self) -> Vec<Column> {
        self.inner.state.lock().columns.clone()
    }

    pub fn at(&self, index: usize) -> Option<Column> {
        self.inner.state.lock().columns.get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&self, column: Column, index: usize) {
        let index = {
            let mut state = self.inner.state.lock();
            let index = index.min(state.columns.len());
            state.columns.insert(index, column.clone());
            index
        };
        self.attach_order_listeners(&column);
        self.inner.events.fire(
            EVENT_ADD_COLUMN,
            &EventArgs::Column {
                column,
                index,
            },
        );
        self.mark_dirty_order();
    }

    pub fn push(&self, column: Column) {
        let index = self.len();
        self.insert(column, index);
    }

    pub fn remove(&self, column: &Column) -> Option<usize> {
        if !self.inner.state.lock().columns.iter().any(|c| c == column) {
            return None;
        }
        // a removed column cannot remain a criterion; going through the
        // setters fires the criteria events while the column still has a
        // path, so observers see an invertible change of its own
        self.set_sort_criteria(
            self.sort_criteria()
                .into_iter()
                .filter(|c| &c.column != column)
                .collect(),
        );
        self.set_group_sort_criteria(
            self.group_sort_criteria()
                .into_iter()
                .filter(|c| &c.column != column)
                .collect(),
        );
        self.set_group_criteria(
            self.group_criteria()
                .into_iter()
                .filter(|c| c != column)
                .collect(),
        );
        let index = {
            let mut state = self.inner.state.lock();
            let index = state.columns.iter().position(|c| c == column)?;
            state.columns.remove(index);
            index
        };
        self.detach_order_listeners(column);
        self.inner.events.fire(
            EVENT_REMOVE_COLUMN,
            &EventArgs::Column {
                column: column.clone(),
                index,
            },
        );
        self.mark_dirty_order();
        Some(index)
    }

    /// Move a top-level column to `index`, interpreted before removal.
    pub fn move_column(&self, column: &Column, index: usize) -> Option<usize> {
        let old_index = {
            let mut state = self.inner.state.lock();
            let old_index = state.columns.iter().position(|c| c == column)?;
            state.columns.remove(old_index);
            let target = if index > old_index { index - 1 } else { index };
            let target = target.min(state.columns.len());
            state.columns.insert(target, column.clone());
            old_index
        };
        self.inner.events.fire(
            EVENT_MOVE_COLUMN,
            &EventArgs::ColumnMoved {
                column: column.clone(),
                index,
                old_index,
            },
        );
        self.mark_dirty_order();
        Some(old_index)
    }

    /// Resolve a dot-separated id path to a column anywhere in the tree.
    pub fn find_by_path(&self, path: &str) -> Option<Column> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let top = self
            .inner
            .state
            .lock()
            .columns
            .iter()
            .find(|c| c.id() == head)
            .cloned()?;
        match rest {
            Some(rest) => top.find_descendant(rest),
            None => Some(top),
        }
    }

    /// Fully qualified id path of a column within this ranking.
    pub fn fqpath(&self, column: &Column) -> Option<String> {
        fn walk(current: &Column, target: &Column, path: &mut Vec<String>) -> bool {
            path.push(current.id().to_string());
            if current == target {
                return true;
            }
            for child in current.children() {
                if walk(&child, target, path) {
                    return true;
                }
            }
            path.pop();
            false
        }
        let mut path = Vec::new();
        for top in self.columns() {
            if walk(&top, column, &mut path) {
                return Some(path.join("."));
            }
        }
        None
    }

    // -- criteria ----------------------------------------------------------

    pub fn sort_criteria(&self) -> Vec<SortCriterion> {
        self.inner.state.lock().sort_criteria.clone()
    }

    pub fn group_sort_criteria(&self) -> Vec<SortCriterion> {
        self.inner.state.lock().group_sort_criteria.clone()
    }

    pub fn group_criteria(&self) -> Vec<Column> {
        self.inner.state.lock().group_criteria.clone()
    }

    /// Serialized form of criteria, with column paths instead of handles.
    pub fn to_sort_descs(&self, criteria: &[SortCriterion]) -> Vec<SortDesc> {
        criteria
            .iter()
            .map(|c| SortDesc {
                col: self.fqpath(&c.column),
                asc: c.asc,
            })
            .collect()
    }

    /// Replace the sort criteria with a single criterion (or none).
    pub fn sort_by(&self, column: Option<&Column>, asc: bool) {
        let criteria = column
            .map(|c| {
                vec![SortCriterion {
                    column: c.clone(),
                    asc,
                }]
            })
            .unwrap_or_default();
        self.set_sort_criteria(criteria);
    }

    pub fn set_sort_criteria(&self, criteria: Vec<SortCriterion>) {
        self.set_criteria_impl(criteria, false);
    }

    pub fn set_group_sort_criteria(&self, criteria: Vec<SortCriterion>) {
        self.set_criteria_impl(criteria, true);
    }

    fn set_criteria_impl(&self, criteria: Vec<SortCriterion>, group: bool) {
        let (old, new) = {
            let mut state = self.inner.state.lock();
            let slot = if group {
                &mut state.group_sort_criteria
            } else {
                &mut state.sort_criteria
            };
            if *slot == criteria {
                return;
            }
            let old = std::mem::replace(slot, criteria.clone());
            (old, criteria)
        };
        let event = if group {
            EVENT_GROUP_SORT_CRITERIA_CHANGED
        } else {
            EVENT_SORT_CRITERIA_CHANGED
        };
        self.inner.events.fire(
            event,
            &EventArgs::Value {
                old: json!(self.to_sort_descs(&old)),
                new: json!(self.to_sort_descs(&new)),
            },
        );
        self.mark_dirty_order();
    }

    pub fn set_group_criteria(&self, columns: Vec<Column>) {
        let (old, new) = {
            let mut state = self.inner.state.lock();
            if state.group_criteria == columns {
                return;
            }
            let old = std::mem::replace(&mut state.group_criteria, columns.clone());
            (old, columns)
        };
        let paths =
            |cols: &[Column]| -> Vec<String> { cols.iter().filter_map(|c| self.fqpath(c)).collect() };
        self.inner.events.fire(
            EVENT_GROUP_CRITERIA_CHANGED,
            &EventArgs::Value {
                old: json!(paths(&old)),
                new: json!(paths(&new)),
            },
        );
        self.mark_dirty_order();
    }

    // -- aggregation -------------------------------------------------------

    pub fn aggregation(&self) -> Value {
        self.inner.state.lock().aggregation.clone()
    }

    /// Group aggregation state, e.g. `{"topN": 10}`.
    pub fn set_aggregation(&self, value: Value) {
        let old = {
            let mut state = self.inner.state.lock();
            if state.aggregation == value {
                return;
            }
            std::mem::replace(&mut state.aggregation, value.clone())
        };
        self.inner.events.fire(
            "aggregationChanged",
            &EventArgs::Value { old, new: value },
        );
        self.mark_dirty_order();
    }

    // -- order signals -----------------------------------------------------

    /// Flag the computed order as stale and fire `dirtyOrder`.
    pub fn mark_dirty_order(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.dirty {
                return;
            }
            state.dirty = true;
        }
        self.inner.events.fire(EVENT_DIRTY_ORDER, &EventArgs::None);
        if self.inner.auto_settle.load(Ordering::SeqCst) {
            let ranking = self.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { ranking.settle() });
                }
                Err(_) => ranking.settle(),
            }
        }
    }

    /// Complete the pending recomputation and fire `orderChanged`.
    pub fn settle(&self) {
        {
            let mut state = self.inner.state.lock();
            if !state.dirty {
                return;
            }
            state.dirty = false;
        }
        self.inner.events.fire(EVENT_ORDER_CHANGED, &EventArgs::None);
    }

    // -- dirty propagation from columns ------------------------------------

    fn attach_order_listeners(&self, column: &Column) {
        let weak = Arc::downgrade(&self.inner);
        for event in ORDER_EVENTS {
            let weak = weak.clone();
            column.events().on(
                event,
                NS_ORDER,
                Arc::new(move |_| {
                    if let Some(ranking) = upgrade(&weak) {
                        ranking.mark_dirty_order();
                    }
                }),
            );
        }
        if column.is_composite() {
            let weak_add = weak.clone();
            column.events().on(
                EVENT_ADD_COLUMN,
                NS_ORDER,
                Arc::new(move |args| {
                    if let (Some(ranking), EventArgs::Column { column, .. }) =
                        (upgrade(&weak_add), args)
                    {
                        ranking.attach_order_listeners(column);
                        ranking.mark_dirty_order();
                    }
                }),
            );
            let weak_remove = weak.clone();
            column.events().on(
                EVENT_REMOVE_COLUMN,
                NS_ORDER,
                Arc::new(move |args| {
                    if let (Some(ranking), EventArgs::Column { column, .. }) =
                        (upgrade(&weak_remove), args)
                    {
                        ranking.detach_order_listeners(column);
                        ranking.mark_dirty_order();
                    }
                }),
            );
            let weak_move = weak;
            column.events().on(
                EVENT_MOVE_COLUMN,
                NS_ORDER,
                Arc::new(move |_| {
                    if let Some(ranking) = upgrade(&weak_move) {
                        ranking.mark_dirty_order();
                    }
                }),
            );
            for child in column.children() {
                self.attach_order_listeners(&child);
            }
        }
    }

    fn detach_order_listeners(&self, column: &Column) {
        column.events().off_all(ORDER_EVENTS, NS_ORDER);
        if column.is_composite() {
            column.events().off_all(
                &[EVENT_ADD_COLUMN, EVENT_REMOVE_COLUMN, EVENT_MOVE_COLUMN],
                NS_ORDER,
            );
            for child in column.children() {
                self.detach_order_listeners(&child);
            }
        }
    }

    // -- dump / restore ----------------------------------------------------

    pub fn dump(&self) -> RankingDump {
        // snapshot first: the path lookups below take the state lock again
        let (columns, sort, group_sort, group, aggregation) = {
            let state = self.inner.state.lock();
            (
                state.columns.clone(),
                state.sort_criteria.clone(),
                state.group_sort_criteria.clone(),
                state.group_criteria.clone(),
                state.aggregation.clone(),
            )
        };
        RankingDump {
            id: self.inner.id.clone(),
            columns: columns.iter().map(|c| c.dump()).collect(),
            sort_criteria: self.to_sort_descs(&sort),
            group_sort_criteria: self.to_sort_descs(&group_sort),
            group_criteria: group.iter().filter_map(|c| self.fqpath(c)).collect(),
            aggregation,
        }
    }

    pub fn restore(dump: RankingDump) -> Result<Self, ColumnError> {
        let ranking = Self::with_id(dump.id);
        for column in dump.columns {
            let column = Column::restore(column)?;
            {
                let mut state = ranking.inner.state.lock();
                state.columns.push(column.clone());
            }
            ranking.attach_order_listeners(&column);
        }
        let resolve = |descs: &[SortDesc]| -> Vec<SortCriterion> {
            descs
                .iter()
                .filter_map(|d| {
                    let column = ranking.find_by_path(d.col.as_deref()?)?;
                    Some(SortCriterion {
                        column,
                        asc: d.asc,
                    })
                })
                .collect()
        };
        let sort = resolve(&dump.sort_criteria);
        let group_sort = resolve(&dump.group_sort_criteria);
        let group: Vec<Column> = dump
            .group_criteria
            .iter()
            .filter_map(|p| ranking.find_by_path(p))
            .collect();
        {
            let mut state = ranking.inner.state.lock();
            state.sort_criteria = sort;
            state.group_sort_criteria = group_sort;
            state.group_criteria = group;
            state.aggregation = dump.aggregation;
        }
        Ok(ranking)
    }
}

fn upgrade(weak: &Weak<RankingInner>) -> Option<Ranking> {
    weak.upgrade().map(|inner| Ranking { inner })
}
