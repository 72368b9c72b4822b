//! Column handles: typed properties, composite nesting, dump/restore

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::widget::events::{
    property_changed_event, EventArgs, EventEmitter, EVENT_ADD_COLUMN, EVENT_MOVE_COLUMN,
    EVENT_REMOVE_COLUMN,
};
use crate::widget::filter::{restore_filter, serialize_filter, ColumnFilter, FilterError};

pub use crate::widget::filter::FilterValue;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ColumnError {
    #[error("column '{0}' is not a composite column")]
    NotComposite(String),
    #[error("column '{child}' is not a child of '{parent}'")]
    ChildNotFound { parent: String, child: String },
    #[error("column '{column}' does not support property '{prop}'")]
    UnsupportedProperty { column: String, prop: String },
    #[error(transparent)]
    Filter(#[from] FilterError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Text,
    Number,
    Categorical,
    Ordinal,
    Script,
    Composite,
}

impl ColumnKind {
    pub fn supports_mapping(&self) -> bool {
        matches!(self, ColumnKind::Number | ColumnKind::Ordinal)
    }

    pub fn supports_grouping(&self) -> bool {
        matches!(self, ColumnKind::Number | ColumnKind::Categorical)
    }
}

#[derive(Debug, Default)]
struct ColumnState {
    label: String,
    meta_data: Value,
    width: f64,
    renderer: String,
    group_renderer: String,
    summary_renderer: String,
    sort_method: String,
    filter: Option<ColumnFilter>,
    mapping: Option<Value>,
    grouping: Option<Value>,
    script: Option<String>,
    weights: Vec<f64>,
    children: Vec<Column>,
}

struct ColumnInner {
    id: String,
    kind: ColumnKind,
    state: Mutex<ColumnState>,
    events: EventEmitter,
}

/// Handle to one column of a ranking; clones share state.
#[derive(Clone)]
pub struct Column {
    inner: Arc<ColumnInner>,
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("label", &self.inner.state.lock().label)
            .finish()
    }
}

/// Serializable snapshot of a column, including composite children.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDump {
    pub id: String,
    pub kind: ColumnKind,
    pub label: String,
    pub meta_data: Value,
    pub width: f64,
    pub renderer: String,
    pub group_renderer: String,
    pub summary_renderer: String,
    pub sort_method: String,
    /// Tagged serialized filter, `null` when unset.
    pub filter: Value,
    pub mapping: Option<Value>,
    pub grouping: Option<Value>,
    pub script: Option<String>,
    pub weights: Vec<f64>,
    pub children: Vec<ColumnDump>,
}

impl Column {
    pub fn new(kind: ColumnKind, label: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().simple().to_string(), kind, label.into())
    }

    fn with_id(id: String, kind: ColumnKind, label: String) -> Self {
        Self {
            inner: Arc::new(ColumnInner {
                id,
                kind,
                state: Mutex::new(ColumnState {
                    label,
                    width: 100.0,
                    renderer: "default".to_string(),
                    group_renderer: "default".to_string(),
                    summary_renderer: "default".to_string(),
                    sort_method: "default".to_string(),
                    ..ColumnState::default()
                }),
                events: EventEmitter::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> ColumnKind {
        self.inner.kind
    }

    pub fn label(&self) -> String {
        self.inner.state.lock().label.clone()
    }

    pub fn events(&self) -> &EventEmitter {
        &self.inner.events
    }

    fn fire_value_change(&self, prop: &str, old: Value, new: Value) {
        self.inner
            .events
            .fire(&property_changed_event(prop), &EventArgs::Value { old, new });
    }

    fn require(&self, supported: bool, prop: &str) -> Result<(), ColumnError> {
        if supported {
            Ok(())
        } else {
            Err(ColumnError::UnsupportedProperty {
                column: self.label(),
                prop: prop.to_string(),
            })
        }
    }

    // -- generic properties ------------------------------------------------

    pub fn meta_data(&self) -> Value {
        self.inner.state.lock().meta_data.clone()
    }

    pub fn set_meta_data(&self, value: Value) {
        let old = {
            let mut state = self.inner.state.lock();
            if state.meta_data == value {
                return;
            }
            std::mem::replace(&mut state.meta_data, value.clone())
        };
        self.fire_value_change("metaData", old, value);
    }

    pub fn width(&self) -> f64 {
        self.inner.state.lock().width
    }

    pub fn set_width(&self, width: f64) {
        let old = {
            let mut state = self.inner.state.lock();
            if state.width == width {
                return;
            }
            std::mem::replace(&mut state.width, width)
        };
        self.fire_value_change("width", json!(old), json!(width));
    }

    pub fn renderer(&self) -> String {
        self.inner.state.lock().renderer.clone()
    }

    /// The property is tracked as `rendererType` even though the accessor
    /// pair is named `renderer`/`set_renderer`; the event name follows the
    /// property.
    pub fn set_renderer(&self, renderer: impl Into<String>) {
        let renderer = renderer.into();
        let old = {
            let mut state = self.inner.state.lock();
            if state.renderer == renderer {
                return;
            }
            std::mem::replace(&mut state.renderer, renderer.clone())
        };
        self.fire_value_change("rendererType", json!(old), json!(renderer));
    }

    pub fn group_renderer(&self) -> String {
        self.inner.state.lock().group_renderer.clone()
    }

    pub fn set_group_renderer(&self, renderer: impl Into<String>) {
        let renderer = renderer.into();
        let old = {
            let mut state = self.inner.state.lock();
            if state.group_renderer == renderer {
                return;
            }
            std::mem::replace(&mut state.group_renderer, renderer.clone())
        };
        self.fire_value_change("groupRenderer", json!(old), json!(renderer));
    }

    pub fn summary_renderer(&self) -> String {
        self.inner.state.lock().summary_renderer.clone()
    }

    pub fn set_summary_renderer(&self, renderer: impl Into<String>) {
        let renderer = renderer.into();
        let old = {
            let mut state = self.inner.state.lock();
            if state.summary_renderer == renderer {
                return;
            }
            std::mem::replace(&mut state.summary_renderer, renderer.clone())
        };
        self.fire_value_change("summaryRenderer", json!(old), json!(renderer));
    }

    pub fn sort_method(&self) -> String {
        self.inner.state.lock().sort_method.clone()
    }

    pub fn set_sort_method(&self, method: impl Into<String>) {
        let method = method.into();
        let old = {
            let mut state = self.inner.state.lock();
            if state.sort_method == method {
                return;
            }
            std::mem::replace(&mut state.sort_method, method.clone())
        };
        self.fire_value_change("sortMethod", json!(old), json!(method));
    }

    // -- irregular properties ----------------------------------------------

    pub fn filter(&self) -> Option<ColumnFilter> {
        self.inner.state.lock().filter.clone()
    }

    pub fn set_filter(&self, filter: Option<ColumnFilter>) {
        let old = {
            let mut state = self.inner.state.lock();
            if state.filter == filter {
                return;
            }
            std::mem::replace(&mut state.filter, filter.clone())
        };
        self.inner.events.fire(
            &property_changed_event("filter"),
            &EventArgs::Filter { old, new: filter },
        );
    }

    pub fn mapping(&self) -> Option<Value> {
        self.inner.state.lock().mapping.clone()
    }

    pub fn set_mapping(&self, mapping: Option<Value>) -> Result<(), ColumnError> {
        self.require(self.inner.kind.supports_mapping(), "mapping")?;
        let old = {
            let mut state = self.inner.state.lock();
            if state.mapping == mapping {
                return Ok(());
            }
            std::mem::replace(&mut state.mapping, mapping.clone())
        };
        self.fire_value_change("mapping", json!(old), json!(mapping));
        Ok(())
    }

    pub fn grouping(&self) -> Option<Value> {
        self.inner.state.lock().grouping.clone()
    }

    pub fn set_grouping(&self, grouping: Option<Value>) -> Result<(), ColumnError> {
        self.require(self.inner.kind.supports_grouping(), "grouping")?;
        let old = {
            let mut state = self.inner.state.lock();
            if state.grouping == grouping {
                return Ok(());
            }
            std::mem::replace(&mut state.grouping, grouping.clone())
        };
        self.fire_value_change("grouping", json!(old), json!(grouping));
        Ok(())
    }

    pub fn script(&self) -> Option<String> {
        self.inner.state.lock().script.clone()
    }

    pub fn set_script(&self, script: Option<String>) -> Result<(), ColumnError> {
        self.require(self.inner.kind == ColumnKind::Script, "script")?;
        let old = {
            let mut state = self.inner.state.lock();
            if state.script == script {
                return Ok(());
            }
            std::mem::replace(&mut state.script, script.clone())
        };
        self.fire_value_change("script", json!(old), json!(script));
        Ok(())
    }

    pub fn weights(&self) -> Vec<f64> {
        self.inner.state.lock().weights.clone()
    }

    pub fn set_weights(&self, weights: Vec<f64>) -> Result<(), ColumnError> {
        self.require(self.inner.kind == ColumnKind::Composite, "weights")?;
        let old = {
            let mut state = self.inner.state.lock();
            if state.weights == weights {
                return Ok(());
            }
            std::mem::replace(&mut state.weights, weights.clone())
        };
        self.fire_value_change("weights", json!(old), json!(weights));
        Ok(())
    }

    // -- composite children ------------------------------------------------

    pub fn is_composite(&self) -> bool {
        self.inner.kind == ColumnKind::Composite
    }

    pub fn children(&self) -> Vec<Column> {
        self.inner.state.lock().children.clone()
    }

    pub fn child_at(&self, index: usize) -> Option<Column> {
        self.inner.state.lock().children.get(index).cloned()
    }

    pub fn insert_child(&self, column: Column, index: usize) -> Result<(), ColumnError> {
        if !self.is_composite() {
            return Err(ColumnError::NotComposite(self.label()));
        }
        let index = {
            let mut state = self.inner.state.lock();
            let index = index.min(state.children.len());
            state.children.insert(index, column.clone());
            index
        };
        self.inner
            .events
            .fire(EVENT_ADD_COLUMN, &EventArgs::Column { column, index });
        Ok(())
    }

    pub fn remove_child(&self, column: &Column) -> Result<usize, ColumnError> {
        if !self.is_composite() {
            return Err(ColumnError::NotComposite(self.label()));
        }
        let index = {
            let mut state = self.inner.state.lock();
            let index = state
                .children
                .iter()
                .position(|c| c == column)
                .ok_or_else(|| ColumnError::ChildNotFound {
                    parent: self.label(),
                    child: column.label(),
                })?;
            state.children.remove(index);
            index
        };
        self.inner.events.fire(
            EVENT_REMOVE_COLUMN,
            &EventArgs::Column {
                column: column.clone(),
                index,
            },
        );
        Ok(index)
    }

    /// Move a child to `index`, interpreted against the list before removal.
    pub fn move_child(&self, column: &Column, index: usize) -> Result<usize, ColumnError> {
        if !self.is_composite() {
            return Err(ColumnError::NotComposite(self.label()));
        }
        let old_index = {
            let mut state = self.inner.state.lock();
            let old_index = state
                .children
                .iter()
                .position(|c| c == column)
                .ok_or_else(|| ColumnError::ChildNotFound {
                    parent: self.label(),
                    child: column.label(),
                })?;
            state.children.remove(old_index);
            let target = if index > old_index { index - 1 } else { index };
            let target = target.min(state.children.len());
            state.children.insert(target, column.clone());
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
        Ok(old_index)
    }

    /// Find a descendant by its dot-separated id path.
    pub fn find_descendant(&self, path: &str) -> Option<Column> {
        let mut current = self.clone();
        for segment in path.split('.') {
            let next = current
                .children()
                .into_iter()
                .find(|c| c.id() == segment)?;
            current = next;
        }
        Some(current)
    }

    // -- dump / restore ----------------------------------------------------

    pub fn dump(&self) -> ColumnDump {
        let state = self.inner.state.lock();
        ColumnDump {
            id: self.inner.id.clone(),
            kind: self.inner.kind,
            label: state.label.clone(),
            meta_data: state.meta_data.clone(),
            width: state.width,
            renderer: state.renderer.clone(),
            group_renderer: state.group_renderer.clone(),
            summary_renderer: state.summary_renderer.clone(),
            sort_method: state.sort_method.clone(),
            filter: serialize_filter(state.filter.as_ref()),
            mapping: state.mapping.clone(),
            grouping: state.grouping.clone(),
            script: state.script.clone(),
            weights: state.weights.clone(),
            children: state.children.iter().map(|c| c.dump()).collect(),
        }
    }

    /// Rebuild a column (and its children) from a dump, keeping its id so
    /// recorded paths stay valid.
    pub fn restore(dump: ColumnDump) -> Result<Self, ColumnError> {
        let column = Self::with_id(dump.id, dump.kind, dump.label);
        {
            let mut state = column.inner.state.lock();
            state.meta_data = dump.meta_data;
            state.width = dump.width;
            state.renderer = dump.renderer;
            state.group_renderer = dump.group_renderer;
            state.summary_renderer = dump.summary_renderer;
            state.sort_method = dump.sort_method;
            state.filter = restore_filter(&dump.filter)?;
            state.mapping = dump.mapping;
            state.grouping = dump.grouping;
            state.script = dump.script;
            state.weights = dump.weights;
            let mut children = Vec::with_capacity(dump.children.len());
            for child in dump.children {
                children.push(Column::restore(child)?);
            }
            state.children = children;
        }
        Ok(column)
    }
}
