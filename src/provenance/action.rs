//! Invertible action records and the command registry that executes them

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provenance::object_ref::ObjectRef;

/// Broad grouping of an action, used for display and filtering of histories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionCategory {
    Data,
    Layout,
    Selection,
    Visual,
}

/// What kind of effect the action has on the tracked structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionOp {
    Create,
    Update,
    Remove,
}

/// Human-facing metadata attached to every action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionMeta {
    pub label: String,
    pub category: ActionCategory,
    pub operation: ActionOp,
}

impl ActionMeta {
    pub fn new(label: impl Into<String>, category: ActionCategory, operation: ActionOp) -> Self {
        Self {
            label: label.into(),
            category,
            operation,
        }
    }
}

/// An immutable, invertible record of one structural mutation.
///
/// The forward behavior lives in the [`CmdRegistry`] under `cmd_id`; the
/// action itself carries only references and a JSON-serializable parameter
/// payload so it can be persisted and replayed.
pub struct Action<T> {
    pub meta: ActionMeta,
    pub cmd_id: String,
    pub inputs: Vec<ObjectRef<T>>,
    pub parameter: Value,
}

impl<T> Action<T> {
    pub fn new(
        meta: ActionMeta,
        cmd_id: impl Into<String>,
        inputs: Vec<ObjectRef<T>>,
        parameter: Value,
    ) -> Self {
        Self {
            meta,
            cmd_id: cmd_id.into(),
            inputs,
            parameter,
        }
    }
}

impl<T> Clone for Action<T> {
    fn clone(&self) -> Self {
        Self {
            meta: self.meta.clone(),
            cmd_id: self.cmd_id.clone(),
            inputs: self.inputs.clone(),
            parameter: self.parameter.clone(),
        }
    }
}

impl<T> fmt::Debug for Action<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("cmd_id", &self.cmd_id)
            .field("label", &self.meta.label)
            .field("parameter", &self.parameter)
            .finish()
    }
}

/// Result of executing an action: the inverse that undoes it.
pub struct CmdResult<T> {
    pub inverse: Action<T>,
}

impl<T> fmt::Debug for CmdResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CmdResult")
            .field("inverse", &self.inverse.cmd_id)
            .finish()
    }
}

/// Async command implementation: `(inputs, parameter) -> result + inverse`.
pub type CmdFn<T> =
    Arc<dyn Fn(Vec<ObjectRef<T>>, Value) -> BoxFuture<'static, anyhow::Result<CmdResult<T>>> + Send + Sync>;

/// Maps command identifiers to their implementations.
///
/// Adapters register their commands once at construction; replay looks the
/// implementation up by the id stored in the action.
pub struct CmdRegistry<T> {
    fns: RwLock<HashMap<String, CmdFn<T>>>,
}

impl<T> Default for CmdRegistry<T> {
    fn default() -> Self {
        Self {
            fns: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> CmdRegistry<T> {
    pub fn register(&self, cmd_id: impl Into<String>, f: CmdFn<T>) {
        self.fns.write().insert(cmd_id.into(), f);
    }

    pub fn get(&self, cmd_id: &str) -> Option<CmdFn<T>> {
        self.fns.read().get(cmd_id).cloned()
    }
}
