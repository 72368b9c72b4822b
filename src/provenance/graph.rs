//! Linear provenance history with undo/redo and replay notifications
//!
//! The graph owns the ordered list of executed actions and a position
//! pointer. `push` executes an action and appends it; `undo`/`redo`/`jump_to`
//! replay stored inverses and forwards. Dependents subscribe to
//! [`GraphEvent`] to learn about foreign activity before it mutates the
//! tracked widget.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::provenance::action::{Action, CmdRegistry, CmdResult};
use crate::provenance::object_ref::RefError;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("nothing to redo")]
    NothingToRedo,
    #[error("invalid history position: {0}")]
    InvalidPosition(usize),
    #[error(transparent)]
    Ref(#[from] RefError),
    #[error("command execution failed: {0}")]
    Command(anyhow::Error),
}

/// Lifecycle notifications observed by adapters.
#[derive(Debug, Clone)]
pub enum GraphEvent {
    /// An action not originating from the tracked widget is about to run.
    Execute { cmd_id: String },
    /// A contiguous run of inverse/forward nodes is about to be replayed.
    RunChain,
}

type GraphListener = Arc<dyn Fn(&GraphEvent) + Send + Sync>;

struct ExecutedNode<T> {
    forward: Action<T>,
    inverse: Action<T>,
}

struct GraphState<T> {
    nodes: Vec<ExecutedNode<T>>,
    position: usize,
}

struct GraphInner<T> {
    registry: CmdRegistry<T>,
    state: Mutex<GraphState<T>>,
    /// Serializes execution so a push never observes a half-applied widget.
    exec_lock: tokio::sync::Mutex<()>,
    listeners: Mutex<Vec<GraphListener>>,
}

pub struct ProvenanceGraph<T> {
    inner: Arc<GraphInner<T>>,
}

impl<T> Clone for ProvenanceGraph<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for ProvenanceGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ProvenanceGraph<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GraphInner {
                registry: CmdRegistry::default(),
                state: Mutex::new(GraphState {
                    nodes: Vec::new(),
                    position: 0,
                }),
                exec_lock: tokio::sync::Mutex::new(()),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn registry(&self) -> &CmdRegistry<T> {
        &self.inner.registry
    }

    /// Number of executed nodes currently in the history.
    pub fn len(&self) -> usize {
        self.inner.state.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current position: the number of nodes whose effect is applied.
    pub fn position(&self) -> usize {
        self.inner.state.lock().position
    }

    /// Snapshot of the forward actions, oldest first.
    pub fn actions(&self) -> Vec<Action<T>> {
        self.inner
            .state
            .lock()
            .nodes
            .iter()
            .map(|n| n.forward.clone())
            .collect()
    }

    /// Subscribe to graph lifecycle events.
    pub fn on_event(&self, listener: GraphListener) {
        self.inner.listeners.lock().push(listener);
    }

    fn emit(&self, event: &GraphEvent) {
        let listeners: Vec<GraphListener> = self.inner.listeners.lock().clone();
        for l in listeners {
            l(event);
        }
    }

    fn append(&self, forward: Action<T>, inverse: Action<T>) {
        let mut state = self.inner.state.lock();
        let pos = state.position;
        // pushing past an undone tail discards the tail (linear history)
        state.nodes.truncate(pos);
        state.nodes.push(ExecutedNode { forward, inverse });
        state.position += 1;
    }

    /// Execute `action` forward, append it and return its result.
    ///
    /// Execution is serialized: a second push does not start until the
    /// previous one, including its settle wait, has resolved.
    pub async fn push(&self, action: Action<T>) -> Result<CmdResult<T>, GraphError> {
        let _guard = self.inner.exec_lock.lock().await;
        self.emit(&GraphEvent::Execute {
            cmd_id: action.cmd_id.clone(),
        });
        let result = self.execute(&action).await?;
        debug!(cmd = %action.cmd_id, "pushed action");
        self.append(action, result.inverse.clone());
        Ok(result)
    }

    /// Append an action whose forward effect already happened as a side
    /// effect of the triggering call; only bookkeeping is needed.
    pub fn push_with_result(&self, action: Action<T>, result: CmdResult<T>) {
        debug!(cmd = %action.cmd_id, "recorded action");
        self.append(action, result.inverse);
    }

    /// Replay the inverse of the most recent applied node.
    pub async fn undo(&self) -> Result<(), GraphError> {
        let _guard = self.inner.exec_lock.lock().await;
        self.undo_locked().await
    }

    /// Re-apply the most recently undone node.
    pub async fn redo(&self) -> Result<(), GraphError> {
        let _guard = self.inner.exec_lock.lock().await;
        self.redo_locked().await
    }

    /// Replay inverse/forward nodes until `target` nodes are applied.
    pub async fn jump_to(&self, target: usize) -> Result<(), GraphError> {
        let _guard = self.inner.exec_lock.lock().await;
        if target > self.len() {
            return Err(GraphError::InvalidPosition(target));
        }
        self.emit(&GraphEvent::RunChain);
        while self.position() > target {
            self.undo_locked().await?;
        }
        while self.position() < target {
            self.redo_locked().await?;
        }
        Ok(())
    }

    async fn undo_locked(&self) -> Result<(), GraphError> {
        let inverse = {
            let state = self.inner.state.lock();
            if state.position == 0 {
                return Err(GraphError::NothingToUndo);
            }
            state.nodes[state.position - 1].inverse.clone()
        };
        self.emit(&GraphEvent::Execute {
            cmd_id: inverse.cmd_id.clone(),
        });
        let result = self.execute(&inverse).await?;
        let mut state = self.inner.state.lock();
        state.position -= 1;
        let pos = state.position;
        // the inverse of the undo is the fresh forward for redo
        state.nodes[pos].forward = result.inverse;
        Ok(())
    }

    async fn redo_locked(&self) -> Result<(), GraphError> {
        let forward = {
            let state = self.inner.state.lock();
            if state.position >= state.nodes.len() {
                return Err(GraphError::NothingToRedo);
            }
            state.nodes[state.position].forward.clone()
        };
        self.emit(&GraphEvent::Execute {
            cmd_id: forward.cmd_id.clone(),
        });
        let result = self.execute(&forward).await?;
        let mut state = self.inner.state.lock();
        let pos = state.position;
        state.nodes[pos].inverse = result.inverse;
        state.position += 1;
        Ok(())
    }

    async fn execute(&self, action: &Action<T>) -> Result<CmdResult<T>, GraphError> {
        let f = self
            .inner
            .registry
            .get(&action.cmd_id)
            .ok_or_else(|| GraphError::UnknownCommand(action.cmd_id.clone()))?;
        f(action.inputs.clone(), action.parameter.clone())
            .await
            .map_err(GraphError::Command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::action::{ActionCategory, ActionMeta, ActionOp};
    use crate::provenance::object_ref::ObjectRef;
    use parking_lot::Mutex as PMutex;
    use serde_json::json;

    fn meta() -> ActionMeta {
        ActionMeta::new("set", ActionCategory::Layout, ActionOp::Update)
    }

    /// Command that sets a shared cell to `parameter["value"]` and returns
    /// the inverse restoring the previous value.
    fn register_set(graph: &ProvenanceGraph<Arc<PMutex<i64>>>) {
        graph.registry().register(
            "set",
            Arc::new(move |inputs, parameter| {
                Box::pin(async move {
                    let cell = inputs[0].resolve().await?;
                    let value = parameter["value"].as_i64().unwrap_or_default();
                    let old = {
                        let mut c = cell.lock();
                        let old = *c;
                        *c = value;
                        old
                    };
                    Ok(CmdResult {
                        inverse: Action::new(meta(), "set", inputs, json!({ "value": old })),
                    })
                })
            }),
        );
    }

    fn set_action(r: &ObjectRef<Arc<PMutex<i64>>>, value: i64) -> Action<Arc<PMutex<i64>>> {
        Action::new(meta(), "set", vec![r.clone()], json!({ "value": value }))
    }

    #[tokio::test]
    async fn test_push_executes_and_appends() {
        let cell = Arc::new(PMutex::new(0));
        let r = ObjectRef::resolved("cell", cell.clone());
        let graph = ProvenanceGraph::new();
        register_set(&graph);

        graph.push(set_action(&r, 5)).await.unwrap();
        assert_eq!(*cell.lock(), 5);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.position(), 1);
    }

    #[tokio::test]
    async fn test_undo_redo_round_trip() {
        let cell = Arc::new(PMutex::new(0));
        let r = ObjectRef::resolved("cell", cell.clone());
        let graph = ProvenanceGraph::new();
        register_set(&graph);

        graph.push(set_action(&r, 5)).await.unwrap();
        graph.push(set_action(&r, 9)).await.unwrap();

        graph.undo().await.unwrap();
        assert_eq!(*cell.lock(), 5);
        graph.undo().await.unwrap();
        assert_eq!(*cell.lock(), 0);
        assert_eq!(graph.position(), 0);
        assert_eq!(graph.len(), 2);

        graph.redo().await.unwrap();
        graph.redo().await.unwrap();
        assert_eq!(*cell.lock(), 9);
        assert_eq!(graph.position(), 2);
    }

    #[tokio::test]
    async fn test_jump_to_replays_chain_and_notifies() {
        let cell = Arc::new(PMutex::new(0));
        let r = ObjectRef::resolved("cell", cell.clone());
        let graph = ProvenanceGraph::new();
        register_set(&graph);

        let chains = Arc::new(PMutex::new(0usize));
        let chains2 = chains.clone();
        graph.on_event(Arc::new(move |ev| {
            if matches!(ev, GraphEvent::RunChain) {
                *chains2.lock() += 1;
            }
        }));

        graph.push(set_action(&r, 1)).await.unwrap();
        graph.push(set_action(&r, 2)).await.unwrap();
        graph.push(set_action(&r, 3)).await.unwrap();

        graph.jump_to(1).await.unwrap();
        assert_eq!(*cell.lock(), 1);
        graph.jump_to(3).await.unwrap();
        assert_eq!(*cell.lock(), 3);
        assert_eq!(*chains.lock(), 2);
    }

    #[tokio::test]
    async fn test_push_truncates_undone_tail() {
        let cell = Arc::new(PMutex::new(0));
        let r = ObjectRef::resolved("cell", cell.clone());
        let graph = ProvenanceGraph::new();
        register_set(&graph);

        graph.push(set_action(&r, 1)).await.unwrap();
        graph.push(set_action(&r, 2)).await.unwrap();
        graph.undo().await.unwrap();
        graph.push(set_action(&r, 7)).await.unwrap();

        assert_eq!(graph.len(), 2);
        assert_eq!(*cell.lock(), 7);
        assert!(matches!(graph.redo().await, Err(GraphError::NothingToRedo)));
    }

    #[tokio::test]
    async fn test_unknown_command_is_rejected() {
        let graph: ProvenanceGraph<Arc<PMutex<i64>>> = ProvenanceGraph::new();
        let r = ObjectRef::resolved("cell", Arc::new(PMutex::new(0)));
        let err = graph.push(set_action(&r, 1)).await.unwrap_err();
        assert!(matches!(err, GraphError::UnknownCommand(id) if id == "set"));
    }
}
