pub mod action;
pub mod graph;
pub mod object_ref;

pub use action::{Action, ActionCategory, ActionMeta, ActionOp, CmdFn, CmdRegistry, CmdResult};
pub use graph::{GraphError, GraphEvent, ProvenanceGraph};
pub use object_ref::{ObjectRef, RefError, RefResolver};
