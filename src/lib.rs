pub mod provenance;
pub mod scores;
pub mod tracking;
pub mod widget;

pub use provenance::{
    Action, ActionCategory, ActionMeta, ActionOp, CmdRegistry, CmdResult, GraphError, GraphEvent,
    ObjectRef, ProvenanceGraph, RefError, RefResolver,
};
pub use scores::{compress, ScoreAdapter, ScoreProvider, CMD_ADD_SCORE, CMD_REMOVE_SCORE};
pub use tracking::{OrderWaiter, PropTarget, TrackingManager, TRACKED_PROPERTIES};
pub use widget::{
    Column, ColumnDump, ColumnError, ColumnFilter, ColumnKind, DataProvider, EventArgs,
    EventEmitter, FilterError, FilterValue, Ranking, RankingDump, SortCriterion, SortDesc,
};
