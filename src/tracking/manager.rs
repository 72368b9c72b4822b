//! Event capture and replay commands for the ranking widget
//!
//! The manager sits between a [`DataProvider`] and a [`ProvenanceGraph`].
//! In the capture direction it subscribes to every trackable widget event
//! and records an already-applied action with its inverse. In the replay
//! direction it registers one command per action kind; commands mutate the
//! widget through the same setters users call, so each command announces
//! the event it is about to cause and the capture side swallows exactly
//! that one event instead of recording it twice.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use anyhow::Context;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::provenance::{
    Action, ActionCategory, ActionMeta, ActionOp, CmdResult, ObjectRef, ProvenanceGraph, RefError,
};
use crate::tracking::buffer::{BufferedCommit, DialogBuffer};
use crate::tracking::properties::{accessor, PropTarget};
use crate::tracking::waiter::OrderWaiter;
use crate::widget::events::{
    property_changed_event, EventArgs, EventHandler, EVENT_ADD_COLUMN, EVENT_ADD_RANKING,
    EVENT_DIALOG_CLOSED, EVENT_DIALOG_OPENED, EVENT_GROUP_CRITERIA_CHANGED,
    EVENT_GROUP_SORT_CRITERIA_CHANGED, EVENT_MOVE_COLUMN, EVENT_REMOVE_COLUMN,
    EVENT_REMOVE_RANKING, EVENT_SORT_CRITERIA_CHANGED,
};
use crate::widget::filter::serialize_filter;
use crate::widget::{Column, ColumnDump, ColumnKind, DataProvider, Ranking, RankingDump, SortCriterion, SortDesc};

/// Subscription namespace for all capture handlers.
const NS_TRACK: &str = "track";

pub const CMD_SET_COLUMN: &str = "setColumnProperty";
pub const CMD_ADD_COLUMN: &str = "addColumn";
pub const CMD_MOVE_COLUMN: &str = "moveColumn";
pub const CMD_ADD_RANKING: &str = "addRanking";
pub const CMD_SET_SORT_CRITERIA: &str = "setSortCriteria";
pub const CMD_SET_GROUP_CRITERIA: &str = "setGroupCriteria";
pub const CMD_SET_RANKING_SORT_CRITERIA: &str = "setRankingSortCriteria";

/// Properties every column kind carries.
const BASE_COLUMN_PROPS: &[&str] = &[
    "metaData",
    "width",
    "rendererType",
    "groupRenderer",
    "summaryRenderer",
    "sortMethod",
    "filter",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetColumnParams {
    rid: usize,
    path: Option<String>,
    prop: String,
    value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddColumnParams {
    rid: usize,
    path: Option<String>,
    index: usize,
    /// `Some` adds the dumped column, `None` removes the column at `index`.
    dump: Option<ColumnDump>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveColumnParams {
    rid: usize,
    path: Option<String>,
    /// Position of the column when the command runs.
    index: usize,
    /// Target position, interpreted against the list before removal.
    move_to: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddRankingParams {
    index: usize,
    /// `Some` adds the dumped ranking, `None` removes the ranking at `index`.
    dump: Option<RankingDump>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetCriteriaParams {
    rid: usize,
    columns: Vec<SortDesc>,
    is_sorting: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetGroupCriteriaParams {
    rid: usize,
    columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetRankingSortParams {
    rid: usize,
    value: SortDesc,
}

#[derive(Default)]
struct GuardState {
    /// One-shot event name announced by a currently running command.
    ignore_next: Option<String>,
    /// Hashes of tracked views whose events are suppressed entirely.
    untracked: HashSet<String>,
}

/// Where a structural column command applies: the ranking's top level or a
/// composite column inside it.
enum ColumnSource {
    Top(Ranking),
    Nested(Column),
}

impl ColumnSource {
    fn locate(ranking: &Ranking, path: Option<&str>) -> anyhow::Result<Self> {
        match path {
            None => Ok(Self::Top(ranking.clone())),
            Some(p) => {
                let column = ranking
                    .find_by_path(p)
                    .with_context(|| format!("no column at path '{p}'"))?;
                Ok(Self::Nested(column))
            }
        }
    }

    fn at(&self, index: usize) -> Option<Column> {
        match self {
            Self::Top(r) => r.at(index),
            Self::Nested(c) => c.child_at(index),
        }
    }

    fn insert(&self, column: Column, index: usize) -> anyhow::Result<()> {
        match self {
            Self::Top(r) => {
                r.insert(column, index);
                Ok(())
            }
            Self::Nested(c) => Ok(c.insert_child(column, index)?),
        }
    }

    fn remove(&self, column: &Column) -> anyhow::Result<()> {
        match self {
            Self::Top(r) => {
                r.remove(column).context("column is not part of the ranking")?;
                Ok(())
            }
            Self::Nested(c) => {
                c.remove_child(column)?;
                Ok(())
            }
        }
    }

    fn move_to(&self, column: &Column, index: usize) -> anyhow::Result<()> {
        match self {
            Self::Top(r) => {
                r.move_column(column, index)
                    .context("column is not part of the ranking")?;
                Ok(())
            }
            Self::Nested(c) => {
                c.move_child(column, index)?;
                Ok(())
            }
        }
    }
}

fn layout_meta(label: impl Into<String>, op: ActionOp) -> ActionMeta {
    ActionMeta::new(label, ActionCategory::Layout, op)
}

fn to_params(value: impl Serialize) -> Option<Value> {
    serde_json::to_value(value).ok()
}

pub struct TrackingManager {
    graph: ProvenanceGraph<DataProvider>,
    provider: DataProvider,
    provider_ref: ObjectRef<DataProvider>,
    guard: Mutex<GuardState>,
    buffer: DialogBuffer,
}

impl TrackingManager {
    /// Attach tracking to the view `provider_ref` designates: register the
    /// replay commands on `graph` and subscribe to every trackable event of
    /// the provider, its rankings and their columns.
    pub async fn attach(
        graph: ProvenanceGraph<DataProvider>,
        provider_ref: ObjectRef<DataProvider>,
    ) -> Result<Arc<Self>, RefError> {
        let provider = provider_ref.resolve().await?;
        let manager = Arc::new(Self {
            graph: graph.clone(),
            provider,
            provider_ref,
            guard: Mutex::new(GuardState::default()),
            buffer: DialogBuffer::new(),
        });
        manager.register_commands();
        {
            // replay or foreign pushes invalidate a live-preview dialog
            let weak = Arc::downgrade(&manager);
            graph.on_event(Arc::new(move |_| {
                if let Some(m) = weak.upgrade() {
                    m.cancel_open_dialog();
                }
            }));
        }
        manager.track_provider();
        for ranking in manager.provider.rankings() {
            manager.track_ranking(&ranking);
        }
        debug!("tracking attached");
        Ok(manager)
    }

    pub fn graph(&self) -> &ProvenanceGraph<DataProvider> {
        &self.graph
    }

    pub fn provider(&self) -> &DataProvider {
        &self.provider
    }

    pub fn provider_ref(&self) -> &ObjectRef<DataProvider> {
        &self.provider_ref
    }

    /// Remove every capture subscription; the graph commands stay registered
    /// so an existing history remains replayable.
    pub fn detach(&self) {
        self.provider.events().off_all(
            &[
                EVENT_ADD_RANKING,
                EVENT_REMOVE_RANKING,
                EVENT_DIALOG_OPENED,
                EVENT_DIALOG_CLOSED,
            ],
            NS_TRACK,
        );
        for ranking in self.provider.rankings() {
            self.untrack_ranking(&ranking);
        }
        debug!("tracking detached");
    }

    /// Run `f` with event capture suppressed for this view.
    ///
    /// Capture resumes when `f` returns, also on unwind.
    pub fn without_tracking<R>(&self, f: impl FnOnce() -> R) -> R {
        struct Resume<'a> {
            manager: &'a TrackingManager,
            hash: String,
        }
        impl Drop for Resume<'_> {
            fn drop(&mut self) {
                self.manager.guard.lock().untracked.remove(&self.hash);
            }
        }
        let hash = self.provider_ref.hash().to_string();
        self.guard.lock().untracked.insert(hash.clone());
        let _resume = Resume {
            manager: self,
            hash,
        };
        f()
    }

    // -- guard ---------------------------------------------------------------

    fn ignore(&self, event: &str) -> bool {
        let mut guard = self.guard.lock();
        if guard.ignore_next.as_deref() == Some(event) {
            guard.ignore_next = None;
            return true;
        }
        guard.untracked.contains(self.provider_ref.hash())
    }

    fn set_ignore_next(manager: &Weak<Self>, event: &str) {
        if let Some(m) = manager.upgrade() {
            m.guard.lock().ignore_next = Some(event.to_string());
        }
    }

    fn cancel_open_dialog(&self) {
        if self.provider.dialog_open() {
            warn!("history activity while a dialog is open, cancelling the dialog");
            self.provider.close_dialog(false);
        } else if self.buffer.is_open() {
            self.buffer.cancel();
        }
    }

    // -- capture wiring ------------------------------------------------------

    fn track_provider(self: &Arc<Self>) {
        let events = self.provider.events();
        {
            let weak = Arc::downgrade(self);
            events.on(
                EVENT_ADD_RANKING,
                NS_TRACK,
                Arc::new(move |args| {
                    let Some(m) = weak.upgrade() else { return };
                    let EventArgs::Ranking { ranking, index } = args else {
                        return;
                    };
                    // always wire the new ranking, even for replayed adds
                    m.track_ranking(ranking);
                    if m.ignore(EVENT_ADD_RANKING) {
                        return;
                    }
                    m.record_ranking_add(ranking, *index);
                }),
            );
        }
        {
            let weak = Arc::downgrade(self);
            events.on(
                EVENT_REMOVE_RANKING,
                NS_TRACK,
                Arc::new(move |args| {
                    let Some(m) = weak.upgrade() else { return };
                    let EventArgs::Ranking { ranking, index } = args else {
                        return;
                    };
                    m.untrack_ranking(ranking);
                    if m.ignore(EVENT_REMOVE_RANKING) {
                        return;
                    }
                    m.record_ranking_remove(ranking, *index);
                }),
            );
        }
        {
            let weak = Arc::downgrade(self);
            events.on(
                EVENT_DIALOG_OPENED,
                NS_TRACK,
                Arc::new(move |_| {
                    if let Some(m) = weak.upgrade() {
                        m.buffer.open();
                    }
                }),
            );
        }
        {
            let weak = Arc::downgrade(self);
            events.on(
                EVENT_DIALOG_CLOSED,
                NS_TRACK,
                Arc::new(move |args| {
                    let Some(m) = weak.upgrade() else { return };
                    if let EventArgs::Dialog { confirmed } = args {
                        if *confirmed {
                            m.buffer.confirm();
                        } else {
                            m.buffer.cancel();
                        }
                    }
                }),
            );
        }
    }

    fn track_ranking(self: &Arc<Self>, ranking: &Ranking) {
        for (event, is_sorting) in [
            (EVENT_SORT_CRITERIA_CHANGED, true),
            (EVENT_GROUP_SORT_CRITERIA_CHANGED, false),
        ] {
            let weak = Arc::downgrade(self);
            let ranking2 = ranking.clone();
            ranking.events().on(
                event,
                NS_TRACK,
                Arc::new(move |args| {
                    let Some(m) = weak.upgrade() else { return };
                    let EventArgs::Value { old, new } = args else {
                        return;
                    };
                    if m.ignore(event) {
                        return;
                    }
                    m.record_criteria_change(&ranking2, old.clone(), new.clone(), is_sorting);
                }),
            );
        }
        {
            let weak = Arc::downgrade(self);
            let ranking2 = ranking.clone();
            ranking.events().on(
                EVENT_GROUP_CRITERIA_CHANGED,
                NS_TRACK,
                Arc::new(move |args| {
                    let Some(m) = weak.upgrade() else { return };
                    let EventArgs::Value { old, new } = args else {
                        return;
                    };
                    if m.ignore(EVENT_GROUP_CRITERIA_CHANGED) {
                        return;
                    }
                    m.record_group_criteria_change(&ranking2, old.clone(), new.clone());
                }),
            );
        }
        self.install_property_handler(&PropTarget::Ranking(ranking.clone()), "aggregation");
        self.install_structural_handlers(ranking.events(), StructuralScope::Ranking(ranking.clone()));
        for column in ranking.columns() {
            self.track_column(&column);
        }
    }

    fn untrack_ranking(&self, ranking: &Ranking) {
        let events = [
            EVENT_SORT_CRITERIA_CHANGED.to_string(),
            EVENT_GROUP_SORT_CRITERIA_CHANGED.to_string(),
            EVENT_GROUP_CRITERIA_CHANGED.to_string(),
            property_changed_event("aggregation"),
            EVENT_ADD_COLUMN.to_string(),
            EVENT_REMOVE_COLUMN.to_string(),
            EVENT_MOVE_COLUMN.to_string(),
        ];
        for event in &events {
            ranking.events().off(event, NS_TRACK);
        }
        for column in ranking.columns() {
            self.untrack_column(&column);
        }
    }

    fn track_column(self: &Arc<Self>, column: &Column) {
        let target = PropTarget::Column(column.clone());
        for prop in BASE_COLUMN_PROPS {
            self.install_property_handler(&target, prop);
        }
        if column.kind().supports_mapping() {
            self.install_property_handler(&target, "mapping");
        }
        if column.kind().supports_grouping() {
            self.install_property_handler(&target, "grouping");
        }
        if column.kind() == ColumnKind::Script {
            self.install_property_handler(&target, "script");
        }
        if column.is_composite() {
            self.install_property_handler(&target, "weights");
            self.install_structural_handlers(
                column.events(),
                StructuralScope::Composite(column.clone()),
            );
            for child in column.children() {
                self.track_column(&child);
            }
        }
    }

    fn untrack_column(&self, column: &Column) {
        for prop in BASE_COLUMN_PROPS {
            column.events().off(&property_changed_event(prop), NS_TRACK);
        }
        for prop in ["mapping", "grouping", "script", "weights"] {
            column.events().off(&property_changed_event(prop), NS_TRACK);
        }
        if column.is_composite() {
            column.events().off_all(
                &[EVENT_ADD_COLUMN, EVENT_REMOVE_COLUMN, EVENT_MOVE_COLUMN],
                NS_TRACK,
            );
            for child in column.children() {
                self.untrack_column(&child);
            }
        }
    }

    fn install_property_handler(self: &Arc<Self>, target: &PropTarget, prop: &'static str) {
        let weak = Arc::downgrade(self);
        let handler_target = target.clone();
        let handler: EventHandler = Arc::new(move |args| {
            let Some(m) = weak.upgrade() else { return };
            let (old, new) = match args {
                EventArgs::Value { old, new } => (old.clone(), new.clone()),
                EventArgs::Filter { old, new } => {
                    (serialize_filter(old.as_ref()), serialize_filter(new.as_ref()))
                }
                _ => return,
            };
            m.record_property_change(prop, &handler_target, old, new);
        });
        match target {
            PropTarget::Column(c) => c.events().on(&property_changed_event(prop), NS_TRACK, handler),
            PropTarget::Ranking(r) => {
                r.events().on(&property_changed_event(prop), NS_TRACK, handler)
            }
        }
    }

    fn install_structural_handlers(self: &Arc<Self>, events: &crate::widget::EventEmitter, scope: StructuralScope) {
        {
            let weak = Arc::downgrade(self);
            let scope2 = scope.clone();
            events.on(
                EVENT_ADD_COLUMN,
                NS_TRACK,
                Arc::new(move |args| {
                    let Some(m) = weak.upgrade() else { return };
                    let EventArgs::Column { column, index } = args else {
                        return;
                    };
                    m.track_column(column);
                    if m.ignore(EVENT_ADD_COLUMN) {
                        return;
                    }
                    let Some((rid, path)) = scope2.locate(&m.provider) else {
                        return;
                    };
                    m.record_column_add(rid, path, column, *index);
                }),
            );
        }
        {
            let weak = Arc::downgrade(self);
            let scope2 = scope.clone();
            events.on(
                EVENT_REMOVE_COLUMN,
                NS_TRACK,
                Arc::new(move |args| {
                    let Some(m) = weak.upgrade() else { return };
                    let EventArgs::Column { column, index } = args else {
                        return;
                    };
                    m.untrack_column(column);
                    if m.ignore(EVENT_REMOVE_COLUMN) {
                        return;
                    }
                    let Some((rid, path)) = scope2.locate(&m.provider) else {
                        return;
                    };
                    m.record_column_remove(rid, path, column, *index);
                }),
            );
        }
        {
            let weak = Arc::downgrade(self);
            events.on(
                EVENT_MOVE_COLUMN,
                NS_TRACK,
                Arc::new(move |args| {
                    let Some(m) = weak.upgrade() else { return };
                    let EventArgs::ColumnMoved {
                        index, old_index, ..
                    } = args
                    else {
                        return;
                    };
                    if m.ignore(EVENT_MOVE_COLUMN) {
                        return;
                    }
                    let Some((rid, path)) = scope.locate(&m.provider) else {
                        return;
                    };
                    m.record_column_move(rid, path, *index, *old_index);
                }),
            );
        }
    }

    // -- recording -----------------------------------------------------------

    fn push_recorded<P: Serialize>(
        &self,
        cmd: &str,
        forward_meta: ActionMeta,
        forward: &P,
        inverse_meta: ActionMeta,
        inverse: &P,
    ) {
        let (Some(fwd), Some(inv)) = (to_params(forward), to_params(inverse)) else {
            warn!(cmd, "failed to serialize action parameters, change not recorded");
            return;
        };
        let forward = Action::new(forward_meta, cmd, vec![self.provider_ref.clone()], fwd);
        let inverse = Action::new(inverse_meta, cmd, vec![self.provider_ref.clone()], inv);
        self.graph.push_with_result(forward, CmdResult { inverse });
    }

    /// Record a change now, or stash it in the dialog buffer when a dialog
    /// is open so only the net change survives a confirm.
    fn commit_or_buffer<F>(&self, key: String, old: Value, new: Value, push: F)
    where
        F: FnOnce(Value, Value) + Send + 'static,
    {
        let final_new = new;
        let commit: BufferedCommit = Box::new(move |initial| {
            if initial != final_new {
                push(initial, final_new);
            }
        });
        if let Err(commit) = self.buffer.record(&key, old.clone(), commit) {
            commit(old);
        }
    }

    fn record_property_change(self: &Arc<Self>, prop: &str, target: &PropTarget, old: Value, new: Value) {
        if self.ignore(&property_changed_event(prop)) {
            return;
        }
        let located = match target {
            PropTarget::Column(c) => self
                .provider
                .ranker_of(c)
                .and_then(|(rid, ranking)| ranking.fqpath(c).map(|path| (rid, Some(path)))),
            PropTarget::Ranking(r) => self.provider.ranking_index_of(r).map(|rid| (rid, None)),
        };
        let Some((rid, path)) = located else {
            warn!(prop, "property change on a detached element, not recorded");
            return;
        };
        let key = match &path {
            Some(p) => format!("{prop}@{rid}:{p}"),
            None => format!("{prop}@{rid}"),
        };
        let graph = self.graph.clone();
        let input = self.provider_ref.clone();
        let prop = prop.to_string();
        self.commit_or_buffer(key, old, new, move |old, new| {
            let make = |value: Value| SetColumnParams {
                rid,
                path: path.clone(),
                prop: prop.clone(),
                value,
            };
            let (Some(fwd), Some(inv)) = (to_params(make(new)), to_params(make(old))) else {
                warn!(%prop, "failed to serialize property change, not recorded");
                return;
            };
            let label = format!("Set {prop}");
            let forward = Action::new(
                layout_meta(label.clone(), ActionOp::Update),
                CMD_SET_COLUMN,
                vec![input.clone()],
                fwd,
            );
            let inverse = Action::new(
                layout_meta(label, ActionOp::Update),
                CMD_SET_COLUMN,
                vec![input],
                inv,
            );
            graph.push_with_result(forward, CmdResult { inverse });
        });
    }

    fn record_criteria_change(self: &Arc<Self>, ranking: &Ranking, old: Value, new: Value, is_sorting: bool) {
        let Some(rid) = self.provider.ranking_index_of(ranking) else {
            return;
        };
        let kind = if is_sorting { "sortCriteria" } else { "groupSortCriteria" };
        let key = format!("{kind}@{rid}");
        let graph = self.graph.clone();
        let input = self.provider_ref.clone();
        self.commit_or_buffer(key, old, new, move |old, new| {
            let make = |value: Value| -> Option<Value> {
                let columns: Vec<SortDesc> = serde_json::from_value(value).ok()?;
                to_params(SetCriteriaParams {
                    rid,
                    columns,
                    is_sorting,
                })
            };
            let (Some(fwd), Some(inv)) = (make(new), make(old)) else {
                warn!(kind, "unexpected criteria payload, change not recorded");
                return;
            };
            let label = if is_sorting {
                "Set Sort Criteria"
            } else {
                "Set Group Sort Criteria"
            };
            let forward = Action::new(
                layout_meta(label, ActionOp::Update),
                CMD_SET_SORT_CRITERIA,
                vec![input.clone()],
                fwd,
            );
            let inverse = Action::new(
                layout_meta(label, ActionOp::Update),
                CMD_SET_SORT_CRITERIA,
                vec![input],
                inv,
            );
            graph.push_with_result(forward, CmdResult { inverse });
        });
    }

    fn record_group_criteria_change(self: &Arc<Self>, ranking: &Ranking, old: Value, new: Value) {
        let Some(rid) = self.provider.ranking_index_of(ranking) else {
            return;
        };
        let key = format!("groupCriteria@{rid}");
        let graph = self.graph.clone();
        let input = self.provider_ref.clone();
        self.commit_or_buffer(key, old, new, move |old, new| {
            let make = |value: Value| -> Option<Value> {
                let columns: Vec<String> = serde_json::from_value(value).ok()?;
                to_params(SetGroupCriteriaParams { rid, columns })
            };
            let (Some(fwd), Some(inv)) = (make(new), make(old)) else {
                warn!("unexpected group criteria payload, change not recorded");
                return;
            };
            let forward = Action::new(
                layout_meta("Set Group Criteria", ActionOp::Update),
                CMD_SET_GROUP_CRITERIA,
                vec![input.clone()],
                fwd,
            );
            let inverse = Action::new(
                layout_meta("Set Group Criteria", ActionOp::Update),
                CMD_SET_GROUP_CRITERIA,
                vec![input],
                inv,
            );
            graph.push_with_result(forward, CmdResult { inverse });
        });
    }

    fn record_column_add(&self, rid: usize, path: Option<String>, column: &Column, index: usize) {
        self.push_recorded(
            CMD_ADD_COLUMN,
            layout_meta(format!("Add Column {}", column.label()), ActionOp::Create),
            &AddColumnParams {
                rid,
                path: path.clone(),
                index,
                dump: Some(column.dump()),
            },
            layout_meta(format!("Remove Column {}", column.label()), ActionOp::Remove),
            &AddColumnParams {
                rid,
                path,
                index,
                dump: None,
            },
        );
    }

    fn record_column_remove(&self, rid: usize, path: Option<String>, column: &Column, index: usize) {
        self.push_recorded(
            CMD_ADD_COLUMN,
            layout_meta(format!("Remove Column {}", column.label()), ActionOp::Remove),
            &AddColumnParams {
                rid,
                path: path.clone(),
                index,
                dump: None,
            },
            layout_meta(format!("Add Column {}", column.label()), ActionOp::Create),
            &AddColumnParams {
                rid,
                path,
                index,
                dump: Some(column.dump()),
            },
        );
    }

    fn record_column_move(&self, rid: usize, path: Option<String>, index: usize, old_index: usize) {
        // post-move position of the column, target indices are pre-removal
        let post = if index > old_index { index - 1 } else { index };
        let inverse_target = if old_index > index { old_index + 1 } else { old_index };
        self.push_recorded(
            CMD_MOVE_COLUMN,
            layout_meta("Move Column", ActionOp::Update),
            &MoveColumnParams {
                rid,
                path: path.clone(),
                index: old_index,
                move_to: index,
            },
            layout_meta("Move Column", ActionOp::Update),
            &MoveColumnParams {
                rid,
                path,
                index: post,
                move_to: inverse_target,
            },
        );
    }

    fn record_ranking_add(&self, ranking: &Ranking, index: usize) {
        self.push_recorded(
            CMD_ADD_RANKING,
            layout_meta("Add Ranking", ActionOp::Create),
            &AddRankingParams {
                index,
                dump: Some(ranking.dump()),
            },
            layout_meta("Remove Ranking", ActionOp::Remove),
            &AddRankingParams { index, dump: None },
        );
    }

    fn record_ranking_remove(&self, ranking: &Ranking, index: usize) {
        self.push_recorded(
            CMD_ADD_RANKING,
            layout_meta("Remove Ranking", ActionOp::Remove),
            &AddRankingParams { index, dump: None },
            layout_meta("Add Ranking", ActionOp::Create),
            &AddRankingParams {
                index,
                dump: Some(ranking.dump()),
            },
        );
    }

    // -- replay commands -----------------------------------------------------

    fn register_commands(self: &Arc<Self>) {
        let registry = self.graph.registry();
        macro_rules! register {
            ($cmd:expr, $impl:ident) => {{
                let weak = Arc::downgrade(self);
                registry.register(
                    $cmd,
                    Arc::new(move |inputs, parameter| {
                        let weak = weak.clone();
                        Box::pin(Self::$impl(weak, inputs, parameter))
                    }),
                );
            }};
        }
        register!(CMD_SET_COLUMN, set_column_impl);
        register!(CMD_ADD_COLUMN, add_column_impl);
        register!(CMD_MOVE_COLUMN, move_column_impl);
        register!(CMD_ADD_RANKING, add_ranking_impl);
        register!(CMD_SET_SORT_CRITERIA, set_criteria_impl);
        register!(CMD_SET_GROUP_CRITERIA, set_group_criteria_impl);
        register!(CMD_SET_RANKING_SORT_CRITERIA, set_ranking_sort_impl);
    }

    async fn resolve_input(
        inputs: &[ObjectRef<DataProvider>],
    ) -> anyhow::Result<DataProvider> {
        let input = inputs.first().context("missing tracked view input")?;
        Ok(input.resolve().await?)
    }

    async fn set_column_impl(
        manager: Weak<Self>,
        inputs: Vec<ObjectRef<DataProvider>>,
        parameter: Value,
    ) -> anyhow::Result<CmdResult<DataProvider>> {
        let provider = Self::resolve_input(&inputs).await?;
        let p: SetColumnParams = serde_json::from_value(parameter)?;
        let ranking = provider
            .ranking_at(p.rid)
            .with_context(|| format!("no ranking at index {}", p.rid))?;
        let target = match &p.path {
            None => PropTarget::Ranking(ranking.clone()),
            Some(path) => PropTarget::Column(
                ranking
                    .find_by_path(path)
                    .with_context(|| format!("no column at path '{path}'"))?,
            ),
        };
        let acc = accessor(&p.prop).with_context(|| format!("untracked property '{}'", p.prop))?;
        let old = (acc.get)(&target)?;
        let waiter = OrderWaiter::install(&ranking);
        Self::set_ignore_next(&manager, &property_changed_event(&p.prop));
        (acc.set)(&target, p.value)?;
        waiter.finish().await;
        let inverse = SetColumnParams {
            rid: p.rid,
            path: p.path,
            prop: p.prop.clone(),
            value: old,
        };
        Ok(CmdResult {
            inverse: Action::new(
                layout_meta(format!("Set {}", p.prop), ActionOp::Update),
                CMD_SET_COLUMN,
                inputs,
                serde_json::to_value(inverse)?,
            ),
        })
    }

    async fn add_column_impl(
        manager: Weak<Self>,
        inputs: Vec<ObjectRef<DataProvider>>,
        parameter: Value,
    ) -> anyhow::Result<CmdResult<DataProvider>> {
        let provider = Self::resolve_input(&inputs).await?;
        let p: AddColumnParams = serde_json::from_value(parameter)?;
        let ranking = provider
            .ranking_at(p.rid)
            .with_context(|| format!("no ranking at index {}", p.rid))?;
        let source = ColumnSource::locate(&ranking, p.path.as_deref())?;
        let waiter = OrderWaiter::install(&ranking);
        let inverse = match p.dump {
            Some(dump) => {
                let label = dump.label.clone();
                let column = provider.restore_column(dump)?;
                Self::set_ignore_next(&manager, EVENT_ADD_COLUMN);
                source.insert(column, p.index)?;
                Action::new(
                    layout_meta(format!("Remove Column {label}"), ActionOp::Remove),
                    CMD_ADD_COLUMN,
                    inputs,
                    serde_json::to_value(AddColumnParams {
                        rid: p.rid,
                        path: p.path,
                        index: p.index,
                        dump: None,
                    })?,
                )
            }
            None => {
                let column = source
                    .at(p.index)
                    .with_context(|| format!("no column at index {}", p.index))?;
                let dump = provider.dump_column(&column);
                Self::set_ignore_next(&manager, EVENT_REMOVE_COLUMN);
                source.remove(&column)?;
                Action::new(
                    layout_meta(format!("Add Column {}", column.label()), ActionOp::Create),
                    CMD_ADD_COLUMN,
                    inputs,
                    serde_json::to_value(AddColumnParams {
                        rid: p.rid,
                        path: p.path,
                        index: p.index,
                        dump: Some(dump),
                    })?,
                )
            }
        };
        waiter.finish().await;
        Ok(CmdResult { inverse })
    }

    async fn move_column_impl(
        manager: Weak<Self>,
        inputs: Vec<ObjectRef<DataProvider>>,
        parameter: Value,
    ) -> anyhow::Result<CmdResult<DataProvider>> {
        let provider = Self::resolve_input(&inputs).await?;
        let p: MoveColumnParams = serde_json::from_value(parameter)?;
        let ranking = provider
            .ranking_at(p.rid)
            .with_context(|| format!("no ranking at index {}", p.rid))?;
        let source = ColumnSource::locate(&ranking, p.path.as_deref())?;
        let column = source
            .at(p.index)
            .with_context(|| format!("no column at index {}", p.index))?;
        let waiter = OrderWaiter::install(&ranking);
        Self::set_ignore_next(&manager, EVENT_MOVE_COLUMN);
        source.move_to(&column, p.move_to)?;
        waiter.finish().await;
        let post = if p.move_to > p.index { p.move_to - 1 } else { p.move_to };
        let inverse_target = if p.index > p.move_to { p.index + 1 } else { p.index };
        Ok(CmdResult {
            inverse: Action::new(
                layout_meta("Move Column", ActionOp::Update),
                CMD_MOVE_COLUMN,
                inputs,
                serde_json::to_value(MoveColumnParams {
                    rid: p.rid,
                    path: p.path,
                    index: post,
                    move_to: inverse_target,
                })?,
            ),
        })
    }

    async fn add_ranking_impl(
        manager: Weak<Self>,
        inputs: Vec<ObjectRef<DataProvider>>,
        parameter: Value,
    ) -> anyhow::Result<CmdResult<DataProvider>> {
        let provider = Self::resolve_input(&inputs).await?;
        let p: AddRankingParams = serde_json::from_value(parameter)?;
        match p.dump {
            Some(dump) => {
                let ranking = provider.restore_ranking(dump)?;
                let waiter = OrderWaiter::install(&ranking);
                Self::set_ignore_next(&manager, EVENT_ADD_RANKING);
                provider.insert_ranking(ranking, p.index);
                waiter.finish().await;
                Ok(CmdResult {
                    inverse: Action::new(
                        layout_meta("Remove Ranking", ActionOp::Remove),
                        CMD_ADD_RANKING,
                        inputs,
                        serde_json::to_value(AddRankingParams {
                            index: p.index,
                            dump: None,
                        })?,
                    ),
                })
            }
            None => {
                let ranking = provider
                    .ranking_at(p.index)
                    .with_context(|| format!("no ranking at index {}", p.index))?;
                let dump = ranking.dump();
                Self::set_ignore_next(&manager, EVENT_REMOVE_RANKING);
                provider.remove_ranking(&ranking);
                Ok(CmdResult {
                    inverse: Action::new(
                        layout_meta("Add Ranking", ActionOp::Create),
                        CMD_ADD_RANKING,
                        inputs,
                        serde_json::to_value(AddRankingParams {
                            index: p.index,
                            dump: Some(dump),
                        })?,
                    ),
                })
            }
        }
    }

    async fn set_criteria_impl(
        manager: Weak<Self>,
        inputs: Vec<ObjectRef<DataProvider>>,
        parameter: Value,
    ) -> anyhow::Result<CmdResult<DataProvider>> {
        let provider = Self::resolve_input(&inputs).await?;
        let p: SetCriteriaParams = serde_json::from_value(parameter)?;
        let ranking = provider
            .ranking_at(p.rid)
            .with_context(|| format!("no ranking at index {}", p.rid))?;
        let old = ranking.to_sort_descs(&if p.is_sorting {
            ranking.sort_criteria()
        } else {
            ranking.group_sort_criteria()
        });
        let criteria = resolve_criteria(&ranking, &p.columns);
        let waiter = OrderWaiter::install(&ranking);
        let (event, label) = if p.is_sorting {
            (EVENT_SORT_CRITERIA_CHANGED, "Set Sort Criteria")
        } else {
            (EVENT_GROUP_SORT_CRITERIA_CHANGED, "Set Group Sort Criteria")
        };
        Self::set_ignore_next(&manager, event);
        if p.is_sorting {
            ranking.set_sort_criteria(criteria);
        } else {
            ranking.set_group_sort_criteria(criteria);
        }
        waiter.finish().await;
        Ok(CmdResult {
            inverse: Action::new(
                layout_meta(label, ActionOp::Update),
                CMD_SET_SORT_CRITERIA,
                inputs,
                serde_json::to_value(SetCriteriaParams {
                    rid: p.rid,
                    columns: old,
                    is_sorting: p.is_sorting,
                })?,
            ),
        })
    }

    async fn set_group_criteria_impl(
        manager: Weak<Self>,
        inputs: Vec<ObjectRef<DataProvider>>,
        parameter: Value,
    ) -> anyhow::Result<CmdResult<DataProvider>> {
        let provider = Self::resolve_input(&inputs).await?;
        let p: SetGroupCriteriaParams = serde_json::from_value(parameter)?;
        let ranking = provider
            .ranking_at(p.rid)
            .with_context(|| format!("no ranking at index {}", p.rid))?;
        let old: Vec<String> = ranking
            .group_criteria()
            .iter()
            .filter_map(|c| ranking.fqpath(c))
            .collect();
        let columns: Vec<Column> = p
            .columns
            .iter()
            .filter_map(|path| ranking.find_by_path(path))
            .collect();
        let waiter = OrderWaiter::install(&ranking);
        Self::set_ignore_next(&manager, EVENT_GROUP_CRITERIA_CHANGED);
        ranking.set_group_criteria(columns);
        waiter.finish().await;
        Ok(CmdResult {
            inverse: Action::new(
                layout_meta("Set Group Criteria", ActionOp::Update),
                CMD_SET_GROUP_CRITERIA,
                inputs,
                serde_json::to_value(SetGroupCriteriaParams {
                    rid: p.rid,
                    columns: old,
                })?,
            ),
        })
    }

    async fn set_ranking_sort_impl(
        manager: Weak<Self>,
        inputs: Vec<ObjectRef<DataProvider>>,
        parameter: Value,
    ) -> anyhow::Result<CmdResult<DataProvider>> {
        let provider = Self::resolve_input(&inputs).await?;
        let p: SetRankingSortParams = serde_json::from_value(parameter)?;
        let ranking = provider
            .ranking_at(p.rid)
            .with_context(|| format!("no ranking at index {}", p.rid))?;
        let old = ranking
            .sort_criteria()
            .first()
            .map(|c| SortDesc {
                col: ranking.fqpath(&c.column),
                asc: c.asc,
            })
            .unwrap_or(SortDesc {
                col: None,
                asc: true,
            });
        let column = p.value.col.as_deref().and_then(|path| ranking.find_by_path(path));
        let waiter = OrderWaiter::install(&ranking);
        Self::set_ignore_next(&manager, EVENT_SORT_CRITERIA_CHANGED);
        ranking.sort_by(column.as_ref(), p.value.asc);
        waiter.finish().await;
        Ok(CmdResult {
            inverse: Action::new(
                layout_meta("Sort Ranking", ActionOp::Update),
                CMD_SET_RANKING_SORT_CRITERIA,
                inputs,
                serde_json::to_value(SetRankingSortParams {
                    rid: p.rid,
                    value: old,
                })?,
            ),
        })
    }
}

/// What a structural event handler is attached to, used to compute the
/// record-time ranking index and path.
#[derive(Clone)]
enum StructuralScope {
    Ranking(Ranking),
    Composite(Column),
}

impl StructuralScope {
    fn locate(&self, provider: &DataProvider) -> Option<(usize, Option<String>)> {
        match self {
            Self::Ranking(r) => provider.ranking_index_of(r).map(|rid| (rid, None)),
            Self::Composite(c) => {
                let (rid, ranking) = provider.ranker_of(c)?;
                let path = ranking.fqpath(c)?;
                Some((rid, Some(path)))
            }
        }
    }
}

fn resolve_criteria(ranking: &Ranking, descs: &[SortDesc]) -> Vec<SortCriterion> {
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn tracked_manual() -> (Arc<TrackingManager>, DataProvider, ProvenanceGraph<DataProvider>) {
        let provider = DataProvider::with_manual_settle();
        let graph = ProvenanceGraph::new();
        let manager = TrackingManager::attach(
            graph.clone(),
            ObjectRef::resolved("view", provider.clone()),
        )
        .await
        .unwrap();
        (manager, provider, graph)
    }

    #[tokio::test]
    async fn test_direct_mutations_are_recorded() {
        let (_manager, provider, graph) = tracked_manual().await;
        let ranking = provider.add_ranking();
        assert_eq!(graph.len(), 1);

        let col = Column::new(ColumnKind::Text, "Name");
        ranking.insert(col.clone(), 0);
        assert_eq!(graph.len(), 2);

        col.set_width(150.0);
        assert_eq!(graph.len(), 3);
        let actions = graph.actions();
        assert_eq!(actions[2].cmd_id, CMD_SET_COLUMN);
        assert_eq!(actions[2].parameter["prop"], json!("width"));
    }

    #[tokio::test]
    async fn test_without_tracking_suppresses_recording() {
        let (manager, provider, graph) = tracked_manual().await;
        let ranking = provider.add_ranking();
        manager.without_tracking(|| {
            ranking.insert(Column::new(ColumnKind::Text, "Name"), 0);
        });
        assert_eq!(graph.len(), 1);

        // tracking resumes afterwards
        ranking.insert(Column::new(ColumnKind::Text, "Other"), 1);
        assert_eq!(graph.len(), 2);
    }

    #[tokio::test]
    async fn test_without_tracking_resumes_after_panic() {
        let (manager, provider, graph) = tracked_manual().await;
        let ranking = provider.add_ranking();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            manager.without_tracking(|| panic!("score computation failed"));
        }));
        assert!(result.is_err());

        ranking.insert(Column::new(ColumnKind::Text, "Name"), 0);
        assert_eq!(graph.len(), 2);
    }

    #[tokio::test]
    async fn test_new_column_is_tracked_on_add() {
        let (_manager, provider, graph) = tracked_manual().await;
        let ranking = provider.add_ranking();
        let col = Column::new(ColumnKind::Text, "Name");
        ranking.insert(col.clone(), 0);
        let before = graph.len();
        col.set_meta_data(json!({ "note": "x" }));
        assert_eq!(graph.len(), before + 1);
    }

    #[tokio::test]
    async fn test_removed_column_is_untracked() {
        let (_manager, provider, graph) = tracked_manual().await;
        let ranking = provider.add_ranking();
        let col = Column::new(ColumnKind::Text, "Name");
        ranking.insert(col.clone(), 0);
        ranking.remove(&col);
        let before = graph.len();
        col.set_width(200.0);
        assert_eq!(graph.len(), before);
    }

    #[tokio::test]
    async fn test_undo_property_change() {
        let provider = DataProvider::new();
        let graph = ProvenanceGraph::new();
        let _manager = TrackingManager::attach(
            graph.clone(),
            ObjectRef::resolved("view", provider.clone()),
        )
        .await
        .unwrap();
        let ranking = provider.add_ranking();
        let col = Column::new(ColumnKind::Text, "Name");
        ranking.insert(col.clone(), 0);

        col.set_width(150.0);
        let recorded = graph.len();
        graph.undo().await.unwrap();
        assert_eq!(col.width(), 100.0);
        // the replayed inverse must not append a new node
        assert_eq!(graph.len(), recorded);

        graph.redo().await.unwrap();
        assert_eq!(col.width(), 150.0);
    }

    #[tokio::test]
    async fn test_detach_stops_recording() {
        let (manager, provider, graph) = tracked_manual().await;
        let ranking = provider.add_ranking();
        manager.detach();
        ranking.insert(Column::new(ColumnKind::Text, "Name"), 0);
        assert_eq!(graph.len(), 1);
    }
}
