//! Computed score columns recorded as provenance actions
//!
//! A score is an externally computed column set (e.g. a database query per
//! row). Scores insert their columns with tracking suppressed and record a
//! single `addScore` action instead, so undo removes the whole set and redo
//! recomputes it through the same provider.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::provenance::{Action, ActionCategory, ActionMeta, ActionOp, CmdResult, ObjectRef};
use crate::tracking::TrackingManager;
use crate::widget::{ColumnDump, DataProvider};

pub const CMD_ADD_SCORE: &str = "addScore";
pub const CMD_REMOVE_SCORE: &str = "removeScore";

/// Computes the columns a score contributes for the given parameters.
///
/// Implementations are looked up by id on replay, so a restored history can
/// recompute a score against fresh data.
#[async_trait]
pub trait ScoreProvider: Send + Sync {
    async fn create_columns(&self, params: &Value) -> anyhow::Result<Vec<ColumnDump>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddScoreParams {
    score_id: String,
    params: Value,
    rid: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveScoreParams {
    score_id: String,
    params: Value,
    rid: usize,
    /// Paths of the inserted columns, recorded so removal finds them even
    /// after other columns moved around.
    paths: Vec<String>,
}

fn score_meta(label: impl Into<String>, op: ActionOp) -> ActionMeta {
    ActionMeta::new(label, ActionCategory::Data, op)
}

/// Registry of score providers plus the two replay commands.
pub struct ScoreAdapter {
    manager: Arc<TrackingManager>,
    scores: RwLock<HashMap<String, Arc<dyn ScoreProvider>>>,
}

impl ScoreAdapter {
    pub fn new(manager: Arc<TrackingManager>) -> Arc<Self> {
        let adapter = Arc::new(Self {
            manager,
            scores: RwLock::new(HashMap::new()),
        });
        adapter.register_commands();
        adapter
    }

    pub fn register_score(&self, id: impl Into<String>, provider: Arc<dyn ScoreProvider>) {
        self.scores.write().insert(id.into(), provider);
    }

    /// Compute and insert a score's columns into the ranking at `rid`,
    /// recording the whole set as one action.
    pub async fn add_score(&self, score_id: &str, params: Value, rid: usize) -> anyhow::Result<()> {
        let action = Action::new(
            score_meta(format!("Add Score {score_id}"), ActionOp::Create),
            CMD_ADD_SCORE,
            vec![self.manager.provider_ref().clone()],
            serde_json::to_value(AddScoreParams {
                score_id: score_id.to_string(),
                params,
                rid,
            })?,
        );
        self.manager.graph().push(action).await?;
        Ok(())
    }

    fn register_commands(self: &Arc<Self>) {
        let registry = self.manager.graph().registry();
        {
            let weak = Arc::downgrade(self);
            registry.register(
                CMD_ADD_SCORE,
                Arc::new(move |inputs, parameter| {
                    let weak = weak.clone();
                    Box::pin(Self::add_score_impl(weak, inputs, parameter))
                }),
            );
        }
        {
            let weak = Arc::downgrade(self);
            registry.register(
                CMD_REMOVE_SCORE,
                Arc::new(move |inputs, parameter| {
                    let weak = weak.clone();
                    Box::pin(Self::remove_score_impl(weak, inputs, parameter))
                }),
            );
        }
    }

    fn upgrade(weak: &Weak<Self>) -> anyhow::Result<Arc<Self>> {
        weak.upgrade().context("score adapter is gone")
    }

    async fn add_score_impl(
        weak: Weak<Self>,
        inputs: Vec<ObjectRef<DataProvider>>,
        parameter: Value,
    ) -> anyhow::Result<CmdResult<DataProvider>> {
        let adapter = Self::upgrade(&weak)?;
        let input = inputs.first().context("missing tracked view input")?;
        let provider = input.resolve().await?;
        let p: AddScoreParams = serde_json::from_value(parameter)?;
        let score = adapter
            .scores
            .read()
            .get(&p.score_id)
            .cloned()
            .with_context(|| format!("unknown score '{}'", p.score_id))?;
        let dumps = score.create_columns(&p.params).await?;
        let ranking = provider
            .ranking_at(p.rid)
            .with_context(|| format!("no ranking at index {}", p.rid))?;
        debug!(score = %p.score_id, columns = dumps.len(), "inserting score columns");
        let paths = adapter
            .manager
            .without_tracking(|| -> anyhow::Result<Vec<String>> {
                let mut paths = Vec::with_capacity(dumps.len());
                for dump in dumps {
                    let column = provider.restore_column(dump)?;
                    ranking.push(column.clone());
                    paths.push(
                        ranking
                            .fqpath(&column)
                            .context("inserted score column has no path")?,
                    );
                }
                Ok(paths)
            })?;
        Ok(CmdResult {
            inverse: Action::new(
                score_meta(format!("Remove Score {}", p.score_id), ActionOp::Remove),
                CMD_REMOVE_SCORE,
                inputs,
                serde_json::to_value(RemoveScoreParams {
                    score_id: p.score_id,
                    params: p.params,
                    rid: p.rid,
                    paths,
                })?,
            ),
        })
    }

    async fn remove_score_impl(
        weak: Weak<Self>,
        inputs: Vec<ObjectRef<DataProvider>>,
        parameter: Value,
    ) -> anyhow::Result<CmdResult<DataProvider>> {
        let adapter = Self::upgrade(&weak)?;
        let input = inputs.first().context("missing tracked view input")?;
        let provider = input.resolve().await?;
        let p: RemoveScoreParams = serde_json::from_value(parameter)?;
        let ranking = provider
            .ranking_at(p.rid)
            .with_context(|| format!("no ranking at index {}", p.rid))?;
        adapter.manager.without_tracking(|| {
            for path in &p.paths {
                if let Some(column) = ranking.find_by_path(path) {
                    ranking.remove(&column);
                }
            }
        });
        Ok(CmdResult {
            inverse: Action::new(
                score_meta(format!("Add Score {}", p.score_id), ActionOp::Create),
                CMD_ADD_SCORE,
                inputs,
                serde_json::to_value(AddScoreParams {
                    score_id: p.score_id,
                    params: p.params,
                    rid: p.rid,
                })?,
            ),
        })
    }
}

/// Drop matching add/remove score pairs from a forward action list.
///
/// A score that was added and later removed with the same parameters
/// contributes nothing to the final state, so a stored history can omit
/// both actions.
pub fn compress(actions: Vec<Action<DataProvider>>) -> Vec<Action<DataProvider>> {
    let mut result: Vec<Action<DataProvider>> = Vec::new();
    for action in actions {
        if action.cmd_id == CMD_REMOVE_SCORE {
            let matching = result.iter().rposition(|a| {
                a.cmd_id == CMD_ADD_SCORE
                    && a.parameter["scoreId"] == action.parameter["scoreId"]
                    && a.parameter["params"] == action.parameter["params"]
                    && a.parameter["rid"] == action.parameter["rid"]
            });
            if let Some(pos) = matching {
                result.remove(pos);
                continue;
            }
        }
        result.push(action);
    }
    result
}
