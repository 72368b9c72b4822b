//! Round-trip undo/redo scenarios over the full capture/replay loop

use ranktrack::tracking::CMD_SET_RANKING_SORT_CRITERIA;
use ranktrack::{
    Action, ActionCategory, ActionMeta, ActionOp, Column, ColumnFilter, ColumnKind, GraphError,
    Ranking, SortCriterion,
};
use serde_json::json;

use crate::tracking::support;

fn labels(ranking: &Ranking) -> Vec<String> {
    ranking.columns().iter().map(|c| c.label()).collect()
}

#[tokio::test]
async fn test_filter_change_round_trips() {
    let t = support::tracked().await;
    let ranking = t.provider.add_ranking();
    let col = Column::new(ColumnKind::Text, "Name");
    ranking.insert(col.clone(), 0);

    col.set_filter(Some(ColumnFilter::pattern("^ab").unwrap()));
    let recorded = t.graph.len();

    t.graph.undo().await.unwrap();
    assert_eq!(col.filter(), None);

    t.graph.redo().await.unwrap();
    assert_eq!(col.filter(), Some(ColumnFilter::pattern("^ab").unwrap()));
    assert_eq!(t.graph.len(), recorded);
}

#[tokio::test]
async fn test_column_add_remove_round_trips() {
    let t = support::tracked().await;
    let ranking = t.provider.add_ranking();
    let col = Column::new(ColumnKind::Number, "Score");
    col.set_filter(Some(ColumnFilter::text("5")));
    ranking.insert(col.clone(), 0);
    ranking.remove(&col);
    assert!(ranking.is_empty());

    // undo the removal: the column comes back with its filter
    t.graph.undo().await.unwrap();
    assert_eq!(ranking.len(), 1);
    let restored = ranking.at(0).unwrap();
    assert_eq!(restored.id(), col.id());
    assert_eq!(restored.filter(), Some(ColumnFilter::text("5")));

    // undo the insertion as well
    t.graph.undo().await.unwrap();
    assert!(ranking.is_empty());

    t.graph.redo().await.unwrap();
    t.graph.redo().await.unwrap();
    assert!(ranking.is_empty());
}

#[tokio::test]
async fn test_move_column_round_trips() {
    let t = support::tracked().await;
    let ranking = t.provider.add_ranking();
    for label in ["a", "b", "c"] {
        ranking.push(Column::new(ColumnKind::Text, label));
    }
    let a = ranking.at(0).unwrap();

    // target index counts positions before removal
    ranking.move_column(&a, 2);
    assert_eq!(labels(&ranking), vec!["b", "a", "c"]);

    t.graph.undo().await.unwrap();
    assert_eq!(labels(&ranking), vec!["a", "b", "c"]);

    t.graph.redo().await.unwrap();
    assert_eq!(labels(&ranking), vec!["b", "a", "c"]);
}

#[tokio::test]
async fn test_removing_sorted_column_restores_criteria() {
    let t = support::tracked().await;
    let ranking = t.provider.add_ranking();
    let col = Column::new(ColumnKind::Number, "Score");
    ranking.insert(col.clone(), 0);
    ranking.sort_by(Some(&col), false);
    let before = t.graph.len();

    // the criteria purge is recorded as its own invertible action
    ranking.remove(&col);
    assert_eq!(t.graph.len(), before + 2);

    t.graph.undo().await.unwrap();
    t.graph.undo().await.unwrap();
    assert_eq!(ranking.len(), 1);
    let criteria = ranking.sort_criteria();
    assert_eq!(criteria.len(), 1);
    assert_eq!(criteria[0].column, ranking.at(0).unwrap());
    assert!(!criteria[0].asc);
}

#[tokio::test]
async fn test_sort_criteria_round_trips() {
    let t = support::tracked().await;
    let ranking = t.provider.add_ranking();
    let score = Column::new(ColumnKind::Number, "Score");
    ranking.insert(score.clone(), 0);

    ranking.sort_by(Some(&score), false);
    assert_eq!(ranking.sort_criteria().len(), 1);

    t.graph.undo().await.unwrap();
    assert!(ranking.sort_criteria().is_empty());

    t.graph.redo().await.unwrap();
    let criteria = ranking.sort_criteria();
    assert_eq!(criteria.len(), 1);
    assert_eq!(criteria[0].column, score);
    assert!(!criteria[0].asc);
}

#[tokio::test]
async fn test_group_criteria_and_aggregation_round_trip() {
    let t = support::tracked().await;
    let ranking = t.provider.add_ranking();
    let cat = Column::new(ColumnKind::Categorical, "Tissue");
    ranking.insert(cat.clone(), 0);

    ranking.set_group_criteria(vec![cat.clone()]);
    ranking.set_aggregation(json!({ "topN": 10 }));

    t.graph.undo().await.unwrap();
    assert_eq!(ranking.aggregation(), json!(null));
    t.graph.undo().await.unwrap();
    assert!(ranking.group_criteria().is_empty());

    t.graph.redo().await.unwrap();
    t.graph.redo().await.unwrap();
    assert_eq!(ranking.group_criteria(), vec![cat]);
    assert_eq!(ranking.aggregation(), json!({ "topN": 10 }));
}

#[tokio::test]
async fn test_group_sort_criteria_round_trips() {
    let t = support::tracked().await;
    let ranking = t.provider.add_ranking();
    let score = Column::new(ColumnKind::Number, "Score");
    ranking.insert(score.clone(), 0);

    ranking.set_group_sort_criteria(vec![SortCriterion {
        column: score.clone(),
        asc: true,
    }]);
    t.graph.undo().await.unwrap();
    assert!(ranking.group_sort_criteria().is_empty());
    t.graph.redo().await.unwrap();
    assert_eq!(ranking.group_sort_criteria().len(), 1);
}

#[tokio::test]
async fn test_nested_composite_changes_round_trip() {
    let t = support::tracked().await;
    let ranking = t.provider.add_ranking();
    let stack = Column::new(ColumnKind::Composite, "Stack");
    ranking.insert(stack.clone(), 0);
    let child = Column::new(ColumnKind::Number, "Score");
    stack.insert_child(child.clone(), 0).unwrap();
    assert_eq!(stack.children().len(), 1);

    t.graph.undo().await.unwrap();
    assert!(stack.children().is_empty());

    t.graph.redo().await.unwrap();
    assert_eq!(stack.children().len(), 1);

    // the restored child is tracked again
    let restored = stack.child_at(0).unwrap();
    let before = t.graph.len();
    restored.set_width(170.0);
    assert_eq!(t.graph.len(), before + 1);
}

#[tokio::test]
async fn test_ranking_removal_round_trips() {
    let t = support::tracked().await;
    let ranking = t.provider.add_ranking();
    let col = Column::new(ColumnKind::Text, "Name");
    ranking.insert(col.clone(), 0);
    ranking.sort_by(Some(&col), true);

    t.provider.remove_ranking(&ranking);
    assert!(t.provider.rankings().is_empty());

    t.graph.undo().await.unwrap();
    let restored = t.provider.ranking_at(0).unwrap();
    assert_eq!(restored.id(), ranking.id());
    assert_eq!(restored.len(), 1);
    assert_eq!(restored.sort_criteria().len(), 1);

    // the restored ranking is live again: the fresh change is recorded
    // and, like any push, replaces the undone removal in the history
    let before = t.graph.len();
    restored.at(0).unwrap().set_width(200.0);
    assert_eq!(t.graph.len(), before);
    assert_eq!(t.graph.position(), before);
    assert!(matches!(t.graph.redo().await, Err(GraphError::NothingToRedo)));
}

#[tokio::test]
async fn test_replay_does_not_feed_back() {
    let t = support::tracked().await;
    let ranking = t.provider.add_ranking();
    let col = Column::new(ColumnKind::Text, "Name");
    ranking.insert(col.clone(), 0);
    col.set_meta_data(json!({ "unit": "kg" }));

    let len = t.graph.len();
    let position = t.graph.position();
    t.graph.undo().await.unwrap();
    t.graph.redo().await.unwrap();
    // replays move the position pointer, never append
    assert_eq!(t.graph.len(), len);
    assert_eq!(t.graph.position(), position);
}

#[tokio::test]
async fn test_jump_to_replays_whole_chain() {
    let t = support::tracked().await;
    let ranking = t.provider.add_ranking();
    let col = Column::new(ColumnKind::Number, "Score");
    ranking.insert(col.clone(), 0);
    col.set_width(150.0);
    ranking.sort_by(Some(&col), true);
    let len = t.graph.len();

    t.graph.jump_to(0).await.unwrap();
    assert!(t.provider.rankings().is_empty());

    t.graph.jump_to(len).await.unwrap();
    let ranking = t.provider.ranking_at(0).unwrap();
    assert_eq!(ranking.len(), 1);
    assert_eq!(ranking.at(0).unwrap().width(), 150.0);
    assert_eq!(ranking.sort_criteria().len(), 1);
}

#[tokio::test]
async fn test_single_sort_action_replays() {
    // histories written by older versions carry single-criterion sort
    // actions; pushing one by hand must apply and invert like any other
    let t = support::tracked().await;
    let ranking = t.provider.add_ranking();
    let score = Column::new(ColumnKind::Number, "Score");
    ranking.insert(score.clone(), 0);
    let path = ranking.fqpath(&score).unwrap();

    let action = Action::new(
        ActionMeta::new("Sort Ranking", ActionCategory::Layout, ActionOp::Update),
        CMD_SET_RANKING_SORT_CRITERIA,
        vec![t.manager.provider_ref().clone()],
        json!({ "rid": 0, "value": { "col": path, "asc": false } }),
    );
    let len = t.graph.len();
    t.graph.push(action).await.unwrap();
    assert_eq!(t.graph.len(), len + 1);
    let criteria = ranking.sort_criteria();
    assert_eq!(criteria.len(), 1);
    assert!(!criteria[0].asc);

    t.graph.undo().await.unwrap();
    assert!(ranking.sort_criteria().is_empty());
}

#[tokio::test]
async fn test_noop_setter_records_nothing() {
    let t = support::tracked().await;
    let ranking = t.provider.add_ranking();
    let col = Column::new(ColumnKind::Text, "Name");
    ranking.insert(col.clone(), 0);
    let before = t.graph.len();

    col.set_width(col.width());
    col.set_filter(None);
    ranking.set_aggregation(json!(null));
    assert_eq!(t.graph.len(), before);
}
