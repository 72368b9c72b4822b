//! Live-preview dialog buffering: net-diff commits, cancels, force-close

use ranktrack::{Column, ColumnFilter, ColumnKind};
use serde_json::json;

use crate::tracking::support;

#[tokio::test]
async fn test_confirmed_dialog_commits_net_change_once() {
    let t = support::tracked().await;
    let ranking = t.provider.add_ranking();
    let col = Column::new(ColumnKind::Text, "Name");
    ranking.insert(col.clone(), 0);
    let before = t.graph.len();

    t.provider.open_dialog();
    for pattern in ["a", "ab", "abc"] {
        col.set_filter(Some(ColumnFilter::text(pattern)));
    }
    assert_eq!(t.graph.len(), before, "preview ticks must not be recorded");

    t.provider.close_dialog(true);
    assert_eq!(t.graph.len(), before + 1);

    // the single action inverts to the pre-dialog state, not "ab"
    t.graph.undo().await.unwrap();
    assert_eq!(col.filter(), None);
    t.graph.redo().await.unwrap();
    assert_eq!(col.filter(), Some(ColumnFilter::text("abc")));
}

#[tokio::test]
async fn test_cancelled_dialog_records_nothing() {
    let t = support::tracked().await;
    let ranking = t.provider.add_ranking();
    let col = Column::new(ColumnKind::Text, "Name");
    ranking.insert(col.clone(), 0);
    let before = t.graph.len();

    t.provider.open_dialog();
    col.set_width(180.0);
    col.set_filter(Some(ColumnFilter::text("x")));
    t.provider.close_dialog(false);

    assert_eq!(t.graph.len(), before);
}

#[tokio::test]
async fn test_net_zero_dialog_records_nothing() {
    let t = support::tracked().await;
    let ranking = t.provider.add_ranking();
    let col = Column::new(ColumnKind::Text, "Name");
    ranking.insert(col.clone(), 0);
    let before = t.graph.len();

    t.provider.open_dialog();
    col.set_width(180.0);
    col.set_width(100.0);
    t.provider.close_dialog(true);

    assert_eq!(t.graph.len(), before, "a change undone within the dialog is a no-op");
}

#[tokio::test]
async fn test_distinct_properties_commit_separately() {
    let t = support::tracked().await;
    let ranking = t.provider.add_ranking();
    let col = Column::new(ColumnKind::Text, "Name");
    ranking.insert(col.clone(), 0);
    let before = t.graph.len();

    t.provider.open_dialog();
    col.set_width(180.0);
    col.set_meta_data(json!({ "unit": "kg" }));
    t.provider.close_dialog(true);

    assert_eq!(t.graph.len(), before + 2);
}

#[tokio::test]
async fn test_history_activity_force_cancels_open_dialog() {
    let t = support::tracked().await;
    let ranking = t.provider.add_ranking();
    let col = Column::new(ColumnKind::Text, "Name");
    ranking.insert(col.clone(), 0);
    col.set_width(150.0);
    let before = t.graph.len();

    t.provider.open_dialog();
    col.set_width(180.0);

    // undo arrives while the dialog previews: the dialog loses
    t.graph.undo().await.unwrap();
    assert!(!t.provider.dialog_open());
    assert_eq!(col.width(), 100.0);
    assert_eq!(t.graph.len(), before);

    // a confirm for the dead dialog must not resurrect the buffer
    t.provider.close_dialog(true);
    assert_eq!(t.graph.len(), before);
}

#[tokio::test]
async fn test_second_dialog_cancels_first_buffer() {
    let t = support::tracked().await;
    let ranking = t.provider.add_ranking();
    let col = Column::new(ColumnKind::Text, "Name");
    ranking.insert(col.clone(), 0);
    let before = t.graph.len();

    t.provider.open_dialog();
    col.set_width(180.0);
    // opening another dialog force-cancels the first one
    t.provider.open_dialog();
    col.set_meta_data(json!({ "unit": "kg" }));
    t.provider.close_dialog(true);

    // only the second dialog's change survives
    assert_eq!(t.graph.len(), before + 1);
    let actions = t.graph.actions();
    assert_eq!(actions[actions.len() - 1].parameter["prop"], json!("metaData"));
}
