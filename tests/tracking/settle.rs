//! Replay completion is gated on the order recomputation settling

use ranktrack::{Column, ColumnFilter, ColumnKind};
use tokio_test::{assert_pending, assert_ready};

use crate::tracking::support;

#[tokio::test]
async fn test_undo_of_order_change_waits_for_settle() {
    let t = support::tracked_manual().await;
    let ranking = t.provider.add_ranking();
    let col = Column::new(ColumnKind::Text, "Name");
    ranking.insert(col.clone(), 0);
    col.set_filter(Some(ColumnFilter::text("a")));
    // drain the recomputation pending from setup
    ranking.settle();

    let mut undo = tokio_test::task::spawn(t.graph.undo());
    assert_pending!(undo.poll());

    // clearing the filter dirtied the order again; settling releases the undo
    ranking.settle();
    assert_ready!(undo.poll()).unwrap();
    assert_eq!(col.filter(), None);
}

#[tokio::test]
async fn test_undo_of_cosmetic_change_completes_immediately() {
    let t = support::tracked_manual().await;
    let ranking = t.provider.add_ranking();
    let col = Column::new(ColumnKind::Text, "Name");
    ranking.insert(col.clone(), 0);
    col.set_width(150.0);

    // width does not affect the order, so there is nothing to wait for
    let mut undo = tokio_test::task::spawn(t.graph.undo());
    assert_ready!(undo.poll()).unwrap();
    assert_eq!(col.width(), 100.0);
}

#[tokio::test]
async fn test_capture_never_waits_for_settle() {
    let t = support::tracked_manual().await;
    let ranking = t.provider.add_ranking();
    let col = Column::new(ColumnKind::Text, "Name");
    ranking.insert(col.clone(), 0);
    ranking.settle();
    let before = t.graph.len();

    // the order is left dirty here, yet the action is already recorded
    col.set_filter(Some(ColumnFilter::text("x")));
    assert_eq!(t.graph.len(), before + 1);
}

#[tokio::test]
async fn test_redo_waits_for_settle_too() {
    let t = support::tracked_manual().await;
    let ranking = t.provider.add_ranking();
    let col = Column::new(ColumnKind::Text, "Name");
    ranking.insert(col.clone(), 0);
    col.set_filter(Some(ColumnFilter::text("a")));
    ranking.settle();

    let mut undo = tokio_test::task::spawn(t.graph.undo());
    assert_pending!(undo.poll());
    ranking.settle();
    assert_ready!(undo.poll()).unwrap();
    drop(undo);

    let mut redo = tokio_test::task::spawn(t.graph.redo());
    assert_pending!(redo.poll());
    ranking.settle();
    assert_ready!(redo.poll()).unwrap();
    assert_eq!(col.filter(), Some(ColumnFilter::text("a")));
}
