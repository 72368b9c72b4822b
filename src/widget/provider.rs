//! The ranking collection: the tracked widget's top-level object

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::widget::column::{Column, ColumnDump, ColumnError};
use crate::widget::events::{
    EventArgs, EventEmitter, EVENT_ADD_RANKING, EVENT_DIALOG_CLOSED, EVENT_DIALOG_OPENED,
    EVENT_REMOVE_RANKING,
};
use crate::widget::ranking::{Ranking, RankingDump};

struct ProviderInner {
    events: EventEmitter,
    rankings: Mutex<Vec<Ranking>>,
    auto_settle: bool,
    dialog_open: AtomicBool,
}

/// Handle to the widget's data provider; clones share state.
#[derive(Clone)]
pub struct DataProvider {
    inner: Arc<ProviderInner>,
}

impl fmt::Debug for DataProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataProvider")
            .field("rankings", &self.inner.rankings.lock().len())
            .finish()
    }
}

impl Default for DataProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DataProvider {
    pub fn new() -> Self {
        Self::with_auto_settle(true)
    }

    /// A provider whose rankings settle only when [`Ranking::settle`] is
    /// called explicitly; used by tests that control recomputation timing.
    pub fn with_manual_settle() -> Self {
        Self::with_auto_settle(false)
    }

    fn with_auto_settle(auto_settle: bool) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                events: EventEmitter::new(),
                rankings: Mutex::new(Vec::new()),
                auto_settle,
                dialog_open: AtomicBool::new(false),
            }),
        }
    }

    pub fn events(&self) -> &EventEmitter {
        &self.inner.events
    }

    // -- rankings ----------------------------------------------------------

    pub fn rankings(&self) -> Vec<Ranking> {
        self.inner.rankings.lock().clone()
    }

    pub fn ranking_at(&self, index: usize) -> Option<Ranking> {
        self.inner.rankings.lock().get(index).cloned()
    }

    pub fn ranking_index_of(&self, ranking: &Ranking) -> Option<usize> {
        self.inner.rankings.lock().iter().position(|r| r == ranking)
    }

    /// Ranking containing `column`, with its index in the collection.
    pub fn ranker_of(&self, column: &Column) -> Option<(usize, Ranking)> {
        self.inner
            .rankings
            .lock()
            .iter()
            .enumerate()
            .find(|(_, r)| r.fqpath(column).is_some())
            .map(|(i, r)| (i, r.clone()))
    }

    pub fn insert_ranking(&self, ranking: Ranking, index: usize) {
        ranking.set_auto_settle(self.inner.auto_settle);
        let index = {
            let mut rankings = self.inner.rankings.lock();
            let index = index.min(rankings.len());
            rankings.insert(index, ranking.clone());
            index
        };
        self.inner.events.fire(
            EVENT_ADD_RANKING,
            &EventArgs::Ranking {
                ranking: ranking.clone(),
                index,
            },
        );
        // a fresh ranking needs an initial order
        ranking.mark_dirty_order();
    }

    /// Append a new empty ranking.
    pub fn add_ranking(&self) -> Ranking {
        let ranking = Ranking::new();
        let index = self.inner.rankings.lock().len();
        self.insert_ranking(ranking.clone(), index);
        ranking
    }

    pub fn remove_ranking(&self, ranking: &Ranking) -> Option<usize> {
        let index = {
            let mut rankings = self.inner.rankings.lock();
            let index = rankings.iter().position(|r| r == ranking)?;
            rankings.remove(index);
            index
        };
        self.inner.events.fire(
            EVENT_REMOVE_RANKING,
            &EventArgs::Ranking {
                ranking: ranking.clone(),
                index,
            },
        );
        Some(index)
    }

    pub fn restore_ranking(&self, dump: RankingDump) -> Result<Ranking, ColumnError> {
        let ranking = Ranking::restore(dump)?;
        ranking.set_auto_settle(self.inner.auto_settle);
        Ok(ranking)
    }

    pub fn dump_column(&self, column: &Column) -> ColumnDump {
        column.dump()
    }

    pub fn restore_column(&self, dump: ColumnDump) -> Result<Column, ColumnError> {
        Column::restore(dump)
    }

    // -- modal dialog signals ----------------------------------------------

    pub fn dialog_open(&self) -> bool {
        self.inner.dialog_open.load(Ordering::SeqCst)
    }

    /// Signal that a live-preview dialog opened.
    ///
    /// Only one dialog is open at a time; opening a second force-cancels
    /// the first.
    pub fn open_dialog(&self) {
        if self.inner.dialog_open.swap(true, Ordering::SeqCst) {
            self.inner
                .events
                .fire(EVENT_DIALOG_CLOSED, &EventArgs::Dialog { confirmed: false });
        }
        self.inner.events.fire(EVENT_DIALOG_OPENED, &EventArgs::None);
    }

    /// Signal that the open dialog closed, confirmed or cancelled.
    pub fn close_dialog(&self, confirmed: bool) {
        if self.inner.dialog_open.swap(false, Ordering::SeqCst) {
            self.inner
                .events
                .fire(EVENT_DIALOG_CLOSED, &EventArgs::Dialog { confirmed });
        }
    }
}
