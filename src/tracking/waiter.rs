//! One-shot bridge from the order recomputation signal pair to a future
//!
//! A command that may change the computed order installs a waiter before
//! mutating the widget and awaits it afterwards. If the mutation marked the
//! order dirty, the waiter resolves on the following `orderChanged`; if the
//! order never went dirty (a no-op mutation) it resolves immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::widget::events::{EVENT_DIRTY_ORDER, EVENT_ORDER_CHANGED};
use crate::widget::Ranking;

/// Subscription namespace; one waiter per ranking at a time.
const NS_WAITER: &str = "track-waiter";

pub struct OrderWaiter {
    ranking: Ranking,
    armed: Arc<AtomicBool>,
    rx: oneshot::Receiver<()>,
}

impl OrderWaiter {
    /// Install the waiter; must happen before the mutation it observes.
    pub fn install(ranking: &Ranking) -> Self {
        let (tx, rx) = oneshot::channel();
        let armed = Arc::new(AtomicBool::new(false));
        let tx_slot = Arc::new(Mutex::new(Some(tx)));

        let events = ranking.events();
        let armed_dirty = armed.clone();
        let dirty_ranking = ranking.clone();
        events.on(
            EVENT_DIRTY_ORDER,
            NS_WAITER,
            Arc::new(move |_| {
                armed_dirty.store(true, Ordering::SeqCst);
                let events = dirty_ranking.events();
                events.off(EVENT_DIRTY_ORDER, NS_WAITER);
                let tx_slot = tx_slot.clone();
                let changed_ranking = dirty_ranking.clone();
                events.on(
                    EVENT_ORDER_CHANGED,
                    NS_WAITER,
                    Arc::new(move |_| {
                        changed_ranking.events().off(EVENT_ORDER_CHANGED, NS_WAITER);
                        if let Some(tx) = tx_slot.lock().take() {
                            let _ = tx.send(());
                        }
                    }),
                );
            }),
        );

        Self {
            ranking: ranking.clone(),
            armed,
            rx,
        }
    }

    /// Wait for the order to settle, or return right away if it never went
    /// dirty since [`OrderWaiter::install`].
    pub async fn finish(self) {
        self.ranking.events().off(EVENT_DIRTY_ORDER, NS_WAITER);
        if self.armed.load(Ordering::SeqCst) {
            let _ = self.rx.await;
        }
    }
}
