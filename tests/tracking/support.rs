//! Shared setup for the tracking integration tests

use std::sync::Arc;

use ranktrack::{DataProvider, ObjectRef, ProvenanceGraph, TrackingManager};

pub struct Tracked {
    pub manager: Arc<TrackingManager>,
    pub provider: DataProvider,
    pub graph: ProvenanceGraph<DataProvider>,
}

/// A tracked provider whose rankings settle automatically on the runtime.
pub async fn tracked() -> Tracked {
    tracked_with(DataProvider::new()).await
}

/// A tracked provider whose rankings settle only when tests say so.
pub async fn tracked_manual() -> Tracked {
    tracked_with(DataProvider::with_manual_settle()).await
}

async fn tracked_with(provider: DataProvider) -> Tracked {
    let graph = ProvenanceGraph::new();
    let manager = TrackingManager::attach(
        graph.clone(),
        ObjectRef::resolved("ranking-view", provider.clone()),
    )
    .await
    .expect("attaching tracking");
    Tracked {
        manager,
        provider,
        graph,
    }
}
