//! Asynchronously resolvable references to live tracked instances
//!
//! Recorded actions never hold a direct pointer to the widget they mutate.
//! They hold an [`ObjectRef`] whose `resolve()` yields whichever live instance
//! the reference currently designates, so a history can be replayed against a
//! widget that was rebuilt after a reload or session restore.

use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RefError {
    #[error("object reference '{0}' can no longer be resolved")]
    Unresolvable(String),
}

/// Handle to a live instance of `T`.
///
/// Clones share the same resolution slot and the same `hash`, so guard state
/// keyed by hash treats all clones as one tracked instance.
#[derive(Debug)]
pub struct ObjectRef<T> {
    id: String,
    hash: String,
    cell: watch::Receiver<Option<T>>,
}

// not derived: the receiver clones for any T and actions must stay
// cloneable without bounding the tracked type
impl<T> Clone for ObjectRef<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            hash: self.hash.clone(),
            cell: self.cell.clone(),
        }
    }
}

/// Write side of a pending [`ObjectRef`].
///
/// Dropping the resolver without calling [`RefResolver::fulfill`] makes every
/// pending and future `resolve()` fail with [`RefError::Unresolvable`].
#[derive(Debug)]
pub struct RefResolver<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T> RefResolver<T> {
    /// Provide the live instance this reference designates.
    pub fn fulfill(self, value: T) {
        let _ = self.tx.send(Some(value));
    }
}

impl<T> ObjectRef<T> {
    /// Create a reference whose instance is constructed later.
    pub fn pending(id: impl Into<String>) -> (Self, RefResolver<T>) {
        let (tx, rx) = watch::channel(None);
        (Self::from_parts(id.into(), rx), RefResolver { tx })
    }

    fn from_parts(id: String, cell: watch::Receiver<Option<T>>) -> Self {
        let hash = format!("{}-{}", id, Uuid::new_v4().simple());
        Self { id, hash, cell }
    }

    /// Stable identifier of the referenced object within a session.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Session-unique key used for guard bookkeeping.
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl<T: Clone> ObjectRef<T> {
    /// Create a reference that already designates a live instance.
    pub fn resolved(id: impl Into<String>, value: T) -> Self {
        // the watch still serves its last value after the sender is dropped
        let (_tx, rx) = watch::channel(Some(value));
        Self::from_parts(id.into(), rx)
    }

    /// Resolve to the live instance, waiting for lazy construction.
    ///
    /// Fails once, without retrying, when the resolver side was dropped
    /// before an instance was supplied.
    pub async fn resolve(&self) -> Result<T, RefError> {
        let mut rx = self.cell.clone();
        let guard = rx
            .wait_for(|slot| slot.is_some())
            .await
            .map_err(|_| RefError::Unresolvable(self.id.clone()))?;
        guard
            .as_ref()
            .cloned()
            .ok_or_else(|| RefError::Unresolvable(self.id.clone()))
    }
}
