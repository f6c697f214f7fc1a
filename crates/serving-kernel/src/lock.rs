use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Reader/writer lock shared by lifecycle mutations (shared) and the
/// reconciler's per-page snapshot scan (exclusive). Not reentrant: take it
/// once per top-level operation.
#[derive(Clone, Default)]
pub struct CoordinationLock {
    inner: Arc<RwLock<()>>,
}

impl CoordinationLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mutation(&self) -> RwLockReadGuard<'_, ()> {
        self.inner.read()
    }

    pub fn snapshot(&self) -> RwLockWriteGuard<'_, ()> {
        self.inner.write()
    }
}
