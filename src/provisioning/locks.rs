use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

type LockMap = DashMap<Uuid, Arc<Mutex<()>>>;

/// key: tenant-locks -> one writer per tenant inside this process
#[derive(Clone, Default)]
pub struct TenantLocks {
    inner: Arc<LockMap>,
}

/// Held for the duration of a tenant operation. Dropping the last guard for a
/// tenant removes its map entry.
pub struct TenantGuard {
    guard: Option<OwnedMutexGuard<()>>,
    tenant_id: Uuid,
    locks: Arc<LockMap>,
}

impl Drop for TenantGuard {
    fn drop(&mut self) {
        self.guard.take();
        // The map itself holds one reference; anything above that is a waiter.
        self.locks
            .remove_if(&self.tenant_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl TenantLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, tenant_id: Uuid) -> Arc<Mutex<()>> {
        self.inner.entry(tenant_id).or_default().value().clone()
    }

    fn wrap(&self, tenant_id: Uuid, guard: OwnedMutexGuard<()>) -> TenantGuard {
        TenantGuard {
            guard: Some(guard),
            tenant_id,
            locks: self.inner.clone(),
        }
    }

    pub async fn acquire(&self, tenant_id: Uuid) -> TenantGuard {
        let guard = self.lock_for(tenant_id).lock_owned().await;
        self.wrap(tenant_id, guard)
    }

    /// Non-blocking variant used by the sweep so it never queues behind a
    /// long-running request for the same tenant.
    pub fn try_acquire(&self, tenant_id: Uuid) -> Option<TenantGuard> {
        let lock = self.lock_for(tenant_id);
        match lock.try_lock_owned() {
            Ok(guard) => Some(self.wrap(tenant_id, guard)),
            Err(_) => {
                self.inner
                    .remove_if(&tenant_id, |_, lock| Arc::strong_count(lock) == 1);
                None
            }
        }
    }

    /// Tenants with a held or awaited lock.
    pub fn tracked(&self) -> usize {
        self.inner.len()
    }
}
