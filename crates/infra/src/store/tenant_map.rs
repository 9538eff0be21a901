use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use imobcrm_core::TenantId;

/// Tenant-isolated key/value map backing the in-memory repositories.
///
/// Keys are always paired with the owning tenant, so a lookup with another
/// tenant's id can never reach the row.
#[derive(Debug)]
pub struct TenantMap<K, V> {
    inner: RwLock<HashMap<(TenantId, K), V>>,
}

impl<K, V> Default for TenantMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TenantMap<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, HashMap<(TenantId, K), V>> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, HashMap<(TenantId, K), V>> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<K, V> TenantMap<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        self.read().get(&(tenant_id, key.clone())).cloned()
    }

    pub fn contains(&self, tenant_id: TenantId, key: &K) -> bool {
        self.read().contains_key(&(tenant_id, key.clone()))
    }

    /// Insert or replace; returns the previous value.
    pub fn upsert(&self, tenant_id: TenantId, key: K, value: V) -> Option<V> {
        self.write().insert((tenant_id, key), value)
    }

    /// Replace an existing value; returns `false` if the key is absent.
    pub fn replace(&self, tenant_id: TenantId, key: K, value: V) -> bool {
        match self.write().get_mut(&(tenant_id, key)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Mutate an existing value in place; `None` if the key is absent.
    pub fn modify<R>(&self, tenant_id: TenantId, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        self.write().get_mut(&(tenant_id, key.clone())).map(f)
    }

    pub fn remove(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        self.write().remove(&(tenant_id, key.clone()))
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<V> {
        self.read()
            .iter()
            .filter_map(|((t, _), v)| (*t == tenant_id).then(|| v.clone()))
            .collect()
    }

    pub fn count(&self, tenant_id: TenantId) -> u64 {
        self.read().keys().filter(|(t, _)| *t == tenant_id).count() as u64
    }

    /// Every value across tenants matching `pred`.
    pub fn scan<F>(&self, mut pred: F) -> Vec<V>
    where
        F: FnMut(&V) -> bool,
    {
        self.read().values().filter(|v| pred(v)).cloned().collect()
    }

    pub fn clear_tenant(&self, tenant_id: TenantId) {
        self.write().retain(|(t, _), _| *t != tenant_id);
    }
}
