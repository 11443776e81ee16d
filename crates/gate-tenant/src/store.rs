//! Tenant store - the backing source of tenant records

use crate::model::{TenantContext, TenantId};
use async_trait::async_trait;
use gate_common::AtomicCounter;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Store errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("tenant store unavailable: {0}")]
    Unavailable(String),

    #[error("tenant store lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// Store result type
pub type StoreResult<T> = Result<T, StoreError>;

/// Read access to persisted tenants
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Tenant owning an exact custom domain
    async fn find_by_domain(&self, domain: &str) -> StoreResult<Option<TenantContext>>;

    /// Tenant registered under a subdomain label
    async fn find_by_subdomain(&self, label: &str) -> StoreResult<Option<TenantContext>>;

    /// Tenant by id
    async fn find_by_id(&self, id: &TenantId) -> StoreResult<Option<TenantContext>>;
}

/// In-memory tenant store (for testing and development)
pub struct InMemoryTenantStore {
    tenants: RwLock<HashMap<TenantId, TenantContext>>,
    lookups: AtomicCounter,
    available: AtomicBool,
    latency: RwLock<Option<Duration>>,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
            lookups: AtomicCounter::new(0),
            available: AtomicBool::new(true),
            latency: RwLock::new(None),
        }
    }

    /// Insert or replace a tenant
    pub fn upsert(&self, tenant: TenantContext) {
        self.tenants.write().insert(tenant.tenant_id, tenant);
    }

    /// Remove a tenant
    pub fn remove(&self, id: &TenantId) -> Option<TenantContext> {
        self.tenants.write().remove(id)
    }

    /// Number of lookups served (hits and misses)
    pub fn lookups(&self) -> u64 {
        self.lookups.get()
    }

    /// Simulate an outage
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Simulate a slow backend
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    async fn begin(&self) -> StoreResult<()> {
        self.lookups.inc();
        let latency = *self.latency.read();
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store offline".into()))
        }
    }

    fn find(&self, pred: impl Fn(&TenantContext) -> bool) -> Option<TenantContext> {
        self.tenants.read().values().find(|t| pred(*t)).cloned()
    }
}

impl Default for InMemoryTenantStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn find_by_domain(&self, domain: &str) -> StoreResult<Option<TenantContext>> {
        self.begin().await?;
        Ok(self.find(|t| t.domain.as_deref() == Some(domain)))
    }

    async fn find_by_subdomain(&self, label: &str) -> StoreResult<Option<TenantContext>> {
        self.begin().await?;
        Ok(self.find(|t| t.subdomain.as_deref() == Some(label)))
    }

    async fn find_by_id(&self, id: &TenantId) -> StoreResult<Option<TenantContext>> {
        self.begin().await?;
        Ok(self.tenants.read().get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TenantTier;

    #[tokio::test]
    async fn test_lookup_by_each_key() {
        let store = InMemoryTenantStore::new();
        let tenant = TenantContext::new("Acme", TenantTier::Free)
            .with_domain("acme.com")
            .with_subdomain("acme");
        store.upsert(tenant.clone());

        assert_eq!(store.find_by_domain("acme.com").await.unwrap(), Some(tenant.clone()));
        assert_eq!(store.find_by_subdomain("acme").await.unwrap(), Some(tenant.clone()));
        assert_eq!(store.find_by_id(&tenant.tenant_id).await.unwrap(), Some(tenant));
        assert_eq!(store.find_by_domain("other.com").await.unwrap(), None);
        assert_eq!(store.lookups(), 4);
    }

    #[tokio::test]
    async fn test_outage() {
        let store = InMemoryTenantStore::new();
        store.set_available(false);
        assert!(matches!(
            store.find_by_subdomain("acme").await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
