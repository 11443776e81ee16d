//! Tenant data isolation
//!
//! [`TenantIsolationEnforcer`] is the only way to build the filter and payload
//! types an [`EntityStore`] accepts. Both constructors are private to this
//! module, so a tenant-scoped model cannot reach storage without the tenant
//! clause applied.

use crate::model::{TenantContext, TenantId};
use crate::store::{StoreError, StoreResult};
use async_trait::async_trait;
use gate_common::{GateError, GateResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A stored entity
pub type Record = serde_json::Map<String, Value>;

/// Default column carrying the tenant reference
pub const DEFAULT_TENANT_FIELD: &str = "tenant_id";

/// Data access intent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// How a model relates to tenants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelScope {
    /// Rows carry a tenant reference in `field`
    Tenant { field: String },
    /// Shared across tenants (plans, reference data)
    Global,
}

/// Per-model scoping rules. Models not registered are tenant-scoped on
/// [`DEFAULT_TENANT_FIELD`]; global models must be declared.
#[derive(Debug, Clone, Default)]
pub struct IsolationPolicy {
    models: HashMap<String, ModelScope>,
}

impl IsolationPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a model shared by all tenants
    pub fn global(mut self, model: &str) -> Self {
        self.models.insert(model.to_string(), ModelScope::Global);
        self
    }

    /// Scope a model on a non-default tenant column
    pub fn scoped_on(mut self, model: &str, field: &str) -> Self {
        self.models.insert(
            model.to_string(),
            ModelScope::Tenant { field: field.to_string() },
        );
        self
    }

    pub fn scope_of(&self, model: &str) -> ModelScope {
        self.models.get(model).cloned().unwrap_or_else(|| ModelScope::Tenant {
            field: DEFAULT_TENANT_FIELD.to_string(),
        })
    }
}

/// Read filter that has passed through the enforcer
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedFilter {
    model: String,
    tenant_id: Option<TenantId>,
    clauses: Record,
}

impl ScopedFilter {
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Owning tenant; `None` only for global models
    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    /// Equality clauses, tenant clause included
    pub fn clauses(&self) -> &Record {
        &self.clauses
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.clauses
            .iter()
            .all(|(field, expected)| record.get(field) == Some(expected))
    }
}

/// Write payload that has passed through the enforcer
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedPayload {
    model: String,
    tenant_id: Option<TenantId>,
    record: Record,
}

impl ScopedPayload {
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn into_record(self) -> Record {
        self.record
    }
}

/// Persistence collaborator for tenant data
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn find(&self, filter: &ScopedFilter) -> StoreResult<Vec<Record>>;

    /// Insert and return the stored record
    async fn insert(&self, payload: ScopedPayload) -> StoreResult<Record>;

    /// Merge `changes` into matching records; returns the number updated
    async fn update(&self, filter: &ScopedFilter, changes: ScopedPayload) -> StoreResult<u64>;

    /// Returns the number deleted
    async fn delete(&self, filter: &ScopedFilter) -> StoreResult<u64>;

    async fn exists(&self, filter: &ScopedFilter) -> StoreResult<bool> {
        Ok(!self.find(filter).await?.is_empty())
    }
}

/// Scoping enforcer
pub struct TenantIsolationEnforcer {
    store: Arc<dyn EntityStore>,
    policy: IsolationPolicy,
}

impl TenantIsolationEnforcer {
    pub fn new(store: Arc<dyn EntityStore>, policy: IsolationPolicy) -> Self {
        Self { store, policy }
    }

    /// Data access handle bound to one tenant
    pub fn scope(&self, tenant: &TenantContext) -> TenantScope<'_> {
        self.scope_for(tenant.tenant_id)
    }

    pub fn scope_for(&self, tenant_id: TenantId) -> TenantScope<'_> {
        TenantScope { enforcer: self, tenant_id }
    }

    pub fn policy(&self) -> &IsolationPolicy {
        &self.policy
    }
}

/// All storage access for one tenant
pub struct TenantScope<'a> {
    enforcer: &'a TenantIsolationEnforcer,
    tenant_id: TenantId,
}

impl<'a> TenantScope<'a> {
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Build the tenant-scoped form of a read filter
    pub fn scoped_filter(&self, model: &str, filter: Record) -> GateResult<ScopedFilter> {
        let (tenant_id, clauses) = self.inject(model, Operation::Read, filter)?;
        Ok(ScopedFilter {
            model: model.to_string(),
            tenant_id,
            clauses,
        })
    }

    fn scoped_payload(&self, model: &str, op: Operation, record: Record) -> GateResult<ScopedPayload> {
        let (tenant_id, record) = self.inject(model, op, record)?;
        Ok(ScopedPayload {
            model: model.to_string(),
            tenant_id,
            record,
        })
    }

    pub async fn find(&self, model: &str, filter: Record) -> GateResult<Vec<Record>> {
        let filter = self.scoped_filter(model, filter)?;
        self.enforcer.store.find(&filter).await.map_err(unavailable)
    }

    pub async fn create(&self, model: &str, payload: Record) -> GateResult<Record> {
        let payload = self.scoped_payload(model, Operation::Create, payload)?;
        self.enforcer.store.insert(payload).await.map_err(unavailable)
    }

    pub async fn update(&self, model: &str, filter: Record, changes: Record) -> GateResult<u64> {
        let filter = self.scoped_filter(model, filter)?;
        let changes = self.scoped_payload(model, Operation::Update, changes)?;
        self.enforcer.store.update(&filter, changes).await.map_err(unavailable)
    }

    pub async fn delete(&self, model: &str, filter: Record) -> GateResult<u64> {
        let filter = self.scoped_filter(model, filter)?;
        self.enforcer.store.delete(&filter).await.map_err(unavailable)
    }

    /// Scoped existence check for entity `id`
    pub async fn belongs_to(&self, model: &str, id: &str) -> GateResult<bool> {
        let mut filter = Record::new();
        filter.insert("id".to_string(), Value::String(id.to_string()));
        let filter = self.scoped_filter(model, filter)?;
        self.enforcer.store.exists(&filter).await.map_err(unavailable)
    }

    /// Existence check that rejects foreign (or missing) entities
    pub async fn ensure_owned(&self, model: &str, id: &str) -> GateResult<()> {
        if self.belongs_to(model, id).await? {
            Ok(())
        } else {
            debug!(tenant_id = %self.tenant_id, model, id, "entity not owned by tenant");
            Err(GateError::ForbiddenCrossTenantAccess { model: model.to_string() })
        }
    }

    /// Pin the tenant clause into `record`
    fn inject(&self, model: &str, op: Operation, mut record: Record) -> GateResult<(Option<TenantId>, Record)> {
        let field = match self.enforcer.policy.scope_of(model) {
            ModelScope::Global => return Ok((None, record)),
            ModelScope::Tenant { field } => field,
        };

        let own = Value::String(self.tenant_id.to_string());
        if let Some(existing) = record.get(&field) {
            if *existing != own {
                warn!(
                    tenant_id = %self.tenant_id,
                    model,
                    operation = op.as_str(),
                    requested = %existing,
                    "cross-tenant access attempt"
                );
                return Err(GateError::ForbiddenCrossTenantAccess { model: model.to_string() });
            }
        }
        record.insert(field, own);
        Ok((Some(self.tenant_id), record))
    }
}

fn unavailable(err: StoreError) -> GateError {
    GateError::StoreUnavailable(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_store::InMemoryEntityStore;
    use crate::model::TenantTier;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn setup() -> (Arc<InMemoryEntityStore>, TenantIsolationEnforcer, TenantContext, TenantContext) {
        let store = Arc::new(InMemoryEntityStore::new());
        let enforcer = TenantIsolationEnforcer::new(
            store.clone(),
            IsolationPolicy::new().global("plan").scoped_on("order", "owner_tenant"),
        );
        let acme = TenantContext::new("Acme", TenantTier::Pro);
        let globex = TenantContext::new("Globex", TenantTier::Pro);
        (store, enforcer, acme, globex)
    }

    #[tokio::test]
    async fn test_reads_are_scoped() {
        let (store, enforcer, acme, globex) = setup();
        store.insert_raw("listing", record(json!({"id": "l1", "tenant_id": acme.tenant_id.to_string(), "city": "Oslo"})));
        store.insert_raw("listing", record(json!({"id": "l2", "tenant_id": globex.tenant_id.to_string(), "city": "Oslo"})));

        let rows = enforcer
            .scope(&acme)
            .find("listing", record(json!({"city": "Oslo"})))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], "l1");
    }

    #[tokio::test]
    async fn test_writes_get_tenant_injected() {
        let (_, enforcer, acme, _) = setup();
        let scope = enforcer.scope(&acme);

        let created = scope
            .create("order", record(json!({"total": 42})))
            .await
            .unwrap();
        assert_eq!(created["owner_tenant"], acme.tenant_id.to_string());
        assert!(created.contains_key("id"));
    }

    #[tokio::test]
    async fn test_conflicting_tenant_field_rejected() {
        let (_, enforcer, acme, globex) = setup();
        let scope = enforcer.scope(&acme);

        let err = scope
            .find("listing", record(json!({"tenant_id": globex.tenant_id.to_string()})))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::ForbiddenCrossTenantAccess { .. }));

        let err = scope
            .create("listing", record(json!({"tenant_id": globex.tenant_id.to_string()})))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_cross_tenant_update_and_delete_touch_nothing() {
        let (store, enforcer, acme, globex) = setup();
        store.insert_raw("listing", record(json!({"id": "l1", "tenant_id": acme.tenant_id.to_string(), "title": "Cafe"})));

        let foreign = enforcer.scope(&globex);
        let updated = foreign
            .update("listing", record(json!({"id": "l1"})), record(json!({"title": "Hijacked"})))
            .await
            .unwrap();
        assert_eq!(updated, 0);
        assert_eq!(foreign.delete("listing", record(json!({"id": "l1"}))).await.unwrap(), 0);

        let own = enforcer.scope(&acme);
        let rows = own.find("listing", record(json!({"id": "l1"}))).await.unwrap();
        assert_eq!(rows[0]["title"], "Cafe");
    }

    #[tokio::test]
    async fn test_ensure_owned_hides_existence() {
        let (store, enforcer, acme, globex) = setup();
        store.insert_raw("order", record(json!({"id": "o1", "owner_tenant": acme.tenant_id.to_string()})));

        assert!(enforcer.scope(&acme).ensure_owned("order", "o1").await.is_ok());

        let foreign = enforcer.scope(&globex).ensure_owned("order", "o1").await.unwrap_err();
        let missing = enforcer.scope(&globex).ensure_owned("order", "o404").await.unwrap_err();
        assert_eq!(foreign, missing);
        assert_eq!(foreign.to_string(), "resource not found");
    }

    #[tokio::test]
    async fn test_global_models_unscoped() {
        let (store, enforcer, acme, _) = setup();
        store.insert_raw("plan", record(json!({"id": "pro"})));

        let filter = enforcer.scope(&acme).scoped_filter("plan", Record::new()).unwrap();
        assert_eq!(filter.tenant_id(), None);
        assert_eq!(enforcer.scope(&acme).find("plan", Record::new()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_outage_maps_to_unavailable() {
        let (store, enforcer, acme, _) = setup();
        store.set_available(false);
        let err = enforcer.scope(&acme).find("listing", Record::new()).await.unwrap_err();
        assert!(matches!(err, GateError::StoreUnavailable(_)));
        assert!(!err.is_operational());
    }
}
