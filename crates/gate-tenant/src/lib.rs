//! Gate Tenant - tenant resolution and data isolation
//!
//! ```text
//!   host + path
//!        │
//!  ┌─────▼──────────────────────────────────────────────┐
//!  │ TenantResolver                                     │
//!  │   custom domain → subdomain → /tenant/<id> → fallback
//!  │        │ hit                    │ miss             │
//!  │  ┌─────▼──────┐          ┌──────▼──────┐           │
//!  │  │ContextCache│◄─ write ─┤ TenantStore │ (timeout) │
//!  │  └────────────┘          └─────────────┘           │
//!  └─────┬──────────────────────────────────────────────┘
//!        │ Arc<TenantContext>
//!  ┌─────▼──────────────────────────────────────────────┐
//!  │ TenantIsolationEnforcer → TenantScope → EntityStore │
//!  │   tenant clause injected into every filter/payload  │
//!  └────────────────────────────────────────────────────┘
//! ```

#![warn(clippy::all)]

pub mod cache;
pub mod entity_store;
pub mod isolation;
pub mod model;
pub mod resolver;
pub mod store;

pub use cache::{CacheConfig, CacheKey, CacheStats, Cached, ContextCache, TenantCache};
pub use entity_store::InMemoryEntityStore;
pub use isolation::{
    EntityStore, IsolationPolicy, ModelScope, Operation, Record, ScopedFilter, ScopedPayload,
    TenantIsolationEnforcer, TenantScope,
};
pub use model::{SecurityPolicy, TenantContext, TenantId, TenantStatus, TenantTier, UsageLimits};
pub use resolver::{FallbackPolicy, Resolution, ResolverConfig, Strategy, TenantResolver};
pub use store::{InMemoryTenantStore, StoreError, StoreResult, TenantStore};
