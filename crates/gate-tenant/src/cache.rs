//! Tenant context cache
//!
//! TTL cache in front of the tenant store. Each resolved context is stored
//! under its domain, subdomain and id keys. Store misses are remembered as
//! absent keys for the same TTL so a lower-precedence hit is only accepted
//! once every higher-precedence key is known to be empty. Freshness is judged
//! against the injected [`Clock`]; entries past their TTL are only reachable
//! through the explicit stale read used when the store is down, and are
//! evicted once they fall outside that staleness bound.

use crate::model::{TenantContext, TenantId};
use chrono::{DateTime, Utc};
use gate_common::clock::to_chrono;
use gate_common::{AtomicCounter, Clock, GateResult};
use moka::sync::Cache;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default TTL for resolved contexts
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Cache key, one per resolution strategy
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Domain(String),
    Subdomain(String),
    Id(TenantId),
}

impl CacheKey {
    /// All keys a tenant is reachable under
    pub fn for_tenant(tenant: &TenantContext) -> Vec<CacheKey> {
        Self::for_identity(tenant.tenant_id, tenant.domain.as_deref(), tenant.subdomain.as_deref())
    }

    /// Keys for an identity triple
    pub fn for_identity(id: TenantId, domain: Option<&str>, subdomain: Option<&str>) -> Vec<CacheKey> {
        let mut keys = vec![CacheKey::Id(id)];
        if let Some(domain) = domain {
            keys.push(CacheKey::Domain(domain.to_string()));
        }
        if let Some(label) = subdomain {
            keys.push(CacheKey::Subdomain(label.to_string()));
        }
        keys
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Domain(d) => write!(f, "domain:{}", d),
            Self::Subdomain(s) => write!(f, "sub:{}", s),
            Self::Id(id) => write!(f, "id:{}", id),
        }
    }
}

/// Cached value with its creation time and TTL
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, created_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self { value, created_at, ttl }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + to_chrono(self.ttl)
    }

    /// Never fresh once `now > created_at + ttl`
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at()
    }

    /// Expired, but by no more than `max_staleness`
    pub fn is_within_staleness(&self, now: DateTime<Utc>, max_staleness: Duration) -> bool {
        now <= self.expires_at() + to_chrono(max_staleness)
    }
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Freshness period
    pub ttl: Duration,
    /// How long past expiry an entry may still be served while the store is down
    pub max_staleness: Duration,
    /// Maximum number of keys held
    pub capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_staleness: Duration::from_secs(60),
            capacity: 10_000,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale_hits: u64,
    pub entries: u64,
}

/// Cache answer for one key
#[derive(Debug, Clone)]
pub enum Cached<V> {
    Hit(V),
    /// The store recently reported no tenant under this key
    Absent,
    Unknown,
}

/// Process-wide TTL cache
pub struct ContextCache<V> {
    inner: Cache<CacheKey, CacheEntry<V>>,
    absent: Cache<CacheKey, CacheEntry<()>>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    /// Bumped by every invalidation
    generation: AtomicU64,
    /// Serializes generation-checked writes against invalidation
    write_lock: Mutex<()>,
    hits: AtomicCounter,
    misses: AtomicCounter,
    stale_hits: AtomicCounter,
}

impl<V> ContextCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create cache
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        // moka's own expiry only bounds memory; freshness is decided by `clock`.
        let inner = Cache::builder()
            .max_capacity(config.capacity)
            .time_to_live(config.ttl + config.max_staleness)
            .build();
        let absent = Cache::builder()
            .max_capacity(config.capacity)
            .time_to_live(config.ttl + config.max_staleness)
            .build();

        Self {
            inner,
            absent,
            config,
            clock,
            generation: AtomicU64::new(0),
            write_lock: Mutex::new(()),
            hits: AtomicCounter::new(0),
            misses: AtomicCounter::new(0),
            stale_hits: AtomicCounter::new(0),
        }
    }

    /// Fresh value for `key`
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let now = self.clock.now();
        match self.inner.get(key) {
            Some(entry) if entry.is_fresh(now) => {
                self.hits.inc();
                Some(entry.value)
            }
            Some(entry) => {
                if !entry.is_within_staleness(now, self.config.max_staleness) {
                    self.inner.invalidate(key);
                }
                self.misses.inc();
                None
            }
            None => {
                self.misses.inc();
                None
            }
        }
    }

    /// Expired value still inside the staleness bound (or a fresh one)
    pub fn get_stale(&self, key: &CacheKey) -> Option<V> {
        let now = self.clock.now();
        let entry = self.inner.get(key)?;
        if entry.is_within_staleness(now, self.config.max_staleness) {
            self.stale_hits.inc();
            Some(entry.value)
        } else {
            self.inner.invalidate(key);
            None
        }
    }

    /// Fresh answer for `key`, including remembered store misses
    pub fn lookup(&self, key: &CacheKey) -> Cached<V> {
        if let Some(value) = self.get(key) {
            return Cached::Hit(value);
        }
        let now = self.clock.now();
        match self.absent.get(key) {
            Some(entry) if entry.is_fresh(now) => Cached::Absent,
            _ => Cached::Unknown,
        }
    }

    /// Like [`Self::lookup`] but accepts entries inside the staleness bound
    pub fn lookup_stale(&self, key: &CacheKey) -> Cached<V> {
        if let Some(value) = self.get_stale(key) {
            return Cached::Hit(value);
        }
        let now = self.clock.now();
        match self.absent.get(key) {
            Some(entry) if entry.is_within_staleness(now, self.config.max_staleness) => Cached::Absent,
            Some(_) => {
                self.absent.invalidate(key);
                Cached::Unknown
            }
            None => Cached::Unknown,
        }
    }

    /// Remember that the store holds nothing under `key`. Same generation
    /// rule as [`Self::insert`].
    pub fn insert_absent(&self, key: &CacheKey, observed_generation: u64) -> bool {
        let _guard = self.write_lock.lock();
        if self.generation.load(Ordering::Acquire) != observed_generation {
            return false;
        }
        self.absent
            .insert(key.clone(), CacheEntry::new((), self.clock.now(), self.config.ttl));
        true
    }

    /// Current invalidation generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Store `value` under `keys` unless an invalidation happened since
    /// `observed_generation` was read. Returns whether the write happened.
    pub fn insert(&self, keys: &[CacheKey], value: V, observed_generation: u64) -> bool {
        let _guard = self.write_lock.lock();
        if self.generation.load(Ordering::Acquire) != observed_generation {
            return false;
        }
        let entry = CacheEntry::new(value, self.clock.now(), self.config.ttl);
        for key in keys {
            self.absent.invalidate(key);
            self.inner.insert(key.clone(), entry.clone());
        }
        true
    }

    /// Drop `keys` immediately
    pub fn invalidate(&self, keys: &[CacheKey]) {
        let _guard = self.write_lock.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        for key in keys {
            self.inner.invalidate(key);
            self.absent.invalidate(key);
        }
    }

    /// Evict every entry outside the staleness bound; returns evicted count
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<CacheKey> = self
            .inner
            .iter()
            .filter(|(_, entry)| !entry.is_within_staleness(now, self.config.max_staleness))
            .map(|(key, _)| (*key).clone())
            .collect();
        for key in &expired {
            self.inner.invalidate(key);
        }
        self.inner.run_pending_tasks();

        let expired_absent: Vec<CacheKey> = self
            .absent
            .iter()
            .filter(|(_, entry)| !entry.is_within_staleness(now, self.config.max_staleness))
            .map(|(key, _)| (*key).clone())
            .collect();
        for key in &expired_absent {
            self.absent.invalidate(key);
        }
        self.absent.run_pending_tasks();
        expired.len() + expired_absent.len()
    }

    /// Hit/miss counters and size
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.get(),
            misses: self.misses.get(),
            stale_hits: self.stale_hits.get(),
            entries: self.inner.entry_count(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

/// Cache seam used by the resolver. A remote cache implementation reports
/// outages as [`gate_common::GateError::CacheUnavailable`].
pub trait TenantCache: Send + Sync {
    fn lookup(&self, key: &CacheKey) -> GateResult<Cached<Arc<TenantContext>>>;
    fn lookup_stale(&self, key: &CacheKey) -> GateResult<Cached<Arc<TenantContext>>>;
    fn generation(&self) -> GateResult<u64>;
    fn insert(&self, tenant: Arc<TenantContext>, observed_generation: u64) -> GateResult<bool>;
    fn insert_absent(&self, key: &CacheKey, observed_generation: u64) -> GateResult<bool>;
    fn invalidate(&self, keys: &[CacheKey]) -> GateResult<()>;
}

impl TenantCache for ContextCache<Arc<TenantContext>> {
    fn lookup(&self, key: &CacheKey) -> GateResult<Cached<Arc<TenantContext>>> {
        Ok(ContextCache::lookup(self, key))
    }

    fn lookup_stale(&self, key: &CacheKey) -> GateResult<Cached<Arc<TenantContext>>> {
        Ok(ContextCache::lookup_stale(self, key))
    }

    fn generation(&self) -> GateResult<u64> {
        Ok(ContextCache::generation(self))
    }

    fn insert(&self, tenant: Arc<TenantContext>, observed_generation: u64) -> GateResult<bool> {
        let keys = CacheKey::for_tenant(&tenant);
        Ok(ContextCache::insert(self, &keys, tenant, observed_generation))
    }

    fn insert_absent(&self, key: &CacheKey, observed_generation: u64) -> GateResult<bool> {
        Ok(ContextCache::insert_absent(self, key, observed_generation))
    }

    fn invalidate(&self, keys: &[CacheKey]) -> GateResult<()> {
        ContextCache::invalidate(self, keys);
        Ok(())
    }
}
