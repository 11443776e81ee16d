//! In-memory entity store (for testing and development)

use crate::isolation::{EntityStore, Record, ScopedFilter, ScopedPayload};
use crate::store::{StoreError, StoreResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

pub struct InMemoryEntityStore {
    tables: RwLock<HashMap<String, Vec<Record>>>,
    available: AtomicBool,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Seed a row without scoping
    pub fn insert_raw(&self, model: &str, record: Record) {
        self.tables.write().entry(model.to_string()).or_default().push(record);
    }

    /// Rows currently stored for `model`
    pub fn count(&self, model: &str) -> usize {
        self.tables.read().get(model).map_or(0, Vec::len)
    }

    /// Simulate an outage
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory entity store offline".into()))
        }
    }
}

impl Default for InMemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn find(&self, filter: &ScopedFilter) -> StoreResult<Vec<Record>> {
        self.check()?;
        let tables = self.tables.read();
        Ok(tables
            .get(filter.model())
            .map(|rows| rows.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert(&self, payload: ScopedPayload) -> StoreResult<Record> {
        self.check()?;
        let model = payload.model().to_string();
        let mut record = payload.into_record();
        record
            .entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        self.tables.write().entry(model).or_default().push(record.clone());
        Ok(record)
    }

    async fn update(&self, filter: &ScopedFilter, changes: ScopedPayload) -> StoreResult<u64> {
        self.check()?;
        let mut tables = self.tables.write();
        let Some(rows) = tables.get_mut(filter.model()) else {
            return Ok(0);
        };
        let mut updated = 0;
        for row in rows.iter_mut().filter(|r| filter.matches(r)) {
            for (field, value) in changes.record() {
                row.insert(field.clone(), value.clone());
            }
            updated += 1;
        }
        Ok(updated)
    }

    async fn delete(&self, filter: &ScopedFilter) -> StoreResult<u64> {
        self.check()?;
        let mut tables = self.tables.write();
        let Some(rows) = tables.get_mut(filter.model()) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| !filter.matches(r));
        Ok((before - rows.len()) as u64)
    }
}
