//! In-memory registry for tests and ephemeral engines

use super::{StoreResult, WorkflowStore};
use async_trait::async_trait;
use keelcore::{StoreError, WorkflowRecord, WorkflowStatus};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Inner {
    order: Vec<String>,
    records: HashMap<String, WorkflowRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Database(format!("lock error: {}", e)))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Database(format!("lock error: {}", e)))
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn create(&self, record: &WorkflowRecord) -> StoreResult<()> {
        let mut inner = self.write()?;
        if inner.records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id.clone()));
        }
        inner.order.push(record.id.clone());
        inner.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<WorkflowRecord>> {
        Ok(self.read()?.records.get(id).cloned())
    }

    async fn update(&self, record: &WorkflowRecord) -> StoreResult<()> {
        let mut inner = self.write()?;
        match inner.records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(record.id.clone())),
        }
    }

    async fn list_statuses(&self) -> StoreResult<Vec<(String, WorkflowStatus)>> {
        let inner = self.read()?;
        inner
            .order
            .iter()
            .map(|id| {
                inner
                    .records
                    .get(id)
                    .map(|record| (id.clone(), record.status))
                    .ok_or_else(|| StoreError::Corrupted(format!("ordered id {} has no record", id)))
            })
            .collect()
    }

    async fn len(&self) -> StoreResult<usize> {
        Ok(self.read()?.records.len())
    }
}
