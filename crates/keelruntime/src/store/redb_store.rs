//! ReDB registry backend
//!
//! Local embedded database; every write is one committed transaction, so a
//! crash leaves each record at its last committed status.

use super::{StoreResult, WorkflowStore};
use async_trait::async_trait;
use keelcore::{StoreError, WorkflowRecord, WorkflowStatus};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::Path;
use std::sync::Arc;

// Table definitions
const RECORD_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("workflows");
const STATUS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("workflow_status");
const ORDER_TABLE: TableDefinition<u64, &str> = TableDefinition::new("workflow_order");

fn db_error<E: std::fmt::Display>(context: &'static str) -> impl FnOnce(E) -> StoreError {
    move |e| StoreError::Database(format!("{}: {}", context, e))
}

/// ReDB registry.
///
/// Full records live in `workflows`; `workflow_status` is the status index
/// read by listings and `workflow_order` keys IDs by insertion sequence.
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a registry file at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = Database::create(path).map_err(db_error("failed to open database"))?;

        let write_txn = db.begin_write().map_err(db_error("failed to begin transaction"))?;
        write_txn
            .open_table(RECORD_TABLE)
            .map_err(db_error("failed to create workflows table"))?;
        write_txn
            .open_table(STATUS_TABLE)
            .map_err(db_error("failed to create status table"))?;
        write_txn
            .open_table(ORDER_TABLE)
            .map_err(db_error("failed to create order table"))?;
        write_txn.commit().map_err(db_error("failed to commit"))?;

        Ok(Self { db: Arc::new(db) })
    }

    fn encode(record: &WorkflowRecord) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(record)
            .map_err(|e| StoreError::Serialization(format!("failed to serialize: {}", e)))
    }

    fn decode(id: &str, bytes: &[u8]) -> StoreResult<WorkflowRecord> {
        let record: WorkflowRecord = serde_json::from_slice(bytes)
            .map_err(|e| StoreError::Serialization(format!("failed to deserialize {}: {}", id, e)))?;
        if record.id != id {
            return Err(StoreError::Corrupted(format!(
                "record stored under {} carries id {}",
                id, record.id
            )));
        }
        Ok(record)
    }
}

#[async_trait]
impl WorkflowStore for RedbStore {
    async fn create(&self, record: &WorkflowRecord) -> StoreResult<()> {
        let bytes = Self::encode(record)?;
        let id = record.id.as_str();

        let write_txn = self.db.begin_write().map_err(db_error("failed to begin write"))?;
        {
            let mut records = write_txn
                .open_table(RECORD_TABLE)
                .map_err(db_error("failed to open table"))?;
            let exists = records
                .get(id)
                .map_err(db_error("get failed"))?
                .is_some();
            if exists {
                return Err(StoreError::AlreadyExists(id.to_string()));
            }
            records
                .insert(id, bytes.as_slice())
                .map_err(db_error("insert failed"))?;

            let mut statuses = write_txn
                .open_table(STATUS_TABLE)
                .map_err(db_error("failed to open status table"))?;
            statuses
                .insert(id, record.status.as_str())
                .map_err(db_error("status insert failed"))?;

            let mut order = write_txn
                .open_table(ORDER_TABLE)
                .map_err(db_error("failed to open order table"))?;
            let next_seq = order
                .last()
                .map_err(db_error("order lookup failed"))?
                .map(|(seq, _)| seq.value() + 1)
                .unwrap_or(0);
            order
                .insert(next_seq, id)
                .map_err(db_error("order insert failed"))?;
        }
        write_txn.commit().map_err(db_error("commit failed"))?;

        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<WorkflowRecord>> {
        let read_txn = self.db.begin_read().map_err(db_error("failed to begin read"))?;
        let table = read_txn
            .open_table(RECORD_TABLE)
            .map_err(db_error("failed to open table"))?;

        match table.get(id).map_err(db_error("get failed"))? {
            Some(value) => Ok(Some(Self::decode(id, value.value())?)),
            None => Ok(None),
        }
    }

    async fn update(&self, record: &WorkflowRecord) -> StoreResult<()> {
        let bytes = Self::encode(record)?;
        let id = record.id.as_str();

        let write_txn = self.db.begin_write().map_err(db_error("failed to begin write"))?;
        {
            let mut records = write_txn
                .open_table(RECORD_TABLE)
                .map_err(db_error("failed to open table"))?;
            let exists = records
                .get(id)
                .map_err(db_error("get failed"))?
                .is_some();
            if !exists {
                return Err(StoreError::NotFound(id.to_string()));
            }
            records
                .insert(id, bytes.as_slice())
                .map_err(db_error("insert failed"))?;

            let mut statuses = write_txn
                .open_table(STATUS_TABLE)
                .map_err(db_error("failed to open status table"))?;
            statuses
                .insert(id, record.status.as_str())
                .map_err(db_error("status insert failed"))?;
        }
        write_txn.commit().map_err(db_error("commit failed"))?;

        Ok(())
    }

    async fn list_statuses(&self) -> StoreResult<Vec<(String, WorkflowStatus)>> {
        let read_txn = self.db.begin_read().map_err(db_error("failed to begin read"))?;
        let order = read_txn
            .open_table(ORDER_TABLE)
            .map_err(db_error("failed to open order table"))?;
        let statuses = read_txn
            .open_table(STATUS_TABLE)
            .map_err(db_error("failed to open status table"))?;

        let mut results = Vec::new();
        for entry in order.iter().map_err(db_error("iter failed"))? {
            let (_, id) = entry.map_err(db_error("entry read failed"))?;
            let id = id.value().to_string();
            let label = statuses
                .get(id.as_str())
                .map_err(db_error("status lookup failed"))?
                .ok_or_else(|| StoreError::Corrupted(format!("workflow {} has no status entry", id)))?;
            let status = label
                .value()
                .parse::<WorkflowStatus>()
                .map_err(|_| StoreError::Corrupted(format!("workflow {} has status {:?}", id, label.value())))?;
            results.push((id, status));
        }

        Ok(results)
    }

    async fn len(&self) -> StoreResult<usize> {
        let read_txn = self.db.begin_read().map_err(db_error("failed to begin read"))?;
        let table = read_txn
            .open_table(ORDER_TABLE)
            .map_err(db_error("failed to open order table"))?;
        let len = table.len().map_err(db_error("len failed"))?;
        Ok(len as usize)
    }
}
