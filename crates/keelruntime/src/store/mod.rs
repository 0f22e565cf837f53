//! Workflow registry backends
//!
//! - `MemoryStore` - In-memory registry, lost on restart
//! - `RedbStore` - Durable registry in a local ReDB file
//!
//! Both keep insertion order for listings and commit each write atomically,
//! so readers see either the previous or the new status of a record.

mod memory;
mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use async_trait::async_trait;
use keelcore::{StoreError, WorkflowRecord, WorkflowStatus};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable mapping from workflow ID to its record.
///
/// `update` is reserved for the lifecycle controller; everything else in the
/// engine only reads.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Insert a new record. Fails with `AlreadyExists` if the ID is taken.
    async fn create(&self, record: &WorkflowRecord) -> StoreResult<()>;

    /// Get a record by ID
    async fn get(&self, id: &str) -> StoreResult<Option<WorkflowRecord>>;

    /// Replace an existing record. Fails with `NotFound` if absent.
    async fn update(&self, record: &WorkflowRecord) -> StoreResult<()>;

    /// `(id, status)` of every record in insertion order, from one consistent read
    async fn list_statuses(&self) -> StoreResult<Vec<(String, WorkflowStatus)>>;

    /// Number of records
    async fn len(&self) -> StoreResult<usize> {
        Ok(self.list_statuses().await?.len())
    }
}
