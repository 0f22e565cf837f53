use crate::store::WorkflowStore;
use keelcore::{Result, StatusFilter, WorkflowStatus};
use std::sync::Arc;

/// Filtered, read-only view over the registry.
///
/// Every call reads the store directly, so results reflect all committed
/// transitions and nothing that is still in flight.
#[derive(Clone)]
pub struct StatusIndex {
    store: Arc<dyn WorkflowStore>,
}

impl StatusIndex {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    /// `(id, status)` pairs matching `filter`, in insertion order
    pub async fn list(&self, filter: &StatusFilter) -> Result<Vec<(String, WorkflowStatus)>> {
        let all = self.store.list_statuses().await?;
        if filter.is_empty() {
            return Ok(all);
        }
        Ok(all
            .into_iter()
            .filter(|(_, status)| filter.matches(*status))
            .collect())
    }

    pub async fn count(&self, filter: &StatusFilter) -> Result<usize> {
        if filter.is_empty() {
            return Ok(self.store.len().await?);
        }
        Ok(self.list(filter).await?.len())
    }
}
