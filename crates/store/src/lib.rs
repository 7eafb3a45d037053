//! Collaborator interfaces consumed by the orchestration core.
//!
//! The production implementations (ORM-backed record store, settings service,
//! vector index) live outside this workspace; the core only depends on these
//! traits. The in-memory variants in [`memory`] back tests and local wiring.

pub mod memory;

use async_trait::async_trait;
use nimbus_core::config::TenantAiConfig;
use nimbus_core::domain::{
    Customer, CustomerId, Deal, DealId, ScoredChunk, TaskItem, TenantId, UserId,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecordCounts {
    pub customers: usize,
    pub deals: usize,
    pub open_tasks: usize,
}

/// Tenant-scoped, read-only projections of business records. Every method is
/// keyed by tenant; implementations must never return another tenant's rows.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn customers(&self, tenant: &TenantId, limit: usize)
        -> Result<Vec<Customer>, StoreError>;
    async fn customer_by_id(
        &self,
        tenant: &TenantId,
        id: &CustomerId,
    ) -> Result<Option<Customer>, StoreError>;
    async fn open_deals(&self, tenant: &TenantId) -> Result<Vec<Deal>, StoreError>;
    async fn deal_by_id(&self, tenant: &TenantId, id: &DealId)
        -> Result<Option<Deal>, StoreError>;
    /// Open deals whose expected close date falls within the next
    /// `horizon_days` days.
    async fn deals_closing_within(
        &self,
        tenant: &TenantId,
        horizon_days: i64,
    ) -> Result<Vec<Deal>, StoreError>;
    /// Customers with no recorded activity for at least `idle_days` days.
    async fn inactive_customers(
        &self,
        tenant: &TenantId,
        idle_days: i64,
    ) -> Result<Vec<Customer>, StoreError>;
    async fn open_tasks(
        &self,
        tenant: &TenantId,
        owner: Option<&UserId>,
    ) -> Result<Vec<TaskItem>, StoreError>;
    async fn counts(&self, tenant: &TenantId) -> Result<RecordCounts, StoreError>;
}

/// Read-only view of the per-tenant AI configuration held by the settings
/// subsystem.
#[async_trait]
pub trait TenantConfigSource: Send + Sync {
    async fn ai_config(&self, tenant: &TenantId) -> Result<Option<TenantAiConfig>, StoreError>;
}

/// Query-embedding collaborator. `Ok(None)` means the tenant has no embedding
/// configuration, a distinct and expected state checked fresh on every call.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed_query(
        &self,
        tenant: &TenantId,
        text: &str,
    ) -> Result<Option<Vec<f32>>, StoreError>;
}

/// Ranked-chunk index over tenant document content, optionally restricted to
/// one customer's documents.
#[async_trait]
pub trait ChunkIndex: Send + Sync {
    async fn search(
        &self,
        tenant: &TenantId,
        embedding: &[f32],
        customer: Option<&CustomerId>,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError>;
}
