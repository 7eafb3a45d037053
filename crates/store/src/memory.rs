//! In-memory collaborator implementations for tests and local wiring.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::RwLock;

use nimbus_core::config::TenantAiConfig;
use nimbus_core::domain::{
    Customer, CustomerId, Deal, DealId, ScoredChunk, TaskItem, TenantId, UserId,
};

use crate::{
    ChunkIndex, EmbeddingBackend, RecordCounts, RecordStore, StoreError, TenantConfigSource,
};

#[derive(Default)]
struct RecordState {
    customers: Vec<Customer>,
    deals: Vec<Deal>,
    tasks: Vec<TaskItem>,
}

#[derive(Default)]
pub struct InMemoryRecordStore {
    state: RwLock<RecordState>,
}

impl InMemoryRecordStore {
    pub async fn insert_customer(&self, customer: Customer) {
        self.state.write().await.customers.push(customer);
    }

    pub async fn insert_deal(&self, deal: Deal) {
        self.state.write().await.deals.push(deal);
    }

    pub async fn insert_task(&self, task: TaskItem) {
        self.state.write().await.tasks.push(task);
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn customers(
        &self,
        tenant: &TenantId,
        limit: usize,
    ) -> Result<Vec<Customer>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .customers
            .iter()
            .filter(|customer| &customer.tenant_id == tenant)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn customer_by_id(
        &self,
        tenant: &TenantId,
        id: &CustomerId,
    ) -> Result<Option<Customer>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .customers
            .iter()
            .find(|customer| &customer.tenant_id == tenant && &customer.id == id)
            .cloned())
    }

    async fn open_deals(&self, tenant: &TenantId) -> Result<Vec<Deal>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .deals
            .iter()
            .filter(|deal| &deal.tenant_id == tenant && deal.stage.is_open())
            .cloned()
            .collect())
    }

    async fn deal_by_id(
        &self,
        tenant: &TenantId,
        id: &DealId,
    ) -> Result<Option<Deal>, StoreError> {
        let state = self.state.read().await;
        Ok(state.deals.iter().find(|deal| &deal.tenant_id == tenant && &deal.id == id).cloned())
    }

    async fn deals_closing_within(
        &self,
        tenant: &TenantId,
        horizon_days: i64,
    ) -> Result<Vec<Deal>, StoreError> {
        let today = Utc::now().date_naive();
        let horizon = today + Duration::days(horizon_days);
        let state = self.state.read().await;
        Ok(state
            .deals
            .iter()
            .filter(|deal| {
                &deal.tenant_id == tenant
                    && deal.stage.is_open()
                    && deal
                        .expected_close
                        .map(|close| close >= today && close <= horizon)
                        .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn inactive_customers(
        &self,
        tenant: &TenantId,
        idle_days: i64,
    ) -> Result<Vec<Customer>, StoreError> {
        let cutoff = Utc::now() - Duration::days(idle_days);
        let state = self.state.read().await;
        Ok(state
            .customers
            .iter()
            .filter(|customer| {
                &customer.tenant_id == tenant
                    && customer
                        .last_activity_at
                        .map(|last_activity| last_activity < cutoff)
                        .unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn open_tasks(
        &self,
        tenant: &TenantId,
        owner: Option<&UserId>,
    ) -> Result<Vec<TaskItem>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .tasks
            .iter()
            .filter(|task| {
                &task.tenant_id == tenant
                    && !task.done
                    && owner.map(|owner| task.owner.as_ref() == Some(owner)).unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn counts(&self, tenant: &TenantId) -> Result<RecordCounts, StoreError> {
        let state = self.state.read().await;
        Ok(RecordCounts {
            customers: state
                .customers
                .iter()
                .filter(|customer| &customer.tenant_id == tenant)
                .count(),
            deals: state.deals.iter().filter(|deal| &deal.tenant_id == tenant).count(),
            open_tasks: state
                .tasks
                .iter()
                .filter(|task| &task.tenant_id == tenant && !task.done)
                .count(),
        })
    }
}

#[derive(Default)]
pub struct InMemoryTenantConfigSource {
    configs: RwLock<HashMap<String, TenantAiConfig>>,
}

impl InMemoryTenantConfigSource {
    pub async fn set(&self, tenant: &TenantId, config: TenantAiConfig) {
        self.configs.write().await.insert(tenant.0.clone(), config);
    }
}

#[async_trait]
impl TenantConfigSource for InMemoryTenantConfigSource {
    async fn ai_config(&self, tenant: &TenantId) -> Result<Option<TenantAiConfig>, StoreError> {
        Ok(self.configs.read().await.get(&tenant.0).cloned())
    }
}

/// Deterministic stand-in for a hosted embedding model: tenants are either
/// configured (and get a stable projection of the query text) or not.
#[derive(Default)]
pub struct InMemoryEmbeddingBackend {
    configured: RwLock<HashMap<String, ()>>,
}

impl InMemoryEmbeddingBackend {
    pub async fn configure(&self, tenant: &TenantId) {
        self.configured.write().await.insert(tenant.0.clone(), ());
    }
}

#[async_trait]
impl EmbeddingBackend for InMemoryEmbeddingBackend {
    async fn embed_query(
        &self,
        tenant: &TenantId,
        text: &str,
    ) -> Result<Option<Vec<f32>>, StoreError> {
        if !self.configured.read().await.contains_key(&tenant.0) {
            return Ok(None);
        }
        let mut embedding = vec![0.0f32; 8];
        for (index, byte) in text.bytes().enumerate() {
            embedding[index % 8] += f32::from(byte) / 255.0;
        }
        Ok(Some(embedding))
    }
}

struct IndexedChunk {
    tenant: TenantId,
    customer: Option<CustomerId>,
    chunk: ScoredChunk,
}

#[derive(Default)]
pub struct InMemoryChunkIndex {
    chunks: RwLock<Vec<IndexedChunk>>,
}

impl InMemoryChunkIndex {
    pub async fn insert(
        &self,
        tenant: &TenantId,
        customer: Option<CustomerId>,
        chunk: ScoredChunk,
    ) {
        self.chunks.write().await.push(IndexedChunk {
            tenant: tenant.clone(),
            customer,
            chunk,
        });
    }
}

#[async_trait]
impl ChunkIndex for InMemoryChunkIndex {
    async fn search(
        &self,
        tenant: &TenantId,
        _embedding: &[f32],
        customer: Option<&CustomerId>,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let chunks = self.chunks.read().await;
        let mut matches: Vec<ScoredChunk> = chunks
            .iter()
            .filter(|indexed| {
                &indexed.tenant == tenant
                    && customer.map(|id| indexed.customer.as_ref() == Some(id)).unwrap_or(true)
            })
            .map(|indexed| indexed.chunk.clone())
            .collect();
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(limit);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use nimbus_core::config::{AiProvider, TenantAiConfig};
    use nimbus_core::domain::{
        Customer, CustomerId, Deal, DealId, DealStage, ScoredChunk, TaskId, TaskItem, TenantId,
    };

    use crate::memory::{
        InMemoryChunkIndex, InMemoryEmbeddingBackend, InMemoryRecordStore,
        InMemoryTenantConfigSource,
    };
    use crate::{ChunkIndex, EmbeddingBackend, RecordStore, TenantConfigSource};

    fn tenant(id: &str) -> TenantId {
        TenantId(id.to_string())
    }

    fn customer(tenant_id: &str, id: &str, idle_days: Option<i64>) -> Customer {
        Customer {
            id: CustomerId(id.to_string()),
            tenant_id: tenant(tenant_id),
            name: format!("Customer {id}"),
            email: None,
            last_activity_at: idle_days.map(|days| Utc::now() - Duration::days(days)),
        }
    }

    fn deal(tenant_id: &str, id: &str, stage: DealStage, close_in_days: Option<i64>) -> Deal {
        Deal {
            id: DealId(id.to_string()),
            tenant_id: tenant(tenant_id),
            customer_id: None,
            title: format!("Deal {id}"),
            amount: Decimal::new(120_000, 2),
            stage,
            expected_close: close_in_days
                .map(|days| Utc::now().date_naive() + Duration::days(days)),
        }
    }

    #[tokio::test]
    async fn record_reads_are_tenant_scoped() {
        let store = InMemoryRecordStore::default();
        store.insert_customer(customer("org-a", "c-1", Some(1))).await;
        store.insert_customer(customer("org-b", "c-2", Some(1))).await;
        store.insert_deal(deal("org-a", "d-1", DealStage::Open, None)).await;
        store.insert_deal(deal("org-b", "d-2", DealStage::Open, None)).await;

        let customers = store.customers(&tenant("org-a"), 50).await.expect("customers");
        assert_eq!(customers.len(), 1);
        assert_eq!(customers[0].id.0, "c-1");

        let deals = store.open_deals(&tenant("org-a")).await.expect("deals");
        assert_eq!(deals.len(), 1);
        assert_eq!(deals[0].id.0, "d-1");

        let counts = store.counts(&tenant("org-b")).await.expect("counts");
        assert_eq!(counts.customers, 1);
        assert_eq!(counts.deals, 1);
    }

    #[tokio::test]
    async fn open_deals_excludes_won_and_lost() {
        let store = InMemoryRecordStore::default();
        store.insert_deal(deal("org-a", "d-1", DealStage::Open, None)).await;
        store.insert_deal(deal("org-a", "d-2", DealStage::Won, None)).await;
        store.insert_deal(deal("org-a", "d-3", DealStage::Lost, None)).await;

        let deals = store.open_deals(&tenant("org-a")).await.expect("deals");
        assert_eq!(deals.len(), 1);
        assert_eq!(deals[0].id.0, "d-1");
    }

    #[tokio::test]
    async fn closing_window_filters_on_expected_close() {
        let store = InMemoryRecordStore::default();
        store.insert_deal(deal("org-a", "soon", DealStage::Open, Some(10))).await;
        store.insert_deal(deal("org-a", "far", DealStage::Open, Some(90))).await;
        store.insert_deal(deal("org-a", "undated", DealStage::Open, None)).await;

        let closing = store.deals_closing_within(&tenant("org-a"), 30).await.expect("deals");
        assert_eq!(closing.len(), 1);
        assert_eq!(closing[0].id.0, "soon");
    }

    #[tokio::test]
    async fn inactive_customers_include_never_active_ones() {
        let store = InMemoryRecordStore::default();
        store.insert_customer(customer("org-a", "fresh", Some(5))).await;
        store.insert_customer(customer("org-a", "stale", Some(120))).await;
        store.insert_customer(customer("org-a", "silent", None)).await;

        let inactive = store.inactive_customers(&tenant("org-a"), 90).await.expect("customers");
        let ids: Vec<&str> = inactive.iter().map(|customer| customer.id.0.as_str()).collect();
        assert_eq!(ids, vec!["stale", "silent"]);
    }

    #[tokio::test]
    async fn open_tasks_skip_completed_items() {
        let store = InMemoryRecordStore::default();
        store
            .insert_task(TaskItem {
                id: TaskId("t-1".to_string()),
                tenant_id: tenant("org-a"),
                owner: None,
                title: "Call back".to_string(),
                due_at: None,
                done: false,
            })
            .await;
        store
            .insert_task(TaskItem {
                id: TaskId("t-2".to_string()),
                tenant_id: tenant("org-a"),
                owner: None,
                title: "Send deck".to_string(),
                due_at: None,
                done: true,
            })
            .await;

        let tasks = store.open_tasks(&tenant("org-a"), None).await.expect("tasks");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id.0, "t-1");
    }

    #[tokio::test]
    async fn config_source_round_trips_per_tenant() {
        let source = InMemoryTenantConfigSource::default();
        assert!(source.ai_config(&tenant("org-a")).await.expect("lookup").is_none());

        source.set(&tenant("org-a"), TenantAiConfig::new(AiProvider::Gemini)).await;
        let config = source.ai_config(&tenant("org-a")).await.expect("lookup").expect("config");
        assert_eq!(config.provider, AiProvider::Gemini);
        assert!(source.ai_config(&tenant("org-b")).await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn embedding_backend_reports_unconfigured_tenants_as_none() {
        let backend = InMemoryEmbeddingBackend::default();
        assert!(backend
            .embed_query(&tenant("org-a"), "renewal terms")
            .await
            .expect("embed")
            .is_none());

        backend.configure(&tenant("org-a")).await;
        let embedding = backend
            .embed_query(&tenant("org-a"), "renewal terms")
            .await
            .expect("embed")
            .expect("configured tenant embeds");
        assert_eq!(embedding.len(), 8);
    }

    #[tokio::test]
    async fn chunk_search_respects_tenant_and_customer_filters() {
        let index = InMemoryChunkIndex::default();
        let chunk = |id: &str, score: f64| ScoredChunk {
            document_id: id.to_string(),
            display_name: format!("{id}.pdf"),
            excerpt: "…".to_string(),
            score,
        };
        index.insert(&tenant("org-a"), None, chunk("shared", 0.4)).await;
        index
            .insert(&tenant("org-a"), Some(CustomerId("c-1".to_string())), chunk("scoped", 0.9))
            .await;
        index.insert(&tenant("org-b"), None, chunk("other-tenant", 0.99)).await;

        let all = index.search(&tenant("org-a"), &[], None, 10).await.expect("search");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].document_id, "scoped");

        let scoped = index
            .search(&tenant("org-a"), &[], Some(&CustomerId("c-1".to_string())), 10)
            .await
            .expect("search");
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].document_id, "scoped");
    }
}
