//! Similarity retrieval over tenant document chunks.
//!
//! The chunk index itself is an external collaborator; this pipeline embeds
//! the query, searches, and enforces ordering and the `top_k` bound. A tenant
//! without embedding configuration is an expected state (`Ok(None)`), distinct
//! from a provider failure, and is re-checked on every call so a configuration
//! change takes effect immediately.

use std::cmp::Ordering;
use std::sync::Arc;

use nimbus_core::domain::{CustomerId, ScoredChunk, TenantId};
use nimbus_core::errors::GatewayError;
use nimbus_store::{ChunkIndex, EmbeddingBackend};

#[derive(Clone, Debug)]
pub struct RetrievalOptions {
    pub customer: Option<CustomerId>,
    pub top_k: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self { customer: None, top_k: 5 }
    }
}

#[derive(Clone, Debug)]
pub struct RetrievalResult {
    chunks: Vec<ScoredChunk>,
}

impl RetrievalResult {
    /// Chunks in strictly non-increasing score order, at most `top_k` of them.
    pub fn chunks(&self) -> &[ScoredChunk] {
        &self.chunks
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

pub struct RetrievalPipeline {
    embeddings: Arc<dyn EmbeddingBackend>,
    index: Arc<dyn ChunkIndex>,
}

impl RetrievalPipeline {
    pub fn new(embeddings: Arc<dyn EmbeddingBackend>, index: Arc<dyn ChunkIndex>) -> Self {
        Self { embeddings, index }
    }

    pub async fn retrieve(
        &self,
        tenant: &TenantId,
        query: &str,
        options: &RetrievalOptions,
    ) -> Result<Option<RetrievalResult>, GatewayError> {
        let Some(embedding) = self
            .embeddings
            .embed_query(tenant, query)
            .await
            .map_err(|error| GatewayError::UpstreamError(error.to_string()))?
        else {
            return Ok(None);
        };

        let mut chunks = self
            .index
            .search(tenant, &embedding, options.customer.as_ref(), options.top_k)
            .await
            .map_err(|error| GatewayError::UpstreamError(error.to_string()))?;

        // ordering uses full precision; rounding is display-only
        chunks.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        chunks.truncate(options.top_k);

        Ok(Some(RetrievalResult { chunks }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use nimbus_core::domain::{CustomerId, ScoredChunk, TenantId};
    use nimbus_store::memory::{InMemoryChunkIndex, InMemoryEmbeddingBackend};
    use nimbus_store::{ChunkIndex, StoreError};

    use crate::retrieval::{RetrievalOptions, RetrievalPipeline};

    fn tenant(id: &str) -> TenantId {
        TenantId(id.to_string())
    }

    fn chunk(id: &str, score: f64) -> ScoredChunk {
        ScoredChunk {
            document_id: id.to_string(),
            display_name: format!("{id}.pdf"),
            excerpt: format!("excerpt of {id}"),
            score,
        }
    }

    #[tokio::test]
    async fn unconfigured_tenant_returns_none_not_an_error() {
        let embeddings = Arc::new(InMemoryEmbeddingBackend::default());
        let index = Arc::new(InMemoryChunkIndex::default());
        index.insert(&tenant("org-1"), None, chunk("doc", 0.9)).await;

        let pipeline = RetrievalPipeline::new(embeddings, index);
        let result = pipeline
            .retrieve(&tenant("org-1"), "renewal terms", &RetrievalOptions::default())
            .await
            .expect("retrieve should not error");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn configuration_is_rechecked_on_every_call() {
        let embeddings = Arc::new(InMemoryEmbeddingBackend::default());
        let index = Arc::new(InMemoryChunkIndex::default());
        let pipeline = RetrievalPipeline::new(Arc::clone(&embeddings) as _, index);

        let before = pipeline
            .retrieve(&tenant("org-1"), "terms", &RetrievalOptions::default())
            .await
            .expect("retrieve");
        assert!(before.is_none());

        embeddings.configure(&tenant("org-1")).await;
        let after = pipeline
            .retrieve(&tenant("org-1"), "terms", &RetrievalOptions::default())
            .await
            .expect("retrieve");
        assert!(after.is_some());
    }

    /// Index stub that returns chunks out of order and over the limit, to
    /// prove the pipeline enforces ordering and the top-k bound itself.
    struct UnrulyIndex;

    #[async_trait]
    impl ChunkIndex for UnrulyIndex {
        async fn search(
            &self,
            _tenant: &TenantId,
            _embedding: &[f32],
            _customer: Option<&CustomerId>,
            _limit: usize,
        ) -> Result<Vec<ScoredChunk>, StoreError> {
            Ok(vec![
                chunk("mid", 0.55),
                chunk("best", 0.912_3),
                chunk("worst", 0.10),
                chunk("good", 0.908_9),
                chunk("ok", 0.31),
            ])
        }
    }

    #[tokio::test]
    async fn results_are_descending_and_bounded_by_top_k() {
        let embeddings = Arc::new(InMemoryEmbeddingBackend::default());
        embeddings.configure(&tenant("org-1")).await;
        let pipeline = RetrievalPipeline::new(embeddings, Arc::new(UnrulyIndex));

        let options = RetrievalOptions { customer: None, top_k: 3 };
        let result = pipeline
            .retrieve(&tenant("org-1"), "contract", &options)
            .await
            .expect("retrieve")
            .expect("configured");

        let ids: Vec<&str> =
            result.chunks().iter().map(|chunk| chunk.document_id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids, vec!["best", "good", "mid"]);
        for window in result.chunks().windows(2) {
            assert!(window[0].score >= window[1].score);
        }
        // full precision decides between 0.9123 and 0.9089 even though both
        // display as 0.91
        assert_eq!(result.chunks()[0].display_score(), 0.91);
        assert_eq!(result.chunks()[1].display_score(), 0.91);
    }
}
