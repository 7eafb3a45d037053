//! AI orchestration core for the Nimbus CRM.
//!
//! This crate is the gateway between natural-language requests and externally
//! hosted model providers:
//! - **Provider layer** (`provider`) - one normalized invocation surface over
//!   heterogeneous backends (OpenAI, Anthropic, Gemini, self-hosted Ollama)
//! - **Context assembly** (`context`) - deterministic, keyword-triggered
//!   digests of tenant business records, bounded by a character ceiling
//! - **Retrieval** (`retrieval`) - similarity-ranked document chunks for
//!   grounded search and chat citations
//! - **Orchestration** (`orchestrator`) - per-capability pipelines: rate
//!   limit, capability check, gather, invoke, normalize, audit
//!
//! # Safety principle
//!
//! The model never sees another tenant's data and its raw failure text never
//! reaches an end user. Rate limiting and capability checks run before any
//! provider cost is incurred, and a single invocation is never retried here;
//! retry policy belongs to the caller.

pub mod context;
pub mod normalize;
pub mod orchestrator;
pub mod provider;
pub mod retrieval;

pub use context::{ContextAssembler, ContextCategory, ContextDigest, ContextSection};
pub use normalize::{EmailDraft, InsightReport};
pub use orchestrator::{
    ChatRequest, ChatResponse, Citation, ConnectionTestResponse, DocumentSearchRequest,
    DocumentSearchResponse, EmailDraftRequest, EmailDraftResponse, EmailPurpose, EmailTone,
    InsightsRequest, InsightsResponse, Orchestrator, OrchestratorDeps, SearchMatch,
};
pub use provider::{ModelHandle, ModelResolver, ProviderResolver, ResolvedModel};
pub use retrieval::{RetrievalOptions, RetrievalPipeline, RetrievalResult};
