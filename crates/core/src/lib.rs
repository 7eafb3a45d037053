pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod ratelimit;

pub use audit::{AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use config::{AiProvider, Capability, GatewayConfig, TenantAiConfig};
pub use domain::{
    Customer, CustomerId, Deal, DealId, DealStage, ScoredChunk, TaskId, TaskItem, TenantId, UserId,
};
pub use errors::GatewayError;
pub use ratelimit::{LimitPolicy, LimitScope, RateLimiter};
