//! Per-capability orchestration pipelines.
//!
//! Every entry point walks the same stages in strict order: rate limit,
//! capability check, input gathering, provider resolution, one bounded model
//! invocation, normalization, best-effort audit. Rejections happen before any
//! external call is made and must never incur provider cost. There is no
//! retry loop here; model calls are neither idempotent nor cheap, so retry
//! policy belongs to the caller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use nimbus_core::audit::{AuditEvent, AuditOutcome, AuditSink};
use nimbus_core::config::{AiProvider, Capability, GatewayConfig, TenantAiConfig};
use nimbus_core::domain::{Customer, CustomerId, Deal, DealId, TenantId, UserId};
use nimbus_core::errors::GatewayError;
use nimbus_core::ratelimit::{LimitPolicy, RateLimiter};
use nimbus_store::{ChunkIndex, EmbeddingBackend, RecordStore, TenantConfigSource};

use crate::context::{ContextAssembler, ContextDigest};
use crate::normalize::{normalize_email, normalize_insights, EmailDraft, InsightReport};
use crate::provider::ModelResolver;
use crate::retrieval::{RetrievalOptions, RetrievalPipeline, RetrievalResult};

const CONNECTION_TEST_PROMPT: &str = "Reply with a one-sentence greeting.";
const CONNECTION_TEST_SAMPLE_CHARS: usize = 120;

#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub tenant: TenantId,
    pub user: UserId,
    pub message: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub citations: Vec<Citation>,
    pub model: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Citation {
    pub document_id: String,
    pub display_name: String,
    pub score: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailTone {
    Professional,
    Friendly,
    Formal,
}

impl EmailTone {
    fn as_str(self) -> &'static str {
        match self {
            Self::Professional => "professional",
            Self::Friendly => "friendly",
            Self::Formal => "formal",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailPurpose {
    FollowUp,
    Proposal,
    CheckIn,
    ThankYou,
}

impl EmailPurpose {
    fn as_str(self) -> &'static str {
        match self {
            Self::FollowUp => "follow-up",
            Self::Proposal => "proposal",
            Self::CheckIn => "check-in",
            Self::ThankYou => "thank-you",
        }
    }
}

#[derive(Clone, Debug)]
pub struct EmailDraftRequest {
    pub tenant: TenantId,
    pub user: UserId,
    pub customer: Option<CustomerId>,
    pub deal: Option<DealId>,
    pub tone: EmailTone,
    pub purpose: EmailPurpose,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct EmailDraftResponse {
    pub draft: EmailDraft,
    pub model: String,
}

#[derive(Clone, Debug)]
pub struct InsightsRequest {
    pub tenant: TenantId,
    pub user: UserId,
}

#[derive(Clone, Debug, Serialize)]
pub struct InsightsResponse {
    pub report: InsightReport,
    pub model: String,
}

#[derive(Clone, Debug)]
pub struct DocumentSearchRequest {
    pub tenant: TenantId,
    pub user: UserId,
    pub query: String,
    pub customer: Option<CustomerId>,
    /// Falls back to the configured default when absent.
    pub top_k: Option<usize>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DocumentSearchResponse {
    pub matches: Vec<SearchMatch>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchMatch {
    pub document_id: String,
    pub display_name: String,
    pub excerpt: String,
    /// Rounded for display; ordering was decided on full precision upstream.
    pub score: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ConnectionTestResponse {
    pub provider: AiProvider,
    pub model: String,
    pub latency_ms: u64,
    pub sample: String,
}

/// Injected collaborators. Everything here is shared by reference; the
/// orchestrator owns no background lifetime.
pub struct OrchestratorDeps {
    pub limiter: Arc<RateLimiter>,
    pub records: Arc<dyn RecordStore>,
    pub tenant_configs: Arc<dyn TenantConfigSource>,
    pub embeddings: Arc<dyn EmbeddingBackend>,
    pub index: Arc<dyn ChunkIndex>,
    pub audit: Arc<dyn AuditSink>,
    pub resolver: Arc<dyn ModelResolver>,
}

pub struct Orchestrator {
    config: GatewayConfig,
    limiter: Arc<RateLimiter>,
    records: Arc<dyn RecordStore>,
    tenant_configs: Arc<dyn TenantConfigSource>,
    audit: Arc<dyn AuditSink>,
    resolver: Arc<dyn ModelResolver>,
    assembler: ContextAssembler,
    retrieval: RetrievalPipeline,
}

impl Orchestrator {
    pub fn new(config: GatewayConfig, deps: OrchestratorDeps) -> Self {
        let assembler = ContextAssembler::new(Arc::clone(&deps.records), config.context.clone());
        let retrieval = RetrievalPipeline::new(deps.embeddings, deps.index);
        Self {
            config,
            limiter: deps.limiter,
            records: deps.records,
            tenant_configs: deps.tenant_configs,
            audit: deps.audit,
            resolver: deps.resolver,
            assembler,
            retrieval,
        }
    }

    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, GatewayError> {
        let correlation_id = Uuid::new_v4().to_string();
        let result = self.chat_inner(&request).await;
        self.finish(
            "ai.chat",
            Some(Capability::Chat),
            &request.tenant,
            &request.user,
            &correlation_id,
            result.as_ref().err(),
        );
        result
    }

    async fn chat_inner(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        self.limiter.check_policy(&LimitPolicy::CHAT, &request.tenant, &request.user)?;
        let config = self.enabled_config(&request.tenant, Capability::Chat).await?;

        let (digest, retrieved) = if config.is_enabled(Capability::Rag) {
            let options = RetrievalOptions {
                customer: None,
                top_k: self.config.retrieval.default_top_k,
            };
            let (digest, retrieved) = tokio::join!(
                self.assembler.build(&request.tenant, &request.message),
                self.retrieval.retrieve(&request.tenant, &request.message, &options),
            );
            // retrieval is optional grounding for chat: unconfigured or failed
            // retrieval contributes no citations and is not an error here
            let retrieved = match retrieved {
                Ok(retrieved) => retrieved,
                Err(error) => {
                    warn!(
                        event_name = "ai.chat.retrieval_degraded",
                        tenant_id = %request.tenant.0,
                        error = %error,
                        "retrieval failed; answering without citations"
                    );
                    None
                }
            };
            (digest, retrieved)
        } else {
            (self.assembler.build(&request.tenant, &request.message).await, None)
        };

        let resolved = self.resolver.resolve(&config)?;
        let prompt = chat_prompt(&digest, retrieved.as_ref(), &request.message);
        let reply = resolved
            .invoke(
                &prompt,
                self.config.invocation.chat_max_output_tokens,
                Duration::from_secs(self.config.invocation.chat_timeout_secs),
            )
            .await?;

        let citations = retrieved
            .map(|result| {
                result
                    .chunks()
                    .iter()
                    .map(|chunk| Citation {
                        document_id: chunk.document_id.clone(),
                        display_name: chunk.display_name.clone(),
                        score: chunk.display_score(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ChatResponse { reply, citations, model: resolved.model().to_string() })
    }

    pub async fn draft_email(
        &self,
        request: EmailDraftRequest,
    ) -> Result<EmailDraftResponse, GatewayError> {
        let correlation_id = Uuid::new_v4().to_string();
        let result = self.draft_email_inner(&request).await;
        self.finish(
            "ai.email_draft",
            Some(Capability::EmailDraft),
            &request.tenant,
            &request.user,
            &correlation_id,
            result.as_ref().err(),
        );
        result
    }

    async fn draft_email_inner(
        &self,
        request: &EmailDraftRequest,
    ) -> Result<EmailDraftResponse, GatewayError> {
        self.limiter.check_policy(&LimitPolicy::EMAIL_DRAFT, &request.tenant, &request.user)?;
        let config = self.enabled_config(&request.tenant, Capability::EmailDraft).await?;

        let (customer, deal) = tokio::join!(
            self.point_read_customer(&request.tenant, request.customer.as_ref()),
            self.point_read_deal(&request.tenant, request.deal.as_ref()),
        );

        let resolved = self.resolver.resolve(&config)?;
        let prompt = email_prompt(request, customer.as_ref(), deal.as_ref());
        let raw = resolved
            .invoke(
                &prompt,
                self.config.invocation.email_max_output_tokens,
                Duration::from_secs(self.config.invocation.email_timeout_secs),
            )
            .await?;

        Ok(EmailDraftResponse {
            draft: normalize_email(&raw),
            model: resolved.model().to_string(),
        })
    }

    pub async fn insights(&self, request: InsightsRequest) -> Result<InsightsResponse, GatewayError> {
        let correlation_id = Uuid::new_v4().to_string();
        let result = self.insights_inner(&request).await;
        self.finish(
            "ai.insights",
            Some(Capability::Insights),
            &request.tenant,
            &request.user,
            &correlation_id,
            result.as_ref().err(),
        );
        result
    }

    async fn insights_inner(
        &self,
        request: &InsightsRequest,
    ) -> Result<InsightsResponse, GatewayError> {
        self.limiter.check_policy(&LimitPolicy::INSIGHTS, &request.tenant, &request.user)?;
        let config = self.enabled_config(&request.tenant, Capability::Insights).await?;

        let digest = self.assembler.build_overview(&request.tenant).await;
        let resolved = self.resolver.resolve(&config)?;
        let raw = resolved
            .invoke(
                &insights_prompt(&digest),
                self.config.invocation.insights_max_output_tokens,
                Duration::from_secs(self.config.invocation.insights_timeout_secs),
            )
            .await?;

        Ok(InsightsResponse {
            report: normalize_insights(&raw),
            model: resolved.model().to_string(),
        })
    }

    pub async fn search_documents(
        &self,
        request: DocumentSearchRequest,
    ) -> Result<DocumentSearchResponse, GatewayError> {
        let correlation_id = Uuid::new_v4().to_string();
        let result = self.search_documents_inner(&request).await;
        self.finish(
            "ai.document_search",
            Some(Capability::Rag),
            &request.tenant,
            &request.user,
            &correlation_id,
            result.as_ref().err(),
        );
        result
    }

    async fn search_documents_inner(
        &self,
        request: &DocumentSearchRequest,
    ) -> Result<DocumentSearchResponse, GatewayError> {
        self.limiter.check_policy(&LimitPolicy::DOCUMENT_SEARCH, &request.tenant, &request.user)?;
        self.enabled_config(&request.tenant, Capability::Rag).await?;

        let options = RetrievalOptions {
            customer: request.customer.clone(),
            top_k: request.top_k.unwrap_or(self.config.retrieval.default_top_k),
        };
        let result = self
            .retrieval
            .retrieve(&request.tenant, &request.query, &options)
            .await?
            .ok_or(GatewayError::RetrievalNotConfigured)?;

        let matches = result
            .chunks()
            .iter()
            .map(|chunk| SearchMatch {
                document_id: chunk.document_id.clone(),
                display_name: chunk.display_name.clone(),
                excerpt: chunk.excerpt.clone(),
                score: chunk.display_score(),
            })
            .collect();
        Ok(DocumentSearchResponse { matches })
    }

    /// Settings-screen probe: a degenerate invocation with a minimal prompt, a
    /// tiny output ceiling, and a fixed deadline, so users can verify their
    /// credentials without materially consuming quota.
    pub async fn test_connection(
        &self,
        tenant: &TenantId,
        user: &UserId,
    ) -> Result<ConnectionTestResponse, GatewayError> {
        let correlation_id = Uuid::new_v4().to_string();
        let result = self.test_connection_inner(tenant).await;
        self.finish("ai.connection_test", None, tenant, user, &correlation_id, result.as_ref().err());
        result
    }

    async fn test_connection_inner(
        &self,
        tenant: &TenantId,
    ) -> Result<ConnectionTestResponse, GatewayError> {
        let user = UserId(String::new());
        self.limiter.check_policy(&LimitPolicy::CONNECTION_TEST, tenant, &user)?;

        let config = self
            .tenant_configs
            .ai_config(tenant)
            .await
            .map_err(|error| {
                GatewayError::ProviderUnavailable(format!("ai configuration lookup failed: {error}"))
            })?
            .ok_or_else(|| {
                GatewayError::ProviderUnavailable("tenant has no AI configuration".to_string())
            })?;

        let resolved = self.resolver.resolve(&config)?;
        let started = Instant::now();
        let raw = resolved
            .invoke(
                CONNECTION_TEST_PROMPT,
                self.config.invocation.connection_test_max_output_tokens,
                Duration::from_secs(self.config.invocation.connection_test_timeout_secs),
            )
            .await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let sample: String = raw.trim().chars().take(CONNECTION_TEST_SAMPLE_CHARS).collect();
        Ok(ConnectionTestResponse {
            provider: resolved.provider(),
            model: resolved.model().to_string(),
            latency_ms,
            sample,
        })
    }

    async fn enabled_config(
        &self,
        tenant: &TenantId,
        capability: Capability,
    ) -> Result<TenantAiConfig, GatewayError> {
        let config = self.tenant_configs.ai_config(tenant).await.map_err(|error| {
            GatewayError::ProviderUnavailable(format!("ai configuration lookup failed: {error}"))
        })?;
        match config {
            Some(config)
                if config.is_enabled(capability)
                    && (!config.provider.requires_credential() || config.has_credential()) =>
            {
                Ok(config)
            }
            // missing row, cleared flag, and missing credential all fail
            // closed the same way, before any business data is fetched
            _ => Err(GatewayError::CapabilityDisabled { capability }),
        }
    }

    async fn point_read_customer(
        &self,
        tenant: &TenantId,
        id: Option<&CustomerId>,
    ) -> Option<Customer> {
        let id = id?;
        match self.records.customer_by_id(tenant, id).await {
            Ok(customer) => customer,
            Err(error) => {
                warn!(
                    event_name = "ai.email_draft.customer_read_degraded",
                    tenant_id = %tenant.0,
                    error = %error,
                    "customer read failed; drafting without customer context"
                );
                None
            }
        }
    }

    async fn point_read_deal(&self, tenant: &TenantId, id: Option<&DealId>) -> Option<Deal> {
        let id = id?;
        match self.records.deal_by_id(tenant, id).await {
            Ok(deal) => deal,
            Err(error) => {
                warn!(
                    event_name = "ai.email_draft.deal_read_degraded",
                    tenant_id = %tenant.0,
                    error = %error,
                    "deal read failed; drafting without deal context"
                );
                None
            }
        }
    }

    /// Terminal bookkeeping: one audit event and one structured log line per
    /// call. The audit sink is fire-and-forget; its failure can never fail the
    /// user-visible response.
    fn finish(
        &self,
        event_type: &str,
        capability: Option<Capability>,
        tenant: &TenantId,
        actor: &UserId,
        correlation_id: &str,
        error: Option<&GatewayError>,
    ) {
        let outcome = match error {
            None => AuditOutcome::Success,
            Some(error) if error.is_rejection() => AuditOutcome::Rejected,
            Some(_) => AuditOutcome::Failed,
        };
        let mut event = AuditEvent::new(
            tenant.clone(),
            capability,
            correlation_id,
            event_type,
            actor.0.clone(),
            outcome,
        );
        if let Some(error) = error {
            event = event.with_metadata("error_code", error.code());
        }
        self.audit.emit(event);

        match error {
            None => info!(
                event_name = event_type,
                tenant_id = %tenant.0,
                actor = %actor.0,
                correlation_id,
                outcome = "success",
                "capability call completed"
            ),
            Some(error) => info!(
                event_name = event_type,
                tenant_id = %tenant.0,
                actor = %actor.0,
                correlation_id,
                outcome = if error.is_rejection() { "rejected" } else { "failed" },
                error_code = error.code(),
                "capability call did not complete"
            ),
        }
    }
}

fn chat_prompt(digest: &ContextDigest, retrieved: Option<&RetrievalResult>, message: &str) -> String {
    let mut prompt = String::from(
        "You are the AI assistant inside a CRM. Answer the user's question using only \
         the business context below. If the context does not cover the question, say so \
         briefly instead of guessing.\n\n# Business context\n",
    );
    prompt.push_str(digest.text());
    if let Some(result) = retrieved.filter(|result| !result.is_empty()) {
        prompt.push_str("\n\n# Related documents\n");
        for chunk in result.chunks() {
            prompt.push_str(&format!("- {}: {}\n", chunk.display_name, chunk.excerpt));
        }
    }
    prompt.push_str("\n# Question\n");
    prompt.push_str(message);
    prompt
}

fn email_prompt(
    request: &EmailDraftRequest,
    customer: Option<&Customer>,
    deal: Option<&Deal>,
) -> String {
    let mut prompt = format!(
        "Write a {} {} email for a CRM user. Respond with a JSON object of the form \
         {{\"subject\": \"...\", \"body\": \"...\"}} and nothing else.\n",
        request.tone.as_str(),
        request.purpose.as_str(),
    );
    if let Some(customer) = customer {
        prompt.push_str(&format!("\nRecipient: {}", customer.name));
        if let Some(email) = &customer.email {
            prompt.push_str(&format!(" <{email}>"));
        }
    }
    if let Some(deal) = deal {
        prompt.push_str(&format!(
            "\nRelated deal: {} [{}] ${}",
            deal.title,
            deal.stage.as_str(),
            deal.amount
        ));
    }
    if let Some(notes) = &request.notes {
        prompt.push_str(&format!("\nNotes from the sender: {notes}"));
    }
    prompt
}

fn insights_prompt(digest: &ContextDigest) -> String {
    format!(
        "You are a sales analyst. Review the business context below and respond with a \
         JSON object of the form {{\"summary\": \"...\", \"insights\": [\"...\"]}} where \
         insights are concrete, actionable observations.\n\n# Business context\n{}",
        digest.text()
    )
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use nimbus_core::domain::{Customer, CustomerId, Deal, DealId, DealStage, TenantId};

    use crate::context::{ContextCategory, ContextDigest, ContextSection};
    use crate::orchestrator::{
        chat_prompt, email_prompt, EmailDraftRequest, EmailPurpose, EmailTone,
    };

    fn digest(text: &str) -> ContextDigest {
        // only the rendered text matters for prompt construction
        let section = ContextSection {
            category: ContextCategory::Summary,
            text: text.to_string(),
        };
        ContextDigest::from_parts(vec![section], text.to_string(), false)
    }

    #[test]
    fn chat_prompt_embeds_context_and_question() {
        let prompt = chat_prompt(&digest("## Open deals\n- Renewal"), None, "how is my pipeline?");
        assert!(prompt.contains("## Open deals"));
        assert!(prompt.contains("how is my pipeline?"));
        assert!(!prompt.contains("# Related documents"));
    }

    #[test]
    fn email_prompt_mentions_tone_purpose_and_records() {
        let request = EmailDraftRequest {
            tenant: TenantId("org-1".to_string()),
            user: nimbus_core::domain::UserId("u-1".to_string()),
            customer: Some(CustomerId("c-1".to_string())),
            deal: Some(DealId("d-1".to_string())),
            tone: EmailTone::Friendly,
            purpose: EmailPurpose::FollowUp,
            notes: Some("mention the trial extension".to_string()),
        };
        let customer = Customer {
            id: CustomerId("c-1".to_string()),
            tenant_id: TenantId("org-1".to_string()),
            name: "Dana Wu".to_string(),
            email: Some("dana@example.test".to_string()),
            last_activity_at: Some(Utc::now()),
        };
        let deal = Deal {
            id: DealId("d-1".to_string()),
            tenant_id: TenantId("org-1".to_string()),
            customer_id: Some(CustomerId("c-1".to_string())),
            title: "Annual renewal".to_string(),
            amount: Decimal::new(48_000_00, 2),
            stage: DealStage::Open,
            expected_close: None,
        };

        let prompt = email_prompt(&request, Some(&customer), Some(&deal));
        assert!(prompt.contains("friendly"));
        assert!(prompt.contains("follow-up"));
        assert!(prompt.contains("Dana Wu"));
        assert!(prompt.contains("Annual renewal"));
        assert!(prompt.contains("mention the trial extension"));
        assert!(prompt.contains("\"subject\""));
    }
}
