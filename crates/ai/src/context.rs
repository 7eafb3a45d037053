//! Keyword-triggered assembly of tenant business context.
//!
//! Not retrieval-augmented generation: selection is a deterministic rule table
//! over fixed keyword sets (English and Traditional Chinese; the product
//! ships bilingual). Every matched rule contributes one formatted section;
//! matched fetches run concurrently and a failed fetch simply contributes
//! nothing. Sections always render in category order, and the digest is
//! truncated once, at the very end, never per section.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::warn;

use nimbus_core::config::ContextConfig;
use nimbus_core::domain::{Customer, Deal, TaskItem, TenantId};
use nimbus_store::{RecordCounts, RecordStore, StoreError};

/// Fixed rendering order is the declaration order here (the derived `Ord`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContextCategory {
    Customers,
    Deals,
    Tasks,
    PeriodDeals,
    InactiveCustomers,
    Summary,
}

impl ContextCategory {
    pub fn label(self) -> &'static str {
        match self {
            Self::Customers => "customers",
            Self::Deals => "deals",
            Self::Tasks => "tasks",
            Self::PeriodDeals => "period_deals",
            Self::InactiveCustomers => "inactive_customers",
            Self::Summary => "summary",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextSection {
    pub category: ContextCategory,
    pub text: String,
}

/// The bounded, formatted slice of business data handed to a model as
/// grounding text. Request-scoped; never persisted.
#[derive(Clone, Debug)]
pub struct ContextDigest {
    sections: Vec<ContextSection>,
    rendered: String,
    truncated: bool,
}

impl ContextDigest {
    #[cfg(test)]
    pub(crate) fn from_parts(
        sections: Vec<ContextSection>,
        rendered: String,
        truncated: bool,
    ) -> Self {
        Self { sections, rendered, truncated }
    }

    pub fn text(&self) -> &str {
        &self.rendered
    }

    pub fn sections(&self) -> &[ContextSection] {
        &self.sections
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

struct KeywordRule {
    category: ContextCategory,
    keywords: &'static [&'static str],
}

const KEYWORD_RULES: &[KeywordRule] = &[
    KeywordRule {
        category: ContextCategory::Customers,
        keywords: &["customer", "client", "客戶", "顧客"],
    },
    KeywordRule {
        category: ContextCategory::Deals,
        keywords: &["deal", "pipeline", "revenue", "opportunit", "商機", "業績", "成交"],
    },
    KeywordRule {
        category: ContextCategory::Tasks,
        keywords: &["task", "todo", "to-do", "reminder", "任務", "待辦", "提醒"],
    },
    KeywordRule {
        category: ContextCategory::PeriodDeals,
        keywords: &["this month", "upcoming", "本月", "這個月", "近期"],
    },
    KeywordRule {
        category: ContextCategory::InactiveCustomers,
        keywords: &["inactive", "churn", "dormant", "不活躍", "流失", "沉寂"],
    },
];

const CUSTOMER_SECTION_LIMIT: usize = 20;

fn matched_categories(query: &str) -> Vec<ContextCategory> {
    let normalized = query.to_lowercase();
    KEYWORD_RULES
        .iter()
        .filter(|rule| rule.keywords.iter().any(|keyword| normalized.contains(keyword)))
        .map(|rule| rule.category)
        .collect()
}

pub struct ContextAssembler {
    store: Arc<dyn RecordStore>,
    config: ContextConfig,
}

impl ContextAssembler {
    pub fn new(store: Arc<dyn RecordStore>, config: ContextConfig) -> Self {
        Self { store, config }
    }

    /// Build a digest for a free-text query. Zero keyword matches fall back to
    /// one aggregate-count summary section so the model is never handed an
    /// empty context.
    pub async fn build(&self, tenant: &TenantId, query: &str) -> ContextDigest {
        let mut categories = matched_categories(query);
        if categories.is_empty() {
            categories.push(ContextCategory::Summary);
        }
        self.assemble(tenant, categories).await
    }

    /// Build a digest over every category, used by capabilities (insights)
    /// that want the full business picture rather than a query-driven slice.
    pub async fn build_overview(&self, tenant: &TenantId) -> ContextDigest {
        self.assemble(tenant, KEYWORD_RULES.iter().map(|rule| rule.category).collect()).await
    }

    async fn assemble(&self, tenant: &TenantId, categories: Vec<ContextCategory>) -> ContextDigest {
        let mut tasks: JoinSet<(ContextCategory, Result<String, StoreError>)> = JoinSet::new();
        for category in categories {
            let store = Arc::clone(&self.store);
            let tenant = tenant.clone();
            let config = self.config.clone();
            tasks.spawn(async move {
                let text = fetch_section_text(store, &tenant, category, &config).await;
                (category, text)
            });
        }

        let mut sections = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((category, Ok(text))) => sections.push(ContextSection { category, text }),
                Ok((category, Err(error))) => {
                    warn!(
                        event_name = "ai.context.section_fetch_failed",
                        tenant_id = %tenant.0,
                        category = category.label(),
                        error = %error,
                        "context section fetch failed; section skipped"
                    );
                }
                Err(error) => {
                    warn!(
                        event_name = "ai.context.section_task_failed",
                        tenant_id = %tenant.0,
                        error = %error,
                        "context section task failed; section skipped"
                    );
                }
            }
        }

        if sections.is_empty() {
            // every fetch failed; still never hand back an empty digest
            sections.push(ContextSection {
                category: ContextCategory::Summary,
                text: "## Business summary\nBusiness data is temporarily unavailable.".to_string(),
            });
        }

        sections.sort_by_key(|section| section.category);

        let joined =
            sections.iter().map(|section| section.text.as_str()).collect::<Vec<_>>().join("\n\n");
        let (rendered, truncated) =
            truncate_to_ceiling(&joined, self.config.char_ceiling, &self.config.truncation_marker);

        ContextDigest { sections, rendered, truncated }
    }
}

async fn fetch_section_text(
    store: Arc<dyn RecordStore>,
    tenant: &TenantId,
    category: ContextCategory,
    config: &ContextConfig,
) -> Result<String, StoreError> {
    match category {
        ContextCategory::Customers => {
            let customers = store.customers(tenant, CUSTOMER_SECTION_LIMIT).await?;
            Ok(format_customers("## Customers", &customers))
        }
        ContextCategory::Deals => {
            let deals = store.open_deals(tenant).await?;
            Ok(format_deals("## Open deals", &deals))
        }
        ContextCategory::Tasks => {
            let tasks = store.open_tasks(tenant, None).await?;
            Ok(format_tasks(&tasks))
        }
        ContextCategory::PeriodDeals => {
            let deals = store.deals_closing_within(tenant, config.close_horizon_days).await?;
            Ok(format_deals("## Deals closing soon", &deals))
        }
        ContextCategory::InactiveCustomers => {
            let customers = store.inactive_customers(tenant, config.inactive_days).await?;
            Ok(format_customers("## Inactive customers", &customers))
        }
        ContextCategory::Summary => {
            let counts = store.counts(tenant).await?;
            Ok(format_summary(counts))
        }
    }
}

fn format_customers(heading: &str, customers: &[Customer]) -> String {
    let mut text = heading.to_string();
    if customers.is_empty() {
        text.push_str("\n(none)");
        return text;
    }
    for customer in customers {
        text.push_str("\n- ");
        text.push_str(&customer.name);
        if let Some(email) = &customer.email {
            text.push_str(&format!(" <{email}>"));
        }
        if let Some(last_activity) = customer.last_activity_at {
            text.push_str(&format!(" (last activity {})", last_activity.format("%Y-%m-%d")));
        }
    }
    text
}

fn format_deals(heading: &str, deals: &[Deal]) -> String {
    let mut text = heading.to_string();
    if deals.is_empty() {
        text.push_str("\n(none)");
        return text;
    }
    for deal in deals {
        text.push_str(&format!("\n- {} [{}] ${}", deal.title, deal.stage.as_str(), deal.amount));
        if let Some(expected_close) = deal.expected_close {
            text.push_str(&format!(" (expected close {expected_close})"));
        }
    }
    text
}

fn format_tasks(tasks: &[TaskItem]) -> String {
    let mut text = "## Open tasks".to_string();
    if tasks.is_empty() {
        text.push_str("\n(none)");
        return text;
    }
    for task in tasks {
        text.push_str(&format!("\n- {}", task.title));
        if let Some(due_at) = task.due_at {
            text.push_str(&format!(" (due {})", due_at.format("%Y-%m-%d")));
        }
    }
    text
}

fn format_summary(counts: RecordCounts) -> String {
    format!(
        "## Business summary\ncustomers: {}\ndeals: {}\nopen tasks: {}",
        counts.customers, counts.deals, counts.open_tasks
    )
}

/// Truncate to `ceiling` characters and append the marker exactly once. The
/// marker itself is never dropped or clipped.
fn truncate_to_ceiling(text: &str, ceiling: usize, marker: &str) -> (String, bool) {
    if text.chars().count() <= ceiling {
        return (text.to_string(), false);
    }
    let mut truncated: String = text.chars().take(ceiling).collect();
    truncated.push_str(marker);
    (truncated, true)
}
