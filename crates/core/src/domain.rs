//! Tenant-scoped business records as this core consumes them.
//!
//! The persistent store behind these records is an external collaborator; the
//! orchestration layer only ever reads projections of them, always keyed by
//! tenant.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CustomerId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DealId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub tenant_id: TenantId,
    pub name: String,
    pub email: Option<String>,
    pub last_activity_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStage {
    Open,
    Won,
    Lost,
}

impl DealStage {
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Won => "won",
            Self::Lost => "lost",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deal {
    pub id: DealId,
    pub tenant_id: TenantId,
    pub customer_id: Option<CustomerId>,
    pub title: String,
    pub amount: Decimal,
    pub stage: DealStage,
    pub expected_close: Option<NaiveDate>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: TaskId,
    pub tenant_id: TenantId,
    pub owner: Option<UserId>,
    pub title: String,
    pub due_at: Option<DateTime<Utc>>,
    pub done: bool,
}

/// One ranked document excerpt returned by the tenant's chunk index.
///
/// `score` keeps full precision; display surfaces round through
/// [`ScoredChunk::display_score`] so ordering comparisons are never made on the
/// rounded value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub document_id: String,
    pub display_name: String,
    pub excerpt: String,
    pub score: f64,
}

impl ScoredChunk {
    pub fn display_score(&self) -> f64 {
        (self.score * 100.0).round() / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::{DealStage, ScoredChunk};

    #[test]
    fn deal_stage_open_is_the_only_open_stage() {
        assert!(DealStage::Open.is_open());
        assert!(!DealStage::Won.is_open());
        assert!(!DealStage::Lost.is_open());
    }

    #[test]
    fn display_score_rounds_to_two_decimals_without_touching_raw_score() {
        let chunk = ScoredChunk {
            document_id: "doc-1".to_string(),
            display_name: "Renewal terms.pdf".to_string(),
            excerpt: "…".to_string(),
            score: 0.876_543,
        };
        assert_eq!(chunk.display_score(), 0.88);
        assert_eq!(chunk.score, 0.876_543);
    }
}
