use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::services::job_store::JobStoreError;

/// Status of a batch job.
///
/// Moves forward only: `Pending → Processing → {Completed, Failed}`, with a
/// direct `Pending → Failed` edge for sources that never parse.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    /// Whether `self → next` is an allowed edge of the job state machine.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }

    /// True when `next` would move the job backwards (or sideways between
    /// terminal states).
    pub fn regresses_to(self, next: JobStatus) -> bool {
        next.rank() < self.rank() || (self.is_terminal() && next != self)
    }
}

/// Pipeline stage at which an image reference failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Fetch,
    Transform,
    Store,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ImageOutcome {
    Success { location: String },
    Failure { stage: Stage, reason: String },
}

/// Result of processing a single image reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageResult {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(flatten)]
    pub outcome: ImageOutcome,
}

impl ImageResult {
    pub fn success(reference: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            outcome: ImageOutcome::Success {
                location: location.into(),
            },
        }
    }

    pub fn failure(reference: impl Into<String>, stage: Stage, reason: impl ToString) -> Self {
        Self {
            reference: reference.into(),
            outcome: ImageOutcome::Failure {
                stage,
                reason: reason.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ImageOutcome::Success { .. })
    }

    pub fn location(&self) -> Option<&str> {
        match &self.outcome {
            ImageOutcome::Success { location } => Some(location),
            ImageOutcome::Failure { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ItemOutcome {
    Completed,
    PartiallyFailed,
    Failed,
}

impl ItemOutcome {
    /// Aggregate per-reference results into an item outcome.
    ///
    /// An empty result list counts as `Failed`: every item is expected to
    /// reference at least one image.
    pub fn aggregate(results: &[ImageResult]) -> Self {
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        match succeeded {
            0 => Self::Failed,
            n if n == results.len() => Self::Completed,
            _ => Self::PartiallyFailed,
        }
    }
}

/// Aggregated result for one batch item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemResult {
    pub name: String,
    pub results: Vec<ImageResult>,
    pub outcome: ItemOutcome,

    /// Item-level fault, set when the item failed as a whole rather than
    /// image by image.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl ItemResult {
    pub fn from_results(name: impl Into<String>, results: Vec<ImageResult>) -> Self {
        let outcome = ItemOutcome::aggregate(&results);
        let error = results
            .is_empty()
            .then(|| "item has no image references".to_string());
        Self {
            name: name.into(),
            results,
            outcome,
            error,
        }
    }

    pub fn faulted(name: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            name: name.into(),
            results: Vec::new(),
            outcome: ItemOutcome::Failed,
            error: Some(reason.to_string()),
        }
    }

    /// Locations of every artifact produced for this item, in input order.
    pub fn locations(&self) -> Vec<&str> {
        self.results.iter().filter_map(ImageResult::location).collect()
    }
}

/// A batch job as held by the job store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub total_items: Option<usize>,
    pub completed_items: usize,
    pub item_results: Vec<ItemResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Pending,
            total_items: None,
            completed_items: 0,
            item_results: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, rejecting edges the state machine does not allow.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), JobStoreError> {
        if !self.status.can_transition_to(next) {
            return Err(JobStoreError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Fail unless the job is currently `expected`.
    pub fn require_status(&self, expected: JobStatus) -> Result<(), JobStoreError> {
        if self.status != expected {
            return Err(JobStoreError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: expected,
            });
        }
        Ok(())
    }
}
