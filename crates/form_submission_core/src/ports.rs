//! crates/form_submission_core/src/ports.rs
//!
//! Defines the service contracts (traits) the submission engine depends on.
//! These traits form the boundary of the hexagonal architecture: the engine
//! never talks to a database, an HTTP client, or a mail server directly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{CompletionEvent, Form, FormId, Submission};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// Another writer saved the submission since it was loaded.
    #[error("Write conflict: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Concurrency Token
//=========================================================================================

/// Proof that the holder loaded a submission for update.
///
/// Stores implement optimistic versioning: `save` only succeeds when the
/// persisted version still equals `expected_version`. A token without an
/// expected version stands for a submission that has never been persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseToken {
    pub submission_id: Uuid,
    pub expected_version: Option<i64>,
}

impl ReleaseToken {
    pub fn for_new(submission_id: Uuid) -> Self {
        Self {
            submission_id,
            expected_version: None,
        }
    }

    pub fn at_version(submission_id: Uuid, version: i64) -> Self {
        Self {
            submission_id,
            expected_version: Some(version),
        }
    }
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Read-only access to form definitions owned by the host CMS.
#[async_trait]
pub trait FormDefinitionService: Send + Sync {
    async fn get_form(&self, form_id: FormId) -> PortResult<Form>;
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Plain read, used for rendering.
    async fn load(&self, submission_id: Uuid) -> PortResult<Submission>;

    /// Loads a submission together with the token required to write it back.
    async fn load_for_update(&self, submission_id: Uuid) -> PortResult<(Submission, ReleaseToken)>;

    /// Persists the submission. Returns `PortError::Conflict` when another
    /// writer got there first.
    async fn save(&self, submission: &Submission, token: ReleaseToken) -> PortResult<()>;

    /// Marks in-progress submissions idle since before `cutoff` as abandoned.
    /// Returns how many were touched.
    async fn abandon_stale(&self, cutoff: DateTime<Utc>) -> PortResult<u64>;
}

#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    /// Asks the verification service whether `response` is a solved challenge.
    /// `Ok(false)` means the service answered and rejected it; `Err` means the
    /// service could not be asked.
    async fn verify(&self, response: &str, remote_ip: Option<&str>) -> PortResult<bool>;
}

/// An external consumer of completed submissions (notifications, API pushes).
#[async_trait]
pub trait CompletionAction: Send + Sync {
    fn name(&self) -> &str;

    async fn on_completed(&self, event: &CompletionEvent) -> PortResult<()>;
}
