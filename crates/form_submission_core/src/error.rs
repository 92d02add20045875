//! crates/form_submission_core/src/error.rs
//!
//! Request-level failures of the submission engine. Validation problems and
//! security vetoes are not errors; they come back as `Outcome::Rejected`.

use uuid::Uuid;

use crate::domain::{ContainerId, FormId};
use crate::ports::PortError;

/// The caller referenced something it should not have. These are not shown
/// as form errors; the caller typically restarts the form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceError {
    #[error("Submission {0} does not exist")]
    UnknownSubmission(Uuid),
    #[error("Submission {submission_id} belongs to form {actual}, not form {requested}")]
    FormMismatch {
        submission_id: Uuid,
        requested: FormId,
        actual: FormId,
    },
    #[error("Submission {submission_id} points at container {container_id}, which is not part of its form")]
    DanglingContainer {
        submission_id: Uuid,
        container_id: ContainerId,
    },
    #[error("Submission {0} was abandoned")]
    Abandoned(Uuid),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Form {0} not found")]
    FormNotFound(FormId),

    #[error("Form {0} has no pages")]
    EmptyForm(FormId),

    /// New submissions are outside the form's availability window.
    #[error("Form {0} is not accepting submissions")]
    FormClosed(FormId),

    #[error("Invalid reference: {0}")]
    InvalidReference(#[from] ReferenceError),

    /// Infrastructure fault from a port (store unavailable, repeated conflict).
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),
}

pub type EngineResult<T> = Result<T, EngineError>;
