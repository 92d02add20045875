//! crates/form_submission_core/src/memory.rs
//!
//! In-memory implementations of the persistence ports. Used by the tests and
//! by the service when no database is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{Form, FormId, Submission, SubmissionStatus};
use crate::ports::{FormDefinitionService, PortError, PortResult, ReleaseToken, SubmissionStore};

/// Form definitions held in a map, keyed by form id.
#[derive(Default)]
pub struct InMemoryFormRepository {
    forms: RwLock<HashMap<FormId, Form>>,
}

impl InMemoryFormRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_forms(forms: impl IntoIterator<Item = Form>) -> Self {
        Self {
            forms: RwLock::new(forms.into_iter().map(|f| (f.id, f)).collect()),
        }
    }

    pub async fn insert(&self, form: Form) {
        self.forms.write().await.insert(form.id, form);
    }
}

#[async_trait]
impl FormDefinitionService for InMemoryFormRepository {
    async fn get_form(&self, form_id: FormId) -> PortResult<Form> {
        self.forms
            .read()
            .await
            .get(&form_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Form {} not found", form_id)))
    }
}

struct StoredSubmission {
    submission: Submission,
    version: i64,
}

/// Submissions with a version counter per row, giving the same optimistic
/// concurrency semantics as the Postgres adapter.
#[derive(Default)]
pub struct InMemorySubmissionStore {
    rows: RwLock<HashMap<Uuid, StoredSubmission>>,
}

impl InMemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl SubmissionStore for InMemorySubmissionStore {
    async fn load(&self, submission_id: Uuid) -> PortResult<Submission> {
        self.rows
            .read()
            .await
            .get(&submission_id)
            .map(|row| row.submission.clone())
            .ok_or_else(|| PortError::NotFound(format!("Submission {} not found", submission_id)))
    }

    async fn load_for_update(&self, submission_id: Uuid) -> PortResult<(Submission, ReleaseToken)> {
        self.rows
            .read()
            .await
            .get(&submission_id)
            .map(|row| {
                (
                    row.submission.clone(),
                    ReleaseToken::at_version(submission_id, row.version),
                )
            })
            .ok_or_else(|| PortError::NotFound(format!("Submission {} not found", submission_id)))
    }

    async fn save(&self, submission: &Submission, token: ReleaseToken) -> PortResult<()> {
        if token.submission_id != submission.id {
            return Err(PortError::Unexpected(format!(
                "Token for {} used to save {}",
                token.submission_id, submission.id
            )));
        }

        let mut rows = self.rows.write().await;
        match (rows.get_mut(&submission.id), token.expected_version) {
            (None, None) => {
                rows.insert(
                    submission.id,
                    StoredSubmission {
                        submission: submission.clone(),
                        version: 1,
                    },
                );
                Ok(())
            }
            (Some(row), Some(expected)) if row.version == expected => {
                row.submission = submission.clone();
                row.version += 1;
                Ok(())
            }
            (Some(_), _) => Err(PortError::Conflict(format!(
                "Submission {} was modified concurrently",
                submission.id
            ))),
            (None, Some(_)) => Err(PortError::NotFound(format!(
                "Submission {} not found",
                submission.id
            ))),
        }
    }

    async fn abandon_stale(&self, cutoff: DateTime<Utc>) -> PortResult<u64> {
        let mut rows = self.rows.write().await;
        let mut count = 0;
        for row in rows.values_mut() {
            let submission = &mut row.submission;
            if submission.status == SubmissionStatus::InProgress && submission.last_activity_at < cutoff {
                submission.status = SubmissionStatus::Abandoned;
                row.version += 1;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FormSettings;

    fn form() -> Form {
        Form {
            id: FormId(1),
            title: "Empty".to_string(),
            containers: vec![],
            settings: FormSettings::default(),
        }
    }

    #[tokio::test]
    async fn stale_token_is_a_conflict() {
        let store = InMemorySubmissionStore::new();
        let submission = Submission::start(&form(), Utc::now());
        store.save(&submission, ReleaseToken::for_new(submission.id)).await.unwrap();

        let (first, first_token) = store.load_for_update(submission.id).await.unwrap();
        let (second, second_token) = store.load_for_update(submission.id).await.unwrap();

        store.save(&first, first_token).await.unwrap();
        assert!(matches!(
            store.save(&second, second_token).await,
            Err(PortError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn inserting_twice_is_a_conflict() {
        let store = InMemorySubmissionStore::new();
        let submission = Submission::start(&form(), Utc::now());
        store.save(&submission, ReleaseToken::for_new(submission.id)).await.unwrap();

        assert!(matches!(
            store.save(&submission, ReleaseToken::for_new(submission.id)).await,
            Err(PortError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn abandon_stale_only_touches_idle_in_progress_rows() {
        let store = InMemorySubmissionStore::new();
        let long_ago = Utc::now() - chrono::Duration::days(3);

        let idle = Submission::start(&form(), long_ago);
        let mut finished = Submission::start(&form(), long_ago);
        finished.status = SubmissionStatus::Completed;
        let fresh = Submission::start(&form(), Utc::now());
        for s in [&idle, &finished, &fresh] {
            store.save(s, ReleaseToken::for_new(s.id)).await.unwrap();
        }

        let cutoff = Utc::now() - chrono::Duration::days(1);
        assert_eq!(store.abandon_stale(cutoff).await.unwrap(), 1);
        assert_eq!(store.load(idle.id).await.unwrap().status, SubmissionStatus::Abandoned);
        assert_eq!(store.load(finished.id).await.unwrap().status, SubmissionStatus::Completed);
        assert_eq!(store.load(fresh.id).await.unwrap().status, SubmissionStatus::InProgress);
    }
}
