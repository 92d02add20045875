//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `FormDefinitionService` and `SubmissionStore` ports from the `core` crate.
//! It handles all interactions with the PostgreSQL database using `sqlx`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use form_submission_core::domain::{
    Choice, ChoiceId, Container, ContainerId, Element, ElementId, ElementSettings, FieldValue,
    Form, FormId, FormSettings, PageErrors, Submission, SubmissionStatus,
};
use form_submission_core::ports::{
    FormDefinitionService, PortError, PortResult, ReleaseToken, SubmissionStore,
};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Stored in `submission_errors.element_id` for page-level messages.
const PAGE_LEVEL: i64 = 0;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the form and submission ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct FormRecord {
    id: i64,
    title: String,
    settings: Json<FormSettings>,
}

#[derive(FromRow)]
struct ContainerRecord {
    id: i64,
    form_id: i64,
    label: String,
    sort: i32,
}
impl ContainerRecord {
    fn to_domain(self) -> Container {
        Container {
            id: ContainerId(self.id),
            form_id: FormId(self.form_id),
            label: self.label,
            sort: self.sort,
            elements: Vec::new(),
        }
    }
}

#[derive(FromRow)]
struct ElementRecord {
    id: i64,
    container_id: i64,
    label: String,
    sort: i32,
    element_type: String,
    settings: Json<ElementSettings>,
}
impl ElementRecord {
    fn to_domain(self) -> PortResult<Element> {
        let kind = self.element_type.parse().map_err(|e: String| {
            PortError::Unexpected(format!("Element {}: {}", self.id, e))
        })?;
        Ok(Element {
            id: ElementId(self.id),
            container_id: ContainerId(self.container_id),
            label: self.label,
            sort: self.sort,
            kind,
            settings: self.settings.0,
            choices: Vec::new(),
        })
    }
}

#[derive(FromRow)]
struct ChoiceRecord {
    id: i64,
    element_id: i64,
    text: String,
    sort: i32,
}
impl ChoiceRecord {
    fn to_domain(self) -> Choice {
        Choice {
            id: ChoiceId(self.id),
            text: self.text,
            sort: self.sort,
        }
    }
}

#[derive(FromRow)]
struct SubmissionRecord {
    id: Uuid,
    form_id: i64,
    status: String,
    current_container_id: Option<i64>,
    version: i64,
    started_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    first_rendered_at: Option<DateTime<Utc>>,
}

#[derive(FromRow)]
struct ValueRecord {
    element_id: i64,
    value: Json<FieldValue>,
}

#[derive(FromRow)]
struct ErrorRecord {
    container_id: i64,
    element_id: i64,
    message: String,
}

impl SubmissionRecord {
    fn to_domain(self, values: Vec<ValueRecord>, errors: Vec<ErrorRecord>) -> PortResult<Submission> {
        let status = self.status.parse().map_err(|e: String| {
            PortError::Unexpected(format!("Submission {}: {}", self.id, e))
        })?;

        let values = values
            .into_iter()
            .map(|r| (ElementId(r.element_id), r.value.0))
            .collect();

        let mut pages: BTreeMap<ContainerId, PageErrors> = BTreeMap::new();
        for r in errors {
            let page = pages.entry(ContainerId(r.container_id)).or_default();
            if r.element_id == PAGE_LEVEL {
                page.push_page(r.message);
            } else {
                page.push_field(ElementId(r.element_id), r.message);
            }
        }

        Ok(Submission {
            id: self.id,
            form_id: FormId(self.form_id),
            status,
            current_container_id: self.current_container_id.map(ContainerId),
            values,
            errors: pages,
            started_at: self.started_at,
            last_activity_at: self.last_activity_at,
            first_rendered_at: self.first_rendered_at,
        })
    }
}

//=========================================================================================
// Submission Helpers
//=========================================================================================

impl DbAdapter {
    /// Reads the row and its children from one snapshot, so values and
    /// errors always belong to the returned version.
    async fn fetch_submission(&self, submission_id: Uuid) -> PortResult<(Submission, i64)> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        let record = sqlx::query_as::<_, SubmissionRecord>(
            "SELECT id, form_id, status, current_container_id, version, started_at, \
             last_activity_at, first_rendered_at FROM submissions WHERE id = $1",
        )
        .bind(submission_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Submission {} not found", submission_id)))?;

        let values = sqlx::query_as::<_, ValueRecord>(
            "SELECT element_id, value FROM submission_values WHERE submission_id = $1",
        )
        .bind(submission_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(unexpected)?;

        let errors = sqlx::query_as::<_, ErrorRecord>(
            "SELECT container_id, element_id, message FROM submission_errors \
             WHERE submission_id = $1 ORDER BY container_id, element_id, position",
        )
        .bind(submission_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;

        let version = record.version;
        Ok((record.to_domain(values, errors)?, version))
    }

    /// Replaces the stored values and errors of a submission inside `tx`.
    async fn replace_children(
        tx: &mut Transaction<'_, Postgres>,
        submission: &Submission,
    ) -> PortResult<()> {
        sqlx::query("DELETE FROM submission_values WHERE submission_id = $1")
            .bind(submission.id)
            .execute(&mut **tx)
            .await
            .map_err(unexpected)?;
        sqlx::query("DELETE FROM submission_errors WHERE submission_id = $1")
            .bind(submission.id)
            .execute(&mut **tx)
            .await
            .map_err(unexpected)?;

        for (element_id, value) in &submission.values {
            sqlx::query(
                "INSERT INTO submission_values (submission_id, element_id, value) VALUES ($1, $2, $3)",
            )
            .bind(submission.id)
            .bind(element_id.0)
            .bind(Json(value))
            .execute(&mut **tx)
            .await
            .map_err(unexpected)?;
        }

        for (container_id, page) in &submission.errors {
            let page_rows = page.page.iter().map(|m| (PAGE_LEVEL, m));
            let field_rows = page
                .fields
                .iter()
                .flat_map(|(id, messages)| messages.iter().map(move |m| (id.0, m)));
            let rows: Vec<(i64, &String)> = page_rows.chain(field_rows).collect();
            for (position, (element_id, message)) in rows.into_iter().enumerate() {
                sqlx::query(
                    "INSERT INTO submission_errors (submission_id, container_id, element_id, position, message) \
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(submission.id)
                .bind(container_id.0)
                .bind(element_id)
                .bind(position as i32)
                .bind(message)
                .execute(&mut **tx)
                .await
                .map_err(unexpected)?;
            }
        }
        Ok(())
    }
}

//=========================================================================================
// `FormDefinitionService` Trait Implementation
//=========================================================================================

#[async_trait]
impl FormDefinitionService for DbAdapter {
    async fn get_form(&self, form_id: FormId) -> PortResult<Form> {
        let form = sqlx::query_as::<_, FormRecord>("SELECT id, title, settings FROM forms WHERE id = $1")
            .bind(form_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .ok_or_else(|| PortError::NotFound(format!("Form {} not found", form_id)))?;

        let containers = sqlx::query_as::<_, ContainerRecord>(
            "SELECT id, form_id, label, sort FROM containers WHERE form_id = $1 ORDER BY sort, id",
        )
        .bind(form_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let elements = sqlx::query_as::<_, ElementRecord>(
            "SELECT e.id, e.container_id, e.label, e.sort, e.element_type, e.settings \
             FROM elements e JOIN containers c ON c.id = e.container_id \
             WHERE c.form_id = $1 ORDER BY e.sort, e.id",
        )
        .bind(form_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let choices = sqlx::query_as::<_, ChoiceRecord>(
            "SELECT ch.id, ch.element_id, ch.text, ch.sort \
             FROM element_choices ch \
             JOIN elements e ON e.id = ch.element_id \
             JOIN containers c ON c.id = e.container_id \
             WHERE c.form_id = $1 ORDER BY ch.sort, ch.id",
        )
        .bind(form_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let mut choices_by_element: BTreeMap<i64, Vec<Choice>> = BTreeMap::new();
        for record in choices {
            choices_by_element
                .entry(record.element_id)
                .or_default()
                .push(record.to_domain());
        }

        let mut elements_by_container: BTreeMap<i64, Vec<Element>> = BTreeMap::new();
        for record in elements {
            let mut element = record.to_domain()?;
            element.choices = choices_by_element.remove(&element.id.0).unwrap_or_default();
            elements_by_container
                .entry(element.container_id.0)
                .or_default()
                .push(element);
        }

        let containers = containers
            .into_iter()
            .map(|record| {
                let mut container = record.to_domain();
                container.elements = elements_by_container
                    .remove(&container.id.0)
                    .unwrap_or_default();
                container
            })
            .collect();

        Ok(Form {
            id: FormId(form.id),
            title: form.title,
            containers,
            settings: form.settings.0,
        })
    }
}

//=========================================================================================
// `SubmissionStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl SubmissionStore for DbAdapter {
    async fn load(&self, submission_id: Uuid) -> PortResult<Submission> {
        let (submission, _) = self.fetch_submission(submission_id).await?;
        Ok(submission)
    }

    async fn load_for_update(&self, submission_id: Uuid) -> PortResult<(Submission, ReleaseToken)> {
        let (submission, version) = self.fetch_submission(submission_id).await?;
        Ok((submission, ReleaseToken::at_version(submission_id, version)))
    }

    async fn save(&self, submission: &Submission, token: ReleaseToken) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let written = match token.expected_version {
            None => sqlx::query(
                "INSERT INTO submissions \
                 (id, form_id, status, current_container_id, version, started_at, last_activity_at, first_rendered_at) \
                 VALUES ($1, $2, $3, $4, 1, $5, $6, $7) ON CONFLICT (id) DO NOTHING",
            )
            .bind(submission.id)
            .bind(submission.form_id.0)
            .bind(submission.status.as_str())
            .bind(submission.current_container_id.map(|c| c.0))
            .bind(submission.started_at)
            .bind(submission.last_activity_at)
            .bind(submission.first_rendered_at)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?,
            Some(expected) => sqlx::query(
                "UPDATE submissions SET status = $3, current_container_id = $4, \
                 last_activity_at = $5, first_rendered_at = $6, version = version + 1 \
                 WHERE id = $1 AND version = $2",
            )
            .bind(submission.id)
            .bind(expected)
            .bind(submission.status.as_str())
            .bind(submission.current_container_id.map(|c| c.0))
            .bind(submission.last_activity_at)
            .bind(submission.first_rendered_at)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?,
        };

        if written.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM submissions WHERE id = $1")
                .bind(submission.id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(unexpected)?
                .is_some();
            return Err(match (exists, token.expected_version) {
                (false, Some(_)) => {
                    PortError::NotFound(format!("Submission {} not found", submission.id))
                }
                _ => PortError::Conflict(format!(
                    "Submission {} was saved by another request",
                    submission.id
                )),
            });
        }

        Self::replace_children(&mut tx, submission).await?;
        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }

    async fn abandon_stale(&self, cutoff: DateTime<Utc>) -> PortResult<u64> {
        let result = sqlx::query(
            "UPDATE submissions SET status = 'abandoned', version = version + 1 \
             WHERE status = 'in_progress' AND last_activity_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected())
    }
}
