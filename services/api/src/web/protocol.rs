//! services/api/src/web/protocol.rs
//!
//! Defines the JSON payloads exchanged between the browser client and the API
//! server. Domain types stay free of transport concerns; everything here is
//! converted from or into them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use form_submission_core::domain::{
    Container, Element, ElementId, FieldValue, Intent, Outcome, PageErrors, PageInput, PageView,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

//=========================================================================================
// Payloads Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// One answer: a single string, or a list for multiple-choice elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum Answer {
    Single(String),
    Multiple(Vec<String>),
}

impl From<Answer> for FieldValue {
    fn from(answer: Answer) -> Self {
        match answer {
            Answer::Single(s) => FieldValue::Single(s),
            Answer::Multiple(v) => FieldValue::Multiple(v),
        }
    }
}

impl From<&FieldValue> for Answer {
    fn from(value: &FieldValue) -> Self {
        match value {
            FieldValue::Single(s) => Answer::Single(s.clone()),
            FieldValue::Multiple(v) => Answer::Multiple(v.clone()),
        }
    }
}

/// The button the respondent pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Next,
    Prev,
    Submit,
}

impl From<IntentKind> for Intent {
    fn from(kind: IntentKind) -> Self {
        match kind {
            IntentKind::Next => Intent::Next,
            IntentKind::Prev => Intent::Prev,
            IntentKind::Submit => Intent::Submit,
        }
    }
}

/// The body of `POST /forms/{form_id}/advance`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AdvanceRequest {
    /// Absent on the first request; a new submission is started.
    #[serde(default)]
    pub submission_id: Option<Uuid>,
    pub intent: IntentKind,
    /// Answers keyed by element id.
    #[serde(default)]
    pub fields: BTreeMap<i64, Answer>,
    /// The hidden trap field. Humans leave it empty.
    #[serde(default)]
    pub honeypot: Option<String>,
    /// When the page was rendered, echoed back by the client.
    #[serde(default)]
    pub rendered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub captcha_response: Option<String>,
}

impl AdvanceRequest {
    pub fn into_input(self, remote_ip: Option<String>) -> (Option<Uuid>, Intent, PageInput) {
        let input = PageInput {
            fields: self
                .fields
                .into_iter()
                .map(|(id, answer)| (ElementId(id), answer.into()))
                .collect(),
            honeypot: self.honeypot,
            rendered_at: self.rendered_at,
            captcha_response: self.captcha_response,
            remote_ip,
        };
        (self.submission_id, self.intent.into(), input)
    }
}

//=========================================================================================
// Payloads Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Messages attached to a page: page-level ones and per-element ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ErrorsBody {
    pub page: Vec<String>,
    pub fields: BTreeMap<i64, Vec<String>>,
}

impl From<&PageErrors> for ErrorsBody {
    fn from(errors: &PageErrors) -> Self {
        Self {
            page: errors.page.clone(),
            fields: errors
                .fields
                .iter()
                .map(|(id, messages)| (id.0, messages.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ElementBody {
    pub id: i64,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub required: bool,
    pub choices: Vec<String>,
}

impl From<&Element> for ElementBody {
    fn from(element: &Element) -> Self {
        let mut choices: Vec<_> = element.choices.iter().collect();
        choices.sort_by_key(|c| (c.sort, c.id));
        Self {
            id: element.id.0,
            label: element.label.clone(),
            kind: element.kind.as_str().to_string(),
            required: element.settings.required,
            choices: choices.into_iter().map(|c| c.text.clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ContainerBody {
    pub id: i64,
    pub label: String,
    pub elements: Vec<ElementBody>,
}

impl From<&Container> for ContainerBody {
    fn from(container: &Container) -> Self {
        Self {
            id: container.id.0,
            label: container.label.clone(),
            elements: container
                .ordered_elements()
                .into_iter()
                .map(ElementBody::from)
                .collect(),
        }
    }
}

/// The response of `GET /forms/{form_id}/page`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PageResponse {
    pub form_id: i64,
    pub submission_id: Option<Uuid>,
    pub status: Option<String>,
    pub page_number: usize,
    pub page_count: usize,
    pub is_last: bool,
    pub read_only: bool,
    pub container: ContainerBody,
    pub values: BTreeMap<i64, Answer>,
    pub errors: ErrorsBody,
    /// Echo this back as `rendered_at` when advancing. For a started
    /// submission this is the time the form was first rendered.
    pub rendered_at: DateTime<Utc>,
}

impl PageResponse {
    pub fn from_view(view: &PageView, now: DateTime<Utc>) -> Self {
        let rendered_at = view
            .submission
            .as_ref()
            .and_then(|s| s.first_rendered_at)
            .unwrap_or(now);
        Self {
            form_id: view.form_id.0,
            submission_id: view.submission.as_ref().map(|s| s.id),
            status: view.submission.as_ref().map(|s| s.status.as_str().to_string()),
            page_number: view.page_number,
            page_count: view.page_count,
            is_last: view.is_last,
            read_only: view.read_only,
            container: ContainerBody::from(&view.container),
            values: view
                .values
                .iter()
                .map(|(id, value)| (id.0, Answer::from(value)))
                .collect(),
            errors: ErrorsBody::from(&view.errors),
            rendered_at,
        }
    }
}

/// The response of `POST /forms/{form_id}/advance`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdvanceResponse {
    /// The submission moved to `container_id`.
    Navigated { submission_id: Uuid, container_id: i64 },
    /// The page was not accepted; `container_id` is the page to show again.
    Rejected {
        submission_id: Uuid,
        container_id: i64,
        errors: ErrorsBody,
    },
    Completed { submission_id: Uuid },
    /// The submission was already completed; nothing changed.
    ReadOnly { submission_id: Uuid },
}

impl From<&Outcome> for AdvanceResponse {
    fn from(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Navigated { submission, container } => AdvanceResponse::Navigated {
                submission_id: submission.id,
                container_id: container.id.0,
            },
            Outcome::Rejected { submission, errors } => AdvanceResponse::Rejected {
                submission_id: submission.id,
                container_id: submission.current_container_id.map_or(0, |c| c.0),
                errors: ErrorsBody::from(errors),
            },
            Outcome::Completed { submission } => AdvanceResponse::Completed {
                submission_id: submission.id,
            },
            Outcome::ReadOnly { submission } => AdvanceResponse::ReadOnly {
                submission_id: submission.id,
            },
        }
    }
}
