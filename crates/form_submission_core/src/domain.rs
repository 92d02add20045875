//! crates/form_submission_core/src/domain.rs
//!
//! Defines the pure, core data structures for the form submission engine.
//! These structs are independent of any database or transport format; serde
//! derives exist so adapters can store settings and values as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

//=========================================================================================
// Identifiers
//=========================================================================================

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

numeric_id!(
    /// Identifies a form definition in the host CMS.
    FormId
);
numeric_id!(
    /// Identifies one page of a form.
    ContainerId
);
numeric_id!(ElementId);
numeric_id!(ChoiceId);

//=========================================================================================
// Form Definition (read-only to the engine)
//=========================================================================================

/// A multi-page form: an ordered sequence of containers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Form {
    pub id: FormId,
    pub title: String,
    pub containers: Vec<Container>,
    #[serde(default)]
    pub settings: FormSettings,
}

impl Form {
    /// Containers ordered by their `sort` index.
    pub fn ordered_containers(&self) -> Vec<&Container> {
        let mut containers: Vec<&Container> = self.containers.iter().collect();
        containers.sort_by_key(|c| (c.sort, c.id));
        containers
    }

    pub fn first_container(&self) -> Option<&Container> {
        self.ordered_containers().into_iter().next()
    }

    pub fn container(&self, id: ContainerId) -> Option<&Container> {
        self.containers.iter().find(|c| c.id == id)
    }

    /// Position of a container within the sorted sequence.
    pub fn position_of(&self, id: ContainerId) -> Option<usize> {
        self.ordered_containers().iter().position(|c| c.id == id)
    }

    pub fn next_container(&self, id: ContainerId) -> Option<&Container> {
        let ordered = self.ordered_containers();
        let index = ordered.iter().position(|c| c.id == id)?;
        ordered.get(index + 1).copied()
    }

    pub fn previous_container(&self, id: ContainerId) -> Option<&Container> {
        let ordered = self.ordered_containers();
        let index = ordered.iter().position(|c| c.id == id)?;
        index.checked_sub(1).and_then(|i| ordered.get(i).copied())
    }

    pub fn is_last_container(&self, id: ContainerId) -> bool {
        self.ordered_containers().last().map(|c| c.id) == Some(id)
    }

    /// Whether new submissions may be started at `now`.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        let opened = self.settings.opens_at.map_or(true, |from| now >= from);
        let not_closed = self.settings.closes_at.map_or(true, |until| now < until);
        opened && not_closed
    }
}

/// Form-level switches for the security filters and the availability window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormSettings {
    pub honeypot_enabled: bool,
    pub timetrap_enabled: bool,
    pub timetrap_threshold_secs: u32,
    pub linkcount_enabled: bool,
    pub linkcount_max: usize,
    pub captcha_enabled: bool,
    pub opens_at: Option<DateTime<Utc>>,
    pub closes_at: Option<DateTime<Utc>>,
}

impl Default for FormSettings {
    fn default() -> Self {
        Self {
            honeypot_enabled: false,
            timetrap_enabled: false,
            timetrap_threshold_secs: 3,
            linkcount_enabled: false,
            linkcount_max: 3,
            captcha_enabled: false,
            opens_at: None,
            closes_at: None,
        }
    }
}

/// One page of a form and the unit of navigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub form_id: FormId,
    pub label: String,
    pub sort: i32,
    pub elements: Vec<Element>,
}

impl Container {
    pub fn ordered_elements(&self) -> Vec<&Element> {
        let mut elements: Vec<&Element> = self.elements.iter().collect();
        elements.sort_by_key(|e| (e.sort, e.id));
        elements
    }

    pub fn contains_element(&self, id: ElementId) -> bool {
        self.elements.iter().any(|e| e.id == id)
    }
}

/// The discriminant used to pick a validator for an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Text,
    Textarea,
    OneChoice,
    MultipleChoice,
    Dropdown,
    Range,
    Content,
    Separator,
}

impl ElementType {
    /// Display-only elements never carry a value.
    pub fn is_display_only(self) -> bool {
        matches!(self, ElementType::Content | ElementType::Separator)
    }

    /// Free-text elements scanned by the link-count filter.
    pub fn is_text_bearing(self) -> bool {
        matches!(self, ElementType::Text | ElementType::Textarea)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ElementType::Text => "text",
            ElementType::Textarea => "textarea",
            ElementType::OneChoice => "one_choice",
            ElementType::MultipleChoice => "multiple_choice",
            ElementType::Dropdown => "dropdown",
            ElementType::Range => "range",
            ElementType::Content => "content",
            ElementType::Separator => "separator",
        }
    }
}

impl std::str::FromStr for ElementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ElementType::Text),
            "textarea" => Ok(ElementType::Textarea),
            "one_choice" => Ok(ElementType::OneChoice),
            "multiple_choice" => Ok(ElementType::MultipleChoice),
            "dropdown" => Ok(ElementType::Dropdown),
            "range" => Ok(ElementType::Range),
            "content" => Ok(ElementType::Content),
            "separator" => Ok(ElementType::Separator),
            other => Err(format!("unknown element type '{}'", other)),
        }
    }
}

/// Format classes a text element can be restricted to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextFormat {
    #[default]
    None,
    Numeric,
    Decimal,
    Email,
}

/// Validator parameters attached to an element. Which fields matter depends
/// on the element's type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementSettings {
    pub required: bool,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub input_format: TextFormat,
    pub min_answers: Option<usize>,
    pub max_answers: Option<usize>,
    pub range_from: Option<f64>,
    pub range_to: Option<f64>,
    pub step_size: Option<f64>,
}

/// A single input field (or display-only block) on a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    pub container_id: ContainerId,
    pub label: String,
    pub sort: i32,
    #[serde(rename = "type")]
    pub kind: ElementType,
    #[serde(default)]
    pub settings: ElementSettings,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

impl Element {
    pub fn has_choice(&self, text: &str) -> bool {
        self.choices.iter().any(|c| c.text == text)
    }
}

/// A predefined answer option of a choice-based element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub id: ChoiceId,
    pub text: String,
    pub sort: i32,
}

//=========================================================================================
// Submission Aggregate
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    InProgress,
    Completed,
    Abandoned,
}

impl SubmissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionStatus::InProgress => "in_progress",
            SubmissionStatus::Completed => "completed",
            SubmissionStatus::Abandoned => "abandoned",
        }
    }
}

impl std::str::FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(SubmissionStatus::InProgress),
            "completed" => Ok(SubmissionStatus::Completed),
            "abandoned" => Ok(SubmissionStatus::Abandoned),
            other => Err(format!("unknown submission status '{}'", other)),
        }
    }
}

/// A raw or validated answer. Multiple-choice answers are lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Single(String),
    Multiple(Vec<String>),
}

impl FieldValue {
    /// Blank means "nothing entered": empty or whitespace-only text, or an
    /// empty selection.
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Single(s) => s.trim().is_empty(),
            FieldValue::Multiple(items) => items.iter().all(|s| s.trim().is_empty()),
        }
    }

    pub fn as_single(&self) -> Option<&str> {
        match self {
            FieldValue::Single(s) => Some(s.as_str()),
            FieldValue::Multiple(_) => None,
        }
    }

    /// All text carried by the value, for scanning filters.
    pub fn texts(&self) -> Vec<&str> {
        match self {
            FieldValue::Single(s) => vec![s.as_str()],
            FieldValue::Multiple(items) => items.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Single(value.to_string())
    }
}

/// Errors recorded for one container: page-level messages (stored under
/// element id `0` by persistence adapters) and per-field messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageErrors {
    pub page: Vec<String>,
    pub fields: BTreeMap<ElementId, Vec<String>>,
}

impl PageErrors {
    pub fn is_empty(&self) -> bool {
        self.page.is_empty() && self.fields.values().all(Vec::is_empty)
    }

    pub fn push_field(&mut self, element_id: ElementId, message: impl Into<String>) {
        self.fields.entry(element_id).or_default().push(message.into());
    }

    pub fn push_page(&mut self, message: impl Into<String>) {
        self.page.push(message.into());
    }
}

/// The persisted record of one respondent working through a form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub form_id: FormId,
    pub status: SubmissionStatus,
    pub current_container_id: Option<ContainerId>,
    pub values: BTreeMap<ElementId, FieldValue>,
    pub errors: BTreeMap<ContainerId, PageErrors>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// When the form was first shown to the respondent, as reported by the
    /// first request that carried a render time. Read by the time-trap.
    #[serde(default)]
    pub first_rendered_at: Option<DateTime<Utc>>,
}

impl Submission {
    /// Starts a submission positioned on the form's first container.
    pub fn start(form: &Form, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            form_id: form.id,
            status: SubmissionStatus::InProgress,
            current_container_id: form.first_container().map(|c| c.id),
            values: BTreeMap::new(),
            errors: BTreeMap::new(),
            started_at: now,
            last_activity_at: now,
            first_rendered_at: None,
        }
    }

    /// Records the first render time once. Later reports are ignored and a
    /// time in the future is clamped to `now`.
    pub fn record_first_render(&mut self, rendered_at: Option<DateTime<Utc>>, now: DateTime<Utc>) {
        if self.first_rendered_at.is_none() {
            self.first_rendered_at = rendered_at.map(|at| at.min(now));
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == SubmissionStatus::Completed
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = now;
    }

    pub fn errors_for(&self, container_id: ContainerId) -> PageErrors {
        self.errors.get(&container_id).cloned().unwrap_or_default()
    }

    /// Stored values of the elements on `container`.
    pub fn values_for(&self, container: &Container) -> BTreeMap<ElementId, FieldValue> {
        self.values
            .iter()
            .filter(|(id, _)| container.contains_element(**id))
            .map(|(id, value)| (*id, value.clone()))
            .collect()
    }
}

//=========================================================================================
// Requests and Outcomes
//=========================================================================================

/// The page transition the respondent asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Next,
    Prev,
    Submit,
}

/// Everything posted with one page: field values for the current container
/// plus the hidden anti-spam signals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageInput {
    pub fields: BTreeMap<ElementId, FieldValue>,
    /// Hidden field that must stay empty.
    pub honeypot: Option<String>,
    /// When the page was rendered. Only the first one a submission sees is kept.
    pub rendered_at: Option<DateTime<Utc>>,
    pub captcha_response: Option<String>,
    pub remote_ip: Option<String>,
}

/// The result of one `advance` call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Navigated {
        submission: Submission,
        container: Container,
    },
    Rejected {
        submission: Submission,
        errors: PageErrors,
    },
    Completed {
        submission: Submission,
    },
    ReadOnly {
        submission: Submission,
    },
}

impl Outcome {
    pub fn submission(&self) -> &Submission {
        match self {
            Outcome::Navigated { submission, .. }
            | Outcome::Rejected { submission, .. }
            | Outcome::Completed { submission }
            | Outcome::ReadOnly { submission } => submission,
        }
    }
}

/// What a caller needs to render the current page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageView {
    pub form_id: FormId,
    pub container: Container,
    pub page_number: usize,
    pub page_count: usize,
    pub is_last: bool,
    pub submission: Option<Submission>,
    pub values: BTreeMap<ElementId, FieldValue>,
    pub errors: PageErrors,
    pub read_only: bool,
}

/// Emitted once when a submission reaches `completed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub submission_id: Uuid,
    pub form_id: FormId,
    pub completed_at: DateTime<Utc>,
}
