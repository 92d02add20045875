//! Shared fixtures for the engine integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use form_submission_core::memory::{InMemoryFormRepository, InMemorySubmissionStore};
use form_submission_core::{
    CaptchaVerifier, Choice, ChoiceId, CompletionAction, CompletionDispatcher, CompletionEvent,
    Container, ContainerId, Element, ElementId, ElementSettings, ElementType, FieldValue, Form,
    FormId, FormSettings, PageInput, PortResult, SecurityChain, SubmissionEngine, SubmissionStore,
    ValidatorRegistry,
};
use tokio::sync::mpsc;

//=========================================================================================
// Fakes
//=========================================================================================

pub struct RecordingCaptcha {
    answer: bool,
    calls: AtomicUsize,
}

impl RecordingCaptcha {
    pub fn answering(answer: bool) -> Arc<Self> {
        Arc::new(Self {
            answer,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptchaVerifier for RecordingCaptcha {
    async fn verify(&self, _response: &str, _remote_ip: Option<&str>) -> PortResult<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer)
    }
}

pub struct ChannelAction {
    sender: mpsc::UnboundedSender<CompletionEvent>,
}

#[async_trait]
impl CompletionAction for ChannelAction {
    fn name(&self) -> &str {
        "channel"
    }

    async fn on_completed(&self, event: &CompletionEvent) -> PortResult<()> {
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

//=========================================================================================
// Harness
//=========================================================================================

pub struct Harness {
    pub engine: SubmissionEngine,
    pub store: Arc<dyn SubmissionStore>,
    pub captcha: Arc<RecordingCaptcha>,
    pub completions: mpsc::UnboundedReceiver<CompletionEvent>,
}

impl Harness {
    pub fn new(forms: Vec<Form>) -> Self {
        Self::with_store(forms, Arc::new(InMemorySubmissionStore::new()), RecordingCaptcha::answering(true))
    }

    pub fn with_captcha(forms: Vec<Form>, captcha: Arc<RecordingCaptcha>) -> Self {
        Self::with_store(forms, Arc::new(InMemorySubmissionStore::new()), captcha)
    }

    pub fn with_store(
        forms: Vec<Form>,
        store: Arc<dyn SubmissionStore>,
        captcha: Arc<RecordingCaptcha>,
    ) -> Self {
        let (sender, completions) = mpsc::unbounded_channel();
        let action: Arc<dyn CompletionAction> = Arc::new(ChannelAction { sender });
        let engine = SubmissionEngine::new(
            Arc::new(InMemoryFormRepository::with_forms(forms)),
            store.clone(),
            ValidatorRegistry::with_defaults(),
            SecurityChain::standard(captcha.clone(), Duration::from_secs(1)),
            CompletionDispatcher::new(vec![action]),
        );
        Self {
            engine,
            store,
            captcha,
            completions,
        }
    }

    /// Waits briefly for the next completion event.
    pub async fn next_completion(&mut self) -> Option<CompletionEvent> {
        tokio::time::timeout(Duration::from_millis(500), self.completions.recv())
            .await
            .ok()
            .flatten()
    }
}

//=========================================================================================
// Form Builders
//=========================================================================================

pub fn element(id: i64, container: i64, kind: ElementType, settings: ElementSettings) -> Element {
    Element {
        id: ElementId(id),
        container_id: ContainerId(container),
        label: format!("Element {}", id),
        sort: id as i32,
        kind,
        settings,
        choices: vec![],
    }
}

pub fn text(id: i64, container: i64, settings: ElementSettings) -> Element {
    element(id, container, ElementType::Text, settings)
}

pub fn required_text(id: i64, container: i64) -> Element {
    text(
        id,
        container,
        ElementSettings {
            required: true,
            ..Default::default()
        },
    )
}

pub fn with_choices(mut element: Element, choices: &[&str]) -> Element {
    element.choices = choices
        .iter()
        .enumerate()
        .map(|(i, text)| Choice {
            id: ChoiceId(element.id.0 * 100 + i as i64),
            text: text.to_string(),
            sort: i as i32,
        })
        .collect();
    element
}

pub fn container(id: i64, form: i64, sort: i32, elements: Vec<Element>) -> Container {
    Container {
        id: ContainerId(id),
        form_id: FormId(form),
        label: format!("Page {}", sort + 1),
        sort,
        elements,
    }
}

pub fn form(id: i64, containers: Vec<Container>, settings: FormSettings) -> Form {
    Form {
        id: FormId(id),
        title: format!("Form {}", id),
        containers,
        settings,
    }
}

//=========================================================================================
// Input Builders
//=========================================================================================

pub fn input(fields: &[(i64, &str)]) -> PageInput {
    PageInput {
        fields: fields
            .iter()
            .map(|(id, value)| (ElementId(*id), FieldValue::Single(value.to_string())))
            .collect(),
        ..Default::default()
    }
}

/// Input that passes every enabled security filter.
pub fn human_input(fields: &[(i64, &str)]) -> PageInput {
    PageInput {
        rendered_at: Some(Utc::now() - chrono::Duration::seconds(60)),
        captcha_response: Some("solved".to_string()),
        ..input(fields)
    }
}
