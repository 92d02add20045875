//! crates/form_submission_core/src/engine.rs
//!
//! The submission state machine. Each call is one stateless unit of work:
//! everything it needs lives in the persisted `Submission`, loaded for update
//! and written back with the store's concurrency token.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatch::CompletionDispatcher;
use crate::domain::{
    CompletionEvent, Container, ContainerId, Form, FormId, Intent, Outcome, PageErrors, PageInput,
    PageView, Submission, SubmissionStatus,
};
use crate::error::{EngineError, EngineResult, ReferenceError};
use crate::ports::{FormDefinitionService, PortError, ReleaseToken, SubmissionStore};
use crate::security::{FilterContext, SecurityChain};
use crate::validation::ValidatorRegistry;

/// What one attempt did to the submission, before it is persisted.
enum Step {
    Navigated(ContainerId),
    Rejected(PageErrors),
    /// Completed from the given container, which passed every filter.
    Completed(ContainerId),
}

pub struct SubmissionEngine {
    forms: Arc<dyn FormDefinitionService>,
    store: Arc<dyn SubmissionStore>,
    validators: ValidatorRegistry,
    security: SecurityChain,
    dispatcher: CompletionDispatcher,
}

impl SubmissionEngine {
    pub fn new(
        forms: Arc<dyn FormDefinitionService>,
        store: Arc<dyn SubmissionStore>,
        validators: ValidatorRegistry,
        security: SecurityChain,
        dispatcher: CompletionDispatcher,
    ) -> Self {
        Self {
            forms,
            store,
            validators,
            security,
            dispatcher,
        }
    }

    //=====================================================================================
    // Public Operations
    //=====================================================================================

    /// Resolves the page to render for `(form_id, submission_id?)` together
    /// with the stored values and errors of that page. Never writes.
    pub async fn current_page(
        &self,
        form_id: FormId,
        submission_id: Option<Uuid>,
    ) -> EngineResult<PageView> {
        let form = self.load_form(form_id).await?;

        let submission = match submission_id {
            Some(id) => {
                let submission = self.store.load(id).await.map_err(|e| unknown_submission(id, e))?;
                check_reference(&form, &submission)?;
                Some(submission)
            }
            None => None,
        };

        let container = match &submission {
            Some(s) => resolve_container(&form, s)?,
            None => form.first_container().ok_or(EngineError::EmptyForm(form_id))?,
        };

        let (values, errors) = match &submission {
            Some(s) => (s.values_for(container), s.errors_for(container.id)),
            None => Default::default(),
        };

        Ok(PageView {
            form_id,
            container: container.clone(),
            page_number: form.position_of(container.id).map_or(1, |i| i + 1),
            page_count: form.containers.len(),
            is_last: form.is_last_container(container.id),
            read_only: submission.as_ref().is_some_and(Submission::is_completed),
            submission,
            values,
            errors,
        })
    }

    /// Applies one page transition. Without a `submission_id` a new
    /// submission is started on the form's first page.
    pub async fn advance(
        &self,
        form_id: FormId,
        submission_id: Option<Uuid>,
        intent: Intent,
        input: PageInput,
    ) -> EngineResult<Outcome> {
        let form = self.load_form(form_id).await?;
        let mut retried = false;
        // Container whose CAPTCHA the previous attempt already verified.
        let mut captcha_passed_on: Option<ContainerId> = None;

        loop {
            let now = Utc::now();
            let (mut submission, token) = match submission_id {
                Some(id) => self
                    .store
                    .load_for_update(id)
                    .await
                    .map_err(|e| unknown_submission(id, e))?,
                None => {
                    if !form.is_open_at(now) {
                        return Err(EngineError::FormClosed(form_id));
                    }
                    let submission = Submission::start(&form, now);
                    info!(submission_id = %submission.id, form_id = %form_id, "Starting new submission.");
                    let token = ReleaseToken::for_new(submission.id);
                    (submission, token)
                }
            };
            check_reference(&form, &submission)?;

            if submission.is_completed() {
                debug!(submission_id = %submission.id, "Submission already completed; read-only.");
                return Ok(Outcome::ReadOnly { submission });
            }

            let step = self
                .apply(&form, &mut submission, intent, &input, now, captcha_passed_on)
                .await?;
            if let Step::Completed(container_id) = step {
                captcha_passed_on = Some(container_id);
            }

            match self.store.save(&submission, token).await {
                Ok(()) => {}
                Err(PortError::Conflict(reason)) if !retried && submission_id.is_some() => {
                    warn!(submission_id = %submission.id, "Save conflicted, re-applying once: {}", reason);
                    retried = true;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            return Ok(self.finish(&form, submission, step, now));
        }
    }

    /// Marks submissions idle for longer than `idle_for` as abandoned.
    pub async fn expire_idle(&self, idle_for: chrono::Duration) -> EngineResult<u64> {
        let cutoff = Utc::now() - idle_for;
        let count = self.store.abandon_stale(cutoff).await?;
        if count > 0 {
            info!(count, %cutoff, "Marked idle submissions as abandoned.");
        }
        Ok(count)
    }

    //=====================================================================================
    // Transition Logic
    //=====================================================================================

    async fn apply(
        &self,
        form: &Form,
        submission: &mut Submission,
        intent: Intent,
        input: &PageInput,
        now: DateTime<Utc>,
        captcha_passed_on: Option<ContainerId>,
    ) -> EngineResult<Step> {
        let current = resolve_container(form, submission)?;
        submission.current_container_id = Some(current.id);
        submission.touch(now);
        submission.record_first_render(input.rendered_at, now);

        if intent == Intent::Prev {
            let target = form.previous_container(current.id).unwrap_or(current);
            submission.current_container_id = Some(target.id);
            return Ok(Step::Navigated(target.id));
        }

        // Reaching the last page always attempts completion, whatever the intent.
        let is_submit = form.is_last_container(current.id);

        submission.errors.remove(&current.id);
        let page = self.validators.validate_page(current, &input.fields);
        let mut errors = page.errors;

        let veto = {
            let ctx = FilterContext {
                form,
                submission: &*submission,
                container: current,
                input,
                is_submit,
                captcha_verified: captcha_passed_on == Some(current.id),
                now,
            };
            // With field errors already present the network-bound filters are skipped.
            self.security.run(&ctx, !errors.is_empty()).await
        };
        if let Some(veto) = veto {
            errors.push_page(veto.message);
        }

        if !errors.is_empty() {
            submission.errors.insert(current.id, errors.clone());
            return Ok(Step::Rejected(errors));
        }

        for (element_id, value) in page.values {
            match value {
                Some(value) => {
                    submission.values.insert(element_id, value);
                }
                None => {
                    submission.values.remove(&element_id);
                }
            }
        }

        if is_submit {
            submission.status = SubmissionStatus::Completed;
            return Ok(Step::Completed(current.id));
        }

        let next = form
            .next_container(current.id)
            .ok_or(EngineError::EmptyForm(form.id))?;
        // Errors left from an earlier visit to the target page are stale now.
        submission.errors.remove(&next.id);
        submission.current_container_id = Some(next.id);
        Ok(Step::Navigated(next.id))
    }

    /// Turns a persisted step into the caller's outcome. Completion is
    /// dispatched here, after the status change was saved, so a lost race
    /// never dispatches twice.
    fn finish(&self, form: &Form, submission: Submission, step: Step, now: DateTime<Utc>) -> Outcome {
        match step {
            Step::Navigated(container_id) => {
                info!(
                    submission_id = %submission.id,
                    form_id = %form.id,
                    container_id = %container_id,
                    "Submission navigated."
                );
                match form.container(container_id) {
                    Some(container) => Outcome::Navigated {
                        container: container.clone(),
                        submission,
                    },
                    None => Outcome::ReadOnly { submission },
                }
            }
            Step::Rejected(errors) => {
                info!(
                    submission_id = %submission.id,
                    form_id = %form.id,
                    field_errors = errors.fields.len(),
                    page_errors = errors.page.len(),
                    "Submission rejected."
                );
                Outcome::Rejected { submission, errors }
            }
            Step::Completed(_) => {
                info!(submission_id = %submission.id, form_id = %form.id, "Submission completed.");
                self.dispatcher.dispatch(CompletionEvent {
                    submission_id: submission.id,
                    form_id: form.id,
                    completed_at: now,
                });
                Outcome::Completed { submission }
            }
        }
    }

    async fn load_form(&self, form_id: FormId) -> EngineResult<Form> {
        let form = self.forms.get_form(form_id).await.map_err(|e| match e {
            PortError::NotFound(_) => EngineError::FormNotFound(form_id),
            other => EngineError::Port(other),
        })?;
        if form.containers.is_empty() {
            return Err(EngineError::EmptyForm(form_id));
        }
        Ok(form)
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

fn unknown_submission(id: Uuid, error: PortError) -> EngineError {
    match error {
        PortError::NotFound(_) => ReferenceError::UnknownSubmission(id).into(),
        other => EngineError::Port(other),
    }
}

fn check_reference(form: &Form, submission: &Submission) -> Result<(), ReferenceError> {
    if submission.form_id != form.id {
        return Err(ReferenceError::FormMismatch {
            submission_id: submission.id,
            requested: form.id,
            actual: submission.form_id,
        });
    }
    if submission.status == SubmissionStatus::Abandoned {
        return Err(ReferenceError::Abandoned(submission.id));
    }
    Ok(())
}

/// The container a submission is on. A submission that has not been
/// positioned yet starts on the first container.
fn resolve_container<'f>(
    form: &'f Form,
    submission: &Submission,
) -> Result<&'f Container, ReferenceError> {
    match submission.current_container_id {
        Some(id) => form.container(id).ok_or(ReferenceError::DanglingContainer {
            submission_id: submission.id,
            container_id: id,
        }),
        None => form.first_container().ok_or(ReferenceError::DanglingContainer {
            submission_id: submission.id,
            container_id: ContainerId(0),
        }),
    }
}
