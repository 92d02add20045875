//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use form_submission_core::ports::{CaptchaVerifier, FormDefinitionService, SubmissionStore};
use form_submission_core::{CompletionDispatcher, SecurityChain, SubmissionEngine, ValidatorRegistry};
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SubmissionEngine>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wires the submission engine from its adapters, with the default
    /// validators and the standard security chain.
    pub fn new(
        config: Arc<Config>,
        forms: Arc<dyn FormDefinitionService>,
        store: Arc<dyn SubmissionStore>,
        captcha: Arc<dyn CaptchaVerifier>,
        dispatcher: CompletionDispatcher,
    ) -> Self {
        let security = SecurityChain::standard(captcha, config.captcha_timeout);
        let engine = SubmissionEngine::new(
            forms,
            store,
            ValidatorRegistry::with_defaults(),
            security,
            dispatcher,
        );
        Self {
            engine: Arc::new(engine),
            config,
        }
    }
}
