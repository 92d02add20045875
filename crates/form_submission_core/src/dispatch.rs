//! crates/form_submission_core/src/dispatch.rs
//!
//! Fans a completion event out to the registered external actions.
//! The engine fires and forgets: action failures are logged here and never
//! reach the respondent.

use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::domain::CompletionEvent;
use crate::ports::CompletionAction;

#[derive(Clone, Default)]
pub struct CompletionDispatcher {
    actions: Vec<Arc<dyn CompletionAction>>,
}

impl CompletionDispatcher {
    pub fn new(actions: Vec<Arc<dyn CompletionAction>>) -> Self {
        Self { actions }
    }

    pub fn register(&mut self, action: Arc<dyn CompletionAction>) {
        self.actions.push(action);
    }

    pub fn action_names(&self) -> Vec<String> {
        self.actions.iter().map(|a| a.name().to_string()).collect()
    }

    /// Spawns the actions on the runtime and returns immediately.
    /// The handle is only useful to callers that want to wait, such as tests.
    pub fn dispatch(&self, event: CompletionEvent) -> JoinHandle<()> {
        let actions = self.actions.clone();
        tokio::spawn(async move {
            Self::run_actions(&actions, &event).await;
        })
    }

    async fn run_actions(actions: &[Arc<dyn CompletionAction>], event: &CompletionEvent) {
        let results = join_all(actions.iter().map(|action| async move {
            (action.name().to_string(), action.on_completed(event).await)
        }))
        .await;

        for (name, result) in results {
            match result {
                Ok(()) => info!(
                    submission_id = %event.submission_id,
                    action = %name,
                    "Completion action finished."
                ),
                Err(e) => error!(
                    submission_id = %event.submission_id,
                    action = %name,
                    "Completion action failed: {}",
                    e
                ),
            }
        }
    }
}
