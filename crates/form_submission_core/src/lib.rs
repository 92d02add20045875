pub mod dispatch;
pub mod domain;
pub mod engine;
pub mod error;
pub mod memory;
pub mod ports;
pub mod security;
pub mod validation;

pub use dispatch::CompletionDispatcher;
pub use domain::{
    Choice, ChoiceId, CompletionEvent, Container, ContainerId, Element, ElementId, ElementSettings,
    ElementType, FieldValue, Form, FormId, FormSettings, Intent, Outcome, PageErrors, PageInput,
    PageView, Submission, SubmissionStatus, TextFormat,
};
pub use engine::SubmissionEngine;
pub use error::{EngineError, EngineResult, ReferenceError};
pub use ports::{
    CaptchaVerifier, CompletionAction, FormDefinitionService, PortError, PortResult, ReleaseToken,
    SubmissionStore,
};
pub use security::{FilterKind, FilterVerdict, SecurityChain, SecurityFilter};
pub use validation::{ElementValidator, ValidationError, ValidatorRegistry};
