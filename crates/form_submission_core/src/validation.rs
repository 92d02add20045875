//! crates/form_submission_core/src/validation.rs
//!
//! Element validators, one per element type, collected in a typed registry.
//! Validators are pure: they see one element's settings and one raw value,
//! never other elements' answers.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::domain::{Container, Element, ElementId, ElementType, FieldValue, PageErrors, TextFormat};

static NUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+$").expect("numeric pattern compiles"));
static DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?[0-9]+([.,][0-9]+)?$").expect("decimal pattern compiles"));
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s.]+(\.[^@\s.]+)+$").expect("email pattern compiles")
});

//=========================================================================================
// Validation Errors
//=========================================================================================

/// Inclusive bounds on the number of selected answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerBounds {
    pub min: Option<usize>,
    pub max: Option<usize>,
}

impl fmt::Display for AnswerBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.max) {
            (Some(min), Some(max)) => write!(f, "between {} and {}", min, max),
            (Some(min), None) => write!(f, "at least {}", min),
            (None, Some(max)) => write!(f, "at most {}", max),
            (None, None) => write!(f, "any number of"),
        }
    }
}

/// A user-facing reason why a value was not accepted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("This field is required.")]
    Required,
    #[error("Please enter a single value.")]
    ExpectedSingleValue,
    #[error("The input is too short. It must have at least {min} characters.")]
    TooShort { min: usize },
    #[error("The input is too long. It can have at most {max} characters.")]
    TooLong { max: usize },
    #[error("Please enter a valid {0}.")]
    InvalidFormat(FormatName),
    #[error("Please select one of the given choices.")]
    InvalidChoice,
    #[error("Too few choices. Please select {0} answers.")]
    TooFewChoices(AnswerBounds),
    #[error("Too many choices. Please select {0} answers.")]
    TooManyChoices(AnswerBounds),
    #[error("Please enter a number.")]
    NotANumber,
    #[error("The value must be between {from} and {to}.")]
    OutOfRange { from: f64, to: f64 },
    #[error("The value must be a multiple of {step}.")]
    InvalidStep { step: f64 },
    #[error("This field cannot be validated.")]
    UnsupportedType(ElementType),
}

/// Human name of a text format, used in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatName(pub TextFormat);

impl fmt::Display for FormatName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.0 {
            TextFormat::None => "value",
            TextFormat::Numeric => "number",
            TextFormat::Decimal => "decimal number",
            TextFormat::Email => "email address",
        };
        f.write_str(name)
    }
}

pub type ValidationResult = Result<Option<FieldValue>, Vec<ValidationError>>;

//=========================================================================================
// Validator Trait and Implementations
//=========================================================================================

/// Validates one non-blank raw value against an element's settings.
///
/// Required-ness is handled by the registry before a validator is called, so
/// implementations only ever see something the respondent actually entered.
pub trait ElementValidator: Send + Sync {
    fn validate(&self, element: &Element, raw: &FieldValue) -> ValidationResult;
}

fn single(raw: &FieldValue) -> Result<&str, Vec<ValidationError>> {
    match raw {
        FieldValue::Single(s) => Ok(s.as_str()),
        FieldValue::Multiple(items) if items.len() == 1 => Ok(items[0].as_str()),
        FieldValue::Multiple(_) => Err(vec![ValidationError::ExpectedSingleValue]),
    }
}

fn check_length(text: &str, element: &Element, errors: &mut Vec<ValidationError>) {
    let length = text.chars().count();
    if let Some(min) = element.settings.min_length {
        if length < min {
            errors.push(ValidationError::TooShort { min });
        }
    }
    if let Some(max) = element.settings.max_length {
        if length > max {
            errors.push(ValidationError::TooLong { max });
        }
    }
}

/// Single-line text: length bounds and an optional format class.
pub struct TextValidator;

impl ElementValidator for TextValidator {
    fn validate(&self, element: &Element, raw: &FieldValue) -> ValidationResult {
        let text = single(raw)?;
        let mut errors = Vec::new();
        check_length(text, element, &mut errors);

        let format = element.settings.input_format;
        let pattern = match format {
            TextFormat::None => None,
            TextFormat::Numeric => Some(&*NUMERIC),
            TextFormat::Decimal => Some(&*DECIMAL),
            TextFormat::Email => Some(&*EMAIL),
        };
        if let Some(pattern) = pattern {
            if !pattern.is_match(text.trim()) {
                errors.push(ValidationError::InvalidFormat(FormatName(format)));
            }
        }

        if errors.is_empty() {
            Ok(Some(FieldValue::Single(text.to_string())))
        } else {
            Err(errors)
        }
    }
}

/// Multi-line text: length bounds only.
pub struct TextareaValidator;

impl ElementValidator for TextareaValidator {
    fn validate(&self, element: &Element, raw: &FieldValue) -> ValidationResult {
        let text = single(raw)?;
        let mut errors = Vec::new();
        check_length(text, element, &mut errors);
        if errors.is_empty() {
            Ok(Some(FieldValue::Single(text.to_string())))
        } else {
            Err(errors)
        }
    }
}

/// One-choice and dropdown elements: the value must be one of the choices.
pub struct SingleChoiceValidator;

impl ElementValidator for SingleChoiceValidator {
    fn validate(&self, element: &Element, raw: &FieldValue) -> ValidationResult {
        let selected = single(raw)?;
        if element.has_choice(selected) {
            Ok(Some(FieldValue::Single(selected.to_string())))
        } else {
            Err(vec![ValidationError::InvalidChoice])
        }
    }
}

pub struct MultipleChoiceValidator;

impl ElementValidator for MultipleChoiceValidator {
    fn validate(&self, element: &Element, raw: &FieldValue) -> ValidationResult {
        let mut selected: Vec<String> = Vec::new();
        for item in raw.texts() {
            if !item.trim().is_empty() && !selected.iter().any(|s| s == item) {
                selected.push(item.to_string());
            }
        }

        let mut errors = Vec::new();
        let bounds = AnswerBounds {
            min: element.settings.min_answers,
            max: element.settings.max_answers,
        };
        if bounds.min.is_some_and(|min| selected.len() < min) {
            errors.push(ValidationError::TooFewChoices(bounds));
        }
        if bounds.max.is_some_and(|max| selected.len() > max) {
            errors.push(ValidationError::TooManyChoices(bounds));
        }
        if selected.iter().any(|s| !element.has_choice(s)) {
            errors.push(ValidationError::InvalidChoice);
        }

        if errors.is_empty() {
            Ok(Some(FieldValue::Multiple(selected)))
        } else {
            Err(errors)
        }
    }
}

/// Numeric slider: `[range_from, range_to]` in increments of `step_size`.
pub struct RangeValidator;

impl ElementValidator for RangeValidator {
    fn validate(&self, element: &Element, raw: &FieldValue) -> ValidationResult {
        let text = single(raw)?.trim();
        let value: f64 = match text.parse() {
            Ok(v) if f64::is_finite(v) => v,
            _ => return Err(vec![ValidationError::NotANumber]),
        };

        let settings = &element.settings;
        let from = settings.range_from.unwrap_or(f64::NEG_INFINITY);
        let to = settings.range_to.unwrap_or(f64::INFINITY);
        let mut errors = Vec::new();
        if value < from || value > to {
            errors.push(ValidationError::OutOfRange { from, to });
        }
        if let Some(step) = settings.step_size.filter(|s| *s > 0.0) {
            let steps = (value - settings.range_from.unwrap_or(0.0)) / step;
            if (steps - steps.round()).abs() > 1e-9 {
                errors.push(ValidationError::InvalidStep { step });
            }
        }

        if errors.is_empty() {
            Ok(Some(FieldValue::Single(text.to_string())))
        } else {
            Err(errors)
        }
    }
}

/// Content blocks and separators: nothing to validate, nothing to store.
pub struct DisplayOnlyValidator;

impl ElementValidator for DisplayOnlyValidator {
    fn validate(&self, _element: &Element, _raw: &FieldValue) -> ValidationResult {
        Ok(None)
    }
}

//=========================================================================================
// Registry
//=========================================================================================

/// Outcome of validating every element on one container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageValidation {
    /// Accepted values. `None` means the element has no answer to store.
    pub values: BTreeMap<ElementId, Option<FieldValue>>,
    pub errors: PageErrors,
}

/// Maps element types to their validator. Populated once at startup.
pub struct ValidatorRegistry {
    validators: HashMap<ElementType, Box<dyn ElementValidator>>,
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ValidatorRegistry {
    pub fn empty() -> Self {
        Self {
            validators: HashMap::new(),
        }
    }

    /// A registry holding the validators for every built-in element type.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(ElementType::Text, TextValidator);
        registry.register(ElementType::Textarea, TextareaValidator);
        registry.register(ElementType::OneChoice, SingleChoiceValidator);
        registry.register(ElementType::Dropdown, SingleChoiceValidator);
        registry.register(ElementType::MultipleChoice, MultipleChoiceValidator);
        registry.register(ElementType::Range, RangeValidator);
        registry.register(ElementType::Content, DisplayOnlyValidator);
        registry.register(ElementType::Separator, DisplayOnlyValidator);
        registry
    }

    /// Registers (or replaces) the validator for `kind`.
    pub fn register(&mut self, kind: ElementType, validator: impl ElementValidator + 'static) {
        self.validators.insert(kind, Box::new(validator));
    }

    /// Validates a single element. A missing or blank value short-circuits:
    /// required elements fail with `Required`, optional ones yield no value,
    /// and the type-specific validator is not consulted.
    pub fn validate(&self, element: &Element, raw: Option<&FieldValue>) -> ValidationResult {
        if element.kind.is_display_only() {
            return Ok(None);
        }
        let raw = match raw {
            Some(value) if !value.is_blank() => value,
            _ if element.settings.required => return Err(vec![ValidationError::Required]),
            _ => return Ok(None),
        };
        match self.validators.get(&element.kind) {
            Some(validator) => validator.validate(element, raw),
            None => Err(vec![ValidationError::UnsupportedType(element.kind)]),
        }
    }

    /// Validates every element on `container` against the posted fields.
    /// Fields for elements that are not on this container are ignored.
    pub fn validate_page(
        &self,
        container: &Container,
        fields: &BTreeMap<ElementId, FieldValue>,
    ) -> PageValidation {
        let mut result = PageValidation::default();
        for element in container.ordered_elements() {
            match self.validate(element, fields.get(&element.id)) {
                Ok(value) => {
                    result.values.insert(element.id, value);
                }
                Err(errors) => {
                    for error in errors {
                        result.errors.push_field(element.id, error.to_string());
                    }
                }
            }
        }
        result
    }
}
