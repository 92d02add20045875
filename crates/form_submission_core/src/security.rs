//! crates/form_submission_core/src/security.rs
//!
//! The anti-spam filter chain that gates page transitions. Filters run in a
//! fixed order (honeypot, time-trap, link-count, CAPTCHA) and the first veto
//! ends the run.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, warn};

use crate::domain::{Container, Form, PageInput, Submission};
use crate::ports::CaptchaVerifier;

/// Honeypot and time-trap vetoes stay vague on purpose.
pub const GENERIC_VETO: &str = "Your submission could not be processed. Please try again.";
pub const TOO_MANY_LINKS: &str = "Your answers contain too many links. Please remove some of them.";
pub const CAPTCHA_MISSING: &str = "Please solve the CAPTCHA challenge.";
pub const CAPTCHA_INVALID: &str = "The CAPTCHA response was not valid. Please try again.";
pub const CAPTCHA_TRANSPORT: &str =
    "The CAPTCHA could not be verified right now. Please try again.";

static LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:https?://|ftp://|www\.)[^\s<>]+").expect("link pattern compiles")
});

//=========================================================================================
// Filter Contract
//=========================================================================================

/// Identifies a filter and fixes its position in the chain.
/// The derive order of the variants is the run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FilterKind {
    Honeypot,
    TimeTrap,
    LinkCount,
    Captcha,
}

impl FilterKind {
    /// Filters that leave the process to reach a verdict.
    pub fn is_network_bound(self) -> bool {
        matches!(self, FilterKind::Captcha)
    }
}

/// Everything a filter may look at for one page transition.
pub struct FilterContext<'a> {
    pub form: &'a Form,
    pub submission: &'a Submission,
    pub container: &'a Container,
    pub input: &'a PageInput,
    /// True when this transition would complete the submission.
    pub is_submit: bool,
    /// An earlier attempt of the same request already passed the CAPTCHA on
    /// this page. The response token is single-use.
    pub captcha_verified: bool,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterVerdict {
    Pass,
    Veto(String),
}

#[async_trait]
pub trait SecurityFilter: Send + Sync {
    fn kind(&self) -> FilterKind;

    async fn check(&self, ctx: &FilterContext<'_>) -> FilterVerdict;
}

//=========================================================================================
// Filters
//=========================================================================================

/// Vetoes whenever the hidden honeypot field carries anything.
pub struct HoneypotFilter;

#[async_trait]
impl SecurityFilter for HoneypotFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Honeypot
    }

    async fn check(&self, ctx: &FilterContext<'_>) -> FilterVerdict {
        if !ctx.form.settings.honeypot_enabled {
            return FilterVerdict::Pass;
        }
        match ctx.input.honeypot.as_deref() {
            Some(value) if !value.is_empty() => FilterVerdict::Veto(GENERIC_VETO.to_string()),
            _ => FilterVerdict::Pass,
        }
    }
}

/// Vetoes a final submit that arrives too soon after the form was first
/// rendered. The render time is the one persisted on the submission, so
/// fast navigation across pages is not punished.
pub struct TimeTrapFilter;

#[async_trait]
impl SecurityFilter for TimeTrapFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::TimeTrap
    }

    async fn check(&self, ctx: &FilterContext<'_>) -> FilterVerdict {
        let settings = &ctx.form.settings;
        if !settings.timetrap_enabled || !ctx.is_submit {
            return FilterVerdict::Pass;
        }
        let Some(rendered_at) = ctx.submission.first_rendered_at else {
            return FilterVerdict::Veto(GENERIC_VETO.to_string());
        };
        let elapsed = ctx.now.signed_duration_since(rendered_at);
        if elapsed < chrono::Duration::seconds(i64::from(settings.timetrap_threshold_secs)) {
            debug!(
                submission_id = %ctx.submission.id,
                elapsed_ms = elapsed.num_milliseconds(),
                "Time-trap tripped."
            );
            FilterVerdict::Veto(GENERIC_VETO.to_string())
        } else {
            FilterVerdict::Pass
        }
    }
}

/// Counts URL-like substrings per free-text element on the current container.
pub struct LinkCountFilter;

impl LinkCountFilter {
    pub fn count_links(text: &str) -> usize {
        LINK.find_iter(text).count()
    }
}

#[async_trait]
impl SecurityFilter for LinkCountFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::LinkCount
    }

    async fn check(&self, ctx: &FilterContext<'_>) -> FilterVerdict {
        let settings = &ctx.form.settings;
        if !settings.linkcount_enabled {
            return FilterVerdict::Pass;
        }
        let over_limit = ctx
            .container
            .elements
            .iter()
            .filter(|e| e.kind.is_text_bearing())
            .filter_map(|e| ctx.input.fields.get(&e.id))
            .any(|value| {
                let links: usize = value.texts().into_iter().map(Self::count_links).sum();
                links > settings.linkcount_max
            });
        if over_limit {
            FilterVerdict::Veto(TOO_MANY_LINKS.to_string())
        } else {
            FilterVerdict::Pass
        }
    }
}

/// Asks an external service to verify the CAPTCHA response on final submit.
/// Fails closed: a slow or unreachable service is a veto.
pub struct CaptchaFilter {
    verifier: Arc<dyn CaptchaVerifier>,
    timeout: Duration,
}

impl CaptchaFilter {
    pub fn new(verifier: Arc<dyn CaptchaVerifier>, timeout: Duration) -> Self {
        Self { verifier, timeout }
    }
}

#[async_trait]
impl SecurityFilter for CaptchaFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::Captcha
    }

    async fn check(&self, ctx: &FilterContext<'_>) -> FilterVerdict {
        if !ctx.form.settings.captcha_enabled || !ctx.is_submit || ctx.captcha_verified {
            return FilterVerdict::Pass;
        }
        let response = match ctx.input.captcha_response.as_deref().map(str::trim) {
            Some(response) if !response.is_empty() => response,
            _ => return FilterVerdict::Veto(CAPTCHA_MISSING.to_string()),
        };

        let remote_ip = ctx.input.remote_ip.as_deref();
        match tokio::time::timeout(self.timeout, self.verifier.verify(response, remote_ip)).await {
            Ok(Ok(true)) => FilterVerdict::Pass,
            Ok(Ok(false)) => FilterVerdict::Veto(CAPTCHA_INVALID.to_string()),
            Ok(Err(e)) => {
                warn!(submission_id = %ctx.submission.id, "CAPTCHA verification failed: {}", e);
                FilterVerdict::Veto(CAPTCHA_TRANSPORT.to_string())
            }
            Err(_) => {
                warn!(
                    submission_id = %ctx.submission.id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "CAPTCHA verification timed out."
                );
                FilterVerdict::Veto(CAPTCHA_TRANSPORT.to_string())
            }
        }
    }
}

//=========================================================================================
// Chain
//=========================================================================================

/// A veto together with the filter that raised it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Veto {
    pub kind: FilterKind,
    pub message: String,
}

/// The ordered set of filters. At most one filter per kind; registration
/// order does not matter, run order always follows `FilterKind`.
#[derive(Default)]
pub struct SecurityChain {
    filters: Vec<Box<dyn SecurityFilter>>,
}

impl SecurityChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// All four built-in filters.
    pub fn standard(captcha: Arc<dyn CaptchaVerifier>, captcha_timeout: Duration) -> Self {
        let mut chain = Self::new();
        chain.register(HoneypotFilter);
        chain.register(TimeTrapFilter);
        chain.register(LinkCountFilter);
        chain.register(CaptchaFilter::new(captcha, captcha_timeout));
        chain
    }

    pub fn register(&mut self, filter: impl SecurityFilter + 'static) {
        let kind = filter.kind();
        self.filters.retain(|f| f.kind() != kind);
        self.filters.push(Box::new(filter));
        self.filters.sort_by_key(|f| f.kind());
    }

    pub fn kinds(&self) -> Vec<FilterKind> {
        self.filters.iter().map(|f| f.kind()).collect()
    }

    /// Runs the filters in order and returns the first veto. With
    /// `local_only` set, network-bound filters are skipped.
    pub async fn run(&self, ctx: &FilterContext<'_>, local_only: bool) -> Option<Veto> {
        for filter in &self.filters {
            let kind = filter.kind();
            if local_only && kind.is_network_bound() {
                continue;
            }
            if let FilterVerdict::Veto(message) = filter.check(ctx).await {
                debug!(
                    submission_id = %ctx.submission.id,
                    container_id = %ctx.container.id,
                    filter = ?kind,
                    "Security filter vetoed the transition."
                );
                return Some(Veto { kind, message });
            }
        }
        None
    }
}
