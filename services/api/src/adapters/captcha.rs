//! services/api/src/adapters/captcha.rs
//!
//! This module contains the adapter for a reCAPTCHA-compatible verification
//! endpoint. It implements the `CaptchaVerifier` port from the `core` crate.

use async_trait::async_trait;
use form_submission_core::ports::{CaptchaVerifier, PortError, PortResult};
use serde::Deserialize;
use tracing::debug;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `CaptchaVerifier` by POSTing to a siteverify endpoint.
#[derive(Clone)]
pub struct HttpCaptchaVerifier {
    client: reqwest::Client,
    verify_url: String,
    secret: String,
}

impl HttpCaptchaVerifier {
    /// Creates a new `HttpCaptchaVerifier`.
    pub fn new(client: reqwest::Client, verify_url: String, secret: String) -> Self {
        Self {
            client,
            verify_url,
            secret,
        }
    }
}

/// The subset of the siteverify answer we care about.
#[derive(Debug, Deserialize)]
struct VerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

//=========================================================================================
// `CaptchaVerifier` Trait Implementation
//=========================================================================================

#[async_trait]
impl CaptchaVerifier for HttpCaptchaVerifier {
    async fn verify(&self, response: &str, remote_ip: Option<&str>) -> PortResult<bool> {
        let mut params = vec![("secret", self.secret.as_str()), ("response", response)];
        if let Some(ip) = remote_ip {
            params.push(("remoteip", ip));
        }

        let answer = self
            .client
            .post(&self.verify_url)
            .form(&params)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PortError::Unexpected(format!("CAPTCHA request failed: {}", e)))?
            .json::<VerifyResponse>()
            .await
            .map_err(|e| PortError::Unexpected(format!("CAPTCHA answer unreadable: {}", e)))?;

        if !answer.success {
            debug!(error_codes = ?answer.error_codes, "CAPTCHA response rejected.");
        }
        Ok(answer.success)
    }
}

/// Stands in when no CAPTCHA secret is configured. Forms that enable the
/// CAPTCHA then fail closed with a transport veto.
#[derive(Clone, Default)]
pub struct UnconfiguredCaptcha;

#[async_trait]
impl CaptchaVerifier for UnconfiguredCaptcha {
    async fn verify(&self, _response: &str, _remote_ip: Option<&str>) -> PortResult<bool> {
        Err(PortError::Unexpected("CAPTCHA_SECRET is not configured".to_string()))
    }
}
