pub mod actions;
pub mod captcha;
pub mod db;

pub use actions::{LogAction, WebhookAction};
pub use captcha::{HttpCaptchaVerifier, UnconfiguredCaptcha};
pub use db::DbAdapter;
