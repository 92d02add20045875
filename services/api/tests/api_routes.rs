//! Drives the HTTP routes against the in-memory repository and store.

use std::sync::{Arc, Mutex};

use api_lib::config::Config;
use api_lib::web::{router, state::AppState};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use form_submission_core::memory::{InMemoryFormRepository, InMemorySubmissionStore};
use form_submission_core::ports::{CaptchaVerifier, PortResult, SubmissionStore};
use form_submission_core::{
    CompletionDispatcher, Container, ContainerId, Element, ElementId, ElementSettings, ElementType,
    Form, FormId, FormSettings,
};
use serde_json::{json, Value};
use similar_asserts::assert_eq;
use tower::ServiceExt;

/// Accepts every response and remembers the client addresses it was given.
#[derive(Default)]
struct AcceptingCaptcha {
    remote_ips: Mutex<Vec<Option<String>>>,
}

#[async_trait]
impl CaptchaVerifier for AcceptingCaptcha {
    async fn verify(&self, _response: &str, remote_ip: Option<&str>) -> PortResult<bool> {
        self.remote_ips
            .lock()
            .unwrap()
            .push(remote_ip.map(str::to_string));
        Ok(true)
    }
}

struct TestApp {
    router: Router,
    store: Arc<InMemorySubmissionStore>,
    captcha: Arc<AcceptingCaptcha>,
}

fn text_element(id: i64, container_id: i64, required: bool) -> Element {
    Element {
        id: ElementId(id),
        container_id: ContainerId(container_id),
        label: format!("Question {}", id),
        sort: 0,
        kind: ElementType::Text,
        settings: ElementSettings {
            required,
            ..Default::default()
        },
        choices: vec![],
    }
}

fn page(id: i64, form_id: i64, sort: i32, elements: Vec<Element>) -> Container {
    Container {
        id: ContainerId(id),
        form_id: FormId(form_id),
        label: format!("Page {}", sort + 1),
        sort,
        elements,
    }
}

/// Form 1: two pages with one required field each.
/// Form 2: a single page guarded by honeypot and CAPTCHA.
/// Form 3: closed since yesterday.
fn forms() -> Vec<Form> {
    vec![
        Form {
            id: FormId(1),
            title: "Contact".to_string(),
            containers: vec![
                page(10, 1, 0, vec![text_element(100, 10, true)]),
                page(11, 1, 1, vec![text_element(110, 11, true)]),
            ],
            settings: FormSettings::default(),
        },
        Form {
            id: FormId(2),
            title: "Guarded".to_string(),
            containers: vec![page(20, 2, 0, vec![text_element(200, 20, false)])],
            settings: FormSettings {
                honeypot_enabled: true,
                captcha_enabled: true,
                ..Default::default()
            },
        },
        Form {
            id: FormId(3),
            title: "Closed".to_string(),
            containers: vec![page(30, 3, 0, vec![text_element(300, 30, false)])],
            settings: FormSettings {
                closes_at: Some(Utc::now() - Duration::days(1)),
                ..Default::default()
            },
        },
    ]
}

fn test_app() -> TestApp {
    let config = Arc::new(Config::from_lookup(|_| None).unwrap());
    let store = Arc::new(InMemorySubmissionStore::new());
    let captcha = Arc::new(AcceptingCaptcha::default());
    let state = AppState::new(
        config,
        Arc::new(InMemoryFormRepository::with_forms(forms())),
        store.clone(),
        captcha.clone(),
        CompletionDispatcher::default(),
    );
    TestApp {
        router: router(Arc::new(state)),
        store,
        captcha,
    }
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[test_log::test(tokio::test)]
async fn first_page_is_rendered_without_a_submission() {
    let app = test_app();

    let (status, body) = send(&app, get("/forms/1/page")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["submission_id"], Value::Null);
    assert_eq!(body["page_number"], json!(1));
    assert_eq!(body["page_count"], json!(2));
    assert_eq!(body["is_last"], json!(false));
    assert_eq!(body["container"]["id"], json!(10));
    assert_eq!(body["container"]["elements"][0]["type"], json!("text"));
    assert_eq!(body["container"]["elements"][0]["required"], json!(true));
}

#[test_log::test(tokio::test)]
async fn unknown_form_is_not_found() {
    let app = test_app();

    let (status, _) = send(&app, get("/forms/99/page")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, post("/forms/99/advance", json!({ "intent": "next" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[test_log::test(tokio::test)]
async fn blank_required_field_comes_back_as_rejected_outcome() {
    let app = test_app();

    let (status, body) = send(
        &app,
        post("/forms/1/advance", json!({ "intent": "next", "fields": { "100": "" } })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], json!("rejected"));
    assert_eq!(body["container_id"], json!(10));
    assert_eq!(
        body["errors"],
        json!({ "page": [], "fields": { "100": ["This field is required."] } })
    );

    // The stored errors are shown when the page is rendered again.
    let id = body["submission_id"].as_str().unwrap().to_string();
    let (status, page) = send(&app, get(&format!("/forms/1/page?submission_id={}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["errors"]["fields"]["100"], json!(["This field is required."]));
    assert_eq!(page["status"], json!("in_progress"));
}

#[test_log::test(tokio::test)]
async fn walk_through_both_pages_to_completion() {
    let app = test_app();

    let (_, body) = send(
        &app,
        post("/forms/1/advance", json!({ "intent": "next", "fields": { "100": "Ada" } })),
    )
    .await;
    assert_eq!(body["outcome"], json!("navigated"));
    assert_eq!(body["container_id"], json!(11));
    let id = body["submission_id"].as_str().unwrap().to_string();

    let (_, page) = send(&app, get(&format!("/forms/1/page?submission_id={}", id))).await;
    assert_eq!(page["page_number"], json!(2));
    assert_eq!(page["is_last"], json!(true));

    let (_, body) = send(
        &app,
        post(
            "/forms/1/advance",
            json!({ "submission_id": id, "intent": "prev" }),
        ),
    )
    .await;
    assert_eq!(body["outcome"], json!("navigated"));
    assert_eq!(body["container_id"], json!(10));

    let (_, page) = send(&app, get(&format!("/forms/1/page?submission_id={}", id))).await;
    assert_eq!(page["values"], json!({ "100": "Ada" }));

    let (_, body) = send(
        &app,
        post(
            "/forms/1/advance",
            json!({ "submission_id": id, "intent": "next", "fields": { "100": "Ada" } }),
        ),
    )
    .await;
    assert_eq!(body["container_id"], json!(11));

    let (_, body) = send(
        &app,
        post(
            "/forms/1/advance",
            json!({ "submission_id": id, "intent": "submit", "fields": { "110": "Lovelace" } }),
        ),
    )
    .await;
    assert_eq!(body["outcome"], json!("completed"));

    let (_, body) = send(
        &app,
        post(
            "/forms/1/advance",
            json!({ "submission_id": id, "intent": "submit", "fields": { "110": "changed" } }),
        ),
    )
    .await;
    assert_eq!(body["outcome"], json!("read_only"));

    let (_, page) = send(&app, get(&format!("/forms/1/page?submission_id={}", id))).await;
    assert_eq!(page["read_only"], json!(true));
    assert_eq!(page["status"], json!("completed"));
    assert_eq!(page["values"], json!({ "110": "Lovelace" }));
}

#[test_log::test(tokio::test)]
async fn filled_honeypot_is_vetoed_before_captcha() {
    let app = test_app();

    let (status, body) = send(
        &app,
        post(
            "/forms/2/advance",
            json!({
                "intent": "submit",
                "fields": { "200": "hello" },
                "honeypot": "http://spam.example",
                "captcha_response": "solved"
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], json!("rejected"));
    assert_eq!(
        body["errors"]["page"],
        json!(["Your submission could not be processed. Please try again."])
    );
    assert!(app.captcha.remote_ips.lock().unwrap().is_empty());
}

#[test_log::test(tokio::test)]
async fn forwarded_client_address_reaches_the_captcha_check() {
    let app = test_app();

    let request = Request::builder()
        .method("POST")
        .uri("/forms/2/advance")
        .header("content-type", "application/json")
        .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
        .body(Body::from(
            json!({ "intent": "submit", "captcha_response": "solved" }).to_string(),
        ))
        .unwrap();
    let (_, body) = send(&app, request).await;

    assert_eq!(body["outcome"], json!("completed"));
    assert_eq!(
        *app.captcha.remote_ips.lock().unwrap(),
        vec![Some("203.0.113.7".to_string())]
    );
}

#[test_log::test(tokio::test)]
async fn reference_errors_map_to_status_codes() {
    let app = test_app();

    let (_, body) = send(&app, post("/forms/1/advance", json!({ "intent": "next" }))).await;
    let id = body["submission_id"].as_str().unwrap().to_string();

    let unknown = uuid::Uuid::new_v4();
    let (status, _) = send(&app, get(&format!("/forms/1/page?submission_id={}", unknown))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        post("/forms/2/advance", json!({ "submission_id": id, "intent": "submit" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&app, post("/forms/3/advance", json!({ "intent": "submit" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let abandoned = app
        .store
        .abandon_stale(Utc::now() + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(abandoned, 1);
    let (status, _) = send(
        &app,
        post("/forms/1/advance", json!({ "submission_id": id, "intent": "next" })),
    )
    .await;
    assert_eq!(status, StatusCode::GONE);
}

#[test_log::test(tokio::test)]
async fn malformed_body_is_a_client_error() {
    let app = test_app();

    let (status, _) = send(&app, post("/forms/1/advance", json!({ "intent": "sideways" }))).await;

    assert!(status.is_client_error());
}

#[test_log::test(tokio::test)]
async fn resumed_pages_echo_the_first_render_time() {
    let app = test_app();
    let first_render = Utc::now() - Duration::seconds(60);

    let (_, body) = send(
        &app,
        post(
            "/forms/1/advance",
            json!({ "intent": "next", "fields": { "100": "Ada" }, "rendered_at": first_render }),
        ),
    )
    .await;
    let id = body["submission_id"].as_str().unwrap().to_string();

    let (_, page) = send(&app, get(&format!("/forms/1/page?submission_id={}", id))).await;
    let echoed: DateTime<Utc> = page["rendered_at"].as_str().unwrap().parse().unwrap();
    assert_eq!(echoed, first_render);

    // A fresh visitor gets the current time instead.
    let (_, page) = send(&app, get("/forms/1/page")).await;
    let fresh: DateTime<Utc> = page["rendered_at"].as_str().unwrap().parse().unwrap();
    assert!(fresh > first_render + Duration::seconds(30));
}
