//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, HttpCaptchaVerifier, LogAction, UnconfiguredCaptcha, WebhookAction},
    config::Config,
    error::ApiError,
    web::{rest::ApiDoc, router, spawn_abandonment_sweep, state::AppState},
};
use axum::http::{header::CONTENT_TYPE, HeaderValue, Method};
use axum::Router;
use form_submission_core::memory::{InMemoryFormRepository, InMemorySubmissionStore};
use form_submission_core::ports::{
    CaptchaVerifier, CompletionAction, FormDefinitionService, SubmissionStore,
};
use form_submission_core::{CompletionDispatcher, Form};
use sqlx::postgres::PgPoolOptions;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    let (forms, store): (Arc<dyn FormDefinitionService>, Arc<dyn SubmissionStore>) =
        match &config.database_url {
            Some(database_url) => {
                info!("Connecting to database...");
                let db_pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect(database_url)
                    .await?;
                let db_adapter = Arc::new(DbAdapter::new(db_pool));
                info!("Running database migrations...");
                db_adapter.run_migrations().await?;
                info!("Database migrations complete.");
                let forms: Arc<dyn FormDefinitionService> = db_adapter.clone();
                let store: Arc<dyn SubmissionStore> = db_adapter;
                (forms, store)
            }
            None => {
                warn!("DATABASE_URL is not set; using the in-memory store. Nothing survives a restart.");
                let repository = InMemoryFormRepository::new();
                if let Some(path) = &config.forms_file {
                    for form in load_forms_file(path).await? {
                        info!("Loaded form {} ('{}') from {}.", form.id, form.title, path.display());
                        repository.insert(form).await;
                    }
                }
                let forms: Arc<dyn FormDefinitionService> = Arc::new(repository);
                let store: Arc<dyn SubmissionStore> = Arc::new(InMemorySubmissionStore::new());
                (forms, store)
            }
        };

    // --- 3. Initialize Service Adapters ---
    let http_client = reqwest::Client::builder()
        .timeout(config.captcha_timeout)
        .build()?;

    let captcha: Arc<dyn CaptchaVerifier> = match &config.captcha_secret {
        Some(secret) => Arc::new(HttpCaptchaVerifier::new(
            http_client.clone(),
            config.captcha_verify_url.clone(),
            secret.clone(),
        )),
        None => {
            warn!("CAPTCHA_SECRET is not set; forms with CAPTCHA enabled will reject every submit.");
            Arc::new(UnconfiguredCaptcha)
        }
    };

    let mut dispatcher = CompletionDispatcher::default();
    dispatcher.register(Arc::new(LogAction));
    if let Some(url) = &config.completion_webhook_url {
        let webhook: Arc<dyn CompletionAction> =
            Arc::new(WebhookAction::new(http_client.clone(), url.clone()));
        dispatcher.register(webhook);
    }
    info!("Completion actions: {:?}", dispatcher.action_names());

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState::new(config.clone(), forms, store, captcha, dispatcher));
    spawn_abandonment_sweep(app_state.clone());

    // --- 5. Create the Web Router ---
    let origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS_ORIGIN '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(router(app_state).layer(cors))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Reads form definitions for the in-memory repository from a JSON array.
async fn load_forms_file(path: &Path) -> Result<Vec<Form>, ApiError> {
    let raw = tokio::fs::read_to_string(path).await?;
    serde_json::from_str(&raw)
        .map_err(|e| ApiError::Internal(format!("Invalid forms file {}: {}", path.display(), e)))
}
