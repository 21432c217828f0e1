use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use portfolio_chat_core::{
    Answer, AnswerPipeline, AskError, AskEvent, Document, IngestError, Ingestor, Question,
    TargetLanguage, Translator, RETRY_MESSAGE,
};

use crate::auth::{AuthError, TokenAuthority};

const EVENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<AnswerPipeline>,
    pub ingestor: Arc<Ingestor>,
    pub translator: Arc<Translator>,
    pub auth: Arc<TokenAuthority>,
}

/// Error envelope for the JSON routes. Streaming routes never use it;
/// their faults degrade to in-band `error` events instead.
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "unauthorized",
            message: message.into(),
        }
    }

    fn unprocessable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            code: "invalid_document",
            message: message.into(),
        }
    }

    fn upstream(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            code: "upstream_failure",
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": { "code": self.code, "message": self.message }
        }));
        (self.status, body).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(error: AuthError) -> Self {
        Self::unauthorized(error.to_string())
    }
}

impl From<IngestError> for AppError {
    fn from(error: IngestError) -> Self {
        match error {
            IngestError::Validation(inner) => Self::unprocessable(inner.to_string()),
            other => Self::upstream(other.to_string()),
        }
    }
}

impl From<AskError> for AppError {
    fn from(error: AskError) -> Self {
        Self::upstream(error.to_string())
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/auth/login", post(login))
        .route("/ingest", post(ingest))
        .route("/ask", post(ask))
        .route("/ask/stream", post(ask_stream))
        .route("/translate", post(translate))
        .route("/translate/stream", post(translate_stream))
        .layer(cors)
        .with_state(state)
}

pub async fn run(state: AppState, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    access_token: String,
    token_type: &'static str,
}

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let access_token = state.auth.login(&request.email, &request.password)?;
    Ok(Json(LoginResponse {
        access_token,
        token_type: "bearer",
    }))
}

#[derive(Serialize)]
struct IngestResponse {
    ok: bool,
    ingested: usize,
}

async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(documents): Json<Vec<Document>>,
) -> Result<Json<IngestResponse>, AppError> {
    let principal = authenticate(&state, &headers)?;
    let request_id = Uuid::new_v4();
    tracing::info!(%request_id, %principal, count = documents.len(), "ingest request");

    let ingested = state.ingestor.ingest(documents).await?;
    Ok(Json(IngestResponse { ok: true, ingested }))
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<String, AppError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::unauthorized("missing bearer token"))?;
    Ok(state.auth.verify(token)?)
}

async fn ask(
    State(state): State<AppState>,
    Json(question): Json<Question>,
) -> Result<Json<Answer>, AppError> {
    let request_id = Uuid::new_v4();
    tracing::info!(%request_id, top_k = question.top_k, "ask request");

    let answer = state.pipeline.ask(&question).await?;
    Ok(Json(answer))
}

async fn ask_stream(State(state): State<AppState>, Json(question): Json<Question>) -> Response {
    let request_id = Uuid::new_v4();
    tracing::info!(%request_id, top_k = question.top_k, "streaming ask request");

    event_response(state.pipeline.clone().ask_stream(question))
}

#[derive(Deserialize)]
struct TranslateRequest {
    text: String,
    target_lang: TargetLanguage,
}

#[derive(Serialize)]
struct TranslateResponse {
    translated: String,
}

async fn translate(
    State(state): State<AppState>,
    Json(request): Json<TranslateRequest>,
) -> Result<Json<TranslateResponse>, AppError> {
    let translated = state
        .translator
        .translate(&request.text, request.target_lang)
        .await
        .map_err(|error| AppError::upstream(error.to_string()))?;
    Ok(Json(TranslateResponse { translated }))
}

async fn translate_stream(
    State(state): State<AppState>,
    Json(request): Json<TranslateRequest>,
) -> Response {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        if request.text.trim().is_empty() {
            let _ = tx.send(AskEvent::Sources(Vec::new())).await;
            return;
        }

        match state
            .translator
            .stream(&request.text, request.target_lang)
            .await
        {
            Ok(mut fragments) => {
                while let Some(fragment) = fragments.recv().await {
                    if tx.send(AskEvent::Chunk(fragment)).await.is_err() {
                        return;
                    }
                }
                let _ = tx.send(AskEvent::Sources(Vec::new())).await;
            }
            Err(error) => {
                tracing::error!(%error, "translation stream failed");
                let _ = tx.send(AskEvent::Error(RETRY_MESSAGE.to_string())).await;
                let _ = tx.send(AskEvent::Sources(Vec::new())).await;
            }
        }
    });
    event_response(rx)
}

/// One JSON object per line; the terminal `sources` event always comes
/// last, so clients can read until they see it.
fn event_response(rx: mpsc::Receiver<AskEvent>) -> Response {
    let stream = ReceiverStream::new(rx).map(|event| {
        let mut line = serde_json::to_string(&event).unwrap_or_default();
        line.push('\n');
        Ok::<_, Infallible>(line)
    });

    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(stream),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use portfolio_chat_core::ValidationError;

    #[test]
    fn validation_failures_map_to_unprocessable() {
        let error = AppError::from(IngestError::Validation(ValidationError::MissingId));
        assert_eq!(error.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(error.code, "invalid_document");
    }

    #[test]
    fn auth_failures_map_to_unauthorized() {
        let error = AppError::from(AuthError::Expired);
        assert_eq!(error.status, StatusCode::UNAUTHORIZED);
    }
}
