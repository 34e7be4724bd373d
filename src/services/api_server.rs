// src/services/api_server.rs
//! HTTP API for the registration workstation.
//!
//! Exposes the orchestrator over JSON:
//! - `POST /register` anchors the DID derived from a template
//! - `POST /verify` compares a template (or just a lookup) with the registry
//! - `GET /did/:national_id` returns the stored DID
//!
//! Errors are returned as `{"error": <kind>, "message": <text>}`. Key
//! material is never part of any response body.

use crate::error::AnchorError;
use crate::models::registration::{RegistrationResult, VerificationResult};
use crate::services::orchestrator::Orchestrator;
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use ethers::providers::{Http, JsonRpcClient};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

/// Request payload for `POST /register`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub national_id: String,
    pub iso_template_base64: String,
}

/// Request payload for `POST /verify`; the template is optional.
#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub national_id: String,
    #[serde(default)]
    pub iso_template_base64: Option<String>,
}

/// Response for `GET /did/:national_id`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredDidResponse {
    pub national_id: String,
    pub did: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// An [`AnchorError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(AnchorError);

impl From<AnchorError> for ApiError {
    fn from(err: AnchorError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            err if err.is_validation() => StatusCode::BAD_REQUEST,
            AnchorError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
            AnchorError::NetworkMismatch { .. }
            | AnchorError::NetworkError(_)
            | AnchorError::ReceiptTimeout { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("request failed: {}", self.0);
        }
        let body = ErrorResponse {
            error: self.0.kind().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// API server state: the shared orchestrator.
pub struct ApiServer<P = Http> {
    orchestrator: Arc<Orchestrator<P>>,
}

impl<P: JsonRpcClient + 'static> ApiServer<P> {
    pub fn new(orchestrator: Arc<Orchestrator<P>>) -> Self {
        Self { orchestrator }
    }

    /// Builds the route table.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/register", post(Self::register_handler))
            .route("/verify", post(Self::verify_handler))
            .route("/did/:national_id", get(Self::stored_did_handler))
            .with_state(self.orchestrator.clone())
    }

    /// Starts the API server and serves until the listener fails.
    ///
    /// # Arguments
    /// * `addr` - Socket address to bind to (e.g., "127.0.0.1:3000")
    pub async fn run(&self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        log::info!("API listening on {addr}");
        axum::serve(listener, self.router()).await
    }

    /// Registers a voter DID.
    ///
    /// # Endpoint
    /// POST /register
    ///
    /// # Responses
    /// - 200 OK: registration result tagged by `status`
    /// - 400 Bad Request: malformed template or national id
    /// - 402 Payment Required: operator cannot pay gas
    /// - 502 Bad Gateway: node unreachable or on the wrong chain
    async fn register_handler(
        State(orchestrator): State<Arc<Orchestrator<P>>>,
        Json(payload): Json<RegisterRequest>,
    ) -> Result<Json<RegistrationResult>, ApiError> {
        let result = orchestrator
            .register(&payload.national_id, &payload.iso_template_base64)
            .await?;
        Ok(Json(result))
    }

    /// Verifies a voter against the registry.
    ///
    /// # Endpoint
    /// POST /verify
    async fn verify_handler(
        State(orchestrator): State<Arc<Orchestrator<P>>>,
        Json(payload): Json<VerifyRequest>,
    ) -> Result<Json<VerificationResult>, ApiError> {
        let result = orchestrator
            .verify(&payload.national_id, payload.iso_template_base64.as_deref())
            .await?;
        Ok(Json(result))
    }

    /// Looks up the stored DID.
    ///
    /// # Endpoint
    /// GET /did/:national_id
    ///
    /// # Responses
    /// - 200 OK: the stored DID
    /// - 404 Not Found: nothing stored for this national id
    async fn stored_did_handler(
        Path(national_id): Path<String>,
        State(orchestrator): State<Arc<Orchestrator<P>>>,
    ) -> Result<Response, ApiError> {
        let verification = orchestrator.verify(&national_id, None).await?;
        let response = match verification.stored {
            Some(did) => (StatusCode::OK, Json(StoredDidResponse { national_id, did })).into_response(),
            None => (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: "not_found".into(),
                    message: format!("no DID stored for {national_id}"),
                }),
            )
                .into_response(),
        };
        Ok(response)
    }
}
