use std::sync::Arc;

use anyhow::{Error, Result};
use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    clients::{
        certificate::CertificateFetcher, health::HealthChecker, subscription::SubscriptionClient,
    },
    config::Config,
    errors::{EndpointError, MalformedMessage},
    models::{
        health::HealthStatus,
        message::{MESSAGE_ID_HEADER, SUBSCRIPTION_ARN_HEADER, SnsHeaders, TOPIC_ARN_HEADER},
        response::{ApiResponse, MessageOutcome},
        trigger::TriggerKey,
    },
    store::StoreProvider,
    utils::process_message,
};

pub const SNS_ENDPOINT_PATH: &str =
    "/app/trigger/sns/{project_id}/{build_type_id}/{trigger_uuid}";

pub struct AppState {
    pub certificate_fetcher: Arc<dyn CertificateFetcher>,
    pub subscription_client: SubscriptionClient,
    pub store_provider: Arc<dyn StoreProvider>,
    pub health_checker: Option<HealthChecker>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(SNS_ENDPOINT_PATH, post(handle_sns_message))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(config: &Config, state: Arc<AppState>) -> Result<(), Error> {
    let app = router(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "SNS endpoint server started");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    let Some(checker) = &state.health_checker else {
        return (StatusCode::OK, Json(ApiResponse::success((), "ok".to_string()))).into_response();
    };

    let health = checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health)).into_response()
}

async fn handle_sns_message(
    State(state): State<Arc<AppState>>,
    Path((project_id, build_type_id, trigger_uuid)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let trigger = match parse_trigger(&project_id, &build_type_id, &trigger_uuid) {
        Ok(trigger) => trigger,
        Err(message) => return error_response(StatusCode::NOT_FOUND, message),
    };

    let payload = match serde_json::from_str::<Value>(&body) {
        Ok(Value::Object(payload)) => payload,
        Ok(_) | Err(_) => {
            return endpoint_error_response(&EndpointError::Malformed(MalformedMessage::invalid(
                "body",
                "expected a JSON object",
            )));
        }
    };

    let sns_headers = SnsHeaders {
        message_id: header_value(&headers, MESSAGE_ID_HEADER),
        topic_arn: header_value(&headers, TOPIC_ARN_HEADER),
        subscription_arn: header_value(&headers, SUBSCRIPTION_ARN_HEADER),
    };

    match process_message(
        &trigger,
        &sns_headers,
        payload,
        state.certificate_fetcher.as_ref(),
        &state.subscription_client,
        state.store_provider.as_ref(),
    )
    .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(ApiResponse::success(outcome, outcome_message(outcome).to_string())),
        )
            .into_response(),
        Err(e) => endpoint_error_response(&e),
    }
}

fn parse_trigger(project_id: &str, build_type_id: &str, trigger_uuid: &str) -> Result<TriggerKey, String> {
    let project_id = project_id.trim();
    let build_type_id = build_type_id.trim();

    if project_id.is_empty() {
        return Err("No ProjectId given in the path".to_string());
    }
    if build_type_id.is_empty() {
        return Err("No BuildTypeId given in the path".to_string());
    }

    let trigger_uuid = Uuid::parse_str(trigger_uuid.trim())
        .map_err(|_| format!("Invalid trigger UUID: {}", trigger_uuid))?;

    Ok(TriggerKey::new(project_id, build_type_id, trigger_uuid))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn outcome_message(outcome: MessageOutcome) -> &'static str {
    match outcome {
        MessageOutcome::Subscribed => "Subscription confirmed",
        MessageOutcome::Unsubscribed => "Subscription removed",
        MessageOutcome::NotificationRegistered => "Notification registered",
    }
}

pub fn status_for(error: &EndpointError) -> StatusCode {
    match error {
        EndpointError::Malformed(_) => StatusCode::BAD_REQUEST,
        EndpointError::Verification(_) => StatusCode::FORBIDDEN,
        EndpointError::NotSubscribed { .. } => StatusCode::CONFLICT,
        EndpointError::Subscription(_) | EndpointError::Trigger(_) => StatusCode::BAD_GATEWAY,
    }
}

fn endpoint_error_response(error: &EndpointError) -> Response {
    let status = status_for(error);

    if status.is_server_error() {
        error!(error = %error, "Failed to process SNS message");
    }

    error_response(status, error.to_string())
}

fn error_response(status: StatusCode, error: String) -> Response {
    (
        status,
        Json(ApiResponse::<()>::error(error, "SNS message rejected".to_string())),
    )
        .into_response()
}
