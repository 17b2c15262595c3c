// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the gateway REST API.

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use courier_core::types::{
    AccountId, ConnectOutcome, Direction, HealthLevel, SentMessage, SessionInfo,
};
use courier_service::{ButtonsContent, MediaContent, QueueOverview};

use crate::error::ApiError;
use crate::server::GatewayState;

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Request body naming a single account.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRequest {
    pub account_id: AccountId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTextRequest {
    pub account_id: AccountId,
    pub to: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMediaRequest {
    pub account_id: AccountId,
    pub to: String,
    #[serde(flatten)]
    pub media: MediaContent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendButtonsRequest {
    pub account_id: AccountId,
    pub to: String,
    #[serde(flatten)]
    pub content: ButtonsContent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub account_id: AccountId,
    pub to: String,
    pub text: String,
    pub send_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleResponse {
    pub job_id: i64,
}

/// Optional body of the queue control routes.
#[derive(Debug, Default, Deserialize)]
pub struct QueueControlRequest {
    #[serde(default)]
    pub direction: Option<Direction>,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct RetryResponse {
    pub retried: usize,
}

#[derive(Debug, Serialize)]
pub struct RecoveryResponse {
    pub actions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct InstancesResponse {
    pub instances: Vec<SessionInfo>,
}

/// An empty body selects both queues.
fn parse_direction(body: &Bytes) -> Result<Option<Direction>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let request: QueueControlRequest = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid queue control body: {e}")))?;
    Ok(request.direction)
}

pub async fn post_connect(
    State(state): State<GatewayState>,
    body: Result<Json<AccountRequest>, JsonRejection>,
) -> ApiResult<ConnectOutcome> {
    let Json(request) = body?;
    Ok(Json(state.courier.connect(&request.account_id).await?))
}

pub async fn post_disconnect(
    State(state): State<GatewayState>,
    body: Result<Json<AccountRequest>, JsonRejection>,
) -> ApiResult<OkResponse> {
    let Json(request) = body?;
    state.courier.disconnect(&request.account_id).await?;
    Ok(Json(OkResponse { ok: true }))
}

pub async fn post_restart(
    State(state): State<GatewayState>,
    body: Result<Json<AccountRequest>, JsonRejection>,
) -> ApiResult<ConnectOutcome> {
    let Json(request) = body?;
    Ok(Json(state.courier.restart(&request.account_id).await?))
}

pub async fn get_status(
    State(state): State<GatewayState>,
    Path(account_id): Path<String>,
) -> ApiResult<SessionInfo> {
    let account = AccountId::new(account_id)?;
    Ok(Json(state.courier.status(&account)?))
}

pub async fn get_instances(State(state): State<GatewayState>) -> ApiResult<InstancesResponse> {
    Ok(Json(InstancesResponse {
        instances: state.courier.list_instances()?,
    }))
}

pub async fn post_send_text(
    State(state): State<GatewayState>,
    body: Result<Json<SendTextRequest>, JsonRejection>,
) -> ApiResult<SentMessage> {
    let Json(request) = body?;
    let sent = state
        .courier
        .send_text(&request.account_id, &request.to, request.text)
        .await?;
    Ok(Json(sent))
}

pub async fn post_send_media(
    State(state): State<GatewayState>,
    body: Result<Json<SendMediaRequest>, JsonRejection>,
) -> ApiResult<SentMessage> {
    let Json(request) = body?;
    let sent = state
        .courier
        .send_media(&request.account_id, &request.to, request.media)
        .await?;
    Ok(Json(sent))
}

pub async fn post_send_buttons(
    State(state): State<GatewayState>,
    body: Result<Json<SendButtonsRequest>, JsonRejection>,
) -> ApiResult<SentMessage> {
    let Json(request) = body?;
    let sent = state
        .courier
        .send_buttons(&request.account_id, &request.to, request.content)
        .await?;
    Ok(Json(sent))
}

pub async fn post_schedule(
    State(state): State<GatewayState>,
    body: Result<Json<ScheduleRequest>, JsonRejection>,
) -> ApiResult<ScheduleResponse> {
    let Json(request) = body?;
    let job_id = state
        .courier
        .schedule_message(&request.account_id, &request.to, request.text, request.send_at)
        .await?;
    Ok(Json(ScheduleResponse { job_id }))
}

/// Composite health: 200 healthy, 207 degraded, 503 unhealthy.
pub async fn get_health(State(state): State<GatewayState>) -> Result<Response, ApiError> {
    let report = state.courier.health().await?;
    let status = match report.overall {
        HealthLevel::Healthy => StatusCode::OK,
        HealthLevel::Degraded => StatusCode::MULTI_STATUS,
        HealthLevel::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    Ok((status, Json(report)).into_response())
}

pub async fn post_recover(State(state): State<GatewayState>) -> ApiResult<RecoveryResponse> {
    Ok(Json(RecoveryResponse {
        actions: state.courier.attempt_recovery().await?,
    }))
}

pub async fn post_queue_pause(
    State(state): State<GatewayState>,
    body: Bytes,
) -> ApiResult<OkResponse> {
    state.courier.pause_queue(parse_direction(&body)?)?;
    Ok(Json(OkResponse { ok: true }))
}

pub async fn post_queue_resume(
    State(state): State<GatewayState>,
    body: Bytes,
) -> ApiResult<OkResponse> {
    state.courier.resume_queue(parse_direction(&body)?)?;
    Ok(Json(OkResponse { ok: true }))
}

pub async fn post_queue_retry(
    State(state): State<GatewayState>,
    body: Bytes,
) -> ApiResult<RetryResponse> {
    let retried = state.courier.retry_failed(parse_direction(&body)?).await?;
    Ok(Json(RetryResponse { retried }))
}

pub async fn get_queue_stats(State(state): State<GatewayState>) -> ApiResult<QueueOverview> {
    Ok(Json(state.courier.queue_stats().await?))
}
