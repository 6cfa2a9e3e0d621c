//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use openapi_server::models::{
    AuditLogResponse, DeployAcceptedResponse, HealthResponse, LogsResponse, Pagination,
    ProcessListResponse, RestartResponse, ServiceListResponse, VersionResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::audit::AuditQuery;
use crate::errors::GatewayError;
use crate::server::auth::Caller;
use crate::server::error::ApiError;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Lenient integer parsing: anything unparseable counts as absent
fn parse_opt(value: &Option<String>) -> Option<i64> {
    value.as_deref().and_then(|v| v.trim().parse().ok())
}

/// A job id that does not parse names no job
fn parse_job_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| ApiError::from(GatewayError::NotFound(format!("deploy job {}", raw))))
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "opsgate".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

pub async fn list_services_handler(
    State(state): State<Arc<ServerState>>,
    Caller(identity): Caller,
) -> Result<impl IntoResponse, ApiError> {
    let services = state.gateway.list_services(&identity).await?;
    Ok(Json(ServiceListResponse {
        total: services.len(),
        services,
    }))
}

pub async fn restart_handler(
    State(state): State<Arc<ServerState>>,
    Caller(identity): Caller,
    Path(service_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.gateway.restart(&identity, &service_id).await?;
    Ok(Json(RestartResponse {
        service_id,
        restarted_at: Utc::now(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub lines: Option<String>,
}

pub async fn logs_handler(
    State(state): State<Arc<ServerState>>,
    Caller(identity): Caller,
    Path(service_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let lines = parse_opt(&query.lines).and_then(|n| usize::try_from(n).ok());
    let lines = state.gateway.get_logs(&identity, &service_id, lines).await?;
    Ok(Json(LogsResponse { service_id, lines }))
}

pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Caller(identity): Caller,
    Path(service_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let handle = state.gateway.deploy(&identity, &service_id).await?;
    let job = handle.snapshot();
    Ok((
        StatusCode::ACCEPTED,
        Json(DeployAcceptedResponse {
            job_id: job.job_id,
            service_id: job.service_id,
            state: job.state.as_str().to_string(),
            status_url: format!("/api/deploys/{}", job.job_id),
        }),
    ))
}

pub async fn deploy_status_handler(
    State(state): State<Arc<ServerState>>,
    Caller(identity): Caller,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let job = state.gateway.deploy_status(&identity, job_id).await?;
    Ok(Json(job))
}

pub async fn cancel_deploy_handler(
    State(state): State<Arc<ServerState>>,
    Caller(identity): Caller,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let job = state.gateway.cancel_deploy(&identity, job_id).await?;
    Ok(Json(job))
}

pub async fn processes_handler(
    State(state): State<Arc<ServerState>>,
    Caller(identity): Caller,
) -> Result<impl IntoResponse, ApiError> {
    let processes = state.gateway.list_processes(&identity).await?;
    Ok(Json(ProcessListResponse {
        total: processes.len(),
        processes,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AuditParams {
    pub limit: Option<String>,
    pub page: Option<String>,
}

pub async fn audit_handler(
    State(state): State<Arc<ServerState>>,
    Caller(identity): Caller,
    Query(params): Query<AuditParams>,
) -> Result<impl IntoResponse, ApiError> {
    let query = AuditQuery::new(parse_opt(&params.limit), parse_opt(&params.page));
    let logs = state.gateway.audit_log(&identity, query).await?;
    Ok(Json(AuditLogResponse {
        logs,
        pagination: Pagination {
            limit: query.limit,
            page: query.page,
        },
    }))
}
