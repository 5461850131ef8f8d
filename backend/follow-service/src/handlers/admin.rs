/// Operational endpoints: readiness, counter reconciliation and user sync.
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use super::ApiResponse;
use crate::config::ReconcilerConfig;
use crate::error::FollowResult;
use crate::services::FollowService;

#[derive(Debug, Default, Deserialize)]
pub struct ReconcileQuery {
    /// Overrides the configured batch size for this run
    pub batch_size: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpsertUserRequest {
    pub username: String,
}

/// GET /ready
pub async fn ready(service: web::Data<FollowService>) -> FollowResult<HttpResponse> {
    service.health_check().await?;
    Ok(HttpResponse::Ok().body("READY"))
}

/// POST /admin/counters/reconcile
pub async fn reconcile_all(
    service: web::Data<FollowService>,
    config: web::Data<ReconcilerConfig>,
    query: web::Query<ReconcileQuery>,
) -> FollowResult<HttpResponse> {
    let batch_size = query
        .batch_size
        .filter(|n| *n > 0)
        .unwrap_or(config.batch_size);
    let report = service.reconcile_all(batch_size).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(report)))
}

/// POST /admin/counters/reconcile/{id}
pub async fn reconcile_user(
    service: web::Data<FollowService>,
    path: web::Path<Uuid>,
) -> FollowResult<HttpResponse> {
    let report = service.reconcile_user(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(report)))
}

/// PUT /internal/users/{id}
pub async fn upsert_user(
    service: web::Data<FollowService>,
    path: web::Path<Uuid>,
    body: web::Json<UpsertUserRequest>,
) -> FollowResult<HttpResponse> {
    service.upsert_user(path.into_inner(), &body.username).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// DELETE /internal/users/{id}
pub async fn delete_user(
    service: web::Data<FollowService>,
    path: web::Path<Uuid>,
) -> FollowResult<HttpResponse> {
    service.delete_user(path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}
