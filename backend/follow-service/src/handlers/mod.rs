/// HTTP handlers for follow-service
///
/// Authentication happens upstream; the gateway forwards the verified
/// caller id in the `x-user-id` header.
use actix_web::{web, FromRequest, HttpRequest};
use serde::Serialize;
use std::future::{ready, Ready};
use uuid::Uuid;

use crate::error::FollowError;
use crate::metrics;

pub mod admin;
pub mod follows;

/// Header carrying the authenticated caller's id
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller extracted from [`USER_ID_HEADER`].
#[derive(Debug, Clone, Copy)]
pub struct ActorId(pub Uuid);

impl FromRequest for ActorId {
    type Error = FollowError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut actix_web::dev::Payload) -> Self::Future {
        ready(
            req.headers()
                .get(USER_ID_HEADER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| Uuid::parse_str(value.trim()).ok())
                .map(ActorId)
                .ok_or_else(|| FollowError::Unauthorized("User ID missing".to_string())),
        )
    }
}

/// Success envelope shared by all JSON endpoints
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Register every route on an actix `ServiceConfig`.
///
/// Expects `web::Data<FollowService>` and `web::Data<ReconcilerConfig>` in app data.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(|| async { "OK" }))
        .route("/ready", web::get().to(admin::ready))
        .route("/metrics", web::get().to(metrics::serve_metrics))
        .service(
            web::scope("/api/users")
                .route(
                    "/following-status",
                    web::post().to(follows::following_status),
                )
                .route("/suggestions", web::get().to(follows::suggestions))
                .route("/{id}/follow", web::post().to(follows::follow_user))
                .route("/{id}/follow", web::delete().to(follows::unfollow_user))
                .route("/{id}/counters", web::get().to(follows::get_counters))
                .route("/{id}/profile", web::get().to(follows::get_profile))
                .route("/{id}/followers", web::get().to(follows::get_followers))
                .route("/{id}/following", web::get().to(follows::get_following))
                .route("/{id}/is-following", web::get().to(follows::check_following)),
        )
        .service(
            web::scope("/admin/counters")
                .route("/reconcile", web::post().to(admin::reconcile_all))
                .route("/reconcile/{id}", web::post().to(admin::reconcile_user)),
        )
        .service(
            web::scope("/internal/users")
                .route("/{id}", web::put().to(admin::upsert_user))
                .route("/{id}", web::delete().to(admin::delete_user)),
        );
}
