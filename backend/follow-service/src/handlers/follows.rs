/// Follow handlers - HTTP endpoints for follow graph operations
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ActorId, ApiResponse};
use crate::domain::models::{FollowChange, PageRequest};
use crate::error::FollowResult;
use crate::services::FollowService;

/// Query parameters for paginated follow lists
#[derive(Debug, Default, Deserialize)]
pub struct FollowListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SuggestionsQuery {
    pub limit: Option<i64>,
}

/// Request payload for bulk follow status check
#[derive(Debug, Deserialize)]
pub struct FollowingStatusRequest {
    pub user_ids: Vec<Uuid>,
}

/// Response for follow/unfollow actions
#[derive(Debug, Serialize, Deserialize)]
pub struct FollowActionResponse {
    pub following: bool,
    /// Target user's follower count after the change
    pub followers_count: i64,
    /// Caller's following count after the change
    pub following_count: i64,
}

impl FollowActionResponse {
    fn from_change(following: bool, change: &FollowChange) -> Self {
        Self {
            following,
            followers_count: change.following.followers_count,
            following_count: change.follower.following_count,
        }
    }
}

/// POST /api/users/{id}/follow
pub async fn follow_user(
    service: web::Data<FollowService>,
    actor: ActorId,
    path: web::Path<Uuid>,
) -> FollowResult<HttpResponse> {
    let change = service.follow(actor.0, path.into_inner()).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success(FollowActionResponse::from_change(
        true, &change,
    ))))
}

/// DELETE /api/users/{id}/follow
pub async fn unfollow_user(
    service: web::Data<FollowService>,
    actor: ActorId,
    path: web::Path<Uuid>,
) -> FollowResult<HttpResponse> {
    let change = service.unfollow(actor.0, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(FollowActionResponse::from_change(
        false, &change,
    ))))
}

/// GET /api/users/{id}/counters
pub async fn get_counters(
    service: web::Data<FollowService>,
    path: web::Path<Uuid>,
) -> FollowResult<HttpResponse> {
    let counters = service.counters(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(counters)))
}

/// GET /api/users/{id}/profile
pub async fn get_profile(
    service: web::Data<FollowService>,
    viewer: Option<ActorId>,
    path: web::Path<Uuid>,
) -> FollowResult<HttpResponse> {
    let profile = service
        .profile(path.into_inner(), viewer.map(|actor| actor.0))
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(profile)))
}

/// GET /api/users/{id}/followers
pub async fn get_followers(
    service: web::Data<FollowService>,
    path: web::Path<Uuid>,
    query: web::Query<FollowListQuery>,
) -> FollowResult<HttpResponse> {
    let page = PageRequest::new(query.limit, query.offset);
    let followers = service.followers(path.into_inner(), page).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(followers)))
}

/// GET /api/users/{id}/following
pub async fn get_following(
    service: web::Data<FollowService>,
    path: web::Path<Uuid>,
    query: web::Query<FollowListQuery>,
) -> FollowResult<HttpResponse> {
    let page = PageRequest::new(query.limit, query.offset);
    let following = service.following(path.into_inner(), page).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(following)))
}

/// GET /api/users/{id}/is-following
pub async fn check_following(
    service: web::Data<FollowService>,
    actor: ActorId,
    path: web::Path<Uuid>,
) -> FollowResult<HttpResponse> {
    let following = service.is_following(actor.0, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(
        serde_json::json!({ "following": following }),
    )))
}

/// POST /api/users/following-status
pub async fn following_status(
    service: web::Data<FollowService>,
    actor: ActorId,
    body: web::Json<FollowingStatusRequest>,
) -> FollowResult<HttpResponse> {
    let status = service.following_status(actor.0, &body.user_ids).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(status)))
}

/// GET /api/users/suggestions
pub async fn suggestions(
    service: web::Data<FollowService>,
    actor: ActorId,
    query: web::Query<SuggestionsQuery>,
) -> FollowResult<HttpResponse> {
    let suggestions = service.suggestions(actor.0, query.limit).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(suggestions)))
}
