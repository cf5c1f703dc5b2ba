/// REST API handlers for HTTP endpoints.
/// Handles conversation history, per-user clearing, and group management.
/// Every endpoint except `/health` requires a bearer credential.
use crate::auth::AuthenticatedUser;
use crate::db::models::*;
use crate::error::ChatError;
use crate::router::Router;
use actix_web::{web, HttpResponse, Result as ActixResult};
use serde_json::json;

/// Map a domain error to its HTTP response
pub fn error_response(err: ChatError) -> HttpResponse {
    match err {
        ChatError::Auth(_) => HttpResponse::Unauthorized().json(json!({
            "error": "Unauthorized"
        })),
        ChatError::Validation(msg) => HttpResponse::BadRequest().json(json!({
            "error": msg
        })),
        ChatError::NotFound(what) => HttpResponse::NotFound().json(json!({
            "error": format!("Not found: {}", what)
        })),
        ChatError::Permission => HttpResponse::Forbidden().json(json!({
            "error": "Permission denied"
        })),
        ChatError::Conflict(msg) => HttpResponse::Conflict().json(json!({
            "error": msg
        })),
        e @ (ChatError::Decode(_) | ChatError::Persistence(_) | ChatError::Config(_)) => {
            log::error!("Request failed: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": "Internal server error"
            }))
        }
    }
}

/// Health check endpoint
/// GET /health
pub async fn health() -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "ok"
    })))
}

/// Direct conversation between the caller and another user
/// GET /chat/:user
pub async fn get_direct_history(
    user: AuthenticatedUser,
    router: web::Data<Router>,
    other: web::Path<String>,
) -> ActixResult<HttpResponse> {
    let me = user.0;
    match router.history().query_direct(&me, &other, &me).await {
        Ok(entries) => Ok(HttpResponse::Ok().json(entries)),
        Err(e) => Ok(error_response(e)),
    }
}

/// Hide a direct conversation from the caller only
/// POST /chat/:user/clear
pub async fn clear_direct_history(
    user: AuthenticatedUser,
    router: web::Data<Router>,
    other: web::Path<String>,
) -> ActixResult<HttpResponse> {
    let selector = ConversationSelector::Direct {
        user_a: user.0.clone(),
        user_b: other.into_inner(),
    };

    match router.history().clear_for_user(&selector, &user.0).await {
        Ok(modified_count) => Ok(HttpResponse::Ok().json(ClearResponse {
            message: "Chat cleared for you".to_string(),
            modified_count,
        })),
        Err(e) => Ok(error_response(e)),
    }
}

/// Create a group; the caller becomes a member
/// POST /group
pub async fn create_group(
    user: AuthenticatedUser,
    router: web::Data<Router>,
    req: web::Json<CreateGroupRequest>,
) -> ActixResult<HttpResponse> {
    match router.groups().create(&req.name, &user.0, &req.member_ids).await {
        Ok(group) => Ok(HttpResponse::Created().json(group)),
        Err(e) => Ok(error_response(e)),
    }
}

/// Groups the caller belongs to
/// GET /group
pub async fn list_groups(
    user: AuthenticatedUser,
    router: web::Data<Router>,
) -> ActixResult<HttpResponse> {
    match router.groups().groups_for(&user.0).await {
        Ok(groups) => Ok(HttpResponse::Ok().json(groups)),
        Err(e) => Ok(error_response(e)),
    }
}

/// POST /group/:id/add-member
pub async fn add_member(
    user: AuthenticatedUser,
    router: web::Data<Router>,
    group_id: web::Path<String>,
    req: web::Json<MemberRequest>,
) -> ActixResult<HttpResponse> {
    match router.groups().add_member(&group_id, &user.0, &req.user_id).await {
        Ok(group) => Ok(HttpResponse::Ok().json(group)),
        Err(e) => Ok(error_response(e)),
    }
}

/// POST /group/:id/remove-member
pub async fn remove_member(
    user: AuthenticatedUser,
    router: web::Data<Router>,
    group_id: web::Path<String>,
    req: web::Json<MemberRequest>,
) -> ActixResult<HttpResponse> {
    match router.groups().remove_member(&group_id, &user.0, &req.user_id).await {
        Ok(group) => Ok(HttpResponse::Ok().json(group)),
        Err(e) => Ok(error_response(e)),
    }
}

/// POST /group/:id/exit
pub async fn exit_group(
    user: AuthenticatedUser,
    router: web::Data<Router>,
    group_id: web::Path<String>,
) -> ActixResult<HttpResponse> {
    match router.groups().exit(&group_id, &user.0).await {
        Ok(()) => Ok(HttpResponse::Ok().json(json!({
            "message": "You left the group"
        }))),
        Err(e) => Ok(error_response(e)),
    }
}

/// Group history visible to the caller
/// GET /group/:id/messages
pub async fn get_group_messages(
    user: AuthenticatedUser,
    router: web::Data<Router>,
    group_id: web::Path<String>,
) -> ActixResult<HttpResponse> {
    if let Err(e) = router.groups().authorize(&group_id, &user.0).await {
        return Ok(error_response(e));
    }

    match router.history().query_group(&group_id, &user.0).await {
        Ok(entries) => Ok(HttpResponse::Ok().json(entries)),
        Err(e) => Ok(error_response(e)),
    }
}

/// Hide a group conversation from the caller only
/// POST /group/:id/clear
pub async fn clear_group_history(
    user: AuthenticatedUser,
    router: web::Data<Router>,
    group_id: web::Path<String>,
) -> ActixResult<HttpResponse> {
    if let Err(e) = router.groups().get_group(&group_id).await {
        return Ok(error_response(e));
    }

    let selector = ConversationSelector::Group {
        group_id: group_id.into_inner(),
    };
    match router.history().clear_for_user(&selector, &user.0).await {
        Ok(modified_count) => Ok(HttpResponse::Ok().json(ClearResponse {
            message: "Group chat cleared for you".to_string(),
            modified_count,
        })),
        Err(e) => Ok(error_response(e)),
    }
}

/// Delete a group and every message sent to it
/// DELETE /group/:id
pub async fn delete_group(
    user: AuthenticatedUser,
    router: web::Data<Router>,
    group_id: web::Path<String>,
) -> ActixResult<HttpResponse> {
    match router.history().delete_group_as_member(&group_id, &user.0).await {
        Ok(deleted_messages) => {
            log::info!("{} deleted group {}", user.0, group_id);
            Ok(HttpResponse::Ok().json(DeleteGroupResponse {
                message: "Group and its messages deleted".to_string(),
                deleted_messages,
            }))
        }
        Err(e) => Ok(error_response(e)),
    }
}
