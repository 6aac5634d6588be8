use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::auth::jwt::validate_token;
use crate::models::{AccountRole, Claims};
use crate::state::AppState;

// Extension to store the authenticated identity in the request
#[derive(Clone)]
pub struct AuthUser {
    pub account_id: Uuid,
    pub claims: Claims,
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, impl IntoResponse> {
    let unauthorized = || {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": "Authentication required"
            })),
        )
    };

    // Extract the Authorization header
    let auth_header = headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(unauthorized)?;

    // Check if it starts with "Bearer "
    if !auth_header.starts_with("Bearer ") {
        return Err(unauthorized());
    }

    // Extract and validate the token
    let token = &auth_header[7..];
    let claims =
        validate_token(token, &state.config.auth.jwt_secret).map_err(|_| unauthorized())?;

    // The subject is the account id
    let account_id = Uuid::parse_str(&claims.sub).map_err(|_| unauthorized())?;

    request.extensions_mut().insert(AuthUser { account_id, claims });

    Ok(next.run(request).await)
}

pub async fn require_admin(request: Request, next: Next) -> Result<Response, impl IntoResponse> {
    // Get the identity placed by auth_middleware
    let auth_user = request.extensions().get::<AuthUser>().ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": "Authentication required"
            })),
        )
    })?;

    if auth_user.claims.role != AccountRole::Admin {
        return Err((
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "Admin access required"
            })),
        ));
    }

    Ok(next.run(request).await)
}
