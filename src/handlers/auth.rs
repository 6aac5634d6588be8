use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use tracing::{error, info};

use crate::auth::{create_token, hash_password, verify_password};
use crate::middleware::auth::AuthUser;
use crate::models::{Account, AccountRole, AccountSummary, LoginRequest, RegisterRequest};
use crate::state::AppState;
use crate::storage::StorageError;
use crate::tracker::{format_duration, TrackerError};

use super::is_valid_email;

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let name = payload.name.trim().to_string();
    let email = payload.email.trim().to_lowercase();

    // Validate input
    if name.is_empty() || email.is_empty() || payload.password.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Name, email, and password are required"
            })),
        ));
    }

    if !is_valid_email(&email) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Please provide a valid email"
            })),
        ));
    }

    if payload.password.chars().count() < state.config.auth.min_password_length {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": format!(
                    "Password must be at least {} characters",
                    state.config.auth.min_password_length
                )
            })),
        ));
    }

    // Check if email already exists
    let existing = state
        .store
        .find_account_by_email(&email)
        .await
        .map_err(|err| {
            error!("Account lookup failed during registration: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Server error"
                })),
            )
        })?;

    if existing.is_some() {
        return Err((
            StatusCode::CONFLICT,
            Json(json!({
                "error": "Email already registered"
            })),
        ));
    }

    // Hash the password; only the hash is ever stored
    let password_hash = hash_password(&payload.password).map_err(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "Failed to hash password"
            })),
        )
    })?;

    let account = Account::new(
        name,
        email,
        password_hash,
        AccountRole::User,
        state.tracker.now(),
    );

    match state.store.insert_account(account.clone()).await {
        Ok(()) => {}
        // Lost a race with a concurrent registration for the same address
        Err(StorageError::AlreadyExists) => {
            return Err((
                StatusCode::CONFLICT,
                Json(json!({
                    "error": "Email already registered"
                })),
            ));
        }
        Err(err) => {
            error!("Failed to store new account: {}", err);
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Server error"
                })),
            ));
        }
    }

    // Create JWT token
    let token = create_token(
        &account,
        &state.config.auth.jwt_secret,
        state.config.auth.token_expiration_secs,
    )
    .map_err(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "Failed to create token"
            })),
        )
    })?;

    info!("Registered new account for {}", account.email);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "token": token,
            "user": AccountSummary::from(&account)
        })),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let email = payload.email.trim().to_lowercase();

    if email.is_empty() || payload.password.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Email and password are required"
            })),
        ));
    }

    // Find account by email
    let account = state
        .store
        .find_account_by_email(&email)
        .await
        .map_err(|err| {
            error!("Account lookup failed during login: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Server error"
                })),
            )
        })?
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "error": "Invalid credentials"
                })),
            )
        })?;

    // Verify password
    let is_valid = verify_password(&payload.password, &account.password_hash).map_err(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "Password verification failed"
            })),
        )
    })?;

    if !is_valid {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": "Invalid credentials"
            })),
        ));
    }

    // Open the session; a login that cannot be recorded fails as a whole
    let client_address = client_address(&headers, peer);
    let client_agent = headers
        .get("user-agent")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());

    let account = state
        .tracker
        .begin_session(account.id, Some(client_address), client_agent)
        .await
        .map_err(|err| {
            error!("Failed to open session for {}: {}", email, err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Login failed"
                })),
            )
        })?;

    // Create JWT token
    let token = create_token(
        &account,
        &state.config.auth.jwt_secret,
        state.config.auth.token_expiration_secs,
    )
    .map_err(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "Failed to create token"
            })),
        )
    })?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "token": token,
            "user": AccountSummary::from(&account)
        })),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let (account, session_duration) = match state.tracker.end_session(auth_user.account_id).await {
        Ok(result) => result,
        Err(TrackerError::AccountNotFound(_)) => {
            return Err((
                StatusCode::NOT_FOUND,
                Json(json!({
                    "error": "User not found"
                })),
            ));
        }
        Err(err) => {
            error!("Failed to close session for {}: {}", auth_user.account_id, err);
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Logout failed"
                })),
            ));
        }
    };

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Logged out successfully",
            "session_duration_secs": session_duration,
            "session_duration_formatted": session_duration.map(format_duration),
            "total_time_secs": account.total_time_secs,
            "total_time_formatted": format_duration(account.total_time_secs)
        })),
    ))
}

/// Client address for the session record. A reverse proxy puts the real
/// address in X-Forwarded-For; otherwise the socket peer is what we have.
fn client_address(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| peer.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> SocketAddr {
        "10.0.0.9:55100".parse().unwrap()
    }

    #[test]
    fn test_client_address_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );

        assert_eq!(client_address(&headers, peer()), "203.0.113.7");
    }

    #[test]
    fn test_client_address_falls_back_to_peer() {
        assert_eq!(client_address(&HeaderMap::new(), peer()), "10.0.0.9");

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(""));
        assert_eq!(client_address(&headers, peer()), "10.0.0.9");
    }
}
