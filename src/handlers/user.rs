use axum::{extract::State, http::StatusCode, Extension, Json};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::middleware::auth::AuthUser;
use crate::models::{AccountSnapshot, AccountSummary, UpdateProfileRequest};
use crate::state::AppState;
use crate::storage::StorageError;

use super::is_valid_email;

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let account = state
        .store
        .find_account(auth_user.account_id)
        .await
        .map_err(|err| {
            error!("Profile lookup failed: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Server error"
                })),
            )
        })?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "error": "User not found"
                })),
            )
        })?;

    // The owner's own view never includes the password hash
    let snapshot = AccountSnapshot::new(&account, state.tracker.now(), false);

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "user": snapshot
        })),
    ))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    // Validate input up front; the write loop below may run more than once
    let new_name = match payload.name.as_deref().map(str::trim) {
        Some("") => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "Name cannot be empty"
                })),
            ));
        }
        Some(name) => Some(name.to_string()),
        None => None,
    };

    let new_email = match payload.email.as_deref().map(str::trim) {
        Some(raw) => {
            let email = raw.to_lowercase();
            if !is_valid_email(&email) {
                return Err((
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": "Please provide a valid email"
                    })),
                ));
            }
            Some(email)
        }
        None => None,
    };

    if new_name.is_none() && new_email.is_none() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Nothing to update"
            })),
        ));
    }

    let email_conflict = || {
        (
            StatusCode::CONFLICT,
            Json(json!({
                "error": "Email already in use"
            })),
        )
    };

    let server_error = || {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "Server error"
            })),
        )
    };

    // Reload and reapply on each attempt so a concurrent session-state
    // write does not get clobbered or reject us permanently
    for _ in 0..state.config.tracker.conflict_retries.max(1) {
        let mut account = state
            .store
            .find_account(auth_user.account_id)
            .await
            .map_err(|err| {
                error!("Profile lookup failed: {}", err);
                server_error()
            })?
            .ok_or_else(|| {
                (
                    StatusCode::NOT_FOUND,
                    Json(json!({
                        "error": "User not found"
                    })),
                )
            })?;

        if let Some(name) = &new_name {
            account.name = name.clone();
        }

        if let Some(email) = &new_email {
            if *email != account.email {
                let taken = state
                    .store
                    .find_account_by_email(email)
                    .await
                    .map_err(|err| {
                        error!("Email uniqueness check failed: {}", err);
                        server_error()
                    })?
                    .map_or(false, |other| other.id != account.id);

                if taken {
                    return Err(email_conflict());
                }

                account.email = email.clone();
            }
        }

        account.touch(state.tracker.now());

        match state.store.update_account(account).await {
            Ok(saved) => {
                info!("Updated profile for account {}", saved.id);
                return Ok((
                    StatusCode::OK,
                    Json(json!({
                        "success": true,
                        "user": AccountSummary::from(&saved)
                    })),
                ));
            }
            Err(StorageError::VersionConflict) => continue,
            Err(StorageError::AlreadyExists) => return Err(email_conflict()),
            Err(err) => {
                error!("Profile update failed: {}", err);
                return Err(server_error());
            }
        }
    }

    error!(
        "Profile update for account {} kept conflicting with concurrent writes",
        auth_user.account_id
    );
    Err(server_error())
}
