use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::models::{NewsletterRequest, NewsletterSubscription};
use crate::state::AppState;
use crate::storage::StorageError;

use super::is_valid_email;

pub async fn subscribe(
    State(state): State<AppState>,
    Json(payload): Json<NewsletterRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let email = payload.email.trim().to_lowercase();

    if !is_valid_email(&email) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Please provide a valid email"
            })),
        ));
    }

    let subscription = NewsletterSubscription::new(email, state.tracker.now());

    match state.store.insert_subscription(subscription.clone()).await {
        Ok(()) => {}
        Err(StorageError::AlreadyExists) => {
            return Err((
                StatusCode::CONFLICT,
                Json(json!({
                    "error": "Email already subscribed"
                })),
            ));
        }
        Err(err) => {
            error!("Failed to store newsletter subscription: {}", err);
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Server error"
                })),
            ));
        }
    }

    info!("Newsletter subscription added for {}", subscription.email);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Successfully subscribed to newsletter",
            "newsletter": subscription
        })),
    ))
}
