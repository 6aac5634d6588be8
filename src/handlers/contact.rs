use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::models::{ContactMessage, ContactRequest};
use crate::state::AppState;

use super::is_valid_email;

pub async fn submit_contact(
    State(state): State<AppState>,
    Json(payload): Json<ContactRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let name = payload.name.trim().to_string();
    let email = payload.email.trim().to_string();
    let subject = payload.subject.trim().to_string();
    let message = payload.message.trim().to_string();

    // Validate input
    if name.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Name is required"
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

    if subject.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Subject is required"
            })),
        ));
    }

    if message.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Message is required"
            })),
        ));
    }

    let contact = ContactMessage::new(name, email, subject, message, state.tracker.now());

    state
        .store
        .insert_contact(contact.clone())
        .await
        .map_err(|err| {
            error!("Failed to store contact message: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Server error"
                })),
            )
        })?;

    info!("Contact message received from {}", contact.email);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Contact form submitted successfully",
            "contact": contact
        })),
    ))
}
