use axum::{extract::Request, extract::State, middleware::Next, response::Response};

use super::auth::AuthUser;
use crate::state::AppState;

/// Record request activity for the authenticated account. Runs after
/// authentication; the update happens on a spawned task so the request is
/// never delayed or failed by tracking.
pub async fn track_activity(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(auth_user) = request.extensions().get::<AuthUser>() {
        state.tracker.spawn_record_activity(auth_user.account_id);
    }
    next.run(request).await
}
