use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Duration;
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use crate::models::{Account, AccountRole, AccountSnapshot};
use crate::state::AppState;
use crate::storage::StorageError;
use crate::tracker::format_duration;

use super::emotion::{
    analysis_stats, analysis_view, stats_payload, PageQuery, StatsPeriod, StatsQuery,
};

fn server_error() -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": "Server error"
        })),
    )
}

/// Resolve a path id to a stored account. Malformed ids read as missing.
async fn load_account(
    state: &AppState,
    raw_id: &str,
) -> Result<Account, (StatusCode, Json<Value>)> {
    let not_found = || {
        (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "User not found"
            })),
        )
    };

    let id = Uuid::parse_str(raw_id).map_err(|_| not_found())?;

    state
        .store
        .find_account(id)
        .await
        .map_err(|err| {
            error!("Account lookup failed: {}", err);
            server_error()
        })?
        .ok_or_else(not_found)
}

pub async fn dashboard_stats(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let accounts = state.store.list_accounts().await.map_err(|err| {
        error!("Failed to list accounts: {}", err);
        server_error()
    })?;
    let contacts = state.store.list_contacts().await.map_err(|err| {
        error!("Failed to list contact messages: {}", err);
        server_error()
    })?;
    let subscriptions = state.store.list_subscriptions().await.map_err(|err| {
        error!("Failed to list newsletter subscriptions: {}", err);
        server_error()
    })?;

    let total_users = accounts
        .iter()
        .filter(|account| account.role == AccountRole::User)
        .count();
    let total_admins = accounts
        .iter()
        .filter(|account| account.role == AccountRole::Admin)
        .count();
    let online_users = accounts.iter().filter(|account| account.is_online).count();
    let unread_contacts = contacts.iter().filter(|contact| !contact.read).count();

    // Admin time counts toward the grand total but the average is per user
    let total_time_all_users: u64 = accounts.iter().map(|account| account.total_time_secs).sum();
    let avg_time_per_user = if total_users > 0 {
        total_time_all_users / total_users as u64
    } else {
        0
    };

    let one_day_ago = state.tracker.now() - Duration::hours(24);
    let recent_logins = accounts
        .iter()
        .filter(|account| account.last_login.map_or(false, |at| at >= one_day_ago))
        .count();

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "stats": {
                "total_users": total_users,
                "total_admins": total_admins,
                "total_contacts": contacts.len(),
                "unread_contacts": unread_contacts,
                "total_newsletters": subscriptions.len(),
                "online_users": online_users,
                "total_time_all_users": total_time_all_users,
                "total_time_all_users_formatted": format_duration(total_time_all_users),
                "avg_time_per_user": avg_time_per_user,
                "avg_time_per_user_formatted": format_duration(avg_time_per_user),
                "recent_logins": recent_logins
            }
        })),
    ))
}

pub async fn list_users(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let mut accounts = state.store.list_accounts().await.map_err(|err| {
        error!("Failed to list accounts: {}", err);
        server_error()
    })?;

    accounts.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let now = state.tracker.now();
    let users: Vec<AccountSnapshot> = accounts
        .iter()
        .map(|account| AccountSnapshot::new(account, now, true))
        .collect();

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "users": users
        })),
    ))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let account = load_account(&state, &id).await?;
    let snapshot = AccountSnapshot::new(&account, state.tracker.now(), true);

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "user": snapshot
        })),
    ))
}

pub async fn user_emotions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let account = load_account(&state, &id).await?;
    let period = StatsPeriod::parse(query.period.as_deref());

    let mut payload = stats_payload(&state, account.id, period)
        .await
        .map_err(|err| {
            error!("Failed to compute emotion stats: {}", err);
            server_error()
        })?;
    payload["user_id"] = json!(account.id);
    payload["user_name"] = json!(account.name);

    Ok((StatusCode::OK, Json(payload)))
}

pub async fn user_image_analyses(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let account = load_account(&state, &id).await?;
    let limit = query.limit.unwrap_or(50);
    let skip = query.skip.unwrap_or(0);

    let (page, total) = state
        .store
        .list_image_analyses(account.id, limit, skip)
        .await
        .map_err(|err| {
            error!("Failed to fetch image analyses: {}", err);
            server_error()
        })?;

    // The statistics block covers everything, not just the returned page
    let all = state
        .store
        .image_analyses_for_account(account.id)
        .await
        .map_err(|err| {
            error!("Failed to fetch image analyses: {}", err);
            server_error()
        })?;

    let analyses: Vec<Value> = page.iter().map(analysis_view).collect();

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "analyses": analyses,
            "total": total,
            "limit": limit,
            "skip": skip,
            "stats": analysis_stats(&all)
        })),
    ))
}

pub async fn list_contacts(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let mut contacts = state.store.list_contacts().await.map_err(|err| {
        error!("Failed to list contact messages: {}", err);
        server_error()
    })?;

    contacts.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "contacts": contacts
        })),
    ))
}

pub async fn mark_contact_read(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let not_found = || {
        (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "Contact message not found"
            })),
        )
    };

    let id = Uuid::parse_str(&id).map_err(|_| not_found())?;

    let contact = match state.store.mark_contact_read(id).await {
        Ok(contact) => contact,
        Err(StorageError::NotFound) => return Err(not_found()),
        Err(err) => {
            error!("Failed to mark contact message read: {}", err);
            return Err(server_error());
        }
    };

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "contact": contact
        })),
    ))
}

pub async fn list_newsletters(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let mut subscriptions = state.store.list_subscriptions().await.map_err(|err| {
        error!("Failed to list newsletter subscriptions: {}", err);
        server_error()
    })?;

    subscriptions.sort_by(|a, b| b.subscribed_at.cmp(&a.subscribed_at));

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "newsletters": subscriptions
        })),
    ))
}
