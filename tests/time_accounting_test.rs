use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{Duration, TimeZone, Utc};
use uuid::Uuid;

use fer_site_api::config::AppConfig;
use fer_site_api::handlers::emotion::{PageQuery, RecentQuery, StatsQuery};
use fer_site_api::handlers::{admin, auth, emotion, user};
use fer_site_api::middleware::auth::AuthUser;
use fer_site_api::models::{
    Account, AccountRole, Claims, ImageAnalysisRequest, RecordEmotionRequest,
};
use fer_site_api::state::AppState;
use fer_site_api::storage::memory::MemoryStorage;
use fer_site_api::storage::StorageBackend;
use fer_site_api::tracker::{Clock, ManualClock, TrackerConfig};

struct TestApp {
    state: AppState,
    clock: Arc<ManualClock>,
    store: Arc<MemoryStorage>,
}

fn test_app_with(tracker: TrackerConfig) -> TestApp {
    let mut config = AppConfig::default();
    config.tracker = tracker;

    let store = Arc::new(MemoryStorage::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 17, 12, 0, 0).unwrap(),
    ));
    let state = AppState::with_parts(
        Arc::new(config),
        store.clone() as Arc<dyn StorageBackend>,
        clock.clone() as Arc<dyn Clock>,
    )
    .unwrap();

    TestApp {
        state,
        clock,
        store,
    }
}

fn test_app() -> TestApp {
    test_app_with(TrackerConfig::default())
}

async fn seed_user(app: &TestApp, name: &str, email: &str) -> Account {
    let account = Account::new(
        name.to_string(),
        email.to_string(),
        "hash".to_string(),
        AccountRole::User,
        app.clock.now(),
    );
    app.store.insert_account(account.clone()).await.unwrap();
    account
}

fn auth_for(account: &Account) -> AuthUser {
    AuthUser {
        account_id: account.id,
        claims: Claims {
            sub: account.id.to_string(),
            email: account.email.clone(),
            role: account.role,
            exp: (Utc::now() + Duration::hours(24)).timestamp() as usize,
        },
    }
}

async fn stored(app: &TestApp, id: Uuid) -> Account {
    app.store.find_account(id).await.unwrap().unwrap()
}

async fn record(app: &TestApp, who: &Account, emotion: &str) {
    let (status, _) = emotion::record_emotion(
        State(app.state.clone()),
        Extension(auth_for(who)),
        Json(RecordEmotionRequest {
            emotion: Some(emotion.to_string()),
            confidence: Some(0.9),
            session_id: Some("session_test".to_string()),
        }),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::OK);
}

async fn save_analysis(app: &TestApp, who: &Account, url: &str, confidence: f64) -> String {
    let (status, Json(body)) = emotion::save_image_analysis(
        State(app.state.clone()),
        Extension(auth_for(who)),
        Json(ImageAnalysisRequest {
            image_url: Some(url.to_string()),
            emotion: Some("Happy".to_string()),
            confidence: Some(confidence),
            all_emotions: None,
            bbox: Some([10, 20, 110, 130]),
            file_name: Some("face.jpg".to_string()),
            file_size: Some(2048),
        }),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::OK);
    body["analysis"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_activity_then_logout_uses_corrected_accounting() {
    // Login at T0, one activity pass at T0+45, logout at T0+50. The pass
    // credits a flat 30; logout settles only the remaining 20.
    let app = test_app();
    let account = seed_user(&app, "Tracked", "tracked@example.com").await;

    app.state
        .tracker
        .begin_session(account.id, None, None)
        .await
        .unwrap();

    app.clock.advance_secs(45);
    app.state.tracker.record_activity(account.id).await;
    assert_eq!(stored(&app, account.id).await.total_time_secs, 30);

    app.clock.advance_secs(5);
    let (status, Json(body)) = auth::logout(
        State(app.state.clone()),
        Extension(auth_for(&account)),
    )
    .await
    .unwrap();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_duration_secs"], 50);
    assert_eq!(body["total_time_secs"], 50);

    let account = stored(&app, account.id).await;
    assert_eq!(account.total_time_secs, 50);
    assert!(!account.is_online);
}

#[tokio::test]
async fn test_legacy_logout_accounting_double_counts() {
    let app = test_app_with(TrackerConfig {
        legacy_logout_accounting: true,
        ..TrackerConfig::default()
    });
    let account = seed_user(&app, "Tracked", "tracked@example.com").await;

    app.state
        .tracker
        .begin_session(account.id, None, None)
        .await
        .unwrap();

    app.clock.advance_secs(45);
    app.state.tracker.record_activity(account.id).await;

    app.clock.advance_secs(5);
    let (_, Json(body)) = auth::logout(
        State(app.state.clone()),
        Extension(auth_for(&account)),
    )
    .await
    .unwrap();

    // The full 50s session lands on top of the 30s already credited
    assert_eq!(body["session_duration_secs"], 50);
    assert_eq!(body["total_time_secs"], 80);
}

#[tokio::test]
async fn test_sub_threshold_pings_never_credit() {
    let app = test_app();
    let account = seed_user(&app, "Busy", "busy@example.com").await;

    app.state
        .tracker
        .begin_session(account.id, None, None)
        .await
        .unwrap();

    // Each ping lands under the 30s threshold and resets the measurement
    // base, so frequent activity accrues nothing
    for _ in 0..3 {
        app.clock.advance_secs(10);
        app.state.tracker.record_activity(account.id).await;
    }
    assert_eq!(stored(&app, account.id).await.total_time_secs, 0);

    // A full threshold gap since the last persisted update credits once
    app.clock.advance_secs(30);
    app.state.tracker.record_activity(account.id).await;
    assert_eq!(stored(&app, account.id).await.total_time_secs, 30);
}

#[tokio::test]
async fn test_profile_reports_live_session_time() {
    let app = test_app();
    let account = seed_user(&app, "Live", "live@example.com").await;

    app.state
        .tracker
        .begin_session(account.id, None, None)
        .await
        .unwrap();
    app.clock.advance_secs(95);

    let (_, Json(body)) = user::get_profile(
        State(app.state.clone()),
        Extension(auth_for(&account)),
    )
    .await
    .unwrap();

    assert_eq!(body["user"]["current_session_secs"], 95);
    assert_eq!(body["user"]["current_session_formatted"], "1m 35s");
    assert_eq!(body["user"]["total_time_secs"], 0);

    app.clock.advance_secs(5);
    auth::logout(
        State(app.state.clone()),
        Extension(auth_for(&account)),
    )
    .await
    .unwrap();

    let (_, Json(body)) = user::get_profile(
        State(app.state.clone()),
        Extension(auth_for(&account)),
    )
    .await
    .unwrap();

    assert_eq!(body["user"]["current_session_secs"], 0);
    assert_eq!(body["user"]["total_time_secs"], 100);
    assert_eq!(body["user"]["total_time_formatted"], "1m 40s");
    assert_eq!(body["user"]["is_online"], false);
}

#[tokio::test]
async fn test_emotion_stats_buckets_and_window() {
    let app = test_app();
    let account = seed_user(&app, "Watcher", "watcher@example.com").await;

    record(&app, &account, "Happy").await;
    record(&app, &account, "Happy").await;
    app.clock.advance_secs(61);
    record(&app, &account, "Sad").await;

    // Minute granularity sees both buckets
    let (status, Json(body)) = emotion::stats(
        State(app.state.clone()),
        Extension(auth_for(&account)),
        Query(StatsQuery {
            period: Some("minute".to_string()),
        }),
    )
    .await
    .unwrap();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["period"], "minute");
    let stats = body["stats"].as_array().unwrap();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0]["time"], "2024-05-17T12:00");
    assert_eq!(stats[0]["emotions"]["Happy"], 2);
    assert_eq!(stats[0]["dominant_emotion"], "Happy");
    assert_eq!(stats[1]["time"], "2024-05-17T12:01");
    assert_eq!(stats[1]["emotions"]["Sad"], 1);

    assert_eq!(body["overall"]["total_records"], 3);
    assert_eq!(body["overall"]["most_common_emotion"], "Happy");
    assert_eq!(body["overall"]["emotion_percentages"]["Happy"], "66.7");
    assert_eq!(body["overall"]["emotion_percentages"]["Sad"], "33.3");

    // Second granularity only reaches 60s back, which excludes the first
    // two records
    let (_, Json(body)) = emotion::stats(
        State(app.state.clone()),
        Extension(auth_for(&account)),
        Query(StatsQuery {
            period: Some("second".to_string()),
        }),
    )
    .await
    .unwrap();

    let stats = body["stats"].as_array().unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0]["time"], "2024-05-17T12:01:01");
    assert_eq!(body["overall"]["total_records"], 1);
    assert_eq!(body["overall"]["most_common_emotion"], "Sad");

    // Unknown periods read as hourly
    let (_, Json(body)) = emotion::stats(
        State(app.state.clone()),
        Extension(auth_for(&account)),
        Query(StatsQuery {
            period: Some("fortnight".to_string()),
        }),
    )
    .await
    .unwrap();
    assert_eq!(body["period"], "hour");
    assert_eq!(body["overall"]["total_records"], 3);
}

#[tokio::test]
async fn test_record_validation_and_default_session_id() {
    let app = test_app();
    let account = seed_user(&app, "Recorder", "recorder@example.com").await;

    let (status, Json(body)) = emotion::record_emotion(
        State(app.state.clone()),
        Extension(auth_for(&account)),
        Json(RecordEmotionRequest {
            emotion: None,
            confidence: Some(0.5),
            session_id: None,
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Emotion and confidence are required");

    let (status, Json(body)) = emotion::record_emotion(
        State(app.state.clone()),
        Extension(auth_for(&account)),
        Json(RecordEmotionRequest {
            emotion: Some("Bored".to_string()),
            confidence: Some(0.5),
            session_id: None,
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid emotion label");

    let (status, Json(body)) = emotion::record_emotion(
        State(app.state.clone()),
        Extension(auth_for(&account)),
        Json(RecordEmotionRequest {
            emotion: Some("Happy".to_string()),
            confidence: None,
            session_id: None,
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Emotion and confidence are required");

    let (status, Json(body)) = emotion::record_emotion(
        State(app.state.clone()),
        Extension(auth_for(&account)),
        Json(RecordEmotionRequest {
            emotion: Some("Happy".to_string()),
            confidence: Some(0.95),
            session_id: None,
        }),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["record"]["emotion"], "Happy");

    let records = app
        .store
        .recent_emotion_records(account.id, 10)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].session_id.starts_with("session_"));
}

#[tokio::test]
async fn test_recent_records_newest_first_with_limit() {
    let app = test_app();
    let account = seed_user(&app, "Recent", "recent@example.com").await;

    record(&app, &account, "Anger").await;
    app.clock.advance_secs(10);
    record(&app, &account, "Fear").await;
    app.clock.advance_secs(10);
    record(&app, &account, "Surprise").await;

    let (_, Json(body)) = emotion::recent(
        State(app.state.clone()),
        Extension(auth_for(&account)),
        Query(RecentQuery { limit: Some(2) }),
    )
    .await
    .unwrap();

    let records = body["records"].as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["emotion"], "Surprise");
    assert_eq!(records[1]["emotion"], "Fear");
    assert_eq!(records[0]["session_id"], "session_test");
}

#[tokio::test]
async fn test_image_analysis_crud_flow() {
    let app = test_app();
    let owner = seed_user(&app, "Owner", "owner@example.com").await;
    let other = seed_user(&app, "Other", "other@example.com").await;

    // Validation
    let (status, Json(body)) = emotion::save_image_analysis(
        State(app.state.clone()),
        Extension(auth_for(&owner)),
        Json(ImageAnalysisRequest {
            image_url: None,
            emotion: Some("Happy".to_string()),
            confidence: Some(0.9),
            all_emotions: None,
            bbox: None,
            file_name: None,
            file_size: None,
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Image URL, emotion, and confidence are required");

    let (status, Json(body)) = emotion::save_image_analysis(
        State(app.state.clone()),
        Extension(auth_for(&owner)),
        Json(ImageAnalysisRequest {
            image_url: Some("https://cdn.example.com/a.jpg".to_string()),
            emotion: Some("Bored".to_string()),
            confidence: Some(0.9),
            all_emotions: None,
            bbox: None,
            file_name: None,
            file_size: None,
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid emotion label");

    let _first = save_analysis(&app, &owner, "https://cdn.example.com/first.jpg", 0.7).await;
    app.clock.advance_secs(10);
    let second = save_analysis(&app, &owner, "https://cdn.example.com/second.jpg", 0.9).await;
    let foreign = save_analysis(&app, &other, "https://cdn.example.com/else.jpg", 0.8).await;

    // Newest first, paged
    let (_, Json(body)) = emotion::list_image_analyses(
        State(app.state.clone()),
        Extension(auth_for(&owner)),
        Query(PageQuery {
            limit: Some(1),
            skip: None,
        }),
    )
    .await
    .unwrap();
    assert_eq!(body["total"], 2);
    assert_eq!(body["limit"], 1);
    assert_eq!(body["skip"], 0);
    let analyses = body["analyses"].as_array().unwrap();
    assert_eq!(analyses.len(), 1);
    assert_eq!(analyses[0]["image_url"], "https://cdn.example.com/second.jpg");
    assert_eq!(analyses[0]["bbox"][0], 10);

    let (_, Json(body)) = emotion::list_image_analyses(
        State(app.state.clone()),
        Extension(auth_for(&owner)),
        Query(PageQuery {
            limit: Some(1),
            skip: Some(1),
        }),
    )
    .await
    .unwrap();
    assert_eq!(
        body["analyses"][0]["image_url"],
        "https://cdn.example.com/first.jpg"
    );

    // Aggregates cover the whole account
    let (_, Json(body)) = emotion::image_analysis_stats(
        State(app.state.clone()),
        Extension(auth_for(&owner)),
    )
    .await
    .unwrap();
    assert_eq!(body["total_analyses"], 2);
    let avg = body["avg_confidence"].as_f64().unwrap();
    assert!((avg - 0.8).abs() < 1e-9);
    assert_eq!(body["emotion_stats"]["Happy"]["count"], 2);

    // The admin view nests the same aggregates beside the page
    let (_, Json(body)) = admin::user_image_analyses(
        State(app.state.clone()),
        Path(owner.id.to_string()),
        Query(PageQuery {
            limit: None,
            skip: None,
        }),
    )
    .await
    .unwrap();
    assert_eq!(body["total"], 2);
    assert_eq!(body["limit"], 50);
    assert_eq!(body["stats"]["total_analyses"], 2);

    // Only the owner may delete
    let (status, Json(body)) = emotion::delete_image_analysis(
        State(app.state.clone()),
        Extension(auth_for(&owner)),
        Path(foreign.clone()),
    )
    .await
    .unwrap_err();
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Not authorized");

    let (status, Json(body)) = emotion::delete_image_analysis(
        State(app.state.clone()),
        Extension(auth_for(&owner)),
        Path(second),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Image analysis deleted successfully");

    let (status, Json(body)) = emotion::delete_image_analysis(
        State(app.state.clone()),
        Extension(auth_for(&owner)),
        Path(Uuid::new_v4().to_string()),
    )
    .await
    .unwrap_err();
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Image analysis not found");

    let (_, Json(body)) = emotion::list_image_analyses(
        State(app.state.clone()),
        Extension(auth_for(&owner)),
        Query(PageQuery {
            limit: None,
            skip: None,
        }),
    )
    .await
    .unwrap();
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn test_admin_user_emotion_stats_include_identity() {
    let app = test_app();
    let account = seed_user(&app, "Watched", "watched@example.com").await;

    record(&app, &account, "Neutral").await;
    record(&app, &account, "Neutral").await;

    let (status, Json(body)) = admin::user_emotions(
        State(app.state.clone()),
        Path(account.id.to_string()),
        Query(StatsQuery {
            period: Some("minute".to_string()),
        }),
    )
    .await
    .unwrap();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["user_id"], account.id.to_string());
    assert_eq!(body["user_name"], "Watched");
    assert_eq!(body["overall"]["total_records"], 2);
    assert_eq!(body["overall"]["most_common_emotion"], "Neutral");

    let (status, Json(body)) = admin::user_emotions(
        State(app.state.clone()),
        Path(Uuid::new_v4().to_string()),
        Query(StatsQuery { period: None }),
    )
    .await
    .unwrap_err();
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "User not found");
}
