use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{error, warn};
use uuid::Uuid;

use crate::middleware::auth::AuthUser;
use crate::models::{
    EmotionLabel, EmotionRecord, ImageAnalysis, ImageAnalysisRequest, RecognizeRequest,
    RecordEmotionRequest,
};
use crate::state::AppState;
use crate::storage::StorageError;

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub period: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<usize>,
    pub skip: Option<usize>,
}

/// Aggregation window for emotion statistics. Unknown values fall back to
/// hourly, the widest view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsPeriod {
    Second,
    Minute,
    Hour,
}

impl StatsPeriod {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("second") => StatsPeriod::Second,
            Some("minute") => StatsPeriod::Minute,
            _ => StatsPeriod::Hour,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatsPeriod::Second => "second",
            StatsPeriod::Minute => "minute",
            StatsPeriod::Hour => "hour",
        }
    }

    /// How far back the query reaches: 60 buckets of the chosen granularity
    /// for second and minute, a full day for hour.
    fn window(self) -> Duration {
        match self {
            StatsPeriod::Second => Duration::seconds(60),
            StatsPeriod::Minute => Duration::minutes(60),
            StatsPeriod::Hour => Duration::hours(24),
        }
    }

    /// Bucket key: the ISO-8601 timestamp truncated to this granularity
    fn bucket_key(self, timestamp: DateTime<Utc>) -> String {
        let format = match self {
            StatsPeriod::Second => "%Y-%m-%dT%H:%M:%S",
            StatsPeriod::Minute => "%Y-%m-%dT%H:%M",
            StatsPeriod::Hour => "%Y-%m-%dT%H",
        };
        timestamp.format(format).to_string()
    }
}

fn label_index(label: EmotionLabel) -> usize {
    EmotionLabel::ALL
        .iter()
        .position(|candidate| *candidate == label)
        .unwrap_or(0)
}

/// Largest count wins; ties keep the earlier label in the canonical order.
/// An all-zero tally reads as Neutral with count 0.
fn dominant_label(counts: &[u64; 8]) -> (EmotionLabel, u64) {
    let mut dominant = EmotionLabel::Neutral;
    let mut max_count = 0;

    for (label, count) in EmotionLabel::ALL.iter().zip(counts.iter()) {
        if *count > max_count {
            max_count = *count;
            dominant = *label;
        }
    }

    (dominant, max_count)
}

/// One-decimal percentage string; "0.0" when the total is zero
fn percentage(count: u64, total: u64) -> String {
    if total == 0 {
        "0.0".to_string()
    } else {
        format!("{:.1}", count as f64 / total as f64 * 100.0)
    }
}

fn label_counts_json(counts: &[u64; 8]) -> Value {
    let mut map = serde_json::Map::new();
    for (label, count) in EmotionLabel::ALL.iter().zip(counts.iter()) {
        map.insert(label.as_str().to_string(), json!(count));
    }
    Value::Object(map)
}

/// Group records into time buckets and compute the per-bucket and overall
/// tallies. Every bucket carries all eight labels, zeroes included, so
/// chart consumers never need to fill gaps themselves.
fn emotion_stats(records: &[EmotionRecord], period: StatsPeriod) -> (Vec<Value>, Value) {
    let mut buckets: BTreeMap<String, [u64; 8]> = BTreeMap::new();
    let mut overall_counts = [0u64; 8];

    for record in records {
        let counts = buckets
            .entry(period.bucket_key(record.timestamp))
            .or_insert([0u64; 8]);
        counts[label_index(record.emotion)] += 1;
        overall_counts[label_index(record.emotion)] += 1;
    }

    let stats = buckets
        .iter()
        .map(|(time, counts)| {
            let total: u64 = counts.iter().sum();
            let (dominant, dominant_count) = dominant_label(counts);
            json!({
                "time": time,
                "emotions": label_counts_json(counts),
                "total": total,
                "dominant_emotion": dominant.as_str(),
                "dominant_count": dominant_count,
                "dominant_percentage": percentage(dominant_count, total)
            })
        })
        .collect();

    let total_records = records.len() as u64;
    let (most_common, most_common_count) = dominant_label(&overall_counts);

    let mut percentages = serde_json::Map::new();
    for (label, count) in EmotionLabel::ALL.iter().zip(overall_counts.iter()) {
        percentages.insert(
            label.as_str().to_string(),
            json!(percentage(*count, total_records)),
        );
    }

    let overall = json!({
        "total_records": total_records,
        "emotion_counts": label_counts_json(&overall_counts),
        "emotion_percentages": percentages,
        "most_common_emotion": most_common.as_str(),
        "most_common_count": most_common_count
    });

    (stats, overall)
}

/// Aggregate view over stored image analyses. Only labels that actually
/// occur get an entry.
pub(crate) fn analysis_stats(analyses: &[ImageAnalysis]) -> Value {
    let total = analyses.len() as u64;

    let avg_confidence = if analyses.is_empty() {
        0.0
    } else {
        analyses.iter().map(|analysis| analysis.confidence).sum::<f64>() / analyses.len() as f64
    };

    let mut counts = [0u64; 8];
    for analysis in analyses {
        counts[label_index(analysis.emotion)] += 1;
    }

    let mut emotion_stats = serde_json::Map::new();
    for (label, count) in EmotionLabel::ALL.iter().zip(counts.iter()) {
        if *count > 0 {
            emotion_stats.insert(
                label.as_str().to_string(),
                json!({
                    "count": count,
                    "percentage": percentage(*count, total)
                }),
            );
        }
    }

    json!({
        "total_analyses": total,
        "avg_confidence": avg_confidence,
        "emotion_stats": emotion_stats
    })
}

pub(crate) fn analysis_view(analysis: &ImageAnalysis) -> Value {
    json!({
        "id": analysis.id,
        "image_url": analysis.image_url,
        "emotion": analysis.emotion,
        "confidence": analysis.confidence,
        "all_emotions": analysis.all_emotions,
        "bbox": analysis.bbox,
        "file_name": analysis.file_name,
        "file_size": analysis.file_size,
        "timestamp": analysis.timestamp
    })
}

/// Full statistics envelope for one account, shared with the admin view
pub(crate) async fn stats_payload(
    state: &AppState,
    account_id: Uuid,
    period: StatsPeriod,
) -> Result<Value, StorageError> {
    let end = state.tracker.now();
    let start = end - period.window();

    let records = state
        .store
        .emotion_records_between(account_id, start, end)
        .await?;
    let (stats, overall) = emotion_stats(&records, period);

    Ok(json!({
        "success": true,
        "period": period.as_str(),
        "time_range": {
            "start": start,
            "end": end
        },
        "stats": stats,
        "overall": overall
    }))
}

fn server_error() -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": "Server error"
        })),
    )
}

pub async fn recognize(
    State(state): State<AppState>,
    Json(payload): Json<RecognizeRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let image = match payload.image.as_deref().filter(|image| !image.is_empty()) {
        Some(image) => image,
        None => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "No image provided"
                })),
            ));
        }
    };

    match state.inference.predict(image, payload.client_id.as_deref()).await {
        Ok(prediction) => {
            let mut body = json!({
                "success": prediction.success,
                "emotion": prediction.emotion,
                "confidence": prediction.confidence,
                "all_emotions": prediction.all_emotions,
                "bbox": prediction.bbox
            });
            if let Some(message) = prediction.error {
                body["error"] = json!(message);
            }
            Ok((StatusCode::OK, Json(body)))
        }
        Err(err) => {
            // Degraded mode: answer with a synthetic verdict rather than
            // failing the request
            warn!("Inference service unavailable, using fallback: {}", err);
            let mut rng = rand::thread_rng();
            let emotion = EmotionLabel::ALL[rng.gen_range(0..EmotionLabel::ALL.len())];
            let confidence = (rng.gen_range(0.80_f64..1.00) * 100.0).round() / 100.0;
            Ok((
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "emotion": emotion,
                    "confidence": confidence,
                    "message": "Using fallback (inference service not available)"
                })),
            ))
        }
    }
}

pub async fn record_emotion(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(payload): Json<RecordEmotionRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let (raw_emotion, confidence) = match (payload.emotion.as_deref(), payload.confidence) {
        (Some(emotion), Some(confidence)) => (emotion, confidence),
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "Emotion and confidence are required"
                })),
            ));
        }
    };

    let emotion: EmotionLabel = raw_emotion.parse().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Invalid emotion label"
            })),
        )
    })?;

    if !(0.0..=1.0).contains(&confidence) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Confidence must be between 0 and 1"
            })),
        ));
    }

    let now = state.tracker.now();
    let record = EmotionRecord {
        id: Uuid::new_v4(),
        account_id: auth_user.account_id,
        emotion,
        confidence,
        session_id: payload
            .session_id
            .unwrap_or_else(|| format!("session_{}", now.timestamp_millis())),
        timestamp: now,
    };

    state
        .store
        .insert_emotion_record(record.clone())
        .await
        .map_err(|err| {
            error!("Failed to store emotion record: {}", err);
            server_error()
        })?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "record": {
                "id": record.id,
                "emotion": record.emotion,
                "confidence": record.confidence,
                "timestamp": record.timestamp
            }
        })),
    ))
}

pub async fn stats(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<StatsQuery>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let period = StatsPeriod::parse(query.period.as_deref());

    let payload = stats_payload(&state, auth_user.account_id, period)
        .await
        .map_err(|err| {
            error!("Failed to compute emotion stats: {}", err);
            server_error()
        })?;

    Ok((StatusCode::OK, Json(payload)))
}

pub async fn recent(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<RecentQuery>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let limit = query.limit.unwrap_or(100);

    let records = state
        .store
        .recent_emotion_records(auth_user.account_id, limit)
        .await
        .map_err(|err| {
            error!("Failed to fetch recent emotion records: {}", err);
            server_error()
        })?;

    let records: Vec<Value> = records
        .iter()
        .map(|record| {
            json!({
                "emotion": record.emotion,
                "confidence": record.confidence,
                "timestamp": record.timestamp,
                "session_id": record.session_id
            })
        })
        .collect();

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "records": records
        })),
    ))
}

pub async fn save_image_analysis(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(payload): Json<ImageAnalysisRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let image_url = payload
        .image_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty());

    let (image_url, raw_emotion, confidence) =
        match (image_url, payload.emotion.as_deref(), payload.confidence) {
            (Some(url), Some(emotion), Some(confidence)) => (url, emotion, confidence),
            _ => {
                return Err((
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": "Image URL, emotion, and confidence are required"
                    })),
                ));
            }
        };

    let emotion: EmotionLabel = raw_emotion.parse().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Invalid emotion label"
            })),
        )
    })?;

    if !(0.0..=1.0).contains(&confidence) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Confidence must be between 0 and 1"
            })),
        ));
    }

    let analysis = ImageAnalysis {
        id: Uuid::new_v4(),
        account_id: auth_user.account_id,
        image_url: image_url.to_string(),
        emotion,
        confidence,
        all_emotions: payload.all_emotions.unwrap_or_default(),
        bbox: payload.bbox,
        file_name: payload.file_name.unwrap_or_default(),
        file_size: payload.file_size.unwrap_or(0),
        timestamp: state.tracker.now(),
    };

    state
        .store
        .insert_image_analysis(analysis.clone())
        .await
        .map_err(|err| {
            error!("Failed to store image analysis: {}", err);
            server_error()
        })?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "analysis": {
                "id": analysis.id,
                "image_url": analysis.image_url,
                "emotion": analysis.emotion,
                "confidence": analysis.confidence,
                "all_emotions": analysis.all_emotions,
                "bbox": analysis.bbox,
                "timestamp": analysis.timestamp
            }
        })),
    ))
}

pub async fn list_image_analyses(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<PageQuery>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let limit = query.limit.unwrap_or(50);
    let skip = query.skip.unwrap_or(0);

    let (analyses, total) = state
        .store
        .list_image_analyses(auth_user.account_id, limit, skip)
        .await
        .map_err(|err| {
            error!("Failed to fetch image analyses: {}", err);
            server_error()
        })?;

    let analyses: Vec<Value> = analyses.iter().map(analysis_view).collect();

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "analyses": analyses,
            "total": total,
            "limit": limit,
            "skip": skip
        })),
    ))
}

pub async fn image_analysis_stats(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let analyses = state
        .store
        .image_analyses_for_account(auth_user.account_id)
        .await
        .map_err(|err| {
            error!("Failed to fetch image analyses: {}", err);
            server_error()
        })?;

    let mut payload = analysis_stats(&analyses);
    payload["success"] = json!(true);

    Ok((StatusCode::OK, Json(payload)))
}

pub async fn delete_image_analysis(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let not_found = || {
        (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "Image analysis not found"
            })),
        )
    };

    // A malformed id cannot name a stored document
    let id = Uuid::parse_str(&id).map_err(|_| not_found())?;

    let analysis = state
        .store
        .find_image_analysis(id)
        .await
        .map_err(|err| {
            error!("Failed to fetch image analysis: {}", err);
            server_error()
        })?
        .ok_or_else(not_found)?;

    if analysis.account_id != auth_user.account_id {
        return Err((
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "Not authorized"
            })),
        ));
    }

    match state.store.delete_image_analysis(id).await {
        Ok(()) => {}
        Err(StorageError::NotFound) => return Err(not_found()),
        Err(err) => {
            error!("Failed to delete image analysis: {}", err);
            return Err(server_error());
        }
    }

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Image analysis deleted successfully"
        })),
    ))
}
