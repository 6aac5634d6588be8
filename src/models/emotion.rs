use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The inference model's closed label set. Invalid labels are rejected at
/// the API boundary before anything reaches storage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EmotionLabel {
    Anger,
    Contempt,
    Disgust,
    Fear,
    Happy,
    Neutral,
    Sad,
    Surprise,
}

impl EmotionLabel {
    pub const ALL: [EmotionLabel; 8] = [
        EmotionLabel::Anger,
        EmotionLabel::Contempt,
        EmotionLabel::Disgust,
        EmotionLabel::Fear,
        EmotionLabel::Happy,
        EmotionLabel::Neutral,
        EmotionLabel::Sad,
        EmotionLabel::Surprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionLabel::Anger => "Anger",
            EmotionLabel::Contempt => "Contempt",
            EmotionLabel::Disgust => "Disgust",
            EmotionLabel::Fear => "Fear",
            EmotionLabel::Happy => "Happy",
            EmotionLabel::Neutral => "Neutral",
            EmotionLabel::Sad => "Sad",
            EmotionLabel::Surprise => "Surprise",
        }
    }
}

impl FromStr for EmotionLabel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EmotionLabel::ALL
            .iter()
            .find(|label| label.as_str() == s)
            .copied()
            .ok_or(())
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single emotion detection event, usually one per analyzed video frame
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmotionRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub emotion: EmotionLabel,
    pub confidence: f64,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

/// A stored still-image analysis result with the full probability map
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImageAnalysis {
    pub id: Uuid,
    pub account_id: Uuid,
    pub image_url: String,
    pub emotion: EmotionLabel,
    pub confidence: f64,
    pub all_emotions: HashMap<String, f64>,
    /// Face bounding box as [x1, y1, x2, y2], when the detector reported one
    pub bbox: Option<[i64; 4]>,
    pub file_name: String,
    pub file_size: u64,
    pub timestamp: DateTime<Utc>,
}

// ---- Request payloads ----
// Required fields are Options so missing values produce the API's own
// 400 envelope instead of a body-deserialization rejection.

#[derive(Debug, Deserialize)]
pub struct RecognizeRequest {
    pub image: Option<String>,
    pub client_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecordEmotionRequest {
    pub emotion: Option<String>,
    pub confidence: Option<f64>,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ImageAnalysisRequest {
    pub image_url: Option<String>,
    pub emotion: Option<String>,
    pub confidence: Option<f64>,
    pub all_emotions: Option<HashMap<String, f64>>,
    pub bbox: Option<[i64; 4]>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
}
