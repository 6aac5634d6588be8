// Client for the external emotion-inference service. The model work all
// happens on the other side of this HTTP call; we only forward frames and
// relay the verdict.

use crate::config::InferenceConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    image: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<&'a str>,
}

/// Verdict from the model service's `/predict` endpoint. `success: false`
/// with an error message is a valid answer (e.g. no face in the frame).
#[derive(Debug, Clone, Deserialize)]
pub struct Prediction {
    pub success: bool,
    #[serde(default)]
    pub emotion: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub all_emotions: HashMap<String, f64>,
    #[serde(default)]
    pub bbox: Option<[i64; 4]>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug)]
pub enum InferenceError {
    /// The service could not be reached or answered with a failure status
    Unavailable(String),
    /// The service answered with a body we could not decode
    BadResponse(String),
}

impl std::fmt::Display for InferenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InferenceError::Unavailable(msg) => write!(f, "Inference service unavailable: {}", msg),
            InferenceError::BadResponse(msg) => write!(f, "Bad inference response: {}", msg),
        }
    }
}

impl std::error::Error for InferenceError {}

/// HTTP client for the inference service, shared across handlers
#[derive(Clone)]
pub struct InferenceClient {
    http: reqwest::Client,
    base_url: String,
}

impl InferenceClient {
    pub fn new(config: &InferenceConfig) -> Result<Self, String> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| format!("Failed to build inference HTTP client: {}", err))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Send one frame to the model service and return its verdict
    pub async fn predict(
        &self,
        image: &str,
        client_id: Option<&str>,
    ) -> Result<Prediction, InferenceError> {
        let url = format!("{}/predict", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&PredictRequest { image, client_id })
            .send()
            .await
            .map_err(|err| InferenceError::Unavailable(err.to_string()))?;

        if !response.status().is_success() {
            return Err(InferenceError::Unavailable(format!(
                "Model service returned {}",
                response.status()
            )));
        }

        response
            .json::<Prediction>()
            .await
            .map_err(|err| InferenceError::BadResponse(err.to_string()))
    }
}
