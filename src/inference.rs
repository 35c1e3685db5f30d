use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::TransportError;
use crate::types::{MergedSample, SensorReading};

/// Activity labels reported by the inference service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Activity {
    /// Activity of daily living
    Adl,
    NearFall,
    Fall,
    Unknown,
    Other(String),
}

impl Activity {
    pub fn from_label(label: &str) -> Self {
        match label {
            "ADL" => Activity::Adl,
            "Near Fall" => Activity::NearFall,
            "Fall" => Activity::Fall,
            "Unknown" => Activity::Unknown,
            other => Activity::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activity::Adl => write!(f, "ADL"),
            Activity::NearFall => write!(f, "Near Fall"),
            Activity::Fall => write!(f, "Fall"),
            Activity::Unknown => write!(f, "Unknown"),
            Activity::Other(label) => write!(f, "{}", label),
        }
    }
}

/// Classification of one dispatched sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub fall_detected: bool,
    pub predicted_activity: String,
}

impl InferenceResult {
    pub fn activity(&self) -> Activity {
        Activity::from_label(&self.predicted_activity)
    }
}

/// Body of `POST /predict`. Both sensors are always present.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictRequest {
    pub accelerometer: SensorReading,
    pub gyroscope: SensorReading,
}

impl From<&MergedSample> for PredictRequest {
    fn from(sample: &MergedSample) -> Self {
        PredictRequest {
            accelerometer: sample.accelerometer,
            gyroscope: sample.gyroscope,
        }
    }
}

/// Remote classifier seam. The returned future owns everything it needs so
/// the engine can hold it across state changes and drop it to cancel.
pub trait InferenceClient: Send + Sync {
    fn classify(
        &self,
        sample: &MergedSample,
    ) -> BoxFuture<'static, Result<InferenceResult, TransportError>>;
}

/// HTTP client for the `/predict` endpoint.
///
/// # Error Handling
/// - Connection failures and timeouts map to `TransportError::Request`/`Timeout`
/// - Any non-2xx status is `TransportError::Status`
/// - A body that does not decode to `InferenceResult` is `TransportError::Decode`
///
/// No retries: a failed cycle is skipped and the next debounce cycle proceeds.
#[derive(Clone)]
pub struct HttpInferenceClient {
    client: reqwest::Client,
    predict_url: String,
}

impl HttpInferenceClient {
    pub fn new(predict_url: impl Into<String>, timeout: Option<Duration>) -> Self {
        let mut builder =
            reqwest::Client::builder().user_agent(concat!("fall_monitor/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().unwrap_or_else(|_| reqwest::Client::new());

        HttpInferenceClient {
            client,
            predict_url: predict_url.into(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.predict_url.clone(), config.request_timeout)
    }

    pub fn predict_url(&self) -> &str {
        &self.predict_url
    }
}

impl InferenceClient for HttpInferenceClient {
    fn classify(
        &self,
        sample: &MergedSample,
    ) -> BoxFuture<'static, Result<InferenceResult, TransportError>> {
        let client = self.client.clone();
        let url = self.predict_url.clone();
        let body = PredictRequest::from(sample);

        Box::pin(async move {
            let response = client.post(&url).json(&body).send().await?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Status(status.as_u16()));
            }

            let text = response
                .text()
                .await
                .map_err(|e| TransportError::Request(format!("Failed to read response: {}", e)))?;
            serde_json::from_str::<InferenceResult>(&text)
                .map_err(|e| TransportError::Decode(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_body_shape() {
        let sample = MergedSample::new(
            SensorReading::new(-5.37, 0.08, 6.32),
            SensorReading::new(0.01, 2.37, -0.22),
        );
        let body = serde_json::to_value(PredictRequest::from(&sample)).unwrap();
        assert_eq!(
            body,
            json!({
                "accelerometer": {"x": -5.37, "y": 0.08, "z": 6.32},
                "gyroscope": {"x": 0.01, "y": 2.37, "z": -0.22},
            })
        );
    }

    #[test]
    fn test_result_decoding() {
        let result: InferenceResult =
            serde_json::from_str(r#"{"fall_detected": true, "predicted_activity": "Fall"}"#)
                .unwrap();
        assert!(result.fall_detected);
        assert_eq!(result.activity(), Activity::Fall);

        let malformed = serde_json::from_str::<InferenceResult>(r#"{"error": "boom"}"#);
        assert!(malformed.is_err());
    }

    #[test]
    fn test_activity_labels() {
        for label in ["ADL", "Near Fall", "Fall", "Unknown", "walking"] {
            assert_eq!(Activity::from_label(label).to_string(), label);
        }
        assert_eq!(Activity::from_label("Near Fall"), Activity::NearFall);
    }

    #[test]
    fn test_client_from_config() {
        let config = EngineConfig::default().with_service_url("http://10.0.2.2:5000");
        let client = HttpInferenceClient::from_config(&config);
        assert_eq!(client.predict_url(), "http://10.0.2.2:5000/predict");
    }
}
