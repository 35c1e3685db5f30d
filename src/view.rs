use serde::{Deserialize, Serialize};

use crate::state_machine::EngineState;
use crate::types::{current_timestamp, SensorCapabilities, SensorKind, SensorReading};

/// Read-only snapshot of the engine, published after every change.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EngineView {
    pub timestamp: f64,
    pub state: EngineState,
    pub accelerometer_data: SensorReading,
    pub gyroscope_data: SensorReading,
    pub accelerometer_available: bool,
    pub gyroscope_available: bool,
    pub accelerometer_subscribed: bool,
    pub gyroscope_subscribed: bool,
    /// Label of the most recent classification
    pub last_activity: Option<String>,
    pub samples_merged: u64,
    /// Samples superseded inside a debounce window and never sent
    pub samples_coalesced: u64,
    pub requests_sent: u64,
    pub transport_failures: u64,
    pub alerts_sent: u64,
}

impl EngineView {
    pub fn new() -> Self {
        Self {
            timestamp: current_timestamp(),
            state: EngineState::Idle,
            accelerometer_data: SensorReading::ZERO,
            gyroscope_data: SensorReading::ZERO,
            accelerometer_available: false,
            gyroscope_available: false,
            accelerometer_subscribed: false,
            gyroscope_subscribed: false,
            last_activity: None,
            samples_merged: 0,
            samples_coalesced: 0,
            requests_sent: 0,
            transport_failures: 0,
            alerts_sent: 0,
        }
    }

    pub fn is_subscribed(&self, kind: SensorKind) -> bool {
        match kind {
            SensorKind::Accelerometer => self.accelerometer_subscribed,
            SensorKind::Gyroscope => self.gyroscope_subscribed,
        }
    }

    pub fn capabilities(&self) -> SensorCapabilities {
        SensorCapabilities::new(self.accelerometer_available, self.gyroscope_available)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Default for EngineView {
    fn default() -> Self {
        Self::new()
    }
}

/// Advisory messages for collaborators. None of them stop monitoring.
#[derive(Clone, Debug, PartialEq)]
pub enum Notice {
    /// Neither sensor can be used; the engine stays idle
    Unavailable,
    /// A toggle targeted a sensor that was probed as missing
    SensorUnavailable(SensorKind),
    /// Synthetic generators are standing in for real sensors
    MockData,
    ProbeFailed(String),
    TransportFailed(String),
    StreamFailed { kind: SensorKind, reason: String },
    /// "Did you fall?" prompt raised; answer with confirm or deny
    FallPrompt { predicted_activity: String },
    /// The fall was confirmed and the notification hook was invoked
    HelpRequested,
    Prediction(String),
}

impl Notice {
    /// Short title and message pair for display.
    pub fn message(&self) -> (&'static str, String) {
        match self {
            Notice::Unavailable => (
                "Unavailable",
                "No motion sensor is available on this device.".to_string(),
            ),
            Notice::SensorUnavailable(kind) => (
                "Unavailable",
                format!("{} is not available on this device.", kind),
            ),
            Notice::MockData => (
                "Unsupported Platform",
                "Sensors are not supported on this platform. Using mock data.".to_string(),
            ),
            Notice::ProbeFailed(reason) => (
                "Error",
                format!("Failed to check sensor availability: {}", reason),
            ),
            Notice::TransportFailed(reason) => {
                ("Error", format!("Error sending sensor data: {}", reason))
            }
            Notice::StreamFailed { kind, reason } => {
                ("Error", format!("{} stopped: {}", kind, reason))
            }
            Notice::FallPrompt { .. } => ("Fall Detected", "Did you fall?".to_string()),
            Notice::HelpRequested => ("Alert", "Sending help to your location.".to_string()),
            Notice::Prediction(label) => ("Prediction", format!("Predicted Activity: {}", label)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_defaults() {
        let view = EngineView::new();
        assert_eq!(view.state, EngineState::Idle);
        assert!(!view.is_subscribed(SensorKind::Accelerometer));
        assert_eq!(view.capabilities(), SensorCapabilities::default());
        assert!(view.to_json().unwrap().contains("\"state\": \"Idle\""));
    }

    #[test]
    fn test_notice_messages() {
        let (title, message) = Notice::SensorUnavailable(SensorKind::Gyroscope).message();
        assert_eq!(title, "Unavailable");
        assert_eq!(message, "Gyroscope is not available on this device.");

        let (title, message) = Notice::FallPrompt {
            predicted_activity: "Fall".to_string(),
        }
        .message();
        assert_eq!(title, "Fall Detected");
        assert_eq!(message, "Did you fall?");
    }
}
