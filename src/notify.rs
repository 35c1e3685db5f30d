use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::types::{current_timestamp, MergedSample};

/// A confirmed fall handed to the notification hook.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FallAlert {
    pub timestamp: f64,
    /// Sample that triggered the prompt
    pub sample: Option<MergedSample>,
    pub predicted_activity: String,
}

impl FallAlert {
    pub fn new(sample: Option<MergedSample>, predicted_activity: impl Into<String>) -> Self {
        Self {
            timestamp: current_timestamp(),
            sample,
            predicted_activity: predicted_activity.into(),
        }
    }

    /// Magnitude of the triggering acceleration, if known.
    pub fn accel_magnitude(&self) -> Option<f64> {
        self.sample.map(|s| s.accelerometer.magnitude())
    }
}

/// External hook invoked synchronously from the confirm action, once per
/// confirmed fall. Contacting anyone is up to the implementation.
pub trait NotificationHook: Send {
    fn notify(&mut self, alert: &FallAlert);
}

/// Default hook: records the request for help in the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl NotificationHook for LogNotifier {
    fn notify(&mut self, alert: &FallAlert) {
        match alert.accel_magnitude() {
            Some(magnitude) => warn!(
                "[alert] Sending help to your location ({}, |a| = {:.2})",
                alert.predicted_activity, magnitude
            ),
            None => warn!(
                "[alert] Sending help to your location ({})",
                alert.predicted_activity
            ),
        }
        info!("[alert] fall confirmed at {:.3}", alert.timestamp);
    }
}

impl<F> NotificationHook for F
where
    F: FnMut(&FallAlert) + Send,
{
    fn notify(&mut self, alert: &FallAlert) {
        self(alert)
    }
}
