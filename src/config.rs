use std::time::Duration;

use crate::error::EngineError;
use crate::types::SensorKind;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------
pub const DEFAULT_SERVICE_URL: &str = "http://127.0.0.1:5000";
pub const PREDICT_PATH: &str = "/predict";
pub const DEFAULT_RATE_HZ: u32 = 10; // 100 ms interval
pub const MAX_RATE_HZ: u32 = 1000;
pub const DEFAULT_DEBOUNCE_MS: u64 = 2000;
pub const SYNTHETIC_INTERVAL_MS: u64 = 1000; // 1 Hz
pub const SYNTHETIC_RANGE: f64 = 5.0; // +/- units

/// What happens after the user confirms a fall and the hook has been invoked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConfirmPolicy {
    /// Keep sensors off until `start()` is called again
    #[default]
    StaySuspended,
    /// Go straight back to monitoring
    Resume,
}

/// Engine configuration. Built by the caller and injected at construction.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Full inference endpoint, `<service-url>/predict`
    pub predict_url: String,
    pub accel_rate_hz: u32,
    pub gyro_rate_hz: u32,
    /// Trailing-edge debounce window for outbound requests
    pub debounce_window: Duration,
    /// Upper bound on how long a continuous burst can defer its request
    pub debounce_max_wait: Option<Duration>,
    /// Bound on a single inference call. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    /// Unanswered prompts resolve as a deny after this long
    pub prompt_timeout: Option<Duration>,
    pub confirm_policy: ConfirmPolicy,
    /// Cadence of the synthetic generator, independent of the configured rate
    pub synthetic_interval: Duration,
    pub synthetic_range: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            predict_url: predict_url(DEFAULT_SERVICE_URL),
            accel_rate_hz: DEFAULT_RATE_HZ,
            gyro_rate_hz: DEFAULT_RATE_HZ,
            debounce_window: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            debounce_max_wait: None,
            request_timeout: None,
            prompt_timeout: None,
            confirm_policy: ConfirmPolicy::default(),
            synthetic_interval: Duration::from_millis(SYNTHETIC_INTERVAL_MS),
            synthetic_range: SYNTHETIC_RANGE,
        }
    }
}

impl EngineConfig {
    /// Point the engine at `<base>/predict`.
    pub fn with_service_url(mut self, base: &str) -> Self {
        self.predict_url = predict_url(base);
        self
    }

    pub fn rate_hz(&self, kind: SensorKind) -> u32 {
        match kind {
            SensorKind::Accelerometer => self.accel_rate_hz,
            SensorKind::Gyroscope => self.gyro_rate_hz,
        }
    }

    pub fn set_rate_hz(&mut self, kind: SensorKind, rate_hz: u32) {
        match kind {
            SensorKind::Accelerometer => self.accel_rate_hz = rate_hz,
            SensorKind::Gyroscope => self.gyro_rate_hz = rate_hz,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        for kind in SensorKind::ALL {
            let rate_hz = self.rate_hz(kind);
            if !is_valid_rate(rate_hz) {
                return Err(EngineError::InvalidConfig(format!(
                    "{} rate {} Hz is outside 1..={} Hz",
                    kind, rate_hz, MAX_RATE_HZ
                )));
            }
        }
        if self.debounce_window.is_zero() {
            return Err(EngineError::InvalidConfig(
                "debounce window must be non-zero".to_string(),
            ));
        }
        if self.debounce_max_wait.is_some_and(|max_wait| max_wait < self.debounce_window) {
            return Err(EngineError::InvalidConfig(
                "debounce max wait must not be shorter than the window".to_string(),
            ));
        }
        if self.synthetic_interval.is_zero() || self.synthetic_range <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "synthetic generator needs a positive interval and range".to_string(),
            ));
        }

        let rest = self
            .predict_url
            .strip_prefix("http://")
            .or_else(|| self.predict_url.strip_prefix("https://"))
            .ok_or_else(|| {
                EngineError::InvalidConfig(format!(
                    "inference URL must be http(s): {:?}",
                    self.predict_url
                ))
            })?;
        let host = rest.split(['/', ':']).next().unwrap_or_default();
        if host.is_empty() {
            return Err(EngineError::InvalidConfig(
                "inference URL has no host".to_string(),
            ));
        }
        // 0.0.0.0 is a bind address, not something a client can reach
        if host == "0.0.0.0" {
            return Err(EngineError::InvalidConfig(
                "inference URL host 0.0.0.0 is not a reachable address".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn is_valid_rate(rate_hz: u32) -> bool {
    (1..=MAX_RATE_HZ).contains(&rate_hz)
}

/// Rate in Hz to the interval between readings. Never zero.
pub fn rate_to_interval(rate_hz: u32) -> Duration {
    let micros = 1_000_000 / u64::from(rate_hz.max(1));
    Duration::from_micros(micros.max(1))
}

fn predict_url(base: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    if base.ends_with(PREDICT_PATH) {
        base.to_string()
    } else {
        format!("{}{}", base, PREDICT_PATH)
    }
}
