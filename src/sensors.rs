use futures::future::BoxFuture;
use log::{debug, warn};
use rand::Rng;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::config::{rate_to_interval, EngineConfig};
use crate::error::{ProbeError, SubscriptionError};
use crate::types::{SensorCapabilities, SensorKind, SensorReading};

/// A source of readings for one sensor.
///
/// Implementations are polled at the subscription's cadence; returning an
/// error ends that sensor's stream without touching the other one.
pub trait SensorDriver: Send + Sync {
    fn kind(&self) -> SensorKind;

    fn is_available(&self) -> BoxFuture<'_, Result<bool, ProbeError>>;

    fn read(&self) -> BoxFuture<'_, Result<SensorReading, SubscriptionError>>;

    /// Cadence that overrides the requested rate.
    fn fixed_interval(&self) -> Option<Duration> {
        None
    }

    fn is_synthetic(&self) -> bool {
        false
    }
}

/// Identifies which registration a reading came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Messages produced by a live stream.
#[derive(Clone, Debug, PartialEq)]
pub enum SensorEvent {
    Reading {
        subscription: SubscriptionId,
        kind: SensorKind,
        reading: SensorReading,
    },
    Failed {
        subscription: SubscriptionId,
        kind: SensorKind,
        error: SubscriptionError,
    },
}

impl SensorEvent {
    pub fn subscription(&self) -> SubscriptionId {
        match self {
            SensorEvent::Reading { subscription, .. } | SensorEvent::Failed { subscription, .. } => {
                *subscription
            }
        }
    }
}

/// Owned handle to a running sensor stream. Dropping it stops the stream.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    kind: SensorKind,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the stream. Returns false if it was already stopped.
    fn cancel(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Uniform subscribe/unsubscribe/set-rate access to both motion sensors.
pub struct SensorAdapter {
    accelerometer: Arc<dyn SensorDriver>,
    gyroscope: Arc<dyn SensorDriver>,
    accel_interval: Duration,
    gyro_interval: Duration,
    next_id: u64,
}

impl SensorAdapter {
    pub fn new(
        accelerometer: Arc<dyn SensorDriver>,
        gyroscope: Arc<dyn SensorDriver>,
        config: &EngineConfig,
    ) -> Self {
        SensorAdapter {
            accelerometer,
            gyroscope,
            accel_interval: rate_to_interval(config.accel_rate_hz),
            gyro_interval: rate_to_interval(config.gyro_rate_hz),
            next_id: 1,
        }
    }

    /// Physical sensors read through Termux:API.
    pub fn termux(config: &EngineConfig) -> Self {
        Self::new(
            Arc::new(TermuxSensor::new(SensorKind::Accelerometer)),
            Arc::new(TermuxSensor::new(SensorKind::Gyroscope)),
            config,
        )
    }

    /// Pseudo-random generators for platforms without motion sensors.
    pub fn synthetic(config: &EngineConfig) -> Self {
        Self::new(
            Arc::new(SyntheticSensor::from_config(SensorKind::Accelerometer, config)),
            Arc::new(SyntheticSensor::from_config(SensorKind::Gyroscope, config)),
            config,
        )
    }

    /// Termux sensors when running under Termux, synthetic generators elsewhere.
    pub fn for_platform(config: &EngineConfig) -> Self {
        if std::env::var_os("TERMUX_VERSION").is_some() {
            Self::termux(config)
        } else {
            Self::synthetic(config)
        }
    }

    pub fn driver(&self, kind: SensorKind) -> &Arc<dyn SensorDriver> {
        match kind {
            SensorKind::Accelerometer => &self.accelerometer,
            SensorKind::Gyroscope => &self.gyroscope,
        }
    }

    pub fn uses_synthetic(&self) -> bool {
        self.accelerometer.is_synthetic() || self.gyroscope.is_synthetic()
    }

    /// Raw availability check of both sensors. The first failure aborts the probe.
    pub async fn probe(&self) -> Result<SensorCapabilities, ProbeError> {
        let accelerometer = self.accelerometer.is_available().await?;
        let gyroscope = self.gyroscope.is_available().await?;
        Ok(SensorCapabilities::new(accelerometer, gyroscope))
    }

    pub fn set_rate(&mut self, kind: SensorKind, rate_hz: u32) {
        let period = rate_to_interval(rate_hz);
        match kind {
            SensorKind::Accelerometer => self.accel_interval = period,
            SensorKind::Gyroscope => self.gyro_interval = period,
        }
    }

    /// Effective interval between readings for `kind`.
    pub fn interval(&self, kind: SensorKind) -> Duration {
        let driver = self.driver(kind);
        driver.fixed_interval().unwrap_or(match kind {
            SensorKind::Accelerometer => self.accel_interval,
            SensorKind::Gyroscope => self.gyro_interval,
        })
    }

    /// Start streaming `kind` at the configured rate into `tx`.
    pub fn subscribe(&mut self, kind: SensorKind, tx: Sender<SensorEvent>) -> Subscription {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;

        let period = self.interval(kind);
        let driver = Arc::clone(self.driver(kind));
        debug!("[{}] subscribing {} every {:?}", kind, id, period);

        let task = tokio::spawn(stream_loop(driver, id, period, tx));
        Subscription {
            id,
            kind,
            task: Some(task),
        }
    }

    /// Start streaming `kind` at `rate_hz`, remembering the rate for later subscriptions.
    pub fn subscribe_at(
        &mut self,
        kind: SensorKind,
        rate_hz: u32,
        tx: Sender<SensorEvent>,
    ) -> Subscription {
        self.set_rate(kind, rate_hz);
        self.subscribe(kind, tx)
    }

    /// Stop a stream. Safe on a handle that is already stopped.
    pub fn unsubscribe(&self, subscription: &mut Subscription) {
        if subscription.cancel() {
            debug!("[{}] unsubscribed {}", subscription.kind, subscription.id);
        }
    }
}

async fn stream_loop(
    driver: Arc<dyn SensorDriver>,
    id: SubscriptionId,
    period: Duration,
    tx: Sender<SensorEvent>,
) {
    let kind = driver.kind();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sample_count = 0u64;

    loop {
        ticker.tick().await;

        let reading = match driver.read().await {
            Ok(reading) => reading,
            Err(error) => {
                warn!("[{}] stream {} failed: {}", kind, id, error);
                let _ = tx
                    .send(SensorEvent::Failed {
                        subscription: id,
                        kind,
                        error,
                    })
                    .await;
                break;
            }
        };

        let event = SensorEvent::Reading {
            subscription: id,
            kind,
            reading,
        };
        match tx.try_send(event) {
            Ok(_) => {
                sample_count += 1;
                if sample_count % 100 == 0 {
                    debug!("[{}] {} samples on {}", kind, sample_count, id);
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!("[{}] channel closed after {} samples", kind, sample_count);
                break;
            }
            Err(TrySendError::Full(_)) => {
                // Consumer is behind, drop this sample
            }
        }
    }
}

/// Reads a physical sensor through the `termux-sensor` command.
pub struct TermuxSensor {
    kind: SensorKind,
}

impl TermuxSensor {
    pub fn new(kind: SensorKind) -> Self {
        Self { kind }
    }
}

impl SensorDriver for TermuxSensor {
    fn kind(&self) -> SensorKind {
        self.kind
    }

    fn is_available(&self) -> BoxFuture<'_, Result<bool, ProbeError>> {
        Box::pin(async move {
            let output = Command::new("termux-sensor")
                .arg("-l")
                .output()
                .await
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::NotFound => {
                        ProbeError::Unsupported("termux-sensor is not installed".to_string())
                    }
                    _ => ProbeError::Command(format!("termux-sensor -l: {}", e)),
                })?;
            if !output.status.success() {
                return Err(ProbeError::Command(format!(
                    "termux-sensor -l exited with {}",
                    output.status
                )));
            }
            let listing = String::from_utf8_lossy(&output.stdout).to_lowercase();
            Ok(listing.contains(self.kind.termux_name()))
        })
    }

    fn read(&self) -> BoxFuture<'_, Result<SensorReading, SubscriptionError>> {
        Box::pin(async move {
            let output = Command::new("termux-sensor")
                .arg("-s")
                .arg(self.kind.termux_name())
                .arg("-n")
                .arg("1")
                .output()
                .await
                .map_err(|e| SubscriptionError::Read {
                    kind: self.kind,
                    reason: e.to_string(),
                })?;
            let text = String::from_utf8_lossy(&output.stdout);
            parse_termux_output(&text).ok_or_else(|| SubscriptionError::Read {
                kind: self.kind,
                reason: format!("unparseable output: {:?}", text.trim()),
            })
        })
    }
}

/// Parse one `termux-sensor` event.
///
/// Accepts the JSON form (`{"<name>": {"values": [x, y, z]}}`) and the
/// plain `x=.., y=.., z=..` form.
pub fn parse_termux_output(output: &str) -> Option<SensorReading> {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(output) {
        let values = json
            .as_object()?
            .values()
            .find_map(|sensor| sensor.get("values"))?
            .as_array()?;
        if values.len() < 3 {
            return None;
        }
        return Some(SensorReading::new(
            values[0].as_f64()?,
            values[1].as_f64()?,
            values[2].as_f64()?,
        ));
    }

    let mut axes = [None; 3];
    for part in output.split(',') {
        let part = part.trim();
        for (slot, prefix) in axes.iter_mut().zip(["x=", "y=", "z="]) {
            if let Some(val_str) = part.rsplit(' ').next().and_then(|p| p.strip_prefix(prefix)) {
                *slot = Some(val_str.trim().parse::<f64>().ok()?);
            }
        }
    }
    Some(SensorReading::new(axes[0]?, axes[1]?, axes[2]?))
}

/// Bounded pseudo-random stream at a fixed cadence.
pub struct SyntheticSensor {
    kind: SensorKind,
    interval: Duration,
    range: f64,
}

impl SyntheticSensor {
    pub fn new(kind: SensorKind, interval: Duration, range: f64) -> Self {
        Self {
            kind,
            interval,
            range,
        }
    }

    pub fn from_config(kind: SensorKind, config: &EngineConfig) -> Self {
        Self::new(kind, config.synthetic_interval, config.synthetic_range)
    }

    fn sample(&self) -> SensorReading {
        let mut rng = rand::rng();
        let mut axis = || round2(rng.random_range(-self.range..self.range));
        SensorReading::new(axis(), axis(), axis())
    }
}

impl SensorDriver for SyntheticSensor {
    fn kind(&self) -> SensorKind {
        self.kind
    }

    fn is_available(&self) -> BoxFuture<'_, Result<bool, ProbeError>> {
        Box::pin(async { Ok(true) })
    }

    fn read(&self) -> BoxFuture<'_, Result<SensorReading, SubscriptionError>> {
        let reading = self.sample();
        Box::pin(async move { Ok(reading) })
    }

    fn fixed_interval(&self) -> Option<Duration> {
        Some(self.interval)
    }

    fn is_synthetic(&self) -> bool {
        true
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_parse_termux_json() {
        let text = r#"{"LSM6DSO Accelerometer": {"values": [0.5, -0.25, 9.81]}}"#;
        let reading = parse_termux_output(text).unwrap();
        assert_eq!(reading, SensorReading::new(0.5, -0.25, 9.81));
    }

    #[test]
    fn test_parse_termux_key_value() {
        let text = "Accelerometer event: x=0.5, y=0.3, z=9.8, accuracy=0";
        let reading = parse_termux_output(text).unwrap();
        assert_eq!(reading, SensorReading::new(0.5, 0.3, 9.8));

        assert!(parse_termux_output("").is_none());
        assert!(parse_termux_output("x=1.0, y=2.0").is_none());
    }

    #[test]
    fn test_synthetic_values_bounded() {
        let sensor = SyntheticSensor::new(SensorKind::Gyroscope, Duration::from_secs(1), 5.0);
        for _ in 0..200 {
            let reading = sensor.sample();
            for value in [reading.x, reading.y, reading.z] {
                assert!((-5.0..=5.0).contains(&value), "{} out of range", value);
                assert_eq!(value, round2(value));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthetic_stream_uses_fixed_cadence() {
        let config = EngineConfig::default();
        let mut adapter = SensorAdapter::synthetic(&config);
        assert!(adapter.uses_synthetic());
        assert_eq!(
            adapter.interval(SensorKind::Accelerometer),
            Duration::from_secs(1)
        );

        let (tx, mut rx) = mpsc::channel(16);
        let mut sub = adapter.subscribe(SensorKind::Accelerometer, tx);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.subscription(), sub.id());

        let before = tokio::time::Instant::now();
        rx.recv().await.unwrap();
        assert_eq!(before.elapsed(), Duration::from_secs(1));

        adapter.unsubscribe(&mut sub);
        assert!(!sub.is_active());
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let config = EngineConfig::default();
        let mut adapter = SensorAdapter::synthetic(&config);
        let (tx, _rx) = mpsc::channel(16);
        let mut sub = adapter.subscribe(SensorKind::Gyroscope, tx);

        adapter.unsubscribe(&mut sub);
        adapter.unsubscribe(&mut sub);
        assert!(!sub.is_active());
    }

    #[tokio::test]
    async fn test_synthetic_probe_reports_available() {
        let adapter = SensorAdapter::synthetic(&EngineConfig::default());
        let caps = adapter.probe().await.unwrap();
        assert!(caps.accelerometer && caps.gyroscope);
    }

    #[test]
    fn test_set_rate_changes_interval() {
        let mut adapter = SensorAdapter::termux(&EngineConfig::default());
        assert_eq!(
            adapter.interval(SensorKind::Gyroscope),
            Duration::from_millis(100)
        );
        adapter.set_rate(SensorKind::Gyroscope, 50);
        assert_eq!(
            adapter.interval(SensorKind::Gyroscope),
            Duration::from_millis(20)
        );
        assert_eq!(
            adapter.interval(SensorKind::Accelerometer),
            Duration::from_millis(100)
        );
    }
}
