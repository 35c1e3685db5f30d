//! Fall monitoring engine.
//!
//! Streams accelerometer and gyroscope readings, pairs them into merged
//! samples, debounces them into requests against a remote `/predict`
//! service and runs the fall-confirmation state machine on the answers.

pub mod aggregator;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod inference;
pub mod notify;
pub mod prober;
pub mod sensors;
pub mod state_machine;
pub mod types;
pub mod view;

pub use config::{ConfirmPolicy, EngineConfig};
pub use engine::{simulated_fall_sample, Engine, EngineHandle};
pub use error::{EngineError, ProbeError, SubscriptionError, TransportError};
pub use inference::{Activity, HttpInferenceClient, InferenceClient, InferenceResult};
pub use notify::{FallAlert, LogNotifier, NotificationHook};
pub use sensors::{SensorAdapter, SensorDriver, SensorEvent, Subscription};
pub use state_machine::EngineState;
pub use types::{MergedSample, SensorCapabilities, SensorKind, SensorReading};
pub use view::{EngineView, Notice};
