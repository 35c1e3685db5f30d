//! Sensor subscription and fall-alert orchestration.
//!
//! The [`Engine`] owns all mutable state and runs as a single task. Sensor
//! streams, the debounce deadline, in-flight inference calls and collaborator
//! commands are multiplexed in one `select!` loop, so nothing else ever
//! touches the state or the subscription handles.

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::aggregator::SampleAggregator;
use crate::config::{is_valid_rate, EngineConfig, MAX_RATE_HZ};
use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, EngineResult, SubscriptionError, TransportError};
use crate::inference::{InferenceClient, InferenceResult};
use crate::notify::{FallAlert, NotificationHook};
use crate::prober::AvailabilityProber;
use crate::sensors::{SensorAdapter, SensorEvent, Subscription};
use crate::state_machine::{transition, Effect, EngineEvent, EngineState};
use crate::types::{MergedSample, SensorCapabilities, SensorKind, SensorReading};
use crate::view::{EngineView, Notice};

const COMMAND_CAPACITY: usize = 32;
const SENSOR_CAPACITY: usize = 256;
const NOTICE_CAPACITY: usize = 64;

/// Sample sent by [`EngineHandle::simulate_fall`]: a hard acceleration
/// spike with little rotation.
pub fn simulated_fall_sample() -> MergedSample {
    MergedSample::new(
        SensorReading::new(-5.365798, 0.076309, 6.320082),
        SensorReading::new(0.012291, 2.365048, -0.219213),
    )
}

enum Command {
    Start(oneshot::Sender<EngineState>),
    Stop(oneshot::Sender<EngineState>),
    Toggle(SensorKind, oneshot::Sender<bool>),
    SetRate(SensorKind, u32),
    Confirm(oneshot::Sender<EngineState>),
    Deny(oneshot::Sender<EngineState>),
    SimulateFall(oneshot::Sender<bool>),
    Shutdown,
}

type InFlight = BoxFuture<'static, (u64, MergedSample, Result<InferenceResult, TransportError>)>;

/// Collaborator-facing handle. Cheap to clone; all calls go through the
/// engine task.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<EngineView>,
    notices: broadcast::Sender<Notice>,
}

impl EngineHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> EngineResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    /// Probe (first call only) and begin monitoring the available sensors.
    pub async fn start(&self) -> EngineResult<EngineState> {
        self.request(Command::Start).await
    }

    pub async fn stop(&self) -> EngineResult<EngineState> {
        self.request(Command::Stop).await
    }

    /// Flip one sensor while monitoring. Returns whether it is now subscribed.
    pub async fn toggle(&self, kind: SensorKind) -> EngineResult<bool> {
        self.request(|tx| Command::Toggle(kind, tx)).await
    }

    pub async fn set_rate(&self, kind: SensorKind, rate_hz: u32) -> EngineResult<()> {
        self.commands
            .send(Command::SetRate(kind, rate_hz))
            .await
            .map_err(|_| EngineError::Stopped)
    }

    /// Answer "yes" to the fall prompt.
    pub async fn confirm_fall(&self) -> EngineResult<EngineState> {
        self.request(Command::Confirm).await
    }

    /// Answer "no" to the fall prompt.
    pub async fn deny_fall(&self) -> EngineResult<EngineState> {
        self.request(Command::Deny).await
    }

    /// Classify [`simulated_fall_sample`] right away, skipping the debounce.
    /// Returns false when the engine is not monitoring.
    pub async fn simulate_fall(&self) -> EngineResult<bool> {
        self.request(Command::SimulateFall).await
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    pub fn view(&self) -> EngineView {
        self.view.borrow().clone()
    }

    pub fn state(&self) -> EngineState {
        self.view.borrow().state
    }

    pub fn watch(&self) -> watch::Receiver<EngineView> {
        self.view.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }
}

pub struct Engine {
    config: EngineConfig,
    adapter: SensorAdapter,
    prober: AvailabilityProber,
    aggregator: SampleAggregator,
    dispatcher: Dispatcher,
    classifier: Arc<dyn InferenceClient>,
    notifier: Box<dyn NotificationHook>,

    state: EngineState,
    capabilities: SensorCapabilities,
    accel_sub: Option<Subscription>,
    gyro_sub: Option<Subscription>,
    /// Bumped whenever the engine leaves `Monitoring`; responses tagged with
    /// an older epoch are discarded.
    epoch: u64,
    in_flight: FuturesUnordered<InFlight>,
    prompt_deadline: Option<Instant>,
    pending_fall: Option<(MergedSample, String)>,
    mock_notice_sent: bool,

    commands: mpsc::Receiver<Command>,
    sensor_tx: mpsc::Sender<SensorEvent>,
    sensor_rx: mpsc::Receiver<SensorEvent>,
    view: EngineView,
    view_tx: watch::Sender<EngineView>,
    notice_tx: broadcast::Sender<Notice>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        adapter: SensorAdapter,
        classifier: Arc<dyn InferenceClient>,
        notifier: Box<dyn NotificationHook>,
    ) -> EngineResult<(Engine, EngineHandle)> {
        config.validate()?;

        let (command_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (sensor_tx, sensor_rx) = mpsc::channel(SENSOR_CAPACITY);
        let (notice_tx, _) = broadcast::channel(NOTICE_CAPACITY);
        let view = EngineView::new();
        let (view_tx, view_rx) = watch::channel(view.clone());

        let dispatcher =
            Dispatcher::new(config.debounce_window).with_max_wait(config.debounce_max_wait);

        let handle = EngineHandle {
            commands: command_tx,
            view: view_rx,
            notices: notice_tx.clone(),
        };

        let engine = Engine {
            config,
            adapter,
            prober: AvailabilityProber::new(),
            aggregator: SampleAggregator::new(),
            dispatcher,
            classifier,
            notifier,
            state: EngineState::Idle,
            capabilities: SensorCapabilities::default(),
            accel_sub: None,
            gyro_sub: None,
            epoch: 0,
            in_flight: FuturesUnordered::new(),
            prompt_deadline: None,
            pending_fall: None,
            mock_notice_sent: false,
            commands,
            sensor_tx,
            sensor_rx,
            view,
            view_tx,
            notice_tx,
        };
        Ok((engine, handle))
    }

    /// Build the engine and run it on its own task.
    pub fn spawn(
        config: EngineConfig,
        adapter: SensorAdapter,
        classifier: Arc<dyn InferenceClient>,
        notifier: Box<dyn NotificationHook>,
    ) -> EngineResult<(EngineHandle, JoinHandle<()>)> {
        let (engine, handle) = Engine::new(config, adapter, classifier, notifier)?;
        let task = tokio::spawn(engine.run());
        Ok((handle, task))
    }

    pub async fn run(mut self) {
        debug!("[engine] event loop started");

        loop {
            let debounce_deadline = self.dispatcher.deadline();
            let prompt_deadline = self.prompt_deadline;

            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = self.sensor_rx.recv() => self.handle_sensor_event(event),
                Some((epoch, sample, result)) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    self.handle_inference(epoch, sample, result);
                }
                _ = sleep_until(debounce_deadline.unwrap_or_else(Instant::now)), if debounce_deadline.is_some() => {
                    self.fire_debounce();
                }
                _ = sleep_until(prompt_deadline.unwrap_or_else(Instant::now)), if prompt_deadline.is_some() => {
                    info!("[engine] fall prompt timed out");
                    self.apply(EngineEvent::PromptTimeout);
                }
            }
        }

        self.unsubscribe_all();
        self.dispatcher.disarm();
        self.in_flight = FuturesUnordered::new();
        debug!("[engine] event loop stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                let state = self.start().await;
                let _ = reply.send(state);
            }
            Command::Stop(reply) => {
                let _ = reply.send(self.apply(EngineEvent::Stop));
            }
            Command::Toggle(kind, reply) => {
                let _ = reply.send(self.toggle(kind));
            }
            Command::SetRate(kind, rate_hz) => self.set_rate(kind, rate_hz),
            Command::Confirm(reply) => {
                let _ = reply.send(self.apply(EngineEvent::Confirm));
            }
            Command::Deny(reply) => {
                let _ = reply.send(self.apply(EngineEvent::Deny));
            }
            Command::SimulateFall(reply) => {
                let accepted = if self.state == EngineState::Monitoring {
                    info!("[engine] simulating fall");
                    self.dispatch(simulated_fall_sample());
                    true
                } else {
                    debug!("[engine] simulate fall ignored in {}", self.state);
                    false
                };
                let _ = reply.send(accepted);
            }
            Command::Shutdown => {}
        }
    }

    async fn start(&mut self) -> EngineState {
        let first_probe = self.prober.cached().is_none();
        let report = self.prober.probe(&self.adapter).await;

        if first_probe {
            if let Some(error) = &report.error {
                self.notice(Notice::ProbeFailed(error.to_string()));
            }
            if self.adapter.uses_synthetic() && !self.mock_notice_sent {
                warn!("[engine] sensors are not supported on this platform, using mock data");
                self.notice(Notice::MockData);
                self.mock_notice_sent = true;
            }
        }

        self.capabilities = report.capabilities;
        self.view.accelerometer_available = report.capabilities.accelerometer;
        self.view.gyroscope_available = report.capabilities.gyroscope;
        self.apply(EngineEvent::Start(report.capabilities))
    }

    /// Run one state machine step and execute its effects in order.
    fn apply(&mut self, event: EngineEvent) -> EngineState {
        let from = self.state;
        let step = transition(from, event, self.config.confirm_policy);
        if step.is_noop(from) {
            debug!("[engine] {:?} ignored in {}", event, from);
            return from;
        }

        self.state = step.next;
        for effect in step.effects {
            self.run_effect(effect);
        }
        if from != self.state {
            info!("[engine] {} -> {} on {:?}", from, self.state, event);
        }
        self.publish();
        self.state
    }

    fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::SubscribeAvailable => {
                let kinds: Vec<SensorKind> = self.capabilities.available_kinds().collect();
                for kind in kinds {
                    if let Err(error) = self.subscribe(kind) {
                        warn!("[engine] {}", error);
                    }
                }
            }
            Effect::UnsubscribeAll => self.unsubscribe_all(),
            Effect::ArmDispatcher => self.dispatcher.arm(),
            Effect::DisarmDispatcher => self.dispatcher.disarm(),
            Effect::DropInFlight => {
                self.epoch += 1;
                if !self.in_flight.is_empty() {
                    debug!("[engine] dropping {} in-flight request(s)", self.in_flight.len());
                }
                self.in_flight = FuturesUnordered::new();
            }
            Effect::RaisePrompt => {
                self.prompt_deadline = self.config.prompt_timeout.map(|t| Instant::now() + t);
                let predicted_activity = self
                    .pending_fall
                    .as_ref()
                    .map(|(_, label)| label.clone())
                    .unwrap_or_default();
                warn!("[engine] fall detected, awaiting confirmation");
                self.notice(Notice::FallPrompt { predicted_activity });
            }
            Effect::ClosePrompt => self.prompt_deadline = None,
            Effect::SendAlert => {
                let (sample, label) = match self.pending_fall.take() {
                    Some((sample, label)) => (Some(sample), label),
                    None => (None, String::new()),
                };
                self.notifier.notify(&FallAlert::new(sample, label));
                self.view.alerts_sent += 1;
                self.notice(Notice::HelpRequested);
            }
            Effect::NoticeUnavailable => {
                warn!("[engine] no motion sensor available, staying idle");
                self.notice(Notice::Unavailable);
            }
        }
    }

    fn slot(&mut self, kind: SensorKind) -> &mut Option<Subscription> {
        match kind {
            SensorKind::Accelerometer => &mut self.accel_sub,
            SensorKind::Gyroscope => &mut self.gyro_sub,
        }
    }

    fn subscribe(&mut self, kind: SensorKind) -> Result<(), SubscriptionError> {
        if !self.capabilities.is_available(kind) {
            return Err(SubscriptionError::Unavailable(kind));
        }
        if self.slot(kind).is_some() {
            return Err(SubscriptionError::AlreadySubscribed(kind));
        }
        let rate_hz = self.config.rate_hz(kind);
        let subscription = self.adapter.subscribe_at(kind, rate_hz, self.sensor_tx.clone());
        *self.slot(kind) = Some(subscription);
        Ok(())
    }

    fn unsubscribe(&mut self, kind: SensorKind) {
        if let Some(mut subscription) = self.slot(kind).take() {
            self.adapter.unsubscribe(&mut subscription);
        }
    }

    fn unsubscribe_all(&mut self) {
        for kind in SensorKind::ALL {
            self.unsubscribe(kind);
        }
        // Anything still queued belongs to a handle that no longer exists
        while self.sensor_rx.try_recv().is_ok() {}
    }

    fn is_live(&self, event: &SensorEvent) -> bool {
        let slot = match event {
            SensorEvent::Reading { kind, .. } | SensorEvent::Failed { kind, .. } => match kind {
                SensorKind::Accelerometer => &self.accel_sub,
                SensorKind::Gyroscope => &self.gyro_sub,
            },
        };
        slot.as_ref().map(|s| s.id()) == Some(event.subscription())
    }

    fn handle_sensor_event(&mut self, event: SensorEvent) {
        if !self.is_live(&event) {
            debug!("[engine] dropping event from stale {}", event.subscription());
            return;
        }

        match event {
            SensorEvent::Reading { kind, reading, .. } => {
                let sample = self.aggregator.update(kind, reading);
                match kind {
                    SensorKind::Accelerometer => self.view.accelerometer_data = reading,
                    SensorKind::Gyroscope => self.view.gyroscope_data = reading,
                }
                self.view.samples_merged = self.aggregator.merged_count();
                self.dispatcher.submit(sample);
                self.view.samples_coalesced = self.dispatcher.coalesced();
            }
            SensorEvent::Failed { kind, error, .. } => {
                warn!("[engine] {} stream stopped: {}", kind, error);
                self.unsubscribe(kind);
                self.notice(Notice::StreamFailed {
                    kind,
                    reason: error.to_string(),
                });
            }
        }
        self.publish();
    }

    fn toggle(&mut self, kind: SensorKind) -> bool {
        if self.state != EngineState::Monitoring {
            debug!("[engine] toggle {} ignored in {}", kind, self.state);
            return false;
        }
        if !self.capabilities.is_available(kind) {
            self.notice(Notice::SensorUnavailable(kind));
            return false;
        }

        let subscribed = if self.slot(kind).is_some() {
            self.unsubscribe(kind);
            false
        } else {
            match self.subscribe(kind) {
                Ok(()) => true,
                Err(error) => {
                    warn!("[engine] {}", error);
                    false
                }
            }
        };
        self.publish();
        subscribed
    }

    fn set_rate(&mut self, kind: SensorKind, rate_hz: u32) {
        if !is_valid_rate(rate_hz) {
            warn!(
                "[engine] ignoring {} Hz for {}, allowed 1..={} Hz",
                rate_hz, kind, MAX_RATE_HZ
            );
            return;
        }
        self.config.set_rate_hz(kind, rate_hz);

        // Restart a live stream so the new rate applies now
        if self.slot(kind).is_some() {
            self.unsubscribe(kind);
            if let Err(error) = self.subscribe(kind) {
                warn!("[engine] {}", error);
            }
            self.publish();
        }
    }

    fn fire_debounce(&mut self) {
        if let Some(sample) = self.dispatcher.take_due(Instant::now()) {
            self.dispatch(sample);
        }
    }

    fn dispatch(&mut self, sample: MergedSample) {
        if self.state != EngineState::Monitoring {
            debug!("[dispatch] not monitoring, sample dropped");
            return;
        }
        let epoch = self.epoch;
        let request = self.classifier.classify(&sample);
        self.in_flight
            .push(Box::pin(async move { (epoch, sample, request.await) }));
        self.view.requests_sent += 1;
        debug!("[dispatch] request #{} sent", self.view.requests_sent);
        self.publish();
    }

    fn handle_inference(
        &mut self,
        epoch: u64,
        sample: MergedSample,
        result: Result<InferenceResult, TransportError>,
    ) {
        if epoch != self.epoch || self.state != EngineState::Monitoring {
            debug!("[inference] discarding response from a superseded state");
            return;
        }

        match result {
            Ok(result) => {
                self.view.last_activity = Some(result.predicted_activity.clone());
                if result.fall_detected {
                    self.pending_fall = Some((sample, result.predicted_activity));
                    self.apply(EngineEvent::FallDetected);
                    return;
                }
                info!("Predicted activity: {}", result.activity());
                self.notice(Notice::Prediction(result.predicted_activity));
            }
            Err(error) => {
                warn!("[inference] Error sending sensor data: {}", error);
                self.view.transport_failures += 1;
                self.notice(Notice::TransportFailed(error.to_string()));
            }
        }
        self.publish();
    }

    fn notice(&self, notice: Notice) {
        // No subscribers is fine
        let _ = self.notice_tx.send(notice);
    }

    fn publish(&mut self) {
        self.view.timestamp = crate::types::current_timestamp();
        self.view.state = self.state;
        self.view.accelerometer_subscribed = self.accel_sub.is_some();
        self.view.gyroscope_subscribed = self.gyro_sub.is_some();
        self.view_tx.send_replace(self.view.clone());
    }
}
