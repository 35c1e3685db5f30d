use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{info, warn};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use fall_monitor_rs::{
    ConfirmPolicy, Engine, EngineConfig, EngineHandle, EngineState, HttpInferenceClient,
    LogNotifier, Notice, SensorAdapter, SensorKind,
};

#[derive(Parser, Debug)]
#[command(name = "fall_monitor")]
#[command(about = "Motion sensor fall monitor with remote activity inference", long_about = None)]
struct Args {
    /// Duration in seconds (0 = continuous)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// Base URL of the inference service (the engine posts to <url>/predict)
    #[arg(long, default_value = fall_monitor_rs::config::DEFAULT_SERVICE_URL)]
    service_url: String,

    /// Sampling rate for both sensors (1-1000 Hz)
    #[arg(long, default_value = "10")]
    rate_hz: u32,

    /// Debounce window for inference requests
    #[arg(long, default_value = "2000")]
    debounce_ms: u64,

    /// Fire at least this often during a continuous burst
    #[arg(long)]
    max_wait_ms: Option<u64>,

    /// Timeout for a single inference request
    #[arg(long)]
    request_timeout_ms: Option<u64>,

    /// Treat an unanswered fall prompt as "no" after this long
    #[arg(long)]
    prompt_timeout_ms: Option<u64>,

    /// Keep monitoring after a confirmed fall instead of staying suspended
    #[arg(long)]
    resume_after_confirm: bool,

    /// Use synthetic sensors even when running under Termux
    #[arg(long)]
    synthetic: bool,

    /// Seconds between status lines
    #[arg(long, default_value = "2")]
    status_secs: u64,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default().with_service_url(&self.service_url);
        config.accel_rate_hz = self.rate_hz;
        config.gyro_rate_hz = self.rate_hz;
        config.debounce_window = Duration::from_millis(self.debounce_ms);
        config.debounce_max_wait = self.max_wait_ms.map(Duration::from_millis);
        config.request_timeout = self.request_timeout_ms.map(Duration::from_millis);
        config.prompt_timeout = self.prompt_timeout_ms.map(Duration::from_millis);
        config.confirm_policy = if self.resume_after_confirm {
            ConfirmPolicy::Resume
        } else {
            ConfirmPolicy::StaySuspended
        };
        config
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = args.engine_config();

    info!("[{}] Fall Monitor Starting", ts_now());
    info!("  Duration: {} seconds (0=continuous)", args.duration);
    info!("  Inference: {}", config.predict_url);
    info!("  Rate: {} Hz, debounce {} ms", args.rate_hz, args.debounce_ms);
    info!("  Confirm policy: {:?}", config.confirm_policy);

    let adapter = if args.synthetic {
        SensorAdapter::synthetic(&config)
    } else {
        SensorAdapter::for_platform(&config)
    };
    let (handle, engine_task, notices) = launch(config, adapter)?;
    tokio::spawn(log_notices(notices));

    let state = handle.start().await?;
    if state == EngineState::Idle {
        warn!("No sensor available, nothing to monitor");
        handle.shutdown().await;
        engine_task.await?;
        return Ok(());
    }
    info!("Commands: y = I fell, n = I'm fine, s = simulate fall, a/g = toggle sensor, q = quit");

    let start = Instant::now();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut status_tick = tokio::time::interval(Duration::from_secs(args.status_secs.max(1)));
    let deadline = (args.duration > 0).then(|| start + Duration::from_secs(args.duration));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("[{}] Interrupted, stopping...", ts_now());
                break;
            }
            _ = sleep_until_deadline(deadline) => {
                info!("[{}] Duration reached, stopping...", ts_now());
                break;
            }
            _ = status_tick.tick() => log_status(&handle),
            line = stdin.next_line() => match line? {
                Some(line) => {
                    if !handle_input(&handle, line.trim()).await? {
                        break;
                    }
                }
                None => {
                    info!("[{}] Input closed, stopping...", ts_now());
                    break;
                }
            },
        }
    }

    handle.stop().await?;
    let view = handle.view();
    handle.shutdown().await;
    engine_task.await?;

    info!("=== Final Stats ===");
    info!("Samples merged: {}", view.samples_merged);
    info!("Samples coalesced: {}", view.samples_coalesced);
    info!("Requests sent: {}", view.requests_sent);
    info!("Transport failures: {}", view.transport_failures);
    info!("Alerts sent: {}", view.alerts_sent);
    Ok(())
}

/// Spawn the engine with the HTTP classifier. The notice receiver is taken
/// before anything runs so startup notices are not lost.
fn launch(
    config: EngineConfig,
    adapter: SensorAdapter,
) -> Result<(EngineHandle, JoinHandle<()>, broadcast::Receiver<Notice>)> {
    let classifier = Arc::new(HttpInferenceClient::from_config(&config));
    let (handle, engine_task) = Engine::spawn(config, adapter, classifier, Box::new(LogNotifier))
        .context("invalid engine configuration")?;
    let notices = handle.notices();
    Ok((handle, engine_task, notices))
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Returns false when the user asked to quit.
async fn handle_input(handle: &EngineHandle, input: &str) -> Result<bool> {
    match input.to_lowercase().as_str() {
        "y" | "yes" => {
            let state = handle.confirm_fall().await?;
            info!("Answer: yes ({})", state);
        }
        "n" | "no" => {
            let state = handle.deny_fall().await?;
            info!("Answer: no ({})", state);
        }
        "s" | "simulate" => {
            if !handle.simulate_fall().await? {
                warn!("Simulation needs the engine to be monitoring");
            }
        }
        "a" => {
            let on = handle.toggle(SensorKind::Accelerometer).await?;
            info!("Accelerometer {}", if on { "started" } else { "stopped" });
        }
        "g" => {
            let on = handle.toggle(SensorKind::Gyroscope).await?;
            info!("Gyroscope {}", if on { "started" } else { "stopped" });
        }
        "r" | "start" => {
            let state = handle.start().await?;
            info!("Engine {}", state);
        }
        "q" | "quit" => return Ok(false),
        "" => {}
        other => warn!("Unknown command: {:?}", other),
    }
    Ok(true)
}

async fn log_notices(mut notices: broadcast::Receiver<Notice>) {
    loop {
        match notices.recv().await {
            Ok(notice) => {
                let (title, message) = notice.message();
                match notice {
                    Notice::FallPrompt { .. } => {
                        warn!("[{}] {}: {} [y/n]", ts_now(), title, message)
                    }
                    Notice::Prediction(_) => {}
                    _ => info!("[{}] {}: {}", ts_now(), title, message),
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!("Skipped {} notices", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

fn log_status(handle: &EngineHandle) {
    let view = handle.view();
    info!(
        "[{}] {} | accel ({:.2}, {:.2}, {:.2}){} | gyro ({:.2}, {:.2}, {:.2}){} | requests {} | last {}",
        ts_now(),
        view.state,
        view.accelerometer_data.x,
        view.accelerometer_data.y,
        view.accelerometer_data.z,
        if view.accelerometer_subscribed { "" } else { " off" },
        view.gyroscope_data.x,
        view.gyroscope_data.y,
        view.gyroscope_data.z,
        if view.gyroscope_subscribed { "" } else { " off" },
        view.requests_sent,
        view.last_activity.as_deref().unwrap_or("-"),
    );
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_launch_receiver_sees_startup_notices() {
        let config = EngineConfig::default();
        let adapter = SensorAdapter::synthetic(&config);
        let (handle, engine_task, mut notices) = launch(config, adapter).unwrap();

        assert_eq!(handle.start().await.unwrap(), EngineState::Monitoring);
        assert_eq!(notices.try_recv().unwrap(), Notice::MockData);

        handle.shutdown().await;
        engine_task.await.unwrap();
    }

    #[test]
    fn test_args_map_onto_config() {
        let args = Args::parse_from([
            "fall_monitor",
            "--service-url",
            "http://10.0.2.2:5000",
            "--rate-hz",
            "50",
            "--max-wait-ms",
            "5000",
            "--resume-after-confirm",
        ]);
        let config = args.engine_config();
        assert_eq!(config.predict_url, "http://10.0.2.2:5000/predict");
        assert_eq!(config.accel_rate_hz, 50);
        assert_eq!(config.debounce_max_wait, Some(Duration::from_secs(5)));
        assert_eq!(config.confirm_policy, ConfirmPolicy::Resume);
        assert!(config.validate().is_ok());
    }
}
