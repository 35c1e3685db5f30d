use log::{info, warn};

use crate::error::ProbeError;
use crate::sensors::SensorAdapter;
use crate::types::{SensorCapabilities, SensorKind};

/// Outcome of the first (and only) availability check.
#[derive(Clone, Debug, PartialEq)]
pub struct ProbeReport {
    pub capabilities: SensorCapabilities,
    /// Set when probing failed and both sensors were degraded to unavailable
    pub error: Option<ProbeError>,
}

/// Runs the availability probe once per engine lifetime and caches the result.
///
/// A failed probe degrades both sensors to unavailable. Later hardware faults
/// never trigger a re-probe; they surface as stream failures instead.
#[derive(Debug, Default)]
pub struct AvailabilityProber {
    cached: Option<ProbeReport>,
    probe_count: u32,
}

impl AvailabilityProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn probe(&mut self, adapter: &SensorAdapter) -> ProbeReport {
        if let Some(report) = &self.cached {
            return report.clone();
        }

        self.probe_count += 1;
        let report = match adapter.probe().await {
            Ok(capabilities) => {
                for kind in SensorKind::ALL {
                    if capabilities.is_available(kind) {
                        info!("[probe] {} available", kind);
                    } else {
                        warn!("[probe] {} is not available on this device", kind);
                    }
                }
                ProbeReport {
                    capabilities,
                    error: None,
                }
            }
            Err(error) => {
                warn!("[probe] checking sensor availability failed: {}", error);
                ProbeReport {
                    capabilities: SensorCapabilities::default(),
                    error: Some(error),
                }
            }
        };

        self.cached = Some(report.clone());
        report
    }

    pub fn cached(&self) -> Option<SensorCapabilities> {
        self.cached.as_ref().map(|report| report.capabilities)
    }

    /// Number of times the adapter was actually probed.
    pub fn probe_count(&self) -> u32 {
        self.probe_count
    }
}
