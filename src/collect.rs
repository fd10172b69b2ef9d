use std::time::{Duration, Instant};

use crate::error::{ScanError, Stage};
use crate::partition::PartitionPlan;
use crate::scan::{Dispatch, GroupLayout};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    /// Time spent executing the scan, as measured by the substrate.
    pub device: Option<Duration>,
    /// Wall-clock time from the caller's start instant to readback.
    pub host: Duration,
}

impl Timing {
    pub fn device_ms(&self) -> Option<f64> {
        self.device.map(|d| d.as_secs_f64() * 1e3)
    }

    pub fn host_ms(&self) -> f64 {
        self.host.as_secs_f64() * 1e3
    }
}

/// Trimmed scan output plus what is known about how it was produced.
#[derive(Debug, Clone)]
pub struct ScanReport {
    values: Vec<f32>,
    timing: Timing,
    layout: Option<GroupLayout>,
    lookback_hops: Option<u64>,
}

impl ScanReport {
    pub(crate) fn empty(started: Instant) -> Self {
        Self {
            values: Vec::new(),
            timing: Timing {
                device: None,
                host: started.elapsed(),
            },
            layout: None,
            lookback_hops: None,
        }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    /// `None` when nothing was dispatched.
    pub fn layout(&self) -> Option<GroupLayout> {
        self.layout
    }

    pub fn lookback_hops(&self) -> Option<u64> {
        self.lookback_hops
    }
}

/// Waits for `dispatch` and returns the first `plan.len()` outputs.
///
/// A failed dispatch never yields partial output.
pub async fn collect(dispatch: Dispatch, plan: &PartitionPlan, started: Instant) -> Result<ScanReport, ScanError> {
    let layout = dispatch.layout();
    let completion = dispatch.wait().await?;

    let mut values = completion.output;
    if values.len() != plan.padded_len() {
        return Err(ScanError::substrate(
            Stage::Readback,
            format!("expected {} values, got {}", plan.padded_len(), values.len()),
        ));
    }
    values.truncate(plan.len());

    let timing = Timing {
        device: completion.device_time,
        host: started.elapsed(),
    };

    tracing::debug!(
        len = plan.len(),
        device_ms = ?timing.device_ms(),
        host_ms = timing.host_ms(),
        "scan collected"
    );

    Ok(ScanReport {
        values,
        timing,
        layout: Some(layout),
        lookback_hops: completion.lookback_hops,
    })
}
