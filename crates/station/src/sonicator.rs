//! Ultrasonic probe control.
//!
//! The probe is driven by two signals: an analog power level and an enable
//! line. [`PulsedSonicator`] turns an exposure into an on/off schedule over
//! any [`SonicatorOutput`]; the hardware driver lives outside this crate.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::error::{Result, StationError};

pub const DEFAULT_POWER: f64 = 0.4;
pub const DEFAULT_PULSE_DUTY_CYCLE: f64 = 0.5;
pub const DEFAULT_PULSE_INTERVAL: f64 = 1.0;

/// One exposure. Times are in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SonicationParams {
    pub exposure: f64,
    pub power: f64,
    pub pulse_duty_cycle: f64,
    pub pulse_interval: f64,
}

impl SonicationParams {
    pub fn new(exposure: f64) -> Self {
        Self {
            exposure,
            power: DEFAULT_POWER,
            pulse_duty_cycle: DEFAULT_PULSE_DUTY_CYCLE,
            pulse_interval: DEFAULT_PULSE_INTERVAL,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(StationError::InvalidSonication(message));
        if !(0.0..=1.0).contains(&self.power) {
            return invalid(format!("power must be within 0..=1, got {}", self.power));
        }
        if !(0.0..=1.0).contains(&self.pulse_duty_cycle) {
            return invalid(format!(
                "pulse duty cycle must be within 0..=1, got {}",
                self.pulse_duty_cycle
            ));
        }
        if !(self.pulse_interval > 0.0) {
            return invalid(format!(
                "pulse interval must be positive, got {}",
                self.pulse_interval
            ));
        }
        if self.pulse_interval > self.exposure {
            return invalid(format!(
                "pulse interval {} s exceeds the {} s exposure",
                self.pulse_interval, self.exposure
            ));
        }
        Ok(())
    }
}

#[async_trait]
pub trait Sonicator: Send {
    async fn sonicate(&mut self, params: &SonicationParams) -> Result<()>;

    /// Leaves the probe powered down.
    async fn shutdown(&mut self) -> Result<()>;
}

#[async_trait]
pub trait SonicatorOutput: Send {
    /// Normalized power level, 0 to 1.
    async fn set_power(&mut self, level: f64) -> Result<()>;

    async fn set_enabled(&mut self, enabled: bool) -> Result<()>;
}

pub struct PulsedSonicator<O> {
    output: O,
}

impl<O: SonicatorOutput> PulsedSonicator<O> {
    pub fn new(output: O) -> Self {
        Self { output }
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    async fn pulse(&mut self, on: Duration, off: Duration, stop: Instant) -> Result<()> {
        loop {
            let now = Instant::now();
            if now >= stop {
                return Ok(());
            }
            if !on.is_zero() {
                self.output.set_enabled(true).await?;
                sleep_until((now + on).min(stop)).await;
            }

            let now = Instant::now();
            if now >= stop {
                return Ok(());
            }
            self.output.set_enabled(false).await?;
            sleep_until((now + off).min(stop)).await;
        }
    }
}

#[async_trait]
impl<O: SonicatorOutput> Sonicator for PulsedSonicator<O> {
    async fn sonicate(&mut self, params: &SonicationParams) -> Result<()> {
        params.validate()?;
        let on = Duration::from_secs_f64(params.pulse_interval * params.pulse_duty_cycle);
        let off = Duration::from_secs_f64(params.pulse_interval).saturating_sub(on);
        let started = Instant::now();
        let stop = started + Duration::from_secs_f64(params.exposure);

        info!(
            seconds = params.exposure,
            power = params.power,
            duty = params.pulse_duty_cycle,
            "sonicator: exposure started"
        );
        self.output.set_power(params.power).await?;
        let pulsed = self.pulse(on, off, stop).await;
        let stopped = self.shutdown().await;
        info!(elapsed = ?started.elapsed(), "sonicator: exposure finished");
        pulsed.and(stopped)
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.output.set_enabled(false).await?;
        self.output.set_power(0.0).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputEvent {
    Power(f64),
    Enabled(bool),
}

/// Output that only logs and records what it was asked to do.
#[derive(Debug, Default)]
pub struct SimulatedOutput {
    events: Vec<OutputEvent>,
}

impl SimulatedOutput {
    pub fn events(&self) -> &[OutputEvent] {
        &self.events
    }
}

#[async_trait]
impl SonicatorOutput for SimulatedOutput {
    async fn set_power(&mut self, level: f64) -> Result<()> {
        debug!(level, "sonicator: simulated power level");
        self.events.push(OutputEvent::Power(level));
        Ok(())
    }

    async fn set_enabled(&mut self, enabled: bool) -> Result<()> {
        info!(enabled, "sonicator: simulated enable line");
        self.events.push(OutputEvent::Enabled(enabled));
        Ok(())
    }
}
