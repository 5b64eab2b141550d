use std::{fmt::Write as _, time::Duration};

use shared::domain::{Axis, HomingState, MachineStatus, NO_TOOL};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::{
    error::{DuetError, Result},
    model::{AxisLimits, ToolOffset},
    simulated::SimulatedMachine,
    supervisor::{ConnectionSupervisor, SupervisorConfig},
};

/// Feed rate appended to every travel move, mm/min.
pub const FEED_RATE: u32 = 13000;

/// Order in which axes are homed when several are requested. Y goes first so
/// the carriage clears the tool rack before X travels.
const HOMING_ORDER: [Axis; 4] = [Axis::Y, Axis::X, Axis::Z, Axis::U];

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MoveTarget {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

impl MoveTarget {
    pub fn new(x: Option<f64>, y: Option<f64>, z: Option<f64>) -> Self {
        Self { x, y, z }
    }

    pub fn xy(x: f64, y: f64) -> Self {
        Self::new(Some(x), Some(y), None)
    }

    pub fn xyz(x: f64, y: f64, z: f64) -> Self {
        Self::new(Some(x), Some(y), Some(z))
    }

    pub fn z(z: f64) -> Self {
        Self::new(None, None, Some(z))
    }

    fn components(&self) -> impl Iterator<Item = (Axis, f64)> {
        [(Axis::X, self.x), (Axis::Y, self.y), (Axis::Z, self.z)]
            .into_iter()
            .filter_map(|(axis, value)| value.map(|value| (axis, value)))
    }

    pub fn axes(&self) -> Vec<Axis> {
        self.components().map(|(axis, _)| axis).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.components().next().is_none()
    }

    /// `G0` code moving only the given axes, or `None` when nothing moves.
    pub fn to_gcode(&self, feed_rate: u32) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut code = String::from("G0");
        for (axis, value) in self.components() {
            let _ = write!(code, " {axis}{value}");
        }
        let _ = write!(code, " F{feed_rate}");
        Some(code)
    }
}

/// Tool tip position in machine coordinates, mm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Homing and motion state machine on top of a [`ConnectionSupervisor`].
pub struct MotionController {
    supervisor: ConnectionSupervisor,
    absolute_moves: bool,
    feed_rate: u32,
}

impl MotionController {
    pub fn new(supervisor: ConnectionSupervisor) -> Self {
        Self {
            supervisor,
            absolute_moves: true,
            feed_rate: FEED_RATE,
        }
    }

    pub fn simulated(machine: &SimulatedMachine, config: SupervisorConfig) -> Self {
        Self::new(ConnectionSupervisor::simulated(machine, config))
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.supervisor
    }

    pub fn supervisor_mut(&mut self) -> &mut ConnectionSupervisor {
        &mut self.supervisor
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute_moves
    }

    pub fn homing(&self) -> HomingState {
        self.supervisor.homing()
    }

    pub async fn connect(&mut self) -> Result<()> {
        self.supervisor.connect().await?;
        self.set_absolute_moves(true).await
    }

    pub async fn reset(&mut self) -> Result<()> {
        self.supervisor.reset().await?;
        self.set_absolute_moves(true).await
    }

    pub async fn disconnect(&mut self) {
        self.supervisor.disconnect().await;
    }

    /// Sends a raw code.
    pub async fn send(&self, code: &str) -> Result<String> {
        self.supervisor.send(code).await
    }

    /// Homes `axes`, Y before X. Asking for all four axes issues a single
    /// `G28`.
    ///
    /// Requested axes are marked homed without waiting for the model; the
    /// remaining axes keep their flag or pick it up from the model.
    pub async fn home(&mut self, axes: &[Axis]) -> Result<()> {
        if Axis::ALL.iter().all(|axis| axes.contains(axis)) {
            return self.home_all().await;
        }
        for axis in HOMING_ORDER.into_iter().filter(|axis| axes.contains(axis)) {
            self.send(&format!("G28 {axis}")).await?;
        }
        self.set_absolute_moves(true).await?;

        let model = self.supervisor.snapshot().await?.axes_homed();
        for axis in Axis::ALL {
            let homed = axes.contains(&axis)
                || self.supervisor.homing().is_homed(axis)
                || model.is_homed(axis);
            self.supervisor.set_homed(axis, homed);
        }
        info!(?axes, "motion: axes homed");
        Ok(())
    }

    /// Parks any held tool, then homes every axis with one `G28`.
    pub async fn home_all(&mut self) -> Result<()> {
        if self.active_tool_index().await? != NO_TOOL {
            self.park_tool().await?;
        }
        self.send("G28").await?;
        self.set_absolute_moves(true).await?;
        for axis in Axis::ALL {
            self.supervisor.set_homed(axis, true);
        }
        info!("motion: all axes homed");
        Ok(())
    }

    pub async fn home_xyu(&mut self) -> Result<()> {
        self.home(&[Axis::X, Axis::Y, Axis::U]).await
    }

    /// The deck must be clear before calling this.
    pub async fn home_z(&mut self) -> Result<()> {
        self.home(&[Axis::Z]).await
    }

    /// Declares the current position of each named axis to be zero.
    pub async fn home_in_place(&mut self, axes: &[char]) -> Result<()> {
        let axes = axes
            .iter()
            .map(|letter| Axis::from_letter(*letter).ok_or(DuetError::InvalidAxis(*letter)))
            .collect::<Result<Vec<_>>>()?;
        for axis in axes {
            self.send(&format!("G92 {axis}0")).await?;
        }
        Ok(())
    }

    pub async fn move_absolute(&mut self, target: MoveTarget, wait: bool) -> Result<()> {
        self.travel(target, true, wait).await
    }

    pub async fn move_relative(&mut self, target: MoveTarget, wait: bool) -> Result<()> {
        self.travel(target, false, wait).await
    }

    async fn travel(&mut self, target: MoveTarget, absolute: bool, wait: bool) -> Result<()> {
        self.require_homed(&target.axes()).await?;
        if let Some(code) = target.to_gcode(self.feed_rate) {
            if absolute {
                self.set_absolute_moves(false).await?;
            } else {
                self.set_relative_moves(false).await?;
            }
            self.send(&code).await?;
        }
        // An empty target with `wait` still waits for earlier moves.
        if wait {
            self.wait_until_idle(self.supervisor.config().idle_timeout)
                .await?;
        }
        Ok(())
    }

    /// Fails with [`DuetError::NotHomed`] unless every axis is homed. Axes
    /// not marked locally are looked up in the synchronized model; no code
    /// is sent either way.
    async fn require_homed(&mut self, axes: &[Axis]) -> Result<()> {
        let missing = self.supervisor.homing().missing(axes);
        if missing.is_empty() {
            return Ok(());
        }
        let Ok(model) = self.supervisor.snapshot().await else {
            return Err(DuetError::NotHomed { axes: missing });
        };
        let reported = model.axes_homed();
        let unhomed = reported.missing(&missing);
        if !unhomed.is_empty() {
            return Err(DuetError::NotHomed { axes: unhomed });
        }
        for axis in missing {
            self.supervisor.set_homed(axis, true);
        }
        Ok(())
    }

    async fn set_absolute_moves(&mut self, force: bool) -> Result<()> {
        if self.absolute_moves && !force {
            return Ok(());
        }
        self.send("G90").await?;
        self.absolute_moves = true;
        Ok(())
    }

    async fn set_relative_moves(&mut self, force: bool) -> Result<()> {
        if !self.absolute_moves && !force {
            return Ok(());
        }
        self.send("G91").await?;
        self.absolute_moves = false;
        Ok(())
    }

    /// Tool tip position: the carriage position from the model plus the
    /// active tool's offset.
    pub async fn position(&mut self) -> Result<Position> {
        let model = self.supervisor.snapshot().await?;
        let read = |axis: Axis| {
            model.machine_position(axis).ok_or_else(|| {
                DuetError::MissingModelField(format!("move.axes[{}].machinePosition", axis.index()))
            })
        };
        let (x, y, z) = (read(Axis::X)?, read(Axis::Y)?, read(Axis::Z)?);
        let offset = self.active_tool_offset().await?;
        Ok(Position {
            x: x + offset.x,
            y: y + offset.y,
            z: z + offset.z,
        })
    }

    async fn active_tool_offset(&mut self) -> Result<ToolOffset> {
        let tool = self.active_tool_index().await?;
        let Ok(index) = usize::try_from(tool) else {
            return Ok(ToolOffset::default());
        };
        Ok(self
            .supervisor
            .tool_offsets()
            .await?
            .get(index)
            .copied()
            .unwrap_or_default())
    }

    /// Negative indices are ignored.
    pub async fn pickup_tool(&mut self, tool: i32) -> Result<()> {
        if tool < 0 {
            return Ok(());
        }
        self.send(&format!("T{tool}")).await?;
        self.supervisor.set_active_tool(tool);
        debug!(tool, "motion: tool picked up");
        Ok(())
    }

    pub async fn park_tool(&mut self) -> Result<()> {
        self.send("T-1").await?;
        self.supervisor.set_active_tool(NO_TOOL);
        debug!("motion: tool parked");
        Ok(())
    }

    pub async fn active_tool_index(&mut self) -> Result<i32> {
        self.supervisor.active_tool_index().await
    }

    /// Z offset of every tool, in tool order.
    pub async fn tool_z_offsets(&mut self) -> Result<Vec<f64>> {
        Ok(self
            .supervisor
            .tool_offsets()
            .await?
            .into_iter()
            .map(|offset| offset.z)
            .collect())
    }

    /// Limits of every axis, X Y Z U order.
    pub async fn axis_limits(&mut self) -> Result<Vec<AxisLimits>> {
        self.supervisor.axis_limits().await
    }

    /// Waits for the firmware to report idle, checking only when the
    /// synchronizer has had a chance to pull a fresh patch.
    ///
    /// The first check happens one full poll interval after the call, which
    /// relies on the firmware reporting busy by the time it acknowledges the
    /// preceding move.
    pub async fn wait_until_idle(&self, timeout: Duration) -> Result<()> {
        let handle = self.supervisor.model()?;
        let interval = handle.poll_interval();
        let started = Instant::now();
        let deadline = started + timeout;
        let mut wake = started + interval;
        loop {
            sleep_until(wake).await;
            if !handle.is_running().await {
                return Err(DuetError::Connection(
                    "state feed stopped while waiting for idle".into(),
                ));
            }
            let status = handle.snapshot().await.status();
            if status.is_some_and(MachineStatus::is_idle) {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(DuetError::MoveTimedOut { timeout });
            }
            let scheduled = handle.next_wake_time().await;
            wake = if scheduled > now { scheduled } else { now + interval };
        }
    }
}

#[cfg(test)]
#[path = "tests/motion_tests.rs"]
mod tests;
