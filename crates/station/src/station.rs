use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use duet_client::{DuetError, MotionController, MoveTarget, Position};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use shared::domain::NO_TOOL;
use tracing::{info, warn};

use crate::{
    coordinates::{PlateGeometry, Point, WellIndex},
    deck::{validate_height, DeckConfiguration, PlateConfig, DECK_SLOT_COUNT},
    error::{Result, StationError},
    executor::{
        decode_args, parse_protocol, OperationArgs, OperationRegistry, ProtocolExecutor,
        ProtocolStep,
    },
    sonicator::{
        SonicationParams, Sonicator, DEFAULT_POWER, DEFAULT_PULSE_DUTY_CYCLE,
        DEFAULT_PULSE_INTERVAL,
    },
};

pub const CAMERA_TOOL_INDEX: i32 = 0;
pub const SONICATOR_TOOL_INDEX: i32 = 1;

/// Parameters of a `sonicate_well` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SonicateWellArgs {
    pub deck_index: u32,
    pub row_letter: String,
    /// Counts from 1.
    pub column_index: u32,
    /// Depth below the plate's top surface, mm.
    pub plunge_depth: f64,
    pub seconds: f64,
    #[serde(default)]
    pub power: Option<f64>,
    #[serde(default)]
    pub pulse_duty_cycle: Option<f64>,
    #[serde(default)]
    pub pulse_interval: Option<f64>,
    #[serde(default = "autoclean_default")]
    pub autoclean: bool,
}

fn autoclean_default() -> bool {
    true
}

impl SonicateWellArgs {
    pub fn params(&self) -> SonicationParams {
        SonicationParams {
            exposure: self.seconds,
            power: self.power.unwrap_or(DEFAULT_POWER),
            pulse_duty_cycle: self.pulse_duty_cycle.unwrap_or(DEFAULT_PULSE_DUTY_CYCLE),
            pulse_interval: self.pulse_interval.unwrap_or(DEFAULT_PULSE_INTERVAL),
        }
    }

    fn well(&self) -> Result<WellIndex> {
        WellIndex::from_parts(&self.row_letter, self.column_index)
            .ok_or_else(|| {
                StationError::InvalidWell(format!("{}{}", self.row_letter, self.column_index))
            })
    }
}

/// A deck of well plates served by a toolchanger carrying a camera and an
/// ultrasonic probe.
pub struct SonicationStation {
    motion: MotionController,
    deck: DeckConfiguration,
    deck_path: Option<PathBuf>,
    sonicator: Box<dyn Sonicator>,
    executor: Arc<ProtocolExecutor<SonicationStation>>,
    cleaning: bool,
}

impl SonicationStation {
    pub fn new(
        motion: MotionController,
        sonicator: Box<dyn Sonicator>,
        deck: DeckConfiguration,
        deck_path: Option<PathBuf>,
    ) -> Self {
        Self {
            motion,
            deck,
            deck_path,
            sonicator,
            executor: Arc::new(ProtocolExecutor::new(protocol_operations())),
            cleaning: false,
        }
    }

    /// Builds a station around the deck stored at `path`, or a blank deck
    /// when that file cannot be read.
    pub fn with_deck_file(
        motion: MotionController,
        sonicator: Box<dyn Sonicator>,
        path: &Path,
    ) -> Self {
        let (deck, deck_path) = DeckConfiguration::load_or_default(path);
        Self::new(motion, sonicator, deck, deck_path)
    }

    pub fn motion(&self) -> &MotionController {
        &self.motion
    }

    pub fn motion_mut(&mut self) -> &mut MotionController {
        &mut self.motion
    }

    pub fn deck(&self) -> &DeckConfiguration {
        &self.deck
    }

    pub fn deck_path(&self) -> Option<&Path> {
        self.deck_path.as_deref()
    }

    pub fn executor(&self) -> &ProtocolExecutor<SonicationStation> {
        &self.executor
    }

    pub async fn connect(&mut self) -> Result<()> {
        Ok(self.motion.connect().await?)
    }

    pub fn safe_z(&self) -> Option<f64> {
        self.deck.safe_z
    }

    pub fn idle_z(&self) -> f64 {
        self.deck.idle_z
    }

    /// Sets the retract height used before XY travel; `None` takes the
    /// current tool tip height.
    pub async fn set_safe_z(&mut self, z: Option<f64>) -> Result<f64> {
        let z = self.checked_height("safe_z", z).await?;
        self.deck.safe_z = Some(z);
        info!(z, "station: safe_z set");
        Ok(z)
    }

    /// Sets the height the machine rests at; `None` takes the current tool
    /// tip height.
    pub async fn set_idle_z(&mut self, z: Option<f64>) -> Result<f64> {
        let z = self.checked_height("idle_z", z).await?;
        self.deck.idle_z = z;
        info!(z, "station: idle_z set");
        Ok(z)
    }

    async fn checked_height(&mut self, name: &'static str, z: Option<f64>) -> Result<f64> {
        let z = match z {
            Some(z) => z,
            None => self.motion.position().await?.z,
        };
        let max_z = self.z_limit().await?;
        let offsets = self.motion.tool_z_offsets().await?;
        validate_height(name, z, max_z, &offsets)
    }

    async fn z_limit(&mut self) -> Result<f64> {
        let limits = self.motion.axis_limits().await?;
        limits
            .get(2)
            .map(|limit| limit.max)
            .ok_or_else(|| DuetError::MissingModelField("move.axes[2].max".into()).into())
    }

    fn require_safe_z(&self) -> Result<f64> {
        self.deck.safe_z.ok_or(StationError::SafeZUndefined)
    }

    pub async fn position(&mut self) -> Result<Position> {
        Ok(self.motion.position().await?)
    }

    /// Moves in XY, retracting to safe Z first when one is defined. With no
    /// XY target, `wait` applies to the retract.
    pub async fn move_xy_absolute(
        &mut self,
        x: Option<f64>,
        y: Option<f64>,
        wait: bool,
    ) -> Result<()> {
        let travel = MoveTarget::new(x, y, None);
        if let Some(safe_z) = self.deck.safe_z {
            let wait_on_retract = wait && travel.is_empty();
            self.motion
                .move_absolute(MoveTarget::z(safe_z), wait_on_retract)
                .await?;
            if wait_on_retract {
                return Ok(());
            }
        }
        self.motion.move_absolute(travel, wait).await?;
        Ok(())
    }

    pub async fn move_xyz_absolute(
        &mut self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        wait: bool,
    ) -> Result<()> {
        Ok(self.motion.move_absolute(MoveTarget::new(x, y, z), wait).await?)
    }

    pub async fn pickup_tool(&mut self, tool: i32) -> Result<()> {
        Ok(self.motion.pickup_tool(tool).await?)
    }

    /// Retracts to safe Z, then parks the held tool, if any.
    pub async fn park_tool(&mut self) -> Result<()> {
        if self.motion.active_tool_index().await? == NO_TOOL {
            return Ok(());
        }
        self.move_xy_absolute(None, None, false).await?;
        Ok(self.motion.park_tool().await?)
    }

    /// Homes every axis, then rises to idle Z. The deck must be clear.
    pub async fn home_all(&mut self) -> Result<()> {
        self.motion.home_all().await?;
        let idle_z = self.deck.idle_z;
        self.motion.move_absolute(MoveTarget::z(idle_z), false).await?;
        Ok(())
    }

    pub fn well_position(&self, deck_index: u32, well: WellIndex) -> Result<Point> {
        let mapper = self.deck.plate(deck_index)?.mapper(deck_index)?;
        Ok(mapper.well_position(well)?)
    }

    /// Travels at safe Z to the centre of `label` (e.g. `B7`) on a plate.
    pub async fn move_to_well(&mut self, deck_index: u32, label: &str) -> Result<Point> {
        self.require_safe_z()?;
        let well =
            WellIndex::from_label(label).ok_or_else(|| StationError::InvalidWell(label.into()))?;
        let point = self.well_position(deck_index, well)?;
        self.move_xy_absolute(Some(point.x), Some(point.y), true).await?;
        Ok(point)
    }

    /// Starts a fresh configuration for a deck slot and returns the one it
    /// replaced so a caller abandoning the setup can put it back.
    pub fn setup_plate(
        &mut self,
        deck_index: u32,
        well_count: u32,
    ) -> Result<Option<PlateConfig>> {
        if deck_index >= DECK_SLOT_COUNT {
            return Err(StationError::InvalidDeckIndex(deck_index));
        }
        if PlateGeometry::for_well_count(well_count).is_none() {
            return Err(StationError::UnsupportedWellCount(well_count));
        }
        let previous = self.deck.plates.insert(deck_index, PlateConfig::blank(well_count));
        if previous.is_some() {
            warn!(deck_index, "station: replacing an existing plate configuration");
        }
        Ok(previous)
    }

    pub fn restore_plate(&mut self, deck_index: u32, previous: Option<PlateConfig>) {
        match previous {
            Some(plate) => {
                self.deck.plates.insert(deck_index, plate);
            }
            None => {
                self.deck.plates.remove(&deck_index);
            }
        }
    }

    /// Records the current tool tip XY as teach point `corner` (0: A1,
    /// 1: last well of row A, 2: last well of the last row).
    pub async fn teach_corner(&mut self, deck_index: u32, corner: usize) -> Result<Point> {
        if corner >= 3 {
            return Err(StationError::InvalidCorner(corner));
        }
        self.deck.plate(deck_index)?;
        let position = self.motion.position().await?;
        let point = Point::new(position.x, position.y);
        self.deck.plate_mut(deck_index)?.corner_well_centroids[corner] = Some(point);
        info!(deck_index, corner, x = point.x, y = point.y, "station: teach point recorded");
        Ok(point)
    }

    /// Records the current tool tip Z as the plate's top surface.
    pub async fn teach_plate_height(&mut self, deck_index: u32) -> Result<f64> {
        self.deck.plate(deck_index)?;
        let height = self.motion.position().await?.z;
        self.deck.plate_mut(deck_index)?.plate_height = Some(height);
        info!(deck_index, height, "station: plate height recorded");
        Ok(height)
    }

    /// Moves the camera over one taught corner of a plate, rising to safe Z
    /// first when below it.
    pub async fn move_to_teach_point(&mut self, deck_index: u32, corner: usize) -> Result<Point> {
        let safe_z = self.require_safe_z()?;
        let point = self.teach_point(deck_index, corner)?;
        self.raise_camera(safe_z).await?;
        self.move_xy_absolute(Some(point.x), Some(point.y), true)
            .await?;
        Ok(point)
    }

    /// Visits every teach point of a plate with the camera, calling
    /// `on_corner` once the machine has settled over each, then parks.
    ///
    /// All three corners must be taught; nothing moves otherwise.
    pub async fn check_plate_registration_points(
        &mut self,
        deck_index: u32,
        mut on_corner: impl FnMut(usize, Point) + Send,
    ) -> Result<()> {
        let safe_z = self.require_safe_z()?;
        let points = [0, 1, 2].map(|corner| self.teach_point(deck_index, corner));
        let points = points.into_iter().collect::<Result<Vec<_>>>()?;
        self.raise_camera(safe_z).await?;
        for (corner, point) in points.into_iter().enumerate() {
            self.move_xy_absolute(Some(point.x), Some(point.y), true)
                .await?;
            info!(deck_index, corner, x = point.x, y = point.y, "station: at teach point");
            on_corner(corner, point);
        }
        self.park_tool().await
    }

    fn teach_point(&self, deck_index: u32, corner: usize) -> Result<Point> {
        if corner >= 3 {
            return Err(StationError::InvalidCorner(corner));
        }
        self.deck.plate(deck_index)?.corner_well_centroids[corner]
            .ok_or(StationError::PlateNotTaught(deck_index))
    }

    async fn raise_camera(&mut self, safe_z: f64) -> Result<()> {
        if self.motion.active_tool_index().await? != CAMERA_TOOL_INDEX {
            self.motion.pickup_tool(CAMERA_TOOL_INDEX).await?;
        }
        if self.motion.position().await?.z < safe_z {
            self.motion.move_absolute(MoveTarget::z(safe_z), false).await?;
        }
        Ok(())
    }

    /// Plunges the probe into one well, sonicates, retracts and, unless
    /// disabled, runs the cleaning protocol.
    pub async fn sonicate_well(&mut self, args: SonicateWellArgs) -> Result<()> {
        self.require_safe_z()?;
        let autoclean = args.autoclean && !self.cleaning;
        if autoclean && self.deck.cleaning_config.protocol.is_empty() {
            return Err(StationError::CleaningNotConfigured);
        }
        let plate = self.deck.plate(args.deck_index)?;
        let plate_height = plate
            .plate_height
            .ok_or(StationError::PlateNotTaught(args.deck_index))?;
        let plunge_height = plate_height - args.plunge_depth;
        if plunge_height < 0.0 {
            return Err(StationError::PlungeTooDeep { plunge_height });
        }
        let params = args.params();
        params.validate()?;
        let well = args.well()?;
        let point = self.well_position(args.deck_index, well)?;

        if self.motion.active_tool_index().await? != SONICATOR_TOOL_INDEX {
            self.motion.pickup_tool(SONICATOR_TOOL_INDEX).await?;
        }
        info!(
            deck_index = args.deck_index,
            well = %well.label(),
            x = point.x,
            y = point.y,
            "station: moving to well"
        );
        self.move_xy_absolute(Some(point.x), Some(point.y), false).await?;
        self.motion
            .move_absolute(MoveTarget::z(plunge_height), true)
            .await?;
        self.sonicator.sonicate(&params).await?;
        self.move_xy_absolute(None, None, false).await?;

        if autoclean {
            self.clean_sonicator().await?;
        }
        Ok(())
    }

    /// Runs the configured cleaning protocol. A cleaning protocol may not
    /// start another clean.
    pub async fn clean_sonicator(&mut self) -> Result<()> {
        if self.cleaning {
            return Err(StationError::CleaningInProgress);
        }
        self.require_safe_z()?;
        if self.deck.cleaning_config.protocol.is_empty() {
            return Err(StationError::CleaningNotConfigured);
        }
        let steps = self.deck.cleaning_config.protocol.clone();
        let previous = std::mem::replace(&mut self.cleaning, true);
        let result = self.execute_protocol(&steps).await;
        self.cleaning = previous;
        result
    }

    /// Appends a bath visit to the cleaning protocol and returns the deck
    /// slots it uses that are not configured yet.
    pub fn add_cleaning_step(&mut self, mut args: SonicateWellArgs) -> Result<Vec<u32>> {
        self.require_safe_z()?;
        args.well()?;
        args.autoclean = false;
        let specs: OperationArgs = serde_json::from_value(serde_json::to_value(&args)?)?;
        let cleaning = &mut self.deck.cleaning_config;
        cleaning.protocol.push(ProtocolStep::new("sonicate_well", specs));
        if !cleaning.plates.contains(&args.deck_index) {
            cleaning.plates.push(args.deck_index);
        }
        Ok(cleaning
            .plates
            .iter()
            .copied()
            .filter(|plate| !self.deck.plates.contains_key(plate))
            .collect())
    }

    pub async fn execute_protocol(&mut self, steps: &[ProtocolStep]) -> Result<()> {
        let executor = Arc::clone(&self.executor);
        executor.execute(self, steps).await
    }

    pub async fn execute_protocol_from_file(&mut self, path: &Path) -> Result<()> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| StationError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let steps = parse_protocol(&text)?;
        info!(path = %path.display(), steps = steps.len(), "station: running protocol file");
        self.execute_protocol(&steps).await
    }

    /// Replaces the deck with the file at `path`, or reloads the remembered
    /// file. When connected, a deck whose heights the machine cannot reach is
    /// rejected and the current deck kept.
    pub async fn load_deck_config(&mut self, path: Option<&Path>) -> Result<()> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| self.deck_path.clone())
            .ok_or(StationError::NoDeckPath)?;
        let deck = DeckConfiguration::load(&path)?;
        self.check_heights(deck.safe_z, deck.idle_z).await?;
        self.deck = deck;
        self.deck_path = Some(path);
        Ok(())
    }

    /// Saves the deck to `path` or to the remembered file. Heights are
    /// rechecked against the machine first when connected.
    pub async fn save_deck_config(&mut self, path: Option<&Path>) -> Result<()> {
        self.check_heights(self.deck.safe_z, self.deck.idle_z).await?;
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| self.deck_path.clone())
            .ok_or(StationError::NoDeckPath)?;
        self.deck.save(&path)?;
        self.deck_path = Some(path);
        Ok(())
    }

    async fn check_heights(&mut self, safe_z: Option<f64>, idle_z: f64) -> Result<()> {
        if !self.motion.supervisor().is_connected() {
            return Ok(());
        }
        if let Some(safe_z) = safe_z {
            self.checked_height("safe_z", Some(safe_z)).await?;
        }
        self.checked_height("idle_z", Some(idle_z)).await?;
        Ok(())
    }

    /// Leaves the machine parked at idle height and powered down, then
    /// disconnects.
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Err(err) = self.sonicator.shutdown().await {
            warn!(%err, "station: sonicator did not power down cleanly");
        }
        let parked = if self.motion.supervisor().is_connected() && self.motion.homing().all() {
            self.park_at_idle().await
        } else {
            Ok(())
        };
        self.motion.disconnect().await;
        parked
    }

    async fn park_at_idle(&mut self) -> Result<()> {
        self.park_tool().await?;
        let idle_z = self.deck.idle_z;
        self.motion.move_absolute(MoveTarget::z(idle_z), false).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoArgs {}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HeightArgs {
    #[serde(default)]
    z: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MoveArgs {
    #[serde(default)]
    x: Option<f64>,
    #[serde(default)]
    y: Option<f64>,
    #[serde(default)]
    z: Option<f64>,
    #[serde(default)]
    wait: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ToolArgs {
    tool_index: i32,
}

/// Operations a protocol file may name.
pub fn protocol_operations() -> OperationRegistry<SonicationStation> {
    OperationRegistry::new()
        .register("sonicate_well", sonicate_well_step)
        .register("clean_sonicator", clean_sonicator_step)
        .register("safe_z", safe_z_step)
        .register("idle_z", idle_z_step)
        .register("move_xy_absolute", move_xy_absolute_step)
        .register("move_xyz_absolute", move_xyz_absolute_step)
        .register("pickup_tool", pickup_tool_step)
        .register("park_tool", park_tool_step)
        .register("home_all", home_all_step)
        .register("move_to_teach_point", move_to_teach_point_step)
}

fn sonicate_well_step(
    station: &mut SonicationStation,
    args: OperationArgs,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let args: SonicateWellArgs = decode_args("sonicate_well", args)?;
        station.sonicate_well(args).await
    })
}

fn clean_sonicator_step(
    station: &mut SonicationStation,
    args: OperationArgs,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let NoArgs {} = decode_args("clean_sonicator", args)?;
        station.clean_sonicator().await
    })
}

fn safe_z_step(
    station: &mut SonicationStation,
    args: OperationArgs,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let HeightArgs { z } = decode_args("safe_z", args)?;
        station.set_safe_z(z).await.map(drop)
    })
}

fn idle_z_step(
    station: &mut SonicationStation,
    args: OperationArgs,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let HeightArgs { z } = decode_args("idle_z", args)?;
        station.set_idle_z(z).await.map(drop)
    })
}

fn move_xy_absolute_step(
    station: &mut SonicationStation,
    args: OperationArgs,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let MoveArgs { x, y, z, wait } = decode_args("move_xy_absolute", args)?;
        if z.is_some() {
            warn!("station: move_xy_absolute ignores z");
        }
        station.move_xy_absolute(x, y, wait).await
    })
}

fn move_xyz_absolute_step(
    station: &mut SonicationStation,
    args: OperationArgs,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let MoveArgs { x, y, z, wait } = decode_args("move_xyz_absolute", args)?;
        station.move_xyz_absolute(x, y, z, wait).await
    })
}

fn pickup_tool_step(
    station: &mut SonicationStation,
    args: OperationArgs,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let ToolArgs { tool_index } = decode_args("pickup_tool", args)?;
        station.pickup_tool(tool_index).await
    })
}

fn park_tool_step(
    station: &mut SonicationStation,
    args: OperationArgs,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let NoArgs {} = decode_args("park_tool", args)?;
        station.park_tool().await
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TeachPointArgs {
    deck_index: u32,
    corner: usize,
}

fn move_to_teach_point_step(
    station: &mut SonicationStation,
    args: OperationArgs,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let TeachPointArgs { deck_index, corner } = decode_args("move_to_teach_point", args)?;
        station.move_to_teach_point(deck_index, corner).await.map(drop)
    })
}

fn home_all_step(
    station: &mut SonicationStation,
    args: OperationArgs,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let NoArgs {} = decode_args("home_all", args)?;
        station.home_all().await
    })
}

#[cfg(test)]
#[path = "tests/station_tests.rs"]
mod tests;
