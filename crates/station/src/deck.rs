use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    coordinates::{PlateGeometry, Point, WellMapper},
    error::{Result, StationError},
    executor::ProtocolStep,
};

/// Number of plate slots on the deck.
pub const DECK_SLOT_COUNT: u32 = 6;
pub const DEFAULT_IDLE_Z: f64 = 300.0;

/// Plates on the deck and the heights used to travel between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeckConfiguration {
    /// Keyed by deck slot.
    #[serde(default)]
    pub plates: BTreeMap<u32, PlateConfig>,
    /// Retract height before any XY travel.
    #[serde(default)]
    pub safe_z: Option<f64>,
    #[serde(default = "default_idle_z")]
    pub idle_z: f64,
    #[serde(default)]
    pub cleaning_config: CleaningConfig,
}

fn default_idle_z() -> f64 {
    DEFAULT_IDLE_Z
}

impl Default for DeckConfiguration {
    fn default() -> Self {
        Self {
            plates: BTreeMap::new(),
            safe_z: None,
            idle_z: DEFAULT_IDLE_Z,
            cleaning_config: CleaningConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub well_count: u32,
    /// Centres of A1, the last well of row A and the last well of the last row.
    #[serde(default, with = "corners")]
    pub corner_well_centroids: [Option<Point>; 3],
    /// Height of the plate's top surface; plunge depths are measured from it.
    #[serde(default)]
    pub plate_height: Option<f64>,
}

impl PlateConfig {
    pub fn blank(well_count: u32) -> Self {
        Self {
            id: String::new(),
            well_count,
            corner_well_centroids: [None; 3],
            plate_height: None,
        }
    }

    /// Mapper for this plate, once all three corners are taught.
    pub fn mapper(&self, deck_index: u32) -> Result<WellMapper> {
        let geometry = PlateGeometry::for_well_count(self.well_count)
            .ok_or(StationError::UnsupportedWellCount(self.well_count))?;
        let [Some(a), Some(b), Some(c)] = self.corner_well_centroids else {
            return Err(StationError::PlateNotTaught(deck_index));
        };
        Ok(WellMapper::new([a, b, c], geometry)?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleaningConfig {
    /// Deck slots holding cleaning baths.
    #[serde(default)]
    pub plates: Vec<u32>,
    #[serde(default)]
    pub protocol: Vec<ProtocolStep>,
}

impl DeckConfiguration {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| StationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let deck = serde_json::from_str(&text)?;
        info!(path = %path.display(), "deck: configuration loaded");
        Ok(deck)
    }

    /// Loads `path`, falling back to a blank deck when the file is missing or
    /// unreadable. The path is returned only when it loaded.
    pub fn load_or_default(path: &Path) -> (Self, Option<PathBuf>) {
        match Self::load(path) {
            Ok(deck) => (deck, Some(path.to_path_buf())),
            Err(err) => {
                warn!(path = %path.display(), %err, "deck: using a blank configuration");
                (Self::default(), None)
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text).map_err(|source| StationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "deck: configuration saved");
        Ok(())
    }

    pub fn plate(&self, deck_index: u32) -> Result<&PlateConfig> {
        self.plates
            .get(&deck_index)
            .ok_or(StationError::PlateNotConfigured(deck_index))
    }

    pub fn plate_mut(&mut self, deck_index: u32) -> Result<&mut PlateConfig> {
        self.plates
            .get_mut(&deck_index)
            .ok_or(StationError::PlateNotConfigured(deck_index))
    }
}

/// Rejects heights below the bed or above what the longest tool can clear.
///
/// `max_z` is the Z axis travel limit; tool offsets are negative for tools
/// reaching below the carriage, so the most negative one bounds the height.
pub fn validate_height(
    name: &'static str,
    value: f64,
    max_z: f64,
    tool_z_offsets: &[f64],
) -> Result<f64> {
    let longest_tool = tool_z_offsets.iter().copied().fold(0.0_f64, f64::min);
    let max = max_z + longest_tool;
    if value < 0.0 || value > max {
        return Err(StationError::InvalidHeight { name, value, max });
    }
    Ok(value)
}

/// Corners persist as `[x, y]` pairs; untaught corners as `null` or
/// `[null, null]`.
mod corners {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::coordinates::Point;

    pub fn serialize<S: Serializer>(
        corners: &[Option<Point>; 3],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        corners
            .map(|corner| corner.map(|point| [point.x, point.y]))
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[Option<Point>; 3], D::Error> {
        let raw: Vec<Option<[Option<f64>; 2]>> = Vec::deserialize(deserializer)?;
        let mut corners = [None; 3];
        for (slot, corner) in corners.iter_mut().zip(raw) {
            if let Some([Some(x), Some(y)]) = corner {
                *slot = Some(Point::new(x, y));
            }
        }
        Ok(corners)
    }
}

#[cfg(test)]
#[path = "tests/deck_tests.rs"]
mod tests;
