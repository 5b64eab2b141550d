//! Well positions from three taught reference points.
//!
//! The plate is modelled as a rigid, evenly spaced grid: the first row runs
//! from `a` (row 0, column 0) to `b` (row 0, last column) and the last column
//! runs from `b` to `c` (last row, last column). Rotation is the average of
//! the two angle estimates those edges give.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn distance_to(self, other: Point) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlateGeometry {
    pub rows: u32,
    pub columns: u32,
}

/// Supported plates by well count.
pub const PLATE_CATALOGUE: [(u32, PlateGeometry); 5] = [
    (96, PlateGeometry { rows: 8, columns: 12 }),
    (48, PlateGeometry { rows: 6, columns: 8 }),
    (24, PlateGeometry { rows: 4, columns: 6 }),
    (12, PlateGeometry { rows: 3, columns: 4 }),
    (6, PlateGeometry { rows: 2, columns: 3 }),
];

impl PlateGeometry {
    pub fn for_well_count(well_count: u32) -> Option<Self> {
        PLATE_CATALOGUE
            .iter()
            .find(|(count, _)| *count == well_count)
            .map(|(_, geometry)| *geometry)
    }
}

/// Zero-based well address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WellIndex {
    pub row: u32,
    pub column: u32,
}

impl WellIndex {
    pub fn new(row: u32, column: u32) -> Self {
        Self { row, column }
    }

    /// `row_letter` is `A` for the first row, `column` counts from 1.
    pub fn from_parts(row_letter: &str, column: u32) -> Option<Self> {
        let mut letters = row_letter.trim().chars();
        let letter = letters.next()?.to_ascii_uppercase();
        if letters.next().is_some() || !letter.is_ascii_uppercase() || column == 0 {
            return None;
        }
        Some(Self::new(u32::from(letter) - u32::from('A'), column - 1))
    }

    /// Parses labels such as `A1` or `h12`.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        let split = label.find(|c: char| c.is_ascii_digit())?;
        let (row, column) = label.split_at(split);
        Self::from_parts(row, column.parse().ok()?)
    }

    pub fn label(&self) -> String {
        let letter = char::from_u32(u32::from('A') + self.row).unwrap_or('?');
        format!("{letter}{}", self.column + 1)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum MappingError {
    #[error(
        "well ({row}, {column}) is out of bounds for a plate with {rows} rows and {columns} columns"
    )]
    WellIndexOutOfBounds {
        row: u32,
        column: u32,
        rows: u32,
        columns: u32,
    },
    #[error("degenerate plate geometry: {0}")]
    DegenerateGeometry(String),
}

/// Affine map from well indices to machine XY.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WellMapper {
    origin: Point,
    geometry: PlateGeometry,
    x_spacing: f64,
    y_spacing: f64,
    theta: f64,
}

impl WellMapper {
    pub fn new(corners: [Point; 3], geometry: PlateGeometry) -> Result<Self, MappingError> {
        let [a, b, c] = corners;
        if geometry.rows < 2 || geometry.columns < 2 {
            return Err(MappingError::DegenerateGeometry(format!(
                "{}x{} grid has no spacing to measure",
                geometry.rows, geometry.columns
            )));
        }
        let width = a.distance_to(b);
        let height = b.distance_to(c);
        if width <= f64::EPSILON || height <= f64::EPSILON {
            return Err(MappingError::DegenerateGeometry(
                "reference points coincide".into(),
            ));
        }

        let theta_row = ((c.y - b.y) / height).clamp(-1.0, 1.0).acos();
        let theta_column = ((b.x - a.x) / width).clamp(-1.0, 1.0).acos();
        Ok(Self {
            origin: a,
            geometry,
            x_spacing: width / f64::from(geometry.columns - 1),
            y_spacing: height / f64::from(geometry.rows - 1),
            theta: (theta_row + theta_column) / 2.0,
        })
    }

    pub fn geometry(&self) -> PlateGeometry {
        self.geometry
    }

    pub fn well_position(&self, well: WellIndex) -> Result<Point, MappingError> {
        if well.row >= self.geometry.rows || well.column >= self.geometry.columns {
            return Err(MappingError::WellIndexOutOfBounds {
                row: well.row,
                column: well.column,
                rows: self.geometry.rows,
                columns: self.geometry.columns,
            });
        }
        let x_nominal = f64::from(well.column) * self.x_spacing;
        let y_nominal = f64::from(well.row) * self.y_spacing;
        let (sin, cos) = self.theta.sin_cos();
        Ok(Point {
            x: x_nominal * cos - y_nominal * sin + self.origin.x,
            y: x_nominal * sin + y_nominal * cos + self.origin.y,
        })
    }
}

#[cfg(test)]
#[path = "tests/coordinates_tests.rs"]
mod tests;
