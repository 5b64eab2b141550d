use std::path::PathBuf;

use duet_client::DuetError;
use thiserror::Error;

use crate::coordinates::MappingError;

#[derive(Debug, Error)]
pub enum StationError {
    #[error(transparent)]
    Motion(#[from] DuetError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error("step {index}: `{name}` is not a protocol operation")]
    UnknownOperation { name: String, index: usize },
    #[error("invalid arguments for `{operation}`: {source}")]
    InvalidArguments {
        operation: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("deck plate {0} is not configured")]
    PlateNotConfigured(u32),
    #[error("deck plate {0} has not been fully taught")]
    PlateNotTaught(u32),
    #[error("deck index {0} is outside the deck")]
    InvalidDeckIndex(u32),
    #[error("plates with {0} wells are not supported")]
    UnsupportedWellCount(u32),
    #[error("teach point {0} does not exist; plates have corners 0, 1 and 2")]
    InvalidCorner(usize),
    #[error("a safe_z height must be defined first")]
    SafeZUndefined,
    #[error("no cleaning protocol is configured")]
    CleaningNotConfigured,
    #[error("a cleaning protocol cannot start another clean")]
    CleaningInProgress,
    #[error("{name} of {value} mm is outside the reachable range 0..={max} mm")]
    InvalidHeight {
        name: &'static str,
        value: f64,
        max: f64,
    },
    #[error("plunge depth is too deep (plunge height {plunge_height} mm)")]
    PlungeTooDeep { plunge_height: f64 },
    #[error("`{0}` is not a well on this plate")]
    InvalidWell(String),
    #[error("invalid sonication settings: {0}")]
    InvalidSonication(String),
    #[error("no deck configuration path was given or remembered")]
    NoDeckPath,
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = StationError> = std::result::Result<T, E>;
