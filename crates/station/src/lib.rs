pub mod coordinates;
pub mod deck;
pub mod error;
pub mod executor;
pub mod sonicator;
pub mod station;

pub use coordinates::{MappingError, PlateGeometry, Point, WellIndex, WellMapper};
pub use deck::{CleaningConfig, DeckConfiguration, PlateConfig};
pub use error::{Result, StationError};
pub use executor::{OperationRegistry, ProtocolExecutor, ProtocolStep};
pub use sonicator::{PulsedSonicator, SimulatedOutput, SonicationParams, Sonicator};
pub use station::{SonicateWellArgs, SonicationStation};
