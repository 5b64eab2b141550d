pub mod command;
pub mod error;
pub mod model;
pub mod motion;
pub mod properties;
pub mod simulated;
pub mod supervisor;
pub mod sync;
pub mod transport;

pub use command::CommandChannel;
pub use error::{DuetError, Result};
pub use model::{AxisLimits, MachineModel, ToolOffset};
pub use motion::{MotionController, MoveTarget, Position};
pub use simulated::SimulatedMachine;
pub use supervisor::{ConnectionSupervisor, SupervisorConfig};
pub use sync::{ModelHandle, ModelSynchronizer};
pub use transport::{CommandTransport, Deployment, StateFeed, TransportConnector};
