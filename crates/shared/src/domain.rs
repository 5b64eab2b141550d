use std::fmt;

use serde::{Deserialize, Serialize};

/// Tool index reported by the firmware when no tool is held.
pub const NO_TOOL: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
    U,
}

impl Axis {
    /// Object model order of the motion axes.
    pub const ALL: [Axis; 4] = [Axis::X, Axis::Y, Axis::Z, Axis::U];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
            Axis::U => 3,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
            Axis::U => 'U',
        }
    }

    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'X' => Some(Axis::X),
            'Y' => Some(Axis::Y),
            'Z' => Some(Axis::Z),
            'U' => Some(Axis::U),
            _ => None,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Per-axis homed flags, X Y Z U.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HomingState([bool; 4]);

impl HomingState {
    pub fn new(flags: [bool; 4]) -> Self {
        Self(flags)
    }

    pub fn all_homed() -> Self {
        Self([true; 4])
    }

    pub fn is_homed(&self, axis: Axis) -> bool {
        self.0[axis.index()]
    }

    pub fn set(&mut self, axis: Axis, homed: bool) {
        self.0[axis.index()] = homed;
    }

    pub fn all(&self) -> bool {
        self.0.iter().all(|homed| *homed)
    }

    pub fn missing<'a>(&self, axes: impl IntoIterator<Item = &'a Axis>) -> Vec<Axis> {
        axes.into_iter()
            .copied()
            .filter(|axis| !self.is_homed(*axis))
            .collect()
    }

    pub fn flags(&self) -> [bool; 4] {
        self.0
    }
}

/// Firmware-reported machine status (`state.status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MachineStatus {
    Idle,
    Busy,
    Processing,
    Paused,
    Pausing,
    Resuming,
    Cancelling,
    ChangingTool,
    Simulating,
    Halted,
    Off,
    Starting,
    Updating,
    Disconnected,
    #[serde(other)]
    Unknown,
}

impl MachineStatus {
    pub fn is_idle(self) -> bool {
        matches!(self, MachineStatus::Idle)
    }
}
