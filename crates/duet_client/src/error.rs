use std::time::Duration;

use shared::{domain::Axis, error::FrameError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DuetError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("not connected to the machine")]
    NotConnected,
    #[error("firmware rejected `{command}`: {reply}")]
    RemoteCommand { command: String, reply: String },
    #[error("unexpected reply to `{command}`: {reply}")]
    UnexpectedReply { command: String, reply: String },
    #[error("machine must first be homed (unhomed axes: {})", join_axes(.axes))]
    NotHomed { axes: Vec<Axis> },
    #[error("move did not complete within {timeout:?}")]
    MoveTimedOut { timeout: Duration },
    #[error("reconnecting failed after {attempts} attempts")]
    ReconnectFailed { attempts: u32 },
    #[error("cannot home unknown axis `{0}`")]
    InvalidAxis(char),
    #[error("machine model is missing `{0}`")]
    MissingModelField(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

pub type Result<T, E = DuetError> = std::result::Result<T, E>;

fn join_axes(axes: &[Axis]) -> String {
    axes.iter()
        .map(|axis| axis.letter().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
