use std::time::Duration;
use thiserror::Error;

use crate::frame::FrameError;
use crate::port::PortSettings;

/// Errors surfaced to users of the transport.
///
/// Decode failures and transient port faults are absorbed by the session
/// retry loop and only show up here as [`Error::CommunicationTimeout`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("{port_name:?} already open with {existing}, requested {requested}")]
    Conflict {
        port_name: String,
        existing: PortSettings,
        requested: PortSettings,
    },
    #[error("no valid response after {attempts} attempts ({elapsed:?})")]
    CommunicationTimeout { attempts: u32, elapsed: Duration },
    #[error("{port_name:?} busy")]
    ResourceBusy { port_name: String },
    #[error("serial port enumeration not supported on this platform")]
    UnsupportedPlatform,
    #[error("failed to open {port_name:?}: {reason}")]
    Open { port_name: String, reason: String },
    #[error(transparent)]
    Frame(#[from] FrameError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
