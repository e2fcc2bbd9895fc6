//! Error codes reported by the engine.

use thiserror::Error;

/// Everything a machine, clock or option store can report.
///
/// Configuration and lifecycle errors come back from setters and never
/// escape the run loop; run-time recoverable conditions (failed load,
/// clock under-resolution, dropped save) are logged and execution
/// continues.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MachineError {
    #[error("the requested clock resolution is out of range or cannot be honoured by the host")]
    ClockResolution,
    #[error("unrecognised option key")]
    UnknownOption,
    #[error("no clock is attached to this machine")]
    NoClock,
    #[error("the machine is running")]
    Busy,
    #[error("an argument supplied to the method is invalid")]
    InvalidArgument,
    #[error("the JSON document failed to parse")]
    JsonParse,
    #[error("the JSON document is valid but its contents are not usable")]
    JsonConfig,
    #[error("the uuid in the state document does not match this machine")]
    IncompatibleUuid,
    #[error("the rom digest in the state document does not match this machine")]
    IncompatibleRom,
    #[error("the ram in the state document does not match this machine's layout")]
    IncompatibleRam,
    #[error("not implemented")]
    NotImplemented,
}
