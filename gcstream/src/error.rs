use crate::line_buffer::LineTooLong;
use crate::link::Endpoint;
use std::{io, path::PathBuf, time::Duration};
use thiserror::Error;

/// Fatal errors of a streaming session
///
/// Malformed lines and unexpected acknowledgments are not in here: they are logged and counted
/// in the [`Summary`](crate::Summary) and streaming carries on.
#[derive(Debug, Error)]
pub enum Error {
    /// The serial device could not be set up
    #[error("could not open serial device {}", path.display())]
    DeviceOpen {
        path: PathBuf,
        #[source]
        reason: DeviceOpenError,
    },

    /// Reading or writing one side of the link failed
    #[error("{endpoint} I/O failed")]
    Transport {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },

    /// Waiting for either side to become ready failed
    #[error("waiting for input or device failed")]
    Wait(#[source] io::Error),

    #[error(transparent)]
    LineTooLong(#[from] LineTooLong),

    /// The device stopped acknowledging lines
    #[error(
        "timed out after {}ms waiting for receipt confirmation ({unconfirmed} line(s) unconfirmed)",
        timeout.as_millis()
    )]
    ConfirmationTimeout {
        timeout: Duration,
        unconfirmed: usize,
    },

    /// Streaming was interrupted by the operator
    #[error("interrupted")]
    Cancelled,
}

/// Why a serial device could not be opened
#[derive(Debug, Error)]
pub enum DeviceOpenError {
    #[error("unsupported serial line speed {0}")]
    UnsupportedSpeed(u32),
    #[error("invalid serial device")]
    Invalid(#[source] nix::Error),
    #[error("unable to apply a necessary setting to the serial device")]
    Setting(#[source] nix::Error),
}
