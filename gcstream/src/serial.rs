use crate::error::{DeviceOpenError, Error};
use log::debug;
use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::sys::termios::{self, BaudRate, ControlFlags, SetArg, SpecialCharacterIndices};
use std::{
    fs::File,
    io::{self, Read, Write},
    os::unix::io::{AsRawFd, FromRawFd, RawFd},
    path::{Path, PathBuf},
};

/// Line speed used when none is given
pub const DEFAULT_SPEED: u32 = 19200;

/// Line speeds a device can be opened at
pub const SUPPORTED_SPEEDS: &[u32] = &[
    0, 50, 75, 110, 134, 150, 200, 300, 600, 1200, 1800, 2400, 4800, 9600, 19200, 38400, 57600,
    115200, 230400, 460800, 500000, 576000, 921600, 1000000, 1152000, 1500000, 2000000, 2500000,
    3000000, 3500000, 4000000,
];

/// Maps a numeric line speed to its termios representation
pub fn baud_rate(speed: u32) -> Option<BaudRate> {
    use BaudRate::*;
    Some(match speed {
        0 => B0,
        50 => B50,
        75 => B75,
        110 => B110,
        134 => B134,
        150 => B150,
        200 => B200,
        300 => B300,
        600 => B600,
        1200 => B1200,
        1800 => B1800,
        2400 => B2400,
        4800 => B4800,
        9600 => B9600,
        19200 => B19200,
        38400 => B38400,
        57600 => B57600,
        115200 => B115200,
        230400 => B230400,
        460800 => B460800,
        500000 => B500000,
        576000 => B576000,
        921600 => B921600,
        1000000 => B1000000,
        1152000 => B1152000,
        1500000 => B1500000,
        2000000 => B2000000,
        2500000 => B2500000,
        3000000 => B3000000,
        3500000 => B3500000,
        4000000 => B4000000,
        _ => return None,
    })
}

/// An open serial device in raw, non-blocking mode
///
/// The descriptor is closed on drop.
#[derive(Debug)]
pub struct SerialDevice {
    file: File,
    path: PathBuf,
}

impl SerialDevice {
    /// Opens and configures the device at `path`
    ///
    /// The line is switched to raw mode with `VMIN` and `VTIME` at zero, so reads never block
    /// on the transport level. `HUPCL` is cleared so closing the device does not drop DTR, which
    /// would reset boards with an Arduino style bootloader. `CRTSCTS` is cleared as well; with
    /// hardware flow control left on, a device that never raises CTS would stall writes and the
    /// drain on cancel.
    pub fn open(path: impl AsRef<Path>, speed: u32) -> Result<Self, Error> {
        let path = path.as_ref();
        let fail = |reason| Error::DeviceOpen {
            path: path.to_owned(),
            reason,
        };

        let baud = baud_rate(speed).ok_or_else(|| fail(DeviceOpenError::UnsupportedSpeed(speed)))?;
        let fd = fcntl::open(
            path,
            OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_NONBLOCK | OFlag::O_CLOEXEC,
            Mode::empty(),
        )
        .map_err(|e| fail(DeviceOpenError::Invalid(e)))?;
        // Safety: `fd` was just opened and is owned by nothing else
        let file = unsafe { File::from_raw_fd(fd) };

        let mut attrs =
            termios::tcgetattr(fd).map_err(|e| fail(DeviceOpenError::Invalid(e)))?;
        termios::cfmakeraw(&mut attrs);
        termios::cfsetspeed(&mut attrs, baud).map_err(|e| fail(DeviceOpenError::Setting(e)))?;
        attrs.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
        attrs.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        attrs
            .control_flags
            .remove(ControlFlags::HUPCL | ControlFlags::CRTSCTS);
        termios::tcsetattr(fd, SetArg::TCSANOW, &attrs)
            .map_err(|e| fail(DeviceOpenError::Setting(e)))?;

        debug!("opened {} at {speed} baud", path.display());
        Ok(SerialDevice {
            file,
            path: path.to_owned(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocks until all written data has been transmitted
    pub fn drain(&self) -> io::Result<()> {
        termios::tcdrain(self.as_raw_fd()).map_err(io::Error::from)
    }
}

impl AsRawFd for SerialDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl Read for SerialDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for SerialDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.drain()
    }
}
