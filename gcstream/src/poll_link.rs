use crate::link::{Link, Readiness};
use crate::serial::SerialDevice;
use log::trace;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use std::{
    fs::File,
    io::{self, Read, Write},
    os::unix::io::{AsRawFd, RawFd},
    path::Path,
    time::Duration,
};

// How long a device may refuse output before a write is abandoned
const WRITE_STALL_LIMIT_MS: i32 = 10_000;

/// Where gcode is read from
#[derive(Debug)]
pub enum InputSource {
    Stdin,
    File(File),
}

impl InputSource {
    /// Opens `path`, with `-` meaning standard input
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if path == Path::new("-") {
            Ok(InputSource::Stdin)
        } else {
            File::open(path).map(InputSource::File)
        }
    }

    /// True when reading from a terminal
    pub fn is_interactive(&self) -> bool {
        nix::unistd::isatty(self.as_raw_fd()).unwrap_or(false)
    }
}

impl AsRawFd for InputSource {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            InputSource::Stdin => io::stdin().as_raw_fd(),
            InputSource::File(f) => f.as_raw_fd(),
        }
    }
}

impl Read for InputSource {
    // Reads the descriptor directly: buffering here would hide data from `poll`
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::read(self.as_raw_fd(), buf) {
                Err(Errno::EINTR) => continue,
                other => return other.map_err(io::Error::from),
            }
        }
    }
}

fn poll_timeout(timeout: Option<Duration>) -> i32 {
    match timeout {
        // Round up so a wait never ends before the deadline it was computed for
        Some(t) => ((t.as_micros() + 999) / 1000).min(i32::MAX as u128) as i32,
        None => -1,
    }
}

fn is_readable(fd: &PollFd) -> bool {
    fd.revents().map_or(false, |r| {
        r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
    })
}

/// [`Link`] between an input source and a serial device, driven by `poll(2)`
pub struct PollLink {
    device: SerialDevice,
    input: InputSource,
    device_hangup: bool,
}

impl PollLink {
    pub fn new(device: SerialDevice, input: InputSource) -> Self {
        PollLink {
            device,
            input,
            device_hangup: false,
        }
    }

    pub fn device(&self) -> &SerialDevice {
        &self.device
    }

    fn wait_writable(&self) -> io::Result<()> {
        let mut fds = [PollFd::new(self.device.as_raw_fd(), PollFlags::POLLOUT)];
        match poll(&mut fds, WRITE_STALL_LIMIT_MS) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "device is not accepting data",
            )),
            Ok(_) | Err(Errno::EINTR) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Link for PollLink {
    fn wait(&mut self, watch_input: bool, timeout: Option<Duration>) -> io::Result<Readiness> {
        let mut fds = [
            PollFd::new(self.device.as_raw_fd(), PollFlags::POLLIN),
            PollFd::new(self.input.as_raw_fd(), PollFlags::POLLIN),
        ];
        let count = if watch_input { 2 } else { 1 };
        match poll(&mut fds[..count], poll_timeout(timeout)) {
            Ok(_) => {}
            // A signal arrived; report nothing ready so the caller can look at its cancel token
            Err(Errno::EINTR) => return Ok(Readiness::default()),
            Err(e) => return Err(e.into()),
        }
        self.device_hangup = fds[0]
            .revents()
            .map_or(false, |r| r.contains(PollFlags::POLLHUP));
        Ok(Readiness {
            device: is_readable(&fds[0]),
            input: watch_input && is_readable(&fds[1]),
        })
    }

    fn read_input(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }

    fn read_device(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.device.read(buf) {
            Ok(0) if self.device_hangup => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "device hung up",
            )),
            Ok(n) => Ok(n),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn write_device(&mut self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            match self.device.write(data) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => data = &data[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    trace!("device output full, waiting");
                    self.wait_writable()?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn flush_device(&mut self) -> io::Result<()> {
        self.device.drain()
    }
}
