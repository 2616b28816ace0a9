use core::fmt;
use std::{io, time::Duration};

/// One side of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Input,
    Device,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Endpoint::Input => "input",
            Endpoint::Device => "device",
        })
    }
}

/// Result of a readiness wait
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub input: bool,
    pub device: bool,
}

/// Trait representing the two byte streams the flow controller moves data between
///
/// Implementations own the input source and the device connection. All methods are called from
/// the streaming loop only.
pub trait Link {
    /// Blocks until the device, or the input when `watch_input` is set, has data to read
    ///
    /// Returns with nothing ready once `timeout` expires or when interrupted by a signal.
    fn wait(&mut self, watch_input: bool, timeout: Option<Duration>) -> io::Result<Readiness>;

    /// Reads from the input source; `Ok(0)` is end of input
    fn read_input(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Reads whatever the device has sent; `Ok(0)` means nothing was available
    fn read_device(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes all of `data` to the device
    fn write_device(&mut self, data: &[u8]) -> io::Result<()>;

    /// Waits for written data to leave the device's output queue
    fn flush_device(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T> Link for &mut T
where
    T: Link + ?Sized,
{
    fn wait(&mut self, watch_input: bool, timeout: Option<Duration>) -> io::Result<Readiness> {
        (**self).wait(watch_input, timeout)
    }

    fn read_input(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_input(buf)
    }

    fn read_device(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_device(buf)
    }

    fn write_device(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).write_device(data)
    }

    fn flush_device(&mut self) -> io::Result<()> {
        (**self).flush_device()
    }
}
