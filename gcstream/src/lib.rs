//! gcstream streams gcode to a serial-attached machine controller
//!
//! Most hobby CNC and 3D printer firmwares read gcode one line at a time from a serial port and
//! answer every processed line with a short acknowledgment, usually `ok`. They buffer only a few
//! lines, so a host that simply writes a file to the port will overrun them. gcstream sends lines
//! only as fast as the device confirms them.
//!
//! The pieces are usable on their own:
//!
//!   * [`parse_block`] parses a single line into a [`Block`]
//!   * [`LineSegmenter`] turns a chunked byte stream into lines
//!   * [`ConfirmScanner`] counts acknowledgment tokens in the device's output
//!   * [`FlowController`] ties these together over a [`Link`]
//!
//! Parsing a line:
//! ```
//! use gcstream::{parse_block, Position, Value};
//!
//! let block = parse_block(b"G1 X10 Y20.5 ; move", Position::default())
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(block.get('Y'), Some(Value::Float(20.5)));
//! assert_eq!(block.to_string(), "G1 X10 Y20.5");
//! ```
//!
//! Streaming a file to a device is done by wrapping an opened [`SerialDevice`] and an
//! [`InputSource`] in a [`PollLink`], and running a [`FlowController`] over it:
//! ```no_run
//! use gcstream::{CancelToken, Config, FlowController, InputSource, PollLink, SerialDevice};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let device = SerialDevice::open("/dev/ttyUSB0", 115200)?;
//!     let input = InputSource::open("part.gcode")?;
//!     let config = Config {
//!         max_unconfirmed: 4,
//!         ..Config::default()
//!     };
//!     let mut controller =
//!         FlowController::new(PollLink::new(device, input), config, CancelToken::new());
//!     let summary = controller.run()?;
//!     println!("{} line(s) sent", summary.lines_sent);
//!     Ok(())
//! }
//! ```
//!
//! With `max_unconfirmed` at 1 the controller runs in lockstep, waiting for each acknowledgment
//! before sending the next line. Higher values keep the device's receive buffer fed; they must not
//! exceed the number of lines the firmware can queue.
//!
//! The [`CancelToken`] passed to the controller can be set from another thread or a signal
//! handler. The controller notices within a few tens of milliseconds, flushes the device and
//! returns [`Error::Cancelled`].
//!
//! Anything that can wait for and move bytes can stand in for the serial port by implementing
//! [`Link`]. This is how the controller is tested without hardware.

mod block;
mod cancel;
mod confirm;
mod error;
mod line_buffer;
mod link;
mod poll_link;
mod program;
mod serial;
mod transport;

pub use block::{parse_block, strip, Block, ParseError, Position, Value, Word};
pub use cancel::CancelToken;
pub use confirm::{ConfirmScanner, DEFAULT_ACK};
pub use error::{DeviceOpenError, Error};
pub use line_buffer::{Line, LineSegmenter, LineTooLong, GCODE_BLOCK_SIZE};
pub use link::{Endpoint, Link, Readiness};
pub use poll_link::{InputSource, PollLink};
pub use program::{Malformed, Program};
pub use serial::{baud_rate, SerialDevice, DEFAULT_SPEED, SUPPORTED_SPEEDS};
pub use transport::{Config, FlowController, State, Summary, DEFAULT_TIMEOUT};
