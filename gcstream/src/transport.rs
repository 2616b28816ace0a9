use crate::block::{parse_block, strip, Position};
use crate::cancel::CancelToken;
use crate::confirm::{ConfirmScanner, DEFAULT_ACK};
use crate::error::Error;
use crate::line_buffer::{LineSegmenter, GCODE_BLOCK_SIZE};
use crate::link::{Endpoint, Link};
use log::{debug, info, trace, warn};
use std::time::{Duration, Instant};

/// Time to wait for an acknowledgment before giving up
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// Upper bound on a single readiness wait, so cancellation from another thread is seen quickly
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);
const DEVICE_READ_SIZE: usize = 128;

/// Streaming options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Lines that may be in flight without acknowledgment; 1 sends in lockstep
    pub max_unconfirmed: usize,
    /// How long to wait for the next acknowledgment while lines are in flight
    pub timeout: Duration,
    /// Remove whitespace and comments before transmission
    pub strip: bool,
    /// Token the device sends after each processed line
    pub ack_token: Vec<u8>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_unconfirmed: 1,
            timeout: DEFAULT_TIMEOUT,
            strip: false,
            ack_token: DEFAULT_ACK.to_vec(),
        }
    }
}

/// Flow controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Below the unconfirmed limit, input is read when available
    InputEligible,
    /// At the unconfirmed limit, input is left alone until the device catches up
    InputSuppressed,
    /// Input exhausted, waiting for the remaining acknowledgments
    Draining,
    /// Everything sent has been acknowledged
    Terminated,
    /// Stopped on a fatal error
    Aborted,
}

/// Counters describing a finished session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub lines_sent: usize,
    pub acknowledged: usize,
    /// Lines skipped because they did not parse
    pub malformed: usize,
    /// Acknowledgments received with nothing in flight
    pub spurious_acks: usize,
}

/// Flow controller
///
/// Streams lines from the input side of a [`Link`] to its device side, keeping at most
/// `max_unconfirmed` lines in flight. Every line is parsed before it is sent; lines that do not
/// parse are logged and skipped, and blank or comment-only lines are not sent at all. The device
/// receives the original text of each line followed by `\n`.
///
/// The loop blocks in exactly one place, [`Link::wait`]. Input is only waited on while below the
/// in-flight limit, so a device that stops acknowledging stops the input from being read.
pub struct FlowController<L: Link> {
    link: L,
    config: Config,
    cancel: CancelToken,
    segmenter: LineSegmenter<GCODE_BLOCK_SIZE>,
    scanner: ConfirmScanner,
    state: State,
    unconfirmed: usize,
    input_done: bool,
    // Start of the current wait for an acknowledgment
    waiting_since: Option<Instant>,
    next_index: u32,
    outgoing: Vec<u8>,
    summary: Summary,
}

impl<L: Link> FlowController<L> {
    pub fn new(link: L, mut config: Config, cancel: CancelToken) -> Self {
        if config.max_unconfirmed == 0 {
            warn!("max_unconfirmed must be at least 1, using 1");
            config.max_unconfirmed = 1;
        }
        let scanner = ConfirmScanner::new(config.ack_token.clone());
        FlowController {
            link,
            config,
            cancel,
            segmenter: LineSegmenter::new(),
            scanner,
            state: State::InputEligible,
            unconfirmed: 0,
            input_done: false,
            waiting_since: None,
            next_index: 1,
            outgoing: Vec::with_capacity(GCODE_BLOCK_SIZE + 1),
            summary: Summary::default(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Lines written to the device and not yet acknowledged
    pub fn unconfirmed(&self) -> usize {
        self.unconfirmed
    }

    pub fn summary(&self) -> Summary {
        self.summary
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn into_link(self) -> L {
        self.link
    }

    /// Streams until the input is exhausted and every line has been acknowledged
    ///
    /// On cancellation the device output queue is flushed on a best effort basis before
    /// returning [`Error::Cancelled`].
    pub fn run(&mut self) -> Result<Summary, Error> {
        let result = self.drive();
        match &result {
            Ok(()) => {
                self.state = State::Terminated;
                info!(
                    "all {} line(s) acknowledged",
                    self.summary.lines_sent
                );
            }
            Err(e) => {
                self.state = State::Aborted;
                if let Error::Cancelled = e {
                    if let Err(e) = self.link.flush_device() {
                        debug!("flushing device after interrupt failed: {e}");
                    }
                }
            }
        }
        result.map(|()| self.summary)
    }

    fn drive(&mut self) -> Result<(), Error> {
        loop {
            self.check_cancelled()?;

            // Lines held back by backpressure go before any new input
            self.send_pending()?;
            if self.state == State::Terminated {
                return Ok(());
            }
            self.check_timeout()?;

            let watch_input = self.state == State::InputEligible;
            let ready = self
                .link
                .wait(watch_input, Some(self.wait_timeout()))
                .map_err(Error::Wait)?;
            self.check_cancelled()?;

            if ready.device {
                self.receive_device()?;
            }
            if ready.input && watch_input {
                self.receive_input()?;
            }
        }
    }

    fn check_cancelled(&self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            warn!(
                "interrupted with {} line(s) unconfirmed",
                self.unconfirmed
            );
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn check_timeout(&self) -> Result<(), Error> {
        match self.waiting_since {
            Some(since) if self.unconfirmed > 0 && since.elapsed() >= self.config.timeout => {
                Err(Error::ConfirmationTimeout {
                    timeout: self.config.timeout,
                    unconfirmed: self.unconfirmed,
                })
            }
            _ => Ok(()),
        }
    }

    fn wait_timeout(&self) -> Duration {
        match self.waiting_since {
            Some(since) if self.unconfirmed > 0 => CANCEL_POLL_INTERVAL
                .min(self.config.timeout.saturating_sub(since.elapsed())),
            _ => CANCEL_POLL_INTERVAL,
        }
    }

    fn update_state(&mut self) {
        let next = if self.input_done {
            if self.unconfirmed == 0 {
                State::Terminated
            } else {
                State::Draining
            }
        } else if self.unconfirmed >= self.config.max_unconfirmed {
            State::InputSuppressed
        } else {
            State::InputEligible
        };
        if next != self.state {
            debug!(
                "{:?} -> {:?} ({} unconfirmed)",
                self.state, next, self.unconfirmed
            );
            self.state = next;
        }
    }

    fn receive_device(&mut self) -> Result<(), Error> {
        let mut buf = [0u8; DEVICE_READ_SIZE];
        let n = self
            .link
            .read_device(&mut buf)
            .map_err(|source| Error::Transport {
                endpoint: Endpoint::Device,
                source,
            })?;
        if n == 0 {
            return Ok(());
        }
        trace!("<< {:?}", String::from_utf8_lossy(&buf[..n]));
        for _ in 0..self.scanner.scan(&buf[..n]) {
            self.acknowledge();
        }
        Ok(())
    }

    fn acknowledge(&mut self) {
        if self.unconfirmed == 0 {
            self.summary.spurious_acks += 1;
            warn!("acknowledgment received with no lines in flight, ignoring");
            return;
        }
        self.unconfirmed -= 1;
        self.summary.acknowledged += 1;
        self.waiting_since = (self.unconfirmed > 0).then(Instant::now);
        self.update_state();
    }

    fn receive_input(&mut self) -> Result<(), Error> {
        let space = self.segmenter.receive_buffer()?;
        let n = self
            .link
            .read_input(space)
            .map_err(|source| Error::Transport {
                endpoint: Endpoint::Input,
                source,
            })?;
        if n == 0 {
            return self.finish_input();
        }
        self.segmenter.advance(n);
        self.send_pending()
    }

    fn finish_input(&mut self) -> Result<(), Error> {
        let last = match self.segmenter.finish() {
            Some(line) => {
                self.outgoing.clear();
                self.outgoing.extend_from_slice(line.text);
                Some(line.source_line)
            }
            None => None,
        };
        if let Some(source_line) = last {
            debug!("line {source_line} has no terminator, sending it anyway");
            self.send_line(source_line)?;
        }
        self.input_done = true;
        debug!("end of input after {} line(s)", self.segmenter.lines_seen());
        self.update_state();
        Ok(())
    }

    fn send_pending(&mut self) -> Result<(), Error> {
        while self.state == State::InputEligible {
            let source_line = match self.segmenter.next_line() {
                Some(line) => {
                    self.outgoing.clear();
                    self.outgoing.extend_from_slice(line.text);
                    line.source_line
                }
                None => break,
            };
            self.send_line(source_line)?;
        }
        self.segmenter.compact();
        Ok(())
    }

    // Sends the line staged in `outgoing`
    fn send_line(&mut self, source_line: u32) -> Result<(), Error> {
        let position = Position {
            index: self.next_index,
            source_line,
        };
        match parse_block(&self.outgoing, position) {
            Ok(None) => return Ok(()),
            Ok(Some(block)) => {
                self.next_index = self.next_index.saturating_add(1);
                debug!("block {} (line {source_line}): {block}", block.index());
            }
            Err(e) => {
                self.summary.malformed += 1;
                warn!(
                    "line {source_line}: skipping malformed block ({e}): \"{}\"",
                    String::from_utf8_lossy(&self.outgoing)
                );
                return Ok(());
            }
        }

        if self.config.strip {
            self.outgoing = strip(&self.outgoing);
            if self.outgoing.is_empty() {
                return Ok(());
            }
        }
        self.outgoing.push(b'\n');
        trace!(">> {:?}", String::from_utf8_lossy(&self.outgoing));
        self.link
            .write_device(&self.outgoing)
            .map_err(|source| Error::Transport {
                endpoint: Endpoint::Device,
                source,
            })?;

        if self.unconfirmed == 0 {
            self.waiting_since = Some(Instant::now());
        }
        self.unconfirmed += 1;
        self.summary.lines_sent += 1;
        self.update_state();
        Ok(())
    }
}
