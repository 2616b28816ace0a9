#![allow(dead_code)]

use gcstream::{ConfirmScanner, Link, Readiness, DEFAULT_ACK};
use std::{
    collections::VecDeque,
    io, thread,
    time::{Duration, Instant},
};

/// What the scripted device saw, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Sent(String),
    Acked,
}

/// In-memory link with a scripted input and a device that answers every line
///
/// Replies are queued per written line and released one per `wait` call, so the controller gets
/// to fill its in-flight window before acknowledgments arrive. A reply delay holds each reply back
/// until that long after its line was written.
pub struct ScriptedLink {
    input: VecDeque<Vec<u8>>,
    input_error: Option<io::Error>,
    reply: Option<Vec<u8>>,
    replies: VecDeque<(Instant, Vec<u8>)>,
    reply_delay: Duration,
    answer_limit: Option<usize>,
    device: VecDeque<u8>,
    device_chunk: usize,
    write_error_at: Option<usize>,
    scanner: ConfirmScanner,
    pub events: Vec<Event>,
    pub waits: usize,
    pub input_waits: usize,
    pub flushed: bool,
    pub max_in_flight: usize,
    acked: usize,
    sent: usize,
}

impl ScriptedLink {
    /// Input delivered as a single chunk, device acknowledging every line with `ok\r\n`
    pub fn new(input: &[u8]) -> Self {
        Self::chunked([input.to_vec()])
    }

    pub fn chunked(chunks: impl IntoIterator<Item = Vec<u8>>) -> Self {
        ScriptedLink {
            input: chunks.into_iter().collect(),
            input_error: None,
            reply: Some(DEFAULT_ACK.to_vec()),
            replies: VecDeque::new(),
            reply_delay: Duration::ZERO,
            answer_limit: None,
            device: VecDeque::new(),
            device_chunk: usize::MAX,
            write_error_at: None,
            scanner: ConfirmScanner::default(),
            events: Vec::new(),
            waits: 0,
            input_waits: 0,
            flushed: false,
            max_in_flight: 0,
            acked: 0,
            sent: 0,
        }
    }

    /// Device that never answers
    pub fn silent(mut self) -> Self {
        self.reply = None;
        self
    }

    pub fn reply_with(mut self, reply: &[u8]) -> Self {
        self.reply = Some(reply.to_vec());
        self
    }

    /// Answers each line only after `delay`
    pub fn reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = delay;
        self
    }

    /// Stops answering after the first `n` lines
    pub fn answer_first(mut self, n: usize) -> Self {
        self.answer_limit = Some(n);
        self
    }

    /// Bytes the device sends before any line has been written
    pub fn with_unsolicited(mut self, bytes: &[u8]) -> Self {
        self.device.extend(bytes);
        self
    }

    /// Hands device output over at most `n` bytes per read
    pub fn device_chunk(mut self, n: usize) -> Self {
        self.device_chunk = n;
        self
    }

    /// Fails the input once the scripted chunks are used up
    pub fn input_error(mut self, error: io::Error) -> Self {
        self.input_error = Some(error);
        self
    }

    /// Fails the write of the `n`th line, counting from 0
    pub fn write_error_at(mut self, n: usize) -> Self {
        self.write_error_at = Some(n);
        self
    }

    /// Lines written to the device, terminators included
    pub fn writes(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Sent(line) => Some(line.clone()),
                Event::Acked => None,
            })
            .collect()
    }
}

impl Link for ScriptedLink {
    fn wait(&mut self, watch_input: bool, timeout: Option<Duration>) -> io::Result<Readiness> {
        self.waits += 1;
        if watch_input {
            self.input_waits += 1;
        }
        let now = Instant::now();
        if matches!(self.replies.front(), Some((due, _)) if *due <= now) {
            if let Some((_, reply)) = self.replies.pop_front() {
                self.device.extend(reply);
            }
        }
        let ready = Readiness {
            input: watch_input,
            device: !self.device.is_empty(),
        };
        if ready == Readiness::default() {
            let mut nap = timeout.unwrap_or(Duration::from_millis(10));
            if let Some((due, _)) = self.replies.front() {
                nap = nap.min(due.saturating_duration_since(now));
            }
            thread::sleep(nap);
        }
        Ok(ready)
    }

    fn read_input(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut chunk = match self.input.pop_front() {
            Some(chunk) => chunk,
            None => {
                return match self.input_error.take() {
                    Some(e) => Err(e),
                    None => Ok(0),
                }
            }
        };
        let n = buf.len().min(chunk.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.input.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    fn read_device(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.device_chunk).min(self.device.len());
        for (dst, src) in buf.iter_mut().zip(self.device.drain(..n)) {
            *dst = src;
        }
        for _ in 0..self.scanner.scan(&buf[..n]) {
            self.acked += 1;
            self.events.push(Event::Acked);
        }
        Ok(n)
    }

    fn write_device(&mut self, data: &[u8]) -> io::Result<()> {
        if self.write_error_at == Some(self.sent) {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.sent += 1;
        self.events
            .push(Event::Sent(String::from_utf8_lossy(data).into_owned()));
        let answered = self.answer_limit.map_or(true, |limit| self.sent <= limit);
        match &self.reply {
            Some(reply) if answered => self
                .replies
                .push_back((Instant::now() + self.reply_delay, reply.clone())),
            _ => {}
        }
        self.max_in_flight = self
            .max_in_flight
            .max(self.sent.saturating_sub(self.acked));
        Ok(())
    }

    fn flush_device(&mut self) -> io::Result<()> {
        self.flushed = true;
        Ok(())
    }
}
