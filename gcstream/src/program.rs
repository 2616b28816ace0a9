use crate::block::{parse_block, Block, ParseError, Position};
use crate::error::Error;
use crate::line_buffer::{Line, LineSegmenter, GCODE_BLOCK_SIZE};
use crate::link::Endpoint;
use log::{debug, warn};
use std::io::{self, Read};

/// A line that did not parse
#[derive(Debug, Clone, PartialEq)]
pub struct Malformed {
    pub source_line: u32,
    /// Line contents, lossily decoded
    pub text: String,
    pub error: ParseError,
}

/// A whole gcode file, parsed up front
///
/// Used for checking a file without a device attached. Lines are segmented and parsed exactly as
/// the flow controller would while streaming, so block indexes match what would be sent.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Program {
    blocks: Vec<Block>,
    malformed: Vec<Malformed>,
    // Index of the last parsed block, saturating at u32::MAX
    last_index: u32,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses one line and records the result
    pub fn push_line(&mut self, line: Line<'_>) {
        let position = Position {
            index: self.last_index.saturating_add(1),
            source_line: line.source_line,
        };
        match parse_block(line.text, position) {
            Ok(Some(block)) => {
                self.last_index = block.index();
                self.blocks.push(block);
            }
            Ok(None) => {}
            Err(error) => {
                let text = String::from_utf8_lossy(line.text).into_owned();
                warn!(
                    "line {}: skipping malformed block ({error}): \"{text}\"",
                    line.source_line
                );
                self.malformed.push(Malformed {
                    source_line: line.source_line,
                    text,
                    error,
                });
            }
        }
    }

    /// Reads and parses everything `reader` produces
    pub fn read_from(mut reader: impl Read) -> Result<Self, Error> {
        let mut program = Program::new();
        let mut segmenter = LineSegmenter::<GCODE_BLOCK_SIZE>::new();
        loop {
            let space = segmenter.receive_buffer()?;
            let n = match reader.read(space) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(Error::Transport {
                        endpoint: Endpoint::Input,
                        source,
                    })
                }
            };
            if n == 0 {
                break;
            }
            segmenter.advance(n);
            while let Some(line) = segmenter.next_line() {
                program.push_line(line);
            }
            segmenter.compact();
        }
        if let Some(line) = segmenter.finish() {
            program.push_line(line);
        }
        debug!(
            "{} line(s), {} block(s), {} malformed",
            segmenter.lines_seen(),
            program.blocks.len(),
            program.malformed.len()
        );
        Ok(program)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn malformed(&self) -> &[Malformed] {
        &self.malformed
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
