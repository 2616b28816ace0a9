use thiserror::Error;

/// Capacity of the pending-input buffer, the conventional maximum length of a gcode line
pub const GCODE_BLOCK_SIZE: usize = 256;

/// A complete line handed out by [`LineSegmenter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line<'a> {
    /// Line contents without the terminator
    pub text: &'a [u8],
    /// 1-based line number in the input
    pub source_line: u32,
}

/// A line did not fit the pending-input buffer before its terminator was seen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("line {source_line} does not fit the {capacity} byte input buffer")]
pub struct LineTooLong {
    pub source_line: u32,
    pub capacity: usize,
}

/// Line segmenter
///
/// Turns an arbitrarily chunked byte stream into complete lines. Bytes are read straight into
/// the free part of the buffer (see [`receive_buffer`](Self::receive_buffer) and
/// [`advance`](Self::advance)), complete lines are pulled with [`next_line`](Self::next_line)
/// and the consumed prefix is dropped with [`compact`](Self::compact). Whatever follows the last
/// terminator stays buffered until more data arrives.
///
/// Both `\n` and `\r` terminate a line, and a `\r\n` pair counts once even if the two halves
/// arrive in separate reads. A line body may be up to `BUF_SIZE` bytes long; the terminator is
/// not stored.
pub struct LineSegmenter<const BUF_SIZE: usize = GCODE_BLOCK_SIZE> {
    buffer: [u8; BUF_SIZE],
    used: usize,
    consumed: usize,
    scanned: usize,
    after_cr: bool,
    source_line: u32,
    // Receives the byte following a line that fills the whole buffer
    spill: [u8; 1],
    // Terminator that arrived in `spill`
    full_line_end: Option<u8>,
    overflowed: bool,
}

impl<const BUF_SIZE: usize> LineSegmenter<BUF_SIZE> {
    pub const fn new() -> Self {
        LineSegmenter {
            buffer: [0u8; BUF_SIZE],
            used: 0,
            consumed: 0,
            scanned: 0,
            after_cr: false,
            source_line: 0,
            spill: [0u8; 1],
            full_line_end: None,
            overflowed: false,
        }
    }

    /// Longest line body the buffer holds, terminator excluded
    pub const fn capacity(&self) -> usize {
        BUF_SIZE
    }

    /// Checks whether any bytes are waiting to be handed out
    pub fn is_empty(&self) -> bool {
        self.consumed == self.used
    }

    /// Bytes received but not yet handed out as part of a line
    pub fn pending(&self) -> &[u8] {
        &self.buffer[self.consumed..self.used]
    }

    /// Number of lines handed out so far
    pub fn lines_seen(&self) -> u32 {
        self.source_line
    }

    /// Returns the non-filled part of the buffer, to read new input into
    ///
    /// All complete lines should have been taken with `next_line` first. When a single line fills
    /// the whole buffer, a one byte slice is returned for its terminator; if anything else arrives
    /// there, the line is too long and there is no way to make progress without losing data.
    pub fn receive_buffer(&mut self) -> Result<&mut [u8], LineTooLong> {
        if self.overflowed {
            return Err(LineTooLong {
                source_line: self.source_line + 1,
                capacity: BUF_SIZE,
            });
        }
        if self.used == BUF_SIZE {
            self.compact();
        }
        if self.used == BUF_SIZE {
            return Ok(&mut self.spill);
        }
        Ok(&mut self.buffer[self.used..])
    }

    /// Marks `n` bytes of the receive buffer as filled
    pub fn advance(&mut self, n: usize) {
        if self.used < BUF_SIZE {
            self.used = (self.used + n).min(BUF_SIZE);
        } else if n > 0 {
            match self.spill[0] {
                b @ (b'\n' | b'\r') => self.full_line_end = Some(b),
                _ => self.overflowed = true,
            }
        }
    }

    /// Returns the next complete line, if a terminator has been received for it
    pub fn next_line(&mut self) -> Option<Line<'_>> {
        while self.scanned < self.used {
            let b = self.buffer[self.scanned];
            if self.after_cr {
                self.after_cr = false;
                if b == b'\n' {
                    // Second half of a CRLF pair
                    self.scanned += 1;
                    self.consumed = self.scanned;
                    continue;
                }
            }
            if b == b'\n' || b == b'\r' {
                let start = self.consumed;
                let end = self.scanned;
                self.scanned += 1;
                self.consumed = self.scanned;
                self.after_cr = b == b'\r';
                self.source_line += 1;
                return Some(Line {
                    text: &self.buffer[start..end],
                    source_line: self.source_line,
                });
            }
            self.scanned += 1;
        }
        if let Some(b) = self.full_line_end.take() {
            let start = self.consumed;
            self.consumed = self.used;
            self.after_cr = b == b'\r';
            self.source_line += 1;
            return Some(Line {
                text: &self.buffer[start..self.used],
                source_line: self.source_line,
            });
        }
        None
    }

    /// Drops the bytes of lines already handed out
    ///
    /// This moves the remaining partial line down to the start of the buffer, linear in its
    /// length.
    pub fn compact(&mut self) {
        if self.consumed == 0 {
            return;
        }
        self.buffer.copy_within(self.consumed..self.used, 0);
        self.used -= self.consumed;
        self.scanned -= self.consumed;
        self.consumed = 0;
    }

    /// Appends `chunk`, calling `on_line` for every line it completes
    ///
    /// Chunks of any size are accepted; lines are yielded while copying so the buffer only ever
    /// needs to hold a single partial line.
    pub fn feed(
        &mut self,
        mut chunk: &[u8],
        mut on_line: impl FnMut(Line<'_>),
    ) -> Result<(), LineTooLong> {
        loop {
            while let Some(line) = self.next_line() {
                on_line(line);
            }
            if chunk.is_empty() {
                self.compact();
                return Ok(());
            }
            let space = self.receive_buffer()?;
            let n = space.len().min(chunk.len());
            space[..n].copy_from_slice(&chunk[..n]);
            self.advance(n);
            chunk = &chunk[n..];
        }
    }

    /// Ends the input, returning any unterminated remainder as a final line
    ///
    /// Call once `next_line` has returned `None`.
    pub fn finish(&mut self) -> Option<Line<'_>> {
        self.after_cr = false;
        if self.consumed == self.used {
            return None;
        }
        let start = self.consumed;
        self.scanned = self.used;
        self.consumed = self.used;
        self.source_line += 1;
        Some(Line {
            text: &self.buffer[start..self.used],
            source_line: self.source_line,
        })
    }
}

impl<const BUF_SIZE: usize> Default for LineSegmenter<BUF_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect<const N: usize>(seg: &mut LineSegmenter<N>, chunk: &[u8]) -> Vec<(String, u32)> {
        let mut lines = Vec::new();
        seg.feed(chunk, |line| {
            lines.push((
                String::from_utf8_lossy(line.text).into_owned(),
                line.source_line,
            ))
        })
        .unwrap();
        lines
    }

    #[test]
    fn line_completes_on_third_chunk() {
        let mut seg = LineSegmenter::<GCODE_BLOCK_SIZE>::new();
        assert!(collect(&mut seg, b"G1 ").is_empty());
        assert!(collect(&mut seg, b"X1").is_empty());
        assert_eq!(collect(&mut seg, b"\n"), vec![("G1 X1".to_string(), 1)]);
        assert!(seg.is_empty());
    }

    #[test]
    fn several_lines_in_one_chunk() {
        let mut seg = LineSegmenter::<GCODE_BLOCK_SIZE>::new();
        let lines = collect(&mut seg, b"G1 X10 Y20\nG1 X5\nG1");
        assert_eq!(
            lines,
            vec![("G1 X10 Y20".to_string(), 1), ("G1 X5".to_string(), 2)]
        );
        assert_eq!(seg.pending(), b"G1");
    }

    #[test]
    fn crlf_counts_once_even_when_split() {
        let mut seg = LineSegmenter::<GCODE_BLOCK_SIZE>::new();
        assert_eq!(collect(&mut seg, b"A\r"), vec![("A".to_string(), 1)]);
        assert_eq!(collect(&mut seg, b"\nB\r\n"), vec![("B".to_string(), 2)]);
        assert!(seg.is_empty());
    }

    #[test]
    fn empty_lines_are_kept() {
        let mut seg = LineSegmenter::<GCODE_BLOCK_SIZE>::new();
        let lines = collect(&mut seg, b"\n\r\rX\n");
        assert_eq!(
            lines,
            vec![
                ("".to_string(), 1),
                ("".to_string(), 2),
                ("".to_string(), 3),
                ("X".to_string(), 4)
            ]
        );
    }

    #[test]
    fn finish_returns_remainder() {
        let mut seg = LineSegmenter::<GCODE_BLOCK_SIZE>::new();
        assert_eq!(collect(&mut seg, b"G0\nM2"), vec![("G0".to_string(), 1)]);
        let last = seg.finish().unwrap();
        assert_eq!(last.text, b"M2");
        assert_eq!(last.source_line, 2);
        assert!(seg.finish().is_none());
    }

    #[test]
    fn finish_after_terminator_is_empty() {
        let mut seg = LineSegmenter::<GCODE_BLOCK_SIZE>::new();
        collect(&mut seg, b"G0\r\n");
        assert!(seg.finish().is_none());
    }

    #[test]
    fn overlong_line_is_rejected() {
        let mut seg = LineSegmenter::<8>::new();
        assert_eq!(collect(&mut seg, b"ABCDEFG\n"), vec![("ABCDEFG".to_string(), 1)]);
        let err = seg.feed(b"ABCDEFGHI\n", |_| {}).unwrap_err();
        assert_eq!(
            err,
            LineTooLong {
                source_line: 2,
                capacity: 8
            }
        );
    }

    #[test]
    fn line_filling_the_buffer_is_accepted() {
        let mut seg = LineSegmenter::<8>::new();
        assert_eq!(
            collect(&mut seg, b"G1X12345\nM2\n"),
            vec![("G1X12345".to_string(), 1), ("M2".to_string(), 2)]
        );

        let mut seg = LineSegmenter::<8>::new();
        assert_eq!(collect(&mut seg, b"G1X12345\r"), vec![("G1X12345".to_string(), 1)]);
        assert_eq!(collect(&mut seg, b"\nM2\n"), vec![("M2".to_string(), 2)]);
    }

    #[test]
    fn line_filling_the_buffer_at_end_of_input() {
        let mut seg = LineSegmenter::<8>::new();
        assert_eq!(collect(&mut seg, b"G0\nG1X12345"), vec![("G0".to_string(), 1)]);
        // Room is left for the read that reports end of input
        assert_eq!(seg.receive_buffer().unwrap().len(), 1);
        let last = seg.finish().unwrap();
        assert_eq!(last.text, b"G1X12345");
        assert_eq!(last.source_line, 2);
    }

    #[test]
    fn one_byte_past_capacity_is_rejected() {
        let mut seg = LineSegmenter::<8>::new();
        let err = seg.feed(b"G1X123456\n", |_| {}).unwrap_err();
        assert_eq!(
            err,
            LineTooLong {
                source_line: 1,
                capacity: 8
            }
        );
        assert!(seg.receive_buffer().is_err());
    }

    #[test]
    fn chunk_larger_than_capacity() {
        let mut seg = LineSegmenter::<8>::new();
        let lines = collect(&mut seg, b"G1 X1\nG1 X2\nG1 X3\nG1 X4\n");
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[3], ("G1 X4".to_string(), 4));
    }

    #[test]
    fn read_in_place() {
        let mut seg = LineSegmenter::<16>::new();
        let space = seg.receive_buffer().unwrap();
        assert_eq!(space.len(), 16);
        space[..4].copy_from_slice(b"M2\nG");
        seg.advance(4);
        assert_eq!(seg.next_line().map(|l| l.text.to_vec()), Some(b"M2".to_vec()));
        assert!(seg.next_line().is_none());
        seg.compact();
        assert_eq!(seg.pending(), b"G");
        assert_eq!(seg.receive_buffer().unwrap().len(), 15);
    }
}
