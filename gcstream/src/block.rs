use core::fmt;
use thiserror::Error;

/// Numeric part of a word
///
/// The representation follows the source text: a value written with a decimal point is a
/// `Float`, anything else is an `Int`. Command codes (`G1`, `M104`) are usually integers while
/// axis targets are often floats, so consumers get to tell them apart.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize), serde(untagged))]
pub enum Value {
    Int(i64),
    Float(f64),
}

impl Value {
    /// The value as a float, whatever its representation
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Int(v) => v as f64,
            Value::Float(v) => v,
        }
    }

    /// The value as an integer, if it was written as one
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::Int(v) => Some(v),
            Value::Float(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) if v.fract() == 0.0 => write!(f, "{v:.1}"),
            Value::Float(v) => write!(f, "{v}"),
        }
    }
}

/// A single letter/number pair, e.g. `X10.5`
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Word {
    /// Uppercase ASCII letter
    pub letter: char,
    pub value: Value,
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.letter, self.value)
    }
}

/// Where a block sits in its input stream
///
/// The parser only sees one line at a time, so this is supplied by whoever owns the stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// 1-based sequence number among the successfully parsed blocks
    pub index: u32,
    /// 1-based line number in the source
    pub source_line: u32,
}

/// One parsed gcode line
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Block {
    words: Vec<Word>,
    optional_delete: bool,
    line_number: Option<i64>,
    index: u32,
    source_line: u32,
}

impl Block {
    /// Words in source order
    pub fn words(&self) -> &[Word] {
        &self.words
    }

    /// True if the line started with `/`
    pub fn optional_delete(&self) -> bool {
        self.optional_delete
    }

    /// Explicit `N` line number, if present
    pub fn line_number(&self) -> Option<i64> {
        self.line_number
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn source_line(&self) -> u32 {
        self.source_line
    }

    /// Value of the last word with `letter`, which is the one that takes effect
    pub fn get(&self, letter: char) -> Option<Value> {
        let letter = letter.to_ascii_uppercase();
        self.words
            .iter()
            .rev()
            .find(|w| w.letter == letter)
            .map(|w| w.value)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";
        if self.optional_delete {
            f.write_str("/")?;
        }
        if let Some(n) = self.line_number {
            write!(f, "N{n}")?;
            sep = " ";
        }
        for w in &self.words {
            write!(f, "{sep}{w}")?;
            sep = " ";
        }
        Ok(())
    }
}

/// Reasons a line is not a valid block
///
/// Columns are 0-based byte offsets into the line handed to [`parse_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("word '{letter}' at column {column} has no number")]
    MissingNumber { letter: char, column: usize },
    #[error("malformed number at column {column}")]
    BadNumber { column: usize },
    #[error("unexpected byte {byte:#04x} at column {column}")]
    UnexpectedByte { byte: u8, column: usize },
    #[error("comment opened at column {column} is never closed")]
    UnterminatedComment { column: usize },
}

fn is_blank(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

fn column(line: &[u8], rest: &[u8]) -> usize {
    line.len() - rest.len()
}

/// Skips whitespace and comments, leaving `data` at the next meaningful byte
fn skip_blank(data: &mut &[u8], line: &[u8]) -> Result<(), ParseError> {
    loop {
        match data.first() {
            Some(b) if is_blank(*b) => *data = &data[1..],
            Some(b';') => *data = &[],
            Some(b'(') => match data.iter().position(|b| *b == b')') {
                Some(end) => *data = &data[end + 1..],
                None => {
                    return Err(ParseError::UnterminatedComment {
                        column: column(line, data),
                    })
                }
            },
            _ => return Ok(()),
        }
    }
}

/// Reads a number directly at the front of `data`
///
/// Returns `Ok(None)` without advancing if `data` does not start with a numeric character.
fn read_number(data: &mut &[u8], line: &[u8]) -> Result<Option<Value>, ParseError> {
    let start = *data;
    let column = column(line, start);
    let mut len = 0;
    if matches!(start.first(), Some(b'+' | b'-')) {
        len += 1;
    }
    let mut digits = 0;
    let mut points = 0;
    while let Some(&b) = start.get(len) {
        match b {
            b'0'..=b'9' => digits += 1,
            b'.' => points += 1,
            _ => break,
        }
        len += 1;
    }
    if len == 0 {
        return Ok(None);
    }
    if digits == 0 || points > 1 {
        return Err(ParseError::BadNumber { column });
    }

    // Only ASCII sign, digits and points were accepted above
    let text = core::str::from_utf8(&start[..len]).map_err(|_| ParseError::BadNumber { column })?;
    let value = if points == 0 {
        Value::Int(text.parse().map_err(|_| ParseError::BadNumber { column })?)
    } else {
        Value::Float(text.parse().map_err(|_| ParseError::BadNumber { column })?)
    };
    *data = &start[len..];
    Ok(Some(value))
}

/// Parses one line of gcode
///
/// `line` must not contain the line terminator, though stray whitespace including CR/LF is
/// tolerated. Returns `Ok(None)` for lines with nothing to do: empty, whitespace or comments.
pub fn parse_block(line: &[u8], position: Position) -> Result<Option<Block>, ParseError> {
    let mut data = line;

    skip_blank(&mut data, line)?;
    if data.is_empty() {
        return Ok(None);
    }

    let mut optional_delete = false;
    if data[0] == b'/' {
        optional_delete = true;
        data = &data[1..];
        skip_blank(&mut data, line)?;
    }

    let mut line_number = None;
    if let [b'N' | b'n', d, ..] = data {
        if d.is_ascii_digit() {
            data = &data[1..];
            let col = column(line, data);
            match read_number(&mut data, line)? {
                Some(Value::Int(n)) => line_number = Some(n),
                _ => return Err(ParseError::BadNumber { column: col }),
            }
            skip_blank(&mut data, line)?;
        }
    }

    let mut words = Vec::new();
    while let Some(&b) = data.first() {
        let col = column(line, data);
        if !b.is_ascii_alphabetic() {
            return Err(ParseError::UnexpectedByte {
                byte: b,
                column: col,
            });
        }
        let letter = b.to_ascii_uppercase() as char;
        data = &data[1..];
        let value = read_number(&mut data, line)?.ok_or(ParseError::MissingNumber {
            letter,
            column: col,
        })?;
        words.push(Word { letter, value });
        skip_blank(&mut data, line)?;
    }

    Ok(Some(Block {
        words,
        optional_delete,
        line_number,
        index: position.index,
        source_line: position.source_line,
    }))
}

/// Removes whitespace and comments from a line before transmission
///
/// An unterminated `(` comment runs to the end of the line.
pub fn strip(line: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len());
    let mut in_comment = false;
    for &b in line {
        match b {
            b')' if in_comment => in_comment = false,
            _ if in_comment => {}
            b'(' => in_comment = true,
            b';' => break,
            _ if is_blank(b) => {}
            _ => out.push(b),
        }
    }
    out
}
