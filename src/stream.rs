//! Chunk-boundary-safe splitting of a byte stream into records.
//!
//! Subprocess stdout arrives in arbitrary chunks: a record separator, or the
//! bytes of one multi-byte character, can straddle a chunk boundary. The
//! [`RecordStream`] carries undecoded trailing bytes and unterminated record
//! text across pushes so the handler only ever sees complete records in the
//! active encoding.

use std::cell::Cell;

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("record separator must not be empty")]
    EmptySeparator,
    #[error("record separator regex must not match the empty string: {pattern:?}")]
    BadSeparator { pattern: String },
    #[error("invalid separator regex: {0}")]
    BadPattern(#[from] regex::Error),
}

/// A separator occurrence located by a [`Separator::Scanner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SepMatch {
    pub start: usize,
    pub len: usize,
}

/// How records are delimited: a literal string, a regex, or a caller-supplied
/// scanner returning the next separator occurrence.
pub enum Separator {
    Literal(String),
    Regex(Regex),
    Scanner(Box<dyn FnMut(&str) -> Option<SepMatch> + Send>),
}

impl Separator {
    pub fn literal(sep: impl Into<String>) -> Result<Self, StreamError> {
        let sep = sep.into();
        if sep.is_empty() {
            return Err(StreamError::EmptySeparator);
        }
        Ok(Separator::Literal(sep))
    }

    /// NUL-separated records, as produced by `git`'s `-z` modes.
    pub fn nul() -> Self {
        Separator::Literal("\0".to_owned())
    }

    /// Newline-separated records.
    pub fn newline() -> Self {
        Separator::Literal("\n".to_owned())
    }

    /// A regex separator. A pattern that can match the empty string would
    /// make the stream spin without consuming input, so it is rejected.
    pub fn regex(pattern: &str) -> Result<Self, StreamError> {
        Self::from_regex(Regex::new(pattern)?)
    }

    pub fn from_regex(regex: Regex) -> Result<Self, StreamError> {
        if regex.is_match("") {
            return Err(StreamError::BadSeparator {
                pattern: regex.as_str().to_owned(),
            });
        }
        Ok(Separator::Regex(regex))
    }

    pub fn scanner(scan: impl FnMut(&str) -> Option<SepMatch> + Send + 'static) -> Self {
        Separator::Scanner(Box::new(scan))
    }

    /// Locate the next separator in `text` as `(start, byte length)`.
    fn find(&mut self, text: &str) -> Option<(usize, usize)> {
        let found = match self {
            Separator::Literal(sep) => text.find(sep.as_str()).map(|at| (at, sep.len())),
            Separator::Regex(regex) => regex.find(text).map(|m| (m.start(), m.len())),
            Separator::Scanner(scan) => scan(text).map(|m| (m.start, m.len)),
        };
        // A zero-width occurrence cannot consume input; treat it as absent.
        found.filter(|&(_, len)| len > 0)
    }
}

/// Cooperative stop signal handed to every record handler. Once signalled,
/// the stream drops all further input.
#[derive(Debug, Default)]
pub struct StopToken(Cell<bool>);

impl StopToken {
    pub fn stop(&self) {
        self.0.set(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.get()
    }
}

/// Character encodings the stream can decode. The encoding may change
/// mid-stream; switching flushes the current decoder's residue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    Latin1,
}

/// Splits pushed byte chunks into records and feeds them to a handler.
pub struct RecordStream<'h> {
    separator: Separator,
    encoding: Encoding,
    /// Decoded text not yet emitted as a record.
    carry: String,
    /// Undecoded trailing bytes of an incomplete UTF-8 scalar.
    pending: Vec<u8>,
    handler: Box<dyn FnMut(&str, &StopToken) + 'h>,
    stop: StopToken,
    finished: bool,
}

impl<'h> RecordStream<'h> {
    pub fn new(
        separator: Separator,
        encoding: Encoding,
        handler: impl FnMut(&str, &StopToken) + 'h,
    ) -> Self {
        RecordStream {
            separator,
            encoding,
            carry: String::new(),
            pending: Vec::new(),
            handler: Box::new(handler),
            stop: StopToken::default(),
            finished: false,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Feed one chunk of raw bytes. Ignored after a stop or a flush.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.finished || self.stop.is_stopped() {
            return;
        }
        self.decode(chunk);
        self.emit_complete();
    }

    /// Switch the decoding for subsequent chunks. Residual bytes of the old
    /// decoder are flushed (lossily) into the carryover first.
    pub fn set_encoding(&mut self, encoding: Encoding) {
        self.flush_pending();
        self.encoding = encoding;
    }

    /// Terminal flush: emits any non-empty carryover as a final record.
    /// Further pushes are ignored.
    pub fn flush(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if self.stop.is_stopped() {
            return;
        }
        self.flush_pending();
        self.emit_complete();
        if !self.stop.is_stopped() && !self.carry.is_empty() {
            let last = std::mem::take(&mut self.carry);
            (self.handler)(&last, &self.stop);
        }
    }

    fn decode(&mut self, chunk: &[u8]) {
        match self.encoding {
            Encoding::Latin1 => {
                // Latin-1 is a 1:1 byte-to-scalar mapping; nothing ever pends.
                self.carry.extend(chunk.iter().map(|&b| b as char));
            }
            Encoding::Utf8 => {
                let mut buf = std::mem::take(&mut self.pending);
                buf.extend_from_slice(chunk);
                let mut input = buf.as_slice();
                while !input.is_empty() {
                    match std::str::from_utf8(input) {
                        Ok(text) => {
                            self.carry.push_str(text);
                            break;
                        }
                        Err(err) => {
                            let (valid, rest) = input.split_at(err.valid_up_to());
                            self.carry
                                .push_str(std::str::from_utf8(valid).expect("validated prefix"));
                            match err.error_len() {
                                Some(bad) => {
                                    self.carry.push(char::REPLACEMENT_CHARACTER);
                                    input = &rest[bad..];
                                }
                                None => {
                                    // Incomplete scalar at the end of the
                                    // chunk; keep its bytes for the next push.
                                    self.pending = rest.to_vec();
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    fn flush_pending(&mut self) {
        if !self.pending.is_empty() {
            let residue = std::mem::take(&mut self.pending);
            self.carry.push_str(&String::from_utf8_lossy(&residue));
        }
    }

    fn emit_complete(&mut self) {
        while !self.stop.is_stopped() {
            let Some((start, len)) = self.separator.find(&self.carry) else {
                break;
            };
            {
                let record = &self.carry[..start];
                (self.handler)(record, &self.stop);
            }
            self.carry.drain(..start + len);
        }
    }
}
