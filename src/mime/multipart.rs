//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Mimepipe.
//
// Mimepipe is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mimepipe is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mimepipe. If not, see <http://www.gnu.org/licenses/>.

//! Multipart wire format (RFC 2046 section 5.1).
//!
//! `Reader` splits a multipart body into header and body pairs. `Writer`
//! produces the delimiters and part headers around bodies written into it.

use std::io::{self, BufRead, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::Rng;

use super::header::{read_header, Header};
use crate::support::error::Error;

#[cfg(not(test))]
const MAX_LINE: usize = 65536;
// Use a tiny line buffer in testing so that line splitting actually gets
// exercised.
#[cfg(test)]
const MAX_LINE: usize = 32;
// Room after the boundary on a delimiter line for the closing `--`,
// trailing whitespace and the line ending.
const DELIMITER_SLACK: usize = 24;

const DEFAULT_MAX_HEADER_BYTES: usize = 65536;

/// Reads the parts of a multipart body.
///
/// The body starts with an optional preamble, which is discarded, and ends
/// at the closing delimiter; anything after that is ignored.
#[derive(Debug)]
pub struct Reader<R> {
    inner: Arc<Mutex<Inner<R>>>,
    max_header_bytes: usize,
}

/// The body of one part, as returned by `Reader::next_part`.
///
/// This shares the underlying input with the reader that produced it. Once
/// the reader moves on to the next part, this reads as empty.
#[derive(Debug)]
pub struct PartBody<R> {
    inner: Arc<Mutex<Inner<R>>>,
    part: u64,
}

#[derive(Debug)]
struct Inner<R> {
    input: R,
    /// The boundary with the leading `--`.
    delimiter: Vec<u8>,
    state: State,
    /// The 1-based index of the current part.
    part: u64,

    line: Vec<u8>,
    /// Set if the previous physical line was cut at a CR, which then starts
    /// the next one.
    wrapped_cr: bool,
    /// Whether the next line starts after a line ending, i.e., could be a
    /// delimiter.
    at_line_start: bool,
    /// The line ending of the last line passed to the body. It belongs to
    /// the body only if something other than a delimiter follows it.
    held_line_ending: &'static [u8],

    /// Body data ready to be read.
    pending: Vec<u8>,
    off: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Preamble,
    Body,
    AtDelimiter { is_final: bool },
    Done,
}

impl<R: BufRead> Reader<R> {
    /// Read the multipart body in `input`, which is delimited by `boundary`.
    pub fn new(input: R, boundary: &str) -> Self {
        let mut delimiter = Vec::with_capacity(boundary.len() + 2);
        delimiter.extend_from_slice(b"--");
        delimiter.extend_from_slice(boundary.as_bytes());

        Reader {
            inner: Arc::new(Mutex::new(Inner {
                input,
                delimiter,
                state: State::Preamble,
                part: 0,
                line: Vec::new(),
                wrapped_cr: false,
                at_line_start: true,
                held_line_ending: b"",
                pending: Vec::new(),
                off: 0,
            })),
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
        }
    }

    /// Set the largest header block, in bytes, any one part may have.
    pub fn with_max_header_bytes(mut self, max_header_bytes: usize) -> Self {
        self.max_header_bytes = max_header_bytes;
        self
    }

    /// Advance to the next part.
    ///
    /// Whatever remains of the current part is skipped. Returns `None` once
    /// the closing delimiter has been consumed.
    pub fn next_part(
        &mut self,
    ) -> Result<Option<(Header, PartBody<R>)>, Error> {
        let mut inner = lock(&self.inner);

        loop {
            match inner.state {
                State::Preamble | State::Body => {
                    inner.pending.clear();
                    inner.off = 0;
                    inner.advance_line()?;
                },
                State::AtDelimiter { is_final: true } | State::Done => {
                    inner.state = State::Done;
                    inner.pending.clear();
                    return Ok(None);
                },
                State::AtDelimiter { is_final: false } => break,
            }
        }

        let header = read_header(&mut inner.input, self.max_header_bytes)?;
        inner.part += 1;
        inner.state = State::Body;
        inner.at_line_start = true;
        inner.held_line_ending = b"";

        Ok(Some((
            header,
            PartBody {
                inner: Arc::clone(&self.inner),
                part: inner.part,
            },
        )))
    }
}

// A panic while holding the lock cannot leave the state inconsistent in a
// way that matters more than the panic itself.
fn lock<R>(inner: &Mutex<Inner<R>>) -> MutexGuard<'_, Inner<R>> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<R: BufRead> Inner<R> {
    /// Consume one line of input in the preamble or a part body.
    ///
    /// Either enters `AtDelimiter` or leaves the decoded content of the line
    /// in `pending`.
    fn advance_line(&mut self) -> Result<(), Error> {
        let truncated = self.read_line()?;
        if self.line.is_empty() {
            return Err(Error::UnexpectedEof);
        }

        let could_be_delimiter = self.at_line_start && !truncated;
        self.at_line_start = self.line.ends_with(b"\n");

        if could_be_delimiter {
            if let Some(is_final) = self.delimiter_kind() {
                self.state = State::AtDelimiter { is_final };
                self.held_line_ending = b"";
                return Ok(());
            }
        }

        let (content_len, ending) = if self.line.ends_with(b"\r\n") {
            (self.line.len() - 2, &b"\r\n"[..])
        } else if self.line.ends_with(b"\n") {
            (self.line.len() - 1, &b"\n"[..])
        } else {
            (self.line.len(), &b""[..])
        };

        if State::Body == self.state {
            self.pending.clear();
            self.off = 0;
            self.pending.extend_from_slice(self.held_line_ending);
            self.pending.extend_from_slice(&self.line[..content_len]);
        }
        self.held_line_ending = ending;
        Ok(())
    }

    /// Read the next physical line into `line`.
    ///
    /// Returns whether the line was cut short because it was too long.
    fn read_line(&mut self) -> io::Result<bool> {
        self.line.clear();
        if self.wrapped_cr {
            self.line.push(b'\r');
            self.wrapped_cr = false;
        }

        // A delimiter line must always fit, however long the boundary
        let limit = MAX_LINE.max(self.delimiter.len() + DELIMITER_SLACK);
        let nread = self
            .input
            .by_ref()
            .take(limit as u64)
            .read_until(b'\n', &mut self.line)?;
        let truncated = limit == nread && !self.line.ends_with(b"\n");

        // A CR at the cut could be the start of the CRLF before a
        // delimiter, so it must not be handed to the body yet.
        if truncated && self.line.ends_with(b"\r") {
            self.line.pop();
            self.wrapped_cr = true;
        }

        Ok(truncated)
    }

    /// If `line` is a delimiter line, return whether it is the closing
    /// delimiter.
    fn delimiter_kind(&self) -> Option<bool> {
        let rest = self.line.strip_prefix(&self.delimiter[..])?;
        let (is_final, rest) = match rest.strip_prefix(b"--") {
            Some(rest) => (true, rest),
            None => (false, rest),
        };

        if rest
            .iter()
            .all(|&b| b' ' == b || b'\t' == b || b'\r' == b || b'\n' == b)
        {
            Some(is_final)
        } else {
            None
        }
    }

    fn read_body(&mut self, dst: &mut [u8]) -> Result<usize, Error> {
        loop {
            if self.off < self.pending.len() {
                let len = dst.len().min(self.pending.len() - self.off);
                dst[..len]
                    .copy_from_slice(&self.pending[self.off..self.off + len]);
                self.off += len;
                return Ok(len);
            }

            if State::Body != self.state || dst.is_empty() {
                return Ok(0);
            }

            self.advance_line()?;
        }
    }
}

impl<R: BufRead> Read for PartBody<R> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let mut inner = lock(&self.inner);
        if self.part != inner.part {
            return Ok(0);
        }

        Ok(inner.read_body(dst)?)
    }
}

/// Generate a random boundary.
pub fn random_boundary() -> String {
    let bytes: [u8; 30] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

// RFC 2046 "bchars"
fn is_valid_boundary(boundary: &str) -> bool {
    (1..=70).contains(&boundary.len())
        && !boundary.ends_with(' ')
        && boundary.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"'()+_,-./:=? ".contains(&b)
        })
}

/// Writes the framing of a multipart body.
///
/// Each part is started with `create_part`; its body is then written through
/// the returned `PartWriter`. `finish` writes the closing delimiter.
#[derive(Debug)]
pub struct Writer<W> {
    w: W,
    boundary: String,
    any_parts: bool,
}

impl<W: Write> Writer<W> {
    /// Create a writer using the boundary of the Content-Type in `header`.
    ///
    /// Nothing is written yet; in particular, `header` itself is not.
    pub fn new(w: W, header: &Header) -> Result<Self, Error> {
        let content_type = header.content_type();
        let boundary = content_type
            .as_ref()
            .and_then(|ct| ct.boundary())
            .ok_or(Error::NoBoundary)?;
        Self::with_boundary(w, boundary)
    }

    pub fn with_boundary(w: W, boundary: &str) -> Result<Self, Error> {
        if !is_valid_boundary(boundary) {
            return Err(Error::InvalidBoundary);
        }

        Ok(Writer {
            w,
            boundary: boundary.to_owned(),
            any_parts: false,
        })
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Start a new part with the given header.
    pub fn create_part(
        &mut self,
        header: &Header,
    ) -> io::Result<PartWriter<'_, W>> {
        if self.any_parts {
            write!(self.w, "\r\n--{}\r\n", self.boundary)?;
        } else {
            write!(self.w, "--{}\r\n", self.boundary)?;
        }
        self.any_parts = true;

        header.write_to(&mut self.w)?;
        self.w.write_all(b"\r\n")?;
        Ok(PartWriter { w: &mut self.w })
    }

    /// Write the closing delimiter and flush.
    pub fn finish(mut self) -> io::Result<W> {
        if self.any_parts {
            write!(self.w, "\r\n--{}--\r\n", self.boundary)?;
        } else {
            write!(self.w, "--{}--\r\n", self.boundary)?;
        }
        self.w.flush()?;
        Ok(self.w)
    }
}

/// Receives the body of one part.
#[derive(Debug)]
pub struct PartWriter<'a, W> {
    w: &'a mut W,
}

impl<W: Write> Write for PartWriter<'_, W> {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        self.w.write(src)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.w.flush()
    }
}
