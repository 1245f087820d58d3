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

//! Streaming Content-Transfer-Encoding conversion.

use std::io::{self, BufRead, Read, Write};

use super::header::ContentTransferEncoding as CTE;
use super::quoted_printable::{qp_decode_line, QpEncoder};

/// Input bytes per base64 output line (76 characters).
const BASE64_LINE_INPUT: usize = 57;
/// The most that is read from the underlying reader for one decode step.
const MAX_CHUNK: u64 = 65536;

/// Decodes a transfer-encoded stream.
///
/// Base64 decoding skips everything outside the base64 alphabet and tolerates
/// missing padding at the end. Quoted-printable decoding never fails. The
/// identity encodings pass data through unchanged.
#[derive(Debug)]
pub struct DecodingReader<R> {
    inner: R,
    encoding: CTE,
    input: Vec<u8>,
    output: Vec<u8>,
    off: usize,
    eof: bool,
}

impl<R: BufRead> DecodingReader<R> {
    pub fn new(inner: R, encoding: CTE) -> Self {
        DecodingReader {
            inner,
            encoding,
            input: Vec::new(),
            output: Vec::new(),
            off: 0,
            eof: false,
        }
    }

    fn refill(&mut self) -> io::Result<()> {
        self.output.clear();
        self.off = 0;

        match self.encoding {
            CTE::Base64 => self.refill_base64(),
            CTE::QuotedPrintable => self.refill_qp(),
            CTE::SevenBit | CTE::EightBit | CTE::Binary => {
                let buf = self.inner.fill_buf()?;
                self.eof = buf.is_empty();
                self.output.extend_from_slice(buf);
                let len = buf.len();
                self.inner.consume(len);
                Ok(())
            },
        }
    }

    fn refill_base64(&mut self) -> io::Result<()> {
        let buf = self.inner.fill_buf()?;
        if buf.is_empty() {
            self.eof = true;
            // Tolerate missing padding. A single dangling character carries
            // no complete byte and is dropped.
            if self.input.len() % 4 >= 2 {
                while 0 != self.input.len() % 4 {
                    self.input.push(b'=');
                }
            } else {
                self.input.clear();
            }
        } else {
            let len = buf.len();
            self.input
                .extend(buf.iter().copied().filter(|&b| is_base64(b)));
            self.inner.consume(len);
        }

        let usable = self.input.len() / 4 * 4;
        base64::decode_config_buf(
            &self.input[..usable],
            base64::STANDARD,
            &mut self.output,
        )
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.input.drain(..usable);
        Ok(())
    }

    fn refill_qp(&mut self) -> io::Result<()> {
        let nread = self
            .inner
            .by_ref()
            .take(MAX_CHUNK)
            .read_until(b'\n', &mut self.input)?;
        if 0 == nread {
            self.eof = true;
            self.output.append(&mut self.input);
            return Ok(());
        }

        let consumed = qp_decode_line(&self.input, &mut self.output);
        self.input.drain(..consumed);
        Ok(())
    }
}

fn is_base64(b: u8) -> bool {
    match b {
        b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'+' | b'/' | b'=' => true,
        _ => false,
    }
}

impl<R: BufRead> Read for DecodingReader<R> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.off < self.output.len() {
                let len = dst.len().min(self.output.len() - self.off);
                dst[..len]
                    .copy_from_slice(&self.output[self.off..self.off + len]);
                self.off += len;
                return Ok(len);
            }

            if self.eof || dst.is_empty() {
                return Ok(0);
            }

            self.refill()?;
        }
    }
}

/// Applies a transfer encoding to everything written through it.
///
/// `finish` must be called after the last write; it flushes state held back
/// by the encoder.
#[derive(Debug)]
pub struct EncodingWriter<W> {
    inner: W,
    encoding: CTE,
    pending: Vec<u8>,
    qp: QpEncoder,
    qp_buf: Vec<u8>,
    base64_buf: String,
}

impl<W: Write> EncodingWriter<W> {
    pub fn new(inner: W, encoding: CTE) -> Self {
        EncodingWriter {
            inner,
            encoding,
            pending: Vec::new(),
            qp: QpEncoder::new(),
            qp_buf: Vec::new(),
            base64_buf: String::new(),
        }
    }

    /// Write out whatever the encoder has held back and return the
    /// underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        match self.encoding {
            CTE::Base64 => {
                if !self.pending.is_empty() {
                    self.base64_buf.clear();
                    base64::encode_config_buf(
                        &self.pending,
                        base64::STANDARD,
                        &mut self.base64_buf,
                    );
                    self.base64_buf.push_str("\r\n");
                    self.inner.write_all(self.base64_buf.as_bytes())?;
                    self.pending.clear();
                }
            },
            CTE::QuotedPrintable => {
                self.qp_buf.clear();
                self.qp.finish(&mut self.qp_buf);
                self.inner.write_all(&self.qp_buf)?;
            },
            CTE::SevenBit | CTE::EightBit | CTE::Binary => (),
        }

        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for EncodingWriter<W> {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        match self.encoding {
            CTE::SevenBit | CTE::EightBit | CTE::Binary => {
                self.inner.write(src)
            },

            CTE::Base64 => {
                self.pending.extend_from_slice(src);
                if self.pending.len() >= BASE64_LINE_INPUT {
                    self.base64_buf.clear();
                    let whole = self.pending.len() / BASE64_LINE_INPUT
                        * BASE64_LINE_INPUT;
                    for line in
                        self.pending[..whole].chunks(BASE64_LINE_INPUT)
                    {
                        base64::encode_config_buf(
                            line,
                            base64::STANDARD,
                            &mut self.base64_buf,
                        );
                        self.base64_buf.push_str("\r\n");
                    }
                    self.pending.drain(..whole);
                    self.inner.write_all(self.base64_buf.as_bytes())?;
                }
                Ok(src.len())
            },

            CTE::QuotedPrintable => {
                self.qp_buf.clear();
                self.qp.encode(src, &mut self.qp_buf);
                self.inner.write_all(&self.qp_buf)?;
                Ok(src.len())
            },
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
