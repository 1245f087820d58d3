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

/// The longest encoded line, not counting the line ending.
const MAX_LINE: usize = 76;

/// Decodes one line of quoted-printable text, as described by RFC 2045, into
/// `dst`.
///
/// `line` may end with a line ending, in which case it is a complete line:
/// transport padding before the ending is dropped, and a soft line break
/// (trailing `=`) is removed together with the line ending. Otherwise the line
/// is a fragment of a longer one.
///
/// This never fails. Invalid escape sequences are passed through untouched,
/// as are 8-bit characters.
///
/// Returns the number of bytes of `line` consumed. Anything not consumed is
/// an escape sequence cut off at the end of a fragment and must be prepended
/// to the next input.
pub fn qp_decode_line(line: &[u8], dst: &mut Vec<u8>) -> usize {
    let (content, ending) = if line.ends_with(b"\r\n") {
        (&line[..line.len() - 2], &b"\r\n"[..])
    } else if line.ends_with(b"\n") {
        (&line[..line.len() - 1], &b"\n"[..])
    } else {
        (line, &b""[..])
    };

    let content = if ending.is_empty() {
        content
    } else {
        let end = content
            .iter()
            .rposition(|&b| b' ' != b && b'\t' != b)
            .map_or(0, |p| p + 1);
        &content[..end]
    };

    let mut rest = content;
    while let Some(eq) = memchr::memchr(b'=', rest) {
        dst.extend_from_slice(&rest[..eq]);
        let escape = &rest[eq + 1..];

        if escape.is_empty() {
            if ending.is_empty() {
                // Could be the start of an escape or a soft line break
                return line.len() - 1;
            }
            // Soft line break
            return line.len();
        }

        if escape.len() < 2 && ending.is_empty() {
            return line.len() - 1 - escape.len();
        }

        match escape.get(..2).and_then(hex_byte) {
            Some(byte) => {
                dst.push(byte);
                rest = &escape[2..];
            },
            None => {
                dst.push(b'=');
                rest = escape;
            },
        }
    }

    dst.extend_from_slice(rest);
    dst.extend_from_slice(ending);
    line.len()
}

fn hex_byte(digits: &[u8]) -> Option<u8> {
    fn nybble(d: u8) -> Option<u8> {
        match d {
            b'0'..=b'9' => Some(d - b'0'),
            b'A'..=b'F' => Some(d - b'A' + 10),
            b'a'..=b'f' => Some(d - b'a' + 10),
            _ => None,
        }
    }

    Some(nybble(digits[0])? << 4 | nybble(digits[1])?)
}

/// Incremental quoted-printable encoder.
///
/// CRLF pairs in the input become hard line breaks; every other control
/// character, including lone CR and LF, is escaped, so any byte string
/// survives a round trip through `qp_decode_line`.
#[derive(Debug, Default)]
pub struct QpEncoder {
    line_len: usize,
    pending_cr: bool,
    pending_ws: Option<u8>,
}

impl QpEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `src`, appending the result to `dst`.
    ///
    /// Some input may be held back until it is known whether it precedes a
    /// line break; `finish` emits it.
    pub fn encode(&mut self, src: &[u8], dst: &mut Vec<u8>) {
        for &byte in src {
            self.push(byte, dst);
        }
    }

    /// Emit anything held back.
    pub fn finish(&mut self, dst: &mut Vec<u8>) {
        if self.pending_cr {
            self.pending_cr = false;
            if let Some(ws) = self.pending_ws.take() {
                self.literal(ws, dst);
            }
            self.escaped(b'\r', dst);
        }

        // Whitespace at the very end must be protected from being taken as
        // transport padding.
        if let Some(ws) = self.pending_ws.take() {
            self.escaped(ws, dst);
        }
    }

    fn push(&mut self, byte: u8, dst: &mut Vec<u8>) {
        if self.pending_cr {
            self.pending_cr = false;
            if b'\n' == byte {
                if let Some(ws) = self.pending_ws.take() {
                    self.escaped(ws, dst);
                }
                dst.extend_from_slice(b"\r\n");
                self.line_len = 0;
                return;
            }

            if let Some(ws) = self.pending_ws.take() {
                self.literal(ws, dst);
            }
            self.escaped(b'\r', dst);
        }

        if b'\r' == byte {
            self.pending_cr = true;
            return;
        }

        if let Some(ws) = self.pending_ws.take() {
            self.literal(ws, dst);
        }

        match byte {
            b' ' | b'\t' => self.pending_ws = Some(byte),
            b'=' => self.escaped(byte, dst),
            b'!'..=b'~' => self.literal(byte, dst),
            _ => self.escaped(byte, dst),
        }
    }

    fn literal(&mut self, byte: u8, dst: &mut Vec<u8>) {
        self.make_room(1, dst);
        dst.push(byte);
        self.line_len += 1;
    }

    fn escaped(&mut self, byte: u8, dst: &mut Vec<u8>) {
        const HEX: &[u8; 16] = b"0123456789ABCDEF";

        self.make_room(3, dst);
        dst.push(b'=');
        dst.push(HEX[(byte >> 4) as usize]);
        dst.push(HEX[(byte & 0xF) as usize]);
        self.line_len += 3;
    }

    // Leave space for the `=` of a soft line break
    fn make_room(&mut self, len: usize, dst: &mut Vec<u8>) {
        if self.line_len + len > MAX_LINE - 1 {
            dst.extend_from_slice(b"=\r\n");
            self.line_len = 0;
        }
    }
}
