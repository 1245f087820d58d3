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

//! MIME header blocks and the few header fields that multipart handling needs
//! to understand.

use std::fmt;
use std::io::{self, BufRead, Read, Write};
use std::iter::FromIterator;

use nom::{
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, multispace0},
    combinator::{map, opt},
    error::ErrorKind,
    multi::many0,
    sequence::{preceded, separated_pair, tuple},
    IResult,
};

use crate::support::error::Error;

/// An ordered list of header fields.
///
/// Field names are matched case-insensitively but are stored and written as
/// given. Fields are written in the order they were added.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    fields: Vec<(String, String)>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field, keeping any existing fields of the same name.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Replace all fields named `name` with a single field.
    ///
    /// The new field takes the position of the first old one, or goes at the
    /// end if there was none.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .fields
            .iter()
            .position(|&(ref n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some(ix) => {
                let mut i = 0;
                self.fields.retain(|&(ref n, _)| {
                    let keep = i <= ix || !n.eq_ignore_ascii_case(&name);
                    i += 1;
                    keep
                });
                self.fields[ix] = (name, value);
            },
            None => self.fields.push((name, value)),
        }
    }

    /// Remove all fields named `name`.
    pub fn del(&mut self, name: &str) {
        self.fields.retain(|&(ref n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Return the value of the first field named `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| v.as_str())
    }

    /// Return the values of all fields named `name`, in order.
    pub fn get_all<'a, 'n>(
        &'a self,
        name: &'n str,
    ) -> impl Iterator<Item = &'a str> + 'n
    where
        'a: 'n,
    {
        self.fields
            .iter()
            .filter(move |&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| v.as_str())
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|&(ref n, ref v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Write every field as `Name: value` followed by CRLF.
    ///
    /// The blank line which terminates a header block is not written.
    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        for &(ref name, ref value) in &self.fields {
            write!(w, "{}: {}\r\n", name, value)?;
        }
        Ok(())
    }

    /// Parse the first Content-Type field, if there is one and it is
    /// understood.
    pub fn content_type(&self) -> Option<ContentType> {
        self.get("Content-Type").and_then(parse_content_type)
    }

    pub fn set_content_type(&mut self, ct: &ContentType) {
        self.set("Content-Type", ct.to_string());
    }

    /// Parse the Content-Transfer-Encoding field.
    ///
    /// Returns `None` if there is no such field, and `Some(Err(name))` if
    /// the encoding is not known.
    pub fn content_transfer_encoding(
        &self,
    ) -> Option<Result<ContentTransferEncoding, String>> {
        self.get("Content-Transfer-Encoding").map(|value| {
            parse_content_transfer_encoding(value)
                .ok_or_else(|| value.trim().to_owned())
        })
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Header {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Header {
            fields: iter
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }
}

/// Read a header block up to and including the blank line which ends it.
///
/// Continuation lines are unfolded into the preceding field. Both DOS and
/// UNIX line endings are accepted. `max_bytes` bounds the raw size of the
/// block.
pub fn read_header(
    r: &mut impl BufRead,
    max_bytes: usize,
) -> Result<Header, Error> {
    let mut header = Header::new();
    let mut total = 0usize;
    let mut line = Vec::new();
    let mut current: Option<Vec<u8>> = None;

    loop {
        line.clear();
        let limit = max_bytes.saturating_sub(total) as u64 + 1;
        r.by_ref().take(limit).read_until(b'\n', &mut line)?;
        total += line.len();
        if total > max_bytes {
            return Err(Error::HeaderTooLong);
        }

        if line.is_empty() {
            return Err(Error::UnexpectedEof);
        }

        if b"\r\n" == &line[..] || b"\n" == &line[..] {
            if let Some(field) = current.take() {
                push_field(&mut header, &field)?;
            }
            return Ok(header);
        }

        let content = strip_line_ending(&line);
        if line.starts_with(b" ") || line.starts_with(b"\t") {
            match current {
                Some(ref mut field) => field.extend_from_slice(content),
                // A header block cannot start with a continuation
                None => return Err(Error::MalformedHeader),
            }
        } else {
            if let Some(field) = current.take() {
                push_field(&mut header, &field)?;
            }
            current = Some(content.to_vec());
        }
    }
}

fn push_field(header: &mut Header, field: &[u8]) -> Result<(), Error> {
    let colon = memchr::memchr(b':', field).ok_or(Error::MalformedHeader)?;
    let name = String::from_utf8_lossy(&field[..colon]);
    let name = name.trim();
    if name.is_empty() || name.contains(|c: char| c.is_whitespace()) {
        return Err(Error::MalformedHeader);
    }

    let value = String::from_utf8_lossy(&field[colon + 1..]);
    header.add(name, value.trim());
    Ok(())
}

pub(super) fn strip_line_ending(line: &[u8]) -> &[u8] {
    if line.ends_with(b"\r\n") {
        &line[..line.len() - 2]
    } else if line.ends_with(b"\n") {
        &line[..line.len() - 1]
    } else {
        line
    }
}

/// A parsed Content-Type.
///
/// The type, subtype, and parameter names are always lower case.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentType {
    pub typ: String,
    pub subtype: String,
    pub parms: Vec<(String, String)>,
}

impl ContentType {
    pub fn new(typ: &str, subtype: &str) -> Self {
        ContentType {
            typ: typ.to_ascii_lowercase(),
            subtype: subtype.to_ascii_lowercase(),
            parms: vec![],
        }
    }

    pub fn is_type(&self, typ: &str) -> bool {
        self.typ.eq_ignore_ascii_case(typ)
    }

    pub fn is_subtype(&self, subtype: &str) -> bool {
        self.subtype.eq_ignore_ascii_case(subtype)
    }

    pub fn is_multipart(&self) -> bool {
        self.is_type("multipart")
    }

    pub fn parm(&self, name: &str) -> Option<&str> {
        self.parms
            .iter()
            .find(|&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| v.as_str())
    }

    pub fn set_parm(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        let name = name.to_ascii_lowercase();
        match self.parms.iter_mut().find(|&&mut (ref n, _)| *n == name) {
            Some(parm) => parm.1 = value,
            None => self.parms.push((name, value)),
        }
    }

    /// The multipart boundary, if this is a multipart type that has one.
    pub fn boundary(&self) -> Option<&str> {
        if self.is_multipart() {
            self.parm("boundary").filter(|b| !b.is_empty())
        } else {
            None
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.typ, self.subtype)?;
        for &(ref name, ref value) in &self.parms {
            if !value.is_empty() && value.chars().all(is_token_char) {
                write!(f, "; {}={}", name, value)?;
            } else {
                write!(f, "; {}=\"", name)?;
                for c in value.chars() {
                    if '"' == c || '\\' == c {
                        write!(f, "\\")?;
                    }
                    write!(f, "{}", c)?;
                }
                write!(f, "\"")?;
            }
        }
        Ok(())
    }
}

// RFC 2045 5.1 "token"
fn is_token_char(c: char) -> bool {
    c.is_ascii()
        && !c.is_ascii_control()
        && !c.is_ascii_whitespace()
        && !"()<>@,;:\\\"/[]?=".contains(c)
}

fn token(i: &str) -> IResult<&str, &str> {
    take_while1(is_token_char)(i)
}

// RFC 2822 3.2.5 "quoted-string", without folding
fn quoted_string(i: &str) -> IResult<&str, String> {
    let (mut rest, _) = char('"')(i)?;
    let mut value = String::new();
    loop {
        let mut chars = rest.chars();
        match chars.next() {
            None => return Err(nom::Err::Error((rest, ErrorKind::Char))),
            Some('"') => return Ok((chars.as_str(), value)),
            Some('\\') => {
                if let Some(c) = chars.next() {
                    value.push(c);
                }
            },
            Some(c) => value.push(c),
        }
        rest = chars.as_str();
    }
}

fn parameter(i: &str) -> IResult<&str, (&str, String)> {
    preceded(
        tuple((multispace0, char(';'), multispace0)),
        separated_pair(
            token,
            tuple((multispace0, char('='), multispace0)),
            alt((map(token, |s: &str| s.to_owned()), quoted_string)),
        ),
    )(i)
}

fn content_type(i: &str) -> IResult<&str, ContentType> {
    map(
        tuple((
            preceded(multispace0, token),
            preceded(char('/'), token),
            many0(parameter),
            opt(preceded(multispace0, char(';'))),
        )),
        |(typ, subtype, parms, _)| ContentType {
            typ: typ.to_ascii_lowercase(),
            subtype: subtype.to_ascii_lowercase(),
            parms: parms
                .into_iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value))
                .collect(),
        },
    )(i)
}

/// Parse a Content-Type value.
///
/// Anything after the last parameter that can be understood is ignored.
pub fn parse_content_type(value: &str) -> Option<ContentType> {
    content_type(value).ok().map(|(_, ct)| ct)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentTransferEncoding {
    SevenBit,
    EightBit,
    Binary,
    Base64,
    QuotedPrintable,
}

impl Default for ContentTransferEncoding {
    fn default() -> Self {
        ContentTransferEncoding::SevenBit
    }
}

impl ContentTransferEncoding {
    pub fn name(self) -> &'static str {
        match self {
            ContentTransferEncoding::SevenBit => "7bit",
            ContentTransferEncoding::EightBit => "8bit",
            ContentTransferEncoding::Binary => "binary",
            ContentTransferEncoding::Base64 => "base64",
            ContentTransferEncoding::QuotedPrintable => "quoted-printable",
        }
    }
}

pub fn parse_content_transfer_encoding(
    value: &str,
) -> Option<ContentTransferEncoding> {
    use self::ContentTransferEncoding as CTE;

    let value = value.trim();
    [
        CTE::SevenBit,
        CTE::EightBit,
        CTE::Binary,
        CTE::Base64,
        CTE::QuotedPrintable,
    ]
    .iter()
    .copied()
    .find(|cte| cte.name().eq_ignore_ascii_case(value))
}
