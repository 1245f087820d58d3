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

use std::fmt;
use std::io::{self, BufReader, Read, Write};
use std::mem;

use log::warn;

use super::header::{ContentTransferEncoding, Header};
use super::multipart;
use super::multipart_body::MultipartBody;
use super::parts::{MultipartReader, PartIterator};
use super::transfer_encoding::{DecodingReader, EncodingWriter};
use crate::support::error::Error;

/// A multipart body being parsed from its wire format.
pub type WireParts = PartIterator<BufReader<Box<dyn Read + Send>>>;

/// A MIME entity: a header and a body which can be read once.
#[derive(Debug)]
pub struct Entity {
    header: Header,
    body: Body,
}

/// The body of an `Entity`.
pub enum Body {
    /// A plain byte stream, with any transfer encoding already removed.
    Stream(Box<dyn Read + Send>),
    /// A multipart body whose parts are being parsed out of a stream.
    Parts(WireParts),
    /// A multipart body built from parts held in memory.
    Lazy(MultipartBody),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Body::Stream(_) => write!(f, "Stream"),
            Body::Parts(_) => write!(f, "Parts"),
            Body::Lazy(ref lazy) => write!(f, "Lazy({:?})", lazy),
        }
    }
}

impl Read for Body {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        match *self {
            Body::Stream(ref mut r) => r.read(dst),
            Body::Parts(_) => Err(Error::AlreadyIterating.into()),
            Body::Lazy(ref mut lazy) => lazy.read(dst),
        }
    }
}

impl Entity {
    /// Create an entity from a header and its body as found on the wire.
    ///
    /// If the header specifies base64 or quoted-printable transfer encoding,
    /// reads from the body decode it.
    pub fn new(header: Header, body: Box<dyn Read + Send>) -> Self {
        let body: Box<dyn Read + Send> = match header
            .content_transfer_encoding()
        {
            Some(Ok(cte @ ContentTransferEncoding::Base64))
            | Some(Ok(cte @ ContentTransferEncoding::QuotedPrintable)) => {
                Box::new(DecodingReader::new(BufReader::new(body), cte))
            },
            Some(Ok(_)) | None => body,
            Some(Err(name)) => {
                warn!(
                    "Unknown Content-Transfer-Encoding {:?}, \
                     passing body through unchanged",
                    name
                );
                body
            },
        };

        Entity {
            header,
            body: Body::Stream(body),
        }
    }

    /// Create a multipart entity from the given parts.
    ///
    /// The header is given a multipart Content-Type (`multipart/mixed`
    /// unless it already has one) with a boundary, and loses any
    /// Content-Transfer-Encoding.
    pub fn new_multipart(mut header: Header, parts: Vec<Entity>) -> Self {
        header.del("Content-Transfer-Encoding");
        let body = MultipartBody::new(header, parts);

        Entity {
            header: body.header().clone(),
            body: Body::Lazy(body),
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    /// If this is a multipart entity, return its parts.
    ///
    /// A streamed body with a multipart Content-Type starts being parsed on
    /// the first call; it can no longer be read as bytes after that.
    pub fn multipart(&mut self) -> Option<&mut dyn MultipartReader> {
        if let Body::Stream(_) = self.body {
            let boundary = self
                .header
                .content_type()
                .and_then(|ct| ct.boundary().map(str::to_owned))?;

            if let Body::Stream(stream) = mem::replace(
                &mut self.body,
                Body::Stream(Box::new(io::empty())),
            ) {
                self.body = Body::Parts(PartIterator::new(
                    multipart::Reader::new(BufReader::new(stream), &boundary),
                ));
            }
        }

        match self.body {
            Body::Stream(_) => None,
            Body::Parts(ref mut parts) => {
                Some(parts as &mut dyn MultipartReader)
            },
            Body::Lazy(ref mut lazy) => Some(lazy as &mut dyn MultipartReader),
        }
    }

    /// Write the body in wire format, consuming it.
    ///
    /// Multipart bodies are written part by part, each part writing its own
    /// body in turn. Other bodies are transfer-encoded as the header
    /// specifies.
    pub fn write_body_to(&mut self, w: &mut dyn Write) -> io::Result<()> {
        let header = self.header.clone();
        if let Some(parts) = self.multipart() {
            let mut writer = multipart::Writer::new(w, &header)?;
            while let Some(mut part) = parts.next_part()? {
                let mut part_writer = writer.create_part(part.header())?;
                part.write_body_to(&mut part_writer)?;
            }
            writer.finish()?;
            return Ok(());
        }

        // Unknown encodings were never decoded, so they go back out as-is
        let cte = match header.content_transfer_encoding() {
            Some(Ok(cte)) => cte,
            Some(Err(_)) | None => ContentTransferEncoding::Binary,
        };

        let mut writer = EncodingWriter::new(w, cte);
        io::copy(&mut self.body, &mut writer)?;
        writer.finish()?;
        Ok(())
    }

    /// Write the whole entity, header and body, in wire format.
    pub fn write_to(&mut self, w: &mut dyn Write) -> io::Result<()> {
        self.header.write_to(w)?;
        w.write_all(b"\r\n")?;
        self.write_body_to(w)
    }
}
