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

use std::io::{self, BufRead, BufReader, Read, Write};

use log::info;

use mimepipe::mime::entity::Entity;
use mimepipe::mime::header::{read_header, Header};
use mimepipe::mime::multipart;
use mimepipe::mime::multipart_body::MultipartBody;
use mimepipe::mime::parts::PartIterator;
use mimepipe::support::config::Config;
use mimepipe::support::error::Error;

/// Read the top-level header of a message and set up a reader over its
/// parts.
fn open_message<R: BufRead>(
    mut input: R,
    config: &Config,
) -> Result<(Header, multipart::Reader<R>), Error> {
    let header = read_header(&mut input, config.parser.max_header_bytes)?;
    let boundary = header
        .content_type()
        .and_then(|ct| ct.boundary().map(str::to_owned))
        .ok_or(Error::NoBoundary)?;

    let reader = multipart::Reader::new(input, &boundary)
        .with_max_header_bytes(config.parser.max_header_bytes);
    Ok((header, reader))
}

pub fn list(
    input: Box<dyn Read + Send>,
    config: &Config,
) -> Result<(), Error> {
    let (_, reader) = open_message(BufReader::new(input), config)?;

    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    for (ix, part) in PartIterator::new(reader).enumerate() {
        let mut part = part?;
        let content_type = part
            .header()
            .get("Content-Type")
            .unwrap_or("text/plain")
            .to_owned();
        let size = io::copy(part.body_mut(), &mut io::sink())?;
        writeln!(stdout, "{}\t{}\t{}", ix + 1, content_type, size)?;
    }

    Ok(())
}

pub fn rebuild(
    input: Box<dyn Read + Send>,
    config: &Config,
) -> Result<(), Error> {
    let (header, mut reader) = open_message(BufReader::new(input), config)?;

    // Part bodies share the input, so each has to be buffered before moving
    // on to the next.
    let mut parts = Vec::new();
    while let Some((part_header, mut body)) = reader.next_part()? {
        let mut data = Vec::new();
        body.read_to_end(&mut data)?;
        parts.push(Entity::new(part_header, Box::new(io::Cursor::new(data))));
    }
    info!("Read {} parts", parts.len());

    let mut body =
        MultipartBody::new(header, parts).with_pipe_config(config.pipe);
    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    body.header().write_to(&mut stdout)?;
    stdout.write_all(b"\r\n")?;
    io::copy(&mut body, &mut stdout)?;
    body.close()?;
    stdout.flush()?;
    Ok(())
}
