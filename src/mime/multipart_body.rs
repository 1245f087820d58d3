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

//! A multipart body built from parts held in memory.
//!
//! Such a body can be consumed in one of two ways, but not both: as a
//! sequence of entities through `MultipartReader`, or as the serialized wire
//! format through `Read`. Whichever is used first wins.
//!
//! Serialization is lazy. The first read hands all parts to a background
//! thread, which writes the wire format into a bounded pipe that `read`
//! drains. The thread is therefore never more than a few chunks ahead of the
//! consumer.

use std::io::{self, Read};
use std::mem;
use std::thread;
use std::vec;

use log::debug;

use super::entity::Entity;
use super::header::{ContentType, Header};
use super::multipart;
use super::parts::MultipartReader;
use crate::support::config::PipeConfig;
use crate::support::error::Error;
use crate::support::pipe::{pipe, PipeReader, PipeWriter};

#[derive(Debug)]
pub struct MultipartBody {
    header: Header,
    /// The parts not yet handed out. Taking from this is the cursor.
    parts: vec::IntoIter<Entity>,
    pipe_config: PipeConfig,
    state: State,
}

#[derive(Debug)]
enum State {
    /// Neither contract has been used.
    Fresh,
    /// `next_part` has been called; reading bytes is no longer possible.
    Iterating,
    /// Reading bytes has started; iteration is over.
    Serializing(PipeReader),
    /// Serialization was started and then cut off by `close`.
    Closed,
}

impl MultipartBody {
    /// Create a body holding `parts`, framed according to `header`.
    ///
    /// If `header` does not have a multipart Content-Type, it is given
    /// `multipart/mixed`. A random boundary is added if there is none.
    pub fn new(mut header: Header, parts: Vec<Entity>) -> Self {
        let mut content_type = header
            .content_type()
            .filter(ContentType::is_multipart)
            .unwrap_or_else(|| ContentType::new("multipart", "mixed"));
        if content_type.boundary().is_none() {
            content_type.set_parm("boundary", multipart::random_boundary());
        }
        header.set_content_type(&content_type);

        MultipartBody {
            header,
            parts: parts.into_iter(),
            pipe_config: PipeConfig::default(),
            state: State::Fresh,
        }
    }

    /// Use `pipe_config` for the pipe between the serializer and `read`.
    pub fn with_pipe_config(mut self, pipe_config: PipeConfig) -> Self {
        self.pipe_config = pipe_config;
        self
    }

    /// The header template, which carries the boundary.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Stop serialization, if it is in progress.
    ///
    /// The background writer fails on its next write and exits. Does nothing
    /// if reading never started. Dropping the body has the same effect.
    pub fn close(&mut self) -> Result<(), Error> {
        if let State::Serializing(ref mut pipe) = self.state {
            debug!("Closing multipart body during serialization");
            pipe.close();
            self.state = State::Closed;
        }

        Ok(())
    }

    fn start_serializing(&mut self) -> io::Result<()> {
        // Iteration is over from this point on, whether or not any part was
        // ever handed out
        let parts = mem::replace(&mut self.parts, Vec::new().into_iter());
        let (reader, writer) = pipe(&self.pipe_config);
        self.state = State::Serializing(reader);

        let header = self.header.clone();
        // If spawning fails, the writer is dropped with the closure, so any
        // later read sees a broken pipe.
        thread::Builder::new()
            .name("multipart-writer".to_owned())
            .spawn(move || serialize(&header, parts, writer))?;
        Ok(())
    }
}

impl MultipartReader for MultipartBody {
    fn next_part(&mut self) -> Result<Option<Entity>, Error> {
        match self.state {
            State::Fresh => self.state = State::Iterating,
            State::Iterating => (),
            State::Serializing(_) | State::Closed => return Ok(None),
        }

        Ok(self.parts.next())
    }
}

impl Read for MultipartBody {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if let State::Fresh = self.state {
            self.start_serializing()?;
        }

        match self.state {
            State::Serializing(ref mut pipe) => pipe.read(dst),
            State::Iterating => Err(Error::AlreadyIterating.into()),
            State::Fresh | State::Closed => Err(Error::Closed.into()),
        }
    }
}

fn serialize(
    header: &Header,
    parts: vec::IntoIter<Entity>,
    mut pipe: PipeWriter,
) {
    debug!("Serializing {} multipart parts", parts.len());

    match write_parts(header, parts, &mut pipe) {
        Ok(()) => match pipe.close() {
            Ok(()) => debug!("Multipart serialization complete"),
            Err(e) => debug!("Multipart reader went away: {}", e),
        },
        // If the reader closed early, nobody gets this
        Err(e) => {
            debug!("Multipart serialization stopped: {}", e);
            pipe.close_with_error(e);
        },
    }
}

fn write_parts(
    header: &Header,
    parts: vec::IntoIter<Entity>,
    pipe: &mut PipeWriter,
) -> io::Result<()> {
    let mut writer = multipart::Writer::new(pipe, header)?;
    for mut part in parts {
        let mut part_writer = writer.create_part(part.header())?;
        part.write_body_to(&mut part_writer)?;
    }

    writer.finish()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crossbeam::channel;
    use proptest::prelude::*;

    use super::*;
    use crate::mime::parts::PartIterator;

    fn text_part(body: &'static str) -> Entity {
        Entity::new(
            vec![("Content-Type", "text/plain")].into_iter().collect(),
            Box::new(body.as_bytes()),
        )
    }

    fn body_with_boundary(parts: Vec<Entity>) -> MultipartBody {
        MultipartBody::new(
            vec![("Content-Type", "multipart/mixed; boundary=b")]
                .into_iter()
                .collect(),
            parts,
        )
    }

    fn read_all(body: &mut MultipartBody) -> (Vec<u8>, io::Result<usize>) {
        let mut data = Vec::new();
        let result = body.read_to_end(&mut data);
        (data, result)
    }

    fn part_body(part: &mut Entity) -> String {
        let mut s = String::new();
        part.body_mut().read_to_string(&mut s).unwrap();
        s
    }

    /// Fails every read.
    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::InvalidData, "injected failure"))
        }
    }

    /// Produces data forever; reports when it is dropped.
    struct EndlessReader {
        _alive: channel::Sender<()>,
    }

    impl Read for EndlessReader {
        fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
            for b in dst.iter_mut() {
                *b = b'x';
            }
            Ok(dst.len())
        }
    }

    #[test]
    fn iteration_yields_parts_in_order() {
        let mut body = body_with_boundary(vec![
            text_part("one"),
            text_part("two"),
            text_part("three"),
        ]);

        let mut seen = Vec::new();
        while let Some(mut part) = body.next_part().unwrap() {
            assert_eq!(Some("text/plain"), part.header().get("Content-Type"));
            seen.push(part_body(&mut part));
        }
        assert_eq!(vec!["one", "two", "three"], seen);
        assert!(body.next_part().unwrap().is_none());

        // The parts have been given away
        let err = body.read(&mut [0u8; 8]).unwrap_err();
        assert_eq!(Error::AlreadyIterating.to_string(), err.to_string());
    }

    #[test]
    fn reading_ends_iteration() {
        let mut body =
            body_with_boundary(vec![text_part("one"), text_part("two")]);
        let mut buf = [0u8; 1];
        assert_eq!(1, body.read(&mut buf).unwrap());
        assert_eq!(b'-', buf[0]);

        // None of the parts were consumed, but iteration is over anyway
        assert!(body.next_part().unwrap().is_none());
        assert!(body.next_part().unwrap().is_none());

        let (rest, result) = read_all(&mut body);
        result.unwrap();
        assert!(rest.ends_with(b"\r\n--b--\r\n"));
    }

    #[test]
    fn serialize_two_parts() {
        crate::init_test_log();

        let mut body =
            body_with_boundary(vec![text_part("hello"), text_part("world")]);
        let (data, result) = read_all(&mut body);
        result.unwrap();
        assert_eq!(
            "--b\r\n\
             Content-Type: text/plain\r\n\
             \r\n\
             hello\r\n\
             --b\r\n\
             Content-Type: text/plain\r\n\
             \r\n\
             world\r\n\
             --b--\r\n",
            String::from_utf8(data).unwrap()
        );

        // End of stream is sticky
        assert_eq!(0, body.read(&mut [0u8; 8]).unwrap());
        body.close().unwrap();
    }

    #[test]
    fn serialize_with_tiny_pipe() {
        let mut body =
            body_with_boundary(vec![text_part("hello"), text_part("world")])
                .with_pipe_config(PipeConfig {
                    capacity: 0,
                    chunk_size: 1,
                });
        let (data, result) = read_all(&mut body);
        result.unwrap();
        assert!(data.starts_with(b"--b\r\nContent-Type: text/plain\r\n"));
        assert!(data.ends_with(b"world\r\n--b--\r\n"));
    }

    #[test]
    fn empty_parts() {
        let mut body = body_with_boundary(vec![]);
        assert!(body.next_part().unwrap().is_none());

        let mut body = body_with_boundary(vec![]);
        let (data, result) = read_all(&mut body);
        result.unwrap();
        assert_eq!(b"--b--\r\n", &data[..]);
    }

    #[test]
    fn part_failure_surfaces_as_read_error() {
        crate::init_test_log();

        let mut body = body_with_boundary(vec![
            text_part("hello"),
            Entity::new(Header::new(), Box::new(FailingReader)),
            text_part("never written"),
        ]);

        let (data, result) = read_all(&mut body);
        let err = result.unwrap_err();
        assert_eq!(io::ErrorKind::InvalidData, err.kind());
        assert_eq!("injected failure", err.to_string());

        let data = String::from_utf8(data).unwrap();
        assert!(
            data.starts_with(
                "--b\r\nContent-Type: text/plain\r\n\r\nhello\r\n--b\r\n"
            ),
            "Unexpected data: {:?}",
            data
        );
        assert!(!data.contains("never written"));
        assert!(!data.contains("--b--"));
    }

    #[test]
    fn close_before_use_is_noop() {
        let mut body = body_with_boundary(vec![text_part("one")]);
        body.close().unwrap();
        body.close().unwrap();

        let mut part = body.next_part().unwrap().unwrap();
        assert_eq!("one", part_body(&mut part));
    }

    #[test]
    fn close_mid_read_stops_writer() {
        crate::init_test_log();

        let (alive_send, alive_recv) = channel::bounded::<()>(0);
        let mut body = body_with_boundary(vec![
            text_part("first"),
            Entity::new(
                Header::new(),
                Box::new(EndlessReader { _alive: alive_send }),
            ),
        ]);

        let mut buf = [0u8; 4096];
        let mut total = 0;
        while total < 100_000 {
            total += body.read(&mut buf).unwrap();
        }

        body.close().unwrap();
        // The writer drops the parts (and with them our sender) when it exits
        assert_eq!(
            Err(channel::RecvTimeoutError::Disconnected),
            alive_recv.recv_timeout(Duration::from_secs(10))
        );

        let err = body.read(&mut buf).unwrap_err();
        assert_eq!(io::ErrorKind::BrokenPipe, err.kind());
        assert!(body.next_part().unwrap().is_none());
        body.close().unwrap();
    }

    #[test]
    fn dropping_mid_read_stops_writer() {
        let (alive_send, alive_recv) = channel::bounded::<()>(0);
        let mut body = body_with_boundary(vec![Entity::new(
            Header::new(),
            Box::new(EndlessReader { _alive: alive_send }),
        )]);
        body.read_exact(&mut [0u8; 10]).unwrap();
        drop(body);

        assert_eq!(
            Err(channel::RecvTimeoutError::Disconnected),
            alive_recv.recv_timeout(Duration::from_secs(10))
        );
    }

    #[test]
    fn generated_boundary() {
        let body = MultipartBody::new(
            vec![("Content-Type", "text/plain"), ("Subject", "x")]
                .into_iter()
                .collect(),
            vec![],
        );
        let ct = body.header().content_type().unwrap();
        assert_eq!("multipart", ct.typ);
        assert_eq!("mixed", ct.subtype);
        assert_eq!(60, ct.boundary().unwrap().len());
        assert_eq!(Some("x"), body.header().get("Subject"));
    }

    #[test]
    fn wire_round_trip() {
        let parts = vec![
            Entity::new(
                vec![
                    ("Content-Type", "application/octet-stream"),
                    ("Content-Transfer-Encoding", "base64"),
                ]
                .into_iter()
                .collect(),
                Box::new(&b"AAEC/f7/"[..]),
            ),
            Entity::new(
                vec![("Content-Transfer-Encoding", "quoted-printable")]
                    .into_iter()
                    .collect(),
                Box::new(&b"caf=C3=A9 =\r\nau lait"[..]),
            ),
            text_part(""),
        ];
        // No boundary given, so a generated one longer than any line limit
        // is used
        let mut body = MultipartBody::new(Header::new(), parts);
        let boundary = body
            .header()
            .content_type()
            .and_then(|ct| ct.boundary().map(str::to_owned))
            .unwrap();

        let (wire, result) = read_all(&mut body);
        result.unwrap();
        assert!(body.next_part().unwrap().is_none());

        let mut parsed = PartIterator::new(multipart::Reader::new(
            io::Cursor::new(wire),
            &boundary,
        ));
        let mut decoded = Vec::new();
        let mut content_types = Vec::new();
        while let Some(mut part) = parsed.next_part().unwrap() {
            content_types.push(
                part.header().get("Content-Type").map(str::to_owned),
            );
            let mut data = Vec::new();
            part.body_mut().read_to_end(&mut data).unwrap();
            decoded.push(data);
        }

        assert_eq!(
            vec![
                Some("application/octet-stream".to_owned()),
                None,
                Some("text/plain".to_owned()),
            ],
            content_types
        );
        assert_eq!(
            vec![
                vec![0u8, 1, 2, 0xfd, 0xfe, 0xff],
                "café au lait".as_bytes().to_vec(),
                vec![],
            ],
            decoded
        );
    }

    #[test]
    fn round_trip_each_part() {
        let mut body = body_with_boundary(vec![
            Entity::new(
                vec![("Content-Transfer-Encoding", "quoted-printable")]
                    .into_iter()
                    .collect(),
                Box::new(&b"caf=C3=A9 =\r\nau lait"[..]),
            ),
            text_part("plain"),
        ]);
        let (wire, result) = read_all(&mut body);
        result.unwrap();

        let mut parsed = PartIterator::new(multipart::Reader::new(
            io::Cursor::new(wire),
            "b",
        ));
        let mut first = parsed.next_part().unwrap().unwrap();
        assert_eq!(
            Some("quoted-printable"),
            first.header().get("Content-Transfer-Encoding")
        );
        assert_eq!("café au lait", part_body(&mut first));
        let mut second = parsed.next_part().unwrap().unwrap();
        assert_eq!("plain", part_body(&mut second));
        assert!(parsed.next_part().unwrap().is_none());
    }

    #[test]
    fn nested_multipart_round_trip() {
        let inner = Entity::new_multipart(
            vec![("Content-Type", "multipart/alternative; boundary=inner")]
                .into_iter()
                .collect(),
            vec![text_part("plain version"), text_part("other version")],
        );
        let mut body = body_with_boundary(vec![text_part("intro"), inner]);
        let (wire, result) = read_all(&mut body);
        result.unwrap();

        let mut outer = PartIterator::new(multipart::Reader::new(
            io::Cursor::new(wire),
            "b",
        ));
        let mut intro = outer.next_part().unwrap().unwrap();
        assert_eq!("intro", part_body(&mut intro));

        let mut nested = outer.next_part().unwrap().unwrap();
        let mut seen = Vec::new();
        let parts = nested.multipart().unwrap();
        while let Some(mut part) = parts.next_part().unwrap() {
            seen.push(part_body(&mut part));
        }
        assert_eq!(vec!["plain version", "other version"], seen);
        assert!(outer.next_part().unwrap().is_none());
    }

    #[test]
    fn reading_ends_iteration_for_zero_and_one_parts() {
        let mut body = body_with_boundary(vec![]);
        let (data, result) = read_all(&mut body);
        result.unwrap();
        assert_eq!(b"--b--\r\n", &data[..]);
        assert!(body.next_part().unwrap().is_none());

        let mut body = body_with_boundary(vec![text_part("only")]);
        let (data, result) = read_all(&mut body);
        result.unwrap();
        assert_eq!(
            "--b\r\nContent-Type: text/plain\r\n\r\nonly\r\n--b--\r\n",
            String::from_utf8(data).unwrap()
        );
        assert!(body.next_part().unwrap().is_none());
    }

    proptest! {
        #[test]
        fn serialized_parts_parse_back(
            bodies in prop::collection::vec(
                prop::collection::vec(
                    prop::sample::select(&b"xy =\r\n\x00\xff"[..]), 0..100),
                0..5),
        ) {
            let parts = bodies
                .iter()
                .enumerate()
                .map(|(ix, data)| {
                    let mut header = Header::new();
                    header.add("X-Part", ix.to_string());
                    Entity::new(
                        header,
                        Box::new(io::Cursor::new(data.clone())),
                    )
                })
                .collect();
            let mut body = MultipartBody::new(Header::new(), parts);
            let boundary = body
                .header()
                .content_type()
                .and_then(|ct| ct.boundary().map(str::to_owned))
                .unwrap();

            let (wire, result) = read_all(&mut body);
            result.unwrap();
            prop_assert!(body.next_part().unwrap().is_none());

            let mut parsed = PartIterator::new(multipart::Reader::new(
                io::Cursor::new(wire),
                &boundary,
            ));
            let mut seen = Vec::new();
            while let Some(mut part) = parsed.next_part().unwrap() {
                let expected = seen.len().to_string();
                prop_assert_eq!(
                    Some(expected.as_str()),
                    part.header().get("X-Part")
                );
                let mut data = Vec::new();
                part.body_mut().read_to_end(&mut data).unwrap();
                seen.push(data);
            }
            prop_assert_eq!(bodies, seen);
        }
    }
}
