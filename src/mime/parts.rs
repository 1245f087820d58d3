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

use std::io::BufRead;

use super::entity::Entity;
use super::multipart;
use crate::support::error::Error;

/// A forward-only sequence of the parts of a multipart body.
pub trait MultipartReader {
    /// Return the next part, or `None` when there are no more.
    ///
    /// Any error is final; calling this again afterwards is not meaningful.
    fn next_part(&mut self) -> Result<Option<Entity>, Error>;
}

/// Presents the parts parsed by a `multipart::Reader` as entities.
#[derive(Debug)]
pub struct PartIterator<R> {
    reader: multipart::Reader<R>,
    done: bool,
}

impl<R: BufRead + Send + 'static> PartIterator<R> {
    pub fn new(reader: multipart::Reader<R>) -> Self {
        PartIterator {
            reader,
            done: false,
        }
    }
}

impl<R: BufRead + Send + 'static> MultipartReader for PartIterator<R> {
    fn next_part(&mut self) -> Result<Option<Entity>, Error> {
        Ok(self
            .reader
            .next_part()?
            .map(|(header, body)| Entity::new(header, Box::new(body))))
    }
}

impl<R: BufRead + Send + 'static> Iterator for PartIterator<R> {
    type Item = Result<Entity, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let result = self.next_part().transpose();
        self.done = !matches!(result, Some(Ok(_)));
        result
    }
}

#[cfg(test)]
mod test {
    use std::io::Read;

    use super::*;

    fn iterator(input: &'static [u8]) -> PartIterator<&'static [u8]> {
        PartIterator::new(multipart::Reader::new(input, "b"))
    }

    #[test]
    fn parts_become_entities() {
        let mut parts = iterator(
            b"--b\r\n\
              Content-Type: text/plain\r\n\
              Content-Transfer-Encoding: base64\r\n\
              \r\n\
              aGVsbG8=\r\n\
              --b\r\n\
              \r\n\
              plain\r\n\
              --b--\r\n",
        );

        let mut first = parts.next_part().unwrap().unwrap();
        assert_eq!(Some("text/plain"), first.header().get("Content-Type"));
        let mut body = String::new();
        first.body_mut().read_to_string(&mut body).unwrap();
        assert_eq!("hello", body);

        let mut second = parts.next_part().unwrap().unwrap();
        let mut body = String::new();
        second.body_mut().read_to_string(&mut body).unwrap();
        assert_eq!("plain", body);

        assert!(parts.next_part().unwrap().is_none());
        assert!(parts.next_part().unwrap().is_none());
    }

    #[test]
    fn parse_errors_pass_through() {
        let mut parts = iterator(b"--b\r\nbroken header\r\n\r\n--b--\r\n");
        assert_matches!(Err(Error::MalformedHeader), parts.next_part());
    }

    #[test]
    fn iterator_fuses() {
        assert_eq!(
            2,
            iterator(b"--b\r\n\r\none\r\n--b\r\n\r\ntwo\r\n--b--\r\n")
                .map(Result::unwrap)
                .count()
        );

        let mut parts = iterator(b"--b\r\n\r\none\r\n--b\r\n");
        assert!(parts.next().unwrap().is_ok());
        assert_matches!(Some(Err(Error::UnexpectedEof)), parts.next());
        assert!(parts.next().is_none());
    }
}
