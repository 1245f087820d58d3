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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Multipart body ended before the closing delimiter")]
    UnexpectedEof,
    #[error("Header block too long")]
    HeaderTooLong,
    #[error("Malformed header line")]
    MalformedHeader,
    #[error("No multipart boundary in Content-Type")]
    NoBoundary,
    #[error("Invalid multipart boundary")]
    InvalidBoundary,
    #[error("Multipart body is already being iterated")]
    AlreadyIterating,
    #[error("Multipart body closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Config(#[from] toml::de::Error),
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            Error::UnexpectedEof => {
                io::Error::new(io::ErrorKind::UnexpectedEof, e)
            },
            Error::Closed => io::Error::new(io::ErrorKind::BrokenPipe, e),
            e => io::Error::new(io::ErrorKind::Other, e),
        }
    }
}
