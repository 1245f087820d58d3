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

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::Error;

/// The configuration for Mimepipe.
///
/// Every section and every field is optional; missing values take their
/// defaults.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct Config {
    /// Tuning for the pipe between a streamed multipart body and its
    /// background writer.
    #[serde(default)]
    pub pipe: PipeConfig,

    /// Limits applied when parsing multipart data.
    #[serde(default)]
    pub parser: ParserConfig,

    /// Logging options for the command-line tool.
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipeConfig {
    /// The number of chunks which may be in flight between the writer and
    /// the reader before the writer blocks.
    ///
    /// 0 makes every chunk a rendezvous: the writer blocks until the reader
    /// picks it up.
    pub capacity: usize,

    /// The maximum size, in bytes, of one chunk.
    ///
    /// The writer accumulates output until it has this much or is flushed.
    pub chunk_size: usize,
}

impl Default for PipeConfig {
    fn default() -> Self {
        PipeConfig {
            capacity: 4,
            chunk_size: 8192,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ParserConfig {
    /// The maximum size, in bytes, of the header block of one part.
    pub max_header_bytes: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        ParserConfig {
            max_header_bytes: 65536,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// One of `off`, `error`, `warn`, `info`, `debug`, `trace`.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_owned(),
        }
    }
}

impl Config {
    /// Load the configuration from the TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let data = fs::read(path)?;
        Ok(toml::from_slice(&data)?)
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(PipeConfig::default(), config.pipe);
        assert_eq!(65536, config.parser.max_header_bytes);
        assert_eq!("info", config.log.level);
    }

    #[test]
    fn partial_sections() {
        let config: Config = toml::from_str(
            "[pipe]\n\
             capacity = 0\n\
             \n\
             [log]\n\
             level = \"debug\"\n",
        )
        .unwrap();
        assert_eq!(0, config.pipe.capacity);
        assert_eq!(8192, config.pipe.chunk_size);
        assert_eq!("debug", config.log.level);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[parser]\nmax_header_bytes = 1024").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(1024, config.parser.max_header_bytes);
    }

    #[test]
    fn load_rejects_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pipe]\ncapacity = \"lots\"").unwrap();
        assert_matches!(Err(Error::Config(_)), Config::load(file.path()));
    }
}
