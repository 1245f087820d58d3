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
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use log::error;
use structopt::StructOpt;

use mimepipe::support::config::Config;
use mimepipe::support::logging;
use mimepipe::support::sysexits::*;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
struct Options {
    /// Read configuration from this TOML file.
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Log more. Pass twice to log everything.
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u8,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt)]
enum Command {
    /// List the parts of a multipart message.
    ///
    /// For each part, prints its number, its Content-Type, and the size of
    /// its body after transfer decoding.
    List(InputOptions),
    /// Parse a multipart message and serialize it again to standard output.
    ///
    /// The parts are held in memory and written back out through a streamed
    /// multipart body, re-encoded according to their own headers.
    Rebuild(InputOptions),
}

#[derive(StructOpt)]
struct InputOptions {
    /// The message to read. "-" reads standard input.
    #[structopt(parse(from_os_str), default_value = "-")]
    input: PathBuf,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let options = Options::from_clap(&match Options::clap().get_matches_safe()
    {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        },
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        },
    });

    let config = match options.config {
        Some(ref path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!(
                    "Error in config file at '{}': {}",
                    path.display(),
                    e
                );
                EX_CONFIG.exit()
            },
        },
        None => Config::default(),
    };

    let level = match logging::parse_level(&config.log.level) {
        Some(level) => logging::with_verbosity(level, options.verbose),
        None => {
            eprintln!("Unknown log level '{}'", config.log.level);
            EX_CONFIG.exit()
        },
    };

    if let Err(e) = logging::console_config(level)
        .and_then(|c| log4rs::init_config(c).map_err(|e| e.to_string()))
    {
        eprintln!("Failed to initialise logging: {}", e);
        EX_SOFTWARE.exit();
    }

    let result = match options.command {
        Command::List(input) => {
            super::commands::list(open_input(&input.input), &config)
        },
        Command::Rebuild(input) => {
            super::commands::rebuild(open_input(&input.input), &config)
        },
    };

    if let Err(e) = result {
        error!("{}", e);
        Sysexit::from(&e).exit();
    }
}

fn open_input(path: &Path) -> Box<dyn Read + Send> {
    if Path::new("-") == path {
        return Box::new(io::stdin());
    }

    match fs::File::open(path) {
        Ok(file) => Box::new(file),
        Err(e) => {
            eprintln!("Error opening '{}': {}", path.display(), e);
            EX_NOINPUT.exit()
        },
    }
}
