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

//! An in-process, unidirectional byte pipe.
//!
//! The writer and reader are intended to live on different threads. Data
//! moves in chunks over a bounded channel, so a writer cannot get more than
//! `capacity` chunks ahead of the reader. Whatever ends the writer (a clean
//! close, an error, or simply being dropped) is reported to the reader once
//! all data written before it has been consumed.

use std::io::{self, Read, Write};
use std::mem;

use crossbeam::channel;

use super::config::PipeConfig;

enum Message {
    Data(Vec<u8>),
    Eof,
    Failed(io::Error),
}

/// Create a new pipe.
pub fn pipe(config: &PipeConfig) -> (PipeReader, PipeWriter) {
    let (sender, receiver) = channel::bounded(config.capacity);
    let chunk_size = config.chunk_size.max(1);

    (
        PipeReader {
            receiver: Some(receiver),
            chunk: Vec::new(),
            off: 0,
            end: End::Open,
        },
        PipeWriter {
            sender,
            pending: Vec::with_capacity(chunk_size),
            chunk_size,
        },
    )
}

#[derive(Debug)]
enum End {
    Open,
    Eof,
    Failed(io::ErrorKind, String),
}

/// The read half of a pipe.
///
/// Dropping the reader closes it.
#[derive(Debug)]
pub struct PipeReader {
    receiver: Option<channel::Receiver<Message>>,
    chunk: Vec<u8>,
    off: usize,
    end: End,
}

impl PipeReader {
    /// Close the read end.
    ///
    /// Any write in progress or attempted afterwards fails with `BrokenPipe`.
    /// Reads after this fail as well unless the writer had already finished.
    pub fn close(&mut self) {
        self.receiver = None;
        self.chunk = Vec::new();
        self.off = 0;
    }
}

impl Read for PipeReader {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.off < self.chunk.len() {
                let len = dst.len().min(self.chunk.len() - self.off);
                dst[..len]
                    .copy_from_slice(&self.chunk[self.off..self.off + len]);
                self.off += len;
                return Ok(len);
            }

            match self.end {
                End::Open => (),
                End::Eof => return Ok(0),
                End::Failed(kind, ref message) => {
                    return Err(io::Error::new(kind, message.clone()))
                },
            }

            if dst.is_empty() {
                return Ok(0);
            }

            let message = match self.receiver {
                Some(ref receiver) => receiver.recv(),
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "read from closed pipe",
                    ))
                },
            };

            match message {
                Ok(Message::Data(data)) => {
                    self.chunk = data;
                    self.off = 0;
                },
                Ok(Message::Eof) => {
                    self.end = End::Eof;
                    self.receiver = None;
                },
                Ok(Message::Failed(e)) => {
                    self.end = End::Failed(e.kind(), e.to_string());
                    self.receiver = None;
                    return Err(e);
                },
                Err(channel::RecvError) => {
                    self.end = End::Failed(
                        io::ErrorKind::BrokenPipe,
                        "pipe writer went away without closing".to_owned(),
                    );
                    self.receiver = None;
                },
            }
        }
    }
}

/// The write half of a pipe.
///
/// Output is buffered until a full chunk is available or the writer is
/// flushed or closed. Dropping the writer without calling `close` or
/// `close_with_error` causes the reader to fail with `BrokenPipe` instead of
/// seeing a clean end of stream.
#[derive(Debug)]
pub struct PipeWriter {
    sender: channel::Sender<Message>,
    pending: Vec<u8>,
    chunk_size: usize,
}

impl PipeWriter {
    /// Flush buffered data and signal a clean end of stream.
    pub fn close(mut self) -> io::Result<()> {
        self.flush()?;
        self.send(Message::Eof)
    }

    /// Flush buffered data, then end the stream with `error`.
    ///
    /// The reader gets `error` itself on the read following the data.
    /// Failures are ignored since they only mean the reader is gone.
    pub fn close_with_error(mut self, error: io::Error) {
        let _ = self.flush();
        let _ = self.send(Message::Failed(error));
    }

    fn send(&self, message: Message) -> io::Result<()> {
        self.sender.send(message).map_err(|_| {
            io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed")
        })
    }
}

impl Write for PipeWriter {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        let len = src.len().min(self.chunk_size - self.pending.len());
        self.pending.extend_from_slice(&src[..len]);
        if self.pending.len() >= self.chunk_size {
            self.flush()?;
        }

        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let chunk = mem::replace(
            &mut self.pending,
            Vec::with_capacity(self.chunk_size),
        );
        self.send(Message::Data(chunk))
    }
}

#[cfg(test)]
mod test {
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn config(capacity: usize, chunk_size: usize) -> PipeConfig {
        PipeConfig {
            capacity,
            chunk_size,
        }
    }

    #[test]
    fn transfers_data_across_threads() {
        let expected = "hello world".repeat(1000);
        for &(capacity, chunk_size) in &[(0, 1), (0, 7), (4, 8192), (1, 3)] {
            let (mut reader, mut writer) =
                pipe(&config(capacity, chunk_size));
            let data = expected.clone();
            let producer = thread::spawn(move || {
                writer.write_all(data.as_bytes()).unwrap();
                writer.close().unwrap();
            });

            let mut actual = String::new();
            reader.read_to_string(&mut actual).unwrap();
            producer.join().unwrap();
            assert_eq!(expected, actual);

            // End of stream is sticky
            assert_eq!(0, reader.read(&mut [0u8; 16]).unwrap());
        }
    }

    #[test]
    fn error_delivered_after_data() {
        let (mut reader, mut writer) = pipe(&config(4, 8192));
        writer.write_all(b"partial").unwrap();
        writer.close_with_error(io::Error::new(
            io::ErrorKind::InvalidData,
            "injected failure",
        ));

        let mut buf = [0u8; 64];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(b"partial", &buf[..n]);

        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(io::ErrorKind::InvalidData, err.kind());
        assert_eq!("injected failure", err.to_string());

        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(io::ErrorKind::InvalidData, err.kind());
        assert_eq!("injected failure", err.to_string());
    }

    #[test]
    fn dropped_writer_is_not_a_clean_end() {
        let (mut reader, mut writer) = pipe(&config(4, 8192));
        writer.write_all(b"abc").unwrap();
        writer.flush().unwrap();
        drop(writer);

        let mut data = Vec::new();
        let err = reader.read_to_end(&mut data).unwrap_err();
        assert_eq!(io::ErrorKind::BrokenPipe, err.kind());
        assert_eq!(b"abc", &data[..]);
    }

    #[test]
    fn closing_reader_unblocks_writer() {
        let (mut reader, mut writer) = pipe(&config(0, 4));
        let producer = thread::spawn(move || loop {
            if let Err(e) = writer.write_all(b"data") {
                return e.kind();
            }
        });

        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(b"data", &buf);

        // Give the writer a chance to block on the next chunk
        thread::sleep(Duration::from_millis(20));
        reader.close();

        assert_eq!(io::ErrorKind::BrokenPipe, producer.join().unwrap());
        assert_eq!(
            io::ErrorKind::BrokenPipe,
            reader.read(&mut buf).unwrap_err().kind()
        );
    }

    #[test]
    fn writes_block_at_capacity() {
        let (mut reader, mut writer) = pipe(&config(1, 1));
        let (progress_send, progress_recv) = channel::unbounded();
        let producer = thread::spawn(move || {
            for &b in b"abcd" {
                writer.write_all(&[b]).unwrap();
                progress_send.send(b).unwrap();
            }
            writer.close().unwrap();
        });

        // One chunk fits in the channel; the second write blocks until we
        // read.
        assert_eq!(Ok(b'a'), progress_recv.recv());
        assert!(progress_recv
            .recv_timeout(Duration::from_millis(50))
            .is_err());

        let mut data = Vec::new();
        reader.read_to_end(&mut data).unwrap();
        producer.join().unwrap();
        assert_eq!(b"abcd", &data[..]);
    }
}
