//! Splits a raw byte stream into logical records, either on newlines or a
//! user-supplied delimiter.
//!
//! Grounded on `original_source/scanners.go`'s `ScanDelimiter`/
//! `dropDelimiter`: a record ends at the first occurrence of the delimiter,
//! with only the delimiter itself stripped (the rest of the bytes are
//! returned verbatim — no `\r` trimming); at EOF, any non-empty trailing
//! data is returned as a final record. Rust's `std::io::Read` has no
//! split-func hook the way Go's `bufio.Scanner` does, so this reimplements
//! that contract directly over a growable internal buffer, capped at the
//! `mem`-flag buffer size the way the Go scanner is capped by
//! `Scanner.Buffer`.

use std::io::{self, Read};

/// How records are separated in the input stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordDelimiter {
    Newline,
    Custom(String),
}

/// Streams logical records out of `R`, one `next()` call at a time.
pub struct RecordSplitter<R> {
    reader: R,
    delim: Vec<u8>,
    buf: Vec<u8>,
    pos: usize,
    filled: usize,
    eof: bool,
    max_len: usize,
}

impl<R: Read> RecordSplitter<R> {
    pub fn new(reader: R, delimiter: RecordDelimiter, max_len: usize) -> Self {
        let delim = match delimiter {
            RecordDelimiter::Newline => b"\n".to_vec(),
            RecordDelimiter::Custom(s) => s.into_bytes(),
        };
        Self {
            reader,
            delim,
            buf: Vec::new(),
            pos: 0,
            filled: 0,
            eof: false,
            max_len,
        }
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.copy_within(self.pos..self.filled, 0);
            self.filled -= self.pos;
            self.pos = 0;
        }
    }

    fn fill_more(&mut self) -> io::Result<usize> {
        self.compact();
        let grow_to = (self.filled + 8192).min(self.max_len.max(self.filled + 1));
        if self.buf.len() < grow_to {
            self.buf.resize(grow_to, 0);
        }
        let n = self.reader.read(&mut self.buf[self.filled..])?;
        self.filled += n;
        if n == 0 {
            self.eof = true;
        }
        Ok(n)
    }

    fn finish_token(&self, raw: &[u8]) -> Vec<u8> {
        raw.to_vec()
    }
}

impl<R: Read> Iterator for RecordSplitter<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let window = &self.buf[self.pos..self.filled];
            if let Some(idx) = find(window, &self.delim) {
                let token_end = self.pos + idx;
                let token = self.finish_token(&self.buf[self.pos..token_end]);
                self.pos = token_end + self.delim.len();
                return Some(Ok(token));
            }

            if self.eof {
                if self.pos < self.filled {
                    let token = self.finish_token(&self.buf[self.pos..self.filled]);
                    self.pos = self.filled;
                    return Some(Ok(token));
                }
                return None;
            }

            if self.filled - self.pos >= self.max_len {
                return Some(Err(io::Error::new(
                    io::ErrorKind::Other,
                    "record exceeds configured scanner buffer size",
                )));
            }

            match self.fill_more() {
                Ok(_) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
