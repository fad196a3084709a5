//! RecordIO framing for the streaming subscription response.
//!
//! Each record is `<decimal length>\n<payload>`. The decoder is
//! incremental: feed it network chunks in any fragmentation and pull
//! complete records out.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Longest accepted length prefix; a record length wider than this is
/// treated as a corrupt stream rather than buffered forever.
const MAX_LENGTH_DIGITS: usize = 12;

#[derive(Debug, Error)]
pub enum RecordIoError {
    #[error("malformed record length prefix: {0:?}")]
    MalformedLength(String),
}

#[derive(Debug, Default)]
pub struct RecordIoDecoder {
    buf: BytesMut,
}

impl RecordIoDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a network chunk to the internal buffer.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes currently buffered but not yet framed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pull the next complete record, if the buffer holds one.
    pub fn next_record(&mut self) -> Result<Option<Bytes>, RecordIoError> {
        let newline = match self.buf.iter().position(|&b| b == b'\n') {
            Some(pos) => pos,
            None => {
                if self.buf.len() > MAX_LENGTH_DIGITS {
                    return Err(RecordIoError::MalformedLength(
                        String::from_utf8_lossy(&self.buf[..MAX_LENGTH_DIGITS]).into_owned(),
                    ));
                }
                return Ok(None);
            }
        };

        let prefix = &self.buf[..newline];
        if newline == 0 || newline > MAX_LENGTH_DIGITS || !prefix.iter().all(u8::is_ascii_digit) {
            return Err(RecordIoError::MalformedLength(
                String::from_utf8_lossy(prefix).into_owned(),
            ));
        }
        // All-digit prefix within MAX_LENGTH_DIGITS always parses.
        let length: usize = std::str::from_utf8(prefix).unwrap().parse().unwrap();

        if self.buf.len() < newline + 1 + length {
            return Ok(None);
        }

        self.buf.advance(newline + 1);
        Ok(Some(self.buf.split_to(length).freeze()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_record() {
        let mut decoder = RecordIoDecoder::new();
        decoder.extend(b"5\nhello");

        assert_eq!(decoder.next_record().unwrap().unwrap().as_ref(), b"hello");
        assert!(decoder.next_record().unwrap().is_none());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn multiple_records_in_one_chunk() {
        let mut decoder = RecordIoDecoder::new();
        decoder.extend(b"2\nab3\ncde");

        assert_eq!(decoder.next_record().unwrap().unwrap().as_ref(), b"ab");
        assert_eq!(decoder.next_record().unwrap().unwrap().as_ref(), b"cde");
        assert!(decoder.next_record().unwrap().is_none());
    }

    #[test]
    fn record_split_across_chunks() {
        let mut decoder = RecordIoDecoder::new();
        decoder.extend(b"1");
        assert!(decoder.next_record().unwrap().is_none());

        decoder.extend(b"1\nhello");
        assert!(decoder.next_record().unwrap().is_none());

        decoder.extend(b" world");
        assert_eq!(
            decoder.next_record().unwrap().unwrap().as_ref(),
            b"hello world"
        );
    }

    #[test]
    fn length_prefix_split_across_chunks() {
        let mut decoder = RecordIoDecoder::new();
        decoder.extend(b"1");
        decoder.extend(b"0\n");
        decoder.extend(b"0123456789");
        assert_eq!(
            decoder.next_record().unwrap().unwrap().as_ref(),
            b"0123456789"
        );
    }

    #[test]
    fn empty_record_allowed() {
        let mut decoder = RecordIoDecoder::new();
        decoder.extend(b"0\n5\nhello");
        assert_eq!(decoder.next_record().unwrap().unwrap().as_ref(), b"");
        assert_eq!(decoder.next_record().unwrap().unwrap().as_ref(), b"hello");
    }

    #[test]
    fn non_digit_prefix_is_an_error() {
        let mut decoder = RecordIoDecoder::new();
        decoder.extend(b"xyz\nhello");
        assert!(decoder.next_record().is_err());
    }

    #[test]
    fn missing_newline_past_limit_is_an_error() {
        let mut decoder = RecordIoDecoder::new();
        decoder.extend(b"9999999999999999999999");
        assert!(decoder.next_record().is_err());
    }
}
