//! Component G: COPY sub-protocol framing. This module only concerns
//! itself with turning row values into (or out of) the bytes the COPY
//! sub-protocol moves; the scoped-resource guard that owns the socket and
//! the connection lock lives on the cursor ([`crate::cursor::CopyIn`] /
//! [`crate::cursor::CopyOut`]), matching §3's "COPY session" invariants.
//!
//! Grounded byte-for-byte on psycopg3's `_format_row_text`/
//! `_format_row_binary` (encode) and the inverse parsing those imply
//! (decode): tab-separated text rows with a six-byte escape table, or a
//! 19-byte signature header followed by `int16(count)` + per-field
//! `int32(len)++bytes` binary rows, `-1` marking `NULL`.

use crate::error::{Error, Result};
use crate::message::Format;
use byteorder::{ByteOrder, BE};

/// `PGCOPY\n\xff\r\n\0` + 4-byte flags field (0) + 4-byte header extension
/// length (0), emitted exactly once at the start of a binary COPY IN/OUT
/// stream.
pub const BINARY_SIGNATURE: [u8; 19] = *b"PGCOPY\n\xff\r\n\0\0\0\0\0\0\0\0\0";

/// The two-byte sentinel that ends a binary COPY stream, equivalent to a
/// row with `field count == -1`.
pub const BINARY_TRAILER: [u8; 2] = [0xff, 0xff];

const ESCAPES: &[(u8, u8)] =
    &[(b'\x08', b'b'), (b'\t', b't'), (b'\n', b'n'), (b'\x0b', b'v'), (b'\x0c', b'f'), (b'\r', b'r'), (b'\\', b'\\')];

fn escape_byte(b: u8) -> Option<u8> {
    ESCAPES.iter().find(|&&(raw, _)| raw == b).map(|&(_, esc)| esc)
}

fn unescape_byte(b: u8) -> Option<u8> {
    ESCAPES.iter().find(|&&(_, esc)| esc == b).map(|&(raw, _)| raw)
}

/// Formats one row as a tab-separated text line (without trailing `\n`;
/// the caller appends row separators), `NULL` fields as `\N`.
pub fn format_row_text(values: &[Option<&[u8]>]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push(b'\t');
        }
        match value {
            None => out.extend_from_slice(b"\\N"),
            Some(bytes) => {
                for &b in *bytes {
                    match escape_byte(b) {
                        Some(esc) => {
                            out.push(b'\\');
                            out.push(esc);
                        }
                        None => out.push(b),
                    }
                }
            }
        }
    }
    out.push(b'\n');
    out
}

/// Splits one already-newline-stripped text row into its tab-separated
/// fields, unescaping the same six-byte table and mapping `\N` to `None`.
pub fn parse_row_text(line: &[u8]) -> Vec<Option<Vec<u8>>> {
    line.split(|&b| b == b'\t')
        .map(|field| {
            if field == b"\\N" {
                return None;
            }
            let mut out = Vec::with_capacity(field.len());
            let mut iter = field.iter().copied();
            while let Some(b) = iter.next() {
                if b == b'\\' {
                    match iter.next() {
                        Some(esc) => out.push(unescape_byte(esc).unwrap_or(esc)),
                        None => out.push(b'\\'),
                    }
                } else {
                    out.push(b);
                }
            }
            Some(out)
        })
        .collect()
}

/// Formats one row in the binary sub-protocol: `int16` field count then
/// per field `int32` length (or `-1` for `NULL`) + bytes.
pub fn format_row_binary(values: &[Option<&[u8]>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(values.len() as i16).to_be_bytes());
    for value in values {
        match value {
            None => out.extend_from_slice(&(-1i32).to_be_bytes()),
            Some(bytes) => {
                out.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                out.extend_from_slice(bytes);
            }
        }
    }
    out
}

/// Parses one binary row, returning `None` once the `-1` field-count
/// trailer is reached (the caller should then expect `CopyDone`).
pub fn parse_row_binary(data: &[u8]) -> Result<Option<Vec<Option<Vec<u8>>>>> {
    if data.len() < 2 {
        return Err(Error::BadCopyFileFormat("truncated binary COPY row header".into()));
    }
    let count = BE::read_i16(&data[0..2]);
    if count < 0 {
        return Ok(None);
    }
    let mut offset = 2;
    let mut fields = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if data.len() < offset + 4 {
            return Err(Error::BadCopyFileFormat("truncated binary COPY field length".into()));
        }
        let len = BE::read_i32(&data[offset..offset + 4]);
        offset += 4;
        if len < 0 {
            fields.push(None);
            continue;
        }
        let end = offset + len as usize;
        if data.len() < end {
            return Err(Error::BadCopyFileFormat("truncated binary COPY field data".into()));
        }
        fields.push(Some(data[offset..end].to_vec()));
        offset = end;
    }
    Ok(Some(fields))
}

/// Tracks the per-session framing obligations a COPY IN stream owes:
/// whether the binary header has gone out yet, and whether the binary
/// trailer is owed on a clean finish (only if at least one row was
/// written, per §3's invariant).
pub struct CopyInFramer {
    format: Format,
    wrote_header: bool,
    wrote_any_row: bool,
}

impl CopyInFramer {
    pub fn new(format: Format) -> CopyInFramer {
        CopyInFramer { format, wrote_header: false, wrote_any_row: false }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Encodes one row, prefixing the binary signature the first time this
    /// is called on a binary-format framer.
    pub fn encode_row(&mut self, values: &[Option<&[u8]>]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        if self.format == Format::Binary && !self.wrote_header {
            out.extend_from_slice(&BINARY_SIGNATURE);
            self.wrote_header = true;
        }
        match self.format {
            Format::Text => out.extend_from_slice(&format_row_text(values)),
            Format::Binary => out.extend_from_slice(&format_row_binary(values)),
        }
        self.wrote_any_row = true;
        Ok(out)
    }

    /// The bytes to send on a clean finish, if any (the binary trailer, iff
    /// at least one row was written; nothing for text format).
    pub fn finish_bytes(&self) -> Option<Vec<u8>> {
        if self.format == Format::Binary && self.wrote_any_row {
            Some(BINARY_TRAILER.to_vec())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_row_escapes_control_bytes_and_nulls() {
        let row = format_row_text(&[Some(b"a\tb"), None, Some(b"c\nd")]);
        assert_eq!(row, b"a\\tb\t\\N\tc\\nd\n");
    }

    #[test]
    fn text_row_round_trips() {
        let fields: Vec<Option<&[u8]>> = vec![Some(b"hello"), None, Some(b"a\\b")];
        let row = format_row_text(&fields);
        let line = &row[..row.len() - 1]; // strip the trailing \n
        let parsed = parse_row_text(line);
        assert_eq!(parsed, vec![Some(b"hello".to_vec()), None, Some(b"a\\b".to_vec())]);
    }

    #[test]
    fn binary_row_round_trips() {
        let fields: Vec<Option<&[u8]>> = vec![Some(&[1, 2, 3]), None];
        let row = format_row_binary(&fields);
        let parsed = parse_row_binary(&row).unwrap().unwrap();
        assert_eq!(parsed, vec![Some(vec![1, 2, 3]), None]);
    }

    #[test]
    fn binary_trailer_row_parses_as_none() {
        let trailer = (-1i16).to_be_bytes();
        assert_eq!(parse_row_binary(&trailer).unwrap(), None);
    }

    #[test]
    fn framer_emits_binary_header_once_and_trailer_only_if_rows_written() {
        let mut framer = CopyInFramer::new(Format::Binary);
        assert!(framer.finish_bytes().is_none());

        let first = framer.encode_row(&[Some(b"x")]).unwrap();
        assert!(first.starts_with(&BINARY_SIGNATURE));

        let second = framer.encode_row(&[Some(b"y")]).unwrap();
        assert!(!second.starts_with(&BINARY_SIGNATURE));

        assert_eq!(framer.finish_bytes(), Some(BINARY_TRAILER.to_vec()));
    }
}
