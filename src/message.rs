//! Frontend/backend message framing for the PostgreSQL wire protocol.
//!
//! This module only concerns itself with the messages the execution core
//! actually drives (simple and extended query, COPY IN/OUT); connection
//! startup, authentication, and TLS negotiation are out of scope (§1) and
//! are assumed to have already happened by the time a [`WireHandle`
//! ][crate::io::wire::WireHandle] is constructed. Frontend messages encode
//! themselves into an outbound buffer; backend messages are parsed one at a
//! time out of an inbound buffer by [`try_parse`], grounded on the teacher's
//! `postgres/message/response.rs` field-offset-caching decode style.

use crate::io::buf::Buf;
use crate::io::buf_mut::BufMut;
use byteorder::BE;
use bytes::{Bytes, BytesMut};

/// A single format code: text (`0`) or binary (`1`).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(i16)]
pub enum Format {
    Text = 0,
    Binary = 1,
}

impl Format {
    pub fn from_code(code: i16) -> Format {
        if code == 1 {
            Format::Binary
        } else {
            Format::Text
        }
    }
}

/// Messages sent from the client to the server.
pub enum Frontend<'a> {
    Query { sql: &'a str },
    Parse { name: &'a str, sql: &'a str, param_types: &'a [u32] },
    Bind {
        portal: &'a str,
        statement: &'a str,
        param_formats: &'a [Format],
        params: &'a [Option<&'a [u8]>],
        result_format: Format,
    },
    Describe { kind: u8, name: &'a str },
    Execute { portal: &'a str },
    Sync,
    CopyData { data: &'a [u8] },
    CopyDone,
    CopyFail { message: &'a str },
}

impl<'a> Frontend<'a> {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let (tag, start) = self.begin(buf);
        self.encode_body(buf);
        self.finish(buf, tag, start);
    }

    fn begin(&self, buf: &mut Vec<u8>) -> (u8, usize) {
        let tag = self.tag();
        if let Some(tag) = tag {
            buf.put_u8(tag);
        }
        let start = buf.len();
        buf.put_i32::<BE>(0); // placeholder length, patched in `finish`
        (tag.unwrap_or(0), start)
    }

    fn finish(&self, buf: &mut Vec<u8>, _tag: u8, start: usize) {
        let len = (buf.len() - start) as i32;
        buf[start..start + 4].copy_from_slice(&len.to_be_bytes());
    }

    fn tag(&self) -> Option<u8> {
        Some(match self {
            Frontend::Query { .. } => b'Q',
            Frontend::Parse { .. } => b'P',
            Frontend::Bind { .. } => b'B',
            Frontend::Describe { .. } => b'D',
            Frontend::Execute { .. } => b'E',
            Frontend::Sync => b'S',
            Frontend::CopyData { .. } => b'd',
            Frontend::CopyDone => b'c',
            Frontend::CopyFail { .. } => b'f',
        })
    }

    fn encode_body(&self, buf: &mut Vec<u8>) {
        match *self {
            Frontend::Query { sql } => {
                buf.put_str_nul(sql);
            }
            Frontend::Parse { name, sql, param_types } => {
                buf.put_str_nul(name);
                buf.put_str_nul(sql);
                buf.put_i16::<BE>(param_types.len() as i16);
                for oid in param_types {
                    buf.put_i32::<BE>(*oid as i32);
                }
            }
            Frontend::Bind {
                portal,
                statement,
                param_formats,
                params,
                result_format,
            } => {
                buf.put_str_nul(portal);
                buf.put_str_nul(statement);
                buf.put_i16::<BE>(param_formats.len() as i16);
                for fmt in param_formats {
                    buf.put_i16::<BE>(*fmt as i16);
                }
                buf.put_i16::<BE>(params.len() as i16);
                for param in params {
                    match param {
                        Some(bytes) => {
                            buf.put_i32::<BE>(bytes.len() as i32);
                            buf.put_bytes(bytes);
                        }
                        None => buf.put_i32::<BE>(-1),
                    }
                }
                buf.put_i16::<BE>(1);
                buf.put_i16::<BE>(result_format as i16);
            }
            Frontend::Describe { kind, name } => {
                buf.put_u8(kind);
                buf.put_str_nul(name);
            }
            Frontend::Execute { portal } => {
                buf.put_str_nul(portal);
                buf.put_i32::<BE>(0);
            }
            Frontend::Sync => {}
            Frontend::CopyData { data } => buf.put_bytes(data),
            Frontend::CopyDone => {}
            Frontend::CopyFail { message } => buf.put_str_nul(message),
        }
    }
}

/// Messages received from the server. Payloads borrow from the inbound
/// buffer's owned `Bytes` so parsing a message never copies its body.
#[derive(Debug)]
pub enum Backend {
    ParseComplete,
    BindComplete,
    NoData,
    ParameterDescription,
    RowDescription(RowDescription),
    DataRow(DataRow),
    CommandComplete { tag: String },
    EmptyQueryResponse,
    ReadyForQuery { status: TransactionStatus },
    ErrorResponse(ErrorFields),
    NoticeResponse(ErrorFields),
    ParameterStatus { name: String, value: String },
    NotificationResponse { pid: i32, channel: String, payload: String },
    CopyInResponse(CopyResponse),
    CopyOutResponse(CopyResponse),
    CopyBothResponse(CopyResponse),
    CopyData(Bytes),
    CopyDone,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    Idle,
    InTransaction,
    InError,
}

#[derive(Debug)]
pub struct RowDescription {
    pub fields: Vec<FieldDescription>,
}

#[derive(Debug, Clone)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: u32,
    pub column_attr: i16,
    pub type_oid: u32,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: Format,
}

#[derive(Debug)]
pub struct DataRow {
    pub storage: Bytes,
    pub values: Vec<Option<(u32, u32)>>,
}

impl DataRow {
    pub fn get(&self, i: usize) -> Option<&[u8]> {
        let (start, end) = self.values.get(i)?.clone()?;
        Some(&self.storage[start as usize..end as usize])
    }
}

#[derive(Debug)]
pub struct CopyResponse {
    pub format: Format,
    pub column_formats: Vec<Format>,
}

#[derive(Debug)]
pub struct ErrorFields {
    pub severity: PgSeverity,
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
    pub constraint: Option<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PgSeverity {
    Panic,
    Fatal,
    Error,
    Warning,
    Notice,
    Debug,
    Info,
    Log,
}

impl PgSeverity {
    pub fn is_error(self) -> bool {
        matches!(self, Self::Panic | Self::Fatal | Self::Error)
    }

    /// Maps to the `log` level used when this severity is re-emitted by the
    /// ambient logging surface, per SPEC_FULL.md §1A.
    pub fn to_log_level(self) -> log::Level {
        match self {
            PgSeverity::Panic | PgSeverity::Fatal | PgSeverity::Error => log::Level::Error,
            PgSeverity::Warning => log::Level::Warn,
            PgSeverity::Notice | PgSeverity::Info | PgSeverity::Log => log::Level::Info,
            PgSeverity::Debug => log::Level::Debug,
        }
    }
}

fn parse_error_fields(mut body: &[u8]) -> crate::error::Result<ErrorFields> {
    let mut severity = PgSeverity::Log;
    let mut code = String::new();
    let mut message = String::new();
    let mut detail = None;
    let mut hint = None;
    let mut table = None;
    let mut column = None;
    let mut constraint = None;

    loop {
        let ty = body.get_u8()?;
        if ty == 0 {
            break;
        }
        let value = body.get_str_nul()?;
        match ty {
            b'V' => {
                severity = match value {
                    "PANIC" => PgSeverity::Panic,
                    "FATAL" => PgSeverity::Fatal,
                    "ERROR" => PgSeverity::Error,
                    "WARNING" => PgSeverity::Warning,
                    "NOTICE" => PgSeverity::Notice,
                    "DEBUG" => PgSeverity::Debug,
                    "INFO" => PgSeverity::Info,
                    "LOG" => PgSeverity::Log,
                    other => return Err(crate::error::protocol_err!("unknown severity: {:?}", other).into()),
                };
            }
            b'C' => code = value.to_string(),
            b'M' => message = value.to_string(),
            b'D' => detail = Some(value.to_string()),
            b'H' => hint = Some(value.to_string()),
            b't' => table = Some(value.to_string()),
            b'c' => column = Some(value.to_string()),
            b'n' => constraint = Some(value.to_string()),
            _ => {}
        }
    }

    Ok(ErrorFields {
        severity,
        code,
        message,
        detail,
        hint,
        table,
        column,
        constraint,
    })
}

fn parse_copy_response(mut body: &[u8]) -> crate::error::Result<CopyResponse> {
    let format = Format::from_code(body.get_i8()? as i16);
    let n = body.get_i16::<BE>()?;
    let mut column_formats = Vec::with_capacity(n.max(0) as usize);
    for _ in 0..n {
        column_formats.push(Format::from_code(body.get_i16::<BE>()?));
    }
    Ok(CopyResponse { format, column_formats })
}

fn parse_row_description(mut body: &[u8]) -> crate::error::Result<RowDescription> {
    let n = body.get_i16::<BE>()?;
    let mut fields = Vec::with_capacity(n.max(0) as usize);
    for _ in 0..n {
        let name = body.get_str_nul()?.to_string();
        let table_oid = body.get_u32::<BE>()?;
        let column_attr = body.get_i16::<BE>()?;
        let type_oid = body.get_u32::<BE>()?;
        let type_size = body.get_i16::<BE>()?;
        let type_modifier = body.get_i32::<BE>()?;
        let format = Format::from_code(body.get_i16::<BE>()?);
        fields.push(FieldDescription {
            name,
            table_oid,
            column_attr,
            type_oid,
            type_size,
            type_modifier,
            format,
        });
    }
    Ok(RowDescription { fields })
}

fn parse_data_row(storage: Bytes) -> crate::error::Result<DataRow> {
    let mut body: &[u8] = &storage;
    let n = body.get_i16::<BE>()?;
    let mut values = Vec::with_capacity(n.max(0) as usize);
    let base = storage.len() - body.len();
    let mut offset = base as u32;
    for _ in 0..n {
        let len = body.get_i32::<BE>()?;
        if len < 0 {
            values.push(None);
        } else {
            let start = offset + 4;
            let end = start + len as u32;
            values.push(Some((start, end)));
            body.advance(len as usize);
        }
        offset += 4 + len.max(0) as u32;
    }
    Ok(DataRow { storage, values })
}

/// Attempt to parse one complete backend message from the front of `buf`.
/// Returns `None` (leaving `buf` untouched) if fewer than a full message's
/// worth of bytes are buffered yet.
pub fn try_parse(buf: &mut BytesMut) -> crate::error::Result<Option<Backend>> {
    if buf.len() < 5 {
        return Ok(None);
    }

    let tag = buf[0];
    let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    if buf.len() < 1 + len {
        return Ok(None);
    }

    let mut message = buf.split_to(1 + len);
    let body = message.split_off(5).freeze();

    let parsed = match tag {
        b'1' => Backend::ParseComplete,
        b'2' => Backend::BindComplete,
        b'n' => Backend::NoData,
        b't' => Backend::ParameterDescription,
        b'T' => Backend::RowDescription(parse_row_description(&body)?),
        b'D' => Backend::DataRow(parse_data_row(body)?),
        b'C' => {
            let mut b: &[u8] = &body;
            Backend::CommandComplete { tag: b.get_str_nul()?.to_string() }
        }
        b'I' => Backend::EmptyQueryResponse,
        b'Z' => {
            let status = match body[0] {
                b'T' => TransactionStatus::InTransaction,
                b'E' => TransactionStatus::InError,
                _ => TransactionStatus::Idle,
            };
            Backend::ReadyForQuery { status }
        }
        b'E' => Backend::ErrorResponse(parse_error_fields(&body)?),
        b'N' => Backend::NoticeResponse(parse_error_fields(&body)?),
        b'S' => {
            let mut b: &[u8] = &body;
            let name = b.get_str_nul()?.to_string();
            let value = b.get_str_nul()?.to_string();
            Backend::ParameterStatus { name, value }
        }
        b'A' => {
            let mut b: &[u8] = &body;
            let pid = b.get_i32::<BE>()?;
            let channel = b.get_str_nul()?.to_string();
            let payload = b.get_str_nul()?.to_string();
            Backend::NotificationResponse { pid, channel, payload }
        }
        b'G' => Backend::CopyInResponse(parse_copy_response(&body)?),
        b'H' => Backend::CopyOutResponse(parse_copy_response(&body)?),
        b'W' => Backend::CopyBothResponse(parse_copy_response(&body)?),
        b'd' => Backend::CopyData(body),
        b'c' => Backend::CopyDone,
        other => return Err(crate::error::protocol_err!("unexpected message tag: {:?}", other as char).into()),
    };

    Ok(Some(parsed))
}

/// Parse the row count out of a `CommandComplete` tag, e.g. `"INSERT 0 3"`
/// or `"SELECT 12"`. Returns `None` for tags that carry no count (`"BEGIN"`,
/// `"CREATE TABLE"`, ...).
pub fn command_tuples(tag: &str) -> Option<u64> {
    tag.rsplit(' ').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_encodes_with_length_prefix() {
        let mut buf = Vec::new();
        Frontend::Query { sql: "select 1" }.encode(&mut buf);
        assert_eq!(buf[0], b'Q');
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len as usize, buf.len() - 1);
        assert_eq!(&buf[5..], b"select 1\0");
    }

    #[test]
    fn command_complete_tags_parse_counts() {
        assert_eq!(command_tuples("INSERT 0 3"), Some(3));
        assert_eq!(command_tuples("SELECT 12"), Some(12));
        assert_eq!(command_tuples("BEGIN"), None);
        assert_eq!(command_tuples("CREATE TABLE"), None);
    }

    #[test]
    fn try_parse_waits_for_a_full_message() {
        let mut buf = BytesMut::from(&b"Z\0\0\0\x05T"[..]);
        let msg = try_parse(&mut buf).unwrap();
        assert!(matches!(msg, Some(Backend::ReadyForQuery { status: TransactionStatus::InTransaction })));
        assert!(buf.is_empty());

        let mut partial = BytesMut::from(&b"Z\0\0\0"[..]);
        assert!(try_parse(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), 4);
    }

    #[test]
    fn error_response_decodes_fields() {
        let mut body = Vec::new();
        body.put_u8(b'S');
        body.put_str_nul("ERROR");
        body.put_u8(b'V');
        body.put_str_nul("ERROR");
        body.put_u8(b'C');
        body.put_str_nul("23505");
        body.put_u8(b'M');
        body.put_str_nul("duplicate key value");
        body.put_u8(0);

        let fields = parse_error_fields(&body).unwrap();
        assert_eq!(fields.code, "23505");
        assert_eq!(fields.message, "duplicate key value");
        assert!(fields.severity.is_error());
    }
}
