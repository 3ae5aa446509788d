//! Component D: the dumper/loader registry. The source dispatches on
//! runtime type identity (a Python object's class); here that becomes a
//! pair of static traits, [`Dump`] and [`Load`], plus a small oid lookup
//! table for deciding which array type a given element oid adapts to.
//!
//! Builtin element→array oid mappings are process-local and built once
//! behind a [`once_cell::sync::Lazy`]; a connection may additionally
//! register custom mappings (e.g. for a domain or enum type) in its own
//! `Transformer`, backed by a `hashlink::LinkedHashMap` so per-connection
//! overrides never leak into another connection's lookups.

use crate::error::{Error, Result};
use crate::message::Format;
use hashlink::LinkedHashMap;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Well-known builtin type oids, named the way `pg_type.dat` names them.
pub mod oid {
    pub const BOOL: u32 = 16;
    pub const BYTEA: u32 = 17;
    pub const INT8: u32 = 20;
    pub const INT2: u32 = 21;
    pub const INT4: u32 = 23;
    pub const TEXT: u32 = 25;
    pub const FLOAT4: u32 = 700;
    pub const FLOAT8: u32 = 701;
    pub const BOOLARRAY: u32 = 1000;
    pub const BYTEAARRAY: u32 = 1001;
    pub const INT2ARRAY: u32 = 1005;
    pub const INT4ARRAY: u32 = 1007;
    pub const TEXTARRAY: u32 = 1009;
    pub const FLOAT4ARRAY: u32 = 1021;
    pub const FLOAT8ARRAY: u32 = 1022;
    pub const INT8ARRAY: u32 = 1016;
}

/// A Rust value that can be encoded as a bind parameter. `encode` writes
/// the value's wire representation for `format` and returns the oid the
/// server should be told it is.
pub trait Dump {
    fn type_oid(&self) -> u32;
    fn encode(&self, format: Format, out: &mut Vec<u8>) -> Result<()>;
}

/// A Rust value that can be decoded from a result cell. `raw` is `None` for
/// SQL `NULL`.
pub trait Load<'a>: Sized {
    fn decode(raw: Option<&'a [u8]>, oid: u32, format: Format) -> Result<Self>;
}

/// Forwards to the boxed value, so a heterogeneous collection of owned
/// values (e.g. `PgArray<Box<dyn Dump>>`, where each element's concrete
/// type may differ) can still be treated as a single `Dump` type.
impl Dump for Box<dyn Dump> {
    fn type_oid(&self) -> u32 {
        (**self).type_oid()
    }

    fn encode(&self, format: Format, out: &mut Vec<u8>) -> Result<()> {
        (**self).encode(format, out)
    }
}

macro_rules! impl_dump_int {
    ($ty:ty, $oid:expr) => {
        impl Dump for $ty {
            fn type_oid(&self) -> u32 {
                $oid
            }

            fn encode(&self, format: Format, out: &mut Vec<u8>) -> Result<()> {
                match format {
                    Format::Binary => {
                        out.extend_from_slice(&self.to_be_bytes());
                        Ok(())
                    }
                    Format::Text => {
                        out.extend_from_slice(self.to_string().as_bytes());
                        Ok(())
                    }
                }
            }
        }

        impl<'a> Load<'a> for $ty {
            fn decode(raw: Option<&'a [u8]>, _oid: u32, format: Format) -> Result<Self> {
                let raw = raw.ok_or_else(|| Error::DataError("unexpected NULL".into()))?;
                match format {
                    Format::Binary => {
                        let bytes: [u8; std::mem::size_of::<$ty>()] = raw
                            .try_into()
                            .map_err(|_| Error::DataError(format!("bad length for {}", stringify!($ty))))?;
                        Ok(<$ty>::from_be_bytes(bytes))
                    }
                    Format::Text => std::str::from_utf8(raw)
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| Error::DataError(format!("invalid {} literal", stringify!($ty)))),
                }
            }
        }
    };
}

impl_dump_int!(i16, oid::INT2);
impl_dump_int!(i32, oid::INT4);
impl_dump_int!(i64, oid::INT8);

impl Dump for bool {
    fn type_oid(&self) -> u32 {
        oid::BOOL
    }

    fn encode(&self, format: Format, out: &mut Vec<u8>) -> Result<()> {
        match format {
            Format::Binary => out.push(*self as u8),
            Format::Text => out.extend_from_slice(if *self { b"t" } else { b"f" }),
        }
        Ok(())
    }
}

impl<'a> Load<'a> for bool {
    fn decode(raw: Option<&'a [u8]>, _oid: u32, format: Format) -> Result<Self> {
        let raw = raw.ok_or_else(|| Error::DataError("unexpected NULL".into()))?;
        match format {
            Format::Binary => Ok(raw.first() == Some(&1)),
            Format::Text => Ok(raw == b"t"),
        }
    }
}

impl Dump for f64 {
    fn type_oid(&self) -> u32 {
        oid::FLOAT8
    }

    fn encode(&self, format: Format, out: &mut Vec<u8>) -> Result<()> {
        match format {
            Format::Binary => out.extend_from_slice(&self.to_bits().to_be_bytes()),
            Format::Text => out.extend_from_slice(self.to_string().as_bytes()),
        }
        Ok(())
    }
}

impl<'a> Load<'a> for f64 {
    fn decode(raw: Option<&'a [u8]>, _oid: u32, format: Format) -> Result<Self> {
        let raw = raw.ok_or_else(|| Error::DataError("unexpected NULL".into()))?;
        match format {
            Format::Binary => {
                let bytes: [u8; 8] = raw.try_into().map_err(|_| Error::DataError("bad length for f64".into()))?;
                Ok(f64::from_bits(u64::from_be_bytes(bytes)))
            }
            Format::Text => std::str::from_utf8(raw)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::DataError("invalid float literal".into())),
        }
    }
}

impl Dump for str {
    fn type_oid(&self) -> u32 {
        oid::TEXT
    }

    fn encode(&self, _format: Format, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(self.as_bytes());
        Ok(())
    }
}

impl Dump for String {
    fn type_oid(&self) -> u32 {
        oid::TEXT
    }

    fn encode(&self, format: Format, out: &mut Vec<u8>) -> Result<()> {
        self.as_str().encode(format, out)
    }
}

impl<'a> Load<'a> for &'a str {
    fn decode(raw: Option<&'a [u8]>, _oid: u32, _format: Format) -> Result<Self> {
        let raw = raw.ok_or_else(|| Error::DataError("unexpected NULL".into()))?;
        std::str::from_utf8(raw).map_err(|err| Error::DataError(err.to_string()))
    }
}

impl<'a> Load<'a> for String {
    fn decode(raw: Option<&'a [u8]>, oid: u32, format: Format) -> Result<Self> {
        <&str>::decode(raw, oid, format).map(str::to_owned)
    }
}

impl Dump for [u8] {
    fn type_oid(&self) -> u32 {
        oid::BYTEA
    }

    fn encode(&self, format: Format, out: &mut Vec<u8>) -> Result<()> {
        match format {
            Format::Binary => {
                out.extend_from_slice(self);
                Ok(())
            }
            Format::Text => Err(Error::TypeError("bytea cannot be dumped in text format".into())),
        }
    }
}

impl<'a> Load<'a> for &'a [u8] {
    fn decode(raw: Option<&'a [u8]>, _oid: u32, _format: Format) -> Result<Self> {
        raw.ok_or_else(|| Error::DataError("unexpected NULL".into()))
    }
}

impl<'a, T: Load<'a>> Load<'a> for Option<T> {
    fn decode(raw: Option<&'a [u8]>, oid: u32, format: Format) -> Result<Self> {
        match raw {
            None => Ok(None),
            Some(bytes) => T::decode(Some(bytes), oid, format).map(Some),
        }
    }
}

static DEFAULT_ARRAY_OIDS: Lazy<HashMap<u32, u32>> = Lazy::new(|| {
    HashMap::from([
        (oid::BOOL, oid::BOOLARRAY),
        (oid::BYTEA, oid::BYTEAARRAY),
        (oid::INT2, oid::INT2ARRAY),
        (oid::INT4, oid::INT4ARRAY),
        (oid::INT8, oid::INT8ARRAY),
        (oid::FLOAT4, oid::FLOAT4ARRAY),
        (oid::FLOAT8, oid::FLOAT8ARRAY),
        (oid::TEXT, oid::TEXTARRAY),
    ])
});

/// Per-connection overrides and lookups layered on top of the process-wide
/// builtin oid table.
pub struct Transformer {
    array_oid_overrides: LinkedHashMap<u32, u32>,
}

impl Transformer {
    pub fn new() -> Transformer {
        Transformer { array_oid_overrides: LinkedHashMap::new() }
    }

    /// Registers a custom element-oid→array-oid mapping for this
    /// connection only (e.g. for an enum or domain type introspected at
    /// connect time).
    pub fn register_array_oid(&mut self, element_oid: u32, array_oid: u32) {
        self.array_oid_overrides.insert(element_oid, array_oid);
    }

    /// The array oid that should wrap a value of `element_oid`, consulting
    /// this connection's overrides before the process-wide builtin table.
    pub fn array_oid_for(&self, element_oid: u32) -> Option<u32> {
        self.array_oid_overrides
            .get(&element_oid)
            .copied()
            .or_else(|| DEFAULT_ARRAY_OIDS.get(&element_oid).copied())
    }
}

impl Default for Transformer {
    fn default() -> Self {
        Transformer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i32_round_trips_binary() {
        let mut buf = Vec::new();
        42i32.encode(Format::Binary, &mut buf).unwrap();
        let decoded = i32::decode(Some(&buf), oid::INT4, Format::Binary).unwrap();
        assert_eq!(decoded, 42);
    }

    #[test]
    fn i32_round_trips_text() {
        let mut buf = Vec::new();
        (-7i32).encode(Format::Text, &mut buf).unwrap();
        assert_eq!(&buf, b"-7");
        let decoded = i32::decode(Some(&buf), oid::INT4, Format::Text).unwrap();
        assert_eq!(decoded, -7);
    }

    #[test]
    fn option_decodes_null_as_none() {
        let decoded = Option::<i32>::decode(None, oid::INT4, Format::Binary).unwrap();
        assert_eq!(decoded, None);
    }

    #[test]
    fn array_oid_lookup_prefers_connection_override() {
        let mut t = Transformer::new();
        assert_eq!(t.array_oid_for(oid::INT4), Some(oid::INT4ARRAY));
        t.register_array_oid(oid::INT4, 99999);
        assert_eq!(t.array_oid_for(oid::INT4), Some(99999));
    }
}
