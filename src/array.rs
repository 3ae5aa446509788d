//! Component H: the PostgreSQL array codec. Arrays are rectangular nested
//! sequences (§3 "Array representation"); `NULL` elements are represented
//! by `None`. Grounded on psycopg3's `TextListAdapter`/`BinaryListAdapter`
//! (encode) and `ArrayCasterText`/`ArrayCasterBinary` (decode): same
//! quoting predicate, same struct layout, same error messages for
//! malformed/ragged input.

use crate::error::{Error, Result};
use crate::message::Format;
use crate::transformer::Dump;
use byteorder::{ByteOrder, BE};

/// A rectangular, possibly-nested array value. `Elements` is the innermost
/// (1-D) dimension; `Nested` wraps sub-arrays one dimension up. `None`
/// marks a `NULL` element.
#[derive(Debug, Clone, PartialEq)]
pub enum PgArray<T> {
    Elements(Vec<Option<T>>),
    Nested(Vec<PgArray<T>>),
}

impl<T> PgArray<T> {
    /// The dimension sizes, outermost first, walking the leftmost spine —
    /// mirrors `BinaryListAdapter.calc_dims`. Does not itself validate that
    /// every sibling shares that length; call [`PgArray::validate`] first.
    fn calc_dims(&self) -> Result<Vec<usize>> {
        match self {
            PgArray::Elements(items) if items.is_empty() => {
                Err(Error::DataError("lists cannot contain empty lists".into()))
            }
            PgArray::Elements(items) => Ok(vec![items.len()]),
            PgArray::Nested(items) => {
                let first = items
                    .first()
                    .ok_or_else(|| Error::DataError("lists cannot contain empty lists".into()))?;
                let mut dims = vec![items.len()];
                dims.extend(first.calc_dims()?);
                Ok(dims)
            }
        }
    }

    /// Verifies every sub-array at a given depth has the same dimensions,
    /// mirroring the "inconsistent lengths" / "inconsistent depths" checks
    /// in `BinaryListAdapter.adapt_list`.
    fn validate(&self, dims: &[usize]) -> Result<()> {
        let (&len, rest) = dims
            .split_first()
            .ok_or_else(|| Error::DataError("nested lists have inconsistent depths".into()))?;

        if rest.is_empty() {
            match self {
                PgArray::Elements(items) if items.is_empty() => {
                    Err(Error::DataError("lists cannot contain empty lists".into()))
                }
                PgArray::Elements(items) if items.len() == len => Ok(()),
                PgArray::Elements(_) => Err(Error::DataError("nested lists have inconsistent lengths".into())),
                PgArray::Nested(_) => Err(Error::DataError("nested lists have inconsistent depths".into())),
            }
        } else {
            match self {
                PgArray::Nested(items) if items.len() == len => {
                    for item in items {
                        item.validate(rest)?;
                    }
                    Ok(())
                }
                PgArray::Nested(_) => Err(Error::DataError("nested lists have inconsistent lengths".into())),
                PgArray::Elements(_) => Err(Error::DataError("nested lists have inconsistent depths".into())),
            }
        }
    }

    /// Computes and validates this array's dimensions. A bare top-level
    /// empty array (`{}`) is the one place an empty list is legal; any
    /// empty list nested inside another list is a data error.
    fn dims(&self) -> Result<Vec<usize>> {
        if let PgArray::Elements(items) = self {
            if items.is_empty() {
                return Ok(vec![0]);
            }
        }
        let dims = self.calc_dims()?;
        self.validate(&dims)?;
        Ok(dims)
    }
}

/// `true` iff `s` must be `"`-quoted to appear in a text array literal,
/// mirroring psycopg3's `_re_needs_quote`: empty, containing any of
/// `"{},\` or whitespace, or case-insensitively equal to `null`.
fn needs_quote(s: &str) -> bool {
    s.is_empty()
        || s.eq_ignore_ascii_case("null")
        || s.chars().any(|c| matches!(c, '"' | '{' | '}' | ',' | '\\') || c.is_whitespace())
}

fn quote_into(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

/// Checks one element's oid against the oid established by the first
/// non-nil element seen so far, mirroring `adapt_list`/`BinaryListAdapter
/// .adapt_list`'s `oid == 0` / `oid != ad[1]` ground-truth check: the
/// first non-nil element fixes `*oid`, and any later element reporting a
/// different oid is a data error. A monomorphic `T` (e.g. `PgArray<i32>`)
/// can never trip this, since every element necessarily reports the same
/// oid; it only has teeth for heterogeneous elements, e.g.
/// `PgArray<Box<dyn Dump>>`.
fn unify_element_oid(oid: &mut Option<u32>, found: u32) -> Result<()> {
    match *oid {
        None => {
            *oid = Some(found);
            Ok(())
        }
        Some(expected) if expected == found => Ok(()),
        Some(expected) => Err(Error::DataError(format!(
            "array contains different types, at least oid {} and oid {}",
            expected, found
        ))),
    }
}

impl<T: Dump> PgArray<T> {
    /// Encodes into the `{...}` text literal grammar.
    pub fn encode_text(&self) -> Result<String> {
        let mut out = String::new();
        let mut oid = None;
        self.write_text(&mut out, &mut oid)?;
        Ok(out)
    }

    fn write_text(&self, out: &mut String, oid: &mut Option<u32>) -> Result<()> {
        out.push('{');
        match self {
            PgArray::Nested(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write_text(out, oid)?;
                }
            }
            PgArray::Elements(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    match item {
                        None => out.push_str("NULL"),
                        Some(value) => {
                            unify_element_oid(oid, value.type_oid())?;
                            let mut raw = Vec::new();
                            value.encode(Format::Text, &mut raw)?;
                            let text = String::from_utf8(raw)
                                .map_err(|err| Error::DataError(err.to_string()))?;
                            if needs_quote(&text) {
                                quote_into(&text, out);
                            } else {
                                out.push_str(&text);
                            }
                        }
                    }
                }
            }
        }
        out.push('}');
        Ok(())
    }

    /// Encodes into the binary wire format: `!III` head (ndims, hasnull,
    /// element oid), `ndims` `!II` dimension/lower-bound pairs, then
    /// row-major elements as `!i` length + bytes (`-1` for `NULL`).
    /// `element_oid` is the oid the server expects for each element; every
    /// non-nil element's own [`Dump::type_oid`] must agree with the first
    /// one encountered (§4.H "element type unification"), independent of
    /// `element_oid` (which only matters for the wire header).
    pub fn encode_binary(&self, element_oid: u32) -> Result<Vec<u8>> {
        let dims = self.dims()?;
        let mut out = Vec::new();

        if dims.iter().product::<usize>() == 0 {
            out.extend_from_slice(&0u32.to_be_bytes());
            out.extend_from_slice(&0u32.to_be_bytes());
            out.extend_from_slice(&element_oid.to_be_bytes());
            return Ok(out);
        }

        let has_null = self.any_null();
        out.extend_from_slice(&(dims.len() as u32).to_be_bytes());
        out.extend_from_slice(&(has_null as u32).to_be_bytes());
        out.extend_from_slice(&element_oid.to_be_bytes());
        for &len in &dims {
            out.extend_from_slice(&(len as u32).to_be_bytes());
            out.extend_from_slice(&1u32.to_be_bytes()); // lower bound, always 1
        }

        let mut oid = None;
        self.write_binary_elements(&mut out, &mut oid)?;
        Ok(out)
    }

    fn any_null(&self) -> bool {
        match self {
            PgArray::Elements(items) => items.iter().any(Option::is_none),
            PgArray::Nested(items) => items.iter().any(PgArray::any_null),
        }
    }

    fn write_binary_elements(&self, out: &mut Vec<u8>, oid: &mut Option<u32>) -> Result<()> {
        match self {
            PgArray::Nested(items) => {
                for item in items {
                    item.write_binary_elements(out, oid)?;
                }
                Ok(())
            }
            PgArray::Elements(items) => {
                for item in items {
                    match item {
                        None => out.extend_from_slice(&(-1i32).to_be_bytes()),
                        Some(value) => {
                            unify_element_oid(oid, value.type_oid())?;
                            let mut raw = Vec::new();
                            value.encode(Format::Binary, &mut raw)?;
                            out.extend_from_slice(&(raw.len() as i32).to_be_bytes());
                            out.extend_from_slice(&raw);
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

impl<T> PgArray<T>
where
    T: for<'a> crate::transformer::Load<'a>,
{
    /// Decodes the binary wire format produced by [`PgArray::encode_binary`].
    pub fn decode_binary(raw: &[u8], element_oid: u32, format: Format) -> Result<PgArray<T>> {
        if raw.len() < 12 {
            return Err(Error::DataError("truncated array header".into()));
        }
        let ndims = BE::read_u32(&raw[0..4]) as usize;
        let _hasnull = BE::read_u32(&raw[4..8]);
        let mut offset = 12;

        if ndims == 0 {
            return Ok(PgArray::Elements(Vec::new()));
        }

        let mut dims = Vec::with_capacity(ndims);
        for _ in 0..ndims {
            if raw.len() < offset + 8 {
                return Err(Error::DataError("truncated array dimension header".into()));
            }
            let len = BE::read_u32(&raw[offset..offset + 4]) as usize;
            dims.push(len);
            offset += 8; // skip the lower-bound field
        }

        let total: usize = dims.iter().product();
        let mut elements = Vec::with_capacity(total);
        for _ in 0..total {
            if raw.len() < offset + 4 {
                return Err(Error::DataError("truncated array element".into()));
            }
            let len = BE::read_i32(&raw[offset..offset + 4]);
            offset += 4;
            if len < 0 {
                elements.push(None);
            } else {
                let end = offset + len as usize;
                if raw.len() < end {
                    return Err(Error::DataError("truncated array element".into()));
                }
                elements.push(Some(T::decode(Some(&raw[offset..end]), element_oid, format)?));
                offset = end;
            }
        }

        Ok(agg(&dims, &mut elements.into_iter()))
    }

    /// Decodes the `{...}` text literal grammar.
    pub fn decode_text(s: &str, element_oid: u32) -> Result<PgArray<T>> {
        let mut chars = s.trim().chars().peekable();
        let value = parse_text(&mut chars, element_oid)?;
        if chars.next().is_some() {
            return Err(Error::DataError("malformed array literal: trailing data".into()));
        }
        Ok(value)
    }
}

/// Rebuilds nested structure from a flat, row-major element list and a
/// dimension vector, mirroring `ArrayCasterBinary.agg`.
fn agg<T>(dims: &[usize], elements: &mut impl Iterator<Item = Option<T>>) -> PgArray<T> {
    match dims.split_first() {
        None | Some((_, [])) => {
            let len = dims.first().copied().unwrap_or(0);
            PgArray::Elements((0..len).map(|_| elements.next().flatten()).collect())
        }
        Some((&len, rest)) => PgArray::Nested((0..len).map(|_| agg(rest, elements)).collect()),
    }
}

fn parse_text<T>(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    element_oid: u32,
) -> Result<PgArray<T>>
where
    T: for<'a> crate::transformer::Load<'a>,
{
    match chars.next() {
        Some('{') => {}
        other => return Err(Error::DataError(format!("malformed array, expected '{{' got {:?}", other))),
    }

    let mut nested = Vec::new();
    let mut elements = Vec::new();
    let mut is_nested = false;

    loop {
        match chars.peek() {
            Some('}') => {
                chars.next();
                break;
            }
            Some('{') => {
                is_nested = true;
                nested.push(parse_text(chars, element_oid)?);
            }
            Some(_) => {
                let token = parse_token(chars)?;
                elements.push(match token {
                    None => None,
                    Some(text) => Some(T::decode(Some(text.as_bytes()), element_oid, Format::Text)?),
                });
            }
            None => return Err(Error::DataError("malformed array, unexpected end of input".into())),
        }
        match chars.peek() {
            Some(',') => {
                chars.next();
            }
            Some('}') => {}
            other => return Err(Error::DataError(format!("malformed array, unexpected {:?}", other))),
        }
    }

    if is_nested {
        Ok(PgArray::Nested(nested))
    } else {
        Ok(PgArray::Elements(elements))
    }
}

/// Parses one unquoted or quoted scalar token, returning `None` for the
/// bare `NULL` keyword.
fn parse_token(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Result<Option<String>> {
    if chars.peek() == Some(&'"') {
        chars.next();
        let mut s = String::new();
        loop {
            match chars.next() {
                Some('\\') => match chars.next() {
                    Some(c) => s.push(c),
                    None => return Err(Error::DataError("malformed array, unterminated quoted value".into())),
                },
                Some('"') => break,
                Some(c) => s.push(c),
                None => return Err(Error::DataError("malformed array, unterminated quoted value".into())),
            }
        }
        return Ok(Some(s));
    }

    let mut s = String::new();
    while let Some(&c) = chars.peek() {
        if c == ',' || c == '}' {
            break;
        }
        s.push(c);
        chars.next();
    }
    if s.eq_ignore_ascii_case("null") {
        Ok(None)
    } else {
        Ok(Some(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformer::oid;

    #[test]
    fn flat_array_round_trips_text() {
        let arr: PgArray<i32> = PgArray::Elements(vec![Some(1), Some(2), None, Some(-3)]);
        let text = arr.encode_text().unwrap();
        assert_eq!(text, "{1,2,NULL,-3}");
        let decoded: PgArray<i32> = PgArray::decode_text(&text, oid::INT4).unwrap();
        assert_eq!(decoded, arr);
    }

    #[test]
    fn nested_array_round_trips_text() {
        let arr: PgArray<i32> = PgArray::Nested(vec![
            PgArray::Elements(vec![Some(1), Some(2)]),
            PgArray::Elements(vec![Some(3), Some(4)]),
        ]);
        let text = arr.encode_text().unwrap();
        assert_eq!(text, "{{1,2},{3,4}}");
        let decoded: PgArray<i32> = PgArray::decode_text(&text, oid::INT4).unwrap();
        assert_eq!(decoded, arr);
    }

    #[test]
    fn strings_needing_quotes_are_quoted() {
        let arr: PgArray<String> = PgArray::Elements(vec![Some("hi there".to_string()), Some("null".to_string())]);
        let text = arr.encode_text().unwrap();
        assert_eq!(text, r#"{"hi there","null"}"#);
    }

    #[test]
    fn ragged_nested_array_is_rejected() {
        let arr: PgArray<i32> = PgArray::Nested(vec![
            PgArray::Elements(vec![Some(1), Some(2)]),
            PgArray::Elements(vec![Some(3)]),
        ]);
        assert!(arr.dims().is_err());
    }

    #[test]
    fn empty_inner_list_is_rejected_for_binary() {
        let arr: PgArray<i32> = PgArray::Nested(vec![PgArray::Elements(vec![])]);
        let err = arr.encode_binary(oid::INT4).unwrap_err();
        assert!(matches!(err, Error::DataError(_)));
    }

    #[test]
    fn top_level_empty_array_is_still_legal() {
        let arr: PgArray<i32> = PgArray::Elements(vec![]);
        assert_eq!(arr.dims().unwrap(), vec![0]);
    }

    #[test]
    fn binary_round_trip_preserves_nulls_and_shape() {
        let arr: PgArray<i32> = PgArray::Nested(vec![
            PgArray::Elements(vec![Some(1), None]),
            PgArray::Elements(vec![Some(3), Some(4)]),
        ]);
        let bytes = arr.encode_binary(oid::INT4).unwrap();
        let decoded: PgArray<i32> = PgArray::decode_binary(&bytes, oid::INT4, Format::Binary).unwrap();
        assert_eq!(decoded, arr);
    }

    #[test]
    fn empty_array_encodes_with_zero_dims() {
        let arr: PgArray<i32> = PgArray::Elements(Vec::new());
        let bytes = arr.encode_binary(oid::INT4).unwrap();
        assert_eq!(&bytes[0..4], &0u32.to_be_bytes());
        let decoded: PgArray<i32> = PgArray::decode_binary(&bytes, oid::INT4, Format::Binary).unwrap();
        assert_eq!(decoded, PgArray::Elements(Vec::new()));
    }

    #[test]
    fn heterogeneous_elements_with_the_same_oid_still_encode() {
        let arr: PgArray<Box<dyn Dump>> = PgArray::Elements(vec![
            Some(Box::new(1i32) as Box<dyn Dump>),
            None,
            Some(Box::new(2i32) as Box<dyn Dump>),
        ]);
        assert_eq!(arr.encode_text().unwrap(), "{1,NULL,2}");
        assert!(arr.encode_binary(oid::INT4ARRAY).is_ok());
    }

    #[test]
    fn mismatched_element_oids_are_rejected_in_text() {
        let arr: PgArray<Box<dyn Dump>> = PgArray::Elements(vec![
            Some(Box::new(1i32) as Box<dyn Dump>),
            Some(Box::new(2.5f64) as Box<dyn Dump>),
        ]);
        let err = arr.encode_text().unwrap_err();
        assert!(matches!(err, Error::DataError(_)));
    }

    #[test]
    fn mismatched_element_oids_are_rejected_in_binary() {
        let arr: PgArray<Box<dyn Dump>> = PgArray::Elements(vec![
            Some(Box::new(1i32) as Box<dyn Dump>),
            Some(Box::new(2.5f64) as Box<dyn Dump>),
        ]);
        let err = arr.encode_binary(oid::INT4ARRAY).unwrap_err();
        assert!(matches!(err, Error::DataError(_)));
    }

    #[test]
    fn mismatched_element_oids_in_nested_lists_are_also_rejected() {
        let arr: PgArray<Box<dyn Dump>> = PgArray::Nested(vec![
            PgArray::Elements(vec![Some(Box::new(1i32) as Box<dyn Dump>)]),
            PgArray::Elements(vec![Some(Box::new("nope".to_string()) as Box<dyn Dump>)]),
        ]);
        let err = arr.encode_text().unwrap_err();
        assert!(matches!(err, Error::DataError(_)));
    }
}
