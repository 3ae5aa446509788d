//! Component E: query placeholder rewriting. Three placeholder styles are
//! accepted — numbered (`$1`, `$2`, ...), named (`%(name)s`), and
//! positional (`%s`) — mirroring psycopg3's `PostgresQuery` mogrification.
//! Mixing styles within one statement is a programming error, matched
//! literally against the server's query text so the rewrite is a pure
//! function of the SQL string.

use crate::error::{Error, Result};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ParamStyle {
    /// The statement already uses `$1`, `$2`, ... verbatim; no rewrite.
    Numbered,
    /// `%(name)s` placeholders, rewritten to `$1`, `$2`, ... in first-seen
    /// order; [`Query::names`] records which name each position came from.
    Named,
    /// Bare `%s` placeholders, rewritten to `$1`, `$2`, ... in order.
    Positional,
}

/// The outcome of rewriting one statement's placeholders.
#[derive(Debug, Clone)]
pub struct Query {
    /// The statement with all placeholders rewritten to `$1`, `$2`, ...
    pub sql: String,
    pub style: ParamStyle,
    /// For `Named`, the parameter name backing each `$n` position
    /// (`names[n - 1]`). Empty for `Numbered`/`Positional`.
    pub names: Vec<String>,
    /// Highest `$n` referenced; the caller should supply exactly this many
    /// parameters (for `Numbered`) or `names.len()` (for `Named`/`Positional`).
    pub param_count: usize,
}

/// Scans `sql` outside of single-quoted string literals and double-quoted
/// identifiers, rewriting whichever single placeholder style it finds.
/// `%%` is an escaped literal `%` in any style.
pub fn rewrite(sql: &str) -> Result<Query> {
    let mut style: Option<ParamStyle> = None;
    // Built from byte ranges of the (valid UTF-8) input plus ASCII-only
    // synthesized text ($1, $2, ...), so it stays valid UTF-8 throughout.
    let mut out = Vec::<u8>::with_capacity(sql.len());
    let mut names: Vec<String> = Vec::new();
    let mut numbered_max = 0usize;

    let bytes = sql.as_bytes();
    let mut i = 0;
    let mut in_single = false;
    let mut in_double = false;

    while i < bytes.len() {
        let b = bytes[i];

        if in_single {
            out.push(b);
            if b == b'\'' {
                in_single = false;
            }
            i += 1;
            continue;
        }
        if in_double {
            out.push(b);
            if b == b'"' {
                in_double = false;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' => {
                in_single = true;
                out.push(b'\'');
                i += 1;
            }
            b'"' => {
                in_double = true;
                out.push(b'"');
                i += 1;
            }
            b'$' if bytes.get(i + 1).map_or(false, u8::is_ascii_digit) => {
                set_style(&mut style, ParamStyle::Numbered)?;
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                let n: usize = sql[start..end].parse().unwrap();
                numbered_max = numbered_max.max(n);
                out.extend_from_slice(&bytes[i..end]);
                i = end;
            }
            b'%' if bytes.get(i + 1) == Some(&b'%') => {
                out.push(b'%');
                i += 2;
            }
            b'%' if bytes.get(i + 1) == Some(&b'(') => {
                set_style(&mut style, ParamStyle::Named)?;
                let name_start = i + 2;
                let name_end = sql[name_start..]
                    .find(')')
                    .map(|p| name_start + p)
                    .ok_or_else(|| Error::ProgrammingError("unterminated %(name)s placeholder".into()))?;
                if bytes.get(name_end + 1) != Some(&b's') {
                    return Err(Error::ProgrammingError("malformed %(name)s placeholder".into()));
                }
                let name = sql[name_start..name_end].to_string();
                let index = match names.iter().position(|n| n == &name) {
                    Some(existing) => existing,
                    None => {
                        names.push(name);
                        names.len() - 1
                    }
                };
                out.push(b'$');
                out.extend_from_slice((index + 1).to_string().as_bytes());
                i = name_end + 2;
            }
            b'%' if bytes.get(i + 1) == Some(&b's') => {
                set_style(&mut style, ParamStyle::Positional)?;
                names.push(String::new());
                out.push(b'$');
                out.extend_from_slice(names.len().to_string().as_bytes());
                i += 2;
            }
            _ => {
                out.push(b);
                i += 1;
            }
        }
    }

    let out = String::from_utf8(out).expect("rewrite only ever copies valid UTF-8 byte ranges or ASCII digits");

    let style = style.unwrap_or(ParamStyle::Numbered);
    let param_count = match style {
        ParamStyle::Numbered => numbered_max,
        ParamStyle::Named | ParamStyle::Positional => names.len(),
    };

    Ok(Query { sql: out, style, names, param_count })
}

fn set_style(style: &mut Option<ParamStyle>, found: ParamStyle) -> Result<()> {
    match style {
        None => {
            *style = Some(found);
            Ok(())
        }
        Some(existing) if *existing == found => Ok(()),
        Some(_) => Err(Error::ProgrammingError("query mixes more than one placeholder style".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_placeholders_pass_through_unrewritten() {
        let q = rewrite("select * from t where id = $1 and name = $2").unwrap();
        assert_eq!(q.style, ParamStyle::Numbered);
        assert_eq!(q.param_count, 2);
        assert!(q.sql.contains("$1") && q.sql.contains("$2"));
    }

    #[test]
    fn positional_placeholders_rewrite_in_order() {
        let q = rewrite("select * from t where id = %s and name = %s").unwrap();
        assert_eq!(q.style, ParamStyle::Positional);
        assert_eq!(q.sql, "select * from t where id = $1 and name = $2");
        assert_eq!(q.param_count, 2);
    }

    #[test]
    fn named_placeholders_dedupe_repeated_names() {
        let q = rewrite("select * from t where id = %(id)s or parent = %(id)s").unwrap();
        assert_eq!(q.style, ParamStyle::Named);
        assert_eq!(q.sql, "select * from t where id = $1 or parent = $1");
        assert_eq!(q.names, vec!["id".to_string()]);
    }

    #[test]
    fn mixed_styles_are_rejected() {
        let err = rewrite("select * from t where id = $1 and name = %s").unwrap_err();
        assert!(matches!(err, Error::ProgrammingError(_)));
    }

    #[test]
    fn escaped_percent_is_not_a_placeholder() {
        let q = rewrite("select '100%%' as pct").unwrap();
        assert_eq!(q.sql, "select '100%' as pct");
        assert_eq!(q.style, ParamStyle::Numbered);
        assert_eq!(q.param_count, 0);
    }

    #[test]
    fn placeholders_inside_string_literals_are_ignored() {
        let q = rewrite("select '%s' where id = %s").unwrap();
        assert_eq!(q.sql, "select '%s' where id = $1");
        assert_eq!(q.param_count, 1);
    }
}
