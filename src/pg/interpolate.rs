//! Client-side parameter interpolation for the simple query protocol.
//!
//! The simple protocol has no Bind step, so `$N` placeholders are replaced by
//! SQL literals before the text is sent. Placeholders inside string literals,
//! quoted identifiers, dollar-quoted bodies and comments are left alone.

use super::error::{PgError, PgResult};
use super::types::PgValue;

/// Replace every `$N` placeholder in `sql` with the literal for `params[N-1]`.
pub fn interpolate(sql: &str, params: &[PgValue]) -> PgResult<String> {
    if params.is_empty() {
        return Ok(sql.to_string());
    }

    let literals = params
        .iter()
        .map(PgValue::to_sql_literal)
        .collect::<PgResult<Vec<_>>>()?;

    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + 16 * literals.len());
    let mut i = 0;
    // Start of the span not yet copied to `out`.
    let mut copied = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => i = skip_quoted(bytes, i, b'\''),
            b'"' => i = skip_quoted(bytes, i, b'"'),
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = bytes[i..]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map_or(bytes.len(), |p| i + p + 1);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            b'$' => {
                let digits = bytes[i + 1..]
                    .iter()
                    .take_while(|b| b.is_ascii_digit())
                    .count();
                if digits > 0 {
                    let index: usize = sql[i + 1..i + 1 + digits]
                        .parse()
                        .map_err(|_| PgError::Protocol(format!("Bad placeholder in {sql:?}")))?;
                    let literal = index
                        .checked_sub(1)
                        .and_then(|n| literals.get(n))
                        .ok_or_else(|| {
                            PgError::Protocol(format!(
                                "Placeholder ${index} has no parameter ({} given)",
                                literals.len()
                            ))
                        })?;
                    out.push_str(&sql[copied..i]);
                    out.push_str(literal);
                    i += 1 + digits;
                    copied = i;
                } else if let Some(end) = dollar_quote_end(bytes, i) {
                    i = end;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }

    out.push_str(&sql[copied..]);
    Ok(out)
}

/// Skip a quoted run starting at `start`; a doubled quote is an escape.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Block comments nest in PostgreSQL.
fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'/', b'*') => {
                depth += 1;
                i += 2;
            }
            (b'*', b'/') => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

/// If `start` opens a `$tag$` quote, return the index just past its close.
fn dollar_quote_end(bytes: &[u8], start: usize) -> Option<usize> {
    let tag_len = bytes[start + 1..]
        .iter()
        .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
        .count();
    let tag_end = start + 1 + tag_len;
    if bytes.get(tag_end) != Some(&b'$') {
        return None;
    }

    let tag = &bytes[start..=tag_end];
    let body_start = tag_end + 1;
    let close = bytes[body_start..]
        .windows(tag.len())
        .position(|w| w == tag)
        .map_or(bytes.len(), |p| body_start + p + tag.len());
    Some(close)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replaces_placeholders() {
        let sql = "SELECT * FROM test_data WHERE $1::int = $1 AND user_id = $2";
        let out = interpolate(sql, &[PgValue::Int4(1), PgValue::Text("o'brien".into())]).unwrap();
        assert_eq!(
            out,
            "SELECT * FROM test_data WHERE 1::int = 1 AND user_id = 'o''brien'"
        );
    }

    #[test]
    fn test_leaves_quoted_and_commented_text_alone() {
        let sql = "SELECT '$1', \"$1\", $$ $1 $$, $q$ $1 $q$ -- $1\n/* $1 /* $1 */ */ $1";
        let out = interpolate(sql, &[PgValue::Int8(-5)]).unwrap();
        assert_eq!(
            out,
            "SELECT '$1', \"$1\", $$ $1 $$, $q$ $1 $q$ -- $1\n/* $1 /* $1 */ */ (-5)"
        );
    }

    #[test]
    fn test_missing_parameter_is_an_error() {
        assert!(interpolate("SELECT $2", &[PgValue::Int4(1)]).is_err());
        assert!(interpolate("SELECT $0", &[PgValue::Int4(1)]).is_err());
    }

    #[test]
    fn test_no_params_passes_sql_through() {
        assert_eq!(interpolate("SELECT $1", &[]).unwrap(), "SELECT $1");
    }
}
