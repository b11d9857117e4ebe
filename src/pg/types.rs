//! PostgreSQL type encoding and decoding.
//!
//! Values travel in one of two formats: text (always used by the simple query
//! protocol) and binary (used for extended-protocol results, and for
//! parameters when binary parameters are enabled).
//! Reference: https://www.postgresql.org/docs/current/protocol-overview.html#PROTOCOL-FORMAT-CODES

use std::fmt::Write as _;

use chrono::DateTime;

use super::error::{PgError, PgResult};

/// Seconds between the Unix epoch and the PostgreSQL epoch (2000-01-01).
const PG_EPOCH_UNIX_SECS: i64 = 946_684_800;

/// Days between the Unix epoch and the PostgreSQL epoch.
const PG_EPOCH_UNIX_DAYS: i64 = 10_957;

// ============================================================================
// Type OIDs
// ============================================================================

/// PostgreSQL type object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Oid(pub i32);

impl Oid {
    pub const BOOL: Oid = Oid(16);
    pub const BYTEA: Oid = Oid(17);
    pub const CHAR: Oid = Oid(18);
    pub const NAME: Oid = Oid(19);
    pub const INT8: Oid = Oid(20);
    pub const INT2: Oid = Oid(21);
    pub const INT4: Oid = Oid(23);
    pub const TEXT: Oid = Oid(25);
    pub const FLOAT4: Oid = Oid(700);
    pub const FLOAT8: Oid = Oid(701);
    pub const BPCHAR: Oid = Oid(1042);
    pub const VARCHAR: Oid = Oid(1043);
    pub const DATE: Oid = Oid(1082);
    pub const TIMESTAMP: Oid = Oid(1114);
    pub const TIMESTAMPTZ: Oid = Oid(1184);
    pub const UUID: Oid = Oid(2950);

    /// Zero asks the server to infer the parameter type.
    pub const UNSPECIFIED: Oid = Oid(0);

    #[inline]
    pub fn from_i32(oid: i32) -> Self {
        Oid(oid)
    }

    #[inline]
    pub fn as_i32(self) -> i32 {
        self.0
    }

    pub fn is_text_like(self) -> bool {
        matches!(
            self,
            Oid::TEXT | Oid::VARCHAR | Oid::BPCHAR | Oid::CHAR | Oid::NAME
        )
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Oid::INT2 | Oid::INT4 | Oid::INT8)
    }
}

// ============================================================================
// PostgreSQL Values
// ============================================================================

/// A decoded PostgreSQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    Bytea(Vec<u8>),
    Uuid([u8; 16]),
    /// Microseconds since 2000-01-01 00:00:00.
    Timestamp(i64),
    /// Microseconds since 2000-01-01 00:00:00 UTC.
    TimestampTz(i64),
    /// Days since 2000-01-01.
    Date(i32),
    Raw { oid: Oid, data: Vec<u8> },
}

impl PgValue {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, PgValue::Null)
    }

    /// Type OID sent in Parse for a parameter holding this value.
    pub fn type_oid(&self) -> Oid {
        match self {
            PgValue::Null => Oid::UNSPECIFIED,
            PgValue::Bool(_) => Oid::BOOL,
            PgValue::Int2(_) => Oid::INT2,
            PgValue::Int4(_) => Oid::INT4,
            PgValue::Int8(_) => Oid::INT8,
            PgValue::Float4(_) => Oid::FLOAT4,
            PgValue::Float8(_) => Oid::FLOAT8,
            PgValue::Text(_) => Oid::TEXT,
            PgValue::Bytea(_) => Oid::BYTEA,
            PgValue::Uuid(_) => Oid::UUID,
            PgValue::Timestamp(_) => Oid::TIMESTAMP,
            PgValue::TimestampTz(_) => Oid::TIMESTAMPTZ,
            PgValue::Date(_) => Oid::DATE,
            PgValue::Raw { oid, .. } => *oid,
        }
    }

    /// Encode this value in binary format.
    pub fn encode_binary(&self) -> Vec<u8> {
        match self {
            PgValue::Null => vec![],
            PgValue::Bool(v) => vec![u8::from(*v)],
            PgValue::Int2(v) => v.to_be_bytes().to_vec(),
            PgValue::Int4(v) => v.to_be_bytes().to_vec(),
            PgValue::Int8(v) => v.to_be_bytes().to_vec(),
            PgValue::Float4(v) => v.to_be_bytes().to_vec(),
            PgValue::Float8(v) => v.to_be_bytes().to_vec(),
            PgValue::Text(v) => v.as_bytes().to_vec(),
            PgValue::Bytea(v) => v.clone(),
            PgValue::Uuid(v) => v.to_vec(),
            PgValue::Timestamp(v) | PgValue::TimestampTz(v) => v.to_be_bytes().to_vec(),
            PgValue::Date(v) => v.to_be_bytes().to_vec(),
            PgValue::Raw { data, .. } => data.clone(),
        }
    }

    /// Encode this value in text format, as the server would print it.
    pub fn encode_text(&self) -> PgResult<Vec<u8>> {
        Ok(self.render_text()?.into_bytes())
    }

    /// Render the value the way PostgreSQL's output functions do.
    ///
    /// Timestamps with time zone are rendered in UTC since the session
    /// time zone is not tracked.
    pub fn render_text(&self) -> PgResult<String> {
        let text = match self {
            PgValue::Null => {
                return Err(PgError::Type("NULL has no text representation".to_string()))
            }
            PgValue::Bool(v) => String::from(if *v { "t" } else { "f" }),
            PgValue::Int2(v) => v.to_string(),
            PgValue::Int4(v) => v.to_string(),
            PgValue::Int8(v) => v.to_string(),
            PgValue::Float4(v) => render_float(f64::from(*v)),
            PgValue::Float8(v) => render_float(*v),
            PgValue::Text(v) => v.clone(),
            PgValue::Bytea(v) => {
                let mut out = String::with_capacity(2 + v.len() * 2);
                out.push_str("\\x");
                for b in v {
                    let _ = write!(out, "{b:02x}");
                }
                out
            }
            PgValue::Uuid(v) => uuid::Uuid::from_bytes(*v).hyphenated().to_string(),
            PgValue::Timestamp(us) => render_timestamp(*us)?,
            PgValue::TimestampTz(us) => match render_timestamp(*us)? {
                s if s.ends_with("infinity") => s,
                s => s + "+00",
            },
            PgValue::Date(days) => render_date(*days)?,
            PgValue::Raw { oid, data } => std::str::from_utf8(data)
                .map(str::to_owned)
                .map_err(|_| {
                    PgError::Type(format!("No text rendering for type OID {}", oid.as_i32()))
                })?,
        };
        Ok(text)
    }

    /// Render the value as a SQL literal for client-side interpolation.
    pub fn to_sql_literal(&self) -> PgResult<String> {
        let literal = match self {
            PgValue::Null => "NULL".to_string(),
            PgValue::Bool(v) => String::from(if *v { "TRUE" } else { "FALSE" }),
            PgValue::Int2(_) | PgValue::Int4(_) | PgValue::Int8(_) => {
                let text = self.render_text()?;
                // A leading minus right after another minus would start a comment.
                if text.starts_with('-') {
                    format!("({text})")
                } else {
                    text
                }
            }
            PgValue::Text(v) => quote_literal(v),
            _ => format!("{}::{}", quote_literal(&self.render_text()?), self.cast_name()),
        };
        Ok(literal)
    }

    fn cast_name(&self) -> &'static str {
        match self {
            PgValue::Float4(_) => "float4",
            PgValue::Float8(_) => "float8",
            PgValue::Bytea(_) => "bytea",
            PgValue::Uuid(_) => "uuid",
            PgValue::Timestamp(_) => "timestamp",
            PgValue::TimestampTz(_) => "timestamptz",
            PgValue::Date(_) => "date",
            _ => "text",
        }
    }

    /// Decode a value from binary format.
    pub fn decode_binary(oid: Oid, data: &[u8]) -> PgResult<Self> {
        let value = match oid {
            Oid::BOOL => match data {
                [b] => PgValue::Bool(*b != 0),
                _ => return Err(bad_length("BOOL", data)),
            },
            Oid::INT2 => PgValue::Int2(i16::from_be_bytes(fixed("INT2", data)?)),
            Oid::INT4 => PgValue::Int4(i32::from_be_bytes(fixed("INT4", data)?)),
            Oid::INT8 => PgValue::Int8(i64::from_be_bytes(fixed("INT8", data)?)),
            Oid::FLOAT4 => PgValue::Float4(f32::from_be_bytes(fixed("FLOAT4", data)?)),
            Oid::FLOAT8 => PgValue::Float8(f64::from_be_bytes(fixed("FLOAT8", data)?)),
            _ if oid.is_text_like() => PgValue::Text(
                String::from_utf8(data.to_vec())
                    .map_err(|e| PgError::Type(format!("Invalid UTF-8 in TEXT: {e}")))?,
            ),
            Oid::BYTEA => PgValue::Bytea(data.to_vec()),
            Oid::UUID => PgValue::Uuid(fixed("UUID", data)?),
            Oid::TIMESTAMP => PgValue::Timestamp(i64::from_be_bytes(fixed("TIMESTAMP", data)?)),
            Oid::TIMESTAMPTZ => {
                PgValue::TimestampTz(i64::from_be_bytes(fixed("TIMESTAMPTZ", data)?))
            }
            Oid::DATE => PgValue::Date(i32::from_be_bytes(fixed("DATE", data)?)),
            _ => PgValue::Raw {
                oid,
                data: data.to_vec(),
            },
        };
        Ok(value)
    }

    /// Decode a value from text format (simple query protocol).
    ///
    /// Date and time types stay as their server-rendered text.
    pub fn decode_text(oid: Oid, data: &[u8]) -> PgResult<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|e| PgError::Type(format!("Invalid UTF-8 in text value: {e}")))?;

        match oid {
            Oid::BOOL => match text {
                "t" | "true" => Ok(PgValue::Bool(true)),
                "f" | "false" => Ok(PgValue::Bool(false)),
                other => Err(PgError::Type(format!("Invalid BOOL: {other:?}"))),
            },
            Oid::INT2 => text
                .parse::<i16>()
                .map(PgValue::Int2)
                .map_err(|e| PgError::Type(format!("Invalid INT2: {e}"))),
            Oid::INT4 => text
                .parse::<i32>()
                .map(PgValue::Int4)
                .map_err(|e| PgError::Type(format!("Invalid INT4: {e}"))),
            Oid::INT8 => text
                .parse::<i64>()
                .map(PgValue::Int8)
                .map_err(|e| PgError::Type(format!("Invalid INT8: {e}"))),
            Oid::FLOAT4 => text
                .parse::<f32>()
                .map(PgValue::Float4)
                .map_err(|e| PgError::Type(format!("Invalid FLOAT4: {e}"))),
            Oid::FLOAT8 => text
                .parse::<f64>()
                .map(PgValue::Float8)
                .map_err(|e| PgError::Type(format!("Invalid FLOAT8: {e}"))),
            _ => Ok(PgValue::Text(text.to_string())),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn fixed<const N: usize>(name: &str, data: &[u8]) -> PgResult<[u8; N]> {
    data.try_into().map_err(|_| bad_length(name, data))
}

fn bad_length(name: &str, data: &[u8]) -> PgError {
    PgError::Type(format!("Invalid {name} length: {}", data.len()))
}

fn render_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "Infinity".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        v.to_string()
    }
}

fn render_timestamp(micros: i64) -> PgResult<String> {
    match micros {
        i64::MAX => return Ok("infinity".to_string()),
        i64::MIN => return Ok("-infinity".to_string()),
        _ => {}
    }

    let unix_micros = micros
        .checked_add(PG_EPOCH_UNIX_SECS * 1_000_000)
        .ok_or_else(|| PgError::Type(format!("Timestamp out of range: {micros}")))?;
    let ts = DateTime::from_timestamp_micros(unix_micros)
        .ok_or_else(|| PgError::Type(format!("Timestamp out of range: {micros}")))?
        .naive_utc();

    let mut out = ts.format("%Y-%m-%d %H:%M:%S").to_string();
    let frac = unix_micros.rem_euclid(1_000_000);
    if frac != 0 {
        let digits = format!("{frac:06}");
        out.push('.');
        out.push_str(digits.trim_end_matches('0'));
    }
    Ok(out)
}

fn render_date(days: i32) -> PgResult<String> {
    match days {
        i32::MAX => return Ok("infinity".to_string()),
        i32::MIN => return Ok("-infinity".to_string()),
        _ => {}
    }

    let secs = (i64::from(days) + PG_EPOCH_UNIX_DAYS) * 86_400;
    let date = DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| PgError::Type(format!("Date out of range: {days}")))?
        .date_naive();
    Ok(date.format("%Y-%m-%d").to_string())
}

/// Quote a string as a standard-conforming SQL literal.
pub fn quote_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    out
}
