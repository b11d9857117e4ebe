//! The `test_data` record shape and the queries that read it.

use thiserror::Error;

use crate::pg::PgValue;

/// Column order of every probe query.
pub const COLUMNS: [&str; 7] = [
    "id",
    "user_id",
    "created_at",
    "updated_at",
    "val_int",
    "val_big",
    "val_bool",
];

/// The fixed probe query.
pub const SELECT_TEST_DATA: &str =
    "SELECT id, user_id, created_at, updated_at, val_int, val_big, val_bool FROM test_data";

/// The same query with a tautological bound parameter, which forces a
/// client onto its parameter-binding path.
pub const SELECT_TEST_DATA_BOUND: &str =
    "SELECT id, user_id, created_at, updated_at, val_int, val_big, val_bool FROM test_data WHERE $1::int = $1";

/// A row that does not fit [`TestDataRow`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("column {column}: {reason}")]
pub struct ScanError {
    pub column: &'static str,
    pub reason: String,
}

impl ScanError {
    pub fn new(column: &'static str, reason: impl Into<String>) -> Self {
        Self {
            column,
            reason: reason.into(),
        }
    }
}

/// One row of `test_data`.
///
/// Identifier and timestamp columns are kept as the text the server would
/// print for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDataRow {
    pub id: String,
    pub user_id: String,
    pub created_at: String,
    pub updated_at: String,
    pub val_int: i32,
    pub val_big: i64,
    pub val_bool: bool,
}

impl TestDataRow {
    /// Scan decoded wire values, in [`COLUMNS`] order.
    pub fn from_values(values: Vec<PgValue>) -> Result<Self, ScanError> {
        let values: [PgValue; 7] = values.try_into().map_err(|v: Vec<PgValue>| {
            ScanError::new("row", format!("expected {} columns, got {}", COLUMNS.len(), v.len()))
        })?;
        let [id, user_id, created_at, updated_at, val_int, val_big, val_bool] = values;

        Ok(Self {
            id: text_value(COLUMNS[0], id)?,
            user_id: text_value(COLUMNS[1], user_id)?,
            created_at: text_value(COLUMNS[2], created_at)?,
            updated_at: text_value(COLUMNS[3], updated_at)?,
            val_int: int_value(COLUMNS[4], val_int)?,
            val_big: int_value(COLUMNS[5], val_big)?,
            val_bool: match val_bool {
                PgValue::Bool(b) => b,
                other => return Err(mismatch(COLUMNS[6], "bool", &other)),
            },
        })
    }

    /// Scan a row of text-format fields, as returned by a simple query.
    pub fn from_text_fields(fields: &[Option<&str>]) -> Result<Self, ScanError> {
        if fields.len() != COLUMNS.len() {
            return Err(ScanError::new(
                "row",
                format!("expected {} columns, got {}", COLUMNS.len(), fields.len()),
            ));
        }

        let field = |idx: usize| {
            fields[idx].ok_or_else(|| ScanError::new(COLUMNS[idx], "cannot scan NULL"))
        };

        Ok(Self {
            id: field(0)?.to_string(),
            user_id: field(1)?.to_string(),
            created_at: field(2)?.to_string(),
            updated_at: field(3)?.to_string(),
            val_int: parse_int(COLUMNS[4], field(4)?)?,
            val_big: parse_int(COLUMNS[5], field(5)?)?,
            val_bool: match field(6)? {
                "t" | "true" => true,
                "f" | "false" => false,
                other => {
                    return Err(ScanError::new(
                        COLUMNS[6],
                        format!("invalid boolean text {other:?}"),
                    ))
                }
            },
        })
    }
}

fn text_value(column: &'static str, value: PgValue) -> Result<String, ScanError> {
    match value {
        PgValue::Text(s) => Ok(s),
        PgValue::Uuid(_)
        | PgValue::Timestamp(_)
        | PgValue::TimestampTz(_)
        | PgValue::Date(_)
        | PgValue::Int2(_)
        | PgValue::Int4(_)
        | PgValue::Int8(_) => value
            .render_text()
            .map_err(|e| ScanError::new(column, e.to_string())),
        other => Err(mismatch(column, "text", &other)),
    }
}

/// Widen or narrow any integer value into `T`, rejecting out-of-range values.
fn int_value<T>(column: &'static str, value: PgValue) -> Result<T, ScanError>
where
    T: TryFrom<i64>,
{
    let wide = match value {
        PgValue::Int2(v) => i64::from(v),
        PgValue::Int4(v) => i64::from(v),
        PgValue::Int8(v) => v,
        other => return Err(mismatch(column, "integer", &other)),
    };
    T::try_from(wide).map_err(|_| ScanError::new(column, format!("{wide} is out of range")))
}

fn parse_int<T>(column: &'static str, text: &str) -> Result<T, ScanError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    text.parse::<T>()
        .map_err(|e| ScanError::new(column, format!("invalid integer text {text:?}: {e}")))
}

fn mismatch(column: &'static str, expected: &str, got: &PgValue) -> ScanError {
    if got.is_null() {
        ScanError::new(column, "cannot scan NULL")
    } else {
        ScanError::new(
            column,
            format!("cannot scan type OID {} into {expected}", got.type_oid().as_i32()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_row() -> Vec<PgValue> {
        vec![
            PgValue::Uuid([0x11; 16]),
            PgValue::Text("user-1".to_string()),
            PgValue::TimestampTz(0),
            PgValue::Timestamp(1_500_000),
            PgValue::Int8(42),
            PgValue::Int4(-7),
            PgValue::Bool(true),
        ]
    }

    #[test]
    fn scans_binary_values() {
        let row = TestDataRow::from_values(wire_row()).unwrap();
        assert_eq!(row.id, "11111111-1111-1111-1111-111111111111");
        assert_eq!(row.user_id, "user-1");
        assert_eq!(row.created_at, "2000-01-01 00:00:00+00");
        assert_eq!(row.updated_at, "2000-01-01 00:00:01.5");
        assert_eq!(row.val_int, 42);
        assert_eq!(row.val_big, -7);
        assert!(row.val_bool);
    }

    #[test]
    fn rejects_null_and_overflow() {
        let mut values = wire_row();
        values[6] = PgValue::Null;
        let err = TestDataRow::from_values(values).unwrap_err();
        assert_eq!(err, ScanError::new("val_bool", "cannot scan NULL"));

        let mut values = wire_row();
        values[4] = PgValue::Int8(i64::from(i32::MAX) + 1);
        assert_eq!(TestDataRow::from_values(values).unwrap_err().column, "val_int");

        let mut values = wire_row();
        values.pop();
        assert_eq!(TestDataRow::from_values(values).unwrap_err().column, "row");
    }

    #[test]
    fn scans_text_fields() {
        let fields = [
            Some("a1"),
            Some("u1"),
            Some("2024-01-01 10:00:00+00"),
            Some("2024-01-02 10:00:00+00"),
            Some("5"),
            Some("9000000000"),
            Some("f"),
        ];
        let row = TestDataRow::from_text_fields(&fields).unwrap();
        assert_eq!(row.created_at, "2024-01-01 10:00:00+00");
        assert_eq!(row.val_big, 9_000_000_000);
        assert!(!row.val_bool);

        let mut bad = fields;
        bad[4] = Some("9000000000");
        assert_eq!(TestDataRow::from_text_fields(&bad).unwrap_err().column, "val_int");

        let mut null = fields;
        null[0] = None;
        assert_eq!(
            TestDataRow::from_text_fields(&null).unwrap_err().to_string(),
            "column id: cannot scan NULL"
        );
    }

    #[test]
    fn bound_query_only_adds_the_predicate() {
        assert_eq!(
            SELECT_TEST_DATA_BOUND.strip_suffix(" WHERE $1::int = $1"),
            Some(SELECT_TEST_DATA)
        );
    }
}
