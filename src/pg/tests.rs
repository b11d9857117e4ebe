//! Tests for the PostgreSQL wire client.

use super::protocol::*;
use super::types::*;
use bytes::{Bytes, BytesMut};

/// Frame a backend message body with its type byte and length.
fn backend(tag: u8, body: &[u8]) -> Bytes {
    let mut data = vec![tag];
    data.extend_from_slice(&(body.len() as i32 + 4).to_be_bytes());
    data.extend_from_slice(body);
    Bytes::from(data)
}

// ============================================================================
// Protocol Message Encoding Tests
// ============================================================================

mod message_encoding {
    use super::*;

    #[test]
    fn test_query_message_encoding() {
        let msg = QueryMessage {
            query: "SELECT 1".to_string(),
        };

        let encoded = msg.encode();

        assert_eq!(encoded[0], b'Q');
        // 4 (length) + 8 (query) + 1 (terminator)
        let length = i32::from_be_bytes([encoded[1], encoded[2], encoded[3], encoded[4]]);
        assert_eq!(length, 13);
    }

    #[test]
    fn test_parse_message_carries_param_types() {
        let msg = ParseMessage {
            name: "pgprobe_s1".to_string(),
            query: "SELECT $1::int".to_string(),
            param_types: vec![Oid::INT4],
        };

        let encoded = msg.encode();

        assert_eq!(encoded[0], b'P');
        assert!(encoded.ends_with(&[0, 1, 0, 0, 0, 23]));
    }

    #[test]
    fn test_bind_message_text_parameters() {
        let msg = BindMessage {
            portal: String::new(),
            statement: "s".to_string(),
            param_formats: vec![Format::Text],
            params: vec![Some(b"1".to_vec()), None],
            result_formats: vec![Format::Binary],
        };

        let encoded = msg.encode();

        let expected_body: &[u8] = &[
            0, b's', 0, // portal, statement
            0, 1, 0, 0, // one param format: text
            0, 2, // two params
            0, 0, 0, 1, b'1', // "1"
            0xff, 0xff, 0xff, 0xff, // NULL
            0, 1, 0, 1, // one result format: binary
        ];
        assert_eq!(encoded[0], b'B');
        assert_eq!(&encoded[5..], expected_body);
    }

    #[test]
    fn test_bind_message_binary_parameters() {
        let msg = BindMessage {
            portal: String::new(),
            statement: String::new(),
            param_formats: vec![Format::Binary],
            params: vec![Some(PgValue::Int4(1).encode_binary())],
            result_formats: vec![Format::Binary],
        };

        let encoded = msg.encode();

        let expected_body: &[u8] = &[
            0, 0, // portal, statement
            0, 1, 0, 1, // one param format: binary
            0, 1, // one param
            0, 0, 0, 4, 0, 0, 0, 1, // int4 1
            0, 1, 0, 1,
        ];
        assert_eq!(&encoded[5..], expected_body);
    }

    #[test]
    fn test_describe_and_close_target_statements() {
        let describe = DescribeMessage {
            target: Target::Statement,
            name: "s1".to_string(),
        }
        .encode();
        assert_eq!(&describe[..], &[b'D', 0, 0, 0, 8, b'S', b's', b'1', 0]);

        let close = CloseMessage {
            target: Target::Portal,
            name: String::new(),
        }
        .encode();
        assert_eq!(&close[..], &[b'C', 0, 0, 0, 6, b'P', 0]);
    }

    #[test]
    fn test_sync_and_terminate() {
        assert_eq!(&SyncMessage.encode()[..], &[b'S', 0, 0, 0, 4]);
        assert_eq!(&TerminateMessage.encode()[..], &[b'X', 0, 0, 0, 4]);
    }
}

// ============================================================================
// Protocol Message Decoding Tests
// ============================================================================

mod message_decoding {
    use super::*;

    #[test]
    fn test_authentication_requests() {
        let ok = BackendMessage::decode(&mut backend(b'R', &[0, 0, 0, 0])).unwrap();
        assert!(matches!(ok, BackendMessage::AuthenticationOk));

        let md5 =
            BackendMessage::decode(&mut backend(b'R', &[0, 0, 0, 5, 0x12, 0x34, 0x56, 0x78]))
                .unwrap();
        match md5 {
            BackendMessage::AuthenticationMD5Password { salt } => {
                assert_eq!(salt, [0x12, 0x34, 0x56, 0x78]);
            }
            other => panic!("Should decode as AuthenticationMD5Password, got {other:?}"),
        }

        let sasl = BackendMessage::decode(&mut backend(
            b'R',
            b"\0\0\0\x0aSCRAM-SHA-256-PLUS\0SCRAM-SHA-256\0\0",
        ))
        .unwrap();
        match sasl {
            BackendMessage::AuthenticationSASL { mechanisms } => {
                assert_eq!(mechanisms, ["SCRAM-SHA-256-PLUS", "SCRAM-SHA-256"]);
            }
            other => panic!("Should decode as AuthenticationSASL, got {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_authentication_is_an_auth_error() {
        // 7 = GSSAPI
        let err = BackendMessage::decode(&mut backend(b'R', &[0, 0, 0, 7])).unwrap_err();
        assert!(matches!(err, super::super::PgError::Auth(_)));
    }

    #[test]
    fn test_row_description_decoding() {
        let mut body = BytesMut::new();
        body.extend_from_slice(&2i16.to_be_bytes());
        for (name, oid) in [("val_int", 23i32), ("val_bool", 16)] {
            body.extend_from_slice(name.as_bytes());
            body.extend_from_slice(&[0]);
            body.extend_from_slice(&16384i32.to_be_bytes()); // table OID
            body.extend_from_slice(&1i16.to_be_bytes()); // attribute number
            body.extend_from_slice(&oid.to_be_bytes());
            body.extend_from_slice(&4i16.to_be_bytes()); // type size
            body.extend_from_slice(&(-1i32).to_be_bytes()); // type modifier
            body.extend_from_slice(&1i16.to_be_bytes()); // binary
        }

        let msg = BackendMessage::decode(&mut backend(b'T', &body)).unwrap();

        match msg {
            BackendMessage::RowDescription { fields } => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0].name, "val_int");
                assert_eq!(fields[0].type_oid, Oid::INT4);
                assert_eq!(fields[1].type_oid, Oid::BOOL);
                assert_eq!(fields[1].format, Format::Binary);
            }
            other => panic!("Should decode as RowDescription, got {other:?}"),
        }
    }

    #[test]
    fn test_data_row_decoding() {
        let mut body = BytesMut::new();
        body.extend_from_slice(&2i16.to_be_bytes());
        body.extend_from_slice(&4i32.to_be_bytes());
        body.extend_from_slice(&42i32.to_be_bytes());
        body.extend_from_slice(&(-1i32).to_be_bytes());

        let msg = BackendMessage::decode(&mut backend(b'D', &body)).unwrap();

        match msg {
            BackendMessage::DataRow { values } => {
                assert_eq!(values.len(), 2);
                assert_eq!(
                    values[0],
                    Some(Bytes::copy_from_slice(&42i32.to_be_bytes()))
                );
                assert_eq!(values[1], None);
            }
            other => panic!("Should decode as DataRow, got {other:?}"),
        }
    }

    #[test]
    fn test_error_response_decoding() {
        let body = b"SERROR\0C42P01\0Mrelation \"test_data\" does not exist\0\0";

        let msg = BackendMessage::decode(&mut backend(b'E', body)).unwrap();

        match msg {
            BackendMessage::ErrorResponse { fields } => {
                let err = super::super::PgError::from_fields(&fields);
                assert_eq!(err.code(), Some("42P01"));
                assert_eq!(
                    err.to_string(),
                    "ERROR: relation \"test_data\" does not exist (SQLSTATE 42P01)"
                );
            }
            other => panic!("Should decode as ErrorResponse, got {other:?}"),
        }
    }

    #[test]
    fn test_ready_for_query_and_command_complete() {
        let msg = BackendMessage::decode(&mut backend(b'Z', b"T")).unwrap();
        assert!(matches!(
            msg,
            BackendMessage::ReadyForQuery {
                status: TransactionStatus::InTransaction
            }
        ));

        let msg = BackendMessage::decode(&mut backend(b'C', b"SELECT 3\0")).unwrap();
        match msg {
            BackendMessage::CommandComplete { tag } => assert_eq!(tag, "SELECT 3"),
            other => panic!("Should decode as CommandComplete, got {other:?}"),
        }
    }

    #[test]
    fn test_consecutive_messages_in_one_buffer() {
        let mut data = BytesMut::new();
        data.extend_from_slice(&backend(b'1', &[]));
        data.extend_from_slice(&backend(b'2', &[]));
        data.extend_from_slice(&backend(b'n', &[]));
        let mut buf = data.freeze();

        assert!(matches!(
            BackendMessage::decode(&mut buf).unwrap(),
            BackendMessage::ParseComplete
        ));
        assert!(matches!(
            BackendMessage::decode(&mut buf).unwrap(),
            BackendMessage::BindComplete
        ));
        assert!(matches!(
            BackendMessage::decode(&mut buf).unwrap(),
            BackendMessage::NoData
        ));
        assert!(buf.is_empty());
    }
}

// ============================================================================
// Type Encoding/Decoding Tests
// ============================================================================

mod type_codec {
    use super::*;

    #[test]
    fn test_integer_binary_round_trip() {
        for value in [PgValue::Int2(-2), PgValue::Int4(42), PgValue::Int8(9_000_000_000)] {
            let decoded = PgValue::decode_binary(value.type_oid(), &value.encode_binary()).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_text_parameters_match_server_output() {
        assert_eq!(PgValue::Int4(1).encode_text().unwrap(), b"1");
        assert_eq!(PgValue::Bool(false).encode_text().unwrap(), b"f");
        assert_eq!(
            PgValue::Bytea(vec![0xde, 0xad]).encode_text().unwrap(),
            b"\\xdead"
        );
        assert!(PgValue::Null.encode_text().is_err());
    }

    #[test]
    fn test_uuid_binary_decoding() {
        let bytes: [u8; 16] = [
            0x55, 0x0e, 0x84, 0x00, 0xe2, 0x9b, 0x41, 0xd4, 0xa7, 0x16, 0x44, 0x66, 0x55, 0x44,
            0x00, 0x00,
        ];
        let value = PgValue::decode_binary(Oid::UUID, &bytes).unwrap();
        assert_eq!(
            value.render_text().unwrap(),
            "550e8400-e29b-41d4-a716-446655440000"
        );
    }

    #[test]
    fn test_unknown_types_are_kept_raw() {
        let value = PgValue::decode_binary(Oid(1700), b"\x00\x01").unwrap();
        assert!(matches!(value, PgValue::Raw { oid: Oid(1700), .. }));
    }
}

// ============================================================================
// Integration Tests (require running PostgreSQL)
// ============================================================================

#[cfg(feature = "postgres-integration-tests")]
mod integration {
    use super::super::connection::*;
    use super::*;
    use crate::config::{ConnTarget, DEFAULT_DATABASE_URL};

    async fn connect(exec_mode: QueryExecMode, binary_parameters: bool) -> PgConnection {
        let target = ConnTarget::parse(DEFAULT_DATABASE_URL).unwrap();
        let mut config = PgConfig::from_target(&target).with_exec_mode(exec_mode);
        config.binary_parameters = binary_parameters;
        PgConnection::connect(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_simple_protocol_returns_text_decoded_rows() {
        let mut conn = connect(QueryExecMode::SimpleProtocol, false).await;

        let result = conn
            .query("SELECT 1::int4 AS num, 'x' AS letter, now() AS ts", &[])
            .await
            .unwrap();

        assert_eq!(result.command_tag, "SELECT 1");
        let row = &result.rows[0];
        assert_eq!(row.columns()[0].name, "num");
        assert_eq!(row.columns()[0].format, Format::Text);
        assert_eq!(row.get(0), Some(&PgValue::Int4(1)));
        assert_eq!(row.get(1), Some(&PgValue::Text("x".to_string())));
        assert!(matches!(row.get(2), Some(PgValue::Text(_))));

        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_simple_protocol_interpolates_parameters() {
        let mut conn = connect(QueryExecMode::SimpleProtocol, false).await;

        let result = conn
            .query(
                "SELECT $1::int8 AS n, $2::text AS s",
                &[PgValue::Int8(-5), PgValue::Text("it's".to_string())],
            )
            .await
            .unwrap();

        assert_eq!(result.rows[0].get(0), Some(&PgValue::Int8(-5)));
        assert_eq!(result.rows[0].get(1), Some(&PgValue::Text("it's".to_string())));
    }

    #[tokio::test]
    async fn test_cached_statements_are_reused() {
        let mut conn = connect(QueryExecMode::CacheStatement, false).await;
        let sql = "SELECT $1::int4 AS num";

        let first = conn.query(sql, &[PgValue::Int4(1)]).await.unwrap();
        let second = conn.query(sql, &[PgValue::Int4(2)]).await.unwrap();

        assert_eq!(first.rows[0].get(0), Some(&PgValue::Int4(1)));
        assert_eq!(second.rows[0].get(0), Some(&PgValue::Int4(2)));
        assert_eq!(second.rows[0].columns()[0].format, Format::Binary);
        assert!(conn.statement_cache().contains(sql));
        assert_eq!(conn.statement_cache().len(), 1);
    }

    #[tokio::test]
    async fn test_binary_and_text_parameters_agree() {
        let sql = "SELECT $1::int4 = $1 AS same, $2::bool AS flag";
        let params = [PgValue::Int4(1), PgValue::Bool(true)];

        for binary in [false, true] {
            let mut conn = connect(QueryExecMode::CacheStatement, binary).await;
            let result = conn.query(sql, &params).await.unwrap();
            assert_eq!(result.rows[0].get(0), Some(&PgValue::Bool(true)));
            assert_eq!(result.rows[0].get(1), Some(&PgValue::Bool(true)));
        }
    }

    #[tokio::test]
    async fn test_server_errors_leave_connection_usable() {
        let mut conn = connect(QueryExecMode::CacheStatement, false).await;

        let err = conn
            .query("SELECT * FROM no_such_table_for_pgprobe", &[])
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("42P01"));

        let result = conn.query("SELECT 1::int4", &[]).await.unwrap();
        assert_eq!(result.rows.len(), 1);
    }

    #[tokio::test]
    async fn test_row_callback_error_stops_delivery() {
        let mut conn = connect(QueryExecMode::SimpleProtocol, false).await;
        let mut seen = 0;

        let err = conn
            .query_with("SELECT generate_series(1, 100)", &[], |_| {
                seen += 1;
                Err(super::super::PgError::Type("stop".to_string()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, super::super::PgError::Type(_)));
        assert_eq!(seen, 1);
        assert!(conn.query("SELECT 1", &[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_cached_statement_scans_uuid_and_timestamp_rows() {
        let mut conn = connect(QueryExecMode::CacheStatement, false).await;

        // A session-local table shadows any shared test_data.
        conn.query(
            "CREATE TEMP TABLE test_data (
                 id uuid NOT NULL DEFAULT gen_random_uuid(),
                 user_id text NOT NULL,
                 created_at timestamptz NOT NULL DEFAULT now(),
                 updated_at timestamptz NOT NULL DEFAULT now(),
                 val_int integer NOT NULL,
                 val_big bigint NOT NULL,
                 val_bool boolean NOT NULL
             )",
            &[],
        )
        .await
        .unwrap();
        for i in 0..3 {
            conn.query(
                "INSERT INTO test_data (user_id, val_int, val_big, val_bool) VALUES ($1, $2, $3, $4)",
                &[
                    PgValue::Text(format!("user-{i}")),
                    PgValue::Int4(i),
                    PgValue::Int8(i64::from(i) << 33),
                    PgValue::Bool(i % 2 == 0),
                ],
            )
            .await
            .unwrap();
        }

        let first = crate::driver::native::count_test_data(&mut conn).await.unwrap();
        let second = crate::driver::native::count_test_data(&mut conn).await.unwrap();
        assert_eq!((first, second), (3, 3));
    }

    #[tokio::test]
    async fn test_connection_close() {
        let mut conn = connect(QueryExecMode::SimpleProtocol, false).await;

        conn.close().await.unwrap();

        assert!(conn.is_closed());
        assert!(conn.query("SELECT 1", &[]).await.is_err());
    }
}
