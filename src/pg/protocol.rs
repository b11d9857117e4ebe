//! PostgreSQL wire protocol message encoding and decoding.
//!
//! This module implements the PostgreSQL v3 protocol messages used by the
//! probe: startup and authentication, the simple query sub-protocol and the
//! extended query sub-protocol.
//! Reference: https://www.postgresql.org/docs/current/protocol-message-formats.html

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use super::error::{PgError, PgResult};
use super::types::Oid;

// ============================================================================
// Protocol Constants
// ============================================================================

/// PostgreSQL protocol version 3.0
pub const PROTOCOL_VERSION: i32 = 196608; // (3 << 16) | 0

/// Header size of every backend message: type byte plus length.
pub const HEADER_LEN: usize = 5;

/// Format codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum Format {
    Text = 0,
    Binary = 1,
}

impl Format {
    fn from_code(code: i16) -> PgResult<Self> {
        match code {
            0 => Ok(Format::Text),
            1 => Ok(Format::Binary),
            other => Err(PgError::Protocol(format!("Unknown format code: {other}"))),
        }
    }
}

/// Transaction status indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Idle,
    InTransaction,
    Failed,
}

impl TryFrom<u8> for TransactionStatus {
    type Error = PgError;

    fn try_from(b: u8) -> PgResult<Self> {
        match b {
            b'I' => Ok(TransactionStatus::Idle),
            b'T' => Ok(TransactionStatus::InTransaction),
            b'E' => Ok(TransactionStatus::Failed),
            other => Err(PgError::Protocol(format!(
                "Unknown transaction status: {}",
                other as char
            ))),
        }
    }
}

// ============================================================================
// Frontend (Client -> Server) Messages
// ============================================================================

/// Trait for encoding frontend messages
pub trait FrontendMessage {
    fn encode(&self) -> BytesMut;
}

/// Prefix `body` with its type byte and length (which counts itself).
fn tagged(tag: u8, body: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    buf.put_u8(tag);
    buf.put_i32(body.len() as i32 + 4);
    buf.put_slice(body);
    buf
}

fn put_cstring(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

/// Startup message sent at connection start
#[derive(Debug, Clone)]
pub struct StartupMessage {
    pub user: String,
    pub database: Option<String>,
    pub options: Vec<(String, String)>,
}

impl FrontendMessage for StartupMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();

        // Length placeholder, patched below. The startup packet has no type byte.
        buf.put_i32(0);
        buf.put_i32(PROTOCOL_VERSION);

        put_cstring(&mut buf, "user");
        put_cstring(&mut buf, &self.user);

        if let Some(ref db) = self.database {
            put_cstring(&mut buf, "database");
            put_cstring(&mut buf, db);
        }

        for (key, value) in &self.options {
            put_cstring(&mut buf, key);
            put_cstring(&mut buf, value);
        }

        buf.put_u8(0);

        let len = buf.len() as i32;
        buf[0..4].copy_from_slice(&len.to_be_bytes());
        buf
    }
}

/// Password message (cleartext or MD5 digest)
#[derive(Debug, Clone)]
pub struct PasswordMessage {
    pub password: String,
}

impl FrontendMessage for PasswordMessage {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        put_cstring(&mut body, &self.password);
        tagged(b'p', &body)
    }
}

/// SASL Initial Response message ('p') - First SCRAM message
#[derive(Debug, Clone)]
pub struct SaslInitialResponseMessage {
    pub mechanism: String,
    pub data: Vec<u8>,
}

impl FrontendMessage for SaslInitialResponseMessage {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        put_cstring(&mut body, &self.mechanism);
        body.put_i32(self.data.len() as i32);
        body.put_slice(&self.data);
        tagged(b'p', &body)
    }
}

/// SASL Response message ('p') - Subsequent SCRAM messages
#[derive(Debug, Clone)]
pub struct SaslResponseMessage {
    pub data: Vec<u8>,
}

impl FrontendMessage for SaslResponseMessage {
    fn encode(&self) -> BytesMut {
        tagged(b'p', &self.data)
    }
}

/// Simple query message ('Q')
#[derive(Debug, Clone)]
pub struct QueryMessage {
    pub query: String,
}

impl FrontendMessage for QueryMessage {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::with_capacity(self.query.len() + 1);
        put_cstring(&mut body, &self.query);
        tagged(b'Q', &body)
    }
}

/// Parse message ('P') - Creates a prepared statement
#[derive(Debug, Clone)]
pub struct ParseMessage {
    pub name: String,
    pub query: String,
    pub param_types: Vec<Oid>,
}

impl FrontendMessage for ParseMessage {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        put_cstring(&mut body, &self.name);
        put_cstring(&mut body, &self.query);
        body.put_i16(self.param_types.len() as i16);
        for oid in &self.param_types {
            body.put_i32(oid.as_i32());
        }
        tagged(b'P', &body)
    }
}

/// Bind message ('B') - Binds parameters to a prepared statement.
///
/// Parameters are already encoded in the format given by `param_formats`;
/// `None` is sent as SQL NULL.
#[derive(Debug, Clone)]
pub struct BindMessage {
    pub portal: String,
    pub statement: String,
    pub param_formats: Vec<Format>,
    pub params: Vec<Option<Vec<u8>>>,
    pub result_formats: Vec<Format>,
}

impl FrontendMessage for BindMessage {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        put_cstring(&mut body, &self.portal);
        put_cstring(&mut body, &self.statement);

        body.put_i16(self.param_formats.len() as i16);
        for fmt in &self.param_formats {
            body.put_i16(*fmt as i16);
        }

        body.put_i16(self.params.len() as i16);
        for param in &self.params {
            match param {
                Some(data) => {
                    body.put_i32(data.len() as i32);
                    body.put_slice(data);
                }
                None => body.put_i32(-1),
            }
        }

        body.put_i16(self.result_formats.len() as i16);
        for fmt in &self.result_formats {
            body.put_i16(*fmt as i16);
        }

        tagged(b'B', &body)
    }
}

/// Execute message ('E') - Executes a bound portal
#[derive(Debug, Clone)]
pub struct ExecuteMessage {
    pub portal: String,
    /// 0 means no limit.
    pub max_rows: i32,
}

impl FrontendMessage for ExecuteMessage {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        put_cstring(&mut body, &self.portal);
        body.put_i32(self.max_rows);
        tagged(b'E', &body)
    }
}

/// What a Describe or Close message targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Statement,
    Portal,
}

impl Target {
    fn code(self) -> u8 {
        match self {
            Target::Statement => b'S',
            Target::Portal => b'P',
        }
    }
}

/// Describe message ('D')
#[derive(Debug, Clone)]
pub struct DescribeMessage {
    pub target: Target,
    pub name: String,
}

impl FrontendMessage for DescribeMessage {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        body.put_u8(self.target.code());
        put_cstring(&mut body, &self.name);
        tagged(b'D', &body)
    }
}

/// Close message ('C') - Releases a statement or portal on the server
#[derive(Debug, Clone)]
pub struct CloseMessage {
    pub target: Target,
    pub name: String,
}

impl FrontendMessage for CloseMessage {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        body.put_u8(self.target.code());
        put_cstring(&mut body, &self.name);
        tagged(b'C', &body)
    }
}

/// Sync message ('S') - Marks end of an extended query
#[derive(Debug, Clone, Copy)]
pub struct SyncMessage;

impl FrontendMessage for SyncMessage {
    fn encode(&self) -> BytesMut {
        tagged(b'S', &[])
    }
}

/// Terminate message ('X') - Close the connection
#[derive(Debug, Clone, Copy)]
pub struct TerminateMessage;

impl FrontendMessage for TerminateMessage {
    fn encode(&self) -> BytesMut {
        tagged(b'X', &[])
    }
}

// ============================================================================
// Backend (Server -> Client) Messages
// ============================================================================

/// Field description in a RowDescription message
#[derive(Debug, Clone)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: i32,
    pub column_attr: i16,
    pub type_oid: Oid,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: Format,
}

/// Backend message types
#[derive(Debug, Clone)]
pub enum BackendMessage {
    // Authentication
    AuthenticationOk,
    AuthenticationCleartextPassword,
    AuthenticationMD5Password { salt: [u8; 4] },
    AuthenticationSASL { mechanisms: Vec<String> },
    AuthenticationSASLContinue { data: Bytes },
    AuthenticationSASLFinal { data: Bytes },

    // Query responses
    RowDescription { fields: Vec<FieldDescription> },
    DataRow { values: Vec<Option<Bytes>> },
    CommandComplete { tag: String },
    EmptyQueryResponse,

    // Extended query protocol
    ParseComplete,
    BindComplete,
    CloseComplete,
    NoData,
    PortalSuspended,
    ParameterDescription { type_oids: Vec<Oid> },

    // Status
    ReadyForQuery { status: TransactionStatus },
    ParameterStatus { name: String, value: String },
    BackendKeyData { process_id: i32, secret_key: i32 },

    // Errors and notices
    ErrorResponse { fields: HashMap<u8, String> },
    NoticeResponse { fields: HashMap<u8, String> },

    NotificationResponse {
        process_id: i32,
        channel: String,
        payload: String,
    },
}

/// Total size of the first complete message in `buf`, if one is buffered.
pub fn frame_len(buf: &[u8]) -> PgResult<Option<usize>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
    if len < 4 {
        return Err(PgError::Protocol(format!("Invalid message length: {len}")));
    }
    let total = 1 + len as usize;
    Ok((buf.len() >= total).then_some(total))
}

impl BackendMessage {
    /// Decode a backend message from bytes.
    ///
    /// The input buffer should start with the message type byte.
    pub fn decode(buf: &mut Bytes) -> PgResult<Self> {
        if buf.remaining() < HEADER_LEN {
            return Err(PgError::Protocol("Incomplete message header".to_string()));
        }

        let msg_type = buf.get_u8();
        let len = buf.get_i32();
        if len < 4 || buf.remaining() < len as usize - 4 {
            return Err(PgError::Protocol("Incomplete message body".to_string()));
        }

        let mut body = buf.split_to(len as usize - 4);

        match msg_type {
            b'R' => Self::decode_auth(body),
            b'T' => Self::decode_row_description(body),
            b'D' => Self::decode_data_row(body),
            b'C' => Ok(BackendMessage::CommandComplete {
                tag: read_cstring(&mut body)?,
            }),
            b'Z' => Ok(BackendMessage::ReadyForQuery {
                status: TransactionStatus::try_from(read_u8(&mut body)?)?,
            }),
            b'E' => Ok(BackendMessage::ErrorResponse {
                fields: read_error_fields(body)?,
            }),
            b'N' => Ok(BackendMessage::NoticeResponse {
                fields: read_error_fields(body)?,
            }),
            b'S' => Ok(BackendMessage::ParameterStatus {
                name: read_cstring(&mut body)?,
                value: read_cstring(&mut body)?,
            }),
            b'K' => Ok(BackendMessage::BackendKeyData {
                process_id: read_i32(&mut body)?,
                secret_key: read_i32(&mut body)?,
            }),
            b'1' => Ok(BackendMessage::ParseComplete),
            b'2' => Ok(BackendMessage::BindComplete),
            b'3' => Ok(BackendMessage::CloseComplete),
            b'I' => Ok(BackendMessage::EmptyQueryResponse),
            b'n' => Ok(BackendMessage::NoData),
            b's' => Ok(BackendMessage::PortalSuspended),
            b't' => Self::decode_parameter_description(body),
            b'A' => Ok(BackendMessage::NotificationResponse {
                process_id: read_i32(&mut body)?,
                channel: read_cstring(&mut body)?,
                payload: read_cstring(&mut body)?,
            }),
            _ => Err(PgError::Protocol(format!(
                "Unknown message type: {}",
                msg_type as char
            ))),
        }
    }

    fn decode_auth(mut body: Bytes) -> PgResult<Self> {
        let auth_type = read_i32(&mut body)?;

        match auth_type {
            0 => Ok(BackendMessage::AuthenticationOk),
            3 => Ok(BackendMessage::AuthenticationCleartextPassword),
            5 => {
                ensure(&body, 4)?;
                let mut salt = [0u8; 4];
                body.copy_to_slice(&mut salt);
                Ok(BackendMessage::AuthenticationMD5Password { salt })
            }
            10 => {
                let mut mechanisms = Vec::new();
                while body.has_remaining() {
                    let mech = read_cstring(&mut body)?;
                    if mech.is_empty() {
                        break;
                    }
                    mechanisms.push(mech);
                }
                Ok(BackendMessage::AuthenticationSASL { mechanisms })
            }
            11 => Ok(BackendMessage::AuthenticationSASLContinue { data: body }),
            12 => Ok(BackendMessage::AuthenticationSASLFinal { data: body }),
            _ => Err(PgError::Auth(format!(
                "Unsupported authentication request: {auth_type}"
            ))),
        }
    }

    fn decode_row_description(mut body: Bytes) -> PgResult<Self> {
        let num_fields = read_i16(&mut body)?.max(0) as usize;
        let mut fields = Vec::with_capacity(num_fields);

        for _ in 0..num_fields {
            let name = read_cstring(&mut body)?;
            ensure(&body, 18)?;
            fields.push(FieldDescription {
                name,
                table_oid: body.get_i32(),
                column_attr: body.get_i16(),
                type_oid: Oid::from_i32(body.get_i32()),
                type_size: body.get_i16(),
                type_modifier: body.get_i32(),
                format: Format::from_code(body.get_i16())?,
            });
        }

        Ok(BackendMessage::RowDescription { fields })
    }

    fn decode_data_row(mut body: Bytes) -> PgResult<Self> {
        let num_cols = read_i16(&mut body)?.max(0) as usize;
        let mut values = Vec::with_capacity(num_cols);

        for _ in 0..num_cols {
            let len = read_i32(&mut body)?;
            if len < 0 {
                values.push(None);
            } else {
                ensure(&body, len as usize)?;
                values.push(Some(body.split_to(len as usize)));
            }
        }

        Ok(BackendMessage::DataRow { values })
    }

    fn decode_parameter_description(mut body: Bytes) -> PgResult<Self> {
        let num_params = read_i16(&mut body)?.max(0) as usize;
        let mut type_oids = Vec::with_capacity(num_params);

        for _ in 0..num_params {
            type_oids.push(Oid::from_i32(read_i32(&mut body)?));
        }

        Ok(BackendMessage::ParameterDescription { type_oids })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn ensure(buf: &Bytes, n: usize) -> PgResult<()> {
    if buf.remaining() < n {
        return Err(PgError::Protocol(format!(
            "Truncated message: need {n} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

fn read_u8(buf: &mut Bytes) -> PgResult<u8> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

fn read_i16(buf: &mut Bytes) -> PgResult<i16> {
    ensure(buf, 2)?;
    Ok(buf.get_i16())
}

fn read_i32(buf: &mut Bytes) -> PgResult<i32> {
    ensure(buf, 4)?;
    Ok(buf.get_i32())
}

/// Read a null-terminated string from the buffer.
fn read_cstring(buf: &mut Bytes) -> PgResult<String> {
    let end = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| PgError::Protocol("Missing null terminator in string".to_string()))?;

    let s = String::from_utf8_lossy(&buf[..end]).into_owned();
    buf.advance(end + 1);
    Ok(s)
}

/// Read error/notice response fields
fn read_error_fields(mut body: Bytes) -> PgResult<HashMap<u8, String>> {
    let mut fields = HashMap::new();

    while body.has_remaining() {
        let field_type = body.get_u8();
        if field_type == 0 {
            break;
        }
        let value = read_cstring(&mut body)?;
        fields.insert(field_type, value);
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_message_structure() {
        let msg = StartupMessage {
            user: "postgres".to_string(),
            database: Some("testdb".to_string()),
            options: vec![],
        };

        let encoded = msg.encode();

        let len = i32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(len as usize, encoded.len());
        assert_eq!(&encoded[8..13], b"user\0");
        assert_eq!(*encoded.last().unwrap(), 0);
    }

    #[test]
    fn test_frame_len_waits_for_complete_message() {
        let msg: &[u8] = &[b'Z', 0, 0, 0, 5, b'I'];
        assert_eq!(frame_len(&msg[..3]).unwrap(), None);
        assert_eq!(frame_len(&msg[..5]).unwrap(), None);
        assert_eq!(frame_len(msg).unwrap(), Some(6));
        assert!(frame_len(&[b'Z', 0, 0, 0, 1]).is_err());
    }

    #[test]
    fn test_truncated_data_row_is_rejected() {
        // One column claiming 10 bytes with only 2 present.
        let data: &[u8] = &[b'D', 0, 0, 0, 12, 0, 1, 0, 0, 0, 10, b'a', b'b'];
        let err = BackendMessage::decode(&mut Bytes::copy_from_slice(data)).unwrap_err();
        assert!(matches!(err, PgError::Protocol(_)));
    }
}
