//! MySQL Packet Types
//!
//! The handful of packets the proxy has to understand. Everything else is
//! relayed as opaque frames.
//!
//! | Packet               | Direction        | Why the proxy decodes it            |
//! |----------------------|------------------|-------------------------------------|
//! | `HandshakeV10`       | server → client  | capabilities, strip TLS/compression |
//! | `HandshakeResponse41`| client → server  | capabilities, user, initial schema  |
//! | `ComInitDb`          | client → server  | schema tracking                     |
//! | OK / EOF status      | server → client  | end of result sets                  |
//! | `ErrPacket`          | proxy → client   | reporting proxy-side failures       |

use crate::protocol::codec::{
    get_lenenc_bytes, get_lenenc_int, get_null_terminated, Decode, DecodeError, Encode,
};
use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

/// Capability flags (`CLIENT_*`) used by the proxy.
pub mod capability {
    pub const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;
    pub const CLIENT_COMPRESS: u32 = 0x0000_0020;
    pub const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
    pub const CLIENT_SSL: u32 = 0x0000_0800;
    pub const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
    pub const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;
    pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 0x0020_0000;
    pub const CLIENT_DEPRECATE_EOF: u32 = 0x0100_0000;
    pub const CLIENT_ZSTD_COMPRESSION: u32 = 0x0400_0000;

    /// Capabilities the proxy hides from clients: it cannot scan encrypted
    /// or compressed streams.
    pub const STRIPPED: u32 = CLIENT_SSL | CLIENT_COMPRESS | CLIENT_ZSTD_COMPRESSION;
}

/// Server status flags (`SERVER_*`).
pub mod status {
    pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;
}

/// First payload bytes of generic response packets.
pub mod header {
    pub const OK: u8 = 0x00;
    pub const AUTH_MORE_DATA: u8 = 0x01;
    pub const LOCAL_INFILE: u8 = 0xFB;
    pub const EOF: u8 = 0xFE;
    pub const ERR: u8 = 0xFF;
}

/// Client command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
    InitDb,
    Query,
    FieldList,
    Statistics,
    ProcessInfo,
    Ping,
    ChangeUser,
    BinlogDump,
    RegisterReplica,
    StmtPrepare,
    StmtExecute,
    StmtSendLongData,
    StmtClose,
    StmtReset,
    SetOption,
    StmtFetch,
    BinlogDumpGtid,
    ResetConnection,
    /// Any other code; the server answers it with a single packet
    Other(u8),
}

impl Command {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => Command::Quit,
            0x02 => Command::InitDb,
            0x03 => Command::Query,
            0x04 => Command::FieldList,
            0x09 => Command::Statistics,
            0x0a => Command::ProcessInfo,
            0x0e => Command::Ping,
            0x11 => Command::ChangeUser,
            0x12 => Command::BinlogDump,
            0x15 => Command::RegisterReplica,
            0x16 => Command::StmtPrepare,
            0x17 => Command::StmtExecute,
            0x18 => Command::StmtSendLongData,
            0x19 => Command::StmtClose,
            0x1a => Command::StmtReset,
            0x1b => Command::SetOption,
            0x1c => Command::StmtFetch,
            0x1e => Command::BinlogDumpGtid,
            0x1f => Command::ResetConnection,
            other => Command::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Command::Quit => 0x01,
            Command::InitDb => 0x02,
            Command::Query => 0x03,
            Command::FieldList => 0x04,
            Command::Statistics => 0x09,
            Command::ProcessInfo => 0x0a,
            Command::Ping => 0x0e,
            Command::ChangeUser => 0x11,
            Command::BinlogDump => 0x12,
            Command::RegisterReplica => 0x15,
            Command::StmtPrepare => 0x16,
            Command::StmtExecute => 0x17,
            Command::StmtSendLongData => 0x18,
            Command::StmtClose => 0x19,
            Command::StmtReset => 0x1a,
            Command::SetOption => 0x1b,
            Command::StmtFetch => 0x1c,
            Command::BinlogDumpGtid => 0x1e,
            Command::ResetConnection => 0x1f,
            Command::Other(code) => code,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Other(code) => write!(f, "COM_0x{:02x}", code),
            named => write!(f, "COM_{:?}", named),
        }
    }
}

/// The server greeting (`Protocol::HandshakeV10`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeV10 {
    pub sequence_id: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub capabilities: u32,
    pub character_set: u8,
    pub status_flags: u16,
    pub auth_plugin_name: Option<String>,
    /// Payload offset of the lower two capability bytes
    lower_caps_offset: usize,
    /// Payload offset of the upper two capability bytes, if present
    upper_caps_offset: Option<usize>,
}

impl HandshakeV10 {
    const PROTOCOL_VERSION: u8 = 10;

    /// Clears `mask` in the capability bytes of the framed greeting in
    /// `frame` and in `self`.
    pub fn strip_capabilities(&mut self, frame: &mut [u8], mask: u32) {
        let payload = &mut frame[crate::protocol::packet::HEADER_LEN..];

        let lower = (mask & 0xFFFF) as u16;
        let at = self.lower_caps_offset;
        let caps = u16::from_le_bytes([payload[at], payload[at + 1]]) & !lower;
        payload[at..at + 2].copy_from_slice(&caps.to_le_bytes());

        if let Some(at) = self.upper_caps_offset {
            let upper = (mask >> 16) as u16;
            let caps = u16::from_le_bytes([payload[at], payload[at + 1]]) & !upper;
            payload[at..at + 2].copy_from_slice(&caps.to_le_bytes());
        }

        self.capabilities &= !mask;
    }
}

impl Decode for HandshakeV10 {
    const NAME: &'static str = "HandshakeV10";

    fn decode_payload(sequence_id: u8, payload: &[u8]) -> Result<Self, DecodeError> {
        let malformed = |reason| DecodeError::Malformed {
            packet: Self::NAME,
            reason,
        };

        let mut buf = payload;
        if !buf.has_remaining() {
            return Err(malformed("empty payload"));
        }
        let version = buf.get_u8();
        if version != Self::PROTOCOL_VERSION {
            return Err(DecodeError::UnexpectedPacket {
                header: version,
                phase: "waiting for the server greeting",
            });
        }

        let server_version = get_null_terminated(&mut buf).ok_or(malformed("server version"))?;
        // connection id (4) + auth data part 1 (8) + filler (1)
        if buf.remaining() < 13 {
            return Err(malformed("truncated before capabilities"));
        }
        let connection_id = buf.get_u32_le();
        buf.advance(9);

        if buf.remaining() < 2 {
            return Err(malformed("missing capability flags"));
        }
        let lower_caps_offset = payload.len() - buf.remaining();
        let mut capabilities = buf.get_u16_le() as u32;

        let mut character_set = 0;
        let mut status_flags = 0;
        let mut upper_caps_offset = None;
        let mut auth_plugin_name = None;

        if buf.remaining() >= 5 {
            character_set = buf.get_u8();
            status_flags = buf.get_u16_le();
            upper_caps_offset = Some(payload.len() - buf.remaining());
            capabilities |= (buf.get_u16_le() as u32) << 16;

            if buf.remaining() >= 11 {
                let auth_data_len = buf.get_u8() as usize;
                buf.advance(10);

                if capabilities & capability::CLIENT_SECURE_CONNECTION != 0 {
                    let part2 = auth_data_len.saturating_sub(8).max(13);
                    if buf.remaining() < part2 {
                        return Err(malformed("truncated auth data"));
                    }
                    buf.advance(part2);
                }
                if capabilities & capability::CLIENT_PLUGIN_AUTH != 0 {
                    let name = get_null_terminated(&mut buf).unwrap_or(buf);
                    auth_plugin_name = Some(String::from_utf8_lossy(name).into_owned());
                }
            }
        }

        Ok(Self {
            sequence_id,
            server_version: String::from_utf8_lossy(server_version).into_owned(),
            connection_id,
            capabilities,
            character_set,
            status_flags,
            auth_plugin_name,
            lower_caps_offset,
            upper_caps_offset,
        })
    }
}

/// The client's reply to the greeting (`Protocol::HandshakeResponse41`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse41 {
    pub sequence_id: u8,
    pub capabilities: u32,
    pub max_packet_size: u32,
    pub character_set: u8,
    pub username: String,
    pub database: Option<String>,
    pub auth_plugin_name: Option<String>,
}

impl HandshakeResponse41 {
    /// Length of the fixed prefix, which is all an `SSLRequest` carries.
    const FIXED_LEN: usize = 32;
}

impl Decode for HandshakeResponse41 {
    const NAME: &'static str = "HandshakeResponse41";

    fn decode_payload(sequence_id: u8, payload: &[u8]) -> Result<Self, DecodeError> {
        let malformed = |reason| DecodeError::Malformed {
            packet: Self::NAME,
            reason,
        };

        let mut buf = payload;
        if buf.remaining() < 4 {
            return Err(malformed("truncated capability flags"));
        }
        let capabilities = buf.get_u32_le();
        if capabilities & capability::CLIENT_PROTOCOL_41 == 0 {
            return Err(DecodeError::Unsupported("pre-4.1 handshake response"));
        }
        if capabilities & capability::CLIENT_SSL != 0 {
            return Err(DecodeError::Unsupported("TLS"));
        }
        if payload.len() < Self::FIXED_LEN {
            return Err(malformed("truncated fixed header"));
        }

        let max_packet_size = buf.get_u32_le();
        let character_set = buf.get_u8();
        buf.advance(23);

        let username = get_null_terminated(&mut buf).ok_or(malformed("username"))?;

        let auth_response = if capabilities & capability::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            get_lenenc_bytes(&mut buf)
        } else if capabilities & capability::CLIENT_SECURE_CONNECTION != 0 {
            match buf.split_first() {
                Some((&len, rest)) if rest.len() >= len as usize => {
                    let (data, rest) = rest.split_at(len as usize);
                    buf = rest;
                    Some(data)
                }
                _ => None,
            }
        } else {
            get_null_terminated(&mut buf)
        };
        auth_response.ok_or(malformed("auth response"))?;

        let database = if capabilities & capability::CLIENT_CONNECT_WITH_DB != 0 {
            get_null_terminated(&mut buf)
                .filter(|db| !db.is_empty())
                .map(|db| String::from_utf8_lossy(db).into_owned())
        } else {
            None
        };

        let auth_plugin_name = if capabilities & capability::CLIENT_PLUGIN_AUTH != 0 {
            get_null_terminated(&mut buf).map(|name| String::from_utf8_lossy(name).into_owned())
        } else {
            None
        };

        Ok(Self {
            sequence_id,
            capabilities,
            max_packet_size,
            character_set,
            username: String::from_utf8_lossy(username).into_owned(),
            database,
            auth_plugin_name,
        })
    }
}

/// `COM_INIT_DB`: switch the default schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComInitDb {
    pub schema: String,
}

impl Decode for ComInitDb {
    const NAME: &'static str = "COM_INIT_DB";

    fn decode_payload(_sequence_id: u8, payload: &[u8]) -> Result<Self, DecodeError> {
        match payload.split_first() {
            Some((&code, schema)) if code == Command::InitDb.code() => Ok(Self {
                schema: String::from_utf8_lossy(schema).into_owned(),
            }),
            Some((&code, _)) => Err(DecodeError::UnexpectedPacket {
                header: code,
                phase: "decoding COM_INIT_DB",
            }),
            None => Err(DecodeError::Malformed {
                packet: Self::NAME,
                reason: "empty payload",
            }),
        }
    }
}

/// An ERR packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    pub sequence_id: u8,
    pub code: u16,
    pub sql_state: [u8; 5],
    pub message: String,
}

impl ErrPacket {
    /// `CR_CONN_HOST_ERROR`: the backend could not be reached.
    pub const CONN_HOST_ERROR: u16 = 2003;
    /// `ER_CLIENT_INTERACTION_TIMEOUT`: disconnected for inactivity.
    pub const INTERACTION_TIMEOUT: u16 = 4031;
    /// `ER_UNKNOWN_COM_ERROR`
    pub const UNKNOWN_COMMAND: u16 = 1047;
    /// `ER_NOT_SUPPORTED_AUTH_MODE`
    pub const NOT_SUPPORTED: u16 = 1251;

    pub fn new(sequence_id: u8, code: u16, message: impl Into<String>) -> Self {
        Self {
            sequence_id,
            code,
            sql_state: *b"HY000",
            message: message.into(),
        }
    }
}

impl Encode for ErrPacket {
    fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    fn encode_payload(&self, dst: &mut BytesMut) {
        dst.put_u8(header::ERR);
        dst.put_u16_le(self.code);
        dst.put_u8(b'#');
        dst.put_slice(&self.sql_state);
        dst.put_slice(self.message.as_bytes());
    }
}

impl Decode for ErrPacket {
    const NAME: &'static str = "ERR";

    fn decode_payload(sequence_id: u8, payload: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = payload;
        if buf.remaining() < 3 || buf.get_u8() != header::ERR {
            return Err(DecodeError::Malformed {
                packet: Self::NAME,
                reason: "missing error header",
            });
        }
        let code = buf.get_u16_le();
        let mut sql_state = *b"HY000";
        if buf.first() == Some(&b'#') && buf.remaining() >= 6 {
            buf.advance(1);
            buf.copy_to_slice(&mut sql_state);
        }
        Ok(Self {
            sequence_id,
            code,
            sql_state,
            message: String::from_utf8_lossy(buf).into_owned(),
        })
    }
}

/// Status flags of an OK packet (also used for the `0xFE` OK that ends a
/// result set under `CLIENT_DEPRECATE_EOF`).
///
/// `payload` may be truncated after the status flags.
pub fn ok_status_flags(payload: &[u8]) -> Option<u16> {
    let mut buf = payload;
    if !buf.has_remaining() {
        return None;
    }
    buf.advance(1);
    get_lenenc_int(&mut buf)?; // affected rows
    get_lenenc_int(&mut buf)?; // last insert id
    if buf.remaining() < 2 {
        return None;
    }
    Some(buf.get_u16_le())
}

/// Status flags of a classic EOF packet.
pub fn eof_status_flags(payload: &[u8]) -> Option<u16> {
    let mut buf = payload;
    if buf.remaining() < 5 || buf.get_u8() != header::EOF {
        return None;
    }
    buf.advance(2); // warnings
    Some(buf.get_u16_le())
}
