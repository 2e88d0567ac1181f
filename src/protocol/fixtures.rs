//! Wire-format builders shared by the unit tests.

use crate::protocol::packet::write_frames;
use crate::protocol::types::capability;
use bytes::{BufMut, BytesMut};

/// Frames `payload` starting at sequence id `seq`.
pub fn framed(seq: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    write_frames(seq, payload, &mut buf);
    buf.to_vec()
}

/// Frames each payload with consecutive sequence ids, starting at `seq`.
pub fn framed_all(seq: u8, payloads: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    let mut next = seq;
    for payload in payloads {
        next = write_frames(next, payload, &mut buf).wrapping_add(1);
    }
    buf.to_vec()
}

/// A MySQL 8 style greeting advertising TLS and compression.
pub fn greeting_payload() -> Vec<u8> {
    let caps = capability::CLIENT_PROTOCOL_41
        | capability::CLIENT_SECURE_CONNECTION
        | capability::CLIENT_PLUGIN_AUTH
        | capability::CLIENT_CONNECT_WITH_DB
        | capability::CLIENT_DEPRECATE_EOF
        | capability::CLIENT_SSL
        | capability::CLIENT_COMPRESS;

    let mut p = BytesMut::new();
    p.put_u8(10);
    p.put_slice(b"8.0.36\0");
    p.put_u32_le(42);
    p.put_slice(b"abcdefgh");
    p.put_u8(0);
    p.put_u16_le(caps as u16);
    p.put_u8(0xff);
    p.put_u16_le(0x0002);
    p.put_u16_le((caps >> 16) as u16);
    p.put_u8(21);
    p.put_slice(&[0; 10]);
    p.put_slice(b"ijklmnopqrst\0");
    p.put_slice(b"caching_sha2_password\0");
    p.to_vec()
}

/// A client handshake response for user `app`, optionally selecting a schema.
pub fn handshake_response_payload(database: Option<&str>) -> Vec<u8> {
    let mut caps = capability::CLIENT_PROTOCOL_41
        | capability::CLIENT_SECURE_CONNECTION
        | capability::CLIENT_PLUGIN_AUTH
        | capability::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
        | capability::CLIENT_DEPRECATE_EOF;
    if database.is_some() {
        caps |= capability::CLIENT_CONNECT_WITH_DB;
    }

    let mut p = BytesMut::new();
    p.put_u32_le(caps);
    p.put_u32_le(16 * 1024 * 1024);
    p.put_u8(0xff);
    p.put_slice(&[0; 23]);
    p.put_slice(b"app\0");
    p.put_u8(3);
    p.put_slice(b"xyz");
    if let Some(db) = database {
        p.put_slice(db.as_bytes());
        p.put_u8(0);
    }
    p.put_slice(b"caching_sha2_password\0");
    p.to_vec()
}

/// OK packet with no affected rows and the given status flags.
pub fn ok_payload(status: u16) -> Vec<u8> {
    let mut p = vec![0x00, 0x00, 0x00];
    p.extend_from_slice(&status.to_le_bytes());
    p.extend_from_slice(&[0, 0]);
    p
}

/// Result-set terminator in `CLIENT_DEPRECATE_EOF` form.
pub fn eof_ok_payload(status: u16) -> Vec<u8> {
    let mut p = ok_payload(status);
    p[0] = 0xFE;
    p
}

/// Classic EOF packet.
pub fn eof_payload(status: u16) -> Vec<u8> {
    let mut p = vec![0xFE, 0x00, 0x00];
    p.extend_from_slice(&status.to_le_bytes());
    p
}

pub fn err_payload(code: u16, message: &str) -> Vec<u8> {
    let mut p = vec![0xFF];
    p.extend_from_slice(&code.to_le_bytes());
    p.extend_from_slice(b"#42000");
    p.extend_from_slice(message.as_bytes());
    p
}

/// A minimal column definition.
pub fn column_payload(name: &str) -> Vec<u8> {
    let mut p = Vec::new();
    for part in ["def", "db", "t", "t", name, name] {
        p.push(part.len() as u8);
        p.extend_from_slice(part.as_bytes());
    }
    p.push(0x0c);
    p.extend_from_slice(&[0x21, 0x00, 0xff, 0x00, 0x00, 0x00, 0xfd, 0x00, 0x00, 0x00, 0x00, 0x00]);
    p
}

/// A text-protocol row.
pub fn row_payload(values: &[&[u8]]) -> Vec<u8> {
    let mut p = Vec::new();
    for value in values {
        assert!(value.len() < 0xFB, "fixture rows use one-byte lengths");
        p.push(value.len() as u8);
        p.extend_from_slice(value);
    }
    p
}

/// The packets of a complete single result set, starting at sequence id 1.
pub fn result_set(columns: &[&str], rows: &[Vec<u8>], deprecate_eof: bool) -> Vec<Vec<u8>> {
    let mut packets = vec![vec![columns.len() as u8]];
    packets.extend(columns.iter().map(|c| column_payload(c)));
    if !deprecate_eof {
        packets.push(eof_payload(0x0002));
    }
    packets.extend(rows.iter().cloned());
    packets.push(if deprecate_eof {
        eof_ok_payload(0x0002)
    } else {
        eof_payload(0x0002)
    });
    packets
}
