//! Packet framing: `VarInt length || VarInt id || payload`, plus the
//! `MinecraftPacket` container used to build and consume packet bodies.

use crate::reader::VarDataReader;
use crate::writer::VarDataWriter;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const SEGMENT_BITS: u8 = 0x7F;
pub const CONTINUE_BIT: u8 = 0x80;

/// Maximum declared packet length (id + payload), per the wire format.
pub const MAX_PACKET_SIZE: usize = 2_097_152;

/// Synthetic id assigned to the legacy two-byte (`0xFE 0x01`) server-list
/// ping that predates the handshake protocol this proxy speaks. No backend
/// in scope understands that dialect, so it is recognized only to be
/// closed cleanly instead of misparsed as a VarInt length of 126.
pub const LEGACY_PING_ID: i32 = -1;

#[derive(Debug, Error)]
pub enum PacketParseError {
    #[error("malformed field: {0}")]
    MalformedField(String),
    #[error("declared packet length {0} exceeds the {MAX_PACKET_SIZE} byte maximum")]
    Oversize(i32),
    #[error("connection closed before a full packet was read")]
    Eof,
    #[error("io error: {0}")]
    Io(String),
}

fn map_io_err(e: std::io::Error) -> PacketParseError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        PacketParseError::Eof
    } else {
        PacketParseError::Io(e.to_string())
    }
}

/// A decoded (or not-yet-encoded) packet. `data` is the payload that
/// follows the packet id; reads and writes advance an internal cursor so
/// callers can pull/push fields in sequence without bounds bookkeeping.
pub struct MinecraftPacket {
    pub id: i32,
    pub data: Vec<u8>,
    cursor: usize,
}

impl MinecraftPacket {
    pub fn new(id: i32) -> Self {
        Self { id, data: Vec::new(), cursor: 0 }
    }

    pub fn from_parts(id: i32, data: Vec<u8>) -> Self {
        Self { id, data, cursor: 0 }
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
    }

    pub fn read_varint(&mut self) -> Result<i32, PacketParseError> {
        let (val, len) = self
            .data
            .read_varint(self.cursor)
            .ok_or_else(|| PacketParseError::MalformedField("varint".into()))?;
        self.cursor += len;
        Ok(val)
    }

    pub fn read_varlong(&mut self) -> Result<i64, PacketParseError> {
        let (val, len) = self
            .data
            .read_varlong(self.cursor)
            .ok_or_else(|| PacketParseError::MalformedField("varlong".into()))?;
        self.cursor += len;
        Ok(val)
    }

    pub fn read_u16(&mut self) -> Result<u16, PacketParseError> {
        let val = self
            .data
            .read_u16(self.cursor)
            .ok_or_else(|| PacketParseError::MalformedField("u16".into()))?;
        self.cursor += 2;
        Ok(val)
    }

    pub fn read_string(&mut self, max_bytes: usize) -> Result<String, PacketParseError> {
        let (val, len) = self
            .data
            .read_string(self.cursor, max_bytes)
            .ok_or_else(|| PacketParseError::MalformedField("string".into()))?;
        self.cursor += len;
        Ok(val)
    }

    /// Remaining unread payload bytes (used for the 8-byte ping/pong echo).
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.cursor..]
    }

    pub fn write_varint(&mut self, val: i32) {
        self.data.write_varint(val);
    }

    pub fn write_u16(&mut self, val: u16) {
        self.data.write_u16(val);
    }

    pub fn write_string(&mut self, val: &str) {
        self.data.write_string(val);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// `VarInt length || VarInt id || payload`.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.data.len() + 5);
        body.write_varint(self.id);
        body.extend_from_slice(&self.data);

        let mut framed = Vec::with_capacity(body.len() + 5);
        framed.write_varint(body.len() as i32);
        framed.extend_from_slice(&body);
        framed
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_all(&self.encode()).await
    }
}

async fn read_varint_from<R: AsyncBufRead + Unpin>(stream: &mut R) -> Result<i32, PacketParseError> {
    let mut value: i32 = 0;
    let mut position: u32 = 0;
    loop {
        if position >= 35 {
            return Err(PacketParseError::MalformedField("varint too long".into()));
        }
        let byte = stream.read_u8().await.map_err(map_io_err)?;
        value |= ((byte & SEGMENT_BITS) as i32) << position;
        if byte & CONTINUE_BIT == 0 {
            break;
        }
        position += 7;
    }
    Ok(value)
}

/// Reads one framed packet off `stream`. Peeks the first byte to recognize
/// the legacy `0xFE 0x01` two-byte ping (which is not VarInt-length-prefixed
/// and would otherwise be misread as a length of 126) before falling back to
/// normal length-prefixed framing.
pub async fn read_packet<R: AsyncBufRead + Unpin>(
    stream: &mut R,
) -> Result<MinecraftPacket, PacketParseError> {
    let first = {
        let buf = stream.fill_buf().await.map_err(map_io_err)?;
        if buf.is_empty() {
            return Err(PacketParseError::Eof);
        }
        buf[0]
    };

    if first == 0xFE {
        let mut two = [0u8; 2];
        stream.read_exact(&mut two).await.map_err(map_io_err)?;
        if two[1] == 0x01 {
            return Ok(MinecraftPacket::from_parts(LEGACY_PING_ID, Vec::new()));
        }
        return Err(PacketParseError::MalformedField("unrecognized legacy ping".into()));
    }

    let length = read_varint_from(stream).await?;
    if length <= 0 {
        return Err(PacketParseError::MalformedField("non-positive packet length".into()));
    }
    if length as usize > MAX_PACKET_SIZE {
        return Err(PacketParseError::Oversize(length));
    }

    let mut raw = vec![0u8; length as usize];
    stream.read_exact(&mut raw).await.map_err(map_io_err)?;
    let (id, id_len) = raw
        .read_varint(0)
        .ok_or_else(|| PacketParseError::MalformedField("packet id".into()))?;
    let data = raw[id_len..].to_vec();
    Ok(MinecraftPacket::from_parts(id, data))
}

/// `NextState` of the handshake, resolved to a tagged variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Status,
    Login,
    Unknown,
}

impl HandshakeState {
    pub fn from_next_state(n: i32) -> Self {
        match n {
            1 => HandshakeState::Status,
            2 => HandshakeState::Login,
            _ => HandshakeState::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn reads_framed_packet() {
        let mut packet = MinecraftPacket::new(0x00);
        packet.write_string("hello");
        let wire = packet.encode();

        let mut reader = BufReader::new(Cursor::new(wire));
        let parsed = read_packet(&mut reader).await.unwrap();
        assert_eq!(parsed.id, 0x00);
    }

    #[tokio::test]
    async fn rejects_oversize_packet() {
        let mut wire = Vec::new();
        wire.write_varint((MAX_PACKET_SIZE as i32) + 8);
        let mut reader = BufReader::new(Cursor::new(wire));
        let err = read_packet(&mut reader).await.unwrap_err();
        assert!(matches!(err, PacketParseError::Oversize(_)));
    }

    #[tokio::test]
    async fn recognizes_legacy_ping_sentinel() {
        let wire = vec![0xFE, 0x01];
        let mut reader = BufReader::new(Cursor::new(wire));
        let parsed = read_packet(&mut reader).await.unwrap();
        assert_eq!(parsed.id, LEGACY_PING_ID);
    }

    #[tokio::test]
    async fn eof_on_empty_stream() {
        let wire: Vec<u8> = Vec::new();
        let mut reader = BufReader::new(Cursor::new(wire));
        let err = read_packet(&mut reader).await.unwrap_err();
        assert!(matches!(err, PacketParseError::Eof));
    }
}
