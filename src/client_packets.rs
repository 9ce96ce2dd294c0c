//! Packets read from (and, for the two that get replayed upstream,
//! re-encoded to) the client: `Handshake`, `LoginStart`, `StatusRequest`,
//! `Ping`/`Pong`.

use crate::packet::{HandshakeState, MinecraftPacket, PacketParseError};

pub const HANDSHAKE_PACKET_ID: i32 = 0x00;
pub const STATUS_REQUEST_PACKET_ID: i32 = 0x00;
pub const LOGIN_START_PACKET_ID: i32 = 0x00;
pub const PING_PACKET_ID: i32 = 0x01;

/// `serverAddress` cap (255 bytes UTF-8, may carry a
/// Forge/BungeeCord suffix appended to the declared hostname).
pub const SERVER_ADDRESS_MAX_BYTES: usize = 255;
/// `LoginStart` usernames are 1-16 bytes.
pub const USERNAME_MAX_BYTES: usize = 16;

#[derive(Clone, Debug)]
pub struct Handshake {
    pub protocol_version: i32,
    pub server_address: String,
    pub server_port: u16,
    pub next_state: HandshakeState,
}

impl Handshake {
    pub fn parse(packet: &mut MinecraftPacket) -> Result<Self, PacketParseError> {
        packet.reset_cursor();
        let protocol_version = packet.read_varint()?;
        let server_address = packet.read_string(SERVER_ADDRESS_MAX_BYTES)?;
        let server_port = packet.read_u16()?;
        let next_state_raw = packet.read_varint()?;
        Ok(Handshake {
            protocol_version,
            server_address,
            server_port,
            next_state: HandshakeState::from_next_state(next_state_raw),
        })
    }

    pub fn encode(&self) -> MinecraftPacket {
        let mut packet = MinecraftPacket::new(HANDSHAKE_PACKET_ID);
        packet.write_varint(self.protocol_version);
        packet.write_string(&self.server_address);
        packet.write_u16(self.server_port);
        let next_state = match self.next_state {
            HandshakeState::Status => 1,
            HandshakeState::Login => 2,
            HandshakeState::Unknown => 0,
        };
        packet.write_varint(next_state);
        packet
    }
}

#[derive(Clone, Debug)]
pub struct LoginStart {
    pub username: String,
}

impl LoginStart {
    pub fn parse(packet: &mut MinecraftPacket) -> Result<Self, PacketParseError> {
        packet.reset_cursor();
        let username = packet.read_string(USERNAME_MAX_BYTES)?;
        Ok(LoginStart { username })
    }

    pub fn encode(&self) -> MinecraftPacket {
        let mut packet = MinecraftPacket::new(LOGIN_START_PACKET_ID);
        packet.write_string(&self.username);
        packet
    }
}

pub struct StatusRequest;

impl StatusRequest {
    pub fn encode() -> MinecraftPacket {
        MinecraftPacket::new(STATUS_REQUEST_PACKET_ID)
    }
}

/// 8-byte ping/pong payload. Echoed back verbatim rather than parsed as a
/// structured timestamp.
#[derive(Clone, Copy, Debug)]
pub struct PingPong(pub [u8; 8]);

impl PingPong {
    pub fn parse(packet: &MinecraftPacket) -> Result<Self, PacketParseError> {
        let remaining = packet.remaining();
        if remaining.len() < 8 {
            return Err(PacketParseError::MalformedField("ping payload".into()));
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&remaining[..8]);
        Ok(PingPong(buf))
    }

    pub fn encode(&self) -> MinecraftPacket {
        let mut packet = MinecraftPacket::new(PING_PACKET_ID);
        packet.write_bytes(&self.0);
        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_round_trips() {
        let hs = Handshake {
            protocol_version: 765,
            server_address: "play.example.com".to_string(),
            server_port: 25565,
            next_state: HandshakeState::Login,
        };
        let mut packet = hs.encode();
        let decoded = Handshake::parse(&mut packet).unwrap();
        assert_eq!(decoded.protocol_version, 765);
        assert_eq!(decoded.server_address, "play.example.com");
        assert_eq!(decoded.server_port, 25565);
        assert_eq!(decoded.next_state, HandshakeState::Login);
    }

    #[test]
    fn login_start_round_trips() {
        let login = LoginStart { username: "Alice".to_string() };
        let mut packet = login.encode();
        let decoded = LoginStart::parse(&mut packet).unwrap();
        assert_eq!(decoded.username, "Alice");
    }

    #[test]
    fn ping_echoes_payload_verbatim() {
        let ping = PingPong([1, 2, 3, 4, 5, 6, 7, 8]);
        let packet = ping.encode();
        let decoded = PingPong::parse(&packet).unwrap();
        assert_eq!(decoded.0, ping.0);
    }
}
