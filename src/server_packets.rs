//! Packets written to the client: `StatusResponse` and `Disconnect`
//! (`Pong` is just `PingPong::encode` from `client_packets`, reused
//! verbatim in both directions).

use crate::chat::ChatData;
use crate::packet::MinecraftPacket;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const STATUS_RESPONSE_PACKET_ID: i32 = 0x00;
pub const DISCONNECT_PACKET_ID: i32 = 0x00;

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct ServerVersion {
    pub name: String,
    pub protocol: i32,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct ServerPlayersInfo {
    pub max: i32,
    pub online: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample: Vec<()>,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct StatusResponse {
    pub version: ServerVersion,
    pub players: ServerPlayersInfo,
    pub description: ChatData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    pub enforces_secure_chat: bool,
}

impl StatusResponse {
    pub fn to_json(&self) -> String {
        json!(self).to_string()
    }

    pub fn encode(&self) -> MinecraftPacket {
        let mut packet = MinecraftPacket::new(STATUS_RESPONSE_PACKET_ID);
        packet.write_string(&self.to_json());
        packet
    }
}

pub fn disconnect_packet(message: ChatData) -> MinecraftPacket {
    let mut packet = MinecraftPacket::new(DISCONNECT_PACKET_ID);
    packet.write_string(&message.to_string());
    packet
}
