//! PROXY protocol v2 header encoding. Written once, immediately
//! after dialing the backend and before replaying the handshake, when a
//! backend is configured to want it.

use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncWrite, AsyncWriteExt};

const SIGNATURE: [u8; 12] = [
    0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A,
];
const VERSION_COMMAND: u8 = 0x21; // version 2, PROXY command
const FAMILY_TCP4: u8 = 0x11;
const FAMILY_TCP6: u8 = 0x21;

pub fn encode_v2(source: SocketAddr, destination: SocketAddr) -> Vec<u8> {
    let mut out = Vec::with_capacity(SIGNATURE.len() + 2 + 2 + 36);
    out.extend_from_slice(&SIGNATURE);
    out.push(VERSION_COMMAND);

    if let (IpAddr::V4(src_ip), IpAddr::V4(dst_ip)) = (source.ip(), destination.ip()) {
        out.push(FAMILY_TCP4);
        out.extend_from_slice(&12u16.to_be_bytes());
        out.extend_from_slice(&src_ip.octets());
        out.extend_from_slice(&dst_ip.octets());
        out.extend_from_slice(&source.port().to_be_bytes());
        out.extend_from_slice(&destination.port().to_be_bytes());
    } else {
        out.push(FAMILY_TCP6);
        out.extend_from_slice(&36u16.to_be_bytes());
        out.extend_from_slice(&to_v6_octets(source));
        out.extend_from_slice(&to_v6_octets(destination));
        out.extend_from_slice(&source.port().to_be_bytes());
        out.extend_from_slice(&destination.port().to_be_bytes());
    }

    out
}

fn to_v6_octets(addr: SocketAddr) -> [u8; 16] {
    match addr.ip() {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

pub async fn write_v2<W: AsyncWrite + Unpin>(
    stream: &mut W,
    source: SocketAddr,
    destination: SocketAddr,
) -> std::io::Result<()> {
    let header = encode_v2(source, destination);
    stream.write_all(&header).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_header_has_expected_shape() {
        let src: SocketAddr = "1.2.3.4:55555".parse().unwrap();
        let dst: SocketAddr = "10.0.0.1:25565".parse().unwrap();
        let header = encode_v2(src, dst);
        assert_eq!(&header[0..12], &SIGNATURE);
        assert_eq!(header[12], VERSION_COMMAND);
        assert_eq!(header[13], FAMILY_TCP4);
        assert_eq!(header.len(), 12 + 1 + 1 + 2 + 12);
    }

    #[test]
    fn v6_header_uses_wider_address_block() {
        let src: SocketAddr = "[::1]:55555".parse().unwrap();
        let dst: SocketAddr = "[::2]:25565".parse().unwrap();
        let header = encode_v2(src, dst);
        assert_eq!(header[13], FAMILY_TCP6);
        assert_eq!(header.len(), 12 + 1 + 1 + 2 + 36);
    }
}
