//! Per-connection reader state machine: `READ_HS` (the
//! handshake) `-> READ_SECOND` (`StatusRequest` or `LoginStart`) `->
//! AWAIT_ANS` (ask the routed backend worker what to do) `-> ENACT` (carry
//! out whatever it answered). One task per accepted connection; all shared
//! state lives behind the router/backend workers, never here.

use crate::backend::{BackendAnswer, BackendRequest, ProxyEvent, RequestType};
use crate::client_packets::{Handshake, LoginStart, PingPong, HANDSHAKE_PACKET_ID, PING_PACKET_ID};
use crate::config::Config;
use crate::packet::{read_packet, HandshakeState, PacketParseError, LEGACY_PING_ID};
use crate::router::Router;
use crate::tunnel;
use crate::utils::clean_hostname;
use log::debug;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

fn to_io_err(e: PacketParseError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

pub async fn handle_connection(stream: TcpStream, addr: SocketAddr, router: Arc<Router>, config: Arc<Config>) {
    if let Err(e) = run(stream, addr, router, config).await {
        debug!("[{addr}] connection ended: {e}");
    }
}

async fn run(stream: TcpStream, addr: SocketAddr, router: Arc<Router>, config: Arc<Config>) -> io::Result<()> {
    let mut client = BufReader::new(stream);
    let handshake_timeout = Duration::from_millis(config.settings.handshake_timeout_ms);

    let mut hs_packet = timeout(handshake_timeout, read_packet(&mut client))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "handshake timed out"))?
        .map_err(to_io_err)?;

    if hs_packet.id == LEGACY_PING_ID {
        debug!("[{addr}] legacy server-list ping, closing");
        return Ok(());
    }

    if hs_packet.id != HANDSHAKE_PACKET_ID {
        debug!("[{addr}] first packet id {} is not the handshake id, closing", hs_packet.id);
        return Ok(());
    }

    let handshake = Handshake::parse(&mut hs_packet).map_err(to_io_err)?;
    let hostname = clean_hostname(&handshake.server_address);

    if config.is_blocked(&hostname) {
        debug!("[{addr}] hostname '{hostname}' is blocklisted, closing");
        return Ok(());
    }

    let request_type = match handshake.next_state {
        HandshakeState::Status => RequestType::Status,
        HandshakeState::Login => RequestType::Login,
        HandshakeState::Unknown => {
            debug!("[{addr}] unrecognized handshake next state, closing");
            return Ok(());
        }
    };

    let handle = match router.route(&hostname) {
        Some(handle) => handle,
        None => {
            debug!("[{addr}] no endpoint configured for hostname '{hostname}', closing");
            return Ok(());
        }
    };

    // For LOGIN, the second packet (`LoginStart`) is needed now to extract
    // the username for routing/rate-limiting. For STATUS, the matching
    // `StatusRequest` is deliberately left unread here and consumed later,
    // inside the status-reply step of `enact`, once a cached answer exists
    // to respond with.
    let username = match request_type {
        RequestType::Login => {
            let mut packet = timeout(handshake_timeout, read_packet(&mut client))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "second packet timed out"))?
                .map_err(to_io_err)?;
            LoginStart::parse(&mut packet).map_err(to_io_err)?.username
        }
        RequestType::Status => String::new(),
    };

    let req = BackendRequest {
        request_type,
        protocol_version: handshake.protocol_version,
        handshake,
        addr,
        username,
        server_address: hostname,
    };

    let answer = handle
        .request(req)
        .await
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "backend worker is gone"))?;

    enact(&mut client, addr, answer).await
}

async fn enact(
    client: &mut BufReader<TcpStream>,
    addr: SocketAddr,
    answer: BackendAnswer,
) -> io::Result<()> {
    match answer {
        BackendAnswer::Close => {
            debug!("[{addr}] denied, closing silently");
            Ok(())
        }
        BackendAnswer::Disconnect(data) => {
            client.write_all(&data).await?;
            client.flush().await?;
            Ok(())
        }
        BackendAnswer::Status { data, latency } => {
            // The client's `StatusRequest` was never consumed in the
            // preamble step for this request type; consume it now before
            // replying.
            read_packet(client).await.map_err(to_io_err)?;

            client.write_all(&data).await?;
            client.flush().await?;
            debug!("[{addr}] served cached status, backend latency {latency:?}");

            match read_packet(client).await {
                Ok(packet) if packet.id == PING_PACKET_ID => {
                    let ping = PingPong::parse(&packet).map_err(to_io_err)?;
                    client.write_all(&ping.encode().encode()).await?;
                    client.flush().await?;
                }
                _ => {}
            }
            Ok(())
        }
        BackendAnswer::Proxy { connect, handshake, second_packet, proxy_events } => {
            let mut backend = connect().await?;
            backend.write_all(&handshake).await?;
            backend.write_all(&second_packet).await?;
            backend.flush().await?;

            let _ = proxy_events.send(ProxyEvent::Open).await;
            let result = tunnel::run(client, &mut backend).await;
            let _ = proxy_events.send(ProxyEvent::Close).await;

            match result {
                Ok(stats) => {
                    debug!(
                        "[{addr}] tunnel closed ({}B up, {}B down)",
                        stats.client_to_backend, stats.backend_to_client
                    );
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
    }
}
