//! Cached `StatusResponse` for a single backend: refreshed on a cooldown
//! instead of per-request, alongside a measured half round-trip latency
//! returned next to the cached bytes rather than spliced into them.

use crate::backend::ConnectFn;
use crate::client_packets::{Handshake, PingPong, StatusRequest};
use crate::packet::{read_packet, HandshakeState};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWriteExt, BufReader};

/// Distinguishes a refresh failure that happened before a status response
/// was obtained at all (the caller should fall back to a stale/offline
/// answer and flip backend state) from one that happened only while timing
/// the follow-up ping (the response is still good; only the latency
/// measurement is lost).
#[derive(Debug)]
pub enum RefreshError {
    BeforeResponse(String),
    AfterResponse(String),
}

pub struct StatusCache {
    cooldown: Duration,
    cache_time: Option<Instant>,
    cached: Option<Arc<Vec<u8>>>,
    latency: Duration,
    handshake: Vec<u8>,
    status_request: Vec<u8>,
}

impl StatusCache {
    pub fn new(protocol_version: i32, cooldown: Duration) -> Self {
        let handshake = Handshake {
            protocol_version,
            server_address: "PistonProxy".to_string(),
            server_port: 25565,
            next_state: HandshakeState::Status,
        }
        .encode()
        .encode();
        let status_request = StatusRequest::encode().encode();

        Self {
            cooldown,
            cache_time: None,
            cached: None,
            latency: Duration::ZERO,
            handshake,
            status_request,
        }
    }

    pub fn is_stale(&self) -> bool {
        match self.cache_time {
            None => true,
            Some(t) => t.elapsed() >= self.cooldown,
        }
    }

    pub fn cached(&self) -> Option<Arc<Vec<u8>>> {
        self.cached.clone()
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Dials the backend, requests status, and times a follow-up ping.
    /// Always records whatever status response it manages to read before
    /// returning, even when the call ultimately reports an error.
    pub async fn refresh(&mut self, connect: &ConnectFn) -> Result<(), RefreshError> {
        let mut stream = connect()
            .await
            .map_err(|e| RefreshError::BeforeResponse(e.to_string()))?;

        stream
            .write_all(&self.handshake)
            .await
            .map_err(|e| RefreshError::BeforeResponse(e.to_string()))?;
        stream
            .write_all(&self.status_request)
            .await
            .map_err(|e| RefreshError::BeforeResponse(e.to_string()))?;

        let response = {
            let mut reader = BufReader::new(&mut stream);
            read_packet(&mut reader)
                .await
                .map_err(|e| RefreshError::BeforeResponse(e.to_string()))?
        };
        self.cached = Some(Arc::new(response.encode()));
        self.cache_time = Some(Instant::now());

        let ping = PingPong([0u8; 8]).encode().encode();
        let begin = Instant::now();
        let ping_result: std::io::Result<()> = async {
            stream.write_all(&ping).await?;
            let mut reader = BufReader::new(&mut stream);
            read_packet(&mut reader)
                .await
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
            Ok(())
        }
        .await;

        match ping_result {
            Ok(()) => {
                self.latency = begin.elapsed() / 2;
                Ok(())
            }
            Err(e) => Err(RefreshError::AfterResponse(e.to_string())),
        }
    }
}
