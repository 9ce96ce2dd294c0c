//! Per-backend worker: a single task owns all mutable state
//! for one configured endpoint — liveness, the status cache, and the rate
//! limiter — and is the only thing that ever dials the backend. Frontends
//! never touch a backend socket directly; they send a `BackendRequest`
//! over a channel and wait on a `oneshot` reply.

use crate::chat::ChatData;
use crate::client_packets::{Handshake, LoginStart, StatusRequest};
use crate::config::{ConfigEndpoint, VERSION_PROTOCOL_CODE};
use crate::limiter::{AbsoluteLimiter, AlwaysAllow, BotFilterLimiter, ConnectionLimiter};
use crate::realip::{HandshakeModifier, RealIpError};
use crate::server_packets::{disconnect_packet, ServerPlayersInfo, ServerVersion, StatusResponse};
use crate::status_cache::{RefreshError, StatusCache};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
/// Dials the configured backend address. Shared between the status cache's
/// own probing connections and the per-request proxy path, so a single
/// dial-timeout policy governs both.
pub type ConnectFn = Arc<dyn Fn() -> BoxFuture<io::Result<TcpStream>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Status,
    Login,
}

#[derive(Clone, Debug)]
pub struct BackendRequest {
    pub request_type: RequestType,
    pub handshake: Handshake,
    pub addr: SocketAddr,
    pub username: String,
    pub server_address: String,
    pub protocol_version: i32,
}

/// What the frontend should do with a request, decided entirely by the
/// backend worker. `Proxy` hands back enough to dial the backend and
/// replay the handshake itself; the worker never holds the client or
/// backend socket.
#[derive(Clone)]
pub enum BackendAnswer {
    Proxy {
        /// Dials the backend and, if the endpoint wants PROXY protocol v2,
        /// writes the header before returning the connection — the
        /// frontend only ever has to call this and then replay the
        /// handshake.
        connect: ConnectFn,
        handshake: Arc<Vec<u8>>,
        second_packet: Arc<Vec<u8>>,
        proxy_events: mpsc::Sender<ProxyEvent>,
    },
    Status {
        data: Arc<Vec<u8>>,
        latency: Duration,
    },
    Disconnect(Arc<Vec<u8>>),
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Unknown,
    Online,
    Offline,
    /// Carried over from the upstream state machine this was grounded on;
    /// nothing in this proxy currently transitions into it.
    Update,
}

#[derive(Debug, Clone, Copy)]
pub enum ProxyEvent {
    Open,
    Close,
}

#[derive(Clone)]
pub struct BackendHandle {
    req_tx: mpsc::Sender<(BackendRequest, oneshot::Sender<BackendAnswer>)>,
}

impl BackendHandle {
    pub async fn request(&self, req: BackendRequest) -> Option<BackendAnswer> {
        let (tx, rx) = oneshot::channel();
        self.req_tx.send((req, tx)).await.ok()?;
        rx.await.ok()
    }
}

pub struct BackendWorker {
    req_rx: mpsc::Receiver<(BackendRequest, oneshot::Sender<BackendAnswer>)>,
    proxy_rx: mpsc::Receiver<ProxyEvent>,
    proxy_tx: mpsc::Sender<ProxyEvent>,
    active_conns: u32,

    state: BackendState,
    state_cooldown: Duration,
    state_reset_tx: mpsc::Sender<()>,
    state_reset_rx: mpsc::Receiver<()>,

    status_cache_enabled: bool,
    status_cache: StatusCache,

    limiter: Box<dyn ConnectionLimiter>,

    hs_modifier: HandshakeModifier,
    proxy_protocol: bool,
    connect: ConnectFn,

    offline_motd: Arc<Vec<u8>>,
    disconnect_message: Arc<Vec<u8>>,
}

impl BackendWorker {
    pub fn new(endpoint: &ConfigEndpoint) -> Result<(Self, BackendHandle), RealIpError> {
        let (req_tx, req_rx) = mpsc::channel(25);
        let (proxy_tx, proxy_rx) = mpsc::channel(10);
        let (state_reset_tx, state_reset_rx) = mpsc::channel(1);

        let connect = build_connect_fn(
            endpoint.backend.clone(),
            Duration::from_millis(endpoint.dial_timeout_ms),
        );

        let hs_modifier =
            HandshakeModifier::load(&endpoint.real_ip, endpoint.real_ip_key_path.as_deref())?;

        let disconnect_message = Arc::new(build_disconnect(endpoint));

        let limiter: Box<dyn ConnectionLimiter> = if endpoint.bot_filter {
            Box::new(BotFilterLimiter::new(
                endpoint.rate_limit,
                Duration::from_millis(endpoint.rate_limit_window_ms),
                Duration::from_millis(endpoint.bot_filter_clear_ms),
                disconnect_message.clone(),
            ))
        } else if endpoint.rate_limit > 0 {
            Box::new(AbsoluteLimiter::new(
                endpoint.rate_limit,
                Duration::from_millis(endpoint.rate_limit_window_ms),
                endpoint.rate_limit_status,
            ))
        } else {
            Box::new(AlwaysAllow)
        };

        let worker = BackendWorker {
            req_rx,
            proxy_rx,
            proxy_tx: proxy_tx.clone(),
            active_conns: 0,
            state: BackendState::Unknown,
            state_cooldown: Duration::from_millis(endpoint.state_cooldown_ms),
            state_reset_tx,
            state_reset_rx,
            status_cache_enabled: endpoint.cache_status,
            status_cache: StatusCache::new(
                VERSION_PROTOCOL_CODE,
                Duration::from_millis(endpoint.cache_cooldown_ms),
            ),
            limiter,
            hs_modifier,
            proxy_protocol: endpoint.proxy_protocol,
            connect,
            offline_motd: Arc::new(build_offline_status(endpoint)),
            disconnect_message,
        };

        Ok((worker, BackendHandle { req_tx }))
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                req = self.req_rx.recv() => {
                    match req {
                        Some((req, reply)) => {
                            let answer = self.handle_request(req).await;
                            let _ = reply.send(answer);
                        }
                        None => break,
                    }
                }
                Some(event) = self.proxy_rx.recv() => {
                    match event {
                        ProxyEvent::Open => self.active_conns += 1,
                        ProxyEvent::Close => self.active_conns = self.active_conns.saturating_sub(1),
                    }
                }
                Some(()) = self.state_reset_rx.recv() => {
                    self.state = BackendState::Unknown;
                }
            }
        }
    }

    async fn handle_request(&mut self, req: BackendRequest) -> BackendAnswer {
        if self.state == BackendState::Unknown {
            self.probe_liveness().await;
        }

        if self.state == BackendState::Offline {
            return match req.request_type {
                RequestType::Status => BackendAnswer::Status {
                    data: self.offline_motd.clone(),
                    latency: Duration::ZERO,
                },
                RequestType::Login => BackendAnswer::Disconnect(self.disconnect_message.clone()),
            };
        }

        if req.request_type == RequestType::Status && self.status_cache_enabled {
            return self.answer_from_cache().await;
        }

        if let Err(answer) = self.limiter.allow(&req) {
            return answer;
        }

        let mut handshake = req.handshake.clone();
        self.hs_modifier.apply(&mut handshake, &crate::utils::ip_key(&req.addr));

        let second_packet = match req.request_type {
            RequestType::Login => LoginStart { username: req.username.clone() }.encode().encode(),
            RequestType::Status => StatusRequest::encode().encode(),
        };

        let connect = if self.proxy_protocol {
            build_proxy_protocol_connect(self.connect.clone(), req.addr)
        } else {
            self.connect.clone()
        };

        BackendAnswer::Proxy {
            connect,
            handshake: Arc::new(handshake.encode().encode()),
            second_packet: Arc::new(second_packet),
            proxy_events: self.proxy_tx.clone(),
        }
    }

    async fn answer_from_cache(&mut self) -> BackendAnswer {
        if self.status_cache.is_stale() {
            if let Err(err) = self.status_cache.refresh(&self.connect).await {
                if let RefreshError::BeforeResponse(_) = err {
                    self.state = BackendState::Offline;
                    self.schedule_state_reset();
                    return BackendAnswer::Status { data: self.offline_motd.clone(), latency: Duration::ZERO };
                }
                // AfterResponse: the response itself was read fine, only the
                // latency ping failed. Keep serving the fresh response.
            }
        }

        let data = self
            .status_cache
            .cached()
            .unwrap_or_else(|| self.offline_motd.clone());
        BackendAnswer::Status { data, latency: self.status_cache.latency() }
    }

    async fn probe_liveness(&mut self) {
        self.state = match (self.connect)().await {
            Ok(_) => BackendState::Online,
            Err(_) => BackendState::Offline,
        };
        self.schedule_state_reset();
    }

    fn schedule_state_reset(&self) {
        let tx = self.state_reset_tx.clone();
        let cooldown = self.state_cooldown;
        tokio::spawn(async move {
            sleep(cooldown).await;
            let _ = tx.send(()).await;
        });
    }
}

fn build_connect_fn(backend_addr: String, dial_timeout: Duration) -> ConnectFn {
    Arc::new(move || {
        let addr = backend_addr.clone();
        Box::pin(async move {
            match tokio::time::timeout(dial_timeout, TcpStream::connect(&addr)).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "dial timed out")),
            }
        })
    })
}

/// Wraps a base `connect` so the returned connection already has a PROXY
/// protocol v2 header written to it, source address fixed to the client
/// that triggered this particular request.
fn build_proxy_protocol_connect(base: ConnectFn, client_addr: SocketAddr) -> ConnectFn {
    Arc::new(move || {
        let base = base.clone();
        Box::pin(async move {
            let mut stream = base().await?;
            let backend_addr = stream.peer_addr()?;
            crate::proxy_protocol::write_v2(&mut stream, client_addr, backend_addr).await?;
            Ok(stream)
        })
    })
}

fn build_offline_status(endpoint: &ConfigEndpoint) -> Vec<u8> {
    let motd = &endpoint.offline_motd;
    let response = StatusResponse {
        version: ServerVersion {
            name: motd.version.name.clone(),
            protocol: motd.version.protocol,
        },
        players: ServerPlayersInfo {
            max: motd.players.max,
            online: motd.players.online,
            sample: vec![],
        },
        description: ChatData::new(motd.description.clone()),
        favicon: None,
        enforces_secure_chat: false,
    };
    response.encode().encode()
}

fn build_disconnect(endpoint: &ConfigEndpoint) -> Vec<u8> {
    disconnect_packet(ChatData::new(endpoint.disconnect_message.clone())).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OfflineMotd, OfflinePlayers, OfflineVersion, RealIpMode};

    fn sample_endpoint() -> ConfigEndpoint {
        ConfigEndpoint {
            hostname: "play.example.com".to_string(),
            backend: "127.0.0.1:25566".to_string(),
            dial_timeout_ms: 50,
            proxy_protocol: false,
            real_ip: RealIpMode::None,
            real_ip_key_path: None,
            cache_status: true,
            cache_cooldown_ms: 5_000,
            state_cooldown_ms: 10_000,
            rate_limit: 0,
            rate_limit_window_ms: 1_000,
            rate_limit_status: false,
            bot_filter: false,
            bot_filter_clear_ms: 300_000,
            disconnect_message: "Server is offline.".to_string(),
            offline_motd: OfflineMotd {
                version: OfflineVersion { name: "1.20.4".to_string(), protocol: 765 },
                players: OfflinePlayers { max: 20, online: 0 },
                description: "Server is offline.".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn unreachable_backend_serves_offline_motd_for_status() {
        let endpoint = sample_endpoint();
        let (worker, handle) = BackendWorker::new(&endpoint).unwrap();
        tokio::spawn(worker.run());

        let req = BackendRequest {
            request_type: RequestType::Status,
            handshake: Handshake {
                protocol_version: 765,
                server_address: "play.example.com".to_string(),
                server_port: 25565,
                next_state: crate::packet::HandshakeState::Status,
            },
            addr: "203.0.113.9:54321".parse().unwrap(),
            username: String::new(),
            server_address: "play.example.com".to_string(),
            protocol_version: 765,
        };

        let answer = handle.request(req).await.unwrap();
        assert!(matches!(answer, BackendAnswer::Status { .. }));
    }

    #[tokio::test]
    async fn unreachable_backend_disconnects_login() {
        let endpoint = sample_endpoint();
        let (worker, handle) = BackendWorker::new(&endpoint).unwrap();
        tokio::spawn(worker.run());

        let req = BackendRequest {
            request_type: RequestType::Login,
            handshake: Handshake {
                protocol_version: 765,
                server_address: "play.example.com".to_string(),
                server_port: 25565,
                next_state: crate::packet::HandshakeState::Login,
            },
            addr: "203.0.113.9:54321".parse().unwrap(),
            username: "Alice".to_string(),
            server_address: "play.example.com".to_string(),
            protocol_version: 765,
        };

        let answer = handle.request(req).await.unwrap();
        assert!(matches!(answer, BackendAnswer::Disconnect(_)));
    }
}
