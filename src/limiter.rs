//! Per-endpoint connection rate limiting: an absolute
//! request-rate limiter, and a bot-filter limiter that additionally tracks
//! username consistency per source IP. Both run inside a single backend
//! worker's event loop, so interior mutability isn't needed — `allow` takes
//! `&mut self`.

use crate::backend::{BackendAnswer, BackendRequest, RequestType};
use crate::utils::ip_key;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// `Ok(())` admits the connection; `Err(answer)` rejects it with the answer
/// that should be sent back to the client instead of dialing the backend.
pub type LimitResult = Result<(), BackendAnswer>;

pub trait ConnectionLimiter: Send {
    fn allow(&mut self, req: &BackendRequest) -> LimitResult;
}

/// Admits every connection. Used when an endpoint has rate limiting disabled.
pub struct AlwaysAllow;

impl ConnectionLimiter for AlwaysAllow {
    fn allow(&mut self, _req: &BackendRequest) -> LimitResult {
        Ok(())
    }
}

/// Flat cap on connections per rolling window, regardless of who they're
/// from. `limit_status` controls whether `StatusRequest`s count toward (and
/// are rejected by) the limit, or pass through unconditionally.
pub struct AbsoluteLimiter {
    rate_limit: u32,
    rate_cooldown: Duration,
    limit_status: bool,
    counter: u32,
    window_start: Instant,
}

impl AbsoluteLimiter {
    pub fn new(rate_limit: u32, rate_cooldown: Duration, limit_status: bool) -> Self {
        Self {
            rate_limit,
            rate_cooldown,
            limit_status,
            counter: 0,
            window_start: Instant::now(),
        }
    }
}

impl ConnectionLimiter for AbsoluteLimiter {
    fn allow(&mut self, req: &BackendRequest) -> LimitResult {
        if !self.limit_status && req.request_type == RequestType::Status {
            return Ok(());
        }

        if self.window_start.elapsed() >= self.rate_cooldown {
            self.counter = 0;
            self.window_start = Instant::now();
        }
        if self.counter < self.rate_limit {
            self.counter += 1;
            return Ok(());
        }
        Err(BackendAnswer::Close)
    }
}

/// Rate limiter that also tracks, per source IP, the username attached to
/// the first login seen while over the limit. A different username from the
/// same IP while still over the limit is treated as a likely bot sweeping
/// through names and blacklists the IP for `list_clear`; a repeat of the
/// same username is disconnected (not blacklisted) so a single slow client
/// isn't penalized for its own retries.
///
/// `StatusRequest`s always pass through untouched — only login attempts
/// count against the limiter.
pub struct BotFilterLimiter {
    rate_limit: u32,
    rate_cooldown: Duration,
    list_clear: Duration,
    disconnect_answer: Arc<Vec<u8>>,

    counter: u32,
    window_start: Instant,
    names: HashMap<String, String>,
    blacklist: HashMap<String, Instant>,
}

impl BotFilterLimiter {
    pub fn new(
        rate_limit: u32,
        rate_cooldown: Duration,
        list_clear: Duration,
        disconnect_answer: Arc<Vec<u8>>,
    ) -> Self {
        Self {
            rate_limit,
            rate_cooldown,
            list_clear,
            disconnect_answer,
            counter: 0,
            window_start: Instant::now(),
            names: HashMap::new(),
            blacklist: HashMap::new(),
        }
    }
}

impl ConnectionLimiter for BotFilterLimiter {
    fn allow(&mut self, req: &BackendRequest) -> LimitResult {
        if req.request_type == RequestType::Status {
            return Ok(());
        }

        if self.window_start.elapsed() >= self.rate_cooldown {
            self.counter = 0;
            self.window_start = Instant::now();
        }
        self.counter += 1;

        let ip = ip_key(&req.addr);

        if let Some(blocked_at) = self.blacklist.get(&ip) {
            if blocked_at.elapsed() >= self.list_clear {
                self.blacklist.remove(&ip);
            } else {
                return Err(BackendAnswer::Close);
            }
        }

        if self.counter > self.rate_limit {
            match self.names.get(&ip) {
                None => {
                    self.names.insert(ip, req.username.clone());
                    return Err(BackendAnswer::Disconnect(self.disconnect_answer.clone()));
                }
                Some(seen) if seen != &req.username => {
                    self.blacklist.insert(ip, Instant::now());
                    return Err(BackendAnswer::Disconnect(self.disconnect_answer.clone()));
                }
                Some(_) => {
                    return Err(BackendAnswer::Disconnect(self.disconnect_answer.clone()));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_packets::Handshake;
    use crate::packet::HandshakeState;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn req(request_type: RequestType, ip: [u8; 4], username: &str) -> BackendRequest {
        let next_state = match request_type {
            RequestType::Status => HandshakeState::Status,
            RequestType::Login => HandshakeState::Login,
        };
        BackendRequest {
            request_type,
            handshake: Handshake {
                protocol_version: 765,
                server_address: "play.example.com".to_string(),
                server_port: 25565,
                next_state,
            },
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip)), 54321),
            username: username.to_string(),
            server_address: "play.example.com".to_string(),
            protocol_version: 765,
        }
    }

    #[test]
    fn absolute_limiter_admits_until_cap_then_rejects() {
        let mut limiter = AbsoluteLimiter::new(2, Duration::from_secs(60), true);
        let r = req(RequestType::Status, [1, 1, 1, 1], "");
        assert!(limiter.allow(&r).is_ok());
        assert!(limiter.allow(&r).is_ok());
        assert!(limiter.allow(&r).is_err());
    }

    #[test]
    fn absolute_limiter_with_status_exempt_passes_status_but_still_caps_login() {
        let mut limiter = AbsoluteLimiter::new(1, Duration::from_secs(60), false);
        let status = req(RequestType::Status, [1, 1, 1, 1], "");
        for _ in 0..10 {
            assert!(limiter.allow(&status).is_ok());
        }

        let login = req(RequestType::Login, [1, 1, 1, 1], "Alice");
        assert!(limiter.allow(&login).is_ok());
        assert!(limiter.allow(&login).is_err());
    }

    #[test]
    fn bot_filter_ignores_status_requests() {
        let mut limiter = BotFilterLimiter::new(
            0,
            Duration::from_secs(60),
            Duration::from_secs(300),
            Arc::new(vec![]),
        );
        let r = req(RequestType::Status, [2, 2, 2, 2], "");
        for _ in 0..10 {
            assert!(limiter.allow(&r).is_ok());
        }
    }

    #[test]
    fn bot_filter_disconnects_over_limit_then_blacklists_on_name_change() {
        let mut limiter = BotFilterLimiter::new(
            1,
            Duration::from_secs(60),
            Duration::from_secs(300),
            Arc::new(vec![]),
        );
        let first = req(RequestType::Login, [3, 3, 3, 3], "Alice");
        assert!(limiter.allow(&first).is_ok());
        // second login from the same IP is over the limit and gets disconnected,
        // remembering "Alice" as the name seen at that IP
        assert!(limiter.allow(&first).is_err());

        let different_name = req(RequestType::Login, [3, 3, 3, 3], "Mallory");
        assert!(limiter.allow(&different_name).is_err());

        // now blacklisted outright, regardless of username
        assert!(limiter.allow(&first).is_err());
    }

    #[test]
    fn bot_filter_disconnects_repeat_of_same_username_without_blacklisting() {
        let mut limiter = BotFilterLimiter::new(
            1,
            Duration::from_secs(60),
            Duration::from_secs(300),
            Arc::new(vec![]),
        );
        let r = req(RequestType::Login, [4, 4, 4, 4], "Alice");
        assert!(limiter.allow(&r).is_ok());
        assert!(limiter.allow(&r).is_err());
        assert!(limiter.allow(&r).is_err());
    }
}
