use std::net::SocketAddr;

/// Host portion of a remote address, stripping the port (§4.4 IP key).
pub fn ip_key(addr: &SocketAddr) -> String {
    addr.ip().to_string()
}

/// Strips a Forge (`\0FML\0`) or legacy BungeeCord IP-forwarding
/// (`\0ip\0uuid\0...`) suffix from a client-declared server address by
/// cutting at the first NUL byte (§4.1 hostname cleaning).
pub fn clean_hostname(server_address: &str) -> String {
    match server_address.find('\0') {
        Some(idx) => server_address[..idx].to_string(),
        None => server_address.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_forge_suffix() {
        assert_eq!(clean_hostname("play.example.com\0FML\0"), "play.example.com");
    }

    #[test]
    fn cleans_bungee_forwarding_suffix() {
        assert_eq!(
            clean_hostname("play.example.com\u{0}1.2.3.4\u{0}uuid-here\u{0}"),
            "play.example.com"
        );
    }

    #[test]
    fn leaves_plain_hostname_untouched() {
        assert_eq!(clean_hostname("play.example.com"), "play.example.com");
    }
}
