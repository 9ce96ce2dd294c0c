use once_cell::sync::Lazy;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

pub const VERSION_PROXY_NAME: &str = "0.2.0-unstable";
pub const VERSION_PROTOCOL_NAME: &str = "1.20.4";
pub const VERSION_PROTOCOL_CODE: i32 = 765;

#[derive(PartialEq, PartialOrd, Clone, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    None = 0,
    Connection = 1,
    Verbose = 2,
    Debug = 3,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ConfigSettings {
    pub listen: u16,
    #[serde(default = "default_clients_limit")]
    pub clients_limit: u32,
    #[serde(default = "default_client_buffer_size")]
    pub client_buffer_size: usize,
    #[serde(default = "default_backend_buffer_size")]
    pub backend_buffer_size: usize,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_log_level")]
    pub log: LogLevel,
}

fn default_clients_limit() -> u32 {
    512
}
fn default_client_buffer_size() -> usize {
    8192
}
fn default_backend_buffer_size() -> usize {
    8192
}
fn default_handshake_timeout_ms() -> u64 {
    5_000
}
fn default_log_level() -> LogLevel {
    LogLevel::Debug
}

/// One of `none`, `old` (RealIP v2.4), or `new` (RealIP v2.5).
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RealIpMode {
    #[default]
    None,
    Old,
    New,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OfflineVersion {
    pub name: String,
    pub protocol: i32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OfflinePlayers {
    pub max: i32,
    pub online: i32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OfflineMotd {
    pub version: OfflineVersion,
    pub players: OfflinePlayers,
    pub description: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ConfigEndpoint {
    pub hostname: String,
    pub backend: String,

    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
    #[serde(default)]
    pub proxy_protocol: bool,

    #[serde(default)]
    pub real_ip: RealIpMode,
    #[serde(default)]
    pub real_ip_key_path: Option<String>,

    #[serde(default = "default_true")]
    pub cache_status: bool,
    #[serde(default = "default_cache_cooldown_ms")]
    pub cache_cooldown_ms: u64,
    #[serde(default = "default_state_cooldown_ms")]
    pub state_cooldown_ms: u64,

    #[serde(default)]
    pub rate_limit: u32,
    #[serde(default = "default_rate_limit_window_ms")]
    pub rate_limit_window_ms: u64,
    #[serde(default)]
    pub rate_limit_status: bool,

    #[serde(default)]
    pub bot_filter: bool,
    #[serde(default = "default_bot_filter_clear_ms")]
    pub bot_filter_clear_ms: u64,

    #[serde(default = "default_disconnect_message")]
    pub disconnect_message: String,
    pub offline_motd: OfflineMotd,
}

fn default_dial_timeout_ms() -> u64 {
    3_000
}
fn default_true() -> bool {
    true
}
fn default_cache_cooldown_ms() -> u64 {
    5_000
}
fn default_state_cooldown_ms() -> u64 {
    10_000
}
fn default_rate_limit_window_ms() -> u64 {
    1_000
}
fn default_bot_filter_clear_ms() -> u64 {
    300_000
}
fn default_disconnect_message() -> String {
    "Server is offline.".to_string()
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub settings: ConfigSettings,
    pub endpoints: Vec<ConfigEndpoint>,
    #[serde(default)]
    pub blocklist: Vec<String>,
}

impl Config {
    pub fn is_blocked(&self, hostname: &str) -> bool {
        self.blocklist.iter().any(|b| b == hostname)
    }
}

static CONFIG: Lazy<Arc<Config>> = Lazy::new(|| Arc::new(load_config()));

fn load_config() -> Config {
    let file = File::open("./config.yaml").expect("Failed to load config.yaml. Does the file exist?");
    let reader = BufReader::new(file);
    serde_yaml::from_reader(reader).expect("Failed to parse config.yaml")
}

pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}
