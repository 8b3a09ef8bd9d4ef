pub const DEFAULT_CONFIG_PATH: &str = "/etc/vpsctl/config.json";
pub const DEFAULT_PACKAGE_INDEX_MAX_AGE_SECS: u64 = 3600;
pub const DEFAULT_WGCF_VERSION: &str = "2.2.22";

pub const DEFAULT_STREAM_LISTEN_PORT: u16 = 443;
pub const DEFAULT_TLS_BACKEND_PORT: u16 = 8443;
pub const DEFAULT_STREAM_FALLBACK_PORT: u16 = 8080;

pub const TUNNEL_NAMESERVERS: [&str; 2] = ["1.1.1.1", "8.8.8.8"];

pub const WGCF_ACCOUNT_FILE: &str = "wgcf-account.toml";
pub const WGCF_PROFILE_FILE: &str = "wgcf-profile.conf";
pub const NODE_CLIENT_CERT_FILE: &str = "ssl_client_cert.pem";
pub const STREAM_BLOCK_MARKER: &str = "# vpsctl: sni pre-read dispatcher";
