use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::{
    DEFAULT_CONFIG_PATH, DEFAULT_PACKAGE_INDEX_MAX_AGE_SECS, DEFAULT_STREAM_FALLBACK_PORT,
    DEFAULT_STREAM_LISTEN_PORT, DEFAULT_TLS_BACKEND_PORT, DEFAULT_WGCF_VERSION,
};

pub const CONFIG_ENV: &str = "VPSCTL_CONFIG";

/// One routing-data file the node agent expects in its assets directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingAsset {
    pub file_name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpsConfig {
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
    #[serde(default = "default_package_index_stamp")]
    pub package_index_stamp: String,
    #[serde(default)]
    pub package_index_max_age_secs: u64,

    #[serde(default = "default_docker_install_script_url")]
    pub docker_install_script_url: String,
    #[serde(default = "default_node_repo_url")]
    pub node_repo_url: String,
    #[serde(default = "default_node_repo_dir")]
    pub node_repo_dir: String,
    #[serde(default = "default_node_service_name")]
    pub node_service_name: String,
    #[serde(default = "default_node_image")]
    pub node_image: String,
    #[serde(default = "default_node_data_dir")]
    pub node_data_dir: String,
    #[serde(default = "default_node_core_root")]
    pub node_core_root: String,
    #[serde(default)]
    pub node_service_port: u16,
    #[serde(default)]
    pub node_api_port: u16,
    #[serde(default = "default_node_service_protocol")]
    pub node_service_protocol: String,
    #[serde(default)]
    pub node_client_cert_source: Option<String>,
    #[serde(default = "default_routing_assets")]
    pub routing_assets: Vec<RoutingAsset>,
    #[serde(default = "default_core_url_amd64")]
    pub core_url_amd64: String,
    #[serde(default = "default_core_url_amd64_fallback")]
    pub core_url_amd64_fallback: String,
    #[serde(default = "default_core_url_arm64")]
    pub core_url_arm64: String,
    #[serde(default = "default_core_binary_name")]
    pub core_binary_name: String,

    #[serde(default = "default_wgcf_version")]
    pub wgcf_version: String,
    #[serde(default = "default_wgcf_release_base")]
    pub wgcf_release_base: String,
    #[serde(default = "default_wgcf_bin_path")]
    pub wgcf_bin_path: String,
    #[serde(default = "default_wireguard_dir")]
    pub wireguard_dir: String,
    #[serde(default = "default_tunnel_interface")]
    pub tunnel_interface: String,
    #[serde(default = "default_resolv_conf_path")]
    pub resolv_conf_path: String,

    #[serde(default = "default_nginx_conf_path")]
    pub nginx_conf_path: String,
    #[serde(default = "default_site_conf_path")]
    pub site_conf_path: String,
    /// Distribution default vhost; it also claims `default_server` on port 80.
    #[serde(default = "default_nginx_default_site_path")]
    pub nginx_default_site_path: String,
    #[serde(default = "default_web_root")]
    pub web_root: String,
    #[serde(default = "default_letsencrypt_live_dir")]
    pub letsencrypt_live_dir: String,
    #[serde(default = "default_certbot_link_path")]
    pub certbot_link_path: String,
    #[serde(default = "default_snap_certbot_path")]
    pub snap_certbot_path: String,
    #[serde(default)]
    pub stream_listen_port: u16,
    #[serde(default)]
    pub tls_backend_port: u16,
    #[serde(default)]
    pub stream_fallback_port: u16,
    #[serde(default)]
    pub acme_email: Option<String>,
}

fn default_state_dir() -> String {
    "/var/lib/vpsctl".to_string()
}

fn default_package_index_stamp() -> String {
    "/var/lib/apt/periodic/update-success-stamp".to_string()
}

fn default_docker_install_script_url() -> String {
    "https://get.docker.com".to_string()
}

fn default_node_repo_url() -> String {
    "https://github.com/Gozargah/Marzban-node".to_string()
}

fn default_node_repo_dir() -> String {
    "/opt/marzban-node".to_string()
}

fn default_node_service_name() -> String {
    "marzban-node".to_string()
}

fn default_node_image() -> String {
    "gozargah/marzban-node:latest".to_string()
}

fn default_node_data_dir() -> String {
    "/var/lib/marzban-node".to_string()
}

fn default_node_core_root() -> String {
    "/var/lib/marzban".to_string()
}

fn default_node_service_protocol() -> String {
    "rest".to_string()
}

fn default_routing_assets() -> Vec<RoutingAsset> {
    vec![
        RoutingAsset {
            file_name: "geoip.dat".to_string(),
            url: "https://github.com/Loyalsoldier/v2ray-rules-dat/releases/latest/download/geoip.dat"
                .to_string(),
        },
        RoutingAsset {
            file_name: "geosite.dat".to_string(),
            url:
                "https://github.com/Loyalsoldier/v2ray-rules-dat/releases/latest/download/geosite.dat"
                    .to_string(),
        },
        RoutingAsset {
            file_name: "iran.dat".to_string(),
            url: "https://github.com/bootmortis/iran-hosted-domains/releases/latest/download/iran.dat"
                .to_string(),
        },
    ]
}

fn default_core_url_amd64() -> String {
    "https://github.com/XTLS/Xray-core/releases/latest/download/Xray-linux-64.zip".to_string()
}

fn default_core_url_amd64_fallback() -> String {
    "https://github.com/XTLS/Xray-core/releases/download/v1.8.24/Xray-linux-64.zip".to_string()
}

fn default_core_url_arm64() -> String {
    "https://github.com/XTLS/Xray-core/releases/latest/download/Xray-linux-arm64-v8a.zip"
        .to_string()
}

fn default_core_binary_name() -> String {
    "xray".to_string()
}

fn default_wgcf_version() -> String {
    DEFAULT_WGCF_VERSION.to_string()
}

fn default_wgcf_release_base() -> String {
    "https://github.com/ViRb3/wgcf/releases/download".to_string()
}

fn default_wgcf_bin_path() -> String {
    "/usr/local/bin/wgcf".to_string()
}

fn default_wireguard_dir() -> String {
    "/etc/wireguard".to_string()
}

fn default_tunnel_interface() -> String {
    "warp".to_string()
}

fn default_resolv_conf_path() -> String {
    "/etc/resolv.conf".to_string()
}

fn default_nginx_conf_path() -> String {
    "/etc/nginx/nginx.conf".to_string()
}

fn default_site_conf_path() -> String {
    "/etc/nginx/conf.d/vpsctl.conf".to_string()
}

fn default_nginx_default_site_path() -> String {
    "/etc/nginx/sites-enabled/default".to_string()
}

fn default_web_root() -> String {
    "/var/www/vpsctl".to_string()
}

fn default_letsencrypt_live_dir() -> String {
    "/etc/letsencrypt/live".to_string()
}

fn default_certbot_link_path() -> String {
    "/usr/bin/certbot".to_string()
}

fn default_snap_certbot_path() -> String {
    "/snap/bin/certbot".to_string()
}

pub fn default_config() -> VpsConfig {
    VpsConfig {
        state_dir: default_state_dir(),
        package_index_stamp: default_package_index_stamp(),
        package_index_max_age_secs: DEFAULT_PACKAGE_INDEX_MAX_AGE_SECS,
        docker_install_script_url: default_docker_install_script_url(),
        node_repo_url: default_node_repo_url(),
        node_repo_dir: default_node_repo_dir(),
        node_service_name: default_node_service_name(),
        node_image: default_node_image(),
        node_data_dir: default_node_data_dir(),
        node_core_root: default_node_core_root(),
        node_service_port: 62050,
        node_api_port: 62051,
        node_service_protocol: default_node_service_protocol(),
        node_client_cert_source: None,
        routing_assets: default_routing_assets(),
        core_url_amd64: default_core_url_amd64(),
        core_url_amd64_fallback: default_core_url_amd64_fallback(),
        core_url_arm64: default_core_url_arm64(),
        core_binary_name: default_core_binary_name(),
        wgcf_version: default_wgcf_version(),
        wgcf_release_base: default_wgcf_release_base(),
        wgcf_bin_path: default_wgcf_bin_path(),
        wireguard_dir: default_wireguard_dir(),
        tunnel_interface: default_tunnel_interface(),
        resolv_conf_path: default_resolv_conf_path(),
        nginx_conf_path: default_nginx_conf_path(),
        site_conf_path: default_site_conf_path(),
        nginx_default_site_path: default_nginx_default_site_path(),
        web_root: default_web_root(),
        letsencrypt_live_dir: default_letsencrypt_live_dir(),
        certbot_link_path: default_certbot_link_path(),
        snap_certbot_path: default_snap_certbot_path(),
        stream_listen_port: DEFAULT_STREAM_LISTEN_PORT,
        tls_backend_port: DEFAULT_TLS_BACKEND_PORT,
        stream_fallback_port: DEFAULT_STREAM_FALLBACK_PORT,
        acme_email: None,
    }
}

/// Where the config comes from, and whether its absence is an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Explicit(PathBuf),
    Default(PathBuf),
}

impl ConfigSource {
    pub fn path(&self) -> &Path {
        match self {
            Self::Explicit(path) | Self::Default(path) => path,
        }
    }
}

pub fn resolve_config_source(path: Option<PathBuf>) -> ConfigSource {
    if let Some(path) = path {
        return ConfigSource::Explicit(path);
    }
    match std::env::var(CONFIG_ENV) {
        Ok(value) if !value.trim().is_empty() => {
            ConfigSource::Explicit(PathBuf::from(value.trim()))
        }
        _ => ConfigSource::Default(PathBuf::from(DEFAULT_CONFIG_PATH)),
    }
}

pub fn load_config(source: &ConfigSource) -> Result<VpsConfig> {
    let path = source.path();
    if !path.exists() {
        return match source {
            ConfigSource::Explicit(_) => bail!("Config not found at {}", path.display()),
            ConfigSource::Default(_) => Ok(default_config()),
        };
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config at {}", path.display()))?;
    let mut config: VpsConfig = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse config at {}", path.display()))?;
    normalize_config(&mut config);
    Ok(config)
}

/// Restores defaults for values that were left empty or zero in the file.
pub fn normalize_config(config: &mut VpsConfig) {
    let defaults = default_config();
    let strings = [
        (&mut config.state_dir, &defaults.state_dir),
        (&mut config.package_index_stamp, &defaults.package_index_stamp),
        (
            &mut config.docker_install_script_url,
            &defaults.docker_install_script_url,
        ),
        (&mut config.node_repo_url, &defaults.node_repo_url),
        (&mut config.node_repo_dir, &defaults.node_repo_dir),
        (&mut config.node_service_name, &defaults.node_service_name),
        (&mut config.node_image, &defaults.node_image),
        (&mut config.node_data_dir, &defaults.node_data_dir),
        (&mut config.node_core_root, &defaults.node_core_root),
        (
            &mut config.node_service_protocol,
            &defaults.node_service_protocol,
        ),
        (&mut config.core_url_amd64, &defaults.core_url_amd64),
        (
            &mut config.core_url_amd64_fallback,
            &defaults.core_url_amd64_fallback,
        ),
        (&mut config.core_url_arm64, &defaults.core_url_arm64),
        (&mut config.core_binary_name, &defaults.core_binary_name),
        (&mut config.wgcf_version, &defaults.wgcf_version),
        (&mut config.wgcf_release_base, &defaults.wgcf_release_base),
        (&mut config.wgcf_bin_path, &defaults.wgcf_bin_path),
        (&mut config.wireguard_dir, &defaults.wireguard_dir),
        (&mut config.tunnel_interface, &defaults.tunnel_interface),
        (&mut config.resolv_conf_path, &defaults.resolv_conf_path),
        (&mut config.nginx_conf_path, &defaults.nginx_conf_path),
        (&mut config.site_conf_path, &defaults.site_conf_path),
        (
            &mut config.nginx_default_site_path,
            &defaults.nginx_default_site_path,
        ),
        (&mut config.web_root, &defaults.web_root),
        (&mut config.letsencrypt_live_dir, &defaults.letsencrypt_live_dir),
        (&mut config.certbot_link_path, &defaults.certbot_link_path),
        (&mut config.snap_certbot_path, &defaults.snap_certbot_path),
    ];
    for (value, default) in strings {
        if value.trim().is_empty() {
            *value = default.clone();
        }
    }

    if config.package_index_max_age_secs == 0 {
        config.package_index_max_age_secs = defaults.package_index_max_age_secs;
    }
    let ports = [
        (&mut config.node_service_port, defaults.node_service_port),
        (&mut config.node_api_port, defaults.node_api_port),
        (&mut config.stream_listen_port, defaults.stream_listen_port),
        (&mut config.tls_backend_port, defaults.tls_backend_port),
        (&mut config.stream_fallback_port, defaults.stream_fallback_port),
    ];
    for (value, default) in ports {
        if *value == 0 {
            *value = default;
        }
    }
    if config.routing_assets.is_empty() {
        config.routing_assets = defaults.routing_assets;
    }
    for optional in [
        &mut config.node_client_cert_source,
        &mut config.acme_email,
    ] {
        if optional.as_deref().is_some_and(|value| value.trim().is_empty()) {
            *optional = None;
        }
    }
}
