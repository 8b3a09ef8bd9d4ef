use std::path::{Path, PathBuf};

use crate::config::VpsConfig;
use crate::constants::{NODE_CLIENT_CERT_FILE, WGCF_ACCOUNT_FILE, WGCF_PROFILE_FILE};

pub fn node_compose_path(config: &VpsConfig) -> PathBuf {
    Path::new(&config.node_repo_dir).join("docker-compose.yml")
}

pub fn node_client_cert_path(config: &VpsConfig) -> PathBuf {
    Path::new(&config.node_data_dir).join(NODE_CLIENT_CERT_FILE)
}

pub fn node_assets_dir(config: &VpsConfig) -> PathBuf {
    Path::new(&config.node_core_root).join("assets")
}

pub fn node_core_binary(config: &VpsConfig) -> PathBuf {
    Path::new(&config.node_core_root)
        .join("xray-core")
        .join(&config.core_binary_name)
}

pub fn wgcf_work_dir(config: &VpsConfig) -> PathBuf {
    Path::new(&config.state_dir).join("wgcf")
}

pub fn wgcf_account_path(config: &VpsConfig) -> PathBuf {
    wgcf_work_dir(config).join(WGCF_ACCOUNT_FILE)
}

pub fn wgcf_profile_path(config: &VpsConfig) -> PathBuf {
    wgcf_work_dir(config).join(WGCF_PROFILE_FILE)
}

pub fn tunnel_unit_config(config: &VpsConfig) -> PathBuf {
    Path::new(&config.wireguard_dir).join(format!("{}.conf", config.tunnel_interface))
}

pub fn tunnel_unit_name(config: &VpsConfig) -> String {
    format!("wg-quick@{}", config.tunnel_interface)
}

pub fn site_index_path(config: &VpsConfig) -> PathBuf {
    Path::new(&config.web_root).join("index.html")
}

pub fn certificate_dir(config: &VpsConfig, domain: &str) -> PathBuf {
    Path::new(&config.letsencrypt_live_dir).join(domain)
}
