//! Node agent: docker runtime, agent checkout, compose descriptor, client
//! certificate, routing assets, node core binary, then `docker compose up -d`.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::arch::Arch;
use crate::config::VpsConfig;
use crate::fetch::{download, download_first, extract_zip_member};
use crate::host::{run_checked, CommandSpec, Host};
use crate::packages;
use crate::paths::{
    node_assets_dir, node_client_cert_path, node_compose_path, node_core_binary,
};
use crate::provision::RunContext;
use crate::utils::{tolerate, write_file};

pub fn install(ctx: &RunContext, host: &dyn Host) -> Result<()> {
    let config = &ctx.config;
    ensure_container_runtime(config, host)?;
    sync_agent_source(config, host)?;
    write_compose_file(config)?;
    ensure_client_cert(config, ctx.options.node_cert.as_deref())?;
    fetch_routing_assets(config, host)?;
    install_core_binary(config, ctx.arch, host)?;

    run_checked(
        host,
        &CommandSpec::new("docker")
            .args(["compose", "up", "-d"])
            .cwd(&config.node_repo_dir),
    )
    .context("Failed to start the node agent container")?;
    info!(service = %config.node_service_name, "node agent started");
    Ok(())
}

fn ensure_container_runtime(config: &VpsConfig, host: &dyn Host) -> Result<()> {
    if host.which("docker").is_some() {
        info!("docker already installed");
    } else {
        let temp = tempfile::tempdir().context("Failed to create temp dir")?;
        let script = temp.path().join("get-docker.sh");
        download(host, &config.docker_install_script_url, &script)?;
        run_checked(host, &CommandSpec::new("sh").path_arg(&script))
            .context("Docker installation script failed")?;
    }

    let compose = host.run(
        &CommandSpec::new("docker")
            .args(["compose", "version"])
            .capture(),
    );
    if !compose.is_ok_and(|result| result.ok) {
        tolerate(
            "docker compose plugin install",
            packages::install(host, &["docker-compose-plugin"]),
        );
    }
    Ok(())
}

fn sync_agent_source(config: &VpsConfig, host: &dyn Host) -> Result<()> {
    let repo_dir = Path::new(&config.node_repo_dir);
    if !repo_dir.exists() {
        run_checked(
            host,
            &CommandSpec::new("git")
                .arg("clone")
                .arg(&config.node_repo_url)
                .path_arg(repo_dir),
        )
        .with_context(|| format!("Failed to clone {}", config.node_repo_url))?;
        return Ok(());
    }
    tolerate(
        "agent source update",
        run_checked(
            host,
            &CommandSpec::new("git")
                .arg("-C")
                .path_arg(repo_dir)
                .args(["pull", "--ff-only"]),
        ),
    );
    Ok(())
}

pub fn compose_descriptor(config: &VpsConfig) -> String {
    let data_dir = &config.node_data_dir;
    let core_root = &config.node_core_root;
    format!(
        r#"services:
  {service}:
    image: {image}
    restart: always
    network_mode: host
    environment:
      SSL_CLIENT_CERT_FILE: "{cert}"
      SERVICE_PORT: "{service_port}"
      XRAY_API_PORT: "{api_port}"
      SERVICE_PROTOCOL: "{protocol}"
      XRAY_EXECUTABLE_PATH: "{core}"
      XRAY_ASSETS_PATH: "{assets}"
    volumes:
      - {data_dir}:{data_dir}
      - {core_root}:{core_root}
"#,
        service = config.node_service_name,
        image = config.node_image,
        cert = node_client_cert_path(config).display(),
        service_port = config.node_service_port,
        api_port = config.node_api_port,
        protocol = config.node_service_protocol,
        core = node_core_binary(config).display(),
        assets = node_assets_dir(config).display(),
    )
}

fn write_compose_file(config: &VpsConfig) -> Result<()> {
    let path = node_compose_path(config);
    write_file(&path, compose_descriptor(config).as_bytes(), 0o644)?;
    info!(path = %path.display(), "wrote compose descriptor");
    Ok(())
}

/// Writes the panel's client certificate unless one is already in place.
fn ensure_client_cert(config: &VpsConfig, cli_source: Option<&Path>) -> Result<()> {
    let path = node_client_cert_path(config);
    if path.exists() {
        info!(path = %path.display(), "client certificate present");
        return Ok(());
    }
    let source: PathBuf = match cli_source {
        Some(source) => source.to_path_buf(),
        None => match config.node_client_cert_source.as_deref() {
            Some(source) => PathBuf::from(source),
            None => bail!(
                "Client certificate missing at {}; pass --node-cert <PATH> or set node_client_cert_source",
                path.display()
            ),
        },
    };
    let pem = fs::read_to_string(&source)
        .with_context(|| format!("Failed to read client certificate {}", source.display()))?;
    if !pem.contains("-----BEGIN CERTIFICATE-----") {
        bail!("{} does not contain a PEM certificate", source.display());
    }
    write_file(&path, pem.as_bytes(), 0o644)?;
    info!(path = %path.display(), "wrote client certificate");
    Ok(())
}

fn fetch_routing_assets(config: &VpsConfig, host: &dyn Host) -> Result<()> {
    let assets_dir = node_assets_dir(config);
    fs::create_dir_all(&assets_dir)
        .with_context(|| format!("Failed to create {}", assets_dir.display()))?;
    for asset in &config.routing_assets {
        download(host, &asset.url, &assets_dir.join(&asset.file_name))?;
    }
    Ok(())
}

pub fn core_archive_urls(config: &VpsConfig, arch: Arch) -> Vec<&str> {
    match arch {
        Arch::Amd64 => vec![
            config.core_url_amd64.as_str(),
            config.core_url_amd64_fallback.as_str(),
        ],
        Arch::Arm64 => vec![config.core_url_arm64.as_str()],
    }
}

fn install_core_binary(config: &VpsConfig, arch: Arch, host: &dyn Host) -> Result<()> {
    let temp = tempfile::tempdir().context("Failed to create temp dir")?;
    let archive = temp.path().join("core.zip");
    let source = download_first(host, &core_archive_urls(config, arch), &archive)?;
    info!(url = source, %arch, "fetched node core archive");
    extract_zip_member(
        &archive,
        &config.core_binary_name,
        &node_core_binary(config),
        0o755,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_config;
    use crate::provision::{RunOptions, Selection};
    use crate::testing::{zip_archive, FakeHost};

    const CERT: &str = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";

    fn context(root: &Path, arch: Arch) -> RunContext {
        let mut config = default_config();
        config.node_repo_dir = root.join("agent").display().to_string();
        config.node_data_dir = root.join("node-data").display().to_string();
        config.node_core_root = root.join("core").display().to_string();
        RunContext {
            selection: Selection::only_node(),
            arch,
            config,
            options: RunOptions::default(),
        }
    }

    fn core_zip() -> Vec<u8> {
        zip_archive(&[("xray", &b"core-binary"[..]), ("geoip.dat", &b"x"[..])])
    }

    fn seed_cert(ctx: &RunContext) {
        let path = node_client_cert_path(&ctx.config);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, CERT).unwrap();
    }

    #[test]
    fn fresh_host_installs_everything_and_starts_container() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = context(temp.path(), Arch::Arm64);
        seed_cert(&ctx);
        let host = FakeHost::new()
            .on_exit("docker compose version", 1)
            .serve(&ctx.config.core_url_arm64, &core_zip());

        install(&ctx, &host).unwrap();

        assert!(host.ran("sh "));
        assert!(host.ran("apt-get install -y docker-compose-plugin"));
        assert!(host.ran("git clone https://github.com/Gozargah/Marzban-node"));
        let last = host.commands().pop().unwrap();
        assert_eq!(last.display(), "docker compose up -d");
        assert_eq!(last.cwd, Some(PathBuf::from(&ctx.config.node_repo_dir)));

        let downloads = host.downloads();
        assert_eq!(downloads[0], ctx.config.docker_install_script_url);
        for asset in &ctx.config.routing_assets {
            assert!(downloads.contains(&asset.url));
            assert!(node_assets_dir(&ctx.config).join(&asset.file_name).exists());
        }
        assert_eq!(
            fs::read(node_core_binary(&ctx.config)).unwrap(),
            b"core-binary"
        );
        let compose = fs::read_to_string(node_compose_path(&ctx.config)).unwrap();
        assert!(compose.contains("network_mode: host"));
    }

    #[test]
    fn existing_runtime_and_checkout_are_reused() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = context(temp.path(), Arch::Arm64);
        seed_cert(&ctx);
        fs::create_dir_all(&ctx.config.node_repo_dir).unwrap();
        let host = FakeHost::new()
            .with_program("docker")
            .on_exit("pull --ff-only", 1)
            .serve(&ctx.config.core_url_arm64, &core_zip());

        install(&ctx, &host).unwrap();

        assert!(!host.ran("git clone"));
        assert!(host.ran("pull --ff-only"));
        assert!(!host.ran("docker-compose-plugin"));
        assert_eq!(host.downloads().len(), 4);
    }

    #[test]
    fn amd64_core_falls_back_to_secondary_url() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = context(temp.path(), Arch::Amd64);
        seed_cert(&ctx);
        fs::create_dir_all(&ctx.config.node_repo_dir).unwrap();
        let host = FakeHost::new()
            .with_program("docker")
            .fail_url(&ctx.config.core_url_amd64)
            .serve(&ctx.config.core_url_amd64_fallback, &core_zip());

        install(&ctx, &host).unwrap();
        let downloads = host.downloads();
        assert!(downloads.contains(&ctx.config.core_url_amd64));
        assert!(downloads.contains(&ctx.config.core_url_amd64_fallback));
        assert!(node_core_binary(&ctx.config).exists());
    }

    #[test]
    fn failed_asset_download_aborts_before_container_start() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = context(temp.path(), Arch::Arm64);
        seed_cert(&ctx);
        fs::create_dir_all(&ctx.config.node_repo_dir).unwrap();
        let host = FakeHost::new()
            .with_program("docker")
            .fail_url(&ctx.config.routing_assets[1].url);

        assert!(install(&ctx, &host).is_err());
        assert!(!host.ran("up -d"));
    }

    #[test]
    fn container_start_failure_is_fatal() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = context(temp.path(), Arch::Arm64);
        seed_cert(&ctx);
        fs::create_dir_all(&ctx.config.node_repo_dir).unwrap();
        let host = FakeHost::new()
            .with_program("docker")
            .on_exit("docker compose up -d", 1)
            .serve(&ctx.config.core_url_arm64, &core_zip());

        let err = install(&ctx, &host).unwrap_err();
        assert!(err.to_string().contains("Failed to start the node agent"));
    }

    #[test]
    fn client_cert_is_copied_only_when_absent() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = context(temp.path(), Arch::Arm64);
        let source = temp.path().join("panel.pem");
        fs::write(&source, CERT).unwrap();

        ensure_client_cert(&ctx.config, Some(&source)).unwrap();
        let path = node_client_cert_path(&ctx.config);
        assert_eq!(fs::read_to_string(&path).unwrap(), CERT);

        fs::write(&path, "existing").unwrap();
        ensure_client_cert(&ctx.config, Some(&source)).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "existing");
    }

    #[test]
    fn missing_client_cert_without_source_is_fatal() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = context(temp.path(), Arch::Arm64);
        let err = ensure_client_cert(&ctx.config, None).unwrap_err();
        assert!(err.to_string().contains("--node-cert"));

        let bogus = temp.path().join("bogus.pem");
        fs::write(&bogus, "not a cert").unwrap();
        assert!(ensure_client_cert(&ctx.config, Some(&bogus)).is_err());
    }

    #[test]
    fn compose_descriptor_points_at_installed_paths() {
        let config = default_config();
        let compose = compose_descriptor(&config);
        assert!(compose.contains("image: gozargah/marzban-node:latest"));
        assert!(compose
            .contains("SSL_CLIENT_CERT_FILE: \"/var/lib/marzban-node/ssl_client_cert.pem\""));
        assert!(compose.contains("XRAY_EXECUTABLE_PATH: \"/var/lib/marzban/xray-core/xray\""));
        assert!(compose.contains("XRAY_ASSETS_PATH: \"/var/lib/marzban/assets\""));
        assert!(compose.contains("- /var/lib/marzban:/var/lib/marzban"));
    }

    #[test]
    fn core_urls_depend_on_arch() {
        let config = default_config();
        assert_eq!(core_archive_urls(&config, Arch::Amd64).len(), 2);
        assert_eq!(
            core_archive_urls(&config, Arch::Arm64),
            vec![config.core_url_arm64.as_str()]
        );
    }
}
