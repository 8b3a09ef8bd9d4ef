//! nginx front: certbot issuance, SNI pre-read stream dispatcher in the global
//! config, a regenerated site config and static page, then validate and reload.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::VpsConfig;
use crate::constants::STREAM_BLOCK_MARKER;
use crate::host::{run_checked, CommandSpec, Host};
use crate::packages;
use crate::patch::{contains_line, Anchor, LineMatch, Patch, PatchOutcome};
use crate::paths::{certificate_dir, site_index_path};
use crate::provision::RunContext;
use crate::utils::{symlink_force, tolerate, write_file};

pub fn install(ctx: &RunContext, host: &dyn Host) -> Result<()> {
    let config = &ctx.config;
    ensure_certbot(config, host)?;
    let domain = resolve_domain(ctx.options.domain.as_deref(), host)?;
    issue_certificate(config, host, &domain, ctx.options.email.as_deref())?;

    packages::install(host, &["nginx", "libnginx-mod-stream"])?;
    inject_stream_block(config)?;

    let site = Path::new(&config.site_conf_path);
    write_file(site, site_config(config, &domain).as_bytes(), 0o644)?;
    info!(path = %site.display(), %domain, "wrote site config");
    let index = site_index_path(config);
    write_file(&index, index_page(&domain).as_bytes(), 0o644)?;
    disable_default_site(config)?;

    run_checked(host, &CommandSpec::new("nginx").arg("-t"))
        .context("nginx rejected the generated configuration")?;
    reload_nginx(host)?;
    open_firewall(host);
    info!(%domain, "reverse proxy ready");
    Ok(())
}

fn ensure_certbot(config: &VpsConfig, host: &dyn Host) -> Result<()> {
    if host.which("certbot").is_some() {
        info!("certbot already installed");
        return Ok(());
    }
    if tolerate(
        "native certbot package",
        packages::install(host, &["certbot"]),
    )
    .is_some()
    {
        return Ok(());
    }

    info!("falling back to the snap certbot package");
    run_checked(host, &CommandSpec::new("snap").args(["install", "core"]))
        .context("Failed to install snap core")?;
    run_checked(
        host,
        &CommandSpec::new("snap").args(["install", "--classic", "certbot"]),
    )
    .context("Failed to install certbot via snap")?;
    symlink_force(
        Path::new(&config.snap_certbot_path),
        Path::new(&config.certbot_link_path),
    )
    .with_context(|| format!("Failed to link {}", config.certbot_link_path))?;
    Ok(())
}

fn resolve_domain(provided: Option<&str>, host: &dyn Host) -> Result<String> {
    let raw = match provided {
        Some(domain) => domain.to_string(),
        None => host.prompt("Domain name for this server: ")?,
    };
    let domain = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    if domain.is_empty() {
        bail!("A domain name is required for the reverse proxy");
    }
    validate_domain(&domain)?;
    Ok(domain)
}

fn validate_domain(domain: &str) -> Result<()> {
    let labels: Vec<&str> = domain.split('.').collect();
    let label_ok = |label: &&str| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
    };
    if labels.len() < 2 || domain.len() > 253 || !labels.iter().all(label_ok) {
        bail!("Invalid domain name: {domain:?}");
    }
    Ok(())
}

fn issue_certificate(
    config: &VpsConfig,
    host: &dyn Host,
    domain: &str,
    email: Option<&str>,
) -> Result<()> {
    let mut spec = CommandSpec::new("certbot")
        .args([
            "certonly",
            "--standalone",
            "--non-interactive",
            "--agree-tos",
            "--keep-until-expiring",
            "-d",
        ])
        .arg(domain);
    spec = match email.or(config.acme_email.as_deref()) {
        Some(email) => spec.args(["--email", email]),
        None => spec.arg("--register-unsafely-without-email"),
    };
    // Standalone issuance needs port 80; a running nginx has to step aside.
    if host.which("nginx").is_some() {
        spec = spec.args([
            "--pre-hook",
            "systemctl stop nginx",
            "--post-hook",
            "systemctl start nginx",
        ]);
    }
    run_checked(host, &spec)
        .with_context(|| format!("Certificate issuance failed for {domain}"))?;
    info!(%domain, dir = %certificate_dir(config, domain).display(), "certificate ready");
    Ok(())
}

pub fn stream_block(config: &VpsConfig) -> String {
    format!(
        r#"{marker}
stream {{
    map $ssl_preread_server_name $vpsctl_stream_upstream {{
        ""      vpsctl_plain;
        default vpsctl_tls;
    }}

    upstream vpsctl_tls {{
        server 127.0.0.1:{tls};
    }}

    upstream vpsctl_plain {{
        server 127.0.0.1:{plain};
    }}

    server {{
        listen {listen};
        listen [::]:{listen};
        ssl_preread on;
        proxy_pass $vpsctl_stream_upstream;
    }}
}}"#,
        marker = STREAM_BLOCK_MARKER,
        tls = config.tls_backend_port,
        plain = config.stream_fallback_port,
        listen = config.stream_listen_port,
    )
}

pub fn stream_patch(config: &VpsConfig) -> Patch {
    Patch {
        name: "nginx-stream",
        marker: STREAM_BLOCK_MARKER,
        strip: &[],
        insert: stream_block(config),
        anchor: Anchor::Before(LineMatch::TopLevelBlock("http")),
        fallback: Some(Anchor::EndOfFile),
    }
}

/// Adds the stream dispatcher to nginx.conf once, backing the file up first.
/// Returns the backup path when the file was modified.
fn inject_stream_block(config: &VpsConfig) -> Result<Option<PathBuf>> {
    let path = Path::new(&config.nginx_conf_path);
    let original = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let patch = stream_patch(config);
    let patched = patch.apply(&original);
    match patched.outcome {
        PatchOutcome::AlreadyApplied => {
            info!(path = %path.display(), "stream dispatcher already present");
            return Ok(None);
        }
        PatchOutcome::AnchorNotFound => {
            bail!("Could not place the stream block in {}", path.display())
        }
        PatchOutcome::Inserted { used_fallback } => {
            // nginx accepts a single top-level stream block.
            if contains_line(&original, LineMatch::TopLevelBlock("stream")) {
                bail!(
                    "{} already has a stream block not managed by vpsctl; merge the SNI dispatcher into it by hand",
                    path.display()
                );
            }
            info!(patch = patch.name, used_fallback, "inserting stream dispatcher");
        }
    }

    let backup = PathBuf::from(format!(
        "{}.bak.{}",
        path.display(),
        Utc::now().format("%Y%m%d%H%M%S")
    ));
    fs::copy(path, &backup)
        .with_context(|| format!("Failed to back up {}", path.display()))?;
    fs::write(path, &patched.text)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(backup = %backup.display(), "nginx.conf updated");
    Ok(Some(backup))
}

pub fn site_config(config: &VpsConfig, domain: &str) -> String {
    let cert_dir = certificate_dir(config, domain);
    let fullchain = cert_dir.join("fullchain.pem");
    let privkey = cert_dir.join("privkey.pem");
    format!(
        r#"server {{
    listen 80 default_server;
    listen [::]:80 default_server;
    server_name _;
    return 301 https://$host$request_uri;
}}

server {{
    listen 127.0.0.1:{tls} ssl default_server;
    server_name _;
    ssl_certificate {fullchain};
    ssl_certificate_key {privkey};
    ssl_protocols TLSv1.3;
    return 301 https://{domain}$request_uri;
}}

server {{
    listen 127.0.0.1:{tls} ssl http2;
    server_name {domain};
    ssl_certificate {fullchain};
    ssl_certificate_key {privkey};
    ssl_protocols TLSv1.3;
    ssl_session_cache shared:vpsctl:10m;

    root {root};
    index index.html;

    location / {{
        try_files $uri $uri/ =404;
    }}
}}
"#,
        tls = config.tls_backend_port,
        fullchain = fullchain.display(),
        privkey = privkey.display(),
        root = config.web_root,
    )
}

/// The packaged default vhost also listens with `default_server` on port 80,
/// which `nginx -t` rejects alongside the generated site.
fn disable_default_site(config: &VpsConfig) -> Result<()> {
    let path = Path::new(&config.nginx_default_site_path);
    if !(path.exists() || path.is_symlink()) {
        return Ok(());
    }
    fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))?;
    info!(path = %path.display(), "disabled distribution default site");
    Ok(())
}

fn index_page(domain: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{domain}</title>\n</head>\n<body>\n<h1>{domain}</h1>\n<p>It works.</p>\n</body>\n</html>\n"
    )
}

fn reload_nginx(host: &dyn Host) -> Result<()> {
    let reload = CommandSpec::new("systemctl").args(["reload", "nginx"]);
    if let Err(err) = run_checked(host, &reload) {
        let detail = format!("{err:#}");
        warn!(error = %detail, "nginx reload failed; restarting");
        run_checked(host, &CommandSpec::new("systemctl").args(["restart", "nginx"]))
            .context("Failed to restart nginx")?;
    }
    Ok(())
}

fn open_firewall(host: &dyn Host) {
    if host.which("ufw").is_none() {
        return;
    }
    let active = host
        .run(&CommandSpec::new("ufw").arg("status").capture())
        .map(|result| result.ok && result.stdout.contains("Status: active"));
    match active {
        Ok(true) => {
            for rule in ["80/tcp", "443/tcp"] {
                tolerate(
                    "firewall rule",
                    run_checked(host, &CommandSpec::new("ufw").args(["allow", rule])),
                );
            }
        }
        Ok(false) => info!("ufw inactive; leaving firewall alone"),
        Err(err) => {
            tolerate::<()>("ufw status", Err(err));
        }
    }
}
