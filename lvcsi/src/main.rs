//! `lvcsi`: node-local block volume driver daemon.
//!
//! Parses flags, initializes logging, assembles the [`Driver`] and serves it
//! over QUIC until the endpoint closes.

mod config;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use liblocalvolume::exec::HostExec;
use liblocalvolume::mount::HostMounter;
use liblocalvolume::transport::server::CsiServer;
use liblocalvolume::{Driver, DriverConfig};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::NODE_ENV;

#[derive(Parser, Debug)]
#[command(name = "lvcsi", version, about = "Node-local block volume driver")]
struct Cli {
    /// Address the QUIC endpoint binds to.
    #[arg(long, default_value = "0.0.0.0:9443")]
    endpoint: SocketAddr,

    /// Name the plugin registers under.
    #[arg(long, default_value = "local.csi.rk8s.io")]
    drivername: String,

    /// Node id reported by NodeGetInfo.
    #[arg(long)]
    nodeid: String,

    /// Backend kind: `lvm` or `fake`.
    #[arg(long, default_value = "lvm")]
    backend: String,

    /// Comma-separated volume groups; the first is the default pool.
    #[arg(long, value_delimiter = ',')]
    volume_groups: Vec<String>,

    /// Capacity the fake backend reports, in bytes.
    #[arg(long, default_value_t = 0, hide = true)]
    fake_capacity_bytes: u64,

    /// PEM certificate chain for the QUIC endpoint.
    #[arg(long)]
    tls_cert: PathBuf,

    /// PEM private key for the QUIC endpoint.
    #[arg(long)]
    tls_key: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn driver_config(&self, node_name: Option<String>) -> DriverConfig {
        DriverConfig {
            driver_name: self.drivername.clone(),
            node_id: self.nodeid.clone(),
            backend: self.backend.clone(),
            volume_groups: self.volume_groups.clone(),
            node_name,
            fake_capacity_bytes: self.fake_capacity_bytes,
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_tls(cert: &Path, key: &Path) -> Result<rustls::ServerConfig> {
    let certs = CertificateDer::pem_file_iter(cert)
        .with_context(|| format!("failed to open certificate {}", cert.display()))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to parse certificate {}", cert.display()))?;
    let key = PrivateKeyDer::from_pem_file(key)
        .with_context(|| format!("failed to read private key {}", key.display()))?;

    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("invalid certificate/key pair")?;
    config.alpn_protocols = vec![b"lvcsi".to_vec()];
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let exec = Arc::new(HostExec);
    let mounter = Arc::new(HostMounter::new(exec.clone()));
    let driver = Driver::new(cli.driver_config(NODE_ENV.node_name.clone()), exec, mounter)
        .context("failed to initialize driver")?;

    let tls = load_tls(&cli.tls_cert, &cli.tls_key)?;
    let server = CsiServer::new(cli.endpoint, tls, Arc::new(driver))
        .context("failed to start QUIC endpoint")?;

    let local_addr = server
        .endpoint()
        .local_addr()
        .context("failed to read bound address")?;
    info!(endpoint = %local_addr, node_id = %cli.nodeid, "lvcsi serving");
    server.serve().await?;
    Ok(())
}
