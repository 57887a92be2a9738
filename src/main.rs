use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use commit_log::{CommitLog, Config, SegmentConfig};
use dlog::auth::{files, tls, Authorizer};
use dlog::server::{self, AppState};

#[derive(Debug, Parser)]
#[command(name = "dlogd")]
#[command(about = "Append-only commit log server", long_about = None)]
struct Cli {
    /// Directory holding the segment files.
    #[clap(long, env = "DLOG_DATA_DIR", default_value = "dlog-data")]
    data_dir: PathBuf,

    /// The address and port the HTTP API listens on.
    #[clap(long, env = "DLOG_LISTEN_ADDR", default_value = "127.0.0.1:8080")]
    listen_addr: SocketAddr,

    /// Maximum bytes in one store file before the segment rolls (0 = default).
    #[clap(long, default_value_t = 0)]
    max_store_bytes: u64,

    /// Maximum bytes in one index file before the segment rolls (0 = default).
    #[clap(long, default_value_t = 0)]
    max_index_bytes: u64,

    /// Offset assigned to the first record of a brand-new log.
    #[clap(long, default_value_t = 0)]
    initial_offset: u64,

    /// Server certificate (PEM). Falls back to ~/.dlog/server.pem when present.
    #[clap(long)]
    tls_cert: Option<PathBuf>,

    /// Server private key (PEM). Falls back to ~/.dlog/server-key.pem when present.
    #[clap(long)]
    tls_key: Option<PathBuf>,

    /// Root certificate for verifying clients (PEM). Falls back to
    /// ~/.dlog/ca.pem when present.
    #[clap(long)]
    tls_ca: Option<PathBuf>,

    /// Require clients to present a certificate signed by the CA.
    #[clap(long)]
    require_client_auth: bool,

    /// ACL policy file. Falls back to ~/.dlog/policy.csv when present;
    /// with no policy at all, every subject is allowed everything.
    #[clap(long)]
    acl_policy: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing::subscriber::set_global_default(
        FmtSubscriber::builder().with_env_filter(filter).finish(),
    )
    .context("setting default subscriber failed")?;

    let args = Cli::parse();

    let config = Config {
        segment: SegmentConfig {
            max_store_bytes: args.max_store_bytes,
            max_index_bytes: args.max_index_bytes,
            initial_offset: args.initial_offset,
        },
    };
    let log = Arc::new(
        CommitLog::new(&args.data_dir, config)
            .with_context(|| format!("opening commit log in {}", args.data_dir.display()))?,
    );

    let authorizer = match args.acl_policy.or_else(|| existing(files::policy_file())) {
        Some(path) => Authorizer::from_file(&path)
            .with_context(|| format!("loading ACL policy {}", path.display()))?,
        None => {
            tracing::warn!("no ACL policy configured, allowing every subject");
            Authorizer::allow_all()
        }
    };

    let state = AppState {
        log: Arc::clone(&log),
        authorizer: Arc::new(authorizer),
    };
    let router = server::router(state);

    let tls_cert = args.tls_cert.or_else(|| existing(files::server_cert_file()));
    let tls_key = args.tls_key.or_else(|| existing(files::server_key_file()));
    match (tls_cert, tls_key) {
        (Some(cert_file), Some(key_file)) => {
            let opts = tls::TlsOptions {
                cert_file,
                key_file,
                ca_file: args.tls_ca.or_else(|| existing(files::ca_file())),
                require_client_auth: args.require_client_auth,
            };
            let config = tls::server_config(&opts).context("building TLS config")?;
            server::run_tls(args.listen_addr, router, config).await?;
        }
        (None, None) => server::run_plain(args.listen_addr, router).await?,
        _ => anyhow::bail!("--tls-cert and --tls-key must be given together"),
    }

    log.close().context("closing commit log")?;
    tracing::info!("server shutdown");
    Ok(())
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    path.exists().then_some(path)
}
