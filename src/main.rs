use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use kdcproxy::api::{self, AppState};
use kdcproxy::config::KdcProxyConfig;
use kdcproxy::resolver::dns::DnsResolver;
use kdcproxy::resolver::MetaResolver;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?
        .block_on(run())
}

async fn run() -> anyhow::Result<()> {
    init_logging();

    let config_path = parse_config_path_arg()?;
    let listen_addr = std::env::var("KDCPROXY_LISTEN").unwrap_or_else(|_| "127.0.0.1:8080".to_owned());

    let config = KdcProxyConfig::load(config_path.as_deref());
    let dns = DnsResolver::from_system_conf();
    let resolver = MetaResolver::new(config, dns);

    let state = Arc::new(AppState { resolver });
    let router = api::router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;

    tracing::info!(address = %listen_addr, "kdcproxy listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kdcproxy=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Parses `--config-path <path>` off the command line, leaving every other
/// argument untouched (there are none others, currently).
fn parse_config_path_arg() -> anyhow::Result<Option<PathBuf>> {
    let mut args = std::env::args();
    let _executable = args.next().context("executable name is missing from the environment")?;

    let mut config_path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config-path" => {
                let path = args.next().context("missing value for --config-path")?;
                config_path = Some(PathBuf::from(path));
            }
            "--help" | "-h" => {
                println!("kdcproxy [--config-path <kdcproxy.conf>]");
                std::process::exit(0);
            }
            other => anyhow::bail!("unrecognized argument: {other}"),
        }
    }

    Ok(config_path)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
