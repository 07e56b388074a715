//! Container registry server.

use camino::Utf8PathBuf;
use clap::Parser;
use eyre::WrapErr as _;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

use registry::{Config, router};

/// Serve a container registry.
#[derive(Debug, Parser)]
#[command(name = "registry-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, short)]
    config: Utf8PathBuf,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args = Args::parse();
    let text = tokio::fs::read_to_string(&args.config)
        .await
        .wrap_err_with(|| format!("reading {}", args.config))?;
    let config: Config =
        toml_edit::de::from_str(&text).wrap_err_with(|| format!("parsing {}", args.config))?;

    let listen = config.listen;
    let registry = config.build().wrap_err("building registry")?;

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .wrap_err_with(|| format!("binding {listen}"))?;
    tracing::info!(%listen, "serving registry");

    axum::serve(listener, router(registry))
        .await
        .wrap_err("serving")?;
    Ok(())
}
