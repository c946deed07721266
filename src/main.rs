mod api;

use anyhow::Result;
use clap::Parser;
use log::info;

use tarka_dns::config::Config;

#[derive(Parser, Debug)]
#[command(name = "tarka-dns")]
#[command(about = "ACME DNS-01 hook service for the Tarka DNS control panel")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config first: it carries the default log level
    let config = Config::load(&args.config)?;

    // RUST_LOG wins over the configured level
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.server.log_level)
    ).init();

    info!("Loading configuration from: {}", args.config);
    info!(
        "Loaded {} provider(s): {:?}",
        config.providers.len(),
        config
            .providers
            .iter()
            .map(|p| format!("{} ({})", p.name, p.zone))
            .collect::<Vec<_>>()
    );

    let app = api::create_router(&config)?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Server listening on http://{}", addr);
    info!("Hook endpoints: POST /acme/{{provider}}/present, POST /acme/{{provider}}/cleanup");

    axum::serve(listener, app).await?;

    Ok(())
}
