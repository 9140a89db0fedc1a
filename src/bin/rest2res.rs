//! rest2res service entry point.
//!
//! Loads the JSON configuration (writing a defaulted file if none exists),
//! compiles and registers every endpoint, then serves RES requests over
//! NATS until interrupted.

use clap::error::ErrorKind;
use clap::Parser;
use rest2res::bus::nats::NatsBus;
use rest2res::{Config, Service};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "rest2res", about = "Bridges REST endpoints onto a RES message bus")]
struct Cli {
    /// NATS Server URL
    #[arg(short = 'n', long = "nats")]
    nats: Option<String>,

    /// Configuration file
    #[arg(short = 'c', long = "config")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    let mut cfg = Config::load(&cli.config).await?;
    if let Some(nats_url) = cli.nats {
        cfg.nats_url = nats_url;
    }
    cfg.apply_access_policy();

    tracing_subscriber::fmt()
        .with_max_level(if cfg.debug { Level::DEBUG } else { Level::INFO })
        .init();

    let bus = NatsBus::new();
    let service = Service::new(&cfg.service, bus.clone())?;
    info!(
        "registered {} endpoint(s) as {}",
        service.endpoint_count(),
        cfg.service.service_name
    );

    let serve_token = CancellationToken::new();
    let mut serving = tokio::spawn(bus.clone().serve(
        cfg.nats_url.clone(),
        cfg.service.service_name.clone(),
        serve_token.clone(),
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            service.shutdown();
            serve_token.cancel();
            bus.shutdown().await;
        }
        res = &mut serving => {
            res??;
        }
    }

    Ok(())
}
