use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use json_relay::{
    Relay, RelayConfig,
    cli::{Cli, Command},
    client,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            let relay = Relay::bind(RelayConfig::from(&args)).await?;
            let addr = relay.local_addr()?;
            info!("relay listening on ws://{}", addr);
            info!("reachable from the local network at ws://<your-ip>:{}", addr.port());
            if let Err(err) = relay.run_until_ctrl_c().await {
                warn!("relay exited with error: {err:?}");
                return Err(err.into());
            }
        }
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}
