use cloud_emulator::{start, EmulatorConfig, Error};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let config = EmulatorConfig::from_env()?;
    let emulator = start(config).await?;

    info!("export LOCALSTACK_ENDPOINT={}", emulator.endpoint_url());
    info!("Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;

    emulator.shutdown().await;

    Ok(())
}

/// Logs at `info` unless RUST_LOG says otherwise, e.g. `RUST_LOG=cloud_emulator=debug`.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("cloud_emulator=info".parse().expect("Invalid default log directive. It's a bug."))
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(true)
        .with_target(false)
        .compact()
        .init();
}
