mod args;
pub mod relay;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("relay=info,tower_http=warn")),
        )
        .init();

    let args = args::Args::new();
    relay::start_ws(args.ip, args.port, args.host).await?;

    Ok(())
}
