use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "burstplay=info,burstplay_lib=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = burstplay_lib::Args::parse();
    burstplay_lib::run(args)
}
