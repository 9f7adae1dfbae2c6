use tweet_mesh::config::NodeConfig;
use tweet_mesh::context::NodeContext;
use tweet_mesh::server;

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        eprintln!(
            "Usage: {} --name <name> [--bind <addr:port>] [--address <advertised>] [--join <addr:port>]",
            args[0]
        );
        eprintln!("       [--storage memory|sqlite] [--db <path>] [--token <api token>]");
        eprintln!("Example: {} --name alpha --bind 127.0.0.1:5000", args[0]);
        eprintln!(
            "Example: {} --name beta --bind 127.0.0.1:5001 --join 127.0.0.1:5000",
            args[0]
        );
        std::process::exit(1);
    }

    let mut config = NodeConfig::from_env()?;
    config.apply_args(&args[1..])?;

    let ctx = NodeContext::open(config)?;
    tracing::info!("Starting node {} ({})", ctx.config.own_name, ctx.config.own_address);

    let listener = TcpListener::bind(ctx.config.bind_addr).await?;

    // A node told to join a mesh must not run on its own if the join fails.
    if let Some(bootstrap) = ctx.config.bootstrap.clone() {
        ctx.join
            .join(&bootstrap)
            .await
            .map_err(|e| anyhow::anyhow!("Could not join mesh through {}: {}", bootstrap, e))?;
    } else {
        tracing::info!("No bootstrap peer configured, starting isolated");
    }

    server::serve(ctx, listener, server::shutdown_signal()).await
}
