use anyhow::Result;
use clap::Parser;
use flasq_core::Config;

mod page;
mod server;
mod sessions;

use server::AppState;

#[derive(Parser)]
#[command(name = "flasq")]
#[command(about = "Browser chat assistant backed by a language-model server")]
struct Cli {
    /// Address to bind
    #[arg(long, env = "FLASQ_HOST", default_value = "0.0.0.0")]
    host: String,
    /// Port to listen on
    #[arg(short, long, env = "FLASQ_PORT", default_value_t = 8501)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::load();
    tracing::info!(
        model_server = config.ollama_base_url.as_str(),
        api_style = config.provider().as_str(),
        default_model = config.default_model.as_str(),
        "configuration loaded"
    );

    let state = AppState::new(config).map_err(|e| anyhow::anyhow!("failed to load page template: {e}"))?;

    server::serve(state, &cli.host, cli.port).await.map_err(|e| {
        tracing::error!(error = %e, "server exited with error");
        e
    })
}
