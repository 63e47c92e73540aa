mod api;
mod background;
mod cli;
mod router;
mod startup;
mod state;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use callrun_core::Config;

fn load_config() -> Config {
    callrun_core::config::load_dotenv();
    Config::from_env()
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    let (state, ticks) = startup::build_app_state(config)?;
    background::spawn_all(&state, ticks);
    let app = router::build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://localhost:{}", config.server.port);
    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = cli::CliArgs::parse();
    let config = load_config();
    config.log_summary();

    let command = args.command.unwrap_or(cli::Command::Serve);
    if !cli::dispatch(&config, command).await? {
        serve(&config).await?;
    }
    Ok(())
}
