use clap::Parser;
use tracing_subscriber::EnvFilter;
use wiki_versioner::cli::{run_export, ExportCli};

#[tokio::main]
async fn main() {
    // Credentials live in .env
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = ExportCli::parse();
    match run_export(cli).await {
        Ok(()) => tracing::info!("Export finished"),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Export failed");
            std::process::exit(1);
        }
    }
}
