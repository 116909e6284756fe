use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vangogh_relay::{
    client::{RelayClient, Stage},
    core::{compress::compress, prediction::PollPolicy},
};

/// Turn a photo into a Van Gogh style painting through a running relay.
#[derive(Parser, Debug)]
#[command(name = "vangogh", version, about)]
struct Cli {
    /// Photo to transform (PNG, JPEG or WebP).
    #[arg(long)]
    input: PathBuf,

    /// Where to write the painting.
    #[arg(long)]
    output: PathBuf,

    /// Relay base URL.
    #[arg(long, default_value = "http://localhost:3001")]
    server: String,

    /// Longest side of the uploaded photo.
    #[arg(long, default_value_t = 512)]
    max_side: u32,

    /// Replace the default style prompt.
    #[arg(long)]
    prompt: Option<String>,

    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!(stage = %Stage::Upload, "reading {}", cli.input.display());
    let blob = tokio::fs::read(&cli.input)
        .await
        .with_context(|| format!("failed to read {}", cli.input.display()))?;
    let image = compress(&blob, cli.max_side)?;

    let policy = PollPolicy::default().with_max_wait(Duration::from_secs(cli.timeout_secs));
    let client = RelayClient::new(&cli.server, policy)?;

    let output = client.submit(&image, cli.prompt.as_deref()).await?;
    let painting = client.download(&output).await?;

    tokio::fs::write(&cli.output, &painting)
        .await
        .with_context(|| format!("failed to write {}", cli.output.display()))?;

    info!(
        stage = %Stage::Result,
        bytes = painting.len(),
        "painting saved to {}",
        cli.output.display()
    );

    Ok(())
}
