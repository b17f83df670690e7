#![warn(missing_docs)]

//! netsched command-line client.

use anyhow::Result;
use clap::Parser;
use netsched::cli::Cli;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("netsched=info")))
        .init();

    let cli = Cli::parse();
    cli.run().await
}
