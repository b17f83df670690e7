//! Command-line interface.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::http::HttpTransport;
use crate::operation::{Endpoint, NetworkOperation};
use crate::priority::RequestPriority;
use crate::scheduler::Scheduler;
use crate::store::{JsonFileTrafficStore, TrafficStore};

/// Top-level arguments.
#[derive(Parser)]
#[command(name = "netsched")]
#[command(about = "Bandwidth-aware request scheduler", long_about = None)]
pub struct Cli {
    /// Scheduler configuration (TOML or JSON).
    #[arg(short, long, env = "NETSCHED_CONFIG")]
    pub config: Option<PathBuf>,

    /// Traffic store location; overrides the configuration.
    #[arg(short, long, env = "NETSCHED_STORE")]
    pub store: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Fetch URLs through the scheduler.
    Fetch {
        /// URLs to fetch.
        urls: Vec<String>,
        /// Priority of every request.
        #[arg(short, long, default_value = "required")]
        priority: RequestPriority,
        /// Give up on a URL after this many seconds.
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Print the persisted traffic table.
    Stats,
}

/// Plain GET whose traffic is keyed by URL without its query string.
pub struct Fetch {
    url: String,
}

impl Fetch {
    /// Fetch of `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl NetworkOperation for Fetch {
    type Output = Bytes;

    fn identity(&self) -> String {
        match self.url.split_once('?') {
            Some((base, _)) => base.to_string(),
            None => self.url.clone(),
        }
    }

    fn endpoint(&self) -> Endpoint {
        Endpoint::get(self.url.clone())
    }

    fn decode(&self, body: Bytes) -> crate::error::Result<Bytes> {
        Ok(body)
    }
}

impl Cli {
    /// Reads the configuration file, if any, and applies `--store`.
    pub fn load_config(&self) -> Result<SchedulerConfig> {
        let mut config = match &self.config {
            Some(path) => SchedulerConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => SchedulerConfig::default(),
        };
        if let Some(store) = &self.store {
            config.store_path = Some(store.clone());
        }
        Ok(config)
    }

    /// Runs the selected subcommand.
    pub async fn run(self) -> Result<()> {
        let config = self.load_config()?;
        match self.command {
            Command::Fetch {
                urls,
                priority,
                timeout,
            } => fetch(&config, urls, priority, timeout.map(Duration::from_secs)).await,
            Command::Stats => print_stats(&config),
        }
    }
}

async fn fetch(
    config: &SchedulerConfig,
    urls: Vec<String>,
    priority: RequestPriority,
    timeout: Option<Duration>,
) -> Result<()> {
    if urls.is_empty() {
        anyhow::bail!("no URLs given");
    }

    let transport = Arc::new(HttpTransport::new(&config.http)?);
    let scheduler = Scheduler::from_config(config, transport);

    let mut tasks = JoinSet::new();
    for url in urls {
        let request = scheduler.schedule(Fetch::new(url.clone()), priority);
        tasks.spawn(async move {
            let result = match timeout {
                Some(limit) => request.timeout(limit).await,
                None => request.await,
            };
            (url, result)
        });
    }

    let mut failures = 0usize;
    while let Some(joined) = tasks.join_next().await {
        let (url, result) = joined?;
        match result {
            Ok(body) => println!("{}  {} bytes", url, body.len()),
            Err(SchedulerError::UnexpectedStatus { status, .. }) => {
                failures += 1;
                println!("{}  HTTP {}", url, status);
            }
            Err(e) => {
                failures += 1;
                println!("{}  error: {}", url, e);
            }
        }
    }

    let stats = scheduler.stats();
    if let Some(bps) = stats.bandwidth_bps {
        println!("bandwidth: {:.1} KB/s", bps / 1_000.0);
    }
    scheduler.shutdown().await;

    if failures > 0 {
        anyhow::bail!("{} request(s) failed", failures);
    }
    Ok(())
}

fn print_stats(config: &SchedulerConfig) -> Result<()> {
    let path = config
        .store_path
        .as_ref()
        .context("no traffic store configured (use --store or store_path)")?;
    let store = JsonFileTrafficStore::open(path);
    let records = store.records()?;
    if records.is_empty() {
        println!("No traffic recorded in {}", path.display());
        return Ok(());
    }

    println!("{:<60} {:>8} {:>14} {:>10}", "IDENTITY", "COUNT", "BYTES", "AVERAGE");
    for (identity, record) in records {
        println!(
            "{:<60} {:>8} {:>14} {:>10}",
            identity,
            record.count,
            record.bytes,
            record.average().unwrap_or(0)
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fetch() {
        let cli = Cli::try_parse_from([
            "netsched",
            "fetch",
            "--priority",
            "low",
            "http://localhost/a",
            "http://localhost/b",
        ])
        .unwrap();
        match cli.command {
            Command::Fetch { urls, priority, timeout } => {
                assert_eq!(urls.len(), 2);
                assert_eq!(priority, RequestPriority::Low);
                assert!(timeout.is_none());
            }
            Command::Stats => panic!("expected fetch"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_priority() {
        assert!(Cli::try_parse_from(["netsched", "fetch", "-p", "urgent", "http://x/"]).is_err());
    }

    #[test]
    fn test_store_flag_overrides_config() {
        let cli = Cli::try_parse_from(["netsched", "--store", "/tmp/traffic.json", "stats"]).unwrap();
        let config = cli.load_config().unwrap();
        assert_eq!(config.store_path, Some(PathBuf::from("/tmp/traffic.json")));
    }

    #[test]
    fn test_fetch_identity_ignores_query() {
        let op = Fetch::new("https://example.com/feed?page=2");
        assert_eq!(op.identity(), "https://example.com/feed");
        assert_eq!(Fetch::new("https://example.com/feed").identity(), "https://example.com/feed");
    }

    #[test]
    fn test_print_stats_reads_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("traffic.json");
        let store = JsonFileTrafficStore::open(&path);
        store
            .put("feed", crate::store::TrafficRecord { count: 2, bytes: 4096 })
            .unwrap();
        store.persist().unwrap();

        let config = SchedulerConfig {
            store_path: Some(path),
            ..SchedulerConfig::default()
        };
        assert!(print_stats(&config).is_ok());
        assert!(print_stats(&SchedulerConfig::default()).is_err());
    }
}
