//! CLI commands implementation.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::mpsc;

use delve::{
    filter_nodes, DownloadEvent, Field, Filter, FormFilter, MatchMode, Session, SessionConfig,
};

#[derive(Parser)]
#[command(name = "delve")]
#[command(about = "Browse, scrape and download from web pages")]
#[command(version)]
pub struct Cli {
    /// Session config file (TOML, or JSON with a .json extension)
    #[arg(short, long, global = true, env = "DELVE_CONFIG")]
    config: Option<PathBuf>,

    /// User agent; "impersonate" picks a real browser agent
    #[arg(long, global = true)]
    user_agent: Option<String>,

    /// Proxy for every request (host:port or URL)
    #[arg(long, global = true)]
    proxy: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// List links on a page
    Links {
        url: String,
        /// Tags to consider (default: a)
        #[arg(short, long)]
        tag: Vec<String>,
        /// Attribute filter as key=value (repeatable)
        #[arg(short, long, value_parser = parse_key_val)]
        filter: Vec<(String, String)>,
        /// EQUAL, NOT_EQUAL, IN or NOT_IN
        #[arg(short, long, default_value = "EQUAL")]
        mode: MatchMode,
    },

    /// List forms and their fields
    Forms {
        url: String,
        /// Only forms with this id
        #[arg(long)]
        id: Option<String>,
        /// Only forms with this name
        #[arg(long)]
        name: Option<String>,
    },

    /// Flatten tables into header-keyed rows
    Tables { url: String },

    /// Print the page title
    Title { url: String },

    /// List image URLs
    Images { url: String },

    /// Evaluate an XPath expression
    Xpath {
        url: String,
        expr: String,
        /// Keep only nodes with these tags
        #[arg(short, long)]
        tag: Vec<String>,
    },

    /// Select elements with a CSS selector
    Css { url: String, selector: String },

    /// Download resources into a directory
    Download {
        urls: Vec<String>,
        /// Target directory
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
        /// Number of download workers (default: from config)
        #[arg(short, long)]
        workers: Option<usize>,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

#[derive(Serialize)]
struct FormSummary {
    id: Option<String>,
    name: Option<String>,
    method: String,
    action: String,
    fields: std::collections::BTreeMap<String, Field>,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn build_session(cli: &Cli) -> anyhow::Result<Session> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load(path).await?,
        None => SessionConfig::default(),
    };
    if let Some(user_agent) = &cli.user_agent {
        config.user_agent = Some(user_agent.clone());
    }
    if let Some(proxy) = &cli.proxy {
        config.proxy = Some(proxy.clone());
    }
    Ok(Session::with_config(config)?)
}

async fn open(cli: &Cli, url: &str) -> anyhow::Result<Session> {
    let mut session = build_session(cli).await?;
    session.open(url).await?;
    Ok(session)
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Links {
            url,
            tag,
            filter,
            mode,
        } => {
            let session = open(&cli, url).await?;
            let tags: Vec<&str> = tag.iter().map(String::as_str).collect();
            let filter = filter
                .iter()
                .cloned()
                .collect::<Filter>()
                .mode(*mode);
            let links: Vec<_> = session.links(&tags, &filter)?.into_iter().collect();
            print_json(&links)
        }
        Commands::Forms { url, id, name } => {
            let session = open(&cli, url).await?;
            let mut filter = FormFilter::new();
            if let Some(id) = id {
                filter = filter.id(id.clone());
            }
            if let Some(name) = name {
                filter = filter.name(name.clone());
            }
            let forms = session
                .forms(&filter)?
                .iter()
                .map(|form| {
                    Ok(FormSummary {
                        id: form.id().map(String::from),
                        name: form.name().map(String::from),
                        method: form.method().to_string(),
                        action: form.action_url()?.to_string(),
                        fields: form.fields(),
                    })
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            print_json(&forms)
        }
        Commands::Tables { url } => print_json(&open(&cli, url).await?.tables()?),
        Commands::Title { url } => {
            match open(&cli, url).await?.title()? {
                Some(title) => println!("{}", title),
                None => eprintln!("No title"),
            }
            Ok(())
        }
        Commands::Images { url } => print_json(&open(&cli, url).await?.images()?),
        Commands::Xpath { url, expr, tag } => {
            let nodes = open(&cli, url).await?.xpath(expr)?;
            let nodes = if tag.is_empty() {
                nodes
            } else {
                let tags: Vec<&str> = tag.iter().map(String::as_str).collect();
                filter_nodes(&nodes, &tags, &Filter::new())
            };
            print_json(&nodes)
        }
        Commands::Css { url, selector } => print_json(&open(&cli, url).await?.css(selector)?),
        Commands::Download { urls, dir, workers } => cmd_download(&cli, urls, dir, *workers).await,
    }
}

async fn cmd_download(
    cli: &Cli,
    urls: &[String],
    dir: &PathBuf,
    workers: Option<usize>,
) -> anyhow::Result<()> {
    if urls.is_empty() {
        anyhow::bail!("no URLs given");
    }

    let session = build_session(cli).await?;
    let (event_tx, mut event_rx) = mpsc::channel::<DownloadEvent>(100);

    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                DownloadEvent::Started { worker_id, url } => {
                    tracing::info!("[worker {}] {}", worker_id, url);
                }
                DownloadEvent::Completed { path, bytes, .. } => {
                    eprintln!("saved {} ({} bytes)", path.display(), bytes);
                }
                DownloadEvent::Failed { url, error, .. } => {
                    eprintln!("failed {}: {}", url, error);
                }
            }
        }
    });

    let report = session
        .download_many_with_events(dir, urls.iter().cloned(), workers, Some(event_tx))
        .await;
    let _ = printer.await;

    eprintln!(
        "{} downloaded, {} failed",
        report.downloaded.len(),
        report.failed.len()
    );
    if !report.is_complete() {
        anyhow::bail!("{} downloads failed", report.failed.len());
    }
    Ok(())
}
