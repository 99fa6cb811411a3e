use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cluster_finder::{
    FanOutMode, FindQuery, FinderConfig, MembershipPublisher, Node, RemoteCachedFinder,
    RequestContext,
};
use futures::TryStreamExt;
use serde::Serialize;
use std::path::PathBuf;

const DEFAULT_WINDOW_SECS: i64 = 24 * 60 * 60;

#[derive(Parser)]
#[command(name = "cluster-finder")]
#[command(about = "Find and fetch metrics across a cache-backed cluster")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache host as host:port (repeatable, overrides the config file)
    #[arg(long = "cache-host", global = true)]
    cache_hosts: Vec<String>,

    /// Static cluster server (repeatable, overrides the config file)
    #[arg(long = "server", global = true)]
    servers: Vec<String>,

    /// Use https for cluster servers without a scheme
    #[arg(long, global = true)]
    https: bool,

    /// Query all cluster servers at once for fetch and index
    #[arg(long, global = true)]
    concurrent: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the resolved cluster server list
    Servers,
    /// Find nodes matching a pattern
    Find {
        pattern: String,
        #[arg(long)]
        from: Option<i64>,
        #[arg(long)]
        until: Option<i64>,
    },
    /// Fetch series for one or more patterns
    Fetch {
        #[arg(required = true)]
        patterns: Vec<String>,
        #[arg(long)]
        from: Option<i64>,
        #[arg(long)]
        until: Option<i64>,
        #[arg(long)]
        now: Option<i64>,
    },
    /// List every metric path in the cluster
    Index,
    /// Store the cluster server list in the cache
    Publish {
        #[arg(required = true)]
        servers: Vec<String>,
    },
    /// Remove the cached cluster server list
    Clear,
}

#[derive(Serialize)]
struct NodeView<'a> {
    path: &'a str,
    is_leaf: bool,
}

fn load_config(cli: &Cli) -> Result<FinderConfig> {
    let mut config = match cli.config.as_ref() {
        Some(path) => FinderConfig::read_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => FinderConfig::default(),
    };
    if !cli.cache_hosts.is_empty() {
        config = config.cache_hosts(cli.cache_hosts.iter().cloned());
    }
    if !cli.servers.is_empty() {
        config = config.cluster_servers(cli.servers.iter().cloned());
    }
    if cli.https {
        config = config.intracluster_https(true);
    }
    if cli.concurrent {
        config = config.fan_out(FanOutMode::Concurrent);
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let now = chrono::Utc::now().timestamp();

    match cli.command {
        Command::Servers => {
            let finder = RemoteCachedFinder::new(&config)?;
            let servers = finder
                .refresh_cluster_servers()
                .await
                .context("resolving cluster servers")?;
            print_json(&servers)
        }
        Command::Find {
            pattern,
            from,
            until,
        } => {
            let finder = RemoteCachedFinder::new(&config)?;
            let nodes: Vec<Node> = finder
                .find_nodes(FindQuery::new(pattern, from, until))
                .try_collect()
                .await
                .context("find failed")?;
            let view: Vec<NodeView> = nodes
                .iter()
                .map(|node| NodeView {
                    path: node.path(),
                    is_leaf: node.is_leaf(),
                })
                .collect();
            print_json(&view)
        }
        Command::Fetch {
            patterns,
            from,
            until,
            now: at,
        } => {
            let finder = RemoteCachedFinder::new(&config)?;
            let until = until.unwrap_or(now);
            let from = from.unwrap_or(until - DEFAULT_WINDOW_SECS);
            let series = finder
                .fetch(&patterns, from, until, at, &RequestContext::default())
                .await
                .context("fetch failed")?;
            print_json(&series)
        }
        Command::Index => {
            let finder = RemoteCachedFinder::new(&config)?;
            let index = finder
                .get_index(&RequestContext::default())
                .await
                .context("index failed")?;
            print_json(&index)
        }
        Command::Publish { servers } => {
            let publisher = MembershipPublisher::new(&config)?;
            publisher
                .publish(&servers)
                .await
                .context("publishing cluster servers")?;
            println!("published {} cluster servers", servers.len());
            Ok(())
        }
        Command::Clear => {
            let publisher = MembershipPublisher::new(&config)?;
            let existed = publisher.clear().await.context("clearing cluster servers")?;
            println!(
                "{}",
                if existed {
                    "cleared cluster_servers"
                } else {
                    "cluster_servers was not set"
                }
            );
            Ok(())
        }
    }
}
