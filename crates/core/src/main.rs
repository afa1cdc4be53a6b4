// Trawler is an open source web crawling engine.
// Copyright (C) 2024 Trawler ApS
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use trawler::config::{self, BrokerKind, CrawlConfig, DistributedConfig};
use trawler::distributed::{
    Broker, CrawlWorker, DistributedCoordinator, QueueServer, TcpBroker,
};
use trawler::graph::dto::GraphDto;
use trawler::storage::{JsonStorage, Storage};
use trawler::transport::http::HttpTransport;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl a site by following hyperlinks.
    Crawl { config_path: String },

    /// Traverse robots.txt and sitemap XML instead of following links.
    Sitemap {
        config_path: String,

        /// Keep only the robots/sitemap structure, no URL leaves.
        #[clap(long)]
        structure_only: bool,

        #[clap(long)]
        max_urls: Option<usize>,
    },

    /// Serve the task queue for distributed crawls.
    Queue {
        #[clap(default_value = "127.0.0.1:7799")]
        host: SocketAddr,
    },

    /// Run a crawl worker against the queue.
    Worker { config_path: String },

    /// Dispatch a distributed crawl over the queue.
    Dispatch { config_path: String },
}

fn broker_from(config: &DistributedConfig) -> Result<Arc<dyn Broker>> {
    match config.broker.kind {
        BrokerKind::Queue => Ok(Arc::new(TcpBroker::new(config.broker.addr()?))),
        BrokerKind::Redis | BrokerKind::Rabbitmq => bail!(
            "{:?} is an external broker; run against the built-in queue or inject a Broker implementation",
            config.broker.kind
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Crawl { config_path } => {
            let config: CrawlConfig = config::load(&config_path)?;
            let result = trawler::api::crawl(&config).await?;

            tracing::info!(
                pages_crawled = result.pages_crawled,
                total_nodes = result.stats.total_nodes,
                total_edges = result.stats.total_edges,
                scanned = result.stats.scanned_nodes,
                max_depth = result.stats.max_depth,
                termination = ?result.termination,
                "crawl finished"
            );

            if !result.dead_letters.is_empty() {
                tracing::warn!(failed_urls = result.dead_letters.len(), "dead letters");
            }
        }
        Commands::Sitemap {
            config_path,
            structure_only,
            max_urls,
        } => {
            let config: CrawlConfig = config::load(&config_path)?;
            let (graph, stats) =
                trawler::api::crawl_sitemap(&config, !structure_only, max_urls).await?;

            tracing::info!(
                sitemaps = stats.sitemaps_processed,
                urls = stats.urls_extracted,
                errors = stats.errors,
                total_nodes = graph.node_count(),
                "sitemap crawl finished"
            );

            if let Some(path) = &config.storage_config.path {
                let mut storage = JsonStorage::new(path);
                storage.save_graph(&GraphDto::from_graph(&graph))?;
                tracing::info!(path = %path.display(), "graph saved");
            }
        }
        Commands::Queue { host } => {
            let server = QueueServer::bind(host).await?;
            tracing::info!("task queue listening on {}", server.local_addr()?);
            server.run().await?;
        }
        Commands::Worker { config_path } => {
            let config: DistributedConfig = config::load(&config_path)?;
            let broker = broker_from(&config)?;

            let transport = Arc::new(HttpTransport::new(
                config.driver_config.http_config(config.allow_internal),
                Arc::new(trawler::plugins::PluginManager::new()),
            )?);

            tracing::info!("worker polling {}", config.broker.addr()?);
            CrawlWorker::new(broker, transport).run().await;
        }
        Commands::Dispatch { config_path } => {
            let config: DistributedConfig = config::load(&config_path)?;
            let Some(url) = config.url.clone() else {
                bail!("dispatch requires `url` in the config");
            };

            let broker = broker_from(&config)?;
            let coordinator = DistributedCoordinator::new(broker, config.dispatcher_config());

            let result = coordinator.crawl(url.parse()?).await?;

            tracing::info!(
                pages_crawled = result.pages_crawled,
                total_nodes = result.stats.total_nodes,
                total_edges = result.stats.total_edges,
                termination = ?result.termination,
                dead_letters = result.dead_letters.len(),
                "distributed crawl finished"
            );

            save_distributed_graph(&config, &result.graph)?;
        }
    }

    Ok(())
}

fn save_distributed_graph(
    config: &DistributedConfig,
    graph: &trawler::graph::Graph,
) -> Result<()> {
    use trawler::config::StorageKind;
    use trawler::storage::SqliteStorage;

    let dto = GraphDto::from_graph(graph);

    match config.database.kind {
        StorageKind::Memory => {}
        StorageKind::Json => {
            let Some(path) = &config.database.path else {
                bail!("json database requires database.path");
            };
            JsonStorage::new(path).save_graph(&dto)?;
            tracing::info!(path = %path.display(), "graph saved");
        }
        StorageKind::Sqlite => {
            let Some(path) = &config.database.path else {
                bail!("sqlite database requires database.path");
            };
            SqliteStorage::open(path)?.save_graph(&dto)?;
            tracing::info!(path = %path.display(), "graph saved");
        }
        StorageKind::Postgresql | StorageKind::Mongodb => {
            tracing::warn!(
                "{:?} is an external backend; graph not persisted",
                config.database.kind
            );
        }
    }

    Ok(())
}
