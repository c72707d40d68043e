use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use lightwire::client::{Connection, DynamicWidgetFactory, HttpTransport};
use lightwire::config::{Config, ConfigStore};
use lightwire::demo::DemoApp;
use lightwire::logging::init_tracing;
use lightwire::server::UiServer;

#[derive(Parser)]
#[command(name = "lightwire", version, about = "Server-driven UI over a single HTTP endpoint")]
struct Cli {
    /// Config file (default: the platform config dir's lightwire/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the demo application
    Serve {
        /// Override `server.bind_addr`
        #[arg(long)]
        bind: Option<String>,
    },
    /// Connect a headless client and log the replicated tree
    Connect {
        /// Full endpoint URL, e.g. http://127.0.0.1:8090/ui
        url: String,
    },
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let path = cli.config.unwrap_or_else(Config::config_path);
    let store = ConfigStore::open(path)?;

    match cli.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                store.update(|config| config.server.bind_addr = bind)?;
            }
            serve(store.get()).await
        }
        Command::Connect { url } => connect(store.get(), url).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let mut server = UiServer::new(&config, Arc::new(DemoApp));
    let addr = server.try_bind(&config.server.bind_addr).await?;
    println!("lightwire serving on http://{}{}", addr, server.endpoint());
    server.run().await
}

async fn connect(config: Config, url: String) -> anyhow::Result<()> {
    let transport = HttpTransport::new(url.clone(), config.client.request_timeout())
        .with_context(|| format!("Cannot build a client for {}", url))?;
    let handle = Connection::spawn(
        Arc::new(transport),
        Arc::new(DynamicWidgetFactory),
        config.client.clone(),
    );

    let mut last_len = 0;
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                handle.close();
                break;
            }
            _ = handle.closed() => break,
            _ = ticker.tick() => {
                let snapshot = handle.snapshot();
                if snapshot.len() != last_len {
                    last_len = snapshot.len();
                    for (id, node) in &snapshot {
                        tracing::info!(%id, class = %node.class, parent = ?node.parent, properties = ?node.properties, "Shadow node");
                    }
                }
            }
        }
    }

    tracing::info!(requests = handle.requests_sent(), resyncs = handle.resyncs(), "Client stopped");
    Ok(())
}
