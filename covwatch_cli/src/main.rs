use covwatch_core::config::{CovwatchConfig, ProxySettings};
use covwatch_core::observer::LogObserver;
use covwatch_core::server::{ObserverServer, shutdown_signal};

use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "covwatch.toml";

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Address the observer service binds to
    #[clap(short, long)]
    listen_addr: Option<String>,
    /// Worker threads serving requests
    #[clap(short, long)]
    workers: Option<usize>,
    /// Companion proxy executable
    #[clap(long)]
    proxy_command: Option<String>,
    /// Address the companion proxy listens on
    #[clap(long)]
    proxy_listen_addr: Option<String>,
    /// Run without launching the companion proxy
    #[clap(long, conflicts_with_all = ["proxy_command", "proxy_listen_addr"])]
    no_proxy: bool,
}

fn load_config(cli: &Cli) -> Result<CovwatchConfig, anyhow::Error> {
    match &cli.config_file {
        Some(config_path) => {
            info!("Loading configuration from specified path: {config_path:?}");
            CovwatchConfig::load_from_file(config_path)
        }
        None => {
            let default_config_path = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default_config_path.exists() {
                info!("No config file specified, loading default: {default_config_path:?}");
                CovwatchConfig::load_from_file(&default_config_path)
            } else {
                info!("No config file specified and {DEFAULT_CONFIG_PATH:?} not found, using built-in defaults");
                Ok(CovwatchConfig::default())
            }
        }
    }
}

fn apply_overrides(config: &mut CovwatchConfig, cli: Cli) {
    if let Some(listen_addr) = cli.listen_addr {
        config.service.listen_addr = listen_addr;
    }
    if let Some(workers) = cli.workers {
        config.service.workers = workers;
    }
    if cli.no_proxy {
        config.proxy = None;
        return;
    }
    if cli.proxy_command.is_some() || cli.proxy_listen_addr.is_some() {
        let proxy = config.proxy.get_or_insert_with(ProxySettings::default);
        if let Some(command) = cli.proxy_command {
            if proxy.command.is_empty() {
                proxy.command.push(command);
            } else {
                proxy.command[0] = command;
            }
        }
        if let Some(listen_addr) = cli.proxy_listen_addr {
            proxy.listen_addr = listen_addr;
        }
    }
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let mut config = load_config(&cli)?;
    apply_overrides(&mut config, cli);
    config.validate()?;
    info!("Effective configuration: {config:?}");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.service.workers)
        .enable_all()
        .build()?;

    runtime.block_on(serve(config))
}

async fn serve(config: CovwatchConfig) -> Result<(), anyhow::Error> {
    let server = ObserverServer::bind(&config, Arc::new(LogObserver::new())).await?;
    server.run(shutdown_signal()).await
}
