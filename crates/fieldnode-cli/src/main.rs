use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fieldnode_core::{Collaborators, KvStore, NodeConfig, NodeRuntime, WifiCredentials, EXIT_RESTART};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod host;
mod http;
mod mqtt;
mod store;

use host::{LogSink, ProcessProbe, SimulatedAdc, SimulatedNetwork};
use http::ReqwestTransport;
use mqtt::RumqttTransport;
use store::JsonFileStore;

#[derive(Debug, Parser)]
#[command(name = "fieldnoded")]
#[command(about = "Soil humidity / light sensor node, host build")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// TOML configuration; compiled-in defaults apply when absent.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "./data/fieldnode-store.json")]
    store: PathBuf,

    /// Replaces scheme and host of every backend endpoint.
    #[arg(long)]
    backend_url: Option<String>,

    /// Default log directive when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Make every N-th ADC read time out (0 disables).
    #[arg(long, default_value_t = 0)]
    simulate_failures: u64,

    /// Broker for configuration pushes, `mqtt://host[:port]`.
    #[arg(long)]
    mqtt_url: Option<String>,

    #[arg(long, requires = "wifi_pass")]
    wifi_ssid: Option<String>,

    #[arg(long, requires = "wifi_ssid")]
    wifi_pass: Option<String>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Bring the node up and supervise it (default).
    Run,
    /// Print the persisted key-value store.
    Store,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    match cli.command.unwrap_or(Command::Run) {
        Command::Store => {
            let store = JsonFileStore::open(&cli.store)?;
            println!("{}", serde_json::to_string_pretty(&store.snapshot())?);
        }
        Command::Run => {
            let code = run(&cli).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
    }

    Ok(())
}

async fn run(cli: &Cli) -> Result<i32> {
    let mut config = NodeConfig::load_or_default(cli.config.as_deref());
    if let Some(base) = &cli.backend_url {
        config.backend.rebase(base);
        info!(data_url = %config.backend.data_url, "backend rebased");
    }
    if let Some(url) = &cli.mqtt_url {
        config.mqtt.broker_url.clone_from(url);
    }

    let provisioning = match (&cli.wifi_ssid, &cli.wifi_pass) {
        (Some(ssid), Some(pass)) => {
            config.wifi.ssid.clone_from(ssid);
            config.wifi.pass.clone_from(pass);
            Some(WifiCredentials {
                ssid: ssid.clone(),
                pass: pass.clone(),
            })
        }
        _ => None,
    };

    let store = match JsonFileStore::open(&cli.store) {
        Ok(store) => store,
        Err(err) => {
            error!(path = %cli.store.display(), %err, "storage unavailable, requesting restart");
            return Ok(EXIT_RESTART);
        }
    };
    info!(path = %store.path().display(), "store opened");
    let store: Arc<dyn KvStore> = Arc::new(store);
    let http = ReqwestTransport::new(config.backend.timeout())?;
    let mqtt_options = mqtt::options(&config.mqtt, &config.device.client_id)?;
    info!(broker = %config.mqtt.broker_url, "mqtt configured");

    let collaborators = Collaborators {
        adc: Arc::new(SimulatedAdc::new(cli.simulate_failures)),
        network: Arc::new(SimulatedNetwork::default()),
        http: Arc::new(http),
        mqtt: Some(Box::new(RumqttTransport::new(mqtt_options))),
        store,
        status_sink: Some(Box::new(LogSink::default())),
        probe: Arc::new(ProcessProbe::new()),
    };

    let mut runtime = NodeRuntime::new(config, collaborators);
    if let Some(credentials) = provisioning {
        if !runtime.provision(credentials) {
            warn!("credential provisioning queue full, not persisted");
        }
    }

    let started = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            warn!("received ctrl-c during startup, stopping");
            runtime.shutdown();
            return Ok(0);
        }
        started = runtime.start() => started,
    };

    match started {
        Ok(report) => {
            for (stage, fallback) in report.fallbacks() {
                warn!(%stage, ?fallback, "stage came up degraded");
            }
        }
        Err(err) => {
            error!(%err, "startup failed, requesting restart");
            runtime.shutdown();
            return Ok(EXIT_RESTART);
        }
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            warn!("received ctrl-c, stopping");
        }
        _ = runtime.run() => {}
    }
    Ok(0)
}
