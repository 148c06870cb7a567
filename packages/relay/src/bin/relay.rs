//! Telnet relay between TCP clients and the game server's Redis lists.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin kingdom-relay
//! cargo run --bin kingdom-relay -- --host 127.0.0.1 --port 2323 --redis-url redis://127.0.0.1:6379/
//! ```

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use kingdom_relay::{
    RelayConfig,
    domain::{EventPublisher, EventSource},
    infrastructure::broker::{InMemoryBroker, RedisPublisher, RedisSource},
    run_server,
};
use kingdom_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "kingdom-relay")]
#[command(about = "Telnet relay bridging client sessions to a game server over Redis", long_about = None)]
struct Args {
    /// Host address to bind the telnet listener to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port number of the telnet listener
    #[arg(short = 'p', long, default_value = "23")]
    port: u16,

    /// Redis URL of the broker
    #[arg(long, default_value = "redis://127.0.0.1:6379/")]
    redis_url: String,

    /// Redis list receiving client events
    #[arg(long, default_value = "kingdom:egress")]
    egress_key: String,

    /// Redis list holding game server events for clients
    #[arg(long, default_value = "kingdom:ingress")]
    ingress_key: String,

    /// Tag identifying this relay in egress events
    #[arg(long, default_value = "telnet")]
    client_kind: String,

    /// Blocking broker poll timeout in milliseconds
    #[arg(long, default_value = "1000")]
    poll_timeout_ms: u64,

    /// Longest accepted input line in bytes
    #[arg(long, default_value = "4096")]
    max_line_length: usize,

    /// Pending outgoing lines per session before new ones are dropped
    #[arg(long, default_value = "256")]
    outbound_capacity: usize,

    /// Echo `You sent: <line>` back to clients
    #[arg(long)]
    echo: bool,

    /// Serve the admin HTTP API on this port
    #[arg(long)]
    admin_port: Option<u16>,

    /// Use an in-process broker instead of Redis (local testing)
    #[arg(long)]
    in_memory_broker: bool,

    /// Directory for timestamped log files
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Disable the log file
    #[arg(long)]
    no_log_file: bool,

    /// Default log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn to_config(&self) -> RelayConfig {
        RelayConfig {
            host: self.host.clone(),
            port: self.port,
            redis_url: self.redis_url.clone(),
            egress_key: self.egress_key.clone(),
            ingress_key: self.ingress_key.clone(),
            client_kind: self.client_kind.clone(),
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            max_line_length: self.max_line_length,
            outbound_capacity: self.outbound_capacity,
            echo: self.echo,
            admin_port: self.admin_port,
            ..RelayConfig::default()
        }
    }
}

type Broker = (Arc<dyn EventPublisher>, Box<dyn EventSource>);

fn build_broker(args: &Args, config: &RelayConfig) -> Result<Broker, Box<dyn std::error::Error>> {
    if args.in_memory_broker {
        tracing::warn!("Using in-memory broker: events stay inside this process");
        let broker = InMemoryBroker::new();
        return Ok((Arc::new(broker.clone()), Box::new(broker)));
    }

    let publisher = RedisPublisher::new(&config.redis_url, config.egress_key.clone())?;
    let source = RedisSource::new(&config.redis_url, config.ingress_key.clone())?;
    tracing::info!(
        "Broker {} (egress '{}', ingress '{}')",
        config.redis_url,
        config.egress_key,
        config.ingress_key
    );
    Ok((Arc::new(publisher), Box::new(source)))
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize tracing
    let log_dir = (!args.no_log_file).then_some(args.log_dir.as_path());
    setup_logger(env!("CARGO_BIN_NAME"), &args.log_level, log_dir);

    let config = args.to_config();
    tracing::info!("Server Initialized with {}", config.bind_addr());

    let (publisher, source) = match build_broker(&args, &config) {
        Ok(broker) => broker,
        Err(e) => {
            tracing::error!("Invalid broker configuration: {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = run_server(config, publisher, source).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
