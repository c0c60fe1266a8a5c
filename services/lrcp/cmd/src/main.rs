//! LRCP line-reversal server binary.
//!
//! Listens for LRCP sessions on a UDP socket and sends back every received
//! line with its characters reversed.

use clap::Parser;
use lrcp_session::{Server, UdpTransport};
use std::{net::SocketAddr, path::PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;
mod reverse;

use config::LrcpConfig;
use logging::LrcpLogFormatter;
use reverse::LineReverser;

/// LRCP line-reversal server
#[derive(Parser, Debug)]
#[command(name = "lrcp", version, about = "Line-reversal server over LRCP")]
struct Args {
    /// Listen address [default: 0.0.0.0:7000]
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Retransmission period for unacknowledged data, e.g. 3s [default: 3s]
    #[arg(long)]
    retransmit_interval: Option<humantime::Duration>,

    /// Close a session whose data stays unacknowledged this long, e.g. 60s [default: 60s]
    #[arg(long)]
    session_expiry: Option<humantime::Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Configuration file path
    #[arg(long, default_value = "lrcp.yaml")]
    config: PathBuf,
}

impl Args {
    /// Explicit flags win over file and environment values
    fn apply(&self, config: &mut LrcpConfig) {
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(interval) = &self.retransmit_interval {
            config.retransmit_ms = interval.as_millis() as u64;
        }
        if let Some(expiry) = &self.session_expiry {
            config.session_expiry_ms = expiry.as_millis() as u64;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("lrcp={}", args.log_level).parse()?)
        .add_directive(format!("lrcp_session={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(LrcpLogFormatter::new("lrcp"))
        .init();

    info!("Starting LRCP service v{}", env!("CARGO_PKG_VERSION"));

    let mut config = LrcpConfig::load_from_file(&args.config)?;
    args.apply(&mut config);

    let session_config = config.session_config();
    if session_config.retransmit_interval.is_zero() || session_config.session_expiry.is_zero() {
        anyhow::bail!("Retransmit interval and session expiry must be non-zero");
    }
    if session_config.session_expiry <= session_config.retransmit_interval {
        warn!(
            "Session expiry {:?} is not longer than retransmit interval {:?}; data will never be resent",
            session_config.session_expiry, session_config.retransmit_interval
        );
    }

    let transport = UdpTransport::bind(config.listen).await?;

    Server::new(session_config, LineReverser)
        .run(transport, async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received SIGINT, shutting down"),
                Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
            }
        })
        .await?;

    info!("LRCP service stopped");
    Ok(())
}
