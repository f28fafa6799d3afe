use clap::Parser;
use sipd::config::Settings;
use sipd::logging::initialize_logging;
use sipd::rtp::UdpRtpConnector;
use sipd::server::SipServer;
use sipd::sip::RsipCodec;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// SIP signaling daemon for active call recording
#[derive(Parser, Debug)]
#[command(name = "sipd")]
#[command(version)]
#[command(about = "SIP signaling daemon for active call recording", long_about = None)]
struct Args {
    /// Settings file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error), overrides the settings file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Number of call workers, overrides the settings file
    #[arg(short, long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(level) = args.log_level {
        settings.log.level = level;
    }
    if let Some(workers) = args.workers {
        settings.sip.worker.count = workers;
    }
    settings.validate()?;

    initialize_logging(&settings.log.level);
    info!(
        port = settings.sip.server.port,
        workers = settings.sip.worker.count,
        rtp = %settings.rtp.address,
        "sipd starting"
    );

    let cancel_token = CancellationToken::new();
    let rtp = UdpRtpConnector::new(settings.rtp.address, settings.rtp.timeout());
    let server = SipServer::new(
        settings,
        Arc::new(RsipCodec::new()),
        Arc::new(rtp),
        cancel_token.clone(),
    )?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, shutting down");
            cancel_token.cancel();
        }
    });

    server.serve().await?;
    Ok(())
}
