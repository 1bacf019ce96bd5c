use std::path::PathBuf;
use std::time::Duration;

use bluesense_bridge::{
    ByteStream, Config, Credentials, HttpReporter, LinkConfig, LinkReceiver, LogReporter,
    MockLink, Reporter, ReporterConfig, SerialLink, Session, SessionSettings,
};
use bluesense_core::protocol::CommandTable;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "bluesense-bridge")]
#[command(about = "Bridge a BlueSense station's serial link to a remote store")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "bluesense-bridge.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "bluesense_bridge=info,bluesense_core=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    let table = config.command_table()?;
    info!(
        metrics = table.metrics().count(),
        failures = table.failures().count(),
        "Starting bluesense-bridge"
    );

    match &config.reporter {
        ReporterConfig::Http {
            url,
            secret,
            email,
            error_path,
            data_path,
            timeout_secs,
        } => {
            let reporter = HttpReporter::new(
                url,
                Credentials::new(secret.clone(), email.clone()),
                error_path,
                data_path,
                Duration::from_secs(*timeout_secs),
            )?;
            info!(error_url = %reporter.error_url(), data_url = %reporter.data_url(), "Using HTTP reporter");
            run_bridge(&config, table, reporter).await
        }
        ReporterConfig::Log => {
            info!("Using log reporter");
            run_bridge(&config, table, LogReporter).await
        }
    }
}

async fn run_bridge<R: Reporter>(
    config: &Config,
    table: CommandTable,
    reporter: R,
) -> color_eyre::Result<()> {
    match &config.link {
        LinkConfig::Serial {
            port, baud_rate, ..
        } => {
            info!(%port, baud_rate, "Using serial link");
            let link = SerialLink::new(port.as_str(), *baud_rate);
            run_session(config, link, table, reporter).await
        }
        LinkConfig::Mock {
            packet_interval_ms,
            corruption_ratio,
            sensor_failure_ratio,
        } => {
            info!(
                packet_interval_ms,
                corruption_ratio, sensor_failure_ratio, "Using mock link"
            );
            let link = MockLink::new(
                &table,
                *packet_interval_ms,
                *corruption_ratio,
                *sensor_failure_ratio,
            );
            run_session(config, link, table, reporter).await
        }
    }
}

async fn run_session<L: LinkReceiver, R: Reporter>(
    config: &Config,
    link: L,
    table: CommandTable,
    reporter: R,
) -> color_eyre::Result<()> {
    let cancel = CancellationToken::new();

    let rx = link.start(cancel.clone()).await?;
    let stream = ByteStream::new(rx, config.link.read_timeout());
    let mut session = Session::new(
        stream,
        table,
        reporter,
        SessionSettings::from(&config.session),
    );

    let result = tokio::select! {
        result = session.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("user interrupt");
            Ok(())
        }
    };

    cancel.cancel();

    if let Err(e) = &result {
        error!(error = %e, "Session ended");
    }
    info!("bluesense-bridge shut down complete");

    result?;
    Ok(())
}
