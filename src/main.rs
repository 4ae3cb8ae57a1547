//! aesdsocket Server Binary
//!
//! Collects newline-terminated records from TCP clients on port 9000 into a
//! shared log and sends the full log back after every completed record.

use aesdsocket::config::ServerConfig;
#[cfg(feature = "syslog-backend")]
use aesdsocket::log_channel::SyslogChannel;
use aesdsocket::server::signals::TerminationSignalMask;
use aesdsocket::server::{daemon, LogServer, TerminationSignals};
use aesdsocket::{AesdError, Result};
use clap::Parser;
use std::process::ExitCode;
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aesdsocket")]
#[command(about = "Concurrent append-log socket server")]
#[command(version)]
struct Args {
    /// Detach and run in the background once the port is bound
    #[arg(short, long)]
    daemon: bool,
}

/// Log outputs that need attention after startup
struct LogChannels {
    #[cfg(feature = "syslog-backend")]
    syslog: SyslogChannel,
}

impl LogChannels {
    /// (Re)connect the system log; called at startup and again in the daemon
    fn attach_system_log(&self) {
        #[cfg(feature = "syslog-backend")]
        {
            if let Err(e) = self.syslog.connect("aesdsocket") {
                warn!("{}", e);
            }
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Until the handlers exist a signal must stay pending, not kill us
    let mask = match TerminationSignalMask::block() {
        Ok(mask) => mask,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let channels = match init_tracing() {
        Ok(channels) => channels,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::FAILURE;
        }
    };
    channels.attach_system_log();

    match run(args, &channels, mask) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() -> std::result::Result<LogChannels, Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("aesdsocket=info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);

    // Daemon mode loses stdout; syslog and the journal keep a log channel open
    #[cfg(feature = "syslog-backend")]
    let syslog = SyslogChannel::new();
    #[cfg(feature = "syslog-backend")]
    let registry = registry.with(
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .without_time()
            .with_target(false)
            .with_writer(syslog.clone()),
    );

    #[cfg(feature = "journald")]
    let registry = registry.with(tracing_journald::layer().ok());

    registry.try_init()?;
    Ok(LogChannels {
        #[cfg(feature = "syslog-backend")]
        syslog,
    })
}

fn run(args: Args, channels: &LogChannels, mask: TerminationSignalMask) -> Result<()> {
    let config = ServerConfig::default();
    config.validate()?;

    info!("Starting aesdsocket v{}", env!("CARGO_PKG_VERSION"));
    debug!(config = %serde_json::to_string(&config)?, "Effective configuration");

    // Bind before detaching so a busy port is reported to the caller
    let addr = config.listen_addr()?;
    let listener = std::net::TcpListener::bind(addr)
        .map_err(|e| AesdError::Setup(format!("Binding {} failed: {}", addr, e)))?;

    if args.daemon {
        info!("Detaching into the background");
        daemon::daemonize()?;
        channels.attach_system_log();
        info!("Running as daemon, pid {}", std::process::id());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| AesdError::Setup(format!("Failed to start runtime: {}", e)))?;

    runtime.block_on(serve(config, listener, mask))
}

async fn serve(
    config: ServerConfig,
    listener: std::net::TcpListener,
    mask: TerminationSignalMask,
) -> Result<()> {
    let mut signals = TerminationSignals::install()?;
    // Pending signals are delivered here, now that the handlers are in place
    drop(mask);
    let server = LogServer::from_std(config, listener).await?;
    info!("Listening on {}", server.local_addr()?);

    server
        .run_until(async move {
            let name = signals.recv().await;
            info!("Caught {}, exiting", name);

            tokio::spawn(async move {
                loop {
                    let name = signals.recv().await;
                    warn!("Caught {} while shutting down, ignoring", name);
                }
            });
        })
        .await?;

    info!("aesdsocket stopped");
    Ok(())
}
