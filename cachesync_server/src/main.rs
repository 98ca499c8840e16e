//! Cache server process running the lag tracker and bulk sync workers.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use cachesync::server::{BulkSyncDeps, LagTrackerDeps};
use cachesync::{
    logger_init, pf_error, pf_info, pf_warn, set_me, BackgroundSync,
    BinlogTimeService, CacheSyncError, ConfigFile, FileWriteBack,
    GlobalStatus, MemHashMap, ServerConfig, ServerType, StatHub,
    StaticRouteTable, SystemClock, TcpBinlogConnector,
};
use clap::Parser;
use log::{self, LevelFilter};
use tokio::runtime::Builder;
use tokio::sync::watch;

/// File name of the store's write-back dump under the data path.
const DUMP_FILE: &str = "cache_dump.bin";

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Replication role to start in, `master` or `slave`.
    #[arg(short, long, default_value_t = String::from("master"))]
    role: String,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 4)]
    threads: usize,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(role)` on success or
    /// `Err(CacheSyncError)` on any error.
    fn sanitize(&self) -> Result<ServerType, CacheSyncError> {
        if self.threads < 2 {
            Err(CacheSyncError::msg(format!(
                "invalid number of threads {}",
                self.threads
            )))
        } else if !self.config.is_file() {
            Err(CacheSyncError::msg(format!(
                "config file '{}' not found",
                self.config.display()
            )))
        } else {
            ServerType::parse_name(&self.role).ok_or(CacheSyncError::msg(
                format!("role name '{}' unrecognized", self.role),
            ))
        }
    }
}

/// Sets up the collaborators and the background workers, then runs until a
/// termination signal arrives.
async fn serve(
    config_path: &Path,
    config: ServerConfig,
    route: StaticRouteTable,
    role: ServerType,
    mut rx_term: watch::Receiver<bool>,
) -> Result<(), CacheSyncError> {
    let status = Arc::new(GlobalStatus::new(role));
    let stats = StatHub::new();
    let clock = Arc::new(SystemClock);

    let dump_path = Path::new(&config.data_path).join(DUMP_FILE);
    let writeback = Arc::new(FileWriteBack::new_and_setup(&dump_path)?);
    let store = Arc::new(MemHashMap::new(writeback, clock.clone()));

    let service = match config.binlog_bind.as_deref() {
        Some(bind) => {
            let bind_addr: SocketAddr = bind.parse().map_err(|e| {
                CacheSyncError::msg(format!(
                    "failed to parse binlog_bind '{}': {}",
                    bind, e
                ))
            })?;
            Some(BinlogTimeService::new_and_setup(bind_addr, status.clone()).await?)
        }
        None => None,
    };

    let lag_deps = LagTrackerDeps {
        status: status.clone(),
        route: Arc::new(route),
        connector: Arc::new(TcpBinlogConnector),
        stats: Arc::new(stats.clone()),
        clock: clock.clone(),
    };
    let bulk_deps = BulkSyncDeps {
        store,
        status: status.clone(),
        stats: Arc::new(stats.clone()),
        clock,
    };
    let background = BackgroundSync::new_and_setup(config_path, lag_deps, bulk_deps)?;
    background.start()?;
    pf_info!("cache server running as {}", role);

    // wait for termination signal
    loop {
        let terminated = *rx_term.borrow();
        if terminated {
            break;
        }
        if rx_term.changed().await.is_err() {
            pf_warn!("term channel closed");
            break;
        }
    }

    pf_info!("shutting down");
    if let Some(outcome) = background.shutdown().await {
        pf_info!("bulk sync {}", outcome);
    }
    if let Some(service) = service {
        service.shutdown().await?;
    }
    stats.dump();
    Ok(())
}

/// Actual main function of the cache server process.
fn server_main() -> Result<(), CacheSyncError> {
    // read in and parse command line arguments
    let args = CliArgs::parse();
    let role = args.sanitize()?;

    let file = ConfigFile::load(&args.config)?;
    let config = ServerConfig::from_file(&file)?;
    let route = StaticRouteTable::from_config(&file)?;
    set_me(config.service_name());

    // set up termination signals handler
    let (tx_term, rx_term) = watch::channel(false);
    ctrlc::set_handler(move || {
        if let Err(e) = tx_term.send(true) {
            pf_error!("error sending to term channel: {}", e);
        }
    })?;

    let log_level = log::max_level();
    {
        // create tokio multi-threaded runtime
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(args.threads)
            .thread_name("tokio-worker-cachesync")
            .build()?;

        runtime.block_on(async move {
            serve(&args.config, config, route, role, rx_term).await?;

            // suppress logging before dropping the runtime to avoid spurious
            // error messages
            log::set_max_level(LevelFilter::Off);

            Ok::<(), CacheSyncError>(()) // give type hint for this async closure
        })?;
    } // drop the runtime here

    log::set_max_level(log_level);
    Ok(())
}

/// Main function of the cache server process.
fn main() -> ExitCode {
    logger_init();

    if let Err(ref e) = server_main() {
        pf_error!("server_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
