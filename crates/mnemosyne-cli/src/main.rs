#![forbid(unsafe_code)]

//! **mnemosyne-cli** – The `mnemosyne-logger` daemon.
//!
//! Thin wrapper around the library crates: parses flags, initializes
//! tracing, opens the store and runs one logger until interrupted. The
//! bundled sync substrate is the in-process hub; a networked face plugs
//! in behind the same `SyncTransport` seam.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mnemosyne::{Config, EventChannel, MemoryEventChannel, Mnemosyne};
use mnemosyne_dag::{LoggerConfig, MemoryHub, StoreKind, SyncTransport};
use mnemosyne_store_core::{Backend, RecordStore, INFINITE_BACKUP_FREQ};
use mnemosyne_store_memory::MemoryStore;
use mnemosyne_store_sled::SledStore;
use mnemosyne_types::{AcceptAllValidator, DigestSigner, Name};

#[derive(Parser)]
#[command(name = "mnemosyne-logger")]
#[command(about = "Mnemosyne distributed event logger")]
#[command(version)]
struct Cli {
    /// The producer prefix of this logger
    #[arg(short, long)]
    logger_prefix: String,

    /// The multicast prefix for DAG synchronization
    #[arg(short = 'm', long, default_value = "/mnemosyne/dag-sync")]
    dag_sync_prefix: String,

    /// The forwarding-hint prefix for DAG recovery fetches
    #[arg(short = 'i', long, default_value = "/mnemosyne/dag-hint")]
    dag_hint_prefix: String,

    /// Pub/sub prefixes events arrive on (repeatable)
    #[arg(short = 'p', long = "interface-ps-prefix")]
    interface_ps_prefixes: Vec<String>,

    /// Sync prefixes events arrive on (repeatable)
    #[arg(short = 's', long = "interface-sync-prefix")]
    interface_sync_prefixes: Vec<String>,

    /// Preceding pointers per record
    #[arg(long, default_value_t = 2)]
    preceding_records: usize,

    /// Direct fetch retries per missing record
    #[arg(long, default_value_t = 1)]
    record_fetch_retries: u32,

    /// Hinted fetch retries after direct fetches fail
    #[arg(long, default_value_t = 2)]
    hinted_fetch_retries: u32,

    /// Writes between checkpoint flushes
    #[arg(long, default_value_t = 10)]
    seq_no_backup_freq: u32,

    /// Replication counter size; 0 disables
    #[arg(long, default_value_t = 2)]
    max_counted_replication: u32,

    /// Tip reference budget per producer
    #[arg(long, default_value_t = 3)]
    max_self_re_ref_count: u32,

    /// Lower bound of the randomized publish delay, milliseconds
    #[arg(long, default_value_t = 0)]
    insert_backoff_min_ms: u64,

    /// Upper bound of the randomized publish delay, milliseconds
    #[arg(long, default_value_t = 1000)]
    insert_backoff_max_ms: u64,

    /// Operations between self-inserted-set resets
    #[arg(long, default_value_t = 100)]
    self_insert_reset_freq: u32,

    /// Seen-event deduplication window, seconds
    #[arg(long, default_value_t = 60)]
    seen_event_ttl_secs: u64,

    /// Grace period before accepting events, seconds
    #[arg(long, default_value_t = 5)]
    startup_delay_secs: u64,

    /// The database type (sled, memory)
    #[arg(short = 't', long, default_value = "sled")]
    database_type: String,

    /// The database path; defaults under /tmp/mnemosyne-db
    #[arg(short = 'd', long)]
    database_path: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn run(cli: Cli) -> Result<()> {
    let peer_prefix = Name::parse(&cli.logger_prefix).context("bad logger prefix")?;
    let sync_prefix = Name::parse(&cli.dag_sync_prefix).context("bad DAG sync prefix")?;
    let hint_prefix = Name::parse(&cli.dag_hint_prefix).context("bad DAG hint prefix")?;

    let database_type = match cli.database_type.as_str() {
        "sled" => StoreKind::Sled,
        "memory" => StoreKind::Memory,
        other => anyhow::bail!("unknown database type: {other}"),
    };
    let database_path = match &cli.database_path {
        Some(path) => path.clone(),
        None => {
            let uri = peer_prefix.to_uri();
            let tail = uri.rsplit('/').next().unwrap_or("logger");
            PathBuf::from("/tmp/mnemosyne-db").join(tail)
        }
    };

    let mut logger_config = LoggerConfig::new(sync_prefix, hint_prefix, peer_prefix.clone())
        .with_database(database_type, &database_path);
    logger_config.preceding_record_num = cli.preceding_records;
    logger_config.record_fetch_retries = cli.record_fetch_retries;
    logger_config.hinted_fetch_retries = cli.hinted_fetch_retries;
    logger_config.max_counted_replication = cli.max_counted_replication;
    logger_config.max_self_re_ref_count = cli.max_self_re_ref_count;
    if database_type == StoreKind::Sled {
        logger_config.seq_no_backup_freq = cli.seq_no_backup_freq;
    }

    let mut config = Config::new(logger_config);
    config.insert_backoff_min_ms = cli.insert_backoff_min_ms;
    config.insert_backoff_max_ms = cli.insert_backoff_max_ms;
    config.self_insert_reset_freq = cli.self_insert_reset_freq;
    config.seen_event_ttl = Duration::from_secs(cli.seen_event_ttl_secs);
    config.startup_delay = Duration::from_secs(cli.startup_delay_secs);
    for prefix in &cli.interface_ps_prefixes {
        config
            .ps_interface_prefixes
            .push(Name::parse(prefix).context("bad interface ps prefix")?);
    }
    for prefix in &cli.interface_sync_prefixes {
        config
            .sync_interface_prefixes
            .push(Name::parse(prefix).context("bad interface sync prefix")?);
    }
    config.validate().context("invalid configuration")?;

    let store: Arc<dyn RecordStore> = match database_type {
        StoreKind::Sled => {
            if let Some(parent) = database_path.parent() {
                std::fs::create_dir_all(parent).context("creating database directory")?;
            }
            Arc::new(SledStore::open(&database_path).context("opening database")?)
        }
        StoreKind::Memory => Arc::new(MemoryStore::new()),
    };
    let backend = Arc::new(Backend::new(
        store,
        match database_type {
            StoreKind::Sled => cli.seq_no_backup_freq,
            StoreKind::Memory => INFINITE_BACKUP_FREQ,
        },
    ));

    let dag_hub = MemoryHub::new();
    let mut ps_channels: Vec<Arc<dyn EventChannel>> = Vec::new();
    for _ in &config.ps_interface_prefixes {
        ps_channels.push(Arc::new(MemoryEventChannel::default()));
    }
    let mut sync_channels: Vec<Arc<dyn SyncTransport>> = Vec::new();
    for _ in &config.sync_interface_prefixes {
        let hub = MemoryHub::new();
        sync_channels.push(hub.endpoint().await);
    }

    let _interface = Mnemosyne::new(
        config,
        backend,
        dag_hub.endpoint().await,
        ps_channels,
        sync_channels,
        Arc::new(AcceptAllValidator),
        Arc::new(AcceptAllValidator),
        Arc::new(DigestSigner),
    )
    .await
    .context("initializing logger")?;

    info!(peer = %peer_prefix, "mnemosyne logger running, ctrl-c to exit");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
