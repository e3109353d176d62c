use anyhow::Context;
use autobackup_common::{LifecycleEvent, ProfileId};
use autobackup_persist::{
    AutoBackupConfig, FsSnapshotStore, HostContext, KeyConsistencyRepairer, SnapshotEntry,
    SnapshotService, session_dir,
};
use autobackup_profile::{FileProfileRegistry, ProfileRegistry};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "autobackup-cli", about = "Profile auto-backup for a host server")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory holding the host's `<id>.json` profiles
    #[arg(long, default_value = "user/profiles")]
    profiles: PathBuf,

    /// Service configuration (.json, .yaml or .yml)
    #[arg(long, default_value = "config/config.json")]
    config: PathBuf,

    /// Host version tag; snapshots of different tags are kept apart
    #[arg(long, default_value = "dev")]
    version_tag: String,

    /// Write snapshots without whitespace
    #[arg(long)]
    compress_profile: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version, configuration and subscribed events
    Info,
    /// Deliver one lifecycle event, as the host would after the matching route
    Event {
        /// Event name (`raid-end`, `onRaidEnd`) or host route (`/client/match/local/end`)
        #[arg(short, long, value_parser = parse_event)]
        name: LifecycleEvent,
        /// Session (profile) id
        #[arg(short, long)]
        session: String,
    },
    /// Fix profiles stored under a key that differs from their id
    Repair,
    /// List a session's snapshots, oldest first
    List {
        #[arg(short, long)]
        session: String,
    },
}

fn parse_event(s: &str) -> Result<LifecycleEvent, String> {
    s.parse()
        .ok()
        .or_else(|| LifecycleEvent::from_route(s))
        .ok_or_else(|| format!("unknown event or route: {s}"))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = AutoBackupConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    tracing::info!(
        "Loading: {} {}{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        if config.enabled { "" } else { " [Disabled]" }
    );

    let registry = Arc::new(
        FileProfileRegistry::open(&cli.profiles)
            .with_context(|| format!("opening profiles in {}", cli.profiles.display()))?,
    );
    let store = Arc::new(FsSnapshotStore::new());
    let host = HostContext {
        version_tag: cli.version_tag.clone(),
        compress_profile: cli.compress_profile,
    };

    match cli.command {
        Commands::Info => {
            println!("autobackup-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("profiles: {} ({} loaded)", cli.profiles.display(), registry.len());
            println!("enabled: {}", config.enabled);
            println!("max backups per profile: {}", config.maximum_backup_per_profile);
            for event in config.subscribed_events() {
                println!("subscribed: {} <- {}", event, event.route());
            }
        }
        Commands::Event { name, session } => {
            let (service, _) = SnapshotService::builder(config, host, registry, store).start();
            let session = ProfileId::from(session);
            match service.handle_event(name, &session)? {
                Some(record) => println!("{}", record.path.display()),
                None if !service.config().enabled => println!("auto-backup is disabled"),
                None => println!("{name} is not subscribed; nothing written"),
            }
        }
        Commands::Repair => {
            let report = KeyConsistencyRepairer::new(&*registry, &*store).repair();
            for renamed in &report.repaired {
                println!("{}.json => {}.json", renamed.from_key, renamed.id);
            }
            for failure in &report.failures {
                eprintln!("failed: {failure}");
            }
            if !report.failures.is_empty() {
                anyhow::bail!("{} profile(s) could not be repaired", report.failures.len());
            }
        }
        Commands::List { session } => {
            let session = ProfileId::from(session);
            if !session.is_single_path_component() {
                anyhow::bail!("session id {session:?} cannot name a backup directory");
            }
            let dir = session_dir(registry.profile_dir(), &host.version_tag, &session);
            let mut entries = SnapshotEntry::collect(&*store, &dir, &session)?;
            SnapshotEntry::sort_oldest_first(&mut entries);
            for entry in entries {
                let label = entry.label.as_ref();
                let event = label
                    .and_then(|l| l.event())
                    .map_or("-", LifecycleEvent::name);
                let captured = label
                    .and_then(|l| l.token.to_datetime())
                    .map_or_else(|| "-".to_owned(), |t| t.to_rfc3339());
                println!("{}\t{}\t{}", entry.name(), event, captured);
            }
        }
    }

    Ok(())
}
