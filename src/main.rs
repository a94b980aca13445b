use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use git_exten_sync::config::Settings;
use git_exten_sync::engine;
use git_exten_sync::host::{ExtensionHost, ProfileHost};
use git_exten_sync::record::{Action, SyncDocument};
use git_exten_sync::remote::GitTransport;
use git_exten_sync::service::{Command, Outcome, SyncService};
use git_exten_sync::store::{FsStore, StoreTier};

#[derive(Parser)]
#[command(name = "git-exten-sync", about = "Mirror an extension inventory into a Git repository")]
struct Cli {
    /// Alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Show installed extensions with pending actions highlighted
    Status,
    /// Fetch the remote snapshot and reconcile against it
    Pull,
    /// Publish the local snapshot to the remote
    Push {
        /// Commit message
        #[arg(long)]
        message: Option<String>,
    },
    /// Probe the remote for connectivity and permissions
    Test,
    /// List branches available on the remote
    Branches,
    /// List pending actions
    Pending,
    /// Drop one pending action without touching the live system
    Revert {
        /// Id to revert; mutually exclusive with --all
        id: Option<String>,
        /// Revert every pending action
        #[arg(long)]
        all: bool,
    },
    /// Uninstall an extension and let the watcher observe the effect
    Uninstall { id: String },
    /// Enable an installed extension
    Enable { id: String },
    /// Disable an installed extension
    Disable { id: String },
    /// Write the local snapshot to a backup file
    Backup {
        /// Output path; defaults to exten-git.extensions.json
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Reconcile against a previously exported backup file
    Restore { file: PathBuf },
    /// Export settings to a JSON file via the roaming tier
    ExportConfig {
        /// Output path; defaults to exten-git.config.json
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Import settings from a JSON file
    ImportConfig { file: PathBuf },
    /// Run the background loop: completion watcher plus auto-sync pulls
    Watch,
}

type Service = SyncService<ProfileHost, GitTransport, FsStore>;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = match cli.config {
        Some(ref path) => Settings::load_from_file(path)?,
        None => Settings::load()?,
    };

    let host = Arc::new(ProfileHost::new(&settings.inventory_path));
    let transport = GitTransport::new(settings.repo_workdir());
    let store = Arc::new(FsStore::open(settings.store_dir(StoreTier::Local))?);
    let mut service = SyncService::new(host, transport, store, settings);

    match cli.command {
        Cmd::Status => status(&service),
        Cmd::Pull => report(service.handle(Command::Pull)),
        Cmd::Push { message } => report(service.handle(Command::Push { message })),
        Cmd::Test => report(service.handle(Command::TestConnection)),
        Cmd::Branches => branches(&service),
        Cmd::Pending => pending(&service),
        Cmd::Revert { id, all } => revert(&service, id, all),
        Cmd::Uninstall { id } => report(service.handle(Command::Uninstall { id })),
        Cmd::Enable { id } => report(service.handle(Command::SetEnabled { id, enabled: true })),
        Cmd::Disable { id } => report(service.handle(Command::SetEnabled { id, enabled: false })),
        Cmd::Backup { output } => backup(&service, output),
        Cmd::Restore { file } => restore(&service, &file),
        Cmd::ExportConfig { output } => export_config(&service, output),
        Cmd::ImportConfig { file } => import_config(&service, &file),
        Cmd::Watch => watch(&mut service),
    }
}

/// Print the terminal status line; error statuses exit non-zero.
fn report(outcome: Outcome) -> Result<()> {
    if outcome.is_success() {
        println!("{}", outcome.message());
        if let Some(count) = outcome.todo_count() {
            if count > 0 {
                println!("{count} pending action(s); run `git-exten-sync pending` to review");
            }
        }
        Ok(())
    } else {
        anyhow::bail!("{}", outcome.message());
    }
}

/// Pending items render distinctly from settled ones.
fn status(service: &Service) -> Result<()> {
    let pending = service.engine().pending()?;
    let snapshot = service.host().snapshot()?;
    for record in snapshot.records() {
        match pending.iter().find(|a| a.id() == record.id) {
            Some(action) if action.action == Action::Remove => {
                println!("- {} ({}) [pending uninstall]", record.name, record.id);
            }
            _ => {
                let state = if record.enabled { "enabled" } else { "disabled" };
                println!("  {} ({}) [{state}]", record.name, record.id);
            }
        }
    }
    for action in pending.iter().filter(|a| a.action == Action::Add) {
        println!("+ {} ({}) [pending install]", action.record.name, action.id());
    }
    Ok(())
}

fn branches(service: &Service) -> Result<()> {
    let outcome = service.handle(Command::ListBranches);
    if !outcome.is_success() {
        anyhow::bail!("{}", outcome.message());
    }
    if let Some(data) = outcome.data() {
        let names: Vec<String> = serde_json::from_value(data.clone())?;
        for name in names {
            println!("{name}");
        }
    }
    Ok(())
}

fn pending(service: &Service) -> Result<()> {
    let actions = service.engine().pending()?;
    if actions.is_empty() {
        println!("No pending actions");
        return Ok(());
    }
    let summary = engine::summary(&actions);
    println!("{} added / {} removed", summary.added, summary.removed);
    for action in &actions {
        let sign = match action.action {
            Action::Add => '+',
            Action::Remove => '-',
        };
        println!("{sign} {} ({})", action.record.name, action.id());
    }
    Ok(())
}

fn revert(service: &Service, id: Option<String>, all: bool) -> Result<()> {
    match (id, all) {
        (None, true) => report(service.handle(Command::RevertAll)),
        (Some(id), false) => report(service.handle(Command::RevertOne { id })),
        _ => anyhow::bail!("pass an extension id or --all"),
    }
}

fn backup(service: &Service, output: Option<PathBuf>) -> Result<()> {
    let outcome = service.handle(Command::Export);
    if !outcome.is_success() {
        anyhow::bail!("{}", outcome.message());
    }
    let data = outcome.data().context("export produced no document")?;
    let path = output.unwrap_or_else(|| PathBuf::from("exten-git.extensions.json"));
    fs::write(&path, serde_json::to_vec_pretty(data)?)
        .with_context(|| format!("failed to write backup to {path:?}"))?;
    println!("Extensions backed up to {}", path.display());
    Ok(())
}

fn restore(service: &Service, file: &PathBuf) -> Result<()> {
    let bytes = fs::read(file).with_context(|| format!("failed to read backup {file:?}"))?;
    // User-supplied input: reject malformed documents, no silent defaulting.
    let document = SyncDocument::parse(&bytes)?;
    report(service.handle(Command::Reconcile { document }))
}

fn export_config(service: &Service, output: Option<PathBuf>) -> Result<()> {
    let settings = service.settings();
    let json = serde_json::to_vec_pretty(settings)?;

    // Mirror into the roaming tier, the account-scoped home for settings.
    let roaming = FsStore::open(settings.store_dir(StoreTier::Roaming))?;
    use git_exten_sync::store::KeyValueStore as _;
    roaming.set("settings", serde_json::to_value(settings)?)?;

    let path = output.unwrap_or_else(|| PathBuf::from("exten-git.config.json"));
    fs::write(&path, json).with_context(|| format!("failed to write config to {path:?}"))?;
    println!("Configuration exported to {}", path.display());
    Ok(())
}

fn import_config(service: &Service, file: &PathBuf) -> Result<()> {
    let bytes = fs::read(file).with_context(|| format!("failed to read config {file:?}"))?;
    let merged = service.settings().merge_import(&bytes)?;

    let config_path = Settings::config_file_path()?;
    merged.save(&config_path)?;

    let roaming = FsStore::open(merged.store_dir(StoreTier::Roaming))?;
    use git_exten_sync::store::KeyValueStore as _;
    roaming.set("settings", serde_json::to_value(&merged)?)?;

    println!("Configuration imported successfully");
    Ok(())
}

/// Long-running mode: the watcher prunes pending work as reality catches
/// up, and auto-sync pulls on the configured interval.
fn watch(service: &mut Service) -> Result<()> {
    service.start_watcher();
    tracing::info!("watch mode started");

    let interval = service.settings().sync_interval();
    let auto_sync = service.settings().auto_sync;
    let mut last_pull = Instant::now();

    if auto_sync {
        report_watch(service.handle(Command::Pull));
    }

    loop {
        std::thread::sleep(std::time::Duration::from_millis(500));
        if auto_sync && last_pull.elapsed() >= interval {
            last_pull = Instant::now();
            report_watch(service.handle(Command::Pull));
        }
    }
}

fn report_watch(outcome: Outcome) {
    if outcome.is_success() {
        tracing::info!("{}", outcome.message());
    } else {
        tracing::warn!("{}", outcome.message());
    }
}
