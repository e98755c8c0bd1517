//! draftcache - inspect and maintain an autosave store.
//!
//! Operates on the same redb file an editor host writes its autosave
//! records to, through the same manager, so budgets and eviction behave
//! exactly as they do in the host.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, bail};
use clap::{Parser, Subcommand};
use draftcache_autosave::keys::record_key;
use draftcache_autosave::{AutoSaveManager, CacheEntry, QuotaExceeded, SaveStatus};
use draftcache_kv::{KVStore, QuotaStore, RedbStore};
use serde_json::Value;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod config;

use config::CliConfig;

/// draftcache - inspect and maintain an autosave store.
///
/// Configuration is read from ~/.draftcache/config.yaml when present.
#[derive(Parser)]
#[command(name = "draftcache")]
#[command(about = "Inspect and maintain a local autosave store")]
#[command(version)]
struct Cli {
    /// Config file (default is ~/.draftcache/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file (default is ~/.draftcache/autosave.redb)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Store capacity in bytes
    #[arg(long, global = true)]
    quota_bytes: Option<u64>,

    /// Output as JSON (for piping)
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List records, oldest save first
    List,
    /// Show usage against the byte budget
    Stats,
    /// Print one record
    Show { key: String },
    /// Save a payload for a key
    Save {
        key: String,
        /// Grouping identifier, e.g. the owning document
        #[arg(long)]
        parent: String,
        /// Read the JSON payload from a file
        #[arg(short = 'f', long, conflicts_with = "data")]
        file: Option<PathBuf>,
        /// Inline JSON payload
        #[arg(long)]
        data: Option<String>,
        /// Go through the debounce timer instead of writing immediately
        #[arg(long)]
        debounce: bool,
    },
    /// Delete one record
    Clear { key: String },
    /// Delete the N oldest records
    Evict { n: usize },
    /// Set or clear the server version marker of a record
    Marker {
        key: String,
        /// New marker; omit to clear
        marker: Option<String>,
    },
    /// Check that the store accepts writes
    Probe,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut cfg = CliConfig::load(cli.config.as_deref())?;
    if cli.db.is_some() {
        cfg.db = cli.db.clone();
    }
    if cli.quota_bytes.is_some() {
        cfg.quota_bytes = cli.quota_bytes;
    }

    let (manager, store) = open_manager(&cfg)?;
    let result = run(&cli, &manager, store.as_ref()).await;
    manager.destroy();
    result
}

fn open_manager(cfg: &CliConfig) -> anyhow::Result<(AutoSaveManager, Arc<dyn KVStore>)> {
    let db_path = cfg.db_path()?;
    if let Some(dir) = db_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let redb = RedbStore::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    let store: Arc<dyn KVStore> = match cfg.quota_bytes {
        Some(limit) => Arc::new(QuotaStore::new(redb, limit)),
        None => Arc::new(redb),
    };

    let manager = AutoSaveManager::new(Arc::clone(&store), cfg.autosave.clone())?;
    manager.set_on_quota_exceeded(Some(Arc::new(|q: &QuotaExceeded| {
        warn!(key = %q.key, parent = %q.parent_key, error = %q.error, "quota exceeded");
    })));
    Ok((manager, store))
}

async fn run(cli: &Cli, manager: &AutoSaveManager, store: &dyn KVStore) -> anyhow::Result<()> {
    match &cli.command {
        Commands::List => {
            let entries = manager.get_all_cache_entries();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                print_entries(&entries);
            }
        }
        Commands::Stats => {
            let stats = manager.get_storage_stats();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("entries: {}", stats.entry_count);
                println!("size:    {} / {} bytes ({:.1}%)", stats.total_size, stats.max_size, stats.usage_percent);
            }
        }
        Commands::Show { key } => {
            let Some(record) = manager.load_from_local(key) else {
                bail!("no readable record for '{}'", key);
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!("key:     {}", record.key);
                println!("parent:  {}", record.parent_key);
                println!("saved:   {}", record.saved_at);
                println!("server:  {}", record.server_version_marker.as_deref().unwrap_or("-"));
                println!("payload: {}", serde_json::to_string_pretty(&record.payload)?);
            }
        }
        Commands::Save {
            key,
            parent,
            file,
            data,
            debounce,
        } => {
            let payload = read_payload(file.as_ref(), data.as_deref())?;
            manager.save_to_local_with_result(key, parent, payload, !debounce)?;
            if *debounce {
                tokio::time::sleep(manager.config().debounce() + Duration::from_millis(50)).await;
            }
            let state = manager.state();
            if state.status == SaveStatus::Error {
                bail!("save of '{}' failed", key);
            }
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else {
                let saved_at = manager.get_last_saved_at(key).map(|t| t.to_string());
                println!("saved '{}' at {}", key, saved_at.unwrap_or_default());
            }
        }
        Commands::Clear { key } => {
            if !has_stored_record(manager, store, key)? {
                bail!("no record for '{}'", key);
            }
            manager.clear_local(key);
            println!("cleared '{}'", key);
        }
        Commands::Evict { n } => {
            let removed = manager.clear_oldest_entries(*n);
            println!("evicted {} record(s)", removed);
        }
        Commands::Marker { key, marker } => {
            if !manager.has_unsaved_data(key) {
                bail!("no readable record for '{}'", key);
            }
            manager.set_server_version_marker(key, marker.as_deref());
            println!("marker for '{}': {}", key, marker.as_deref().unwrap_or("-"));
        }
        Commands::Probe => {
            if manager.is_auto_save_disabled() {
                println!("disabled");
            } else if manager.is_auto_save_available() {
                println!("available");
            } else {
                bail!("store does not accept writes");
            }
        }
    }
    Ok(())
}

/// Whether `key` has anything stored, readable or not. Unreadable records
/// must stay clearable.
fn has_stored_record(manager: &AutoSaveManager, store: &dyn KVStore, key: &str) -> anyhow::Result<bool> {
    let store_key = record_key(&manager.config().key_prefix, key);
    Ok(store.get(&store_key)?.is_some())
}

fn read_payload(file: Option<&PathBuf>, data: Option<&str>) -> anyhow::Result<Value> {
    let text = match (file, data) {
        (Some(path), _) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, Some(inline)) => inline.to_string(),
        (None, None) => bail!("payload required: use --file or --data"),
    };
    serde_json::from_str(&text).context("payload is not valid JSON")
}

fn print_entries(entries: &[CacheEntry]) {
    if entries.is_empty() {
        println!("(no records)");
        return;
    }
    println!("{:<32} {:<24} {:>10}  SAVED", "KEY", "PARENT", "BYTES");
    for e in entries {
        println!("{:<32} {:<24} {:>10}  {}", e.key, e.parent_key, e.size, e.saved_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use draftcache_autosave::AutoSaveConfig;
    use draftcache_kv::MemoryStore;

    #[tokio::test]
    async fn test_corrupt_record_is_clearable() {
        let store: Arc<dyn KVStore> = Arc::new(MemoryStore::new());
        store.set("autosave:img-1", b"{\"key\": \"img").unwrap();
        let manager = AutoSaveManager::new(Arc::clone(&store), AutoSaveConfig::default()).unwrap();

        assert!(!manager.has_unsaved_data("img-1"));
        assert!(has_stored_record(&manager, store.as_ref(), "img-1").unwrap());

        manager.clear_local("img-1");
        assert!(!has_stored_record(&manager, store.as_ref(), "img-1").unwrap());
    }

    #[tokio::test]
    async fn test_missing_record_is_reported() {
        let store: Arc<dyn KVStore> = Arc::new(MemoryStore::new());
        let manager = AutoSaveManager::new(Arc::clone(&store), AutoSaveConfig::default()).unwrap();
        assert!(!has_stored_record(&manager, store.as_ref(), "img-1").unwrap());
    }

    #[test]
    fn test_read_payload_inline() {
        assert_eq!(read_payload(None, Some("{\"a\": 1}")).unwrap(), serde_json::json!({"a": 1}));
        assert!(read_payload(None, Some("not json")).is_err());
        assert!(read_payload(None, None).is_err());
    }
}
