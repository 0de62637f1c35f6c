//! VaultKey CLI - Command line interface for unlock history and settings.
//!
//! This tool inspects and maintains the recent-vault history, toggles the
//! history settings, and shows how an open request would be resolved.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use vaultkey_common::{KeyMaterial, Passphrase, VaultIdentity};
use vaultkey_history::{LegacyMigrator, RecentFileHistory};
use vaultkey_storage::{FileStore, Settings};
use vaultkey_unlock::{LoadOutcome, OpenRequest, UnlockCoordinator, VaultLoader};

/// File holding settings and history inside the data directory.
const SETTINGS_FILE: &str = "settings.json";

#[derive(Parser)]
#[command(name = "vaultkey")]
#[command(about = "VaultKey - Vault unlock history and settings")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Data directory (default: platform data dir + "vaultkey").
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or edit the recent-vault history.
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },

    /// Inspect or change settings.
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },

    /// Show how an open request for a vault would be resolved.
    Resolve {
        /// Vault URI or absolute path.
        uri: String,

        /// Key file to use instead of the remembered one.
        #[arg(short, long)]
        key_file: Option<String>,

        /// Fill the passphrase from history.
        #[arg(long)]
        passphrase_cached: bool,
    },

    /// Import the legacy history database, if present.
    Migrate,
}

#[derive(Subcommand)]
enum HistoryCommand {
    /// List remembered vaults, most recent first.
    List {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Forget one vault.
    Forget {
        /// Vault URI or absolute path.
        vault: String,
    },

    /// Forget every vault.
    Clear,

    /// Forget cached key files and passphrases, keeping the vault list.
    ForgetKeys,
}

#[derive(Subcommand)]
enum SettingsCommand {
    /// Show current settings.
    Show {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Change a setting.
    Set {
        key: SettingKey,

        #[arg(action = clap::ArgAction::Set)]
        value: bool,
    },

    /// Open this vault by default.
    SetDefault {
        /// Vault URI or absolute path.
        vault: String,
    },

    /// Stop opening a vault by default.
    ClearDefault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SettingKey {
    RememberKeyFile,
    HistoryEnabled,
}

/// History row as printed by `history list --json`.
#[derive(Debug, Serialize)]
struct HistoryRow {
    vault: String,
    key_file: Option<String>,
    cached_passphrase: bool,
}

/// Loader for commands that resolve requests without opening vaults.
struct ResolveOnly;

#[async_trait]
impl VaultLoader for ResolveOnly {
    async fn load(
        &self,
        _vault: &VaultIdentity,
        _passphrase: Option<&Passphrase>,
        _key_file: Option<&VaultIdentity>,
    ) -> LoadOutcome {
        LoadOutcome::failure("Vaults cannot be opened from the command line")
    }
}

/// Stores and history opened from the data directory.
struct AppContext {
    data_dir: PathBuf,
    store: Arc<FileStore>,
    settings: Settings,
    history: Arc<RecentFileHistory>,
}

impl AppContext {
    async fn open(data_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match data_dir {
            Some(dir) => dir,
            None => dirs::data_dir()
                .context("Could not determine data directory")?
                .join("vaultkey"),
        };
        debug!("Using data directory {}", data_dir.display());

        let store = Arc::new(
            FileStore::open(data_dir.join(SETTINGS_FILE))
                .await
                .context("Failed to open settings store")?,
        );
        let settings = Settings::load(store.as_ref())
            .await
            .context("Failed to load settings")?;
        let history = Arc::new(
            RecentFileHistory::new(store.clone(), &settings)
                .with_legacy(LegacyMigrator::in_dir(&data_dir)),
        );

        Ok(Self {
            data_dir,
            store,
            settings,
            history,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let ctx = AppContext::open(cli.data_dir).await?;

    match cli.command {
        Commands::History { command } => match command {
            HistoryCommand::List { json } => cmd_history_list(&ctx, json).await,
            HistoryCommand::Forget { vault } => cmd_history_forget(&ctx, &vault).await,
            HistoryCommand::Clear => cmd_history_clear(&ctx).await,
            HistoryCommand::ForgetKeys => cmd_history_forget_keys(&ctx).await,
        },

        Commands::Settings { command } => match command {
            SettingsCommand::Show { json } => cmd_settings_show(&ctx, json),
            SettingsCommand::Set { key, value } => cmd_settings_set(&ctx, key, value).await,
            SettingsCommand::SetDefault { vault } => {
                cmd_settings_default(&ctx, Some(parse_identity(&vault)?)).await
            }
            SettingsCommand::ClearDefault => cmd_settings_default(&ctx, None).await,
        },

        Commands::Resolve {
            uri,
            key_file,
            passphrase_cached,
        } => cmd_resolve(&ctx, &uri, key_file.as_deref(), passphrase_cached).await,

        Commands::Migrate => cmd_migrate(&ctx).await,
    }
}

fn parse_identity(raw: &str) -> Result<VaultIdentity> {
    VaultIdentity::parse(raw).with_context(|| format!("Invalid vault reference: {}", raw))
}

async fn history_rows(history: &RecentFileHistory) -> Result<Vec<HistoryRow>> {
    let mut rows = Vec::new();
    let mut index = 0;
    while let Some(entry) = history.entry_at(index).await? {
        rows.push(HistoryRow {
            vault: entry.vault.to_string(),
            key_file: entry.key_file.as_ref().map(|k| k.to_string()),
            cached_passphrase: entry.cached_passphrase.is_some(),
        });
        index += 1;
    }
    Ok(rows)
}

/// List remembered vaults.
async fn cmd_history_list(ctx: &AppContext, json: bool) -> Result<()> {
    let rows = history_rows(&ctx.history)
        .await
        .context("Failed to read history")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if !ctx.history.is_enabled() {
        println!("History is disabled.");
        return Ok(());
    }
    if rows.is_empty() {
        println!("No recent vaults.");
        return Ok(());
    }

    for (index, row) in rows.iter().enumerate() {
        println!("{:>2}. {}", index, row.vault);
        if let Some(key_file) = &row.key_file {
            println!("      key file: {}", key_file);
        }
        if row.cached_passphrase {
            println!("      passphrase cached");
        }
    }

    Ok(())
}

/// Forget one vault.
async fn cmd_history_forget(ctx: &AppContext, raw: &str) -> Result<()> {
    let vault = parse_identity(raw)?;
    let removed = ctx
        .history
        .remove(&vault, true)
        .await
        .context("Failed to update history")?;

    if removed {
        println!("Forgot {}", vault);
    } else {
        println!("{} is not in the history", vault);
    }
    Ok(())
}

/// Forget every vault.
async fn cmd_history_clear(ctx: &AppContext) -> Result<()> {
    ctx.history
        .clear_all()
        .await
        .context("Failed to clear history")?;
    println!("History cleared.");
    Ok(())
}

/// Forget cached credentials.
async fn cmd_history_forget_keys(ctx: &AppContext) -> Result<()> {
    ctx.history
        .clear_credentials_only()
        .await
        .context("Failed to clear cached credentials")?;
    println!("Cached key files and passphrases removed.");
    Ok(())
}

/// Show current settings.
fn cmd_settings_show(ctx: &AppContext, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&ctx.settings)?);
        return Ok(());
    }

    println!("Settings ({}):", ctx.data_dir.join(SETTINGS_FILE).display());
    println!("  remember-key-file: {}", ctx.settings.remember_key_file);
    println!("  history-enabled:   {}", ctx.settings.history_enabled);
    match &ctx.settings.default_vault {
        Some(vault) => println!("  default-vault:     {}", vault),
        None => println!("  default-vault:     (none)"),
    }
    println!("  max-files:         {}", ctx.settings.max_files);
    Ok(())
}

/// Change a setting.
async fn cmd_settings_set(ctx: &AppContext, key: SettingKey, value: bool) -> Result<()> {
    let mut settings = ctx.settings.clone();
    match key {
        SettingKey::RememberKeyFile => settings.remember_key_file = value,
        SettingKey::HistoryEnabled => settings.history_enabled = value,
    }

    settings
        .save(ctx.store.as_ref())
        .await
        .context("Failed to save settings")?;

    info!("Set {:?} to {}", key, value);
    println!("Settings saved.");
    Ok(())
}

/// Set or clear the default vault.
async fn cmd_settings_default(ctx: &AppContext, vault: Option<VaultIdentity>) -> Result<()> {
    let mut settings = ctx.settings.clone();
    match vault {
        Some(vault) => {
            info!("Default vault set to {}", vault);
            settings.set_default(vault);
        }
        None => settings.clear_default(),
    }

    settings
        .save(ctx.store.as_ref())
        .await
        .context("Failed to save settings")?;

    println!("Settings saved.");
    Ok(())
}

/// Resolve an open request and print the result.
async fn cmd_resolve(
    ctx: &AppContext,
    uri: &str,
    key_file: Option<&str>,
    passphrase_cached: bool,
) -> Result<()> {
    let (coordinator, _events) =
        UnlockCoordinator::new(ctx.history.clone(), Arc::new(ResolveOnly), &ctx.settings);

    let request = match key_file {
        Some(key_file) => OpenRequest::Direct {
            vault: parse_identity(uri)?,
            key_file: Some(parse_identity(key_file)?),
            passphrase: None,
            auto_launch: false,
        },
        None => OpenRequest::External {
            uri: uri.to_string(),
            passphrase: None,
            auto_launch: false,
        },
    };

    let mut resolved = coordinator
        .resolve_request(request)
        .await
        .with_context(|| format!("Cannot open {}", uri))?;

    let cached = ctx.history.lookup_passphrase(&resolved.vault).await?;
    let has_cached = cached.is_some();
    if passphrase_cached {
        let key_file = resolved.key_material.key_file().cloned();
        resolved.key_material = KeyMaterial::new(cached, key_file);
    }

    println!("Vault:      {}", resolved.vault);
    match resolved.key_material.key_file() {
        Some(key_file) => println!("Key file:   {}", key_file),
        None => println!("Key file:   (none)"),
    }
    println!(
        "Passphrase: {}",
        if has_cached { "cached" } else { "not cached" }
    );
    println!("Default:    {}", if resolved.is_default { "yes" } else { "no" });

    if passphrase_cached {
        match coordinator.validate(&resolved.key_material) {
            Ok(()) => println!("Credentials are sufficient to unlock."),
            Err(e) => println!("Cannot unlock: {}", e),
        }
    }

    Ok(())
}

/// Import the legacy history database.
async fn cmd_migrate(ctx: &AppContext) -> Result<()> {
    let migrator =
        LegacyMigrator::in_dir(&ctx.data_dir).with_max_files(ctx.settings.max_files);
    let legacy_path = migrator.path().to_path_buf();

    if migrator.run_if_needed(ctx.store.as_ref()).await {
        println!("Imported legacy history from {}", legacy_path.display());
        let count = ctx.history.list_vaults().await?.len();
        println!("{} vaults remembered", count);
    } else {
        println!("No legacy history found at {}", legacy_path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_settings_set() {
        let cli = Cli::try_parse_from([
            "vaultkey",
            "settings",
            "set",
            "history-enabled",
            "false",
        ])
        .unwrap();

        match cli.command {
            Commands::Settings {
                command: SettingsCommand::Set { key, value },
            } => {
                assert_eq!(key, SettingKey::HistoryEnabled);
                assert!(!value);
            }
            _ => panic!("unexpected command"),
        }
    }

    #[test]
    fn test_parse_resolve_with_data_dir() {
        let cli = Cli::try_parse_from([
            "vaultkey",
            "resolve",
            "/data/v1.db",
            "--key-file",
            "/data/v1.key",
            "--data-dir",
            "/tmp/vk",
        ])
        .unwrap();

        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/vk")));
        match cli.command {
            Commands::Resolve {
                uri,
                key_file,
                passphrase_cached,
            } => {
                assert_eq!(uri, "/data/v1.db");
                assert_eq!(key_file.as_deref(), Some("/data/v1.key"));
                assert!(!passphrase_cached);
            }
            _ => panic!("unexpected command"),
        }
    }

    #[tokio::test]
    async fn test_history_rows_hide_passphrase() {
        let dir = tempfile::TempDir::new().unwrap();
        let ctx = AppContext::open(Some(dir.path().to_path_buf())).await.unwrap();
        let vault = VaultIdentity::parse("/data/v1.db").unwrap();
        ctx.history
            .record_success(&vault, None, Some(&Passphrase::new("secret")))
            .await
            .unwrap();

        let rows = history_rows(&ctx.history).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].cached_passphrase);

        let json = serde_json::to_string(&rows).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("file:///data/v1.db"));
    }

    #[test]
    fn test_parse_settings_set_default() {
        let cli =
            Cli::try_parse_from(["vaultkey", "settings", "set-default", "/data/v1.db"]).unwrap();
        match cli.command {
            Commands::Settings {
                command: SettingsCommand::SetDefault { vault },
            } => assert_eq!(vault, "/data/v1.db"),
            _ => panic!("unexpected command"),
        }

        let cli = Cli::try_parse_from(["vaultkey", "settings", "show", "--json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Settings {
                command: SettingsCommand::Show { json: true }
            }
        ));
    }

    #[tokio::test]
    async fn test_default_vault_persists() {
        let dir = tempfile::TempDir::new().unwrap();
        let ctx = AppContext::open(Some(dir.path().to_path_buf())).await.unwrap();
        let vault = parse_identity("/data/v1.db").unwrap();
        cmd_settings_default(&ctx, Some(vault)).await.unwrap();

        let ctx = AppContext::open(Some(dir.path().to_path_buf())).await.unwrap();
        let by_uri = VaultIdentity::parse("file:///data/v1.db").unwrap();
        assert!(ctx.settings.is_default(&by_uri));
        let json = serde_json::to_value(&ctx.settings).unwrap();
        assert_eq!(json["default_vault"], "file:///data/v1.db");

        cmd_settings_default(&ctx, None).await.unwrap();
        let ctx = AppContext::open(Some(dir.path().to_path_buf())).await.unwrap();
        assert!(ctx.settings.default_vault.is_none());
    }
}
