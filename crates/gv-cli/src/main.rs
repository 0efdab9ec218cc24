//! gv: GhostVault command-line client
//!
//! Commands:
//!   deposit <file> --state --city --date   encrypt and store one item
//!   search [--state] [--city] [--date]     list items the credential opens
//!   fetch <id> --out <path>                decrypt one item to a file
//!   purge <id>                             delete one item (row + blob)
//!   config show                            print the effective configuration
//!   status                                 check storage reachability
//!
//! The passphrase (or a backup key) is read from GV_PASSPHRASE or prompted for.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use gv_core::config::{StorageBackend, VaultConfig};
use gv_core::{ProgressFn, Record, RecordStatus, RetrievalQuery};
use gv_storage::S3Credentials;
use gv_vault::{DepositRequest, VaultContext};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "gv",
    version,
    about = "GhostVault client",
    long_about = "gv: deposit media into untrusted storage and get it back with a passphrase or backup key"
)]
struct Cli {
    /// Path to ghostvault.toml configuration file
    #[arg(long, short = 'c', env = "GV_CONFIG", default_value = "ghostvault.toml")]
    config: PathBuf,

    /// Scope deposits and searches to this owner
    #[arg(long, env = "GV_OWNER")]
    owner: Option<String>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "GV_LOG")]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "GV_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a file and deposit it
    ///
    /// Prints a one-time backup key. It is not stored anywhere.
    Deposit {
        file: PathBuf,
        #[arg(long)]
        state: String,
        #[arg(long)]
        city: String,
        /// Capture date, free-form (e.g. 2024-03-01)
        #[arg(long)]
        date: String,
        /// MIME type (default: inferred from the file extension)
        #[arg(long)]
        mime: Option<String>,
    },

    /// List items the credential opens, optionally filtered
    Search {
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        city: Option<String>,
        #[arg(long)]
        date: Option<String>,
        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decrypt one item to a file
    Fetch {
        id: String,
        /// Destination path; written only if decryption succeeds
        #[arg(long, short = 'o')]
        out: PathBuf,
    },

    /// Permanently delete one item
    Purge {
        id: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show storage status
    Status,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Display the effective configuration
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    let level = cli.log.clone().unwrap_or_else(|| config.logging.level.clone());
    let format = cli.log_format.unwrap_or(if config.logging.format == "json" {
        LogFormat::Json
    } else {
        LogFormat::Text
    });
    init_logging(&level, format);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, stopping after the current chunk");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
        Commands::Status => cmd_status(&config).await,
        Commands::Deposit { file, state, city, date, mime } => {
            let ctx = build_context(&config, cli.owner.as_deref())?;
            cmd_deposit(&ctx, &file, state, city, date, mime, &cancel).await
        }
        Commands::Search { state, city, date, json } => {
            let ctx = build_context(&config, cli.owner.as_deref())?;
            let query = RetrievalQuery { state, city, date };
            cmd_search(&ctx, &query, json, &cancel).await
        }
        Commands::Fetch { id, out } => {
            let ctx = build_context(&config, cli.owner.as_deref())?;
            cmd_fetch(&ctx, &id, &out, &cancel).await
        }
        Commands::Purge { id } => {
            let ctx = build_context(&config, cli.owner.as_deref())?;
            cmd_purge(&ctx, &id).await
        }
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

// ── Config / context ──────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<VaultConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        VaultConfig::from_toml_str(&content)
            .with_context(|| format!("loading config: {}", path.display()))
    } else {
        Ok(VaultConfig::default())
    }
}

fn build_context(config: &VaultConfig, owner: Option<&str>) -> Result<VaultContext> {
    let creds = match config.storage.backend {
        StorageBackend::S3 => Some(S3Credentials::from_env().context(
            "S3 credentials not set\n\
             Set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY environment variables.\n\
             Example:\n\
             \texport AWS_ACCESS_KEY_ID=your-key\n\
             \texport AWS_SECRET_ACCESS_KEY=your-secret",
        )?),
        StorageBackend::Fs | StorageBackend::Memory => None,
    };
    if config.storage.backend == StorageBackend::Memory {
        warn!("memory backend selected: nothing survives this process");
    }
    let ctx =
        VaultContext::from_config(config, creds.as_ref()).context("building vault context")?;
    match owner {
        Some(o) => ctx.with_owner(o).context("invalid owner"),
        None => Ok(ctx),
    }
}

/// GV_PASSPHRASE, or an interactive prompt.
fn read_credential(prompt: &str) -> Result<SecretString> {
    if let Ok(p) = std::env::var("GV_PASSPHRASE") {
        return Ok(SecretString::from(p));
    }
    let p = rpassword::prompt_password(prompt).context("reading passphrase")?;
    Ok(SecretString::from(p))
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::with_template(
        "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=>-");
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{prefix:.bold} {spinner} {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn progress_for(pb: &ProgressBar) -> ProgressFn {
    let pb = pb.clone();
    Arc::new(move |done: u64, total: u64, msg: &str| {
        pb.set_length(total);
        pb.set_position(done);
        pb.set_message(msg.to_string());
    })
}

// ── `gv deposit` ──────────────────────────────────────────────────────────────

async fn cmd_deposit(
    ctx: &VaultContext,
    file: &Path,
    state: String,
    city: String,
    date: String,
    mime: Option<String>,
    cancel: &CancellationToken,
) -> Result<()> {
    let payload =
        std::fs::File::open(file).with_context(|| format!("opening {}", file.display()))?;
    let size_hint = payload
        .metadata()
        .with_context(|| format!("reading {}", file.display()))?
        .len();
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("input path has no file name")?;

    let passphrase = read_credential("Passphrase: ")?;
    let confirm = match std::env::var("GV_PASSPHRASE") {
        Ok(_) => None,
        Err(_) => Some(read_credential("Repeat passphrase: ")?),
    };
    if let Some(confirm) = confirm {
        use secrecy::ExposeSecret;
        anyhow::ensure!(
            confirm.expose_secret() == passphrase.expose_secret(),
            "passphrases do not match"
        );
    }

    let pb = make_progress_bar("deposit");
    pb.set_message(filename.clone());
    let receipt = gv_vault::deposit(
        ctx,
        DepositRequest {
            filename,
            mime_type: mime,
            upload_date: date,
            state,
            city,
            payload: Box::new(payload),
            size_hint,
        },
        &passphrase,
        Some(progress_for(&pb)),
        Some(cancel),
    )
    .await
    .with_context(|| format!("depositing {}", file.display()))?;
    pb.finish_with_message("done");

    println!("  id:     {}", receipt.record.id);
    println!("  size:   {}", fmt_bytes(receipt.record.size));
    println!();
    println!("  Backup key (shown once, store it offline):");
    println!("    {}", receipt.backup_key);
    Ok(())
}

// ── `gv search` ───────────────────────────────────────────────────────────────

async fn cmd_search(
    ctx: &VaultContext,
    query: &RetrievalQuery,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let credential = read_credential("Passphrase or backup key: ")?;
    let pb = make_spinner("search");
    let records = gv_vault::search(
        ctx,
        query,
        &credential,
        Some(progress_for(&pb)),
        Some(cancel),
    )
    .await
    .context("searching vault")?;
    pb.finish_and_clear();

    if json {
        let rendered = serde_json::to_string_pretty(&records).context("serializing records")?;
        println!("{rendered}");
        return Ok(());
    }
    if records.is_empty() {
        println!("no items found");
        return Ok(());
    }
    for r in &records {
        print_record(r);
    }
    Ok(())
}

fn print_record(r: &Record) {
    match (&r.status, &r.metadata) {
        (RecordStatus::Completed, Some(m)) => println!(
            "{}  {:<24} {:<12} {}, {}  {}",
            r.id,
            m.filename,
            m.upload_date,
            m.city,
            m.state,
            fmt_bytes(r.size)
        ),
        _ => println!("{}  [locked]  {}", r.id, fmt_bytes(r.size)),
    }
}

// ── `gv fetch` ────────────────────────────────────────────────────────────────

async fn cmd_fetch(
    ctx: &VaultContext,
    id: &str,
    out: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    let record = gv_vault::find_record(ctx, id)
        .await
        .with_context(|| format!("looking up {id}"))?;
    let credential = read_credential("Passphrase or backup key: ")?;

    // Stage next to the destination so the final rename stays on one filesystem.
    // A failed fetch drops the staged file, so nothing partial reaches `out`.
    let dir = match out.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let staged = tempfile::NamedTempFile::new_in(&dir)
        .with_context(|| format!("creating temporary file in {}", dir.display()))?;

    let pb = make_progress_bar("fetch");
    let (mut staged, summary) = gv_vault::fetch_into(
        ctx,
        &record,
        &credential,
        staged,
        Some(progress_for(&pb)),
        Some(cancel),
    )
    .await
    .with_context(|| format!("fetching {id}"))?;
    pb.finish_with_message("done");

    staged.flush().context("flushing payload")?;
    staged
        .persist(out)
        .map_err(|e| e.error)
        .with_context(|| format!("writing {}", out.display()))?;

    info!(id, out = %out.display(), "payload written");
    println!("  {} -> {} ({})", id, out.display(), fmt_bytes(summary.plaintext_bytes));
    Ok(())
}

// ── `gv purge` ────────────────────────────────────────────────────────────────

async fn cmd_purge(ctx: &VaultContext, id: &str) -> Result<()> {
    let record = gv_vault::find_record(ctx, id)
        .await
        .with_context(|| format!("looking up {id}"))?;
    let credential = read_credential("Passphrase or backup key: ")?;
    gv_vault::purge(ctx, &record, &credential)
        .await
        .with_context(|| format!("purging {id}"))?;
    println!("  purged {id}");
    Ok(())
}

// ── `gv config show` / `gv status` ────────────────────────────────────────────

fn cmd_config_show(config: &VaultConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

async fn cmd_status(config: &VaultConfig) -> Result<()> {
    println!("gv v{}", env!("CARGO_PKG_VERSION"));
    println!("  backend:   {:?}", config.storage.backend);
    match config.storage.backend {
        StorageBackend::S3 => {
            println!("  endpoint:  {}", config.storage.endpoint);
            println!("  bucket:    {}", config.storage.bucket);
        }
        StorageBackend::Fs => println!("  root:      {}", config.storage.root.display()),
        StorageBackend::Memory => {}
    }
    println!("  strategy:  {:?}", config.retrieval.strategy);

    let creds = match config.storage.backend {
        StorageBackend::S3 => match S3Credentials::from_env() {
            Ok(c) => Some(c),
            Err(e) => {
                println!("  storage:   not checked ({e})");
                return Ok(());
            }
        },
        _ => None,
    };
    let op = gv_storage::build_operator(&config.storage, creds.as_ref())
        .context("building storage operator")?;
    match gv_storage::check_health(&op).await {
        Ok(()) => println!("  storage:   reachable"),
        Err(e) => println!("  storage:   UNREACHABLE ({e})"),
    }
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
