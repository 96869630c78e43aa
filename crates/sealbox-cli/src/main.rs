//! sealbox: zero-knowledge encrypted vault client
//!
//! Usage:
//!   sealbox [--config sealbox.toml] --user alice <command>
//!
//! Every command except `register` unlocks a fresh session, loads the
//! keyword index state, runs, persists the index state if it changed, and
//! clears the session again.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use sealbox_core::{Permission, SealboxConfig};
use sealbox_vault::{Access, FileView, NewFile, Session, Vault};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "sealbox", version, about = "Zero-knowledge encrypted file vault")]
struct Cli {
    /// Path to sealbox.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "SEALBOX_CONFIG",
        default_value = "~/.config/sealbox/sealbox.toml"
    )]
    config: PathBuf,

    /// Vault user name
    #[arg(long, short = 'u', env = "SEALBOX_USER")]
    user: String,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "SEALBOX_LOG")]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "SEALBOX_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new user and key bundle
    Register,

    /// Encrypt and upload a local file
    Upload {
        path: PathBuf,
        /// Searchable keyword (repeatable)
        #[arg(long = "keyword", short = 'k')]
        keywords: Vec<String>,
        /// MIME type recorded in the encrypted metadata
        #[arg(long)]
        content_type: Option<String>,
    },

    /// List owned files and files shared with you
    List {
        /// Show the trash instead
        #[arg(long)]
        trash: bool,
    },

    /// Download and decrypt a file
    Download { file_id: String, out: PathBuf },

    /// Find files by keyword
    Search { keyword: String },

    /// Share a file with another user (replaces an existing share)
    Share {
        file_id: String,
        recipient: String,
        #[arg(long, default_value = "read")]
        permission: String,
    },

    /// Remove a user's share. Does not re-key the file.
    Revoke { file_id: String, recipient: String },

    /// List the shares of a file you own
    Shares { file_id: String },

    /// Move a file to the trash
    Trash { file_id: String },

    /// Restore a file from the trash
    Restore { file_id: String },

    /// Permanently delete a file and its shares
    Purge { file_id: String },

    /// Verify your audit log
    Audit {
        /// Print every entry
        #[arg(long)]
        verbose: bool,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_home(&cli.config);
    let config = SealboxConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let level = cli.log.as_deref().unwrap_or(&config.client.log_level);
    let format = match &cli.log_format {
        Some(f) => f.clone(),
        None => LogFormat::from_str(&config.client.log_format, true).unwrap_or(LogFormat::Text),
    };
    init_logging(level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        backend = %config.storage.backend,
        "sealbox starting"
    );

    let vault = Vault::from_config(&config).context("opening vault")?;

    if let Commands::Register = cli.command {
        return cmd_register(&vault, &cli.user).await;
    }

    let password = read_password("Password: ")?;
    let mut session = vault
        .unlock(&cli.user, &password)
        .await
        .context("unlocking vault")?;

    let result = run(&vault, &mut session, cli.command).await;

    // Heads may have moved even when the command failed afterwards.
    let persisted = if session.is_index_dirty() {
        vault.persist_index_state(&mut session).await.map(|_| ())
    } else {
        Ok(())
    };
    vault.logout(session);

    if let (Err(_), Err(e)) = (&result, &persisted) {
        warn!("keyword index state not saved: {e}");
    }
    result?;
    persisted.context("saving keyword index state")
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

/// `SEALBOX_PASSWORD` if set, otherwise an interactive prompt.
fn read_password(prompt: &str) -> Result<SecretString> {
    if let Ok(pw) = std::env::var("SEALBOX_PASSWORD") {
        return Ok(SecretString::from(pw));
    }
    let pw = rpassword::prompt_password(prompt).context("reading password")?;
    Ok(SecretString::from(pw))
}

// ── Commands ──────────────────────────────────────────────────────────────────

async fn cmd_register(vault: &Vault, user: &str) -> Result<()> {
    let password = if std::env::var("SEALBOX_PASSWORD").is_ok() {
        read_password("")?
    } else {
        use secrecy::ExposeSecret;
        let first = read_password("New password: ")?;
        let second = read_password("Confirm password: ")?;
        if first.expose_secret() != second.expose_secret() {
            bail!("passwords do not match");
        }
        first
    };

    eprintln!("Generating keys (this can take a while)...");
    let session = vault
        .register(user, &password)
        .await
        .with_context(|| format!("registering {user}"))?;
    vault.logout(session);
    println!("registered {user}");
    Ok(())
}

async fn run(vault: &Vault, session: &mut Session, command: Commands) -> Result<()> {
    match command {
        Commands::Register => bail!("register runs without an existing session"),
        Commands::Upload {
            path,
            keywords,
            content_type,
        } => {
            let content = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "unnamed".into());
            let file_id = vault
                .upload(
                    session,
                    NewFile {
                        name,
                        content_type,
                        keywords,
                        content,
                    },
                )
                .await?;
            println!("{file_id}");
        }
        Commands::List { trash } => {
            if trash {
                print_files(&vault.list_trash(session).await?);
            } else {
                let mut files = vault.list(session).await?;
                files.extend(vault.list_shared(session).await?);
                print_files(&files);
            }
        }
        Commands::Download { file_id, out } => {
            let download = vault.download(session, &file_id).await?;
            tokio::fs::write(&out, &download.content)
                .await
                .with_context(|| format!("writing {}", out.display()))?;
            println!(
                "{} -> {} ({} bytes)",
                download.metadata.name,
                out.display(),
                download.content.len()
            );
        }
        Commands::Search { keyword } => {
            let results = vault.search(session, &keyword).await?;
            print_files(&results.files);
            if let Some(anomaly) = results.anomaly {
                eprintln!("warning: index chain incomplete: {anomaly}");
            }
        }
        Commands::Share {
            file_id,
            recipient,
            permission,
        } => {
            let permission: Permission = permission.parse()?;
            vault.share(session, &file_id, &recipient, permission).await?;
            println!("shared {file_id} with {recipient} ({permission})");
        }
        Commands::Revoke { file_id, recipient } => {
            vault.revoke(session, &file_id, &recipient).await?;
            println!("revoked {recipient}'s share of {file_id}");
            println!("note: the file is not re-keyed; a previously fetched key still decrypts it");
        }
        Commands::Shares { file_id } => {
            for share in vault.list_shares(session, &file_id).await? {
                println!("{}\t{}", share.recipient, share.permission);
            }
        }
        Commands::Trash { file_id } => vault.trash(session, &file_id).await?,
        Commands::Restore { file_id } => vault.restore(session, &file_id).await?,
        Commands::Purge { file_id } => vault.purge(session, &file_id).await?,
        Commands::Audit { verbose } => {
            if verbose {
                for (i, entry) in vault.audit_log(session).await?.iter().enumerate() {
                    println!(
                        "{i:>4}  {}  {:<14} {}",
                        entry.created_at, entry.payload.action, entry.entry_hash
                    );
                }
            }
            let report = vault.verify_audit(session).await?;
            if report.valid {
                println!("audit log OK");
            } else {
                for finding in &report.errors {
                    eprintln!("INTEGRITY WARNING: {finding}");
                }
                report.into_result()?;
            }
        }
    }
    Ok(())
}

fn print_files(files: &[FileView]) {
    for f in files {
        let access = match f.access {
            Access::Owner => "owner".to_string(),
            Access::Shared(p) => format!("shared:{p}"),
        };
        println!(
            "{}\t{}\t{}\t{}\t{}",
            f.id,
            f.metadata.name,
            f.metadata.size,
            access,
            f.metadata.keywords.join(",")
        );
    }
}
