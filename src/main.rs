//! quire - versioned article storage

use clap::{ArgAction, Parser, Subcommand};
use exn::ResultExt;
use quire_config::Config;
use quire_storage::error::{ErrorKind, Result};
use quire_storage::{ArticleStore, StoreHints, VersionLabel};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Versioned storage for journal articles
#[derive(Parser)]
#[command(name = "quire")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true, env = "QUIRE_CONFIG")]
    config: Option<PathBuf>,
    /// More logging; repeat for more detail
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a file as the next version of an article
    Store {
        journal: String,
        article: String,
        /// File to store; it is copied, never moved
        file: PathBuf,
        /// Name the file was uploaded as (defaults to the file's own name)
        #[arg(long)]
        original_name: Option<String>,
        /// MIME type (defaults to one derived from the extension)
        #[arg(long)]
        mime_type: Option<String>,
        /// Who uploaded the file
        #[arg(long)]
        uploaded_by: Option<String>,
        /// Why this version was uploaded
        #[arg(long)]
        reason: Option<String>,
        /// Summary of changes since the previous version
        #[arg(long)]
        changes: Option<String>,
    },
    /// Print a version's metadata, or write its file out
    Show {
        journal: String,
        article: String,
        /// Version label, e.g. v3 (default: current)
        #[arg(long, value_parser = parse_version)]
        version: Option<VersionLabel>,
        /// Write the stored file here instead of printing metadata
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List stored versions, newest first
    Versions { journal: String, article: String },
    /// Print the version ledger as JSON
    History { journal: String, article: String },
    /// Make an existing version current again
    Rollback {
        journal: String,
        article: String,
        #[arg(value_parser = parse_version)]
        version: VersionLabel,
    },
    /// Check a stored file against its recorded checksum
    Verify {
        journal: String,
        article: String,
        #[arg(long, value_parser = parse_version)]
        version: Option<VersionLabel>,
    },
    /// Print the public path of an article
    Url {
        journal: String,
        article: String,
        #[arg(long, value_parser = parse_version)]
        version: Option<VersionLabel>,
    },
}

fn parse_version(s: &str) -> std::result::Result<VersionLabel, String> {
    s.parse().map_err(|e: quire_storage::error::Error| e.to_string())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = ?e, "Could not load configuration");
            eprintln!("error: {e}");
            return ExitCode::from(2);
        },
    };
    let store = match config.open_store() {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = ?e, "Could not open storage");
            eprintln!("error: storage is not available");
            return ExitCode::from(2);
        },
    };

    let uploading = matches!(cli.command, Commands::Store { .. });
    match run(&store, cli.command).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = ?e, "Command failed");
            eprintln!("error: {}", user_message(&e, uploading));
            ExitCode::FAILURE
        },
    }
}

/// What to tell the user. Filesystem paths and error chains stay in the log.
fn user_message(e: &quire_storage::error::Error, uploading: bool) -> String {
    match &**e {
        kind @ (ErrorKind::InvalidIdentifier(_) | ErrorKind::InvalidVersion(_)) => kind.to_string(),
        kind if kind.is_fatal() => "internal storage error; the article was not changed".to_string(),
        ErrorKind::NotFound(_) if !uploading => "file unavailable".to_string(),
        _ if uploading => "upload failed, try again".to_string(),
        _ => "operation failed, try again".to_string(),
    }
}

async fn run(store: &ArticleStore, command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Store {
            journal,
            article,
            file,
            original_name,
            mime_type,
            uploaded_by,
            reason,
            changes,
        } => {
            let hints = StoreHints {
                original_name,
                mime_type,
                uploaded_by,
                reason,
                changes,
            };
            let stored = store.store(&journal, &article, &file, hints).await?;
            println!("{}\t{}\t{}", stored.version, stored.metadata.checksum, stored.url);
        },
        Commands::Show {
            journal,
            article,
            version,
            output,
        } => {
            let Some(file) = store.locate(&journal, &article, version.as_ref()).await? else {
                return Ok(unavailable());
            };
            match output {
                Some(output) => {
                    tokio::fs::copy(&file.path, &output).await.map_err(ErrorKind::from)?;
                },
                None => match file.metadata {
                    Some(metadata) => {
                        let json = serde_json::to_string_pretty(&metadata).or_raise(|| ErrorKind::Serialization)?;
                        println!("{json}");
                    },
                    None => println!("{}\t(no metadata)", file.version),
                },
            }
        },
        Commands::Versions { journal, article } => {
            let current = store.current(&journal, &article).await?;
            let versions = store.versions(&journal, &article).await?;
            if versions.is_empty() {
                return Ok(unavailable());
            }
            for version in versions {
                let marker = if Some(version) == current { "*" } else { " " };
                println!("{marker} {version}");
            }
        },
        Commands::History { journal, article } => {
            let history = store.history(&journal, &article).await?;
            let json = serde_json::to_string_pretty(&history).or_raise(|| ErrorKind::Serialization)?;
            println!("{json}");
        },
        Commands::Rollback {
            journal,
            article,
            version,
        } => {
            store.rollback(&journal, &article, &version).await?;
            println!("{}", store.public_path(&journal, &article, Some(&version))?);
        },
        Commands::Verify {
            journal,
            article,
            version,
        } => match store.verify(&journal, &article, version.as_ref()).await? {
            Some(true) => println!("ok"),
            Some(false) => {
                println!("checksum mismatch");
                return Ok(ExitCode::FAILURE);
            },
            None => return Ok(unavailable()),
        },
        Commands::Url {
            journal,
            article,
            version,
        } => {
            println!("{}", store.public_path(&journal, &article, version.as_ref())?);
        },
    }
    Ok(ExitCode::SUCCESS)
}

fn unavailable() -> ExitCode {
    eprintln!("file unavailable");
    ExitCode::FAILURE
}
