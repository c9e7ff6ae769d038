//! `lineage`: the lineage engine's server and operations binary.
//!
//! Reads `lineage.toml` (or the path specified with `--config`), opens the
//! SQLite store, loads the match model and either serves the HTTP API or runs
//! one site operation and prints its report as JSON.
//!
//! # Password hash generation
//!
//! To generate the argon2 PHC string for `auth_password_hash`:
//!
//! ```
//! cargo run -p lineage-server --bin lineage -- hash-password
//! ```

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use lineage_engine::{
  LineageService, MatchScorer,
  scorer::{HeuristicScorer, LogisticModel},
};
use lineage_server::{
  ServerConfig,
  auth::{self, AuthConfig},
  config::expand_tilde,
};
use lineage_store_sqlite::SqliteStore;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about = "Policy document lineage engine")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "lineage.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Serve the HTTP API.
  Serve,
  /// Group a site's documents and graft them onto preserved lineages.
  Process {
    #[arg(long)]
    site: Uuid,
  },
  /// Clear and reprocess a site and every site sharing a lineage with it.
  Reprocess {
    #[arg(long)]
    site: Uuid,
  },
  /// Blank a site's lineage fields and delete its analysis records.
  Clear {
    #[arg(long)]
    site: Uuid,
  },
  /// Print the argon2 hash for a password entered on stdin and exit.
  HashPassword,
}

type Service = LineageService<SqliteStore, Box<dyn MatchScorer>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Helper mode: hash a password and exit.
  if let Command::HashPassword = cli.command {
    let password = read_password()?;
    let hash = auth::hash_password(&password)
      .map_err(|e| anyhow::anyhow!("argon2 error: {e}"))?;
    println!("{hash}");
    return Ok(());
  }

  // Load configuration.
  let server_cfg = ServerConfig::load(&cli.config)
    .with_context(|| format!("failed to load configuration from {:?}", cli.config))?;

  let service = Arc::new(open_service(&server_cfg).await?);

  match cli.command {
    Command::Serve => serve(service, &server_cfg).await,
    Command::Process { site } => {
      let report = service
        .process_site(site)
        .await
        .with_context(|| format!("failed to process site {site}"))?;
      print_json(&report)
    }
    Command::Reprocess { site } => {
      let reports = service
        .reprocess_site(site)
        .await
        .with_context(|| format!("failed to reprocess site {site}"))?;
      print_json(&reports)
    }
    Command::Clear { site } => {
      let report = service
        .clear_site(site)
        .await
        .with_context(|| format!("failed to clear site {site}"))?;
      print_json(&report)
    }
    Command::HashPassword => Ok(()),
  }
}

async fn open_service(server_cfg: &ServerConfig) -> anyhow::Result<Service> {
  // Expand `~` in store path.
  let store_path = expand_tilde(&server_cfg.store_path);

  // Open SQLite store.
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let scorer: Box<dyn MatchScorer> = match &server_cfg.model_path {
    Some(path) => {
      let path = expand_tilde(path);
      let model = LogisticModel::load(&path)
        .with_context(|| format!("failed to load match model from {path:?}"))?;
      Box::new(model)
    }
    None => {
      tracing::warn!("no model_path configured, falling back to the heuristic scorer");
      Box::new(HeuristicScorer::new())
    }
  };

  Ok(LineageService::new(Arc::new(store), scorer, server_cfg.engine.clone()))
}

async fn serve(service: Arc<Service>, server_cfg: &ServerConfig) -> anyhow::Result<()> {
  let (Some(username), Some(password_hash)) =
    (&server_cfg.auth_username, &server_cfg.auth_password_hash)
  else {
    anyhow::bail!("serving requires auth_username and auth_password_hash");
  };
  let auth = Arc::new(AuthConfig {
    username:      username.clone(),
    password_hash: password_hash.clone(),
  });

  let app = lineage_server::router(service, auth);
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

/// Read a password from stdin.
fn read_password() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  let stdin = io::stdin();
  print!("Password: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  stdin.lock().read_line(&mut line)?;
  Ok(
    line
      .trim_end_matches('\n')
      .trim_end_matches('\r')
      .to_string(),
  )
}
