use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use townhall_client::{ApiClient, Config, FileStorage, LogRedirect, Portal, SessionStore};

#[derive(Parser)]
#[command(name = "townhall", about = "Talk to the town hall API with a persisted session")]
struct Args {
    /// API base URL, e.g. http://localhost:8000/api/v1 (overrides TOWNHALL_API_URL)
    #[arg(long)]
    api_url: Option<String>,

    /// Session file (overrides TOWNHALL_SESSION_FILE)
    #[arg(long)]
    session_file: Option<PathBuf>,

    /// citizen, admin or super_admin (overrides TOWNHALL_PORTAL)
    #[arg(long)]
    portal: Option<Portal>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and store the session
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "TOWNHALL_PASSWORD")]
        password: String,
    },
    /// Revoke the refresh token and forget the session
    Logout,
    /// Fetch the current profile from the backend
    Whoami,
    /// Show the locally stored session state
    Status,
    Get { path: String },
    Delete { path: String },
    Post {
        path: String,
        /// JSON request body
        #[arg(long, default_value = "{}")]
        data: String,
    },
    Put {
        path: String,
        #[arg(long, default_value = "{}")]
        data: String,
    },
    Patch {
        path: String,
        #[arg(long, default_value = "{}")]
        data: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(url) = args.api_url {
        config.api_base_url = url;
    }
    if let Some(path) = args.session_file {
        config.session_file = path;
    }
    if let Some(portal) = args.portal {
        config.portal = portal;
    }

    let session = SessionStore::open(FileStorage::new(&config.session_file))
        .with_context(|| format!("Cannot open session file {}", config.session_file.display()))?;
    let api = ApiClient::new(&config, Arc::new(session), Arc::new(LogRedirect))?;

    match args.command {
        Command::Login { email, password } => {
            let user = api.login(&email, &password).await?;
            info!("Signed in as {} ({})", user.email, user.role);
            print_json(&serde_json::to_value(user)?)?;
        }
        Command::Logout => api.logout().await?,
        Command::Whoami => {
            let user = api.fetch_profile().await?;
            print_json(&serde_json::to_value(user)?)?;
        }
        Command::Status => {
            let session = api.session();
            print_json(&serde_json::json!({
                "authenticated": session.is_authenticated(),
                "expires_at": session.expires_at(),
                "user": session.user(),
            }))?;
        }
        Command::Get { path } => print_json(&api.get::<Value>(&path).await?)?,
        Command::Delete { path } => print_json(&api.delete::<Value>(&path).await?)?,
        Command::Post { path, data } => {
            print_json(&api.post::<Value, _>(&path, &parse_body(&data)?).await?)?
        }
        Command::Put { path, data } => {
            print_json(&api.put::<Value, _>(&path, &parse_body(&data)?).await?)?
        }
        Command::Patch { path, data } => {
            print_json(&api.patch::<Value, _>(&path, &parse_body(&data)?).await?)?
        }
    }

    Ok(())
}

fn parse_body(data: &str) -> anyhow::Result<Value> {
    serde_json::from_str(data).context("--data must be valid JSON")
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
