//! vaultenv - bootstrap secret store access in CI pipelines.
//!
//! Uses the ambient GCP identity of the build to log in to the secret store,
//! loads the pipeline's secrets into an env file (or a child process's
//! environment), and revokes the token before exiting.

use std::io;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vaultenv_core::{AuthSession, LoadRequest, Method, OutputMode, SessionConfig};

#[derive(Debug, Parser)]
#[command(name = "vaultenv", version, about)]
struct Cli {
    /// Secret store address [env: VAULT_ADDR]
    #[arg(long)]
    vault_addr: Option<String>,

    /// Role used for the assertion audience and login [env: CLIENT_ROLE]
    #[arg(long)]
    client_role: Option<String>,

    /// Namespace under secret/ to load [env: APP_ROLE]
    #[arg(long)]
    app_role: Option<String>,

    /// Role for the MongoDB credential pair, empty to skip [env: DB_ROLE]
    #[arg(long)]
    db_role: Option<String>,

    /// Service account to sign as [env: SERVICE_ACCOUNT_EMAIL]
    #[arg(long)]
    service_account_email: Option<String>,

    /// Where to put secrets: env or file [env: SECRET_OUTPUT]
    #[arg(long)]
    output: Option<String>,

    /// Destination for file output [env: SECRET_OUTPUT_FILE]
    #[arg(long)]
    output_file: Option<String>,

    /// Per-request timeout in seconds [env: VAULT_REQUEST_TIMEOUT_SECS]
    #[arg(long)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in, load secrets per configuration, log out (default)
    Load,
    /// Load secrets into the environment and run a command with them
    Run {
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Read v1/<path> and print the response
    Get { path: String },
    /// Write JSON data to v1/<path> and print the response
    Put { path: String, data: String },
    /// Send an arbitrary request to <path> and print the response
    Request {
        method: String,
        path: String,
        data: Option<String>,
    },
}

impl Cli {
    /// Flag values take precedence over the environment.
    fn session_config(&self) -> Result<SessionConfig> {
        let overrides = [
            ("VAULT_ADDR", self.vault_addr.clone()),
            ("CLIENT_ROLE", self.client_role.clone()),
            ("APP_ROLE", self.app_role.clone()),
            ("DB_ROLE", self.db_role.clone()),
            ("SERVICE_ACCOUNT_EMAIL", self.service_account_email.clone()),
            ("SECRET_OUTPUT", self.output.clone()),
            ("SECRET_OUTPUT_FILE", self.output_file.clone()),
            ("VAULT_REQUEST_TIMEOUT_SECS", self.timeout.map(|t| t.to_string())),
        ];

        let config = SessionConfig::from_lookup(|key| {
            overrides
                .iter()
                .find(|(name, value)| *name == key && value.is_some())
                .and_then(|(_, value)| value.clone())
                .or_else(|| std::env::var(key).ok())
        })?;
        Ok(config)
    }
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn parse_json(data: Option<&str>) -> Result<Value> {
    match data {
        Some(raw) => serde_json::from_str(raw).context("Request data must be valid JSON"),
        None => Ok(Value::Null),
    }
}

/// `load` into this process's own environment reaches nothing once it exits.
fn load_output_is_discarded(config: &SessionConfig) -> bool {
    config.output == OutputMode::Env
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run `command` after logging in; the token is revoked whatever the outcome.
async fn run_command(session: &mut AuthSession, command: &Command) -> Result<ExitCode> {
    session
        .login_default()
        .await
        .context("Failed to log in to secret store")?;

    let result = execute(session, command).await;

    if let Err(e) = session.logout().await {
        warn!(error = %e, "Failed to revoke secret store token");
    }

    let child = result?;
    match child {
        Some(argv) => spawn_child(&argv),
        None => Ok(ExitCode::SUCCESS),
    }
}

/// Returns the argv to exec for `run`, after secrets are loaded.
async fn execute(session: &AuthSession, command: &Command) -> Result<Option<Vec<String>>> {
    match command {
        Command::Load => {
            if load_output_is_discarded(session.config()) {
                warn!("Secrets loaded with env output are dropped when vaultenv exits; use `vaultenv run` or `--output file`");
            }
            let summary = session
                .load_configured_secrets()
                .await
                .context("Failed to load secrets")?;
            info!(keys = summary.keys, entries = summary.entries, "Finished retrieving secrets");
            Ok(None)
        }
        Command::Run { command } => {
            let mut request = LoadRequest::from_config(session.config());
            request.output = OutputMode::Env;
            session
                .load_secrets(&request, None)
                .await
                .context("Failed to load secrets")?;
            Ok(Some(command.clone()))
        }
        Command::Get { path } => {
            let value = session.get_secret(path, None).await?;
            print_json(&value)?;
            Ok(None)
        }
        Command::Put { path, data } => {
            let data = parse_json(Some(data))?;
            let value = session.update_secret(path, &data, None).await?;
            print_json(&value)?;
            Ok(None)
        }
        Command::Request { method, path, data } => {
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .with_context(|| format!("Invalid HTTP method: {}", method))?;
            let data = parse_json(data.as_deref())?;
            let value = session.request(method, path, &data, None).await?;
            print_json(&value)?;
            Ok(None)
        }
    }
}

fn spawn_child(argv: &[String]) -> Result<ExitCode> {
    let Some((program, args)) = argv.split_first() else {
        bail!("No command given to run");
    };
    let status = std::process::Command::new(program)
        .args(args)
        .status()
        .with_context(|| format!("Failed to start {}", program))?;

    let code = status.code().unwrap_or(1);
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    match try_main(&cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn try_main(cli: &Cli) -> Result<ExitCode> {
    let default = Command::Load;
    let command = cli.command.as_ref().unwrap_or(&default);
    let config = cli.session_config()?;
    let mut session = AuthSession::new(config)?;
    run_command(&mut session, command).await
}
