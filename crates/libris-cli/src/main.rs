//! libris - command-line client for the libris backend.
//!
//! Keeps a persistent session in the configured credential store and
//! exposes the session operations as subcommands.

use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use libris_core::models::{LoginRequest, SignupRequest};
use libris_core::{open_storage, Config, SessionManager, StorageHandle};

const USAGE: &str = "\
Usage: libris <command>

Commands:
  status                 Show the current session (default)
  login [email]          Sign in
  signup <name> <email>  Create an account (verification required)
  logout                 Sign out
  refresh                Renew the access token if it is close to expiry
  get <path>             Send an authenticated GET and print the JSON reply
  config                 Print the effective configuration
  config set <key> <v>   Persist api_base_url, storage, max_retries or
                         request_timeout_secs";

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG to control the level (e.g. RUST_LOG=libris_core=debug).
/// When the cache directory is available, everything is also written to
/// `libris.log` there; the returned guard flushes it on exit.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let log_dir = config.cache_dir().and_then(|dir| {
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    });
    let (file_layer, guard) = match log_dir {
        Ok(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, "libris.log"));
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut config = Config::load()?;
    config.apply_env()?;
    let _log_guard = init_tracing(&config);

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("status");
    if matches!(command, "help" | "--help" | "-h") {
        println!("{}", USAGE);
        return Ok(());
    }
    if command == "config" {
        return configure(&config, &args[2..]);
    }

    let storage = StorageHandle::standalone(open_storage(&config)?);
    let session = SessionManager::new(&config, storage).context("Failed to create API client")?;
    session.initialize().await;
    info!(command = %command, "libris starting");

    match command {
        "status" => status(&session),
        "login" => login(&session, args.get(2).cloned()).await,
        "signup" => {
            let (Some(name), Some(email)) = (args.get(2), args.get(3)) else {
                bail!("Usage: libris signup <name> <email>");
            };
            signup(&session, name, email).await
        }
        "logout" => {
            session.logout().await;
            println!("Signed out.");
            Ok(())
        }
        "refresh" => {
            if !session.is_authenticated() {
                bail!("Not signed in");
            }
            if !session.refresh_session().await {
                bail!("Session could not be renewed, please sign in again");
            }
            println!("Session is current.");
            Ok(())
        }
        "get" => {
            let Some(path) = args.get(2) else {
                bail!("Usage: libris get <path>");
            };
            let value: serde_json::Value = session.api().get(path).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }
}

/// `config` prints the effective settings (file plus environment);
/// `config set` edits the saved file only, so overrides never get persisted.
fn configure(effective: &Config, args: &[String]) -> Result<()> {
    match args {
        [] => {
            println!("{}", serde_json::to_string_pretty(effective)?);
            Ok(())
        }
        [action, key, value] if action == "set" => {
            let mut config = Config::load()?;
            match key.as_str() {
                "api_base_url" => config.api_base_url = value.trim().to_string(),
                "storage" => config.storage = value.parse()?,
                "max_retries" => {
                    config.max_retries = value.parse().context("max_retries must be a number")?
                }
                "request_timeout_secs" => {
                    config.request_timeout_secs = value
                        .parse()
                        .context("request_timeout_secs must be a number")?
                }
                other => bail!("Unknown setting '{}'", other),
            }
            config.save()?;
            println!("Saved {} = {}", key, value);
            Ok(())
        }
        _ => bail!("Usage: libris config [set <key> <value>]"),
    }
}

fn status(session: &SessionManager) -> Result<()> {
    match session.user() {
        Some(user) if session.is_authenticated() => {
            println!("Signed in as {} <{}> ({})", user.name, user.email, user.role);
            if user.is_admin() {
                println!("Administrator access enabled");
            }
            if let Some(balance) = user.credit_balance {
                println!("Credit balance: {:.2}", balance);
            }
            if let Some(remaining) = session.credentials().time_until_expiry() {
                println!("Access token expires in {}s", remaining.as_secs());
            }
        }
        _ => println!("Not signed in."),
    }
    Ok(())
}

async fn login(session: &SessionManager, email: Option<String>) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    let password = rpassword::prompt_password("Password: ")?;

    let outcome = session.login(&LoginRequest::new(email, password)).await;
    if !outcome.success {
        bail!(outcome.error.unwrap_or_else(|| "Login failed".to_string()));
    }
    if let Some(user) = session.user() {
        println!("Welcome, {}.", user.name);
    }
    Ok(())
}

async fn signup(session: &SessionManager, name: &str, email: &str) -> Result<()> {
    let password = rpassword::prompt_password("Password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        bail!("Passwords do not match");
    }

    let outcome = session
        .signup(&SignupRequest {
            name: name.to_string(),
            email: email.to_string(),
            password,
        })
        .await;
    if !outcome.success {
        bail!(outcome.error.unwrap_or_else(|| "Registration failed".to_string()));
    }
    println!(
        "{}",
        outcome
            .message
            .unwrap_or_else(|| "Account created. Check your email to verify it before signing in.".to_string())
    );
    Ok(())
}
