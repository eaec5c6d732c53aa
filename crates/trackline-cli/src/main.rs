//! trackline - command-line access to the project-management API.
//!
//! Logs in, keeps the session credential in the configured store, and runs
//! authenticated GraphQL queries. Expired credentials are renewed
//! transparently; a terminal refresh failure ends the session.

use std::io::{self, BufRead, Write};

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use trackline_core::{ApiClient, Config, SessionEventKind, SessionManager};

const USAGE: &str = "\
Usage: trackline <command> [args]

Commands:
  login [email]             Log in and store the session credential
  logout                    End the session and clear stored credentials
  status                    Show whether a session is active
  refresh                   Exchange the refresh token for a new pair
  query <graphql> [vars]    Run an authenticated query (vars as JSON)
  help                      Show this message

Environment:
  TRACKLINE_API_URL            GraphQL endpoint
  TRACKLINE_STORE              memory | file | encrypted | keyring
  TRACKLINE_STORE_PASSPHRASE   Passphrase for the encrypted store
  RUST_LOG                     Log filter (default: warn)";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr and to a daily rolling file in the cache directory.
/// The returned guard flushes the file writer when dropped.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match Config::log_dir()
        .and_then(|dir| std::fs::create_dir_all(&dir).map(|_| dir).map_err(Into::into))
    {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "trackline.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("help");
    if matches!(command, "help" | "--help" | "-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    let mut config = Config::load()?;
    let store = config.open_store()?;
    let client = ApiClient::new(config.api_url())?;
    let session = SessionManager::new(store, client.clone());
    info!(
        endpoint = client.endpoint(),
        store = session.store_name(),
        "trackline starting"
    );

    // The shell's single subscription: report transitions as they happen
    let _events = session.subscribe(|event| match event.kind {
        SessionEventKind::Ended => eprintln!("Session ended - run `trackline login` to sign in again"),
        kind => debug!(event = %kind, "Session event"),
    });

    run(command, &args, &mut config, &client, session).await
}

/// Run one command, then shut the session down whatever the outcome.
async fn run(
    command: &str,
    args: &[String],
    config: &mut Config,
    client: &ApiClient,
    session: SessionManager<ApiClient>,
) -> Result<()> {
    let result = match command {
        "login" => login(config, client, &session, args.get(1).cloned()).await,
        "logout" => {
            if session.logout() {
                println!("Logged out");
            } else {
                println!("No active session");
            }
            Ok(())
        }
        "status" => status(config, &session),
        "refresh" => session
            .request_refresh()
            .await
            .map(|()| println!("Session renewed"))
            .context("Failed to refresh session"),
        "query" => query(client, &session, args.get(1..).unwrap_or(&[])).await,
        other => Err(anyhow!("Unknown command '{}'\n\n{}", other, USAGE)),
    };

    session.shutdown().await;
    result
}

async fn login(
    config: &mut Config,
    client: &ApiClient,
    session: &SessionManager<ApiClient>,
    email: Option<String>,
) -> Result<()> {
    let email = match email.or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    if email.is_empty() {
        bail!("An email address is required");
    }

    let password = rpassword::prompt_password(format!("Password for {}: ", email))
        .context("Failed to read password")?;

    let credential = client
        .login(&email, &password)
        .await
        .context("Login failed")?;
    session.establish(credential)?;

    config.last_email = Some(email.clone());
    config.save()?;

    println!("Logged in as {}", email);
    Ok(())
}

fn status(config: &Config, session: &SessionManager<ApiClient>) -> Result<()> {
    let snapshot = session.snapshot();
    let report = serde_json::json!({
        "endpoint": config.api_url(),
        "store": session.store_name(),
        "isAuthenticated": snapshot.is_authenticated,
        "skipAuth": snapshot.skip_auth,
        "lastEmail": config.last_email,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn query(
    client: &ApiClient,
    session: &SessionManager<ApiClient>,
    args: &[String],
) -> Result<()> {
    let Some(query) = args.first() else {
        bail!("Missing GraphQL query\n\n{}", USAGE);
    };
    let variables: Value = match args.get(1) {
        Some(raw) => serde_json::from_str(raw).context("Variables must be a JSON object")?,
        None => Value::Object(Default::default()),
    };
    if !session.is_authenticated() {
        bail!("Not logged in - run `trackline login` first");
    }

    let data: Value = client.execute(session, query, variables).await?;
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use trackline_core::MemoryStore;

    #[tokio::test]
    async fn test_failed_refresh_still_shuts_session_down() {
        let client = ApiClient::new("http://127.0.0.1:9/graphql").unwrap();
        let session = SessionManager::new(Arc::new(MemoryStore::new()), client.clone());
        let _sub = session.subscribe(|_| {});
        let bus = session.bus().clone();
        let mut config = Config::default();

        let result = run("refresh", &["refresh".to_string()], &mut config, &client, session).await;

        assert!(result.is_err());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_command_is_an_error() {
        let client = ApiClient::new("http://127.0.0.1:9/graphql").unwrap();
        let session = SessionManager::new(Arc::new(MemoryStore::new()), client.clone());
        let mut config = Config::default();

        let err = run("frobnicate", &[], &mut config, &client, session)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown command 'frobnicate'"));
    }
}
