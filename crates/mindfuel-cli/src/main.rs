//! MindFuel CLI - drive the MindFuel session client from a terminal.
//!
//! Logs in, keeps the token pair fresh, issues authenticated requests
//! against the backend and connects a Spotify account.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use mindfuel_core::auth::guard::dashboard_route;
use mindfuel_core::auth::{AuthService, EXPIRY_CHECK_INTERVAL};
use mindfuel_core::navigation::{RecordingNavigator, LOGIN_PATH};
use mindfuel_core::spotify::{CallbackParams, SpotifyAuth};
use mindfuel_core::storage::{FileStore, KeyringStore};
use mindfuel_core::{
    ApiClient, Config, RegisterRequest, RouteDecision, SessionManager, SessionState, SessionStore,
    TokenStore,
};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

// ============================================================================
// Constants
// ============================================================================

/// Log file name in the data directory
const LOG_FILE: &str = "mindfuel.log";

const USAGE: &str = "\
Usage: mindfuel [--keychain] <command> [args]

Commands:
  login [email]                     Log in (password is prompted)
  register <first> <last> <email>   Create an account (password is prompted)
  logout                            Revoke the refresh token and clear the session
  whoami                            Show the identity in the access token
  status                            Restore the session and show dashboard access
  refresh                           Exchange the refresh token for a new pair
  get <endpoint>                    Authenticated GET, prints the JSON response
  watch                             Keep the session fresh until Ctrl+C
  spotify-url                       Print a Spotify authorization URL
  spotify-callback <url>            Finish Spotify auth from the callback URL
  spotify-token                     Print a valid Spotify access token

Options:
  --keychain                        Keep tokens in the OS keychain instead of a file";

/// Initialize the tracing subscriber for logging.
/// Warnings also go to stderr; the log file gets whatever the filter admits.
fn init_tracing(log_dir: &Path) -> WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, LOG_FILE));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_filter(LevelFilter::WARN),
        )
        .init();

    guard
}

/// Everything a command needs: config, the token store and the session.
struct Cli {
    config: Config,
    store: Arc<dyn TokenStore>,
    navigator: Arc<RecordingNavigator>,
    manager: Arc<SessionManager>,
}

impl Cli {
    fn new(config: Config, store: Arc<dyn TokenStore>) -> Result<Self> {
        let navigator = Arc::new(RecordingNavigator::new());
        let service = AuthService::new(config.api_url()).context("Failed to create HTTP client")?;
        let manager = Arc::new(SessionManager::new(
            SessionStore::new(Arc::clone(&store)),
            service,
            navigator.clone(),
        ));
        Ok(Self {
            config,
            store,
            navigator,
            manager,
        })
    }

    fn spotify(&self) -> Result<SpotifyAuth> {
        let spotify_config = self.config.spotify().context(
            "Spotify is not configured (set SPOTIFY_CLIENT_ID and SPOTIFY_CLIENT_SECRET)",
        )?;
        SpotifyAuth::new(spotify_config, Arc::clone(&self.store))
    }

    /// Point the user at `login` if the session was torn down
    fn report_redirect(&self) {
        if self.navigator.last_redirect().as_deref() == Some(LOGIN_PATH) {
            eprintln!("Session expired. Run `mindfuel login` to sign in again.");
        }
    }

    async fn run(&self, command: &str, rest: &[String]) -> Result<()> {
        match command {
            "login" => self.login(rest.first().cloned()).await,
            "register" => {
                let [first_name, last_name, email] = rest else {
                    bail!("Usage: mindfuel register <first> <last> <email>");
                };
                self.register(first_name, last_name, email).await
            }
            "logout" => {
                self.manager.logout().await?;
                println!("Logged out");
                Ok(())
            }
            "whoami" => {
                match self.manager.current_identity() {
                    Some(identity) => println!("{}", serde_json::to_string_pretty(&identity)?),
                    None => println!("Not logged in"),
                }
                Ok(())
            }
            "status" => self.status().await,
            "refresh" => {
                let outcome = self.manager.refresh_shared().await;
                self.report_redirect();
                outcome.map_err(|e| anyhow::anyhow!("{}", e))?;
                println!("Session refreshed");
                Ok(())
            }
            "get" => {
                let Some(endpoint) = rest.first() else {
                    bail!("Usage: mindfuel get <endpoint>");
                };
                let api = ApiClient::new(Arc::clone(&self.manager));
                let result = api.get::<serde_json::Value>(endpoint).await;
                self.report_redirect();
                println!("{}", serde_json::to_string_pretty(&result?)?);
                Ok(())
            }
            "watch" => self.watch().await,
            "spotify-url" => {
                let spotify = self.spotify()?;
                println!("{}", spotify.start_pending_authorization()?);
                println!();
                println!("Open the URL, then run `mindfuel spotify-callback <redirect-url>`.");
                Ok(())
            }
            "spotify-callback" => {
                let Some(callback) = rest.first() else {
                    bail!("Usage: mindfuel spotify-callback <url>");
                };
                self.spotify_callback(callback).await
            }
            "spotify-token" => {
                let spotify = self.spotify()?;
                match spotify.valid_access_token().await {
                    Some(token) => {
                        println!("{}", token);
                        Ok(())
                    }
                    None => bail!("No valid Spotify token. Run `mindfuel spotify-url` to connect."),
                }
            }
            "help" | "--help" | "-h" => {
                println!("{}", USAGE);
                Ok(())
            }
            other => bail!("Unknown command: {}\n\n{}", other, USAGE),
        }
    }

    async fn login(&self, email: Option<String>) -> Result<()> {
        let email = match email {
            Some(email) => email,
            None => prompt("Email", self.config.last_email.as_deref())?,
        };
        let password = rpassword::prompt_password("Password: ")?;

        let response = self.manager.login(&email, &password).await?;
        println!("Logged in as {} <{}>", response.user.full_name(), response.user.email);

        if let Err(e) = Config::remember_email(&email) {
            debug!(error = %e, "Could not save last email");
        }
        Ok(())
    }

    async fn register(&self, first_name: &str, last_name: &str, email: &str) -> Result<()> {
        let password = rpassword::prompt_password("Password: ")?;
        let confirm = rpassword::prompt_password("Confirm password: ")?;
        if password != confirm {
            bail!("Passwords do not match");
        }

        let fields = RegisterRequest {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email: email.to_string(),
            password,
        };
        let response = self.manager.register(&fields).await?;
        println!("Welcome, {}!", response.user.first_name);
        Ok(())
    }

    async fn status(&self) -> Result<()> {
        let state = self.manager.initialize().await;
        let identity = self.manager.current_identity();
        println!("Session: {}", state);

        if let Some(ref identity) = identity {
            let expires = chrono::DateTime::from_timestamp(identity.expires_at_epoch_seconds, 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| identity.expires_at_epoch_seconds.to_string());
            println!("User: {} {} <{}>", identity.first_name, identity.last_name, identity.email);
            println!("Access token expires: {}", expires);
        }

        match dashboard_route(state, identity.as_ref()) {
            RouteDecision::Render => println!("Dashboard: available"),
            RouteDecision::Pending => println!("Dashboard: waiting for session"),
            RouteDecision::Redirect(path) => println!("Dashboard: redirects to {}", path),
        }
        self.report_redirect();
        Ok(())
    }

    async fn watch(&self) -> Result<()> {
        if self.manager.initialize().await != SessionState::Authenticated {
            self.report_redirect();
            bail!("Not logged in");
        }

        let mut states = self.manager.subscribe();
        let watcher = self.manager.spawn_expiry_watch(EXPIRY_CHECK_INTERVAL);
        info!(period_secs = EXPIRY_CHECK_INTERVAL.as_secs(), "Watching session");
        println!("Keeping session fresh. Press Ctrl+C to stop.");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *states.borrow_and_update();
                    println!("Session: {}", state);
                    if state == SessionState::Unauthenticated {
                        self.report_redirect();
                        break;
                    }
                }
            }
        }

        watcher.abort();
        Ok(())
    }

    /// Redeem the redirect from `spotify-url`; `state` must match the one
    /// that command stored.
    async fn spotify_callback(&self, callback: &str) -> Result<()> {
        let spotify = self.spotify()?;
        let params = CallbackParams::parse(callback).context("Invalid callback URL")?;
        spotify
            .finish_pending_authorization(params)
            .await
            .context("Spotify authorization failed")?;
        println!("Spotify connected");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let use_keychain = take_flag(&mut args, "--keychain");

    let config = Config::load().context("Failed to load config")?;
    let data_dir = config.data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    // Initialize logging
    let _log_guard = init_tracing(&data_dir);
    info!(keychain = use_keychain, "MindFuel CLI starting");

    let Some((command, rest)) = args.split_first() else {
        println!("{}", USAGE);
        return Ok(());
    };

    let store: Arc<dyn TokenStore> = if use_keychain {
        Arc::new(KeyringStore::new())
    } else {
        Arc::new(FileStore::new(&data_dir))
    };

    Cli::new(config, store)?.run(command, rest).await
}

fn take_flag(args: &mut Vec<String>, flag: &str) -> bool {
    let before = args.len();
    args.retain(|a| a != flag);
    args.len() != before
}

fn prompt(label: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(d) => print!("{} [{}]: ", label, d),
        None => print!("{}: ", label),
    }
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let value = line.trim();
    match (value.is_empty(), default) {
        (true, Some(d)) => Ok(d.to_string()),
        (true, None) => bail!("{} is required", label),
        (false, _) => Ok(value.to_string()),
    }
}
