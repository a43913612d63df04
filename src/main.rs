//! kosync-opds server entry point.

use clap::Parser;
use kosync_opds::{
    auth::{AuthService, HashScheme, legacy_digest},
    config::{Cli, Command, Config, UserCommand},
    db::Database,
    server,
};
use std::io::{self, Write};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        tracing::debug!(path = %path.display(), "Loading config");
        Config::load(path)?
    } else {
        Config::default()
    };

    match cli.command {
        Some(Command::Init { force }) => cmd_init(force).await,
        Some(Command::User { action }) => cmd_user(action, &config).await,
        Some(Command::Serve {
            bind,
            books,
            db,
            registrations,
        }) => {
            let mut config = config;
            config.apply_overrides(bind, books, db, registrations);
            cmd_serve(config).await
        }
        None => cmd_serve(config).await,
    }
}

/// Configure the global subscriber; `RUST_LOG` wins over `--debug`.
fn init_tracing(debug: bool) {
    let default_filter = if debug {
        "kosync_opds=debug,tower_http=debug"
    } else {
        "kosync_opds=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Initialize config and database.
async fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    let config = Config::default();
    let _db = Database::open(&config.database.path)?;
    println!("Initialized database: {}", config.database.path.display());

    println!("\nEdit config.toml to configure your server.");
    println!("Then run: kosync-opds user add <username> --password <password>");
    println!("And: kosync-opds serve --books /path/to/books");

    Ok(())
}

/// User management commands.
async fn cmd_user(action: UserCommand, config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;
    let auth = AuthService::new(db, config.auth.policy(), tracing::info_span!("auth"));
    let cancel = CancellationToken::new();

    match action {
        UserCommand::Add {
            username,
            password,
            scheme,
        } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password("Password: ")?,
            };

            let secret = match scheme {
                HashScheme::Legacy => legacy_digest(&password),
                HashScheme::Current => password,
            };

            let credential = auth.create(&username, &secret, scheme, &cancel)?;
            println!(
                "Created user: {} (scheme: {:?})",
                credential.username, scheme
            );
        }

        UserCommand::List => {
            let users = auth.list_users()?;
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!("USERNAME");
                println!("{}", "-".repeat(40));
                for username in users {
                    println!("{}", username);
                }
            }
        }
    }

    Ok(())
}

/// Start the server.
async fn cmd_serve(config: Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;

    if !config.catalog.books_dir.is_dir() {
        tracing::warn!(
            books = %config.catalog.books_dir.display(),
            "Books directory does not exist; the catalog will fail until it does"
        );
    }

    tracing::info!(
        bind = %config.server.bind,
        database = %config.database.path.display(),
        books = %config.catalog.books_dir.display(),
        registration = %config.auth.registration,
        "Starting kosync-opds server"
    );

    let state = server::AppState::new_with_db(config.clone(), db)?;
    let app = server::create_router(state);

    let listener = TcpListener::bind(config.server.bind).await?;
    tracing::info!(address = %config.server.bind, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

/// Prompt for password input.
fn prompt_password(prompt: &str) -> anyhow::Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut password = String::new();
    io::stdin().read_line(&mut password)?;

    Ok(password.trim().to_string())
}
