use crate::auth::{HashScheme, RegistrationPolicy};
use crate::library::ExtractionFailurePolicy;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// KOReader progress sync and OPDS catalog server.
#[derive(Parser, Debug, Clone)]
#[command(name = "kosync-opds")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "KOSYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, env = "KOSYNC_DEBUG", global = true)]
    pub debug: bool,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the server (default if no command given).
    Serve {
        /// Address to bind the server to.
        #[arg(short, long, env = "KOSYNC_BIND")]
        bind: Option<SocketAddr>,

        /// Directory of EPUB files to publish.
        #[arg(long, env = "KOSYNC_BOOKS")]
        books: Option<PathBuf>,

        /// Path to the SQLite database.
        #[arg(long, env = "KOSYNC_DB")]
        db: Option<PathBuf>,

        /// Provision unknown users on first sync.
        #[arg(long, env = "KOSYNC_REGISTRATIONS")]
        registrations: bool,
    },

    /// User management commands.
    User {
        /// User subcommand action.
        #[command(subcommand)]
        action: UserCommand,
    },

    /// Initialize database and create default config.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// User management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum UserCommand {
    /// Add a new user.
    Add {
        /// Username.
        username: String,
        /// Password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
        /// Hash scheme; `legacy` lets KOReader sync with the same password.
        #[arg(short, long, value_enum, default_value_t = HashScheme::Legacy)]
        scheme: HashScheme,
    },

    /// List all users.
    List,
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Catalog configuration.
    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Requests running longer than this are abandoned (0 disables).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        8080,
    )
}

fn default_request_timeout() -> u64 {
    60
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/kosync.db")
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Registration mode: "open" or "disabled".
    #[serde(default = "default_registration")]
    pub registration: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            registration: default_registration(),
        }
    }
}

fn default_registration() -> String {
    "disabled".to_string()
}

impl AuthConfig {
    /// Check if registration is enabled.
    pub fn registration_enabled(&self) -> bool {
        self.registration == "open"
    }

    /// Registration policy for unknown sync users.
    pub fn policy(&self) -> RegistrationPolicy {
        if self.registration_enabled() {
            RegistrationPolicy::Open
        } else {
            RegistrationPolicy::Closed
        }
    }
}

/// Catalog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Directory of EPUB files to publish.
    #[serde(default = "default_books_dir")]
    pub books_dir: PathBuf,

    /// Number of parallel workers for metadata extraction (1 = sequential).
    /// Keep low for NAS/network storage to avoid saturation.
    ///
    /// The pool is shared by all catalog requests: concurrent scans each get
    /// their own result but take turns on these threads.
    #[serde(default = "default_catalog_workers")]
    pub workers: usize,

    /// What to do with a book whose metadata cannot be read.
    #[serde(default)]
    pub on_extraction_error: ExtractionFailurePolicy,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            books_dir: default_books_dir(),
            workers: default_catalog_workers(),
            on_extraction_error: ExtractionFailurePolicy::default(),
        }
    }
}

fn default_books_dir() -> PathBuf {
    PathBuf::from("books")
}

fn default_catalog_workers() -> usize {
    1 // Sequential by default - safe for NAS/Raspberry Pi
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("kosync-opds.toml"),
            dirs::config_dir()
                .map(|p| p.join("kosync-opds").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/kosync-opds/config.toml"),
        ];

        candidates
            .into_iter()
            .find(|p| !p.as_os_str().is_empty() && p.exists())
    }

    /// Apply `serve` flags on top of file values.
    pub fn apply_overrides(
        &mut self,
        bind: Option<SocketAddr>,
        books: Option<PathBuf>,
        db: Option<PathBuf>,
        registrations: bool,
    ) {
        if let Some(bind) = bind {
            self.server.bind = bind;
        }
        if let Some(books) = books {
            self.catalog.books_dir = books;
        }
        if let Some(db) = db {
            self.database.path = db;
        }
        if registrations {
            self.auth.registration = "open".to_string();
        }
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# kosync-opds configuration

[server]
bind = "0.0.0.0:8080"
# Abandon requests running longer than this (0 disables)
request_timeout_seconds = 60

[database]
# path = "/var/lib/kosync-opds/kosync.db"

[auth]
# Registration mode: "open" or "disabled"
registration = "disabled"

[catalog]
books_dir = "books"
# Parallel metadata extraction (1 = sequential). One pool serves every
# catalog request, so concurrent requests share these workers.
workers = 1
# Unreadable EPUB files: "skip" (warn and leave out) or "abort" (fail the request)
on_extraction_error = "skip"
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config: Config = toml::from_str(&Config::generate_default()).unwrap();

        assert_eq!(config.server.bind.port(), 8080);
        assert_eq!(config.auth.policy(), RegistrationPolicy::Closed);
        assert_eq!(config.catalog.workers, 1);
        assert_eq!(
            config.catalog.on_extraction_error,
            ExtractionFailurePolicy::Skip
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [catalog]
            books_dir = "/srv/books"
            on_extraction_error = "abort"
            "#,
        )
        .unwrap();

        assert_eq!(config.catalog.books_dir, PathBuf::from("/srv/books"));
        assert_eq!(
            config.catalog.on_extraction_error,
            ExtractionFailurePolicy::Abort
        );
        assert_eq!(config.server.request_timeout_seconds, 60);
        assert_eq!(config.database.path, PathBuf::from("data/kosync.db"));
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = Config::default();
        config.apply_overrides(None, Some(PathBuf::from("/b")), None, true);

        assert_eq!(config.catalog.books_dir, PathBuf::from("/b"));
        assert_eq!(config.auth.policy(), RegistrationPolicy::Open);
        assert_eq!(config.server.bind.port(), 8080);
    }

    #[test]
    fn test_cli_parses_user_add() {
        let cli = Cli::parse_from(["kosync-opds", "user", "add", "alice", "-p", "pw"]);

        match cli.command {
            Some(Command::User {
                action:
                    UserCommand::Add {
                        username, scheme, ..
                    },
            }) => {
                assert_eq!(username, "alice");
                assert_eq!(scheme, HashScheme::Legacy);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
