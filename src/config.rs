use crate::epub::TitleStrategy;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// E-book catalog service and terminal reader.
#[derive(Parser, Debug, Clone)]
#[command(name = "bookshelf-rs")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "BOOKSHELF_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Base URL of the catalog service (overrides `client.base_url`).
    #[arg(long, env = "BOOKSHELF_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the catalog server (default if no command given).
    Serve {
        /// Address to bind the server to.
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// Book catalog commands.
    Books {
        /// Book subcommand action.
        #[command(subcommand)]
        action: BookCommand,
    },

    /// Tag commands.
    Tags {
        /// Tag subcommand action.
        #[command(subcommand)]
        action: TagCommand,
    },

    /// Read a book page by page.
    Read {
        /// Book ID.
        book_id: String,
        /// Page to open (1-based). Defaults to the saved position.
        #[arg(short, long)]
        page: Option<usize>,
    },

    /// Create a default config file.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// Book subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum BookCommand {
    /// List books, newest first.
    List {
        /// Only books carrying one of these tag IDs.
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// Upload an EPUB file.
    Import {
        /// Path to the EPUB.
        path: PathBuf,
        /// Optional cover image to upload alongside.
        #[arg(long)]
        cover: Option<PathBuf>,
    },

    /// Download a book's cover image.
    Cover {
        /// Book ID.
        book_id: String,
        /// Output file.
        #[arg(short, long)]
        output: PathBuf,
    },
}

/// Tag subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum TagCommand {
    /// List all tags.
    List,

    /// Create a tag.
    Add {
        /// Tag name.
        name: String,
    },

    /// Replace the tags of a book.
    Assign {
        /// Book ID.
        book_id: String,
        /// Tag IDs (empty clears all tags).
        tag_ids: Vec<String>,
    },
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

    /// Catalog client configuration.
    #[serde(default)]
    pub client: ClientConfig,

    /// Reader configuration.
    #[serde(default)]
    pub reader: ReaderConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Largest accepted upload in bytes.
    #[serde(default = "default_max_upload")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        3000,
    )
}

fn default_max_upload() -> usize {
    64 * 1024 * 1024
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
    PathBuf::from("data/catalog.db")
}

/// Catalog client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the catalog service.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Attempts per request on transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base retry delay; attempt `n` waits `n` times this.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl ClientConfig {
    /// Configuration pointing at the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the base retry delay.
    pub fn with_retry_delay(mut self, ms: u64) -> Self {
        self.retry_delay_ms = ms;
        self
    }
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

/// Reader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Local key-value store for reading positions.
    #[serde(default = "default_positions_path")]
    pub positions_path: PathBuf,

    /// How titles are read from the OPF.
    #[serde(default)]
    pub title_strategy: TitleStrategy,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            positions_path: default_positions_path(),
            title_strategy: TitleStrategy::default(),
        }
    }
}

fn default_positions_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|p| p.join("bookshelf-rs").join("positions.db"))
        .unwrap_or_else(|| PathBuf::from("data/positions.db"))
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
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
            PathBuf::from("bookshelf-rs.toml"),
            dirs::config_dir()
                .map(|p| p.join("bookshelf-rs").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/bookshelf-rs/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# bookshelf-rs configuration

[server]
bind = "0.0.0.0:3000"
# max_upload_bytes = 67108864

[database]
# path = "/var/lib/bookshelf-rs/catalog.db"

[client]
# Catalog service used by the `books`, `tags` and `read` commands
base_url = "http://localhost:3000"
timeout_secs = 60
# Attempts per request on network errors; delay grows linearly
max_retries = 3
retry_delay_ms = 1000

[reader]
# positions_path = "~/.local/share/bookshelf-rs/positions.db"
# Title lookup: "xml" or "plain_text"
title_strategy = "xml"
"#
        .to_string()
    }
}
