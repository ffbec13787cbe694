use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Book catalog and personal library server.
#[derive(Parser, Debug, Clone)]
#[command(name = "bookshelf-rs")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "BOOKSHELF_CONFIG", global = true)]
    pub config: Option<PathBuf>,

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
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// User management commands.
    User {
        /// User subcommand action.
        #[command(subcommand)]
        action: UserCommand,
    },

    /// Bulk import catalog rows from an Open Library CSV export.
    Import {
        /// CSV file with a header row.
        file: PathBuf,

        /// Rows per insert transaction.
        #[arg(long, default_value_t = crate::import::DEFAULT_BATCH_SIZE)]
        batch_size: usize,
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
        /// Email address (used to log in).
        #[arg(short, long)]
        email: String,
        /// Password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
        /// User role (admin or user).
        #[arg(short, long, default_value = "user")]
        role: String,
    },

    /// Delete a user.
    Del {
        /// Username to delete.
        username: String,
    },

    /// List all users.
    List,

    /// Change user password.
    Passwd {
        /// Username.
        username: String,
        /// New password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
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

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Book editing policy.
    #[serde(default)]
    pub books: BooksConfig,

    /// Cover storage configuration.
    #[serde(default)]
    pub covers: CoversConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        8080,
    )
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
    PathBuf::from("data/bookshelf.db")
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Registration mode: "open", "disabled".
    #[serde(default = "default_registration")]
    pub registration: String,

    /// Session token duration in days.
    #[serde(default = "default_session_days")]
    pub session_days: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            registration: default_registration(),
            session_days: default_session_days(),
        }
    }
}

fn default_registration() -> String {
    "open".to_string()
}

fn default_session_days() -> u32 {
    1
}

impl AuthConfig {
    /// Check if registration is enabled.
    pub fn registration_enabled(&self) -> bool {
        self.registration == "open"
    }
}

/// Book editing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BooksConfig {
    /// Hours after creation during which a book can be edited or deleted.
    /// 0 disables the window.
    #[serde(default = "default_edit_window_hours")]
    pub edit_window_hours: u32,
}

impl Default for BooksConfig {
    fn default() -> Self {
        Self {
            edit_window_hours: default_edit_window_hours(),
        }
    }
}

fn default_edit_window_hours() -> u32 {
    24
}

impl BooksConfig {
    /// Edit window in seconds, `None` when unrestricted.
    pub fn edit_window_secs(&self) -> Option<i64> {
        (self.edit_window_hours > 0).then(|| i64::from(self.edit_window_hours) * 60 * 60)
    }
}

/// Cover storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoversConfig {
    /// Directory for uploaded covers.
    #[serde(default = "default_covers_dir")]
    pub dir: PathBuf,

    /// URL prefix under which stored covers are served.
    #[serde(default = "default_public_base")]
    pub public_base: String,

    /// Maximum accepted upload size in bytes.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

impl Default for CoversConfig {
    fn default() -> Self {
        Self {
            dir: default_covers_dir(),
            public_base: default_public_base(),
            max_bytes: default_max_bytes(),
        }
    }
}

fn default_covers_dir() -> PathBuf {
    PathBuf::from("data/covers")
}

fn default_public_base() -> String {
    "/covers".to_string()
}

fn default_max_bytes() -> usize {
    5 * 1024 * 1024
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
            PathBuf::from("bookshelf.toml"),
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
bind = "0.0.0.0:8080"

[database]
# path = "/var/lib/bookshelf-rs/bookshelf.db"

[auth]
# Registration mode: "open" or "disabled"
registration = "open"
# Session duration in days
session_days = 1

[books]
# Hours after creation during which owners may edit or delete a book (0 = always)
edit_window_hours = 24

[covers]
# dir = "/var/lib/bookshelf-rs/covers"
public_base = "/covers"
max_bytes = 5242880
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_default_parses() {
        let config: Config = toml::from_str(&Config::generate_default()).unwrap();
        assert_eq!(config.server.bind.port(), 8080);
        assert_eq!(config.books.edit_window_hours, 24);
        assert_eq!(config.covers.public_base, "/covers");
    }

    #[test]
    fn zero_edit_window_is_unrestricted() {
        let books = BooksConfig {
            edit_window_hours: 0,
        };
        assert_eq!(books.edit_window_secs(), None);
        assert_eq!(BooksConfig::default().edit_window_secs(), Some(86_400));
    }
}
