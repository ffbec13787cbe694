//! bookshelf-rs server entry point.

use bookshelf_rs::{
    auth::AuthService,
    config::{Cli, Command, Config, UserCommand},
    covers::DiskCoverStore,
    db::Database,
    import, server,
};
use clap::Parser;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Print import progress every this many rows.
const IMPORT_PROGRESS_ROWS: usize = 5000;

/// How often expired sessions are purged.
const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    // Handle command
    match cli.command {
        Some(Command::Init { force }) => cmd_init(force).await,
        Some(Command::User { action }) => cmd_user(action, &config).await,
        Some(Command::Import { file, batch_size }) => cmd_import(&file, batch_size, &config).await,
        Some(Command::Serve { bind }) => cmd_serve(config, bind).await,
        None => {
            // Default: start server
            cmd_serve(config, None).await
        }
    }
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

    // Write default config
    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    // Initialize database
    let config = Config::default();
    let _db = Database::open(&config.database.path)?;
    println!("Initialized database: {}", config.database.path.display());

    println!("\nEdit config.toml to configure your server.");
    println!("Then run: bookshelf-rs user add <username> --email <email> --role admin");

    Ok(())
}

/// User management commands.
async fn cmd_user(action: UserCommand, config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;
    let auth = AuthService::new(
        db,
        config.auth.session_days,
        config.auth.registration_enabled(),
    );

    match action {
        UserCommand::Add {
            username,
            email,
            password,
            role,
        } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password("Password: ")?,
            };

            let user = auth.create_user(&username, &email, &password, &role)?;
            println!(
                "Created user: {} <{}> (role: {}, id: {})",
                user.username, user.email, user.role, user.id
            );
        }

        UserCommand::Del { username } => {
            if auth.delete_user(&username)? {
                println!("Deleted user: {}", username);
            } else {
                println!("User not found: {}", username);
            }
        }

        UserCommand::List => {
            let users = auth.list_users()?;
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!(
                    "{:<20} {:<30} {:<8} {:<36} LAST LOGIN",
                    "USERNAME", "EMAIL", "ROLE", "ID"
                );
                println!("{}", "-".repeat(110));
                for user in users {
                    let last_login = user
                        .last_login
                        .map(|ts| {
                            bookshelf_rs::db::timestamp_to_datetime(ts)
                                .format("%Y-%m-%d %H:%M")
                                .to_string()
                        })
                        .unwrap_or_else(|| "never".to_string());
                    println!(
                        "{:<20} {:<30} {:<8} {:<36} {}",
                        user.username, user.email, user.role, user.id, last_login
                    );
                }
            }
        }

        UserCommand::Passwd { username, password } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password("New password: ")?,
            };

            if auth.change_password(&username, &password)? {
                println!("Password changed for: {}", username);
            } else {
                println!("User not found: {}", username);
            }
        }
    }

    Ok(())
}

/// Bulk import Open Library records.
async fn cmd_import(file: &Path, batch_size: usize, config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;
    let input = std::fs::File::open(file)?;

    println!("Importing {}", file.display());

    let mut last_report = 0;
    let total = import::import_csv(&db, input, batch_size, |progress| {
        if progress.read / IMPORT_PROGRESS_ROWS > last_report / IMPORT_PROGRESS_ROWS {
            println!(
                "  read: {} | inserted: {}",
                progress.read, progress.inserted
            );
        }
        last_report = progress.read;
    })?;

    println!("Import complete.");
    println!("Total rows read: {}", total.read);
    println!("Total rows inserted: {}", total.inserted);

    Ok(())
}

/// Start the server.
async fn cmd_serve(mut config: Config, bind: Option<std::net::SocketAddr>) -> anyhow::Result<()> {
    // Override bind address if specified
    if let Some(addr) = bind {
        config.server.bind = addr;
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bookshelf_rs=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Open database
    let db = Database::open(&config.database.path)?;

    // Create auth service
    let auth = AuthService::new(
        db.clone(),
        config.auth.session_days,
        config.auth.registration_enabled(),
    );

    let covers = Arc::new(DiskCoverStore::new(&config.covers)?);

    tracing::info!(
        bind = %config.server.bind,
        database = %config.database.path.display(),
        covers = %config.covers.dir.display(),
        edit_window_hours = config.books.edit_window_hours,
        "Starting bookshelf-rs server"
    );

    // Create application state
    let state = server::AppState::new_with_db(config.clone(), db, auth, covers);

    // Purge expired sessions in the background
    let auth = state.auth.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SESSION_PURGE_INTERVAL);

        loop {
            ticker.tick().await;
            match auth.purge_expired_sessions() {
                Ok(0) => {}
                Ok(n) => tracing::debug!(removed = n, "Purged expired sessions"),
                Err(e) => tracing::warn!(error = %e, "Session purge failed"),
            }
        }
    });

    // Create router
    let app = server::create_router(state);

    let listener = TcpListener::bind(config.server.bind).await?;
    tracing::info!(address = %config.server.bind, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Prompt for password input.
fn prompt_password(prompt: &str) -> anyhow::Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut password = String::new();
    io::stdin().read_line(&mut password)?;

    Ok(password.trim().to_string())
}
