//! Application state shared across handlers.

use crate::auth::AuthService;
use crate::config::Config;
use crate::covers::CoverStore;
use crate::db::Database;
use std::sync::Arc;

/// Shared application state.
///
/// Nothing here is mutated per request; every request goes to the database.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Database connection.
    pub db: Database,
    /// Authentication service.
    pub auth: Arc<AuthService>,
    /// Cover image storage.
    pub covers: Arc<dyn CoverStore>,
}

impl AppState {
    /// Create new application state with database.
    pub fn new_with_db(
        config: Config,
        db: Database,
        auth: AuthService,
        covers: Arc<dyn CoverStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            db,
            auth: Arc::new(auth),
            covers,
        }
    }

    /// Edit window for books, in seconds.
    pub fn edit_window_secs(&self) -> Option<i64> {
        self.config.books.edit_window_secs()
    }
}
