//! bookshelf-rs: a book catalog and personal library server.
//!
//! Users browse a shared catalog, add books to "my books", keep a reading
//! list and mark exactly one entry of it as currently being read.
//!
//! # Features
//!
//! - Catalog search with title matching, genre filter, whitelisted sorting
//!   and pagination shared by every list endpoint
//! - Per-user ownership and reading lists
//! - Transactional "currently reading" switch
//! - User-submitted books with uploaded covers
//! - Bulk import of Open Library records
//! - Session-token authentication

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Authentication and authorization.
pub mod auth;
/// Configuration and CLI.
pub mod config;
/// Cover image storage.
pub mod covers;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// Open Library CSV import.
pub mod import;
/// List query construction.
pub mod query;
/// HTTP server.
pub mod server;


pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use server::AppState;
