use crate::db::*;
use crate::error::{AppError, Result};
use crate::query::{FOLD_FUNCTION, fold};
use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior, params};
use std::path::Path;
use std::sync::Arc;

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    pub(super) conn: Arc<Mutex<Connection>>,
}

const BOOK_SELECT: &str = "SELECT books.id, books.work_key, books.title, books.authors, books.genre,
            books.description, books.cover_source, books.cover_url, books.cover_id,
            books.source, books.created_by, users.username, books.created_at
     FROM books
     LEFT JOIN users ON users.id = books.created_by";

const USER_SELECT: &str =
    "SELECT id, username, email, password_hash, role, created_at, last_login FROM users";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        role: row.get(4)?,
        created_at: row.get(5)?,
        last_login: row.get(6)?,
    })
}

fn book_from_row(row: &Row<'_>) -> rusqlite::Result<Book> {
    Ok(Book {
        id: row.get(0)?,
        work_key: row.get(1)?,
        title: row.get(2)?,
        authors: row.get(3)?,
        genre: row.get(4)?,
        description: row.get(5)?,
        cover_source: row.get(6)?,
        cover_url: row.get(7)?,
        cover_id: row.get(8)?,
        source: row.get(9)?,
        created_by: row.get(10)?,
        username: row.get(11)?,
        created_at: row.get(12)?,
    })
}

/// SQL functions the list queries rely on.
fn register_functions(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        FOLD_FUNCTION,
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|t| fold(&t)))
        },
    )
    .map_err(|e| AppError::Internal(format!("Failed to register SQL functions: {}", e)))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err.sqlite_error_code(), Some(ErrorCode::ConstraintViolation))
}

/// Empty strings from forms count as missing.
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        Self::from_connection(conn)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        register_functions(&conn)?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Users table
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'admin')),
                created_at INTEGER NOT NULL,
                last_login INTEGER
            );

            -- Sessions table
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Catalog
            CREATE TABLE IF NOT EXISTS books (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                work_key TEXT UNIQUE,
                title TEXT NOT NULL,
                authors TEXT NOT NULL DEFAULT 'Unknown',
                genre TEXT,
                description TEXT,
                cover_source TEXT NOT NULL DEFAULT 'none'
                    CHECK (cover_source IN ('none', 'cloudinary', 'openlibrary')),
                cover_url TEXT,
                cover_id TEXT,
                source TEXT NOT NULL CHECK (source IN ('user', 'openlibrary')),
                created_by TEXT,
                created_at INTEGER NOT NULL,
                CHECK ((source = 'user') = (created_by IS NOT NULL)),
                FOREIGN KEY (created_by) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Ownership ("my books")
            CREATE TABLE IF NOT EXISTS user_books (
                user_id TEXT NOT NULL,
                book_id INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'owned',
                added_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, book_id),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );

            -- Reading list
            CREATE TABLE IF NOT EXISTS reading_list (
                user_id TEXT NOT NULL,
                book_id INTEGER NOT NULL,
                currently_reading INTEGER NOT NULL DEFAULT 0,
                added_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, book_id),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_books_title ON books(title);
            CREATE INDEX IF NOT EXISTS idx_books_genre ON books(genre);
            CREATE INDEX IF NOT EXISTS idx_user_books_added ON user_books(user_id, added_at);
            CREATE INDEX IF NOT EXISTS idx_reading_list_added ON reading_list(user_id, added_at);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_reading_list_current
                ON reading_list(user_id) WHERE currently_reading = 1;
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    // ========== USER OPERATIONS ==========

    /// Create a new user.
    pub fn create_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (id, username, email, password_hash, role, created_at, last_login)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user.id,
                user.username,
                user.email,
                user.password_hash,
                user.role,
                user.created_at,
                user.last_login,
            ],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                AppError::InvalidFormat("Username or email already exists".to_string())
            } else {
                AppError::Database(e)
            }
        })?;
        Ok(())
    }

    /// Get user by email.
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        let user = conn
            .query_row(
                &format!("{USER_SELECT} WHERE email = ?1"),
                params![email],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// Get user by username.
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        let user = conn
            .query_row(
                &format!("{USER_SELECT} WHERE username = ?1"),
                params![username],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// Get user by ID.
    pub fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        let user = conn
            .query_row(
                &format!("{USER_SELECT} WHERE id = ?1"),
                params![id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("{USER_SELECT} ORDER BY username"))?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Update user password.
    pub fn update_user_password(&self, username: &str, password_hash: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "UPDATE users SET password_hash = ?1 WHERE username = ?2",
            params![password_hash, username],
        )?;
        Ok(rows > 0)
    }

    /// Update user last login.
    pub fn update_user_last_login(&self, user_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE users SET last_login = ?1 WHERE id = ?2",
            params![now_timestamp(), user_id],
        )?;
        Ok(())
    }

    /// Delete user. Their submitted books and list entries go with them.
    pub fn delete_user(&self, username: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute("DELETE FROM users WHERE username = ?1", params![username])?;
        Ok(rows > 0)
    }

    // ========== SESSION OPERATIONS ==========

    /// Create session.
    pub fn create_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
            params![session.token, session.user_id, session.expires_at],
        )?;
        Ok(())
    }

    /// Get session by token.
    pub fn get_session(&self, token: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock();
        let session = conn
            .query_row(
                "SELECT token, user_id, expires_at FROM sessions WHERE token = ?1",
                params![token],
                |row| {
                    Ok(Session {
                        token: row.get(0)?,
                        user_id: row.get(1)?,
                        expires_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(session)
    }

    /// Delete session.
    pub fn delete_session(&self, token: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
        Ok(())
    }

    /// Cleanup expired sessions.
    pub fn cleanup_expired_sessions(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "DELETE FROM sessions WHERE expires_at < ?1",
            params![now_timestamp()],
        )?;
        Ok(rows)
    }

    // ========== BOOK OPERATIONS ==========

    /// Insert a user-submitted book, then record the creator as an owner.
    ///
    /// The ownership row is best effort: if it fails the book still exists and
    /// its id is returned. The creator can add it to "my books" explicitly.
    pub fn create_user_book(&self, user_id: &str, book: &NewBook) -> Result<i64> {
        let cover_source = if book.cover_url.is_some() {
            CoverSource::Cloudinary
        } else {
            CoverSource::None
        };

        let book_id = {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO books
                 (title, authors, genre, description, cover_source, cover_url, source, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    book.title.trim(),
                    non_empty(&book.authors).unwrap_or("Unknown"),
                    non_empty(&book.genre),
                    non_empty(&book.description),
                    cover_source,
                    book.cover_url,
                    BookSource::User,
                    user_id,
                    now_timestamp(),
                ],
            )?;
            conn.last_insert_rowid()
        };

        if let Err(e) = self.add_owned_book(user_id, book_id) {
            tracing::warn!(error = %e, user_id, book_id, "Failed to record ownership of new book");
        }

        Ok(book_id)
    }

    /// Get a book with its creator's username.
    ///
    /// Backend failures become [`AppError::FetchFailed`].
    pub fn get_book(&self, id: i64) -> Result<Option<Book>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("{BOOK_SELECT} WHERE books.id = ?1"),
            params![id],
            book_from_row,
        )
        .optional()
        .map_err(|source| AppError::FetchFailed { book_id: id, source })
    }

    /// Update the mutable fields of a book. A missing cover keeps the old one.
    pub fn update_book(&self, id: i64, update: &BookUpdate) -> Result<bool> {
        let conn = self.conn.lock();
        let new_source = update.cover_url.as_ref().map(|_| CoverSource::Cloudinary);
        let rows = conn.execute(
            "UPDATE books SET
                title = ?1,
                authors = ?2,
                genre = ?3,
                description = ?4,
                cover_url = COALESCE(?5, cover_url),
                cover_source = COALESCE(?6, cover_source)
             WHERE id = ?7",
            params![
                update.title.trim(),
                non_empty(&update.authors).unwrap_or("Unknown"),
                non_empty(&update.genre),
                non_empty(&update.description),
                update.cover_url,
                new_source,
                id,
            ],
        )?;
        Ok(rows > 0)
    }

    /// Delete a book. List entries referencing it are removed by cascade.
    pub fn delete_book(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute("DELETE FROM books WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// Distinct genres in ascending order.
    pub fn list_genres(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT genre FROM books WHERE genre IS NOT NULL ORDER BY genre ASC",
        )?;
        let genres = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(genres)
    }

    /// Insert imported catalog rows, skipping any whose work key already exists.
    ///
    /// Returns the number of rows actually inserted.
    pub fn import_books(&self, rows: &[ImportedBook]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = now_timestamp();
        let mut inserted = 0;

        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO books
                 (work_key, title, authors, description, genre, cover_source, cover_id, source, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9)",
            )?;

            for row in rows {
                inserted += stmt.execute(params![
                    row.work_key,
                    row.title,
                    non_empty(&row.author_name).unwrap_or("Unknown"),
                    non_empty(&row.description),
                    non_empty(&row.genre),
                    CoverSource::OpenLibrary,
                    row.cover_id,
                    BookSource::OpenLibrary,
                    now,
                ])?;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    // ========== OWNERSHIP OPERATIONS ==========

    /// Add a book to the user's "my books". Returns false if it was already there.
    pub fn add_owned_book(&self, user_id: &str, book_id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "INSERT OR IGNORE INTO user_books (user_id, book_id, status, added_at)
                 VALUES (?1, ?2, 'owned', ?3)",
                params![user_id, book_id, now_timestamp()],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    AppError::NotFound("Book not found".to_string())
                } else {
                    AppError::Database(e)
                }
            })?;
        Ok(rows > 0)
    }

    /// Remove a book from the user's "my books".
    pub fn remove_owned_book(&self, user_id: &str, book_id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "DELETE FROM user_books WHERE user_id = ?1 AND book_id = ?2",
            params![user_id, book_id],
        )?;
        Ok(rows > 0)
    }

    /// Whether the user owns the book.
    pub fn is_owned(&self, user_id: &str, book_id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                "SELECT 1 FROM user_books WHERE user_id = ?1 AND book_id = ?2 LIMIT 1",
                params![user_id, book_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    // ========== READING LIST OPERATIONS ==========

    /// Add a book to the reading list, not currently reading. Returns false if
    /// it was already there (the existing flag is left alone).
    pub fn add_to_reading_list(&self, user_id: &str, book_id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "INSERT OR IGNORE INTO reading_list (user_id, book_id, currently_reading, added_at)
                 VALUES (?1, ?2, 0, ?3)",
                params![user_id, book_id, now_timestamp()],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    AppError::NotFound("Book not found".to_string())
                } else {
                    AppError::Database(e)
                }
            })?;
        Ok(rows > 0)
    }

    /// Remove a book from the reading list.
    pub fn remove_from_reading_list(&self, user_id: &str, book_id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "DELETE FROM reading_list WHERE user_id = ?1 AND book_id = ?2",
            params![user_id, book_id],
        )?;
        Ok(rows > 0)
    }

    /// Membership and currently-reading flag of one reading-list entry.
    pub fn reading_status(&self, user_id: &str, book_id: i64) -> Result<ReadingStatus> {
        let conn = self.conn.lock();
        let flag: Option<bool> = conn
            .query_row(
                "SELECT currently_reading FROM reading_list
                 WHERE user_id = ?1 AND book_id = ?2 LIMIT 1",
                params![user_id, book_id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(ReadingStatus {
            in_reading_list: flag.is_some(),
            currently_reading: flag.unwrap_or(false),
        })
    }

    /// Which personal lists hold the book.
    pub fn book_actions(&self, user_id: &str, book_id: i64) -> Result<BookActions> {
        let conn = self.conn.lock();
        let actions = conn.query_row(
            "SELECT
                EXISTS(SELECT 1 FROM user_books WHERE user_id = ?1 AND book_id = ?2),
                EXISTS(SELECT 1 FROM reading_list WHERE user_id = ?1 AND book_id = ?2)",
            params![user_id, book_id],
            |row| {
                Ok(BookActions {
                    in_my_books: row.get(0)?,
                    in_reading_list: row.get(1)?,
                })
            },
        )?;
        Ok(actions)
    }

    /// Make `book_id` the only currently-read book of `user_id`.
    ///
    /// Runs as one immediate transaction: clear every flag of the user, then
    /// set the target. If the target is not on the reading list nothing
    /// changes and [`AppError::NotInReadingList`] is returned. Backend failures
    /// roll back and surface as [`AppError::ReadingStateFailed`].
    pub fn set_currently_reading(&self, user_id: &str, book_id: i64) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(AppError::ReadingStateFailed)?;

        tx.execute(
            "UPDATE reading_list SET currently_reading = 0 WHERE user_id = ?1",
            params![user_id],
        )
        .map_err(AppError::ReadingStateFailed)?;

        let updated = tx
            .execute(
                "UPDATE reading_list SET currently_reading = 1
                 WHERE user_id = ?1 AND book_id = ?2",
                params![user_id, book_id],
            )
            .map_err(AppError::ReadingStateFailed)?;

        if updated == 0 {
            tx.rollback().map_err(AppError::ReadingStateFailed)?;
            return Err(AppError::NotInReadingList {
                user_id: user_id.to_string(),
                book_id,
            });
        }

        tx.commit().map_err(AppError::ReadingStateFailed)?;
        tracing::debug!(user_id, book_id, "Currently reading updated");
        Ok(())
    }

    /// Run raw SQL, used by tests to damage the schema.
    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }
}
