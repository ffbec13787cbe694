mod listing;
mod schema;

pub use schema::Database;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// User account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID.
    pub id: String,
    /// Display username.
    pub username: String,
    /// Email address, unique, used to log in.
    pub email: String,
    /// Argon2 password hash.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// User role: "admin" or "user".
    pub role: String,
    /// Account creation timestamp.
    pub created_at: i64,
    /// Last login timestamp.
    pub last_login: Option<i64>,
}

impl User {
    /// Whether the user has the admin role.
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// Authentication session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session token.
    pub token: String,
    /// User ID.
    pub user_id: String,
    /// Expiration timestamp.
    pub expires_at: i64,
}

/// Where a book record came from. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSource {
    /// Submitted by a user.
    User,
    /// Bulk-imported from Open Library.
    OpenLibrary,
}

/// Where a book's cover image lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverSource {
    /// No cover.
    None,
    /// Uploaded through the cover store.
    Cloudinary,
    /// Open Library cover id.
    OpenLibrary,
}

macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// Stored text form.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                match value.as_str()? {
                    $($text => Ok($ty::$variant),)+
                    other => Err(FromSqlError::Other(
                        format!("unknown {} value: {}", stringify!($ty), other).into(),
                    )),
                }
            }
        }
    };
}

text_enum!(BookSource {
    User => "user",
    OpenLibrary => "openlibrary",
});

text_enum!(CoverSource {
    None => "none",
    Cloudinary => "cloudinary",
    OpenLibrary => "openlibrary",
});

/// Full catalog record.
#[derive(Debug, Clone, Serialize)]
pub struct Book {
    /// Book ID.
    pub id: i64,
    /// Open Library work key, unique when present.
    pub work_key: Option<String>,
    /// Title.
    pub title: String,
    /// Authors as a single display string.
    pub authors: String,
    /// Genre.
    pub genre: Option<String>,
    /// Description.
    #[serde(rename = "desc")]
    pub description: Option<String>,
    /// Cover origin.
    pub cover_source: CoverSource,
    /// Cover URL for uploaded covers.
    pub cover_url: Option<String>,
    /// Open Library cover id.
    pub cover_id: Option<String>,
    /// Record origin.
    pub source: BookSource,
    /// Creating user (None for imported books).
    #[serde(rename = "user_id")]
    pub created_by: Option<String>,
    /// Creator's username.
    pub username: Option<String>,
    /// Creation timestamp.
    pub created_at: i64,
}

/// Book row as shown in lists.
#[derive(Debug, Clone, Serialize)]
pub struct BookSummary {
    /// Book ID.
    pub id: i64,
    /// Title.
    pub title: String,
    /// Authors.
    pub authors: String,
    /// Genre.
    pub genre: Option<String>,
    /// Description.
    #[serde(rename = "desc")]
    pub description: Option<String>,
    /// Cover origin.
    pub cover_source: CoverSource,
    /// Cover URL.
    pub cover_url: Option<String>,
    /// Open Library cover id.
    pub cover_id: Option<String>,
    /// Creating user.
    #[serde(rename = "user_id")]
    pub created_by: Option<String>,
    /// Creator's username, absent for imported books.
    pub username: Option<String>,
    /// Creation timestamp.
    pub created_at: i64,
    /// Reading-list flag (reading-list scope only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currently_reading: Option<bool>,
    /// Time the entry was added (reading-list scope only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added_at: Option<i64>,
}

/// Fields for a user-submitted book.
#[derive(Debug, Clone, Default)]
pub struct NewBook {
    /// Title.
    pub title: String,
    /// Authors; `"Unknown"` when absent.
    pub authors: Option<String>,
    /// Genre.
    pub genre: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// URL of an uploaded cover.
    pub cover_url: Option<String>,
}

/// Mutable fields of a book. A `None` cover keeps the current one.
#[derive(Debug, Clone, Default)]
pub struct BookUpdate {
    /// Title.
    pub title: String,
    /// Authors; `"Unknown"` when absent.
    pub authors: Option<String>,
    /// Genre.
    pub genre: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// URL of a newly uploaded cover.
    pub cover_url: Option<String>,
}

/// One row of an Open Library CSV export.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportedBook {
    /// Work key used for deduplication.
    pub work_key: String,
    /// Title.
    pub title: String,
    /// Author display string.
    pub author_name: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Genre.
    pub genre: Option<String>,
    /// Open Library cover id.
    pub cover_id: Option<String>,
}

/// Reading-list membership of one book for one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingStatus {
    /// Entry exists.
    pub in_reading_list: bool,
    /// Entry is the currently-read book.
    pub currently_reading: bool,
}

/// Which personal lists a book is on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookActions {
    /// Book is in "my books".
    pub in_my_books: bool,
    /// Book is on the reading list.
    pub in_reading_list: bool,
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Convert timestamp to DateTime.
pub fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}
