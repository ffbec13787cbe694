use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use thiserror::Error;

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found error.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request input.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Missing or invalid credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not allowed.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Target of a reading-state change is not on the user's reading list.
    #[error("Book {book_id} is not in the reading list of user {user_id}")]
    NotInReadingList {
        /// User ID.
        user_id: String,
        /// Book ID.
        book_id: i64,
    },

    /// Backend failure while loading a single book.
    #[error("Failed to fetch book {book_id}: {source}")]
    FetchFailed {
        /// Book ID.
        book_id: i64,
        /// Underlying database error.
        source: rusqlite::Error,
    },

    /// Backend failure during the reading-state transaction.
    #[error("Failed to update reading state: {0}")]
    ReadingStateFailed(#[source] rusqlite::Error),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Cover storage error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Status code and the message that is safe to send to clients.
    fn public_parts(&self) -> (StatusCode, String) {
        match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::InvalidFormat(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::NotInReadingList { .. } => (
                StatusCode::NOT_FOUND,
                "Book is not in your reading list".to_string(),
            ),
            AppError::FetchFailed { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to fetch book".to_string(),
            ),
            AppError::ReadingStateFailed(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to update reading state".to_string(),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = self.public_parts();

        if status.is_server_error() {
            tracing::error!(error = %self, "Request error");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        (status, Json(message)).into_response()
    }
}

/// Result type alias for the application.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_details_stay_internal() {
        let err = AppError::Database(rusqlite::Error::InvalidQuery);
        let (status, message) = err.public_parts();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message, "Internal server error");

        let err = AppError::ReadingStateFailed(rusqlite::Error::InvalidQuery);
        assert_eq!(err.public_parts().1, "Failed to update reading state");
    }

    #[test]
    fn not_in_reading_list_is_distinct() {
        let err = AppError::NotInReadingList {
            user_id: "u".to_string(),
            book_id: 7,
        };
        let (status, message) = err.public_parts();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(message, "Book is not in your reading list");
    }
}
