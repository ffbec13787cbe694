//! HTTP request handlers.

use crate::auth::authorize_book_change;
use crate::covers;
use crate::db::{self, Book, BookActions, BookSummary, BookUpdate, NewBook, ReadingStatus};
use crate::error::{AppError, Result};
use crate::query::{ListParams, ListQuery, Page, Scope};
use crate::server::AppState;
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::Response,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Build a response, returning 500 on error (which shouldn't happen).
fn build_response(status: StatusCode, content_type: &str, body: impl Into<Body>) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(body.into())
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from("Internal error"))
                .unwrap_or_default()
        })
}

/// Service banner.
pub async fn index() -> Json<Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ============================================================================
// CATALOG
// ============================================================================

/// Run a list query, degrading to an empty page if the backend fails.
fn list_page(state: &AppState, scope: Scope, params: &ListParams) -> Json<Page<BookSummary>> {
    let query = ListQuery::resolve(params, &scope);

    match state.db.list_books(&scope, &query) {
        Ok(page) => Json(page),
        Err(e) => {
            tracing::error!(error = %e, scope = ?scope, "List query failed");
            Json(Page::empty(query.page, query.limit))
        }
    }
}

/// List the whole catalog.
pub async fn list_books(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Json<Page<BookSummary>> {
    list_page(&state, Scope::All, &params)
}

/// Distinct genres.
pub async fn list_genres(State(state): State<AppState>) -> Json<Vec<String>> {
    match state.db.list_genres() {
        Ok(genres) => Json(genres),
        Err(e) => {
            tracing::error!(error = %e, "Genre query failed");
            Json(Vec::new())
        }
    }
}

/// Book details.
pub async fn get_book(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Book>> {
    state
        .db
        .get_book(id)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Book not found".to_string()))
}

/// Multipart book form.
#[derive(Debug, Default)]
struct BookForm {
    title: Option<String>,
    authors: Option<String>,
    desc: Option<String>,
    genre: Option<String>,
    cover: Option<(Vec<u8>, String)>,
}

impl BookForm {
    fn required_title(&self) -> Result<String> {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AppError::InvalidFormat("Title is required".to_string()))
    }
}

async fn read_book_form(mut multipart: Multipart) -> Result<BookForm> {
    let mut form = BookForm::default();
    let bad = |e: axum::extract::multipart::MultipartError| AppError::InvalidFormat(e.body_text());

    while let Some(field) = multipart.next_field().await.map_err(bad)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "cover" => {
                let content_type = field.content_type().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(bad)?;
                if !data.is_empty() {
                    form.cover = Some((data.to_vec(), content_type));
                }
            }
            "title" => form.title = Some(field.text().await.map_err(bad)?),
            "authors" => form.authors = Some(field.text().await.map_err(bad)?),
            "desc" => form.desc = Some(field.text().await.map_err(bad)?),
            "genre" => form.genre = Some(field.text().await.map_err(bad)?),
            _ => {}
        }
    }

    Ok(form)
}

/// Store an uploaded cover, if any.
fn store_cover(state: &AppState, cover: Option<(Vec<u8>, String)>) -> Result<Option<String>> {
    cover
        .map(|(bytes, content_type)| state.covers.store(&bytes, &content_type))
        .transpose()
}

/// Book creation response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedBook {
    message: &'static str,
    book_id: i64,
}

/// Create a user-submitted book.
pub async fn create_book(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<(StatusCode, Json<CreatedBook>)> {
    let user = get_authenticated_user(&state, &headers)?;
    let form = read_book_form(multipart).await?;
    let title = form.required_title()?;
    let cover_url = store_cover(&state, form.cover)?;

    let book_id = state.db.create_user_book(
        &user.id,
        &NewBook {
            title,
            authors: form.authors,
            genre: form.genre,
            description: form.desc,
            cover_url,
        },
    )?;

    tracing::info!(book_id, user_id = %user.id, "Book created");

    Ok((
        StatusCode::CREATED,
        Json(CreatedBook {
            message: "Book created successfully",
            book_id,
        }),
    ))
}

/// Load a book and check that the user may change it.
fn load_for_change(state: &AppState, user: &db::User, id: i64) -> Result<Book> {
    let book = state
        .db
        .get_book(id)?
        .ok_or_else(|| AppError::NotFound("Book not found".to_string()))?;

    authorize_book_change(&book, user, state.edit_window_secs(), db::now_timestamp())?;
    Ok(book)
}

/// Update a book.
pub async fn update_book(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> Result<Json<&'static str>> {
    let user = get_authenticated_user(&state, &headers)?;
    load_for_change(&state, &user, id)?;

    let form = read_book_form(multipart).await?;
    let title = form.required_title()?;
    let cover_url = store_cover(&state, form.cover)?;

    let update = BookUpdate {
        title,
        authors: form.authors,
        genre: form.genre,
        description: form.desc,
        cover_url,
    };

    if !state.db.update_book(id, &update)? {
        return Err(AppError::NotFound("Book not found".to_string()));
    }

    tracing::info!(book_id = id, user_id = %user.id, "Book updated");
    Ok(Json("Book updated successfully"))
}

/// Delete a book.
pub async fn delete_book(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    let user = get_authenticated_user(&state, &headers)?;
    load_for_change(&state, &user, id)?;

    if !state.db.delete_book(id)? {
        return Err(AppError::NotFound("Book not found".to_string()));
    }

    tracing::info!(book_id = id, user_id = %user.id, "Book deleted");
    Ok(Json(serde_json::json!({ "message": "Book deleted successfully" })))
}

/// Serve an uploaded cover.
pub async fn serve_cover(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response<Body>> {
    let path = covers::resolve_path(&state.config.covers.dir, &name)
        .ok_or_else(|| AppError::NotFound("Cover not found".to_string()))?;

    let data = tokio::fs::read(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::NotFound("Cover not found".to_string())
        } else {
            AppError::Io(e)
        }
    })?;

    Ok(build_response(
        StatusCode::OK,
        covers::content_type_for(&name),
        data,
    ))
}

// ============================================================================
// MY BOOKS
// ============================================================================

/// Body of the add-to-list endpoints.
#[derive(Debug, Deserialize)]
pub struct AddBookRequest {
    #[serde(rename = "bookId")]
    book_id: Option<Value>,
}

impl AddBookRequest {
    /// Accepts `bookId` as a number or a numeric string.
    fn book_id(&self) -> Result<i64> {
        let id = match &self.book_id {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        };
        id.ok_or_else(|| AppError::InvalidFormat("bookId is required".to_string()))
    }
}

/// List the user's books.
pub async fn my_books(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<Page<BookSummary>>> {
    let user = get_authenticated_user(&state, &headers)?;
    Ok(list_page(&state, Scope::Owned { user_id: user.id }, &params))
}

/// Add a book to "my books". Adding twice is not an error.
pub async fn add_owned_book(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AddBookRequest>,
) -> Result<(StatusCode, Json<&'static str>)> {
    let user = get_authenticated_user(&state, &headers)?;
    let book_id = req.book_id()?;
    state.db.add_owned_book(&user.id, book_id)?;
    Ok((StatusCode::CREATED, Json("Added to My Books")))
}

/// Whether the user owns a book.
pub async fn is_owned(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(book_id): Path<i64>,
) -> Result<Json<bool>> {
    let user = get_authenticated_user(&state, &headers)?;
    Ok(Json(state.db.is_owned(&user.id, book_id)?))
}

/// Remove a book from "my books".
pub async fn remove_owned_book(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(book_id): Path<i64>,
) -> Result<Json<&'static str>> {
    let user = get_authenticated_user(&state, &headers)?;
    state.db.remove_owned_book(&user.id, book_id)?;
    Ok(Json("Removed from My Books"))
}

// ============================================================================
// READING LIST
// ============================================================================

/// List the user's reading list.
pub async fn reading_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<Page<BookSummary>>> {
    let user = get_authenticated_user(&state, &headers)?;
    Ok(list_page(
        &state,
        Scope::ReadingList { user_id: user.id },
        &params,
    ))
}

/// Add a book to the reading list. Adding twice is not an error.
pub async fn add_to_reading_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AddBookRequest>,
) -> Result<(StatusCode, Json<&'static str>)> {
    let user = get_authenticated_user(&state, &headers)?;
    let book_id = req.book_id()?;
    state.db.add_to_reading_list(&user.id, book_id)?;
    Ok((StatusCode::CREATED, Json("Added to Reading List")))
}

/// Whether a book is on the reading list.
pub async fn in_reading_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(book_id): Path<i64>,
) -> Result<Json<bool>> {
    let user = get_authenticated_user(&state, &headers)?;
    let status = state.db.reading_status(&user.id, book_id)?;
    Ok(Json(status.in_reading_list))
}

/// Reading-list membership and currently-reading flag.
pub async fn reading_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(book_id): Path<i64>,
) -> Result<Json<ReadingStatus>> {
    let user = get_authenticated_user(&state, &headers)?;
    Ok(Json(state.db.reading_status(&user.id, book_id)?))
}

/// Make a reading-list entry the currently-read book.
pub async fn set_currently_reading(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(book_id): Path<i64>,
) -> Result<Json<&'static str>> {
    let user = get_authenticated_user(&state, &headers)?;
    state.db.set_currently_reading(&user.id, book_id)?;
    Ok(Json("Currently reading updated"))
}

/// Remove a book from the reading list.
pub async fn remove_from_reading_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(book_id): Path<i64>,
) -> Result<Json<&'static str>> {
    let user = get_authenticated_user(&state, &headers)?;
    state.db.remove_from_reading_list(&user.id, book_id)?;
    Ok(Json("Removed from Reading List"))
}

/// Which personal lists hold a book.
pub async fn book_actions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(book_id): Path<i64>,
) -> Result<Json<BookActions>> {
    let user = get_authenticated_user(&state, &headers)?;
    Ok(Json(state.db.book_actions(&user.id, book_id)?))
}

// ============================================================================
// AUTH API
// ============================================================================

/// Login request.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

/// Login response.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    token: String,
    id: String,
    username: String,
    email: String,
    role: String,
}

impl LoginResponse {
    fn new(user: db::User, token: String) -> Self {
        Self {
            token,
            id: user.id,
            username: user.username,
            email: user.email,
            role: user.role,
        }
    }
}

/// Register request.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    username: String,
    email: String,
    password: String,
}

/// Auth login.
pub async fn auth_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let (user, token) = state.auth.login(&req.email, &req.password)?;
    Ok(Json(LoginResponse::new(user, token)))
}

/// Auth register.
pub async fn auth_register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<LoginResponse>)> {
    state
        .auth
        .register(&req.username, &req.email, &req.password)?;
    let (user, token) = state.auth.login(&req.email, &req.password)?;

    Ok((StatusCode::CREATED, Json(LoginResponse::new(user, token))))
}

/// Auth logout.
pub async fn auth_logout(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode> {
    if let Some(token) = extract_token(&headers) {
        state.auth.logout(&token)?;
    }
    Ok(StatusCode::OK)
}

/// Get current user info.
pub async fn auth_me(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<db::User>> {
    let user = get_authenticated_user(&state, &headers)?;
    Ok(Json(user))
}

// ============================================================================
// HELPERS
// ============================================================================

/// Extract token from Authorization header.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Get authenticated user from token.
fn get_authenticated_user(state: &AppState, headers: &HeaderMap) -> Result<db::User> {
    let token = extract_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Not authenticated".to_string()))?;

    state
        .auth
        .validate_token(&token)?
        .ok_or_else(|| AppError::Forbidden("Token is not valid".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthService;
    use crate::config::Config;
    use crate::covers::DiskCoverStore;
    use crate::db::Database;
    use axum::http::HeaderValue;
    use axum::response::IntoResponse;
    use std::sync::Arc;

    fn test_state(dir: &std::path::Path) -> AppState {
        let db = Database::open_memory().unwrap();
        let auth = AuthService::new(db.clone(), 1, true);
        let mut config = Config::default();
        config.covers.dir = dir.to_path_buf();
        let covers = Arc::new(DiskCoverStore::new(&config.covers).unwrap());
        AppState::new_with_db(config, db, auth, covers)
    }

    fn login(state: &AppState, name: &str) -> (db::User, HeaderMap) {
        let email = format!("{}@example.com", name);
        state
            .auth
            .create_user(name, &email, "password", "user")
            .unwrap();
        let (user, token) = state.auth.login(&email, "password").unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        (user, headers)
    }

    fn add_request(book_id: Value) -> Json<AddBookRequest> {
        Json(AddBookRequest {
            book_id: Some(book_id),
        })
    }

    #[test]
    fn book_id_accepts_numbers_and_strings() {
        let req = AddBookRequest {
            book_id: Some(serde_json::json!(7)),
        };
        assert_eq!(req.book_id().unwrap(), 7);

        let req = AddBookRequest {
            book_id: Some(serde_json::json!("12")),
        };
        assert_eq!(req.book_id().unwrap(), 12);

        let req = AddBookRequest { book_id: None };
        assert!(matches!(req.book_id(), Err(AppError::InvalidFormat(_))));
    }

    #[tokio::test]
    async fn anonymous_requests_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());

        let result = my_books(
            State(state.clone()),
            HeaderMap::new(),
            Query(ListParams::default()),
        )
        .await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer nope"));
        let result = set_currently_reading(State(state), headers, Path(1)).await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn reading_list_flow() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());
        let (user, headers) = login(&state, "reader");

        let book_id = state
            .db
            .create_user_book(
                &user.id,
                &NewBook {
                    title: "Dune".to_string(),
                    ..Default::default()
                },
            )
            .unwrap();

        let (status, _) = add_to_reading_list(
            State(state.clone()),
            headers.clone(),
            add_request(serde_json::json!(book_id)),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);

        // Second add is a no-op, not an error.
        add_to_reading_list(
            State(state.clone()),
            headers.clone(),
            add_request(serde_json::json!(book_id.to_string())),
        )
        .await
        .unwrap();

        set_currently_reading(State(state.clone()), headers.clone(), Path(book_id))
            .await
            .unwrap();

        let Json(status) = reading_status(State(state.clone()), headers.clone(), Path(book_id))
            .await
            .unwrap();
        assert!(status.in_reading_list);
        assert!(status.currently_reading);

        let Json(page) = reading_list(
            State(state.clone()),
            headers.clone(),
            Query(ListParams::default()),
        )
        .await
        .unwrap();
        assert_eq!(page.pagination.total_books, 1);
        assert_eq!(page.books[0].currently_reading, Some(true));

        let Json(actions) = book_actions(State(state.clone()), headers.clone(), Path(book_id))
            .await
            .unwrap();
        assert!(actions.in_my_books);
        assert!(actions.in_reading_list);

        let missing = set_currently_reading(State(state), headers, Path(book_id + 100)).await;
        assert!(matches!(missing, Err(AppError::NotInReadingList { .. })));
    }

    #[tokio::test]
    async fn missing_book_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());

        let result = get_book(State(state), Path(42)).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn catalog_lists_without_login() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());
        let (user, _) = login(&state, "writer");

        for title in ["Dune", "Dune Messiah", "Emma"] {
            state
                .db
                .create_user_book(
                    &user.id,
                    &NewBook {
                        title: title.to_string(),
                        genre: Some("Fiction".to_string()),
                        ..Default::default()
                    },
                )
                .unwrap();
        }

        let params = ListParams {
            q: Some("dune".to_string()),
            ..Default::default()
        };
        let Json(page) = list_books(State(state.clone()), Query(params)).await;
        assert_eq!(page.pagination.total_books, 2);
        assert_eq!(page.books[0].username.as_deref(), Some("writer"));

        let Json(genres) = list_genres(State(state)).await;
        assert_eq!(genres, vec!["Fiction".to_string()]);
    }

    #[tokio::test]
    async fn lists_degrade_to_empty_page_on_backend_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());
        let (user, headers) = login(&state, "reader");

        let book_id = state
            .db
            .create_user_book(
                &user.id,
                &NewBook {
                    title: "Dune".to_string(),
                    genre: Some("Fiction".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        state.db.add_to_reading_list(&user.id, book_id).unwrap();

        state.db.execute_raw("DROP TABLE reading_list").unwrap();

        let params = ListParams {
            page: Some("3".to_string()),
            limit: Some("10".to_string()),
            ..Default::default()
        };
        let Json(page) = reading_list(State(state.clone()), headers, Query(params))
            .await
            .unwrap();
        assert!(page.books.is_empty());
        assert_eq!(page.pagination.current_page, 3);
        assert_eq!(page.pagination.total_pages, 0);
        assert_eq!(page.pagination.total_books, 0);

        state.db.execute_raw("DROP TABLE books").unwrap();

        let response = list_books(State(state.clone()), Query(ListParams::default()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let Json(page) = list_books(State(state.clone()), Query(ListParams::default())).await;
        assert!(page.books.is_empty());
        assert_eq!(page.pagination.total_books, 0);

        let Json(genres) = list_genres(State(state.clone())).await;
        assert!(genres.is_empty());

        let err = get_book(State(state), Path(book_id)).await.unwrap_err();
        assert!(matches!(err, AppError::FetchFailed { .. }));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn serve_cover_rejects_bad_names() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());

        let url = state.covers.store(b"jpegdata", "image/jpeg").unwrap();
        let name = url.rsplit('/').next().unwrap().to_string();

        let response = serve_cover(State(state.clone()), Path(name)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/jpeg"
        );

        let result = serve_cover(State(state), Path("..secret".to_string())).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
