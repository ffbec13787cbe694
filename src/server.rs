//! HTTP server and routes.

mod handlers;
mod state;

pub use state::AppState;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Slack on top of the cover size for the other multipart fields.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.config.covers.max_bytes + FORM_OVERHEAD_BYTES;

    let auth_routes = Router::new()
        .route("/login", post(handlers::auth_login))
        .route("/register", post(handlers::auth_register))
        .route("/logout", post(handlers::auth_logout))
        .route("/me", get(handlers::auth_me));

    let book_routes = Router::new()
        .route(
            "/",
            get(handlers::list_books).post(handlers::create_book),
        )
        .route(
            "/{id}",
            get(handlers::get_book)
                .put(handlers::update_book)
                .delete(handlers::delete_book),
        );

    let user_book_routes = Router::new()
        .route("/", post(handlers::add_owned_book))
        .route(
            "/{book_id}",
            get(handlers::is_owned).delete(handlers::remove_owned_book),
        );

    let reading_list_routes = Router::new()
        .route(
            "/",
            get(handlers::reading_list).post(handlers::add_to_reading_list),
        )
        .route(
            "/{book_id}",
            get(handlers::in_reading_list).delete(handlers::remove_from_reading_list),
        )
        .route("/{book_id}/status", get(handlers::reading_status))
        .route("/{book_id}/current", put(handlers::set_currently_reading));

    Router::new()
        .route("/", get(handlers::index))
        .route("/genres", get(handlers::list_genres))
        .route("/my-books", get(handlers::my_books))
        .route("/book-actions/{book_id}", get(handlers::book_actions))
        .route("/covers/{name}", get(handlers::serve_cover))
        .nest("/auth", auth_routes)
        .nest("/books", book_routes)
        .nest("/user-books", user_book_routes)
        .nest("/reading-list", reading_list_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
