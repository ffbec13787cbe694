//! List query construction.
//!
//! Every list endpoint (catalog, owned books, reading list) shares one shape:
//! a free-text title search, an optional genre filter, a whitelisted sort key,
//! a direction and a page window. This module turns the raw request values
//! into a [`BuiltQuery`]: a `COUNT(*)` statement and a paged `SELECT`
//! statement rendered from the same predicate list, plus the bound values.
//!
//! User input only ever reaches SQLite as bound parameters. Sort columns come
//! from static per-scope maps, so an unknown key selects the scope default
//! instead of being spliced into the statement.

use rusqlite::ToSql;
use rusqlite::types::ToSqlOutput;
use serde::{Deserialize, Serialize};

/// Page used when the request omits one or sends garbage.
pub const DEFAULT_PAGE: i64 = 1;
/// Page size used when the request omits one or sends a non-positive value.
pub const DEFAULT_LIMIT: i64 = 20;
/// Upper bound for the page size.
pub const MAX_LIMIT: i64 = 50;

/// SQL function lowercasing text with Unicode case rules. Registered on every
/// connection by [`crate::db::Database`].
pub const FOLD_FUNCTION: &str = "fold";

/// Columns selected for every book row, in the order the row mapper reads them.
const BOOK_COLUMNS: &str = "books.id, books.title, books.authors, books.genre, books.description,
            books.cover_source, books.cover_url, books.cover_id, books.created_by,
            users.username, books.created_at";

/// Which rows a list request can see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// The whole catalog.
    All,
    /// Books the user has added to "my books".
    Owned {
        /// Owner.
        user_id: String,
    },
    /// Entries of the user's reading list.
    ReadingList {
        /// Reader.
        user_id: String,
    },
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl SortDirection {
    /// Parse `asc`/`desc` in any case. Anything else is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("asc") {
            Some(SortDirection::Asc)
        } else if raw.eq_ignore_ascii_case("desc") {
            Some(SortDirection::Desc)
        } else {
            None
        }
    }

    fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Static description of a scope: base tables, identity filter and sort whitelist.
struct ScopeShape {
    /// FROM clause for the data query.
    from: &'static str,
    /// FROM clause for the count query (no outer join needed).
    count_from: &'static str,
    /// Predicate restricting rows to one user, if the scope is per-user.
    identity: Option<&'static str>,
    /// Columns appended after [`BOOK_COLUMNS`].
    extra_columns: &'static str,
    /// Accepted sort keys and the columns they map to.
    sort_keys: &'static [(&'static str, &'static str)],
    default_sort: &'static str,
    default_direction: SortDirection,
}

const ALL_BOOKS: ScopeShape = ScopeShape {
    from: "books LEFT JOIN users ON users.id = books.created_by",
    count_from: "books",
    identity: None,
    extra_columns: "",
    sort_keys: &[
        ("title", "books.title"),
        ("created_at", "books.created_at"),
    ],
    default_sort: "books.title",
    default_direction: SortDirection::Asc,
};

const OWNED_BOOKS: ScopeShape = ScopeShape {
    from: "user_books
            JOIN books ON books.id = user_books.book_id
            LEFT JOIN users ON users.id = books.created_by",
    count_from: "user_books JOIN books ON books.id = user_books.book_id",
    identity: Some("user_books.user_id = ?"),
    extra_columns: "",
    sort_keys: &[
        ("title", "books.title"),
        ("created_at", "user_books.added_at"),
        ("added_at", "user_books.added_at"),
    ],
    default_sort: "user_books.added_at",
    default_direction: SortDirection::Desc,
};

const READING_LIST: ScopeShape = ScopeShape {
    from: "reading_list
            JOIN books ON books.id = reading_list.book_id
            LEFT JOIN users ON users.id = books.created_by",
    count_from: "reading_list JOIN books ON books.id = reading_list.book_id",
    identity: Some("reading_list.user_id = ?"),
    extra_columns: ", reading_list.currently_reading, reading_list.added_at",
    sort_keys: &[
        ("title", "books.title"),
        ("created_at", "reading_list.added_at"),
        ("added_at", "reading_list.added_at"),
    ],
    default_sort: "reading_list.added_at",
    default_direction: SortDirection::Desc,
};

impl Scope {
    fn shape(&self) -> &'static ScopeShape {
        match self {
            Scope::All => &ALL_BOOKS,
            Scope::Owned { .. } => &OWNED_BOOKS,
            Scope::ReadingList { .. } => &READING_LIST,
        }
    }

    fn user_id(&self) -> Option<&str> {
        match self {
            Scope::All => None,
            Scope::Owned { user_id } | Scope::ReadingList { user_id } => Some(user_id),
        }
    }

    /// Whether rows carry reading-list columns.
    pub fn is_reading_list(&self) -> bool {
        matches!(self, Scope::ReadingList { .. })
    }

    /// Resolve a requested sort key to a column; unknown keys give the default.
    pub fn sort_column(&self, key: Option<&str>) -> &'static str {
        let shape = self.shape();
        key.and_then(|k| {
            shape
                .sort_keys
                .iter()
                .find(|(name, _)| *name == k)
                .map(|(_, column)| *column)
        })
        .unwrap_or(shape.default_sort)
    }

    /// Resolve a requested direction; unrecognized tokens give the default.
    pub fn direction(&self, raw: Option<&str>) -> SortDirection {
        raw.and_then(SortDirection::parse)
            .unwrap_or(self.shape().default_direction)
    }
}

/// Raw list parameters as they arrive on the query string.
///
/// Numbers are kept as strings so that junk like `page=abc` falls back to the
/// defaults instead of rejecting the whole request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    /// Title search term.
    pub q: Option<String>,
    /// Exact genre.
    pub genre: Option<String>,
    /// Page number, 1-based.
    pub page: Option<String>,
    /// Page size.
    pub limit: Option<String>,
    /// Sort key.
    pub sort: Option<String>,
    /// `asc` or `desc`.
    pub order: Option<String>,
}

/// Normalized list request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    /// Title search term; empty matches everything.
    pub search: String,
    /// Genre filter.
    pub genre: Option<String>,
    /// Whitelisted sort column.
    pub sort_column: &'static str,
    /// Sort direction.
    pub direction: SortDirection,
    /// Page number, at least 1.
    pub page: i64,
    /// Page size in `1..=MAX_LIMIT`.
    pub limit: i64,
}

impl ListQuery {
    /// Normalize raw parameters for a scope.
    pub fn resolve(params: &ListParams, scope: &Scope) -> Self {
        Self {
            search: params.q.clone().unwrap_or_default(),
            genre: params.genre.clone().filter(|g| !g.is_empty()),
            sort_column: scope.sort_column(params.sort.as_deref()),
            direction: scope.direction(params.order.as_deref()),
            page: clamp_page(parse_int(params.page.as_deref())),
            limit: clamp_limit(parse_int(params.limit.as_deref())),
        }
    }

    /// Number of rows skipped before this page.
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

fn parse_int(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|s| s.trim().parse().ok())
}

/// Missing or non-positive pages become page 1.
pub fn clamp_page(page: Option<i64>) -> i64 {
    page.filter(|p| *p >= 1).unwrap_or(DEFAULT_PAGE)
}

/// Missing or non-positive limits become [`DEFAULT_LIMIT`]; large ones are capped.
pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit
        .filter(|l| *l >= 1)
        .unwrap_or(DEFAULT_LIMIT)
        .min(MAX_LIMIT)
}

/// Lowercase `text` the same way the `fold` SQL function does.
pub fn fold(text: &str) -> String {
    text.to_lowercase()
}

/// Escape LIKE wildcards so the term is matched literally (with `ESCAPE '\'`).
pub fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// A value bound to a placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    /// TEXT.
    Text(String),
    /// INTEGER.
    Integer(i64),
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            SqlValue::Text(s) => s.to_sql(),
            SqlValue::Integer(i) => i.to_sql(),
        }
    }
}

/// Accumulates `fragment ? value` pairs and renders them as an AND list with
/// numbered placeholders.
#[derive(Debug, Default)]
pub struct Predicates {
    clauses: Vec<(&'static str, SqlValue)>,
}

impl Predicates {
    /// Create an empty predicate list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fragment holding exactly one `?` and the value bound to it.
    pub fn push(&mut self, fragment: &'static str, value: SqlValue) -> &mut Self {
        debug_assert_eq!(fragment.matches('?').count(), 1);
        self.clauses.push((fragment, value));
        self
    }

    /// Number of bound values.
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    /// Whether no predicate was added.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Render the WHERE body with placeholders `?1..?n`.
    pub fn render(&self) -> String {
        if self.is_empty() {
            return "1 = 1".to_string();
        }

        self.clauses
            .iter()
            .enumerate()
            .map(|(i, (fragment, _))| fragment.replacen('?', &format!("?{}", i + 1), 1))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Bound values in placeholder order.
    pub fn into_values(self) -> Vec<SqlValue> {
        self.clauses.into_iter().map(|(_, value)| value).collect()
    }
}

/// Count and data statements sharing one WHERE clause.
#[derive(Debug)]
pub struct BuiltQuery {
    /// `SELECT COUNT(*) ...`, bound with [`BuiltQuery::params`].
    pub count_sql: String,
    /// Paged `SELECT ...`, bound with [`BuiltQuery::data_params`].
    pub data_sql: String,
    /// Values for the WHERE placeholders.
    pub params: Vec<SqlValue>,
    /// Page size bound after the WHERE values.
    pub limit: i64,
    /// Offset bound after the limit.
    pub offset: i64,
}

impl BuiltQuery {
    /// Values for the data statement: WHERE values, then limit and offset.
    pub fn data_params(&self) -> Vec<SqlValue> {
        let mut values = self.params.clone();
        values.push(SqlValue::Integer(self.limit));
        values.push(SqlValue::Integer(self.offset));
        values
    }
}

/// Build the count and data statements for a scope.
pub fn build(scope: &Scope, query: &ListQuery) -> BuiltQuery {
    let shape = scope.shape();

    let mut predicates = Predicates::new();
    if let (Some(fragment), Some(user_id)) = (shape.identity, scope.user_id()) {
        predicates.push(fragment, SqlValue::Text(user_id.to_string()));
    }
    predicates.push(
        "fold(books.title) LIKE ? ESCAPE '\\'",
        SqlValue::Text(like_pattern(&fold(&query.search))),
    );
    if let Some(genre) = &query.genre {
        predicates.push("books.genre = ?", SqlValue::Text(genre.clone()));
    }

    let where_sql = predicates.render();
    let next = predicates.len() + 1;
    let dir = query.direction.as_sql();

    let count_sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {}",
        shape.count_from, where_sql
    );
    let data_sql = format!(
        "SELECT {}{}
         FROM {}
         WHERE {}
         ORDER BY {} {}, books.id {}
         LIMIT ?{} OFFSET ?{}",
        BOOK_COLUMNS,
        shape.extra_columns,
        shape.from,
        where_sql,
        query.sort_column,
        dir,
        dir,
        next,
        next + 1
    );

    BuiltQuery {
        count_sql,
        data_sql,
        params: predicates.into_values(),
        limit: query.limit,
        offset: query.offset(),
    }
}

/// Pagination metadata returned with every list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// Requested page.
    pub current_page: i64,
    /// `ceil(total_books / limit)`, 0 for an empty result.
    pub total_pages: i64,
    /// Rows matching the filters across all pages.
    pub total_books: i64,
}

impl Pagination {
    /// Compute metadata for a page.
    pub fn new(current_page: i64, limit: i64, total_books: i64) -> Self {
        let total_pages = if total_books <= 0 {
            0
        } else {
            (total_books + limit - 1) / limit
        };

        Self {
            current_page,
            total_pages,
            total_books: total_books.max(0),
        }
    }
}

/// One page of list results.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    /// Rows on this page.
    pub books: Vec<T>,
    /// Pagination metadata.
    pub pagination: Pagination,
}

impl<T> Page<T> {
    /// Empty page reported when the backend cannot answer.
    pub fn empty(current_page: i64, limit: i64) -> Self {
        Self {
            books: Vec::new(),
            pagination: Pagination::new(current_page, limit, 0),
        }
    }
}
