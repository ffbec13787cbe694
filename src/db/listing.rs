//! Execution of list queries built by [`crate::query`].

use super::{BookSummary, Database};
use crate::error::Result;
use crate::query::{self, ListQuery, Page, Pagination, Scope};
use rusqlite::{Row, params_from_iter};

fn summary_from_row(row: &Row<'_>, reading_list: bool) -> rusqlite::Result<BookSummary> {
    let (currently_reading, added_at) = if reading_list {
        (Some(row.get(11)?), Some(row.get(12)?))
    } else {
        (None, None)
    };

    Ok(BookSummary {
        id: row.get(0)?,
        title: row.get(1)?,
        authors: row.get(2)?,
        genre: row.get(3)?,
        description: row.get(4)?,
        cover_source: row.get(5)?,
        cover_url: row.get(6)?,
        cover_id: row.get(7)?,
        created_by: row.get(8)?,
        username: row.get(9)?,
        created_at: row.get(10)?,
        currently_reading,
        added_at,
    })
}

impl Database {
    /// Run a list query: count the matches, then fetch the requested page.
    ///
    /// Both statements come from the same predicate list and run under one
    /// lock, so the total always describes the rows being paged.
    pub fn list_books(&self, scope: &Scope, query: &ListQuery) -> Result<Page<BookSummary>> {
        let built = query::build(scope, query);
        let conn = self.conn.lock();

        let total_books: i64 =
            conn.query_row(&built.count_sql, params_from_iter(built.params.iter()), |row| {
                row.get(0)
            })?;

        let reading_list = scope.is_reading_list();
        let mut stmt = conn.prepare(&built.data_sql)?;
        let books = stmt
            .query_map(params_from_iter(built.data_params()), |row| {
                summary_from_row(row, reading_list)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Page {
            books,
            pagination: Pagination::new(query.page, query.limit, total_books),
        })
    }
}
