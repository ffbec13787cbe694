//! Bulk import of Open Library CSV exports.
//!
//! The export has a header row naming at least `work_key` and `title`;
//! `author_name`, `description`, `genre` and `cover_id` are optional and
//! other columns are ignored. Rows are streamed from the reader and written
//! in batches, each batch in its own transaction. Rows whose work key is
//! already in the catalog are skipped.

use crate::db::{Database, ImportedBook};
use crate::error::{AppError, Result};
use std::io::Read;

/// Rows per insert transaction.
pub const DEFAULT_BATCH_SIZE: usize = 200;

/// Running totals of an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportProgress {
    /// Rows read from the file.
    pub read: usize,
    /// Rows actually inserted.
    pub inserted: usize,
}

/// Import a CSV export, calling `on_batch` after every written batch.
pub fn import_csv<R: Read>(
    db: &Database,
    reader: R,
    batch_size: usize,
    mut on_batch: impl FnMut(ImportProgress),
) -> Result<ImportProgress> {
    if batch_size == 0 {
        return Err(AppError::InvalidFormat(
            "Batch size must be at least 1".to_string(),
        ));
    }

    let mut rows = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut progress = ImportProgress::default();
    let mut batch: Vec<ImportedBook> = Vec::with_capacity(batch_size);

    for row in rows.deserialize::<ImportedBook>() {
        let row = row.map_err(|e| {
            AppError::InvalidFormat(format!("Bad CSV row {}: {}", progress.read + 1, e))
        })?;
        progress.read += 1;
        batch.push(row);

        if batch.len() >= batch_size {
            progress.inserted += db.import_books(&batch)?;
            batch.clear();
            on_batch(progress);
        }
    }

    if !batch.is_empty() {
        progress.inserted += db.import_books(&batch)?;
        on_batch(progress);
    }

    tracing::info!(read = progress.read, inserted = progress.inserted, "Import finished");
    Ok(progress)
}
